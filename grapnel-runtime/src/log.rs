//! # Logging
//!
//! Structured logging for the runtime's own lifecycle events: address-space
//! reservations, per-thread initialization, decommits, and OS failures.
//!
//! The module is self-contained: a global atomic level gate keeps disabled
//! levels at the cost of one load, and a [`LogBuilder`] attaches typed
//! key-value fields to a message. Output goes to stderr (or stdout) in plain
//! text or JSON.
//!
//! # Example
//!
//! ```rust,ignore
//! use grapnel_runtime::log::{self, LogBuilder, LogLevel};
//!
//! log::set_level(LogLevel::Debug);
//! LogBuilder::new(LogLevel::Debug)
//!     .target("defer")
//!     .message("continuation stack reserved")
//!     .field_int("bytes", 1 << 30)
//!     .emit();
//! ```

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace = 0,
    /// Debug level.
    Debug = 1,
    /// Informational messages (default).
    #[default]
    Info = 2,
    /// Warning level.
    Warn = 3,
    /// Error level.
    Error = 4,
    /// No logging.
    Off = 5,
}

impl LogLevel {
    /// Get the level name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Off => "OFF",
        }
    }

    /// Get the level from a u8.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(LogLevel::Trace),
            1 => Some(LogLevel::Debug),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Warn),
            4 => Some(LogLevel::Error),
            5 => Some(LogLevel::Off),
            _ => None,
        }
    }

    /// Parse a log level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" | "err" => Some(LogLevel::Error),
            "off" | "none" => Some(LogLevel::Off),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output format for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain text (human readable).
    #[default]
    Plain,
    /// JSON (machine readable).
    Json,
}

impl LogFormat {
    /// Parse a format from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plain" | "text" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// A typed value attached to a log entry.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// String value.
    Str(String),
    /// Signed integer value.
    Int(i64),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => write!(f, "{s}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl FieldValue {
    fn to_json(&self) -> String {
        match self {
            FieldValue::Str(s) => format!("\"{}\"", escape_json(s)),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Bool(b) => b.to_string(),
        }
    }
}

// ============================================================================
// Global logger state
// ============================================================================

/// Minimum log level (atomic for fast gating).
static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Output configuration behind the writer lock.
struct Output {
    format: LogFormat,
    use_stderr: bool,
}

static OUTPUT: OnceLock<Mutex<Output>> = OnceLock::new();

fn output() -> &'static Mutex<Output> {
    OUTPUT.get_or_init(|| {
        Mutex::new(Output {
            format: LogFormat::Plain,
            use_stderr: true,
        })
    })
}

/// Set the minimum log level.
pub fn set_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Get the current minimum log level.
pub fn level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::SeqCst)).unwrap_or(LogLevel::Info)
}

/// Set the output format.
pub fn set_format(format: LogFormat) {
    output().lock().format = format;
}

/// Set whether log output goes to stderr (default) or stdout.
pub fn set_use_stderr(use_stderr: bool) {
    output().lock().use_stderr = use_stderr;
}

/// Check whether a message at `level` would be emitted.
pub fn would_log(level: LogLevel) -> bool {
    level != LogLevel::Off && level as u8 >= MIN_LEVEL.load(Ordering::SeqCst)
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for structured log entries.
#[derive(Debug)]
pub struct LogBuilder {
    level: LogLevel,
    target: Option<&'static str>,
    message: String,
    fields: Vec<(&'static str, FieldValue)>,
}

impl LogBuilder {
    /// Create a builder for an entry at `level`.
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            target: None,
            message: String::new(),
            fields: Vec::new(),
        }
    }

    /// Set the message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the originating module.
    pub fn target(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Add a string field.
    pub fn field_str(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.fields.push((key, FieldValue::Str(value.into())));
        self
    }

    /// Add an integer field.
    pub fn field_int(mut self, key: &'static str, value: i64) -> Self {
        self.fields.push((key, FieldValue::Int(value)));
        self
    }

    /// Add a boolean field.
    pub fn field_bool(mut self, key: &'static str, value: bool) -> Self {
        self.fields.push((key, FieldValue::Bool(value)));
        self
    }

    /// Format the entry as plain text.
    pub fn format_plain(&self) -> String {
        let millis = timestamp_millis();
        let mut out = format!(
            "[{}.{:03}] {:<5} ",
            millis / 1000,
            millis % 1000,
            self.level.as_str()
        );
        if let Some(target) = self.target {
            out.push_str(&format!("[{target}] "));
        }
        if let Some(name) = std::thread::current().name() {
            out.push_str(&format!("({name}) "));
        }
        out.push_str(&self.message);
        if !self.fields.is_empty() {
            out.push_str(" {");
            for (i, (key, value)) in self.fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format!("{key}={value}"));
            }
            out.push('}');
        }
        out
    }

    /// Format the entry as a JSON object.
    pub fn format_json(&self) -> String {
        let mut out = format!(
            "{{\"timestamp\":{},\"level\":\"{}\"",
            timestamp_millis(),
            self.level.as_str()
        );
        if let Some(target) = self.target {
            out.push_str(&format!(",\"target\":\"{}\"", escape_json(target)));
        }
        out.push_str(&format!(",\"message\":\"{}\"", escape_json(&self.message)));
        if !self.fields.is_empty() {
            out.push_str(",\"fields\":{");
            for (i, (key, value)) in self.fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("\"{}\":{}", escape_json(key), value.to_json()));
            }
            out.push('}');
        }
        out.push('}');
        out
    }

    /// Emit the entry through the global writer.
    pub fn emit(self) {
        if !would_log(self.level) {
            return;
        }
        let config = output().lock();
        let line = match config.format {
            LogFormat::Plain => self.format_plain(),
            LogFormat::Json => self.format_json(),
        };
        if config.use_stderr {
            let _ = writeln!(std::io::stderr(), "{line}");
        } else {
            let _ = writeln!(std::io::stdout(), "{line}");
        }
    }
}

fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn escape_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Log a message at the given level.
pub fn log(level: LogLevel, message: impl Into<String>) {
    if would_log(level) {
        LogBuilder::new(level).message(message).emit();
    }
}

/// Log a trace message.
pub fn trace(message: impl Into<String>) {
    log(LogLevel::Trace, message);
}

/// Log a debug message.
pub fn debug(message: impl Into<String>) {
    log(LogLevel::Debug, message);
}

/// Log an info message.
pub fn info(message: impl Into<String>) {
    log(LogLevel::Info, message);
}

/// Log a warning message.
pub fn warn(message: impl Into<String>) {
    log(LogLevel::Warn, message);
}

/// Log an error message.
pub fn error(message: impl Into<String>) {
    log(LogLevel::Error, message);
}
