//! # Runtime Configuration
//!
//! Configuration for the runtime, settable programmatically or from
//! environment variables.
//!
//! # Environment Variables
//!
//! All variables use the `GRAPNEL_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `GRAPNEL_STACK_RESERVE_BYTES` | Address space reserved per thread for the deferral stack | 1073741824 (1 GiB) |
//! | `GRAPNEL_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//! | `GRAPNEL_LOG_FORMAT` | Log output format (plain/json) | plain |
//!
//! Unparseable values fall back to their defaults.
//!
//! # Example
//!
//! ```rust,ignore
//! use grapnel_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::builder()
//!     .stack_reserve_bytes(64 * grapnel_runtime::MB)
//!     .build()
//!     .unwrap();
//! grapnel_runtime::init_with(config);
//! ```

use std::env;
use std::fmt;

use crate::log::{LogFormat, LogLevel};
use crate::{GB, KB};

/// Smallest accepted deferral-stack reservation.
pub const MIN_STACK_RESERVE: usize = 64 * KB;

/// Defer-runtime configuration.
#[derive(Debug, Clone)]
pub struct DeferConfig {
    /// Address space reserved per thread for the deferral stack.
    /// Default: 1 GiB. Only touched pages consume physical memory.
    pub stack_reserve_bytes: usize,
}

impl Default for DeferConfig {
    fn default() -> Self {
        Self {
            stack_reserve_bytes: GB,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Minimum level emitted.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Defer-runtime settings.
    pub defer: DeferConfig,
    /// Logging settings.
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Create a builder with default values.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Load configuration from `GRAPNEL_*` environment variables, using
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(bytes) = read_env_usize("GRAPNEL_STACK_RESERVE_BYTES") {
            if bytes >= MIN_STACK_RESERVE {
                config.defer.stack_reserve_bytes = bytes;
            }
        }
        if let Ok(value) = env::var("GRAPNEL_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&value) {
                config.log.level = level;
            }
        }
        if let Ok(value) = env::var("GRAPNEL_LOG_FORMAT") {
            if let Some(format) = LogFormat::parse(&value) {
                config.log.format = format;
            }
        }
        config
    }
}

fn read_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok()?.trim().parse().ok()
}

/// Error produced when a configuration fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A size setting is below its required minimum.
    TooSmall {
        /// Name of the offending setting.
        name: &'static str,
        /// Smallest accepted value.
        minimum: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TooSmall { name, minimum } => {
                write!(f, "{name} must be at least {minimum} bytes")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Set the per-thread deferral-stack reservation in bytes.
    pub fn stack_reserve_bytes(mut self, bytes: usize) -> Self {
        self.config.defer.stack_reserve_bytes = bytes;
        self
    }

    /// Set the minimum log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Set the log output format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log.format = format;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        if self.config.defer.stack_reserve_bytes < MIN_STACK_RESERVE {
            return Err(ConfigError::TooSmall {
                name: "stack_reserve_bytes",
                minimum: MIN_STACK_RESERVE,
            });
        }
        Ok(self.config)
    }
}
