//! # Grapnel Runtime Library
//!
//! A low-level runtime toolkit for code that manages resources by hand:
//!
//! - **Allocators**: a pluggable allocation capability with bump-pointer and
//!   OS-virtual-memory arena variants
//! - **Defer Runtime**: scope-based deferred actions and multi-level early
//!   exit over a per-thread continuation stack
//! - **Monitor**: a mutex + condition-variable pair guarding one-time
//!   initialization
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      GRAPNEL RUNTIME                       │
//! ├────────────────────────────────────────────────────────────┤
//! │                                                            │
//! │  ┌─────────────┐      ┌─────────────┐     ┌────────────┐   │
//! │  │    Defer    │─────▶│ VirtualArena│     │  BumpArena │   │
//! │  │ (defer.rs)  │      │ (arena.rs)  │     │ (arena.rs) │   │
//! │  └─────────────┘      └─────────────┘     └────────────┘   │
//! │        │                     │                  │          │
//! │        ▼                     ▼                  ▼          │
//! │  ┌─────────────┐      ┌─────────────┐     ┌────────────┐   │
//! │  │   Monitor   │      │    Vmem     │     │ Allocator  │   │
//! │  │(monitor.rs) │      │  (vmem.rs)  │     │ (alloc.rs) │   │
//! │  └─────────────┘      └─────────────┘     └────────────┘   │
//! │                                                            │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The defer runtime hosts each thread's continuation stack in a private
//! [`VirtualArena`](arena::VirtualArena), which is what lets the stack grow
//! without its records ever moving. Everything else consumes memory through
//! the [`Allocator`](alloc::Allocator) capability and never depends on a
//! concrete variant.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod alloc;
pub mod arena;
pub mod config;
pub mod defer;
pub mod log;
pub mod monitor;
pub mod vmem;

// Re-exports
pub use alloc::{AllocError, Allocator, NullAllocator, SystemAllocator};
pub use arena::{BumpArena, VirtualArena};
pub use config::{ConfigError, DeferConfig, LogConfig, RuntimeConfig, RuntimeConfigBuilder};
pub use defer::{scope, using, Flow, FrameId, Scope};
pub use monitor::{Monitor, MonitorGuard};

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One kibibyte.
pub const KB: usize = 1 << 10;
/// One mebibyte.
pub const MB: usize = 1 << 20;
/// One gibibyte.
pub const GB: usize = 1 << 30;

/// Global runtime configuration, captured once by [`init_with`].
static RUNTIME_CONFIG: std::sync::OnceLock<RuntimeConfig> = std::sync::OnceLock::new();

/// Install a runtime configuration.
///
/// Must run before any thread touches the defer runtime; threads that
/// initialized earlier keep the settings they started with. The first
/// configuration installed wins, later calls only update the log settings.
pub fn init_with(config: RuntimeConfig) {
    log::set_level(config.log.level);
    log::set_format(config.log.format);
    let _ = RUNTIME_CONFIG.set(config);
}

/// Install a configuration read from `GRAPNEL_*` environment variables.
pub fn init_from_env() {
    init_with(RuntimeConfig::from_env());
}

/// Get the installed runtime configuration.
///
/// Returns `None` when [`init_with`] has not run; consumers then fall back
/// to defaults.
pub fn runtime_config() -> Option<&'static RuntimeConfig> {
    RUNTIME_CONFIG.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_constants() {
        assert_eq!(KB, 1024);
        assert_eq!(MB, 1024 * KB);
        assert_eq!(GB, 1024 * MB);
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
