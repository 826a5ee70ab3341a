//! # Runtime Configuration
//!
//! Centralized configuration and logging setup for the actor runtime.
//!
//! ## Features
//!
//! - **Scheduler Settings**: worker count, efficiency/performance split, batch size
//! - **Remote Settings**: remote core count and listen endpoint
//! - **Debug Settings**: argument type tracking for chained messages
//! - **Logging**: `tracing-subscriber` setup with env-filter and JSON output
//!
//! ## Usage
//!
//! ```rust,no_run
//! use runtime_config::{init_logging, load_config};
//!
//! let config = load_config(Some("config/runtime.toml")).unwrap();
//! init_logging(&config.logging).unwrap();
//! assert!(config.scheduler.default_batch_size > 0);
//! ```

pub mod logging;
pub mod runtime_config;

// Re-export commonly used types
pub use logging::init_logging;
pub use runtime_config::{
    load_config, DebugSettings, LoggingSettings, RemoteSettings, RuntimeConfig, SchedulerSettings,
};
