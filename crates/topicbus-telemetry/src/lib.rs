//! Topicbus Telemetry - Logging setup for topicbus applications.
//!
//! The bus itself only emits `tracing` events. This crate installs a
//! subscriber for them with two sinks running together:
//! - A console sink on stdout or stderr, optionally colorized
//! - A rotating file sink with bounded retention, on by default
//!
//! Each sink has its own level filter.
//!
//! # Example
//!
//! ```rust,no_run
//! use topicbus_telemetry::{FileRotation, LogConfig, setup_logging};
//!
//! # fn main() -> Result<(), topicbus_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_file_logging("./log", "app", FileRotation::Hourly)
//!     .with_file_level("debug")
//!     .with_directive("hyper=warn");
//!
//! setup_logging(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    ConsoleLogConfig, ConsoleStream, FileLogConfig, FileRotation, LogConfig, LogFormat,
    file_appender, setup_default_logging, setup_logging,
};
