//! Topicbus - In-process topic-based publish/subscribe.
//!
//! This crate provides:
//! - A topic registry of typed handlers, guarded by one reader/writer lock
//! - Fire-and-forget broadcast to every handler of a topic
//! - Single-handler request/response with a caller-supplied timeout
//!
//! # Architecture
//!
//! Components register plain Rust functions or closures against string
//! topics. Publishers pass positional [`Value`] arguments:
//!
//! 1. **Fire-and-forget**: [`EventBus::publish`] snapshots the topic's
//!    handlers and runs each one as an independent task on the tokio
//!    blocking pool. Results are discarded.
//!
//! 2. **Reply**: [`EventBus::publish_with_reply`] runs the topic's only
//!    handler and races its return value against a deadline.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use topicbus::{EventBus, json};
//!
//! fn greet(name: String) -> String {
//!     format!("hello {name}")
//! }
//!
//! # async fn example() -> topicbus::BusResult<()> {
//! let bus = EventBus::new();
//! bus.subscribe("greet", greet)?;
//!
//! let reply = bus
//!     .publish_with_reply("greet", Duration::from_millis(100), vec![json!("world")])
//!     .await?;
//! assert_eq!(reply, Some(json!("hello world")));
//!
//! bus.unsubscribe("greet", &greet)?;
//! assert!(!bus.has_callback("greet"));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod config;
mod error;
mod handler;
mod registry;

pub use bus::EventBus;
pub use config::{BusConfig, DEFAULT_REPLY_TIMEOUT_MS};
pub use error::{BusError, BusResult, ConfigError, ConfigResult, InvokeError};
pub use handler::{Handler, HandlerKey, IntoHandler, IntoReturn, Reply, Signature};
pub use registry::TopicRegistry;
pub use serde_json::{Value, json};
