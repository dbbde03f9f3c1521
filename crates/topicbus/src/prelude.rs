//! Prelude module - commonly used types for convenient import.
//!
//! Use `use topicbus::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use topicbus::prelude::*;
//!
//! # async fn example() -> BusResult<()> {
//! let bus = EventBus::new();
//! bus.subscribe("audit", |action: String| {
//!     tracing::info!(%action, "audited");
//! })?;
//!
//! bus.publish("audit", vec![json!("login")]);
//! # Ok(())
//! # }
//! ```

// Event bus
pub use crate::{BusConfig, EventBus, TopicRegistry};

// Errors
pub use crate::{BusError, BusResult};

// Handlers
pub use crate::{Handler, IntoHandler, IntoReturn, Reply};

// Values
pub use crate::{Value, json};
