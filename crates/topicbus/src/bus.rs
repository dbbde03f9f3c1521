//! Event bus: subscription management and the two dispatch paths.

use std::any::Any;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::handler::{Handler, IntoHandler};
use crate::registry::TopicRegistry;

/// Topic-based publish/subscribe dispatcher.
///
/// Handlers are synchronous callables. Every invocation runs on the tokio
/// blocking pool, never on the publishing thread. Clones share the same
/// registry, so a bus can be handed to any number of components.
///
/// **WARNING:** Capturing a clone of the bus inside one of its own handlers
/// creates an `Arc` cycle and the registry is never freed. Capture a
/// `std::sync::Weak` or use a separate channel instead.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<TopicRegistry>,
    runtime: Option<Handle>,
    config: BusConfig,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("registry", &self.registry)
            .field("has_runtime", &self.runtime.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl EventBus {
    /// Create a bus with default configuration.
    ///
    /// Binds to the current tokio runtime if there is one. Otherwise the
    /// runtime is looked up again each time a handler is dispatched.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Create a bus with the given configuration.
    #[must_use]
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            registry: Arc::new(TopicRegistry::new()),
            runtime: Handle::try_current().ok(),
            config,
        }
    }

    /// Create a bus that dispatches onto an explicit runtime.
    #[must_use]
    pub fn with_runtime(runtime: Handle, config: BusConfig) -> Self {
        Self {
            registry: Arc::new(TopicRegistry::new()),
            runtime: Some(runtime),
            config,
        }
    }

    /// The bus configuration.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// The topic registry.
    #[must_use]
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    fn runtime(&self) -> Option<Handle> {
        self.runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    /// Subscribe a callable to a topic.
    ///
    /// Subscribing the same callable twice registers it twice.
    ///
    /// # Errors
    ///
    /// Never fails for a typed callable; the `Result` matches
    /// [`subscribe_any`](Self::subscribe_any).
    pub fn subscribe<F, M>(&self, topic: impl Into<String>, handler: F) -> BusResult<()>
    where
        F: IntoHandler<M>,
    {
        self.registry.insert(topic, handler.into_handler());
        Ok(())
    }

    /// Subscribe a callable whose invocations never overlap each other.
    ///
    /// # Errors
    ///
    /// Never fails for a typed callable.
    pub fn subscribe_serial<F, M>(&self, topic: impl Into<String>, handler: F) -> BusResult<()>
    where
        F: IntoHandler<M>,
    {
        self.registry.insert(topic, handler.into_handler().serial());
        Ok(())
    }

    /// Subscribe a dynamically typed value.
    ///
    /// Accepts a prepared [`Handler`] (directly or as `Box<Handler>`) or a
    /// function pointer of one of these shapes:
    ///
    /// - `fn()`, `fn() -> Value`
    /// - `fn(Value)`, `fn(Value) -> Value`
    /// - `fn(Value, Value)`, `fn(Value, Value) -> Value`
    /// - `fn(String)`, `fn(String) -> String`
    ///
    /// Other callables have to be wrapped with [`Handler::new`] first.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotInvocable`] for any other value. The topic is
    /// left untouched.
    pub fn subscribe_any(
        &self,
        topic: impl Into<String>,
        candidate: Box<dyn Any + Send + Sync>,
    ) -> BusResult<()> {
        let topic = topic.into();
        let Ok(handler) = downcast_handler(candidate) else {
            error!(topic = %topic, "Subscribed value is not invocable");
            return Err(BusError::NotInvocable { topic });
        };
        self.registry.insert(topic, handler);
        Ok(())
    }

    /// Remove the first registration of `handler` from a topic.
    ///
    /// Matching is by callable identity, see
    /// [`HandlerKey`](crate::HandlerKey). A callable that is not registered
    /// is silently ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownTopic`] if the topic has no handlers.
    pub fn unsubscribe<F, M>(&self, topic: &str, handler: &F) -> BusResult<()>
    where
        F: IntoHandler<M>,
    {
        self.registry.remove(topic, &handler.key()).map(|_| ())
    }

    /// Whether any handler is subscribed to the topic.
    #[must_use]
    pub fn has_callback(&self, topic: &str) -> bool {
        self.registry.has_callback(topic)
    }

    /// Number of handlers subscribed to the topic.
    #[must_use]
    pub fn handler_count(&self, topic: &str) -> usize {
        self.registry.handler_count(topic)
    }

    /// All topics that were ever subscribed to.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.registry.topics()
    }

    /// Invoke every handler of a topic and discard the results.
    ///
    /// Each handler runs as its own task; this returns as soon as they are
    /// scheduled. Argument `i` goes to parameter `i`, and a `null` argument
    /// becomes the parameter's zero value. Handlers that fail or panic are
    /// logged and otherwise ignored.
    ///
    /// Returns the number of handlers scheduled.
    pub fn publish(&self, topic: &str, args: Vec<Value>) -> usize {
        let Some(handlers) = self.registry.snapshot(topic).filter(|h| !h.is_empty()) else {
            trace!(topic = %topic, "No handlers for topic");
            return 0;
        };

        let Some(runtime) = self.runtime() else {
            error!(topic = %topic, "No async runtime available, event dropped");
            return 0;
        };

        trace!(topic = %topic, handler_count = handlers.len(), "Publishing event");

        for handler in &handlers {
            let handler = Arc::clone(handler);
            let args = args.clone();
            let topic = topic.to_owned();
            runtime.spawn_blocking(move || {
                if let Err(e) = handler.invoke(args) {
                    warn!(
                        topic = %topic,
                        handler = %handler.signature(),
                        error = %e,
                        "Handler invocation failed"
                    );
                }
            });
        }

        handlers.len()
    }

    /// Invoke the single handler of a topic and wait for its reply.
    ///
    /// Returns `Some(value)` when the handler returns exactly one value and
    /// `None` when it returns zero or several. The handler is not cancelled
    /// on timeout and may still run to completion. A handler that fails or
    /// panics is logged and looks like a timeout to the caller.
    ///
    /// # Errors
    ///
    /// - [`BusError::UnknownTopic`] if the topic was never subscribed to.
    /// - [`BusError::HandlerCountMismatch`] unless the topic has exactly one
    ///   handler. No handler runs in that case.
    /// - [`BusError::Timeout`] if no reply arrives within `timeout`.
    /// - [`BusError::NoRuntime`] if no tokio runtime is available.
    pub async fn publish_with_reply(
        &self,
        topic: &str,
        timeout: Duration,
        args: Vec<Value>,
    ) -> BusResult<Option<Value>> {
        let (handler, runtime) = self.prepare_reply(topic)?;
        let started = Instant::now();

        let (tx, rx) = oneshot::channel();
        spawn_reply(&runtime, topic, handler, args, move |values| {
            let _ = tx.send(values);
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(values)) => Ok(single_value(topic, values)),
            Ok(Err(_)) => {
                // The handler failed; the caller still waits out its deadline.
                tokio::time::sleep(timeout.saturating_sub(started.elapsed())).await;
                Err(timed_out(topic, timeout))
            },
            Err(_) => Err(timed_out(topic, timeout)),
        }
    }

    /// Blocking form of [`publish_with_reply`](Self::publish_with_reply).
    ///
    /// Blocks only the calling thread. Must not be called from inside an
    /// async task.
    ///
    /// # Errors
    ///
    /// Same as [`publish_with_reply`](Self::publish_with_reply).
    pub fn publish_with_reply_blocking(
        &self,
        topic: &str,
        timeout: Duration,
        args: Vec<Value>,
    ) -> BusResult<Option<Value>> {
        let (handler, runtime) = self.prepare_reply(topic)?;
        let started = Instant::now();

        let (tx, rx) = mpsc::sync_channel(1);
        spawn_reply(&runtime, topic, handler, args, move |values| {
            let _ = tx.send(values);
        });

        match rx.recv_timeout(timeout) {
            Ok(values) => Ok(single_value(topic, values)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timeout.saturating_sub(started.elapsed()));
                Err(timed_out(topic, timeout))
            },
            Err(mpsc::RecvTimeoutError::Timeout) => Err(timed_out(topic, timeout)),
        }
    }

    /// [`publish_with_reply`](Self::publish_with_reply) with the configured
    /// default deadline.
    ///
    /// # Errors
    ///
    /// Same as [`publish_with_reply`](Self::publish_with_reply).
    pub async fn request(&self, topic: &str, args: Vec<Value>) -> BusResult<Option<Value>> {
        self.publish_with_reply(topic, self.config.reply_timeout(), args)
            .await
    }

    fn prepare_reply(&self, topic: &str) -> BusResult<(Arc<Handler>, Handle)> {
        let handlers = self
            .registry
            .snapshot(topic)
            .ok_or_else(|| BusError::UnknownTopic {
                topic: topic.to_owned(),
            })?;

        let handler = match handlers.as_slice() {
            [handler] => Arc::clone(handler),
            _ => {
                return Err(BusError::HandlerCountMismatch {
                    topic: topic.to_owned(),
                    expected: 1,
                    actual: handlers.len(),
                });
            },
        };

        let runtime = self.runtime().ok_or_else(|| BusError::NoRuntime {
            topic: topic.to_owned(),
        })?;

        Ok((handler, runtime))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

type AnyValue = Box<dyn Any + Send + Sync>;

/// Recover a [`Handler`] from a type-erased value, handing the value back if
/// it is not one of the accepted shapes.
fn downcast_handler(candidate: AnyValue) -> Result<Handler, AnyValue> {
    macro_rules! try_downcast {
        ($candidate:ident; $($ty:ty => $convert:expr),* $(,)?) => {
            $(
                let $candidate = match $candidate.downcast::<$ty>() {
                    Ok(value) => return Ok($convert(*value)),
                    Err(other) => other,
                };
            )*
        };
    }

    try_downcast!(candidate;
        Handler => |handler: Handler| handler,
        Box<Handler> => |handler: Box<Handler>| *handler,
        (fn()) => Handler::new,
        (fn() -> Value) => Handler::new,
        (fn(Value)) => Handler::new,
        (fn(Value) -> Value) => Handler::new,
        (fn(Value, Value)) => Handler::new,
        (fn(Value, Value) -> Value) => Handler::new,
        (fn(String)) => Handler::new,
        (fn(String) -> String) => Handler::new,
    );

    Err(candidate)
}

/// Run a reply handler on the blocking pool and hand its values to `deliver`.
///
/// On failure `deliver` is dropped without being called.
fn spawn_reply<D>(runtime: &Handle, topic: &str, handler: Arc<Handler>, args: Vec<Value>, deliver: D)
where
    D: FnOnce(Vec<Value>) + Send + 'static,
{
    let topic = topic.to_owned();
    trace!(topic = %topic, handler = %handler.signature(), "Dispatching reply request");

    runtime.spawn_blocking(move || match handler.invoke(args) {
        Ok(values) => deliver(values),
        Err(e) => {
            error!(
                topic = %topic,
                handler = %handler.signature(),
                error = %e,
                "Reply handler failed"
            );
        },
    });
}

fn single_value(topic: &str, values: Vec<Value>) -> Option<Value> {
    let count = values.len();
    let mut values = values.into_iter();
    match (values.next(), values.next()) {
        (Some(value), None) => Some(value),
        _ => {
            debug!(topic = %topic, value_count = count, "Reply discarded, handler did not return exactly one value");
            None
        },
    }
}

fn timed_out(topic: &str, timeout: Duration) -> BusError {
    debug!(topic = %topic, timeout_ms = timeout.as_millis(), "Reply timed out");
    BusError::Timeout {
        topic: topic.to_owned(),
        timeout,
    }
}
