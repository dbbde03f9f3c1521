//! Topic registry: topic name to ordered handler list.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use crate::error::{BusError, BusResult};
use crate::handler::{Handler, HandlerKey};

type TopicMap = HashMap<String, Vec<Arc<Handler>>>;

/// Registry mapping topic names to their handlers.
///
/// A single reader/writer lock guards the whole map. Handlers never run while
/// the lock is held: dispatch copies the handler list out first. Topic keys
/// are never removed once created, so a topic whose last handler was
/// unsubscribed stays known with an empty list.
#[derive(Default)]
pub struct TopicRegistry {
    topics: RwLock<TopicMap>,
}

impl std::fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.read();
        let handler_count: usize = topics.values().map(Vec::len).sum();
        f.debug_struct("TopicRegistry")
            .field("topic_count", &topics.len())
            .field("handler_count", &handler_count)
            .finish()
    }
}

impl TopicRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    // Handlers run outside the lock, so a poisoned lock still guards a
    // consistent map.
    fn read(&self) -> RwLockReadGuard<'_, TopicMap> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TopicMap> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a handler to a topic, creating the topic if needed.
    ///
    /// The same callable may be added any number of times; each copy is
    /// invoked separately.
    pub fn insert(&self, topic: impl Into<String>, handler: Handler) {
        let topic = topic.into();
        let signature = handler.signature().to_string();

        let mut topics = self.write();
        let handlers = topics.entry(topic.clone()).or_default();
        handlers.push(Arc::new(handler));

        debug!(
            topic = %topic,
            handler = %signature,
            handler_count = handlers.len(),
            "Handler subscribed"
        );
    }

    /// Remove the first handler on `topic` whose key equals `key`.
    ///
    /// Returns `Ok(true)` if a handler was removed and `Ok(false)` if none
    /// matched.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownTopic`] if the topic is unknown or has no
    /// handlers.
    pub fn remove(&self, topic: &str, key: &HandlerKey) -> BusResult<bool> {
        let mut topics = self.write();
        let handlers = topics
            .get_mut(topic)
            .filter(|handlers| !handlers.is_empty())
            .ok_or_else(|| BusError::UnknownTopic {
                topic: topic.to_owned(),
            })?;

        let Some(idx) = handlers.iter().position(|h| h.key() == key) else {
            trace!(topic = %topic, handler = %key.signature(), "No matching handler to unsubscribe");
            return Ok(false);
        };

        // In-flight snapshots keep their own `Arc`.
        handlers.remove(idx);
        debug!(
            topic = %topic,
            handler = %key.signature(),
            handler_count = handlers.len(),
            "Handler unsubscribed"
        );
        Ok(true)
    }

    /// Copy of a topic's handler list, or `None` if the topic is unknown.
    ///
    /// The lock is released before this returns; the copy is unaffected by
    /// later subscribes and unsubscribes.
    #[must_use]
    pub fn snapshot(&self, topic: &str) -> Option<Vec<Arc<Handler>>> {
        self.read().get(topic).cloned()
    }

    /// Whether the topic has at least one handler.
    #[must_use]
    pub fn has_callback(&self, topic: &str) -> bool {
        self.read().get(topic).is_some_and(|h| !h.is_empty())
    }

    /// Number of handlers on a topic.
    #[must_use]
    pub fn handler_count(&self, topic: &str) -> usize {
        self.read().get(topic).map_or(0, Vec::len)
    }

    /// Whether the topic was ever subscribed to.
    #[must_use]
    pub fn contains_topic(&self, topic: &str) -> bool {
        self.read().contains_key(topic)
    }

    /// All known topics, including ones whose handlers were all removed.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.read().keys().cloned().collect();
        topics.sort();
        topics
    }
}
