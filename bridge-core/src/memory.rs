//! An in-process message bus.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tracing::trace;

use crate::ports::{PublishError, Publisher};

struct Topic {
    tx: mpsc::UnboundedSender<String>,
    /// Taken by the first subscriber.
    rx: Option<mpsc::UnboundedReceiver<String>>,
    published: usize,
    /// Messages taken off the channel, by the subscriber or by draining.
    consumed: Arc<AtomicUsize>,
}

impl Topic {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx), published: 0, consumed: Arc::default() }
    }
}

/// A [`Publisher`] with one subscription stream per topic.
///
/// Each topic behaves like a single consumer group: every message is consumed
/// once. Messages published before anyone subscribes are buffered.
#[derive(Default)]
pub struct InMemoryBus {
    topics: Mutex<FxHashMap<String, Topic>>,
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.lock();
        f.debug_struct("InMemoryBus").field("topics", &topics.keys().collect::<Vec<_>>()).finish()
    }
}

impl InMemoryBus {
    /// Creates a bus without topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `topic`. Returns `None` if the topic already has a
    /// subscriber.
    pub fn subscribe(
        &self,
        topic: &str,
    ) -> Option<impl Stream<Item = String> + Send + Unpin + 'static> {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.to_string()).or_insert_with(Topic::new);
        let rx = entry.rx.take()?;
        let consumed = Arc::clone(&entry.consumed);

        Some(UnboundedReceiverStream::new(rx).map(move |message| {
            consumed.fetch_add(1, Ordering::Relaxed);
            message
        }))
    }

    /// Takes every buffered message of an unsubscribed topic.
    pub fn drain(&self, topic: &str) -> Vec<String> {
        let mut topics = self.topics.lock();
        let Some(entry) = topics.get_mut(topic) else {
            return Vec::new();
        };
        let Some(rx) = entry.rx.as_mut() else {
            return Vec::new();
        };

        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        entry.consumed.fetch_add(messages.len(), Ordering::Relaxed);
        messages
    }

    /// Total number of messages ever published to `topic`.
    pub fn published(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, |t| t.published)
    }

    /// Messages published to `topic` and not yet consumed.
    pub fn backlog(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |t| t.published.saturating_sub(t.consumed.load(Ordering::Relaxed)))
    }
}

#[async_trait]
impl Publisher for InMemoryBus {
    async fn publish(&self, topic: &str, message: String) -> Result<(), PublishError> {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.to_string()).or_insert_with(Topic::new);

        entry.tx.send(message).map_err(|_| PublishError::Closed(topic.to_string()))?;
        entry.published += 1;
        trace!(topic, "published message");

        Ok(())
    }
}
