//! The narrow interfaces through which the bridge reaches the message bus.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// A message the bus did not accept.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The topic no longer accepts messages.
    #[error("topic {0} is closed")]
    Closed(String),
    /// The bus backend reported a failure.
    #[error("publish failed: {0}")]
    Backend(String),
}

/// Publishes wire strings to a topic. Delivery downstream is at-least-once.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Publishes `message` to `topic`.
    async fn publish(&self, topic: &str, message: String) -> Result<(), PublishError>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, topic: &str, message: String) -> Result<(), PublishError> {
        (**self).publish(topic, message).await
    }
}

/// What became of a consumed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Handled, or safely ignored.
    Processed,
    /// Processing may succeed on redelivery.
    RetryableFailure(String),
    /// Processing can never succeed. The message is dead-lettered at once.
    FatalFailure(String),
}

impl Outcome {
    /// Returns `true` for [`Outcome::Processed`].
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Processed)
    }
}

/// Handles one consumed message.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles `message`. Called again on redelivery.
    async fn handle(&self, message: &str) -> Outcome;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    async fn handle(&self, message: &str) -> Outcome {
        (**self).handle(message).await
    }
}
