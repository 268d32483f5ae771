//! Consumption of bus topics.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    ports::{MessageHandler, Outcome, Publisher},
    retry::RetryPolicy,
};

mod stats;
pub use stats::ConsumerStats;

/// Suffix appended to a topic name to form its dead-letter topic.
pub const DEFAULT_DEAD_LETTER_SUFFIX: &str = ".DLT";

/// How a [`ConsumerDriver`] consumes its topic.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Messages handled at the same time.
    pub concurrency: usize,
    /// Redelivery of transient failures.
    pub retry: RetryPolicy,
    /// Appended to the topic name to form the dead-letter topic.
    pub dead_letter_suffix: String,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryPolicy::default(),
            dead_letter_suffix: DEFAULT_DEAD_LETTER_SUFFIX.to_string(),
        }
    }
}

impl ConsumerOptions {
    /// Sets the number of messages handled at the same time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the redelivery policy for transient failures.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the suffix that forms the dead-letter topic name.
    pub fn with_dead_letter_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.dead_letter_suffix = suffix.into();
        self
    }
}

/// Feeds the messages of one topic to a [`MessageHandler`], redelivering
/// transient failures per the [`RetryPolicy`] and dead-lettering the rest.
#[derive(Clone)]
pub struct ConsumerDriver {
    topic: String,
    options: ConsumerOptions,
    publisher: Arc<dyn Publisher>,
    stats: Arc<ConsumerStats>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ConsumerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerDriver")
            .field("topic", &self.topic)
            .field("options", &self.options)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ConsumerDriver {
    /// Creates a driver for `topic` that dead-letters through `publisher`.
    pub fn new(
        topic: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            topic: topic.into(),
            options,
            publisher,
            stats: Arc::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Records into `stats` instead of a private counter set.
    pub fn with_stats(mut self, stats: Arc<ConsumerStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Stops the driver when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// The consumed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The driver's counters.
    pub fn stats(&self) -> &Arc<ConsumerStats> {
        &self.stats
    }

    /// A handle that shuts the driver down when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The topic that receives messages which cannot be processed.
    pub fn dead_letter_topic(&self) -> String {
        format!("{}{}", self.topic, self.options.dead_letter_suffix)
    }

    /// Consumes `messages` until the stream ends or the driver is shut down.
    pub async fn run<S, H>(&self, messages: S, handler: &H)
    where
        S: Stream<Item = String>,
        H: MessageHandler + ?Sized,
    {
        info!(topic = %self.topic, concurrency = self.options.concurrency, "consumer started");

        messages
            .take_until(self.shutdown.cancelled())
            .for_each_concurrent(self.options.concurrency.max(1), |message| {
                self.process(handler, message)
            })
            .await;

        info!(topic = %self.topic, "consumer stopped");
    }

    /// Handles one message to completion: processed, dead-lettered or, on
    /// shutdown during a backoff, abandoned.
    pub async fn process<H>(&self, handler: &H, message: String)
    where
        H: MessageHandler + ?Sized,
    {
        let mut backoff = self.options.retry.backoff();
        let mut attempt = 1;

        loop {
            match handler.handle(&message).await {
                Outcome::Processed => {
                    debug!(topic = %self.topic, attempt, "message processed");
                    self.stats.increment_processed();
                    return;
                }
                Outcome::FatalFailure(reason) => {
                    return self.dead_letter(message, &reason).await;
                }
                Outcome::RetryableFailure(reason) => {
                    warn!(topic = %self.topic, attempt, %reason, "transient failure");

                    let delay = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => {
                            warn!(topic = %self.topic, "shutting down, abandoning message");
                            return;
                        }
                        delay = backoff.next() => delay,
                    };

                    if delay.is_none() {
                        let reason = format!("{attempt} attempts failed, last: {reason}");
                        return self.dead_letter(message, &reason).await;
                    }

                    attempt += 1;
                    self.stats.increment_retried();
                }
            }
        }
    }

    async fn dead_letter(&self, message: String, reason: &str) {
        let topic = self.dead_letter_topic();
        warn!(source = %self.topic, dead_letter = %topic, %reason, "dead-lettering message");

        match self.publisher.publish(&topic, message).await {
            Ok(()) => self.stats.increment_dead_lettered(),
            Err(e) => {
                self.stats.increment_dead_letter_failed();
                error!(dead_letter = %topic, error = %e, "failed to dead-letter message, dropped");
            }
        }
    }
}

/// Terminal handler for a dead-letter topic: logs every message and drops it,
/// so that dead letters do not accumulate in the bus.
#[derive(Debug, Clone)]
pub struct DeadLetterLog {
    topic: String,
}

impl DeadLetterLog {
    /// Creates a handler for the dead-letter topic `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into() }
    }
}

#[async_trait]
impl MessageHandler for DeadLetterLog {
    async fn handle(&self, message: &str) -> Outcome {
        warn!(topic = %self.topic, bytes = message.len(), "discarding dead letter");
        debug!(topic = %self.topic, message, "dead letter content");
        Outcome::Processed
    }
}
