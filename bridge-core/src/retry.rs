//! Redelivery policy and its backoff stream.

use std::{
    pin::Pin,
    task::{ready, Context, Poll},
    time::Duration,
};

use futures::{FutureExt, Stream};
use tokio::time::sleep;

/// Redelivery policy for consumed messages that failed transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delivery attempts, the first one included.
    pub attempts: usize,
    /// Delay before each redelivery.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 2, backoff: Duration::from_millis(3000) }
    }
}

impl RetryPolicy {
    /// Sets the total number of delivery attempts.
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the delay before each redelivery.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// The delays between attempts for one message.
    pub fn backoff(&self) -> FixedBackoff {
        FixedBackoff::new(self.backoff, self.attempts.saturating_sub(1))
    }
}

/// A stream that waits a fixed duration before yielding it, up to a maximum
/// number of retries.
#[derive(Debug)]
pub struct FixedBackoff {
    /// Current number of retries.
    retry_count: usize,
    /// Maximum number of retries before closing the stream.
    max_retries: usize,
    delay: Duration,
    /// The current backoff timeout, if any.
    /// We need the timeout to be pinned (`Sleep` is not `Unpin`)
    timeout: Option<Pin<Box<tokio::time::Sleep>>>,
}

impl FixedBackoff {
    /// Creates a backoff that yields `delay` up to `max_retries` times.
    pub fn new(delay: Duration, max_retries: usize) -> Self {
        Self { retry_count: 0, max_retries, delay, timeout: None }
    }

    /// Retries left before the stream closes.
    pub fn remaining(&self) -> usize {
        self.max_retries - self.retry_count
    }
}

impl Stream for FixedBackoff {
    type Item = Duration;

    /// Returns `Poll::Ready` with the delay once it has elapsed, or `None`
    /// right away once the retries are used up.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.retry_count >= this.max_retries {
            return Poll::Ready(None);
        }

        let delay = this.delay;
        let timeout = this.timeout.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(timeout.poll_unpin(cx));

        this.timeout = None;
        this.retry_count += 1;

        Poll::Ready(Some(delay))
    }
}
