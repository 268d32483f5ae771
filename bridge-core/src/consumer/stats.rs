use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a consumer driver.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    /// Messages handled successfully
    processed: AtomicUsize,
    /// Redelivery attempts
    retried: AtomicUsize,
    /// Messages routed to the dead-letter topic
    dead_lettered: AtomicUsize,
    /// Messages lost because the dead-letter topic refused them
    dead_letter_failed: AtomicUsize,
}

impl ConsumerStats {
    #[inline]
    pub(crate) fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_dead_letter_failed(&self) {
        self.dead_letter_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages handled successfully.
    #[inline]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Redelivery attempts.
    #[inline]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::Relaxed)
    }

    /// Messages routed to the dead-letter topic.
    #[inline]
    pub fn dead_lettered(&self) -> usize {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    /// Messages that could be neither processed nor dead-lettered.
    #[inline]
    pub fn dead_letter_failed(&self) -> usize {
        self.dead_letter_failed.load(Ordering::Relaxed)
    }
}
