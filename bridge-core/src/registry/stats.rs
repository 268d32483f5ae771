use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a correlation registry.
/// These are shared between the registry, its handles and whoever observes them.
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Total number of registered calls
    registered: AtomicUsize,
    /// Calls resolved with a reply
    completed: AtomicUsize,
    /// Calls whose deadline elapsed
    timed_out: AtomicUsize,
    /// Calls abandoned by their caller
    cancelled: AtomicUsize,
    /// Replies that found no pending call
    late: AtomicUsize,
    /// The cumulative average round-trip time in microseconds.
    rtt: AtomicUsize,
    /// Index used to calculate rtt
    rtt_idx: AtomicUsize,
}

impl RegistryStats {
    /// Atomically updates the RTT according to the CA formula:
    /// CA = (rtt + n * prev_ca) / (n + 1)
    #[inline]
    pub(crate) fn update_rtt(&self, rtt_us: usize) {
        let idx = self.rtt_idx.fetch_add(1, Ordering::Relaxed);
        let prev = self.rtt.load(Ordering::Relaxed);

        let new = rtt_us.saturating_add(idx.saturating_mul(prev)) / (idx + 1);
        self.rtt.store(new, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_registered(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_late(&self) {
        self.late.fetch_add(1, Ordering::Relaxed);
    }

    /// Calls registered.
    #[inline]
    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::Relaxed)
    }

    /// Calls completed by a reply.
    #[inline]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Calls whose deadline passed.
    #[inline]
    pub fn timed_out(&self) -> usize {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Calls dropped by their caller or the registry.
    #[inline]
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Replies that found no pending call.
    #[inline]
    pub fn late(&self) -> usize {
        self.late.load(Ordering::Relaxed)
    }

    /// The cumulative average round-trip time in microseconds of completed calls.
    #[inline]
    pub fn rtt(&self) -> usize {
        self.rtt.load(Ordering::Relaxed)
    }
}
