//! Correlation of asynchronous replies with suspended callers.
//!
//! Every call is an entry keyed by its connection id. An entry leaves the
//! registry exactly once, through [`CorrelationRegistry::resolve`], a timeout,
//! or a cancellation. Removing the entry from its shard is the single point
//! where that race is decided: whoever removes it owns the outcome and
//! delivers it to the waiting [`CompletionHandle`].

use std::{
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use bridge_wire::ConnectionId;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use thiserror::Error;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{timeout_at, Instant},
};
use tracing::{debug, error, trace, warn};

mod stats;
pub use stats::RegistryStats;

const DEFAULT_SHARDS: usize = 16;

/// A call that could not be registered.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A call with this id is still pending. Ids are random, so this points at
    /// a broken id generator rather than bad luck.
    #[error("connection id {0} is already pending")]
    DuplicateConnectionId(ConnectionId),
}

/// A terminal outcome other than a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// The deadline passed before a reply arrived.
    #[error("no reply within the deadline")]
    Timeout,
    /// The caller went away, or the registry dropped the call.
    #[error("call cancelled")]
    Cancelled,
}

type Resolution = Result<String, CorrelationError>;

struct PendingCall {
    /// Distinguishes registrations that reuse an id after completion.
    serial: u64,
    created: Instant,
    deadline: Instant,
    sender: oneshot::Sender<Resolution>,
}

type Shard = Mutex<FxHashMap<ConnectionId, PendingCall>>;

/// The pending calls of one client-side process.
pub struct CorrelationRegistry {
    shards: Box<[Shard]>,
    serial: AtomicU64,
    stats: Arc<RegistryStats>,
}

impl std::fmt::Debug for CorrelationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationRegistry")
            .field("shards", &self.shards.len())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl CorrelationRegistry {
    /// Creates a registry with the default number of shards.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose entries are spread over `shards` independently
    /// locked maps.
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(FxHashMap::default())).collect();

        Self { shards, serial: AtomicU64::new(0), stats: Arc::default() }
    }

    /// Uses `stats` to record registry events.
    pub fn with_stats(mut self, stats: Arc<RegistryStats>) -> Self {
        self.stats = stats;
        self
    }

    /// The registry's counters.
    pub fn stats(&self) -> &Arc<RegistryStats> {
        &self.stats
    }

    fn shard(&self, id: &str) -> &Shard {
        let mut hasher = FxHasher::default();
        id.hash(&mut hasher);

        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    /// Registers a pending call that times out after `timeout`.
    pub fn register(
        self: &Arc<Self>,
        id: ConnectionId,
        timeout: Duration,
    ) -> Result<CompletionHandle, RegistryError> {
        self.register_until(id, Instant::now() + timeout)
    }

    /// Registers a pending call that times out at `deadline`.
    pub fn register_until(
        self: &Arc<Self>,
        id: ConnectionId,
        deadline: Instant,
    ) -> Result<CompletionHandle, RegistryError> {
        let (sender, rx) = oneshot::channel();
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let created = Instant::now();

        {
            let mut shard = self.shard(id.as_str()).lock();
            if shard.contains_key(id.as_str()) {
                error!(connection_id = %id, "duplicate connection id");
                return Err(RegistryError::DuplicateConnectionId(id));
            }
            shard.insert(id.clone(), PendingCall { serial, created, deadline, sender });
        }

        self.stats.increment_registered();
        trace!(connection_id = %id, "registered pending call");

        Ok(CompletionHandle {
            id,
            serial,
            deadline,
            rx,
            registry: Arc::clone(self),
            finished: false,
        })
    }

    /// Delivers `reply` to the call pending under `id`.
    ///
    /// Returns `false`, without error, if no call is pending under `id`: the
    /// reply is late, a duplicate, or was never expected.
    pub fn resolve(&self, id: &str, reply: String) -> bool {
        let Some(pending) = self.shard(id).lock().remove(id) else {
            self.stats.increment_late();
            warn!(connection_id = id, "dropping reply without pending call");
            return false;
        };

        let rtt = pending.created.elapsed().as_micros() as usize;
        self.stats.update_rtt(rtt);
        self.stats.increment_completed();
        // The receiver only disappears together with its handle, which removes
        // the entry first.
        let _ = pending.sender.send(Ok(reply));

        true
    }

    /// Cancels the call pending under `id`. Its waiter observes
    /// [`CorrelationError::Cancelled`].
    pub fn cancel(&self, id: &str) -> bool {
        let Some(pending) = self.shard(id).lock().remove(id) else {
            return false;
        };

        self.stats.increment_cancelled();
        debug!(connection_id = id, "cancelled pending call");
        let _ = pending.sender.send(Err(CorrelationError::Cancelled));

        true
    }

    /// Times out every call whose deadline has passed, returning how many.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;

        for shard in self.shards.iter() {
            let expired: Vec<PendingCall> = {
                let mut shard = shard.lock();
                let ids: Vec<ConnectionId> = shard
                    .iter()
                    .filter(|(_, pending)| pending.deadline <= now)
                    .map(|(id, _)| id.clone())
                    .collect();
                ids.iter().filter_map(|id| shard.remove(id.as_str())).collect()
            };

            for pending in expired {
                self.stats.increment_timed_out();
                let _ = pending.sender.send(Err(CorrelationError::Timeout));
                evicted += 1;
            }
        }

        evicted
    }

    /// Spawns a task that calls [`Self::evict_expired`] every `interval`, for
    /// as long as the registry is alive.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };

                let evicted = registry.evict_expired();
                if evicted > 0 {
                    debug!(evicted, "evicted expired calls");
                }
            }
        })
    }

    /// The number of pending calls.
    pub fn pending(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Returns `true` if a call is pending under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.shard(id).lock().contains_key(id)
    }

    /// Removes the entry for `id` only if it still belongs to registration `serial`.
    fn remove_registration(&self, id: &str, serial: u64) -> bool {
        let mut shard = self.shard(id).lock();
        match shard.get(id) {
            Some(pending) if pending.serial == serial => {
                shard.remove(id);
                true
            }
            _ => false,
        }
    }
}

/// The caller's side of a pending call.
///
/// Dropping the handle before it completes cancels the call.
#[derive(Debug)]
pub struct CompletionHandle {
    id: ConnectionId,
    serial: u64,
    deadline: Instant,
    rx: oneshot::Receiver<Resolution>,
    registry: Arc<CorrelationRegistry>,
    finished: bool,
}

impl CompletionHandle {
    /// The id the reply must carry.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    /// When the call times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Waits for the reply until the registered deadline.
    pub async fn wait(self) -> Result<String, CorrelationError> {
        let deadline = self.deadline;
        self.wait_until(deadline).await
    }

    /// Waits for the reply until `deadline` or the registered deadline,
    /// whichever comes first.
    pub async fn wait_until(mut self, deadline: Instant) -> Result<String, CorrelationError> {
        let deadline = deadline.min(self.deadline);

        let outcome = match timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(resolution)) => resolution,
            // The registry went away with the entry.
            Ok(Err(_)) => Err(CorrelationError::Cancelled),
            Err(_) => {
                if self.registry.remove_registration(self.id.as_str(), self.serial) {
                    self.registry.stats.increment_timed_out();
                    debug!(connection_id = %self.id, "pending call timed out");
                    Err(CorrelationError::Timeout)
                } else {
                    // Lost the race against a concurrent resolution, which
                    // delivers its outcome right after removing the entry.
                    (&mut self.rx).await.unwrap_or(Err(CorrelationError::Cancelled))
                }
            }
        };

        self.finished = true;
        outcome
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        if self.registry.remove_registration(self.id.as_str(), self.serial) {
            self.registry.stats.increment_cancelled();
            debug!(connection_id = %self.id, "caller went away, cancelled pending call");
        }
    }
}
