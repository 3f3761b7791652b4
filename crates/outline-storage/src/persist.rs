//! The persistence adapter: hydrates the store from tables, then buffers
//! change patches and writes them back in debounced batches.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized -> Hydrating -> Hydrated -> Buffering <-> Flushing
//! ```
//!
//! Hydration reads every registered table once and applies the union of
//! rows to the store in a single `apply_snapshot` call. Only after that
//! does the adapter subscribe, so hydration itself never produces patches.
//!
//! # Buffering
//!
//! The store's listener forwards each patch over an `mpsc` channel; the
//! adapter drains the channel whenever it is polled. Each drained patch is
//! appended to the buffer and replaces the debounce deadline with
//! `now + flush_wait`. When the buffer grows past `buffer_limit` the batch
//! is flushed at once and the deadline cleared.
//!
//! The adapter never sleeps: the owner polls it after mutations and when
//! [`Persistence::next_deadline`] passes. This keeps flushes strictly
//! sequential without any locking.
//!
//! # Failures
//!
//! A batch write is atomic. When it fails with an I/O-class error the
//! buffer is kept and the next attempt waits `flush_wait * 2^(n-1)` after
//! the `n`th consecutive failure, capped at `max_backoff`. Schema errors
//! (unknown type, unknown property) are returned and the batch dropped.
//!
//! While retries are pending the buffer cap triggers compaction instead of
//! a flush: the buffer collapses to one patch per touched entity, an `add`
//! when the entity is live and a `remove` when it is gone. Flushes read live
//! values anyway, so the written rows are the same and the buffer stays
//! bounded by the number of distinct entities touched.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use outline_core::{EntityStore, Patch, PatchPath, SubscriptionId};

use crate::convert::{patches_to_ops, read_snapshot};
use crate::error::StorageError;
use crate::traits::TableStore;

/// Env var overriding [`PersistConfig::flush_wait`], in milliseconds.
pub const ENV_FLUSH_WAIT_MS: &str = "OUTLINE_FLUSH_WAIT_MS";
/// Env var overriding [`PersistConfig::buffer_limit`].
pub const ENV_BUFFER_LIMIT: &str = "OUTLINE_BUFFER_LIMIT";
/// Env var overriding [`PersistConfig::max_backoff`], in milliseconds.
pub const ENV_MAX_BACKOFF_MS: &str = "OUTLINE_MAX_BACKOFF_MS";

/// Tuning for the debounce and failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistConfig {
    /// Quiet period after the last patch before a flush.
    pub flush_wait: Duration,
    /// Buffer length past which a flush happens immediately.
    pub buffer_limit: usize,
    /// Upper bound on the retry delay after failed flushes.
    pub max_backoff: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        PersistConfig {
            flush_wait: Duration::from_millis(1000),
            buffer_limit: 1000,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl PersistConfig {
    /// Defaults overridden by `OUTLINE_*` environment variables. Values that
    /// fail to parse are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = PersistConfig::default();
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_FLUSH_WAIT_MS) {
            config.flush_wait = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_var::<usize>(&lookup, ENV_BUFFER_LIMIT) {
            config.buffer_limit = limit;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_MAX_BACKOFF_MS) {
            config.max_backoff = Duration::from_millis(ms);
        }
        config
    }

    /// Delay before retrying after `failures` consecutive failed flushes.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(20);
        self.flush_wait
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

/// Where the adapter is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistState {
    Uninitialized,
    Hydrating,
    /// Hydrated with nothing buffered.
    Hydrated,
    Buffering,
    Flushing,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    /// The batch was written and the buffer cleared.
    Written { patches: usize, ops: usize },
    /// The write failed; the patches stay buffered until `retry_at`.
    Retained {
        patches: usize,
        retry_at: Instant,
        reason: String,
    },
}

/// Running counters, for status output and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub flushes: u64,
    pub patches_written: u64,
    pub ops_written: u64,
    pub failed_flushes: u64,
}

/// Owns the table store and the patch buffer.
pub struct Persistence<S: TableStore> {
    tables: S,
    config: PersistConfig,
    state: PersistState,
    inbox: Option<Receiver<Patch>>,
    subscription: Option<SubscriptionId>,
    buffer: Vec<Patch>,
    /// Debounce deadline, replaced on every patch.
    deadline: Option<Instant>,
    /// Earliest retry after a failed flush.
    retry_at: Option<Instant>,
    failures: u32,
    last_failure: Option<String>,
    /// Buffer length right after the last compaction.
    compacted_len: usize,
    stats: PersistStats,
}

impl<S: TableStore> Persistence<S> {
    pub fn new(tables: S, config: PersistConfig) -> Self {
        Persistence {
            tables,
            config,
            state: PersistState::Uninitialized,
            inbox: None,
            subscription: None,
            buffer: Vec::new(),
            deadline: None,
            retry_at: None,
            failures: 0,
            last_failure: None,
            compacted_len: 0,
            stats: PersistStats::default(),
        }
    }

    pub fn state(&self) -> PersistState {
        self.state
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    pub fn tables(&self) -> &S {
        &self.tables
    }

    pub fn stats(&self) -> &PersistStats {
        &self.stats
    }

    /// Patches buffered and not yet written.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Consecutive failed flushes since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    // -----------------------------------------------------------------------
    // Hydration
    // -----------------------------------------------------------------------

    /// Reads every table and replaces the store's contents. Must run once,
    /// before [`subscribe`](Self::subscribe).
    pub fn hydrate(&mut self, store: &mut EntityStore) -> Result<(), StorageError> {
        if self.state != PersistState::Uninitialized {
            return Err(StorageError::Initialization {
                reason: format!("hydrate called in state {:?}", self.state),
            });
        }
        self.state = PersistState::Hydrating;

        let owned: Vec<String> = store.type_names().map(str::to_string).collect();
        let names: Vec<&str> = owned.iter().map(String::as_str).collect();
        self.tables.open_tables(&names)?;
        let snapshot = read_snapshot(&self.tables, store.registry())?;
        store.apply_snapshot(&snapshot)?;

        self.state = PersistState::Hydrated;
        info!(
            tables = names.len(),
            rows = snapshot.row_count(),
            "hydrated entity store"
        );
        Ok(())
    }

    /// Registers the forwarding listener on `store`.
    pub fn subscribe(&mut self, store: &mut EntityStore) -> Result<SubscriptionId, StorageError> {
        if self.state == PersistState::Uninitialized || self.state == PersistState::Hydrating {
            return Err(StorageError::Initialization {
                reason: "subscribe called before hydration finished".to_string(),
            });
        }
        if let Some(id) = self.subscription {
            return Ok(id);
        }
        let (tx, rx) = mpsc::channel();
        let id = store.subscribe(Box::new(move |patch: &Patch| {
            // The receiver lives as long as the adapter; a send after it is
            // gone has nowhere to go.
            let _ = tx.send(patch.clone());
        }));
        self.inbox = Some(rx);
        self.subscription = Some(id);
        debug!(subscription = %id, "subscribed to patches");
        Ok(id)
    }

    /// Detaches from `store`. Buffered patches stay buffered.
    pub fn unsubscribe(&mut self, store: &mut EntityStore) {
        if let Some(id) = self.subscription.take() {
            store.unsubscribe(id);
        }
    }

    // -----------------------------------------------------------------------
    // Buffering
    // -----------------------------------------------------------------------

    /// Drains newly emitted patches into the buffer and flushes if the
    /// buffer limit was exceeded or the deadline has passed.
    ///
    /// Returns the outcome of the last flush performed, if any.
    pub fn poll(
        &mut self,
        store: &EntityStore,
        now: Instant,
    ) -> Result<Option<FlushOutcome>, StorageError> {
        let mut outcome = None;
        while let Some(patch) = self.recv() {
            self.buffer.push(patch);
            self.deadline = Some(now + self.config.flush_wait);
            self.state = PersistState::Buffering;
            if self.buffer.len() <= self.config.buffer_limit {
                continue;
            }
            if self.failures == 0 {
                debug!(pending = self.buffer.len(), "buffer limit exceeded");
                outcome = Some(self.flush_at(store, now)?);
            } else if self.buffer.len() > 2 * self.compacted_len {
                self.compact(store);
            }
        }
        if self.next_deadline().is_some_and(|d| d <= now) {
            outcome = Some(self.flush_at(store, now)?);
        }
        Ok(outcome)
    }

    /// When the next flush is due, if anything is buffered.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.buffer.is_empty() {
            return None;
        }
        match (self.deadline, self.retry_at) {
            (Some(d), Some(r)) => Some(d.max(r)),
            (d, r) => d.or(r),
        }
    }

    /// Flushes now, ignoring the debounce deadline.
    pub fn flush(&mut self, store: &EntityStore) -> Result<FlushOutcome, StorageError> {
        let now = Instant::now();
        while let Some(patch) = self.recv() {
            self.buffer.push(patch);
        }
        self.flush_at(store, now)
    }

    /// Collapses the buffer to one patch per entity describing its live
    /// state, in first-touched order.
    fn compact(&mut self, store: &EntityStore) {
        let before = self.buffer.len();
        let mut seen = HashSet::new();
        let mut compacted = Vec::new();
        for patch in &self.buffer {
            let PatchPath { type_name, id, .. } = &patch.path;
            if !seen.insert((type_name.as_str(), id.as_str())) {
                continue;
            }
            compacted.push(match store.entity_snapshot(type_name, id.as_str()) {
                Ok(snapshot) => Patch::add(type_name, id, snapshot),
                Err(_) => Patch::remove(type_name, id),
            });
        }
        self.buffer = compacted;
        self.compacted_len = self.buffer.len();
        debug!(before, after = self.compacted_len, "compacted retained patches");
    }

    fn recv(&mut self) -> Option<Patch> {
        match self.inbox.as_ref()?.try_recv() {
            Ok(patch) => Some(patch),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    fn flush_at(&mut self, store: &EntityStore, now: Instant) -> Result<FlushOutcome, StorageError> {
        self.deadline = None;
        if self.buffer.is_empty() {
            return Ok(FlushOutcome::Empty);
        }
        self.state = PersistState::Flushing;

        let ops = match patches_to_ops(store, &self.buffer) {
            Ok(ops) => ops,
            Err(e) => {
                error!(error = %e, pending = self.buffer.len(), "dropping unwritable batch");
                self.buffer.clear();
                self.retry_at = None;
                self.state = PersistState::Hydrated;
                return Err(e);
            }
        };

        let patches = self.buffer.len();
        let result = if ops.is_empty() {
            Ok(())
        } else {
            self.tables.write_batch(&ops)
        };

        match result {
            Ok(()) => {
                debug!(patches, ops = ops.len(), "flushed batch");
                self.buffer.clear();
                self.retry_at = None;
                self.failures = 0;
                self.last_failure = None;
                self.compacted_len = 0;
                self.stats.flushes += 1;
                self.stats.patches_written += patches as u64;
                self.stats.ops_written += ops.len() as u64;
                self.state = PersistState::Hydrated;
                Ok(FlushOutcome::Written {
                    patches,
                    ops: ops.len(),
                })
            }
            Err(e) if e.is_retryable() => {
                self.failures += 1;
                self.stats.failed_flushes += 1;
                let delay = self.config.backoff(self.failures);
                let retry_at = now + delay;
                self.retry_at = Some(retry_at);
                self.last_failure = Some(e.to_string());
                self.state = PersistState::Buffering;
                warn!(
                    error = %e,
                    pending = patches,
                    failures = self.failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "flush failed, keeping buffered patches"
                );
                Ok(FlushOutcome::Retained {
                    patches,
                    retry_at,
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                error!(error = %e, pending = patches, "dropping unwritable batch");
                self.buffer.clear();
                self.retry_at = None;
                self.state = PersistState::Hydrated;
                Err(e)
            }
        }
    }
}
