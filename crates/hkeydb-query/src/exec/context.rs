//! Execution context for query execution.
//!
//! The execution context provides access to the store adapter, cancellation
//! and timeout checks, execution statistics, runtime configuration and the
//! execution observer. One context is shared, through an `Arc`, by every
//! cursor of a query.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::QueryBindings;
use crate::exec::observe::{ExecutionObserver, NoopObserver};
use crate::exec::store::{MemoryStore, StoreAdapter};

/// Execution context for a query.
///
/// The context provides access to:
/// - The store adapter used by lookup, scan and sort operators
/// - Cancellation and timeout support
/// - Execution statistics
/// - Runtime configuration
/// - The execution observer
pub struct QueryContext {
    /// Store adapter.
    store: Arc<dyn StoreAdapter>,
    /// Cancellation flag, shareable with other threads.
    cancellation: CancellationToken,
    /// Execution statistics.
    stats: ExecutionStats,
    /// Configuration options.
    config: ExecutionConfig,
    /// Event sink.
    observer: Arc<dyn ExecutionObserver>,
}

impl QueryContext {
    /// Creates a context over an empty in-memory store.
    ///
    /// Use [`with_store`](Self::with_store) to run against another store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            cancellation: CancellationToken::new(),
            stats: ExecutionStats::new(),
            config: ExecutionConfig::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Sets the store adapter.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StoreAdapter>) -> Self {
        self.store = store;
        self
    }

    /// Sets the execution configuration.
    #[must_use]
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the execution observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Uses an externally held cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns the store adapter.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StoreAdapter> {
        &self.store
    }

    /// Returns the execution observer.
    #[inline]
    #[must_use]
    pub fn observer(&self) -> &dyn ExecutionObserver {
        self.observer.as_ref()
    }

    /// Creates a fresh root bindings scope for a top-level execution.
    #[must_use]
    pub fn create_bindings(&self) -> QueryBindings {
        QueryBindings::root()
    }

    /// The current wall-clock time.
    #[must_use]
    pub fn current_time(&self) -> SystemTime {
        SystemTime::now()
    }

    /// Cancels the query execution.
    #[inline]
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Checks if the query has been cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fails if the query was cancelled or has run past its timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::QueryCancelled`] or [`ExecError::QueryTimeout`].
    pub fn check_interrupted(&self) -> ExecResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(ExecError::QueryCancelled);
        }
        if let Some(timeout) = self.config.timeout {
            let elapsed = self.stats.elapsed();
            if elapsed > timeout {
                return Err(ExecError::QueryTimeout { elapsed });
            }
        }
        Ok(())
    }

    /// Returns the execution statistics.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Records that rows were read from the store.
    #[inline]
    pub fn record_rows_read(&self, count: u64) {
        self.stats.rows_read.fetch_add(count, Ordering::Relaxed);
    }

    /// Records that rows were produced.
    #[inline]
    pub fn record_rows_produced(&self, count: u64) {
        self.stats.rows_produced.fetch_add(count, Ordering::Relaxed);
    }

    /// Records that rows were filtered.
    #[inline]
    pub fn record_rows_filtered(&self, count: u64) {
        self.stats.rows_filtered.fetch_add(count, Ordering::Relaxed);
    }

    /// Records that a lookup slot was taken for a scope.
    #[inline]
    pub fn record_lookup_slot_taken(&self) {
        self.stats.lookup_slots_in_use.fetch_add(1, Ordering::Relaxed);
    }

    /// Records that a lookup slot was given back.
    #[inline]
    pub fn record_lookup_slot_returned(&self) {
        let _ = self.stats.lookup_slots_in_use.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("store", &self.store)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("stats", &self.stats)
            .field("config", &self.config)
            .field("observer", &self.observer)
            .finish()
    }
}

/// Execution statistics collected during query execution.
#[derive(Debug)]
pub struct ExecutionStats {
    /// When execution started.
    start_time: Instant,
    /// Number of rows read by group scans and lookups, from store cursors or
    /// a bound hash table. Rows of in-memory values scans and rows handed
    /// back by a sorter are not counted. A nested lookup counts every row it
    /// emits, a kept input row included.
    rows_read: AtomicU64,
    /// Number of rows produced by cursors.
    rows_produced: AtomicU64,
    /// Number of rows filtered out.
    rows_filtered: AtomicU64,
    /// Lookup slots currently holding a scope's lookups.
    lookup_slots_in_use: AtomicU64,
}

impl ExecutionStats {
    /// Creates new execution statistics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            rows_read: AtomicU64::new(0),
            rows_produced: AtomicU64::new(0),
            rows_filtered: AtomicU64::new(0),
            lookup_slots_in_use: AtomicU64::new(0),
        }
    }

    /// Returns the number of rows read.
    #[inline]
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.rows_read.load(Ordering::Relaxed)
    }

    /// Returns the number of rows produced.
    #[inline]
    #[must_use]
    pub fn rows_produced(&self) -> u64 {
        self.rows_produced.load(Ordering::Relaxed)
    }

    /// Returns the number of rows filtered.
    #[inline]
    #[must_use]
    pub fn rows_filtered(&self) -> u64 {
        self.rows_filtered.load(Ordering::Relaxed)
    }

    /// Returns the number of lookup slots in use. Zero once every lookup
    /// cursor has closed its bindings stream or had its scopes cancelled.
    #[inline]
    #[must_use]
    pub fn lookup_slots_in_use(&self) -> u64 {
        self.lookup_slots_in_use.load(Ordering::Relaxed)
    }

    /// Returns the elapsed execution time.
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Default number of input rows whose lookups may be in flight at once.
pub const DEFAULT_LOOKAHEAD_QUANTUM: usize = 1;

/// Default bound on rows held by a merge cursor's pending queue.
pub const DEFAULT_MAX_PENDING_ROWS: usize = 3;

/// Configuration options for query execution.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Lookahead quantum used by lookup factories not given one explicitly.
    pub lookahead_quantum: usize,
    /// Upper bound on a merge cursor's pending queue; exceeding it is a bug.
    pub max_pending_rows: usize,
    /// Whether cursors check the open/next/close state machine.
    pub check_cursor_lifecycle: bool,
    /// Query timeout; `None` disables it.
    pub timeout: Option<Duration>,
}

impl ExecutionConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lookahead_quantum: DEFAULT_LOOKAHEAD_QUANTUM,
            max_pending_rows: DEFAULT_MAX_PENDING_ROWS,
            check_cursor_lifecycle: true,
            timeout: None,
        }
    }

    /// The quantum a lookup cursor uses: `requested`, or the configured
    /// default when `requested` is 0.
    #[must_use]
    pub const fn effective_quantum(&self, requested: usize) -> usize {
        let quantum = if requested == 0 { self.lookahead_quantum } else { requested };
        if quantum == 0 { 1 } else { quantum }
    }

    /// Sets the default lookahead quantum.
    #[must_use]
    pub const fn with_lookahead_quantum(mut self, quantum: usize) -> Self {
        self.lookahead_quantum = quantum;
        self
    }

    /// Sets the pending queue bound.
    #[must_use]
    pub const fn with_max_pending_rows(mut self, rows: usize) -> Self {
        self.max_pending_rows = rows;
        self
    }

    /// Enables or disables cursor state checks.
    #[must_use]
    pub const fn with_lifecycle_checks(mut self, enabled: bool) -> Self {
        self.check_cursor_lifecycle = enabled;
        self
    }

    /// Sets the query timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle for cancelling query execution.
///
/// Can be shared between threads to allow cancellation from outside
/// the query execution thread.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Cancels the associated query.
    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Checks if cancellation was requested.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
