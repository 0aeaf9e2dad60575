//! Execution observers.
//!
//! An [`ExecutionObserver`] is handed to every cursor through the
//! [`QueryContext`](crate::exec::QueryContext). The default,
//! [`NoopObserver`], does nothing; [`TracingObserver`] turns the callbacks
//! into `tracing` events.

use std::fmt;

use tracing::{debug, trace};

/// Receives cursor lifecycle and operator events.
pub trait ExecutionObserver: Send + Sync + fmt::Debug {
    /// A cursor of `operator` was opened.
    fn cursor_opened(&self, _operator: &'static str) {}

    /// A cursor of `operator` returned a row.
    fn row_emitted(&self, _operator: &'static str) {}

    /// A cursor of `operator` was closed.
    fn cursor_closed(&self, _operator: &'static str) {}

    /// A bloom filter was populated from `rows` rows; `rebuilt` is set when
    /// the first estimate was too small and the input was scanned again.
    fn bloom_filter_built(&self, _rows: usize, _rebuilt: bool) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn cursor_opened(&self, operator: &'static str) {
        trace!(operator, "cursor opened");
    }

    fn row_emitted(&self, operator: &'static str) {
        trace!(operator, "row emitted");
    }

    fn cursor_closed(&self, operator: &'static str) {
        trace!(operator, "cursor closed");
    }

    fn bloom_filter_built(&self, rows: usize, rebuilt: bool) {
        debug!(rows, rebuilt, "bloom filter built");
    }
}
