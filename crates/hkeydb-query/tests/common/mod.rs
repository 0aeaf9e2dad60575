//! Shared harness for the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};

use hkeydb_core::{Row, RowType, Value};
use hkeydb_query::api;
use hkeydb_query::exec::{
    ExecutionObserver, MemoryStore, QueryContext, SingletonQueryBindingsCursor,
};
use hkeydb_query::{BoxedCursor, Cursor, CursorState, ExecError, OperatorRef};

/// Routes operator `tracing` events to the test output; filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A context whose store holds `rows`.
pub fn context_with(rows: Vec<Row>) -> Arc<QueryContext> {
    init_tracing();
    let store = MemoryStore::new();
    store.load(rows).expect("failed to load rows");
    Arc::new(QueryContext::new().with_store(Arc::new(store)))
}

/// Runs `plan` to completion.
pub fn run(plan: &OperatorRef, ctx: &Arc<QueryContext>) -> Vec<Row> {
    api::execute(plan, ctx).expect("execution failed")
}

/// Asserts `actual` equals `expected`, row by row.
pub fn compare_rows(actual: &[Row], expected: &[Row]) {
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_eq!(a, e, "row {i} differs\n actual: {actual:#?}\n expected: {expected:#?}");
    }
    assert_eq!(actual.len(), expected.len(), "row count differs\n actual: {actual:#?}\n expected: {expected:#?}");
}

/// Runs `inner` once per row of `outer_rows`, bound at position 0.
pub fn nested(outer_rows: Vec<Row>, row_type: &Arc<RowType>, inner: OperatorRef) -> OperatorRef {
    nested_with(outer_rows, row_type, inner, false)
}

pub fn nested_with(outer_rows: Vec<Row>, row_type: &Arc<RowType>, inner: OperatorRef, pipeline: bool) -> OperatorRef {
    let outer = api::values_scan_default(outer_rows, Arc::clone(row_type));
    api::map_nested_loops(outer, inner, 0, pipeline, 1).expect("invalid loop")
}

/// Single-column integer rows.
pub fn int_rows(row_type: &Arc<RowType>, values: &[i64]) -> Vec<Row> {
    values.iter().map(|v| Row::new(Arc::clone(row_type), vec![Value::Int(*v)], None)).collect()
}

/// The first column of every row.
pub fn ints(rows: &[Row]) -> Vec<i64> {
    rows.iter().map(|r| r.value(0).as_int().expect("not an int")).collect()
}

/// A cursor over `plan` reading one root scope.
pub fn top_level_cursor(plan: &OperatorRef, ctx: &Arc<QueryContext>) -> BoxedCursor {
    let bindings = SingletonQueryBindingsCursor::new(Some(ctx.create_bindings()));
    api::cursor(plan, ctx, Box::new(bindings))
}

/// Drives a cursor over `plan` through the whole open/next/close protocol,
/// twice, and returns the rows of the first pass.
pub fn check_lifecycle(plan: &OperatorRef, ctx: &Arc<QueryContext>) -> Vec<Row> {
    let mut cursor = top_level_cursor(plan, ctx);
    assert_eq!(cursor.state(), CursorState::Closed);
    assert!(matches!(cursor.next(), Err(ExecError::WrongCursorState { .. })));

    let first = drain(&mut cursor);
    assert!(cursor.is_idle(), "{} not idle after exhaustion", cursor.name());
    assert!(matches!(cursor.next(), Err(ExecError::WrongCursorState { .. })));
    assert!(matches!(cursor.open(), Err(ExecError::WrongCursorState { .. })));
    cursor.close_top_level().unwrap();
    assert!(cursor.is_closed());
    cursor.close().unwrap();

    let second = drain(&mut cursor);
    cursor.close_top_level().unwrap();
    compare_rows(&second, &first);
    first
}

fn drain(cursor: &mut BoxedCursor) -> Vec<Row> {
    cursor.open_top_level().unwrap();
    assert!(cursor.is_active());
    let mut rows = Vec::new();
    while let Some(row) = cursor.next().unwrap() {
        rows.push(row);
    }
    rows
}

/// Records observer callbacks.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<(&'static str, &'static str)>>,
}

impl RecordingObserver {
    pub fn count(&self, event: &str, operator: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|(e, o)| *e == event && *o == operator).count()
    }
}

impl ExecutionObserver for RecordingObserver {
    fn cursor_opened(&self, operator: &'static str) {
        self.events.lock().unwrap().push(("opened", operator));
    }

    fn row_emitted(&self, operator: &'static str) {
        self.events.lock().unwrap().push(("row", operator));
    }

    fn cursor_closed(&self, operator: &'static str) {
        self.events.lock().unwrap().push(("closed", operator));
    }
}
