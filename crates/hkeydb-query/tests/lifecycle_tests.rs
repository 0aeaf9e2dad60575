//! Cursor protocol, interruption and observer tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{check_lifecycle, compare_rows, context_with, int_rows, ints, nested, top_level_cursor, RecordingObserver};
use hkeydb_core::testing::Coi;
use hkeydb_core::{Row, RowType};
use hkeydb_query::api::{self, InputPreservationOption, JoinType, SortOption};
use hkeydb_query::exec::expr::field;
use hkeydb_query::exec::{CancellationToken, ExecutionConfig, OrderingSpec, QueryContext};
use hkeydb_query::{Cursor, ExecError, Operator, OperatorRef};

fn values(t: &Arc<RowType>, v: &[i64]) -> OperatorRef {
    api::values_scan_default(int_rows(t, v), Arc::clone(t))
}

// ============================================================================
// Open / next / close protocol
// ============================================================================

#[test]
fn test_lifecycle_of_stream_operators() {
    let coi = Coi::new();
    let ctx = context_with(coi.standard_rows());
    let t = RowType::values("t", 1);

    let limited = api::limit_default(values(&t, &[1, 2, 3]), 2);
    assert_eq!(ints(&check_lifecycle(&limited, &ctx)), vec![1, 2]);

    let customers =
        api::filter_default(api::group_scan_default(Arc::clone(&coi.group)), vec![Arc::clone(&coi.customer_type)]);
    assert_eq!(check_lifecycle(&customers, &ctx).len(), 3);

    let flatten = api::flatten_hkey_ordered(
        api::group_scan_default(Arc::clone(&coi.group)),
        &coi.customer_type,
        &coi.order_type,
        JoinType::Left,
        &[],
    )
    .unwrap();
    // Customer 4 has no orders and still gets a flattened row.
    let flattened = check_lifecycle(&flatten, &ctx);
    assert_eq!(
        flattened.iter().filter(|r| **r.row_type() == *flatten.row_type().unwrap()).count(),
        5
    );
}

#[test]
fn test_lifecycle_of_merges_and_sorts() {
    let ctx = Arc::new(QueryContext::new());
    let t = RowType::values("t", 1);

    let union = api::union_ordered(values(&t, &[1, 3, 5]), values(&t, &[2, 3]), &t, &t, 1, 1, &[true], false).unwrap();
    assert_eq!(ints(&check_lifecycle(&union, &ctx)), vec![1, 2, 3, 5]);

    let except = api::except_ordered(values(&t, &[1, 3, 5]), values(&t, &[3]), &t, &t, 1, 1, &[true], false).unwrap();
    assert_eq!(ints(&check_lifecycle(&except, &ctx)), vec![1, 5]);

    let ordering = Arc::new(OrderingSpec::new().append(field(0), false, None));
    let limited = api::sort_insertion_limited(
        values(&t, &[4, 8, 1, 9]),
        Arc::clone(&t),
        Arc::clone(&ordering),
        SortOption::PreserveDuplicates,
        2,
    )
    .unwrap();
    assert_eq!(ints(&check_lifecycle(&limited, &ctx)), vec![9, 8]);

    let general =
        api::sort_general(values(&t, &[4, 8, 1, 9]), Arc::clone(&t), ordering, SortOption::PreserveDuplicates).unwrap();
    assert_eq!(ints(&check_lifecycle(&general, &ctx)), vec![9, 8, 4, 1]);
}

#[test]
fn test_lifecycle_of_lookups() {
    let coi = Coi::new();
    let ctx = context_with(coi.standard_rows());
    let inner = api::branch_lookup_nested(
        Arc::clone(&coi.group),
        Arc::clone(&coi.customer_type),
        Arc::clone(&coi.customer_type),
        None,
        vec![Arc::clone(&coi.address_type)],
        InputPreservationOption::DiscardInput,
        0,
        1,
    )
    .unwrap();
    let plan = nested(vec![coi.customer_row(2, "foundation")], &coi.customer_type, inner);
    compare_rows(
        &check_lifecycle(&plan, &ctx),
        &[coi.address_row(2001, 2, "222 1111 st"), coi.address_row(2002, 2, "222 2222 st")],
    );

    let lookup = api::ancestor_lookup_default(
        api::values_scan_default(vec![coi.order_row(22, 2, "jack")], Arc::clone(&coi.order_type)),
        Arc::clone(&coi.group),
        Arc::clone(&coi.order_type),
        vec![Arc::clone(&coi.customer_type)],
        InputPreservationOption::KeepInput,
        2,
    )
    .unwrap();
    compare_rows(&check_lifecycle(&lookup, &ctx), &[coi.customer_row(2, "foundation"), coi.order_row(22, 2, "jack")]);
}

#[test]
fn test_lifecycle_checks_can_be_disabled() {
    let ctx = Arc::new(QueryContext::new().with_config(ExecutionConfig::new().with_lifecycle_checks(false)));
    let t = RowType::values("t", 1);
    let mut cursor = top_level_cursor(&values(&t, &[1]), &ctx);
    cursor.open_top_level().unwrap();
    // A second open is not reported when checks are off.
    assert!(cursor.open().is_ok());
    cursor.close_top_level().unwrap();
}

#[test]
fn test_jump_not_supported() {
    let coi = Coi::new();
    let ctx = context_with(coi.standard_rows());
    let mut cursor = top_level_cursor(&api::group_scan_default(Arc::clone(&coi.group)), &ctx);
    cursor.open_top_level().unwrap();
    let row = cursor.next().unwrap().unwrap();
    let err = cursor.jump(&row, hkeydb_query::exec::ColumnSelector::All).unwrap_err();
    assert!(matches!(err, ExecError::JumpNotSupported(_)));
    cursor.close_top_level().unwrap();
}

// ============================================================================
// Interruption
// ============================================================================

#[test]
fn test_cancellation_closes_cursor_tree() {
    let coi = Coi::new();
    let token = CancellationToken::new();
    let store = hkeydb_query::exec::MemoryStore::new();
    store.load(coi.standard_rows()).unwrap();
    let ctx = Arc::new(QueryContext::new().with_store(Arc::new(store)).with_cancellation(token.clone()));
    let plan = api::group_lookup_default(
        api::filter_default(api::group_scan_default(Arc::clone(&coi.group)), vec![Arc::clone(&coi.order_type)]),
        Arc::clone(&coi.group),
        Arc::clone(&coi.order_type),
        vec![Arc::clone(&coi.item_type)],
        InputPreservationOption::KeepInput,
        3,
    )
    .unwrap();

    let mut cursor = top_level_cursor(&plan, &ctx);
    cursor.open_top_level().unwrap();
    assert!(cursor.next().unwrap().is_some());
    token.cancel();
    let err = cursor.next().unwrap_err();
    assert!(matches!(err, ExecError::QueryCancelled));
    assert!(cursor.is_closed());
    // Closing again is harmless.
    cursor.close_top_level().unwrap();
}

#[test]
fn test_timeout_interrupts_nested_loop() {
    let coi = Coi::new();
    let config = ExecutionConfig::new().with_timeout(Duration::ZERO);
    let store = hkeydb_query::exec::MemoryStore::new();
    store.load(coi.standard_rows()).unwrap();
    let ctx = Arc::new(QueryContext::new().with_store(Arc::new(store)).with_config(config));
    let inner = api::emit_bound_row_nested(Arc::clone(&coi.customer_type), 0);
    let plan = nested(vec![coi.customer_row(1, "northbridge")], &coi.customer_type, inner);
    std::thread::sleep(Duration::from_millis(2));
    let err = api::execute(&plan, &ctx).unwrap_err();
    assert!(err.is_interruption());
    assert!(matches!(err, ExecError::QueryTimeout { .. }));
}

// ============================================================================
// Observer and statistics
// ============================================================================

#[test]
fn test_observer_sees_every_cursor() {
    let coi = Coi::new();
    let observer = Arc::new(RecordingObserver::default());
    let store = hkeydb_query::exec::MemoryStore::new();
    store.load(coi.standard_rows()).unwrap();
    let ctx = Arc::new(
        QueryContext::new()
            .with_store(Arc::new(store))
            .with_observer(Arc::clone(&observer) as Arc<dyn hkeydb_query::exec::ExecutionObserver>),
    );
    let plan = api::limit_default(
        api::filter_default(api::group_scan_default(Arc::clone(&coi.group)), vec![Arc::clone(&coi.customer_type)]),
        2,
    );
    let rows = api::execute(&plan, &ctx).unwrap();
    assert_eq!(rows.len(), 2);

    for operator in ["Limit_Default", "Filter_Default", "GroupScan_Default"] {
        assert_eq!(observer.count("opened", operator), 1, "{operator}");
        assert_eq!(observer.count("closed", operator), 1, "{operator}");
    }
    assert_eq!(observer.count("row", "Limit_Default"), 2);
    assert_eq!(observer.count("row", "Filter_Default"), 2);
}

#[test]
fn test_stats_count_filtered_bloom_rows() {
    let t = RowType::values("t", 1);
    let ctx = Arc::new(QueryContext::new());
    let verify = api::emit_bound_row_nested(Arc::clone(&t), 0);
    let select = api::select_bloom_filter(values(&t, &[1, 2, 3, 4]), verify, vec![field(0)], None, 0, false, 1).unwrap();
    let plan = api::using_bloom_filter(values(&t, &[2, 4]), Arc::clone(&t), 2, 0, select, None).unwrap();
    let rows: Vec<Row> = api::execute(&plan, &ctx).unwrap();
    assert_eq!(ints(&rows), vec![2, 4]);
    assert!(ctx.stats().rows_filtered() >= 2);
}
