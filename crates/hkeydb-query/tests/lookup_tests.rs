//! Lookup operators over loaded group data.
//!
//! Covers the nested ancestor and branch lookups driven by nested loops,
//! in both rebind and pipelined form, and the chained group lookups.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{compare_rows, context_with, int_rows, nested, nested_with, run};
use hkeydb_core::testing::{Coi, Rabc};
use hkeydb_core::{Row, RowType};
use hkeydb_query::api::{self, InputPreservationOption, JoinType};
use hkeydb_query::{ExecError, Operator, OperatorRef};

fn coi_rows() -> (Coi, Arc<hkeydb_query::QueryContext>) {
    let coi = Coi::new();
    let ctx = context_with(coi.standard_rows());
    (coi, ctx)
}

fn rabc_rows(rabc: &Rabc) -> Vec<Row> {
    vec![
        rabc.r_row(1, "r1"),
        rabc.a_row(11, 1, "a11"),
        rabc.a_row(12, 1, "a12"),
        rabc.b_row(13, 1, "b13"),
        rabc.c_row(14, 1, "c14"),
        rabc.c_row(15, 1, "c15"),
        rabc.r_row(2, "r2"),
        rabc.a_row(21, 2, "a21"),
        rabc.c_row(24, 2, "c24"),
        // No r 3.
        rabc.b_row(33, 3, "b33"),
    ]
}

fn branch_keep_input(group: &Arc<hkeydb_core::Group>, input: &Arc<RowType>, output: &Arc<RowType>) -> OperatorRef {
    api::branch_lookup_nested(
        Arc::clone(group),
        Arc::clone(input),
        Arc::clone(input),
        None,
        vec![Arc::clone(output)],
        InputPreservationOption::KeepInput,
        0,
        1,
    )
    .expect("invalid branch lookup")
}

// ============================================================================
// BranchLookup_Nested
// ============================================================================

#[test]
fn test_branch_address_to_orders() {
    let (coi, ctx) = coi_rows();
    let plan = nested(
        vec![coi.address_row(1001, 1, "111 1111 st"), coi.address_row(5001, 5, "555 1111 st")],
        &coi.address_type,
        branch_keep_input(&coi.group, &coi.address_type, &coi.order_type),
    );
    compare_rows(
        &run(&plan, &ctx),
        &[
            coi.order_row(11, 1, "ori"),
            coi.order_row(12, 1, "david"),
            coi.address_row(1001, 1, "111 1111 st"),
            coi.address_row(5001, 5, "555 1111 st"),
        ],
    );
}

#[test]
fn test_branch_order_to_addresses() {
    let (coi, ctx) = coi_rows();
    let plan = nested(
        vec![coi.order_row(21, 2, "tom"), coi.order_row(31, 3, "peter")],
        &coi.order_type,
        branch_keep_input(&coi.group, &coi.order_type, &coi.address_type),
    );
    compare_rows(
        &run(&plan, &ctx),
        &[
            coi.order_row(21, 2, "tom"),
            coi.address_row(2001, 2, "222 1111 st"),
            coi.address_row(2002, 2, "222 2222 st"),
            coi.order_row(31, 3, "peter"),
        ],
    );
}

#[test]
fn test_branch_item_to_addresses() {
    let (coi, ctx) = coi_rows();
    let plan = nested(
        vec![coi.item_row(111, 11, 1)],
        &coi.item_type,
        branch_keep_input(&coi.group, &coi.item_type, &coi.address_type),
    );
    compare_rows(
        &run(&plan, &ctx),
        &[coi.item_row(111, 11, 1), coi.address_row(1001, 1, "111 1111 st"), coi.address_row(1002, 1, "111 2222 st")],
    );
}

#[test]
fn test_branch_sibling_tables() {
    let rabc = Rabc::new();
    let ctx = context_with(rabc_rows(&rabc));
    let plan = nested(
        vec![rabc.b_row(13, 1, "b13"), rabc.b_row(33, 3, "b33")],
        &rabc.b_type,
        branch_keep_input(&rabc.group, &rabc.b_type, &rabc.c_type),
    );
    compare_rows(
        &run(&plan, &ctx),
        &[rabc.b_row(13, 1, "b13"), rabc.c_row(14, 1, "c14"), rabc.c_row(15, 1, "c15"), rabc.b_row(33, 3, "b33")],
    );
}

#[test]
fn test_branch_child_to_root() {
    let rabc = Rabc::new();
    let ctx = context_with(rabc_rows(&rabc));
    let plan = nested(
        vec![rabc.a_row(11, 1, "a11"), rabc.a_row(21, 2, "a21")],
        &rabc.a_type,
        branch_keep_input(&rabc.group, &rabc.a_type, &rabc.r_type),
    );
    compare_rows(
        &run(&plan, &ctx),
        &[rabc.r_row(1, "r1"), rabc.a_row(11, 1, "a11"), rabc.r_row(2, "r2"), rabc.a_row(21, 2, "a21")],
    );
}

#[test]
fn test_branch_same_table() {
    let rabc = Rabc::new();
    let ctx = context_with(rabc_rows(&rabc));
    let plan = nested(
        vec![rabc.a_row(12, 1, "a12")],
        &rabc.a_type,
        branch_keep_input(&rabc.group, &rabc.a_type, &rabc.a_type),
    );
    compare_rows(&run(&plan, &ctx), &[rabc.a_row(12, 1, "a12"), rabc.a_row(12, 1, "a12")]);
}

#[test]
fn test_branch_from_index_row_discarding_input() {
    let (coi, ctx) = coi_rows();
    let inner = api::branch_lookup_nested(
        Arc::clone(&coi.group),
        Arc::clone(&coi.customer_name_index),
        Arc::clone(&coi.customer_name_index),
        None,
        vec![Arc::clone(&coi.order_type)],
        InputPreservationOption::DiscardInput,
        0,
        1,
    )
    .unwrap();
    let plan = nested(
        vec![coi.customer_name_index_row("foundation", 2), coi.customer_name_index_row("highland", 4)],
        &coi.customer_name_index,
        inner,
    );
    compare_rows(&run(&plan, &ctx), &[coi.order_row(21, 2, "tom"), coi.order_row(22, 2, "jack")]);
}

#[test]
fn test_branch_from_flattened_row() {
    let (coi, ctx) = coi_rows();
    let flatten = api::flatten_hkey_ordered(
        api::values_scan_default(
            vec![coi.customer_row(1, "northbridge"), coi.order_row(12, 1, "david")],
            Arc::clone(&coi.customer_type),
        ),
        &coi.customer_type,
        &coi.order_type,
        JoinType::Inner,
        &[],
    )
    .unwrap();
    let flat_type = flatten.row_type().expect("flatten has a row type");
    let inner = api::branch_lookup_nested(
        Arc::clone(&coi.group),
        flat_type,
        Arc::clone(&coi.order_type),
        None,
        vec![Arc::clone(&coi.item_type)],
        InputPreservationOption::KeepInput,
        0,
        1,
    )
    .unwrap();
    let plan = api::map_nested_loops(flatten, inner, 0, false, 1).unwrap();
    compare_rows(
        &run(&plan, &ctx),
        &[coi.order_row(12, 1, "david"), coi.item_row(121, 12, 1), coi.item_row(122, 12, 1)],
    );
}

#[test]
fn test_branch_lookahead_matches_rebind() {
    let (coi, ctx) = coi_rows();
    let customers = || {
        vec![coi.customer_row(1, "northbridge"), coi.customer_row(2, "foundation"), coi.customer_row(4, "highland")]
    };
    let lookup = |quantum| {
        api::branch_lookup_nested(
            Arc::clone(&coi.group),
            Arc::clone(&coi.customer_type),
            Arc::clone(&coi.customer_type),
            None,
            vec![Arc::clone(&coi.item_type)],
            InputPreservationOption::KeepInput,
            0,
            quantum,
        )
        .unwrap()
    };
    let expected = run(&nested(customers(), &coi.customer_type, lookup(1)), &ctx);
    assert_eq!(expected.len(), 3 + 8);
    for quantum in [1, 2, 5] {
        let pipelined = nested_with(customers(), &coi.customer_type, lookup(quantum), true);
        compare_rows(&run(&pipelined, &ctx), &expected);
    }
}

fn customer_items(coi: &Coi, option: InputPreservationOption, binding_position: usize, quantum: usize) -> OperatorRef {
    api::branch_lookup_nested(
        Arc::clone(&coi.group),
        Arc::clone(&coi.customer_type),
        Arc::clone(&coi.customer_type),
        None,
        vec![Arc::clone(&coi.item_type)],
        option,
        binding_position,
        quantum,
    )
    .unwrap()
}

fn customers(coi: &Coi) -> Vec<Row> {
    vec![coi.customer_row(1, "northbridge"), coi.customer_row(2, "foundation"), coi.customer_row(4, "highland")]
}

/// Runs `plan` and checks every lookahead slot was handed back.
fn run_releasing_slots(plan: &OperatorRef, ctx: &Arc<hkeydb_query::QueryContext>) -> Vec<Row> {
    let rows = run(plan, ctx);
    assert_eq!(ctx.stats().lookup_slots_in_use(), 0, "lookup slots still held");
    rows
}

#[test]
fn test_limit_over_pipelined_lookahead() {
    let (coi, ctx) = coi_rows();
    let plan = |pipeline, quantum| {
        let lookup = customer_items(&coi, InputPreservationOption::KeepInput, 0, quantum);
        api::limit_default(nested_with(customers(&coi), &coi.customer_type, lookup, pipeline), 2)
    };
    let expected = run_releasing_slots(&plan(false, 1), &ctx);
    assert_eq!(expected.len(), 2);
    compare_rows(&run_releasing_slots(&plan(true, 3), &ctx), &expected);
}

#[test]
fn test_pipelined_loop_inside_pipelined_loop() {
    let (coi, ctx) = coi_rows();
    let t = RowType::values("t", 1);
    let plan = |pipeline, quantum| {
        let lookup = customer_items(&coi, InputPreservationOption::KeepInput, 1, quantum);
        let per_customer = api::map_nested_loops(
            api::values_scan_default(customers(&coi), Arc::clone(&coi.customer_type)),
            lookup,
            1,
            pipeline,
            2,
        )
        .unwrap();
        let outer = api::values_scan_default(int_rows(&t, &[1, 2]), Arc::clone(&t));
        api::map_nested_loops(outer, per_customer, 0, pipeline, 1).unwrap()
    };
    let expected = run_releasing_slots(&plan(false, 1), &ctx);
    assert_eq!(expected.len(), 22);
    compare_rows(&run_releasing_slots(&plan(true, 3), &ctx), &expected);
}

#[test]
fn test_limit_per_scope_inside_pipelined_loop() {
    let (coi, ctx) = coi_rows();
    let plan = |pipeline, quantum| {
        let lookup = customer_items(&coi, InputPreservationOption::DiscardInput, 0, quantum);
        nested_with(customers(&coi), &coi.customer_type, api::limit_default(lookup, 2), pipeline)
    };
    let expected = run_releasing_slots(&plan(false, 1), &ctx);
    // Customer 4 has no items.
    compare_rows(
        &expected,
        &[coi.item_row(111, 11, 1), coi.item_row(112, 11, 1), coi.item_row(211, 21, 2), coi.item_row(212, 21, 2)],
    );
    compare_rows(&run_releasing_slots(&plan(true, 3), &ctx), &expected);
}

// ============================================================================
// AncestorLookup_Nested
// ============================================================================

#[test]
fn test_ancestors_of_items_pipelined() {
    let (coi, ctx) = coi_rows();
    let items = || vec![coi.item_row(111, 11, 1), coi.item_row(211, 21, 2), coi.item_row(311, 31, 3)];
    let expected = [
        coi.customer_row(1, "northbridge"),
        coi.order_row(11, 1, "ori"),
        coi.customer_row(2, "foundation"),
        coi.order_row(21, 2, "tom"),
        // Customer 3 does not exist.
        coi.order_row(31, 3, "peter"),
    ];
    for (pipeline, quantum) in [(false, 1), (true, 1), (true, 3), (true, 8)] {
        let inner = api::ancestor_lookup_nested(
            Arc::clone(&coi.group),
            Arc::clone(&coi.item_type),
            vec![Arc::clone(&coi.order_type), Arc::clone(&coi.customer_type)],
            0,
            quantum,
        )
        .unwrap();
        let plan = nested_with(items(), &coi.item_type, inner, pipeline);
        compare_rows(&run(&plan, &ctx), &expected);
    }
}

#[test]
fn test_ancestor_lookup_rejects_descendant() {
    let coi = Coi::new();
    let result = api::ancestor_lookup_nested(
        Arc::clone(&coi.group),
        Arc::clone(&coi.order_type),
        vec![Arc::clone(&coi.item_type)],
        0,
        1,
    );
    assert!(result.is_err());
}

// ============================================================================
// GroupLookup_Default
// ============================================================================

#[test]
fn test_ancestor_lookup_default() {
    let (coi, ctx) = coi_rows();
    let items = vec![coi.item_row(111, 11, 1), coi.item_row(211, 21, 2), coi.item_row(311, 31, 3)];
    let expected = [
        coi.customer_row(1, "northbridge"),
        coi.order_row(11, 1, "ori"),
        coi.item_row(111, 11, 1),
        coi.customer_row(2, "foundation"),
        coi.order_row(21, 2, "tom"),
        coi.item_row(211, 21, 2),
        coi.order_row(31, 3, "peter"),
        coi.item_row(311, 31, 3),
    ];
    for quantum in [0, 1, 2, 6] {
        let plan = api::ancestor_lookup_default(
            api::values_scan_default(items.clone(), Arc::clone(&coi.item_type)),
            Arc::clone(&coi.group),
            Arc::clone(&coi.item_type),
            vec![Arc::clone(&coi.customer_type), Arc::clone(&coi.order_type)],
            InputPreservationOption::KeepInput,
            quantum,
        )
        .unwrap();
        compare_rows(&run(&plan, &ctx), &expected);
    }
}

#[test]
fn test_branch_lookup_default_keeps_customers() {
    let (coi, ctx) = coi_rows();
    let customers =
        vec![coi.customer_row(1, "northbridge"), coi.customer_row(2, "foundation"), coi.customer_row(4, "highland")];
    let plan = api::branch_lookup_default(
        api::values_scan_default(customers, Arc::clone(&coi.customer_type)),
        Arc::clone(&coi.group),
        Arc::clone(&coi.customer_type),
        &coi.order_type,
        InputPreservationOption::KeepInput,
        4,
    )
    .unwrap();
    let rows = run_releasing_slots(&plan, &ctx);
    // Only rows found by the lookups count as read.
    assert_eq!(ctx.stats().rows_read(), 12);
    compare_rows(
        &rows,
        &[
            coi.customer_row(1, "northbridge"),
            coi.order_row(11, 1, "ori"),
            coi.item_row(111, 11, 1),
            coi.item_row(112, 11, 1),
            coi.order_row(12, 1, "david"),
            coi.item_row(121, 12, 1),
            coi.item_row(122, 12, 1),
            coi.customer_row(2, "foundation"),
            coi.order_row(21, 2, "tom"),
            coi.item_row(211, 21, 2),
            coi.item_row(212, 21, 2),
            coi.order_row(22, 2, "jack"),
            coi.item_row(221, 22, 2),
            coi.item_row(222, 22, 2),
            coi.customer_row(4, "highland"),
        ],
    );
}

#[test]
fn test_group_lookup_from_index() {
    let (coi, ctx) = coi_rows();
    let index_rows = vec![coi.customer_name_index_row("foundation", 2), coi.customer_name_index_row("northbridge", 1)];
    let plan = api::group_lookup_default(
        api::values_scan_default(index_rows, Arc::clone(&coi.customer_name_index)),
        Arc::clone(&coi.group),
        Arc::clone(&coi.customer_name_index),
        vec![Arc::clone(&coi.customer_type), Arc::clone(&coi.address_type)],
        InputPreservationOption::DiscardInput,
        2,
    )
    .unwrap();
    compare_rows(
        &run(&plan, &ctx),
        &[
            coi.customer_row(2, "foundation"),
            coi.address_row(2001, 2, "222 1111 st"),
            coi.address_row(2002, 2, "222 2222 st"),
            coi.customer_row(1, "northbridge"),
            coi.address_row(1001, 1, "111 1111 st"),
            coi.address_row(1002, 1, "111 2222 st"),
        ],
    );
}

#[test]
fn test_group_lookup_over_group_scan() {
    let (coi, ctx) = coi_rows();
    let orders = api::filter_default(api::group_scan_default(Arc::clone(&coi.group)), vec![Arc::clone(&coi.order_type)]);
    let plan = api::group_lookup_default(
        orders,
        Arc::clone(&coi.group),
        Arc::clone(&coi.order_type),
        vec![Arc::clone(&coi.customer_type)],
        InputPreservationOption::DiscardInput,
        3,
    )
    .unwrap();
    // Both orders of customers 1 and 2 find their customer; order 31 finds none.
    compare_rows(
        &run(&plan, &ctx),
        &[
            coi.customer_row(1, "northbridge"),
            coi.customer_row(1, "northbridge"),
            coi.customer_row(2, "foundation"),
            coi.customer_row(2, "foundation"),
        ],
    );
}

#[test]
fn test_group_lookup_validation() {
    let coi = Coi::new();
    let input = || api::values_scan_default(Vec::new(), Arc::clone(&coi.order_type));
    let lookup = |outputs: Vec<Arc<RowType>>, option| {
        api::group_lookup_default(input(), Arc::clone(&coi.group), Arc::clone(&coi.order_type), outputs, option, 1)
    };
    assert!(matches!(
        lookup(Vec::new(), InputPreservationOption::KeepInput),
        Err(ExecError::InvalidArgument { .. })
    ));
    // Address is a sibling branch of order.
    assert!(lookup(vec![Arc::clone(&coi.address_type)], InputPreservationOption::KeepInput).is_err());
    assert!(lookup(vec![Arc::clone(&coi.order_type)], InputPreservationOption::KeepInput).is_err());
    assert!(lookup(vec![Arc::clone(&coi.order_type)], InputPreservationOption::DiscardInput).is_ok());
}
