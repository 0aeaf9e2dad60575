//! Operator factories.
//!
//! Every operator is built through a function here. Factories validate
//! their arguments and return an [`OperatorRef`]; operators that cannot be
//! misconfigured return it directly, the others return
//! [`ExecResult<OperatorRef>`] with [`ExecError::InvalidArgument`] (or a more
//! specific construction error) on bad input.
//!
//! A `lookahead_quantum` of 0 means "use
//! [`ExecutionConfig::lookahead_quantum`](crate::exec::ExecutionConfig)".

use std::sync::Arc;

use hkeydb_core::{Group, Row, RowType, RowTypeKind};

use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::{QueryBindingsCursor, SingletonQueryBindingsCursor};
use crate::exec::collation::CollatorRef;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{BoxedCursor, Cursor};
use crate::exec::expr::ExpressionRef;
use crate::exec::operator::OperatorRef;
use crate::exec::operators::{
    AncestorLookupNested, BranchLookupNested, EmitBoundRowNested, ExceptOrdered, FilterDefault,
    FlattenHKeyOrdered, GroupLookupDefault, GroupScanDefault, HashTableLookupDefault,
    IntersectOrdered, LimitDefault, MapNestedLoops, SelectBloomFilter, SortGeneral,
    SortInsertionLimited, UnionOrdered, UsingBloomFilter, UsingHashTable, ValuesScanDefault,
};
use crate::exec::ordering::OrderingSpec;

/// Join flavor of flatten and intersect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// Only matched rows.
    Inner,
    /// Unmatched left (parent) rows too.
    Left,
    /// Unmatched right (child) rows too.
    Right,
    /// Both.
    Full,
}

/// Options of [`flatten_hkey_ordered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlattenOption {
    /// Emit parent rows as well as the flattened rows.
    KeepParent,
    /// Emit child rows as well as the flattened rows.
    KeepChild,
    /// A parent flattened with a null child keeps the parent's hkey.
    LeftJoinShortensHKey,
}

/// Whether lookup operators return their input rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputPreservationOption {
    KeepInput,
    DiscardInput,
}

/// Duplicate handling of the sort operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOption {
    PreserveDuplicates,
    /// Rows equal on every sort key are emitted once.
    SuppressDuplicates,
}

/// Options of [`intersect_ordered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntersectOption {
    /// Emit the left row of each match.
    OutputLeft,
    /// Emit the right row of each match.
    OutputRight,
    /// Advance the lagging side row by row.
    SequentialScan,
    /// Jump the lagging side to the other side's key. The default.
    SkipScan,
}

/// Leaf returning `rows` in order. Supports `jump`.
#[must_use]
pub fn values_scan_default(rows: Vec<Row>, row_type: Arc<RowType>) -> OperatorRef {
    Arc::new(ValuesScanDefault::new(rows, row_type))
}

/// Leaf returning every row of `group` in hkey order.
#[must_use]
pub fn group_scan_default(group: Arc<Group>) -> OperatorRef {
    Arc::new(GroupScanDefault::new(group))
}

/// Keeps the input rows whose type is one of `keep_types`.
#[must_use]
pub fn filter_default(input: OperatorRef, keep_types: Vec<Arc<RowType>>) -> OperatorRef {
    Arc::new(FilterDefault::new(input, keep_types))
}

/// The first `limit` input rows.
#[must_use]
pub fn limit_default(input: OperatorRef, limit: usize) -> OperatorRef {
    Arc::new(LimitDefault::new(input, limit))
}

/// Leaf emitting the row bound at `binding_position` once per bindings.
#[must_use]
pub fn emit_bound_row_nested(input_row_type: Arc<RowType>, binding_position: usize) -> OperatorRef {
    Arc::new(EmitBoundRowNested::new(input_row_type, binding_position))
}

/// Joins hkey-ordered parent and child rows into flattened rows.
pub fn flatten_hkey_ordered(
    input: OperatorRef,
    parent_type: &Arc<RowType>,
    child_type: &Arc<RowType>,
    join_type: JoinType,
    options: &[FlattenOption],
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(FlattenHKeyOrdered::new(input, parent_type, child_type, join_type, options)?))
}

/// Merges two sorted inputs, emitting each distinct key once.
#[allow(clippy::too_many_arguments)]
pub fn union_ordered(
    left: OperatorRef,
    right: OperatorRef,
    left_type: &Arc<RowType>,
    right_type: &Arc<RowType>,
    left_ordering_fields: usize,
    right_ordering_fields: usize,
    ascending: &[bool],
    output_equal: bool,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(UnionOrdered::new(
        left,
        right,
        left_type,
        right_type,
        left_ordering_fields,
        right_ordering_fields,
        ascending,
        output_equal,
    )?))
}

/// Rows of one sorted input whose key also appears in the other.
#[allow(clippy::too_many_arguments)]
pub fn intersect_ordered(
    left: OperatorRef,
    right: OperatorRef,
    left_type: &Arc<RowType>,
    right_type: &Arc<RowType>,
    left_ordering_fields: usize,
    right_ordering_fields: usize,
    ascending: &[bool],
    join_type: JoinType,
    options: &[IntersectOption],
    collators: Option<Vec<Option<CollatorRef>>>,
    output_equal: bool,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(IntersectOrdered::new(
        left,
        right,
        left_type,
        right_type,
        left_ordering_fields,
        right_ordering_fields,
        ascending,
        join_type,
        options,
        collators,
        output_equal,
    )?))
}

/// Rows of the sorted left input not cancelled by an equal right row.
#[allow(clippy::too_many_arguments)]
pub fn except_ordered(
    left: OperatorRef,
    right: OperatorRef,
    left_type: &Arc<RowType>,
    right_type: &Arc<RowType>,
    left_ordering_fields: usize,
    right_ordering_fields: usize,
    ascending: &[bool],
    remove_duplicates: bool,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(ExceptOrdered::new(
        left,
        right,
        left_type,
        right_type,
        left_ordering_fields,
        right_ordering_fields,
        ascending,
        remove_duplicates,
    )?))
}

/// Leaf returning the ancestors of the row bound at `input_binding_position`.
pub fn ancestor_lookup_nested(
    group: Arc<Group>,
    row_type: Arc<RowType>,
    ancestor_types: Vec<Arc<RowType>>,
    input_binding_position: usize,
    lookahead_quantum: usize,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(AncestorLookupNested::new(
        group,
        row_type,
        &ancestor_types,
        input_binding_position,
        lookahead_quantum,
    )?))
}

/// Leaf returning the branch of the row bound at `input_binding_position`.
#[allow(clippy::too_many_arguments)]
pub fn branch_lookup_nested(
    group: Arc<Group>,
    input_row_type: Arc<RowType>,
    source_row_type: Arc<RowType>,
    ancestor_row_type: Option<Arc<RowType>>,
    output_row_types: Vec<Arc<RowType>>,
    option: InputPreservationOption,
    input_binding_position: usize,
    lookahead_quantum: usize,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(BranchLookupNested::new(
        group,
        input_row_type,
        source_row_type,
        ancestor_row_type,
        output_row_types,
        option,
        input_binding_position,
        lookahead_quantum,
    )?))
}

/// Looks up ancestors and a branch for every input row.
pub fn group_lookup_default(
    input: OperatorRef,
    group: Arc<Group>,
    input_row_type: Arc<RowType>,
    output_row_types: Vec<Arc<RowType>>,
    option: InputPreservationOption,
    lookahead_quantum: usize,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(GroupLookupDefault::new(
        input,
        group,
        input_row_type,
        &output_row_types,
        option,
        lookahead_quantum,
    )?))
}

/// Ancestors of every input row, as a [`group_lookup_default`].
pub fn ancestor_lookup_default(
    input: OperatorRef,
    group: Arc<Group>,
    row_type: Arc<RowType>,
    ancestor_types: Vec<Arc<RowType>>,
    option: InputPreservationOption,
    lookahead_quantum: usize,
) -> ExecResult<OperatorRef> {
    if ancestor_types.is_empty() {
        return Err(ExecError::invalid("ancestor_types", "at least one ancestor type is required"));
    }
    group_lookup_default(input, group, row_type, ancestor_types, option, lookahead_quantum)
}

/// The `output_type` table and its descendants under every input row, as a
/// [`group_lookup_default`].
pub fn branch_lookup_default(
    input: OperatorRef,
    group: Arc<Group>,
    input_row_type: Arc<RowType>,
    output_row_type: &Arc<RowType>,
    option: InputPreservationOption,
    lookahead_quantum: usize,
) -> ExecResult<OperatorRef> {
    let RowTypeKind::Table(table) = output_row_type.kind() else {
        return Err(ExecError::invalid("output_row_type", format!("{output_row_type} is not a table row type")));
    };
    let outputs = group.subtree(table).iter().map(RowType::table).collect();
    group_lookup_default(input, group, input_row_type, outputs, option, lookahead_quantum)
}

/// Runs `inner` once per `outer` row, with the row bound at
/// `input_binding_position`. A pipelined loop overlaps inner executions and
/// needs the bindings `depth` of the loop body.
pub fn map_nested_loops(
    outer: OperatorRef,
    inner: OperatorRef,
    input_binding_position: usize,
    pipeline: bool,
    depth: u32,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(MapNestedLoops::new(outer, inner, input_binding_position, pipeline, depth)?))
}

/// The first `limit` rows of the input in `ordering` order.
pub fn sort_insertion_limited(
    input: OperatorRef,
    sort_type: Arc<RowType>,
    ordering: Arc<OrderingSpec>,
    option: SortOption,
    limit: usize,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(SortInsertionLimited::new(input, sort_type, ordering, option, limit)?))
}

/// The input sorted by the store's sorter.
pub fn sort_general(
    input: OperatorRef,
    sort_type: Arc<RowType>,
    ordering: Arc<OrderingSpec>,
    option: SortOption,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(SortGeneral::new(input, sort_type, ordering, option)?))
}

/// Binds a bloom filter of `filter_input`'s rows at `binding_position` for
/// the duration of `stream_input`.
pub fn using_bloom_filter(
    filter_input: OperatorRef,
    filter_row_type: Arc<RowType>,
    estimated_row_count: usize,
    binding_position: usize,
    stream_input: OperatorRef,
    collators: Option<Vec<Option<CollatorRef>>>,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(UsingBloomFilter::new(
        filter_input,
        filter_row_type,
        estimated_row_count,
        binding_position,
        stream_input,
        collators,
    )?))
}

/// Input rows that pass the bound bloom filter and are confirmed by
/// `on_positive`.
#[allow(clippy::too_many_arguments)]
pub fn select_bloom_filter(
    input: OperatorRef,
    on_positive: OperatorRef,
    fields: Vec<ExpressionRef>,
    collators: Option<Vec<Option<CollatorRef>>>,
    binding_position: usize,
    pipeline: bool,
    depth: u32,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(SelectBloomFilter::new(input, on_positive, fields, collators, binding_position, pipeline, depth)?))
}

/// Binds a hash table of `hash_input`'s rows at `binding_position` for the
/// duration of `joined_input`.
pub fn using_hash_table(
    hash_input: OperatorRef,
    hash_row_type: Arc<RowType>,
    comparison_fields: Vec<usize>,
    binding_position: usize,
    joined_input: OperatorRef,
    collators: Option<Vec<Option<CollatorRef>>>,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(UsingHashTable::new(
        hash_input,
        hash_row_type,
        comparison_fields,
        binding_position,
        joined_input,
        collators,
    )?))
}

/// Leaf returning the hashed rows matching the row bound at
/// `row_binding_position`.
pub fn hash_table_lookup_default(
    hashed_row_type: Arc<RowType>,
    outer_comparison_fields: Vec<ExpressionRef>,
    row_binding_position: usize,
    table_binding_position: usize,
) -> ExecResult<OperatorRef> {
    Ok(Arc::new(HashTableLookupDefault::new(
        hashed_row_type,
        outer_comparison_fields,
        row_binding_position,
        table_binding_position,
    )?))
}

/// A cursor over `operator` reading its bindings from `bindings`.
#[must_use]
pub fn cursor(
    operator: &OperatorRef,
    ctx: &Arc<QueryContext>,
    bindings: Box<dyn QueryBindingsCursor>,
) -> BoxedCursor {
    Arc::clone(operator).cursor(ctx, bindings)
}

/// Runs `operator` over a fresh root bindings and collects its rows.
pub fn execute(operator: &OperatorRef, ctx: &Arc<QueryContext>) -> ExecResult<Vec<Row>> {
    let bindings = SingletonQueryBindingsCursor::new(Some(ctx.create_bindings()));
    let mut cursor = cursor(operator, ctx, Box::new(bindings));
    cursor.open_top_level()?;
    let mut rows = Vec::new();
    let drained = loop {
        match cursor.next() {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };
    let closed = cursor.close_top_level();
    drained?;
    closed?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hkeydb_core::testing::Coi;

    use crate::exec::store::MemoryStore;

    fn ctx(coi: &Coi) -> Arc<QueryContext> {
        let store = MemoryStore::new();
        store.load(coi.standard_rows()).unwrap();
        Arc::new(QueryContext::new().with_store(Arc::new(store)))
    }

    #[test]
    fn branch_lookup_default_covers_descendants() {
        let coi = Coi::new();
        let ctx = ctx(&coi);
        let customers = filter_default(group_scan_default(Arc::clone(&coi.group)), vec![Arc::clone(&coi.customer_type)]);
        let plan = branch_lookup_default(
            limit_default(customers, 1),
            Arc::clone(&coi.group),
            Arc::clone(&coi.customer_type),
            &coi.order_type,
            InputPreservationOption::DiscardInput,
            0,
        )
        .unwrap();
        let rows = execute(&plan, &ctx).unwrap();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| **r.row_type() == *coi.order_type || **r.row_type() == *coi.item_type));
        assert_eq!(*rows[0].row_type().as_ref(), *coi.order_type);
    }

    #[test]
    fn ancestor_lookup_default_requires_ancestors() {
        let coi = Coi::new();
        let input = values_scan_default(Vec::new(), Arc::clone(&coi.order_type));
        let result = ancestor_lookup_default(
            input,
            Arc::clone(&coi.group),
            Arc::clone(&coi.order_type),
            Vec::new(),
            InputPreservationOption::KeepInput,
            1,
        );
        assert!(result.is_err());
    }

    #[test]
    fn branch_lookup_default_rejects_index_output() {
        let coi = Coi::new();
        let input = values_scan_default(Vec::new(), Arc::clone(&coi.customer_type));
        let result = branch_lookup_default(
            input,
            Arc::clone(&coi.group),
            Arc::clone(&coi.customer_type),
            &coi.order_salesman_index,
            InputPreservationOption::KeepInput,
            1,
        );
        assert!(result.is_err());
    }

    #[test]
    fn execute_closes_cursor_on_error() {
        let coi = Coi::new();
        let ctx = Arc::new(QueryContext::new());
        ctx.cancel();
        let plan = values_scan_default(vec![coi.customer_row(1, "a")], Arc::clone(&coi.customer_type));
        assert!(execute(&plan, &ctx).unwrap_err().is_interruption());
    }
}
