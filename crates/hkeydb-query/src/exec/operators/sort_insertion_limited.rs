//! Sort_InsertionLimited: the first `limit` rows of a sort, kept in memory.

use std::cmp::Ordering;
use std::sync::Arc;

use hkeydb_core::{Row, RowType, Value};
use tracing::debug;

use crate::api::SortOption;
use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::QueryBindingsCursor;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, ChainedInput, Cursor, CursorLifecycle,
    CursorState,
};
use crate::exec::operator::{Operator, OperatorRef};
use crate::exec::ordering::OrderingSpec;

/// Sorts its input, keeping only the first `limit` rows.
///
/// Rows are held in a sorted buffer of at most `limit` entries; a row that
/// sorts after the buffer's last entry once the buffer is full is dropped
/// on arrival. Ties are broken by arrival order with
/// [`SortOption::PreserveDuplicates`]. With
/// [`SortOption::SuppressDuplicates`] a row whose sort key equals a buffered
/// one is dropped instead.
#[derive(Debug)]
pub struct SortInsertionLimited {
    input: OperatorRef,
    sort_type: Arc<RowType>,
    ordering: Arc<OrderingSpec>,
    preserve_duplicates: bool,
    limit: usize,
}

impl SortInsertionLimited {
    pub(crate) fn new(
        input: OperatorRef,
        sort_type: Arc<RowType>,
        ordering: Arc<OrderingSpec>,
        option: SortOption,
        limit: usize,
    ) -> ExecResult<Self> {
        if ordering.is_empty() {
            return Err(ExecError::invalid("ordering", "at least one sort key is required"));
        }
        Ok(Self { input, sort_type, ordering, preserve_duplicates: option == SortOption::PreserveDuplicates, limit })
    }
}

impl Operator for SortInsertionLimited {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            input: ChainedInput::of(&self.input, ctx, bindings),
            sorted: Vec::new(),
            filled: false,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Sort_InsertionLimited"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(Arc::clone(&self.sort_type))
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.input)]
    }
}

/// A buffered row with its evaluated sort key.
struct Holder {
    key: Vec<Value>,
    /// Arrival order; always 0 when duplicates are suppressed.
    label: usize,
    row: Row,
}

struct Execution {
    plan: Arc<SortInsertionLimited>,
    lifecycle: CursorLifecycle,
    input: ChainedInput,
    /// Buffered rows, in reverse output order so draining pops from the end.
    sorted: Vec<Holder>,
    filled: bool,
}

impl Execution {
    fn compare(&self, a: &Holder, b: &Holder) -> Ordering {
        self.plan.ordering.compare_keys(&a.key, &b.key).then(a.label.cmp(&b.label))
    }

    fn fill(&mut self) -> ExecResult<()> {
        let bindings = self.input.require(self.plan.name())?;
        let limit = self.plan.limit;
        let mut buffer: Vec<Holder> = Vec::with_capacity(limit);
        let mut label = 0;
        let mut read = 0usize;
        while let Some(row) = self.input.get_mut().next()? {
            read += 1;
            debug_assert!(**row.row_type() == *self.plan.sort_type, "unexpected row {row:?}");
            let holder = Holder { key: self.plan.ordering.evaluate(&row, &bindings)?, label, row };
            if self.plan.preserve_duplicates {
                label += 1;
            }
            match buffer.binary_search_by(|h| self.compare(h, &holder)) {
                // Only possible when duplicates are suppressed.
                Ok(_) => {}
                Err(position) if buffer.len() < limit => buffer.insert(position, holder),
                Err(position) if position < buffer.len() => {
                    buffer.pop();
                    buffer.insert(position, holder);
                }
                Err(_) => {}
            }
        }
        self.input.get_mut().close()?;
        debug!(read, kept = buffer.len(), limit, "insertion sort filled");
        buffer.reverse();
        self.sorted = buffer;
        self.filled = true;
        Ok(())
    }

    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        if !self.filled && self.plan.limit > 0 {
            self.fill()?;
        }
        let row = self.sorted.pop().map(|holder| holder.row);
        Ok(self.lifecycle.emit(row))
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        self.sorted.clear();
        self.filled = false;
        if self.plan.limit == 0 {
            debug!("limit 0, input not opened");
            return Ok(());
        }
        self.input.get_mut().open()
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        if !self.lifecycle.close() {
            return Ok(());
        }
        self.sorted.clear();
        self.input.get_mut().close()
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    fn name(&self) -> &'static str {
        self.lifecycle.operator()
    }
}

delegate_bindings!(Execution => input);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use crate::exec::expr::field;

    fn rows(t: &Arc<RowType>, values: &[(i64, i64)]) -> Vec<Row> {
        values.iter().map(|(k, v)| Row::new(Arc::clone(t), vec![Value::Int(*k), Value::Int(*v)], None)).collect()
    }

    fn sort(values: &[(i64, i64)], limit: usize, option: SortOption, ascending: bool) -> Vec<(i64, i64)> {
        let t = RowType::values("t", 2);
        let ordering = Arc::new(OrderingSpec::new().append(field(0), ascending, None));
        let plan = api::sort_insertion_limited(
            api::values_scan_default(rows(&t, values), Arc::clone(&t)),
            Arc::clone(&t),
            ordering,
            option,
            limit,
        )
        .unwrap();
        api::execute(&plan, &Arc::new(QueryContext::new()))
            .unwrap()
            .iter()
            .map(|r| (r.value(0).as_int().unwrap(), r.value(1).as_int().unwrap()))
            .collect()
    }

    const INPUT: [(i64, i64); 6] = [(3, 0), (1, 1), (2, 2), (1, 3), (5, 4), (2, 5)];

    #[test]
    fn keeps_first_rows_in_order() {
        assert_eq!(sort(&INPUT, 3, SortOption::PreserveDuplicates, true), vec![(1, 1), (1, 3), (2, 2)]);
        assert_eq!(sort(&INPUT, 2, SortOption::PreserveDuplicates, false), vec![(5, 4), (3, 0)]);
    }

    #[test]
    fn ties_keep_arrival_order() {
        assert_eq!(
            sort(&INPUT, 10, SortOption::PreserveDuplicates, true),
            vec![(1, 1), (1, 3), (2, 2), (2, 5), (3, 0), (5, 4)]
        );
    }

    #[test]
    fn suppressed_duplicates_keep_first_arrival() {
        assert_eq!(sort(&INPUT, 10, SortOption::SuppressDuplicates, true), vec![(1, 1), (2, 2), (3, 0), (5, 4)]);
        assert_eq!(sort(&INPUT, 2, SortOption::SuppressDuplicates, true), vec![(1, 1), (2, 2)]);
    }

    #[test]
    fn limit_zero_never_reads_input() {
        assert!(sort(&INPUT, 0, SortOption::PreserveDuplicates, true).is_empty());
        let ctx = Arc::new(QueryContext::new());
        let t = RowType::values("t", 2);
        let plan = api::sort_insertion_limited(
            api::values_scan_default(rows(&t, &INPUT), Arc::clone(&t)),
            Arc::clone(&t),
            Arc::new(OrderingSpec::new().append(field(0), true, None)),
            SortOption::PreserveDuplicates,
            0,
        )
        .unwrap();
        assert!(api::execute(&plan, &ctx).unwrap().is_empty());
        assert_eq!(ctx.stats().rows_produced(), 0);
    }

    #[test]
    fn requires_sort_key() {
        let t = RowType::values("t", 2);
        let result = api::sort_insertion_limited(
            api::values_scan_default(Vec::new(), Arc::clone(&t)),
            Arc::clone(&t),
            Arc::new(OrderingSpec::new()),
            SortOption::PreserveDuplicates,
            3,
        );
        assert!(result.is_err());
    }
}
