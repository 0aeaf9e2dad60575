//! Sort_General: full sort through the store's sorter.

use std::sync::Arc;

use hkeydb_core::{Row, RowType};
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
use crate::exec::store::Sorter;

/// Sorts its input with a [`Sorter`] from the store adapter.
///
/// The whole input is handed to the sorter on the first `next`, after which
/// the input is closed and rows are read back from the sorter.
#[derive(Debug)]
pub struct SortGeneral {
    input: OperatorRef,
    sort_type: Arc<RowType>,
    ordering: Arc<OrderingSpec>,
    option: SortOption,
}

impl SortGeneral {
    pub(crate) fn new(
        input: OperatorRef,
        sort_type: Arc<RowType>,
        ordering: Arc<OrderingSpec>,
        option: SortOption,
    ) -> ExecResult<Self> {
        if ordering.is_empty() {
            return Err(ExecError::invalid("ordering", "at least one sort key is required"));
        }
        Ok(Self { input, sort_type, ordering, option })
    }
}

impl Operator for SortGeneral {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            input: ChainedInput::of(&self.input, ctx, bindings),
            sorter: None,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Sort_General"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(Arc::clone(&self.sort_type))
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.input)]
    }
}

struct Execution {
    plan: Arc<SortGeneral>,
    lifecycle: CursorLifecycle,
    input: ChainedInput,
    sorter: Option<Box<dyn Sorter>>,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        if self.sorter.is_none() && !self.input.get().is_closed() {
            let bindings = self.input.require(self.plan.name())?;
            let mut sorter =
                self.lifecycle.ctx().store().create_sorter(Arc::clone(&self.plan.ordering), self.plan.option);
            let sorted = sorter.sort(self.input.get_mut(), &bindings);
            // The sorter has consumed the input either way.
            self.input.get_mut().close()?;
            if let Err(err) = sorted {
                sorter.close();
                return Err(err);
            }
            debug!(operator = self.plan.name(), "input handed to sorter");
            self.sorter = Some(sorter);
        }
        let row = match self.sorter.as_mut() {
            Some(sorter) => sorter.next()?,
            None => None,
        };
        if row.is_none() {
            if let Some(mut sorter) = self.sorter.take() {
                sorter.close();
            }
        }
        Ok(self.lifecycle.emit(row))
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
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
        if let Some(mut sorter) = self.sorter.take() {
            sorter.close();
        }
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
    use hkeydb_core::Value;

    fn sort(values: &[i64], option: SortOption) -> Vec<i64> {
        let t = RowType::values("t", 1);
        let rows = values.iter().map(|v| Row::new(Arc::clone(&t), vec![Value::Int(*v)], None)).collect();
        let plan = api::sort_general(
            api::values_scan_default(rows, Arc::clone(&t)),
            Arc::clone(&t),
            Arc::new(OrderingSpec::new().append(field(0), false, None)),
            option,
        )
        .unwrap();
        api::execute(&plan, &Arc::new(QueryContext::new()))
            .unwrap()
            .iter()
            .filter_map(|r| r.value(0).as_int())
            .collect()
    }

    #[test]
    fn sorts_whole_input() {
        assert_eq!(sort(&[2, 9, 4, 9, 1], SortOption::PreserveDuplicates), vec![9, 9, 4, 2, 1]);
        assert_eq!(sort(&[2, 9, 4, 9, 1], SortOption::SuppressDuplicates), vec![9, 4, 2, 1]);
        assert!(sort(&[], SortOption::PreserveDuplicates).is_empty());
    }

    #[test]
    fn input_closed_after_sorting() {
        let t = RowType::values("t", 1);
        let rows = (0..3).map(|v| Row::new(Arc::clone(&t), vec![Value::Int(v)], None)).collect();
        let plan = api::sort_general(
            api::values_scan_default(rows, Arc::clone(&t)),
            Arc::clone(&t),
            Arc::new(OrderingSpec::new().append(field(0), true, None)),
            SortOption::PreserveDuplicates,
        )
        .unwrap();
        let ctx = Arc::new(QueryContext::new());
        let mut cursor = api::cursor(
            &plan,
            &ctx,
            Box::new(crate::exec::bindings::SingletonQueryBindingsCursor::new(Some(ctx.create_bindings()))),
        );
        cursor.open_top_level().unwrap();
        assert_eq!(cursor.next().unwrap().unwrap().value(0), &Value::Int(0));
        // Rows from the sorter plus the three read by the scan.
        assert_eq!(ctx.stats().rows_produced(), 4);
        cursor.close_top_level().unwrap();
        assert!(cursor.is_closed());
    }
}
