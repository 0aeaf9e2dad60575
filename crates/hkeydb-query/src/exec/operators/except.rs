//! Except_Ordered.

use std::sync::Arc;

use hkeydb_core::{Row, RowType};

use crate::error::ExecResult;
use crate::exec::bindings::QueryBindingsCursor;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, Cursor, CursorLifecycle, CursorState,
    MultiChainedInputs,
};
use crate::exec::operator::{Operator, OperatorRef};
use crate::exec::operators::merge::{check_same_shape, MergeComparator};

/// Returns the left rows not matched by a right row.
///
/// Matching is one to one: each right row removes at most one equal left
/// row. With `remove_duplicates`, a left row equal to the left row before it
/// is dropped, so the output holds each surviving key once and a key present
/// on the right is removed entirely.
#[derive(Debug)]
pub struct ExceptOrdered {
    left: OperatorRef,
    right: OperatorRef,
    left_type: Arc<RowType>,
    comparator: MergeComparator,
    remove_duplicates: bool,
}

impl ExceptOrdered {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        left: OperatorRef,
        right: OperatorRef,
        left_type: &Arc<RowType>,
        right_type: &Arc<RowType>,
        left_ordering_fields: usize,
        right_ordering_fields: usize,
        ascending: &[bool],
        remove_duplicates: bool,
    ) -> ExecResult<Self> {
        check_same_shape(left_type, right_type, left_ordering_fields, right_ordering_fields)?;
        let comparator = MergeComparator::new(
            left_type,
            right_type,
            left_ordering_fields,
            right_ordering_fields,
            ascending,
            None,
        )?;
        Ok(Self { left, right, left_type: Arc::clone(left_type), comparator, remove_duplicates })
    }
}

impl Operator for ExceptOrdered {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            inputs: MultiChainedInputs::new(&self.left, &self.right, ctx, bindings),
            left_row: None,
            right_row: None,
            previous_left: None,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Except_Ordered"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(Arc::clone(&self.left_type))
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.left), Arc::clone(&self.right)]
    }
}

struct Execution {
    plan: Arc<ExceptOrdered>,
    lifecycle: CursorLifecycle,
    inputs: MultiChainedInputs,
    left_row: Option<Row>,
    right_row: Option<Row>,
    previous_left: Option<Row>,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let mut next = None;
        while next.is_none() {
            let Some(left) = self.left_row.take() else {
                self.right_row = None;
                self.inputs.close()?;
                break;
            };
            self.left_row = self.inputs.left.next()?;
            if self.is_duplicate(&left) {
                continue;
            }
            // Right rows before `left` can no longer match anything.
            while let Some(right) = &self.right_row {
                if self.plan.comparator.compare(&left, right) <= 0 {
                    break;
                }
                self.right_row = self.inputs.right.next()?;
            }
            let matched = match &self.right_row {
                Some(right) => self.plan.comparator.compare(&left, right) == 0,
                None => false,
            };
            if matched {
                self.right_row = self.inputs.right.next()?;
            } else {
                next = Some(left.clone());
            }
            if self.plan.remove_duplicates {
                self.previous_left = Some(left);
            }
        }
        Ok(self.lifecycle.emit(next))
    }

    fn is_duplicate(&self, left: &Row) -> bool {
        let comparator = &self.plan.comparator;
        self.previous_left
            .as_ref()
            .is_some_and(|previous| comparator.compare_at(previous, comparator.left_fixed, left, comparator.left_fixed) == 0)
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        self.previous_left = None;
        self.inputs.left.open()?;
        self.inputs.right.open()?;
        self.left_row = self.inputs.left.next()?;
        self.right_row = self.inputs.right.next()?;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        self.lifecycle.close();
        self.left_row = None;
        self.right_row = None;
        self.previous_left = None;
        self.inputs.close()
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    fn name(&self) -> &'static str {
        self.lifecycle.operator()
    }
}

delegate_bindings!(Execution => inputs);
