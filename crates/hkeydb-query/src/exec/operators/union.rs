//! Union_Ordered.

use std::sync::Arc;

use hkeydb_core::{Row, RowType, Value};

use crate::error::ExecResult;
use crate::exec::bindings::QueryBindingsCursor;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, ColumnSelector, Cursor, CursorLifecycle,
    CursorState, MultiChainedInputs,
};
use crate::exec::operator::{Operator, OperatorRef};
use crate::exec::operators::merge::{check_same_shape, MergeComparator};

/// Merges two streams ordered on the same key into one ordered stream
/// holding each key once.
///
/// When both sides hold a key the left row is returned. With
/// `output_equal`, left rows equal to the current right row are all
/// returned, so duplicates on the left survive.
#[derive(Debug)]
pub struct UnionOrdered {
    left: OperatorRef,
    right: OperatorRef,
    left_type: Arc<RowType>,
    right_type: Arc<RowType>,
    comparator: MergeComparator,
    output_equal: bool,
}

impl UnionOrdered {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        left: OperatorRef,
        right: OperatorRef,
        left_type: &Arc<RowType>,
        right_type: &Arc<RowType>,
        left_ordering_fields: usize,
        right_ordering_fields: usize,
        ascending: &[bool],
        output_equal: bool,
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
        Ok(Self {
            left,
            right,
            left_type: Arc::clone(left_type),
            right_type: Arc::clone(right_type),
            comparator,
            output_equal,
        })
    }
}

impl Operator for UnionOrdered {
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
            left_skip_fixed: None,
            right_skip_fixed: None,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Union_Ordered"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(Arc::clone(&self.left_type))
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.left), Arc::clone(&self.right)]
    }
}

struct Execution {
    plan: Arc<UnionOrdered>,
    lifecycle: CursorLifecycle,
    inputs: MultiChainedInputs,
    left_row: Option<Row>,
    right_row: Option<Row>,
    left_skip_fixed: Option<Vec<Value>>,
    right_skip_fixed: Option<Vec<Value>>,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let next = match (self.left_row.take(), self.right_row.take()) {
            (None, None) => None,
            (Some(left), None) => {
                self.left_row = self.inputs.left.next()?;
                Some(left)
            }
            (None, Some(right)) => {
                self.right_row = self.inputs.right.next()?;
                Some(right)
            }
            (Some(left), Some(right)) => {
                let c = self.plan.comparator.compare(&left, &right);
                if c < 0 {
                    self.right_row = Some(right);
                    self.left_row = self.inputs.left.next()?;
                    Some(left)
                } else if c > 0 {
                    self.left_row = Some(left);
                    self.right_row = self.inputs.right.next()?;
                    Some(right)
                } else {
                    self.left_row = self.inputs.left.next()?;
                    if self.plan.output_equal {
                        self.right_row = Some(right);
                    } else {
                        self.right_row = self.inputs.right.next()?;
                    }
                    Some(left)
                }
            }
        };
        if next.is_none() {
            self.inputs.close()?;
        }
        Ok(self.lifecycle.emit(next))
    }

    fn skip_left(&mut self, row: &Row, selector: ColumnSelector) -> ExecResult<()> {
        let comparator = &self.plan.comparator;
        let Some(left) = &self.left_row else {
            return Ok(());
        };
        if comparator.compare_at(left, comparator.left_fixed, row, comparator.left_fixed) >= 0 {
            return Ok(());
        }
        let fixed = self
            .left_skip_fixed
            .get_or_insert_with(|| left.values()[..comparator.left_fixed].to_vec());
        let skip = comparator.skip_row(&self.plan.left_type, fixed, row, comparator.left_fixed);
        self.inputs.left.jump(&skip, selector)?;
        self.left_row = self.inputs.left.next()?;
        Ok(())
    }

    fn skip_right(&mut self, row: &Row, selector: ColumnSelector) -> ExecResult<()> {
        let comparator = &self.plan.comparator;
        let Some(right) = &self.right_row else {
            return Ok(());
        };
        if comparator.compare_at(right, comparator.right_fixed, row, comparator.left_fixed) >= 0 {
            return Ok(());
        }
        let fixed = self
            .right_skip_fixed
            .get_or_insert_with(|| right.values()[..comparator.right_fixed].to_vec());
        let skip = comparator.skip_row(&self.plan.right_type, fixed, row, comparator.left_fixed);
        self.inputs.right.jump(&skip, selector)?;
        self.right_row = self.inputs.right.next()?;
        Ok(())
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        self.left_skip_fixed = None;
        self.right_skip_fixed = None;
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

    /// Skips whichever sides are behind `row`, a row of the output type.
    fn jump(&mut self, row: &Row, selector: ColumnSelector) -> ExecResult<()> {
        self.lifecycle.check_open()?;
        self.skip_left(row, selector)?;
        self.skip_right(row, selector)?;
        self.lifecycle.set_active();
        Ok(())
    }

    fn close(&mut self) -> ExecResult<()> {
        self.lifecycle.close();
        self.left_row = None;
        self.right_row = None;
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
