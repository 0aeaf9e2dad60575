//! Intersect_Ordered: merge intersection of two ordered streams.

use std::sync::Arc;

use hkeydb_core::{Row, RowType, Value};

use crate::api::{IntersectOption, JoinType};
use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::QueryBindingsCursor;
use crate::exec::collation::CollatorRef;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, ColumnSelector, Cursor, CursorLifecycle,
    CursorState, MultiChainedInputs,
};
use crate::exec::operator::{Operator, OperatorRef};
use crate::exec::operators::merge::{check_same_shape, MergeComparator};

/// Emits the rows of one side whose compared fields match a row of the
/// other side.
///
/// Exactly one of [`IntersectOption::OutputLeft`] and
/// [`IntersectOption::OutputRight`] picks the emitted side. A left join
/// (with `OutputLeft`) also emits unmatched left rows, a right join (with
/// `OutputRight`) unmatched right rows.
///
/// With skip scan, the default, a side that falls behind jumps its cursor
/// to the other side's key instead of reading row by row; its inputs must
/// then support [`Cursor::jump`]. With `output_equal`, a match consumes
/// only the emitted side, so every duplicate on that side finds the match.
#[derive(Debug)]
pub struct IntersectOrdered {
    left: OperatorRef,
    right: OperatorRef,
    left_type: Arc<RowType>,
    right_type: Arc<RowType>,
    comparator: MergeComparator,
    keep_unmatched_left: bool,
    keep_unmatched_right: bool,
    output_left: bool,
    skip_scan: bool,
    output_equal: bool,
}

impl IntersectOrdered {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
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
    ) -> ExecResult<Self> {
        let comparator = MergeComparator::new(
            left_type,
            right_type,
            left_ordering_fields,
            right_ordering_fields,
            ascending,
            collators,
        )?;
        if join_type == JoinType::Full {
            return Err(ExecError::invalid("join_type", "full join is not supported"));
        }
        if !output_equal {
            check_same_shape(left_type, right_type, left_ordering_fields, right_ordering_fields)?;
        }
        let sequential_scan = options.contains(&IntersectOption::SequentialScan);
        let skip_scan = options.contains(&IntersectOption::SkipScan);
        if skip_scan && sequential_scan {
            return Err(ExecError::invalid("options", "skip scan and sequential scan are exclusive"));
        }
        let output_left = options.contains(&IntersectOption::OutputLeft);
        let output_right = options.contains(&IntersectOption::OutputRight);
        if output_left == output_right {
            return Err(ExecError::invalid("options", "exactly one of OutputLeft and OutputRight is required"));
        }
        let consistent = match join_type {
            JoinType::Inner => true,
            JoinType::Left => output_left,
            JoinType::Right => output_right,
            JoinType::Full => false,
        };
        if !consistent {
            return Err(ExecError::invalid("join_type", "outer join must keep the output side"));
        }
        Ok(Self {
            left,
            right,
            left_type: Arc::clone(left_type),
            right_type: Arc::clone(right_type),
            comparator,
            keep_unmatched_left: join_type == JoinType::Left,
            keep_unmatched_right: join_type == JoinType::Right,
            output_left,
            skip_scan: !sequential_scan,
            output_equal,
        })
    }

    fn left_skip_selector(&self) -> ColumnSelector {
        ColumnSelector::Prefix(self.comparator.left_fixed + self.comparator.fields())
    }

    fn right_skip_selector(&self) -> ColumnSelector {
        ColumnSelector::Prefix(self.comparator.right_fixed + self.comparator.fields())
    }
}

impl Operator for IntersectOrdered {
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
            done: true,
            left_skip_fixed: None,
            right_skip_fixed: None,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Intersect_Ordered"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(Arc::clone(if self.output_left { &self.left_type } else { &self.right_type }))
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.left), Arc::clone(&self.right)]
    }
}

struct Execution {
    plan: Arc<IntersectOrdered>,
    lifecycle: CursorLifecycle,
    inputs: MultiChainedInputs,
    left_row: Option<Row>,
    right_row: Option<Row>,
    done: bool,
    /// Fixed fields of skip rows, taken from the first row of the scope.
    left_skip_fixed: Option<Vec<Value>>,
    right_skip_fixed: Option<Vec<Value>>,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let plan = Arc::clone(&self.plan);
        let mut next = None;
        while !self.done && next.is_none() {
            match self.compare_rows() {
                c if c < 0 => {
                    if plan.keep_unmatched_left {
                        next = self.left_row.take();
                        self.next_left_row()?;
                    } else if let (true, Some(right)) = (plan.skip_scan, self.right_row.clone()) {
                        self.next_left_row_skip(&right, plan.comparator.right_fixed, plan.left_skip_selector())?;
                    } else {
                        self.next_left_row()?;
                    }
                }
                c if c > 0 => {
                    if plan.keep_unmatched_right {
                        next = self.right_row.take();
                        self.next_right_row()?;
                    } else if let (true, Some(left)) = (plan.skip_scan, self.left_row.clone()) {
                        self.next_right_row_skip(&left, plan.comparator.left_fixed, plan.right_skip_selector())?;
                    } else {
                        self.next_right_row()?;
                    }
                }
                _ => {
                    if plan.output_left {
                        next = self.left_row.take();
                        if !plan.output_equal {
                            self.next_right_row()?;
                        }
                        self.next_left_row()?;
                    } else {
                        next = self.right_row.take();
                        if !plan.output_equal {
                            self.next_left_row()?;
                        }
                        self.next_right_row()?;
                    }
                }
            }
            let left_empty = self.left_row.is_none();
            let right_empty = self.right_row.is_none();
            if (left_empty && right_empty)
                || (left_empty && !plan.keep_unmatched_right)
                || (right_empty && !plan.keep_unmatched_left)
            {
                self.finish()?;
            }
        }
        Ok(self.lifecycle.emit(next))
    }

    fn compare_rows(&self) -> i32 {
        match (&self.left_row, &self.right_row) {
            (Some(left), Some(right)) => self.plan.comparator.compare(left, right),
            (None, _) => 1,
            (Some(_), None) => -1,
        }
    }

    fn next_left_row(&mut self) -> ExecResult<()> {
        self.left_row = self.inputs.left.next()?;
        Ok(())
    }

    fn next_right_row(&mut self) -> ExecResult<()> {
        self.right_row = self.inputs.right.next()?;
        Ok(())
    }

    fn next_left_row_skip(
        &mut self,
        jump_row: &Row,
        jump_fixed: usize,
        selector: ColumnSelector,
    ) -> ExecResult<()> {
        let Some(left) = &self.left_row else {
            return Ok(());
        };
        let comparator = &self.plan.comparator;
        // Only a side that is behind `jump_row` moves.
        if comparator.compare_at(left, comparator.left_fixed, jump_row, jump_fixed) >= 0 {
            return Ok(());
        }
        let fixed = self
            .left_skip_fixed
            .get_or_insert_with(|| left.values()[..comparator.left_fixed].to_vec());
        let skip = comparator.skip_row(&self.plan.left_type, fixed, jump_row, jump_fixed);
        self.inputs.left.jump(&skip, selector)?;
        self.next_left_row()
    }

    fn next_right_row_skip(
        &mut self,
        jump_row: &Row,
        jump_fixed: usize,
        selector: ColumnSelector,
    ) -> ExecResult<()> {
        let Some(right) = &self.right_row else {
            return Ok(());
        };
        let comparator = &self.plan.comparator;
        if comparator.compare_at(right, comparator.right_fixed, jump_row, jump_fixed) >= 0 {
            return Ok(());
        }
        let fixed = self
            .right_skip_fixed
            .get_or_insert_with(|| right.values()[..comparator.right_fixed].to_vec());
        let skip = comparator.skip_row(&self.plan.right_type, fixed, jump_row, jump_fixed);
        self.inputs.right.jump(&skip, selector)?;
        self.next_right_row()
    }

    /// Ends the current scope: both inputs are closed and `next` returns
    /// `None` until the cursor is reopened.
    fn finish(&mut self) -> ExecResult<()> {
        self.done = true;
        self.left_row = None;
        self.right_row = None;
        self.inputs.close()
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        self.left_skip_fixed = None;
        self.right_skip_fixed = None;
        self.inputs.left.open()?;
        self.inputs.right.open()?;
        self.next_left_row()?;
        self.next_right_row()?;
        self.done = self.left_row.is_none() && self.right_row.is_none();
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn jump(&mut self, row: &Row, selector: ColumnSelector) -> ExecResult<()> {
        self.lifecycle.check_open()?;
        let plan = Arc::clone(&self.plan);
        let jump_fixed = if plan.output_left { plan.comparator.left_fixed } else { plan.comparator.right_fixed };
        self.next_left_row_skip(row, jump_fixed, selector)?;
        self.next_right_row_skip(row, jump_fixed, selector)?;
        if self.left_row.is_none() || self.right_row.is_none() {
            self.finish()?;
        }
        self.lifecycle.set_active();
        Ok(())
    }

    fn close(&mut self) -> ExecResult<()> {
        self.lifecycle.close();
        self.done = true;
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
