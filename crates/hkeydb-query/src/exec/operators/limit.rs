//! Limit operator.

use std::sync::Arc;

use hkeydb_core::{Row, RowType};

use crate::error::ExecResult;
use crate::exec::bindings::QueryBindingsCursor;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, ChainedInput, Cursor, CursorLifecycle,
    CursorState,
};
use crate::exec::operator::{Operator, OperatorRef};

/// Returns at most `limit` rows of its input per bindings scope.
///
/// Once the limit is reached the input is closed without being read
/// further.
#[derive(Debug)]
pub struct LimitDefault {
    input: OperatorRef,
    limit: usize,
}

impl LimitDefault {
    pub(crate) fn new(input: OperatorRef, limit: usize) -> Self {
        Self { input, limit }
    }
}

impl Operator for LimitDefault {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            input: ChainedInput::of(&self.input, ctx, bindings),
            returned: 0,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Limit_Default"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.input.row_type()
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.input)]
    }
}

struct Execution {
    plan: Arc<LimitDefault>,
    lifecycle: CursorLifecycle,
    input: ChainedInput,
    returned: usize,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let row = if self.returned < self.plan.limit { self.input.get_mut().next()? } else { None };
        match row {
            Some(_) => self.returned += 1,
            None => self.input.get_mut().close()?,
        }
        Ok(self.lifecycle.emit(row))
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        self.returned = 0;
        if self.plan.limit > 0 {
            self.input.get_mut().open()?;
        }
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        self.lifecycle.close();
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
