//! Row type filter.

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

/// Passes through rows whose type is one of the kept types and drops the
/// rest.
#[derive(Debug)]
pub struct FilterDefault {
    input: OperatorRef,
    keep_types: Vec<Arc<RowType>>,
}

impl FilterDefault {
    pub(crate) fn new(input: OperatorRef, keep_types: Vec<Arc<RowType>>) -> Self {
        Self { input, keep_types }
    }

    fn keeps(&self, row: &Row) -> bool {
        self.keep_types.iter().any(|t| **t == **row.row_type())
    }
}

impl Operator for FilterDefault {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            input: ChainedInput::of(&self.input, ctx, bindings),
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Filter_Default"
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.input)]
    }
}

struct Execution {
    plan: Arc<FilterDefault>,
    lifecycle: CursorLifecycle,
    input: ChainedInput,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let mut filtered = 0;
        let row = loop {
            match self.input.get_mut().next()? {
                Some(row) if self.plan.keeps(&row) => break Some(row),
                Some(_) => filtered += 1,
                None => {
                    self.input.get_mut().close()?;
                    break None;
                }
            }
        };
        self.lifecycle.ctx().record_rows_filtered(filtered);
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
