//! Emits the row bound at a bindings slot.

use std::sync::Arc;

use hkeydb_core::{Row, RowType};

use crate::error::ExecResult;
use crate::exec::bindings::QueryBindingsCursor;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, Cursor, CursorLifecycle, CursorState,
    LeafBindings,
};
use crate::exec::operator::Operator;

/// Returns, once per scope, the row bound at `binding_position`.
///
/// When the bound row is a flattened row containing a row of
/// `input_row_type`, that component is returned instead.
#[derive(Debug)]
pub struct EmitBoundRowNested {
    input_row_type: Arc<RowType>,
    binding_position: usize,
}

impl EmitBoundRowNested {
    pub(crate) fn new(input_row_type: Arc<RowType>, binding_position: usize) -> Self {
        Self { input_row_type, binding_position }
    }
}

impl Operator for EmitBoundRowNested {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            bindings: LeafBindings::new(bindings),
            pending: None,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "EmitBoundRow_Nested"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(Arc::clone(&self.input_row_type))
    }
}

struct Execution {
    plan: Arc<EmitBoundRowNested>,
    lifecycle: CursorLifecycle,
    bindings: LeafBindings,
    pending: Option<Row>,
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        let bound = self.bindings.require(self.plan.name())?.get_row(self.plan.binding_position)?;
        self.pending = bound.sub_row(&self.plan.input_row_type).or(Some(bound));
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.lifecycle.begin_next().map(|()| self.pending.take());
        let result = result.map(|row| self.lifecycle.emit(row));
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        self.lifecycle.close();
        self.pending = None;
        Ok(())
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    fn name(&self) -> &'static str {
        self.lifecycle.operator()
    }
}

delegate_bindings!(Execution => bindings);
