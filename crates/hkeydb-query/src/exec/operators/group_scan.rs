//! Full scan of a group in hkey order.

use std::sync::Arc;

use hkeydb_core::{Group, Row};

use crate::error::ExecResult;
use crate::exec::bindings::QueryBindingsCursor;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, Cursor, CursorLifecycle, CursorState,
    LeafBindings,
};
use crate::exec::operator::Operator;
use crate::exec::store::GroupCursor;

/// Returns every row of a group, in hkey order, through the store adapter.
#[derive(Debug)]
pub struct GroupScanDefault {
    group: Arc<Group>,
}

impl GroupScanDefault {
    pub(crate) fn new(group: Arc<Group>) -> Self {
        Self { group }
    }
}

impl Operator for GroupScanDefault {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            bindings: LeafBindings::new(bindings),
            group_cursor: ctx.store().new_group_cursor(&self.group),
        })
    }

    fn name(&self) -> &'static str {
        "GroupScan_Default"
    }
}

struct Execution {
    lifecycle: CursorLifecycle,
    bindings: LeafBindings,
    group_cursor: Box<dyn GroupCursor>,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let row = self.group_cursor.next()?;
        if row.is_some() {
            self.lifecycle.ctx().record_rows_read(1);
        }
        Ok(self.lifecycle.emit(row))
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        self.group_cursor.open()?;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        if self.lifecycle.close() {
            self.group_cursor.close();
        }
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
