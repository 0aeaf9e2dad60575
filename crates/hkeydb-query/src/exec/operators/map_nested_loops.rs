//! Map_NestedLoops: runs the inner operator once per outer row.
//!
//! # Rebind mode
//!
//! Each outer row is written into the outer scope at
//! `input_binding_position` and the inner cursor is reopened on that
//! scope, then drained before the next outer row is read.
//!
//! # Pipelined mode
//!
//! The outer rows are turned into a stream of child scopes, one per row,
//! at bindings depth `depth`. The inner operator runs on that stream
//! directly, so lookahead inside it can start work for later outer rows
//! early. A collapsing cursor on top joins the per-row results back into
//! one stream for the enclosing scope.
//!
//! Both modes return every inner row of the first outer row, then every
//! inner row of the second, and so on.

use std::sync::Arc;

use hkeydb_core::{Row, RowType};
use tracing::trace;

use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::{QueryBindings, QueryBindingsCursor, SingletonQueryBindingsCursor};
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, BoxedCursor, ChainedInput, Cursor, CursorLifecycle, CursorState,
};
use crate::exec::operator::{Operator, OperatorRef};

/// Nested loop over an outer and an inner operator.
#[derive(Debug)]
pub struct MapNestedLoops {
    outer: OperatorRef,
    inner: OperatorRef,
    input_binding_position: usize,
    pipeline: bool,
    depth: u32,
}

impl MapNestedLoops {
    pub(crate) fn new(
        outer: OperatorRef,
        inner: OperatorRef,
        input_binding_position: usize,
        pipeline: bool,
        depth: u32,
    ) -> ExecResult<Self> {
        if pipeline && depth == 0 {
            return Err(ExecError::invalid("depth", "a pipelined loop needs a depth greater than 0"));
        }
        Ok(Self { outer, inner, input_binding_position, pipeline, depth })
    }
}

impl Operator for MapNestedLoops {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        if self.pipeline {
            let rows = RowToBindings::new(
                Arc::clone(&self.outer).cursor(ctx, bindings),
                self.input_binding_position,
                self.depth,
            );
            let inner = Arc::clone(&self.inner).cursor(ctx, Box::new(rows));
            return Box::new(CollapseBindings::new(self.name(), ctx, inner, self.depth, Collapse::Concatenate));
        }
        let inner_bindings = SingletonQueryBindingsCursor::new(None);
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            outer: ChainedInput::of(&self.outer, ctx, bindings),
            inner: Arc::clone(&self.inner).cursor(ctx, Box::new(inner_bindings.clone())),
            inner_bindings,
            outer_row: None,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Map_NestedLoops"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.inner.row_type()
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.outer), Arc::clone(&self.inner)]
    }
}

struct Execution {
    plan: Arc<MapNestedLoops>,
    lifecycle: CursorLifecycle,
    outer: ChainedInput,
    inner: BoxedCursor,
    /// Shared handle to the inner cursor's bindings source.
    inner_bindings: SingletonQueryBindingsCursor,
    /// The outer row the inner cursor is open for.
    outer_row: Option<Row>,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let mut output = None;
        while output.is_none() && self.outer.get().is_active() {
            if self.outer_row.is_some() {
                output = self.inner.next()?;
                if output.is_none() {
                    self.inner.close_top_level()?;
                    self.outer_row = None;
                }
            } else if let Some(row) = self.outer.get_mut().next()? {
                self.start_inner_loop(row)?;
            }
        }
        Ok(self.lifecycle.emit(output))
    }

    fn start_inner_loop(&mut self, row: Row) -> ExecResult<()> {
        if !self.inner.is_closed() {
            self.inner.close_top_level()?;
        }
        let bindings = self.outer.require(self.plan.name())?;
        bindings.set_row(self.plan.input_binding_position, row.clone())?;
        self.inner_bindings.reset(bindings)?;
        self.inner.open_top_level()?;
        self.outer_row = Some(row);
        Ok(())
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        self.outer.get_mut().open()
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        if !self.lifecycle.close() {
            return Ok(());
        }
        self.outer_row = None;
        let inner = if self.inner.is_closed() { Ok(()) } else { self.inner.close_top_level() };
        let outer = self.outer.get_mut().close();
        inner.and(outer)
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    fn name(&self) -> &'static str {
        self.lifecycle.operator()
    }
}

impl QueryBindingsCursor for Execution {
    fn open_bindings(&mut self) -> ExecResult<()> {
        self.outer.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>> {
        self.outer.next_bindings()
    }

    fn close_bindings(&mut self) -> ExecResult<()> {
        self.outer.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
        self.inner.close()?;
        self.outer.cancel_bindings(bindings)
    }
}

/// Decides whether a row read by [`RowToBindings`] gets a scope; the second
/// argument is the scope the row was read in.
pub(crate) type RowAdmission = Box<dyn FnMut(&Row, &QueryBindings) -> ExecResult<bool> + Send>;

/// Turns the rows of a cursor into child scopes.
///
/// Scopes of the input shallower than `depth` pass through; for each one at
/// `depth - 1` the input is opened and every row it returns becomes a new
/// child scope holding the row at `binding_position`. The scope that
/// produced the rows is returned before its children.
pub(crate) struct RowToBindings {
    input: BoxedCursor,
    binding_position: usize,
    depth: u32,
    /// The scope the input is open for.
    base: Option<QueryBindings>,
    admission: Option<RowAdmission>,
}

impl RowToBindings {
    pub(crate) fn new(input: BoxedCursor, binding_position: usize, depth: u32) -> Self {
        Self { input, binding_position, depth, base: None, admission: None }
    }

    /// Only rows accepted by `admission` become scopes.
    pub(crate) fn admitting(mut self, admission: RowAdmission) -> Self {
        self.admission = Some(admission);
        self
    }

    fn next_input_row(&mut self, base: &QueryBindings) -> ExecResult<Option<Row>> {
        while let Some(row) = self.input.next()? {
            let admitted = match self.admission.as_mut() {
                Some(admit) => admit(&row, base)?,
                None => true,
            };
            if admitted {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

impl QueryBindingsCursor for RowToBindings {
    fn open_bindings(&mut self) -> ExecResult<()> {
        self.base = None;
        self.input.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>> {
        if let Some(base) = self.base.clone() {
            if let Some(row) = self.next_input_row(&base)? {
                let bindings = base.create_bindings();
                debug_assert_eq!(bindings.depth(), self.depth);
                bindings.set_row(self.binding_position, row)?;
                return Ok(Some(bindings));
            }
            self.base = None;
            self.input.close()?;
        }
        let bindings = self.input.next_bindings()?;
        if let Some(b) = &bindings {
            if b.depth() + 1 == self.depth {
                self.base = Some(b.clone());
                self.input.open()?;
            }
        }
        trace!(depth = bindings.as_ref().map(QueryBindings::depth), "outer rows reached next scope");
        Ok(bindings)
    }

    fn close_bindings(&mut self) -> ExecResult<()> {
        if self.base.take().is_some() {
            self.input.close()?;
        }
        self.input.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
        if self.base.as_ref().is_some_and(|base| base.descends_from(bindings)) {
            self.base = None;
            self.input.close()?;
            self.input.cancel_bindings(bindings)?;
        }
        Ok(())
    }
}

/// What [`CollapseBindings`] returns for each child scope.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Collapse {
    /// Every row of the input.
    Concatenate,
    /// The row bound at this position, if the input returns any row.
    Recover(usize),
}

/// Joins the per-row scopes at `depth` back into their enclosing scope.
///
/// Opened on a scope shallower than `depth`, it opens its input once for
/// every child scope that follows and returns their rows in turn. The first
/// shallower scope it meets ends the current one and is handed out by the
/// next `next_bindings`.
pub(crate) struct CollapseBindings {
    lifecycle: CursorLifecycle,
    input: BoxedCursor,
    depth: u32,
    mode: Collapse,
    current_bindings: Option<QueryBindings>,
    /// A shallower scope read while collapsing, not yet handed out.
    pending_bindings: Option<QueryBindings>,
    /// The scope this cursor is open for, until it is finished.
    open_bindings: Option<QueryBindings>,
    /// The child scope the input is open for.
    input_open_bindings: Option<QueryBindings>,
}

impl CollapseBindings {
    pub(crate) fn new(
        operator: &'static str,
        ctx: &Arc<QueryContext>,
        input: BoxedCursor,
        depth: u32,
        mode: Collapse,
    ) -> Self {
        Self {
            lifecycle: CursorLifecycle::new(operator, ctx),
            input,
            depth,
            mode,
            current_bindings: None,
            pending_bindings: None,
            open_bindings: None,
            input_open_bindings: None,
        }
    }

    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let mut row = None;
        loop {
            if self.input_open_bindings.is_some() {
                row = self.input.next()?;
                if row.is_some() {
                    break;
                }
                self.input.close()?;
                self.input_open_bindings = None;
            }
            match self.input.next_bindings()? {
                None => {
                    self.open_bindings = None;
                    break;
                }
                Some(bindings) if bindings.depth() == self.depth => {
                    self.input.open()?;
                    self.input_open_bindings = Some(bindings.clone());
                    if let Collapse::Recover(position) = self.mode {
                        let matched = self.input.next()?.is_some();
                        self.input.close()?;
                        self.input_open_bindings = None;
                        if matched {
                            row = Some(bindings.get_row(position)?);
                            break;
                        }
                        self.lifecycle.ctx().record_rows_filtered(1);
                    }
                }
                Some(bindings) => {
                    debug_assert!(bindings.depth() < self.depth, "bindings deeper than the loop");
                    self.pending_bindings = Some(bindings);
                    self.open_bindings = None;
                    break;
                }
            }
        }
        Ok(self.lifecycle.emit(row))
    }
}

impl Cursor for CollapseBindings {
    /// # Errors
    ///
    /// [`ExecError::WrongBindingsDepth`] unless the current scope sits
    /// directly above the child scopes, at `depth - 1`. Opened anywhere
    /// else the input would never be expanded into child scopes.
    fn open(&mut self) -> ExecResult<()> {
        if let Some(bindings) = &self.current_bindings {
            if bindings.depth() + 1 != self.depth {
                return Err(ExecError::WrongBindingsDepth {
                    operator: self.lifecycle.operator(),
                    depth: self.depth,
                    actual: bindings.depth(),
                });
            }
        }
        self.lifecycle.open()?;
        self.open_bindings = self.current_bindings.clone();
        self.input_open_bindings = None;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        if !self.input.is_closed() {
            self.input.close()?;
        }
        if !self.lifecycle.close() {
            return Ok(());
        }
        // Child scopes of an unfinished scope are abandoned.
        if let Some(open) = self.open_bindings.take() {
            self.cancel_bindings(&open)?;
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

impl QueryBindingsCursor for CollapseBindings {
    fn open_bindings(&mut self) -> ExecResult<()> {
        self.pending_bindings = None;
        self.current_bindings = None;
        self.input.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>> {
        if let Some(pending) = self.pending_bindings.take() {
            self.current_bindings = Some(pending);
            return Ok(self.current_bindings.clone());
        }
        // Child scopes of a scope that was never opened are skipped.
        loop {
            self.current_bindings = self.input.next_bindings()?;
            match &self.current_bindings {
                Some(bindings) if bindings.depth() >= self.depth => {}
                _ => return Ok(self.current_bindings.clone()),
            }
        }
    }

    fn close_bindings(&mut self) -> ExecResult<()> {
        self.input.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
        self.input.cancel_bindings(bindings)?;
        for slot in [&mut self.input_open_bindings, &mut self.open_bindings, &mut self.pending_bindings] {
            if slot.as_ref().is_some_and(|b| b.descends_from(bindings)) {
                *slot = None;
            }
        }
        Ok(())
    }
}
