//! The cursor protocol.
//!
//! A [`Cursor`] is the per-execution state of an operator. It is driven
//! through two independent channels:
//!
//! - the row channel: [`open`](Cursor::open), [`next`](Cursor::next),
//!   [`jump`](Cursor::jump) and [`close`](Cursor::close);
//! - the bindings channel inherited from [`QueryBindingsCursor`], which
//!   selects the scope that subsequent `open` calls apply to.
//!
//! # States
//!
//! ```text
//!            open                next -> None
//!  Closed ─────────▶ Active ──────────────────▶ Idle
//!    ▲                 │ ▲ next -> Some(row)      │
//!    │                 └─┘                        │
//!    └──────────────── close ◀────────────────────┘
//! ```
//!
//! `open` requires `Closed`, `next` requires `Active`, and `close` is
//! idempotent. [`CursorLifecycle`] enforces these rules for every cursor in
//! this crate and raises [`ExecError::WrongCursorState`] on violation.
//!
//! # Interruption
//!
//! Every `next` checks the query context for cancellation and timeout
//! before doing any work. A cursor that sees an interruption closes itself,
//! and with it its inputs, before returning the error; see
//! [`close_on_interrupt`].

use std::sync::Arc;

use hkeydb_core::Row;
use tracing::warn;

use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::{MultipleQueryBindingsCursor, QueryBindings, QueryBindingsCursor};
use crate::exec::context::QueryContext;
use crate::exec::operator::Operator;

/// The state of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Not open; the initial state and the state after `close`.
    Closed,
    /// Open and able to produce rows.
    Active,
    /// Open, but `next` has returned `None`.
    Idle,
}

impl CursorState {
    /// Returns true if the cursor is closed.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true if the cursor is active.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true if the cursor is idle.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Selects the columns of a row that take part in a [`jump`](Cursor::jump).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSelector {
    /// Every column.
    All,
    /// The first `n` columns.
    Prefix(usize),
}

impl ColumnSelector {
    /// Whether `column` is selected.
    #[must_use]
    pub const fn includes(self, column: usize) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(n) => column < n,
        }
    }

    /// Number of leading selected columns of a row with `nfields` fields.
    #[must_use]
    pub fn selected_prefix(self, nfields: usize) -> usize {
        match self {
            Self::All => nfields,
            Self::Prefix(n) => n.min(nfields),
        }
    }
}

/// A stateful, reusable pull iterator over rows.
///
/// # Thread Safety
///
/// Cursors are `Send` so an execution can move between threads, but a
/// cursor is only ever driven by one caller at a time.
pub trait Cursor: QueryBindingsCursor {
    /// Starts iteration in the current bindings scope.
    ///
    /// # Errors
    ///
    /// Fails with [`ExecError::WrongCursorState`] unless the cursor is
    /// closed, or with any error raised while opening inputs.
    fn open(&mut self) -> ExecResult<()>;

    /// Returns the next row, or `None` when the cursor is exhausted.
    ///
    /// # Errors
    ///
    /// Fails with [`ExecError::WrongCursorState`] unless the cursor is
    /// active, with an interruption error, or with an input error.
    fn next(&mut self) -> ExecResult<Option<Row>>;

    /// Repositions the cursor so the next row is the first one at or after
    /// `row`, comparing the columns chosen by `selector`.
    ///
    /// # Errors
    ///
    /// Cursors that cannot reposition return [`ExecError::JumpNotSupported`].
    fn jump(&mut self, row: &Row, selector: ColumnSelector) -> ExecResult<()> {
        let _ = (row, selector);
        Err(ExecError::JumpNotSupported(self.name()))
    }

    /// Stops iteration and closes inputs. Calling it again has no effect.
    ///
    /// # Errors
    ///
    /// Propagates errors from closing inputs.
    fn close(&mut self) -> ExecResult<()>;

    /// The current state.
    fn state(&self) -> CursorState;

    /// Name of the operator that created the cursor.
    fn name(&self) -> &'static str;

    /// Returns true if the cursor is idle.
    fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    /// Returns true if the cursor is active.
    fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Returns true if the cursor is closed.
    fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Opens the bindings stream, reads its first scope and opens the cursor.
    ///
    /// # Errors
    ///
    /// Propagates errors from the bindings stream and from `open`.
    fn open_top_level(&mut self) -> ExecResult<()> {
        self.open_bindings()?;
        self.next_bindings()?;
        self.open()
    }

    /// Closes the cursor and its bindings stream.
    ///
    /// # Errors
    ///
    /// Propagates errors from `close` and from the bindings stream.
    fn close_top_level(&mut self) -> ExecResult<()> {
        self.close()?;
        self.close_bindings()
    }
}

/// A boxed cursor for dynamic dispatch.
pub type BoxedCursor = Box<dyn Cursor>;

/// Closes `cursor` if `result` is an interruption, then returns `result`.
///
/// Errors raised while closing are logged and dropped so the interruption
/// is what the caller sees.
pub fn close_on_interrupt<C, T>(cursor: &mut C, result: ExecResult<T>) -> ExecResult<T>
where
    C: Cursor + ?Sized,
{
    if let Err(err) = &result {
        if err.is_interruption() {
            if let Err(close_err) = cursor.close() {
                warn!(operator = cursor.name(), error = %close_err, "error closing interrupted cursor");
            }
        }
    }
    result
}

/// State machine shared by every cursor: current state, the operator name
/// and the query context.
#[derive(Debug, Clone)]
pub struct CursorLifecycle {
    ctx: Arc<QueryContext>,
    operator: &'static str,
    state: CursorState,
}

impl CursorLifecycle {
    /// Creates a closed lifecycle.
    #[must_use]
    pub fn new(operator: &'static str, ctx: &Arc<QueryContext>) -> Self {
        Self { ctx: Arc::clone(ctx), operator, state: CursorState::Closed }
    }

    /// The query context.
    #[must_use]
    pub fn ctx(&self) -> &Arc<QueryContext> {
        &self.ctx
    }

    /// The operator name.
    #[must_use]
    pub const fn operator(&self) -> &'static str {
        self.operator
    }

    /// The current state.
    #[must_use]
    pub const fn state(&self) -> CursorState {
        self.state
    }

    fn expect(&self, expected: CursorState, ok: bool) -> ExecResult<()> {
        if ok || !self.ctx.config().check_cursor_lifecycle {
            Ok(())
        } else {
            Err(ExecError::WrongCursorState { operator: self.operator, expected, actual: self.state })
        }
    }

    /// Fails unless closed.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::WrongCursorState`].
    pub fn check_closed(&self) -> ExecResult<()> {
        self.expect(CursorState::Closed, self.state.is_closed())
    }

    /// Fails unless active.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::WrongCursorState`].
    pub fn check_active(&self) -> ExecResult<()> {
        self.expect(CursorState::Active, self.state.is_active())
    }

    /// Fails if closed.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::WrongCursorState`].
    pub fn check_open(&self) -> ExecResult<()> {
        self.expect(CursorState::Active, !self.state.is_closed())
    }

    /// Transition for `open`: checks the cursor is closed and makes it active.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::WrongCursorState`].
    pub fn open(&mut self) -> ExecResult<()> {
        self.check_closed()?;
        self.state = CursorState::Active;
        self.ctx.observer().cursor_opened(self.operator);
        Ok(())
    }

    /// Entry check for `next`: the cursor must be active and the query not
    /// interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::WrongCursorState`] or an interruption error.
    pub fn begin_next(&self) -> ExecResult<()> {
        self.check_active()?;
        self.ctx.check_interrupted()
    }

    /// Records the outcome of `next`: a row is reported to the observer,
    /// exhaustion makes the cursor idle.
    pub fn emit(&mut self, row: Option<Row>) -> Option<Row> {
        match &row {
            Some(_) => {
                self.ctx.observer().row_emitted(self.operator);
                self.ctx.record_rows_produced(1);
            }
            None => self.state = CursorState::Idle,
        }
        row
    }

    /// Makes an open cursor active again, e.g. after a jump.
    pub fn set_active(&mut self) {
        if !self.state.is_closed() {
            self.state = CursorState::Active;
        }
    }

    /// Makes an open cursor idle.
    pub fn set_idle(&mut self) {
        if !self.state.is_closed() {
            self.state = CursorState::Idle;
        }
    }

    /// Transition for `close`. Returns `false` if the cursor was already
    /// closed, in which case the caller has nothing to release.
    pub fn close(&mut self) -> bool {
        if self.state.is_closed() {
            return false;
        }
        self.state = CursorState::Closed;
        self.ctx.observer().cursor_closed(self.operator);
        true
    }
}

/// An input plus the bindings scope it most recently returned.
///
/// Leaf cursors wrap their bindings stream in one, chained cursors wrap
/// their input cursor; both then forward the bindings channel to it.
pub struct ScopedInput<C: ?Sized> {
    inner: Box<C>,
    current: Option<QueryBindings>,
}

/// Bindings source of a leaf cursor.
pub type LeafBindings = ScopedInput<dyn QueryBindingsCursor>;

/// Input of a chained cursor.
pub type ChainedInput = ScopedInput<dyn Cursor>;

impl<C: QueryBindingsCursor + ?Sized> ScopedInput<C> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Box<C>) -> Self {
        Self { inner, current: None }
    }

    /// The wrapped input.
    #[must_use]
    pub fn get(&self) -> &C {
        &self.inner
    }

    /// The wrapped input.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    /// The scope most recently returned by `next_bindings`.
    #[must_use]
    pub fn current(&self) -> Option<&QueryBindings> {
        self.current.as_ref()
    }

    /// The current scope, which an open cursor always has.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::NoBindings`] if no scope has been read.
    pub fn require(&self, operator: &'static str) -> ExecResult<QueryBindings> {
        self.current.clone().ok_or(ExecError::NoBindings(operator))
    }
}

impl ChainedInput {
    /// Creates the input cursor of `operator` and wraps it.
    #[must_use]
    pub fn of(
        operator: &Arc<dyn Operator>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> Self {
        Self::new(Arc::clone(operator).cursor(ctx, bindings))
    }
}

impl<C: QueryBindingsCursor + ?Sized> QueryBindingsCursor for ScopedInput<C> {
    fn open_bindings(&mut self) -> ExecResult<()> {
        self.current = None;
        self.inner.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>> {
        self.current = self.inner.next_bindings()?;
        Ok(self.current.clone())
    }

    fn close_bindings(&mut self) -> ExecResult<()> {
        self.inner.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
        self.inner.cancel_bindings(bindings)
    }
}

/// Inputs of a binary cursor.
///
/// The bindings stream is fanned out so both inputs see exactly the scopes
/// the binary cursor itself sees.
pub struct MultiChainedInputs {
    bindings: MultipleQueryBindingsCursor,
    /// Left input.
    pub left: BoxedCursor,
    /// Right input.
    pub right: BoxedCursor,
    current: Option<QueryBindings>,
}

impl MultiChainedInputs {
    /// Creates cursors for both operators over a shared bindings stream.
    #[must_use]
    pub fn new(
        left: &Arc<dyn Operator>,
        right: &Arc<dyn Operator>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> Self {
        let (owner, left_bindings, right_bindings) = MultipleQueryBindingsCursor::pair(bindings);
        Self {
            left: Arc::clone(left).cursor(ctx, Box::new(left_bindings)),
            right: Arc::clone(right).cursor(ctx, Box::new(right_bindings)),
            bindings: owner,
            current: None,
        }
    }

    /// The current scope.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::NoBindings`] if no scope has been read.
    pub fn require(&self, operator: &'static str) -> ExecResult<QueryBindings> {
        self.current.clone().ok_or(ExecError::NoBindings(operator))
    }

    /// Closes both inputs.
    ///
    /// # Errors
    ///
    /// Propagates the first error; the right input is closed regardless.
    pub fn close(&mut self) -> ExecResult<()> {
        let left = self.left.close();
        let right = self.right.close();
        left.and(right)
    }
}

impl QueryBindingsCursor for MultiChainedInputs {
    fn open_bindings(&mut self) -> ExecResult<()> {
        self.current = None;
        self.bindings.open_bindings()?;
        self.left.open_bindings()?;
        self.right.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>> {
        let bindings = self.bindings.next_bindings()?;
        let left = self.left.next_bindings()?;
        let right = self.right.next_bindings()?;
        debug_assert!(
            same_scope(bindings.as_ref(), left.as_ref()) && same_scope(bindings.as_ref(), right.as_ref()),
            "binary cursor inputs out of step with their bindings"
        );
        self.current = bindings.clone();
        Ok(bindings)
    }

    fn close_bindings(&mut self) -> ExecResult<()> {
        self.bindings.close_bindings()?;
        self.left.close_bindings()?;
        self.right.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
        self.left.cancel_bindings(bindings)?;
        self.right.cancel_bindings(bindings)?;
        self.bindings.cancel_bindings(bindings)
    }
}

fn same_scope(a: Option<&QueryBindings>, b: Option<&QueryBindings>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        (None, None) => true,
        _ => false,
    }
}

/// Implements [`QueryBindingsCursor`] for a cursor by forwarding to one of
/// its fields.
macro_rules! delegate_bindings {
    ($ty:ty => $($field:tt)+) => {
        impl $crate::exec::bindings::QueryBindingsCursor for $ty {
            fn open_bindings(&mut self) -> $crate::error::ExecResult<()> {
                self.$($field)+.open_bindings()
            }

            fn next_bindings(
                &mut self,
            ) -> $crate::error::ExecResult<Option<$crate::exec::bindings::QueryBindings>> {
                self.$($field)+.next_bindings()
            }

            fn close_bindings(&mut self) -> $crate::error::ExecResult<()> {
                self.$($field)+.close_bindings()
            }

            fn cancel_bindings(
                &mut self,
                bindings: &$crate::exec::bindings::QueryBindings,
            ) -> $crate::error::ExecResult<()> {
                self.$($field)+.cancel_bindings(bindings)
            }
        }
    };
}

pub(crate) use delegate_bindings;
