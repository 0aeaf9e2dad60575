//! Lookahead over the bindings stream for leaf lookup cursors.
//!
//! A [`LookaheadCursor`] keeps a fixed pool of lookup slots. When it is
//! opened for one scope it also reads ahead in its bindings stream and
//! starts lookups for the following scopes of the same depth, one slot per
//! scope, until the pool is empty. Rows are still returned one scope at a
//! time and in bindings order; only the store work is started early.
//!
//! Slots are addressed by [`SlotHandle`], an index into the pool, and move
//! between three owners: the free list, the current scope, and the queue of
//! scopes read ahead. A slot is only ever held by one of them.

use std::collections::VecDeque;
use std::sync::Arc;

use hkeydb_core::Row;
use tracing::{debug, trace};

use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::{QueryBindings, QueryBindingsCursor};
use crate::exec::context::QueryContext;
use crate::exec::cursor::{close_on_interrupt, Cursor, CursorLifecycle, CursorState};

/// Lookup state for one scope.
pub(crate) trait LookupSlot: Send {
    /// Starts the lookups for the input found in `bindings`.
    fn open(&mut self, bindings: &QueryBindings) -> ExecResult<()>;

    /// Returns the next row of the lookup.
    fn next(&mut self) -> ExecResult<Option<Row>>;

    /// Releases store cursors. Called on every slot before it is reused.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotHandle(usize);

/// Fixed set of slots plus a free list of handles.
///
/// Checkouts and releases are reported to the context's
/// [`ExecutionStats::lookup_slots_in_use`](crate::exec::ExecutionStats::lookup_slots_in_use).
pub(crate) struct SlotPool<S> {
    slots: Vec<S>,
    free: Vec<SlotHandle>,
    ctx: Arc<QueryContext>,
}

impl<S: LookupSlot> SlotPool<S> {
    pub(crate) fn new(slots: Vec<S>, ctx: Arc<QueryContext>) -> Self {
        let free = (0..slots.len()).rev().map(SlotHandle).collect();
        Self { slots, free, ctx }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    pub(crate) fn checkout(&mut self) -> Option<SlotHandle> {
        let handle = self.free.pop();
        if handle.is_some() {
            self.ctx.record_lookup_slot_taken();
        }
        handle
    }

    pub(crate) fn get_mut(&mut self, handle: SlotHandle) -> &mut S {
        &mut self.slots[handle.0]
    }

    pub(crate) fn release(&mut self, handle: SlotHandle) {
        debug_assert!(!self.free.contains(&handle), "slot {handle:?} released twice");
        self.slots[handle.0].close();
        self.free.push(handle);
        self.ctx.record_lookup_slot_returned();
    }
}

/// Leaf cursor running a [`LookupSlot`] per scope, with lookahead.
///
/// A pool of one slot performs no lookahead; the cursor then behaves as a
/// plain leaf cursor that opens one lookup per scope.
pub(crate) struct LookaheadCursor<S> {
    lifecycle: CursorLifecycle,
    bindings: Box<dyn QueryBindingsCursor>,
    pool: SlotPool<S>,
    current_bindings: Option<QueryBindings>,
    /// Slot serving `current_bindings`, kept across close for a reopen.
    current: Option<SlotHandle>,
    /// Slot already opened for `current_bindings` while it was pending.
    prefetched: Option<SlotHandle>,
    /// Scopes read ahead, with their slot when one was started.
    pending: VecDeque<(QueryBindings, Option<SlotHandle>)>,
    bindings_exhausted: bool,
}

impl<S: LookupSlot> LookaheadCursor<S> {
    pub(crate) fn new(
        operator: &'static str,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
        slots: Vec<S>,
    ) -> Self {
        Self {
            lifecycle: CursorLifecycle::new(operator, ctx),
            bindings,
            pool: SlotPool::new(slots, Arc::clone(ctx)),
            current_bindings: None,
            current: None,
            prefetched: None,
            pending: VecDeque::new(),
            bindings_exhausted: false,
        }
    }

    fn open_slot(&mut self, bindings: &QueryBindings, lookahead: bool) -> ExecResult<SlotHandle> {
        let handle = match self.pool.checkout() {
            Some(handle) => handle,
            None => self.reclaim()?,
        };
        trace!(
            operator = self.lifecycle.operator(),
            lookahead,
            depth = bindings.depth(),
            "opening lookup slot"
        );
        if let Err(err) = self.pool.get_mut(handle).open(bindings) {
            self.pool.release(handle);
            return Err(err);
        }
        Ok(handle)
    }

    /// Takes back the slot of the latest scope read ahead. That scope is
    /// looked up again when it becomes current.
    fn reclaim(&mut self) -> ExecResult<SlotHandle> {
        let entry = self.pending.iter_mut().rev().find_map(|(_, slot)| slot.take());
        let Some(handle) = entry else {
            return Err(ExecError::invalid("lookahead_quantum", "lookup slot pool is empty"));
        };
        self.pool.release(handle);
        self.pool.checkout().ok_or_else(|| ExecError::invalid("lookahead_quantum", "lookup slot pool is empty"))
    }

    fn reset_active(&mut self) {
        if let Some(handle) = self.current.take() {
            self.pool.release(handle);
        }
        if let Some(handle) = self.prefetched.take() {
            self.pool.release(handle);
        }
    }

    fn clear_pending(&mut self) {
        while let Some((_, slot)) = self.pending.pop_front() {
            if let Some(handle) = slot {
                self.pool.release(handle);
            }
        }
    }

    fn read_ahead(&mut self, depth: u32) -> ExecResult<()> {
        while self.pool.has_free() && !self.bindings_exhausted {
            let Some(bindings) = self.bindings.next_bindings()? else {
                self.bindings_exhausted = true;
                break;
            };
            let slot = if bindings.depth() == depth { Some(self.open_slot(&bindings, true)?) } else { None };
            self.pending.push_back((bindings, slot));
        }
        Ok(())
    }

    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let row = match self.current {
            Some(handle) => self.pool.get_mut(handle).next()?,
            None => None,
        };
        if row.is_some() {
            self.lifecycle.ctx().record_rows_read(1);
        }
        Ok(self.lifecycle.emit(row))
    }
}

impl<S: LookupSlot> Cursor for LookaheadCursor<S> {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        let bindings = self
            .current_bindings
            .clone()
            .ok_or(ExecError::NoBindings(self.lifecycle.operator()))?;
        if let Some(handle) = self.current {
            self.pool.get_mut(handle).open(&bindings)?;
        } else if let Some(handle) = self.prefetched.take() {
            self.current = Some(handle);
        } else {
            self.current = Some(self.open_slot(&bindings, false)?);
        }
        if self.pool.capacity() > 1 {
            self.read_ahead(bindings.depth())?;
        }
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        if self.lifecycle.close() {
            if let Some(handle) = self.current {
                self.pool.get_mut(handle).close();
            }
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

impl<S: LookupSlot> QueryBindingsCursor for LookaheadCursor<S> {
    fn open_bindings(&mut self) -> ExecResult<()> {
        self.reset_active();
        self.clear_pending();
        self.current_bindings = None;
        self.bindings_exhausted = false;
        self.bindings.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>> {
        self.reset_active();
        if let Some((bindings, slot)) = self.pending.pop_front() {
            self.current_bindings = Some(bindings.clone());
            self.prefetched = slot;
            return Ok(Some(bindings));
        }
        self.current_bindings = self.bindings.next_bindings()?;
        if self.current_bindings.is_none() {
            self.bindings_exhausted = true;
        }
        Ok(self.current_bindings.clone())
    }

    fn close_bindings(&mut self) -> ExecResult<()> {
        self.reset_active();
        self.clear_pending();
        self.bindings.close_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
        if self.current_bindings.as_ref().is_some_and(|current| current.descends_from(bindings)) {
            self.reset_active();
            self.current_bindings = None;
        }
        let mut recycled = 0usize;
        while self.pending.front().is_some_and(|(pending, _)| pending.descends_from(bindings)) {
            if let Some((_, Some(handle))) = self.pending.pop_front() {
                self.pool.release(handle);
                recycled += 1;
            }
        }
        if recycled > 0 {
            debug!(
                operator = self.lifecycle.operator(),
                recycled,
                depth = bindings.depth(),
                "recycled lookahead slots of cancelled scope"
            );
        }
        self.bindings.cancel_bindings(bindings)
    }
}
