//! Hash join pieces: Using_HashTable and HashTableLookup_Default.

use std::collections::VecDeque;
use std::sync::Arc;

use hkeydb_core::{Row, RowType, Value};
use tracing::debug;

use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::{QueryBindingsCursor, SingletonQueryBindingsCursor};
use crate::exec::collation::CollatorRef;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, ChainedInput, Cursor, CursorLifecycle,
    CursorState, LeafBindings,
};
use crate::exec::expr::ExpressionRef;
use crate::exec::hash_table::RowHashTable;
use crate::exec::operator::{Operator, OperatorRef};

/// Loads every row of `hash_input` into a [`RowHashTable`] keyed by
/// `comparison_fields`, binds it at `binding_position` and returns the rows
/// of `joined_input`.
///
/// The table is rebuilt each time the cursor is opened and unbound when it
/// is closed.
#[derive(Debug)]
pub struct UsingHashTable {
    hash_input: OperatorRef,
    hash_row_type: Arc<RowType>,
    comparison_fields: Vec<usize>,
    binding_position: usize,
    joined_input: OperatorRef,
    collators: Vec<Option<CollatorRef>>,
}

impl UsingHashTable {
    pub(crate) fn new(
        hash_input: OperatorRef,
        hash_row_type: Arc<RowType>,
        comparison_fields: Vec<usize>,
        binding_position: usize,
        joined_input: OperatorRef,
        collators: Option<Vec<Option<CollatorRef>>>,
    ) -> ExecResult<Self> {
        if comparison_fields.is_empty() {
            return Err(ExecError::invalid("comparison_fields", "at least one field is required"));
        }
        if let Some(field) = comparison_fields.iter().find(|f| **f >= hash_row_type.nfields()) {
            return Err(ExecError::invalid("comparison_fields", format!("{hash_row_type} has no field {field}")));
        }
        let collators = collators.unwrap_or_default();
        if !collators.is_empty() && collators.len() != comparison_fields.len() {
            return Err(ExecError::invalid(
                "collators",
                format!("{} collators for {} fields", collators.len(), comparison_fields.len()),
            ));
        }
        Ok(Self { hash_input, hash_row_type, comparison_fields, binding_position, joined_input, collators })
    }
}

impl Operator for UsingHashTable {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        let hash_bindings = SingletonQueryBindingsCursor::new(None);
        Box::new(UsingExecution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            input: ChainedInput::of(&self.joined_input, ctx, bindings),
            hash_cursor: Arc::clone(&self.hash_input).cursor(ctx, Box::new(hash_bindings.clone())),
            hash_bindings,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Using_HashTable"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.joined_input.row_type()
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.hash_input), Arc::clone(&self.joined_input)]
    }
}

struct UsingExecution {
    plan: Arc<UsingHashTable>,
    lifecycle: CursorLifecycle,
    input: ChainedInput,
    hash_cursor: BoxedCursor,
    hash_bindings: SingletonQueryBindingsCursor,
}

impl UsingExecution {
    fn build_table(&mut self) -> ExecResult<RowHashTable> {
        let bindings = self.input.require(self.plan.name())?;
        let mut table = RowHashTable::new(self.plan.comparison_fields.clone(), self.plan.collators.clone());
        self.hash_bindings.reset(bindings)?;
        self.hash_cursor.open_top_level()?;
        let loaded = loop {
            match self.hash_cursor.next() {
                Ok(Some(row)) => {
                    debug_assert!(**row.row_type() == *self.plan.hash_row_type, "unexpected row {row:?}");
                    table.insert(row);
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        let closed = self.hash_cursor.close_top_level();
        loaded?;
        closed?;
        debug!(rows = table.len(), "hash table built");
        Ok(table)
    }
}

impl Cursor for UsingExecution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        let table = self.build_table()?;
        let bindings = self.input.require(self.plan.name())?;
        bindings.set_hash_table(self.plan.binding_position, Arc::new(table))?;
        self.input.get_mut().open()
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.lifecycle.begin_next().and_then(|()| self.input.get_mut().next());
        let result = result.map(|row| self.lifecycle.emit(row));
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        if !self.lifecycle.close() {
            return Ok(());
        }
        if let Some(bindings) = self.input.current() {
            bindings.clear(self.plan.binding_position)?;
        }
        self.input.get_mut().close()
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    fn name(&self) -> &'static str {
        self.lifecycle.operator()
    }
}

delegate_bindings!(UsingExecution => input);

/// Returns the rows of the hash table bound at `table_binding_position`
/// whose key equals `outer_comparison_fields` evaluated on the row bound at
/// `row_binding_position`.
#[derive(Debug)]
pub struct HashTableLookupDefault {
    hashed_row_type: Arc<RowType>,
    outer_comparison_fields: Vec<ExpressionRef>,
    row_binding_position: usize,
    table_binding_position: usize,
}

impl HashTableLookupDefault {
    pub(crate) fn new(
        hashed_row_type: Arc<RowType>,
        outer_comparison_fields: Vec<ExpressionRef>,
        row_binding_position: usize,
        table_binding_position: usize,
    ) -> ExecResult<Self> {
        if outer_comparison_fields.is_empty() {
            return Err(ExecError::invalid("outer_comparison_fields", "at least one field is required"));
        }
        if row_binding_position == table_binding_position {
            return Err(ExecError::invalid(
                "table_binding_position",
                format!("row and hash table share binding {row_binding_position}"),
            ));
        }
        Ok(Self { hashed_row_type, outer_comparison_fields, row_binding_position, table_binding_position })
    }
}

impl Operator for HashTableLookupDefault {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        Box::new(LookupExecution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            bindings: LeafBindings::new(bindings),
            matches: VecDeque::new(),
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "HashTableLookup_Default"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(Arc::clone(&self.hashed_row_type))
    }
}

struct LookupExecution {
    plan: Arc<HashTableLookupDefault>,
    lifecycle: CursorLifecycle,
    bindings: LeafBindings,
    matches: VecDeque<Row>,
}

impl Cursor for LookupExecution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        let bindings = self.bindings.require(self.plan.name())?;
        let outer = bindings.get_row(self.plan.row_binding_position)?;
        let table = bindings.get_hash_table(self.plan.table_binding_position)?;
        let key = self
            .plan
            .outer_comparison_fields
            .iter()
            .map(|f| f.evaluate(&outer, &bindings))
            .collect::<ExecResult<Vec<Value>>>()?;
        self.matches = table.matching(&key).into();
        self.lifecycle.ctx().record_rows_read(self.matches.len() as u64);
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.lifecycle.begin_next().map(|()| self.matches.pop_front());
        let result = result.map(|row| self.lifecycle.emit(row));
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        self.lifecycle.close();
        self.matches.clear();
        Ok(())
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    fn name(&self) -> &'static str {
        self.lifecycle.operator()
    }
}

delegate_bindings!(LookupExecution => bindings);
