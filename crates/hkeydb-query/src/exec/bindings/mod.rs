//! Query bindings: scoped slot tables carrying per-iteration values.
//!
//! A [`QueryBindings`] maps slot indices to values, rows, hkeys, bloom
//! filters or hash tables. Bindings form a chain: a child created with
//! [`create_bindings`](QueryBindings::create_bindings) sees every slot of its
//! ancestors that it does not set itself, and sits one level deeper.
//!
//! Streams of bindings are produced by [`QueryBindingsCursor`]s. Every
//! [`Cursor`](crate::exec::Cursor) is also a bindings cursor, which is how
//! pipelined operators pass scopes down the tree.

mod cursor;

pub use cursor::{MultipleQueryBindingsCursor, QueryBindingsCursor, SingletonQueryBindingsCursor};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use hkeydb_core::{HKey, Row, Value};

use crate::error::{ExecError, ExecResult};
use crate::exec::bloom::BloomFilter;
use crate::exec::hash_table::RowHashTable;

/// Contents of one bindings slot.
#[derive(Debug, Clone)]
pub enum BindingValue {
    /// A scalar parameter.
    Value(Value),
    /// A row, typically the current outer row of a nested loop.
    Row(Row),
    /// An hkey.
    HKey(HKey),
    /// A populated bloom filter.
    BloomFilter(Arc<BloomFilter>),
    /// A populated hash table.
    HashTable(Arc<RowHashTable>),
}

impl BindingValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Row(_) => "row",
            Self::HKey(_) => "hkey",
            Self::BloomFilter(_) => "bloom filter",
            Self::HashTable(_) => "hash table",
        }
    }
}

struct Frame {
    parent: Option<QueryBindings>,
    depth: u32,
    slots: RwLock<HashMap<usize, BindingValue>>,
}

/// A scoped, inheritable slot table.
///
/// Cloning yields another handle to the same scope; two handles are the
/// same scope exactly when [`ptr_eq`](Self::ptr_eq) holds.
#[derive(Clone)]
pub struct QueryBindings {
    frame: Arc<Frame>,
}

impl QueryBindings {
    /// Creates a root scope at depth 0.
    #[must_use]
    pub fn root() -> Self {
        Self { frame: Arc::new(Frame { parent: None, depth: 0, slots: RwLock::new(HashMap::new()) }) }
    }

    /// Creates a child scope one level deeper.
    #[must_use]
    pub fn create_bindings(&self) -> Self {
        Self {
            frame: Arc::new(Frame {
                parent: Some(self.clone()),
                depth: self.frame.depth + 1,
                slots: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Nesting level; the root is 0.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.frame.depth
    }

    /// The enclosing scope.
    #[must_use]
    pub fn parent(&self) -> Option<&QueryBindings> {
        self.frame.parent.as_ref()
    }

    /// Whether both handles refer to the same scope.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.frame, &other.frame)
    }

    /// Whether `ancestor` is this scope or one of its enclosing scopes.
    #[must_use]
    pub fn descends_from(&self, ancestor: &Self) -> bool {
        if ancestor.depth() > self.depth() {
            return false;
        }
        let mut current = Some(self);
        while let Some(bindings) = current {
            if bindings.ptr_eq(ancestor) {
                return true;
            }
            current = bindings.parent();
        }
        false
    }

    /// Whether a slot is set here or in an enclosing scope.
    #[must_use]
    pub fn is_defined(&self, position: usize) -> bool {
        self.lookup(position).ok().flatten().is_some()
    }

    /// Sets a slot in this scope.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::LockPoisoned`] if the slot table lock is poisoned.
    pub fn set(&self, position: usize, value: BindingValue) -> ExecResult<()> {
        let mut slots = self.frame.slots.write().map_err(|_| ExecError::LockPoisoned)?;
        slots.insert(position, value);
        Ok(())
    }

    /// Clears a slot in this scope, exposing any enclosing value again.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::LockPoisoned`] if the slot table lock is poisoned.
    pub fn clear(&self, position: usize) -> ExecResult<()> {
        let mut slots = self.frame.slots.write().map_err(|_| ExecError::LockPoisoned)?;
        slots.remove(&position);
        Ok(())
    }

    /// Sets a scalar slot.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::LockPoisoned`] if the slot table lock is poisoned.
    pub fn set_value(&self, position: usize, value: Value) -> ExecResult<()> {
        self.set(position, BindingValue::Value(value))
    }

    /// Sets a row slot.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::LockPoisoned`] if the slot table lock is poisoned.
    pub fn set_row(&self, position: usize, row: Row) -> ExecResult<()> {
        self.set(position, BindingValue::Row(row))
    }

    /// Sets an hkey slot.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::LockPoisoned`] if the slot table lock is poisoned.
    pub fn set_hkey(&self, position: usize, hkey: HKey) -> ExecResult<()> {
        self.set(position, BindingValue::HKey(hkey))
    }

    /// Sets a bloom filter slot.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::LockPoisoned`] if the slot table lock is poisoned.
    pub fn set_bloom_filter(&self, position: usize, filter: Arc<BloomFilter>) -> ExecResult<()> {
        self.set(position, BindingValue::BloomFilter(filter))
    }

    /// Sets a hash table slot.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::LockPoisoned`] if the slot table lock is poisoned.
    pub fn set_hash_table(&self, position: usize, table: Arc<RowHashTable>) -> ExecResult<()> {
        self.set(position, BindingValue::HashTable(table))
    }

    /// Reads a slot, falling through to enclosing scopes.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::BindingNotSet`] if no scope in the chain sets it.
    pub fn get(&self, position: usize) -> ExecResult<BindingValue> {
        self.lookup(position)?.ok_or(ExecError::BindingNotSet { position })
    }

    /// Reads a scalar slot.
    ///
    /// # Errors
    ///
    /// Fails if the slot is unset or holds something else.
    pub fn get_value(&self, position: usize) -> ExecResult<Value> {
        match self.get(position)? {
            BindingValue::Value(value) => Ok(value),
            _ => Err(ExecError::BindingTypeMismatch { position, expected: "value" }),
        }
    }

    /// Reads a row slot.
    ///
    /// # Errors
    ///
    /// Fails if the slot is unset or holds something else.
    pub fn get_row(&self, position: usize) -> ExecResult<Row> {
        match self.get(position)? {
            BindingValue::Row(row) => Ok(row),
            _ => Err(ExecError::BindingTypeMismatch { position, expected: "row" }),
        }
    }

    /// Reads an hkey slot.
    ///
    /// # Errors
    ///
    /// Fails if the slot is unset or holds something else.
    pub fn get_hkey(&self, position: usize) -> ExecResult<HKey> {
        match self.get(position)? {
            BindingValue::HKey(hkey) => Ok(hkey),
            _ => Err(ExecError::BindingTypeMismatch { position, expected: "hkey" }),
        }
    }

    /// Reads a bloom filter slot.
    ///
    /// # Errors
    ///
    /// Fails if the slot is unset or holds something else.
    pub fn get_bloom_filter(&self, position: usize) -> ExecResult<Arc<BloomFilter>> {
        match self.get(position)? {
            BindingValue::BloomFilter(filter) => Ok(filter),
            _ => Err(ExecError::BindingTypeMismatch { position, expected: "bloom filter" }),
        }
    }

    /// Reads a hash table slot.
    ///
    /// # Errors
    ///
    /// Fails if the slot is unset or holds something else.
    pub fn get_hash_table(&self, position: usize) -> ExecResult<Arc<RowHashTable>> {
        match self.get(position)? {
            BindingValue::HashTable(table) => Ok(table),
            _ => Err(ExecError::BindingTypeMismatch { position, expected: "hash table" }),
        }
    }

    fn lookup(&self, position: usize) -> ExecResult<Option<BindingValue>> {
        let mut current = Some(self);
        while let Some(bindings) = current {
            let slots = bindings.frame.slots.read().map_err(|_| ExecError::LockPoisoned)?;
            if let Some(value) = slots.get(&position) {
                return Ok(Some(value.clone()));
            }
            current = bindings.parent();
        }
        Ok(None)
    }
}

impl fmt::Debug for QueryBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("QueryBindings");
        s.field("depth", &self.frame.depth);
        if let Ok(slots) = self.frame.slots.read() {
            let mut positions: Vec<_> = slots.iter().map(|(p, v)| (*p, v.kind())).collect();
            positions.sort_unstable();
            s.field("slots", &positions);
        }
        s.finish_non_exhaustive()
    }
}
