//! Store adapter interface.
//!
//! The execution layer reads group rows and sorts through a
//! [`StoreAdapter`]. Only scan, lookup and sort operators call it.
//! [`MemoryStore`] is a complete in-memory implementation.

mod memory;

pub use memory::MemoryStore;

use std::fmt;
use std::sync::Arc;

use hkeydb_core::{Group, HKey, Row, Table};
use thiserror::Error;

use crate::api::SortOption;
use crate::error::ExecResult;
use crate::exec::bindings::QueryBindings;
use crate::exec::cursor::Cursor;
use crate::exec::ordering::OrderingSpec;

/// Errors raised by a store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row to delete or update does not exist.
    #[error("row not found at {hkey}")]
    RowNotFound {
        /// hkey of the missing row.
        hkey: String,
    },

    /// A row was written without an hkey.
    #[error("row of type {row_type} has no hkey")]
    MissingHKey {
        /// Name of the row's type.
        row_type: String,
    },

    /// A row of a non-table type was written.
    #[error("rows of type {0} cannot be stored")]
    NotAGroupRow(String),

    /// A lock guarding store state was poisoned.
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Access to group storage.
pub trait StoreAdapter: Send + Sync + fmt::Debug {
    /// Creates an unbound cursor over `group`; it scans the whole group
    /// until [`GroupCursor::rebind`] is called.
    fn new_group_cursor(&self, group: &Arc<Group>) -> Box<dyn GroupCursor>;

    /// Creates an empty hkey for rows of `table`.
    fn new_hkey(&self, table: &Arc<Table>) -> HKey;

    /// Inserts a row.
    ///
    /// # Errors
    ///
    /// Fails if the row has no hkey or is not a table row.
    fn write_row(&self, row: &Row) -> Result<(), StoreError>;

    /// Deletes the row stored at `row`'s hkey.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if nothing is stored there.
    fn delete_row(&self, row: &Row) -> Result<(), StoreError>;

    /// Replaces `old` with `new`; the hkey may change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if `old` is not stored.
    fn update_row(&self, old: &Row, new: &Row) -> Result<(), StoreError>;

    /// Creates a sorter for rows ordered by `ordering`.
    fn create_sorter(&self, ordering: Arc<OrderingSpec>, option: SortOption) -> Box<dyn Sorter>;
}

/// A cursor over the rows of one group, in hkey order.
pub trait GroupCursor: Send {
    /// Restricts the cursor.
    ///
    /// With `deep` set, the cursor returns every row whose hkey has `hkey`
    /// as a prefix. Otherwise it returns the single first row at or after
    /// `hkey`, which callers compare against `hkey` to detect a missing row.
    fn rebind(&mut self, hkey: &HKey, deep: bool);

    /// Positions the cursor at the start of its range.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    fn open(&mut self) -> Result<(), StoreError>;

    /// Returns the next row.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    fn next(&mut self) -> Result<Option<Row>, StoreError>;

    /// Releases the range.
    fn close(&mut self);
}

/// Sorts a row stream, possibly spilling.
///
/// The sort operator owns the protocol around a sorter: it opens the input,
/// hands it to [`sort`](Self::sort), closes the input, then drains the
/// sorter with [`next`](Self::next) and finally calls [`close`](Self::close).
pub trait Sorter: Send {
    /// Reads `input` until it is exhausted and sorts the rows.
    ///
    /// # Errors
    ///
    /// Propagates errors from the input and from key evaluation.
    fn sort(&mut self, input: &mut dyn Cursor, bindings: &QueryBindings) -> ExecResult<()>;

    /// Returns the next sorted row.
    ///
    /// # Errors
    ///
    /// Propagates errors from reading spilled data.
    fn next(&mut self) -> ExecResult<Option<Row>>;

    /// Releases sorter resources.
    fn close(&mut self);
}
