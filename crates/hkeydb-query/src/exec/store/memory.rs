//! In-memory store.
//!
//! Each group is a `BTreeMap` keyed by hkey, so a group scan is an ordered
//! map scan and a branch is a range. Group cursors snapshot their range on
//! `open`; writes made while a cursor is open are seen on its next open.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hkeydb_core::{Group, HKey, Row, Table};
use tracing::debug;

use super::{GroupCursor, Sorter, StoreAdapter, StoreError};
use crate::api::SortOption;
use crate::error::ExecResult;
use crate::exec::bindings::QueryBindings;
use crate::exec::cursor::Cursor;
use crate::exec::ordering::OrderingSpec;

type Groups = HashMap<String, BTreeMap<HKey, Row>>;

/// A store holding every group in memory.
///
/// Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    groups: Arc<RwLock<Groups>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes every row.
    ///
    /// # Errors
    ///
    /// Fails on the first row that cannot be stored.
    pub fn load<I>(&self, rows: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut groups = self.write()?;
        for row in rows {
            let (group, hkey) = Self::locate(&row)?;
            groups.entry(group).or_default().insert(hkey, row);
        }
        Ok(())
    }

    /// Number of rows stored in `group`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if the store lock is poisoned.
    pub fn row_count(&self, group: &Group) -> Result<usize, StoreError> {
        Ok(self.read()?.get(group.name()).map_or(0, BTreeMap::len))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Groups>, StoreError> {
        self.groups.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Groups>, StoreError> {
        self.groups.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn locate(row: &Row) -> Result<(String, HKey), StoreError> {
        let row_type = row.row_type();
        let table = row_type
            .table_ref()
            .filter(|_| row_type.is_table_type())
            .ok_or_else(|| StoreError::NotAGroupRow(row_type.name()))?;
        let hkey = row.hkey().cloned().ok_or_else(|| StoreError::MissingHKey { row_type: row_type.name() })?;
        Ok((table.group_name().to_owned(), hkey))
    }

    fn remove(groups: &mut Groups, row: &Row) -> Result<(), StoreError> {
        let (group, hkey) = Self::locate(row)?;
        groups
            .get_mut(&group)
            .and_then(|rows| rows.remove(&hkey))
            .map(|_| ())
            .ok_or_else(|| StoreError::RowNotFound { hkey: hkey.to_string() })
    }
}

impl StoreAdapter for MemoryStore {
    fn new_group_cursor(&self, group: &Arc<Group>) -> Box<dyn GroupCursor> {
        Box::new(MemoryGroupCursor {
            groups: Arc::clone(&self.groups),
            group: group.name().to_owned(),
            bound: None,
            rows: VecDeque::new(),
        })
    }

    fn new_hkey(&self, _table: &Arc<Table>) -> HKey {
        HKey::new()
    }

    fn write_row(&self, row: &Row) -> Result<(), StoreError> {
        let (group, hkey) = Self::locate(row)?;
        self.write()?.entry(group).or_default().insert(hkey, row.clone());
        Ok(())
    }

    fn delete_row(&self, row: &Row) -> Result<(), StoreError> {
        let mut groups = self.write()?;
        Self::remove(&mut groups, row)
    }

    fn update_row(&self, old: &Row, new: &Row) -> Result<(), StoreError> {
        let (group, hkey) = Self::locate(new)?;
        let mut groups = self.write()?;
        Self::remove(&mut groups, old)?;
        groups.entry(group).or_default().insert(hkey, new.clone());
        Ok(())
    }

    fn create_sorter(&self, ordering: Arc<OrderingSpec>, option: SortOption) -> Box<dyn Sorter> {
        Box::new(MemorySorter { ordering, option, sorted: VecDeque::new() })
    }
}

struct MemoryGroupCursor {
    groups: Arc<RwLock<Groups>>,
    group: String,
    bound: Option<(HKey, bool)>,
    rows: VecDeque<Row>,
}

impl GroupCursor for MemoryGroupCursor {
    fn rebind(&mut self, hkey: &HKey, deep: bool) {
        self.bound = Some((hkey.clone(), deep));
    }

    fn open(&mut self) -> Result<(), StoreError> {
        let groups = self.groups.read().map_err(|_| StoreError::LockPoisoned)?;
        self.rows.clear();
        let Some(rows) = groups.get(&self.group) else {
            return Ok(());
        };
        match &self.bound {
            None => self.rows.extend(rows.values().cloned()),
            Some((hkey, true)) => self.rows.extend(
                rows.range(hkey.clone()..)
                    .take_while(|(key, _)| hkey.is_prefix_of(key))
                    .map(|(_, row)| row.clone()),
            ),
            Some((hkey, false)) => {
                self.rows.extend(rows.range(hkey.clone()..).next().map(|(_, row)| row.clone()));
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>, StoreError> {
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) {
        self.rows.clear();
    }
}

struct MemorySorter {
    ordering: Arc<OrderingSpec>,
    option: SortOption,
    sorted: VecDeque<Row>,
}

impl Sorter for MemorySorter {
    fn sort(&mut self, input: &mut dyn Cursor, bindings: &QueryBindings) -> ExecResult<()> {
        let mut keyed = Vec::new();
        while let Some(row) = input.next()? {
            keyed.push((self.ordering.evaluate(&row, bindings)?, row));
        }
        let read = keyed.len();
        keyed.sort_by(|(a, _), (b, _)| self.ordering.compare_keys(a, b));
        if self.option == SortOption::SuppressDuplicates {
            keyed.dedup_by(|(a, _), (b, _)| self.ordering.compare_keys(a, b).is_eq());
        }
        debug!(rows = read, kept = keyed.len(), "in-memory sort complete");
        self.sorted = keyed.into_iter().map(|(_, row)| row).collect();
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        Ok(self.sorted.pop_front())
    }

    fn close(&mut self) {
        self.sorted.clear();
    }
}
