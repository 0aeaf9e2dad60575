//! In-memory hash table of rows keyed by selected fields.

use rustc_hash::FxHashMap;

use hkeydb_core::{Row, Value};

use crate::exec::collation::{compare_values, hash_with, CollatorRef};

/// Hashes a key made of several values, each with an optional collator.
///
/// The combination is order sensitive. Bloom filter producers and
/// consumers both hash through here, so equal keys always agree.
#[must_use]
pub fn hash_key<'a, I>(values: I, collators: &[Option<CollatorRef>]) -> u64
where
    I: IntoIterator<Item = &'a Value>,
{
    values.into_iter().enumerate().fold(0u64, |acc, (i, value)| {
        let collator = collators.get(i).and_then(|c| c.as_deref());
        acc.rotate_left(5) ^ hash_with(value, collator)
    })
}

/// Rows bucketed by the hash of their key fields.
#[derive(Debug, Clone)]
pub struct RowHashTable {
    fields: Vec<usize>,
    collators: Vec<Option<CollatorRef>>,
    buckets: FxHashMap<u64, Vec<Row>>,
    len: usize,
}

impl RowHashTable {
    /// Creates an empty table keyed by `fields`.
    #[must_use]
    pub fn new(fields: Vec<usize>, collators: Vec<Option<CollatorRef>>) -> Self {
        Self { fields, collators, buckets: FxHashMap::default(), len: 0 }
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the table holds no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fields forming the key.
    #[must_use]
    pub fn fields(&self) -> &[usize] {
        &self.fields
    }

    /// Adds a row under its key.
    pub fn insert(&mut self, row: Row) {
        let hash = hash_key(self.fields.iter().map(|f| row.value(*f)), &self.collators);
        self.buckets.entry(hash).or_default().push(row);
        self.len += 1;
    }

    /// Rows whose key equals `key`, in insertion order.
    #[must_use]
    pub fn matching(&self, key: &[Value]) -> Vec<Row> {
        let hash = hash_key(key, &self.collators);
        self.buckets
            .get(&hash)
            .map(|bucket| bucket.iter().filter(|row| self.key_equals(row, key)).cloned().collect())
            .unwrap_or_default()
    }

    fn key_equals(&self, row: &Row, key: &[Value]) -> bool {
        self.fields.len() == key.len()
            && self.fields.iter().zip(key).enumerate().all(|(i, (field, value))| {
                let collator = self.collators.get(i).and_then(|c| c.as_deref());
                compare_values(row.value(*field), value, collator).is_eq()
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::exec::collation::CaseInsensitiveCollator;
    use hkeydb_core::RowType;

    #[test]
    fn matching_rows_by_key() {
        let row_type = RowType::values("t", 2);
        let mut table = RowHashTable::new(vec![1], vec![None]);
        table.insert(Row::new(Arc::clone(&row_type), vec![Value::Int(1), Value::from("x")], None));
        table.insert(Row::new(Arc::clone(&row_type), vec![Value::Int(2), Value::from("y")], None));
        table.insert(Row::new(Arc::clone(&row_type), vec![Value::Int(3), Value::from("x")], None));

        let found = table.matching(&[Value::from("x")]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].value(0), &Value::Int(1));
        assert_eq!(found[1].value(0), &Value::Int(3));
        assert!(table.matching(&[Value::from("z")]).is_empty());
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn collated_keys() {
        let row_type = RowType::values("t", 1);
        let mut table = RowHashTable::new(vec![0], vec![Some(Arc::new(CaseInsensitiveCollator))]);
        table.insert(Row::new(row_type, vec![Value::from("Apple")], None));
        assert_eq!(table.matching(&[Value::from("APPLE")]).len(), 1);
    }

    #[test]
    fn key_hash_is_order_sensitive() {
        let a = [Value::Int(1), Value::Int(2)];
        let b = [Value::Int(2), Value::Int(1)];
        assert_ne!(hash_key(&a, &[]), hash_key(&b, &[]));
        assert_eq!(hash_key(&a, &[]), hash_key(&a.clone(), &[]));
    }
}
