//! Immutable rows.
//!
//! A [`Row`] is a cheaply clonable handle to shared, immutable row data, so
//! the same row can sit in several pending queues, bindings slots and sort
//! buffers at once without copying. Rows never change after construction,
//! which also means a row never depends on the bindings that were current
//! when it was produced.

use std::fmt;
use std::sync::Arc;

use crate::error::CoreError;
use crate::hkey::HKey;
use crate::schema::{RowType, RowTypeKind, Table};
use crate::types::Value;

static NULL: Value = Value::Null;

#[derive(Debug)]
struct RowData {
    row_type: Arc<RowType>,
    values: Vec<Value>,
    hkey: Option<HKey>,
    parent: Option<Row>,
    child: Option<Row>,
}

/// An immutable tuple tagged with a [`RowType`] and usually an [`HKey`].
#[derive(Clone)]
pub struct Row {
    data: Arc<RowData>,
}

impl Row {
    /// Creates a row.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the number of values doesn't match the row type.
    #[must_use]
    pub fn new(row_type: Arc<RowType>, values: Vec<Value>, hkey: Option<HKey>) -> Self {
        debug_assert_eq!(values.len(), row_type.nfields(), "value count must match row type");
        Self { data: Arc::new(RowData { row_type, values, hkey, parent: None, child: None }) }
    }

    /// Creates a row, checking the field count.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WrongFieldCount`] if the number of values doesn't
    /// match the row type.
    pub fn try_new(
        row_type: Arc<RowType>,
        values: Vec<Value>,
        hkey: Option<HKey>,
    ) -> Result<Self, CoreError> {
        if values.len() != row_type.nfields() {
            return Err(CoreError::WrongFieldCount {
                row_type: row_type.name(),
                expected: row_type.nfields(),
                actual: values.len(),
            });
        }
        Ok(Self::new(row_type, values, hkey))
    }

    /// Joins a parent row and a child row into a row of a flattened type.
    ///
    /// A missing side contributes nulls. The components remain reachable
    /// through [`sub_row`](Self::sub_row).
    #[must_use]
    pub fn flattened(
        row_type: Arc<RowType>,
        parent: Option<Row>,
        child: Option<Row>,
        hkey: Option<HKey>,
    ) -> Self {
        let (parent_fields, child_fields) = match row_type.kind() {
            RowTypeKind::Flattened { parent, child } => (parent.nfields(), child.nfields()),
            _ => (0, row_type.nfields()),
        };
        let mut values = Vec::with_capacity(parent_fields + child_fields);
        match &parent {
            Some(p) => values.extend(p.values().iter().cloned()),
            None => values.resize(parent_fields, Value::Null),
        }
        match &child {
            Some(c) => values.extend(c.values().iter().cloned()),
            None => values.resize(parent_fields + child_fields, Value::Null),
        }
        Self { data: Arc::new(RowData { row_type, values, hkey, parent, child }) }
    }

    /// The row's type.
    #[must_use]
    pub fn row_type(&self) -> &Arc<RowType> {
        &self.data.row_type
    }

    /// All field values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.data.values
    }

    /// The value at `index`, or `Null` past the end.
    #[must_use]
    pub fn value(&self, index: usize) -> &Value {
        self.data.values.get(index).unwrap_or(&NULL)
    }

    /// The row's hkey, if it has one.
    #[must_use]
    pub fn hkey(&self) -> Option<&HKey> {
        self.data.hkey.as_ref()
    }

    /// The hkey of this row's ancestor in `table`.
    ///
    /// Returns `None` if the row has no hkey or `table` is deeper than the row.
    #[must_use]
    pub fn ancestor_hkey(&self, table: &Table) -> Option<HKey> {
        let hkey = self.data.hkey.as_ref()?;
        (table.depth() < hkey.depth()).then(|| hkey.prefix(table.depth() + 1))
    }

    /// Whether this row is `other` or one of its ancestors, judged by hkey.
    #[must_use]
    pub fn ancestor_of(&self, other: &Row) -> bool {
        match (self.hkey(), other.hkey()) {
            (Some(mine), Some(theirs)) => mine.is_prefix_of(theirs),
            _ => false,
        }
    }

    /// The component of this row with the given type.
    ///
    /// A row is its own sub-row; a flattened row also contains its parent
    /// and child sides, recursively.
    #[must_use]
    pub fn sub_row(&self, row_type: &RowType) -> Option<Row> {
        if *self.row_type().as_ref() == *row_type {
            return Some(self.clone());
        }
        self.data
            .parent
            .as_ref()
            .and_then(|p| p.sub_row(row_type))
            .or_else(|| self.data.child.as_ref().and_then(|c| c.sub_row(row_type)))
    }

    /// Whether both handles refer to the same row instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Row) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl PartialEq for Row {
    /// Rows are equal when their types and values are equal.
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (*self.data.row_type == *other.data.row_type && self.data.values == other.data.values)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")?;
        if let Some(hkey) = &self.data.hkey {
            write!(f, " @ {hkey}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.data.row_type.name())?;
        for (i, v) in self.data.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::GroupBuilder;

    fn setup() -> (Arc<Table>, Arc<Table>, Arc<RowType>, Arc<RowType>) {
        let mut b = GroupBuilder::new("co");
        let c = b.root("customer", &["cid", "name"]);
        let o = b.child(&c, "order", &["oid", "cid"]).unwrap();
        let ct = RowType::table(&c);
        let ot = RowType::table(&o);
        (c, o, ct, ot)
    }

    #[test]
    fn value_access() {
        let (_, _, ct, _) = setup();
        let row = Row::new(ct, vec![Value::Int(1), Value::from("a")], None);
        assert_eq!(row.value(0), &Value::Int(1));
        assert_eq!(row.value(5), &Value::Null);
        assert_eq!(row.to_string(), "customer(1, 'a')");
    }

    #[test]
    fn try_new_checks_width() {
        let (_, _, ct, _) = setup();
        let err = Row::try_new(ct, vec![Value::Int(1)], None).unwrap_err();
        assert!(matches!(err, CoreError::WrongFieldCount { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn ancestry_by_hkey() {
        let (c, _, ct, ot) = setup();
        let customer = Row::new(
            ct,
            vec![Value::Int(1), Value::from("a")],
            Some(HKey::of([(1, [Value::Int(1)])])),
        );
        let order = Row::new(
            ot,
            vec![Value::Int(11), Value::Int(1)],
            Some(HKey::of([(1, vec![Value::Int(1)]), (2, vec![Value::Int(11)])])),
        );
        assert!(customer.ancestor_of(&order));
        assert!(!order.ancestor_of(&customer));
        assert_eq!(order.ancestor_hkey(&c).as_ref(), customer.hkey());
    }

    #[test]
    fn flattened_rows_expose_components() {
        let (_, _, ct, ot) = setup();
        let co = RowType::flattened(&ct, &ot);
        let customer = Row::new(Arc::clone(&ct), vec![Value::Int(1), Value::from("a")], None);
        let row = Row::flattened(Arc::clone(&co), Some(customer.clone()), None, None);
        assert_eq!(row.values().len(), 4);
        assert_eq!(row.value(3), &Value::Null);
        assert!(row.sub_row(&ct).is_some_and(|r| r.ptr_eq(&customer)));
        assert!(row.sub_row(&ot).is_none());
        assert!(row.sub_row(&co).is_some());
    }
}
