//! Group and row-type descriptors.
//!
//! A [`Group`] is a tree of [`Table`]s stored together in hkey order. Each
//! table has an ordinal, unique within its group, that tags its segment of
//! the hkey; sibling tables are ordered by ordinal. [`RowType`]s describe
//! the shapes of rows flowing between operators: rows of a table, index rows
//! that carry a table's hkey, flattened parent+child rows and free-standing
//! value rows.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::CoreError;

/// A table within a group.
#[derive(Debug)]
pub struct Table {
    name: Arc<str>,
    group: Arc<str>,
    ordinal: u32,
    depth: usize,
    parent: Option<Arc<Table>>,
    columns: Vec<Arc<str>>,
}

impl Table {
    /// The table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the group the table belongs to.
    #[must_use]
    pub fn group_name(&self) -> &str {
        &self.group
    }

    /// The hkey ordinal of the table.
    #[must_use]
    pub const fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Distance from the group root; the root has depth 0.
    ///
    /// An hkey of a row of this table has `depth() + 1` segments.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// The parent table, if this is not the root.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Table>> {
        self.parent.as_ref()
    }

    /// Column names.
    #[must_use]
    pub fn columns(&self) -> &[Arc<str>] {
        &self.columns
    }

    /// Whether `self` is `other` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Table) -> bool {
        if self.group != other.group || self.depth > other.depth {
            return false;
        }
        let mut current = Some(other);
        while let Some(table) = current {
            if table == self {
                return true;
            }
            current = table.parent.as_deref();
        }
        false
    }

    /// Whether `self` is the immediate parent of `other`.
    #[must_use]
    pub fn is_parent_of(&self, other: &Table) -> bool {
        other.parent.as_deref().is_some_and(|p| p == self)
    }

    /// The ancestor of `self` at the given depth (`self` itself at its own depth).
    #[must_use]
    pub fn ancestor_at_depth(self: &Arc<Self>, depth: usize) -> Option<Arc<Table>> {
        if depth > self.depth {
            return None;
        }
        let mut current = Arc::clone(self);
        while current.depth > depth {
            current = Arc::clone(current.parent.as_ref()?);
        }
        Some(current)
    }

    /// The deepest table that is an ancestor of (or equal to) both tables.
    #[must_use]
    pub fn common_ancestor(a: &Arc<Table>, b: &Arc<Table>) -> Option<Arc<Table>> {
        if a.group != b.group {
            return None;
        }
        let mut x = a.ancestor_at_depth(a.depth.min(b.depth))?;
        let mut y = b.ancestor_at_depth(a.depth.min(b.depth))?;
        while x != y {
            x = Arc::clone(x.parent.as_ref()?);
            y = Arc::clone(y.parent.as_ref()?);
        }
        Some(x)
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.ordinal == other.ordinal && self.group == other.group
    }
}

impl Eq for Table {}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A tree of tables clustered by hkey.
#[derive(Debug)]
pub struct Group {
    name: Arc<str>,
    tables: Vec<Arc<Table>>,
}

impl Group {
    /// The group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The root table.
    #[must_use]
    pub fn root(&self) -> &Arc<Table> {
        &self.tables[0]
    }

    /// All tables, in ordinal order.
    #[must_use]
    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    /// Looks a table up by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.iter().find(|t| t.name() == name)
    }

    /// Whether the table belongs to this group.
    #[must_use]
    pub fn contains(&self, table: &Table) -> bool {
        *self.name == *table.group
    }

    /// `table` and every table beneath it, in ordinal order.
    #[must_use]
    pub fn subtree(&self, table: &Table) -> Vec<Arc<Table>> {
        self.tables.iter().filter(|t| table.is_ancestor_of(t)).cloned().collect()
    }
}

/// Builds a [`Group`], assigning ordinals in creation order starting at 1.
///
/// ```
/// use hkeydb_core::GroupBuilder;
///
/// let mut builder = GroupBuilder::new("coi");
/// let customer = builder.root("customer", &["cid", "name"]);
/// let order = builder.child(&customer, "order", &["oid", "cid"]).unwrap();
/// let group = builder.build().unwrap();
///
/// assert!(customer.is_parent_of(&order));
/// assert_eq!(group.tables().len(), 2);
/// ```
#[derive(Debug)]
pub struct GroupBuilder {
    name: Arc<str>,
    tables: Vec<Arc<Table>>,
}

impl GroupBuilder {
    /// Starts a group.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self { name: Arc::from(name), tables: Vec::new() }
    }

    fn add(&mut self, name: &str, parent: Option<&Arc<Table>>, columns: &[&str]) -> Arc<Table> {
        let table = Arc::new(Table {
            name: Arc::from(name),
            group: Arc::clone(&self.name),
            ordinal: u32::try_from(self.tables.len() + 1).unwrap_or(u32::MAX),
            depth: parent.map_or(0, |p| p.depth + 1),
            parent: parent.cloned(),
            columns: columns.iter().map(|c| Arc::from(*c)).collect(),
        });
        self.tables.push(Arc::clone(&table));
        table
    }

    /// Adds the root table. Call once, before any child.
    pub fn root(&mut self, name: &str, columns: &[&str]) -> Arc<Table> {
        self.add(name, None, columns)
    }

    /// Adds a child of `parent`.
    ///
    /// # Errors
    ///
    /// Fails if `parent` belongs to another group or the name is taken.
    pub fn child(
        &mut self,
        parent: &Arc<Table>,
        name: &str,
        columns: &[&str],
    ) -> Result<Arc<Table>, CoreError> {
        if parent.group != self.name {
            return Err(CoreError::Validation(format!(
                "parent {} is not in group {}",
                parent.name, self.name
            )));
        }
        if self.tables.iter().any(|t| t.name() == name) {
            return Err(CoreError::DuplicateTable(name.to_owned()));
        }
        Ok(self.add(name, Some(parent), columns))
    }

    /// Finishes the group.
    ///
    /// # Errors
    ///
    /// Fails if no root table was added.
    pub fn build(self) -> Result<Arc<Group>, CoreError> {
        if self.tables.is_empty() {
            return Err(CoreError::Validation(format!("group {} has no tables", self.name)));
        }
        Ok(Arc::new(Group { name: self.name, tables: self.tables }))
    }
}

static NEXT_VALUES_TYPE_ID: AtomicU32 = AtomicU32::new(1);

/// What a [`RowType`] describes.
#[derive(Debug)]
pub enum RowTypeKind {
    /// Rows of a group table.
    Table(Arc<Table>),
    /// Index rows; they carry the indexed table's hkey.
    Index {
        /// Indexed table.
        table: Arc<Table>,
        /// Index name.
        name: Arc<str>,
    },
    /// A parent row joined with one of its children.
    Flattened {
        /// Row type of the parent side.
        parent: Arc<RowType>,
        /// Row type of the child side.
        child: Arc<RowType>,
    },
    /// Free-standing rows without a table, e.g. literal values.
    Values {
        /// Identity of this values type.
        id: u32,
        /// Display name.
        name: Arc<str>,
    },
}

/// Schema descriptor of a row: its field count and its place in the table tree.
#[derive(Debug)]
pub struct RowType {
    kind: RowTypeKind,
    nfields: usize,
}

impl RowType {
    /// Row type of a table.
    #[must_use]
    pub fn table(table: &Arc<Table>) -> Arc<Self> {
        Arc::new(Self { nfields: table.columns.len(), kind: RowTypeKind::Table(Arc::clone(table)) })
    }

    /// Row type of an index on `table` with `nfields` fields.
    #[must_use]
    pub fn index(table: &Arc<Table>, name: &str, nfields: usize) -> Arc<Self> {
        Arc::new(Self {
            nfields,
            kind: RowTypeKind::Index { table: Arc::clone(table), name: Arc::from(name) },
        })
    }

    /// Row type of a parent row flattened with a child row.
    #[must_use]
    pub fn flattened(parent: &Arc<Self>, child: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            nfields: parent.nfields + child.nfields,
            kind: RowTypeKind::Flattened { parent: Arc::clone(parent), child: Arc::clone(child) },
        })
    }

    /// A fresh values row type. Every call yields a distinct type.
    #[must_use]
    pub fn values(name: &str, nfields: usize) -> Arc<Self> {
        let id = NEXT_VALUES_TYPE_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self { nfields, kind: RowTypeKind::Values { id, name: Arc::from(name) } })
    }

    /// What this type describes.
    #[must_use]
    pub const fn kind(&self) -> &RowTypeKind {
        &self.kind
    }

    /// Number of fields.
    #[must_use]
    pub const fn nfields(&self) -> usize {
        self.nfields
    }

    /// The table that positions rows of this type in the group.
    ///
    /// For flattened types this is the child side's table, the deepest one.
    #[must_use]
    pub fn table_ref(&self) -> Option<&Arc<Table>> {
        match &self.kind {
            RowTypeKind::Table(table) | RowTypeKind::Index { table, .. } => Some(table),
            RowTypeKind::Flattened { child, .. } => child.table_ref(),
            RowTypeKind::Values { .. } => None,
        }
    }

    /// Whether this is the row type of a group table.
    #[must_use]
    pub const fn is_table_type(&self) -> bool {
        matches!(self.kind, RowTypeKind::Table(_))
    }

    /// Whether this is an index row type.
    #[must_use]
    pub const fn is_index_type(&self) -> bool {
        matches!(self.kind, RowTypeKind::Index { .. })
    }

    /// Whether rows of this type are positioned at or above rows of `other`.
    #[must_use]
    pub fn ancestor_of(&self, other: &Self) -> bool {
        match (self.table_ref(), other.table_ref()) {
            (Some(a), Some(b)) => a.is_ancestor_of(b),
            _ => false,
        }
    }

    /// Whether rows of this type sit one level above rows of `other`.
    #[must_use]
    pub fn parent_of(&self, other: &Self) -> bool {
        match (self.table_ref(), other.table_ref()) {
            (Some(a), Some(b)) => a.is_parent_of(b),
            _ => false,
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> String {
        match &self.kind {
            RowTypeKind::Table(t) => t.name().to_owned(),
            RowTypeKind::Index { table, name } => format!("{}.{}", table.name(), name),
            RowTypeKind::Flattened { parent, child } => {
                format!("flatten({}, {})", parent.name(), child.name())
            }
            RowTypeKind::Values { name, .. } => name.to_string(),
        }
    }
}

impl PartialEq for RowType {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (RowTypeKind::Table(a), RowTypeKind::Table(b)) => a == b,
            (
                RowTypeKind::Index { table: a, name: an },
                RowTypeKind::Index { table: b, name: bn },
            ) => a == b && an == bn,
            (
                RowTypeKind::Flattened { parent: ap, child: ac },
                RowTypeKind::Flattened { parent: bp, child: bc },
            ) => ap == bp && ac == bc,
            (RowTypeKind::Values { id: a, .. }, RowTypeKind::Values { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for RowType {}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coia() -> (Arc<Group>, Arc<Table>, Arc<Table>, Arc<Table>, Arc<Table>) {
        let mut b = GroupBuilder::new("coi");
        let c = b.root("customer", &["cid", "name"]);
        let o = b.child(&c, "order", &["oid", "cid"]).unwrap();
        let i = b.child(&o, "item", &["iid", "oid"]).unwrap();
        let a = b.child(&c, "address", &["aid", "cid"]).unwrap();
        (b.build().unwrap(), c, o, i, a)
    }

    #[test]
    fn ordinals_and_depths() {
        let (group, c, o, i, a) = coia();
        assert_eq!((c.ordinal(), o.ordinal(), i.ordinal(), a.ordinal()), (1, 2, 3, 4));
        assert_eq!((c.depth(), o.depth(), i.depth(), a.depth()), (0, 1, 2, 1));
        assert_eq!(group.root().name(), "customer");
        assert_eq!(group.subtree(&o).len(), 2);
    }

    #[test]
    fn ancestry() {
        let (_, c, o, i, a) = coia();
        assert!(c.is_ancestor_of(&i));
        assert!(o.is_ancestor_of(&o));
        assert!(!a.is_ancestor_of(&i));
        assert!(o.is_parent_of(&i));
        assert!(!c.is_parent_of(&i));
        assert_eq!(Table::common_ancestor(&i, &a).as_deref(), Some(&*c));
        assert_eq!(Table::common_ancestor(&i, &o).as_deref(), Some(&*o));
        assert_eq!(i.ancestor_at_depth(1).as_deref(), Some(&*o));
    }

    #[test]
    fn duplicate_table_rejected() {
        let mut b = GroupBuilder::new("g");
        let r = b.root("r", &["id"]);
        b.child(&r, "x", &["id"]).unwrap();
        assert!(matches!(b.child(&r, "x", &["id"]), Err(CoreError::DuplicateTable(_))));
    }

    #[test]
    fn row_type_relationships() {
        let (_, c, o, i, _) = coia();
        let ct = RowType::table(&c);
        let ot = RowType::table(&o);
        let it = RowType::table(&i);
        let co = RowType::flattened(&ct, &ot);
        assert_eq!(co.nfields(), 4);
        assert!(co.parent_of(&it));
        assert!(ct.ancestor_of(&co));
        assert_eq!(*RowType::table(&c), *ct);
        assert_ne!(*ct, *ot);
        assert_eq!(co.name(), "flatten(customer, order)");
    }

    #[test]
    fn values_types_are_distinct() {
        let a = RowType::values("v", 1);
        let b = RowType::values("v", 1);
        assert_ne!(*a, *b);
        assert_eq!(*a, *a);
        assert!(a.table_ref().is_none());
    }
}
