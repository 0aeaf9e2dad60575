//! AncestorLookup_Nested: ancestors of a bound row.

use std::sync::Arc;

use hkeydb_core::{Group, HKey, Row, RowType, RowTypeKind, Table};

use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::{QueryBindings, QueryBindingsCursor};
use crate::exec::context::QueryContext;
use crate::exec::cursor::BoxedCursor;
use crate::exec::operator::Operator;
use crate::exec::operators::lookahead::{LookaheadCursor, LookupSlot};
use crate::exec::store::GroupCursor;

/// Finds, for the row bound at `input_binding_position`, the rows of each
/// ancestor type that sit above it in the group.
///
/// Every ancestor is located by exact hkey: the bound row's hkey is
/// shortened to the ancestor's depth and looked up. Missing ancestors
/// (orphans) are skipped, so each scope yields zero or one row per ancestor
/// type, shallowest first.
///
/// The input may be an index row; an index row's own table then counts as
/// an ancestor, which is how an index row is turned into its table row.
#[derive(Debug)]
pub struct AncestorLookupNested {
    group: Arc<Group>,
    row_type: Arc<RowType>,
    ancestors: Vec<Arc<Table>>,
    input_binding_position: usize,
    lookahead_quantum: usize,
}

impl AncestorLookupNested {
    pub(crate) fn new(
        group: Arc<Group>,
        row_type: Arc<RowType>,
        ancestor_types: &[Arc<RowType>],
        input_binding_position: usize,
        lookahead_quantum: usize,
    ) -> ExecResult<Self> {
        if ancestor_types.is_empty() {
            return Err(ExecError::invalid("ancestor_types", "at least one ancestor type is required"));
        }
        let index_input = match row_type.kind() {
            RowTypeKind::Table(_) => false,
            RowTypeKind::Index { .. } => true,
            _ => return Err(ExecError::invalid("row_type", format!("{row_type} is not a table or index row type"))),
        };
        let mut ancestors = Vec::with_capacity(ancestor_types.len());
        for ancestor_type in ancestor_types {
            let Some(table) = ancestor_type.table_ref().filter(|_| ancestor_type.is_table_type()) else {
                return Err(ExecError::invalid("ancestor_types", format!("{ancestor_type} is not a table row type")));
            };
            if !index_input && **ancestor_type == *row_type {
                return Err(ExecError::invalid("ancestor_types", "a table row is not its own ancestor"));
            }
            if !ancestor_type.ancestor_of(&row_type) {
                return Err(ExecError::NotAncestor { ancestor: ancestor_type.name(), descendant: row_type.name() });
            }
            if !group.contains(table) {
                return Err(ExecError::invalid("ancestor_types", format!("{table} is not in group {}", group.name())));
            }
            ancestors.push(Arc::clone(table));
        }
        ancestors.sort_by_key(|table| table.depth());
        Ok(Self { group, row_type, ancestors, input_binding_position, lookahead_quantum })
    }
}

impl Operator for AncestorLookupNested {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        // The quantum counts store cursors; each slot holds one per ancestor.
        let quantum = ctx.config().effective_quantum(self.lookahead_quantum);
        let nslots = quantum.div_ceil(self.ancestors.len());
        let slots = (0..nslots).map(|_| AncestorSlot::new(&self, ctx)).collect();
        Box::new(LookaheadCursor::new(self.name(), ctx, bindings, slots))
    }

    fn name(&self) -> &'static str {
        "AncestorLookup_Nested"
    }
}

struct AncestorSlot {
    plan: Arc<AncestorLookupNested>,
    cursors: Vec<Box<dyn GroupCursor>>,
    hkeys: Vec<Option<HKey>>,
    next_ancestor: usize,
}

impl AncestorSlot {
    fn new(plan: &Arc<AncestorLookupNested>, ctx: &QueryContext) -> Self {
        let cursors = plan.ancestors.iter().map(|_| ctx.store().new_group_cursor(&plan.group)).collect();
        Self { plan: Arc::clone(plan), cursors, hkeys: vec![None; plan.ancestors.len()], next_ancestor: 0 }
    }
}

impl LookupSlot for AncestorSlot {
    fn open(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
        let row = bindings.get_row(self.plan.input_binding_position)?;
        debug_assert!(*row.row_type().as_ref() == *self.plan.row_type, "unexpected bound row {row:?}");
        for (i, table) in self.plan.ancestors.iter().enumerate() {
            self.hkeys[i] = row.ancestor_hkey(table);
            if let Some(hkey) = &self.hkeys[i] {
                self.cursors[i].rebind(hkey, false);
                self.cursors[i].open()?;
            }
        }
        self.next_ancestor = 0;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        while self.next_ancestor < self.cursors.len() {
            let i = self.next_ancestor;
            self.next_ancestor += 1;
            let Some(hkey) = self.hkeys[i].take() else {
                continue;
            };
            let row = self.cursors[i].next()?;
            self.cursors[i].close();
            // The store returns the next row at or after the key; an orphan
            // has no row with exactly that key.
            if let Some(row) = row.filter(|row| row.hkey() == Some(&hkey)) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        for (cursor, hkey) in self.cursors.iter_mut().zip(&mut self.hkeys) {
            cursor.close();
            *hkey = None;
        }
        self.next_ancestor = self.cursors.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use crate::exec::store::MemoryStore;
    use hkeydb_core::testing::Coi;

    fn context(coi: &Coi) -> Arc<QueryContext> {
        let store = MemoryStore::new();
        store.load(coi.standard_rows()).unwrap();
        Arc::new(QueryContext::new().with_store(Arc::new(store)))
    }

    fn lookup(coi: &Coi, input: Row, ancestors: &[Arc<RowType>], quantum: usize) -> Vec<Row> {
        let ctx = context(coi);
        let plan = api::ancestor_lookup_nested(
            Arc::clone(&coi.group),
            Arc::clone(input.row_type()),
            ancestors.to_vec(),
            0,
            quantum,
        )
        .unwrap();
        let bindings = ctx.create_bindings();
        bindings.set_row(0, input).unwrap();
        let mut cursor = api::cursor(
            &plan,
            &ctx,
            Box::new(crate::exec::bindings::SingletonQueryBindingsCursor::new(Some(bindings))),
        );
        cursor.open_top_level().unwrap();
        let mut rows = Vec::new();
        while let Some(row) = cursor.next().unwrap() {
            rows.push(row);
        }
        cursor.close_top_level().unwrap();
        rows
    }

    #[test]
    fn finds_ancestors_shallowest_first() {
        let coi = Coi::new();
        for quantum in [1, 4] {
            let rows = lookup(
                &coi,
                coi.item_row(111, 11, 1),
                &[Arc::clone(&coi.order_type), Arc::clone(&coi.customer_type)],
                quantum,
            );
            assert_eq!(rows, vec![coi.customer_row(1, "northbridge"), coi.order_row(11, 1, "ori")]);
        }
    }

    #[test]
    fn orphan_has_no_customer() {
        let coi = Coi::new();
        let rows = lookup(
            &coi,
            coi.item_row(311, 31, 3),
            &[Arc::clone(&coi.customer_type), Arc::clone(&coi.order_type)],
            1,
        );
        assert_eq!(rows, vec![coi.order_row(31, 3, "peter")]);
    }

    #[test]
    fn index_row_finds_its_table_row() {
        let coi = Coi::new();
        let rows = lookup(&coi, coi.customer_name_index_row("northbridge", 1), &[Arc::clone(&coi.customer_type)], 1);
        assert_eq!(rows, vec![coi.customer_row(1, "northbridge")]);
    }

    #[test]
    fn validation() {
        let coi = Coi::new();
        let make = |row_type: &Arc<RowType>, ancestors: Vec<Arc<RowType>>| {
            api::ancestor_lookup_nested(Arc::clone(&coi.group), Arc::clone(row_type), ancestors, 0, 1)
        };
        assert!(make(&coi.item_type, Vec::new()).is_err());
        assert!(make(&coi.order_type, vec![Arc::clone(&coi.order_type)]).is_err());
        assert!(matches!(
            make(&coi.order_type, vec![Arc::clone(&coi.item_type)]),
            Err(ExecError::NotAncestor { .. })
        ));
        assert!(matches!(
            make(&coi.address_type, vec![Arc::clone(&coi.order_type)]),
            Err(ExecError::NotAncestor { .. })
        ));
        assert!(make(&coi.customer_name_index, vec![Arc::clone(&coi.customer_type)]).is_ok());
    }
}
