//! Flatten_HKeyOrdered: joins parent rows with their children.
//!
//! The input is in hkey order, so a child immediately follows its parent
//! (possibly after other descendants). A parent is held until the next row
//! shows whether it had children; at most one held parent and a couple of
//! pending output rows exist at any time.

use std::collections::VecDeque;
use std::sync::Arc;

use hkeydb_core::{HKey, Row, RowType};

use crate::api::{FlattenOption, JoinType};
use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::QueryBindingsCursor;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, ChainedInput, Cursor, CursorLifecycle,
    CursorState,
};
use crate::exec::operator::{Operator, OperatorRef};

/// Flattens rows of a parent type with rows of its child type.
///
/// - A child with its parent present yields `flatten(parent, child)`, with
///   the child's hkey.
/// - With a left (or full) join, a parent without children yields
///   `flatten(parent, null)`. Its hkey is the parent's hkey extended with
///   the child ordinal and a null key, or with
///   [`FlattenOption::LeftJoinShortensHKey`] the parent's own hkey.
/// - With a right (or full) join, an orphan child yields
///   `flatten(null, child)`.
/// - Rows of other types pass through. Parent and child rows themselves are
///   dropped unless kept with [`FlattenOption::KeepParent`] and
///   [`FlattenOption::KeepChild`].
#[derive(Debug)]
pub struct FlattenHKeyOrdered {
    input: OperatorRef,
    parent_type: Arc<RowType>,
    child_type: Arc<RowType>,
    flatten_type: Arc<RowType>,
    left_join: bool,
    right_join: bool,
    keep_parent: bool,
    keep_child: bool,
    shorten_hkey: bool,
    child_ordinal: u32,
}

impl FlattenHKeyOrdered {
    pub(crate) fn new(
        input: OperatorRef,
        parent_type: &Arc<RowType>,
        child_type: &Arc<RowType>,
        join_type: JoinType,
        options: &[FlattenOption],
    ) -> ExecResult<Self> {
        if !parent_type.parent_of(child_type) {
            return Err(ExecError::invalid(
                "parent_type",
                format!("{parent_type} is not the parent of {child_type}"),
            ));
        }
        let child_ordinal = child_type
            .table_ref()
            .map(|t| t.ordinal())
            .ok_or_else(|| ExecError::invalid("child_type", "not a table row type"))?;
        Ok(Self {
            input,
            flatten_type: RowType::flattened(parent_type, child_type),
            parent_type: Arc::clone(parent_type),
            child_type: Arc::clone(child_type),
            left_join: matches!(join_type, JoinType::Left | JoinType::Full),
            right_join: matches!(join_type, JoinType::Right | JoinType::Full),
            keep_parent: options.contains(&FlattenOption::KeepParent),
            keep_child: options.contains(&FlattenOption::KeepChild),
            shorten_hkey: options.contains(&FlattenOption::LeftJoinShortensHKey),
            child_ordinal,
        })
    }

    /// The type of the flattened rows.
    #[must_use]
    pub fn flatten_type(&self) -> &Arc<RowType> {
        &self.flatten_type
    }

    fn is_parent(&self, row: &Row) -> bool {
        **row.row_type() == *self.parent_type
    }

    fn is_child(&self, row: &Row) -> bool {
        **row.row_type() == *self.child_type
    }
}

impl Operator for FlattenHKeyOrdered {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            input: ChainedInput::of(&self.input, ctx, bindings),
            parent: None,
            pending: VecDeque::with_capacity(ctx.config().max_pending_rows),
            left_join_hkey: HKey::new(),
            childless_parent: false,
            input_done: false,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Flatten_HKeyOrdered"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(Arc::clone(&self.flatten_type))
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.input)]
    }
}

struct Execution {
    plan: Arc<FlattenHKeyOrdered>,
    lifecycle: CursorLifecycle,
    input: ChainedInput,
    parent: Option<Row>,
    pending: VecDeque<Row>,
    /// hkey of a left join row for the current parent.
    left_join_hkey: HKey,
    childless_parent: bool,
    input_done: bool,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let mut output = self.pending.pop_front();
        while output.is_none() {
            let input_row = self.next_input()?;
            if input_row.is_none() && self.parent.is_none() {
                break;
            }
            if self.ready_for_left_join_row(input_row.as_ref()) {
                if let Some(parent) = self.parent.clone() {
                    self.generate_left_join_row(parent);
                }
            }
            match input_row {
                None => self.set_parent(None),
                Some(row) if self.plan.is_parent(&row) => {
                    if self.plan.keep_parent {
                        self.add_to_pending(row.clone());
                    }
                    self.set_parent(Some(row));
                }
                Some(row) if self.plan.is_child(&row) => {
                    if self.plan.keep_child {
                        self.add_to_pending(row.clone());
                    }
                    match self.parent.clone() {
                        Some(parent) if parent.ancestor_of(&row) => {
                            self.generate_inner_join_row(parent, row);
                            self.childless_parent = false;
                        }
                        _ => {
                            self.set_parent(None);
                            self.generate_right_join_row(row);
                        }
                    }
                }
                Some(row) => self.add_to_pending(row),
            }
            output = self.pending.pop_front();
        }
        Ok(self.lifecycle.emit(output))
    }

    fn next_input(&mut self) -> ExecResult<Option<Row>> {
        if self.input_done {
            return Ok(None);
        }
        let row = self.input.get_mut().next()?;
        self.input_done = row.is_none();
        Ok(row)
    }

    fn generate_inner_join_row(&mut self, parent: Row, child: Row) {
        let hkey = child.hkey().cloned();
        let row = Row::flattened(Arc::clone(&self.plan.flatten_type), Some(parent), Some(child), hkey);
        self.add_to_pending(row);
    }

    fn generate_left_join_row(&mut self, parent: Row) {
        if !self.plan.left_join {
            return;
        }
        let hkey = if self.plan.shorten_hkey {
            parent.hkey().cloned()
        } else {
            Some(self.left_join_hkey.clone())
        };
        let row = Row::flattened(Arc::clone(&self.plan.flatten_type), Some(parent), None, hkey);
        self.add_to_pending(row);
        self.childless_parent = false;
    }

    fn generate_right_join_row(&mut self, child: Row) {
        if self.plan.right_join {
            let hkey = child.hkey().cloned();
            let row = Row::flattened(Arc::clone(&self.plan.flatten_type), None, Some(child), hkey);
            self.add_to_pending(row);
        }
    }

    fn add_to_pending(&mut self, row: Row) {
        self.pending.push_back(row);
        debug_assert!(
            self.pending.len() <= self.lifecycle.ctx().config().max_pending_rows,
            "flatten pending queue overflow"
        );
    }

    fn set_parent(&mut self, parent: Option<Row>) {
        if self.plan.left_join {
            if let Some(row) = &parent {
                match row.hkey() {
                    Some(hkey) => self.left_join_hkey.copy_from(hkey),
                    None => self.left_join_hkey = HKey::new(),
                }
                self.left_join_hkey.extend_with_ordinal(self.plan.child_ordinal);
                self.left_join_hkey.extend_with_null();
                self.childless_parent = true;
            }
        }
        self.parent = parent;
    }

    fn ready_for_left_join_row(&self, input_row: Option<&Row>) -> bool {
        let Some(parent) = &self.parent else {
            return false;
        };
        if !(self.plan.left_join && self.childless_parent) {
            return false;
        }
        match input_row {
            None => true,
            Some(row) if self.plan.is_parent(row) || !parent.ancestor_of(row) => true,
            Some(row) if self.plan.is_child(row) => false,
            // A descendant of the parent that is not a child, e.g. a grandchild
            // or a row flattened from a child.
            Some(row) => row.hkey().map_or(true, |hkey| self.left_join_hkey < *hkey),
        }
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        self.parent = None;
        self.pending.clear();
        self.childless_parent = false;
        self.input_done = false;
        self.input.get_mut().open()
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        if self.lifecycle.close() {
            self.parent = None;
            self.pending.clear();
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

delegate_bindings!(Execution => input);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use hkeydb_core::testing::Coi;

    fn flatten(coi: &Coi, rows: Vec<Row>, join: JoinType, options: &[FlattenOption]) -> Vec<Row> {
        let input = api::values_scan_default(rows, Arc::clone(&coi.customer_type));
        let plan = api::flatten_hkey_ordered(input, &coi.customer_type, &coi.order_type, join, options).unwrap();
        api::execute(&plan, &Arc::new(QueryContext::new())).unwrap()
    }

    #[test]
    fn left_join_emits_childless_parent() {
        let coi = Coi::new();
        let c1 = coi.customer_row(1, "a");
        let o11 = coi.order_row(11, 1, "x");
        let c2 = coi.customer_row(2, "b");
        let out = flatten(&coi, vec![c1.clone(), o11.clone(), c2.clone()], JoinType::Left, &[]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sub_row(&coi.customer_type), Some(c1));
        assert_eq!(out[0].sub_row(&coi.order_type), Some(o11.clone()));
        assert_eq!(out[0].hkey(), o11.hkey());
        assert_eq!(out[1].sub_row(&coi.customer_type), Some(c2));
        assert!(out[1].value(2).is_null());

        let mut expected = coi.customer_hkey(2);
        expected.extend_with_ordinal(coi.order.ordinal());
        expected.extend_with_null();
        assert_eq!(out[1].hkey(), Some(&expected));
    }

    #[test]
    fn shortened_left_join_hkey() {
        let coi = Coi::new();
        let out = flatten(
            &coi,
            vec![coi.customer_row(2, "b")],
            JoinType::Left,
            &[FlattenOption::LeftJoinShortensHKey],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].hkey(), Some(&coi.customer_hkey(2)));
    }

    #[test]
    fn inner_join_drops_orphans_and_keeps_other_rows() {
        let coi = Coi::new();
        let rows = vec![
            coi.customer_row(1, "a"),
            coi.order_row(11, 1, "x"),
            coi.item_row(111, 11, 1),
            coi.order_row(31, 3, "orphan"),
        ];
        let out = flatten(&coi, rows, JoinType::Inner, &[]);
        assert_eq!(out.len(), 2);
        assert_eq!(**out[0].row_type(), *RowType::flattened(&coi.customer_type, &coi.order_type));
        assert_eq!(out[1], coi.item_row(111, 11, 1));
    }

    #[test]
    fn right_join_and_keep_options() {
        let coi = Coi::new();
        let rows = vec![coi.customer_row(1, "a"), coi.order_row(31, 3, "orphan")];
        let out = flatten(&coi, rows, JoinType::Full, &[FlattenOption::KeepParent, FlattenOption::KeepChild]);
        // c1 kept, o31 kept, left join row for c1, right join row for o31
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], coi.customer_row(1, "a"));
        assert!(out[1].sub_row(&coi.order_type).is_none());
        assert_eq!(out[2], coi.order_row(31, 3, "orphan"));
        assert!(out[3].sub_row(&coi.customer_type).is_none());
    }

    #[test]
    fn rejects_non_parent() {
        let coi = Coi::new();
        let input = api::values_scan_default(Vec::new(), Arc::clone(&coi.customer_type));
        let err = api::flatten_hkey_ordered(input, &coi.customer_type, &coi.item_type, JoinType::Inner, &[]);
        assert!(matches!(err, Err(ExecError::InvalidArgument { .. })));
    }
}
