//! GroupLookup_Default: ancestors and descendants of each input row.
//!
//! For every input row of the input type the operator emits, in hkey order,
//! the rows of the requested ancestor types, then the input row itself when
//! it is kept, then the requested descendant rows. Rows of other types pass
//! through when input is kept.
//!
//! The cursor reads its input ahead: up to `quantum` input rows, possibly
//! from later scopes of the same depth, have their store lookups started
//! before the rows of the first one are consumed. Scopes met while reading
//! ahead are queued and handed out again by `next_bindings` in their
//! original order, so consumers see the same scopes in the same order as
//! without lookahead.

use std::collections::VecDeque;
use std::sync::Arc;

use hkeydb_core::{Group, HKey, Row, RowType, RowTypeKind, Table};
use tracing::{debug, trace};

use crate::api::InputPreservationOption;
use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::{QueryBindings, QueryBindingsCursor};
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, BoxedCursor, ChainedInput, Cursor, CursorLifecycle, CursorState,
};
use crate::exec::operator::{Operator, OperatorRef};
use crate::exec::store::GroupCursor;

#[derive(Debug)]
enum BranchRoot {
    /// All descendant types lie under this child of the input table.
    Child(Arc<Table>),
    /// Descendant types lie under several children of the input table.
    Input,
}

/// Looks up related group rows for each row of its input.
#[derive(Debug)]
pub struct GroupLookupDefault {
    input: OperatorRef,
    group: Arc<Group>,
    input_row_type: Arc<RowType>,
    /// Ancestor tables, shallowest first.
    ancestors: Vec<Arc<Table>>,
    /// Descendant output types, shallowest first; empty when there are none.
    branch_row_types: Vec<Arc<RowType>>,
    branch_root_ordinal: Option<u32>,
    keep_input: bool,
    lookahead_quantum: usize,
}

impl GroupLookupDefault {
    pub(crate) fn new(
        input: OperatorRef,
        group: Arc<Group>,
        input_row_type: Arc<RowType>,
        output_row_types: &[Arc<RowType>],
        option: InputPreservationOption,
        lookahead_quantum: usize,
    ) -> ExecResult<Self> {
        if output_row_types.is_empty() {
            return Err(ExecError::invalid("output_row_types", "at least one output type is required"));
        }
        let keep_input = option == InputPreservationOption::KeepInput;
        let input_table = match input_row_type.kind() {
            RowTypeKind::Table(table) => Arc::clone(table),
            RowTypeKind::Index { table, .. } if !keep_input => Arc::clone(table),
            RowTypeKind::Index { .. } => {
                return Err(ExecError::invalid("option", "index rows cannot be kept"));
            }
            _ => {
                return Err(ExecError::invalid(
                    "input_row_type",
                    format!("{input_row_type} is not a table or index row type"),
                ))
            }
        };
        if !group.contains(&input_table) {
            return Err(ExecError::invalid("input_row_type", format!("{input_table} is not in group {}", group.name())));
        }

        let mut ancestors = Vec::new();
        let mut branch: Vec<(Arc<Table>, Arc<RowType>)> = Vec::new();
        let mut branch_root: Option<BranchRoot> = None;
        let mut outputs_input_table = false;
        for output in output_row_types {
            let RowTypeKind::Table(table) = output.kind() else {
                return Err(ExecError::invalid("output_row_types", format!("{output} is not a table row type")));
            };
            if *table == input_table {
                if keep_input {
                    return Err(ExecError::invalid("option", "the input table cannot be both kept and looked up"));
                }
                outputs_input_table = true;
            } else if table.is_ancestor_of(&input_table) {
                ancestors.push(Arc::clone(table));
            } else if input_table.is_ancestor_of(table) {
                branch.push((Arc::clone(table), Arc::clone(output)));
                if !matches!(branch_root, Some(BranchRoot::Input)) {
                    let child = table.ancestor_at_depth(input_table.depth() + 1);
                    branch_root = match (branch_root, child) {
                        (None, Some(child)) => Some(BranchRoot::Child(child)),
                        (Some(BranchRoot::Child(root)), Some(child)) if root == child => Some(BranchRoot::Child(root)),
                        _ => Some(BranchRoot::Input),
                    };
                }
            } else {
                return Err(ExecError::invalid(
                    "output_row_types",
                    format!("{table} is neither an ancestor nor a descendant of {input_table}"),
                ));
            }
        }
        if outputs_input_table {
            if matches!(branch_root, Some(BranchRoot::Input)) {
                branch.push((Arc::clone(&input_table), RowType::table(&input_table)));
            } else {
                ancestors.push(Arc::clone(&input_table));
            }
        }
        ancestors.sort_by_key(|table| table.depth());
        branch.sort_by_key(|(table, _)| table.depth());
        let branch_root_ordinal = match branch_root {
            Some(BranchRoot::Child(root)) => Some(root.ordinal()),
            _ => None,
        };

        Ok(Self {
            input,
            group,
            input_row_type,
            ancestors,
            branch_row_types: branch.into_iter().map(|(_, row_type)| row_type).collect(),
            branch_root_ordinal,
            keep_input,
            lookahead_quantum,
        })
    }

    fn has_branch(&self) -> bool {
        !self.branch_row_types.is_empty()
    }

    /// Number of input rows looked up ahead. The configured quantum counts
    /// store cursors, and each input row uses one per ancestor plus one for
    /// the branch.
    fn ring_size(&self, ctx: &QueryContext) -> usize {
        let per_row = self.ancestors.len() + usize::from(self.has_branch());
        ctx.config().effective_quantum(self.lookahead_quantum).div_ceil(per_row.max(1))
    }
}

impl Operator for GroupLookupDefault {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        let ring = (0..self.ring_size(ctx)).map(|_| RowLookup::new(&self, ctx)).collect();
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            input: ChainedInput::of(&self.input, ctx, bindings),
            ring,
            current_index: 0,
            next_index: 0,
            pending_bindings: VecDeque::new(),
            current_bindings: None,
            next_bindings: None,
            new_bindings: false,
            bindings_exhausted: false,
            done: true,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "GroupLookup_Default"
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.input)]
    }
}

/// Lookups for one input row. A loaded entry counts as a lookup slot in use.
struct RowLookup {
    plan: Arc<GroupLookupDefault>,
    ctx: Arc<QueryContext>,
    row: Option<Row>,
    bindings: Option<QueryBindings>,
    ancestor_cursors: Vec<Box<dyn GroupCursor>>,
    ancestor_hkeys: Vec<Option<HKey>>,
    branch_cursor: Option<Box<dyn GroupCursor>>,
    branch_open: bool,
    /// Position in ancestors, then the input row, then the branch.
    step: usize,
}

impl RowLookup {
    fn new(plan: &Arc<GroupLookupDefault>, ctx: &Arc<QueryContext>) -> Self {
        let store = ctx.store();
        Self {
            row: None,
            bindings: None,
            ancestor_cursors: plan.ancestors.iter().map(|_| store.new_group_cursor(&plan.group)).collect(),
            ancestor_hkeys: vec![None; plan.ancestors.len()],
            branch_cursor: plan.has_branch().then(|| store.new_group_cursor(&plan.group)),
            branch_open: false,
            step: 0,
            plan: Arc::clone(plan),
            ctx: Arc::clone(ctx),
        }
    }

    fn is_loaded(&self) -> bool {
        self.row.is_some()
    }

    fn belongs_to(&self, bindings: Option<&QueryBindings>) -> bool {
        match (&self.bindings, bindings) {
            (Some(mine), Some(other)) => mine.ptr_eq(other),
            _ => false,
        }
    }

    fn start(&mut self, row: Row, bindings: QueryBindings) -> ExecResult<()> {
        self.step = 0;
        if *row.row_type().as_ref() == *self.plan.input_row_type {
            for (i, table) in self.plan.ancestors.iter().enumerate() {
                self.ancestor_hkeys[i] = row.ancestor_hkey(table);
                if let Some(hkey) = &self.ancestor_hkeys[i] {
                    self.ancestor_cursors[i].rebind(hkey, false);
                    self.ancestor_cursors[i].open()?;
                }
            }
            if let (Some(cursor), Some(hkey)) = (self.branch_cursor.as_mut(), row.hkey()) {
                let mut hkey = hkey.clone();
                if let Some(ordinal) = self.plan.branch_root_ordinal {
                    hkey.extend_with_ordinal(ordinal);
                }
                cursor.rebind(&hkey, true);
                cursor.open()?;
                self.branch_open = true;
            }
        }
        if self.row.is_none() {
            self.ctx.record_lookup_slot_taken();
        }
        self.row = Some(row);
        self.bindings = Some(bindings);
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let nancestors = self.ancestor_cursors.len();
        loop {
            if self.step < nancestors {
                let i = self.step;
                self.step += 1;
                let Some(hkey) = self.ancestor_hkeys[i].take() else {
                    continue;
                };
                let found = self.ancestor_cursors[i].next()?;
                self.ancestor_cursors[i].close();
                if let Some(row) = found.filter(|row| row.hkey() == Some(&hkey)) {
                    self.ctx.record_rows_read(1);
                    return Ok(Some(row));
                }
            } else if self.step == nancestors {
                self.step += 1;
                if self.plan.keep_input {
                    return Ok(self.row.clone());
                }
            } else if self.branch_open {
                let Some(cursor) = self.branch_cursor.as_mut() else {
                    self.branch_open = false;
                    continue;
                };
                match cursor.next()? {
                    Some(row) if self.plan.branch_row_types.iter().any(|t| **t == **row.row_type()) => {
                        self.ctx.record_rows_read(1);
                        return Ok(Some(row));
                    }
                    Some(_) => {}
                    None => {
                        cursor.close();
                        self.branch_open = false;
                    }
                }
            } else {
                return Ok(None);
            }
        }
    }

    fn clear(&mut self) {
        if self.row.take().is_some() {
            self.ctx.record_lookup_slot_returned();
        }
        self.bindings = None;
        for (cursor, hkey) in self.ancestor_cursors.iter_mut().zip(&mut self.ancestor_hkeys) {
            cursor.close();
            *hkey = None;
        }
        if let Some(cursor) = self.branch_cursor.as_mut() {
            cursor.close();
        }
        self.branch_open = false;
    }
}

struct Execution {
    plan: Arc<GroupLookupDefault>,
    lifecycle: CursorLifecycle,
    input: ChainedInput,
    ring: Vec<RowLookup>,
    current_index: usize,
    next_index: usize,
    /// Scopes read from the input while looking ahead, not yet handed out.
    pending_bindings: VecDeque<QueryBindings>,
    current_bindings: Option<QueryBindings>,
    /// Scope the input is currently open for.
    next_bindings: Option<QueryBindings>,
    /// `current_bindings` came straight from the input, which has not been
    /// opened for it yet.
    new_bindings: bool,
    bindings_exhausted: bool,
    /// The current scope has no more rows.
    done: bool,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let mut output = None;
        while !self.done && output.is_none() {
            self.fill()?;
            let current_bindings = self.current_bindings.clone();
            let lookup = &mut self.ring[self.current_index];
            if !lookup.is_loaded() || !lookup.belongs_to(current_bindings.as_ref()) {
                self.done = true;
            } else if let Some(row) = lookup.next()? {
                output = Some(row);
            } else {
                lookup.clear();
                self.current_index = (self.current_index + 1) % self.ring.len();
            }
        }
        Ok(self.lifecycle.emit(output))
    }

    /// Reads input rows into free ring entries, crossing into later scopes
    /// of the current depth, and starts their lookups.
    fn fill(&mut self) -> ExecResult<()> {
        let Some(depth) = self.current_bindings.as_ref().map(QueryBindings::depth) else {
            return Ok(());
        };
        while !self.bindings_exhausted && !self.ring[self.next_index].is_loaded() {
            if self.next_bindings.is_none() {
                if self.new_bindings {
                    self.next_bindings = self.current_bindings.clone();
                    self.new_bindings = false;
                }
                while self.next_bindings.as_ref().map_or(true, |b| b.depth() != depth) {
                    let Some(bindings) = self.input.next_bindings()? else {
                        self.bindings_exhausted = true;
                        return Ok(());
                    };
                    trace!(depth = bindings.depth(), "group lookup reading ahead into next scope");
                    self.pending_bindings.push_back(bindings.clone());
                    self.next_bindings = Some(bindings);
                }
                self.input.get_mut().open()?;
            }
            match self.input.get_mut().next()? {
                None => {
                    self.input.get_mut().close()?;
                    self.next_bindings = None;
                }
                Some(row) => {
                    let Some(bindings) = self.next_bindings.clone() else {
                        return Err(ExecError::NoBindings(self.plan.name()));
                    };
                    self.ring[self.next_index].start(row, bindings)?;
                    self.next_index = (self.next_index + 1) % self.ring.len();
                }
            }
        }
        Ok(())
    }

    /// Drops loaded rows, starting at the current one, while `discard`
    /// holds for their scope.
    fn discard_while(&mut self, discard: impl Fn(&QueryBindings) -> bool) -> usize {
        let mut discarded = 0;
        while discarded < self.ring.len() {
            let lookup = &mut self.ring[self.current_index];
            if !lookup.bindings.as_ref().is_some_and(&discard) {
                break;
            }
            lookup.clear();
            self.current_index = (self.current_index + 1) % self.ring.len();
            discarded += 1;
        }
        discarded
    }

    fn clear_bindings(&mut self) -> ExecResult<()> {
        if self.next_bindings.take().is_some() {
            self.input.get_mut().close()?;
        }
        self.ring.iter_mut().for_each(RowLookup::clear);
        self.pending_bindings.clear();
        self.current_bindings = None;
        self.new_bindings = false;
        self.current_index = 0;
        self.next_index = 0;
        Ok(())
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        if self.current_bindings.is_none() {
            return Err(ExecError::NoBindings(self.plan.name()));
        }
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        if !self.lifecycle.close() {
            return Ok(());
        }
        self.done = true;
        let Some(current) = self.current_bindings.clone() else {
            return Ok(());
        };
        // Rows of the current scope are not wanted anymore, nor is the rest
        // of its input.
        self.discard_while(|b| b.ptr_eq(&current));
        if self.next_bindings.as_ref().is_some_and(|b| b.ptr_eq(&current)) {
            self.next_bindings = None;
            self.input.get_mut().close()?;
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

impl QueryBindingsCursor for Execution {
    fn open_bindings(&mut self) -> ExecResult<()> {
        self.clear_bindings()?;
        self.bindings_exhausted = false;
        self.input.open_bindings()
    }

    fn next_bindings(&mut self) -> ExecResult<Option<QueryBindings>> {
        if let Some(bindings) = self.pending_bindings.pop_front() {
            self.current_bindings = Some(bindings);
            self.new_bindings = false;
        } else {
            self.current_bindings = self.input.next_bindings()?;
            if self.current_bindings.is_none() {
                self.bindings_exhausted = true;
            }
            self.new_bindings = true;
        }
        Ok(self.current_bindings.clone())
    }

    fn close_bindings(&mut self) -> ExecResult<()> {
        self.input.close_bindings()?;
        self.clear_bindings()
    }

    fn cancel_bindings(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
        while self.pending_bindings.front().is_some_and(|b| b.descends_from(bindings)) {
            self.pending_bindings.pop_front();
        }
        let discarded = self.discard_while(|b| b.descends_from(bindings));
        if discarded > 0 {
            debug!(discarded, depth = bindings.depth(), "discarded looked-up rows of cancelled scope");
        }
        self.current_bindings = None;
        self.new_bindings = false;
        if self.next_bindings.as_ref().is_some_and(|b| b.descends_from(bindings)) {
            self.next_bindings = None;
            self.input.get_mut().close()?;
        }
        self.done = true;
        self.input.cancel_bindings(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hkeydb_core::testing::Coi;

    fn make(
        coi: &Coi,
        input_type: &Arc<RowType>,
        outputs: &[&Arc<RowType>],
        option: InputPreservationOption,
    ) -> ExecResult<GroupLookupDefault> {
        let input = crate::api::values_scan_default(Vec::new(), Arc::clone(input_type));
        let outputs: Vec<_> = outputs.iter().map(|t| Arc::clone(t)).collect();
        GroupLookupDefault::new(input, Arc::clone(&coi.group), Arc::clone(input_type), &outputs, option, 1)
    }

    #[test]
    fn classifies_outputs() {
        let coi = Coi::new();
        let lookup = make(
            &coi,
            &coi.order_type,
            &[&coi.item_type, &coi.customer_type],
            InputPreservationOption::KeepInput,
        )
        .unwrap();
        assert_eq!(lookup.ancestors.len(), 1);
        assert_eq!(lookup.branch_row_types.len(), 1);
        assert_eq!(lookup.branch_root_ordinal, Some(coi.item.ordinal()));
    }

    #[test]
    fn several_children_scan_whole_subtree() {
        let coi = Coi::new();
        let lookup = make(
            &coi,
            &coi.customer_type,
            &[&coi.order_type, &coi.address_type, &coi.customer_type],
            InputPreservationOption::DiscardInput,
        )
        .unwrap();
        assert_eq!(lookup.branch_root_ordinal, None);
        assert!(lookup.ancestors.is_empty());
        assert_eq!(lookup.branch_row_types.len(), 3);
    }

    #[test]
    fn index_input_looks_up_own_table_as_ancestor() {
        let coi = Coi::new();
        let lookup = make(
            &coi,
            &coi.order_salesman_index,
            &[&coi.order_type, &coi.customer_type],
            InputPreservationOption::DiscardInput,
        )
        .unwrap();
        assert_eq!(lookup.ancestors.len(), 2);
        assert_eq!(lookup.ancestors[0].name(), "customer");
    }

    #[test]
    fn validation() {
        let coi = Coi::new();
        assert!(make(&coi, &coi.order_type, &[], InputPreservationOption::DiscardInput).is_err());
        assert!(make(&coi, &coi.order_type, &[&coi.address_type], InputPreservationOption::DiscardInput).is_err());
        assert!(make(&coi, &coi.order_type, &[&coi.order_type], InputPreservationOption::KeepInput).is_err());
        assert!(make(&coi, &coi.customer_name_index, &[&coi.customer_type], InputPreservationOption::KeepInput)
            .is_err());
    }
}
