//! BranchLookup_Nested: a subtree of the group related to a bound row.

use std::sync::Arc;

use hkeydb_core::{Group, HKey, Row, RowType, RowTypeKind, Table};

use crate::api::InputPreservationOption;
use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::{QueryBindings, QueryBindingsCursor};
use crate::exec::context::QueryContext;
use crate::exec::cursor::BoxedCursor;
use crate::exec::operator::Operator;
use crate::exec::operators::lookahead::{LookaheadCursor, LookupSlot};
use crate::exec::store::GroupCursor;

/// Finds the branch of the group that holds the output types, relative to
/// the row bound at `input_binding_position`.
///
/// The branch lies under the common ancestor of the input table and the
/// output tables. When all output types sit under one child of that
/// ancestor, only that child's subtree is scanned. Orphan rows of the branch
/// are returned even when the branch root row is missing.
///
/// With [`InputPreservationOption::KeepInput`] the source row is returned
/// too: before the branch when its table sorts before the branch in the
/// group, after it otherwise.
#[derive(Debug)]
pub struct BranchLookupNested {
    group: Arc<Group>,
    input_row_type: Arc<RowType>,
    source_row_type: Arc<RowType>,
    output_row_types: Vec<Arc<RowType>>,
    common_ancestor: Arc<Table>,
    /// Ordinal of the single child of the common ancestor holding every
    /// output type, if there is one.
    branch_root_ordinal: Option<u32>,
    keep_input: bool,
    input_precedes_branch: bool,
    input_binding_position: usize,
    lookahead_quantum: usize,
}

impl BranchLookupNested {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        group: Arc<Group>,
        input_row_type: Arc<RowType>,
        source_row_type: Arc<RowType>,
        ancestor_row_type: Option<Arc<RowType>>,
        output_row_types: Vec<Arc<RowType>>,
        option: InputPreservationOption,
        input_binding_position: usize,
        lookahead_quantum: usize,
    ) -> ExecResult<Self> {
        if output_row_types.is_empty() {
            return Err(ExecError::invalid("output_row_types", "at least one output type is required"));
        }
        let keep_input = option == InputPreservationOption::KeepInput;
        if keep_input && !source_row_type.is_table_type() {
            return Err(ExecError::invalid("option", "only table rows can be kept"));
        }
        let input_table = match source_row_type.kind() {
            RowTypeKind::Table(table) | RowTypeKind::Index { table, .. } => Arc::clone(table),
            _ => {
                return Err(ExecError::invalid(
                    "source_row_type",
                    format!("{source_row_type} is not a table or index row type"),
                ))
            }
        };
        if !group.contains(&input_table) {
            return Err(ExecError::invalid("source_row_type", format!("{input_table} is not in group {}", group.name())));
        }
        let mut common_ancestor = match &ancestor_row_type {
            None => Arc::clone(&input_table),
            Some(ancestor) => {
                let table = table_of(ancestor, "ancestor_row_type")?;
                if !table.is_ancestor_of(&input_table) {
                    return Err(ExecError::NotAncestor { ancestor: ancestor.name(), descendant: source_row_type.name() });
                }
                table
            }
        };
        let mut outputs = Vec::with_capacity(output_row_types.len());
        for output in &output_row_types {
            let table = table_of(output, "output_row_types")?;
            if !group.contains(&table) {
                return Err(ExecError::invalid("output_row_types", format!("{table} is not in group {}", group.name())));
            }
            match &ancestor_row_type {
                None => {
                    common_ancestor = Table::common_ancestor(&common_ancestor, &table).ok_or_else(|| {
                        ExecError::invalid("output_row_types", format!("{table} shares no ancestor with {input_table}"))
                    })?;
                }
                Some(ancestor) if !common_ancestor.is_ancestor_of(&table) => {
                    return Err(ExecError::NotAncestor { ancestor: ancestor.name(), descendant: output.name() });
                }
                Some(_) => {}
            }
            outputs.push((table, Arc::clone(output)));
        }
        outputs.sort_by_key(|(table, _)| table.depth());

        // The branch has a single root if every output table lies under the
        // same child of the common ancestor.
        let shallowest = &outputs[0].0;
        let branch_root = if **shallowest == *common_ancestor {
            None
        } else {
            shallowest
                .ancestor_at_depth(common_ancestor.depth() + 1)
                .filter(|root| outputs.iter().all(|(table, _)| root.is_ancestor_of(table)))
        };
        let input_precedes_branch = match &branch_root {
            None => false,
            Some(_) if *input_table == *common_ancestor => true,
            Some(root) => input_table
                .ancestor_at_depth(common_ancestor.depth() + 1)
                .is_some_and(|child| child.ordinal() < root.ordinal()),
        };

        Ok(Self {
            group,
            input_row_type,
            source_row_type,
            output_row_types: outputs.into_iter().map(|(_, row_type)| row_type).collect(),
            common_ancestor,
            branch_root_ordinal: branch_root.map(|root| root.ordinal()),
            keep_input,
            input_precedes_branch,
            input_binding_position,
            lookahead_quantum,
        })
    }

    /// Whether a kept input row is returned before its branch.
    #[must_use]
    pub fn input_precedes_branch(&self) -> bool {
        self.input_precedes_branch
    }

    fn is_output(&self, row: &Row) -> bool {
        self.output_row_types.iter().any(|t| **t == **row.row_type())
    }

    /// Key of the branch for `source`: its common ancestor's hkey, extended
    /// to the branch root table when there is a single root.
    fn branch_hkey(&self, source: &Row) -> Option<HKey> {
        let mut hkey = source.ancestor_hkey(&self.common_ancestor)?;
        if let Some(ordinal) = self.branch_root_ordinal {
            hkey.extend_with_ordinal(ordinal);
        }
        Some(hkey)
    }
}

fn table_of(row_type: &RowType, argument: &'static str) -> ExecResult<Arc<Table>> {
    match row_type.kind() {
        RowTypeKind::Table(table) => Ok(Arc::clone(table)),
        _ => Err(ExecError::invalid(argument, format!("{row_type} is not a table row type"))),
    }
}

impl Operator for BranchLookupNested {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        let slots = (0..ctx.config().effective_quantum(self.lookahead_quantum))
            .map(|_| BranchSlot {
                cursor: ctx.store().new_group_cursor(&self.group),
                plan: Arc::clone(&self),
                input_row: None,
                scanning: false,
            })
            .collect();
        Box::new(LookaheadCursor::new(self.name(), ctx, bindings, slots))
    }

    fn name(&self) -> &'static str {
        "BranchLookup_Nested"
    }
}

struct BranchSlot {
    plan: Arc<BranchLookupNested>,
    cursor: Box<dyn GroupCursor>,
    /// The source row, while it is still to be returned.
    input_row: Option<Row>,
    scanning: bool,
}

impl LookupSlot for BranchSlot {
    fn open(&mut self, bindings: &QueryBindings) -> ExecResult<()> {
        let plan = &self.plan;
        let bound = bindings.get_row(plan.input_binding_position)?;
        debug_assert!(*bound.row_type().as_ref() == *plan.input_row_type, "unexpected bound row {bound:?}");
        let source = if plan.input_row_type == plan.source_row_type {
            bound
        } else {
            bound.sub_row(&plan.source_row_type).ok_or_else(|| {
                ExecError::invalid("source_row_type", format!("{} not found in bound row", plan.source_row_type))
            })?
        };
        self.scanning = false;
        if let Some(hkey) = plan.branch_hkey(&source) {
            self.cursor.rebind(&hkey, true);
            self.cursor.open()?;
            self.scanning = true;
        }
        self.input_row = plan.keep_input.then_some(source);
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        if self.plan.input_precedes_branch && self.input_row.is_some() {
            return Ok(self.input_row.take());
        }
        while self.scanning {
            match self.cursor.next()? {
                Some(row) if self.plan.is_output(&row) => return Ok(Some(row)),
                Some(_) => {}
                None => {
                    self.cursor.close();
                    self.scanning = false;
                }
            }
        }
        Ok(self.input_row.take())
    }

    fn close(&mut self) {
        self.input_row = None;
        self.scanning = false;
        self.cursor.close();
    }
}
