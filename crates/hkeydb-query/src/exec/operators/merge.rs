//! Comparison shared by the ordered set operators.
//!
//! Each input row is split into leading *fixed* fields, which every row of
//! one scope shares (e.g. an equality prefix of an index scan), followed by
//! the ordering fields. The first `ascending.len()` ordering fields are
//! compared.

use std::sync::Arc;

use hkeydb_core::{Row, RowType, Value};

use crate::error::{ExecError, ExecResult};
use crate::exec::collation::CollatorRef;
use crate::exec::ordering::{adjust_for_direction, compare_fields};

#[derive(Debug)]
pub(crate) struct MergeComparator {
    pub(crate) left_fixed: usize,
    pub(crate) right_fixed: usize,
    ascending: Vec<bool>,
    collators: Option<Vec<Option<CollatorRef>>>,
}

impl MergeComparator {
    pub(crate) fn new(
        left_type: &RowType,
        right_type: &RowType,
        left_ordering_fields: usize,
        right_ordering_fields: usize,
        ascending: &[bool],
        collators: Option<Vec<Option<CollatorRef>>>,
    ) -> ExecResult<Self> {
        if left_ordering_fields > left_type.nfields() {
            return Err(ExecError::invalid(
                "left_ordering_fields",
                format!("{left_ordering_fields} exceeds the {} fields of {left_type}", left_type.nfields()),
            ));
        }
        if right_ordering_fields > right_type.nfields() {
            return Err(ExecError::invalid(
                "right_ordering_fields",
                format!("{right_ordering_fields} exceeds the {} fields of {right_type}", right_type.nfields()),
            ));
        }
        if ascending.len() > left_ordering_fields.min(right_ordering_fields) {
            return Err(ExecError::invalid(
                "ascending",
                format!(
                    "{} fields compared but only {} ordering fields",
                    ascending.len(),
                    left_ordering_fields.min(right_ordering_fields)
                ),
            ));
        }
        if let Some(collators) = &collators {
            if collators.len() != ascending.len() {
                return Err(ExecError::invalid(
                    "collators",
                    format!("{} collators for {} compared fields", collators.len(), ascending.len()),
                ));
            }
        }
        Ok(Self {
            left_fixed: left_type.nfields() - left_ordering_fields,
            right_fixed: right_type.nfields() - right_ordering_fields,
            ascending: ascending.to_vec(),
            collators,
        })
    }

    /// Number of compared fields.
    pub(crate) fn fields(&self) -> usize {
        self.ascending.len()
    }

    /// Compares a left row with a right row. Negative means the left row
    /// comes first in the merge order.
    pub(crate) fn compare(&self, left: &Row, right: &Row) -> i32 {
        self.compare_at(left, self.left_fixed, right, self.right_fixed)
    }

    /// Compares two rows whose compared fields start at the given offsets.
    pub(crate) fn compare_at(&self, a: &Row, a_fixed: usize, b: &Row, b_fixed: usize) -> i32 {
        let c = compare_fields(a, b, a_fixed, b_fixed, self.fields(), self.collators.as_deref());
        adjust_for_direction(c, &self.ascending)
    }

    /// A row of `row_type` positioned at `jump_row`'s compared fields: the
    /// fixed fields come from `fixed`, the rest are null.
    pub(crate) fn skip_row(
        &self,
        row_type: &Arc<RowType>,
        fixed: &[Value],
        jump_row: &Row,
        jump_fixed: usize,
    ) -> Row {
        let mut values = Vec::with_capacity(row_type.nfields());
        values.extend(fixed.iter().cloned());
        values.extend((0..self.fields()).map(|f| jump_row.value(jump_fixed + f).clone()));
        values.resize(row_type.nfields(), Value::Null);
        Row::new(Arc::clone(row_type), values, None)
    }
}

/// Checks the shape constraints shared by union, intersect and except when
/// rows of both inputs are interchangeable.
pub(crate) fn check_same_shape(
    left_type: &RowType,
    right_type: &RowType,
    left_ordering_fields: usize,
    right_ordering_fields: usize,
) -> ExecResult<()> {
    if left_type.nfields() != right_type.nfields() {
        return Err(ExecError::SetWrongNumColumns { left: left_type.nfields(), right: right_type.nfields() });
    }
    if left_ordering_fields != right_ordering_fields {
        return Err(ExecError::IncompatibleRowTypes { left: left_type.name(), right: right_type.name() });
    }
    Ok(())
}
