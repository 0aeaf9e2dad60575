//! Ordering specifications and field comparison.

use std::cmp::Ordering;
use std::sync::Arc;

use hkeydb_core::{Row, Value};

use crate::error::ExecResult;
use crate::exec::bindings::QueryBindings;
use crate::exec::collation::{compare_values, Collator, CollatorRef};
use crate::exec::expr::ExpressionRef;

/// One sort key: an expression, its direction and an optional collation.
#[derive(Debug, Clone)]
pub struct OrderingField {
    /// The key expression.
    pub expression: ExpressionRef,
    /// Whether the key sorts ascending.
    pub ascending: bool,
    /// Collation replacing raw comparison.
    pub collator: Option<CollatorRef>,
}

/// An ordered list of sort keys.
///
/// ```
/// use hkeydb_query::exec::expr::field;
/// use hkeydb_query::exec::OrderingSpec;
///
/// let ordering = OrderingSpec::new().append(field(0), true, None).append(field(2), false, None);
/// assert_eq!(ordering.len(), 2);
/// assert!(!ordering.all_ascending());
/// ```
#[derive(Debug, Clone, Default)]
pub struct OrderingSpec {
    fields: Vec<OrderingField>,
}

impl OrderingSpec {
    /// Creates an empty ordering.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key.
    #[must_use]
    pub fn append(mut self, expression: ExpressionRef, ascending: bool, collator: Option<CollatorRef>) -> Self {
        self.fields.push(OrderingField { expression, ascending, collator });
        self
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The keys.
    #[must_use]
    pub fn fields(&self) -> &[OrderingField] {
        &self.fields
    }

    /// Whether every key is ascending.
    #[must_use]
    pub fn all_ascending(&self) -> bool {
        self.fields.iter().all(|f| f.ascending)
    }

    /// Whether every key is descending.
    #[must_use]
    pub fn all_descending(&self) -> bool {
        self.fields.iter().all(|f| !f.ascending)
    }

    /// Evaluates every key against `row`.
    ///
    /// # Errors
    ///
    /// Propagates expression errors.
    pub fn evaluate(&self, row: &Row, bindings: &QueryBindings) -> ExecResult<Vec<Value>> {
        self.fields.iter().map(|f| f.expression.evaluate(row, bindings)).collect()
    }

    /// Compares two evaluated key vectors, honoring direction and collation.
    #[must_use]
    pub fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((field, x), y) in self.fields.iter().zip(a).zip(b) {
            let c = compare_values(x, y, field.collator.as_deref());
            if c != Ordering::Equal {
                return if field.ascending { c } else { c.reverse() };
            }
        }
        Ordering::Equal
    }
}

/// Compares `n` fields of two rows starting at `left_start` and
/// `right_start`.
///
/// Returns 0 when all compared fields are equal. Otherwise the sign gives
/// the direction of the first difference and the magnitude is the index of
/// the differing field plus one, so callers can flip the result per field.
#[must_use]
pub fn compare_fields(
    left: &Row,
    right: &Row,
    left_start: usize,
    right_start: usize,
    n: usize,
    collators: Option<&[Option<CollatorRef>]>,
) -> i32 {
    for i in 0..n {
        let collator: Option<&dyn Collator> =
            collators.and_then(|c| c.get(i)).and_then(|c| c.as_deref());
        let c = compare_values(left.value(left_start + i), right.value(right_start + i), collator);
        let field = i32::try_from(i + 1).unwrap_or(i32::MAX);
        match c {
            Ordering::Less => return -field,
            Ordering::Greater => return field,
            Ordering::Equal => {}
        }
    }
    0
}

/// Applies a per-field direction vector to a [`compare_fields`] result.
#[must_use]
pub fn adjust_for_direction(c: i32, ascending: &[bool]) -> i32 {
    if c == 0 {
        return 0;
    }
    let field = usize::try_from(c.unsigned_abs() - 1).unwrap_or(usize::MAX);
    if ascending.get(field).copied().unwrap_or(true) {
        c
    } else {
        -c
    }
}

/// A shared ordering.
pub type OrderingRef = Arc<OrderingSpec>;
