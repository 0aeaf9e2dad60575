//! Expressions evaluated by sort and filter operators.
//!
//! Expression evaluation proper lives outside the execution layer; operators
//! only need to evaluate an expression against a row in a bindings scope.
//! The implementations here cover field references, bound parameters and
//! literals.

use std::fmt;
use std::sync::Arc;

use hkeydb_core::{Row, Value};

use crate::error::ExecResult;
use crate::exec::bindings::QueryBindings;

/// An expression evaluated against a row.
pub trait Expression: Send + Sync + fmt::Debug {
    /// Evaluates the expression.
    ///
    /// # Errors
    ///
    /// Fails if a referenced binding is missing or of the wrong kind.
    fn evaluate(&self, row: &Row, bindings: &QueryBindings) -> ExecResult<Value>;
}

/// A shared expression.
pub type ExpressionRef = Arc<dyn Expression>;

/// The value of a field of the input row.
#[derive(Debug, Clone, Copy)]
pub struct Field(pub usize);

impl Expression for Field {
    fn evaluate(&self, row: &Row, _bindings: &QueryBindings) -> ExecResult<Value> {
        Ok(row.value(self.0).clone())
    }
}

/// A scalar parameter read from a bindings slot.
#[derive(Debug, Clone, Copy)]
pub struct Parameter(pub usize);

impl Expression for Parameter {
    fn evaluate(&self, _row: &Row, bindings: &QueryBindings) -> ExecResult<Value> {
        bindings.get_value(self.0)
    }
}

/// A field of a row bound in a bindings slot, typically an outer row.
#[derive(Debug, Clone, Copy)]
pub struct BoundField {
    /// Slot holding the row.
    pub position: usize,
    /// Field of that row.
    pub field: usize,
}

impl Expression for BoundField {
    fn evaluate(&self, _row: &Row, bindings: &QueryBindings) -> ExecResult<Value> {
        Ok(bindings.get_row(self.position)?.value(self.field).clone())
    }
}

/// A constant.
#[derive(Debug, Clone)]
pub struct Literal(pub Value);

impl Expression for Literal {
    fn evaluate(&self, _row: &Row, _bindings: &QueryBindings) -> ExecResult<Value> {
        Ok(self.0.clone())
    }
}

/// Shorthand for a shared [`Field`] expression.
#[must_use]
pub fn field(index: usize) -> ExpressionRef {
    Arc::new(Field(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hkeydb_core::RowType;

    #[test]
    fn evaluate_expressions() {
        let row_type = RowType::values("t", 2);
        let row = Row::new(row_type, vec![Value::Int(1), Value::from("x")], None);
        let outer = Row::new(RowType::values("o", 1), vec![Value::Int(9)], None);
        let bindings = QueryBindings::root();
        bindings.set_row(0, outer).unwrap();
        bindings.set_value(1, Value::Int(5)).unwrap();

        assert_eq!(Field(1).evaluate(&row, &bindings).unwrap(), Value::from("x"));
        assert_eq!(Field(7).evaluate(&row, &bindings).unwrap(), Value::Null);
        assert_eq!(Parameter(1).evaluate(&row, &bindings).unwrap(), Value::Int(5));
        assert_eq!(BoundField { position: 0, field: 0 }.evaluate(&row, &bindings).unwrap(), Value::Int(9));
        assert_eq!(Literal(Value::Bool(true)).evaluate(&row, &bindings).unwrap(), Value::Bool(true));
        assert!(Parameter(0).evaluate(&row, &bindings).is_err());
    }
}
