//! Operator trait.
//!
//! An [`Operator`] is an immutable plan node. It carries no per-execution
//! state, so one operator tree can be shared by any number of concurrent
//! executions; each execution asks it for a fresh [`Cursor`].

use std::fmt;
use std::sync::Arc;

use hkeydb_core::RowType;

use crate::exec::bindings::QueryBindingsCursor;
use crate::exec::context::QueryContext;
use crate::exec::cursor::BoxedCursor;

#[cfg(doc)]
use crate::exec::cursor::Cursor;

/// A plan node.
///
/// Operators are organized in a tree matching the physical plan. Cursors
/// keep an `Arc` of the operator that created them and read its
/// configuration from there, keeping their own fields for execution state
/// only.
pub trait Operator: Send + Sync + fmt::Debug {
    /// Creates a cursor that executes this operator for every scope read
    /// from `bindings`.
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor;

    /// Returns the name of this operator type.
    fn name(&self) -> &'static str;

    /// The type of the rows this operator produces, when it produces a
    /// single type.
    fn row_type(&self) -> Option<Arc<RowType>> {
        None
    }

    /// Direct inputs, outermost first.
    fn inputs(&self) -> Vec<Arc<dyn Operator>> {
        Vec::new()
    }
}

/// A shared operator for dynamic dispatch.
pub type OperatorRef = Arc<dyn Operator>;

/// Renders an operator tree, one operator per line, inputs indented.
#[must_use]
pub fn describe_plan(operator: &OperatorRef) -> String {
    fn walk(operator: &OperatorRef, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(operator.name());
        if let Some(row_type) = operator.row_type() {
            out.push_str(" -> ");
            out.push_str(&row_type.name());
        }
        out.push('\n');
        for input in operator.inputs() {
            walk(&input, depth + 1, out);
        }
    }
    let mut out = String::new();
    walk(operator, 0, &mut out);
    out
}
