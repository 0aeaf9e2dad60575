//! Error types for operator construction and execution.

use std::time::Duration;

use hkeydb_core::CoreError;
use thiserror::Error;

use crate::exec::cursor::CursorState;
use crate::exec::store::StoreError;

/// Errors raised while building or running operator trees.
///
/// The variants fall into four groups:
///
/// - construction-time validation (`InvalidArgument`, `NotAncestor`,
///   `SetWrongNumColumns`, `IncompatibleRowTypes`): raised by the factory
///   functions in [`api`](crate::api), never while iterating;
/// - cursor protocol violations (`WrongCursorState`, `JumpNotSupported`,
///   `BindingNotSet`, `BindingTypeMismatch`, `WrongBindingsDepth`): caller
///   bugs;
/// - interruptions (`QueryCancelled`, `QueryTimeout`): the normal way a
///   query is stopped early, see [`is_interruption`](Self::is_interruption);
/// - store and core errors, propagated unchanged.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A factory argument failed validation.
    #[error("invalid argument {argument}: {reason}")]
    InvalidArgument {
        /// Name of the argument.
        argument: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A row type was required to be an ancestor of another and isn't.
    #[error("{ancestor} is not an ancestor of {descendant}")]
    NotAncestor {
        /// The supposed ancestor.
        ancestor: String,
        /// The supposed descendant.
        descendant: String,
    },

    /// Set operation inputs have different widths.
    #[error("set operation inputs have different column counts: {left} and {right}")]
    SetWrongNumColumns {
        /// Field count of the left input.
        left: usize,
        /// Field count of the right input.
        right: usize,
    },

    /// Two row types that must match don't.
    #[error("incompatible row types {left} and {right}")]
    IncompatibleRowTypes {
        /// The first row type.
        left: String,
        /// The second row type.
        right: String,
    },

    /// A cursor method was called in the wrong state.
    #[error("cursor {operator} expected state {expected:?}, was {actual:?}")]
    WrongCursorState {
        /// Operator owning the cursor.
        operator: &'static str,
        /// The state the call requires.
        expected: CursorState,
        /// The state the cursor was in.
        actual: CursorState,
    },

    /// `jump` was called on a cursor that can't reposition.
    #[error("cursor {0} does not support jump")]
    JumpNotSupported(&'static str),

    /// A cursor was opened before any bindings were read.
    #[error("cursor {0} has no current bindings")]
    NoBindings(&'static str),

    /// A bindings slot was read before being set.
    #[error("binding {position} is not set")]
    BindingNotSet {
        /// Slot index.
        position: usize,
    },

    /// A bindings slot holds a different kind of value than requested.
    #[error("binding {position} does not hold a {expected}")]
    BindingTypeMismatch {
        /// Slot index.
        position: usize,
        /// Kind that was requested.
        expected: &'static str,
    },

    /// A pipelined cursor was opened on a scope at the wrong depth.
    #[error("cursor {operator} pipelines at depth {depth} but was opened at depth {actual}")]
    WrongBindingsDepth {
        /// Operator owning the cursor.
        operator: &'static str,
        /// Depth of the scopes the cursor creates.
        depth: u32,
        /// Depth of the scope it was opened on.
        actual: u32,
    },

    /// The query was cancelled.
    #[error("query cancelled")]
    QueryCancelled,

    /// The query ran past its deadline.
    #[error("query timed out after {elapsed:?}")]
    QueryTimeout {
        /// Time spent before the timeout was noticed.
        elapsed: Duration,
    },

    /// An error from the store adapter.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An error from the core data model.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A lock guarding shared cursor state was poisoned.
    #[error("lock poisoned")]
    LockPoisoned,
}

impl ExecError {
    /// Creates an [`InvalidArgument`](Self::InvalidArgument) error.
    #[must_use]
    pub fn invalid(argument: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument { argument, reason: reason.into() }
    }

    /// Whether this error is a cancellation or timeout.
    ///
    /// Cursors that see such an error close themselves before passing it on.
    #[must_use]
    pub const fn is_interruption(&self) -> bool {
        matches!(self, Self::QueryCancelled | Self::QueryTimeout { .. })
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_state_display() {
        let err = ExecError::WrongCursorState {
            operator: "Flatten_HKeyOrdered",
            expected: CursorState::Active,
            actual: CursorState::Closed,
        };
        let msg = err.to_string();
        assert!(msg.contains("Active"));
        assert!(msg.contains("Closed"));
        assert!(msg.contains("Flatten_HKeyOrdered"));
    }

    #[test]
    fn interruption_classification() {
        assert!(ExecError::QueryCancelled.is_interruption());
        assert!(ExecError::QueryTimeout { elapsed: Duration::from_millis(5) }.is_interruption());
        assert!(!ExecError::invalid("limit", "negative").is_interruption());
        assert!(!ExecError::from(StoreError::RowNotFound { hkey: "{1,1}".into() }).is_interruption());
    }

    #[test]
    fn invalid_argument_display() {
        let err = ExecError::invalid("depth", "must be positive");
        assert_eq!(err.to_string(), "invalid argument depth: must be positive");
    }
}
