//! Error types for the core crate.

use thiserror::Error;

/// Errors raised while building catalog descriptors and rows.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A descriptor failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A table name was used twice in one group.
    #[error("duplicate table: {0}")]
    DuplicateTable(String),

    /// A row was built with the wrong number of values.
    #[error("row type {row_type} has {expected} fields, got {actual}")]
    WrongFieldCount {
        /// Name of the row type.
        row_type: String,
        /// Fields declared by the row type.
        expected: usize,
        /// Values supplied.
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::WrongFieldCount { row_type: "customer".into(), expected: 2, actual: 3 };
        assert_eq!(err.to_string(), "row type customer has 2 fields, got 3");
        assert!(CoreError::DuplicateTable("order".into()).to_string().contains("order"));
    }
}
