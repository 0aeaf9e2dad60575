//! `hkeydb` Query
//!
//! Physical execution for `hkeydb`: a tree of operators whose cursors pull
//! rows in hkey order, plus the bindings mechanism that lets operators
//! nested inside loops see per-iteration values.
//!
//! # Overview
//!
//! - **Bindings**: scoped slot tables ([`QueryBindings`]) and streams of them
//!   ([`QueryBindingsCursor`])
//! - **Cursors**: the open/next/close protocol ([`Cursor`]) with a strict
//!   state machine
//! - **Operators**: immutable plan nodes ([`Operator`]) built through the
//!   factory functions in [`api`]
//! - **Store**: the [`StoreAdapter`] seam and an in-memory implementation
//!
//! # Modules
//!
//! - [`api`] - Operator factories and option enums
//! - [`exec`] - Bindings, cursors, context and operators
//! - [`error`] - Error types ([`ExecError`])
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use hkeydb_core::{RowType, Row, Value};
//! use hkeydb_query::api;
//! use hkeydb_query::exec::QueryContext;
//!
//! let row_type = RowType::values("n", 1);
//! let rows = [1, 2, 3]
//!     .into_iter()
//!     .map(|n| Row::new(Arc::clone(&row_type), vec![Value::Int(n)], None))
//!     .collect();
//! let plan = api::limit_default(api::values_scan_default(rows, row_type), 2);
//!
//! let ctx = Arc::new(QueryContext::new());
//! let rows = api::execute(&plan, &ctx).unwrap();
//! assert_eq!(rows.len(), 2);
//! ```

// Deny unwrap in library code to ensure proper error handling
#![deny(clippy::unwrap_used)]

pub mod api;
pub mod error;
pub mod exec;

pub use error::{ExecError, ExecResult};
pub use exec::{
    BoxedCursor, Cursor, CursorState, Operator, OperatorRef, QueryBindings, QueryBindingsCursor,
    QueryContext, StoreAdapter,
};
