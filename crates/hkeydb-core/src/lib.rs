//! `hkeydb` Core
//!
//! Data model shared by the execution layer of `hkeydb`: values, hierarchical
//! keys, group/table descriptors and immutable rows.
//!
//! # Overview
//!
//! Tables are organised into **groups**: trees of parent/child tables whose
//! rows are stored together, clustered by **hkey**. An hkey lists, for each
//! table on the path from the group root, the table's ordinal and key values,
//! so a row is immediately followed by all of its descendants.
//!
//! - **Values**: [`Value`], totally ordered with nulls first
//! - **Keys**: [`HKey`] and [`HKeySegment`]
//! - **Catalog**: [`Group`], [`Table`], [`RowType`]
//! - **Rows**: [`Row`], shared and immutable
//!
//! # Example
//!
//! ```
//! use hkeydb_core::{GroupBuilder, HKey, Row, RowType, Value};
//!
//! let mut builder = GroupBuilder::new("co");
//! let customer = builder.root("customer", &["cid"]);
//! let order = builder.child(&customer, "order", &["oid"]).unwrap();
//!
//! let c1 = Row::new(RowType::table(&customer), vec![Value::Int(1)], Some(HKey::of([(1, [Value::Int(1)])])));
//! let mut order_key = c1.hkey().cloned().unwrap();
//! order_key.extend_with_ordinal(order.ordinal());
//! order_key.extend_with_value(Value::Int(10));
//! let o10 = Row::new(RowType::table(&order), vec![Value::Int(10)], Some(order_key));
//!
//! assert!(c1.ancestor_of(&o10));
//! ```
//!
//! # Modules
//!
//! - [`types`] - Scalar values
//! - [`hkey`] - Hierarchical keys
//! - [`schema`] - Groups, tables and row types
//! - [`row`] - Rows
//! - [`error`] - Error types ([`CoreError`])

// Deny unwrap in library code to ensure proper error handling
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod hkey;
pub mod row;
pub mod schema;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use error::CoreError;
pub use hkey::{HKey, HKeySegment};
pub use row::Row;
pub use schema::{Group, GroupBuilder, RowType, RowTypeKind, Table};
pub use types::Value;
