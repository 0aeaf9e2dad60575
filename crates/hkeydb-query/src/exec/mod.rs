//! Query execution engine.
//!
//! Execution follows a **pull model**: the caller drives the root cursor,
//! which pulls from its inputs. Operators are immutable and shared; every
//! execution gets its own cursor tree.
//!
//! # Modules
//!
//! - [`bindings`] - Scoped parameter slots and bindings streams
//! - [`cursor`] - Cursor trait, lifecycle state machine, input wrappers
//! - [`context`] - Execution context (store, cancellation, stats, config)
//! - [`operators`] - Concrete operator implementations
//! - [`store`] - Store adapter seam and in-memory store
//! - [`expr`], [`ordering`], [`collation`] - Expression collaborators
//! - [`bloom`], [`hash_table`] - Structures stored in bindings slots

pub mod bindings;
pub mod bloom;
pub mod collation;
pub mod context;
pub mod cursor;
pub mod expr;
pub mod hash_table;
pub mod observe;
pub mod operator;
pub mod operators;
pub mod ordering;
pub mod store;

// Re-exports
pub use bindings::{
    BindingValue, MultipleQueryBindingsCursor, QueryBindings, QueryBindingsCursor,
    SingletonQueryBindingsCursor,
};
pub use bloom::BloomFilter;
pub use collation::{CaseInsensitiveCollator, Collator, CollatorRef};
pub use context::{CancellationToken, ExecutionConfig, ExecutionStats, QueryContext};
pub use cursor::{BoxedCursor, ColumnSelector, Cursor, CursorLifecycle, CursorState};
pub use expr::{Expression, ExpressionRef};
pub use hash_table::RowHashTable;
pub use observe::{ExecutionObserver, NoopObserver, TracingObserver};
pub use operator::{describe_plan, Operator, OperatorRef};
pub use ordering::{OrderingRef, OrderingSpec};
pub use store::{GroupCursor, MemoryStore, Sorter, StoreAdapter, StoreError};
