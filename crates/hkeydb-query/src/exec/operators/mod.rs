//! Concrete operator implementations.
//!
//! Operators are built through the factories in [`crate::api`]; the types
//! here are exposed so plans can be inspected.
//!
//! # Operator Categories
//!
//! - **Leaf operators**: [`values_scan`], [`group_scan`], [`emit_bound_row`]
//! - **Stream operators**: [`filter`], [`limit`], [`flatten`]
//! - **Merge operators**: [`union`], [`intersect`], [`except`]
//! - **Lookup operators**: [`ancestor_lookup`], [`branch_lookup`], [`group_lookup`]
//! - **Loops**: [`map_nested_loops`]
//! - **Sort operators**: [`sort_insertion_limited`], [`sort_general`]
//! - **Semi-joins**: [`bloom_filter`], [`hash_table_lookup`]

pub mod ancestor_lookup;
pub mod bloom_filter;
pub mod branch_lookup;
pub mod emit_bound_row;
pub mod except;
pub mod filter;
pub mod flatten;
pub mod group_lookup;
pub mod group_scan;
pub mod hash_table_lookup;
pub mod intersect;
pub mod limit;
pub(crate) mod lookahead;
pub mod map_nested_loops;
pub(crate) mod merge;
pub mod sort_general;
pub mod sort_insertion_limited;
pub mod union;
pub mod values_scan;

// Re-exports for convenience
pub use ancestor_lookup::AncestorLookupNested;
pub use bloom_filter::{SelectBloomFilter, UsingBloomFilter};
pub use branch_lookup::BranchLookupNested;
pub use emit_bound_row::EmitBoundRowNested;
pub use except::ExceptOrdered;
pub use filter::FilterDefault;
pub use flatten::FlattenHKeyOrdered;
pub use group_lookup::GroupLookupDefault;
pub use group_scan::GroupScanDefault;
pub use hash_table_lookup::{HashTableLookupDefault, UsingHashTable};
pub use intersect::IntersectOrdered;
pub use limit::LimitDefault;
pub use map_nested_loops::MapNestedLoops;
pub use sort_general::SortGeneral;
pub use sort_insertion_limited::SortInsertionLimited;
pub use union::UnionOrdered;
pub use values_scan::ValuesScanDefault;
