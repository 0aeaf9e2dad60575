//! Scalar value types.

mod value;

pub use value::Value;
