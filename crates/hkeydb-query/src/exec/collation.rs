//! Collations and value hashing.
//!
//! A [`Collator`] replaces raw value comparison for one field, e.g. to
//! compare strings case-insensitively. Whatever a collator treats as equal
//! must hash equally, since merge operators compare with it and bloom
//! filters and hash tables hash with it.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

use hkeydb_core::Value;
use rustc_hash::FxHasher;

/// A comparison and hash function for values of one field.
pub trait Collator: Send + Sync + fmt::Debug {
    /// Compares two values.
    fn compare(&self, a: &Value, b: &Value) -> Ordering;

    /// Hashes a value consistently with [`compare`](Self::compare).
    fn hash(&self, value: &Value) -> u64;
}

/// A shared collator.
pub type CollatorRef = Arc<dyn Collator>;

/// Compares strings ignoring ASCII and Unicode case; other values compare
/// as usual.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaseInsensitiveCollator;

impl Collator for CaseInsensitiveCollator {
    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a, b) {
            (Value::String(a), Value::String(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            _ => a.cmp(b),
        }
    }

    fn hash(&self, value: &Value) -> u64 {
        match value {
            Value::String(s) => hash_value(&Value::String(s.to_lowercase())),
            other => hash_value(other),
        }
    }
}

/// Compares two values with an optional collator.
#[must_use]
pub fn compare_values(a: &Value, b: &Value, collator: Option<&dyn Collator>) -> Ordering {
    match collator {
        Some(collator) => collator.compare(a, b),
        None => a.cmp(b),
    }
}

/// Hashes a value with an optional collator.
#[must_use]
pub fn hash_with(value: &Value, collator: Option<&dyn Collator>) -> u64 {
    match collator {
        Some(collator) => collator.hash(value),
        None => hash_value(value),
    }
}

/// Hashes a value consistently with its equality: an integral float hashes
/// like the equal integer.
#[must_use]
pub fn hash_value(value: &Value) -> u64 {
    let mut hasher = FxHasher::default();
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(b) => {
            hasher.write_u8(1);
            hasher.write_u8(u8::from(*b));
        }
        Value::Int(i) => {
            hasher.write_u8(2);
            hasher.write_i64(*i);
        }
        Value::Float(f) => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            let integral = (f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .then_some(*f as i64);
            if let Some(i) = integral {
                hasher.write_u8(2);
                hasher.write_i64(i);
            } else {
                hasher.write_u8(3);
                hasher.write_u64(f.to_bits());
            }
        }
        Value::String(s) => {
            hasher.write_u8(4);
            hasher.write(s.as_bytes());
        }
        Value::Bytes(b) => {
            hasher.write_u8(5);
            hasher.write(b);
        }
    }
    hasher.finish()
}
