//! Property-based tests for hkey ordering.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::cmp::Ordering;

use hkeydb_core::{HKey, Value};
use proptest::prelude::*;

type Segments = Vec<(u32, Vec<i64>)>;

fn arb_segments() -> impl Strategy<Value = Segments> {
    prop::collection::vec((1u32..4, prop::collection::vec(-3i64..3, 0..3)), 0..4)
}

fn to_hkey(segments: &Segments) -> HKey {
    HKey::of(segments.iter().map(|(o, vs)| (*o, vs.iter().map(|v| Value::Int(*v)).collect::<Vec<_>>())))
}

proptest! {
    #[test]
    fn compare_matches_segment_order(a in arb_segments(), b in arb_segments()) {
        prop_assert_eq!(to_hkey(&a).cmp(&to_hkey(&b)), a.cmp(&b));
    }

    #[test]
    fn prefix_sorts_first_and_is_prefix(segments in arb_segments(), depth in 0usize..5) {
        let key = to_hkey(&segments);
        let prefix = key.prefix(depth);
        prop_assert!(prefix.is_prefix_of(&key));
        prop_assert_ne!(prefix.cmp(&key), Ordering::Greater);
    }

    #[test]
    fn bare_ordinal_bounds_child_rows(
        segments in arb_segments(),
        ordinal in 1u32..4,
        values in prop::collection::vec(-3i64..3, 0..3),
    ) {
        let parent = to_hkey(&segments);
        let mut lower = parent.clone();
        lower.extend_with_ordinal(ordinal);
        let mut child = parent.clone();
        child.extend_with_ordinal(ordinal);
        for v in &values {
            child.extend_with_value(Value::Int(*v));
        }
        prop_assert!(lower <= child);
        prop_assert!(lower.is_prefix_of(&child));
        prop_assert!(parent < lower);
    }
}
