//! Hierarchical keys.
//!
//! An [`HKey`] locates a row inside a group: one [`HKeySegment`] per table on
//! the path from the group root down to the row's own table, each holding the
//! table's ordinal and its key column values. Rows of a group are stored in
//! hkey order, so every descendant of a row follows it directly.
//!
//! `HKey` is a plain owned value. Rows hold their own copy and lookup cursors
//! keep scratch keys in their own fields, so in-place extension through
//! `&mut HKey` can never be observed by another owner.

use std::cmp::Ordering;
use std::fmt;

use crate::types::Value;

/// One level of an [`HKey`]: a table ordinal followed by key values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HKeySegment {
    ordinal: u32,
    values: Vec<Value>,
}

impl HKeySegment {
    /// Creates a segment.
    #[must_use]
    pub fn new(ordinal: u32, values: Vec<Value>) -> Self {
        Self { ordinal, values }
    }

    /// The table ordinal of this segment.
    #[must_use]
    pub const fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// The key values of this segment.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.ordinal.cmp(&other.ordinal).then_with(|| self.values.cmp(&other.values))
    }
}

/// A hierarchical key: an ordered sequence of segments.
///
/// Ordering is lexicographic over segments, and a key sorts before every key
/// it is a prefix of. A key whose last segment has fewer values than a
/// matching segment of another key also sorts first, which is what makes a
/// key ending in a bare ordinal (see [`extend_with_ordinal`](Self::extend_with_ordinal))
/// the lower bound of that table's rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HKey {
    segments: Vec<HKeySegment>,
}

impl HKey {
    /// Creates an empty hkey.
    #[must_use]
    pub const fn new() -> Self {
        Self { segments: Vec::new() }
    }

    /// Creates an hkey from segments.
    #[must_use]
    pub fn from_segments(segments: Vec<HKeySegment>) -> Self {
        Self { segments }
    }

    /// Convenience constructor from `(ordinal, values)` pairs.
    #[must_use]
    pub fn of<I, V>(segments: I) -> Self
    where
        I: IntoIterator<Item = (u32, V)>,
        V: IntoIterator<Item = Value>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(|(ordinal, values)| HKeySegment::new(ordinal, values.into_iter().collect()))
                .collect(),
        }
    }

    /// Number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if there are no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The segments, root first.
    #[must_use]
    pub fn segments(&self) -> &[HKeySegment] {
        &self.segments
    }

    /// Ordinal of the deepest segment.
    #[must_use]
    pub fn last_ordinal(&self) -> Option<u32> {
        self.segments.last().map(HKeySegment::ordinal)
    }

    /// Starts a new segment for the table with the given ordinal.
    pub fn extend_with_ordinal(&mut self, ordinal: u32) {
        self.segments.push(HKeySegment::new(ordinal, Vec::new()));
    }

    /// Appends a key value to the deepest segment.
    ///
    /// On an empty key this starts an ordinal-0 segment; callers always
    /// extend with an ordinal first.
    pub fn extend_with_value(&mut self, value: Value) {
        match self.segments.last_mut() {
            Some(segment) => segment.values.push(value),
            None => self.segments.push(HKeySegment::new(0, vec![value])),
        }
    }

    /// Appends a null key value to the deepest segment.
    pub fn extend_with_null(&mut self) {
        self.extend_with_value(Value::Null);
    }

    /// Truncates the key to at most `depth` segments.
    pub fn shorten(&mut self, depth: usize) {
        self.segments.truncate(depth);
    }

    /// A copy of this key truncated to `depth` segments.
    #[must_use]
    pub fn prefix(&self, depth: usize) -> Self {
        let end = depth.min(self.segments.len());
        Self { segments: self.segments[..end].to_vec() }
    }

    /// Overwrites this key with the contents of `other`, reusing the allocation.
    pub fn copy_from(&mut self, other: &Self) {
        self.segments.clone_from(&other.segments);
    }

    /// Whether `self` is a prefix of `other`.
    ///
    /// Every segment but the last must match exactly; the last segment of
    /// `self` must have the same ordinal and its values must be a prefix of
    /// the corresponding segment's values. A key is a prefix of itself.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        let n = self.segments.len();
        if n == 0 {
            return true;
        }
        if n > other.segments.len() {
            return false;
        }
        if self.segments[..n - 1] != other.segments[..n - 1] {
            return false;
        }
        let mine = &self.segments[n - 1];
        let theirs = &other.segments[n - 1];
        mine.ordinal == theirs.ordinal
            && mine.values.len() <= theirs.values.len()
            && mine.values[..] == theirs.values[..mine.values.len()]
    }

    /// Lexicographic comparison over segments.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        for (a, b) in self.segments.iter().zip(&other.segments) {
            let c = a.compare(b);
            if c != Ordering::Equal {
                return c;
            }
        }
        self.segments.len().cmp(&other.segments.len())
    }
}

impl PartialOrd for HKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for HKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", segment.ordinal)?;
            for value in &segment.values {
                write!(f, ",{value}")?;
            }
        }
        f.write_str("}")
    }
}
