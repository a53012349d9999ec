//! Fragmented ranges: dense sets of integers stored as sorted extents
//!
//! A [`FragmentedRange`] holds disjoint, non-touching `(start, length)` extents
//! sorted by start. Every mutation re-normalizes, so the representation is
//! always minimal and two ranges holding the same integers compare equal.
//!
//! ```text
//! add(4, 10)  -> [4..14)
//! remove(6)   -> [4..6) [7..14)
//! add(20, 2)  -> [4..6) [7..14) [20..22)
//! repr        -> [4,2, 7,7, 20,2]
//! ```

use crate::error::{BunkrError, Result};
use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A contiguous run of integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    /// First integer in the run
    pub start: i64,
    /// Number of integers in the run (always > 0 once stored)
    pub length: i64,
}

impl Extent {
    pub fn new(start: i64, length: i64) -> Self {
        Extent { start, length }
    }

    /// One past the last contained integer
    pub fn end(&self) -> i64 {
        self.start + self.length
    }

    /// Last contained integer
    pub fn last(&self) -> i64 {
        self.end() - 1
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.start && value < self.end()
    }

    /// True when the two extents overlap or touch and can be merged into one
    pub fn can_coalesce(&self, other: &Extent) -> bool {
        self.start <= other.end() && other.start <= self.end()
    }

    /// Smallest extent covering both
    pub fn coalesce(&self, other: &Extent) -> Extent {
        let start = self.start.min(other.start);
        let end = self.end().max(other.end());
        Extent::new(start, end - start)
    }
}

/// Sorted, merged set of integer extents
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FragmentedRange {
    extents: Vec<Extent>,
}

impl FragmentedRange {
    /// Create an empty range
    pub fn new() -> Self {
        FragmentedRange {
            extents: Vec::new(),
        }
    }

    /// Create a range holding `[start, start + length)`
    pub fn with_range(start: i64, length: i64) -> Self {
        let mut range = FragmentedRange::new();
        range.add(start, length);
        range
    }

    /// Rebuild a range from its flat `start, length, ...` representation.
    ///
    /// Pairs may arrive in any order and may touch; they are normalized.
    /// Odd-length input, a non-positive length, or an extent ending past
    /// `i64::MAX` is rejected.
    pub fn from_repr(repr: &[i64]) -> Result<Self> {
        if repr.len() % 2 != 0 {
            return Err(BunkrError::CorruptMetadata(format!(
                "range representation has odd length {}",
                repr.len()
            )));
        }
        let mut range = FragmentedRange::new();
        for pair in repr.chunks_exact(2) {
            if pair[1] <= 0 {
                return Err(BunkrError::CorruptMetadata(format!(
                    "range length must be positive, got {}",
                    pair[1]
                )));
            }
            if pair[0].checked_add(pair[1]).is_none() {
                return Err(BunkrError::CorruptMetadata(format!(
                    "range extent {},{} overflows",
                    pair[0], pair[1]
                )));
            }
            range.add(pair[0], pair[1]);
        }
        Ok(range)
    }

    /// Flat `start, length, ...` representation, ascending by start
    pub fn to_repr(&self) -> Vec<i64> {
        self.extents
            .iter()
            .flat_map(|e| [e.start, e.length])
            .collect()
    }

    /// Add the single integer `value`
    pub fn add_one(&mut self, value: i64) {
        self.add(value, 1);
    }

    /// Add `[start, start + length)`, merging with any overlapping or touching extent.
    ///
    /// A non-positive `length` adds nothing.
    pub fn add(&mut self, start: i64, length: i64) {
        if length <= 0 {
            return;
        }
        let mut merged = Extent::new(start, length);

        // first extent that could overlap or touch
        let lo = self.extents.partition_point(|e| e.end() < merged.start);
        let mut hi = lo;
        while hi < self.extents.len() && merged.can_coalesce(&self.extents[hi]) {
            merged = merged.coalesce(&self.extents[hi]);
            hi += 1;
        }
        self.extents.splice(lo..hi, std::iter::once(merged));
    }

    /// Remove the single integer `value`; absent values are ignored
    pub fn remove(&mut self, value: i64) {
        self.remove_range(value, 1);
    }

    /// Remove every integer in `[start, start + length)`, splitting extents as needed
    pub fn remove_range(&mut self, start: i64, length: i64) {
        if length <= 0 {
            return;
        }
        let q_end = start + length;
        let lo = self.extents.partition_point(|e| e.end() <= start);
        let mut hi = lo;
        let mut survivors = Vec::with_capacity(2);
        while hi < self.extents.len() && self.extents[hi].start < q_end {
            let e = self.extents[hi];
            if e.start < start {
                survivors.push(Extent::new(e.start, start - e.start));
            }
            if e.end() > q_end {
                survivors.push(Extent::new(q_end, e.end() - q_end));
            }
            hi += 1;
        }
        self.extents.splice(lo..hi, survivors);
    }

    /// Merge every integer of `other` into this range
    pub fn union(&mut self, other: &FragmentedRange) {
        for e in &other.extents {
            self.add(e.start, e.length);
        }
    }

    /// Remove every integer of `other` from this range
    pub fn subtract(&mut self, other: &FragmentedRange) {
        for e in &other.extents {
            self.remove_range(e.start, e.length);
        }
    }

    /// New range holding the union of `a` and `b`
    pub fn union_of(a: &FragmentedRange, b: &FragmentedRange) -> FragmentedRange {
        let mut out = a.clone();
        out.union(b);
        out
    }

    /// New range holding `a` minus `b`
    pub fn difference(a: &FragmentedRange, b: &FragmentedRange) -> FragmentedRange {
        let mut out = a.clone();
        out.subtract(b);
        out
    }

    /// The complement of this range over `[min, max]`: the gaps between extents
    pub fn invert(&self) -> FragmentedRange {
        let extents = self
            .extents
            .windows(2)
            .map(|w| Extent::new(w[0].end(), w[1].start - w[0].end()))
            .collect();
        FragmentedRange { extents }
    }

    pub fn clear(&mut self) {
        self.extents.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Exactly one extent
    pub fn is_continuous(&self) -> bool {
        self.extents.len() == 1
    }

    /// More than one extent
    pub fn is_fragmented(&self) -> bool {
        self.extents.len() > 1
    }

    /// Total number of contained integers
    pub fn size(&self) -> u64 {
        self.extents.iter().map(|e| e.length as u64).sum()
    }

    pub fn min(&self) -> Option<i64> {
        self.extents.first().map(|e| e.start)
    }

    pub fn max(&self) -> Option<i64> {
        self.extents.last().map(Extent::last)
    }

    /// Remove and return the smallest contained integer
    pub fn pop_min(&mut self) -> Option<i64> {
        let value = self.min()?;
        self.remove(value);
        Some(value)
    }

    /// Remove and return the largest contained integer
    pub fn pop_max(&mut self) -> Option<i64> {
        let value = self.max()?;
        self.remove(value);
        Some(value)
    }

    pub fn contains(&self, value: i64) -> bool {
        let idx = self.extents.partition_point(|e| e.end() <= value);
        self.extents
            .get(idx)
            .is_some_and(|e| e.contains(value))
    }

    /// The stored extents, ascending
    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Iterate contained integers in ascending order
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.extents.iter().flat_map(|e| e.start..e.end())
    }

    /// Expand into every contained integer. Can be very large for wide spans.
    pub fn to_list(&self) -> Vec<i64> {
        self.iter().collect()
    }
}

impl fmt::Display for FragmentedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentedRange{{")?;
        for (i, e) in self.extents.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if e.length == 1 {
                write!(f, "{}", e.start)?;
            } else {
                write!(f, "{}..={}", e.start, e.last())?;
            }
        }
        write!(f, "}}")
    }
}

impl FromIterator<i64> for FragmentedRange {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        let mut range = FragmentedRange::new();
        for value in iter {
            range.add_one(value);
        }
        range
    }
}

impl Serialize for FragmentedRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.extents.len() * 2))?;
        for e in &self.extents {
            seq.serialize_element(&e.start)?;
            seq.serialize_element(&e.length)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for FragmentedRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let repr = Vec::<i64>::deserialize(deserializer)?;
        FragmentedRange::from_repr(&repr).map_err(D::Error::custom)
    }
}
