//! Row intervals and sparse interval-keyed attributes.
//!
//! Masks and per-row formula text are both stored as an [`IntervalMap`]: a sorted list of
//! disjoint, inclusive row intervals each carrying a value. Adjacent intervals carrying equal
//! values are merged on every mutation, so a column whose formula covers every row costs a
//! single entry regardless of its length.
//!
//! ```
//! use tabula_core::{Interval, IntervalMap};
//!
//! let mut masks: IntervalMap<()> = IntervalMap::new();
//! masks.set(Interval::new(2, 3), ());
//! masks.insert_rows(1, 2);
//! assert_eq!(masks.intervals().collect::<Vec<_>>(), vec![Interval::new(4, 5)]);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive range of rows
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
}

impl Interval {
    /// Create an interval, normalizing so that `start <= end`
    pub fn new(start: usize, end: usize) -> Self {
        Interval {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Interval covering a single row
    pub const fn single(row: usize) -> Self {
        Interval { start: row, end: row }
    }

    /// Interval covering `count` rows starting at `first`; `None` when `count` is zero or
    /// the last row is not representable
    pub fn from_count(first: usize, count: usize) -> Option<Self> {
        let last = first.checked_add(count.checked_sub(1)?)?;
        Some(Interval::new(first, last))
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, row: usize) -> bool {
        row >= self.start && row <= self.end
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        !(self.end < other.start || self.start > other.end)
    }

    /// True when `other` starts right after this interval ends
    pub fn touches(&self, other: &Interval) -> bool {
        self.end.checked_add(1) == Some(other.start)
    }

    pub fn rows(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Sparse map from disjoint row intervals to values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalMap<T> {
    entries: Vec<(Interval, T)>,
}

impl<T> Default for IntervalMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Clone + PartialEq> IntervalMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary entries; later entries win where they overlap earlier ones
    pub fn from_entries(entries: impl IntoIterator<Item = (Interval, T)>) -> Self {
        let mut map = Self::new();
        for (interval, value) in entries {
            map.set(interval, value);
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of stored intervals
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(Interval, T)] {
        &self.entries
    }

    pub fn intervals(&self) -> impl Iterator<Item = Interval> + '_ {
        self.entries.iter().map(|(interval, _)| *interval)
    }

    /// Look up the value covering `row` in O(log n) over the interval count
    pub fn get(&self, row: usize) -> Option<&T> {
        let idx = self.entries.partition_point(|(iv, _)| iv.end < row);
        match self.entries.get(idx) {
            Some((iv, value)) if iv.start <= row => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, row: usize) -> bool {
        self.get(row).is_some()
    }

    /// True when any row of `interval` is covered
    pub fn intersects(&self, interval: Interval) -> bool {
        let idx = self.entries.partition_point(|(iv, _)| iv.end < interval.start);
        self.entries
            .get(idx)
            .is_some_and(|(iv, _)| iv.start <= interval.end)
    }

    /// True when every row of `interval` is covered
    pub fn covers(&self, interval: Interval) -> bool {
        let mut next = interval.start;
        let idx = self.entries.partition_point(|(iv, _)| iv.end < interval.start);
        for (iv, _) in &self.entries[idx..] {
            if iv.start > next {
                return false;
            }
            if iv.end >= interval.end {
                return true;
            }
            next = iv.end + 1;
        }
        false
    }

    /// Assign `value` to every row of `interval`, overwriting what was there
    pub fn set(&mut self, interval: Interval, value: T) {
        self.remove(interval);
        let idx = self.entries.partition_point(|(iv, _)| iv.start < interval.start);
        self.entries.insert(idx, (interval, value));
        self.merge_adjacent();
    }

    /// Drop coverage of every row of `interval`, splitting entries as needed
    pub fn remove(&mut self, interval: Interval) {
        let mut kept = Vec::with_capacity(self.entries.len() + 1);
        for (iv, value) in self.entries.drain(..) {
            if !iv.intersects(&interval) {
                kept.push((iv, value));
                continue;
            }
            if iv.start < interval.start {
                kept.push((Interval::new(iv.start, interval.start - 1), value.clone()));
            }
            if iv.end > interval.end {
                kept.push((Interval::new(interval.end + 1, iv.end), value));
            }
        }
        self.entries = kept;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Shift entries for `count` rows inserted before `before`.
    ///
    /// Inserted rows are never covered; an interval spanning the insertion point is split.
    pub fn insert_rows(&mut self, before: usize, count: usize) {
        if count == 0 {
            return;
        }
        let mut shifted = Vec::with_capacity(self.entries.len() + 1);
        for (iv, value) in self.entries.drain(..) {
            if iv.start >= before {
                shifted.push((Interval::new(iv.start + count, iv.end + count), value));
            } else if iv.end >= before {
                shifted.push((Interval::new(iv.start, before - 1), value.clone()));
                shifted.push((Interval::new(before + count, iv.end + count), value));
            } else {
                shifted.push((iv, value));
            }
        }
        self.entries = shifted;
    }

    /// Shift entries for `count` rows removed starting at `first`.
    ///
    /// Coverage of the removed rows is discarded, never shifted onto neighbouring rows.
    pub fn remove_rows(&mut self, first: usize, count: usize) {
        let Some(removed) = Interval::from_count(first, count) else {
            return;
        };
        self.remove(removed);
        for (iv, _) in self.entries.iter_mut() {
            if iv.start > removed.end {
                *iv = Interval::new(iv.start - count, iv.end - count);
            }
        }
        self.merge_adjacent();
    }

    /// Restrict coverage to rows below `row_count`
    pub fn truncate(&mut self, row_count: usize) {
        match row_count {
            0 => self.clear(),
            n => self.remove(Interval::new(n, usize::MAX - 1)),
        }
    }

    /// Copy of the entries restricted to `interval`
    pub fn slice(&self, interval: Interval) -> Vec<(Interval, T)> {
        self.entries
            .iter()
            .filter(|(iv, _)| iv.intersects(&interval))
            .map(|(iv, value)| {
                (
                    Interval::new(iv.start.max(interval.start), iv.end.min(interval.end)),
                    value.clone(),
                )
            })
            .collect()
    }

    fn merge_adjacent(&mut self) {
        let mut merged: Vec<(Interval, T)> = Vec::with_capacity(self.entries.len());
        for (iv, value) in self.entries.drain(..) {
            match merged.last_mut() {
                Some((last, last_value)) if last.touches(&iv) && *last_value == value => {
                    last.end = iv.end;
                }
                _ => merged.push((iv, value)),
            }
        }
        self.entries = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn masks(map: &IntervalMap<()>) -> Vec<(usize, usize)> {
        map.intervals().map(|iv| (iv.start, iv.end)).collect()
    }

    #[test]
    fn test_interval_normalizes() {
        let iv = Interval::new(5, 2);
        assert_eq!(iv, Interval::new(2, 5));
        assert_eq!(iv.len(), 4);
        assert!(iv.contains(2) && iv.contains(5) && !iv.contains(6));
        assert_eq!(Interval::from_count(3, 0), None);
    }

    #[test]
    fn test_set_merges_and_splits() {
        let mut map = IntervalMap::new();
        map.set(Interval::new(0, 2), ());
        map.set(Interval::new(3, 5), ());
        assert_eq!(masks(&map), vec![(0, 5)]);

        map.remove(Interval::new(2, 3));
        assert_eq!(masks(&map), vec![(0, 1), (4, 5)]);
        assert!(map.contains(1));
        assert!(!map.contains(2));
        assert!(map.contains(4));
    }

    #[test]
    fn test_values_keep_distinct_intervals() {
        let mut map = IntervalMap::new();
        map.set(Interval::new(0, 4), "x".to_string());
        map.set(Interval::new(2, 2), "y".to_string());
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(1).map(String::as_str), Some("x"));
        assert_eq!(map.get(2).map(String::as_str), Some("y"));
        assert_eq!(map.get(3).map(String::as_str), Some("x"));

        map.set(Interval::new(2, 2), "x".to_string());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_rows_shifts_following_intervals() {
        let mut map = IntervalMap::new();
        map.set(Interval::new(2, 3), ());
        map.insert_rows(1, 2);
        assert_eq!(masks(&map), vec![(4, 5)]);
    }

    #[test]
    fn test_insert_rows_splits_spanning_interval() {
        let mut map = IntervalMap::new();
        map.set(Interval::new(1, 4), ());
        map.insert_rows(3, 2);
        assert_eq!(masks(&map), vec![(1, 2), (5, 6)]);
    }

    #[test]
    fn test_remove_rows_discards_removed_coverage() {
        let mut map = IntervalMap::new();
        map.set(Interval::new(2, 3), ());
        map.set(Interval::new(6, 7), ());
        map.remove_rows(3, 3);
        assert_eq!(masks(&map), vec![(2, 2), (3, 4)]);

        let mut map = IntervalMap::new();
        map.set(Interval::single(5), ());
        map.remove_rows(5, 1);
        assert!(map.is_empty());
    }

    #[test]
    fn test_covers_and_intersects() {
        let mut map = IntervalMap::new();
        map.set(Interval::new(0, 1), ());
        map.set(Interval::new(3, 4), ());
        assert!(map.covers(Interval::new(0, 1)));
        assert!(!map.covers(Interval::new(0, 3)));
        assert!(map.intersects(Interval::new(2, 3)));
        assert!(!map.intersects(Interval::single(2)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(usize, usize),
        Clear(usize, usize),
        Insert(usize, usize),
        Remove(usize, usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..40, 0usize..40).prop_map(|(a, b)| Op::Set(a, b)),
            (0usize..40, 0usize..40).prop_map(|(a, b)| Op::Clear(a, b)),
            (0usize..40, 1usize..5).prop_map(|(a, b)| Op::Insert(a, b)),
            (0usize..40, 1usize..5).prop_map(|(a, b)| Op::Remove(a, b)),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_flag_model(ops in proptest::collection::vec(op(), 0..30)) {
            let mut map: IntervalMap<()> = IntervalMap::new();
            let mut model = vec![false; 40];

            for op in ops {
                match op {
                    Op::Set(a, b) => {
                        let iv = Interval::new(a, b);
                        if iv.end >= model.len() { continue; }
                        map.set(iv, ());
                        model[iv.start..=iv.end].iter_mut().for_each(|m| *m = true);
                    }
                    Op::Clear(a, b) => {
                        let iv = Interval::new(a, b);
                        map.remove(iv);
                        let end = iv.end.min(model.len().saturating_sub(1));
                        if iv.start < model.len() {
                            model[iv.start..=end].iter_mut().for_each(|m| *m = false);
                        }
                    }
                    Op::Insert(before, count) => {
                        if before > model.len() { continue; }
                        map.insert_rows(before, count);
                        model.splice(before..before, std::iter::repeat(false).take(count));
                    }
                    Op::Remove(first, count) => {
                        if first + count > model.len() { continue; }
                        map.remove_rows(first, count);
                        model.drain(first..first + count);
                    }
                }

                let entries = map.entries();
                for pair in entries.windows(2) {
                    // disjoint, sorted, and never adjacent with equal values
                    prop_assert!(pair[0].0.end + 1 < pair[1].0.start);
                }
                for (row, flag) in model.iter().enumerate() {
                    prop_assert_eq!(map.contains(row), *flag);
                }
            }
        }
    }
}
