//! Frequency tables and their merge law
//!
//! A [`FrequencyTable`] maps a categorical value to how often it was seen.
//! Tables combine by adding counts over the union of keys:
//!
//! ```text
//! combine(a, b)[v] = a[v] + b[v]      (missing keys count as 0)
//! ```
//!
//! Integer addition over a key union is associative and commutative with the
//! empty table as identity, so partial tables from any number of workers can
//! be folded in any order and still produce the same aggregate.
//!
//! # Ranking
//!
//! Values rank by count descending; equal counts rank by value bytes
//! ascending. The winner therefore depends only on the final counts, never on
//! hash order, partition shape or merge order.
//!
//! # Example
//!
//! ```rust
//! use placestat::frequency::FrequencyTable;
//!
//! let mut a = FrequencyTable::new();
//! a.record("red");
//! a.record("blue");
//!
//! let mut b = FrequencyTable::new();
//! b.record("red");
//!
//! let merged = FrequencyTable::combine(a, b);
//! assert_eq!(merged.count("red"), 2);
//! assert_eq!(merged.top(), Some(("red", 2)));
//! ```

use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

/// Occurrence counts for one dimension
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    counts: HashMap<String, u64>,
}

impl FrequencyTable {
    /// Create an empty table (the merge identity)
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(value, count)` pairs, summing repeated values
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (value, count) in pairs {
            table.add(value, count);
        }
        table
    }

    /// Count one occurrence of `value`
    #[inline]
    pub fn record(&mut self, value: &str) {
        // Hot path: only allocate the key the first time a value is seen
        if let Some(count) = self.counts.get_mut(value) {
            *count += 1;
        } else {
            self.counts.insert(value.to_owned(), 1);
        }
    }

    /// Add `count` occurrences of `value`
    pub fn add(&mut self, value: impl Into<String>, count: u64) {
        if count == 0 {
            return;
        }
        *self.counts.entry(value.into()).or_insert(0) += count;
    }

    /// Occurrences of `value` (0 when never seen)
    pub fn count(&self, value: &str) -> u64 {
        self.counts.get(value).copied().unwrap_or(0)
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True when nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Iterate `(value, count)` pairs in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(v, &c)| (v.as_str(), c))
    }

    /// Fold `other` into `self`
    pub fn merge(&mut self, other: FrequencyTable) {
        if self.counts.len() < other.counts.len() {
            let smaller = std::mem::replace(&mut self.counts, other.counts);
            self.absorb(smaller);
        } else {
            self.absorb(other.counts);
        }
    }

    fn absorb(&mut self, counts: HashMap<String, u64>) {
        for (value, count) in counts {
            *self.counts.entry(value).or_insert(0) += count;
        }
    }

    /// Combine two tables into one
    pub fn combine(mut a: FrequencyTable, b: FrequencyTable) -> FrequencyTable {
        a.merge(b);
        a
    }

    /// Highest-ranked value and its count, `None` for an empty table
    pub fn top(&self) -> Option<(&str, u64)> {
        self.iter()
            .map(|(value, count)| Ranked { count, value })
            .max()
            .map(|r| (r.value, r.count))
    }

    /// The `k` highest-ranked values, best first
    pub fn top_k(&self, k: usize) -> Vec<(&str, u64)> {
        if k == 0 {
            return Vec::new();
        }

        // Min-heap of the best k seen so far; the root is the weakest keeper
        let mut heap: BinaryHeap<Reverse<Ranked<'_>>> = BinaryHeap::with_capacity(k + 1);
        for (value, count) in self.iter() {
            heap.push(Reverse(Ranked { count, value }));
            if heap.len() > k {
                heap.pop();
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|Reverse(r)| (r.value, r.count))
            .collect()
    }
}

/// Ranking key: greater is better
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ranked<'a> {
    count: u64,
    value: &'a str,
}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            // Lexicographically smaller bytes win ties
            .then_with(|| other.value.as_bytes().cmp(self.value.as_bytes()))
    }
}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One frequency table per tracked dimension, in schema order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TallySet {
    tables: Vec<FrequencyTable>,
}

impl TallySet {
    /// Create `dimensions` empty tables
    pub fn new(dimensions: usize) -> Self {
        Self {
            tables: vec![FrequencyTable::new(); dimensions],
        }
    }

    /// Count one occurrence of `value` in dimension `index`
    #[inline]
    pub fn record(&mut self, index: usize, value: &str) {
        if let Some(table) = self.tables.get_mut(index) {
            table.record(value);
        }
    }

    /// Table for dimension `index`
    pub fn table(&self, index: usize) -> Option<&FrequencyTable> {
        self.tables.get(index)
    }

    /// All tables in dimension order
    pub fn tables(&self) -> &[FrequencyTable] {
        &self.tables
    }

    /// Number of dimensions
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True when no dimension is tracked
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Fold `other` into `self`, dimension by dimension
    pub fn merge(&mut self, other: TallySet) {
        if self.tables.len() < other.tables.len() {
            self.tables
                .resize_with(other.tables.len(), FrequencyTable::new);
        }
        for (mine, theirs) in self.tables.iter_mut().zip(other.tables) {
            mine.merge(theirs);
        }
    }
}

/// The highest-count value of a dimension
///
/// `value == None` is the "no data" sentinel, reported when nothing fell in
/// the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedResult {
    /// Dimension name
    pub dimension: String,
    /// Winning value, `None` when the table was empty
    pub value: Option<String>,
    /// Occurrences of the winning value
    pub count: u64,
}

impl RankedResult {
    /// Sentinel result for a dimension with no data
    pub fn no_data(dimension: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            value: None,
            count: 0,
        }
    }

    /// True for the "no data" sentinel
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Top-1 result for `table`
    pub fn from_table(dimension: &str, table: &FrequencyTable) -> Self {
        match table.top() {
            Some((value, count)) => Self {
                dimension: dimension.to_string(),
                value: Some(value.to_string()),
                count,
            },
            None => Self::no_data(dimension),
        }
    }

    /// Top-k results for `table`; a single sentinel when it is empty
    pub fn top_k_from_table(dimension: &str, table: &FrequencyTable, k: usize) -> Vec<Self> {
        let ranked = table.top_k(k);
        if ranked.is_empty() {
            return vec![Self::no_data(dimension)];
        }
        ranked
            .into_iter()
            .map(|(value, count)| Self {
                dimension: dimension.to_string(),
                value: Some(value.to_string()),
                count,
            })
            .collect()
    }
}

impl fmt::Display for RankedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}: {} ({})", self.dimension, value, self.count),
            None => write!(f, "{}: None", self.dimension),
        }
    }
}
