//! Run reports
//!
//! A completed run hands back the final aggregate together with the row
//! accounting. Ranked results are computed from the aggregate on demand.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::frequency::{FrequencyTable, RankedResult, TallySet};
use crate::worker::WorkerStats;

/// Row and chunk accounting for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Chunks read and merged
    pub chunks: u64,
    /// Data rows read (header excluded)
    pub rows_seen: u64,
    /// Rows skipped as malformed
    pub malformed_rows: u64,
    /// Subset of `malformed_rows` rejected for their timestamp
    pub bad_timestamps: u64,
    /// Well-formed rows outside the window
    pub outside_window: u64,
    /// Rows folded into the aggregate
    pub tallied: u64,
    /// Sub-chunks that failed once and succeeded on retry
    pub retried_subchunks: u64,
    /// Wall-clock time of the run
    #[serde(serialize_with = "serialize_millis", rename = "elapsed_ms")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1_000.0)
}

impl RunStats {
    /// Fold one worker's counters in
    pub fn absorb(&mut self, worker: &WorkerStats) {
        self.rows_seen += worker.rows;
        self.malformed_rows += worker.malformed;
        self.bad_timestamps += worker.bad_timestamps;
        self.outside_window += worker.outside_window;
        self.tallied += worker.tallied;
    }
}

/// Final result of a successful run
#[derive(Debug, Clone)]
pub struct AggregationReport {
    dimensions: Vec<String>,
    aggregate: TallySet,
    stats: RunStats,
    top_k: usize,
}

impl AggregationReport {
    /// Assemble a report from the final aggregate
    ///
    /// The summary depth starts at one value per dimension.
    pub fn new(dimensions: Vec<String>, aggregate: TallySet, stats: RunStats) -> Self {
        Self {
            dimensions,
            aggregate,
            stats,
            top_k: 1,
        }
    }

    /// Set how many values per dimension `summary` ranks (at least one)
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k.max(1);
        self
    }

    /// Values per dimension ranked by `summary`
    pub fn summary_depth(&self) -> usize {
        self.top_k
    }

    /// Tracked dimension names, in table order
    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    /// Row accounting
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Final frequency table of `dimension`
    pub fn table(&self, dimension: &str) -> Option<&FrequencyTable> {
        let index = self.dimensions.iter().position(|d| d == dimension)?;
        self.aggregate.table(index)
    }

    /// Highest-count value of `dimension`
    ///
    /// Unknown dimensions and empty tables both yield the "no data" sentinel.
    pub fn top_result(&self, dimension: &str) -> RankedResult {
        match self.table(dimension) {
            Some(table) => RankedResult::from_table(dimension, table),
            None => RankedResult::no_data(dimension),
        }
    }

    /// The `k` highest-count values of `dimension`, best first
    pub fn top_k(&self, dimension: &str, k: usize) -> Vec<RankedResult> {
        match self.table(dimension) {
            Some(table) => RankedResult::top_k_from_table(dimension, table, k),
            None => vec![RankedResult::no_data(dimension)],
        }
    }

    /// Serializable summary at the report's configured depth
    pub fn summary(&self) -> ReportSummary {
        self.summary_with(self.top_k)
    }

    /// Serializable summary with the top `k` values of every dimension
    pub fn summary_with(&self, k: usize) -> ReportSummary {
        ReportSummary {
            stats: self.stats,
            results: self
                .dimensions
                .iter()
                .map(|d| DimensionSummary {
                    dimension: d.clone(),
                    ranked: self.top_k(d, k),
                })
                .collect(),
        }
    }
}

/// Top values of one dimension
#[derive(Debug, Clone, Serialize)]
pub struct DimensionSummary {
    /// Dimension name
    pub dimension: String,
    /// Ranked values, best first (a single sentinel when empty)
    pub ranked: Vec<RankedResult>,
}

/// Report summary suitable for text or JSON output
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    /// Row accounting
    pub stats: RunStats,
    /// Ranked values per dimension
    pub results: Vec<DimensionSummary>,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dim in &self.results {
            if let [single] = dim.ranked.as_slice() {
                match &single.value {
                    Some(value) => writeln!(
                        f,
                        "Most placed {}: {} ({} placements)",
                        dim.dimension, value, single.count
                    )?,
                    None => writeln!(f, "Most placed {}: None", dim.dimension)?,
                }
                continue;
            }
            writeln!(f, "Top {} {} values:", dim.ranked.len(), dim.dimension)?;
            for (rank, result) in dim.ranked.iter().enumerate() {
                writeln!(
                    f,
                    "  {}. {} ({} placements)",
                    rank + 1,
                    result.value.as_deref().unwrap_or("None"),
                    result.count
                )?;
            }
        }
        writeln!(f)?;
        writeln!(f, "Chunks processed: {}", self.stats.chunks)?;
        writeln!(f, "Rows seen: {}", self.stats.rows_seen)?;
        writeln!(
            f,
            "Rows skipped as malformed: {} ({} bad timestamps)",
            self.stats.malformed_rows, self.stats.bad_timestamps
        )?;
        writeln!(f, "Rows outside window: {}", self.stats.outside_window)?;
        writeln!(f, "Rows tallied: {}", self.stats.tallied)?;
        if self.stats.retried_subchunks > 0 {
            writeln!(f, "Sub-chunks retried: {}", self.stats.retried_subchunks)?;
        }
        write!(
            f,
            "Execution Time: {:.3} ms",
            self.stats.elapsed.as_secs_f64() * 1_000.0
        )
    }
}
