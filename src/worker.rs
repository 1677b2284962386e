//! Sub-chunk workers
//!
//! A worker takes one sub-chunk, and for every row runs the caller-supplied
//! pipeline:
//!
//! ```text
//! RawRow ──decode──► Event ──filter──► tally into local TallySet
//!    │                  │
//!    └─ malformed++     └─ outside_window++
//! ```
//!
//! Workers share nothing mutable. Each one owns its output [`ChunkResult`]
//! until the engine merges it.

use std::panic::{self, AssertUnwindSafe};
use tracing::trace;

use crate::decoder::RecordDecoder;
use crate::error::{DecodeError, Error, Result};
use crate::frequency::TallySet;
use crate::types::{Event, RawRow, TimeWindow};

/// Capability interface the engine drives for every row
///
/// `decode` and `filter` are kept separate so malformed rows and rows
/// outside the window are counted as different outcomes.
pub trait TallyPipeline: Sync {
    /// Names of the tallied dimensions, in table order
    fn dimensions(&self) -> Vec<String>;

    /// Check the pipeline before any row is read
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Turn a raw row into an event
    fn decode(&self, row: &RawRow) -> std::result::Result<Event, DecodeError>;

    /// Keep or drop a decoded event
    fn filter(&self, event: &Event) -> bool;

    /// Fold an accepted event into the worker's tables
    fn tally(&self, event: &Event, tables: &mut TallySet) {
        for (index, value) in event.values().iter().enumerate() {
            tables.record(index, value);
        }
    }
}

/// Standard pipeline: decode with a schema, keep events inside a window
#[derive(Debug, Clone)]
pub struct WindowedTally {
    decoder: RecordDecoder,
    window: TimeWindow,
}

impl WindowedTally {
    /// Create a pipeline from a decoder and a window
    pub fn new(decoder: RecordDecoder, window: TimeWindow) -> Self {
        Self { decoder, window }
    }

    /// Window applied by [`TallyPipeline::filter`]
    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Decoder applied by [`TallyPipeline::decode`]
    pub fn decoder(&self) -> &RecordDecoder {
        &self.decoder
    }
}

impl TallyPipeline for WindowedTally {
    fn dimensions(&self) -> Vec<String> {
        self.decoder
            .schema()
            .dimensions()
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    fn validate(&self) -> Result<()> {
        // Re-checked here so a window built elsewhere still fails before reading
        TimeWindow::new(self.window.start(), self.window.end()).map(|_| ())?;
        if self.decoder.schema().dimensions().is_empty() {
            return Err(Error::Configuration(
                "At least one dimension must be tracked".to_string(),
            ));
        }
        Ok(())
    }

    #[inline]
    fn decode(&self, row: &RawRow) -> std::result::Result<Event, DecodeError> {
        self.decoder.decode(row)
    }

    #[inline]
    fn filter(&self, event: &Event) -> bool {
        self.window.contains(event.instant())
    }
}

/// Row outcome counters for one unit of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Rows examined
    pub rows: u64,
    /// Rows rejected by the decoder
    pub malformed: u64,
    /// Timestamp-specific subset of `malformed`
    pub bad_timestamps: u64,
    /// Decoded rows dropped by the filter
    pub outside_window: u64,
    /// Rows folded into the tables
    pub tallied: u64,
}

impl WorkerStats {
    /// Add another set of counters
    pub fn absorb(&mut self, other: &WorkerStats) {
        self.rows += other.rows;
        self.malformed += other.malformed;
        self.bad_timestamps += other.bad_timestamps;
        self.outside_window += other.outside_window;
        self.tallied += other.tallied;
    }
}

/// Partial tables and counters produced from one sub-chunk
#[derive(Debug, Clone, Default)]
pub struct ChunkResult {
    /// Local frequency tables, one per dimension
    pub tables: TallySet,
    /// Row outcome counters
    pub stats: WorkerStats,
}

/// Process one sub-chunk
pub fn process<P: TallyPipeline + ?Sized>(
    pipeline: &P,
    dimensions: usize,
    rows: &[RawRow],
) -> ChunkResult {
    let mut tables = TallySet::new(dimensions);
    let mut stats = WorkerStats::default();

    for row in rows {
        stats.rows += 1;
        let event = match pipeline.decode(row) {
            Ok(event) => event,
            Err(e) => {
                trace!(line = row.line(), error = %e, "Skipping malformed row");
                stats.malformed += 1;
                if e.is_timestamp_error() {
                    stats.bad_timestamps += 1;
                }
                continue;
            }
        };

        if !pipeline.filter(&event) {
            stats.outside_window += 1;
            continue;
        }

        pipeline.tally(&event, &mut tables);
        stats.tallied += 1;
    }

    ChunkResult { tables, stats }
}

/// Process one sub-chunk, converting a panic into an error message
///
/// A fault in one sub-chunk must not take down the pool or the orchestrator;
/// the engine decides whether to retry or fail the run.
pub fn process_guarded<P: TallyPipeline + ?Sized>(
    pipeline: &P,
    dimensions: usize,
    rows: &[RawRow],
) -> std::result::Result<ChunkResult, String> {
    panic::catch_unwind(AssertUnwindSafe(|| process(pipeline, dimensions, rows)))
        .map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
