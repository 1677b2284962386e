//! Aggregation engine
//!
//! Drives the read → partition → parallel tally → merge loop:
//!
//! ```text
//!   Idle ──► Validating ──► Running{chunk} ──► Merging{chunk} ──┐
//!                │               ▲                              │
//!                │               └──────── next chunk ◄─────────┤
//!                ▼                                              ▼
//!              Failed ◄──── read error / worker failure ──── Completed
//! ```
//!
//! Chunks are processed strictly in stream order. Every chunk is split into
//! contiguous sub-chunks, one per worker; each worker produces partial tables
//! that only the engine merges, so no mutable state is shared across
//! threads. A failed run never returns a partial aggregate.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::decoder::RecordDecoder;
use crate::error::{Error, Result};
use crate::frequency::TallySet;
use crate::partition::partition;
use crate::reader::{Chunk, ChunkReader};
use crate::report::{AggregationReport, RunStats};
use crate::types::TimeWindow;
use crate::worker::{process_guarded, ChunkResult, TallyPipeline, WindowedTally};

// ============================================================================
// Engine Configuration
// ============================================================================

/// Configuration for an aggregation run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker threads (default: num_cpus)
    pub workers: usize,

    /// Number of ranked values reported per dimension (default: 1)
    pub top_k: usize,

    /// Abort once more than this many rows were skipped as malformed
    pub max_malformed_rows: Option<u64>,

    /// Re-run a failed sub-chunk once before failing the run
    pub retry_failed_subchunks: bool,

    /// Abort the run when it takes longer than this
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            top_k: 1,
            max_malformed_rows: None,
            retry_failed_subchunks: true,
            timeout: None,
        }
    }
}

impl EngineConfig {
    /// Set the worker count
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }

    /// Set how many ranked values are reported per dimension
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k.max(1);
        self
    }

    /// Abort after more than `limit` malformed rows
    pub fn with_max_malformed_rows(mut self, limit: u64) -> Self {
        self.max_malformed_rows = Some(limit);
        self
    }

    /// Fail a sub-chunk on its first fault
    pub fn without_retry(mut self) -> Self {
        self.retry_failed_subchunks = false;
        self
    }

    /// Abort the run after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No run started yet
    Idle,
    /// Checking the pipeline before reading
    Validating,
    /// Workers are tallying this chunk
    Running {
        /// Chunk being processed
        chunk: u64,
    },
    /// Partial results of this chunk are being folded in
    Merging {
        /// Chunk being merged
        chunk: u64,
    },
    /// Last run finished successfully
    Completed,
    /// Last run aborted
    Failed,
}

/// Shared flag that stops a run between chunks
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create an unset token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Withdraw a pending cancellation request
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Consume a pending request, returning whether there was one
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

// ============================================================================
// Aggregation Engine
// ============================================================================

/// Chunked parallel frequency aggregator
///
/// The worker pool is built once and reused by every chunk and every run.
pub struct AggregationEngine {
    config: EngineConfig,
    pool: ThreadPool,
    state: EngineState,
    cancel: CancellationToken,
}

impl AggregationEngine {
    /// Create an engine and its worker pool
    pub fn new(config: EngineConfig) -> Result<Self> {
        let workers = config.workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("placestat-worker-{}", i))
            .build()
            .map_err(|e| Error::Configuration(format!("Cannot build worker pool: {}", e)))?;

        Ok(Self {
            config: EngineConfig { workers, ..config },
            pool,
            state: EngineState::Idle,
            cancel: CancellationToken::new(),
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Token that cancels the current or next run
    ///
    /// A request is consumed by the run it stops; later runs proceed unless
    /// cancelled again.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline over a chunk stream
    ///
    /// The pipeline is validated before the first chunk is pulled, so an
    /// invalid configuration performs no reads.
    pub fn run<P, I>(&mut self, pipeline: &P, chunks: I) -> Result<AggregationReport>
    where
        P: TallyPipeline,
        I: IntoIterator<Item = io::Result<Chunk>>,
    {
        let started = std::time::Instant::now();
        self.state = EngineState::Validating;
        if let Err(e) = pipeline.validate() {
            return Err(self.fail(e));
        }

        let dimensions = pipeline.dimensions();
        let width = dimensions.len();
        let mut aggregate = TallySet::new(width);
        let mut stats = RunStats::default();
        let mut last_merged: Option<u64> = None;

        info!(
            workers = self.config.workers,
            dimensions = ?dimensions,
            "Starting aggregation"
        );

        let mut chunks = chunks.into_iter();
        loop {
            // Checked before pulling so a stopped run reads nothing more
            if self.cancel.take() {
                return Err(self.fail(Error::Cancelled {
                    last_merged_chunk: last_merged,
                }));
            }
            if let Some(limit) = self.config.timeout {
                let elapsed = started.elapsed();
                if elapsed > limit {
                    return Err(self.fail(Error::Timeout {
                        elapsed,
                        last_merged_chunk: last_merged,
                    }));
                }
            }

            let Some(next) = chunks.next() else {
                break;
            };
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(source) => {
                    let index = last_merged.map_or(0, |i| i + 1);
                    return Err(self.fail(Error::Read {
                        chunk: index,
                        source,
                        last_merged_chunk: last_merged,
                    }));
                }
            };

            self.state = EngineState::Running { chunk: chunk.index };
            let results = match self.process_chunk(pipeline, width, &chunk, &mut stats) {
                Ok(results) => results,
                Err((sub_chunk, message)) => {
                    return Err(self.fail(Error::WorkerFailure {
                        chunk: chunk.index,
                        sub_chunk,
                        message,
                        last_merged_chunk: last_merged,
                    }));
                }
            };

            self.state = EngineState::Merging { chunk: chunk.index };
            for result in results {
                stats.absorb(&result.stats);
                aggregate.merge(result.tables);
            }
            stats.chunks += 1;
            last_merged = Some(chunk.index);
            debug!(
                chunk = chunk.index,
                rows = chunk.len(),
                tallied = stats.tallied,
                "Merged chunk"
            );

            if let Some(limit) = self.config.max_malformed_rows {
                if stats.malformed_rows > limit {
                    return Err(self.fail(Error::MalformedLimitExceeded {
                        malformed: stats.malformed_rows,
                        limit,
                        last_merged_chunk: last_merged,
                    }));
                }
            }
        }

        stats.elapsed = started.elapsed();
        self.state = EngineState::Completed;
        info!(
            chunks = stats.chunks,
            rows = stats.rows_seen,
            malformed = stats.malformed_rows,
            tallied = stats.tallied,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Aggregation complete"
        );

        Ok(AggregationReport::new(dimensions, aggregate, stats).with_top_k(self.config.top_k))
    }

    /// Tally one chunk across the pool, retrying failed sub-chunks once
    ///
    /// Results come back in sub-chunk order. A sub-chunk that still fails
    /// is returned as its index and panic message.
    fn process_chunk<P: TallyPipeline>(
        &self,
        pipeline: &P,
        width: usize,
        chunk: &Chunk,
        stats: &mut RunStats,
    ) -> std::result::Result<Vec<ChunkResult>, (usize, String)> {
        let rows = chunk.rows.as_slice();
        let ranges = partition(rows.len(), self.config.workers);

        let outcomes: Vec<_> = self.pool.install(|| {
            ranges
                .par_iter()
                .map(|range| process_guarded(pipeline, width, &rows[range.clone()]))
                .collect()
        });

        let mut results = Vec::with_capacity(outcomes.len());
        for (sub_chunk, outcome) in outcomes.into_iter().enumerate() {
            let message = match outcome {
                Ok(result) => {
                    results.push(result);
                    continue;
                }
                Err(message) => message,
            };

            warn!(
                chunk = chunk.index,
                sub_chunk,
                error = %message,
                "Sub-chunk failed"
            );

            if !self.config.retry_failed_subchunks {
                return Err((sub_chunk, message));
            }

            let range = ranges[sub_chunk].clone();
            match self
                .pool
                .install(|| process_guarded(pipeline, width, &rows[range]))
            {
                Ok(result) => {
                    info!(chunk = chunk.index, sub_chunk, "Sub-chunk succeeded on retry");
                    stats.retried_subchunks += 1;
                    results.push(result);
                }
                Err(message) => return Err((sub_chunk, message)),
            }
        }
        Ok(results)
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = EngineState::Failed;
        error!(
            kind = err.kind(),
            last_merged_chunk = ?err.last_merged_chunk(),
            error = %err,
            "Aggregation failed"
        );
        err
    }
}

// ============================================================================
// File entry points
// ============================================================================

/// Aggregate the configured input file over `window`
///
/// Configuration and pipeline are validated before the input is opened.
pub fn aggregate_file(config: &Config, window: TimeWindow) -> Result<AggregationReport> {
    config.validate()?;
    let pipeline = WindowedTally::new(RecordDecoder::new(config.schema()), window);
    pipeline.validate()?;

    let path = config.input_path()?;
    let mut engine = AggregationEngine::new(config.engine_config())?;
    let reader = ChunkReader::open(path, config.reader_options())?;
    engine.run(&pipeline, reader)
}

/// Aggregate the configured input file between two `YYYY-MM-DD HH` bounds
pub fn aggregate_window(config: &Config, start: &str, end: &str) -> Result<AggregationReport> {
    let window = TimeWindow::parse(start, end)?;
    aggregate_file(config, window)
}
