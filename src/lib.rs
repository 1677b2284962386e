//! placestat - chunked, parallel frequency aggregation over canvas logs
//!
//! This library answers "which value was placed most often in a time window"
//! over very large, gzip-compressed pixel-placement logs:
//! - Bounded-memory chunked reading with transparent gzip decompression
//! - One long-lived rayon worker pool shared by every chunk
//! - Commutative, associative frequency-table merge
//! - Deterministic top-1 / top-k ranking with lexicographic tie-break
//!
//! # Example
//!
//! ```rust
//! use placestat::{AggregationEngine, EngineConfig, RecordDecoder, Schema, TimeWindow, WindowedTally};
//! use placestat::reader::{ChunkReader, ReaderOptions};
//! use placestat::types::DimensionSpec;
//! use std::io::Cursor;
//!
//! let csv = "timestamp,user_id,pixel_color,coordinate\n\
//!            2022-04-01 00:00:01 UTC,u1,red,\"0,0\"\n";
//! let schema = Schema::new(0, vec![DimensionSpec::new("color", 2)]);
//! let window = TimeWindow::parse("2022-04-01 00", "2022-04-01 01").unwrap();
//! let pipeline = WindowedTally::new(RecordDecoder::new(schema), window);
//!
//! let mut engine = AggregationEngine::new(EngineConfig::default().with_workers(2)).unwrap();
//! let reader = ChunkReader::new(Cursor::new(csv), ReaderOptions::default());
//! let report = engine.run(&pipeline, reader).unwrap();
//!
//! assert_eq!(report.top_result("color").value.as_deref(), Some("red"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Timestamp parsing with a fixed format priority list
pub mod timestamp;

/// Delimited line splitting and row decoding
pub mod decoder;

/// Bounded chunk reader over plain or gzip-compressed input
pub mod reader;

/// Near-equal sub-chunk partitioning
pub mod partition;

/// Frequency tables, merge and ranking
pub mod frequency;

/// Sub-chunk workers and the pipeline capability trait
pub mod worker;

/// Orchestrator: read, partition, dispatch, merge
pub mod engine;

/// Run reports and output rendering
pub mod report;

/// Alternate execution through a columnar read interface
pub mod columnar;

/// Configuration management with TOML support
pub mod config;

// Re-export main types
pub use config::Config;
pub use decoder::{RecordDecoder, Schema};
pub use engine::{aggregate_file, aggregate_window, AggregationEngine, EngineConfig, EngineState};
pub use error::{Error, Result};
pub use frequency::{FrequencyTable, RankedResult};
pub use report::AggregationReport;
pub use types::TimeWindow;
pub use worker::{TallyPipeline, WindowedTally};
