//! End-to-end tests for the aggregation engine
//!
//! Exercises the file entry points against plain and gzip fixtures written to
//! temporary directories, plus the canvas scenarios from the design notes.

use flate2::write::GzEncoder;
use flate2::Compression;
use placestat::columnar::{rank_from_source, ColumnarTable};
use placestat::reader::{ChunkReader, ReaderOptions};
use placestat::types::DimensionSpec;
use placestat::{
    aggregate_file, aggregate_window, AggregationEngine, Config, EngineConfig, Error,
    RecordDecoder, TimeWindow, WindowedTally,
};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// Fixtures
// =============================================================================

const HEADER: &str = "timestamp,user_id,pixel_color,coordinate";

const SCENARIO: &str = "timestamp,user_id,pixel_color,coordinate\n\
    2022-04-01 00:00:01 UTC,u1,red,\"0,0\"\n\
    2022-04-01 00:00:02 UTC,u2,red,\"1,1\"\n\
    2022-04-01 00:00:03 UTC,u3,blue,\"0,0\"\n";

/// Synthetic canvas log with a known distribution
///
/// Row `i` is placed `i` seconds after 2022-04-01 00:00:00. Colors cycle with
/// period 7, coordinates with period 11, and every 50th row is corrupted.
fn synthetic_canvas(rows: usize) -> String {
    let colors = ["#FF4500", "#FFA800", "#FFD635", "#00A368", "#3690EA", "#B44AC0", "#000000"];
    let mut out = String::from(HEADER);
    out.push('\n');
    for i in 0..rows {
        if i % 50 == 49 {
            out.push_str("corrupted row without enough fields\n");
            continue;
        }
        let secs = i as u32;
        let ts = format!(
            "2022-04-01 {:02}:{:02}:{:02}.{:03} UTC",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            i % 1000
        );
        let color = colors[i % 7];
        let coord = format!("{},{}", i % 11, (i * 3) % 11);
        out.push_str(&format!("{},user{},{},\"{}\"\n", ts, i % 97, color, coord));
    }
    out
}

fn write_plain(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn write_gzip(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();
    path
}

fn config_for(path: &Path) -> Config {
    let mut config = Config::default();
    config.input.path = Some(path.to_path_buf());
    config.engine.chunk_size = 2;
    config.engine.workers = 4;
    config
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_scenario_red_and_lexicographic_tie() {
    let dir = TempDir::new().unwrap();
    let path = write_gzip(&dir, "scenario.csv.gz", SCENARIO);

    let report = aggregate_window(&config_for(&path), "2022-04-01 00", "2022-04-01 01").unwrap();

    let color = report.top_result("color");
    assert_eq!(color.value.as_deref(), Some("red"));
    assert_eq!(color.count, 2);

    let coordinate = report.top_k("coordinate", 2);
    assert_eq!(coordinate[0].value.as_deref(), Some("0,0"));
    assert_eq!(coordinate[0].count, 2);
    assert_eq!(coordinate[1].value.as_deref(), Some("1,1"));

    assert_eq!(report.stats().rows_seen, 3);
    assert_eq!(report.stats().malformed_rows, 0);
}

#[test]
fn test_coordinate_tie_resolves_to_smallest() {
    let body = "timestamp,user_id,pixel_color,coordinate\n\
        2022-04-01 00:00:02 UTC,u2,red,\"1,1\"\n\
        2022-04-01 00:00:01 UTC,u1,red,\"0,0\"\n";
    let dir = TempDir::new().unwrap();
    let path = write_plain(&dir, "tie.csv", body);

    for workers in [1, 2, 8] {
        let mut config = config_for(&path);
        config.engine.workers = workers;
        let report = aggregate_window(&config, "2022-04-01 00", "2022-04-01 01").unwrap();
        let top = report.top_result("coordinate");
        assert_eq!(top.value.as_deref(), Some("0,0"));
        assert_eq!(top.count, 1);
    }
}

#[test]
fn test_empty_window_reports_sentinels() {
    let dir = TempDir::new().unwrap();
    let path = write_gzip(&dir, "scenario.csv.gz", SCENARIO);

    let report = aggregate_window(&config_for(&path), "2022-04-02 00", "2022-04-02 05").unwrap();
    assert!(report.top_result("color").is_empty());
    assert!(report.top_result("coordinate").is_empty());
    assert_eq!(report.stats().rows_seen, 3);
    assert_eq!(report.stats().outside_window, 3);

    let text = report.summary().to_string();
    assert!(text.contains("Most placed color: None"));
}

#[test]
fn test_inverted_window_fails_before_reading() {
    // The input path does not exist: a read attempt would surface as a
    // different message, so the window check must come first
    let mut config = Config::default();
    config.input.path = Some(PathBuf::from("/nonexistent/placestat/canvas.csv.gz"));

    let err = aggregate_window(&config, "2022-04-01 05", "2022-04-01 05").unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("after"), "{}", err);

    let err = aggregate_window(&config, "2022-04-01 05", "2022-04-01 04").unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_bad_window_format() {
    let config = Config::default();
    let err = aggregate_window(&config, "2022-04-01", "2022-04-01 04").unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_missing_input_is_configuration_error() {
    let mut config = Config::default();
    config.input.path = Some(PathBuf::from("/nonexistent/placestat/canvas.csv.gz"));
    let window = TimeWindow::parse("2022-04-01 00", "2022-04-01 01").unwrap();

    let err = aggregate_file(&config, window).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(err.last_merged_chunk(), None);
}

// =============================================================================
// Larger inputs
// =============================================================================

#[test]
fn test_plain_and_gzip_agree() {
    let body = synthetic_canvas(5_000);
    let dir = TempDir::new().unwrap();
    let plain = write_plain(&dir, "canvas.csv", &body);
    let gzip = write_gzip(&dir, "canvas.csv.gzip", &body);

    let mut a = config_for(&plain);
    a.engine.chunk_size = 512;
    let mut b = config_for(&gzip);
    b.engine.chunk_size = 512;

    let ra = aggregate_window(&a, "2022-04-01 00", "2022-04-01 01").unwrap();
    let rb = aggregate_window(&b, "2022-04-01 00", "2022-04-01 01").unwrap();
    assert_eq!(ra.table("color"), rb.table("color"));
    assert_eq!(ra.table("coordinate"), rb.table("coordinate"));
    assert_eq!(ra.stats().malformed_rows, 100);
    assert_eq!(ra.stats().chunks, 10);
}

#[test]
fn test_pool_size_determinism() {
    let body = synthetic_canvas(3_000);
    let dir = TempDir::new().unwrap();
    let path = write_gzip(&dir, "canvas.csv.gz", &body);

    let mut one = config_for(&path);
    one.engine.workers = 1;
    one.engine.chunk_size = 700;
    let mut eight = config_for(&path);
    eight.engine.workers = 8;
    eight.engine.chunk_size = 128;

    let r1 = aggregate_window(&one, "2022-04-01 00", "2022-04-01 01").unwrap();
    let r8 = aggregate_window(&eight, "2022-04-01 00", "2022-04-01 01").unwrap();
    assert_eq!(r1.top_result("color"), r8.top_result("color"));
    assert_eq!(r1.top_k("coordinate", 5), r8.top_k("coordinate", 5));
    assert_eq!(r1.stats().tallied, r8.stats().tallied);
}

#[test]
fn test_window_subset_counts() {
    // Rows 0..3600 fall in hour 00, rows 3600.. in hour 01
    let body = synthetic_canvas(4_000);
    let dir = TempDir::new().unwrap();
    let path = write_plain(&dir, "canvas.csv", &body);
    let config = config_for(&path);

    let first = aggregate_window(&config, "2022-04-01 00", "2022-04-01 01").unwrap();
    let second = aggregate_window(&config, "2022-04-01 01", "2022-04-01 02").unwrap();
    let both = aggregate_window(&config, "2022-04-01 00", "2022-04-01 02").unwrap();

    let total = |r: &placestat::AggregationReport| r.table("color").unwrap().total();
    assert_eq!(total(&first) + total(&second), total(&both));
    let stats = first.stats();
    assert_eq!(stats.tallied + stats.outside_window + stats.malformed_rows, 4_000);
}

#[test]
fn test_malformed_limit_reports_last_merged_chunk() {
    let body = synthetic_canvas(1_000);
    let dir = TempDir::new().unwrap();
    let path = write_plain(&dir, "canvas.csv", &body);

    let mut config = config_for(&path);
    config.engine.chunk_size = 100;
    config.engine.max_malformed_rows = Some(5);

    let err = aggregate_window(&config, "2022-04-01 00", "2022-04-01 01").unwrap_err();
    match err {
        Error::MalformedLimitExceeded {
            malformed,
            limit,
            last_merged_chunk,
        } => {
            // Two corrupted rows per 100-row chunk
            assert_eq!(limit, 5);
            assert_eq!(malformed, 6);
            assert_eq!(last_merged_chunk, Some(2));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_normalized_dimension() {
    let body = "timestamp,user_id,pixel_color,coordinate\n\
        2022-04-01 00:00:01 UTC,u1, Red ,\"0,0\"\n\
        2022-04-01 00:00:02 UTC,u2,RED,\"1,1\"\n\
        2022-04-01 00:00:03 UTC,u3,blue,\"0,0\"\n\
        2022-04-01 00:00:04 UTC,u4,blue,\"0,0\"\n";
    let dir = TempDir::new().unwrap();
    let path = write_plain(&dir, "mixed.csv", body);

    let mut config = config_for(&path);
    config.input.dimensions = vec![DimensionSpec::new("color", 2).normalized()];
    let report = aggregate_window(&config, "2022-04-01 00", "2022-04-01 01").unwrap();

    let ranked = report.top_k("color", 2);
    assert_eq!(ranked[0].value.as_deref(), Some("blue"));
    assert_eq!(ranked[0].count, 2);
    assert_eq!(ranked[1].value.as_deref(), Some("red"));
    assert_eq!(ranked[1].count, 2);
}

#[test]
fn test_columnar_path_matches_engine() {
    let body = synthetic_canvas(2_000);
    let config = Config::default();
    let window = TimeWindow::parse("2022-04-01 00", "2022-04-01 01").unwrap();

    let decoder = RecordDecoder::new(config.schema());
    let reader = ChunkReader::new(Cursor::new(body.clone()), ReaderOptions::default());
    let table = ColumnarTable::from_chunks(&decoder, reader).unwrap();

    let pipeline = WindowedTally::new(RecordDecoder::new(config.schema()), window);
    let mut engine = AggregationEngine::new(EngineConfig::default().with_workers(4)).unwrap();
    let reader = ChunkReader::new(
        Cursor::new(body),
        ReaderOptions::default().with_chunk_size(300),
    );
    let report = engine.run(&pipeline, reader).unwrap();

    for column in ["color", "coordinate"] {
        assert_eq!(
            rank_from_source(&table, column, &window, 3).unwrap(),
            report.top_k(column, 3)
        );
    }
    assert_eq!(table.skipped_rows(), report.stats().malformed_rows);
}
