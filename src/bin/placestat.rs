//! placestat command line
//!
//! Finds the most frequently placed values inside an hour-granular time
//! window of an r/place canvas history export.
//!
//! # Configuration
//!
//! Settings are read from, in increasing priority:
//! 1. Defaults (canvas column layout, 100 000-row chunks, one worker per CPU)
//! 2. The TOML file given with `--config`
//! 3. `PLACESTAT_*` environment variables
//! 4. Command line flags
//!
//! # Example Usage
//!
//! ```bash
//! # Top color and coordinate for one hour
//! placestat --input 2022_place_canvas_history.csv.gzip \
//!     --start "2022-04-01 12" --end "2022-04-01 13"
//!
//! # Top 3 as JSON
//! placestat -i canvas.csv.gz --start "2022-04-01 12" --end "2022-04-01 18" -k 3 --format json
//!
//! # Same question through the in-memory columnar table
//! placestat -i canvas.csv.gz columnar --start "2022-04-01 12" --end "2022-04-01 13"
//!
//! # Colors by distinct users (needs a `user` dimension in the config)
//! placestat --config placestat.toml columnar --distinct-by user
//!
//! # Top 2 colors of each of the top 3 coordinates
//! placestat -i canvas.csv.gz -k 3 columnar --breakdown coordinate --per 2
//!
//! # Validate a config file
//! placestat --config placestat.toml check-config
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

use placestat::columnar::{
    rank_breakdown_from_source, rank_distinct_from_source, rank_from_source, ColumnarSource,
    ColumnarTable,
};
use placestat::reader::ChunkReader;
use placestat::{aggregate_file, Config, Error, RecordDecoder, TimeWindow};

#[derive(Parser)]
#[command(name = "placestat")]
#[command(version)]
#[command(about = "Most-placed values of the r/place canvas inside a time window", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Input CSV or gzip-compressed CSV file
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    /// Window start, YYYY-MM-DD HH (prompted when omitted)
    #[arg(long, global = true)]
    start: Option<String>,

    /// Window end, YYYY-MM-DD HH, exclusive (prompted when omitted)
    #[arg(long, global = true)]
    end: Option<String>,

    /// Number of ranked values per dimension
    #[arg(short = 'k', long, global = true)]
    top_k: Option<usize>,

    /// Worker threads
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Rows per chunk
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Abort runs that take longer than this many seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the input through the parallel engine (default)
    Run,

    /// Load the input into an in-memory columnar table and rank from it
    Columnar {
        /// Rank every other column by distinct values of this column
        #[arg(long)]
        distinct_by: Option<String>,

        /// For each top value of this column, rank the other columns
        #[arg(long, conflicts_with = "distinct_by")]
        breakdown: Option<String>,

        /// Values ranked inside each breakdown leader
        #[arg(long, default_value_t = 2)]
        per: usize,
    },

    /// Validate configuration and print the effective settings
    CheckConfig,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Build the effective configuration from file, environment and flags
fn load_config(cli: &Cli) -> Result<Config, Error> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file_with_env(path)?,
        None => Config::from_env(),
    };

    if let Some(input) = &cli.input {
        config.input.path = Some(input.clone());
    }
    if let Some(k) = cli.top_k {
        config.engine.top_k = k;
    }
    if let Some(workers) = cli.workers {
        config.engine.workers = workers;
    }
    if let Some(rows) = cli.chunk_size {
        config.engine.chunk_size = rows;
    }
    if let Some(secs) = cli.timeout_secs {
        config.engine.timeout_secs = Some(secs);
    }
    Ok(config)
}

/// Read the window from flags, prompting on stdin for missing bounds
fn read_window(cli: &Cli) -> Result<TimeWindow, Error> {
    let start = match &cli.start {
        Some(s) => s.clone(),
        None => prompt("Start time (YYYY-MM-DD HH): ")?,
    };
    let end = match &cli.end {
        Some(s) => s.clone(),
        None => prompt("End time (YYYY-MM-DD HH): ")?,
    };
    TimeWindow::parse(&start, &end)
}

fn prompt(label: &str) -> Result<String, Error> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", label)?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn cmd_run(cli: &Cli, config: &Config) -> Result<(), Error> {
    let window = read_window(cli)?;
    info!(window = %window, "Aggregating");

    let report = aggregate_file(config, window)?;
    let summary = report.summary();

    match cli.format {
        OutputFormat::Text => println!("{}", summary),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }
    Ok(())
}

/// How the columnar subcommand ranks
enum ColumnarQuery {
    Placements,
    DistinctBy(String),
    Breakdown { by: String, per: usize },
}

fn cmd_columnar(cli: &Cli, config: &Config, query: ColumnarQuery) -> Result<(), Error> {
    let window = read_window(cli)?;
    config.validate()?;

    let started = Instant::now();
    let reader = ChunkReader::open(config.input_path()?, config.reader_options())?;
    let table = ColumnarTable::from_chunks(&RecordDecoder::new(config.schema()), reader)?;
    debug!(rows = table.len(), "Columnar table ready");

    let k = config.engine.top_k;
    let mut results = Vec::new();
    let mut breakdowns = Vec::new();
    match &query {
        ColumnarQuery::Placements => {
            for column in table.columns() {
                results.push(rank_from_source(&table, &column, &window, k)?);
            }
        }
        ColumnarQuery::DistinctBy(key) => {
            for column in table.columns().into_iter().filter(|c| c != key) {
                results.push(rank_distinct_from_source(&table, &column, key, &window, k)?);
            }
        }
        ColumnarQuery::Breakdown { by, per } => {
            for column in table.columns().into_iter().filter(|c| c != by) {
                breakdowns.extend(rank_breakdown_from_source(
                    &table, by, &column, &window, k, *per,
                )?);
            }
        }
    }
    let elapsed = started.elapsed();

    match cli.format {
        OutputFormat::Text => {
            let unit = match &query {
                ColumnarQuery::DistinctBy(key) => format!("distinct {}", key),
                _ => "placements".to_string(),
            };
            for ranked in &results {
                for result in ranked {
                    match &result.value {
                        Some(value) => println!(
                            "{}: {} ({} {})",
                            result.dimension, value, result.count, unit
                        ),
                        None => println!("{}: None", result.dimension),
                    }
                }
            }
            for breakdown in &breakdowns {
                println!(
                    "{} {} ({} placements):",
                    breakdown.leader.dimension,
                    breakdown.leader.value.as_deref().unwrap_or("None"),
                    breakdown.leader.count
                );
                for result in &breakdown.ranked {
                    println!(
                        "  {}: {} ({} placements)",
                        result.dimension,
                        result.value.as_deref().unwrap_or("None"),
                        result.count
                    );
                }
            }
            println!();
            println!("Rows loaded: {}", table.len());
            println!("Rows skipped as malformed: {}", table.skipped_rows());
            println!("Execution Time: {:.3} ms", elapsed.as_secs_f64() * 1_000.0);
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "rows_loaded": table.len(),
                "malformed_rows": table.skipped_rows(),
                "elapsed_ms": elapsed.as_secs_f64() * 1_000.0,
                "results": results,
                "breakdowns": breakdowns,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}

fn cmd_check_config(config: &Config) -> Result<(), Error> {
    config.validate()?;

    println!("Configuration is valid!");
    println!();
    println!("Input:");
    match &config.input.path {
        Some(path) => println!("  Path: {}", path.display()),
        None => println!("  Path: (not set)"),
    }
    println!("  Delimiter: {:?}", config.input.delimiter);
    println!("  Header: {}", config.input.has_header);
    println!("  Timestamp column: {}", config.input.timestamp_column);
    for dim in &config.input.dimensions {
        println!(
            "  Dimension: {} (column {}{})",
            dim.name,
            dim.column,
            if dim.normalize { ", normalized" } else { "" }
        );
    }
    println!();
    println!("Engine:");
    println!("  Chunk size: {} rows", config.engine.chunk_size);
    println!("  Workers: {}", config.engine.workers);
    println!("  Top k: {}", config.engine.top_k);
    match config.engine.max_malformed_rows {
        Some(limit) => println!("  Malformed row limit: {}", limit),
        None => println!("  Malformed row limit: none"),
    }
    println!("  Retry failed sub-chunks: {}", config.engine.retry_failed_subchunks);
    match config.engine.timeout_secs {
        Some(secs) => println!("  Timeout: {}s", secs),
        None => println!("  Timeout: none"),
    }
    println!();
    println!("Logging:");
    println!("  Level: {}", config.logging.level);

    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    debug!("placestat v{}", env!("CARGO_PKG_VERSION"));

    let outcome = match &cli.command {
        Some(Commands::CheckConfig) => cmd_check_config(&config),
        Some(Commands::Columnar {
            distinct_by,
            breakdown,
            per,
        }) => {
            let query = match (distinct_by, breakdown) {
                (Some(key), _) => ColumnarQuery::DistinctBy(key.clone()),
                (None, Some(by)) => ColumnarQuery::Breakdown {
                    by: by.clone(),
                    per: *per,
                },
                (None, None) => ColumnarQuery::Placements,
            };
            cmd_columnar(&cli, &config, query)
        }
        Some(Commands::Run) | None => cmd_run(&cli, &config),
    };

    if let Err(e) = outcome {
        exit_with(&e);
    }
}

fn exit_with(err: &Error) -> ! {
    eprintln!("Error ({}): {}", err.kind(), err);
    if let Some(chunk) = err.last_merged_chunk() {
        eprintln!("Last merged chunk: {}", chunk);
    } else if !err.is_configuration() {
        eprintln!("Last merged chunk: none");
    }
    std::process::exit(1);
}
