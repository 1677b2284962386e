//! Core data types shared by the aggregation pipeline
//!
//! # Key Types
//!
//! - **`RawRow`**: the text fields of one line from the source stream
//! - **`Event`**: a decoded row (instant + one value per tracked dimension)
//! - **`TimeWindow`**: half-open `[start, end)` inclusion predicate
//! - **`DimensionSpec`**: which column feeds which tracked dimension
//!
//! # Example
//!
//! ```rust
//! use placestat::types::TimeWindow;
//!
//! let window = TimeWindow::parse("2022-04-01 00", "2022-04-01 01").unwrap();
//! assert!(window.contains(window.start()));
//! assert!(!window.contains(window.end()));
//!
//! // end must be strictly after start
//! assert!(TimeWindow::parse("2022-04-01 01", "2022-04-01 01").is_err());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::timestamp;

/// Canonical instant; every parsed timestamp is normalized to UTC
pub type Instant = DateTime<Utc>;

/// One line of the source stream split into text fields
///
/// Rows are owned by the chunk that carries them and never shared between
/// workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-indexed line number in the source stream (header included)
    line: u64,
    /// Field text in column order
    fields: Vec<String>,
}

impl RawRow {
    /// Create a row from already-split fields
    pub fn new(line: u64, fields: Vec<String>) -> Self {
        Self { line, fields }
    }

    /// Line number in the source stream
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Field at `column`, if present
    pub fn field(&self, column: usize) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Number of fields in the row
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the row has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields in column order
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// A decoded record: when it happened and its categorical values
///
/// `values[i]` belongs to the i-th tracked dimension of the schema that
/// produced it. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    instant: Instant,
    values: Vec<String>,
}

impl Event {
    /// Create an event
    pub fn new(instant: Instant, values: Vec<String>) -> Self {
        Self { instant, values }
    }

    /// When the event happened
    pub fn instant(&self) -> Instant {
        self.instant
    }

    /// Value of the dimension at `index`
    pub fn value(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    /// All dimension values in schema order
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Half-open time window `[start, end)`
///
/// Construction enforces `end > start`, so a window that exists is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WindowBounds")]
pub struct TimeWindow {
    start: Instant,
    end: Instant,
}

/// Unchecked wire form of a window; deserialization goes through `TimeWindow::new`
#[derive(Deserialize)]
struct WindowBounds {
    start: Instant,
    end: Instant,
}

impl TryFrom<WindowBounds> for TimeWindow {
    type Error = Error;

    fn try_from(bounds: WindowBounds) -> Result<Self> {
        TimeWindow::new(bounds.start, bounds.end)
    }
}

impl TimeWindow {
    /// Create a window, rejecting `end <= start` as a configuration error
    pub fn new(start: Instant, end: Instant) -> Result<Self> {
        if end <= start {
            return Err(Error::Configuration(format!(
                "Invalid time window: end {} must be after start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a window from two `YYYY-MM-DD HH` strings
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = timestamp::parse_hour(start)?;
        let end = timestamp::parse_hour(end)?;
        Self::new(start, end)
    }

    /// Inclusive lower bound
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Exclusive upper bound
    pub fn end(&self) -> Instant {
        self.end
    }

    /// True when `instant` lies in `[start, end)`
    #[inline]
    pub fn contains(&self, instant: Instant) -> bool {
        instant >= self.start && instant < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Mapping of one tracked dimension to a source column
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DimensionSpec {
    /// Dimension name used in reports (e.g. "color")
    pub name: String,

    /// 0-indexed column in the delimited row
    pub column: usize,

    /// Trim and lowercase values before tallying
    #[serde(default)]
    pub normalize: bool,
}

impl DimensionSpec {
    /// Create a dimension mapping without normalization
    pub fn new(name: impl Into<String>, column: usize) -> Self {
        Self {
            name: name.into(),
            column,
            normalize: false,
        }
    }

    /// Enable trim + lowercase normalization
    pub fn normalized(mut self) -> Self {
        self.normalize = true;
        self
    }
}
