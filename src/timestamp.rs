//! Timestamp parsing
//!
//! Source logs mix several textual encodings for the same instant (the canvas
//! export alone carries both millisecond and whole-second rows). The parser
//! tries a fixed, ordered list of formats and uses the first that matches.
//! Narrower patterns come first, so a sub-second input is never read by a
//! whole-second pattern.
//!
//! All results are UTC. Parsing is pure.
//!
//! # Example
//!
//! ```rust
//! use placestat::timestamp::{parse, TimestampFormat};
//!
//! let instant = parse("2022-04-04 00:53:51.577 UTC").unwrap();
//! assert_eq!(instant.timestamp_subsec_millis(), 577);
//! assert_eq!(
//!     TimestampFormat::detect("2022-04-04 00:53:51.577 UTC"),
//!     Some(TimestampFormat::UtcSubSecond)
//! );
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{DecodeError, Error, Result};
use crate::types::Instant;

/// Recognized textual timestamp encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampFormat {
    /// `2022-04-04 00:53:51.577 UTC`
    UtcSubSecond,
    /// `2022-04-04 00:53:51 UTC`
    UtcSeconds,
    /// `2022-04-04T00:53:51.577Z`, `2022-04-04T02:53:51+02:00`
    Rfc3339,
    /// `2022-04-04 00:53:51.577` (no zone, taken as UTC)
    NaiveSubSecond,
    /// `2022-04-04 00:53:51` (no zone, taken as UTC)
    NaiveSeconds,
}

impl TimestampFormat {
    /// Priority order used by [`parse`]
    pub const PRIORITY: [TimestampFormat; 5] = [
        TimestampFormat::UtcSubSecond,
        TimestampFormat::UtcSeconds,
        TimestampFormat::Rfc3339,
        TimestampFormat::NaiveSubSecond,
        TimestampFormat::NaiveSeconds,
    ];

    /// Parse `text` with this format only
    pub fn parse(self, text: &str) -> Option<Instant> {
        match self {
            TimestampFormat::UtcSubSecond => {
                has_fraction(text).then(|| naive(text, "%Y-%m-%d %H:%M:%S%.f UTC"))?
            }
            TimestampFormat::UtcSeconds => naive(text, "%Y-%m-%d %H:%M:%S UTC"),
            TimestampFormat::Rfc3339 => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            TimestampFormat::NaiveSubSecond => {
                has_fraction(text).then(|| naive(text, "%Y-%m-%d %H:%M:%S%.f"))?
            }
            TimestampFormat::NaiveSeconds => naive(text, "%Y-%m-%d %H:%M:%S"),
        }
    }

    /// First format in priority order that accepts `text`
    pub fn detect(text: &str) -> Option<TimestampFormat> {
        let text = text.trim();
        Self::PRIORITY.into_iter().find(|f| f.parse(text).is_some())
    }
}

fn has_fraction(text: &str) -> bool {
    text.contains('.')
}

fn naive(text: &str, format: &str) -> Option<Instant> {
    NaiveDateTime::parse_from_str(text, format)
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Parse a record timestamp into a UTC instant
pub fn parse(text: &str) -> std::result::Result<Instant, DecodeError> {
    let trimmed = text.trim();
    TimestampFormat::PRIORITY
        .into_iter()
        .find_map(|format| format.parse(trimmed))
        .ok_or_else(|| DecodeError::UnrecognizedTimestampFormat(text.to_string()))
}

/// Parse an hour-granularity window bound (`YYYY-MM-DD HH`)
///
/// Malformed bounds are configuration errors, not row errors.
pub fn parse_hour(text: &str) -> Result<Instant> {
    let invalid = || Error::Configuration(format!("Invalid format: {:?} (expected YYYY-MM-DD HH)", text));

    let (date, hour) = text.trim().split_once(' ').ok_or_else(invalid)?;
    let hour = hour.trim();
    if hour.is_empty() || hour.len() > 2 || !hour.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let hour: u32 = hour.parse().map_err(|_| invalid())?;

    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(invalid)
}
