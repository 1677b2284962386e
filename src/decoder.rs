//! Record decoding
//!
//! Turns delimited text lines into [`RawRow`]s and raw rows into typed
//! [`Event`]s.
//!
//! # Line format
//!
//! ```text
//! timestamp,user_id,pixel_color,coordinate
//! 2022-04-04 00:53:51.577 UTC,ovTZk4Gy...,#00CCC0,"826,1048"
//! ```
//!
//! Fields may be wrapped in double quotes so they can contain the delimiter;
//! a doubled quote inside a quoted field is a literal quote. Splitting is
//! lenient: an unterminated quote consumes the rest of the line. Whether the
//! result is usable is the decoder's decision, not the splitter's.
//!
//! # Decoding
//!
//! A row is rejected (`DecodeError`) when it has fewer fields than the schema
//! needs, when its timestamp does not parse, or when a tracked value is empty.
//! Time-window filtering is *not* part of decoding; a well-formed row outside
//! the window decodes fine and is dropped later by the filter.

use crate::error::DecodeError;
use crate::timestamp;
use crate::types::{DimensionSpec, Event, RawRow};

/// Split one line into fields on `delimiter`, honoring double quotes
pub fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;
    let mut at_field_start = true;

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
            continue;
        }

        if c == delimiter {
            fields.push(std::mem::take(&mut current));
            at_field_start = true;
            continue;
        }

        if c == '"' && at_field_start {
            in_quotes = true;
        } else {
            current.push(c);
        }
        at_field_start = false;
    }

    fields.push(current);
    fields
}

/// Column layout of the source rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    timestamp_column: usize,
    dimensions: Vec<DimensionSpec>,
    required_fields: usize,
}

impl Schema {
    /// Create a schema from the timestamp column and tracked dimensions
    pub fn new(timestamp_column: usize, dimensions: Vec<DimensionSpec>) -> Self {
        let required_fields = dimensions
            .iter()
            .map(|d| d.column)
            .chain(std::iter::once(timestamp_column))
            .max()
            .map_or(0, |max| max + 1);

        Self {
            timestamp_column,
            dimensions,
            required_fields,
        }
    }

    /// Column holding the timestamp
    pub fn timestamp_column(&self) -> usize {
        self.timestamp_column
    }

    /// Tracked dimensions in tally order
    pub fn dimensions(&self) -> &[DimensionSpec] {
        &self.dimensions
    }

    /// Index of the dimension called `name`
    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    /// Minimum number of fields a row needs
    pub fn required_fields(&self) -> usize {
        self.required_fields
    }
}

/// Decodes raw rows into events according to a [`Schema`]
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    schema: Schema,
}

impl RecordDecoder {
    /// Create a decoder for `schema`
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    /// Schema this decoder applies
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Decode one row
    ///
    /// Pure: decoding the same row twice yields equal events.
    pub fn decode(&self, row: &RawRow) -> Result<Event, DecodeError> {
        if row.len() < self.schema.required_fields {
            return Err(DecodeError::TooFewFields {
                required: self.schema.required_fields,
                actual: row.len(),
            });
        }

        let ts_text = row.field(self.schema.timestamp_column).unwrap_or_default();
        let instant = timestamp::parse(ts_text)?;

        let mut values = Vec::with_capacity(self.schema.dimensions.len());
        for dim in &self.schema.dimensions {
            let raw = row.field(dim.column).unwrap_or_default();
            if raw.trim().is_empty() {
                return Err(DecodeError::EmptyField {
                    dimension: dim.name.clone(),
                });
            }
            let value = if dim.normalize {
                raw.trim().to_lowercase()
            } else {
                raw.to_string()
            };
            values.push(value);
        }

        Ok(Event::new(instant, values))
    }
}
