//! Columnar delegation path
//!
//! An alternate way to answer the same window + frequency question: ask a
//! columnar source for `(value, count)` pairs of one column inside a window
//! and rank them with the same rules as the streaming engine.
//!
//! The source also answers two grouped questions the streaming tallies
//! cannot: values ranked by how many distinct keys produced them (colors by
//! distinct users), and the top values of one column inside each leading
//! value of another (top colors of the most placed coordinates).
//!
//! [`ColumnarTable`] is an in-memory, column-pruned, dictionary-encoded
//! dataset built once from the chunk stream. Rows are sorted by instant so a
//! window maps to one contiguous row range.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io;
use std::ops::Range;
use tracing::{debug, info};

use crate::decoder::RecordDecoder;
use crate::error::{Error, Result};
use crate::frequency::{FrequencyTable, RankedResult};
use crate::reader::Chunk;
use crate::types::{Event, Instant, TimeWindow};

/// Read interface to a columnar engine
pub trait ColumnarSource: Send + Sync {
    /// Column names available for counting
    fn columns(&self) -> Vec<String>;

    /// Count the values of `column` over rows whose instant lies in `window`
    ///
    /// Pairs come back in no particular order and only with non-zero counts.
    fn value_counts(&self, column: &str, window: &TimeWindow) -> Result<Vec<(String, u64)>>;

    /// For each value of `column` in `window`, count the distinct values of
    /// `distinct_by` seen on the same rows
    fn distinct_counts(
        &self,
        column: &str,
        distinct_by: &str,
        window: &TimeWindow,
    ) -> Result<Vec<(String, u64)>>;

    /// Like `value_counts`, restricted to rows where `filter_column` equals
    /// `filter_value`
    fn value_counts_where(
        &self,
        column: &str,
        filter_column: &str,
        filter_value: &str,
        window: &TimeWindow,
    ) -> Result<Vec<(String, u64)>>;
}

/// Rank the values of `column` in `window`, best first
///
/// Returns a single "no data" sentinel when nothing matches.
pub fn rank_from_source<S: ColumnarSource + ?Sized>(
    source: &S,
    column: &str,
    window: &TimeWindow,
    k: usize,
) -> Result<Vec<RankedResult>> {
    let table = FrequencyTable::from_pairs(source.value_counts(column, window)?);
    Ok(RankedResult::top_k_from_table(column, &table, k.max(1)))
}

/// Rank the values of `column` by distinct `distinct_by` count, best first
///
/// Counts in the results are distinct-key counts. Ties and the empty case
/// follow `rank_from_source`.
pub fn rank_distinct_from_source<S: ColumnarSource + ?Sized>(
    source: &S,
    column: &str,
    distinct_by: &str,
    window: &TimeWindow,
    k: usize,
) -> Result<Vec<RankedResult>> {
    let table = FrequencyTable::from_pairs(source.distinct_counts(column, distinct_by, window)?);
    Ok(RankedResult::top_k_from_table(column, &table, k.max(1)))
}

/// Top values of one column inside a single value of another
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakdown {
    /// Leading value and its count over the whole window
    pub leader: RankedResult,
    /// Top values of the broken-down column among the leader's rows
    pub ranked: Vec<RankedResult>,
}

/// Top `per` values of `column` for each of the top `leaders` values of `by`
///
/// Leaders come in rank order. An empty window yields no breakdowns.
pub fn rank_breakdown_from_source<S: ColumnarSource + ?Sized>(
    source: &S,
    by: &str,
    column: &str,
    window: &TimeWindow,
    leaders: usize,
    per: usize,
) -> Result<Vec<Breakdown>> {
    let mut breakdowns = Vec::new();
    for leader in rank_from_source(source, by, window, leaders)? {
        let Some(value) = leader.value.as_deref() else {
            continue;
        };
        let counts = source.value_counts_where(column, by, value, window)?;
        let table = FrequencyTable::from_pairs(counts);
        let ranked = RankedResult::top_k_from_table(column, &table, per.max(1));
        breakdowns.push(Breakdown { leader, ranked });
    }
    Ok(breakdowns)
}

/// One dictionary-encoded column
#[derive(Debug, Clone, Default)]
struct DictColumn {
    dictionary: Vec<String>,
    lookup: HashMap<String, u32>,
    codes: Vec<u32>,
}

impl DictColumn {
    fn push(&mut self, value: &str) {
        let code = match self.lookup.get(value) {
            Some(&code) => code,
            None => {
                let code = self.dictionary.len() as u32;
                self.dictionary.push(value.to_owned());
                self.lookup.insert(value.to_owned(), code);
                code
            }
        };
        self.codes.push(code);
    }

    fn code_of(&self, value: &str) -> Option<u32> {
        self.lookup.get(value).copied()
    }

    /// Reorder codes so that row `i` takes the code of row `order[i]`
    fn permute(&mut self, order: &[usize]) {
        self.codes = order.iter().map(|&i| self.codes[i]).collect();
    }

    fn counts(&self, rows: Range<usize>) -> Vec<(String, u64)> {
        self.tally(self.codes[rows].iter().copied())
    }

    fn tally(&self, codes: impl Iterator<Item = u32>) -> Vec<(String, u64)> {
        let mut counts = vec![0u64; self.dictionary.len()];
        for code in codes {
            counts[code as usize] += 1;
        }
        counts
            .into_iter()
            .enumerate()
            .filter(|&(_, n)| n > 0)
            .map(|(code, n)| (self.dictionary[code].clone(), n))
            .collect()
    }
}

/// In-memory typed dataset with only the tracked columns kept
#[derive(Debug, Clone, Default)]
pub struct ColumnarTable {
    names: Vec<String>,
    instants: Vec<Instant>,
    columns: Vec<DictColumn>,
    skipped: u64,
}

impl ColumnarTable {
    fn with_names(names: Vec<String>) -> Self {
        let columns = vec![DictColumn::default(); names.len()];
        Self {
            names,
            columns,
            ..Self::default()
        }
    }

    /// Build from decoded events
    pub fn from_events(names: Vec<String>, events: Vec<Event>) -> Self {
        let mut table = Self::with_names(names);
        for event in &events {
            table.push(event);
        }
        table.sort_by_instant();
        table
    }

    /// Build from a chunk stream, decoding every row with `decoder`
    ///
    /// Rows are encoded as each chunk arrives, so only the dictionary-encoded
    /// form is held. Malformed rows are skipped and counted; a read error
    /// aborts the load.
    pub fn from_chunks<I>(decoder: &RecordDecoder, chunks: I) -> Result<Self>
    where
        I: IntoIterator<Item = io::Result<Chunk>>,
    {
        let names = decoder
            .schema()
            .dimensions()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        let mut table = Self::with_names(names);

        let mut last_loaded: Option<u64> = None;
        for next in chunks {
            let chunk = next.map_err(|source| Error::Read {
                chunk: last_loaded.map_or(0, |i| i + 1),
                source,
                last_merged_chunk: last_loaded,
            })?;
            for row in &chunk.rows {
                match decoder.decode(row) {
                    Ok(event) => table.push(&event),
                    Err(_) => table.skipped += 1,
                }
            }
            debug!(chunk = chunk.index, rows = chunk.len(), "Loaded chunk into columnar table");
            last_loaded = Some(chunk.index);
        }

        table.sort_by_instant();
        info!(rows = table.len(), skipped = table.skipped, "Built columnar table");
        Ok(table)
    }

    fn push(&mut self, event: &Event) {
        self.instants.push(event.instant());
        for (column, value) in self.columns.iter_mut().zip(event.values()) {
            column.push(value);
        }
    }

    /// Stable sort of every column by instant
    fn sort_by_instant(&mut self) {
        if self.instants.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }
        let mut order: Vec<usize> = (0..self.instants.len()).collect();
        order.sort_by_key(|&i| self.instants[i]);

        self.instants = order.iter().map(|&i| self.instants[i]).collect();
        for column in &mut self.columns {
            column.permute(&order);
        }
    }

    /// Number of stored rows
    pub fn len(&self) -> usize {
        self.instants.len()
    }

    /// True when no rows are stored
    pub fn is_empty(&self) -> bool {
        self.instants.is_empty()
    }

    /// Rows dropped as malformed while loading
    pub fn skipped_rows(&self) -> u64 {
        self.skipped
    }

    /// Distinct values stored for `column`
    pub fn cardinality(&self, column: &str) -> Option<usize> {
        let index = self.names.iter().position(|n| n == column)?;
        Some(self.columns[index].dictionary.len())
    }

    fn column(&self, name: &str) -> Result<&DictColumn> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|index| &self.columns[index])
            .ok_or_else(|| Error::Configuration(format!("Unknown column '{}'", name)))
    }

    fn window_rows(&self, window: &TimeWindow) -> Range<usize> {
        let start = self.instants.partition_point(|t| *t < window.start());
        let end = self.instants.partition_point(|t| *t < window.end());
        start..end.max(start)
    }
}

impl ColumnarSource for ColumnarTable {
    fn columns(&self) -> Vec<String> {
        self.names.clone()
    }

    fn value_counts(&self, column: &str, window: &TimeWindow) -> Result<Vec<(String, u64)>> {
        Ok(self.column(column)?.counts(self.window_rows(window)))
    }

    fn distinct_counts(
        &self,
        column: &str,
        distinct_by: &str,
        window: &TimeWindow,
    ) -> Result<Vec<(String, u64)>> {
        let values = self.column(column)?;
        let keys = self.column(distinct_by)?;
        let rows = self.window_rows(window);

        let pairs: HashSet<(u32, u32)> = values.codes[rows.clone()]
            .iter()
            .copied()
            .zip(keys.codes[rows].iter().copied())
            .collect();
        Ok(values.tally(pairs.into_iter().map(|(value, _)| value)))
    }

    fn value_counts_where(
        &self,
        column: &str,
        filter_column: &str,
        filter_value: &str,
        window: &TimeWindow,
    ) -> Result<Vec<(String, u64)>> {
        let values = self.column(column)?;
        let filter = self.column(filter_column)?;
        let Some(wanted) = filter.code_of(filter_value) else {
            return Ok(Vec::new());
        };
        let rows = self.window_rows(window);

        let matching = values.codes[rows.clone()]
            .iter()
            .zip(&filter.codes[rows])
            .filter(|&(_, &code)| code == wanted)
            .map(|(&value, _)| value);
        Ok(values.tally(matching))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Schema;
    use crate::reader::{ChunkReader, ReaderOptions};
    use crate::types::DimensionSpec;
    use std::io::Cursor;

    const CSV: &str = "timestamp,user_id,pixel_color,coordinate\n\
        2022-04-01 00:00:03 UTC,u3,blue,\"0,0\"\n\
        2022-04-01 00:00:01 UTC,u1,red,\"0,0\"\n\
        bogus,u9,red,\"0,0\"\n\
        2022-04-01 00:00:02 UTC,u2,red,\"1,1\"\n\
        2022-04-01 01:00:00 UTC,u4,green,\"5,5\"\n";

    fn table() -> ColumnarTable {
        let schema = Schema::new(
            0,
            vec![DimensionSpec::new("color", 2), DimensionSpec::new("coordinate", 3)],
        );
        let reader = ChunkReader::new(
            Cursor::new(CSV),
            ReaderOptions::default().with_chunk_size(2),
        );
        ColumnarTable::from_chunks(&RecordDecoder::new(schema), reader).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::parse("2022-04-01 00", "2022-04-01 01").unwrap()
    }

    #[test]
    fn test_load_skips_malformed() {
        let table = table();
        assert_eq!(table.len(), 4);
        assert_eq!(table.skipped_rows(), 1);
        assert_eq!(table.cardinality("color"), Some(3));
        assert_eq!(table.cardinality("user"), None);
        assert_eq!(table.columns(), vec!["color".to_string(), "coordinate".to_string()]);
    }

    #[test]
    fn test_value_counts_respect_window() {
        let mut counts = table().value_counts("color", &window()).unwrap();
        counts.sort();
        assert_eq!(counts, vec![("blue".to_string(), 1), ("red".to_string(), 2)]);
    }

    #[test]
    fn test_rank_matches_streaming_contract() {
        let table = table();
        let color = rank_from_source(&table, "color", &window(), 1).unwrap();
        assert_eq!(color[0].value.as_deref(), Some("red"));
        assert_eq!(color[0].count, 2);

        let coordinate = rank_from_source(&table, "coordinate", &window(), 1).unwrap();
        assert_eq!(coordinate[0].value.as_deref(), Some("0,0"));
        assert_eq!(coordinate[0].count, 2);
    }

    #[test]
    fn test_empty_window_is_sentinel() {
        let window = TimeWindow::parse("2023-01-01 00", "2023-01-01 05").unwrap();
        let ranked = rank_from_source(&table(), "color", &window, 3).unwrap();
        assert_eq!(ranked, vec![RankedResult::no_data("color")]);
    }

    #[test]
    fn test_unknown_column() {
        let err = table().value_counts("user", &window()).unwrap_err();
        assert!(err.is_configuration());
        let err = table().distinct_counts("color", "user", &window()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rows_sorted_by_instant_across_chunks() {
        let table = table();
        assert!(table.instants.windows(2).all(|w| w[0] <= w[1]));

        // Codes travel with their rows: the earliest row is u1's red "0,0"
        let color = &table.columns[0];
        let coordinate = &table.columns[1];
        assert_eq!(color.dictionary[color.codes[0] as usize], "red");
        assert_eq!(coordinate.dictionary[coordinate.codes[0] as usize], "0,0");
        assert_eq!(color.dictionary[color.codes[3] as usize], "green");
    }

    #[test]
    fn test_from_events_matches_from_chunks() {
        let decoder = RecordDecoder::new(Schema::new(
            0,
            vec![DimensionSpec::new("color", 2), DimensionSpec::new("coordinate", 3)],
        ));
        let events: Vec<Event> = ChunkReader::new(Cursor::new(CSV), ReaderOptions::default())
            .flat_map(|chunk| chunk.unwrap().rows)
            .filter_map(|row| decoder.decode(&row).ok())
            .collect();
        let from_events =
            ColumnarTable::from_events(vec!["color".into(), "coordinate".into()], events);

        let chunked = table();
        assert_eq!(from_events.instants, chunked.instants);
        for column in ["color", "coordinate"] {
            let mut a = from_events.value_counts(column, &window()).unwrap();
            let mut b = chunked.value_counts(column, &window()).unwrap();
            a.sort();
            b.sort();
            assert_eq!(a, b);
        }
    }

    const USERS_CSV: &str = "timestamp,user_id,pixel_color,coordinate\n\
        2022-04-01 00:00:01 UTC,u1,red,\"0,0\"\n\
        2022-04-01 00:00:02 UTC,u1,red,\"0,0\"\n\
        2022-04-01 00:00:03 UTC,u1,red,\"1,1\"\n\
        2022-04-01 00:00:04 UTC,u2,blue,\"0,0\"\n\
        2022-04-01 00:00:05 UTC,u3,blue,\"1,1\"\n\
        2022-04-01 00:00:06 UTC,u2, White ,\"0,0\"\n\
        2022-04-01 00:00:07 UTC,u4,white,\"0,0\"\n\
        2022-04-01 03:00:00 UTC,u9,red,\"0,0\"\n";

    fn users_table() -> ColumnarTable {
        let schema = Schema::new(
            0,
            vec![
                DimensionSpec::new("color", 2).normalized(),
                DimensionSpec::new("coordinate", 3),
                DimensionSpec::new("user", 1),
            ],
        );
        let reader = ChunkReader::new(
            Cursor::new(USERS_CSV),
            ReaderOptions::default().with_chunk_size(3),
        );
        ColumnarTable::from_chunks(&RecordDecoder::new(schema), reader).unwrap()
    }

    #[test]
    fn test_colors_ranked_by_distinct_users() {
        let table = users_table();

        // red has the most placements but a single user
        let placements = rank_from_source(&table, "color", &window(), 1).unwrap();
        assert_eq!(placements[0].value.as_deref(), Some("red"));

        let ranked = rank_distinct_from_source(&table, "color", "user", &window(), 3).unwrap();
        let got: Vec<_> = ranked
            .iter()
            .map(|r| (r.value.as_deref().unwrap(), r.count))
            .collect();
        assert_eq!(got, vec![("blue", 2), ("white", 2), ("red", 1)]);
    }

    #[test]
    fn test_distinct_rank_empty_window() {
        let window = TimeWindow::parse("2023-01-01 00", "2023-01-01 01").unwrap();
        let ranked = rank_distinct_from_source(&users_table(), "color", "user", &window, 3).unwrap();
        assert_eq!(ranked, vec![RankedResult::no_data("color")]);
    }

    #[test]
    fn test_top_colors_for_top_coordinates() {
        let table = users_table();
        let breakdowns =
            rank_breakdown_from_source(&table, "coordinate", "color", &window(), 2, 2).unwrap();
        assert_eq!(breakdowns.len(), 2);

        let first = &breakdowns[0];
        assert_eq!(first.leader.value.as_deref(), Some("0,0"));
        assert_eq!(first.leader.count, 5);
        let colors: Vec<_> = first
            .ranked
            .iter()
            .map(|r| (r.value.as_deref().unwrap(), r.count))
            .collect();
        assert_eq!(colors, vec![("red", 2), ("white", 2)]);

        let second = &breakdowns[1];
        assert_eq!(second.leader.value.as_deref(), Some("1,1"));
        let colors: Vec<_> = second
            .ranked
            .iter()
            .map(|r| (r.value.as_deref().unwrap(), r.count))
            .collect();
        assert_eq!(colors, vec![("blue", 1), ("red", 1)]);
    }

    #[test]
    fn test_breakdown_of_empty_window() {
        let window = TimeWindow::parse("2023-01-01 00", "2023-01-01 01").unwrap();
        let breakdowns =
            rank_breakdown_from_source(&users_table(), "coordinate", "color", &window, 3, 2)
                .unwrap();
        assert!(breakdowns.is_empty());
    }

    #[test]
    fn test_filtered_counts_for_unseen_value() {
        let counts = users_table()
            .value_counts_where("color", "coordinate", "7,7", &window())
            .unwrap();
        assert!(counts.is_empty());
    }
}
