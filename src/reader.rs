//! Chunked record stream reader
//!
//! Pulls bounded batches of [`RawRow`]s from a (possibly gzip-compressed)
//! delimited text stream. The reader holds at most one chunk's worth of rows;
//! once a chunk is handed out it is forgotten.
//!
//! ```text
//! file ──► gzip sniff ──► MultiGzDecoder? ──► BufReader ──► split lines ──► Chunk(≤ chunk_size rows)
//! ```
//!
//! The sequence is lazy, finite and non-restartable. The final chunk may be
//! short; after it the iterator returns `None`.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

use crate::decoder::split_fields;
use crate::error::{Error, Result};
use crate::types::RawRow;

/// Gzip member magic bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read buffer size for the underlying stream
const READ_BUFFER_BYTES: usize = 1 << 20;

/// Options controlling how the stream is split into rows and chunks
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Maximum rows per chunk (default: 100_000)
    pub chunk_size: usize,

    /// Field delimiter (default: ',')
    pub delimiter: char,

    /// Skip the first line as a header (default: true)
    pub has_header: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: 100_000,
            delimiter: ',',
            has_header: true,
        }
    }
}

impl ReaderOptions {
    /// Set the maximum rows per chunk
    pub fn with_chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = rows.max(1);
        self
    }

    /// Set the field delimiter
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Treat the first line as data
    pub fn without_header(mut self) -> Self {
        self.has_header = false;
        self
    }
}

/// A bounded batch of rows read in order from the stream
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// 0-indexed position of this chunk in the stream
    pub index: u64,

    /// Rows in source order
    pub rows: Vec<RawRow>,
}

impl Chunk {
    /// Number of rows in the chunk
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the chunk carries no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Sequential chunk reader over any buffered text stream
pub struct ChunkReader<R: BufRead> {
    input: R,
    options: ReaderOptions,
    /// Lines consumed so far (header included)
    line: u64,
    next_index: u64,
    header_pending: bool,
    exhausted: bool,
    buf: Vec<u8>,
}

impl ChunkReader<Box<dyn BufRead + Send>> {
    /// Open a file, transparently decompressing gzip input
    ///
    /// An unreadable path is a configuration error: nothing has been
    /// processed yet and retrying without fixing the input cannot help.
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::Configuration(format!("Cannot open input {}: {}", path.display(), e))
        })?;

        let input = sniff_reader(file).map_err(|e| {
            Error::Configuration(format!("Cannot read input {}: {}", path.display(), e))
        })?;

        info!(
            path = %path.display(),
            chunk_size = options.chunk_size,
            "Opening record stream"
        );

        Ok(Self::new(input, options))
    }
}

impl<R: BufRead> ChunkReader<R> {
    /// Wrap an already-open buffered stream
    pub fn new(input: R, options: ReaderOptions) -> Self {
        let header_pending = options.has_header;
        Self {
            input,
            options: ReaderOptions {
                chunk_size: options.chunk_size.max(1),
                ..options
            },
            line: 0,
            next_index: 0,
            header_pending,
            exhausted: false,
            buf: Vec::with_capacity(256),
        }
    }

    /// Lines consumed so far, header included
    pub fn lines_read(&self) -> u64 {
        self.line
    }

    /// Read the next line without its terminator; `None` at end of stream
    ///
    /// Invalid UTF-8 is replaced rather than rejected so a single bad byte
    /// becomes a malformed row instead of a fatal read error.
    fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let n = self.input.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.line += 1;

        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    /// Read up to `chunk_size` rows
    fn read_chunk(&mut self) -> io::Result<Option<Chunk>> {
        if self.header_pending {
            self.header_pending = false;
            if self.next_line()?.is_none() {
                return Ok(None);
            }
        }

        let mut rows = Vec::with_capacity(self.options.chunk_size.min(1 << 16));
        while rows.len() < self.options.chunk_size {
            match self.next_line()? {
                Some(line) if line.is_empty() => continue,
                Some(line) => {
                    let fields = split_fields(&line, self.options.delimiter);
                    rows.push(RawRow::new(self.line, fields));
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        if rows.is_empty() {
            return Ok(None);
        }

        let chunk = Chunk {
            index: self.next_index,
            rows,
        };
        self.next_index += 1;
        debug!(chunk = chunk.index, rows = chunk.len(), "Read chunk");
        Ok(Some(chunk))
    }
}

impl<R: BufRead> Iterator for ChunkReader<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

/// Wrap any reader, decompressing when it starts with the gzip magic bytes
pub fn sniff_reader<R: Read + Send + 'static>(reader: R) -> io::Result<Box<dyn BufRead + Send>> {
    let mut buffered = BufReader::with_capacity(READ_BUFFER_BYTES, reader);
    let compressed = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
    debug!(compressed, "Sniffed input encoding");
    Ok(if compressed {
        Box::new(BufReader::with_capacity(
            READ_BUFFER_BYTES,
            MultiGzDecoder::new(buffered),
        ))
    } else {
        Box::new(buffered)
    })
}
