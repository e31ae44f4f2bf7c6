//! JSON Lines loading
//!
//! Every non-blank line holds one JSON object (a record) or an array of
//! objects (a collection). A line that does not parse is a hard error that
//! ends the stream; there is no skip-and-continue mode here.

use jsonflow_core::{Data, FlowError, Record, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Tracing target for loader events.
pub const TRACING_TARGET: &str = "jsonflow_io::loader";

/// Source of JSON Lines data.
pub struct JsonLoader {
    reader: Box<dyn BufRead + Send>,
    source: String,
}

impl JsonLoader {
    /// Read from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        debug!(target: TRACING_TARGET, path = %path.display(), "opened input file");
        Ok(Self {
            reader: Box::new(BufReader::new(file)),
            source: path.display().to_string(),
        })
    }

    /// Read from standard input.
    pub fn from_stdin() -> Self {
        Self {
            reader: Box::new(BufReader::new(io::stdin())),
            source: "<stdin>".to_string(),
        }
    }

    /// Read from any byte stream.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(BufReader::new(reader)),
            source: "<reader>".to_string(),
        }
    }

    /// Parse a single JSON document held in memory.
    pub fn from_json_string(text: &str) -> Result<Data> {
        parse_line(text.trim(), 1)
    }

    /// Parse several JSON documents, skipping blank entries.
    ///
    /// Line numbers in errors count every entry, blank ones included.
    pub fn from_json_strings<I, S>(texts: I) -> Result<Vec<Data>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        texts
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.as_ref().trim().is_empty())
            .map(|(idx, text)| parse_line(text.as_ref().trim(), idx + 1))
            .collect()
    }

    /// Human readable name of the source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Lazily parse the stream, one value per non-blank line.
    pub fn iter(self) -> DataIter {
        DataIter {
            reader: self.reader,
            line: 0,
            buf: String::new(),
            done: false,
        }
    }

    /// Load everything into one collection.
    ///
    /// Array lines are flattened into the collection.
    pub fn load(self) -> Result<Data> {
        let mut records = Vec::new();
        for data in self.iter() {
            records.extend(data?.into_records());
        }
        Ok(Data::Collection(records))
    }

    /// Lazily yield batches of at most `size` values.
    ///
    /// Unlike [`JsonLoader::load_batch`], a line holding an array stays one
    /// [`Data::Collection`], so collection-aware operators see it whole.
    pub fn chunks(self, size: usize) -> Result<Chunks> {
        if size == 0 {
            return Err(FlowError::Config("batch size must be greater than 0".into()));
        }
        Ok(Chunks {
            inner: self.iter(),
            size,
            error: None,
        })
    }

    /// Lazily yield collections of at most `size` records.
    ///
    /// Array lines are flattened into their records.
    pub fn load_batch(self, size: usize) -> Result<Batches> {
        if size == 0 {
            return Err(FlowError::Config("batch size must be greater than 0".into()));
        }
        Ok(Batches {
            inner: self.iter(),
            size,
            pending: VecDeque::new(),
            error: None,
            exhausted: false,
        })
    }
}

impl IntoIterator for JsonLoader {
    type Item = Result<Data>;
    type IntoIter = DataIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Parse one line of JSON Lines input. `line` is 1-based.
pub fn parse_line(text: &str, line: usize) -> Result<Data> {
    let value: Value = serde_json::from_str(text).map_err(|err| FlowError::MalformedInput {
        line,
        reason: err.to_string(),
    })?;
    Data::from_value(value).map_err(|err| match err {
        FlowError::Config(reason) => FlowError::MalformedInput { line, reason },
        other => other,
    })
}

/// Iterator over the values of a [`JsonLoader`].
///
/// The iterator is fused after the first error.
pub struct DataIter {
    reader: Box<dyn BufRead + Send>,
    line: usize,
    buf: String,
    done: bool,
}

impl DataIter {
    /// Number of lines consumed so far, blank ones included.
    pub fn lines_read(&self) -> usize {
        self.line
    }
}

impl Iterator for DataIter {
    type Item = Result<Data>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {
                    self.line += 1;
                    let text = self.buf.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let parsed = parse_line(text, self.line);
                    self.done = parsed.is_err();
                    return Some(parsed);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(FlowError::MalformedInput {
                        line: self.line + 1,
                        reason: err.to_string(),
                    }));
                }
            }
        }
    }
}

/// Iterator over fixed-size record batches.
///
/// Records read before an error are yielded first; the error follows.
pub struct Batches {
    inner: DataIter,
    size: usize,
    pending: VecDeque<Record>,
    error: Option<FlowError>,
    exhausted: bool,
}

impl Iterator for Batches {
    type Item = Result<Vec<Record>>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.exhausted && self.pending.len() < self.size {
            match self.inner.next() {
                Some(Ok(data)) => self.pending.extend(data.into_records()),
                Some(Err(err)) => {
                    self.error = Some(err);
                    self.exhausted = true;
                }
                None => self.exhausted = true,
            }
        }

        if !self.pending.is_empty() {
            let take = self.pending.len().min(self.size);
            return Some(Ok(self.pending.drain(..take).collect()));
        }
        self.error.take().map(Err)
    }
}

/// Iterator over batches of values, one per non-blank line.
///
/// Values read before an error are yielded first; the error follows.
pub struct Chunks {
    inner: DataIter,
    size: usize,
    error: Option<FlowError>,
}

impl Iterator for Chunks {
    type Item = Result<Vec<Data>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = Vec::with_capacity(self.size);
        while chunk.len() < self.size {
            match self.inner.next() {
                Some(Ok(data)) => chunk.push(data),
                Some(Err(err)) => {
                    self.error = Some(err);
                    break;
                }
                None => break,
            }
        }
        if chunk.is_empty() {
            return self.error.take().map(Err);
        }
        Some(Ok(chunk))
    }
}
