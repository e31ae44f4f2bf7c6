//! JSON Lines writing
//!
//! Each record becomes exactly one line. Non-ASCII text is written as is;
//! control characters inside strings are escaped so no record spans lines.

use jsonflow_core::{Data, Record, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Tracing target for saver events.
pub const TRACING_TARGET: &str = "jsonflow_io::saver";

/// How an existing output file is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Truncate and start fresh
    #[default]
    Overwrite,
    /// Keep existing lines and add after them
    Append,
}

/// Sink for JSON Lines data.
pub struct JsonSaver {
    writer: Box<dyn Write + Send>,
    records_written: u64,
}

impl JsonSaver {
    /// Write to a file, creating it when missing.
    pub fn to_path(path: impl AsRef<Path>, mode: SaveMode) -> Result<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            SaveMode::Overwrite => options.write(true).truncate(true),
            SaveMode::Append => options.append(true),
        };
        let file = options.open(path)?;
        debug!(target: TRACING_TARGET, path = %path.display(), ?mode, "opened output file");
        Ok(Self::to_writer(file))
    }

    /// Write to standard output.
    pub fn to_stdout() -> Self {
        Self::to_writer(io::stdout())
    }

    /// Write to any byte sink.
    pub fn to_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Box::new(BufWriter::new(writer)),
            records_written: 0,
        }
    }

    /// Write one record as a line.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.records_written += 1;
        Ok(())
    }

    /// Write a record, or every record of a collection on its own line.
    pub fn write(&mut self, data: &Data) -> Result<()> {
        match data {
            Data::Record(record) => self.write_record(record),
            Data::Collection(records) => {
                for record in records {
                    self.write_record(record)?;
                }
                Ok(())
            }
        }
    }

    /// Write several values in order.
    pub fn write_all<'a, I>(&mut self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Data>,
    {
        for data in items {
            self.write(data)?;
        }
        Ok(())
    }

    /// Records written so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush buffered output.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the number of records written.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        Ok(self.records_written)
    }
}
