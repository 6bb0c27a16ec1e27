//! Record readers
//!
//! A reader produces a lazy, finite sequence of typed records and can be
//! repositioned for restarts. [`FlatFileReader`] is the delimited-file
//! implementation used by the import job; database- or network-backed
//! sources implement the same trait.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lazy, finite, positionally restartable record sequence
#[async_trait]
pub trait RecordReader<R>: Send {
    /// Next record, or `None` when the sequence is exhausted
    async fn next(&mut self) -> Result<Option<R>>;

    /// Skip `items` records so reading resumes after a committed prefix
    ///
    /// The default drains `next()`; implementations with cheap random
    /// access can override.
    async fn jump_to(&mut self, items: u64) -> Result<()> {
        for _ in 0..items {
            if self.next().await?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

/// Maps the tokens of one data line to a record
pub type LineMapper<R> = Arc<dyn Fn(&[&str]) -> R + Send + Sync>;

/// Delimited flat-file reader
///
/// Skips a configurable number of leading lines (header rows), then decodes
/// each line by splitting on a fixed delimiter and handing the tokens to the
/// line mapper. Tokenization is non-strict: the mapper receives however many
/// tokens the line holds and is responsible for defaulting missing trailing
/// fields. At most one line is buffered at a time.
pub struct FlatFileReader<R> {
    path: PathBuf,
    delimiter: char,
    lines_to_skip: usize,
    mapper: LineMapper<R>,
    lines: Option<Lines<BufReader<File>>>,
}

impl<R> FlatFileReader<R> {
    pub fn new(path: impl AsRef<Path>, mapper: LineMapper<R>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter: ',',
            lines_to_skip: 0,
            mapper,
            lines: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_lines_to_skip(mut self, lines: usize) -> Self {
        self.lines_to_skip = lines;
        self
    }

    /// Open the underlying file and skip leading lines
    fn open(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open input resource {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();

        for _ in 0..self.lines_to_skip {
            if lines.next().transpose()?.is_none() {
                break;
            }
        }

        self.lines = Some(lines);
        Ok(())
    }

    /// Pull the next non-blank data line
    fn next_line(&mut self) -> Result<Option<String>> {
        if self.lines.is_none() {
            self.open()?;
        }

        let lines = self.lines.as_mut().unwrap_or_else(|| unreachable!());
        for line in lines {
            let line = line.context("Failed to read line from input resource")?;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<R: Send + 'static> RecordReader<R> for FlatFileReader<R> {
    async fn next(&mut self) -> Result<Option<R>> {
        match self.next_line()? {
            Some(line) => {
                let tokens: Vec<&str> = line.split(self.delimiter).map(str::trim).collect();
                Ok(Some((self.mapper)(&tokens)))
            }
            None => Ok(None),
        }
    }
}
