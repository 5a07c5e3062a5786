//! Count files and the count records they hold
//!
//! Every count file (chunk, final count file, query cache) is a sequence of
//! lines `<rendered sequence>\t<count fields>`, sorted by strictly increasing
//! sequence. Absolute counts have a single field, continuation counts have the
//! four fields of a [`Counter`].

use crate::{error::CountError, Result};
use anyhow::Context;
use std::{
    fmt::{self, Display},
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tempfile::NamedTempFile;

/// Continuation count record
///
/// Counts the distinct contexts in which a generalized sequence occurs, with
/// a breakdown by how often the context itself occurs, as needed by
/// discounting estimators.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Counter {
    /// Number of distinct contexts
    pub one_plus: u64,

    /// Number of distinct contexts that occur exactly once
    pub one: u64,

    /// Number of distinct contexts that occur exactly twice
    pub two: u64,

    /// Number of distinct contexts that occur three times or more
    pub three_plus: u64,
}
//
impl Counter {
    /// Counter of a single context with some occurence count
    pub fn from_context(count: u64) -> Self {
        let mut counter = Self::default();
        counter.add_context(count);
        counter
    }

    /// Record one more distinct context with some occurence count
    pub fn add_context(&mut self, count: u64) {
        self.one_plus += 1;
        match count {
            0 => {}
            1 => self.one += 1,
            2 => self.two += 1,
            _ => self.three_plus += 1,
        }
    }

    /// Add the contexts of another counter
    pub fn merge(&mut self, other: &Self) {
        self.one_plus += other.one_plus;
        self.one += other.one;
        self.two += other.two;
        self.three_plus += other.three_plus;
    }
}
//
impl Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.one_plus, self.one, self.two, self.three_plus
        )
    }
}
//
impl FromStr for Counter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split('\t').map(|field| {
            field
                .parse::<u64>()
                .map_err(|e| format!("bad count field {field:?}: {e}"))
        });
        let mut next = || fields.next().unwrap_or_else(|| Err("missing count field".to_owned()));
        let counter = Self {
            one_plus: next()?,
            one: next()?,
            two: next()?,
            three_plus: next()?,
        };
        if fields.next().is_some() {
            return Err("too many count fields".to_owned());
        }
        Ok(counter)
    }
}

/// Value stored on the lines of a count file
pub trait CountValue: Copy + Default + Display + Send + Sync + 'static {
    /// Decode the count fields of a line
    fn parse_fields(fields: &str) -> Result<Self, String>;

    /// Accumulate another value for the same sequence
    fn merge(&mut self, other: &Self);

    /// Number of times the sequence occurred, as used for frequency classes
    fn frequency(&self) -> u64;
}
//
impl CountValue for u64 {
    fn parse_fields(fields: &str) -> Result<Self, String> {
        fields
            .parse()
            .map_err(|e| format!("bad count field {fields:?}: {e}"))
    }

    fn merge(&mut self, other: &Self) {
        *self += *other;
    }

    fn frequency(&self) -> u64 {
        *self
    }
}
//
impl CountValue for Counter {
    fn parse_fields(fields: &str) -> Result<Self, String> {
        fields.parse()
    }

    fn merge(&mut self, other: &Self) {
        Counter::merge(self, other)
    }

    fn frequency(&self) -> u64 {
        self.one_plus
    }
}

/// Split a count line into its sequence and count fields
pub fn split_line(line: &str) -> Option<(&str, &str)> {
    line.split_once('\t')
}

/// Streaming reader of a count file
#[derive(Debug)]
pub struct CountReader<V> {
    /// Path of the file, for error reporting
    path: PathBuf,

    /// Underlying reader
    reader: BufReader<File>,

    /// Line buffer
    line: String,

    /// Number of lines read so far
    line_number: usize,

    /// Last sequence seen, used to check sortedness
    previous: Option<String>,

    /// Count value type
    values: std::marker::PhantomData<V>,
}
//
impl<V: CountValue> CountReader<V> {
    /// Open a count file
    pub fn open(path: &Path, buffer_size: usize) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            path: path.to_owned(),
            reader: BufReader::with_capacity(buffer_size, file),
            line: String::new(),
            line_number: 0,
            previous: None,
            values: std::marker::PhantomData,
        })
    }

    /// Read the next entry, checking that the file is strictly sorted
    pub fn next_entry(&mut self) -> Result<Option<(String, V)>> {
        self.line.clear();
        let len = (self.reader.read_line(&mut self.line))
            .with_context(|| format!("reading {}", self.path.display()))?;
        if len == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        let line = self.line.strip_suffix('\n').unwrap_or(&self.line);
        let malformed = |reason: String| CountError::MalformedLine {
            file: self.path.clone(),
            line: self.line_number,
            reason,
        };
        let (sequence, fields) =
            split_line(line).ok_or_else(|| malformed("no tab separator".to_owned()))?;
        let value = V::parse_fields(fields).map_err(malformed)?;
        if let Some(previous) = &self.previous {
            if previous.as_str() >= sequence {
                return Err(CountError::Unsorted {
                    file: self.path.clone(),
                    line: self.line_number,
                    previous: previous.clone(),
                    current: sequence.to_owned(),
                }
                .into());
            }
        }
        let sequence = sequence.to_owned();
        self.previous = Some(sequence.clone());
        Ok(Some((sequence, value)))
    }

    /// Path of the file being read
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writer of a count file
///
/// Data goes to a temporary file next to the destination, which only
/// replaces the destination once everything has been flushed to disk, so
/// that a crash never leaves a truncated count file behind.
#[derive(Debug)]
pub struct CountWriter {
    /// Final destination
    path: PathBuf,

    /// Temporary file being written
    writer: BufWriter<NamedTempFile>,
}
//
impl CountWriter {
    /// Start writing a count file
    pub fn create(path: &Path, buffer_size: usize) -> Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let file = NamedTempFile::new_in(dir)
            .with_context(|| format!("creating a temporary file in {}", dir.display()))?;
        Ok(Self {
            path: path.to_owned(),
            writer: BufWriter::with_capacity(buffer_size, file),
        })
    }

    /// Append a line
    ///
    /// Lines must be pushed in strictly increasing sequence order.
    pub fn push(&mut self, sequence: &str, value: &impl Display) -> Result<()> {
        writeln!(self.writer, "{sequence}\t{value}")
            .with_context(|| format!("writing {}", self.path.display()))
    }

    /// Flush everything to disk and move the file to its destination
    pub fn finish(self) -> Result<()> {
        let context = || format!("finishing {}", self.path.display());
        let file = self
            .writer
            .into_inner()
            .map_err(|e| e.into_error())
            .with_context(context)?;
        file.as_file().sync_all().with_context(context)?;
        file.persist(&self.path).with_context(context)?;
        Ok(())
    }
}
