//! Chunked counting of patterns
//!
//! Each pattern is counted by an independent task, which accumulates counts
//! in memory until a configurable number of distinct sequences is reached,
//! then sorts them and flushes them to a chunk file. Memory usage is thus
//! bounded independently of the corpus size, and the chunk files of a pattern
//! can later be merged by a streaming k-way merge.

use crate::{
    config::Config,
    counts::{CountReader, CountValue, CountWriter, Counter},
    paths::Paths,
    pattern::{Family, Pattern, WSKIPPED_WORD},
    pool::WorkerPool,
    progress::ProgressReport,
    status::{Status, Training},
    training, Result,
};
use anyhow::Context;
use std::{
    collections::{hash_map, BTreeSet, HashMap},
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

/// Chunk every pattern of a set
///
/// Patterns must all belong to `family`. Returns the patterns whose chunking
/// failed, which are left unmarked in the ledger.
pub fn chunk(
    config: &Config,
    paths: &Paths,
    status: &Status,
    pool: &WorkerPool,
    report: &ProgressReport,
    family: Family,
    patterns: &BTreeSet<Pattern>,
) -> BTreeSet<Pattern> {
    log::debug!("{family} chunking patterns = {patterns:?}");
    match family {
        Family::Absolute => {
            let tagged = status.training() == Training::Tagged;
            pool.run("Absolute chunking", patterns, report, |pattern| {
                chunk_absolute(config, paths, status, pattern, tagged)
            })
        }
        Family::Continuation => pool.run("Continuation chunking", patterns, report, |pattern| {
            chunk_continuation(config, paths, status, pattern)
        }),
    }
}

/// Count the windows of the training file that a pattern renders
fn chunk_absolute(
    config: &Config,
    paths: &Paths,
    status: &Status,
    pattern: &Pattern,
    tagged: bool,
) -> Result<()> {
    let training = paths.training_file();
    let file = File::open(&training)
        .with_context(|| format!("opening training file {}", training.display()))?;
    let reader = BufReader::with_capacity(config.io_buffer.get(), file);

    let mut chunks = ChunkWriter::<u64>::new(config, paths.chunk_dir(pattern))?;
    let len = pattern.len();
    for line in reader.lines() {
        let line = line.with_context(|| format!("reading {}", training.display()))?;
        let (words, pos) = training::parse_line(&line, tagged);
        if words.len() < len {
            continue;
        }
        for position in 0..=(words.len() - len) {
            chunks.add(pattern.apply(&words, &pos, position), 1)?;
        }
    }
    let chunks = chunks.finish()?;
    log::trace!("Chunked absolute pattern {pattern} into {chunks:?}");
    status.mark_chunked(pattern, Family::Absolute, chunks)
}

/// Count the distinct source sequences that reduce to each sequence of a
/// continuation pattern
fn chunk_continuation(
    config: &Config,
    paths: &Paths,
    status: &Status,
    pattern: &Pattern,
) -> Result<()> {
    let source = pattern
        .continuation_source()
        .with_context(|| format!("{pattern} is not a continuation pattern"))?;
    anyhow::ensure!(
        status.counted(source.family()).contains(&source),
        "source pattern {source} of {pattern} is not counted yet"
    );
    let token = pattern
        .continuation_token_index()
        .expect("continuation patterns have a continuation marker");
    let source_file = paths.count_file(&source);

    let mut chunks = ChunkWriter::<Counter>::new(config, paths.chunk_dir(pattern))?;
    match source.family() {
        Family::Absolute => {
            let reader = CountReader::<u64>::open(&source_file, config.io_buffer.get())?;
            derive_contexts(reader, token, &mut chunks)?;
        }
        Family::Continuation => {
            let reader = CountReader::<Counter>::open(&source_file, config.io_buffer.get())?;
            derive_contexts(reader, token, &mut chunks)?;
        }
    }
    let chunks = chunks.finish()?;
    log::trace!("Chunked continuation pattern {pattern} from {source} into {chunks:?}");
    status.mark_chunked(pattern, Family::Continuation, chunks)
}

/// Turn each line of a source count file into one distinct context of the
/// continuation sequence it reduces to
fn derive_contexts<V: CountValue>(
    mut reader: CountReader<V>,
    token: usize,
    chunks: &mut ChunkWriter<Counter>,
) -> Result<()> {
    while let Some((sequence, value)) = reader.next_entry()? {
        let key = generalize_token(&sequence, token).with_context(|| {
            format!(
                "sequence {sequence:?} of {} has no token {token}",
                reader.path().display()
            )
        })?;
        chunks.add(key, Counter::from_context(value.frequency()))?;
    }
    Ok(())
}

/// Replace one token of a rendered sequence by the continuation wildcard
pub fn generalize_token(sequence: &str, token: usize) -> Option<String> {
    let mut tokens = sequence.split(' ').collect::<Vec<_>>();
    *tokens.get_mut(token)? = WSKIPPED_WORD;
    Some(tokens.join(" "))
}

/// Bounded-memory accumulator that spills sorted chunk files
#[derive(Debug)]
struct ChunkWriter<V> {
    /// Destination directory
    dir: PathBuf,

    /// Maximal number of distinct sequences held in memory
    chunk_size: usize,

    /// I/O buffer size
    io_buffer: usize,

    /// Counts accumulated since the last flush
    counts: HashMap<String, V>,

    /// Names of the chunk files written so far
    chunks: Vec<String>,
}
//
impl<V: CountValue> ChunkWriter<V> {
    /// Start chunking into a directory
    ///
    /// Leftovers of a previous, unfinished chunking of the same pattern are
    /// not part of the ledger and get removed.
    fn new(config: &Config, dir: PathBuf) -> Result<Self> {
        if dir.exists() {
            log::warn!("Removing stale chunks in {}", dir.display());
            fs::remove_dir_all(&dir)
                .with_context(|| format!("removing stale chunks in {}", dir.display()))?;
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating chunk directory {}", dir.display()))?;
        Ok(Self {
            dir,
            chunk_size: config.chunk_size.get(),
            io_buffer: config.io_buffer.get(),
            counts: HashMap::new(),
            chunks: Vec::new(),
        })
    }

    /// Account for one more occurence of a sequence
    fn add(&mut self, sequence: String, value: V) -> Result<()> {
        match self.counts.entry(sequence) {
            hash_map::Entry::Occupied(o) => o.into_mut().merge(&value),
            hash_map::Entry::Vacant(v) => {
                v.insert(value);
                if self.counts.len() >= self.chunk_size {
                    self.flush()?;
                }
            }
        }
        Ok(())
    }

    /// Sort the accumulated counts and write them to a new chunk file
    fn flush(&mut self) -> Result<()> {
        let name = format!("chunk{}", self.chunks.len());
        let path = self.dir.join(&name);
        let mut counts = self.counts.drain().collect::<Vec<_>>();
        counts.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
        write_chunk(&path, self.io_buffer, &counts)?;
        self.chunks.push(name);
        Ok(())
    }

    /// Flush what remains, return the names of all chunk files
    fn finish(mut self) -> Result<Vec<String>> {
        if !self.counts.is_empty() {
            self.flush()?;
        }
        Ok(self.chunks)
    }
}

/// Write sorted counts to a chunk file
fn write_chunk<V: CountValue>(path: &Path, io_buffer: usize, counts: &[(String, V)]) -> Result<()> {
    let mut writer = CountWriter::create(path, io_buffer)?;
    for (sequence, value) in counts {
        writer.push(sequence, value)?;
    }
    writer.finish()
}
