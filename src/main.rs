//! Command-line front-end of the pattern count engine
//!
//! Counts the requested patterns over a corpus into a working directory,
//! optionally builds the query cache of a query file, then prints a summary
//! of what the working directory holds.

use clap::Parser;
use glm_counts::{
    pattern::Pattern, CommandTagger, Config, CountCache, Engine, NoTagger, PatternElem,
    ProgressReport, Result, Tagger,
};
use log::LevelFilter;
use std::{
    collections::BTreeSet,
    io::{self, BufWriter, Write},
    num::NonZeroUsize,
    path::PathBuf,
    sync::Arc,
};
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

/// Count generalized n-gram patterns of a text corpus
///
/// The corpus is a text file with one sequence per line and whitespace
/// separated tokens, optionally tagged with parts of speech as in `fox/NN`.
/// Counts are stored in a working directory, and runs that are interrupted or
/// repeated only do the work that is missing from there.
#[derive(Parser, Debug)]
#[command(version, author)]
struct Args {
    /// Corpus to be counted
    corpus: PathBuf,

    /// Working directory where counts are stored
    ///
    /// Defaults to the corpus path with a `.counts` extension.
    #[arg(short, long)]
    working_dir: Option<PathBuf>,

    /// Pattern to be counted, e.g. "101" or "x1"
    ///
    /// Can be specified multiple times. Patterns are made of the symbols 1
    /// (word), 0 (skipped word), 2 (part-of-speech tag), x/y/z (continuation
    /// over a word, tag or both) and d (ignored position). By default, all
    /// patterns of words and skips up to the model length are counted, along
    /// with their word continuation variants.
    #[arg(short, long = "pattern")]
    patterns: Vec<Pattern>,

    /// Length of the longest default pattern
    #[arg(short = 'n', long, default_value = "3")]
    model_length: NonZeroUsize,

    /// Query file to build a query cache for
    ///
    /// The query cache holds the counts of the requested patterns that can
    /// be used to evaluate the sequences of this file.
    #[arg(short, long)]
    query: Option<PathBuf>,

    /// Number of worker threads
    ///
    /// Defaults to the available hardware parallelism.
    #[arg(short = 'j', long)]
    workers: Option<NonZeroUsize>,

    /// In-memory chunk size
    ///
    /// Number of distinct sequences that a worker accumulates in memory
    /// before flushing them to a chunk file. Larger chunks mean less merging
    /// work, but higher memory usage.
    #[arg(long, default_value = "1000000")]
    chunk_size: NonZeroUsize,

    /// Keep chunk files once they have been merged
    #[arg(long, default_value_t = false)]
    keep_chunks: bool,

    /// Part-of-speech tagger command
    ///
    /// Will be fed the untagged corpus on its standard input, and must write
    /// the tagged corpus to its standard output. Required if patterns with
    /// part-of-speech tags are requested and the corpus is not tagged.
    #[arg(long)]
    tagger_command: Option<String>,
}
//
impl Args {
    /// Decode and validate CLI arguments
    pub fn parse_and_check() -> Result<Self> {
        // Decode CLI arguments
        let args = Args::parse();

        // Check CLI arguments for basic sanity
        anyhow::ensure!(
            args.corpus.is_file(),
            "corpus {} is not a file",
            args.corpus.display()
        );
        if let Some(query) = &args.query {
            anyhow::ensure!(query.is_file(), "query file {} is not a file", query.display());
        }
        if let Some(working_dir) = &args.working_dir {
            anyhow::ensure!(
                !working_dir.is_file(),
                "working directory {} is a file",
                working_dir.display()
            );
        }
        Ok(args)
    }

    /// Working directory
    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| self.corpus.with_extension("counts"))
    }

    /// Patterns to be counted
    pub fn patterns(&self) -> BTreeSet<Pattern> {
        if !self.patterns.is_empty() {
            return self.patterns.iter().cloned().collect();
        }
        let absolute = Pattern::combinations(
            self.model_length.get(),
            &[PatternElem::Count, PatternElem::Skip],
        );
        let continuation =
            Pattern::replace_target_with_elems(&absolute, PatternElem::Skip, &[PatternElem::WordSkip]);
        absolute.into_iter().chain(continuation).collect()
    }

    /// Engine configuration
    pub fn config(&self) -> Config {
        let config = Config::default()
            .with_chunk_size(self.chunk_size)
            .keep_chunks(self.keep_chunks);
        match self.workers {
            Some(workers) => config.with_workers(workers),
            None => config,
        }
    }

    /// Part-of-speech tagger
    pub fn tagger(&self) -> Result<Box<dyn Tagger>> {
        Ok(match &self.tagger_command {
            Some(command) => Box::new(CommandTagger::from_command_line(command)?),
            None => Box::new(NoTagger),
        })
    }
}
//
fn main() -> Result<()> {
    // Set up logging
    setup_logging().map_err(|e| anyhow::format_err!("{e}"))?;

    // Decode CLI arguments
    let args = Args::parse_and_check()?;
    let patterns = args.patterns();

    // Set up progress reporting
    let report = ProgressReport::new();

    // Count the requested patterns
    let config = Arc::new(args.config());
    let engine = Engine::new(
        config,
        &args.corpus,
        args.working_dir(),
        args.tagger()?,
        report.clone(),
    )?;
    engine.count(&patterns)?;

    // Build the query cache, if asked to
    let cache = match &args.query {
        Some(query) => Some(engine.build_query_cache(query, &patterns)?),
        None => None,
    };

    // Display a summary
    let stdout = io::stdout();
    let mut stdout = BufWriter::new(stdout.lock());
    writeln!(stdout, "Working directory: {}", engine.paths().dir().display())?;
    writeln!(
        stdout,
        "Tasks: {} completed, {} failed",
        report.tasks_completed(),
        report.tasks_failed()
    )?;
    let counted = engine.status().all_counted();
    writeln!(stdout, "Counted patterns ({}):", counted.len())?;
    for pattern in &counted {
        writeln!(stdout, "    {pattern}")?;
    }
    if let Some(cache) = cache {
        write_query_summary(&mut stdout, &cache)?;
    }
    stdout.flush()?;
    Ok(())
}

/// Display what a query cache holds
fn write_query_summary(output: &mut impl Write, cache: &CountCache) -> Result<()> {
    writeln!(output, "Query cache patterns: {}", cache.patterns().len())?;
    for pattern in cache.patterns() {
        if let Ok([n1, n2, n3, n4]) = cache.count_of_counts(&pattern) {
            writeln!(output, "    {pattern}\t{n1}\t{n2}\t{n3}\t{n4}")?;
        }
    }
    if let Ok(num_words) = cache.num_words() {
        writeln!(output, "Number of words: {num_words}")?;
    }
    if let Ok(vocabulary_size) = cache.vocabulary_size() {
        writeln!(output, "Vocabulary size: {vocabulary_size}")?;
    }
    Ok(())
}

/// Set up logging
fn setup_logging() -> syslog::Result<()> {
    syslog::init(
        syslog::Facility::LOG_USER,
        if cfg!(feature = "log-trace") {
            LevelFilter::Trace
        } else if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        None,
    )
}

/// Use jemalloc for improved multi-thread performance
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
