//! Count pipeline driver
//!
//! The engine owns everything that lives as long as a working directory is
//! in use (configuration, ledger, worker pool, progress report) and runs the
//! pipeline stages in dependency order. After each stage, it checks with the
//! ledger that every expected pattern was produced, and stops there if some
//! are missing instead of building on incomplete results.

use crate::{
    cache::CountCache,
    chunker,
    config::Config,
    error::ValidationFailure,
    merger,
    paths::Paths,
    pattern::{Family, Pattern},
    pool::WorkerPool,
    progress::ProgressReport,
    query_cache, resolver,
    stats,
    status::Status,
    training::{self, Tagger},
    Result,
};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Count engine bound to a corpus and a working directory
pub struct Engine {
    /// Configuration
    config: Arc<Config>,

    /// Corpus that counts are computed from
    corpus: PathBuf,

    /// Working directory layout
    paths: Paths,

    /// Ledger of the working directory
    status: Status,

    /// Part-of-speech tagger
    tagger: Box<dyn Tagger>,

    /// Workers that patterns are dispatched to
    pool: WorkerPool,

    /// Progress report
    report: ProgressReport,
}
//
impl Engine {
    /// Open a working directory for counting a corpus
    ///
    /// The working directory is created if needed. If it was previously used
    /// with the same corpus, work that was done then is reused.
    pub fn new(
        config: Arc<Config>,
        corpus: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        tagger: Box<dyn Tagger>,
        report: ProgressReport,
    ) -> Result<Self> {
        let corpus = corpus.into();
        anyhow::ensure!(corpus.is_file(), "corpus {} is not a file", corpus.display());
        let paths = Paths::new(working_dir);
        paths.create_dirs()?;
        paths.log_paths();
        let status = Status::open(&paths, &corpus)?;
        status.log_status();
        let pool = WorkerPool::new(&config)?;
        Ok(Self {
            config,
            corpus,
            paths,
            status,
            tagger,
            pool,
            report,
        })
    }

    /// Count some patterns, and everything they depend on
    ///
    /// Patterns that are already counted are not recomputed, and neither are
    /// the chunks of patterns that were chunked by an interrupted run.
    pub fn count(&self, needed: &BTreeSet<Pattern>) -> Result<()> {
        log::info!("Counting {} requested patterns", needed.len());
        let needed = resolver::resolve(needed);
        self.provide_training(needed.tagging)?;

        self.chunk(Family::Absolute, &needed.absolute)?;
        self.merge(Family::Absolute, &needed.absolute)?;
        for (markers, layer) in needed.continuation_layers() {
            log::debug!("Continuation patterns with {markers} markers = {layer:?}");
            self.chunk(Family::Continuation, &layer)?;
            self.merge(Family::Continuation, &layer)?;
        }

        stats::count_ngram_times(&self.config, &self.status, &self.paths)?;
        stats::calculate_length_distribution(&self.config, &self.paths)?;
        self.status.log_status();
        log::info!("Done counting.");
        Ok(())
    }

    /// Make sure the training file is present, and tagged if needed
    pub fn provide_training(&self, needs_tagging: bool) -> Result<()> {
        training::provide_training(
            &self.status,
            &self.paths,
            &self.corpus,
            needs_tagging,
            &*self.tagger,
        )
    }

    /// Chunk the patterns of a family that are neither chunked nor counted
    ///
    /// Continuation patterns can only be chunked once their source pattern is
    /// counted.
    pub fn chunk(&self, family: Family, patterns: &BTreeSet<Pattern>) -> Result<()> {
        let (to_chunk, _to_merge) = self.status.needed(patterns, family);
        if to_chunk.is_empty() {
            log::info!("Detected {family} chunking already done.");
        } else {
            log::info!("Chunking {} {family} patterns", to_chunk.len());
            let failed = chunker::chunk(
                &self.config,
                &self.paths,
                &self.status,
                &self.pool,
                &self.report,
                family,
                &to_chunk,
            );
            if !failed.is_empty() {
                log::warn!("{family} chunking failed for patterns {failed:?}");
            }
        }
        let mut computed = self.status.chunked(family);
        computed.extend(self.status.counted(family));
        ValidationFailure::check(format!("{family} chunking"), patterns, &computed)?;
        Ok(())
    }

    /// Merge the chunks of the patterns of a family that aren't counted yet
    pub fn merge(&self, family: Family, patterns: &BTreeSet<Pattern>) -> Result<()> {
        let (_to_chunk, to_merge) = self.status.needed(patterns, family);
        if to_merge.is_empty() {
            log::info!("Detected {family} merging already done.");
        } else {
            log::info!("Merging {} {family} patterns", to_merge.len());
            let failed = merger::merge(
                &self.config,
                &self.paths,
                &self.status,
                &self.pool,
                &self.report,
                family,
                &to_merge,
            );
            if !failed.is_empty() {
                log::warn!("{family} merging failed for patterns {failed:?}");
            }
        }
        let computed = self.status.counted(family);
        ValidationFailure::check(format!("{family} merging"), patterns, &computed)?;
        Ok(())
    }

    /// Load every counted pattern into memory
    pub fn count_cache(&self) -> Result<CountCache> {
        CountCache::load(&self.config, &self.paths, &self.status.all_counted())
    }

    /// Load some counted patterns into memory
    pub fn count_cache_for(&self, patterns: &BTreeSet<Pattern>) -> Result<CountCache> {
        ValidationFailure::check("Count cache loading", patterns, &self.status.all_counted())?;
        CountCache::load(&self.config, &self.paths, patterns)
    }

    /// Load the counts of some patterns that a query file can use
    ///
    /// The query cache is built on the first call for given query file
    /// contents, and reused afterwards.
    pub fn build_query_cache(
        &self,
        query_file: &Path,
        patterns: &BTreeSet<Pattern>,
    ) -> Result<CountCache> {
        let cache_paths = query_cache::build(
            &self.config,
            &self.paths,
            &self.status,
            &self.pool,
            &self.report,
            query_file,
            patterns,
        )?;
        CountCache::load(&self.config, &cache_paths, patterns)
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Working directory layout
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Ledger of the working directory
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Progress report
    pub fn report(&self) -> &ProgressReport {
        &self.report
    }
}
