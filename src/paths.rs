//! Layout of a working directory
//!
//! Everything the engine produces lives under one directory, at locations
//! that only depend on the pattern and the count family. Query-scoped caches
//! reuse the same layout inside of `querycaches/<hash>/`.

use crate::{
    pattern::{Family, Pattern},
    Result,
};
use anyhow::Context;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Ledger file name
const STATUS_FILE_NAME: &str = "status.json";

/// Training file name
const TRAINING_FILE_NAME: &str = "training";

/// Name of the untagged copy of the training file
const UNTAGGED_TRAINING_FILE_NAME: &str = "training.untagged";

/// Count-of-counts file name
const NGRAM_TIMES_FILE_NAME: &str = "ngramtimes";

/// Length distribution file name
const LENGTH_DISTRIBUTION_FILE_NAME: &str = "lengthdistribution";

/// Directory of query-scoped caches
const QUERY_CACHES_DIR_NAME: &str = "querycaches";

/// Locations of the files of a working directory
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Paths {
    /// Root directory
    dir: PathBuf,
}
//
impl Paths {
    /// Working directory rooted at some location
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persisted ledger
    pub fn status_file(&self) -> PathBuf {
        self.dir.join(STATUS_FILE_NAME)
    }

    /// Corpus used for counting
    pub fn training_file(&self) -> PathBuf {
        self.dir.join(TRAINING_FILE_NAME)
    }

    /// Untagged corpus, kept around as input of the tagger
    pub fn untagged_training_file(&self) -> PathBuf {
        self.dir.join(UNTAGGED_TRAINING_FILE_NAME)
    }

    /// Directory of final count files for a family
    pub fn counts_dir(&self, family: Family) -> PathBuf {
        self.dir.join(family.name())
    }

    /// Final count file of a pattern
    pub fn count_file(&self, pattern: &Pattern) -> PathBuf {
        self.counts_dir(pattern.family()).join(pattern.as_str())
    }

    /// Directory of chunk files for a family
    pub fn chunked_dir(&self, family: Family) -> PathBuf {
        self.dir.join(format!("{}-chunked", family.name()))
    }

    /// Directory of the chunk files of a pattern
    pub fn chunk_dir(&self, pattern: &Pattern) -> PathBuf {
        self.chunked_dir(pattern.family()).join(pattern.as_str())
    }

    /// Chunk file of a pattern
    pub fn chunk_file(&self, pattern: &Pattern, chunk: &str) -> PathBuf {
        self.chunk_dir(pattern).join(chunk)
    }

    /// Count-of-counts file
    pub fn ngram_times_file(&self) -> PathBuf {
        self.dir.join(NGRAM_TIMES_FILE_NAME)
    }

    /// Sequence length distribution file
    pub fn length_distribution_file(&self) -> PathBuf {
        self.dir.join(LENGTH_DISTRIBUTION_FILE_NAME)
    }

    /// Directory holding all query-scoped caches
    pub fn query_caches_dir(&self) -> PathBuf {
        self.dir.join(QUERY_CACHES_DIR_NAME)
    }

    /// Layout of the query-scoped cache with some name
    pub fn query_cache(&self, name: &str) -> Self {
        Self::new(self.query_caches_dir().join(name))
    }

    /// Create the directories that count files go into
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.dir.clone(),
            self.counts_dir(Family::Absolute),
            self.counts_dir(Family::Continuation),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Log where things are
    pub fn log_paths(&self) {
        log::debug!("Paths:");
        log::debug!("    dir                = {}", self.dir.display());
        log::debug!("    status             = {}", self.status_file().display());
        log::debug!("    training           = {}", self.training_file().display());
        log::debug!("    absolute           = {}", self.counts_dir(Family::Absolute).display());
        log::debug!("    continuation       = {}", self.counts_dir(Family::Continuation).display());
        log::debug!("    ngramtimes         = {}", self.ngram_times_file().display());
        log::debug!("    lengthdistribution = {}", self.length_distribution_file().display());
    }
}
