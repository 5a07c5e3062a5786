//! Persistent ledger of completed work
//!
//! The ledger records which patterns were chunked and counted, what state the
//! training file is in, and which patterns each query-scoped cache holds. It
//! is the sole source of truth for resuming an interrupted run: every stage
//! consults it before doing any work, and updates it only once the outputs of
//! that work are durably on disk.
//!
//! On load, the ledger is cross-checked against the files that actually exist
//! in the working directory, and entries that are not backed by files are
//! dropped, so that a crash in the middle of a write is never mistaken for
//! completed work.

use crate::{
    error::CountError,
    paths::Paths,
    pattern::{Family, Pattern},
    training, Result,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read},
    path::Path,
    sync::{Mutex, MutexGuard},
};
use tempfile::NamedTempFile;

/// State of the training file
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Training {
    /// Not yet materialized
    #[default]
    None,

    /// Materialized without part-of-speech tags
    Untagged,

    /// Materialized with part-of-speech tags
    Tagged,
}

/// Progress of one count family
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
struct FamilyStatus {
    /// Chunked patterns, with the names of their chunk files
    chunked: BTreeMap<Pattern, Vec<String>>,

    /// Patterns whose final count file is complete
    counted: BTreeSet<Pattern>,
}

/// Persisted ledger contents
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
struct StatusData {
    /// Hex SHA-256 of the corpus that the working directory is built from
    corpus_hash: String,

    /// Truth that the corpus carries part-of-speech tags
    corpus_tagged: bool,

    /// State of the training file
    training: Training,

    /// Absolute count progress
    absolute: FamilyStatus,

    /// Continuation count progress
    continuation: FamilyStatus,

    /// Patterns cached by each query-scoped cache, keyed by cache name
    query_caches: BTreeMap<String, BTreeSet<Pattern>>,
}
//
impl StatusData {
    /// Progress of a count family
    fn family(&self, family: Family) -> &FamilyStatus {
        match family {
            Family::Absolute => &self.absolute,
            Family::Continuation => &self.continuation,
        }
    }

    /// Mutable progress of a count family
    fn family_mut(&mut self, family: Family) -> &mut FamilyStatus {
        match family {
            Family::Absolute => &mut self.absolute,
            Family::Continuation => &mut self.continuation,
        }
    }

    /// Drop every entry that is not backed by files on disk
    ///
    /// Returns truth that something had to be repaired.
    fn reconcile(&mut self, paths: &Paths) -> bool {
        let mut repaired = false;

        if self.training != Training::None && !paths.training_file().is_file() {
            log::warn!(
                "Ledger claims {:?} training, but {} is missing. Resetting training state.",
                self.training,
                paths.training_file().display()
            );
            self.training = Training::None;
            repaired = true;
        }

        for family in [Family::Absolute, Family::Continuation] {
            let status = self.family_mut(family);
            status.counted.retain(|pattern| {
                let present = paths.count_file(pattern).is_file();
                if !present {
                    log::warn!(
                        "Ledger claims {family} pattern {pattern} counted, but {} is missing.",
                        paths.count_file(pattern).display()
                    );
                    repaired = true;
                }
                present
            });
            let counted = &status.counted;
            status.chunked.retain(|pattern, chunks| {
                if counted.contains(pattern) {
                    return true;
                }
                let missing = (chunks.iter()).find(|chunk| !paths.chunk_file(pattern, chunk).is_file());
                if let Some(chunk) = missing {
                    log::warn!(
                        "Ledger claims {family} pattern {pattern} chunked, but {} is missing.",
                        paths.chunk_file(pattern, chunk).display()
                    );
                    repaired = true;
                }
                missing.is_none()
            });
        }

        for (name, patterns) in &mut self.query_caches {
            let cache = paths.query_cache(name);
            patterns.retain(|pattern| {
                let present = cache.count_file(pattern).is_file();
                if !present {
                    log::warn!(
                        "Ledger claims pattern {pattern} cached for {name}, but {} is missing.",
                        cache.count_file(pattern).display()
                    );
                    repaired = true;
                }
                present
            });
        }
        self.query_caches.retain(|_name, patterns| !patterns.is_empty());

        repaired
    }
}

/// Ledger of a working directory
///
/// Updates are serialized by an internal lock, and every update is written to
/// disk before the corresponding method returns.
#[derive(Debug)]
pub struct Status {
    /// Working directory layout
    paths: Paths,

    /// Current ledger contents
    data: Mutex<StatusData>,
}
//
impl Status {
    /// Load the ledger of a working directory, or create it
    ///
    /// If the working directory was built from a different corpus, its
    /// ledger is reset. A ledger that cannot be decoded is an error.
    pub fn open(paths: &Paths, corpus: &Path) -> Result<Self> {
        let corpus_hash = hash_file(corpus)?;
        let corpus_tagged = training::detect_file_tagged(corpus)?;
        let status_file = paths.status_file();

        let mut data = if status_file.is_file() {
            let file = File::open(&status_file)
                .with_context(|| format!("opening ledger {}", status_file.display()))?;
            serde_json::from_reader::<_, StatusData>(BufReader::new(file))
                .with_context(|| format!("decoding malformed ledger {}", status_file.display()))?
        } else {
            StatusData::default()
        };

        let mut dirty = !status_file.is_file();
        if data.corpus_hash != corpus_hash {
            if !data.corpus_hash.is_empty() {
                log::warn!(
                    "Corpus {} changed since {} was built. Starting over.",
                    corpus.display(),
                    paths.dir().display()
                );
            }
            discard_derived_files(paths)?;
            data = StatusData {
                corpus_hash,
                corpus_tagged,
                ..StatusData::default()
            };
            dirty = true;
        }
        dirty |= data.reconcile(paths);

        let status = Self {
            paths: paths.clone(),
            data: Mutex::new(data),
        };
        if dirty {
            let data = status.lock();
            status.persist(&data)?;
        }
        Ok(status)
    }

    /// Log the current state of the ledger
    pub fn log_status(&self) {
        let data = self.lock();
        log::debug!("Status:");
        log::debug!("    corpus hash        = {}", data.corpus_hash);
        log::debug!("    corpus tagged      = {}", data.corpus_tagged);
        log::debug!("    training           = {:?}", data.training);
        for family in [Family::Absolute, Family::Continuation] {
            let status = data.family(family);
            log::debug!("    {family} chunked = {:?}", status.chunked.keys().collect::<Vec<_>>());
            log::debug!("    {family} counted = {:?}", status.counted);
        }
        for (name, patterns) in &data.query_caches {
            log::debug!("    query cache {name} = {patterns:?}");
        }
    }

    /// Truth that the corpus carries part-of-speech tags
    pub fn is_corpus_tagged(&self) -> bool {
        self.lock().corpus_tagged
    }

    /// State of the training file
    pub fn training(&self) -> Training {
        self.lock().training
    }

    /// Record a new training file state
    pub fn set_training(&self, training: Training) -> Result<()> {
        self.update(|data| {
            data.training = training;
            Ok(())
        })
    }

    /// Split requested patterns into the ones that still need chunking and
    /// the ones that still need merging
    ///
    /// Patterns that are already counted appear in neither set, patterns that
    /// are chunked but not counted only need merging.
    pub fn needed(
        &self,
        patterns: &BTreeSet<Pattern>,
        family: Family,
    ) -> (BTreeSet<Pattern>, BTreeSet<Pattern>) {
        let data = self.lock();
        let status = data.family(family);
        let to_merge = patterns
            .difference(&status.counted)
            .cloned()
            .collect::<BTreeSet<_>>();
        let to_chunk = (to_merge.iter())
            .filter(|pattern| !status.chunked.contains_key(*pattern))
            .cloned()
            .collect();
        (to_chunk, to_merge)
    }

    /// Patterns whose chunks are complete
    pub fn chunked(&self, family: Family) -> BTreeSet<Pattern> {
        self.lock().family(family).chunked.keys().cloned().collect()
    }

    /// Chunk file names of a chunked pattern
    pub fn chunks(&self, pattern: &Pattern, family: Family) -> Option<Vec<String>> {
        self.lock().family(family).chunked.get(pattern).cloned()
    }

    /// Patterns whose final counts are complete
    pub fn counted(&self, family: Family) -> BTreeSet<Pattern> {
        self.lock().family(family).counted.clone()
    }

    /// Counted patterns of both families
    pub fn all_counted(&self) -> BTreeSet<Pattern> {
        let data = self.lock();
        (data.absolute.counted.iter())
            .chain(&data.continuation.counted)
            .cloned()
            .collect()
    }

    /// Record that all chunks of a pattern are on disk
    pub fn mark_chunked(&self, pattern: &Pattern, family: Family, chunks: Vec<String>) -> Result<()> {
        self.update(|data| {
            data.family_mut(family).chunked.insert(pattern.clone(), chunks);
            Ok(())
        })
    }

    /// Record that the final count file of a pattern is on disk
    pub fn mark_counted(&self, pattern: &Pattern, family: Family) -> Result<()> {
        self.update(|data| {
            let status = data.family_mut(family);
            if !status.chunked.contains_key(pattern) {
                return Err(CountError::NotChunked {
                    family,
                    pattern: pattern.clone(),
                }
                .into());
            }
            status.counted.insert(pattern.clone());
            Ok(())
        })
    }

    /// Patterns held by a query-scoped cache
    pub fn query_cache_counted(&self, name: &str) -> BTreeSet<Pattern> {
        (self.lock().query_caches.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Record that a query-scoped cache file is on disk
    pub fn mark_query_cache_counted(&self, name: &str, pattern: &Pattern) -> Result<()> {
        self.update(|data| {
            (data.query_caches.entry(name.to_owned()))
                .or_default()
                .insert(pattern.clone());
            Ok(())
        })
    }

    /// Apply a change to the ledger and persist it
    ///
    /// The in-memory ledger only changes if the new state made it to disk.
    fn update(&self, change: impl FnOnce(&mut StatusData) -> Result<()>) -> Result<()> {
        let mut data = self.lock();
        let mut new_data = data.clone();
        change(&mut new_data)?;
        if new_data != *data {
            self.persist(&new_data)?;
            *data = new_data;
        }
        Ok(())
    }

    /// Durably write the ledger to disk
    fn persist(&self, data: &StatusData) -> Result<()> {
        let status_file = self.paths.status_file();
        let context = || format!("writing ledger {}", status_file.display());
        fs::create_dir_all(self.paths.dir()).with_context(context)?;
        let file = NamedTempFile::new_in(self.paths.dir()).with_context(context)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, data).with_context(context)?;
        let file = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .with_context(context)?;
        file.as_file().sync_all().with_context(context)?;
        file.persist(&status_file).with_context(context)?;
        Ok(())
    }

    /// Access the ledger contents
    fn lock(&self) -> MutexGuard<'_, StatusData> {
        self.data.lock().expect("ledger lock should not be poisoned")
    }
}

/// Delete the outputs that are not tracked by the ledger but derive from the
/// corpus, so that they are recomputed along with the counts
fn discard_derived_files(paths: &Paths) -> Result<()> {
    for file in [paths.ngram_times_file(), paths.length_distribution_file()] {
        match fs::remove_file(&file) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(e).with_context(|| format!("deleting stale {}", file.display()))
            }
            _ => {}
        }
    }
    let query_caches = paths.query_caches_dir();
    match fs::remove_dir_all(&query_caches) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e)
            .with_context(|| format!("deleting stale query caches {}", query_caches.display())),
        _ => Ok(()),
    }
}

/// Hex SHA-256 of a file's contents
pub fn hash_file(path: &Path) -> Result<String> {
    let context = || format!("hashing {}", path.display());
    let mut file = File::open(path).with_context(context)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 64 * 1024];
    loop {
        let len = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).with_context(context),
        };
        hasher.update(&buffer[..len]);
    }
    Ok(hex::encode(hasher.finalize()))
}
