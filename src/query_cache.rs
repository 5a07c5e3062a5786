//! Query-scoped subsets of the global counts
//!
//! Loading every count of a large corpus is wasteful when only a small query
//! file is to be evaluated. A query cache holds, for each requested pattern,
//! only the sequences that some window of the query file can render. Caches
//! are named after the contents of the query file, so evaluating the same
//! queries again reuses the cache as is.

use crate::{
    config::Config,
    counts::{CountReader, CountValue, CountWriter, Counter},
    error::ValidationFailure,
    paths::Paths,
    pattern::{Family, Pattern},
    pool::WorkerPool,
    progress::ProgressReport,
    status::{self, Status},
    training, Result,
};
use anyhow::Context;
use std::{
    collections::{BTreeSet, HashSet},
    fs::{self, File},
    io::{BufRead, BufReader, Write},
    path::Path,
};
use tempfile::NamedTempFile;

/// Name of the query cache of a query file
pub fn query_cache_name(query_file: &Path) -> Result<String> {
    status::hash_file(query_file)
}

/// Make sure the query cache of a query file holds some patterns
///
/// Every pattern must be counted already. Returns the layout of the query
/// cache, which can be loaded like a working directory.
pub fn build(
    config: &Config,
    paths: &Paths,
    status: &Status,
    pool: &WorkerPool,
    report: &ProgressReport,
    query_file: &Path,
    patterns: &BTreeSet<Pattern>,
) -> Result<Paths> {
    ValidationFailure::check(
        "Query caching prerequisites",
        patterns,
        &status.all_counted(),
    )
    .context("query caches can only hold patterns that are counted")?;

    let name = query_cache_name(query_file)?;
    let cache_paths = paths.query_cache(&name);
    let missing = patterns
        .difference(&status.query_cache_counted(&name))
        .cloned()
        .collect::<BTreeSet<_>>();
    if missing.is_empty() {
        log::info!("Detected query cache {name} already up to date.");
    } else {
        log::info!(
            "Building query cache {} for {}",
            cache_paths.dir().display(),
            query_file.display()
        );
        log::debug!("Query caching patterns = {missing:?}");
        cache_paths.create_dirs()?;
        let tagged = training::detect_file_tagged(query_file)?;
        pool.run("Query caching", &missing, report, |pattern| {
            let keys = query_keys(config, query_file, pattern, tagged)?;
            match pattern.family() {
                Family::Absolute => filter_counts::<u64>(config, paths, &cache_paths, pattern, &keys)?,
                Family::Continuation => {
                    filter_counts::<Counter>(config, paths, &cache_paths, pattern, &keys)?
                }
            }
            status.mark_query_cache_counted(&name, pattern)
        });
        ValidationFailure::check("Query caching", patterns, &status.query_cache_counted(&name))?;
    }

    sync_file(&paths.ngram_times_file(), &cache_paths.ngram_times_file())?;
    sync_file(
        &paths.length_distribution_file(),
        &cache_paths.length_distribution_file(),
    )?;
    Ok(cache_paths)
}

/// Sequences of a pattern that the windows of a query file render
fn query_keys(
    config: &Config,
    query_file: &Path,
    pattern: &Pattern,
    tagged: bool,
) -> Result<HashSet<String>> {
    let file = File::open(query_file)
        .with_context(|| format!("opening query file {}", query_file.display()))?;
    let mut keys = HashSet::new();
    let len = pattern.len();
    for line in BufReader::with_capacity(config.io_buffer.get(), file).lines() {
        let line = line.with_context(|| format!("reading {}", query_file.display()))?;
        let (words, pos) = training::parse_line(&line, tagged);
        if words.len() < len {
            continue;
        }
        for position in 0..=(words.len() - len) {
            keys.insert(pattern.apply(&words, &pos, position));
        }
    }
    Ok(keys)
}

/// Copy the counts of some sequences from the global count file of a pattern
/// into a query cache
fn filter_counts<V: CountValue>(
    config: &Config,
    paths: &Paths,
    cache_paths: &Paths,
    pattern: &Pattern,
    keys: &HashSet<String>,
) -> Result<()> {
    let mut reader = CountReader::<V>::open(&paths.count_file(pattern), config.io_buffer.get())?;
    let output = cache_paths.count_file(pattern);
    let mut writer = CountWriter::create(&output, config.io_buffer.get())?;
    let mut kept = 0usize;
    while let Some((sequence, value)) = reader.next_entry()? {
        if keys.contains(&sequence) {
            writer.push(&sequence, &value)?;
            kept += 1;
        }
    }
    writer.finish()?;
    log::trace!(
        "Kept {kept} of {} query sequences in {}",
        keys.len(),
        output.display()
    );
    Ok(())
}

/// Replace a file with a copy of another, unless they are identical already
fn sync_file(source: &Path, destination: &Path) -> Result<()> {
    let contents = fs::read(source).with_context(|| format!("reading {}", source.display()))?;
    if fs::read(destination).is_ok_and(|existing| existing == contents) {
        return Ok(());
    }
    log::debug!("Copying {} -> {}", source.display(), destination.display());
    let context = || format!("writing {}", destination.display());
    let dir = destination
        .parent()
        .with_context(|| format!("{} has no parent directory", destination.display()))?;
    let mut file = NamedTempFile::new_in(dir).with_context(context)?;
    file.write_all(&contents).with_context(context)?;
    file.as_file().sync_all().with_context(context)?;
    file.persist(destination).with_context(context)?;
    Ok(())
}
