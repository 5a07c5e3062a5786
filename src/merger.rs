//! K-way merge of chunk files into final count files

use crate::{
    config::Config,
    counts::{CountReader, CountValue, CountWriter, Counter},
    paths::Paths,
    pattern::{Family, Pattern},
    pool::WorkerPool,
    progress::ProgressReport,
    status::Status,
    Result,
};
use anyhow::Context;
use std::{
    cmp::Reverse,
    collections::{BTreeSet, BinaryHeap},
    fs,
};

/// Merge the chunks of every pattern of a set
///
/// Patterns must all belong to `family` and be chunked already. Returns the
/// patterns whose merge failed, which are left unmarked in the ledger.
pub fn merge(
    config: &Config,
    paths: &Paths,
    status: &Status,
    pool: &WorkerPool,
    report: &ProgressReport,
    family: Family,
    patterns: &BTreeSet<Pattern>,
) -> BTreeSet<Pattern> {
    log::debug!("{family} merging patterns = {patterns:?}");
    match family {
        Family::Absolute => pool.run("Absolute merging", patterns, report, |pattern| {
            merge_pattern::<u64>(config, paths, status, pattern)
        }),
        Family::Continuation => pool.run("Continuation merging", patterns, report, |pattern| {
            merge_pattern::<Counter>(config, paths, status, pattern)
        }),
    }
}

/// Merge the chunks of one pattern
fn merge_pattern<V: CountValue>(
    config: &Config,
    paths: &Paths,
    status: &Status,
    pattern: &Pattern,
) -> Result<()> {
    let family = pattern.family();
    let chunks = status
        .chunks(pattern, family)
        .with_context(|| format!("{family} pattern {pattern} is not chunked"))?;
    let readers = chunks
        .iter()
        .map(|chunk| CountReader::<V>::open(&paths.chunk_file(pattern, chunk), config.io_buffer.get()))
        .collect::<Result<Vec<_>>>()?;

    let output = paths.count_file(pattern);
    let mut writer = CountWriter::create(&output, config.io_buffer.get())?;
    merge_sorted(readers, |sequence, value| writer.push(sequence, value))
        .with_context(|| format!("merging chunks of {family} pattern {pattern}"))?;
    writer.finish()?;
    log::trace!("Merged {} chunks into {}", chunks.len(), output.display());
    status.mark_counted(pattern, family)?;

    if !config.keep_chunks {
        let chunk_dir = paths.chunk_dir(pattern);
        fs::remove_dir_all(&chunk_dir)
            .with_context(|| format!("removing merged chunks in {}", chunk_dir.display()))?;
    }
    Ok(())
}

/// Merge sorted count streams, combining the values of equal sequences
///
/// The output is emitted in strictly increasing sequence order. Unsorted or
/// malformed input aborts the merge.
pub fn merge_sorted<V: CountValue>(
    mut readers: Vec<CountReader<V>>,
    mut output: impl FnMut(&str, &V) -> Result<()>,
) -> Result<()> {
    // Current value of each stream, with a min-heap of current sequences
    let mut values = vec![V::default(); readers.len()];
    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (idx, reader) in readers.iter_mut().enumerate() {
        if let Some((sequence, value)) = reader.next_entry()? {
            values[idx] = value;
            heap.push(Reverse((sequence, idx)));
        }
    }

    while let Some(Reverse((sequence, idx))) = heap.pop() {
        // Combine every stream positioned at the smallest sequence...
        let mut total = values[idx];
        let mut matched = vec![idx];
        while heap
            .peek()
            .is_some_and(|Reverse((next, _))| *next == sequence)
        {
            let Reverse((_, other)) = heap.pop().expect("peeked an element");
            total.merge(&values[other]);
            matched.push(other);
        }
        output(&sequence, &total)?;

        // ...then advance all of them
        for idx in matched {
            if let Some((sequence, value)) = readers[idx].next_entry()? {
                values[idx] = value;
                heap.push(Reverse((sequence, idx)));
            }
        }
    }
    Ok(())
}
