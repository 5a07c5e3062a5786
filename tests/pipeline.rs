//! End-to-end counting scenarios over small corpora

use glm_counts::{
    discount::{Estimator, MaximumLikelihood},
    status::Training,
    Config, CountError, Counter, Engine, Family, NGram, NoTagger, Pattern, ProgressReport,
    Result, Tagger, ValidationFailure,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};
use tempfile::TempDir;

fn set(patterns: &[&str]) -> BTreeSet<Pattern> {
    patterns.iter().map(|p| p.parse().unwrap()).collect()
}

fn config(keep_chunks: bool) -> Config {
    Config::default()
        .with_workers(NonZeroUsize::new(2).unwrap())
        .with_chunk_size(NonZeroUsize::new(2).unwrap())
        .keep_chunks(keep_chunks)
}

fn engine_with(config: Config, corpus: &Path, dir: &Path, tagger: Box<dyn Tagger>) -> Engine {
    Engine::new(Arc::new(config), corpus, dir, tagger, ProgressReport::hidden()).unwrap()
}

fn open(corpus: &Path, dir: &Path) -> Engine {
    engine_with(config(false), corpus, dir, Box::new(NoTagger))
}

fn write_corpus(dir: &TempDir, contents: &str) -> PathBuf {
    let corpus = dir.path().join("corpus.txt");
    fs::write(&corpus, contents).unwrap();
    corpus
}

/// Deterministic pseudo-random corpus with a small vocabulary
fn generated_corpus(lines: usize) -> String {
    let words = ["the", "fox", "dog", "runs", "jumps", "over", "a", "lazy", "quick"];
    let mut state = 0x2545_f491_u64;
    let mut next = move |bound: usize| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((state >> 33) as usize) % bound
    };
    let mut corpus = String::new();
    for _ in 0..lines {
        let len = next(8);
        let line = (0..len).map(|_| words[next(words.len())]).collect::<Vec<_>>();
        corpus.push_str(&line.join(" "));
        corpus.push('\n');
    }
    corpus
}

fn read_counts(engine: &Engine, pattern: &str) -> String {
    let pattern = pattern.parse::<Pattern>().unwrap();
    fs::read_to_string(engine.paths().count_file(&pattern)).unwrap()
}

fn absolute_counts(engine: &Engine, pattern: &str) -> BTreeMap<String, u64> {
    (read_counts(engine, pattern).lines())
        .map(|line| {
            let (sequence, count) = line.split_once('\t').unwrap();
            (sequence.to_owned(), count.parse().unwrap())
        })
        .collect()
}

fn modified(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

/// Contents of every regular file below a directory, by relative path
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut result = BTreeMap::new();
    let mut queue = vec![dir.to_owned()];
    while let Some(current) = queue.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                queue.push(path);
            } else {
                let contents = fs::read(&path).unwrap();
                result.insert(path.strip_prefix(dir).unwrap().to_owned(), contents);
            }
        }
    }
    result
}

#[test]
fn small_corpus() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(&dir, "a b a\nb a b\n");
    let engine = open(&corpus, &dir.path().join("work"));
    engine.count(&set(&["1", "11", "0", "10", "x", "x1", "1x", "101"]))?;

    assert_eq!(read_counts(&engine, "1"), "a\t3\nb\t3\n");
    assert_eq!(read_counts(&engine, "11"), "a b\t2\nb a\t2\n");
    assert_eq!(read_counts(&engine, "0"), "_\t6\n");
    assert_eq!(read_counts(&engine, "10"), "a _\t2\nb _\t2\n");
    assert_eq!(read_counts(&engine, "101"), "a _ a\t1\nb _ b\t1\n");
    assert_eq!(read_counts(&engine, "x"), "%\t2\t0\t0\t2\n");
    assert_eq!(read_counts(&engine, "x1"), "% a\t1\t0\t1\t0\n% b\t1\t0\t1\t0\n");
    assert_eq!(read_counts(&engine, "1x"), "a %\t1\t0\t1\t0\nb %\t1\t0\t1\t0\n");
    assert_eq!(
        fs::read_to_string(engine.paths().length_distribution_file())?,
        "3\t1\n"
    );
    let ngram_times = fs::read_to_string(engine.paths().ngram_times_file())?;
    assert!(ngram_times.lines().any(|line| line == "11\t0\t2\t0\t0"));
    assert!(ngram_times.lines().any(|line| line == "x\t0\t1\t0\t0"));

    let cache = engine.count_cache()?;
    assert_eq!(cache.num_words()?, 6);
    assert_eq!(cache.vocabulary_size()?, 2);
    assert_eq!(cache.words()?.into_iter().collect::<Vec<_>>(), ["a", "b"]);
    assert_eq!(
        cache.continuation(&"% a".parse()?)?,
        Counter {
            one_plus: 1,
            one: 0,
            two: 1,
            three_plus: 0
        }
    );

    let estimator = MaximumLikelihood::new(&cache);
    let probability = |sequence: &str, history: &str| {
        estimator
            .probability(&sequence.parse().unwrap(), &history.parse().unwrap())
            .unwrap()
    };
    assert_eq!(probability("b", "a"), 1.0);
    assert_eq!(probability("a", "a"), 0.0);
    assert_eq!(probability("a", ""), 0.5);
    assert_eq!(probability("a", "c"), 0.5);
    Ok(())
}

#[test]
fn never_counted_is_not_zero() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(&dir, "a b a\nb a b\n");
    let engine = open(&corpus, &dir.path().join("work"));
    engine.count(&set(&["11"]))?;
    let cache = engine.count_cache_for(&set(&["11"]))?;
    assert_eq!(cache.absolute(&"c a".parse::<NGram>()?)?, 0);
    let error = cache.absolute(&"a b a".parse::<NGram>()?).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<CountError>(),
        Some(CountError::PatternNeverCounted { .. })
    ));

    let error = engine.count_cache_for(&set(&["111"])).err().unwrap();
    assert!(error.downcast_ref::<ValidationFailure>().is_some());
    Ok(())
}

#[test]
fn counts_are_conserved() -> Result<()> {
    let dir = TempDir::new()?;
    let contents = generated_corpus(200);
    let corpus = write_corpus(&dir, &contents);
    let engine = open(&corpus, &dir.path().join("work"));
    engine.count(&set(&["1", "0", "111", "1d1"]))?;

    let lengths = contents
        .lines()
        .map(|line| line.split_whitespace().count() as u64)
        .collect::<Vec<_>>();
    let windows = |n: u64| lengths.iter().map(|&len| len.saturating_sub(n - 1)).sum::<u64>();
    let total = |pattern: &str| absolute_counts(&engine, pattern).values().sum::<u64>();
    assert_eq!(total("1"), windows(1));
    assert_eq!(total("0"), windows(1));
    assert_eq!(total("111"), windows(3));
    assert_eq!(total("1d1"), windows(3));

    // Chunks were merged away
    let chunked = engine.paths().chunked_dir(Family::Absolute);
    assert!(!chunked.join("111").exists());
    Ok(())
}

#[test]
fn continuation_counts_distinct_sources() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(&dir, &generated_corpus(150));
    let engine = open(&corpus, &dir.path().join("work"));
    engine.count(&set(&["x1", "xx1"]))?;

    let sources = absolute_counts(&engine, "11");
    let mut expected = BTreeMap::<String, Counter>::new();
    for (sequence, count) in &sources {
        let (_first, second) = sequence.split_once(' ').unwrap();
        (expected.entry(format!("% {second}")))
            .or_default()
            .add_context(*count);
    }
    let expected = expected
        .into_iter()
        .map(|(sequence, counter)| format!("{sequence}\t{counter}\n"))
        .collect::<String>();
    assert_eq!(read_counts(&engine, "x1"), expected);

    // Second-level continuations count distinct first-level sequences
    let xx1 = read_counts(&engine, "xx1");
    let x11 = read_counts(&engine, "x11");
    let mut distinct_last = x11
        .lines()
        .map(|line| line.split('\t').next().unwrap().rsplit(' ').next().unwrap())
        .collect::<Vec<_>>();
    distinct_last.sort();
    distinct_last.dedup();
    assert_eq!(xx1.lines().count(), distinct_last.len());
    Ok(())
}

#[test]
fn reruns_are_idempotent() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(&dir, &generated_corpus(100));
    let work = dir.path().join("work");
    let patterns = set(&["1", "11", "x1", "0"]);
    let first = {
        let engine = open(&corpus, &work);
        engine.count(&patterns)?;
        snapshot(&work)
    };
    let count_file = work.join("absolute").join("11");
    let continuation_file = work.join("continuation").join("x1");
    let times = (modified(&count_file), modified(&continuation_file));

    let engine = open(&corpus, &work);
    engine.count(&patterns)?;
    assert_eq!(snapshot(&work), first);

    // Supersets only compute the delta
    engine.count(&set(&["1", "11", "x1", "0", "111", "xx1"]))?;
    assert_eq!(
        (modified(&count_file), modified(&continuation_file)),
        times
    );
    assert!(work.join("absolute").join("111").is_file());
    assert!(work.join("continuation").join("xx1").is_file());
    Ok(())
}

#[test]
fn corpus_changes_refresh_derived_statistics() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(&dir, "a b a\nb a b\n");
    let work = dir.path().join("work");
    let patterns = set(&["1"]);
    let query = dir.path().join("query.txt");
    fs::write(&query, "a c\n")?;
    {
        let engine = open(&corpus, &work);
        engine.count(&patterns)?;
        engine.build_query_cache(&query, &patterns)?;
        assert_eq!(fs::read_to_string(work.join("ngramtimes"))?, "1\t0\t0\t2\t0\n");
        assert_eq!(fs::read_to_string(work.join("lengthdistribution"))?, "3\t1\n");
    }

    fs::write(&corpus, "a\nc d e f\nc\n")?;
    let engine = open(&corpus, &work);
    engine.count(&patterns)?;
    assert_eq!(
        absolute_counts(&engine, "1"),
        BTreeMap::from([
            ("a".to_owned(), 1),
            ("c".to_owned(), 2),
            ("d".to_owned(), 1),
            ("e".to_owned(), 1),
            ("f".to_owned(), 1),
        ])
    );
    assert_eq!(fs::read_to_string(work.join("ngramtimes"))?, "1\t4\t1\t0\t0\n");
    let cache = engine.count_cache()?;
    let lengths = cache.length_distribution();
    assert!((lengths.probability(1) - 2.0 / 3.0).abs() < 1e-12);
    assert!((lengths.probability(4) - 1.0 / 3.0).abs() < 1e-12);
    assert_eq!(lengths.probability(3), 0.0);

    let cache = engine.build_query_cache(&query, &patterns)?;
    assert_eq!(cache.count_of_counts(&"1".parse()?)?, [4, 1, 0, 0]);
    assert_eq!(cache.length_distribution().probability(3), 0.0);
    Ok(())
}

#[test]
fn interrupted_runs_resume_after_chunking() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(&dir, &generated_corpus(100));
    let patterns = set(&["1", "11", "101"]);

    // Uninterrupted reference run
    let reference = open(&corpus, &dir.path().join("reference"));
    reference.count(&patterns)?;

    // Run that stops right after chunking
    let work = dir.path().join("work");
    {
        let engine = engine_with(config(true), &corpus, &work, Box::new(NoTagger));
        engine.provide_training(false)?;
        engine.chunk(Family::Absolute, &patterns)?;
        assert!(engine.status().counted(Family::Absolute).is_empty());
    }
    let chunk = work.join("absolute-chunked").join("11").join("chunk0");
    let chunk_time = modified(&chunk);

    let engine = engine_with(config(true), &corpus, &work, Box::new(NoTagger));
    assert_eq!(engine.status().chunked(Family::Absolute), patterns);
    engine.count(&patterns)?;
    assert_eq!(modified(&chunk), chunk_time);
    for pattern in ["1", "11", "101"] {
        assert_eq!(read_counts(&engine, pattern), read_counts(&reference, pattern));
    }
    Ok(())
}

#[test]
fn stage_shortfalls_are_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(&dir, "a b a\nb a b\n");
    let engine = open(&corpus, &dir.path().join("work"));
    engine.provide_training(false)?;

    // Continuation chunking needs the source pattern to be counted first
    let error = engine
        .chunk(Family::Continuation, &set(&["x1"]))
        .unwrap_err();
    let failure = error.downcast_ref::<ValidationFailure>().unwrap();
    assert_eq!(failure.missing, set(&["x1"]));
    assert!(engine.status().chunked(Family::Continuation).is_empty());
    Ok(())
}

#[test]
fn query_caches() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(&dir, "a b a\nb a b\nc a\n");
    let query = dir.path().join("query.txt");
    fs::write(&query, "a b\n")?;
    let patterns = set(&["1", "11", "x1", "0", "x"]);

    let engine = open(&corpus, &dir.path().join("work"));
    engine.count(&patterns)?;
    let cache = engine.build_query_cache(&query, &patterns)?;
    assert_eq!(cache.absolute(&"a b".parse()?)?, 2);
    assert_eq!(cache.absolute(&"b a".parse()?)?, 0);
    assert_eq!(cache.absolute(&"a".parse()?)?, 4);
    assert_eq!(cache.absolute(&"c".parse()?)?, 0);
    assert_eq!(cache.continuation(&"% b".parse()?)?.one_plus, 1);
    assert_eq!(cache.num_words()?, 8);
    assert_eq!(cache.vocabulary_size()?, 3);

    // Second call with the same query contents does no work
    let name = glm_counts::query_cache::query_cache_name(&query)?;
    let cache_dir = engine.paths().query_cache(&name);
    let before = snapshot(cache_dir.dir());
    let count_file = cache_dir.count_file(&"11".parse()?);
    let time = modified(&count_file);
    let completed = engine.report().tasks_completed();
    engine.build_query_cache(&query, &patterns)?;
    assert_eq!(engine.report().tasks_completed(), completed);
    assert_eq!(modified(&count_file), time);
    assert_eq!(snapshot(cache_dir.dir()), before);
    assert_eq!(engine.status().query_cache_counted(&name), patterns);

    // Same queries, same cache, wherever it's built
    let other = engine_with(config(true), &corpus, &dir.path().join("other"), Box::new(NoTagger));
    other.count(&patterns)?;
    other.build_query_cache(&query, &patterns)?;
    assert_eq!(snapshot(other.paths().query_cache(&name).dir()), before);

    // Uncounted patterns cannot be cached
    assert!(engine.build_query_cache(&query, &set(&["111"])).is_err());
    Ok(())
}

/// Tagger that tags every word as a noun
struct NounTagger;
//
impl Tagger for NounTagger {
    fn tag(&self, untagged: &Path, tagged: &Path) -> Result<()> {
        let tagged_text = fs::read_to_string(untagged)?
            .lines()
            .map(|line| {
                let tokens = line.split_whitespace().map(|word| format!("{word}/N"));
                tokens.collect::<Vec<_>>().join(" ") + "\n"
            })
            .collect::<String>();
        fs::write(tagged, tagged_text)?;
        Ok(())
    }
}

#[test]
fn tagging() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(&dir, "a b a\nb a b\n");
    let engine = engine_with(
        config(false),
        &corpus,
        &dir.path().join("work"),
        Box::new(NounTagger),
    );
    engine.count(&set(&["1", "2", "12", "y"]))?;
    assert_eq!(engine.status().training(), Training::Tagged);
    assert_eq!(read_counts(&engine, "1"), "a\t3\nb\t3\n");
    assert_eq!(read_counts(&engine, "2"), "N\t6\n");
    assert_eq!(read_counts(&engine, "12"), "a N\t2\nb N\t2\n");
    assert_eq!(read_counts(&engine, "y"), "%\t1\t0\t0\t1\n");
    Ok(())
}

#[test]
fn missing_tagger() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(&dir, "a b a\nb a b\n");
    let engine = open(&corpus, &dir.path().join("work"));
    let error = engine.count(&set(&["2"])).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<CountError>(),
        Some(CountError::TaggerUnavailable(_))
    ));
    assert_eq!(engine.status().training(), Training::None);

    // A tagged corpus needs no tagger
    let tagged = dir.path().join("tagged.txt");
    fs::write(&tagged, "a/DT b/NN\n")?;
    let engine = open(&tagged, &dir.path().join("tagged-work"));
    engine.count(&set(&["2", "1"]))?;
    assert_eq!(read_counts(&engine, "2"), "DT\t1\nNN\t1\n");
    assert_eq!(read_counts(&engine, "1"), "a\t1\nb\t1\n");
    Ok(())
}
