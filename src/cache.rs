//! In-memory lookup of computed counts
//!
//! Once counting is done, estimators query counts at a very high rate, so the
//! count files of the patterns they need are loaded into hash maps upfront.
//! Lookups distinguish a sequence that was counted zero times, which is a
//! normal answer, from a pattern that was never loaded, which is a bug in the
//! caller's choice of patterns.

use crate::{
    config::Config,
    counts::{CountReader, CountValue, Counter},
    error::CountError,
    paths::Paths,
    pattern::{Family, Pattern, PatternElem, SKIPPED_WORD, WSKIPPED_WORD},
    stats::{self, LengthDistribution, NGramTimes},
    Result,
};
use anyhow::Context;
use rayon::prelude::*;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt::{self, Display},
    path::Path,
    str::FromStr,
};

/// Sequence of tokens, as found in count files
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NGram(Vec<String>);
//
impl NGram {
    /// Build an n-gram from its tokens
    pub fn new(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    /// Tokens of the n-gram
    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Truth that there are no tokens
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This n-gram followed by another one
    pub fn concat(&self, other: &NGram) -> Self {
        Self(self.0.iter().chain(&other.0).cloned().collect())
    }

    /// Pattern whose counts contain this n-gram
    ///
    /// `_` tokens are skips, `%` tokens are word continuation markers, other
    /// tokens are words.
    pub fn pattern(&self) -> Result<Pattern, CountError> {
        let elems = (self.0.iter())
            .map(|token| match token.as_str() {
                SKIPPED_WORD => PatternElem::Skip,
                WSKIPPED_WORD => PatternElem::WordSkip,
                _ => PatternElem::Count,
            })
            .collect::<Vec<_>>();
        Pattern::new(elems)
    }
}
//
impl Display for NGram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}
//
impl FromStr for NGram {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.split_whitespace()))
    }
}

/// Counts of a set of patterns, with the associated statistics
#[derive(Debug, Default)]
pub struct CountCache {
    /// Absolute counts, by pattern then sequence
    absolute: HashMap<Pattern, HashMap<String, u64>>,

    /// Continuation counts, by pattern then sequence
    continuation: HashMap<Pattern, HashMap<String, Counter>>,

    /// Count-of-counts of every pattern counted so far
    ngram_times: BTreeMap<Pattern, NGramTimes>,

    /// Distribution of training sequence lengths
    length_distribution: LengthDistribution,
}
//
impl CountCache {
    /// Load the counts of some patterns from a working directory
    ///
    /// Every pattern must have a final count file, and the count-of-counts and
    /// length distribution files must be present.
    pub fn load(config: &Config, paths: &Paths, patterns: &BTreeSet<Pattern>) -> Result<Self> {
        log::info!(
            "Loading {} patterns from {} into count cache",
            patterns.len(),
            paths.dir().display()
        );
        let io_buffer = config.io_buffer.get();
        let (absolute, continuation): (Vec<_>, Vec<_>) =
            patterns.iter().partition(|pattern| pattern.is_absolute());
        let absolute = absolute
            .into_par_iter()
            .map(|pattern| -> Result<_> {
                let counts = load_counts::<u64>(&paths.count_file(pattern), io_buffer)?;
                Ok((pattern.clone(), counts))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        let continuation = continuation
            .into_par_iter()
            .map(|pattern| -> Result<_> {
                let counts = load_counts::<Counter>(&paths.count_file(pattern), io_buffer)?;
                Ok((pattern.clone(), counts))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        let ngram_times = stats::read_ngram_times(&paths.ngram_times_file())?;
        let length_distribution = LengthDistribution::load(&paths.length_distribution_file())?;
        Ok(Self {
            absolute,
            continuation,
            ngram_times,
            length_distribution,
        })
    }

    /// Patterns whose counts are loaded
    pub fn patterns(&self) -> BTreeSet<Pattern> {
        (self.absolute.keys())
            .chain(self.continuation.keys())
            .cloned()
            .collect()
    }

    /// Absolute count of an n-gram, in the pattern its tokens imply
    pub fn absolute(&self, sequence: &NGram) -> Result<u64> {
        self.absolute_for(&sequence.pattern()?, &sequence.to_string())
    }

    /// Absolute count of a rendered sequence of some pattern
    pub fn absolute_for(&self, pattern: &Pattern, sequence: &str) -> Result<u64> {
        let counts = self
            .absolute
            .get(pattern)
            .ok_or_else(|| never_counted(Family::Absolute, pattern))?;
        Ok(counts.get(sequence).copied().unwrap_or(0))
    }

    /// Continuation count of an n-gram, in the pattern its tokens imply
    pub fn continuation(&self, sequence: &NGram) -> Result<Counter> {
        self.continuation_for(&sequence.pattern()?, &sequence.to_string())
    }

    /// Continuation count of a rendered sequence of some pattern
    pub fn continuation_for(&self, pattern: &Pattern, sequence: &str) -> Result<Counter> {
        let counts = self
            .continuation
            .get(pattern)
            .ok_or_else(|| never_counted(Family::Continuation, pattern))?;
        Ok(counts.get(sequence).copied().unwrap_or_default())
    }

    /// Count-of-counts of a pattern
    pub fn count_of_counts(&self, pattern: &Pattern) -> Result<NGramTimes> {
        Ok(*self
            .ngram_times
            .get(pattern)
            .ok_or_else(|| never_counted(pattern.family(), pattern))?)
    }

    /// Number of tokens in the training data
    pub fn num_words(&self) -> Result<u64> {
        self.absolute_for(&unigram_pattern(PatternElem::Skip), SKIPPED_WORD)
    }

    /// Number of distinct words in the training data
    pub fn vocabulary_size(&self) -> Result<u64> {
        let counter =
            self.continuation_for(&unigram_pattern(PatternElem::WordSkip), WSKIPPED_WORD)?;
        Ok(counter.one_plus)
    }

    /// Distinct words of the training data, in sorted order
    pub fn words(&self) -> Result<BTreeSet<&str>> {
        let pattern = unigram_pattern(PatternElem::Count);
        let counts = self
            .absolute
            .get(&pattern)
            .ok_or_else(|| never_counted(Family::Absolute, &pattern))?;
        Ok(counts.keys().map(String::as_str).collect())
    }

    /// Distribution of training sequence lengths
    pub fn length_distribution(&self) -> &LengthDistribution {
        &self.length_distribution
    }
}

/// Read a whole count file
fn load_counts<V: CountValue>(path: &Path, io_buffer: usize) -> Result<HashMap<String, V>> {
    let mut counts = HashMap::new();
    let mut reader = CountReader::<V>::open(path, io_buffer)?;
    while let Some((sequence, value)) = reader
        .next_entry()
        .with_context(|| format!("loading counts from {}", path.display()))?
    {
        counts.insert(sequence, value);
    }
    log::trace!("Loaded {} sequences from {}", counts.len(), path.display());
    Ok(counts)
}

/// Pattern made of a single element
fn unigram_pattern(elem: PatternElem) -> Pattern {
    Pattern::new(vec![elem]).expect("single-element patterns are valid")
}

/// Error for lookups into patterns that were not loaded
fn never_counted(family: Family, pattern: &Pattern) -> anyhow::Error {
    CountError::PatternNeverCounted {
        family,
        pattern: pattern.clone(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn p(s: &str) -> Pattern {
        s.parse().unwrap()
    }

    fn ngram(s: &str) -> NGram {
        s.parse().unwrap()
    }

    fn setup() -> (TempDir, CountCache) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        paths.create_dirs().unwrap();
        let write = |pattern: &str, contents: &str| {
            fs::write(paths.count_file(&p(pattern)), contents).unwrap()
        };
        write("1", "a\t3\nb\t3\n");
        write("0", "_\t6\n");
        write("11", "a b\t2\nb a\t2\n");
        write("x", "%\t2\t0\t0\t2\n");
        write("x1", "% a\t1\t0\t1\t0\n% b\t1\t0\t1\t0\n");
        fs::write(paths.ngram_times_file(), "0\t0\t0\t0\t1\n1\t0\t0\t2\t0\n").unwrap();
        fs::write(paths.length_distribution_file(), "3\t1\n").unwrap();
        let patterns = ["1", "0", "11", "x", "x1"].into_iter().map(p).collect();
        let cache = CountCache::load(&Config::default(), &paths, &patterns).unwrap();
        (dir, cache)
    }

    #[test]
    fn ngram_patterns() {
        assert_eq!(ngram("a _ %").pattern().unwrap(), p("10x"));
        assert_eq!(ngram("a b").to_string(), "a b");
        assert_eq!(ngram("a").concat(&ngram("b c")), ngram("a b c"));
        assert!(ngram("").pattern().is_err());
    }

    #[test]
    fn lookups() {
        let (_dir, cache) = setup();
        assert_eq!(cache.patterns().len(), 5);
        assert_eq!(cache.absolute(&ngram("a b")).unwrap(), 2);
        assert_eq!(cache.absolute(&ngram("a a")).unwrap(), 0);
        assert_eq!(cache.continuation(&ngram("% a")).unwrap().two, 1);
        assert_eq!(cache.continuation(&ngram("% c")).unwrap(), Counter::default());
        assert_eq!(cache.num_words().unwrap(), 6);
        assert_eq!(cache.vocabulary_size().unwrap(), 2);
        assert_eq!(cache.words().unwrap().into_iter().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(cache.count_of_counts(&p("1")).unwrap(), [0, 0, 2, 0]);
        assert_eq!(cache.length_distribution().probability(3), 1.0);
    }

    #[test]
    fn never_counted_is_not_zero() {
        let (_dir, cache) = setup();
        for error in [
            cache.absolute(&ngram("a b c")).unwrap_err(),
            cache.continuation(&ngram("% % a")).unwrap_err(),
            cache.count_of_counts(&p("11")).unwrap_err(),
        ] {
            assert!(matches!(
                error.downcast_ref::<CountError>(),
                Some(CountError::PatternNeverCounted { .. })
            ));
        }
    }
}
