//! Auxiliary statistics derived from counts and from the training file
//!
//! - The count-of-counts table ("ngramtimes") tells, for each pattern, how
//!   many distinct sequences occurred exactly once, twice, three times, or
//!   four times or more. Discounting estimators are built on it.
//! - The length distribution is the empirical probability of each training
//!   sequence length.
//!
//! Both are cheap single passes compared to counting, and are simply
//! recomputed when their outputs are missing or out of date.

use crate::{
    config::Config,
    counts::{CountReader, CountValue, CountWriter, Counter},
    error::CountError,
    paths::Paths,
    pattern::{Family, Pattern},
    status::Status,
    Result,
};
use anyhow::Context;
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

/// Longest sequence length that a length distribution file may list
const MAX_SEQUENCE_LENGTH: usize = 1 << 20;

/// Number of distinct sequences seen 1, 2, 3 and 4+ times
pub type NGramTimes = [u64; 4];

/// Row of the count-of-counts file
struct NGramTimesRow(NGramTimes);
//
impl Display for NGramTimesRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [n1, n2, n3, n4] = self.0;
        write!(f, "{n1}\t{n2}\t{n3}\t{n4}")
    }
}

/// Bring the count-of-counts file up to date with the counted patterns
pub fn count_ngram_times(config: &Config, status: &Status, paths: &Paths) -> Result<()> {
    let counted = status.all_counted();
    let file = paths.ngram_times_file();
    if file.is_file() {
        let existing = read_ngram_times(&file)?;
        if existing.keys().eq(counted.iter()) {
            log::info!("Detected count-of-counts already up to date.");
            return Ok(());
        }
    }

    log::info!("Counting count-of-counts -> {}", file.display());
    let mut writer = CountWriter::create(&file, config.io_buffer.get())?;
    for pattern in &counted {
        let count_file = paths.count_file(pattern);
        let times = match pattern.family() {
            Family::Absolute => ngram_times_of::<u64>(&count_file, config)?,
            Family::Continuation => ngram_times_of::<Counter>(&count_file, config)?,
        };
        writer.push(pattern.as_str(), &NGramTimesRow(times))?;
    }
    writer.finish()
}

/// Tally the frequency classes of a final count file
pub fn ngram_times_of<V: CountValue>(count_file: &Path, config: &Config) -> Result<NGramTimes> {
    let mut times = [0; 4];
    let mut reader = CountReader::<V>::open(count_file, config.io_buffer.get())?;
    while let Some((_sequence, value)) = reader.next_entry()? {
        match value.frequency() {
            0 => {}
            frequency => times[(frequency.min(4) - 1) as usize] += 1,
        }
    }
    Ok(times)
}

/// Load the count-of-counts file
pub fn read_ngram_times(path: &Path) -> Result<BTreeMap<Pattern, NGramTimes>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut result = BTreeMap::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        let malformed = |reason: String| CountError::MalformedLine {
            file: path.to_owned(),
            line: idx + 1,
            reason,
        };
        let fields = line.split('\t').collect::<Vec<_>>();
        let [pattern, counts @ ..] = &fields[..] else {
            unreachable!("split always yields at least one field")
        };
        if counts.len() != 4 {
            return Err(malformed(format!("expected 5 fields, found {}", fields.len())).into());
        }
        let pattern = pattern
            .parse::<Pattern>()
            .map_err(|e| malformed(e.to_string()))?;
        let mut times = [0; 4];
        for (time, count) in times.iter_mut().zip(counts) {
            *time = count
                .parse()
                .map_err(|e| malformed(format!("bad count {count:?}: {e}")))?;
        }
        result.insert(pattern, times);
    }
    Ok(result)
}

/// Empirical distribution of training sequence lengths
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LengthDistribution {
    /// Probability of each length, indexed by length
    probabilities: Vec<f64>,
}
//
impl LengthDistribution {
    /// Measure the length distribution of a text file
    ///
    /// Lengths are counted in whitespace-separated tokens, and every line is a
    /// sequence, including empty ones.
    pub fn from_training(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut frequencies = Vec::<u64>::new();
        let mut total = 0u64;
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("reading {}", path.display()))?;
            let len = line.split_whitespace().count();
            if frequencies.len() <= len {
                frequencies.resize(len + 1, 0);
            }
            frequencies[len] += 1;
            total += 1;
        }
        let probabilities = frequencies
            .into_iter()
            .map(|frequency| frequency as f64 / total as f64)
            .collect();
        Ok(Self { probabilities })
    }

    /// Load a length distribution file
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut probabilities = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("reading {}", path.display()))?;
            let malformed = |reason: String| CountError::MalformedLine {
                file: path.to_owned(),
                line: idx + 1,
                reason,
            };
            let (len, probability) = line
                .split_once('\t')
                .ok_or_else(|| malformed("no tab separator".to_owned()))?;
            let len = len
                .parse::<usize>()
                .map_err(|e| malformed(format!("bad length {len:?}: {e}")))?;
            if len > MAX_SEQUENCE_LENGTH {
                return Err(malformed(format!(
                    "length {len} exceeds the maximum of {MAX_SEQUENCE_LENGTH}"
                ))
                .into());
            }
            let probability = probability
                .parse::<f64>()
                .map_err(|e| malformed(format!("bad probability {probability:?}: {e}")))?;
            if probabilities.len() <= len {
                probabilities.resize(len + 1, 0.0);
            }
            probabilities[len] = probability;
        }
        Ok(Self { probabilities })
    }

    /// Write the observed lengths and their probabilities
    pub fn save(&self, path: &Path, config: &Config) -> Result<()> {
        let mut writer = CountWriter::create(path, config.io_buffer.get())?;
        for (len, probability) in self.iter() {
            writer.push(&len.to_string(), &probability)?;
        }
        writer.finish()
    }

    /// Probability of a sequence length
    pub fn probability(&self, len: usize) -> f64 {
        self.probabilities.get(len).copied().unwrap_or(0.0)
    }

    /// Longest observed sequence length
    pub fn max_length(&self) -> usize {
        self.probabilities.len().saturating_sub(1)
    }

    /// Observed lengths with their probability, by increasing length
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        (self.probabilities.iter().copied().enumerate())
            .filter(|&(_len, probability)| probability > 0.0)
    }
}

/// Compute the length distribution of the training file, unless it's there
pub fn calculate_length_distribution(config: &Config, paths: &Paths) -> Result<()> {
    let file = paths.length_distribution_file();
    if file.is_file() {
        log::info!("Detected length distribution already present.");
        return Ok(());
    }
    let training = paths.training_file();
    anyhow::ensure!(
        training.is_file(),
        "cannot compute the length distribution before {} exists",
        training.display()
    );
    log::info!(
        "Calculating length distribution {} -> {}",
        training.display(),
        file.display()
    );
    LengthDistribution::from_training(&training)?.save(&file, config)
}
