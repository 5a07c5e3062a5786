//! Typed failures of the count engine
//!
//! Most fallible operations return [`anyhow::Result`], with context attached
//! at every I/O boundary. The errors below are the ones that callers may want
//! to tell apart from plain I/O trouble, which they can do by downcasting.

use crate::pattern::{Family, Pattern};
use std::{collections::BTreeSet, fmt, path::PathBuf};
use thiserror::Error;

/// Domain-level failure of the count engine
#[derive(Debug, Error)]
pub enum CountError {
    /// A pattern string could not be parsed
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },

    /// Counts were requested for a pattern that was never counted/loaded
    ///
    /// This is distinct from a sequence that was counted zero times.
    #[error("no {family} counts learned for pattern {pattern}")]
    PatternNeverCounted { family: Family, pattern: Pattern },

    /// A count file contains a line that does not follow the expected format
    #[error("malformed line {line} in {}: {reason}", .file.display())]
    MalformedLine {
        file: PathBuf,
        line: usize,
        reason: String,
    },

    /// A count file is not sorted by strictly increasing sequence
    #[error("{} is not sorted: {previous:?} is followed by {current:?} at line {line}", .file.display())]
    Unsorted {
        file: PathBuf,
        line: usize,
        previous: String,
        current: String,
    },

    /// Attempted to mark a pattern counted before it was chunked
    #[error("cannot mark {family} pattern {pattern} counted, it was never chunked")]
    NotChunked { family: Family, pattern: Pattern },

    /// Tagging is required but no tagger is available
    #[error("part-of-speech tagging of {} is required, but no tagger was configured", .0.display())]
    TaggerUnavailable(PathBuf),
}

/// A pipeline stage did not produce every pattern it was asked for
///
/// Returned instead of proceeding with an incomplete model, so that the
/// caller can decide between aborting and retrying.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationFailure {
    /// Name of the stage that fell short
    pub operation: String,

    /// Patterns that the stage was expected to produce
    pub expected: BTreeSet<Pattern>,

    /// Patterns that the ledger knows as done after the stage
    pub computed: BTreeSet<Pattern>,

    /// Expected patterns that are not computed
    pub missing: BTreeSet<Pattern>,
}
//
impl ValidationFailure {
    /// Compare what a stage should have produced with what it did produce
    pub fn check(
        operation: impl Into<String>,
        expected: &BTreeSet<Pattern>,
        computed: &BTreeSet<Pattern>,
    ) -> Result<(), Self> {
        let missing = expected.difference(computed).cloned().collect::<BTreeSet<_>>();
        if missing.is_empty() {
            return Ok(());
        }
        let failure = Self {
            operation: operation.into(),
            expected: expected.clone(),
            computed: computed.clone(),
            missing,
        };
        log::error!("{} did not yield expected result.", failure.operation);
        log::error!("Expected patterns = {}", DisplaySet(&failure.expected));
        log::error!("Computed patterns = {}", DisplaySet(&failure.computed));
        log::error!("Missing  patterns = {}", DisplaySet(&failure.missing));
        Err(failure)
    }
}
//
impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed, missing patterns {}",
            self.operation,
            DisplaySet(&self.missing)
        )
    }
}
//
impl std::error::Error for ValidationFailure {}

/// Compact display of a pattern set, as used in logs
pub struct DisplaySet<'a>(pub &'a BTreeSet<Pattern>);
//
impl fmt::Display for DisplaySet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, pattern) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{pattern}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(patterns: &[&str]) -> BTreeSet<Pattern> {
        patterns.iter().map(|p| p.parse().unwrap()).collect()
    }

    #[test]
    fn check_reports_missing_patterns() {
        let failure =
            ValidationFailure::check("Absolute counting", &set(&["1", "11", "0"]), &set(&["1"]))
                .unwrap_err();
        assert_eq!(failure.missing, set(&["0", "11"]));
        assert_eq!(
            failure.to_string(),
            "Absolute counting failed, missing patterns [0, 11]"
        );
    }

    #[test]
    fn check_accepts_supersets() {
        ValidationFailure::check("Merging", &set(&["1"]), &set(&["1", "x"])).unwrap();
    }
}
