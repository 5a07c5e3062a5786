//! Estimator interface and discount parameters
//!
//! Smoothing formulas are built on top of a [`CountCache`] by implementors of
//! [`Estimator`]. This module provides the plain maximum likelihood estimate
//! and the modified Kneser-Ney discounts that smoothed estimators subtract
//! from observed counts.

use crate::{
    cache::{CountCache, NGram},
    pattern::{Pattern, SKIPPED_WORD},
    stats::NGramTimes,
    Result,
};
use std::collections::HashMap;

/// Conditional probability estimator
pub trait Estimator {
    /// Probability of `sequence` following `history`
    fn probability(&self, sequence: &NGram, history: &NGram) -> Result<f64>;
}

/// Relative frequency of a sequence among all continuations of its history
///
/// When the history was never seen, the estimate falls back to the unigram
/// frequency of the first word of the sequence.
#[derive(Clone, Copy, Debug)]
pub struct MaximumLikelihood<'cache> {
    /// Counts the estimate is computed from
    cache: &'cache CountCache,
}
//
impl<'cache> MaximumLikelihood<'cache> {
    /// Set up an estimator over some counts
    pub fn new(cache: &'cache CountCache) -> Self {
        Self { cache }
    }

    /// Unigram frequency of the first token of a sequence
    fn unigram_fallback(&self, sequence: &NGram) -> Result<f64> {
        let Some(first) = sequence.tokens().first() else {
            return Ok(0.0);
        };
        let num_words = self.cache.num_words()?;
        if num_words == 0 {
            return Ok(0.0);
        }
        let count = self.cache.absolute(&NGram::new([first.as_str()]))?;
        Ok(count as f64 / num_words as f64)
    }
}
//
impl Estimator for MaximumLikelihood<'_> {
    fn probability(&self, sequence: &NGram, history: &NGram) -> Result<f64> {
        if !history.is_empty() && self.cache.absolute(history)? == 0 {
            log::trace!("History {history} was never seen, falling back to unigrams");
            return self.unigram_fallback(sequence);
        }
        let skipped = NGram::new(std::iter::repeat(SKIPPED_WORD).take(sequence.len()));
        let denominator = self.cache.absolute(&history.concat(&skipped))?;
        if denominator == 0 {
            return self.unigram_fallback(sequence);
        }
        let numerator = self.cache.absolute(&history.concat(sequence))?;
        Ok(numerator as f64 / denominator as f64)
    }
}

/// Modified Kneser-Ney discounts of one pattern
///
/// With `n1..n4` the number of sequences seen once to four or more times and
/// `Y = n1 / (n1 + n2)`, the discounts are `D1 = 1 - 2Y n2/n1`,
/// `D2 = 2 - 3Y n3/n2` and `D3+ = 3 - 4Y n4/n3`. A discount whose formula
/// divides by zero is `0.0`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ModifiedKneserNeyDiscount {
    /// Discount of sequences seen once
    pub d1: f64,

    /// Discount of sequences seen twice
    pub d2: f64,

    /// Discount of sequences seen three times or more
    pub d3_plus: f64,
}
//
impl ModifiedKneserNeyDiscount {
    /// Compute the discounts from a count-of-counts row
    pub fn from_count_of_counts(times: NGramTimes) -> Self {
        let [n1, n2, n3, n4] = times.map(|n| n as f64);
        let Some(y) = ratio(n1, n1 + n2) else {
            return Self::default();
        };
        let discount = |base: f64, factor: f64, num: f64, denom: f64| {
            ratio(num, denom).map_or(0.0, |r| base - factor * y * r)
        };
        Self {
            d1: discount(1.0, 2.0, n2, n1),
            d2: discount(2.0, 3.0, n3, n2),
            d3_plus: discount(3.0, 4.0, n4, n3),
        }
    }

    /// Discounts of a pattern whose count-of-counts is cached
    pub fn for_pattern(cache: &CountCache, pattern: &Pattern) -> Result<Self> {
        Ok(Self::from_count_of_counts(cache.count_of_counts(pattern)?))
    }

    /// Discount applicable to a sequence with some count
    pub fn discount(&self, count: u64) -> f64 {
        match count {
            0 => 0.0,
            1 => self.d1,
            2 => self.d2,
            _ => self.d3_plus,
        }
    }
}

/// Lazily computed discounts of the patterns of a count cache
#[derive(Debug)]
pub struct DiscountTable<'cache> {
    /// Counts the discounts are computed from
    cache: &'cache CountCache,

    /// Discounts computed so far
    discounts: HashMap<Pattern, ModifiedKneserNeyDiscount>,
}
//
impl<'cache> DiscountTable<'cache> {
    /// Set up a discount table over some counts
    pub fn new(cache: &'cache CountCache) -> Self {
        Self {
            cache,
            discounts: HashMap::new(),
        }
    }

    /// Discount applicable to a history, based on how often it was seen
    pub fn discount(&mut self, history: &NGram) -> Result<f64> {
        let pattern = history.pattern()?;
        let count = self.cache.absolute_for(&pattern, &history.to_string())?;
        let discounts = match self.discounts.get(&pattern) {
            Some(discounts) => *discounts,
            None => {
                let discounts = ModifiedKneserNeyDiscount::for_pattern(self.cache, &pattern)?;
                self.discounts.insert(pattern, discounts);
                discounts
            }
        };
        Ok(discounts.discount(count))
    }
}

/// Quotient, or `None` when dividing by zero
fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator != 0.0).then(|| numerator / denominator)
}
