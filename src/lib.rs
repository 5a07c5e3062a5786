//! Resumable, chunk-parallel counting of generalized n-gram patterns
//!
//! Statistical language models are built from occurence counts of n-grams
//! and of generalizations thereof: n-grams where some words are skipped, or
//! replaced by their part-of-speech tag, and Kneser-Ney-style continuation
//! counts that tell in how many distinct contexts a sequence occurs. Such
//! generalizations are described by [`Pattern`]s.
//!
//! The [`Engine`] counts patterns over a corpus of arbitrary size with
//! bounded memory, records its progress in a ledger so that interrupted or
//! repeated runs only do the missing work, and serves counts through a
//! [`CountCache`], possibly restricted to what a query file needs.

pub mod cache;
pub mod chunker;
pub mod config;
pub mod counts;
pub mod discount;
pub mod engine;
pub mod error;
pub mod merger;
pub mod paths;
pub mod pattern;
pub mod pool;
pub mod progress;
pub mod query_cache;
pub mod resolver;
pub mod stats;
pub mod status;
pub mod training;

pub use crate::{
    cache::{CountCache, NGram},
    config::Config,
    counts::Counter,
    engine::Engine,
    error::{CountError, ValidationFailure},
    pattern::{Family, Pattern, PatternElem},
    progress::ProgressReport,
    training::{CommandTagger, NoTagger, Tagger},
};

/// Use anyhow for Result type erasure
pub use anyhow::Result;
