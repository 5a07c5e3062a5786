//! Fixed-size worker pool running one task per pattern

use crate::{
    config::Config,
    pattern::Pattern,
    progress::ProgressReport,
    Result,
};
use anyhow::Context;
use rayon::prelude::*;
use std::{borrow::Cow, collections::BTreeSet};

/// Worker pool of the count engine
///
/// Tasks of a stage are independent of each other: they share no mutable
/// state besides the ledger, which serializes its own updates.
#[derive(Debug)]
pub struct WorkerPool {
    /// Underlying thread pool
    pool: rayon::ThreadPool,
}
//
impl WorkerPool {
    /// Set up a pool with as many threads as configured
    pub fn new(config: &Config) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_workers.get())
            .thread_name(|idx| format!("count-worker-{idx}"))
            .build()
            .context("setting up the worker pool")?;
        Ok(Self { pool })
    }

    /// Run a task for each pattern of a set, return the patterns that failed
    ///
    /// A failing task is logged, but does not prevent other tasks from
    /// running to completion.
    pub fn run(
        &self,
        what: impl Into<Cow<'static, str>>,
        patterns: &BTreeSet<Pattern>,
        report: &ProgressReport,
        task: impl Fn(&Pattern) -> Result<()> + Sync,
    ) -> BTreeSet<Pattern> {
        if patterns.is_empty() {
            return BTreeSet::new();
        }
        let what = what.into();
        let tracker = report.add(what.clone(), patterns.len());
        self.pool.install(|| {
            patterns
                .par_iter()
                .filter_map(|pattern| {
                    let result = task(pattern);
                    tracker.task_done(result.is_ok());
                    match result {
                        Ok(()) => None,
                        Err(e) => {
                            log::error!("{what} failed for pattern {pattern}: {e:#}");
                            Some(pattern.clone())
                        }
                    }
                })
                .collect()
        })
    }
}
