//! Progress reporting infrastructure

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// CLI progress report of ongoing pipeline stages
///
/// Handed down to the stages of the pipeline instead of relying on global
/// state. On top of the progress bars, it keeps track of how many tasks
/// completed or failed, which the driver can read once a stage is over.
///
/// To avoid corrupted terminal output, you should not write anything to stdout
/// or stderr yourself as long as a report is being displayed. Please use logs
/// for debug messages.
#[derive(Clone, Debug, Default)]
pub struct ProgressReport {
    /// Terminal display
    bars: MultiProgress,

    /// Task accounting
    tasks: Arc<TaskCounters>,
}
//
impl ProgressReport {
    /// Prepare to report progress on the cli
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress report that is never displayed, e.g. for tests
    pub fn hidden() -> Self {
        Self {
            bars: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            tasks: Arc::default(),
        }
    }

    /// Prepare to report on a new pipeline stage
    pub fn add(&self, what: impl Into<Cow<'static, str>>, tasks: usize) -> ProgressTracker {
        let bar = ProgressBar::new(tasks as u64)
            .with_prefix(what.into())
            .with_style(
                ProgressStyle::with_template("{prefix} {wide_bar} {pos}/{len} ({elapsed})")
                    .expect("this should be a valid indicatif style"),
            );
        if tasks > 0 {
            self.bars.add(bar.clone());
        }
        ProgressTracker {
            bar,
            report: self.bars.clone(),
            tasks: self.tasks.clone(),
        }
    }

    /// Number of tasks that ran to completion so far
    pub fn tasks_completed(&self) -> usize {
        self.tasks.completed.load(Ordering::Relaxed)
    }

    /// Number of tasks that failed so far
    pub fn tasks_failed(&self) -> usize {
        self.tasks.failed.load(Ordering::Relaxed)
    }
}

/// Completion accounting shared by all trackers of a report
#[derive(Debug, Default)]
struct TaskCounters {
    /// Tasks that succeeded
    completed: AtomicUsize,

    /// Tasks that failed
    failed: AtomicUsize,
}

/// Mechanism to track the progress of a stage
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    /// Progress bar for this specific stage
    bar: ProgressBar,

    /// Underlying progress report
    report: MultiProgress,

    /// Task accounting of the underlying report
    tasks: Arc<TaskCounters>,
}
//
impl ProgressTracker {
    /// Record the outcome of one task
    ///
    /// Returns truth that every task of the stage is done
    pub fn task_done(&self, success: bool) -> bool {
        let counter = if success {
            &self.tasks.completed
        } else {
            &self.tasks.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);

        // Track progress
        self.bar.inc(1);
        let current = self.bar.position();
        let max = self.bar.length().unwrap_or(0);
        assert!(current <= max, "recorded more tasks than expected");

        // Hide progress bar once done
        let finished = current == max;
        if finished {
            self.bar.finish_and_clear();
            self.report.remove(&self.bar);
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_accounting() {
        let report = ProgressReport::hidden();
        let tracker = report.add("Testing", 3);
        assert!(!tracker.task_done(true));
        assert!(!tracker.task_done(false));
        assert!(tracker.task_done(true));
        assert_eq!(report.tasks_completed(), 2);
        assert_eq!(report.tasks_failed(), 1);
    }
}
