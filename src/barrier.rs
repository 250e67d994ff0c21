//! Summary: Completion barrier for cohorts of outstanding jobs.
//! Copyright (c) YOAB. All rights reserved.
//!
//! The barrier is a wait-group over an outstanding-job counter. Every
//! submission takes a `Completion` guard from `begin()`; the guard
//! decrements the counter exactly once, when it is finished or dropped,
//! including when the job errors or panics. The driver blocks in `wait()`
//! until the counter reaches zero.
//!
//! # Outcomes
//!
//! Each completion carries a `JobOutcome`. The barrier folds outcomes into
//! a `PhaseReport` under the same lock that guards the counter, and
//! `wait()` hands the report for the finished cohort back to the driver,
//! which makes one pass/fail decision per phase.
//!
//! # Visibility
//!
//! Jobs publish their results before finishing their guard. Both go
//! through mutexes, so a driver that observes the counter at zero also
//! observes every published result of the cohort.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Default interval at which `wait()` re-checks cancellation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum number of error messages kept in a `PhaseReport`.
pub const MAX_RECORDED_ERRORS: usize = 16;

/// What a single job reported when it completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A batch write ran; `rejected` operations came back unprocessed.
    Wrote { written: usize, rejected: usize },
    /// A scan segment or query drained all of its pages.
    Read { items: usize },
    /// The job failed; its results, if any, were not published.
    Failed { error: String },
}

/// Aggregate of every job outcome in one cohort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub jobs: usize,
    pub items_written: usize,
    pub items_rejected: usize,
    pub items_read: usize,
    pub failed_jobs: usize,
    pub errors: Vec<String>,
}

impl PhaseReport {
    fn record(&mut self, outcome: JobOutcome) {
        self.jobs += 1;
        match outcome {
            JobOutcome::Wrote { written, rejected } => {
                self.items_written += written;
                self.items_rejected += rejected;
            }
            JobOutcome::Read { items } => self.items_read += items,
            JobOutcome::Failed { error } => {
                self.failed_jobs += 1;
                if self.errors.len() < MAX_RECORDED_ERRORS {
                    self.errors.push(error);
                }
            }
        }
    }

    /// True when no job failed and no write was rejected.
    pub fn is_clean(&self) -> bool {
        self.failed_jobs == 0 && self.items_rejected == 0
    }

    /// Folds another report into this one.
    pub fn merge(&mut self, other: PhaseReport) {
        self.jobs += other.jobs;
        self.items_written += other.items_written;
        self.items_rejected += other.items_rejected;
        self.items_read += other.items_read;
        self.failed_jobs += other.failed_jobs;
        let room = MAX_RECORDED_ERRORS.saturating_sub(self.errors.len());
        self.errors.extend(other.errors.into_iter().take(room));
    }

    /// Fails the phase if any job failed.
    ///
    /// Rejected writes do not fail a phase.
    pub fn require_no_failures(self, phase: &'static str) -> Result<Self> {
        if self.failed_jobs == 0 {
            return Ok(self);
        }
        Err(Error::PhaseFailed {
            phase,
            failed_jobs: self.failed_jobs,
            first_error: self.errors.first().cloned().unwrap_or_default(),
        })
    }
}

struct BarrierState {
    outstanding: usize,
    report: PhaseReport,
}

/// Shared outstanding-job counter with a blocking wait.
pub struct CompletionBarrier {
    state: Mutex<BarrierState>,
    idle: Condvar,
    /// Statistics: guards handed out.
    begun: AtomicU64,
    /// Statistics: guards completed.
    ended: AtomicU64,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState {
                outstanding: 0,
                report: PhaseReport::default(),
            }),
            idle: Condvar::new(),
            begun: AtomicU64::new(0),
            ended: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers one outstanding job and returns its completion guard.
    pub fn begin(self: &Arc<Self>) -> Completion {
        self.lock().outstanding += 1;
        self.begun.fetch_add(1, Ordering::Relaxed);
        Completion {
            barrier: Arc::clone(self),
            outcome: None,
        }
    }

    fn end(&self, outcome: JobOutcome) {
        let mut state = self.lock();
        debug_assert!(state.outstanding > 0, "completion without matching begin");
        state.outstanding = state.outstanding.saturating_sub(1);
        state.report.record(outcome);
        self.ended.fetch_add(1, Ordering::Relaxed);
        if state.outstanding == 0 {
            self.idle.notify_all();
        }
    }

    /// Number of jobs begun but not yet completed.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Blocks until every outstanding job has completed.
    ///
    /// Wakes immediately when the counter hits zero and otherwise re-checks
    /// `cancel` every `poll` interval. Returns the report of the cohort
    /// and resets it for the next one.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if `cancel` fires while jobs are outstanding.
    pub fn wait(&self, cancel: &CancelToken, poll: Duration) -> Result<PhaseReport> {
        let mut state = self.lock();
        loop {
            if state.outstanding == 0 {
                return Ok(mem::take(&mut state.report));
            }
            if cancel.is_cancelled() {
                return Err(Error::Interrupted {
                    outstanding: state.outstanding,
                });
            }
            trace!(outstanding = state.outstanding, "waiting for workers");
            state = self
                .idle
                .wait_timeout(state, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn begun_count(&self) -> u64 {
        self.begun.load(Ordering::Relaxed)
    }

    pub fn ended_count(&self) -> u64 {
        self.ended.load(Ordering::Relaxed)
    }
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for one outstanding job.
///
/// Decrements the barrier exactly once: on `finish`, or on drop if the job
/// never reached `finish`.
#[must_use = "dropping a completion immediately marks the job failed"]
pub struct Completion {
    barrier: Arc<CompletionBarrier>,
    outcome: Option<JobOutcome>,
}

impl Completion {
    /// Completes the job with the given outcome.
    pub fn finish(mut self, outcome: JobOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or_else(|| JobOutcome::Failed {
            error: if thread::panicking() {
                "job panicked".to_string()
            } else {
                "job aborted".to_string()
            },
        });
        self.barrier.end(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_wait_with_nothing_outstanding_returns_immediately() {
        let barrier = CompletionBarrier::new();
        let report = barrier.wait(&CancelToken::new(), DEFAULT_POLL_INTERVAL).unwrap();
        assert_eq!(report, PhaseReport::default());
    }

    #[test]
    fn test_finish_and_drop_both_decrement_once() {
        let barrier = Arc::new(CompletionBarrier::new());
        let a = barrier.begin();
        let b = barrier.begin();
        assert_eq!(barrier.outstanding(), 2);

        a.finish(JobOutcome::Read { items: 3 });
        assert_eq!(barrier.outstanding(), 1);
        drop(b);
        assert_eq!(barrier.outstanding(), 0);

        let report = barrier.wait(&CancelToken::new(), DEFAULT_POLL_INTERVAL).unwrap();
        assert_eq!(report.jobs, 2);
        assert_eq!(report.items_read, 3);
        assert_eq!(report.failed_jobs, 1);
        assert_eq!(barrier.begun_count(), barrier.ended_count());
    }

    #[test]
    fn test_wait_blocks_until_cohort_done() {
        let barrier = Arc::new(CompletionBarrier::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let guard = barrier.begin();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5 * i));
                    guard.finish(JobOutcome::Wrote {
                        written: 25,
                        rejected: 0,
                    });
                })
            })
            .collect();

        let report = barrier.wait(&CancelToken::new(), DEFAULT_POLL_INTERVAL).unwrap();
        assert_eq!(barrier.outstanding(), 0);
        assert_eq!(report.jobs, 8);
        assert_eq!(report.items_written, 200);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_wait_wakes_before_poll_interval() {
        let barrier = Arc::new(CompletionBarrier::new());
        let guard = barrier.begin();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            guard.finish(JobOutcome::Read { items: 0 });
        });
        let start = Instant::now();
        barrier.wait(&CancelToken::new(), Duration::from_secs(30)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn test_panicking_job_still_completes() {
        let barrier = Arc::new(CompletionBarrier::new());
        let guard = barrier.begin();
        let result = thread::spawn(move || {
            let _guard = guard;
            panic!("boom");
        })
        .join();
        assert!(result.is_err());

        let report = barrier.wait(&CancelToken::new(), DEFAULT_POLL_INTERVAL).unwrap();
        assert_eq!(report.failed_jobs, 1);
        assert_eq!(report.errors, vec!["job panicked".to_string()]);
    }

    #[test]
    fn test_cancelled_wait_returns_interrupted() {
        let barrier = Arc::new(CompletionBarrier::new());
        let guard = barrier.begin();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = barrier.wait(&cancel, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Interrupted { outstanding: 1 }));

        // The abandoned job still accounts for itself.
        drop(guard);
        assert_eq!(barrier.outstanding(), 0);
    }

    #[test]
    fn test_report_resets_between_cohorts() {
        let barrier = Arc::new(CompletionBarrier::new());
        barrier.begin().finish(JobOutcome::Read { items: 5 });
        let first = barrier.wait(&CancelToken::new(), DEFAULT_POLL_INTERVAL).unwrap();
        assert_eq!(first.items_read, 5);
        let second = barrier.wait(&CancelToken::new(), DEFAULT_POLL_INTERVAL).unwrap();
        assert_eq!(second.jobs, 0);
    }

    #[test]
    fn test_require_no_failures() {
        let mut report = PhaseReport::default();
        report.record(JobOutcome::Wrote {
            written: 20,
            rejected: 5,
        });
        let report = report.require_no_failures("load").unwrap();
        assert!(!report.is_clean());

        let mut failed = PhaseReport::default();
        failed.record(JobOutcome::Failed {
            error: "timeout".into(),
        });
        let err = failed.require_no_failures("scan").unwrap_err();
        assert!(matches!(err, Error::PhaseFailed { phase: "scan", failed_jobs: 1, .. }));
    }
}
