//! Summary: Segmented parallel scans, convergence polling and table clearing.
//! Copyright (c) YOAB. All rights reserved.
//!
//! A scan cycle splits a table or index into `N` disjoint segments, runs
//! one job per segment, waits for the cohort and reads the per-segment
//! results. Convergence mode repeats cycles until the observed item count
//! reaches an expected count.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::barrier::PhaseReport;
use crate::engine::BulkEngine;
use crate::error::{Error, Result};
use crate::item::Item;
use crate::report::duration_ms;
use crate::store::{ScanTarget, Segment};

/// Results of one complete scan cycle.
#[derive(Debug)]
pub struct ScanCycle {
    /// Items per segment id; every segment of the cycle has an entry.
    pub results: BTreeMap<usize, Vec<Item>>,
    pub elapsed: Duration,
    pub report: PhaseReport,
}

impl ScanCycle {
    pub fn total_items(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }

    /// Item count per segment, in segment order.
    pub fn counts(&self) -> Vec<usize> {
        self.results.values().map(Vec::len).collect()
    }

    pub fn into_items(self) -> impl Iterator<Item = Item> {
        self.results.into_values().flatten()
    }
}

/// Bounds on a convergence loop. `None` means unbounded.
///
/// Both bounds are checked after each cycle completes. A cycle that is
/// already running is never cut short, so a stalled segment can carry the
/// loop past `timeout` by up to one cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergenceLimit {
    pub max_cycles: Option<usize>,
    pub timeout: Option<Duration>,
}

impl ConvergenceLimit {
    pub fn unbounded() -> Self {
        Self::default()
    }

    fn exhausted(&self, cycles: usize, elapsed: Duration) -> bool {
        self.max_cycles.is_some_and(|max| cycles >= max) || self.timeout.is_some_and(|t| elapsed >= t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    Converged,
    NotConverged,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleStats {
    pub cycle: usize,
    pub items: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms")]
    pub elapsed: Duration,
    pub failed_jobs: usize,
}

/// Outcome of a convergence loop.
#[derive(Debug, Clone, Serialize)]
pub struct Convergence {
    pub status: ConvergenceStatus,
    pub expected: usize,
    /// Item count seen by the last cycle.
    pub observed: usize,
    /// From the first cycle's start to the start of the converging cycle.
    /// For a loop that did not converge, to the start of the last cycle.
    #[serde(rename = "lag_ms", serialize_with = "duration_ms")]
    pub lag: Duration,
    #[serde(rename = "total_ms", serialize_with = "duration_ms")]
    pub total: Duration,
    pub cycles: Vec<CycleStats>,
}

impl Convergence {
    pub fn converged(&self) -> bool {
        self.status == ConvergenceStatus::Converged
    }
}

/// Report of a clear phase.
#[derive(Debug, Clone, Serialize)]
pub struct ClearReport {
    pub table: String,
    pub scanned: usize,
    pub deleted: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms")]
    pub elapsed: Duration,
    pub delete_phase: PhaseReport,
}

/// Drives scan cycles on a `BulkEngine`.
pub struct SegmentedScanner<'e> {
    engine: &'e BulkEngine,
}

impl<'e> SegmentedScanner<'e> {
    pub fn new(engine: &'e BulkEngine) -> Self {
        Self { engine }
    }

    fn run_cycle(&self, target: &ScanTarget, segments: usize) -> Result<ScanCycle> {
        if segments == 0 {
            return Err(Error::Config("scan needs at least one segment".into()));
        }
        let start = Instant::now();
        self.engine.segment_results().clear();
        for segment in Segment::all(segments) {
            self.engine.submit_scan(target.clone(), segment)?;
        }
        let report = self.engine.wait()?;
        let results = self.engine.segment_results().take_all();
        let cycle = ScanCycle {
            results,
            elapsed: start.elapsed(),
            report,
        };
        debug!(
            %target,
            segments,
            items = cycle.total_items(),
            elapsed_ms = cycle.elapsed.as_millis() as u64,
            "scan cycle complete"
        );
        Ok(cycle)
    }

    /// Scans `target` once with `segments` parallel jobs.
    ///
    /// # Errors
    ///
    /// Fails with `PhaseFailed` if any segment job failed, since the
    /// per-segment results would be incomplete.
    pub fn single_cycle(&self, target: &ScanTarget, segments: usize) -> Result<ScanCycle> {
        let mut cycle = self.run_cycle(target, segments)?;
        cycle.report = cycle.report.require_no_failures("scan")?;
        debug_assert_eq!(cycle.results.len(), segments);
        Ok(cycle)
    }

    /// Repeats scan cycles until at least `expected` items are observed.
    ///
    /// A cycle with failed segments counts as not yet converged. `limit`
    /// is checked between cycles, never inside one.
    pub fn converge(
        &self,
        target: &ScanTarget,
        segments: usize,
        expected: usize,
        limit: ConvergenceLimit,
    ) -> Result<Convergence> {
        let start = Instant::now();
        let mut cycles = Vec::new();
        loop {
            let cycle_start = start.elapsed();
            let cycle = self.run_cycle(target, segments)?;
            let observed = cycle.total_items();
            if cycle.report.failed_jobs > 0 {
                warn!(
                    %target,
                    failed_jobs = cycle.report.failed_jobs,
                    "scan cycle had failed segments"
                );
            }
            cycles.push(CycleStats {
                cycle: cycles.len() + 1,
                items: observed,
                elapsed: cycle.elapsed,
                failed_jobs: cycle.report.failed_jobs,
            });
            info!(%target, observed, expected, "{observed} of {expected} items replicated");

            let converged = observed >= expected && cycle.report.failed_jobs == 0;
            if converged || limit.exhausted(cycles.len(), start.elapsed()) {
                let status = if converged {
                    ConvergenceStatus::Converged
                } else {
                    warn!(%target, observed, expected, cycles = cycles.len(), "gave up waiting for convergence");
                    ConvergenceStatus::NotConverged
                };
                return Ok(Convergence {
                    status,
                    expected,
                    observed,
                    lag: cycle_start,
                    total: start.elapsed(),
                    cycles,
                });
            }
        }
    }

    /// Deletes every item of `table`: one scan cycle, then batched deletes.
    pub fn clear(&self, table: &str) -> Result<ClearReport> {
        let start = Instant::now();
        let cycle = self.single_cycle(&ScanTarget::table(table), self.engine.capacity())?;
        let scanned = cycle.total_items();

        let mut writer = self.engine.writer(table);
        let mut deleted = 0;
        for item in cycle.into_items() {
            match item.key() {
                Some(key) => {
                    writer.delete(key)?;
                    deleted += 1;
                }
                None => warn!(table, "skipping scanned item without a primary key"),
            }
        }
        writer.flush()?;
        drop(writer);
        let delete_phase = self.engine.wait()?;

        let elapsed = start.elapsed();
        info!(
            table,
            deleted,
            elapsed_ms = elapsed.as_millis() as u64,
            "cleared {deleted} items from {table}"
        );
        Ok(ClearReport {
            table: table.to_string(),
            scanned,
            deleted,
            elapsed,
            delete_phase,
        })
    }
}
