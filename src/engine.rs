//! Summary: Bulk I/O engine owning the worker pool and shared phase state.
//! Copyright (c) YOAB. All rights reserved.
//!
//! `BulkEngine` is the context object every phase runs against. The
//! driver owns it and calls it from one thread; jobs capture only `Arc`
//! clones of the store handle, the barrier and the aggregators.
//!
//! # Job lifecycle
//!
//! 1. The driver calls one of the `submit_*` methods
//! 2. The engine takes a completion guard from the barrier and queues the
//!    job (blocking if the queue is full); a cancelled token makes the
//!    submit fail with `Interrupted` instead of queueing
//! 3. A worker runs the job: store I/O, then publish into an aggregator
//! 4. The job finishes its guard with a `JobOutcome`; errors stay inside
//!    the job and become a failed outcome
//! 5. The driver calls `wait()` and receives the cohort's `PhaseReport`

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::aggregator::ResultAggregator;
use crate::barrier::{CompletionBarrier, DEFAULT_POLL_INTERVAL, JobOutcome, PhaseReport};
use crate::batch::{BATCH_BOUND, Batch, BatchAccumulator, BatchSink};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::pool::{DEFAULT_CAPACITY, WorkerPool};
use crate::store::{self, MAX_BATCH_OPS, ScanTarget, Segment, TableStore};

/// Configuration for the bulk engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker threads, and the default scan segment count.
    pub workers: usize,
    /// Jobs that may wait in the queue before `submit` blocks.
    pub queue_capacity: usize,
    /// Operations per batch write.
    pub batch_bound: usize,
    /// Cancellation re-check interval while waiting for a cohort.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_CAPACITY,
            queue_capacity: DEFAULT_CAPACITY * 2,
            batch_bound: BATCH_BOUND,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Checks the configuration before any thread is started.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be at least 1".into()));
        }
        if !(1..=MAX_BATCH_OPS).contains(&self.batch_bound) {
            return Err(Error::Config(format!(
                "batch bound must be between 1 and {MAX_BATCH_OPS}"
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Concurrent batch-write, segmented-scan and point-query engine.
pub struct BulkEngine {
    store: Arc<dyn TableStore>,
    pool: WorkerPool,
    barrier: Arc<CompletionBarrier>,
    segments: Arc<ResultAggregator<usize>>,
    queries: Arc<ResultAggregator<String>>,
    cancel: CancelToken,
    config: EngineConfig,
}

impl BulkEngine {
    /// Starts the worker pool and returns an engine bound to `store`.
    pub fn new(store: Arc<dyn TableStore>, config: EngineConfig, cancel: CancelToken) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.workers, config.queue_capacity)?;
        Ok(Self {
            store,
            pool,
            barrier: Arc::new(CompletionBarrier::new()),
            segments: Arc::new(ResultAggregator::new()),
            queries: Arc::new(ResultAggregator::new()),
            cancel,
            config,
        })
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of jobs that execute concurrently.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn barrier(&self) -> &CompletionBarrier {
        &self.barrier
    }

    /// Scan results keyed by segment id.
    pub fn segment_results(&self) -> &ResultAggregator<usize> {
        &self.segments
    }

    /// Query results keyed by partition key.
    pub fn query_results(&self) -> &ResultAggregator<String> {
        &self.queries
    }

    /// Opens a batch accumulator for `table` that submits to this engine.
    pub fn writer(&self, table: impl Into<String>) -> BatchAccumulator<'_, Self> {
        BatchAccumulator::with_bound(self, table, self.config.batch_bound)
    }

    fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        // A job rejected here is dropped along with its completion guard,
        // so the barrier stays balanced.
        match self
            .pool
            .submit_cancellable(Box::new(job), &self.cancel, self.config.poll_interval)
        {
            Err(Error::Interrupted { .. }) => Err(Error::Interrupted {
                outstanding: self.barrier.outstanding(),
            }),
            other => other,
        }
    }

    /// Queues one batch write.
    pub fn submit_write(&self, batch: Batch) -> Result<()> {
        let store = Arc::clone(&self.store);
        let completion = self.barrier.begin();
        self.dispatch(move || {
            let outcome = match store.batch_write(batch.table(), batch.ops()) {
                Ok(result) => {
                    let rejected = result.unprocessed.len();
                    if rejected > 0 {
                        warn!(table = batch.table(), rejected, "batch write partially rejected");
                    }
                    JobOutcome::Wrote {
                        written: batch.len().saturating_sub(rejected),
                        rejected,
                    }
                }
                Err(err) => {
                    warn!(table = batch.table(), error = %err, "batch write failed");
                    JobOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            completion.finish(outcome);
        })
    }

    /// Queues a scan of one segment, publishing into `segment_results()`.
    pub fn submit_scan(&self, target: ScanTarget, segment: Segment) -> Result<()> {
        let store = Arc::clone(&self.store);
        let segments = Arc::clone(&self.segments);
        let completion = self.barrier.begin();
        self.dispatch(move || {
            let outcome = match store::drain(store::scan_pages(store.as_ref(), &target, segment)) {
                Ok(items) => {
                    let count = items.len();
                    debug!(%target, segment = segment.id, items = count, "segment scanned");
                    segments.put(segment.id, items);
                    JobOutcome::Read { items: count }
                }
                Err(err) => {
                    warn!(%target, segment = segment.id, error = %err, "segment scan failed");
                    JobOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            completion.finish(outcome);
        })
    }

    /// Queues a partition-key query, appending into `query_results()`.
    pub fn submit_query(&self, table: impl Into<String>, partition_key: impl Into<String>) -> Result<()> {
        let table = table.into();
        let partition_key = partition_key.into();
        let store = Arc::clone(&self.store);
        let queries = Arc::clone(&self.queries);
        let completion = self.barrier.begin();
        self.dispatch(move || {
            let outcome = match store::drain(store::query_pages(store.as_ref(), &table, &partition_key)) {
                Ok(items) => {
                    let count = items.len();
                    queries.append(partition_key, items);
                    JobOutcome::Read { items: count }
                }
                Err(err) => {
                    warn!(%table, %partition_key, error = %err, "query failed");
                    JobOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            completion.finish(outcome);
        })
    }

    /// Blocks until every submitted job has completed.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if the engine's cancel token fires first.
    pub fn wait(&self) -> Result<PhaseReport> {
        self.barrier.wait(&self.cancel, self.config.poll_interval)
    }
}

impl BatchSink for BulkEngine {
    fn submit_batch(&self, batch: Batch) -> Result<()> {
        self.submit_write(batch)
    }
}
