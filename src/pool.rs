//! Summary: Fixed-capacity worker pool with a bounded submission queue.
//! Copyright (c) YOAB. All rights reserved.
//!
//! # Design
//!
//! - `capacity` worker threads are started eagerly and live until the
//!   pool is dropped
//! - Jobs travel over a bounded channel; when it is full, `submit` blocks
//!   the caller until a worker frees a slot (backpressure, not failure)
//! - `submit_cancellable` re-checks a cancel token while blocked, so a
//!   driver stuck on a full queue still observes Ctrl-C
//! - A panicking job is caught at the worker loop so the worker survives;
//!   barrier accounting is the job's own responsibility

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};
use tracing::{debug, error};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Default worker count.
pub const DEFAULT_CAPACITY: usize = 60;

/// A unit of work executed by one worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Statistics shared by the workers.
#[derive(Default)]
struct PoolStats {
    executed: AtomicU64,
    panicked: AtomicU64,
}

/// Fixed set of worker threads fed from a bounded queue.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Starts `capacity` workers behind a queue of `queue_capacity` jobs.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `capacity` is 0, or `WorkerSpawn` if a thread
    /// cannot be started.
    pub fn new(capacity: usize, queue_capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("worker pool capacity must be at least 1".into()));
        }
        let (sender, receiver) = bounded::<Job>(queue_capacity);
        let stats = Arc::new(PoolStats::default());

        let mut workers = Vec::with_capacity(capacity);
        for id in 0..capacity {
            let receiver = receiver.clone();
            let stats = Arc::clone(&stats);
            let handle = thread::Builder::new()
                .name(format!("loader-{id}"))
                .spawn(move || worker_loop(id, receiver, stats))
                .map_err(|source| Error::WorkerSpawn { worker: id, source })?;
            workers.push(handle);
        }
        debug!(capacity, queue_capacity, "worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers,
            capacity,
            stats,
        })
    }

    /// Number of jobs that can execute at the same time.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues a job, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `PoolClosed` if the workers are gone. The job is dropped
    /// unexecuted in that case.
    pub fn submit(&self, job: Job) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(Error::PoolClosed)?;
        sender.send(job).map_err(|_| Error::PoolClosed)
    }

    /// Queues a job like `submit`, giving up once `cancel` fires.
    ///
    /// The token is checked before the first attempt and again every
    /// `poll` while the queue stays full.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` (with the current queue depth) if cancelled,
    /// or `PoolClosed` if the workers are gone. The job is dropped
    /// unexecuted in both cases.
    pub fn submit_cancellable(&self, job: Job, cancel: &CancelToken, poll: Duration) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(Error::PoolClosed)?;
        let mut job = job;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Interrupted {
                    outstanding: sender.len(),
                });
            }
            match sender.send_timeout(job, poll) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => job = returned,
                Err(SendTimeoutError::Disconnected(_)) => return Err(Error::PoolClosed),
            }
        }
    }

    /// Jobs waiting in the queue for a free worker.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    pub fn executed(&self) -> u64 {
        self.stats.executed.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.stats.panicked.load(Ordering::Relaxed)
    }
}

fn worker_loop(id: usize, receiver: Receiver<Job>, stats: Arc<PoolStats>) {
    while let Ok(job) = receiver.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            stats.panicked.fetch_add(1, Ordering::Relaxed);
            error!(worker = id, "job panicked");
        }
        stats.executed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain the queue and exit.
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(WorkerPool::new(0, 4), Err(Error::Config(_))));
    }

    #[test]
    fn test_runs_every_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(4, 8).unwrap();
            for _ in 0..100 {
                let counter = Arc::clone(&counter);
                pool.submit(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_jobs_run_in_parallel() {
        let pool = WorkerPool::new(8, 8).unwrap();
        let start = Instant::now();
        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..8 {
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                thread::sleep(Duration::from_millis(100));
                tx.send(()).unwrap();
            }))
            .unwrap();
        }
        for _ in 0..8 {
            rx.recv().unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(700));
    }

    #[test]
    fn test_submit_blocks_when_queue_full() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);

        // Occupies the only worker until the gate opens.
        pool.submit(Box::new(move || {
            let _ = gate_rx.recv();
        }))
        .unwrap();
        thread::sleep(Duration::from_millis(50));
        // Fills the queue.
        pool.submit(Box::new(|| {})).unwrap();

        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        let opener = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            r.store(1, Ordering::SeqCst);
            gate_tx.send(()).unwrap();
        });

        // Blocks until the worker frees a slot.
        pool.submit(Box::new(|| {})).unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        opener.join().unwrap();
    }

    #[test]
    fn test_cancel_unblocks_full_queue() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        pool.submit(Box::new(move || {
            let _ = gate_rx.recv();
        }))
        .unwrap();
        thread::sleep(Duration::from_millis(50));
        pool.submit(Box::new(|| {})).unwrap();

        let cancel = CancelToken::new();
        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cancel.cancel();
            })
        };
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let start = Instant::now();
        let err = pool
            .submit_cancellable(
                Box::new(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                }),
                &cancel,
                Duration::from_millis(10),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted { outstanding: 1 }));
        assert!(start.elapsed() < Duration::from_secs(1));
        canceller.join().unwrap();

        gate_tx.send(()).unwrap();
        drop(pool);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancelled_token_rejects_before_queueing() {
        let pool = WorkerPool::new(2, 4).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = pool
            .submit_cancellable(Box::new(|| {}), &cancel, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted { outstanding: 0 }));
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let pool = WorkerPool::new(1, 4).unwrap();
        pool.submit(Box::new(|| panic!("bad job"))).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(Box::new(move || tx.send(42).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        assert_eq!(pool.panicked(), 1);
    }
}
