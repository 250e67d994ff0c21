//! Summary: Batch accumulator for bounded batch writes.
//! Copyright (c) YOAB. All rights reserved.
//!
//! The driver adds puts and deletes one at a time. Whenever the pending
//! count reaches the bound the accumulator hands the full batch to its
//! sink on that same call and starts over empty. `flush()` hands off the
//! partial remainder at the end of a phase; flushing nothing submits
//! nothing.

use std::mem;

use tracing::warn;

use crate::error::Result;
use crate::item::{Item, ItemKey};
use crate::store::{MAX_BATCH_OPS, WriteOp};

/// Number of operations per batch write.
pub const BATCH_BOUND: usize = MAX_BATCH_OPS;

/// A non-empty group of write operations against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    table: String,
    ops: Vec<WriteOp>,
}

impl Batch {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Receives finished batches from an accumulator.
pub trait BatchSink {
    /// Takes ownership of a batch. May block for backpressure.
    fn submit_batch(&self, batch: Batch) -> Result<()>;
}

/// Buffers write operations for one destination table.
///
/// The accumulator is driven from a single thread; the batches it hands
/// off may execute concurrently once submitted.
pub struct BatchAccumulator<'s, S: BatchSink + ?Sized> {
    sink: &'s S,
    table: String,
    bound: usize,
    pending: Vec<WriteOp>,
    batches_submitted: usize,
    ops_added: usize,
}

impl<'s, S: BatchSink + ?Sized> BatchAccumulator<'s, S> {
    /// Creates an accumulator using the store's batch bound.
    pub fn new(sink: &'s S, table: impl Into<String>) -> Self {
        Self::with_bound(sink, table, BATCH_BOUND)
    }

    /// Creates an accumulator with a custom bound.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is 0 or larger than `MAX_BATCH_OPS`.
    pub fn with_bound(sink: &'s S, table: impl Into<String>, bound: usize) -> Self {
        assert!(
            (1..=MAX_BATCH_OPS).contains(&bound),
            "batch bound must be in 1..={MAX_BATCH_OPS}"
        );
        Self {
            sink,
            table: table.into(),
            bound,
            pending: Vec::with_capacity(bound),
            batches_submitted: 0,
            ops_added: 0,
        }
    }

    pub fn put(&mut self, item: Item) -> Result<()> {
        self.add(WriteOp::Put(item))
    }

    pub fn delete(&mut self, key: ItemKey) -> Result<()> {
        self.add(WriteOp::Delete(key))
    }

    /// Appends one operation, handing off the batch if it is now full.
    pub fn add(&mut self, op: WriteOp) -> Result<()> {
        self.pending.push(op);
        self.ops_added += 1;
        if self.pending.len() >= self.bound {
            self.hand_off()?;
        }
        Ok(())
    }

    /// Hands off any pending operations as a final, possibly partial, batch.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.hand_off()
    }

    fn hand_off(&mut self) -> Result<()> {
        let ops = mem::replace(&mut self.pending, Vec::with_capacity(self.bound));
        self.batches_submitted += 1;
        self.sink.submit_batch(Batch {
            table: self.table.clone(),
            ops,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Operations added but not yet handed off.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn batches_submitted(&self) -> usize {
        self.batches_submitted
    }

    pub fn ops_added(&self) -> usize {
        self.ops_added
    }
}

impl<S: BatchSink + ?Sized> Drop for BatchAccumulator<'_, S> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                table = %self.table,
                dropped = self.pending.len(),
                "batch accumulator dropped without flush"
            );
        }
    }
}
