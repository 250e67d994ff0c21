//! Summary: In-process partitioned table store with replicated secondary indexes.
//! Copyright (c) YOAB. All rights reserved.
//!
//! `MemoryStore` is the bundled `TableStore` implementation. It keeps each
//! table as an ordered map keyed by `(PK, SK)` and each global secondary
//! index as a separate ordered projection, similar to how buckets keep
//! their own keyspace inside one tree.
//!
//! # Replication
//!
//! Index projections are not updated by the write itself. Every applied
//! write queues a replication record that becomes visible after
//! `replication_delay`; due records are applied lazily whenever the index
//! is read. This gives index scans the same eventually-consistent shape
//! as a hosted store.
//!
//! # Segments
//!
//! A partition belongs to segment `crc32(partition_key) % total`, so all
//! items of one partition land in the same segment and segments are
//! disjoint.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, Result};
use crate::item::{Item, ItemKey};
use crate::store::{
    BatchWriteOutcome, Cursor, IndexSpec, MAX_BATCH_OPS, Page, ScanTarget, Segment, TableSpec,
    TableStore, Throughput, WriteOp,
};

/// Tuning and fault-injection knobs for `MemoryStore`.
#[derive(Debug, Clone)]
pub struct MemoryStoreOptions {
    /// Maximum number of items returned per scan or query page.
    pub page_size: usize,
    /// Delay before a base-table write becomes visible in its indexes.
    pub replication_delay: Duration,
    /// Reject every n-th write operation as unprocessed.
    pub reject_every: Option<usize>,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            replication_delay: Duration::ZERO,
            reject_every: None,
        }
    }
}

/// Call counters, for observing how the engine drives the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub batch_calls: u64,
    pub scan_pages: u64,
    pub query_pages: u64,
    pub rejected_ops: u64,
}

/// Index projection key: index partition, index sort, then base key for uniqueness.
type IndexEntryKey = (String, String, String, String);

struct IndexState {
    spec: IndexSpec,
    entries: BTreeMap<IndexEntryKey, Item>,
    /// Where each base item currently sits in the projection.
    by_base: HashMap<ItemKey, IndexEntryKey>,
}

impl IndexState {
    fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeMap::new(),
            by_base: HashMap::new(),
        }
    }

    fn project(&mut self, key: &ItemKey, item: Option<&Item>) {
        if let Some(old) = self.by_base.remove(key) {
            self.entries.remove(&old);
        }
        let Some(item) = item else { return };
        // Sparse: items lacking either index attribute are not projected.
        let (Some(ipk), Some(isk)) = (
            item.get_str(&self.spec.key_schema.partition),
            item.get_str(&self.spec.key_schema.sort),
        ) else {
            return;
        };
        let entry_key = (
            ipk.to_string(),
            isk.to_string(),
            key.partition.clone(),
            key.sort.clone(),
        );
        self.by_base.insert(key.clone(), entry_key.clone());
        self.entries.insert(entry_key, item.clone());
    }
}

struct PendingReplication {
    visible_at: Instant,
    key: ItemKey,
    item: Option<Item>,
}

struct TableState {
    spec: TableSpec,
    items: BTreeMap<ItemKey, Item>,
    indexes: BTreeMap<String, IndexState>,
    pending: VecDeque<PendingReplication>,
}

impl TableState {
    fn new(spec: TableSpec) -> Self {
        Self {
            spec,
            items: BTreeMap::new(),
            indexes: BTreeMap::new(),
            pending: VecDeque::new(),
        }
    }

    fn apply(&mut self, op: &WriteOp, replication_delay: Duration) {
        let (key, item) = match op {
            WriteOp::Put(item) => match item.key() {
                Some(key) => {
                    self.items.insert(key.clone(), item.clone());
                    (key, Some(item.clone()))
                }
                None => return,
            },
            WriteOp::Delete(key) => {
                self.items.remove(key);
                (key.clone(), None)
            }
        };
        if self.indexes.is_empty() {
            return;
        }
        self.pending.push_back(PendingReplication {
            visible_at: Instant::now() + replication_delay,
            key,
            item,
        });
    }

    fn has_due(&self, now: Instant) -> bool {
        self.pending.front().is_some_and(|record| record.visible_at <= now)
    }

    /// Applies every replication record that is due at `now`.
    fn replicate_due(&mut self, now: Instant) {
        while let Some(front) = self.pending.front() {
            if front.visible_at > now {
                break;
            }
            let Some(record) = self.pending.pop_front() else { break };
            for index in self.indexes.values_mut() {
                index.project(&record.key, record.item.as_ref());
            }
        }
    }
}

/// In-process `TableStore` implementation.
///
/// Tables are individually locked so concurrent jobs against different
/// tables never contend. Scans and queries share a table's read lock;
/// writes and due index replication take it exclusively.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, RwLock<TableState>>>,
    options: MemoryStoreOptions,
    op_counter: AtomicUsize,
    batch_calls: AtomicU64,
    scan_pages: AtomicU64,
    query_pages: AtomicU64,
    rejected_ops: AtomicU64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Segment a partition key belongs to when the scan is split `total` ways.
pub fn segment_of(partition_key: &str, total: usize) -> usize {
    crc32fast::hash(partition_key.as_bytes()) as usize % total.max(1)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_options(MemoryStoreOptions::default())
    }

    pub fn with_options(options: MemoryStoreOptions) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            options,
            op_counter: AtomicUsize::new(0),
            batch_calls: AtomicU64::new(0),
            scan_pages: AtomicU64::new(0),
            query_pages: AtomicU64::new(0),
            rejected_ops: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &MemoryStoreOptions {
        &self.options
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            batch_calls: self.batch_calls.load(Ordering::Relaxed),
            scan_pages: self.scan_pages.load(Ordering::Relaxed),
            query_pages: self.query_pages.load(Ordering::Relaxed),
            rejected_ops: self.rejected_ops.load(Ordering::Relaxed),
        }
    }

    /// Runs `f` against the named table while holding its write lock.
    fn with_table_mut<R>(&self, name: &str, f: impl FnOnce(&mut TableState) -> Result<R>) -> Result<R> {
        let tables = read(&self.tables);
        let table = tables.get(name).ok_or_else(|| Error::TableNotFound {
            name: name.to_string(),
        })?;
        let mut state = write(table);
        f(&mut state)
    }

    /// Runs `f` against the named table under a shared read lock.
    ///
    /// With `replicate`, due index replication is applied first under a
    /// short write lock.
    fn with_table<R>(&self, name: &str, replicate: bool, f: impl FnOnce(&TableState) -> Result<R>) -> Result<R> {
        let tables = read(&self.tables);
        let table = tables.get(name).ok_or_else(|| Error::TableNotFound {
            name: name.to_string(),
        })?;
        if replicate {
            let now = Instant::now();
            if read(table).has_due(now) {
                write(table).replicate_due(now);
            }
        }
        let state = read(table);
        f(&state)
    }

    /// Number of items currently stored in a base table.
    pub fn item_count(&self, table: &str) -> Result<usize> {
        self.with_table(table, false, |state| Ok(state.items.len()))
    }

    /// Number of items currently visible in an index.
    pub fn index_item_count(&self, table: &str, index: &str) -> Result<usize> {
        self.with_table(table, true, |state| {
            state
                .indexes
                .get(index)
                .map(|idx| idx.entries.len())
                .ok_or_else(|| Error::IndexNotFound {
                    table: table.to_string(),
                    index: index.to_string(),
                })
        })
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let tables = read(&self.tables);
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Throughput hint a table was created with.
    pub fn throughput(&self, table: &str) -> Result<Throughput> {
        self.with_table(table, false, |state| Ok(state.spec.throughput))
    }

    fn should_reject(&self) -> bool {
        match self.options.reject_every {
            Some(n) if n > 0 => self.op_counter.fetch_add(1, Ordering::Relaxed) % n == n - 1,
            _ => false,
        }
    }

    fn page_of<K: Clone>(
        &self,
        matching: impl Iterator<Item = (K, Item)>,
        cursor_of: impl Fn(&K) -> Cursor,
    ) -> Page {
        let page_size = self.options.page_size.max(1);
        let mut items = Vec::with_capacity(page_size);
        let mut last_key = None;
        let mut more = false;
        for (key, item) in matching {
            if items.len() == page_size {
                more = true;
                break;
            }
            last_key = Some(key);
            items.push(item);
        }
        let next = if more { last_key.as_ref().map(cursor_of) } else { None };
        Page { items, next }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cursor_part(cursor: &Cursor, idx: usize) -> Result<String> {
    cursor
        .parts()
        .get(idx)
        .cloned()
        .ok_or_else(|| Error::Store(format!("malformed cursor {cursor:?}")))
}

impl TableStore for MemoryStore {
    fn create_table(&self, spec: &TableSpec) -> Result<()> {
        let mut tables = write(&self.tables);
        if tables.contains_key(&spec.name) {
            return Err(Error::TableExists {
                name: spec.name.clone(),
            });
        }
        debug!(table = %spec.name, "creating table");
        tables.insert(spec.name.clone(), RwLock::new(TableState::new(spec.clone())));
        Ok(())
    }

    fn create_index(&self, table: &str, spec: &IndexSpec) -> Result<()> {
        self.with_table_mut(table, |state| {
            if state.indexes.contains_key(&spec.name) {
                return Err(Error::IndexExists {
                    table: table.to_string(),
                    index: spec.name.clone(),
                });
            }
            // Backfill from the current table contents.
            let mut index = IndexState::new(spec.clone());
            for (key, item) in &state.items {
                index.project(key, Some(item));
            }
            debug!(table, index = %spec.name, backfilled = index.entries.len(), "creating index");
            state.indexes.insert(spec.name.clone(), index);
            Ok(())
        })
    }

    fn batch_write(&self, table: &str, ops: &[WriteOp]) -> Result<BatchWriteOutcome> {
        if ops.len() > MAX_BATCH_OPS {
            return Err(Error::BatchTooLarge {
                len: ops.len(),
                max: MAX_BATCH_OPS,
            });
        }
        if ops.iter().any(|op| op.key().is_none()) {
            return Err(Error::Store("put item is missing its primary key".into()));
        }
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        let delay = self.options.replication_delay;
        self.with_table_mut(table, |state| {
            let mut outcome = BatchWriteOutcome::default();
            for op in ops {
                if self.should_reject() {
                    outcome.unprocessed.push(op.clone());
                    continue;
                }
                state.apply(op, delay);
            }
            if delay.is_zero() {
                state.replicate_due(Instant::now());
            }
            self.rejected_ops
                .fetch_add(outcome.unprocessed.len() as u64, Ordering::Relaxed);
            Ok(outcome)
        })
    }

    fn scan_page(
        &self,
        target: &ScanTarget,
        segment: Segment,
        start: Option<&Cursor>,
    ) -> Result<Page> {
        self.scan_pages.fetch_add(1, Ordering::Relaxed);
        let replicate = matches!(target, ScanTarget::Index { .. });
        self.with_table(target.table_name(), replicate, |state| match target {
            ScanTarget::Table(_) => {
                let lower = match start {
                    Some(c) => Bound::Excluded(ItemKey::new(cursor_part(c, 0)?, cursor_part(c, 1)?)),
                    None => Bound::Unbounded,
                };
                let matching = state
                    .items
                    .range((lower, Bound::Unbounded))
                    .filter(|(key, _)| segment_of(&key.partition, segment.total) == segment.id)
                    .map(|(key, item)| (key.clone(), item.clone()));
                Ok(self.page_of(matching, |key| {
                    Cursor::new(vec![key.partition.clone(), key.sort.clone()])
                }))
            }
            ScanTarget::Index { table, index } => {
                let idx = state.indexes.get(index).ok_or_else(|| Error::IndexNotFound {
                    table: table.clone(),
                    index: index.clone(),
                })?;
                let lower = match start {
                    Some(c) => Bound::Excluded((
                        cursor_part(c, 0)?,
                        cursor_part(c, 1)?,
                        cursor_part(c, 2)?,
                        cursor_part(c, 3)?,
                    )),
                    None => Bound::Unbounded,
                };
                let matching = idx
                    .entries
                    .range((lower, Bound::Unbounded))
                    .filter(|(key, _)| segment_of(&key.0, segment.total) == segment.id)
                    .map(|(key, item)| (key.clone(), item.clone()));
                Ok(self.page_of(matching, |key: &IndexEntryKey| {
                    Cursor::new(vec![key.0.clone(), key.1.clone(), key.2.clone(), key.3.clone()])
                }))
            }
        })
    }

    fn query_page(&self, table: &str, partition_key: &str, start: Option<&Cursor>) -> Result<Page> {
        self.query_pages.fetch_add(1, Ordering::Relaxed);
        self.with_table(table, false, |state| {
            let lower = match start {
                Some(c) => Bound::Excluded(ItemKey::new(partition_key, cursor_part(c, 0)?)),
                None => Bound::Included(ItemKey::new(partition_key, "")),
            };
            let matching = state
                .items
                .range((lower, Bound::Unbounded))
                .take_while(|(key, _)| key.partition == partition_key)
                .map(|(key, item)| (key.clone(), item.clone()));
            Ok(self.page_of(matching, |key| Cursor::new(vec![key.sort.clone()])))
        })
    }
}
