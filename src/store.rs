//! Summary: Table store collaborator interface consumed by the bulk engine.
//! Copyright (c) YOAB. All rights reserved.
//!
//! The engine never talks to a concrete store. It drives anything that
//! implements `TableStore`: bounded batch writes with per-item outcome,
//! paginated segmented scans over tables or secondary indexes, and
//! paginated partition-key queries.
//!
//! # Pagination
//!
//! Scans and queries return one `Page` per call. A page carries an
//! opaque `Cursor` when more data follows; callers pass it back to fetch
//! the next page. `Pages` wraps this into a lazy iterator and `drain`
//! collects every page, which is what a job must do before it counts as
//! complete.

use std::fmt;

use crate::error::Result;
use crate::item::{Item, ItemKey, PARTITION_KEY, SORT_KEY};

/// Maximum number of operations a single batch write may carry.
pub const MAX_BATCH_OPS: usize = 25;

/// Provisioned throughput hint passed through to table/index creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Throughput {
    pub read_units: u64,
    pub write_units: u64,
}

/// Names of the partition and sort key attributes of a table or index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    pub partition: String,
    pub sort: String,
}

impl KeySchema {
    /// The `PK`/`SK` schema every base table uses.
    pub fn primary() -> Self {
        Self {
            partition: PARTITION_KEY.to_string(),
            sort: SORT_KEY.to_string(),
        }
    }

    /// The `<name>PK`/`<name>SK` schema used by secondary indexes.
    pub fn for_index(index_name: &str) -> Self {
        Self {
            partition: format!("{index_name}PK"),
            sort: format!("{index_name}SK"),
        }
    }
}

/// Parameters for creating a table.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    pub key_schema: KeySchema,
    pub throughput: Throughput,
}

/// Parameters for creating a global secondary index.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub key_schema: KeySchema,
    pub throughput: Throughput,
}

/// A pending write against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(Item),
    Delete(ItemKey),
}

impl WriteOp {
    /// Primary key the operation targets, if it can be determined.
    pub fn key(&self) -> Option<ItemKey> {
        match self {
            WriteOp::Put(item) => item.key(),
            WriteOp::Delete(key) => Some(key.clone()),
        }
    }
}

/// Per-call outcome of a batch write.
///
/// Operations listed in `unprocessed` were rejected by the store; all
/// others were applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWriteOutcome {
    pub unprocessed: Vec<WriteOp>,
}

/// What a scan enumerates: a base table or one of its indexes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScanTarget {
    Table(String),
    Index { table: String, index: String },
}

impl ScanTarget {
    pub fn table(name: impl Into<String>) -> Self {
        ScanTarget::Table(name.into())
    }

    pub fn index(table: impl Into<String>, index: impl Into<String>) -> Self {
        ScanTarget::Index {
            table: table.into(),
            index: index.into(),
        }
    }

    /// The base table backing this target.
    pub fn table_name(&self) -> &str {
        match self {
            ScanTarget::Table(name) => name,
            ScanTarget::Index { table, .. } => table,
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTarget::Table(name) => write!(f, "{name}"),
            ScanTarget::Index { table, index } => write!(f, "{table}.{index}"),
        }
    }
}

/// One of `total` disjoint slices of a full scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    pub id: usize,
    pub total: usize,
}

impl Segment {
    /// Creates a segment descriptor.
    ///
    /// # Panics
    ///
    /// Panics if `id >= total`.
    pub fn new(id: usize, total: usize) -> Self {
        assert!(id < total, "segment {id} out of range for {total} segments");
        Self { id, total }
    }

    /// All segments `0..total` of a scan, in order.
    pub fn all(total: usize) -> impl Iterator<Item = Segment> {
        (0..total).map(move |id| Segment { id, total })
    }
}

/// Opaque continuation token returned with a non-final page.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor(Vec<String>);

impl Cursor {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

/// One page of scan or query results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub next: Option<Cursor>,
}

/// The key-value table store the engine drives.
///
/// Implementations must be safe to share across worker threads; the
/// engine holds one handle and calls it concurrently from every job.
pub trait TableStore: Send + Sync {
    /// Creates a table. Fails with `TableExists` if it is already present.
    fn create_table(&self, spec: &TableSpec) -> Result<()>;

    /// Adds a global secondary index to an existing table.
    fn create_index(&self, table: &str, spec: &IndexSpec) -> Result<()>;

    /// Applies up to `MAX_BATCH_OPS` puts and deletes in one call.
    ///
    /// Individual rejections are reported in the outcome, not as an error.
    fn batch_write(&self, table: &str, ops: &[WriteOp]) -> Result<BatchWriteOutcome>;

    /// Fetches one page of a segmented scan.
    fn scan_page(&self, target: &ScanTarget, segment: Segment, start: Option<&Cursor>)
    -> Result<Page>;

    /// Fetches one page of items sharing a partition key.
    fn query_page(&self, table: &str, partition_key: &str, start: Option<&Cursor>)
    -> Result<Page>;
}

/// Lazy iterator over the pages of a scan or query.
///
/// Yields each page's items. Iteration stops after the final page or
/// after the first error.
pub struct Pages<F> {
    fetch: F,
    next: Option<Option<Cursor>>,
}

impl<F> Pages<F>
where
    F: FnMut(Option<&Cursor>) -> Result<Page>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            next: Some(None),
        }
    }
}

impl<F> Iterator for Pages<F>
where
    F: FnMut(Option<&Cursor>) -> Result<Page>,
{
    type Item = Result<Vec<Item>>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.next.take()?;
        match (self.fetch)(cursor.as_ref()) {
            Ok(page) => {
                self.next = page.next.map(Some);
                Some(Ok(page.items))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

/// Pages of one scan segment.
pub fn scan_pages<'a>(
    store: &'a dyn TableStore,
    target: &'a ScanTarget,
    segment: Segment,
) -> Pages<impl FnMut(Option<&Cursor>) -> Result<Page> + 'a> {
    Pages::new(move |cursor| store.scan_page(target, segment, cursor))
}

/// Pages of one partition-key query.
pub fn query_pages<'a>(
    store: &'a dyn TableStore,
    table: &'a str,
    partition_key: &'a str,
) -> Pages<impl FnMut(Option<&Cursor>) -> Result<Page> + 'a> {
    Pages::new(move |cursor| store.query_page(table, partition_key, cursor))
}

/// Collects every item of every page, stopping at the first error.
pub fn drain<I>(pages: I) -> Result<Vec<Item>>
where
    I: IntoIterator<Item = Result<Vec<Item>>>,
{
    let mut items = Vec::new();
    for page in pages {
        items.extend(page?);
    }
    Ok(items)
}
