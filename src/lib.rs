//! Summary: Concurrent bulk I/O harness for partitioned key-value table stores.
//! Copyright (c) YOAB. All rights reserved.
//!
//! `tableloader` batch-loads, scans and queries a table store through a
//! fixed worker pool, and measures how the store behaves under that load:
//! secondary-index replication lag, and read latency of single-table versus
//! multi-table data models.
//!
//! # Layers
//!
//! - `store`: the `TableStore` trait, paginated scans and queries
//! - `memory`: an in-process `TableStore` with delayed index replication
//! - `batch`, `pool`, `barrier`, `aggregator`: the bulk I/O engine parts
//! - `engine`: `BulkEngine`, which ties them together
//! - `scanner`, `sampler`: segmented scans, convergence and key sampling
//! - `workload`: index-lag, online-shop and shootout drivers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tableloader::{BulkEngine, CancelToken, EngineConfig, MemoryStore};
//! use tableloader::workload::index_lag::{self, IndexLagOptions};
//!
//! let store = Arc::new(MemoryStore::new());
//! tableloader::provision::index_lag(&*store, "data", Default::default())?;
//! let engine = BulkEngine::new(store, EngineConfig::default(), CancelToken::new())?;
//! let report = index_lag::run(&engine, &IndexLagOptions::new("data", 10_000, 8))?;
//! println!("lag: {:?}", report.lag);
//! # Ok::<(), tableloader::Error>(())
//! ```

pub mod aggregator;
pub mod barrier;
pub mod batch;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod item;
pub mod memory;
pub mod pool;
pub mod provision;
pub mod report;
pub mod sampler;
pub mod scanner;
pub mod store;
pub mod workload;

pub use aggregator::ResultAggregator;
pub use barrier::{CompletionBarrier, JobOutcome, PhaseReport};
pub use batch::{Batch, BatchAccumulator, BatchSink};
pub use cancel::CancelToken;
pub use engine::{BulkEngine, EngineConfig};
pub use error::{Error, Result};
pub use item::{AttrValue, Item, ItemKey};
pub use memory::{MemoryStore, MemoryStoreOptions};
pub use pool::WorkerPool;
pub use sampler::PartitionKeySampler;
pub use scanner::{Convergence, ConvergenceLimit, ConvergenceStatus, ScanCycle, SegmentedScanner};
pub use store::{ScanTarget, Segment, TableStore};
