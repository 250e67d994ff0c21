//! Summary: Secondary-index replication lag measurement.
//! Copyright (c) YOAB. All rights reserved.
//!
//! # Phases
//!
//! 1. Optionally clear the base table
//! 2. Optionally sample partition keys that land in distinct segments
//! 3. Load `items` items whose `GSI1PK` cycles through `partitions` keys
//! 4. Scan `GSI1` in parallel until it holds every loaded item
//!
//! The measured lag runs from the first scan cycle's start to the start
//! of the cycle that observed the full count.

use std::time::Duration;

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::engine::BulkEngine;
use crate::error::{Error, Result};
use crate::item::Item;
use crate::provision::GSI1;
use crate::report::duration_ms;
use crate::sampler::{DEFAULT_FILLER_ITEMS, DEFAULT_LEADING_KEY, PartitionKeySampler, SampledKeys};
use crate::scanner::{ClearReport, Convergence, ConvergenceLimit, SegmentedScanner};
use crate::store::ScanTarget;
use crate::workload::{LoadReport, load_items};

/// Item counts at or above this are built on the rayon pool.
pub const PARALLEL_THRESHOLD: usize = 10_000;

/// Attribute carrying the padding payload.
pub const PAYLOAD_ATTR: &str = "data";

#[derive(Debug, Clone)]
pub struct IndexLagOptions {
    pub table: String,
    pub items: usize,
    pub partitions: usize,
    /// Payload length in bytes.
    pub item_size: usize,
    /// Leading key for sampled index partition keys; `None` uses
    /// `Shard_<n>` keys.
    pub optimize_keys: Option<String>,
    pub filler_items: usize,
    pub clear_before_load: bool,
    /// Scan segments per cycle; `None` uses the engine's capacity.
    pub segments: Option<usize>,
    pub limit: ConvergenceLimit,
}

impl IndexLagOptions {
    pub fn new(table: impl Into<String>, items: usize, partitions: usize) -> Self {
        Self {
            table: table.into(),
            items,
            partitions,
            item_size: 0,
            optimize_keys: None,
            filler_items: DEFAULT_FILLER_ITEMS,
            clear_before_load: false,
            segments: None,
            limit: ConvergenceLimit::unbounded(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.items == 0 {
            return Err(Error::Config("items must be at least 1".into()));
        }
        if self.partitions == 0 {
            return Err(Error::Config("partitions must be at least 1".into()));
        }
        if self.segments == Some(0) {
            return Err(Error::Config("segments must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexLagReport {
    pub table: String,
    pub items: usize,
    pub partitions: usize,
    pub item_size: usize,
    pub cleared: Option<ClearReport>,
    pub sampled: Option<SampledKeys>,
    pub load: LoadReport,
    pub convergence: Convergence,
    #[serde(rename = "lag_ms", serialize_with = "duration_ms")]
    pub lag: Duration,
}

/// Index partition key for item `index`.
pub fn index_partition_key(index: usize, partitions: usize, sampled: Option<&[String]>) -> String {
    let slot = index % partitions;
    match sampled.and_then(|keys| keys.get(slot)) {
        Some(key) => key.clone(),
        None => format!("Shard_{slot}"),
    }
}

/// Builds the items of the load phase, in order.
///
/// Each item has a unique base partition key, so the base table and the
/// index both end up holding exactly `count` items.
pub fn build_items(
    count: usize,
    partitions: usize,
    leading_key: &str,
    sampled: Option<&[String]>,
    item_size: usize,
) -> Vec<Item> {
    let payload = "X".repeat(item_size);
    let build = |i: usize| {
        let pk = format!("{leading_key}#{i}");
        let mut item = Item::new(pk.as_str(), "A")
            .with_string("GSI1PK", index_partition_key(i, partitions, sampled))
            .with_string("GSI1SK", pk);
        if item_size > 0 {
            item = item.with_string(PAYLOAD_ATTR, payload.as_str());
        }
        item
    };
    if count < PARALLEL_THRESHOLD {
        (0..count).map(build).collect()
    } else {
        (0..count).into_par_iter().map(build).collect()
    }
}

/// Runs the index-lag workload against a provisioned table.
pub fn run(engine: &BulkEngine, options: &IndexLagOptions) -> Result<IndexLagReport> {
    options.validate()?;
    let scanner = SegmentedScanner::new(engine);

    let cleared = if options.clear_before_load {
        Some(scanner.clear(&options.table)?)
    } else {
        None
    };

    let sampled = match &options.optimize_keys {
        Some(leading_key) => Some(
            PartitionKeySampler::new(engine, options.table.as_str())
                .with_leading_key(leading_key.as_str())
                .with_filler_items(options.filler_items)
                .sample(options.partitions)?,
        ),
        None => None,
    };

    let leading_key = options.optimize_keys.as_deref().unwrap_or(DEFAULT_LEADING_KEY);
    let items = build_items(
        options.items,
        options.partitions,
        leading_key,
        sampled.as_ref().map(|s| s.keys.as_slice()),
        options.item_size,
    );
    let load = load_items(engine, &options.table, items)?;

    let segments = options.segments.unwrap_or_else(|| engine.capacity());
    let target = ScanTarget::index(options.table.as_str(), GSI1);
    let convergence = scanner.converge(&target, segments, load.phase.items_written, options.limit)?;
    info!(
        table = %options.table,
        cycles = convergence.cycles.len(),
        lag_ms = convergence.lag.as_millis() as u64,
        "index {GSI1} replication lag measured"
    );

    Ok(IndexLagReport {
        table: options.table.clone(),
        items: options.items,
        partitions: options.partitions,
        item_size: options.item_size,
        cleared,
        sampled,
        load,
        lag: convergence.lag,
        convergence,
    })
}
