//! Summary: Partition-key sampling for index-friendly key selection.
//! Copyright (c) YOAB. All rights reserved.
//!
//! The sampler fills the base table with donor items, scans it with one
//! segment per wanted partition, and takes the middle item of each
//! segment. Each sampled key therefore hashes into a distinct segment of
//! the store's key space. The donor items are cleared afterwards.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::engine::BulkEngine;
use crate::error::{Error, Result};
use crate::item::Item;
use crate::report::duration_ms;
use crate::scanner::SegmentedScanner;
use crate::store::ScanTarget;

/// Donor items written before sampling.
pub const DEFAULT_FILLER_ITEMS: usize = 10_000;

/// Prefix of donor partition keys.
pub const DEFAULT_LEADING_KEY: &str = "Item";

/// Key used for a segment that returned no items.
pub fn placeholder_key(segment: usize) -> String {
    format!("Shard_{segment}")
}

/// Picks the middle item's partition key from each of `partitions`
/// segments. Returns the keys in segment order and the ids of segments
/// that had no usable item.
pub fn select_middle_keys(
    results: &BTreeMap<usize, Vec<Item>>,
    partitions: usize,
) -> (Vec<String>, Vec<usize>) {
    let mut keys = Vec::with_capacity(partitions);
    let mut empty = Vec::new();
    for segment in 0..partitions {
        let picked = results
            .get(&segment)
            .filter(|items| !items.is_empty())
            .and_then(|items| items[items.len() / 2].partition_key());
        match picked {
            Some(key) => keys.push(key.to_string()),
            None => {
                empty.push(segment);
                keys.push(placeholder_key(segment));
            }
        }
    }
    (keys, empty)
}

#[derive(Debug, Clone, Serialize)]
pub struct SampledKeys {
    pub keys: Vec<String>,
    /// Segments that fell back to a placeholder key.
    pub empty_segments: Vec<usize>,
    pub filler_items: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms")]
    pub elapsed: Duration,
}

pub struct PartitionKeySampler<'e> {
    engine: &'e BulkEngine,
    table: String,
    leading_key: String,
    filler_items: usize,
}

impl<'e> PartitionKeySampler<'e> {
    pub fn new(engine: &'e BulkEngine, table: impl Into<String>) -> Self {
        Self {
            engine,
            table: table.into(),
            leading_key: DEFAULT_LEADING_KEY.to_string(),
            filler_items: DEFAULT_FILLER_ITEMS,
        }
    }

    pub fn with_leading_key(mut self, leading_key: impl Into<String>) -> Self {
        self.leading_key = leading_key.into();
        self
    }

    pub fn with_filler_items(mut self, filler_items: usize) -> Self {
        self.filler_items = filler_items;
        self
    }

    /// Samples one partition key per segment for `partitions` segments.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `partitions` is 0, and `PhaseFailed` if the
    /// sampling scan had failed segments.
    pub fn sample(&self, partitions: usize) -> Result<SampledKeys> {
        if partitions == 0 {
            return Err(Error::Config("partitions must be at least 1".into()));
        }
        let start = Instant::now();

        let mut writer = self.engine.writer(self.table.as_str());
        for i in 0..self.filler_items {
            writer.put(Item::new(format!("{}#{i}", self.leading_key), "A"))?;
        }
        writer.flush()?;
        drop(writer);
        let load = self.engine.wait()?;
        if !load.is_clean() {
            warn!(
                table = %self.table,
                rejected = load.items_rejected,
                failed_jobs = load.failed_jobs,
                "filler load incomplete"
            );
        }

        let scanner = SegmentedScanner::new(self.engine);
        let cycle = scanner.single_cycle(&ScanTarget::table(self.table.as_str()), partitions)?;
        let (keys, empty_segments) = select_middle_keys(&cycle.results, partitions);
        for segment in &empty_segments {
            warn!(table = %self.table, segment, "segment empty, using placeholder key");
        }
        drop(cycle);

        scanner.clear(&self.table)?;

        let elapsed = start.elapsed();
        info!(
            table = %self.table,
            partitions,
            elapsed_ms = elapsed.as_millis() as u64,
            "sampled {} partition keys",
            keys.len()
        );
        Ok(SampledKeys {
            keys,
            empty_segments,
            filler_items: self.filler_items,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middle_item_per_segment() {
        let mut results = BTreeMap::new();
        results.insert(0, (0..5).map(|i| Item::new(format!("a{i}"), "A")).collect());
        results.insert(1, (0..4).map(|i| Item::new(format!("b{i}"), "A")).collect());
        results.insert(2, vec![Item::new("c0", "A")]);

        let (keys, empty) = select_middle_keys(&results, 3);
        assert_eq!(keys, vec!["a2", "b2", "c0"]);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_empty_segment_gets_placeholder() {
        let mut results = BTreeMap::new();
        results.insert(0, vec![Item::new("a0", "A")]);
        results.insert(1, Vec::new());

        let (keys, empty) = select_middle_keys(&results, 3);
        assert_eq!(keys, vec!["a0".to_string(), placeholder_key(1), placeholder_key(2)]);
        assert_eq!(empty, vec![1, 2]);
    }
}
