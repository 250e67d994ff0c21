//! Summary: Workload drivers built on the bulk engine.
//! Copyright (c) YOAB. All rights reserved.
//!
//! Each workload is a sequence of phases. Load phases stream items through
//! a batch accumulator and wait once; rejected or failed writes are logged
//! and counted, not retried. Read phases fail when any job failed.

pub mod index_lag;
pub mod shootout;
pub mod shop;

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::barrier::PhaseReport;
use crate::engine::BulkEngine;
use crate::error::Result;
use crate::item::Item;
use crate::report::duration_ms;

/// Report of one load phase.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub tables: Vec<String>,
    pub items: usize,
    pub batches: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms")]
    pub elapsed: Duration,
    pub phase: PhaseReport,
}

impl LoadReport {
    fn log(&self) {
        if !self.phase.is_clean() {
            warn!(
                rejected = self.phase.items_rejected,
                failed_jobs = self.phase.failed_jobs,
                "load finished with unwritten items"
            );
        }
        info!(
            tables = ?self.tables,
            items = self.items,
            batches = self.batches,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "loaded {} items",
            self.phase.items_written
        );
    }
}

/// Loads `items` into `table` and waits for every batch to complete.
pub fn load_items<I>(engine: &BulkEngine, table: &str, items: I) -> Result<LoadReport>
where
    I: IntoIterator<Item = Item>,
{
    load_tables(engine, [(table, items)])
}

/// Loads several tables as one phase: all batches are submitted, then the
/// engine waits once.
pub fn load_tables<'t, T, I>(engine: &BulkEngine, tables: T) -> Result<LoadReport>
where
    T: IntoIterator<Item = (&'t str, I)>,
    I: IntoIterator<Item = Item>,
{
    let start = Instant::now();
    let mut names = Vec::new();
    let mut items = 0;
    let mut batches = 0;
    for (table, table_items) in tables {
        let mut writer = engine.writer(table);
        for item in table_items {
            writer.put(item)?;
        }
        writer.flush()?;
        items += writer.ops_added();
        batches += writer.batches_submitted();
        names.push(table.to_string());
    }
    let phase = engine.wait()?;
    let report = LoadReport {
        tables: names,
        items,
        batches,
        elapsed: start.elapsed(),
        phase,
    };
    report.log();
    Ok(report)
}
