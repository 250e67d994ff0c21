//! Summary: Single-table versus multi-table read latency comparison.
//! Copyright (c) YOAB. All rights reserved.
//!
//! For every order id the multi-table model issues one query per order
//! table, while the single-table model fetches the whole order with one
//! partition query. Both fan out across the worker pool and are timed
//! from first submission to barrier release.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::barrier::PhaseReport;
use crate::engine::BulkEngine;
use crate::error::{Error, Result};
use crate::report::duration_ms;
use crate::scanner::SegmentedScanner;
use crate::store::ScanTarget;
use crate::workload::shop::EntityType;

/// Tables queried per order in the multi-table model.
pub const MULTI_TABLE_QUERIES: [EntityType; 5] = [
    EntityType::Order,
    EntityType::OrderItem,
    EntityType::Invoice,
    EntityType::Shipment,
    EntityType::ShipItem,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataModel {
    SingleTable,
    MultiTable,
}

#[derive(Debug, Clone)]
pub struct ShootoutOptions {
    pub table: String,
    pub iterations: usize,
}

/// Timing of one fan-out over every order.
#[derive(Debug, Clone, Serialize)]
pub struct FanOut {
    pub model: DataModel,
    pub queries: usize,
    pub items: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms")]
    pub elapsed: Duration,
    /// Mean wall time per order, in microseconds.
    pub per_order_us: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationStats {
    pub iteration: usize,
    pub multi_table: FanOut,
    pub single_table: FanOut,
    /// Single-table time as a percentage of multi-table time.
    pub efficiency_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShootoutReport {
    pub orders: usize,
    pub iterations: Vec<IterationStats>,
    pub mean_efficiency_pct: f64,
}

/// Efficiency of the single-table model relative to the multi-table one.
pub fn efficiency_pct(single: Duration, multi: Duration) -> f64 {
    if multi.is_zero() {
        return 100.0;
    }
    single.as_secs_f64() * 100.0 / multi.as_secs_f64()
}

fn fan_out(engine: &BulkEngine, table: &str, orders: &[String], model: DataModel) -> Result<FanOut> {
    engine.query_results().clear();
    let start = Instant::now();
    for order_id in orders {
        match model {
            DataModel::SingleTable => engine.submit_query(table, order_id.as_str())?,
            DataModel::MultiTable => {
                for entity in MULTI_TABLE_QUERIES {
                    engine.submit_query(entity.table_name(), order_id.as_str())?;
                }
            }
        }
    }
    let report: PhaseReport = engine.wait()?.require_no_failures("query fan-out")?;
    let elapsed = start.elapsed();
    Ok(FanOut {
        model,
        queries: report.jobs,
        items: engine.query_results().total_items(),
        elapsed,
        per_order_us: elapsed.as_secs_f64() * 1e6 / orders.len() as f64,
    })
}

/// Runs the comparison against loaded shop tables.
///
/// # Errors
///
/// Returns `Config` if the `Orders` table holds no orders.
pub fn run(engine: &BulkEngine, options: &ShootoutOptions) -> Result<ShootoutReport> {
    if options.iterations == 0 {
        return Err(Error::Config("iterations must be at least 1".into()));
    }
    let scanner = SegmentedScanner::new(engine);
    let cycle = scanner.single_cycle(&ScanTarget::table(EntityType::Order.table_name()), engine.capacity())?;
    let mut orders: Vec<String> = cycle
        .into_items()
        .filter_map(|item| item.partition_key().map(str::to_string))
        .collect();
    orders.sort_unstable();
    orders.dedup();
    if orders.is_empty() {
        return Err(Error::Config(format!(
            "no orders in {}; load the online-shop data first",
            EntityType::Order.table_name()
        )));
    }
    info!(orders = orders.len(), "retrieved order ids");

    // Warm-up pass, not recorded.
    fan_out(engine, &options.table, &orders, DataModel::MultiTable)?;

    let mut iterations = Vec::with_capacity(options.iterations);
    for iteration in 1..=options.iterations {
        let multi_table = fan_out(engine, &options.table, &orders, DataModel::MultiTable)?;
        let single_table = fan_out(engine, &options.table, &orders, DataModel::SingleTable)?;
        let efficiency = efficiency_pct(single_table.elapsed, multi_table.elapsed);
        info!(
            iteration,
            multi_us = multi_table.per_order_us,
            single_us = single_table.per_order_us,
            "single-table efficiency {efficiency:.1}%"
        );
        iterations.push(IterationStats {
            iteration,
            multi_table,
            single_table,
            efficiency_pct: efficiency,
        });
    }
    engine.query_results().clear();

    let mean_efficiency_pct =
        iterations.iter().map(|i| i.efficiency_pct).sum::<f64>() / iterations.len() as f64;
    info!(orders = orders.len(), "mean single-table efficiency {mean_efficiency_pct:.1}%");
    Ok(ShootoutReport {
        orders: orders.len(),
        iterations,
        mean_efficiency_pct,
    })
}
