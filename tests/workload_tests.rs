//! Summary: End-to-end tests for the workload drivers.
//! Copyright (c) YOAB. All rights reserved.
//!
//! These tests run each workload against an in-process store:
//! - Index-lag load and convergence, with and without sampled keys
//! - Partition-key sampling and clearing
//! - Online-shop single- and multi-table loads
//! - The shootout read comparison and JSON reports

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tableloader::item::ItemKey;
use tableloader::memory::segment_of;
use tableloader::provision::{self, ENTITY_TABLES, GSI1};
use tableloader::report::write_report;
use tableloader::sampler::placeholder_key;
use tableloader::store::Throughput;
use tableloader::workload::index_lag::{self, IndexLagOptions, build_items};
use tableloader::workload::shootout::{self, MULTI_TABLE_QUERIES, ShootoutOptions};
use tableloader::workload::shop::{self, OnlineShopOptions, ShopDataset, ShopOptions};
use tableloader::workload::load_items;
use tableloader::{
    BulkEngine, CancelToken, EngineConfig, Error, MemoryStore, MemoryStoreOptions,
    PartitionKeySampler, SegmentedScanner,
};

fn engine(store: &Arc<MemoryStore>, workers: usize) -> BulkEngine {
    let config = EngineConfig {
        workers,
        queue_capacity: workers * 2,
        poll_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    };
    BulkEngine::new(store.clone(), config, CancelToken::new()).expect("engine should start")
}

fn small_shop(seed: u64) -> ShopOptions {
    ShopOptions {
        customers: 15,
        max_orders: 4,
        max_order_items: 3,
        products: 12,
        seed,
        now: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
    }
}

// =============================================================================
// Test 1: Index lag
// =============================================================================

#[test]
fn test_index_lag_end_to_end() {
    let store = Arc::new(MemoryStore::with_options(MemoryStoreOptions {
        replication_delay: Duration::from_millis(50),
        ..MemoryStoreOptions::default()
    }));
    provision::index_lag(&*store, "data", Throughput::default()).unwrap();
    let engine = engine(&store, 8);

    let mut options = IndexLagOptions::new("data", 1_000, 4);
    options.item_size = 16;
    options.clear_before_load = true;
    let report = index_lag::run(&engine, &options).expect("index-lag should succeed");

    assert!(report.convergence.converged());
    assert_eq!(report.load.phase.items_written, 1_000);
    assert_eq!(report.convergence.observed, 1_000);
    assert_eq!(report.cleared.as_ref().map(|c| c.deleted), Some(0));
    assert!(report.sampled.is_none());
    assert_eq!(store.item_count("data").unwrap(), 1_000);
    assert_eq!(store.index_item_count("data", GSI1).unwrap(), 1_000);
}

#[test]
fn test_index_lag_with_sampled_keys() {
    let store = Arc::new(MemoryStore::new());
    provision::index_lag(&*store, "data", Throughput::default()).unwrap();
    let engine = engine(&store, 6);

    let mut options = IndexLagOptions::new("data", 200, 4);
    options.optimize_keys = Some("Lead".to_string());
    options.filler_items = 400;
    let report = index_lag::run(&engine, &options).unwrap();

    let sampled = report.sampled.expect("keys should be sampled");
    assert_eq!(sampled.keys.len(), 4);
    assert!(sampled.empty_segments.is_empty());
    for (segment, key) in sampled.keys.iter().enumerate() {
        assert_eq!(segment_of(key, 4), segment);
    }
    // Donor items are gone; only the loaded items remain.
    assert_eq!(store.item_count("data").unwrap(), 200);
    assert!(report.convergence.converged());
}

// =============================================================================
// Test 2: Sampling and clearing
// =============================================================================

#[test]
fn test_sampler_picks_middle_of_each_segment() {
    let store = Arc::new(MemoryStore::new());
    provision::create_table(&*store, "data", Throughput::default()).unwrap();
    let engine = engine(&store, 4);

    let sampled = PartitionKeySampler::new(&engine, "data")
        .with_filler_items(300)
        .sample(5)
        .unwrap();

    let mut by_segment: BTreeMap<usize, Vec<ItemKey>> = BTreeMap::new();
    for i in 0..300 {
        let pk = format!("Item#{i}");
        by_segment.entry(segment_of(&pk, 5)).or_default().push(ItemKey::new(pk, "A"));
    }
    for segment in 0..5 {
        let expected = match by_segment.get_mut(&segment) {
            Some(keys) => {
                keys.sort();
                keys[keys.len() / 2].partition.clone()
            }
            None => placeholder_key(segment),
        };
        assert_eq!(sampled.keys[segment], expected);
    }
    assert_eq!(store.item_count("data").unwrap(), 0);
}

#[test]
fn test_sampler_with_more_partitions_than_items() {
    let store = Arc::new(MemoryStore::new());
    provision::create_table(&*store, "data", Throughput::default()).unwrap();
    let engine = engine(&store, 4);

    let sampled = PartitionKeySampler::new(&engine, "data")
        .with_filler_items(2)
        .sample(16)
        .unwrap();
    assert_eq!(sampled.keys.len(), 16);
    assert!(sampled.empty_segments.len() >= 14);
    for segment in &sampled.empty_segments {
        assert_eq!(sampled.keys[*segment], placeholder_key(*segment));
    }
}

#[test]
fn test_clear_deletes_every_item() {
    let store = Arc::new(MemoryStore::with_options(MemoryStoreOptions {
        page_size: 9,
        ..MemoryStoreOptions::default()
    }));
    provision::index_lag(&*store, "data", Throughput::default()).unwrap();
    let engine = engine(&store, 5);
    load_items(&engine, "data", build_items(333, 3, "Item", None, 0)).unwrap();
    assert_eq!(store.index_item_count("data", GSI1).unwrap(), 333);

    let report = SegmentedScanner::new(&engine).clear("data").unwrap();
    assert_eq!(report.scanned, 333);
    assert_eq!(report.deleted, 333);
    assert_eq!(store.item_count("data").unwrap(), 0);
    assert_eq!(store.index_item_count("data", GSI1).unwrap(), 0);
}

// =============================================================================
// Test 3: Online shop and shootout
// =============================================================================

#[test]
fn test_online_shop_single_and_multi_table_load() {
    let store = Arc::new(MemoryStore::new());
    provision::shootout(&*store, "shop", Throughput::default()).unwrap();
    let engine = engine(&store, 8);

    let options = OnlineShopOptions {
        table: "shop".to_string(),
        shop: small_shop(5),
        multi_table: true,
        clear_before_load: true,
    };
    let report = shop::run(&engine, &options).unwrap();
    let expected = ShopDataset::generate(&options.shop).unwrap().len();

    assert_eq!(report.single_table.phase.items_written, expected);
    assert_eq!(store.item_count("shop").unwrap(), expected);
    let multi = report.multi_table.expect("multi-table load should run");
    assert_eq!(multi.phase.items_written, expected);
    let spread: usize = ENTITY_TABLES
        .iter()
        .map(|t| store.item_count(t).unwrap())
        .sum();
    assert_eq!(spread, expected);
    assert_eq!(report.cleared.len(), 1 + ENTITY_TABLES.len());
}

#[test]
fn test_shootout_compares_both_models() {
    let store = Arc::new(MemoryStore::with_options(MemoryStoreOptions {
        page_size: 2,
        ..MemoryStoreOptions::default()
    }));
    provision::shootout(&*store, "shop", Throughput::default()).unwrap();
    let engine = engine(&store, 8);
    shop::run(
        &engine,
        &OnlineShopOptions {
            table: "shop".to_string(),
            shop: small_shop(9),
            multi_table: true,
            clear_before_load: false,
        },
    )
    .unwrap();

    let report = shootout::run(
        &engine,
        &ShootoutOptions {
            table: "shop".to_string(),
            iterations: 3,
        },
    )
    .unwrap();

    assert!(report.orders > 0);
    assert_eq!(report.iterations.len(), 3);
    for iteration in &report.iterations {
        assert_eq!(iteration.single_table.queries, report.orders);
        assert_eq!(iteration.multi_table.queries, report.orders * MULTI_TABLE_QUERIES.len());
        // Both models return the same order data.
        assert_eq!(iteration.single_table.items, iteration.multi_table.items);
        assert!(iteration.efficiency_pct > 0.0);
    }
    assert!(engine.query_results().is_empty());
}

#[test]
fn test_shootout_without_orders_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    provision::shootout(&*store, "shop", Throughput::default()).unwrap();
    let engine = engine(&store, 2);

    let err = shootout::run(
        &engine,
        &ShootoutOptions {
            table: "shop".to_string(),
            iterations: 1,
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

// =============================================================================
// Test 4: Reports
// =============================================================================

#[test]
fn test_index_lag_report_is_written_as_json() {
    let store = Arc::new(MemoryStore::new());
    provision::index_lag(&*store, "data", Throughput::default()).unwrap();
    let engine = engine(&store, 4);
    let report = index_lag::run(&engine, &IndexLagOptions::new("data", 120, 3)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reports").join("index-lag.json");
    write_report(&path, &report).unwrap();

    let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(value["table"], "data");
    assert_eq!(value["items"], 120);
    assert_eq!(value["convergence"]["status"], "converged");
    assert_eq!(value["convergence"]["observed"], 120);
    assert_eq!(value["load"]["phase"]["items_written"], 120);
    assert!(value["lag_ms"].is_u64());
}
