//! Summary: Table and index provisioning for each workload.
//! Copyright (c) YOAB. All rights reserved.

use std::time::Instant;

use tracing::info;

use crate::error::Result;
use crate::store::{IndexSpec, KeySchema, TableSpec, TableStore, Throughput};

/// Index over `GSI1PK`/`GSI1SK`.
pub const GSI1: &str = "GSI1";
/// Index over `GSI2PK`/`GSI2SK`.
pub const GSI2: &str = "GSI2";

/// Per-entity tables of the multi-table shop model.
pub const ENTITY_TABLES: [&str; 8] = [
    "Customers",
    "Orders",
    "OrderItems",
    "Products",
    "Invoices",
    "Warehouses",
    "Shipments",
    "ShipmentItems",
];

pub fn create_table(store: &dyn TableStore, name: &str, throughput: Throughput) -> Result<()> {
    let start = Instant::now();
    store.create_table(&TableSpec {
        name: name.to_string(),
        key_schema: KeySchema::primary(),
        throughput,
    })?;
    info!(
        table = name,
        rcu = throughput.read_units,
        wcu = throughput.write_units,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "created table"
    );
    Ok(())
}

pub fn create_index(store: &dyn TableStore, table: &str, index: &str, throughput: Throughput) -> Result<()> {
    let start = Instant::now();
    store.create_index(
        table,
        &IndexSpec {
            name: index.to_string(),
            key_schema: KeySchema::for_index(index),
            throughput,
        },
    )?;
    info!(
        table,
        index,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "created index"
    );
    Ok(())
}

/// Base table with `GSI1`, used by the index-lag workload.
pub fn index_lag(store: &dyn TableStore, table: &str, throughput: Throughput) -> Result<()> {
    create_table(store, table, throughput)?;
    create_index(store, table, GSI1, throughput)
}

/// Single shop table with `GSI1` and `GSI2`.
pub fn online_shop(store: &dyn TableStore, table: &str, throughput: Throughput) -> Result<()> {
    create_table(store, table, throughput)?;
    create_index(store, table, GSI1, throughput)?;
    create_index(store, table, GSI2, throughput)
}

/// Single shop table plus one table per entity type.
pub fn shootout(store: &dyn TableStore, table: &str, throughput: Throughput) -> Result<()> {
    online_shop(store, table, throughput)?;
    for name in ENTITY_TABLES {
        create_table(store, name, throughput)?;
    }
    Ok(())
}
