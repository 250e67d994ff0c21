//! Summary: Synthetic online-shop dataset and its load phases.
//! Copyright (c) YOAB. All rights reserved.
//!
//! The dataset models warehouses, products, customers and their orders in
//! one table using overloaded keys:
//!
//! | Entity        | PK     | SK                 | GSI1PK / GSI1SK    | GSI2PK / GSI2SK       |
//! |---------------|--------|--------------------|--------------------|-----------------------|
//! | warehouse     | `W#n`  | `W#n`              |                    |                       |
//! | warehouseItem | `P#n`  | warehouse          |                    | warehouse / `P#n`     |
//! | customer      | `C#n`  | `C#n`              |                    |                       |
//! | order         | `O#n`  | customer           |                    |                       |
//! | orderItem     | order  | `P#n#i`            | product / date     | customer / date       |
//! | invoice       | order  | `I#n`              | `I#n` / `I#n`      | customer / date       |
//! | shipment      | order  | `S#n`              | `S#n` / `S#n`      | warehouse / date      |
//! | shipItem      | order  | `SI#n`             | shipment / product |                       |
//!
//! Every item is also routed to a per-entity table for the multi-table
//! model.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::engine::BulkEngine;
use crate::error::{Error, Result};
use crate::item::{AttrValue, Item};
use crate::scanner::{ClearReport, SegmentedScanner};
use crate::workload::{LoadReport, load_items, load_tables};

/// Attribute naming an item's entity type.
pub const TYPE_ATTR: &str = "type";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const EMAIL_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Warehouse,
    WarehouseItem,
    Customer,
    Order,
    OrderItem,
    Invoice,
    Shipment,
    ShipItem,
}

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        EntityType::Warehouse,
        EntityType::WarehouseItem,
        EntityType::Customer,
        EntityType::Order,
        EntityType::OrderItem,
        EntityType::Invoice,
        EntityType::Shipment,
        EntityType::ShipItem,
    ];

    /// Value of the `type` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Warehouse => "warehouse",
            EntityType::WarehouseItem => "warehouseItem",
            EntityType::Customer => "customer",
            EntityType::Order => "order",
            EntityType::OrderItem => "orderItem",
            EntityType::Invoice => "invoice",
            EntityType::Shipment => "shipment",
            EntityType::ShipItem => "shipItem",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Table holding this entity in the multi-table model.
    pub fn table_name(self) -> &'static str {
        match self {
            EntityType::Warehouse => "Warehouses",
            EntityType::WarehouseItem => "Products",
            EntityType::Customer => "Customers",
            EntityType::Order => "Orders",
            EntityType::OrderItem => "OrderItems",
            EntityType::Invoice => "Invoices",
            EntityType::Shipment => "Shipments",
            EntityType::ShipItem => "ShipmentItems",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShopOptions {
    pub customers: usize,
    /// Orders per customer are drawn from `0..max_orders`.
    pub max_orders: usize,
    /// Items per order are drawn from `1..=max_order_items`.
    pub max_order_items: usize,
    pub products: usize,
    pub seed: u64,
    /// Reference time that order dates count back from.
    pub now: SystemTime,
}

impl Default for ShopOptions {
    fn default() -> Self {
        Self {
            customers: 10,
            max_orders: 5,
            max_order_items: 3,
            products: 50,
            seed: 0,
            now: SystemTime::now(),
        }
    }
}

impl ShopOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_orders == 0 {
            return Err(Error::Config("orders per customer must be at least 1".into()));
        }
        if self.max_order_items == 0 {
            return Err(Error::Config("items per order must be at least 1".into()));
        }
        if self.products == 0 {
            return Err(Error::Config("products must be at least 1".into()));
        }
        Ok(())
    }
}

fn format_date(time: SystemTime) -> String {
    humantime::format_rfc3339_seconds(time).to_string()
}

fn address(city: &str, street: &str, zip: &str) -> BTreeMap<String, AttrValue> {
    [
        ("Country", "Sweden"),
        ("County", "Vastra Gotaland"),
        ("City", city),
        ("Street", street),
        ("Number", "20"),
        ("ZipCode", zip),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), AttrValue::S(v.to_string())))
    .collect()
}

struct Product {
    key: String,
    price: i64,
}

struct Generator {
    rng: StdRng,
    options: ShopOptions,
    next_id: usize,
    warehouses: Vec<String>,
    products: Vec<Product>,
    items: Vec<Item>,
}

impl Generator {
    fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn random_string(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| EMAIL_CHARS[self.rng.gen_range(0..EMAIL_CHARS.len())] as char)
            .collect()
    }

    fn warehouse(&mut self, city: &str, street: &str, zip: &str) {
        let pk = format!("W#{}", self.next_id());
        self.items.push(
            Item::new(pk.as_str(), pk.as_str())
                .with_string(TYPE_ATTR, EntityType::Warehouse.as_str())
                .with_map("address", address(city, street, zip)),
        );
        self.warehouses.push(pk);
    }

    fn random_warehouse(&mut self) -> String {
        let idx = self.rng.gen_range(0..self.warehouses.len());
        self.warehouses[idx].clone()
    }

    fn product(&mut self) {
        let id = self.next_id();
        let pk = format!("P#{id}");
        let warehouse = self.random_warehouse();
        let qty = self.rng.gen_range(100..200);
        let price = self.rng.gen_range(10..60);
        let detail = [
            ("Name".to_string(), AttrValue::S(format!("Product{id}"))),
            ("Description".to_string(), AttrValue::S("An amazing product.".to_string())),
        ]
        .into_iter()
        .collect();
        self.items.push(
            Item::new(pk.as_str(), warehouse.as_str())
                .with_string(TYPE_ATTR, EntityType::WarehouseItem.as_str())
                .with_string("GSI2PK", warehouse)
                .with_string("GSI2SK", pk.as_str())
                .with_number("qty", qty)
                .with_number("price", price)
                .with_map("detail", detail),
        );
        self.products.push(Product { key: pk, price });
    }

    fn customer(&mut self) {
        let pk = format!("C#{}", self.next_id());
        let email = format!("{}@somewhere.com", self.random_string(10));
        self.items.push(
            Item::new(pk.as_str(), pk.as_str())
                .with_string(TYPE_ATTR, EntityType::Customer.as_str())
                .with_string("email", email),
        );
        let orders = self.rng.gen_range(0..self.options.max_orders);
        for _ in 0..orders {
            self.order(&pk);
        }
    }

    fn order(&mut self, customer: &str) {
        let order_id = format!("O#{}", self.next_id());
        let days_back = self.rng.gen_range(0..30u64);
        let order_time = self.options.now.checked_sub(DAY * days_back as u32).unwrap_or(self.options.now);
        let order_date = format_date(order_time);

        let line_count = self.rng.gen_range(1..=self.options.max_order_items);
        let mut lines = Vec::with_capacity(line_count);
        let mut amount = 0;
        for idx in 0..line_count {
            let product = &self.products[self.rng.gen_range(0..self.products.len())];
            let (product_key, price) = (product.key.clone(), product.price);
            let qty = self.rng.gen_range(0..5);
            amount += qty * price;
            self.items.push(
                Item::new(order_id.as_str(), format!("{product_key}#{idx}"))
                    .with_string(TYPE_ATTR, EntityType::OrderItem.as_str())
                    .with_string("GSI1PK", product_key.as_str())
                    .with_string("GSI1SK", order_date.as_str())
                    .with_string("GSI2PK", customer)
                    .with_string("GSI2SK", order_date.as_str())
                    .with_number("qty", qty)
                    .with_number("price", price),
            );
            lines.push((product_key, qty));
        }

        self.items.push(
            Item::new(order_id.as_str(), customer)
                .with_string(TYPE_ATTR, EntityType::Order.as_str())
                .with_string("date", order_date.as_str())
                .with_number("amount", amount),
        );

        if self.rng.gen_bool(0.5) {
            let invoice_date = format_date(order_time + DAY);
            let invoice_id = format!("I#{}", self.next_id());
            self.items.push(
                Item::new(order_id.as_str(), invoice_id.as_str())
                    .with_string(TYPE_ATTR, EntityType::Invoice.as_str())
                    .with_string("GSI1PK", invoice_id.as_str())
                    .with_string("GSI1SK", invoice_id.as_str())
                    .with_string("GSI2PK", customer)
                    .with_string("GSI2SK", invoice_date.as_str())
                    .with_number("amount", amount)
                    .with_string("date", invoice_date.as_str()),
            );

            let shipment_id = format!("S#{}", self.next_id());
            let warehouse = self.random_warehouse();
            let method = if self.rng.gen_bool(0.5) { "Express" } else { "Standard" };
            self.items.push(
                Item::new(order_id.as_str(), shipment_id.as_str())
                    .with_string(TYPE_ATTR, EntityType::Shipment.as_str())
                    .with_string("GSI1PK", shipment_id.as_str())
                    .with_string("GSI1SK", shipment_id.as_str())
                    .with_string("GSI2PK", warehouse)
                    .with_string("GSI2SK", invoice_date.as_str())
                    .with_string("method", method),
            );

            for (product_key, qty) in lines {
                let ship_item_id = format!("SI#{}", self.next_id());
                self.items.push(
                    Item::new(order_id.as_str(), ship_item_id)
                        .with_string(TYPE_ATTR, EntityType::ShipItem.as_str())
                        .with_string("GSI1PK", shipment_id.as_str())
                        .with_string("GSI1SK", product_key)
                        .with_number("qty", qty),
                );
            }
        }
    }
}

/// A generated shop, in generation order.
#[derive(Debug, Clone)]
pub struct ShopDataset {
    pub items: Vec<Item>,
}

impl ShopDataset {
    /// Generates a dataset. The same options and seed produce the same
    /// items.
    pub fn generate(options: &ShopOptions) -> Result<Self> {
        options.validate()?;
        let mut generator = Generator {
            rng: StdRng::seed_from_u64(options.seed),
            options: options.clone(),
            next_id: 0,
            warehouses: Vec::new(),
            products: Vec::new(),
            items: Vec::new(),
        };
        generator.warehouse("Goteborg", "MainStreet", "41111");
        generator.warehouse("Boras", "RiverStreet", "11111");
        for _ in 0..options.products {
            generator.product();
        }
        for _ in 0..options.customers {
            generator.customer();
        }
        Ok(Self {
            items: generator.items,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn entity_type(item: &Item) -> Option<EntityType> {
        item.get_str(TYPE_ATTR).and_then(EntityType::parse)
    }

    /// Items grouped by entity type.
    pub fn by_entity(&self) -> BTreeMap<EntityType, Vec<Item>> {
        let mut groups: BTreeMap<EntityType, Vec<Item>> = BTreeMap::new();
        for item in &self.items {
            if let Some(entity) = Self::entity_type(item) {
                groups.entry(entity).or_default().push(item.clone());
            }
        }
        groups
    }

    pub fn counts(&self) -> BTreeMap<EntityType, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            if let Some(entity) = Self::entity_type(item) {
                *counts.entry(entity).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[derive(Debug, Clone)]
pub struct OnlineShopOptions {
    pub table: String,
    pub shop: ShopOptions,
    /// Also load every entity into its own table.
    pub multi_table: bool,
    pub clear_before_load: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnlineShopReport {
    pub table: String,
    pub cleared: Vec<ClearReport>,
    pub entities: BTreeMap<EntityType, usize>,
    pub single_table: LoadReport,
    pub multi_table: Option<LoadReport>,
}

/// Generates the shop and loads it into provisioned tables.
pub fn run(engine: &BulkEngine, options: &OnlineShopOptions) -> Result<OnlineShopReport> {
    let dataset = ShopDataset::generate(&options.shop)?;

    let mut cleared = Vec::new();
    if options.clear_before_load {
        let scanner = SegmentedScanner::new(engine);
        cleared.push(scanner.clear(&options.table)?);
        if options.multi_table {
            for entity in EntityType::ALL {
                cleared.push(scanner.clear(entity.table_name())?);
            }
        }
    }

    info!(table = %options.table, items = dataset.len(), "loading online-shop items");
    let single_table = load_items(engine, &options.table, dataset.items.iter().cloned())?;

    let multi_table = if options.multi_table {
        info!("loading multi-table items");
        let groups = dataset.by_entity();
        Some(load_tables(
            engine,
            groups.into_iter().map(|(entity, items)| (entity.table_name(), items)),
        )?)
    } else {
        None
    };

    Ok(OnlineShopReport {
        table: options.table.clone(),
        cleared,
        entities: dataset.counts(),
        single_table,
        multi_table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(seed: u64) -> ShopOptions {
        ShopOptions {
            customers: 20,
            max_orders: 4,
            max_order_items: 3,
            products: 10,
            seed,
            now: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn test_same_seed_same_dataset() {
        let a = ShopDataset::generate(&options(7)).unwrap();
        let b = ShopDataset::generate(&options(7)).unwrap();
        assert_eq!(a.items, b.items);
    }

    #[test]
    fn test_key_shapes() {
        let dataset = ShopDataset::generate(&options(3)).unwrap();
        let counts = dataset.counts();
        assert_eq!(counts[&EntityType::Warehouse], 2);
        assert_eq!(counts[&EntityType::WarehouseItem], 10);
        assert_eq!(counts[&EntityType::Customer], 20);

        for item in &dataset.items {
            let pk = item.partition_key().unwrap();
            match ShopDataset::entity_type(item).unwrap() {
                EntityType::Warehouse => assert!(pk.starts_with("W#")),
                EntityType::WarehouseItem => {
                    assert!(pk.starts_with("P#"));
                    assert!(item.sort_key().unwrap().starts_with("W#"));
                }
                EntityType::Customer => assert_eq!(item.sort_key(), Some(pk)),
                EntityType::Order => {
                    assert!(pk.starts_with("O#"));
                    assert!(item.sort_key().unwrap().starts_with("C#"));
                }
                EntityType::OrderItem => assert!(item.sort_key().unwrap().starts_with("P#")),
                EntityType::Invoice => assert!(item.sort_key().unwrap().starts_with("I#")),
                EntityType::Shipment => assert!(item.sort_key().unwrap().starts_with("S#")),
                EntityType::ShipItem => assert!(item.sort_key().unwrap().starts_with("SI#")),
            }
        }
    }

    #[test]
    fn test_order_amount_matches_lines() {
        let dataset = ShopDataset::generate(&options(11)).unwrap();
        for order in dataset
            .items
            .iter()
            .filter(|i| ShopDataset::entity_type(i) == Some(EntityType::Order))
        {
            let order_id = order.partition_key().unwrap();
            let total: i64 = dataset
                .items
                .iter()
                .filter(|i| {
                    i.partition_key() == Some(order_id)
                        && ShopDataset::entity_type(i) == Some(EntityType::OrderItem)
                })
                .map(|i| i.get_number("qty").unwrap() * i.get_number("price").unwrap())
                .sum();
            assert_eq!(order.get_number("amount"), Some(total));
        }
    }

    #[test]
    fn test_every_entity_has_a_table() {
        let mut tables: Vec<_> = EntityType::ALL.iter().map(|e| e.table_name()).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), 8);
        assert_eq!(EntityType::parse("shipItem"), Some(EntityType::ShipItem));
    }

    #[test]
    fn test_zero_products_rejected() {
        let mut opts = options(0);
        opts.products = 0;
        assert!(matches!(ShopDataset::generate(&opts), Err(Error::Config(_))));
    }
}
