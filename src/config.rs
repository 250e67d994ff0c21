//! Summary: Command-line configuration and validation.
//! Copyright (c) YOAB. All rights reserved.
//!
//! Every argument is validated before the first store call. Invalid
//! combinations produce `Error::Config`, which the binary reports with
//! clap usage.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::memory::MemoryStoreOptions;
use crate::pool::DEFAULT_CAPACITY;
use crate::sampler::{DEFAULT_FILLER_ITEMS, DEFAULT_LEADING_KEY};
use crate::scanner::ConvergenceLimit;
use crate::store::Throughput;
use crate::workload::index_lag::IndexLagOptions;
use crate::workload::shop::ShopOptions;

/// Bulk-load, index-lag and data-model latency harness.
#[derive(Parser, Debug)]
#[command(name = "tableloader", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load items and measure how long GSI1 takes to catch up.
    IndexLag(IndexLagArgs),
    /// Generate and load the online-shop dataset.
    OnlineShop(ShopArgs),
    /// Load the shop into single- and multi-table models and compare reads.
    Shootout(ShootoutArgs),
    /// Delete every item of a table.
    Clear(ClearArgs),
    /// Sample one partition key per scan segment.
    SampleKeys(SampleKeysArgs),
    /// Run one segmented scan and print per-segment counts.
    Scan(ScanArgs),
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Base table name.
    #[arg(short = 't', long)]
    pub table: String,

    /// Create tables with the given throughput instead of clearing them.
    #[arg(short = 'c', long)]
    pub create: bool,

    /// Write capacity units for created tables and indexes.
    #[arg(short = 'w', long, default_value_t = 0)]
    pub wcu: u64,

    /// Read capacity units for created tables and indexes.
    #[arg(short = 'r', long, default_value_t = 0)]
    pub rcu: u64,

    /// Worker threads; also the default scan segment count.
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub workers: usize,

    /// Jobs queued ahead of the workers before submission blocks.
    /// Defaults to twice the worker count.
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// How often a waiting driver re-checks for Ctrl-C.
    #[arg(long, default_value = "100ms")]
    pub poll_interval: humantime::Duration,

    /// Write a JSON report of the run to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Delay before a write becomes visible in secondary indexes.
    #[arg(long, default_value = "250ms")]
    pub replication_delay: humantime::Duration,

    /// Items per scan or query page.
    #[arg(long, default_value_t = 100)]
    pub page_size: usize,

    /// Reject every Nth write operation as unprocessed.
    #[arg(long)]
    pub reject_every: Option<usize>,
}

impl CommonArgs {
    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(Error::Config("table name must not be empty".into()));
        }
        if self.create && (self.wcu == 0 || self.rcu == 0) {
            return Err(Error::Config(
                "--create requires both --wcu and --rcu to be at least 1".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(Error::Config("page size must be at least 1".into()));
        }
        if self.reject_every == Some(0) {
            return Err(Error::Config("--reject-every must be at least 1".into()));
        }
        self.engine_config().validate()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: self.workers,
            queue_capacity: self
                .queue_capacity
                .unwrap_or_else(|| self.workers.saturating_mul(2).max(1)),
            poll_interval: self.poll_interval.into(),
            ..EngineConfig::default()
        }
    }

    pub fn memory_options(&self) -> MemoryStoreOptions {
        MemoryStoreOptions {
            page_size: self.page_size,
            replication_delay: self.replication_delay.into(),
            reject_every: self.reject_every,
        }
    }

    pub fn throughput(&self) -> Throughput {
        Throughput {
            read_units: self.rcu,
            write_units: self.wcu,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct IndexLagArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Items to load.
    #[arg(short = 'i', long)]
    pub items: usize,

    /// Distinct GSI1 partition keys.
    #[arg(short = 'p', long)]
    pub partitions: usize,

    /// Payload bytes per item.
    #[arg(short = 's', long, default_value_t = 0)]
    pub item_size: usize,

    /// Sample GSI1 partition keys that hash to distinct segments,
    /// using LEADING_KEY as the item key prefix.
    #[arg(
        short = 'o',
        long,
        value_name = "LEADING_KEY",
        num_args = 0..=1,
        default_missing_value = DEFAULT_LEADING_KEY
    )]
    pub optimize_keys: Option<String>,

    /// Donor items written while sampling keys.
    #[arg(long, default_value_t = DEFAULT_FILLER_ITEMS)]
    pub filler_items: usize,

    /// Give up after this many scan cycles.
    #[arg(long)]
    pub max_cycles: Option<usize>,

    /// Give up after this long waiting for the index. Checked between
    /// scan cycles, so the cycle in flight always completes.
    #[arg(long)]
    pub replication_timeout: Option<humantime::Duration>,
}

impl IndexLagArgs {
    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;
        if self.max_cycles == Some(0) {
            return Err(Error::Config("--max-cycles must be at least 1".into()));
        }
        if self.optimize_keys.is_some() && self.filler_items == 0 {
            return Err(Error::Config("--filler-items must be at least 1".into()));
        }
        self.options().validate()
    }

    pub fn options(&self) -> IndexLagOptions {
        IndexLagOptions {
            item_size: self.item_size,
            optimize_keys: self.optimize_keys.clone(),
            filler_items: self.filler_items,
            clear_before_load: !self.common.create,
            limit: ConvergenceLimit {
                max_cycles: self.max_cycles,
                timeout: self.replication_timeout.map(Duration::from),
            },
            ..IndexLagOptions::new(self.common.table.as_str(), self.items, self.partitions)
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ShopArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Customers to generate.
    #[arg(short = 'n', long, default_value_t = 10)]
    pub customers: usize,

    /// Orders per customer are drawn below this bound.
    #[arg(short = 'm', long, default_value_t = 5)]
    pub orders: usize,

    /// Maximum items per order.
    #[arg(short = 'i', long, default_value_t = 3)]
    pub order_items: usize,

    /// Products to generate.
    #[arg(short = 'p', long, default_value_t = 50)]
    pub products: usize,

    /// Random seed for the dataset.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl ShopArgs {
    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;
        self.shop_options().validate()
    }

    pub fn shop_options(&self) -> ShopOptions {
        ShopOptions {
            customers: self.customers,
            max_orders: self.orders,
            max_order_items: self.order_items,
            products: self.products,
            seed: self.seed,
            ..ShopOptions::default()
        }
    }
}

/// The in-process store starts empty on every run, so the shootout always
/// loads the dataset before reading it back.
#[derive(Args, Debug, Clone)]
pub struct ShootoutArgs {
    #[command(flatten)]
    pub shop: ShopArgs,

    /// Timed rounds of the shootout.
    #[arg(long, default_value_t = 100)]
    pub iterations: usize,
}

impl ShootoutArgs {
    pub fn validate(&self) -> Result<()> {
        self.shop.validate()?;
        if self.iterations == 0 {
            return Err(Error::Config("--iterations must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Items to put in the in-process table before clearing it.
    #[arg(long, default_value_t = 0)]
    pub fill: usize,
}

#[derive(Args, Debug, Clone)]
pub struct SampleKeysArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Keys to sample, one per scan segment.
    #[arg(short = 'p', long)]
    pub partitions: usize,

    /// Prefix of donor item keys.
    #[arg(long, default_value = DEFAULT_LEADING_KEY)]
    pub leading_key: String,

    /// Donor items written before sampling.
    #[arg(long, default_value_t = DEFAULT_FILLER_ITEMS)]
    pub filler_items: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Scan segments; defaults to the worker count.
    #[arg(long)]
    pub segments: Option<usize>,

    /// Scan this index instead of the base table.
    #[arg(long)]
    pub index: Option<String>,

    /// Items to put in the in-process table before scanning it.
    #[arg(long, default_value_t = 0)]
    pub fill: usize,
}

impl Command {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::IndexLag(args) => &args.common,
            Command::OnlineShop(args) => &args.common,
            Command::Shootout(args) => &args.shop.common,
            Command::Clear(args) => &args.common,
            Command::SampleKeys(args) => &args.common,
            Command::Scan(args) => &args.common,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::IndexLag(_) => "index-lag",
            Command::OnlineShop(_) => "online-shop",
            Command::Shootout(_) => "shootout",
            Command::Clear(_) => "clear",
            Command::SampleKeys(_) => "sample-keys",
            Command::Scan(_) => "scan",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Command::IndexLag(args) => args.validate(),
            Command::OnlineShop(args) => args.validate(),
            Command::Shootout(args) => args.validate(),
            Command::Clear(args) => args.common.validate(),
            Command::SampleKeys(args) => {
                args.common.validate()?;
                if args.partitions == 0 {
                    return Err(Error::Config("--partitions must be at least 1".into()));
                }
                if args.filler_items == 0 {
                    return Err(Error::Config("--filler-items must be at least 1".into()));
                }
                Ok(())
            }
            Command::Scan(args) => {
                args.common.validate()?;
                if args.segments == Some(0) {
                    return Err(Error::Config("--segments must be at least 1".into()));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tableloader").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_index_lag_defaults() {
        let cli = parse(&["index-lag", "-t", "data", "-i", "1000", "-p", "4"]);
        let Command::IndexLag(args) = &cli.command else {
            panic!("wrong subcommand");
        };
        args.validate().unwrap();
        assert_eq!(args.common.workers, DEFAULT_CAPACITY);
        assert_eq!(args.common.engine_config().poll_interval, Duration::from_millis(100));
        let options = args.options();
        assert!(options.clear_before_load);
        assert!(options.optimize_keys.is_none());
        assert!(options.limit.max_cycles.is_none());
    }

    #[test]
    fn test_optimize_keys_optional_value() {
        let cli = parse(&["index-lag", "-t", "data", "-i", "10", "-p", "2", "-o"]);
        let Command::IndexLag(args) = &cli.command else {
            panic!("wrong subcommand");
        };
        assert_eq!(args.optimize_keys.as_deref(), Some(DEFAULT_LEADING_KEY));

        let cli = parse(&["index-lag", "-t", "data", "-i", "10", "-p", "2", "-o", "Lead"]);
        let Command::IndexLag(args) = &cli.command else {
            panic!("wrong subcommand");
        };
        assert_eq!(args.optimize_keys.as_deref(), Some("Lead"));
    }

    #[test]
    fn test_missing_required_flag_is_a_parse_error() {
        let err = Cli::try_parse_from(["tableloader", "index-lag", "-t", "data", "-i", "10"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_create_requires_throughput() {
        let cli = parse(&["online-shop", "-t", "shop", "-c", "-w", "5"]);
        assert!(matches!(cli.command.validate(), Err(Error::Config(_))));

        let cli = parse(&["online-shop", "-t", "shop", "-c", "-w", "5", "-r", "5"]);
        cli.command.validate().unwrap();
    }

    #[test]
    fn test_zero_counts_rejected() {
        for args in [
            &["index-lag", "-t", "d", "-i", "0", "-p", "4"][..],
            &["index-lag", "-t", "d", "-i", "10", "-p", "0"][..],
            &["shootout", "-t", "d", "--iterations", "0"][..],
            &["online-shop", "-t", "d", "-m", "0"][..],
            &["scan", "-t", "d", "--workers", "0"][..],
            &["scan", "-t", "d", "--segments", "0"][..],
        ] {
            let cli = parse(args);
            assert!(
                matches!(cli.command.validate(), Err(Error::Config(_))),
                "{args:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_shootout_iterations() {
        let cli = parse(&["shootout", "-t", "shop", "--iterations", "7", "-n", "3"]);
        let Command::Shootout(args) = &cli.command else {
            panic!("wrong subcommand");
        };
        args.validate().unwrap();
        assert_eq!(args.iterations, 7);
        assert_eq!(args.shop.shop_options().customers, 3);
        assert_eq!(cli.command.common().table, "shop");
    }

    #[test]
    fn test_online_shop_has_no_iterations() {
        let err = Cli::try_parse_from(["tableloader", "online-shop", "-t", "shop", "--iterations", "5"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_skip_load_is_not_accepted() {
        for command in ["online-shop", "shootout"] {
            let err = Cli::try_parse_from(["tableloader", command, "-t", "shop", "--skip-load"])
                .unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument, "{command}");
        }
    }
}
