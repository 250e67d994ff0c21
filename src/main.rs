//! Summary: Command-line entry point for the tableloader harness.
//! Copyright (c) YOAB. All rights reserved.
//!
//! Runs each workload against an in-process `MemoryStore`. The store
//! starts empty, so every run provisions its tables first; without
//! `--create` the tables are also cleared before loading.

use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser};
use serde::Serialize;
use tracing::{error, info, warn};

use tableloader::config::{Cli, Command, CommonArgs};
use tableloader::report::{duration_ms, write_report};
use tableloader::scanner::SegmentedScanner;
use tableloader::workload::index_lag::{self, build_items};
use tableloader::workload::shop::{self, OnlineShopOptions, OnlineShopReport};
use tableloader::workload::shootout::{self, ShootoutOptions, ShootoutReport};
use tableloader::workload::load_items;
use tableloader::{BulkEngine, CancelToken, Error, MemoryStore, PartitionKeySampler, Result, ScanTarget, cancel, provision};

/// Exit status after Ctrl-C, as a shell reports it.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Serialize)]
struct ShootoutRun {
    load: OnlineShopReport,
    shootout: ShootoutReport,
}

#[derive(Serialize)]
struct ScanSummary {
    target: String,
    segments: usize,
    counts: Vec<usize>,
    total: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms")]
    elapsed: Duration,
}

fn main() -> ExitCode {
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = cli.command.validate() {
        Cli::command()
            .error(clap::error::ErrorKind::ValueValidation, err.to_string())
            .exit();
    }
    if let Err(err) = cancel::install_interrupt_handler() {
        warn!(error = %err, "Ctrl-C will not stop the run cleanly");
    }

    let common = cli.command.common();
    let store = Arc::new(MemoryStore::with_options(common.memory_options()));
    let engine = match BulkEngine::new(store.clone(), common.engine_config(), CancelToken::new()) {
        Ok(engine) => engine,
        Err(err) => {
            error!(error = %err, "failed to start engine");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    match run(&cli.command, &store, &engine) {
        Ok(()) => {
            info!(
                command = cli.command.name(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(Error::Interrupted { outstanding }) => {
            error!(outstanding, "interrupted, abandoning outstanding jobs");
            // Exits without dropping the engine, which would join the workers.
            std::process::exit(EXIT_INTERRUPTED);
        }
        Err(err) => {
            error!(command = cli.command.name(), error = %err, "run failed");
            ExitCode::FAILURE
        }
    }
}

fn emit<T: Serialize>(common: &CommonArgs, report: &T) -> Result<()> {
    match &common.report {
        Some(path) => write_report(path, report),
        None => Ok(()),
    }
}

fn fill(engine: &BulkEngine, table: &str, items: usize) -> Result<()> {
    if items > 0 {
        load_items(engine, table, build_items(items, engine.capacity(), "Item", None, 0))?;
    }
    Ok(())
}

fn run(command: &Command, store: &MemoryStore, engine: &BulkEngine) -> Result<()> {
    let common = command.common();
    let table = common.table.as_str();
    let throughput = common.throughput();

    match command {
        Command::IndexLag(args) => {
            provision::index_lag(store, table, throughput)?;
            let report = index_lag::run(engine, &args.options())?;
            emit(common, &report)
        }
        Command::OnlineShop(args) => {
            provision::online_shop(store, table, throughput)?;
            let report = shop::run(
                engine,
                &OnlineShopOptions {
                    table: table.to_string(),
                    shop: args.shop_options(),
                    multi_table: false,
                    clear_before_load: !common.create,
                },
            )?;
            emit(common, &report)
        }
        Command::Shootout(args) => {
            provision::shootout(store, table, throughput)?;
            let load = shop::run(
                engine,
                &OnlineShopOptions {
                    table: table.to_string(),
                    shop: args.shop.shop_options(),
                    multi_table: true,
                    clear_before_load: !common.create,
                },
            )?;
            let shootout = shootout::run(
                engine,
                &ShootoutOptions {
                    table: table.to_string(),
                    iterations: args.iterations,
                },
            )?;
            emit(common, &ShootoutRun { load, shootout })
        }
        Command::Clear(args) => {
            provision::create_table(store, table, throughput)?;
            fill(engine, table, args.fill)?;
            let report = SegmentedScanner::new(engine).clear(table)?;
            emit(common, &report)
        }
        Command::SampleKeys(args) => {
            provision::create_table(store, table, throughput)?;
            let sampled = PartitionKeySampler::new(engine, table)
                .with_leading_key(args.leading_key.as_str())
                .with_filler_items(args.filler_items)
                .sample(args.partitions)?;
            for (segment, key) in sampled.keys.iter().enumerate() {
                info!(segment, key = %key, "sampled key");
            }
            emit(common, &sampled)
        }
        Command::Scan(args) => {
            provision::create_table(store, table, throughput)?;
            let target = match &args.index {
                Some(index) => {
                    provision::create_index(store, table, index, throughput)?;
                    ScanTarget::index(table, index.as_str())
                }
                None => ScanTarget::table(table),
            };
            fill(engine, table, args.fill)?;
            let segments = args.segments.unwrap_or_else(|| engine.capacity());
            let cycle = SegmentedScanner::new(engine).single_cycle(&target, segments)?;
            for (segment, items) in &cycle.results {
                info!(segment, items = items.len(), "segment");
            }
            info!(%target, total = cycle.total_items(), "scan complete");
            emit(
                common,
                &ScanSummary {
                    target: target.to_string(),
                    segments,
                    counts: cycle.counts(),
                    total: cycle.total_items(),
                    elapsed: cycle.elapsed,
                },
            )
        }
    }
}
