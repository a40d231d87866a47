//! MarketLens CLI — analysis, fetch and cache inspection commands.
//!
//! Commands:
//! - `analyze`: run every enabled analysis module for one symbol
//! - `fetch`: batched fetch of one operation for many symbols
//! - `cache status`: list live cache keys with field counts and expiry
//! - `cache show`: print the rows cached under one key
//! - `modules`: print the resolved module execution order

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use marketlens_core::config::{AppConfig, CacheBackend};
use marketlens_core::data::FetchError;
use marketlens_core::domain::{FetchRequest, MarketSegment, Operation, Table};
use marketlens_runner::{
    export_json, module_registry, save_report, save_table, table_csv, AnalysisReport, AnalysisService,
    BatchProgress, RunError,
};

const DEFAULT_CONFIG: &str = "marketlens.toml";

#[derive(Parser)]
#[command(name = "marketlens", about = "MarketLens CLI: multi-source market data analysis")]
struct Cli {
    /// Path to a TOML config file. Defaults to ./marketlens.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one symbol and print the summary.
    Analyze {
        symbol: String,

        /// Market segment: A, HK, US, JP, IN, CRYPTO, ETF, LOF.
        #[arg(long, default_value = "A")]
        segment: MarketSegment,

        /// Print the full report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Industry name, used for the industry money-flow lookup.
        #[arg(long)]
        industry: Option<String>,

        /// Save report.json, factors.csv and faults.csv under this directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Fetch one operation for one or more symbols, in batches.
    Fetch {
        /// daily, fundamentals, moneyflow or spot.
        operation: Operation,

        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long, default_value = "A")]
        segment: MarketSegment,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Write one CSV per symbol into this directory.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Cache inspection commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print the resolved analysis module order.
    Modules,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List live keys with field counts and time to expiry.
    Status,
    /// Print the rows cached under a key as CSV.
    Show { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            symbol,
            segment,
            json,
            industry,
            out,
        } => run_analyze(config, &symbol, segment, json, industry, out).await,
        Commands::Fetch {
            operation,
            symbols,
            segment,
            start,
            end,
            csv,
        } => {
            let req = FetchRequest::new(operation, segment, symbols).with_range(start, end);
            run_fetch(config, req, csv).await
        }
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(config).await,
            CacheAction::Show { key } => run_cache_show(config, &key).await,
        },
        Commands::Modules => run_modules(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let default = Path::new(DEFAULT_CONFIG);
    let path = path.or_else(|| default.is_file().then_some(default));
    let config = AppConfig::load(path).context("loading configuration")?;
    config.validate()?;
    Ok(config)
}

async fn run_analyze(
    config: AppConfig,
    symbol: &str,
    segment: MarketSegment,
    json: bool,
    industry: Option<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    let service = AnalysisService::from_config(config)?;
    let extra: BTreeMap<String, String> = industry.map(|i| ("industry".to_string(), i)).into_iter().collect();

    let report = match service.analyze_with(symbol, segment, extra).await {
        Ok(report) => report,
        Err(RunError::Fetch(e @ FetchError::DataFetchFailed { .. })) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", export_json(&report)?);
    } else {
        print_report(&report);
    }

    if let Some(dir) = out {
        let saved = save_report(&report, &dir)?;
        println!("Report saved to: {}", saved.display());
    }
    Ok(())
}

async fn run_fetch(config: AppConfig, req: FetchRequest, csv_dir: Option<PathBuf>) -> Result<()> {
    let service = AnalysisService::from_config(config)?;
    let summary = service.fetch_many(&req, Some(&StderrProgress)).await;

    for outcome in &summary.outcomes {
        let Ok(table) = &outcome.result else { continue };
        match &csv_dir {
            Some(dir) => {
                let path = save_table(table, dir, &format!("{}_{}", req.operation, outcome.symbol))?;
                println!("{}: {} rows -> {}", outcome.symbol, table.len(), path.display());
            }
            None => print_table(&outcome.symbol, table)?,
        }
    }

    if !summary.all_succeeded() {
        for (symbol, err) in summary.errors() {
            eprintln!("error for {symbol}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run_cache_status(config: AppConfig) -> Result<()> {
    if config.cache.backend == CacheBackend::Memory {
        println!("Cache backend is in-memory; nothing persists between runs.");
        return Ok(());
    }
    let service = AnalysisService::from_config(config)?;
    let keys = service.cache().keys().await;
    if keys.is_empty() {
        println!("Cache is empty: {}", service.config().cache.dir.display());
        return Ok(());
    }

    println!("Cache: {}", service.config().cache.dir.display());
    println!("Keys: {}", keys.len());
    println!();
    println!("{:<40} {:>8} {:>12}", "Key", "Fields", "Expires in");
    println!("{}", "-".repeat(62));
    for info in &keys {
        let expires = info
            .expires_in
            .map(|d| format_duration(d.as_secs()))
            .unwrap_or_else(|| "never".into());
        println!("{:<40} {:>8} {:>12}", info.key, info.fields, expires);
    }
    Ok(())
}

async fn run_cache_show(config: AppConfig, key: &str) -> Result<()> {
    let service = AnalysisService::from_config(config)?;
    match service.cache().read_rows(key).await {
        Some(table) => print!("{}", table_csv(&table)?),
        None => println!("No live entry for '{key}'."),
    }
    Ok(())
}

fn run_modules(config: &AppConfig) -> Result<()> {
    let order = module_registry(config)?.resolve_order()?;
    println!("{:<4} {:<26} {:>8}  Depends on", "#", "Module", "Priority");
    for (i, m) in order.iter().enumerate() {
        let d = &m.descriptor;
        println!(
            "{:<4} {:<26} {:>8}  {}",
            i + 1,
            d.name,
            d.priority,
            if d.dependencies.is_empty() { "-".to_string() } else { d.dependencies.join(", ") }
        );
    }
    Ok(())
}

// ── Output ──

struct StderrProgress;

impl BatchProgress for StderrProgress {
    fn on_batch_start(&self, batch: usize, batches: usize, symbols: &[String]) {
        eprintln!("[batch {}/{}] {}", batch + 1, batches, symbols.join(" "));
    }

    fn on_symbol_complete(&self, symbol: &str, result: &Result<Table, FetchError>) {
        match result {
            Ok(t) => eprintln!("  {symbol}: {} rows", t.len()),
            Err(e) => eprintln!("  {symbol}: FAILED ({e})"),
        }
    }

    fn on_complete(&self, succeeded: usize, failed: usize, total: usize) {
        eprintln!("Done: {succeeded}/{total} succeeded, {failed} failed");
    }
}

fn print_report(report: &AnalysisReport) {
    let bundle = &report.bundle;
    println!();
    println!("=== {} ({}) as of {} ===", report.symbol, report.segment, report.as_of);
    println!("{}", report.summary_phrase);
    println!();
    for fragment in &bundle.fragments {
        println!("{fragment}");
    }
    for (label, list) in [("Bullish", &bundle.bullish), ("Bearish", &bundle.bearish), ("Neutral", &bundle.neutral)] {
        if list.is_empty() {
            continue;
        }
        println!();
        println!("--- {label} ---");
        for factor in list {
            println!("  {factor}");
        }
    }
    if !bundle.faults.is_empty() {
        println!();
        println!("WARNING: incomplete analysis");
        for fault in &bundle.faults {
            println!("  {}: {}", fault.module, fault.reason);
        }
    }
    println!();
    println!("Fingerprint: {}", report.fingerprint);
}

fn print_table(symbol: &str, table: &Table) -> Result<()> {
    println!("# {symbol} ({} rows)", table.len());
    print!("{}", table_csv(table)?);
    Ok(())
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
