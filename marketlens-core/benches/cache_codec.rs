//! Criterion benchmarks for MarketLens hot paths.
//!
//! Benchmarks:
//! 1. Cache record codec (encode/decode one row)
//! 2. Cache store round trip (write then read a daily table, in memory)
//! 3. Indicator precompute (SMA, EMA, MACD, RSI, Bollinger over one series)
//! 4. Analysis pass (all built-in modules over one symbol)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

use marketlens_core::analysis::modules::builtin;
use marketlens_core::analysis::{AnalysisEngine, AnalysisInput, AnalysisModuleRegistry};
use marketlens_core::cache::{codec, CacheStore};
use marketlens_core::config::AppConfig;
use marketlens_core::domain::{row, MarketSegment, Row, Table, Value};
use marketlens_core::indicators::{Bollinger, Ema, Indicator, Macd, MacdLine, Rsi, Sma};

// ── Helpers ──────────────────────────────────────────────────────────

fn base_date() -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()
}

fn make_row(i: usize) -> Row {
    let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
    row([
        ("date", Value::from(base_date() + chrono::Duration::days(i as i64))),
        ("open", Value::from(close - 0.3)),
        ("high", Value::from(close + 1.5)),
        ("low", Value::from(close - 1.5)),
        ("close", Value::from(close)),
        ("volume", Value::from(1_000_000.0 + (i % 500) as f64)),
        ("ts_code", Value::from("600519.SH")),
    ])
}

fn make_daily(n: usize) -> Table {
    (0..n).map(make_row).collect()
}

fn closes(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 + (i as f64 * 0.1).sin() * 10.0).collect()
}

// ── 1. Codec ─────────────────────────────────────────────────────────

fn bench_codec(c: &mut Criterion) {
    let r = make_row(7);
    let bytes = codec::encode_row(&r).unwrap();

    let mut group = c.benchmark_group("codec");
    group.bench_function("encode_row", |b| b.iter(|| codec::encode_row(black_box(&r)).unwrap()));
    group.bench_function("decode_row", |b| b.iter(|| codec::decode_row(black_box(&bytes)).unwrap()));
    group.finish();
}

// ── 2. Cache store ───────────────────────────────────────────────────

fn bench_cache_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("cache_round_trip");
    for n in [60usize, 180, 1000] {
        let table = make_daily(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &table, |b, table| {
            b.iter(|| {
                rt.block_on(async {
                    let cache = CacheStore::in_memory();
                    cache.write_rows("daily:A:600519", table, Duration::from_secs(60)).await;
                    black_box(cache.read_rows("daily:A:600519").await)
                })
            })
        });
    }
    group.finish();
}

// ── 3. Indicators ────────────────────────────────────────────────────

fn bench_indicators(c: &mut Criterion) {
    let series = closes(2000);
    let indicators: Vec<Box<dyn Indicator>> = vec![
        Box::new(Sma::new(20)),
        Box::new(Ema::new(12)),
        Box::new(Macd::histogram(12, 26, 9)),
        Box::new(Rsi::new(14)),
        Box::new(Bollinger::upper(20, 2.0)),
    ];

    let mut group = c.benchmark_group("indicators");
    for ind in &indicators {
        group.bench_function(ind.name(), |b| b.iter(|| ind.compute(black_box(&series))));
    }
    group.bench_function("macd_line", |b| {
        let line = Macd::new(12, 26, 9, MacdLine::Line);
        b.iter(|| line.compute(black_box(&series)))
    });
    group.finish();
}

// ── 4. Analysis pass ─────────────────────────────────────────────────

fn bench_analysis_pass(c: &mut Criterion) {
    let mut registry = AnalysisModuleRegistry::new();
    for (name, cfg) in AppConfig::default().module_settings() {
        if let Some(module) = builtin(&name) {
            registry.register(module, cfg.priority, cfg.dependencies);
        }
    }
    let engine = AnalysisEngine::from_registry(&registry).unwrap();
    let input = Arc::new(
        AnalysisInput::new("600519", MarketSegment::AShare, base_date() + chrono::Duration::days(179))
            .with_daily(make_daily(180)),
    );

    c.bench_function("analysis_pass_180_bars", |b| b.iter(|| engine.run_blocking(black_box(&input))));
}

criterion_group!(
    benches,
    bench_codec,
    bench_cache_round_trip,
    bench_indicators,
    bench_analysis_pass,
);
criterion_main!(benches);
