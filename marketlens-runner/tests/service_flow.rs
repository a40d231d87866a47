//! Integration tests for request orchestration.
//!
//! A scripted in-process source stands in for the upstreams, so these tests
//! cover the full path (fallback fetch, read-through cache, date fallback,
//! engine, summary) without the network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use marketlens_core::analysis::SummaryRules;
use marketlens_core::cache::CacheStore;
use marketlens_core::config::AppConfig;
use marketlens_core::data::{DataSource, DataSourceManager, DataSourceRegistry, FetchError, FetchOutput, SourceError};
use marketlens_core::domain::{row, FetchRequest, MarketSegment, Operation, Table, Value};
use marketlens_core::fallback::DateFallbackFetcher;
use marketlens_runner::{build_engine, fetch_batched, AnalysisService, Components, DatasetSource, RunError};

// ── Scripted upstream ────────────────────────────────────────────────

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
}

fn close_on(date: NaiveDate) -> f64 {
    let i = (date - NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()).num_days() as f64;
    100.0 + i * 0.1
}

fn bars(start: NaiveDate, end: NaiveDate) -> Table {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|d| row([("date", Value::from(d)), ("close", Value::from(close_on(d)))]))
        .collect()
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("field missing");
    assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
}

#[derive(Default)]
struct Scripted {
    daily_calls: AtomicU32,
    fundamentals_calls: AtomicU32,
    daily_ranges: Mutex<Vec<(Option<NaiveDate>, Option<NaiveDate>)>>,
    /// No daily bars at all.
    empty_daily: bool,
    /// Every daily call sleeps this long.
    daily_delay: Option<Duration>,
    /// Symbols whose daily call fails.
    failing: Vec<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl DataSource for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports(&self, _op: Operation) -> bool {
        true
    }

    async fn fetch_daily(&self, req: &FetchRequest) -> Result<Table, SourceError> {
        self.daily_calls.fetch_add(1, Ordering::SeqCst);
        self.daily_ranges.lock().unwrap().push((req.start, req.end));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.daily_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let symbol = req.symbol().unwrap_or_default();
        if self.empty_daily || self.failing.iter().any(|s| s == symbol) {
            return Ok(Table::new());
        }
        Ok(bars(req.start.unwrap_or(as_of()), req.end.unwrap_or(as_of())))
    }

    async fn fetch_fundamentals(&self, req: &FetchRequest) -> Result<FetchOutput, SourceError> {
        self.fundamentals_calls.fetch_add(1, Ordering::SeqCst);
        let report = Table::from_rows(vec![row([
            ("report_date", Value::from(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap())),
            ("revenue_yoy", Value::from(12.0)),
            ("np_yoy", Value::from(9.0)),
            ("pb", Value::from(4.0)),
        ])]);
        Ok(FetchOutput::PerSymbol(
            req.symbols.iter().map(|s| (s.clone(), report.clone())).collect(),
        ))
    }

    async fn fetch_moneyflow(&self, _req: &FetchRequest) -> Result<FetchOutput, SourceError> {
        Err(SourceError::Http { status: 502 })
    }

    async fn fetch_spot(&self, req: &FetchRequest) -> Result<Table, SourceError> {
        Ok(Table::from_rows(vec![row([
            ("symbol", Value::from(req.symbol().unwrap_or_default())),
            ("change_pct", Value::from(1.5)),
        ])]))
    }
}

/// Publishes the limit list one day late; the industry dataset is down.
struct LateLists {
    calls: AtomicU32,
}

#[async_trait]
impl DatasetSource for LateLists {
    fn serves(&self, segment: MarketSegment) -> bool {
        segment == MarketSegment::AShare
    }

    async fn dataset(&self, name: &str, date: NaiveDate) -> Result<Table, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match name {
            "limit_list_d" if date < as_of() => Ok(Table::from_rows(vec![row([
                ("trade_date", Value::from(date)),
                ("ts_code", Value::from("600519.SH")),
                ("limit", Value::from("U")),
            ])])),
            "limit_list_d" => Ok(Table::new()),
            _ => Err(SourceError::Http { status: 503 }),
        }
    }
}

struct Harness {
    service: AnalysisService,
    source: Arc<Scripted>,
    cache: CacheStore,
}

fn harness(source: Scripted, config: AppConfig) -> Harness {
    let source = Arc::new(source);
    let mut registry = DataSourceRegistry::new();
    registry.register(MarketSegment::AShare, source.clone(), 1);

    let cache = CacheStore::in_memory();
    let components = Components {
        manager: DataSourceManager::new(Arc::new(registry)),
        cache: cache.clone(),
        fallback: DateFallbackFetcher::new(cache.clone(), None).with_clock(as_of),
        datasets: Some(Arc::new(LateLists { calls: AtomicU32::new(0) })),
        engine: build_engine(&config).unwrap(),
        rules: SummaryRules::new(config.summary_rules.clone()),
    };
    Harness {
        service: AnalysisService::new(config, components),
        source,
        cache,
    }
}

// ── 1. Analysis requests ─────────────────────────────────────────────

#[tokio::test]
async fn analyze_assembles_a_complete_report() {
    let h = harness(Scripted::default(), AppConfig::default());
    let report = h.service.analyze("600519", MarketSegment::AShare).await.unwrap();

    assert_eq!(report.as_of, as_of());
    assert!(report.is_complete(), "{:?}", report.bundle.faults);
    assert_close(report.bundle.field_f64("latest_price"), close_on(as_of()));
    assert_eq!(report.bundle.field_f64("revenue_yoy"), Some(12.0));
    assert_eq!(report.bundle.field_f64("realtime_change_pct_spot"), Some(1.5));
    // money flow upstream is down: the field is present but null
    assert_eq!(report.bundle.field("main_net_amount_dc"), Some(&serde_json::Value::Null));
    // limit list regressed one day
    assert_eq!(report.bundle.field("limit_status"), Some(&serde_json::json!("LIMIT_UP")));
    assert!(report.summary_phrase.starts_with("Limit-up"), "{}", report.summary_phrase);
    assert!(h.cache.read_rows("limit_list_d:20240307").await.is_some());
    assert_eq!(report.fingerprint.len(), 64);
}

#[tokio::test]
async fn second_request_is_served_from_cache() {
    let h = harness(Scripted::default(), AppConfig::default());
    let first = h.service.analyze("600519", MarketSegment::AShare).await.unwrap();
    let second = h.service.analyze("600519", MarketSegment::AShare).await.unwrap();

    assert_eq!(h.source.daily_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.source.fundamentals_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(h.service.cache().hit_counts().get("daily"), Some(&1));
}

#[tokio::test]
async fn cold_request_counts_no_cache_hits() {
    let h = harness(Scripted::default(), AppConfig::default());
    h.service.analyze("600519", MarketSegment::AShare).await.unwrap();
    assert!(h.service.cache().hit_counts().is_empty(), "{:?}", h.service.cache().hit_counts());
}

#[tokio::test]
async fn stale_cache_fetches_only_the_missing_tail() {
    let h = harness(Scripted::default(), AppConfig::default());
    let stale_end = as_of() - chrono::Duration::days(5);
    h.cache
        .write_rows("daily:A:600519", &bars(as_of() - chrono::Duration::days(60), stale_end), Duration::from_secs(3600))
        .await;

    let report = h.service.analyze("600519", MarketSegment::AShare).await.unwrap();

    let ranges = h.source.daily_ranges.lock().unwrap().clone();
    assert_eq!(ranges, [(Some(stale_end + chrono::Duration::days(1)), Some(as_of()))]);
    assert_close(report.bundle.field_f64("latest_close"), close_on(as_of()));
    assert_eq!(h.cache.read_rows("daily:A:600519").await.unwrap().len(), 61);
}

#[tokio::test]
async fn daily_exhaustion_names_operation_and_segment() {
    let h = harness(
        Scripted {
            empty_daily: true,
            ..Scripted::default()
        },
        AppConfig::default(),
    );
    let err = h.service.analyze("600519", MarketSegment::AShare).await.unwrap_err();
    assert!(matches!(
        err,
        RunError::Fetch(FetchError::DataFetchFailed {
            operation: Operation::Daily,
            segment: MarketSegment::AShare
        })
    ));
    assert!(err.to_string().contains("daily"));
}

#[tokio::test]
async fn unrouted_segment_is_no_data_source() {
    let h = harness(Scripted::default(), AppConfig::default());
    let err = h.service.analyze("AAPL", MarketSegment::UnitedStates).await.unwrap_err();
    assert!(matches!(err, RunError::Fetch(FetchError::NoDataSource { .. })));
    assert_eq!(h.source.daily_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn caller_timeout_wraps_the_whole_join() {
    let mut config = AppConfig::default();
    config.fetch.run_timeout_secs = Some(1);
    let h = harness(
        Scripted {
            daily_delay: Some(Duration::from_secs(5)),
            ..Scripted::default()
        },
        config,
    );
    let started = Instant::now();
    let err = h.service.analyze("600519", MarketSegment::AShare).await.unwrap_err();
    assert!(matches!(err, RunError::Timeout { secs: 1, .. }));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn industry_extra_reaches_the_module() {
    let h = harness(Scripted::default(), AppConfig::default());
    let extra = BTreeMap::from([("industry".to_string(), "Liquor".to_string())]);
    let report = h
        .service
        .analyze_with("600519", MarketSegment::AShare, extra)
        .await
        .unwrap();
    assert_eq!(report.bundle.field("industry"), Some(&serde_json::json!("Liquor")));
    // industry dataset upstream is down
    assert_eq!(report.bundle.field("main_net_inflow_ind"), Some(&serde_json::Value::Null));
}

// ── 2. Batched fetches ───────────────────────────────────────────────

fn symbols(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("60000{i}")).collect()
}

#[tokio::test]
async fn batches_run_in_chunks_with_pauses() {
    let source = Arc::new(Scripted {
        daily_delay: Some(Duration::from_millis(20)),
        failing: vec!["600003".into()],
        ..Scripted::default()
    });
    let mut registry = DataSourceRegistry::new();
    registry.register(MarketSegment::AShare, source.clone(), 1);
    let manager = DataSourceManager::new(Arc::new(registry));

    let template = FetchRequest::new(Operation::Daily, MarketSegment::AShare, symbols(5))
        .with_range(Some(as_of() - chrono::Duration::days(3)), Some(as_of()));
    let started = Instant::now();
    let summary = fetch_batched(&manager, &template, 2, Duration::from_millis(50), None).await;

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 1);
    assert!(!summary.all_succeeded());
    let order: Vec<&str> = summary.outcomes.iter().map(|o| o.symbol.as_str()).collect();
    assert_eq!(order, ["600000", "600001", "600002", "600003", "600004"]);
    assert_eq!(summary.errors().map(|(s, _)| s).collect::<Vec<_>>(), ["600003"]);
    assert!(source.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(summary.outcomes[0].result.as_ref().unwrap().len(), 4);
}

#[tokio::test]
async fn fetch_many_writes_through_to_cache() {
    let h = harness(Scripted::default(), AppConfig::default());
    let template = FetchRequest::new(Operation::Daily, MarketSegment::AShare, symbols(3))
        .with_range(Some(as_of() - chrono::Duration::days(9)), Some(as_of()));
    let summary = h.service.fetch_many(&template, None).await;

    assert!(summary.all_succeeded());
    for symbol in symbols(3) {
        let cached = h.cache.read_rows(&format!("daily:A:{symbol}")).await.unwrap();
        assert_eq!(cached.len(), 10);
    }
}

mod props {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn outcomes_follow_input_order(n in 0usize..12, batch_size in 0usize..6) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let source = Arc::new(Scripted::default());
            let mut registry = DataSourceRegistry::new();
            registry.register(MarketSegment::AShare, source.clone(), 1);
            let manager = DataSourceManager::new(Arc::new(registry));
            let template = FetchRequest::new(Operation::Daily, MarketSegment::AShare, symbols(n))
                .with_range(Some(as_of()), Some(as_of()));

            let summary = rt.block_on(fetch_batched(&manager, &template, batch_size, Duration::ZERO, None));

            let order: Vec<String> = summary.outcomes.iter().map(|o| o.symbol.clone()).collect();
            prop_assert_eq!(order, symbols(n));
            prop_assert_eq!(summary.total, n);
            prop_assert_eq!(summary.succeeded + summary.failed, n);
            prop_assert!(source.max_in_flight.load(Ordering::SeqCst) <= batch_size.max(1));
        }
    }
}
