//! End-to-end analysis pass: configured built-ins resolved through the
//! registry, run by the engine, summarized by the default rule set.
//!
//! Also property tests for dependency resolution over random DAGs.

use chrono::{Duration, NaiveDate};
use marketlens_core::analysis::modules::{builtin, LIMIT_LIST_DATASET};
use marketlens_core::analysis::{
    json_number, AnalysisContext, AnalysisEngine, AnalysisError, AnalysisInput, AnalysisModule,
    AnalysisModuleRegistry, ModuleOutput, RegistryError, ResultBundle, SummaryRules,
};
use marketlens_core::config::AppConfig;
use marketlens_core::domain::{row, MarketSegment, Table, Value};
use proptest::prelude::*;
use std::sync::Arc;

// ── Fixtures ─────────────────────────────────────────────────────────

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
}

/// 60 accelerating closes, so price sits well above its 20-day mean and the
/// MACD histogram stays positive.
fn accelerating_daily() -> Table {
    let n = 60;
    (0..n)
        .map(|i| {
            let date = as_of() - Duration::days((n - 1 - i) as i64);
            let close = 10.0 + 0.02 * (i * i) as f64;
            row([("date", Value::from(date)), ("close", Value::from(close))])
        })
        .collect()
}

fn fundamentals() -> Table {
    Table::from_rows(vec![
        row([
            ("report_date", Value::from("20230930")),
            ("revenue_yoy", Value::from(5.0)),
            ("np_yoy", Value::from(4.0)),
        ]),
        row([
            ("report_date", Value::from("20231231")),
            ("revenue_yoy", Value::from(25.0)),
            ("np_yoy", Value::from(31.0)),
            ("pe", Value::from(15.0)),
            ("pb", Value::from(3.0)),
            ("eps", Value::from(2.0)),
        ]),
    ])
}

fn default_engine() -> AnalysisEngine {
    let mut registry = AnalysisModuleRegistry::new();
    for (name, cfg) in AppConfig::default().module_settings() {
        if cfg.enabled {
            registry.register(builtin(&name).unwrap(), cfg.priority, cfg.dependencies);
        }
    }
    AnalysisEngine::from_registry(&registry).unwrap()
}

/// What the runner does before evaluating summary rules.
fn summarize(input: &AnalysisInput, mut bundle: ResultBundle) -> (ResultBundle, String) {
    bundle.fields.insert("latest_price".into(), json_number(input.latest_price));
    bundle.fields.insert("price_change_pct".into(), json_number(input.price_change_pct));
    let phrase = SummaryRules::new(AppConfig::default().summary_rules).evaluate(&bundle).to_string();
    (bundle, phrase)
}

// ── 1. Built-in pipeline ─────────────────────────────────────────────

#[test]
fn builtins_resolve_in_priority_and_dependency_order() {
    assert_eq!(
        default_engine().order(),
        [
            "TechnicalAnalyzer",
            "FundamentalAnalyzer",
            "MarketSentimentAnalyzer",
            "IndustryAnalyzer",
            "CostAnalyzer",
        ]
    );
}

#[test]
fn missing_reports_fault_one_module_only() {
    let input = AnalysisInput::new("600519", MarketSegment::AShare, as_of()).with_daily(accelerating_daily());
    let bundle = default_engine().run_blocking(&input);

    assert_eq!(bundle.faults.len(), 1);
    assert_eq!(bundle.faults[0].module, "FundamentalAnalyzer");
    assert_eq!(bundle.modules.len(), 4);
    assert!(bundle.field_f64("RSI").is_some());
    assert_eq!(bundle.field("limit_status"), Some(&serde_json::json!("NORMAL")));
    assert_eq!(
        bundle.field("cost_analysis.short_term_profit_status"),
        Some(&serde_json::json!("profit"))
    );

    let (_, phrase) = summarize(&input, bundle);
    assert!(phrase.starts_with("Price holds above"), "{phrase}");
}

#[tokio::test]
async fn complete_pass_reads_context_across_modules() {
    let mut input = AnalysisInput::new("600519", MarketSegment::AShare, as_of()).with_daily(accelerating_daily());
    input.fundamentals = fundamentals();
    let input = Arc::new(input);

    let bundle = default_engine().run(Arc::clone(&input)).await.unwrap();
    assert!(bundle.is_complete(), "{:?}", bundle.faults);
    assert_eq!(bundle.field_f64("revenue_yoy"), Some(25.0));
    // eps over the technical close
    let close = bundle.field_f64("latest_close").unwrap();
    let yield_pct = bundle.field_f64("earnings_yield").unwrap();
    assert!((yield_pct - 2.0 / close * 100.0).abs() < 1e-9);
}

#[test]
fn limit_up_outranks_trend_rule() {
    let mut input = AnalysisInput::new("600519", MarketSegment::AShare, as_of()).with_daily(accelerating_daily());
    input.datasets.insert(
        LIMIT_LIST_DATASET.to_string(),
        Table::from_rows(vec![
            row([("ts_code", "600519.SH"), ("limit", "U")]),
            row([("ts_code", "000001.SZ"), ("limit", "D")]),
        ]),
    );
    let bundle = default_engine().run_blocking(&input);
    assert_eq!(bundle.field("limit_status"), Some(&serde_json::json!("LIMIT_UP")));

    let (_, phrase) = summarize(&input, bundle);
    assert!(phrase.starts_with("Limit-up"), "{phrase}");
}

#[test]
fn identical_inputs_fingerprint_identically() {
    let input = AnalysisInput::new("600519", MarketSegment::AShare, as_of()).with_daily(accelerating_daily());
    let engine = default_engine();
    assert_eq!(engine.run_blocking(&input).fingerprint(), engine.run_blocking(&input).fingerprint());

    let other = AnalysisInput::new("000001", MarketSegment::AShare, as_of()).with_daily(Table::new());
    assert_ne!(engine.run_blocking(&input).fingerprint(), engine.run_blocking(&other).fingerprint());
}

#[test]
fn no_daily_bars_faults_price_dependent_modules() {
    let input = AnalysisInput::new("600519", MarketSegment::AShare, as_of());
    let bundle = default_engine().run_blocking(&input);
    let faulted: Vec<&str> = bundle.faults.iter().map(|f| f.module.as_str()).collect();
    assert_eq!(faulted, ["TechnicalAnalyzer", "FundamentalAnalyzer", "CostAnalyzer"]);
    assert_eq!(bundle.modules, ["MarketSentimentAnalyzer", "IndustryAnalyzer"]);
}

// ── 2. Resolution properties ─────────────────────────────────────────

struct Named(String);

impl AnalysisModule for Named {
    fn name(&self) -> &str {
        &self.0
    }

    fn analyze(&self, _: &AnalysisInput, _: &AnalysisContext) -> Result<ModuleOutput, AnalysisError> {
        Ok(ModuleOutput::new())
    }
}

/// Up to 8 modules; module `i` may depend only on modules `< i`, so the
/// graph is acyclic.
fn dag() -> impl Strategy<Value = Vec<(u32, Vec<usize>)>> {
    (1usize..8).prop_flat_map(|n| {
        (0..n)
            .map(|i| (0u32..4, proptest::collection::vec(0..i.max(1), 0..=i.min(3))))
            .collect::<Vec<_>>()
    })
}

fn registry_for(graph: &[(u32, Vec<usize>)]) -> AnalysisModuleRegistry {
    let mut reg = AnalysisModuleRegistry::new();
    for (i, (priority, deps)) in graph.iter().enumerate() {
        let deps = deps.iter().filter(|&&d| d < i).map(|d| format!("M{d}")).collect();
        reg.register(Arc::new(Named(format!("M{i}"))), *priority, deps);
    }
    reg
}

proptest! {
    #[test]
    fn dependencies_always_run_first(graph in dag()) {
        let order = registry_for(&graph).resolve_order().unwrap();
        prop_assert_eq!(order.len(), graph.len());

        let position = |name: &str| order.iter().position(|m| m.descriptor.name == name).unwrap();
        for m in &order {
            for dep in &m.descriptor.dependencies {
                prop_assert!(position(dep) < position(&m.descriptor.name));
            }
        }
    }

    #[test]
    fn resolution_is_deterministic(graph in dag()) {
        let names = |reg: &AnalysisModuleRegistry| -> Vec<String> {
            reg.resolve_order().unwrap().into_iter().map(|m| m.descriptor.name).collect()
        };
        prop_assert_eq!(names(&registry_for(&graph)), names(&registry_for(&graph)));
    }

    #[test]
    fn cycle_anywhere_fails_resolution(graph in dag()) {
        let mut reg = registry_for(&graph);
        reg.register(Arc::new(Named("X".into())), 0, vec!["Y".into()]);
        reg.register(Arc::new(Named("Y".into())), 0, vec!["X".into()]);
        match reg.resolve_order() {
            Err(RegistryError::CyclicDependency { path }) => {
                prop_assert_eq!(path.first(), path.last());
                prop_assert!(path.contains(&"X".to_string()) && path.contains(&"Y".to_string()));
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|o| o.len())),
        }
    }
}
