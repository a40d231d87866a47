//! The analysis-module contract: input snapshot, shared context and output.

use crate::domain::{MarketSegment, Table};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Errors ──

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("missing input: {0}")]
    MissingData(String),
    #[error("analysis failed: {0}")]
    Failed(String),
}

// ── Indicator parameters ──

/// Per-segment indicator settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub ma_short: usize,
    pub ma_medium: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub rsi_period: usize,
    pub bollinger_period: usize,
    pub bollinger_std: f64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ma_short: 5,
            ma_medium: 20,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            rsi_period: 14,
            bollinger_period: 20,
            bollinger_std: 2.0,
        }
    }
}

impl IndicatorParams {
    /// Crypto trades around the clock, so shorter averages.
    pub fn crypto() -> Self {
        Self {
            ma_short: 3,
            ma_medium: 10,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let periods = [
            ("ma_short", self.ma_short),
            ("ma_medium", self.ma_medium),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("rsi_period", self.rsi_period),
            ("bollinger_period", self.bollinger_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, p)| *p == 0) {
            return Err(format!("{name} must be >= 1"));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(format!(
                "macd_fast ({}) must be below macd_slow ({})",
                self.macd_fast, self.macd_slow
            ));
        }
        if !self.bollinger_std.is_finite() || self.bollinger_std <= 0.0 {
            return Err(format!("bollinger_std must be positive, got {}", self.bollinger_std));
        }
        Ok(())
    }
}

// ── Input ──

/// Everything fetched for one request. Built by the runner, read-only to modules.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub symbol: String,
    pub segment: MarketSegment,
    pub as_of: NaiveDate,
    pub params: IndicatorParams,
    pub daily: Table,
    pub fundamentals: Table,
    pub moneyflow: Table,
    pub spot: Table,
    /// Date-fallback datasets by name (e.g. `limit_list_d`).
    pub datasets: BTreeMap<String, Table>,
    /// Request extras such as `industry`.
    pub extra: BTreeMap<String, String>,
    pub latest_price: Option<f64>,
    pub price_change_pct: Option<f64>,
}

impl AnalysisInput {
    pub fn new(symbol: impl Into<String>, segment: MarketSegment, as_of: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            segment,
            as_of,
            params: IndicatorParams::default(),
            daily: Table::new(),
            fundamentals: Table::new(),
            moneyflow: Table::new(),
            spot: Table::new(),
            datasets: BTreeMap::new(),
            extra: BTreeMap::new(),
            latest_price: None,
            price_change_pct: None,
        }
    }

    pub fn with_daily(mut self, daily: Table) -> Self {
        self.latest_price = daily.last_f64("close");
        self.price_change_pct = price_change_pct(&daily);
        self.daily = daily;
        self
    }

    /// A non-empty dataset by name.
    pub fn dataset(&self, name: &str) -> Option<&Table> {
        self.datasets.get(name).filter(|t| !t.is_empty())
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }

    /// Daily closes with gaps as `NaN`, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.daily
            .column_f64("close")
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect()
    }
}

/// Percent change of the last close over the one before it.
fn price_change_pct(daily: &Table) -> Option<f64> {
    let closes: Vec<f64> = daily.column_f64("close").into_iter().flatten().collect();
    match closes.as_slice() {
        [.., prev, last] if *prev != 0.0 => Some((last - prev) / prev * 100.0),
        _ => None,
    }
}

// ── Output ──

/// One module's findings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleOutput {
    pub fragments: Vec<String>,
    pub bullish: Vec<String>,
    pub bearish: Vec<String>,
    pub neutral: Vec<String>,
    /// Named fields merged flat into the bundle.
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl ModuleOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragment(&mut self, text: impl Into<String>) {
        self.fragments.push(text.into());
    }

    pub fn bullish(&mut self, text: impl Into<String>) {
        self.bullish.push(text.into());
    }

    pub fn bearish(&mut self, text: impl Into<String>) {
        self.bearish.push(text.into());
    }

    pub fn neutral(&mut self, text: impl Into<String>) {
        self.neutral.push(text.into());
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Sets a numeric field; non-finite numbers become `null`.
    pub fn set_number(&mut self, name: impl Into<String>, value: Option<f64>) {
        self.fields.insert(name.into(), json_number(value));
    }

    pub fn field_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(serde_json::Value::as_f64)
    }
}

pub fn json_number(value: Option<f64>) -> serde_json::Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map_or(serde_json::Value::Null, serde_json::Value::Number)
}

// ── Context ──

/// Outputs of the modules that already ran in this pass, by module name.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    outputs: BTreeMap<String, ModuleOutput>,
}

impl AnalysisContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, module: &str) -> Option<&ModuleOutput> {
        self.outputs.get(module)
    }

    pub fn insert(&mut self, module: impl Into<String>, output: ModuleOutput) {
        self.outputs.insert(module.into(), output);
    }

    pub fn clear(&mut self) {
        self.outputs.clear();
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

// ── Trait ──

/// A pure analysis step. Runs on a worker thread, so no I/O.
pub trait AnalysisModule: Send + Sync {
    fn name(&self) -> &str;

    fn analyze(&self, input: &AnalysisInput, ctx: &AnalysisContext) -> Result<ModuleOutput, AnalysisError>;
}
