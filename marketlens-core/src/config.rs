//! Application configuration (`marketlens.toml`).
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! `MARKETLENS_TUSHARE_TOKEN` overrides `sources.tushare.token`.

use crate::analysis::modules::{self, INDUSTRY_FLOW_DATASET, LIMIT_LIST_DATASET, STK_LIMIT_DATASET, TOP_INST_DATASET};
use crate::analysis::summary::{default_rules, SummaryRule};
use crate::analysis::IndicatorParams;
use crate::data::RetryOverride;
use crate::domain::MarketSegment;
use crate::fallback::{DatasetSpec, DEFAULT_MAX_ATTEMPTS};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TOKEN_ENV: &str = "MARKETLENS_TUSHARE_TOKEN";

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Sections ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Root directory of the file backend.
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            dir: PathBuf::from(".marketlens-cache"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub max_attempts: u32,
    pub trade_date_ttl_secs: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            trade_date_ttl_secs: DAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    /// Per upstream call.
    pub request_timeout_secs: u64,
    /// Around a whole analysis request's fan-out/fan-in.
    pub run_timeout_secs: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_pause_ms: 500,
            request_timeout_secs: 30,
            run_timeout_secs: None,
        }
    }
}

impl FetchConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Lookback, cache TTLs and indicator settings for one market segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentConfig {
    pub data_days: u32,
    pub daily_ttl_secs: u64,
    pub fundamentals_ttl_secs: u64,
    pub moneyflow_ttl_secs: u64,
    pub indicators: IndicatorParams,
}

impl SegmentConfig {
    pub fn defaults_for(segment: MarketSegment) -> Self {
        let a_share = Self {
            data_days: 60,
            daily_ttl_secs: 12 * HOUR,
            fundamentals_ttl_secs: 180 * DAY,
            moneyflow_ttl_secs: DAY,
            indicators: IndicatorParams::default(),
        };
        match segment {
            MarketSegment::AShare => a_share,
            MarketSegment::Crypto => Self {
                data_days: 180,
                daily_ttl_secs: HOUR,
                indicators: IndicatorParams::crypto(),
                ..a_share
            },
            _ => Self {
                data_days: 180,
                daily_ttl_secs: 4 * HOUR,
                ..a_share
            },
        }
    }
}

/// A `[segments.<SEG>]` block. Keys it leaves out keep that segment's defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SegmentOverrides {
    pub data_days: Option<u32>,
    pub daily_ttl_secs: Option<u64>,
    pub fundamentals_ttl_secs: Option<u64>,
    pub moneyflow_ttl_secs: Option<u64>,
    pub ma_short: Option<usize>,
    pub ma_medium: Option<usize>,
    pub macd_fast: Option<usize>,
    pub macd_slow: Option<usize>,
    pub macd_signal: Option<usize>,
    pub rsi_period: Option<usize>,
    pub bollinger_period: Option<usize>,
    pub bollinger_std: Option<f64>,
}

impl SegmentOverrides {
    pub fn apply(&self, base: SegmentConfig) -> SegmentConfig {
        let p = base.indicators;
        SegmentConfig {
            data_days: self.data_days.unwrap_or(base.data_days),
            daily_ttl_secs: self.daily_ttl_secs.unwrap_or(base.daily_ttl_secs),
            fundamentals_ttl_secs: self.fundamentals_ttl_secs.unwrap_or(base.fundamentals_ttl_secs),
            moneyflow_ttl_secs: self.moneyflow_ttl_secs.unwrap_or(base.moneyflow_ttl_secs),
            indicators: IndicatorParams {
                ma_short: self.ma_short.unwrap_or(p.ma_short),
                ma_medium: self.ma_medium.unwrap_or(p.ma_medium),
                macd_fast: self.macd_fast.unwrap_or(p.macd_fast),
                macd_slow: self.macd_slow.unwrap_or(p.macd_slow),
                macd_signal: self.macd_signal.unwrap_or(p.macd_signal),
                rsi_period: self.rsi_period.unwrap_or(p.rsi_period),
                bollinger_period: self.bollinger_period.unwrap_or(p.bollinger_period),
                bollinger_std: self.bollinger_std.unwrap_or(p.bollinger_std),
            },
        }
    }
}

/// Upstream credentials, quota and retry overrides.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub token: Option<String>,
    pub daily_quota: Option<u64>,
    pub low_quota_threshold: Option<u64>,
    pub max_attempts: Option<u32>,
    pub min_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

impl SourceConfig {
    pub fn retry_override(&self) -> RetryOverride {
        RetryOverride {
            max_attempts: self.max_attempts,
            min_backoff_ms: self.min_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
        }
    }

    pub fn low_quota_threshold(&self) -> u64 {
        self.low_quota_threshold.unwrap_or(10)
    }
}

/// `segment` is served by `source` at `priority` (lower first).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteConfig {
    pub segment: MarketSegment,
    pub source: String,
    pub priority: u32,
}

impl RouteConfig {
    pub fn new(segment: MarketSegment, source: &str, priority: u32) -> Self {
        Self {
            segment,
            source: source.to_string(),
            priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub enabled: bool,
    pub priority: u32,
    pub dependencies: Vec<String>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 100,
            dependencies: Vec::new(),
        }
    }
}

impl ModuleConfig {
    fn new(priority: u32, dependencies: &[&str]) -> Self {
        Self {
            enabled: true,
            priority,
            dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ── Root ──

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub fallback: FallbackConfig,
    pub fetch: FetchConfig,
    pub segments: BTreeMap<MarketSegment, SegmentOverrides>,
    pub sources: BTreeMap<String, SourceConfig>,
    pub routes: Vec<RouteConfig>,
    /// Overlays the built-in module settings by name.
    pub modules: BTreeMap<String, ModuleConfig>,
    pub datasets: Vec<DatasetSpec>,
    pub summary_rules: Vec<SummaryRule>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            fallback: FallbackConfig::default(),
            fetch: FetchConfig::default(),
            segments: BTreeMap::new(),
            sources: BTreeMap::new(),
            routes: default_routes(),
            modules: BTreeMap::new(),
            datasets: default_datasets(),
            summary_rules: default_rules(),
        }
    }
}

pub fn default_routes() -> Vec<RouteConfig> {
    use MarketSegment::*;
    let mut routes = vec![
        RouteConfig::new(AShare, "tushare", 1),
        RouteConfig::new(AShare, "eastmoney", 2),
        RouteConfig::new(Crypto, "binance", 1),
        RouteConfig::new(Etf, "tushare", 1),
        RouteConfig::new(Lof, "tushare", 1),
    ];
    for seg in [HongKong, UnitedStates, Japan, India] {
        routes.push(RouteConfig::new(seg, "yahoo", 1));
    }
    routes
}

pub fn default_modules() -> BTreeMap<String, ModuleConfig> {
    use crate::analysis::modules::{
        CostAnalyzer, FundamentalAnalyzer, IndustryAnalyzer, MarketSentimentAnalyzer, TechnicalAnalyzer,
    };
    [
        (TechnicalAnalyzer::NAME, ModuleConfig::new(1, &[])),
        (FundamentalAnalyzer::NAME, ModuleConfig::new(2, &[TechnicalAnalyzer::NAME])),
        (MarketSentimentAnalyzer::NAME, ModuleConfig::new(3, &[])),
        (IndustryAnalyzer::NAME, ModuleConfig::new(4, &[])),
        (
            CostAnalyzer::NAME,
            ModuleConfig::new(5, &[TechnicalAnalyzer::NAME, MarketSentimentAnalyzer::NAME]),
        ),
    ]
    .into_iter()
    .map(|(name, cfg)| (name.to_string(), cfg))
    .collect()
}

pub fn default_datasets() -> Vec<DatasetSpec> {
    vec![
        DatasetSpec::new(LIMIT_LIST_DATASET, LIMIT_LIST_DATASET, 2 * DAY, true),
        DatasetSpec::new(INDUSTRY_FLOW_DATASET, INDUSTRY_FLOW_DATASET, 6 * HOUR, true),
        DatasetSpec::new(STK_LIMIT_DATASET, STK_LIMIT_DATASET, 2 * DAY, true),
        DatasetSpec::new(TOP_INST_DATASET, TOP_INST_DATASET, DAY, true),
    ]
}

impl AppConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// File if given, defaults otherwise; then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|k| std::env::var(k).ok());
        Ok(config)
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(token) = var(TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.sources.entry("tushare".into()).or_default().token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.fallback.max_attempts == 0 {
            return invalid("fallback.max_attempts must be >= 1".into());
        }
        if self.fetch.batch_size == 0 {
            return invalid("fetch.batch_size must be >= 1".into());
        }
        for seg in self.segments.keys() {
            if let Err(e) = self.segment(*seg).indicators.validate() {
                return invalid(format!("segments.{seg}: {e}"));
            }
        }
        if let Some(name) = self.modules.keys().find(|n| modules::builtin(n).is_none()) {
            return invalid(format!("unknown analysis module '{name}'"));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(d) = self.datasets.iter().find(|d| !seen.insert(d.name.as_str())) {
            return invalid(format!("dataset '{}' declared twice", d.name));
        }
        Ok(())
    }

    /// That segment's defaults with its configured block applied.
    pub fn segment(&self, segment: MarketSegment) -> SegmentConfig {
        let defaults = SegmentConfig::defaults_for(segment);
        match self.segments.get(&segment) {
            Some(overrides) => overrides.apply(defaults),
            None => defaults,
        }
    }

    pub fn source(&self, name: &str) -> SourceConfig {
        self.sources.get(name).cloned().unwrap_or_default()
    }

    /// Built-in module settings overlaid with the configured ones.
    pub fn module_settings(&self) -> BTreeMap<String, ModuleConfig> {
        let mut all = default_modules();
        for (name, cfg) in &self.modules {
            all.insert(name.clone(), cfg.clone());
        }
        all
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetSpec> {
        self.datasets.iter().find(|d| d.name == name)
    }
}
