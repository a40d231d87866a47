//! Yahoo Finance source for HK, US, JP and IN equities.
//!
//! Reads Yahoo's v8 chart API for daily bars and uses the chart `meta` block for
//! spot quotes. Yahoo has no official API and bans aggressively, so every call
//! goes through the circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::http::with_timeout;
use super::provider::{DataSource, FetchOutput, SourceError};
use super::retry::RetryPolicy;
use super::standardize::{self, BARS, SPOT};
use crate::domain::{row, FetchRequest, MarketSegment, Operation, Table, Value};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BASE: &str = "https://query2.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: Option<String>,
    short_name: Option<String>,
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
    regular_market_volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

pub struct YahooSource {
    client: Client,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl YahooSource {
    pub const NAME: &'static str = "yahoo";

    pub fn new(client: Client, circuit_breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE.to_string(),
            circuit_breaker,
            retry,
            timeout: Duration::from_secs(30),
        }
    }

    /// 3 attempts, 1s→5s.
    pub fn default_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(5))
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn chart_url(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_hms_opt(0, 0, 0).map_or(0, |dt| dt.and_utc().timestamp());
        let end_ts = end.and_hms_opt(23, 59, 59).map_or(0, |dt| dt.and_utc().timestamp());
        format!(
            "{}/v8/finance/chart/{ticker}?period1={start_ts}&period2={end_ts}&interval=1d",
            self.base_url
        )
    }

    async fn chart(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<ChartData, SourceError> {
        let url = self.chart_url(ticker, start, end);
        self.retry
            .run(Self::NAME, "chart", |_| self.chart_once(ticker, &url))
            .await
    }

    async fn chart_once(&self, ticker: &str, url: &str) -> Result<ChartData, SourceError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(SourceError::CircuitOpen);
        }
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| with_timeout(e, self.timeout))?;

        let status = resp.status();
        if status == StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(SourceError::CircuitOpen);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            self.circuit_breaker.record_failure();
        }
        let resp = super::http::check_status(resp)?;
        let chart: ChartResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::ResponseFormatChanged(format!("failed to parse chart for {ticker}: {e}")))?;
        let data = first_result(ticker, chart)?;
        self.circuit_breaker.record_success();
        Ok(data)
    }
}

/// Yahoo ticker for a plain exchange code.
pub fn yahoo_ticker(symbol: &str, segment: MarketSegment) -> String {
    if symbol.contains('.') || symbol.contains('-') {
        return symbol.to_ascii_uppercase();
    }
    match segment {
        MarketSegment::HongKong => {
            let digits = symbol.trim_start_matches('0');
            format!("{:0>4}.HK", digits)
        }
        MarketSegment::Japan => format!("{symbol}.T"),
        MarketSegment::India => format!("{}.NS", symbol.to_ascii_uppercase()),
        _ => symbol.to_ascii_uppercase(),
    }
}

fn first_result(ticker: &str, resp: ChartResponse) -> Result<ChartData, SourceError> {
    let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
        Some(err) if err.code == "Not Found" => SourceError::SymbolNotFound {
            symbol: ticker.to_string(),
        },
        Some(err) => SourceError::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
        None => SourceError::ResponseFormatChanged("empty result with no error".into()),
    })?;
    result
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::ResponseFormatChanged("result array is empty".into()))
}

/// Chart arrays → raw bar table. Rows with every OHLCV cell missing are skipped.
fn bars_from_chart(data: &ChartData) -> Table {
    let Some(timestamps) = data.timestamp.as_ref() else {
        return Table::new();
    };
    let empty = QuoteData::default();
    let quote = data.indicators.quote.first().unwrap_or(&empty);
    let at = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();

    timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let date = chrono::DateTime::from_timestamp(ts, 0)?.naive_utc().date();
            let cells = [
                ("open", at(&quote.open, i)),
                ("high", at(&quote.high, i)),
                ("low", at(&quote.low, i)),
                ("close", at(&quote.close, i)),
                ("volume", at(&quote.volume, i)),
            ];
            if cells.iter().all(|(_, v)| v.is_none()) {
                return None;
            }
            let mut r = row(cells);
            r.insert("date".into(), Value::Date(date));
            Some(r)
        })
        .collect()
}

fn spot_from_meta(symbol: &str, meta: &ChartMeta) -> Table {
    let prev = meta.chart_previous_close.or(meta.previous_close);
    let change_pct = match (meta.regular_market_price, prev) {
        (Some(p), Some(c)) if c != 0.0 => Some((p - c) / c * 100.0),
        _ => None,
    };
    let raw = row([
        ("symbol", Value::from(meta.symbol.clone().unwrap_or_else(|| symbol.to_string()))),
        ("name", meta.short_name.clone().map_or(Value::Null, Value::from)),
        ("latest_price", Value::from(meta.regular_market_price)),
        ("change_pct", Value::from(change_pct)),
        ("volume", Value::from(meta.regular_market_volume)),
    ]);
    standardize::standardize(YahooSource::NAME, Table::from_rows(vec![raw]), &[], &SPOT)
}

#[async_trait]
impl DataSource for YahooSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, op: Operation) -> bool {
        matches!(op, Operation::Daily | Operation::Spot)
    }

    async fn fetch_daily(&self, req: &FetchRequest) -> Result<Table, SourceError> {
        let Some(symbol) = req.symbol() else {
            return Ok(Table::new());
        };
        let today = Local::now().date_naive();
        let end = req.end.unwrap_or(today);
        let start = req.start.unwrap_or(end - chrono::Duration::days(365));
        let ticker = yahoo_ticker(symbol, req.segment);
        let data = self.chart(&ticker, start, end).await?;
        let table = standardize::standardize(Self::NAME, bars_from_chart(&data), &[], &BARS);
        info!(source = Self::NAME, ticker = %ticker, rows = table.len(), "daily bars fetched");
        Ok(table)
    }

    async fn fetch_fundamentals(&self, _req: &FetchRequest) -> Result<FetchOutput, SourceError> {
        debug!(source = Self::NAME, "fundamentals unsupported");
        Ok(FetchOutput::PerSymbol(BTreeMap::new()))
    }

    async fn fetch_moneyflow(&self, _req: &FetchRequest) -> Result<FetchOutput, SourceError> {
        debug!(source = Self::NAME, "money flow unsupported");
        Ok(FetchOutput::PerSymbol(BTreeMap::new()))
    }

    async fn fetch_spot(&self, req: &FetchRequest) -> Result<Table, SourceError> {
        let today = Local::now().date_naive();
        let mut out = Table::new();
        for symbol in &req.symbols {
            let ticker = yahoo_ticker(symbol, req.segment);
            let data = self.chart(&ticker, today - chrono::Duration::days(5), today).await?;
            if let Some(meta) = data.meta.as_ref() {
                out.append(spot_from_meta(symbol, meta));
            }
        }
        Ok(out)
    }
}
