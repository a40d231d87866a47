//! Binance public REST source for crypto pairs.

use super::http::{check_status, with_timeout};
use super::provider::{DataSource, FetchOutput, SourceError};
use super::retry::RetryPolicy;
use super::standardize::{self, BARS, SPOT};
use crate::domain::{row, FetchRequest, Operation, Table, Value};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BASE: &str = "https://api.binance.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    price_change_percent: String,
    volume: String,
}

pub struct BinanceSource {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl BinanceSource {
    pub const NAME: &'static str = "binance";

    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE.to_string(),
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

    async fn get<T: DeserializeOwned>(&self, what: &str, path: &str, query: &[(&str, String)]) -> Result<T, SourceError> {
        let url = format!("{}{path}", self.base_url);
        self.retry
            .run(Self::NAME, what, |_| {
                let url = &url;
                async move {
                    let resp = self
                        .client
                        .get(url)
                        .query(query)
                        .send()
                        .await
                        .map_err(|e| with_timeout(e, self.timeout))?;
                    check_status(resp)?
                        .json::<T>()
                        .await
                        .map_err(|e| SourceError::ResponseFormatChanged(format!("binance {what}: {e}")))
                }
            })
            .await
    }
}

/// `BTC/USDT`, `btc-usdt` and `BTCUSDT` all become `BTCUSDT`.
pub fn pair(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Kline arrays: `[open_time, open, high, low, close, volume, close_time, quote_volume, ...]`.
fn bars_from_klines(klines: &[Vec<serde_json::Value>]) -> Table {
    klines
        .iter()
        .filter(|k| k.len() >= 8)
        .map(|k| {
            let cell = |i: usize| standardize::json_to_value(&k[i]);
            row([
                ("date", cell(0)),
                ("open", cell(1)),
                ("high", cell(2)),
                ("low", cell(3)),
                ("close", cell(4)),
                ("volume", cell(5)),
                ("amount", cell(7)),
            ])
        })
        .collect()
}

fn spot_from_ticker(t: &Ticker24h) -> Table {
    let raw = row([
        ("symbol", Value::from(t.symbol.as_str())),
        ("name", Value::from(t.symbol.as_str())),
        ("latest_price", Value::from(t.last_price.as_str())),
        ("change_pct", Value::from(t.price_change_percent.as_str())),
        ("volume", Value::from(t.volume.as_str())),
    ]);
    standardize::standardize(BinanceSource::NAME, Table::from_rows(vec![raw]), &[], &SPOT)
}

#[async_trait]
impl DataSource for BinanceSource {
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
        let symbol = pair(symbol);
        let mut query = vec![
            ("symbol", symbol.clone()),
            ("interval", "1d".to_string()),
            ("limit", "1000".to_string()),
        ];
        if let Some(ms) = req.start.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            query.push(("startTime", ms.and_utc().timestamp_millis().to_string()));
        }
        if let Some(ms) = req.end.and_then(|d| d.and_hms_opt(23, 59, 59)) {
            query.push(("endTime", ms.and_utc().timestamp_millis().to_string()));
        }
        let klines: Vec<Vec<serde_json::Value>> = self.get("klines", "/api/v3/klines", &query).await?;
        let table = standardize::standardize(Self::NAME, bars_from_klines(&klines), &[], &BARS);
        info!(source = Self::NAME, symbol = %symbol, rows = table.len(), "daily bars fetched");
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
        let mut out = Table::new();
        for symbol in &req.symbols {
            let query = [("symbol", pair(symbol))];
            let ticker: Ticker24h = self.get("ticker", "/api/v3/ticker/24hr", &query).await?;
            out.append(spot_from_ticker(&ticker));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn pair_normalization() {
        assert_eq!(pair("BTC/USDT"), "BTCUSDT");
        assert_eq!(pair("eth-usdt"), "ETHUSDT");
        assert_eq!(pair("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn klines_parse_epoch_millis_and_string_prices() {
        let klines: Vec<Vec<serde_json::Value>> = serde_json::from_str(
            r#"[[1704153600000,"42283.58","44184.10","42180.77","44179.55","27174.29",1704239999999,"1178453922.1",1000,"1","1","0"],
                [1704067200000,"42283.58","42554.57","41800.00","42283.58","1.5",1704153599999,"6.3e7",900,"1","1","0"]]"#,
        )
        .unwrap();
        let bars = standardize::standardize("binance", bars_from_klines(&klines), &[], &BARS);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars.rows()[0]["date"], Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert_eq!(bars.last_f64("close"), Some(44179.55));
        assert_eq!(bars.last_f64("amount"), Some(1178453922.1));
    }

    #[test]
    fn ticker_becomes_spot_row() {
        let t: Ticker24h = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","lastPrice":"64000.10","priceChangePercent":"-1.250","volume":"12345.6","openPrice":"64800"}"#,
        )
        .unwrap();
        let spot = spot_from_ticker(&t);
        assert_eq!(spot.rows()[0]["change_pct"], Value::Number(-1.25));
        assert_eq!(spot.rows()[0]["symbol"].as_str(), Some("BTCUSDT"));
    }
}
