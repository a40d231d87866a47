//! Eastmoney public quote endpoints: the free A-share fallback.

use super::http::{check_status, with_timeout};
use super::provider::{DataSource, FetchOutput, SourceError};
use super::retry::RetryPolicy;
use super::standardize::{self, BARS, FLOW, SPOT};
use crate::domain::{FetchRequest, Operation, Row, Table, Value};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const HIST_BASE: &str = "https://push2his.eastmoney.com";
const LIVE_BASE: &str = "https://push2.eastmoney.com";

/// f51..f57 of the kline endpoint.
const KLINE_COLUMNS: &[&str] = &["date", "open", "close", "high", "low", "volume", "amount"];
/// f51..f56 of the fund-flow endpoint.
const FFLOW_COLUMNS: &[&str] = &["date", "main_net_amount", "small_net", "medium_net", "large_net", "super_net"];
const SPOT_RENAMES: &[(&str, &str)] = &[
    ("f12", "symbol"),
    ("f14", "name"),
    ("f2", "latest_price"),
    ("f3", "change_pct"),
    ("f5", "volume"),
];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    rc: i64,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    #[serde(default)]
    diff: Vec<BTreeMap<String, serde_json::Value>>,
}

pub struct EastmoneySource {
    client: Client,
    hist_base: String,
    live_base: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl EastmoneySource {
    pub const NAME: &'static str = "eastmoney";

    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            hist_base: HIST_BASE.to_string(),
            live_base: LIVE_BASE.to_string(),
            retry,
            timeout: Duration::from_secs(30),
        }
    }

    /// 3 attempts, 2s→10s.
    pub fn default_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(10))
    }

    pub fn with_base_urls(mut self, hist: impl Into<String>, live: impl Into<String>) -> Self {
        self.hist_base = hist.into();
        self.live_base = live.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn get<T: DeserializeOwned>(&self, what: &str, url: &str, query: &[(&str, String)]) -> Result<Option<T>, SourceError> {
        self.retry
            .run(Self::NAME, what, |_| async move {
                let resp = self
                    .client
                    .get(url)
                    .query(query)
                    .send()
                    .await
                    .map_err(|e| with_timeout(e, self.timeout))?;
                let env: Envelope<T> = check_status(resp)?
                    .json()
                    .await
                    .map_err(|e| SourceError::ResponseFormatChanged(format!("eastmoney {what}: {e}")))?;
                if env.rc != 0 {
                    return Err(SourceError::Upstream {
                        code: env.rc,
                        message: format!("eastmoney {what}"),
                    });
                }
                Ok(env.data)
            })
            .await
    }

    fn range_query(req: &FetchRequest) -> Vec<(&'static str, String)> {
        let beg = req.start.map_or_else(|| "0".to_string(), |d| d.format("%Y%m%d").to_string());
        let end = req.end.map_or_else(|| "20500101".to_string(), |d| d.format("%Y%m%d").to_string());
        vec![("beg", beg), ("end", end)]
    }

    async fn flow_for(&self, symbol: &str) -> Result<Table, SourceError> {
        let url = format!("{}/api/qt/stock/fflow/daykline/get", self.hist_base);
        let query = [
            ("secid", secid(symbol)),
            ("lmt", "0".to_string()),
            ("klt", "101".to_string()),
            ("fields1", "f1,f2,f3,f7".to_string()),
            ("fields2", "f51,f52,f53,f54,f55,f56".to_string()),
        ];
        let data: Option<KlineData> = self.get("fflow", &url, &query).await?;
        let raw = data.map(|d| parse_klines(&d.klines, FFLOW_COLUMNS)).unwrap_or_default();
        Ok(standardize::standardize(Self::NAME, derive_retail(raw), &[], &FLOW))
    }
}

/// Market-prefixed id: Shanghai codes (`6xxxxx`) → `1.`, everything else → `0.`.
pub fn secid(symbol: &str) -> String {
    let code = symbol.split('.').next().unwrap_or(symbol);
    if code.starts_with('6') || code.starts_with('5') {
        format!("1.{code}")
    } else {
        format!("0.{code}")
    }
}

/// Split comma-joined kline strings into rows using positional column names.
fn parse_klines(lines: &[String], columns: &[&str]) -> Table {
    lines
        .iter()
        .map(|line| {
            columns
                .iter()
                .zip(line.split(','))
                .map(|(c, v)| ((*c).to_string(), Value::from(v)))
                .collect::<Row>()
        })
        .collect()
}

fn derive_retail(raw: Table) -> Table {
    raw.into_rows()
        .into_iter()
        .map(|mut r| {
            let small = r.get("small_net").and_then(standardize::number);
            let medium = r.get("medium_net").and_then(standardize::number);
            let retail = small.zip(medium).map(|(a, b)| a + b);
            r.insert("retail_net_amount".into(), Value::from(retail));
            r
        })
        .collect()
}

#[async_trait]
impl DataSource for EastmoneySource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, op: Operation) -> bool {
        !matches!(op, Operation::Fundamentals)
    }

    async fn fetch_daily(&self, req: &FetchRequest) -> Result<Table, SourceError> {
        let Some(symbol) = req.symbol() else {
            return Ok(Table::new());
        };
        let url = format!("{}/api/qt/stock/kline/get", self.hist_base);
        let mut query = vec![
            ("secid", secid(symbol)),
            ("klt", "101".to_string()),
            // forward-adjusted unless the caller asks otherwise
            ("fqt", req.param("fqt").unwrap_or("1").to_string()),
            ("fields1", "f1,f2,f3,f4,f5,f6".to_string()),
            ("fields2", "f51,f52,f53,f54,f55,f56,f57".to_string()),
        ];
        query.extend(Self::range_query(req));

        let data: Option<KlineData> = self.get("kline", &url, &query).await?;
        let Some(data) = data else {
            return Err(SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        };
        let table = standardize::standardize(Self::NAME, parse_klines(&data.klines, KLINE_COLUMNS), &[], &BARS);
        info!(source = Self::NAME, symbol, rows = table.len(), "daily bars fetched");
        Ok(table)
    }

    async fn fetch_fundamentals(&self, _req: &FetchRequest) -> Result<FetchOutput, SourceError> {
        debug!(source = Self::NAME, "fundamentals unsupported");
        Ok(FetchOutput::PerSymbol(BTreeMap::new()))
    }

    async fn fetch_moneyflow(&self, req: &FetchRequest) -> Result<FetchOutput, SourceError> {
        let mut out = BTreeMap::new();
        for symbol in &req.symbols {
            let table = match self.flow_for(symbol).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(source = Self::NAME, symbol = %symbol, error = %e, "money flow failed");
                    Table::new()
                }
            };
            let table = match (req.start, req.end) {
                (Some(s), Some(e)) => table.between(s, e),
                _ => table,
            };
            out.insert(symbol.clone(), table);
        }
        Ok(FetchOutput::PerSymbol(out))
    }

    async fn fetch_spot(&self, req: &FetchRequest) -> Result<Table, SourceError> {
        if req.symbols.is_empty() {
            return Ok(Table::new());
        }
        let url = format!("{}/api/qt/ulist.np/get", self.live_base);
        let secids = req.symbols.iter().map(|s| secid(s)).collect::<Vec<_>>().join(",");
        let query = [("secids", secids), ("fields", "f2,f3,f5,f12,f14".to_string())];
        let data: Option<SpotData> = self.get("spot", &url, &query).await?;
        let raw: Table = data
            .map(|d| {
                d.diff
                    .iter()
                    .map(|item| item.iter().map(|(k, v)| (k.clone(), standardize::json_to_value(v))).collect::<Row>())
                    .collect()
            })
            .unwrap_or_default();
        Ok(standardize::standardize(Self::NAME, raw, SPOT_RENAMES, &SPOT))
    }
}
