//! Tushare Pro source: the metered, quota-limited upstream for A-shares and funds.
//!
//! One instance is built at wiring time and shared through the registry; its
//! `QuotaTracker` is therefore process-wide. Every call reserves quota before it
//! goes out.

use super::http::{check_status, with_timeout};
use super::provider::{DataSource, FetchOutput, SourceError};
use super::quota::QuotaTracker;
use super::retry::RetryPolicy;
use super::standardize::{self, table_from_columns, BARS, FLOW, FUNDAMENTALS};
use crate::domain::{FetchRequest, Operation, Row, Table, Value};
use crate::fallback::TradeDateLookup;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "http://api.tushare.pro";

const DAILY_RENAMES: &[(&str, &str)] = &[("trade_date", "date"), ("vol", "volume")];
const FINA_RENAMES: &[(&str, &str)] = &[
    ("end_date", "report_date"),
    ("total_revenue", "revenue"),
    ("netprofit_yoy", "np_yoy"),
    ("or_yoy", "revenue_yoy"),
    ("grossprofit_margin", "gross_margin"),
    ("basic_eps", "eps"),
];
const FLOW_RENAMES: &[(&str, &str)] = &[("trade_date", "date")];

#[derive(Debug, Deserialize)]
struct TushareResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<TushareData>,
}

#[derive(Debug, Deserialize)]
struct TushareData {
    fields: Vec<String>,
    items: Vec<Vec<serde_json::Value>>,
}

pub struct TushareSource {
    client: Client,
    endpoint: String,
    token: String,
    quota: QuotaTracker,
    retry: RetryPolicy,
    timeout: Duration,
}

impl TushareSource {
    pub const NAME: &'static str = "tushare";

    pub fn new(client: Client, token: impl Into<String>, quota: QuotaTracker, retry: RetryPolicy) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: token.into(),
            quota,
            retry,
            timeout: Duration::from_secs(30),
        }
    }

    /// 3 attempts, 3s→15s.
    pub fn default_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(3), Duration::from_secs(15))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A cross-sectional dataset published per session (`limit_list_d`,
    /// `moneyflow_ind_ths`, ...), as returned by the API.
    pub async fn trade_date_dataset(&self, api_name: &str, date: NaiveDate) -> Result<Table, SourceError> {
        let params = json!({ "trade_date": date.format("%Y%m%d").to_string() });
        self.query(api_name, params).await
    }

    async fn query(&self, api_name: &str, params: serde_json::Value) -> Result<Table, SourceError> {
        self.retry
            .run(Self::NAME, api_name, |_| self.query_once(api_name, &params))
            .await
    }

    async fn query_once(&self, api_name: &str, params: &serde_json::Value) -> Result<Table, SourceError> {
        if self.token.is_empty() {
            return Err(SourceError::AuthenticationRequired("tushare token not configured".into()));
        }
        let remaining = self.quota.acquire()?;
        debug!(api_name, ?remaining, "calling tushare");

        let body = json!({
            "api_name": api_name,
            "token": self.token,
            "params": params,
            "fields": "",
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| with_timeout(e, self.timeout))?;
        let payload: TushareResponse = check_status(resp)?
            .json()
            .await
            .map_err(|e| SourceError::ResponseFormatChanged(format!("tushare {api_name}: {e}")))?;
        parse_response(api_name, payload)
    }

    fn range_params(symbol: &str, req: &FetchRequest) -> serde_json::Value {
        let mut params = json!({ "ts_code": ts_code(symbol) });
        if let Some(start) = req.start {
            params["start_date"] = json!(start.format("%Y%m%d").to_string());
        }
        if let Some(end) = req.end {
            params["end_date"] = json!(end.format("%Y%m%d").to_string());
        }
        params
    }

    /// Run one per-symbol query for every requested symbol.
    ///
    /// Individual failures become empty tables; if every symbol failed the last
    /// error is returned so the manager can fall back.
    async fn per_symbol<F>(&self, req: &FetchRequest, api_name: &str, shape: F) -> Result<FetchOutput, SourceError>
    where
        F: Fn(Table) -> Table,
    {
        let mut out = BTreeMap::new();
        let mut last_err = None;
        for symbol in &req.symbols {
            match self.query(api_name, Self::range_params(symbol, req)).await {
                Ok(raw) => {
                    out.insert(symbol.clone(), shape(raw));
                }
                Err(e) if e.is_quota_exhausted() => return Err(e),
                Err(e) => {
                    warn!(source = Self::NAME, api_name, symbol = %symbol, error = %e, "per-symbol query failed");
                    out.insert(symbol.clone(), Table::new());
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) if out.values().all(Table::is_empty) => Err(e),
            _ => Ok(FetchOutput::PerSymbol(out)),
        }
    }
}

/// `600519` → `600519.SH`; codes that already carry an exchange suffix pass through.
pub fn ts_code(symbol: &str) -> String {
    if symbol.contains('.') {
        return symbol.to_ascii_uppercase();
    }
    let exchange = match symbol.chars().next() {
        Some('6' | '5' | '9') => "SH",
        Some('4' | '8') => "BJ",
        _ => "SZ",
    };
    format!("{symbol}.{exchange}")
}

fn parse_response(api_name: &str, payload: TushareResponse) -> Result<Table, SourceError> {
    let msg = payload.msg.unwrap_or_default();
    match payload.code {
        0 => {}
        40203 => return Err(SourceError::Busy(msg)),
        40001 | 40101 | -2001 => return Err(SourceError::AuthenticationRequired(msg)),
        code => return Err(SourceError::Upstream { code, message: msg }),
    }
    let data = payload
        .data
        .ok_or_else(|| SourceError::ResponseFormatChanged(format!("tushare {api_name}: no data block")))?;
    Ok(table_from_columns(&data.fields, &data.items))
}

/// Main force = extra-large + large net; retail = small + medium net.
fn derive_flow(raw: Table) -> Table {
    let net = |r: &Row, size: &str| -> Option<f64> {
        let buy = r.get(&format!("buy_{size}_amount")).and_then(standardize::number)?;
        let sell = r.get(&format!("sell_{size}_amount")).and_then(standardize::number)?;
        Some(buy - sell)
    };
    raw.into_rows()
        .into_iter()
        .map(|mut r| {
            let main = net(&r, "elg").zip(net(&r, "lg")).map(|(a, b)| a + b);
            let retail = net(&r, "sm").zip(net(&r, "md")).map(|(a, b)| a + b);
            r.insert("main_net_amount".into(), Value::from(main));
            r.insert("retail_net_amount".into(), Value::from(retail));
            r
        })
        .collect()
}

#[async_trait]
impl DataSource for TushareSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, op: Operation) -> bool {
        !matches!(op, Operation::Spot)
    }

    async fn fetch_daily(&self, req: &FetchRequest) -> Result<Table, SourceError> {
        let Some(symbol) = req.symbol() else {
            return Ok(Table::new());
        };
        let api_name = if req.segment.is_fund() { "fund_daily" } else { "daily" };
        let raw = self.query(api_name, Self::range_params(symbol, req)).await?;
        let table = standardize::standardize(Self::NAME, raw, DAILY_RENAMES, &BARS);
        info!(source = Self::NAME, symbol, rows = table.len(), "daily bars fetched");
        Ok(table)
    }

    async fn fetch_fundamentals(&self, req: &FetchRequest) -> Result<FetchOutput, SourceError> {
        self.per_symbol(req, "fina_indicator", |raw| {
            standardize::standardize(Self::NAME, raw, FINA_RENAMES, &FUNDAMENTALS)
        })
        .await
    }

    async fn fetch_moneyflow(&self, req: &FetchRequest) -> Result<FetchOutput, SourceError> {
        self.per_symbol(req, "moneyflow", |raw| {
            standardize::standardize(Self::NAME, derive_flow(raw), FLOW_RENAMES, &FLOW)
        })
        .await
    }

    async fn fetch_spot(&self, _req: &FetchRequest) -> Result<Table, SourceError> {
        debug!(source = Self::NAME, "spot quotes unsupported");
        Ok(Table::new())
    }
}

#[async_trait]
impl TradeDateLookup for TushareSource {
    /// Most recent open SSE session on or before `today`.
    async fn latest_trade_date(&self, today: NaiveDate) -> Result<NaiveDate, SourceError> {
        let params = json!({
            "exchange": "SSE",
            "start_date": (today - ChronoDuration::days(30)).format("%Y%m%d").to_string(),
            "end_date": today.format("%Y%m%d").to_string(),
            "is_open": "1",
        });
        let cal = self.query("trade_cal", params).await?;
        cal.rows()
            .iter()
            .filter(|r| r.get("is_open").and_then(standardize::number).map_or(true, |v| v == 1.0))
            .filter_map(|r| r.get("cal_date").and_then(standardize::parse_date))
            .filter(|d| *d <= today)
            .max()
            .ok_or_else(|| SourceError::ResponseFormatChanged("trade_cal returned no open sessions".into()))
    }
}
