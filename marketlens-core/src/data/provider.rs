//! DataSource capability and structured source errors.
//!
//! A source fetches one category of data from one upstream. Sources know nothing
//! about the cache or about each other; fallback between them is the manager's job.

use crate::domain::{FetchRequest, Operation, Table};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors a single upstream call can produce.
///
/// All of these are soft failures from the manager's point of view; the variant
/// decides whether the source retries internally first.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream returned HTTP {status}")]
    Http { status: u16 },

    #[error("upstream busy: {0}")]
    Busy(String),

    #[error("quota exhausted for {source_name} (used {used} of {limit})")]
    QuotaExhausted {
        source_name: String,
        used: u64,
        limit: u64,
    },

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("upstream error {code}: {message}")]
    Upstream { code: i64, message: String },

    #[error("hard stop: provider has blocked requests (circuit breaker open)")]
    CircuitOpen,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl SourceError {
    /// Transient kinds that a source's retry loop may try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::NetworkUnreachable(_)
            | SourceError::Timeout { .. }
            | SourceError::RateLimited { .. }
            | SourceError::Busy(_) => true,
            SourceError::Http { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, SourceError::QuotaExhausted { .. })
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout { secs: 0 }
        } else if let Some(status) = e.status() {
            SourceError::Http {
                status: status.as_u16(),
            }
        } else if e.is_decode() {
            SourceError::ResponseFormatChanged(e.to_string())
        } else {
            SourceError::NetworkUnreachable(e.to_string())
        }
    }
}

/// What a source operation returns.
///
/// Single-symbol operations produce one table; multi-symbol operations produce one
/// table per requested symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutput {
    Table(Table),
    PerSymbol(BTreeMap<String, Table>),
}

impl FetchOutput {
    pub fn empty() -> Self {
        FetchOutput::Table(Table::new())
    }

    /// An empty table, an empty map, or a map of empty tables.
    pub fn is_empty(&self) -> bool {
        match self {
            FetchOutput::Table(t) => t.is_empty(),
            FetchOutput::PerSymbol(m) => m.values().all(Table::is_empty),
        }
    }

    /// Flatten into a single table (per-symbol tables gain a `symbol` column).
    pub fn into_table(self) -> Table {
        match self {
            FetchOutput::Table(t) => t,
            FetchOutput::PerSymbol(m) => m
                .into_iter()
                .flat_map(|(sym, t)| {
                    t.into_rows().into_iter().map(move |mut r| {
                        r.entry("symbol".to_string())
                            .or_insert_with(|| sym.clone().into());
                        r
                    })
                })
                .collect(),
        }
    }

    /// Table for one symbol, whichever shape the output has.
    pub fn table_for(&self, symbol: &str) -> Option<&Table> {
        match self {
            FetchOutput::Table(t) => Some(t),
            FetchOutput::PerSymbol(m) => m.get(symbol),
        }
    }
}

impl From<Table> for FetchOutput {
    fn from(t: Table) -> Self {
        FetchOutput::Table(t)
    }
}

/// The closed capability interface every upstream variant implements.
///
/// Unsupported operations return `Ok` with an empty result, never an error, so the
/// manager's fallback walks every source uniformly.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable name used in routes, logs and retry overrides.
    fn name(&self) -> &str;

    /// Whether this source meaningfully implements `op`.
    fn supports(&self, op: Operation) -> bool;

    async fn fetch_daily(&self, req: &FetchRequest) -> Result<Table, SourceError>;

    async fn fetch_fundamentals(&self, req: &FetchRequest) -> Result<FetchOutput, SourceError>;

    async fn fetch_moneyflow(&self, req: &FetchRequest) -> Result<FetchOutput, SourceError>;

    async fn fetch_spot(&self, req: &FetchRequest) -> Result<Table, SourceError>;

    /// Dispatch by operation; the only place an `Operation` becomes a method call.
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchOutput, SourceError> {
        match req.operation {
            Operation::Daily => self.fetch_daily(req).await.map(FetchOutput::Table),
            Operation::Fundamentals => self.fetch_fundamentals(req).await,
            Operation::Moneyflow => self.fetch_moneyflow(req).await,
            Operation::Spot => self.fetch_spot(req).await.map(FetchOutput::Table),
        }
    }
}
