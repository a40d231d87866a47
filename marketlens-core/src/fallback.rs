//! Latest-trading-date datasets with graceful regression to earlier dates.
//!
//! Datasets published once per session are requested "as of the latest trading
//! date". Publication lags, so `DateFallbackFetcher` walks back one calendar day
//! at a time, trying the cache and then the upstream for each candidate date.

use crate::cache::CacheStore;
use crate::data::SourceError;
use crate::domain::{row, Table, Value};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache key holding the resolved latest trading date.
pub const LATEST_TRADE_DATE_KEY: &str = "global:latest_trade_date";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A dataset fetched through the date fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    /// Cache key base.
    pub key: String,
    pub ttl_secs: u64,
    /// Per-day datasets get `:{YYYYMMDD}` appended to the key.
    #[serde(default)]
    pub date_partitioned: bool,
}

impl DatasetSpec {
    pub fn new(name: impl Into<String>, key: impl Into<String>, ttl_secs: u64, date_partitioned: bool) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            ttl_secs,
            date_partitioned,
        }
    }

    pub fn cache_key(&self, date: NaiveDate) -> String {
        if self.date_partitioned {
            format!("{}:{}", self.key, date.format("%Y%m%d"))
        } else {
            self.key.clone()
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Live lookup of the most recent trading session.
#[async_trait]
pub trait TradeDateLookup: Send + Sync {
    async fn latest_trade_date(&self, today: NaiveDate) -> Result<NaiveDate, SourceError>;
}

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

#[derive(Clone)]
pub struct DateFallbackFetcher {
    cache: CacheStore,
    lookup: Option<Arc<dyn TradeDateLookup>>,
    max_attempts: u32,
    trade_date_ttl: Duration,
    clock: Clock,
}

impl std::fmt::Debug for DateFallbackFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DateFallbackFetcher")
            .field("max_attempts", &self.max_attempts)
            .field("trade_date_ttl", &self.trade_date_ttl)
            .field("has_lookup", &self.lookup.is_some())
            .finish()
    }
}

impl DateFallbackFetcher {
    pub fn new(cache: CacheStore, lookup: Option<Arc<dyn TradeDateLookup>>) -> Self {
        Self {
            cache,
            lookup,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            trade_date_ttl: Duration::from_secs(24 * 3600),
            clock: Arc::new(|| Local::now().date_naive()),
        }
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_trade_date_ttl(mut self, ttl: Duration) -> Self {
        self.trade_date_ttl = ttl;
        self
    }

    /// Override "today" (tests, replays).
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Cached latest trading date; on a miss, ask the lookup and cache its answer.
    /// Falls back to today's calendar date when the lookup is missing or fails.
    pub async fn latest_trade_date(&self) -> NaiveDate {
        if let Some(cached) = self
            .cache
            .read_rows(LATEST_TRADE_DATE_KEY)
            .await
            .and_then(|t| t.last_date())
        {
            debug!(date = %cached, "latest trading date from cache");
            return cached;
        }

        let today = (self.clock)();
        let Some(lookup) = self.lookup.as_ref() else {
            return today;
        };
        match lookup.latest_trade_date(today).await {
            Ok(date) => {
                let t = Table::from_rows(vec![row([("date", Value::Date(date))])]);
                self.cache.write_rows(LATEST_TRADE_DATE_KEY, &t, self.trade_date_ttl).await;
                info!(date = %date, "resolved latest trading date");
                date
            }
            Err(e) => {
                warn!(error = %e, fallback = %today, "trading date lookup failed, using calendar date");
                today
            }
        }
    }

    /// Cache, then live fetch, for the latest date and up to `max_attempts - 1`
    /// earlier days. Never fails: an empty table means "unavailable".
    pub async fn get_or_fetch<F, Fut, E>(&self, spec: &DatasetSpec, mut fetch: F) -> Table
    where
        F: FnMut(NaiveDate) -> Fut,
        Fut: Future<Output = Result<Table, E>>,
        E: Display,
    {
        let latest = self.latest_trade_date().await;

        for i in 0..self.max_attempts {
            let candidate = latest - ChronoDuration::days(i64::from(i));
            let key = spec.cache_key(candidate);

            if let Some(cached) = self.cache.read_rows(&key).await {
                debug!(dataset = %spec.name, key = %key, "served from cache");
                return cached;
            }

            match fetch(candidate).await {
                Ok(t) if !t.is_empty() => {
                    self.cache.write_rows(&key, &t, spec.ttl()).await;
                    info!(dataset = %spec.name, date = %candidate, rows = t.len(), "fetched");
                    return t;
                }
                Ok(_) => debug!(dataset = %spec.name, date = %candidate, "no data for date, trying earlier"),
                Err(e) => warn!(dataset = %spec.name, date = %candidate, error = %e, "fetch failed, trying earlier"),
            }
        }

        warn!(dataset = %spec.name, attempts = self.max_attempts, "no data within fallback window");
        Table::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    struct FixedLookup(Result<NaiveDate, ()>, AtomicU32);

    #[async_trait]
    impl TradeDateLookup for FixedLookup {
        async fn latest_trade_date(&self, _today: NaiveDate) -> Result<NaiveDate, SourceError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0.map_err(|_| SourceError::NetworkUnreachable("down".into()))
        }
    }

    fn fetcher(lookup: FixedLookup) -> (DateFallbackFetcher, Arc<FixedLookup>) {
        let lookup = Arc::new(lookup);
        let f = DateFallbackFetcher::new(CacheStore::in_memory(), Some(lookup.clone() as Arc<dyn TradeDateLookup>))
            .with_clock(|| d(20));
        (f, lookup)
    }

    fn limit_list(date: NaiveDate) -> Table {
        Table::from_rows(vec![row([("trade_date", Value::Date(date)), ("ts_code", Value::from("600519.SH"))])])
    }

    #[tokio::test]
    async fn trade_date_is_cached_after_lookup() {
        let (f, lookup) = fetcher(FixedLookup(Ok(d(14)), AtomicU32::new(0)));
        assert_eq!(f.latest_trade_date().await, d(14));
        assert_eq!(f.latest_trade_date().await, d(14));
        assert_eq!(lookup.1.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_lookup_falls_back_to_today() {
        let (f, _) = fetcher(FixedLookup(Err(()), AtomicU32::new(0)));
        assert_eq!(f.latest_trade_date().await, d(20));
    }

    #[tokio::test]
    async fn regresses_two_days_within_three_attempts() {
        let (f, _) = fetcher(FixedLookup(Ok(d(14)), AtomicU32::new(0)));
        let spec = DatasetSpec::new("limit_list_d", "limit_list_d", 3600, true);
        let t = f
            .get_or_fetch(&spec, |date| async move {
                if date == d(12) {
                    Ok(limit_list(date))
                } else {
                    Err("not published")
                }
            })
            .await;
        assert_eq!(t.len(), 1);
        assert!(f.cache.read_rows("limit_list_d:20240612").await.is_some());
        assert!(f.cache.read_rows("limit_list_d:20240614").await.is_none());
    }

    #[tokio::test]
    async fn two_attempts_do_not_reach_two_days_back() {
        let (f, _) = fetcher(FixedLookup(Ok(d(14)), AtomicU32::new(0)));
        let f = f.with_max_attempts(2);
        let spec = DatasetSpec::new("limit_list_d", "limit_list_d", 3600, true);
        let t = f
            .get_or_fetch(&spec, |date| async move {
                if date == d(12) {
                    Ok(limit_list(date))
                } else {
                    Err("not published")
                }
            })
            .await;
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn cached_dataset_skips_fetch() {
        let (f, _) = fetcher(FixedLookup(Ok(d(14)), AtomicU32::new(0)));
        let spec = DatasetSpec::new("industry_flow", "global:moneyflow_ind", 3600, false);
        f.cache.write_rows(&spec.cache_key(d(14)), &limit_list(d(14)), spec.ttl()).await;

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let t = f
            .get_or_fetch(&spec, move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Table::new())
            })
            .await;
        assert_eq!(t.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn only_partitioned_keys_get_a_date_suffix() {
        let daily = DatasetSpec::new("limit", "limit_list_d", 60, true);
        let whole = DatasetSpec::new("ind", "global:moneyflow_ind", 60, false);
        assert_eq!(daily.cache_key(d(3)), "limit_list_d:20240603");
        assert_eq!(whole.cache_key(d(3)), "global:moneyflow_ind");
    }
}
