//! Daily call quota for metered upstreams.

use super::provider::SourceError;
use chrono::{Local, NaiveDate};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug)]
struct Usage {
    day: NaiveDate,
    used: u64,
}

/// Counts calls against a per-day limit; the counter resets on a new calendar day.
#[derive(Debug)]
pub struct QuotaTracker {
    source: String,
    /// `None` means unmetered.
    daily_limit: Option<u64>,
    low_threshold: u64,
    usage: Mutex<Usage>,
}

impl QuotaTracker {
    pub fn new(source: impl Into<String>, daily_limit: Option<u64>, low_threshold: u64) -> Self {
        Self {
            source: source.into(),
            daily_limit,
            low_threshold,
            usage: Mutex::new(Usage {
                day: Local::now().date_naive(),
                used: 0,
            }),
        }
    }

    /// Reserve one call for today.
    pub fn acquire(&self) -> Result<Option<u64>, SourceError> {
        self.acquire_on(Local::now().date_naive())
    }

    /// Reserve one call on `today`; returns the calls remaining after this one.
    ///
    /// Warns when the remainder drops to the low threshold and fails fast with
    /// `QuotaExhausted` once nothing is left.
    pub fn acquire_on(&self, today: NaiveDate) -> Result<Option<u64>, SourceError> {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        if usage.day != today {
            debug!(source = %self.source, "quota counter reset for new day");
            usage.day = today;
            usage.used = 0;
        }
        let Some(limit) = self.daily_limit else {
            usage.used += 1;
            return Ok(None);
        };

        let remaining = limit.saturating_sub(usage.used);
        if remaining == 0 {
            return Err(SourceError::QuotaExhausted {
                source_name: self.source.clone(),
                used: usage.used,
                limit,
            });
        }
        usage.used += 1;
        let left = remaining - 1;
        if left <= self.low_threshold {
            warn!(source = %self.source, remaining = left, "quota running low");
        }
        Ok(Some(left))
    }

    pub fn used_today(&self) -> u64 {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner).used
    }
}
