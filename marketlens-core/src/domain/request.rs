//! Fetch requests and the closed set of data operations.

use super::segment::MarketSegment;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The four data capabilities every source exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Daily,
    Fundamentals,
    Moneyflow,
    Spot,
}

#[derive(Debug, Error)]
#[error("unknown operation '{0}' (valid: daily, fundamentals, moneyflow, spot)")]
pub struct UnknownOperation(pub String);

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Daily,
        Operation::Fundamentals,
        Operation::Moneyflow,
        Operation::Spot,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Daily => "daily",
            Operation::Fundamentals => "fundamentals",
            Operation::Moneyflow => "moneyflow",
            Operation::Spot => "spot",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operation names are only parsed at the configuration/CLI boundary.
impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "fetch_daily" => Ok(Operation::Daily),
            "fundamentals" | "fetch_fundamentals" => Ok(Operation::Fundamentals),
            "moneyflow" | "fetch_moneyflow" => Ok(Operation::Moneyflow),
            "spot" | "fetch_spot" => Ok(Operation::Spot),
            _ => Err(UnknownOperation(s.to_string())),
        }
    }
}

/// One call's worth of parameters. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchRequest {
    pub operation: Operation,
    pub segment: MarketSegment,
    pub symbols: Vec<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Provider-independent extra flags (e.g. `period`, `adjust`).
    pub params: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn new(operation: Operation, segment: MarketSegment, symbols: Vec<String>) -> Self {
        Self {
            operation,
            segment,
            symbols,
            start: None,
            end: None,
            params: BTreeMap::new(),
        }
    }

    pub fn single(operation: Operation, segment: MarketSegment, symbol: impl Into<String>) -> Self {
        Self::new(operation, segment, vec![symbol.into()])
    }

    pub fn with_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// First symbol, for single-symbol operations.
    pub fn symbol(&self) -> Option<&str> {
        self.symbols.first().map(String::as_str)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}
