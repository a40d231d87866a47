//! Market segments: the routing key for data sources and default parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A class of tradable instruments that share data-source routing and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MarketSegment {
    /// Domestic (mainland China) A-share equities.
    #[serde(rename = "A")]
    AShare,
    #[serde(rename = "HK")]
    HongKong,
    #[serde(rename = "US")]
    UnitedStates,
    #[serde(rename = "JP")]
    Japan,
    #[serde(rename = "IN")]
    India,
    #[serde(rename = "CRYPTO")]
    Crypto,
    #[serde(rename = "ETF")]
    Etf,
    #[serde(rename = "LOF")]
    Lof,
}

#[derive(Debug, Error)]
#[error("unknown market segment '{0}' (valid: A, HK, US, JP, IN, CRYPTO, ETF, LOF)")]
pub struct UnknownSegment(pub String);

impl MarketSegment {
    pub const ALL: [MarketSegment; 8] = [
        MarketSegment::AShare,
        MarketSegment::HongKong,
        MarketSegment::UnitedStates,
        MarketSegment::Japan,
        MarketSegment::India,
        MarketSegment::Crypto,
        MarketSegment::Etf,
        MarketSegment::Lof,
    ];

    /// Short code used in config files and cache keys.
    pub fn code(&self) -> &'static str {
        match self {
            MarketSegment::AShare => "A",
            MarketSegment::HongKong => "HK",
            MarketSegment::UnitedStates => "US",
            MarketSegment::Japan => "JP",
            MarketSegment::India => "IN",
            MarketSegment::Crypto => "CRYPTO",
            MarketSegment::Etf => "ETF",
            MarketSegment::Lof => "LOF",
        }
    }

    /// Exchange-traded and listed open-ended funds use the fund endpoints.
    pub fn is_fund(&self) -> bool {
        matches!(self, MarketSegment::Etf | MarketSegment::Lof)
    }
}

impl fmt::Display for MarketSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MarketSegment {
    type Err = UnknownSegment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "CN" | "ASHARE" => Ok(MarketSegment::AShare),
            "HK" => Ok(MarketSegment::HongKong),
            "US" => Ok(MarketSegment::UnitedStates),
            "JP" => Ok(MarketSegment::Japan),
            "IN" => Ok(MarketSegment::India),
            "CRYPTO" => Ok(MarketSegment::Crypto),
            "ETF" => Ok(MarketSegment::Etf),
            "LOF" => Ok(MarketSegment::Lof),
            _ => Err(UnknownSegment(s.to_string())),
        }
    }
}
