//! Built-in analysis modules.
//!
//! Registration is explicit: configuration names modules from `BUILTIN` and
//! `builtin()` maps each name to its instance.

mod cost;
mod fundamental;
mod industry;
mod sentiment;
mod technical;

pub use cost::CostAnalyzer;
pub use fundamental::FundamentalAnalyzer;
pub use industry::IndustryAnalyzer;
pub use sentiment::MarketSentimentAnalyzer;
pub use technical::TechnicalAnalyzer;

use super::module::AnalysisModule;
use std::sync::Arc;

/// Date-fallback dataset with the day's limit-up/limit-down list.
pub const LIMIT_LIST_DATASET: &str = "limit_list_d";
/// Date-fallback dataset with per-industry money flow.
pub const INDUSTRY_FLOW_DATASET: &str = "moneyflow_ind_ths";
/// Date-fallback dataset with every stock's limit-up/limit-down prices.
pub const STK_LIMIT_DATASET: &str = "stk_limit";
/// Date-fallback dataset with institutional seats on the Dragon-Tiger list.
pub const TOP_INST_DATASET: &str = "top_inst";

pub const BUILTIN: [&str; 5] = [
    TechnicalAnalyzer::NAME,
    FundamentalAnalyzer::NAME,
    MarketSentimentAnalyzer::NAME,
    IndustryAnalyzer::NAME,
    CostAnalyzer::NAME,
];

pub fn builtin(name: &str) -> Option<Arc<dyn AnalysisModule>> {
    let module: Arc<dyn AnalysisModule> = match name {
        TechnicalAnalyzer::NAME => Arc::new(TechnicalAnalyzer),
        FundamentalAnalyzer::NAME => Arc::new(FundamentalAnalyzer),
        MarketSentimentAnalyzer::NAME => Arc::new(MarketSentimentAnalyzer),
        IndustryAnalyzer::NAME => Arc::new(IndustryAnalyzer),
        CostAnalyzer::NAME => Arc::new(CostAnalyzer),
        _ => return None,
    };
    Some(module)
}

/// `12.34` style formatting for fragments.
fn fmt2(v: f64) -> String {
    format!("{v:.2}")
}

/// Money amounts in units of 10k.
fn fmt_wan(v: f64) -> String {
    format!("{:.2}w", v / 10_000.0)
}
