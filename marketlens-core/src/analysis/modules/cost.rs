//! Holder cost approximated by short and medium moving averages.

use super::{fmt2, technical::TechnicalAnalyzer};
use crate::analysis::module::{json_number, AnalysisContext, AnalysisError, AnalysisInput, AnalysisModule, ModuleOutput};
use crate::indicators::{last_valid, Indicator, Sma};
use serde_json::json;

const SHORT_COST_PERIOD: usize = 5;
const MEDIUM_COST_PERIOD: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct CostAnalyzer;

impl CostAnalyzer {
    pub const NAME: &'static str = "CostAnalyzer";
}

fn profit_status(price: f64, cost: Option<f64>) -> &'static str {
    match cost {
        Some(c) if price > c => "profit",
        Some(c) if price < c => "loss",
        Some(_) => "flat",
        None => "n/a",
    }
}

impl AnalysisModule for CostAnalyzer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn analyze(&self, input: &AnalysisInput, ctx: &AnalysisContext) -> Result<ModuleOutput, AnalysisError> {
        let closes = input.closes();
        let price = input
            .latest_price
            .or_else(|| ctx.get(TechnicalAnalyzer::NAME).and_then(|t| t.field_f64("latest_close")))
            .ok_or_else(|| AnalysisError::MissingData("latest price".into()))?;
        if closes.is_empty() {
            return Err(AnalysisError::MissingData("daily bars".into()));
        }

        let short = last_valid(&Sma::new(SHORT_COST_PERIOD).compute(&closes));
        let medium = last_valid(&Sma::new(MEDIUM_COST_PERIOD).compute(&closes));

        let mut out = ModuleOutput::new();
        out.fragment("Cost:");
        for (label, period, cost) in [("Short-term", SHORT_COST_PERIOD, short), ("Medium-term", MEDIUM_COST_PERIOD, medium)] {
            let Some(c) = cost else {
                out.neutral(format!("{label} cost unavailable"));
                continue;
            };
            let status = profit_status(price, cost);
            out.fragment(format!("  {label} cost (MA{period}): {}, holders in {status}.", fmt2(c)));
            match status {
                "profit" => out.bullish(format!("Price above {} cost", label.to_lowercase())),
                "loss" => out.bearish(format!("Price below {} cost", label.to_lowercase())),
                _ => out.neutral(format!("Price at {} cost", label.to_lowercase())),
            }
        }

        out.set(
            "cost_analysis",
            json!({
                "short_term_cost_approx": json_number(short),
                "medium_term_cost_approx": json_number(medium),
                "current_price": json_number(Some(price)),
                "short_term_profit_status": profit_status(price, short),
                "medium_term_profit_status": profit_status(price, medium),
            }),
        );
        Ok(out)
    }
}
