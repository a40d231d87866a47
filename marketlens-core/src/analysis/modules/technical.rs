//! Moving averages, MACD, RSI and Bollinger bands over daily closes.

use super::fmt2;
use crate::analysis::module::{json_number, AnalysisContext, AnalysisError, AnalysisInput, AnalysisModule, ModuleOutput};
use crate::indicators::{last_valid, Bollinger, Indicator, Macd, Rsi, Sma};
use serde_json::json;

#[derive(Debug, Clone, Copy, Default)]
pub struct TechnicalAnalyzer;

impl TechnicalAnalyzer {
    pub const NAME: &'static str = "TechnicalAnalyzer";
}

impl AnalysisModule for TechnicalAnalyzer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn analyze(&self, input: &AnalysisInput, _ctx: &AnalysisContext) -> Result<ModuleOutput, AnalysisError> {
        let p = input.params;
        p.validate().map_err(AnalysisError::Failed)?;

        let closes = input.closes();
        let latest_close = closes
            .iter()
            .rev()
            .copied()
            .find(|c| c.is_finite())
            .ok_or_else(|| AnalysisError::MissingData("daily bars".into()))?;

        let ma_short = last_valid(&Sma::new(p.ma_short).compute(&closes));
        let ma_medium = last_valid(&Sma::new(p.ma_medium).compute(&closes));
        let macd_hist = last_valid(&Macd::histogram(p.macd_fast, p.macd_slow, p.macd_signal).compute(&closes));
        let rsi = last_valid(&Rsi::new(p.rsi_period).compute(&closes));
        let bb_upper = last_valid(&Bollinger::upper(p.bollinger_period, p.bollinger_std).compute(&closes));
        let bb_middle = last_valid(&Bollinger::middle(p.bollinger_period, p.bollinger_std).compute(&closes));
        let bb_lower = last_valid(&Bollinger::lower(p.bollinger_period, p.bollinger_std).compute(&closes));

        let mut out = ModuleOutput::new();
        out.fragment("Technical indicators:");
        out.fragment(format!("  Latest close: {}.", fmt2(latest_close)));

        if let Some(ma) = ma_short {
            out.fragment(format!("  Short average (MA{}): {}.", p.ma_short, fmt2(ma)));
            if latest_close > ma {
                out.bullish(format!("Price above MA{} short average", p.ma_short));
            } else {
                out.bearish(format!("Price below MA{} short average", p.ma_short));
            }
        }
        if let Some(ma) = ma_medium {
            out.fragment(format!("  Medium average (MA{}): {}.", p.ma_medium, fmt2(ma)));
            if latest_close > ma {
                out.bullish(format!("Price above MA{} medium average", p.ma_medium));
            } else {
                out.bearish(format!("Price below MA{} medium average", p.ma_medium));
            }
        }
        if let Some(hist) = macd_hist {
            out.fragment(format!("  MACD histogram: {}.", fmt2(hist)));
            if hist > 0.0 {
                out.bullish("MACD histogram positive, bulls in control");
            } else {
                out.bearish("MACD histogram negative, bears in control");
            }
        }
        if let Some(rsi) = rsi {
            out.fragment(format!("  RSI({}): {}.", p.rsi_period, fmt2(rsi)));
            if rsi > 70.0 {
                out.bearish("RSI overbought, pullback risk");
            } else if rsi < 30.0 {
                out.bullish("RSI oversold, rebound possible");
            } else {
                out.neutral("RSI in neutral territory");
            }
        }

        out.set(
            "technical_summary",
            json!({
                "latest_close": json_number(Some(latest_close)),
                "MA_short": json_number(ma_short),
                "MA_medium": json_number(ma_medium),
                "MACD_Hist": json_number(macd_hist),
                "RSI": json_number(rsi),
                "bollinger_upper": json_number(bb_upper),
                "bollinger_middle": json_number(bb_middle),
                "bollinger_lower": json_number(bb_lower),
            }),
        );
        out.set_number("latest_close", Some(latest_close));
        out.set_number("MA_short", ma_short);
        out.set_number("MA_medium", ma_medium);
        out.set_number("MACD_Hist", macd_hist);
        out.set_number("RSI", rsi);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::modules::fixtures;
    use crate::domain::Table;

    #[test]
    fn rising_series_is_bullish() {
        let input = fixtures::input(fixtures::daily(60, |i| 100.0 + i as f64));
        let out = TechnicalAnalyzer.analyze(&input, &AnalysisContext::new()).unwrap();

        assert_eq!(out.field_f64("latest_close"), Some(159.0));
        assert_eq!(out.field_f64("MA_short"), Some(157.0));
        assert!(out.field_f64("MACD_Hist").is_some());
        assert_eq!(out.field_f64("RSI"), Some(100.0));
        assert!(out.bullish.iter().any(|f| f.contains("MA5")));
        assert!(out.bearish.iter().any(|f| f.contains("overbought")));
        assert!(out.fields["technical_summary"]["bollinger_upper"].is_number());
    }

    #[test]
    fn short_history_leaves_slow_indicators_null() {
        let input = fixtures::input(fixtures::daily(10, |i| 10.0 + (i % 3) as f64));
        let out = TechnicalAnalyzer.analyze(&input, &AnalysisContext::new()).unwrap();
        assert!(out.field_f64("MA_short").is_some());
        assert_eq!(out.fields["MA_medium"], serde_json::Value::Null);
        assert_eq!(out.fields["MACD_Hist"], serde_json::Value::Null);
    }

    #[test]
    fn no_bars_is_missing_data() {
        let input = fixtures::input(Table::new());
        let err = TechnicalAnalyzer.analyze(&input, &AnalysisContext::new()).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingData(_)));
    }
}
