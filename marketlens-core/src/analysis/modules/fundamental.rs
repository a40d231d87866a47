//! Growth, margin and valuation from the latest financial report.

use super::{fmt2, technical::TechnicalAnalyzer};
use crate::analysis::module::{AnalysisContext, AnalysisError, AnalysisInput, AnalysisModule, ModuleOutput};

#[derive(Debug, Clone, Copy, Default)]
pub struct FundamentalAnalyzer;

impl FundamentalAnalyzer {
    pub const NAME: &'static str = "FundamentalAnalyzer";
}

/// (field, label, bullish above, bearish below)
const GROWTH_AND_QUALITY: [(&str, &str, f64, f64); 4] = [
    ("revenue_yoy", "Revenue growth YoY", 15.0, 0.0),
    ("np_yoy", "Net profit growth YoY", 15.0, 0.0),
    ("gross_margin", "Gross margin", 30.0, 10.0),
    ("roe", "ROE", 10.0, 5.0),
];

impl AnalysisModule for FundamentalAnalyzer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn analyze(&self, input: &AnalysisInput, ctx: &AnalysisContext) -> Result<ModuleOutput, AnalysisError> {
        let mut reports = input.fundamentals.clone();
        reports.sort_by_column("report_date");
        let latest = reports
            .last_row()
            .ok_or_else(|| AnalysisError::MissingData("financial reports".into()))?;
        let get = |name: &str| latest.get(name).and_then(|v| v.as_f64()).filter(|v| v.is_finite());

        let mut out = ModuleOutput::new();
        out.fragment("Fundamentals:");

        for (field, label, high, low) in GROWTH_AND_QUALITY {
            let value = get(field);
            out.set_number(field, value);
            let Some(v) = value else { continue };
            out.fragment(format!("  {label}: {}%.", fmt2(v)));
            if v > high {
                out.bullish(format!("{label} strong ({}%)", fmt2(v)));
            } else if v < low {
                out.bearish(format!("{label} weak ({}%)", fmt2(v)));
            } else {
                out.neutral(format!("{label} in a normal range"));
            }
        }

        let pe = get("pe");
        out.set_number("pe", pe);
        if let Some(pe) = pe {
            out.fragment(format!("  P/E: {}.", fmt2(pe)));
            if pe > 100.0 {
                out.bearish(format!("P/E elevated ({}), valuation risk", fmt2(pe)));
            } else if pe > 0.0 && pe < 20.0 {
                out.bullish(format!("P/E low ({}), attractive valuation", fmt2(pe)));
            } else {
                out.neutral("P/E in a reasonable range");
            }
        }

        let pb = get("pb");
        out.set_number("pb", pb);
        if let Some(pb) = pb {
            out.fragment(format!("  P/B: {}.", fmt2(pb)));
            if pb > 5.0 {
                out.bearish(format!("P/B elevated ({}), valuation risk", fmt2(pb)));
            } else if pb > 0.0 && pb < 1.5 {
                out.bullish(format!("P/B low ({}), attractive valuation", fmt2(pb)));
            } else {
                out.neutral("P/B in a reasonable range");
            }
        }

        out.set_number("eps", get("eps"));

        // Earnings yield against the technical close, when both are known.
        let close = ctx.get(TechnicalAnalyzer::NAME).and_then(|t| t.field_f64("latest_close"));
        if let (Some(eps), Some(close)) = (get("eps"), close) {
            if close > 0.0 {
                out.set_number("earnings_yield", Some(eps / close * 100.0));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::modules::fixtures;
    use crate::domain::{row, Table, Value};
    use chrono::NaiveDate;

    fn report(year: i32, roe: f64, pe: f64) -> crate::domain::Row {
        row([
            ("report_date", Value::from(NaiveDate::from_ymd_opt(year, 12, 31).unwrap())),
            ("roe", Value::from(roe)),
            ("pe", Value::from(pe)),
            ("eps", Value::from(5.0)),
            ("np_yoy", Value::Null),
        ])
    }

    #[test]
    fn latest_report_wins() {
        let mut input = fixtures::input(fixtures::daily(5, |_| 100.0));
        input.fundamentals = Table::from_rows(vec![report(2023, 25.0, 15.0), report(2022, 2.0, 150.0)]);
        let mut ctx = AnalysisContext::new();
        let mut technical = ModuleOutput::new();
        technical.set_number("latest_close", Some(100.0));
        ctx.insert(TechnicalAnalyzer::NAME, technical);

        let out = FundamentalAnalyzer.analyze(&input, &ctx).unwrap();
        assert_eq!(out.field_f64("roe"), Some(25.0));
        assert_eq!(out.fields["np_yoy"], serde_json::Value::Null);
        assert_eq!(out.field_f64("earnings_yield"), Some(5.0));
        assert!(out.bullish.iter().any(|f| f.starts_with("ROE strong")));
        assert!(out.bullish.iter().any(|f| f.starts_with("P/E low")));
    }

    #[test]
    fn no_reports_is_missing_data() {
        let input = fixtures::input(fixtures::daily(5, |_| 100.0));
        let err = FundamentalAnalyzer.analyze(&input, &AnalysisContext::new()).unwrap_err();
        assert_eq!(err, AnalysisError::MissingData("financial reports".into()));
    }
}
