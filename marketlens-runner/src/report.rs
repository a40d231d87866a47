//! The artifact one analysis request produces.

use chrono::NaiveDate;
use serde::Serialize;

use marketlens_core::analysis::{json_number, AnalysisInput, ResultBundle, SummaryRules};
use marketlens_core::domain::MarketSegment;

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub schema_version: u32,
    pub symbol: String,
    pub segment: MarketSegment,
    pub as_of: NaiveDate,
    pub summary_phrase: String,
    pub bundle: ResultBundle,
    /// BLAKE3 of the bundle, after the request-level fields are added.
    pub fingerprint: String,
}

impl AnalysisReport {
    /// Adds `latest_price` and `price_change_pct` to the bundle's fields, then
    /// evaluates the summary rules over them.
    pub fn new(input: &AnalysisInput, mut bundle: ResultBundle, rules: &SummaryRules) -> Self {
        bundle
            .fields
            .insert("latest_price".to_string(), json_number(input.latest_price));
        bundle
            .fields
            .insert("price_change_pct".to_string(), json_number(input.price_change_pct));

        let summary_phrase = rules.evaluate(&bundle).to_string();
        let fingerprint = bundle.fingerprint();
        Self {
            schema_version: SCHEMA_VERSION,
            symbol: input.symbol.clone(),
            segment: input.segment,
            as_of: input.as_of,
            summary_phrase,
            bundle,
            fingerprint,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bundle.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketlens_core::analysis::summary::default_rules;
    use marketlens_core::analysis::DEFAULT_PHRASE;
    use marketlens_core::domain::{row, Table, Value};

    fn input(closes: &[f64]) -> AnalysisInput {
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        let daily: Table = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let date = as_of - chrono::Duration::days((closes.len() - 1 - i) as i64);
                row([("date", Value::from(date)), ("close", Value::from(*c))])
            })
            .collect();
        AnalysisInput::new("600519", MarketSegment::AShare, as_of).with_daily(daily)
    }

    #[test]
    fn price_fields_are_added_before_rules_run() {
        let rules = SummaryRules::new(default_rules());
        let report = AnalysisReport::new(&input(&[100.0, 110.0]), ResultBundle::default(), &rules);
        assert_eq!(report.bundle.field_f64("latest_price"), Some(110.0));
        let pct = report.bundle.field_f64("price_change_pct").unwrap();
        assert!((pct - 10.0).abs() < 1e-9);
        assert_eq!(report.summary_phrase, DEFAULT_PHRASE);
    }

    #[test]
    fn missing_price_serializes_as_null() {
        let rules = SummaryRules::new(default_rules());
        let report = AnalysisReport::new(&input(&[]), ResultBundle::default(), &rules);
        assert_eq!(report.bundle.field("latest_price"), Some(&serde_json::Value::Null));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["segment"], "A");
        assert_eq!(json["as_of"], "2024-03-08");
        assert_eq!(json["schema_version"], 1);
    }

    #[test]
    fn fingerprint_covers_request_fields() {
        let rules = SummaryRules::new(default_rules());
        let a = AnalysisReport::new(&input(&[100.0, 110.0]), ResultBundle::default(), &rules);
        let b = AnalysisReport::new(&input(&[100.0, 111.0]), ResultBundle::default(), &rules);
        let c = AnalysisReport::new(&input(&[100.0, 110.0]), ResultBundle::default(), &rules);
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint, c.fingerprint);
    }
}
