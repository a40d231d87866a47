//! Typed summary rules evaluated over a bundle's fields.
//!
//! Rules are `(conditions, phrase)` pairs ordered by priority. The first rule
//! whose conditions all hold supplies the phrase. Conditions use a closed set
//! of comparison operators; nothing from configuration is ever executed.

use super::bundle::ResultBundle;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_PHRASE: &str = "Neutral: wait for a clearer signal.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
        }
    }
}

/// Literal right-hand side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Number(f64),
    Text(String),
}

/// `field op value` or `field op field_ref * scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Operand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Condition {
    pub fn value(field: impl Into<String>, op: CompareOp, value: Operand) -> Self {
        Self {
            field: field.into(),
            op,
            value: Some(value),
            field_ref: None,
            scale: 1.0,
        }
    }

    pub fn scaled(field: impl Into<String>, op: CompareOp, field_ref: impl Into<String>, scale: f64) -> Self {
        Self {
            field: field.into(),
            op,
            value: None,
            field_ref: Some(field_ref.into()),
            scale,
        }
    }

    /// Missing or non-comparable operands make the condition false.
    pub fn holds(&self, bundle: &ResultBundle) -> bool {
        let Some(left) = bundle.field(&self.field) else {
            return false;
        };
        let ord = match (&self.field_ref, &self.value) {
            (Some(r), _) => {
                let (Some(l), Some(r)) = (left.as_f64(), bundle.field_f64(r)) else {
                    return false;
                };
                l.partial_cmp(&(r * self.scale))
            }
            (None, Some(Operand::Number(n))) => left.as_f64().and_then(|l| l.partial_cmp(n)),
            (None, Some(Operand::Text(t))) => left.as_str().map(|l| l.cmp(t.as_str())),
            (None, None) => None,
        };
        ord.is_some_and(|o| self.op.holds(o))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRule {
    pub priority: u32,
    pub phrase: String,
    /// Empty means the rule always holds.
    #[serde(default)]
    pub when: Vec<Condition>,
}

impl SummaryRule {
    pub fn new(priority: u32, phrase: impl Into<String>, when: Vec<Condition>) -> Self {
        Self {
            priority,
            phrase: phrase.into(),
            when,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SummaryRules {
    rules: Vec<SummaryRule>,
}

impl SummaryRules {
    /// Stable-sorts by priority; equal priorities keep their listed order.
    pub fn new(mut rules: Vec<SummaryRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    pub fn rules(&self) -> &[SummaryRule] {
        &self.rules
    }

    pub fn evaluate<'a>(&'a self, bundle: &ResultBundle) -> &'a str {
        self.rules
            .iter()
            .find(|r| r.when.iter().all(|c| c.holds(bundle)))
            .map_or(DEFAULT_PHRASE, |r| r.phrase.as_str())
    }
}

/// The stock rule set.
pub fn default_rules() -> Vec<SummaryRule> {
    use CompareOp::*;
    let num = Operand::Number;
    let text = |s: &str| Operand::Text(s.to_string());
    vec![
        SummaryRule::new(
            1,
            "Limit-up today: sentiment is hot and the short-term trend is strong.",
            vec![Condition::value("limit_status", Eq, text("LIMIT_UP"))],
        ),
        SummaryRule::new(
            1,
            "Limit-down today: heavy downside risk, stay away.",
            vec![Condition::value("limit_status", Eq, text("LIMIT_DOWN"))],
        ),
        SummaryRule::new(
            2,
            "Price holds above the medium average with a positive MACD histogram: bullish bias.",
            vec![
                Condition::scaled("latest_price", Gt, "MA_medium", 1.05),
                Condition::value("MACD_Hist", Gt, num(0.1)),
            ],
        ),
        SummaryRule::new(
            2,
            "Price broke below the medium average with a negative MACD histogram: under pressure.",
            vec![
                Condition::scaled("latest_price", Lt, "MA_medium", 0.95),
                Condition::value("MACD_Hist", Lt, num(-0.1)),
            ],
        ),
        SummaryRule::new(
            3,
            "Large main-force inflow: institutions appear interested.",
            vec![Condition::value("main_net_amount_dc", Gt, num(5000.0))],
        ),
        SummaryRule::new(
            3,
            "Large main-force outflow: selling pressure, be cautious.",
            vec![Condition::value("main_net_amount_dc", Lt, num(-5000.0))],
        ),
        SummaryRule::new(
            4,
            "Revenue and net profit both growing fast: strong fundamentals.",
            vec![
                Condition::value("revenue_yoy", Gt, num(20.0)),
                Condition::value("np_yoy", Gt, num(20.0)),
            ],
        ),
        SummaryRule::new(
            5,
            "Low price-to-book: possibly undervalued.",
            vec![
                Condition::value("pb", Gt, num(0.0)),
                Condition::value("pb", Lt, num(1.2)),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::module::ModuleOutput;
    use serde_json::json;

    fn bundle(fields: serde_json::Value) -> ResultBundle {
        let mut out = ModuleOutput::new();
        if let serde_json::Value::Object(map) = fields {
            for (k, v) in map {
                out.set(k, v);
            }
        }
        let mut b = ResultBundle::default();
        b.merge("Test", &out);
        b
    }

    #[test]
    fn first_matching_rule_by_priority_wins() {
        let rules = SummaryRules::new(default_rules());
        let b = bundle(json!({"limit_status": "LIMIT_UP", "main_net_amount_dc": 9000.0}));
        assert!(rules.evaluate(&b).starts_with("Limit-up"));
    }

    #[test]
    fn scaled_field_reference() {
        let rules = SummaryRules::new(default_rules());
        let b = bundle(json!({"latest_price": 110.0, "MA_medium": 100.0, "MACD_Hist": 0.5}));
        assert!(rules.evaluate(&b).starts_with("Price holds above"));

        let flat = bundle(json!({"latest_price": 104.0, "MA_medium": 100.0, "MACD_Hist": 0.5}));
        assert_eq!(rules.evaluate(&flat), DEFAULT_PHRASE);
    }

    #[test]
    fn missing_or_mistyped_fields_are_false() {
        let c = Condition::value("np_yoy", CompareOp::Gt, Operand::Number(1.0));
        assert!(!c.holds(&bundle(json!({}))));
        assert!(!c.holds(&bundle(json!({"np_yoy": null}))));
        assert!(!c.holds(&bundle(json!({"np_yoy": "high"}))));
        let ne = Condition::value("limit_status", CompareOp::Ne, Operand::Number(1.0));
        assert!(!ne.holds(&bundle(json!({"limit_status": "NORMAL"}))));
    }

    #[test]
    fn unconditional_rule_always_holds() {
        let rules = SummaryRules::new(vec![
            SummaryRule::new(999, "fallback", vec![]),
            SummaryRule::new(1, "never", vec![Condition::value("x", CompareOp::Eq, Operand::Number(1.0))]),
        ]);
        assert_eq!(rules.evaluate(&ResultBundle::default()), "fallback");
    }

    #[test]
    fn rules_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            summary_rules: Vec<SummaryRule>,
        }
        let doc: Doc = toml::from_str(
            r#"
            [[summary_rules]]
            priority = 2
            phrase = "above average"
            when = [
                { field = "latest_price", op = "gt", field_ref = "MA_medium", scale = 1.05 },
                { field = "limit_status", op = "ne", value = "LIMIT_DOWN" },
            ]
            "#,
        )
        .unwrap();
        let rule = &doc.summary_rules[0];
        assert_eq!(rule.when[0].scale, 1.05);
        assert_eq!(rule.when[1].value, Some(Operand::Text("LIMIT_DOWN".into())));
        assert_eq!(rule.when[1].scale, 1.0);
    }
}
