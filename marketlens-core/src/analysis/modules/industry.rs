//! Money flow of the symbol's industry.

use super::{fmt_wan, INDUSTRY_FLOW_DATASET};
use crate::analysis::module::{AnalysisContext, AnalysisError, AnalysisInput, AnalysisModule, ModuleOutput};
use crate::domain::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct IndustryAnalyzer;

impl IndustryAnalyzer {
    pub const NAME: &'static str = "IndustryAnalyzer";
}

impl AnalysisModule for IndustryAnalyzer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn analyze(&self, input: &AnalysisInput, _ctx: &AnalysisContext) -> Result<ModuleOutput, AnalysisError> {
        let mut out = ModuleOutput::new();
        out.fragment("Industry:");

        let industry = input.extra("industry").filter(|s| !s.is_empty());
        let flow = input.dataset(INDUSTRY_FLOW_DATASET);
        let inflow = match (industry, flow) {
            (Some(industry), Some(flow)) => {
                let inflow = flow
                    .rows()
                    .iter()
                    .find(|r| r.get("industry").and_then(Value::as_str) == Some(industry))
                    .and_then(|r| r.get("net_amount"))
                    .and_then(Value::as_f64);
                match inflow {
                    Some(v) => {
                        out.fragment(format!("  {industry} main-force net inflow: {}.", fmt_wan(v)));
                        if v > 0.0 {
                            out.bullish(format!("Industry ({industry}) net inflow"));
                        } else {
                            out.bearish(format!("Industry ({industry}) net outflow"));
                        }
                    }
                    None => out.neutral(format!("No money-flow row for industry ({industry})")),
                }
                inflow
            }
            _ => {
                out.neutral("Industry money flow unavailable or industry unknown");
                None
            }
        };

        out.set_number("main_net_inflow_ind", inflow);
        if let Some(industry) = industry {
            out.set("industry", industry);
        }
        Ok(out)
    }
}
