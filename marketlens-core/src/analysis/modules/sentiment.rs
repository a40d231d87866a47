//! Money flow, limit status, institutional Dragon-Tiger seats and the live quote.

use super::{fmt2, fmt_wan, LIMIT_LIST_DATASET, STK_LIMIT_DATASET, TOP_INST_DATASET};
use crate::analysis::module::{AnalysisContext, AnalysisError, AnalysisInput, AnalysisModule, ModuleOutput};
use crate::domain::{Row, Table, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct MarketSentimentAnalyzer;

impl MarketSentimentAnalyzer {
    pub const NAME: &'static str = "MarketSentimentAnalyzer";
}

/// Whether a row's `ts_code`/`symbol` refers to `symbol` (`600519.SH` matches `600519`).
pub(super) fn row_is_symbol(row: &Row, symbol: &str) -> bool {
    ["ts_code", "symbol"].iter().any(|col| {
        row.get(*col).and_then(Value::as_str).is_some_and(|code| {
            code.eq_ignore_ascii_case(symbol) || code.split('.').next().is_some_and(|c| c.eq_ignore_ascii_case(symbol))
        })
    })
}

/// The symbol's `(up_limit, down_limit)` from the day's limit-price table.
fn limit_prices(prices: &Table, symbol: &str) -> Option<(f64, f64)> {
    prices.rows().iter().filter(|r| row_is_symbol(r, symbol)).find_map(|r| {
        let up = r.get("up_limit").and_then(Value::as_f64)?;
        let down = r.get("down_limit").and_then(Value::as_f64)?;
        Some((up, down))
    })
}

/// Limit prices are quoted to the cent; a close within half a cent counts as sealed.
fn status_from_prices(close: f64, up: f64, down: f64) -> &'static str {
    if close >= up - 0.005 {
        "LIMIT_UP"
    } else if close <= down + 0.005 {
        "LIMIT_DOWN"
    } else {
        "NORMAL"
    }
}

/// Summed institutional net buy for the symbol, `None` when it is not listed.
fn institutional_net(list: &Table, symbol: &str) -> Option<f64> {
    let nets: Vec<f64> = list
        .rows()
        .iter()
        .filter(|r| row_is_symbol(r, symbol))
        .filter_map(|r| r.get("net_buy").or_else(|| r.get("net_buy_amount")).and_then(Value::as_f64))
        .collect();
    (!nets.is_empty()).then(|| nets.iter().sum::<f64>())
}

fn limit_status(list: &Table, symbol: &str) -> &'static str {
    let flag = list
        .rows()
        .iter()
        .filter(|r| row_is_symbol(r, symbol))
        .find_map(|r| r.get("limit").and_then(Value::as_str));
    match flag {
        Some("U") => "LIMIT_UP",
        Some("D") => "LIMIT_DOWN",
        _ => "NORMAL",
    }
}

impl AnalysisModule for MarketSentimentAnalyzer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn analyze(&self, input: &AnalysisInput, _ctx: &AnalysisContext) -> Result<ModuleOutput, AnalysisError> {
        let mut out = ModuleOutput::new();
        out.fragment("Sentiment and money flow:");

        // Limit status: the limit list first, the day's limit prices when the list is missing
        let prices = input
            .dataset(STK_LIMIT_DATASET)
            .and_then(|t| limit_prices(t, &input.symbol));
        let status = match (input.dataset(LIMIT_LIST_DATASET), prices) {
            (Some(list), _) => {
                let count = |flag: &str| {
                    list.rows()
                        .iter()
                        .filter(|r| r.get("limit").and_then(Value::as_str) == Some(flag))
                        .count()
                };
                out.fragment(format!("  Limit-up names today: {}, limit-down: {}.", count("U"), count("D")));
                Some(limit_status(list, &input.symbol))
            }
            (None, Some((up, down))) => {
                out.fragment(format!("  Limit prices today: up {}, down {}.", fmt2(up), fmt2(down)));
                input.daily.last_f64("close").map(|close| status_from_prices(close, up, down))
            }
            (None, None) => None,
        };
        match status {
            Some("LIMIT_UP") => out.bullish("Closed limit-up today, sentiment hot"),
            Some("LIMIT_DOWN") => out.bearish("Closed limit-down today, heavy risk"),
            Some(_) => out.neutral("Trading within normal limits"),
            None => out.neutral("Limit-list data unavailable"),
        }
        out.set("limit_status", status.unwrap_or("NORMAL"));
        out.set_number("limit_up_price", prices.map(|(up, _)| up));
        out.set_number("limit_down_price", prices.map(|(_, down)| down));

        // Live quote
        let spot_change = input
            .spot
            .rows()
            .iter()
            .find(|r| row_is_symbol(r, &input.symbol))
            .or_else(|| input.spot.rows().first())
            .and_then(|r| r.get("change_pct"))
            .and_then(Value::as_f64);
        match spot_change {
            Some(pct) => {
                out.fragment(format!("  Live change: {}%.", fmt2(pct)));
                if pct > 5.0 {
                    out.bullish(format!("Strong live gain ({}%)", fmt2(pct)));
                } else if pct < -5.0 {
                    out.bearish(format!("Sharp live drop ({}%)", fmt2(pct)));
                }
            }
            None => out.neutral("Live quote unavailable"),
        }
        out.set_number("realtime_change_pct_spot", spot_change);

        // Institutional seats on the Dragon-Tiger list
        let inst_net = match input.dataset(TOP_INST_DATASET) {
            Some(list) => {
                let net = institutional_net(list, &input.symbol);
                match net {
                    Some(net) => {
                        out.fragment(format!("  Institutional net buy on the Dragon-Tiger list: {}.", fmt_wan(net)));
                        if net > 0.0 {
                            out.bullish(format!("Institutions net buying on the Dragon-Tiger list ({})", fmt_wan(net)));
                        } else if net < 0.0 {
                            out.bearish(format!("Institutions net selling on the Dragon-Tiger list ({})", fmt_wan(net)));
                        } else {
                            out.neutral("No clear institutional direction on the Dragon-Tiger list");
                        }
                    }
                    None => out.neutral("Not on the institutional Dragon-Tiger list"),
                }
                net
            }
            None => {
                out.neutral("Institutional Dragon-Tiger data unavailable");
                None
            }
        };
        out.set_number("total_net_amount_top_inst", inst_net);

        // Money flow
        let main = input.moneyflow.last_f64("main_net_amount");
        let retail = input.moneyflow.last_f64("retail_net_amount");
        if input.moneyflow.is_empty() {
            out.neutral("Money-flow data unavailable");
        }
        if let Some(main) = main {
            out.fragment(format!("  Main-force net inflow: {}.", fmt_wan(main)));
            if main > 0.0 {
                out.bullish(format!("Main-force net inflow ({})", fmt_wan(main)));
            } else {
                out.bearish(format!("Main-force net outflow ({})", fmt_wan(main)));
            }
        }
        if let Some(retail) = retail {
            out.fragment(format!("  Retail net inflow: {}.", fmt_wan(retail)));
            // Retail buying tends to mark tops.
            if retail > 0.0 {
                out.bearish(format!("Retail net inflow ({})", fmt_wan(retail)));
            } else {
                out.bullish(format!("Retail net outflow ({})", fmt_wan(retail)));
            }
        }
        let recent: Vec<f64> = input
            .moneyflow
            .column_f64("main_net_amount")
            .into_iter()
            .rev()
            .take(5)
            .flatten()
            .collect();
        let main_5d = (!recent.is_empty()).then(|| recent.iter().sum::<f64>());
        if let Some(total) = main_5d {
            out.fragment(format!("  Main-force net over 5 sessions: {}.", fmt_wan(total)));
        }

        out.set_number("main_net_amount_dc", main);
        out.set_number("retail_net_amount_dc", retail);
        out.set_number("main_net_amount_5d", main_5d);
        Ok(out)
    }
}
