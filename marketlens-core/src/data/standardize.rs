//! Standardization of provider tables into the shared schemas.
//!
//! Every source maps its own column names onto one of four fixed shapes. The
//! rules are the same for all of them:
//! - columns are renamed through a per-source mapping,
//! - numeric columns are coerced, invalid values become `Null` (never an error),
//! - rows missing the key (or another required column) are dropped,
//! - missing optional columns are filled with `Null` and warned about once,
//! - output is sorted by the key column.

use crate::domain::{Row, Table, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;
use tracing::warn;

/// Fixed column set for one operation category.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub name: &'static str,
    /// Row key. Dates are parsed for date keys; `symbol` stays text.
    pub key: &'static str,
    /// Non-key columns whose absence drops the row.
    pub required: &'static [&'static str],
    /// Numeric columns; missing ones are filled with `Null`.
    pub numeric: &'static [&'static str],
    /// Text columns kept verbatim.
    pub text: &'static [&'static str],
}

impl Schema {
    fn key_is_date(&self) -> bool {
        self.key != "symbol"
    }

    fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.key)
            .chain(self.text.iter().copied())
            .chain(self.numeric.iter().copied())
    }
}

pub const BARS: Schema = Schema {
    name: "bars",
    key: "date",
    required: &["close"],
    numeric: &["open", "high", "low", "close", "volume", "amount"],
    text: &[],
};

pub const FUNDAMENTALS: Schema = Schema {
    name: "fundamentals",
    key: "report_date",
    required: &[],
    numeric: &[
        "revenue",
        "np_yoy",
        "revenue_yoy",
        "gross_margin",
        "roe",
        "eps",
        "pb",
        "pe",
    ],
    text: &[],
};

pub const FLOW: Schema = Schema {
    name: "flow",
    key: "date",
    required: &[],
    numeric: &["main_net_amount", "retail_net_amount"],
    text: &[],
};

pub const SPOT: Schema = Schema {
    name: "spot",
    key: "symbol",
    required: &["latest_price"],
    numeric: &["latest_price", "change_pct", "volume"],
    text: &["name"],
};

/// Rename, coerce, filter and sort `raw` into `schema`.
///
/// `renames` maps provider column → schema column; unmapped columns that are not
/// part of the schema are dropped.
pub fn standardize(source: &str, raw: Table, renames: &[(&str, &str)], schema: &Schema) -> Table {
    if raw.is_empty() {
        return Table::new();
    }

    let mut warned: BTreeSet<&'static str> = BTreeSet::new();
    let mut out = Table::new();

    for raw_row in raw.into_rows() {
        let mut renamed = Row::new();
        for (col, value) in raw_row {
            let target = renames
                .iter()
                .find(|(from, _)| *from == col)
                .map(|(_, to)| (*to).to_string())
                .unwrap_or(col);
            renamed.insert(target, value);
        }

        let key = match renamed.remove(schema.key) {
            Some(v) if schema.key_is_date() => parse_date(&v).map(Value::Date),
            Some(Value::Null) | None => None,
            Some(v) => Some(Value::Text(v.to_string().trim().to_string())),
        };
        let Some(key) = key else {
            continue;
        };

        let mut row = Row::new();
        row.insert(schema.key.to_string(), key);

        for col in schema.text {
            let v = renamed.remove(*col).unwrap_or(Value::Null);
            row.insert((*col).to_string(), v);
        }
        for col in schema.numeric {
            let v = match renamed.remove(*col) {
                Some(v) => coerce_number(&v),
                None => {
                    if !schema.required.contains(col) && warned.insert(*col) {
                        warn!(source, schema = schema.name, column = *col, "missing column, filled with null");
                    }
                    Value::Null
                }
            };
            row.insert((*col).to_string(), v);
        }

        if schema
            .required
            .iter()
            .any(|c| row.get(*c).map_or(true, Value::is_null))
        {
            continue;
        }
        debug_assert!(schema.columns().all(|c| row.contains_key(c)));
        out.push(row);
    }

    out.sort_by_column(schema.key);
    out
}

/// Coerce a cell to a number; anything unparsable becomes `Null`.
pub fn coerce_number(v: &Value) -> Value {
    match v {
        Value::Number(n) => Value::number(*n),
        Value::Text(s) => {
            let cleaned = s.trim().trim_end_matches('%').replace(',', "");
            cleaned
                .parse::<f64>()
                .map(Value::number)
                .unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

/// Numeric view of a cell after coercion.
pub fn number(v: &Value) -> Option<f64> {
    coerce_number(v).as_f64()
}

/// Parse the key formats providers use for dates.
///
/// Accepts `YYYYMMDD`, `YYYY-MM-DD`, `YYYYMMDD HH:MM:SS`, `YYYY-MM-DD HH:MM:SS`,
/// RFC3339 and epoch milliseconds (as a number or a 13-digit string).
pub fn parse_date(v: &Value) -> Option<NaiveDate> {
    match v {
        Value::Date(d) => Some(*d),
        Value::Timestamp(ts) => Some(ts.date()),
        Value::Number(n) => from_epoch_millis(*n as i64).or_else(|| from_compact(*n as i64)),
        Value::Text(s) => parse_date_str(s),
        Value::Null => None,
    }
}

pub fn parse_date_str(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.len() == 13 && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(from_epoch_millis);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    for fmt in ["%Y%m%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts.date());
        }
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

fn from_epoch_millis(ms: i64) -> Option<NaiveDate> {
    // Anything below 1e11 ms (1973) is a compact date, not an epoch.
    if ms < 100_000_000_000 {
        return None;
    }
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc().date())
}

fn from_compact(n: i64) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&n.to_string(), "%Y%m%d").ok()
}

/// Convert a JSON scalar from an upstream payload into a cell.
pub fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Number(n) => n.as_f64().map(Value::number).unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Bool(b) => Value::number(if *b { 1.0 } else { 0.0 }),
        _ => Value::Null,
    }
}

/// Build a table from a column list and row arrays (`{fields, items}` payloads).
pub fn table_from_columns(fields: &[String], items: &[Vec<serde_json::Value>]) -> Table {
    items
        .iter()
        .map(|item| {
            fields
                .iter()
                .zip(item.iter())
                .map(|(f, v)| (f.clone(), json_to_value(v)))
                .collect::<Row>()
        })
        .collect()
}
