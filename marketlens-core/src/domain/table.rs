//! Tabular results: ordered rows of loosely typed cells.
//!
//! Upstream providers return heterogeneous shapes; a `Table` carries them through
//! standardization, the cache and the analysis modules without committing to one
//! struct per dataset. An empty table is a valid answer ("no rows"); absence is
//! expressed with `Option<Table>` or an error at the call site.

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Candidate row-key columns, in preference order.
const DATE_COLUMNS: [&str; 3] = ["trade_date", "date", "report_date"];

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Numeric cell; NaN and infinities collapse to `Null`.
    pub fn number(v: f64) -> Self {
        if v.is_finite() {
            Value::Number(v)
        } else {
            Value::Null
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            _ => None,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::Date(_) | Value::Timestamp(_) => 2,
            Value::Text(_) => 3,
        }
    }

    /// Total order used for sorting rows: nulls first, then by kind, then by value.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (a @ (Value::Date(_) | Value::Timestamp(_)), b @ (Value::Date(_) | Value::Timestamp(_))) => {
                a.as_datetime().cmp(&b.as_datetime())
            }
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }

    fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Number(v) => serializer.serialize_f64(*v),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Date(_) | Value::Timestamp(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::number(v)
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map(Value::number).unwrap_or(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

/// One record, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Build a row from `(column, value)` pairs.
pub fn row<K, V, I>(cells: I) -> Row
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    cells.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Ordered sequence of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    rows: Vec<Row>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn append(&mut self, other: Table) {
        self.rows.extend(other.rows);
    }

    pub fn last_row(&self) -> Option<&Row> {
        self.rows.last()
    }

    /// Union of column names over all rows.
    pub fn columns(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|r| r.keys().map(|k| k.as_str()))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.rows.iter().any(|r| r.contains_key(name))
    }

    /// The date column used for row keys: `trade_date`, then `date`, then
    /// `report_date`.
    pub fn date_column(&self) -> Option<&'static str> {
        DATE_COLUMNS.into_iter().find(|c| self.has_column(c))
    }

    /// Numeric view of a column; non-numeric and missing cells are `None`.
    pub fn column_f64(&self, name: &str) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|r| r.get(name).and_then(Value::as_f64))
            .collect()
    }

    /// Last non-null numeric value of a column.
    pub fn last_f64(&self, name: &str) -> Option<f64> {
        self.rows
            .iter()
            .rev()
            .find_map(|r| r.get(name).and_then(Value::as_f64))
    }

    /// Stable sort by a column; rows without the column sort first.
    pub fn sort_by_column(&mut self, name: &str) {
        self.rows.sort_by(|a, b| match (a.get(name), b.get(name)) {
            (Some(x), Some(y)) => x.sort_cmp(y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }

    /// Keep rows matching the predicate.
    pub fn filter<F: Fn(&Row) -> bool>(&self, pred: F) -> Table {
        Table::from_rows(self.rows.iter().filter(|r| pred(r)).cloned().collect())
    }

    /// Rows whose date column value falls within `[start, end]`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Table {
        let Some(col) = self.date_column() else {
            return self.clone();
        };
        self.filter(|r| {
            r.get(col)
                .and_then(Value::as_date)
                .is_some_and(|d| d >= start && d <= end)
        })
    }

    /// Latest date in the table's date column.
    pub fn last_date(&self) -> Option<NaiveDate> {
        let col = self.date_column()?;
        self.rows
            .iter()
            .filter_map(|r| r.get(col).and_then(Value::as_date))
            .max()
    }
}

impl FromIterator<Row> for Table {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Table::from_rows(iter.into_iter().collect())
    }
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for r in &self.rows {
            seq.serialize_element(r)?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sample() -> Table {
        Table::from_rows(vec![
            row([("date", Value::from(d(2024, 1, 3))), ("close", Value::from(11.0))]),
            row([("date", Value::from(d(2024, 1, 2))), ("close", Value::from(10.0))]),
            row([("date", Value::from(d(2024, 1, 4))), ("close", Value::Null)]),
        ])
    }

    #[test]
    fn nan_becomes_null() {
        assert_eq!(Value::number(f64::NAN), Value::Null);
        assert_eq!(Value::from(Some(f64::INFINITY)), Value::Null);
    }

    #[test]
    fn sort_by_date_column() {
        let mut t = sample();
        t.sort_by_column("date");
        let dates: Vec<_> = t.rows().iter().map(|r| r["date"].as_date().unwrap()).collect();
        assert_eq!(dates, vec![d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4)]);
    }

    #[test]
    fn last_f64_skips_nulls() {
        let mut t = sample();
        t.sort_by_column("date");
        assert_eq!(t.last_f64("close"), Some(11.0));
    }

    #[test]
    fn trade_date_wins_over_date() {
        let t = Table::from_rows(vec![row([("trade_date", "20240102"), ("date", "x")])]);
        assert_eq!(t.date_column(), Some("trade_date"));
        assert_eq!(Table::new().date_column(), None);

        let reports = Table::from_rows(vec![row([("report_date", "20231231"), ("roe", "12.5")])]);
        assert_eq!(reports.date_column(), Some("report_date"));
    }

    #[test]
    fn between_is_inclusive() {
        let t = sample().between(d(2024, 1, 2), d(2024, 1, 3));
        assert_eq!(t.len(), 2);
        assert_eq!(sample().last_date(), Some(d(2024, 1, 4)));
    }

    #[test]
    fn timestamps_and_dates_compare() {
        let ts = d(2024, 1, 2).and_hms_opt(9, 30, 0).unwrap();
        assert_eq!(
            Value::Date(d(2024, 1, 2)).sort_cmp(&Value::Timestamp(ts)),
            Ordering::Less
        );
    }

    #[test]
    fn serializes_dates_as_iso_strings() {
        let t = Table::from_rows(vec![row([("date", Value::from(d(2024, 1, 2))), ("v", Value::Null)])]);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"[{"date":"2024-01-02","v":null}]"#);
    }
}
