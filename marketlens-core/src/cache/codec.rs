//! Cache record codec.
//!
//! Frame layout: `b'M'`, version byte, payload length (u32 big-endian), then the
//! zlib-compressed JSON object for one row. Dates and timestamps are written as
//! `%Y%m%d %H:%M:%S` strings, NaN and missing values as `null`.

use super::CacheError;
use crate::domain::{Row, Value};
use chrono::{NaiveDate, NaiveDateTime};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::{Map, Number};
use std::io::{Read, Write};

const MAGIC: u8 = b'M';
const VERSION: u8 = 1;
const HEADER_LEN: usize = 6;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d %H:%M:%S";

/// Columns that additionally accept plain `YYYYMMDD` on read.
const KEY_COLUMNS: [&str; 3] = ["trade_date", "date", "report_date"];

/// String form used both inside records and as hash field names.
pub fn encode_cell(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Number(n) => Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Date(d) => serde_json::Value::String(format_timestamp(&d.and_time(chrono::NaiveTime::MIN))),
        Value::Timestamp(ts) => serde_json::Value::String(format_timestamp(ts)),
    }
}

fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Hash field name for a row's key cell.
pub fn field_key(v: &Value) -> Option<String> {
    match encode_cell(v) {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

pub fn encode_row(row: &Row) -> Result<Vec<u8>, CacheError> {
    let obj: Map<String, serde_json::Value> = row.iter().map(|(k, v)| (k.clone(), encode_cell(v))).collect();
    let json = serde_json::to_vec(&obj).map_err(|e| CacheError::Codec(format!("serialize: {e}")))?;

    let mut enc = ZlibEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    enc.write_all(&json)
        .map_err(|e| CacheError::Codec(format!("compress: {e}")))?;
    let payload = enc.finish().map_err(|e| CacheError::Codec(format!("compress: {e}")))?;

    let len = u32::try_from(payload.len()).map_err(|_| CacheError::Codec("record too large".into()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode_row(bytes: &[u8]) -> Result<Row, CacheError> {
    if bytes.len() < HEADER_LEN {
        return Err(CacheError::Codec(format!("truncated header ({} bytes)", bytes.len())));
    }
    if bytes[0] != MAGIC {
        return Err(CacheError::Codec(format!("bad magic byte {:#04x}", bytes[0])));
    }
    if bytes[1] != VERSION {
        return Err(CacheError::Codec(format!("unsupported record version {}", bytes[1])));
    }
    let len = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != len {
        return Err(CacheError::Codec(format!(
            "length mismatch: header says {len}, found {}",
            payload.len()
        )));
    }

    let mut json = Vec::new();
    ZlibDecoder::new(payload)
        .read_to_end(&mut json)
        .map_err(|e| CacheError::Codec(format!("decompress: {e}")))?;
    let obj: Map<String, serde_json::Value> =
        serde_json::from_slice(&json).map_err(|e| CacheError::Codec(format!("deserialize: {e}")))?;

    Ok(obj
        .into_iter()
        .map(|(k, v)| {
            let cell = decode_cell(&k, v);
            (k, cell)
        })
        .collect())
}

/// Strings in the timestamp format come back as dates (midnight) or timestamps;
/// anything that fails to parse stays a string.
fn decode_cell(column: &str, v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::number),
        serde_json::Value::Bool(b) => Value::Number(if b { 1.0 } else { 0.0 }),
        serde_json::Value::String(s) => {
            if let Ok(ts) = NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT) {
                if ts.time() == chrono::NaiveTime::MIN {
                    return Value::Date(ts.date());
                }
                return Value::Timestamp(ts);
            }
            if KEY_COLUMNS.contains(&column) {
                if let Ok(d) = NaiveDate::parse_from_str(&s, "%Y%m%d") {
                    return Value::Date(d);
                }
            }
            Value::Text(s)
        }
        other => Value::Text(other.to_string()),
    }
}
