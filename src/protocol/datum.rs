//! Decoded server values.
//!
//! The server returns plain JSON plus two reserved compound types tagged
//! with a `$reql_type$` key: wall-clock times and binary blobs. Both are
//! rewritten into native values at decode time.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use tracing::warn;

use crate::error::{DriverError, DriverResult};

/// Reserved key marking a tagged compound object.
pub const REQL_TYPE_KEY: &str = "$reql_type$";

/// A single decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// A `$reql_type$: BINARY` blob.
    Bytes(Vec<u8>),
    /// A `$reql_type$: TIME` timestamp, offset preserved.
    Time(DateTime<FixedOffset>),
    Array(Vec<Datum>),
    Object(HashMap<String, Datum>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Datum]> {
        match self {
            Datum::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, Datum>> {
        match self {
            Datum::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Field lookup on object datums; `None` for everything else.
    pub fn get(&self, key: &str) -> Option<&Datum> {
        self.as_object().and_then(|fields| fields.get(key))
    }
}

/// Decode one JSON value, rewriting reserved `$reql_type$` objects.
pub fn decode_datum(value: Value) -> DriverResult<Datum> {
    match value {
        Value::Null => Ok(Datum::Null),
        Value::Bool(b) => Ok(Datum::Bool(b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Datum::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Datum::Float(f))
            } else {
                Err(DriverError::Protocol(format!("unrepresentable number {n}")))
            }
        }
        Value::String(s) => Ok(Datum::String(s)),
        Value::Array(items) => Ok(Datum::Array(
            items.into_iter().map(decode_datum).collect::<DriverResult<_>>()?,
        )),
        Value::Object(fields) => {
            match fields.get(REQL_TYPE_KEY).and_then(Value::as_str) {
                Some("TIME") => decode_time(&fields),
                Some("BINARY") => decode_binary(&fields),
                Some(tag) => {
                    warn!(reql_type = tag, "unhandled $reql_type$ tag, passing object through");
                    decode_object(fields)
                }
                None => decode_object(fields),
            }
        }
    }
}

fn decode_object(fields: serde_json::Map<String, Value>) -> DriverResult<Datum> {
    let mut object = HashMap::with_capacity(fields.len());
    for (key, value) in fields {
        object.insert(key, decode_datum(value)?);
    }
    Ok(Datum::Object(object))
}

fn decode_time(fields: &serde_json::Map<String, Value>) -> DriverResult<Datum> {
    let epoch = fields
        .get("epoch_time")
        .and_then(Value::as_f64)
        .ok_or_else(|| DriverError::Protocol("TIME without epoch_time".to_string()))?;
    let timezone = fields
        .get("timezone")
        .and_then(Value::as_str)
        .unwrap_or("+00:00");
    let offset = parse_offset(timezone)?;

    let secs = epoch.div_euclid(1.0) as i64;
    let nanos = (epoch.rem_euclid(1.0) * 1e9).round() as u32;
    let utc = DateTime::<Utc>::from_timestamp(secs, nanos)
        .ok_or_else(|| DriverError::Protocol(format!("epoch_time {epoch} out of range")))?;
    Ok(Datum::Time(utc.with_timezone(&offset)))
}

fn decode_binary(fields: &serde_json::Map<String, Value>) -> DriverResult<Datum> {
    let data = fields
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| DriverError::Protocol("BINARY without data".to_string()))?;
    let bytes = BASE64
        .decode(data)
        .map_err(|e| DriverError::Protocol(format!("invalid BINARY base64: {e}")))?;
    Ok(Datum::Bytes(bytes))
}

/// Parse an ISO-8601 UTC offset: `Z`, `±HH:MM` or `±HHMM`.
fn parse_offset(timezone: &str) -> DriverResult<FixedOffset> {
    if timezone == "Z" || timezone == "z" {
        return Ok(FixedOffset::east_opt(0).unwrap());
    }
    let bad = || DriverError::Protocol(format!("invalid timezone offset {timezone:?}"));

    let (sign, rest) = match timezone.as_bytes().first() {
        Some(b'+') => (1i32, &timezone[1..]),
        Some(b'-') => (-1i32, &timezone[1..]),
        _ => return Err(bad()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None if rest.len() == 2 => (rest, "00"),
        None => return Err(bad()),
    };
    let hours: i32 = hours.parse().map_err(|_| bad())?;
    let minutes: i32 = minutes.parse().map_err(|_| bad())?;
    if hours > 23 || minutes > 59 {
        return Err(bad());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(bad)
}
