use chrono::SecondsFormat;
use serde_json::{Number, Value};

use super::{
    models::{Cell, NormalizedTable, Row},
    session::{RawResult, RawValue},
};

// Largest magnitude below which every integer is exactly representable as f64
const EXACT_FLOAT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Converts a backend result into its portable form, keeping the first `limit` rows
pub fn normalize(raw: RawResult, limit: usize) -> NormalizedTable {
    let truncated = raw.rows.len() > limit;
    let rows = raw
        .rows
        .into_iter()
        .take(limit)
        .map(|row| row.into_iter().map(normalize_raw).collect())
        .collect();

    NormalizedTable {
        columns: raw.columns,
        rows,
        truncated,
    }
}

pub fn normalize_raw(value: RawValue) -> Cell {
    match value {
        RawValue::Null => Value::Null,
        RawValue::Bool(b) => Value::Bool(b),
        RawValue::Int(i) => Value::from(i),
        RawValue::BigInt(i) => Value::String(i.to_string()),
        RawValue::Float(f) => normalize_float(f),
        RawValue::Decimal(text) | RawValue::Text(text) => Value::String(text),
        RawValue::Json(json) => normalize_value(&json),
        RawValue::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
        RawValue::Time(time) => Value::String(time.format("%H:%M:%S%.f").to_string()),
        RawValue::Timestamp(ts) => Value::String(
            ts.and_utc()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
        RawValue::TimestampTz(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        RawValue::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            Value::String(format!("\\x{}", hex))
        }
    }
}

/// Normalizes an already-JSON cell, as found in expected rows
pub fn normalize_value(value: &Value) -> Cell {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        Value::Number(n) if n.is_f64() => n.as_f64().map(normalize_float).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

pub fn normalize_row(row: &[Value]) -> Row {
    row.iter().map(normalize_value).collect()
}

fn normalize_float(f: f64) -> Cell {
    if !f.is_finite() {
        return Value::String(
            match f {
                f if f.is_nan() => "NaN",
                f if f > 0.0 => "Infinity",
                _ => "-Infinity",
            }
            .to_string(),
        );
    }

    if f.fract() == 0.0 && f.abs() < EXACT_FLOAT_INTEGER {
        return Value::from(f as i64);
    }

    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
