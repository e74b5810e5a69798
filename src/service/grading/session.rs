use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;

use crate::service::error::CaseError;

/// A cell exactly as the backend handed it over, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    /// Integers that are always exact as JSON numbers
    Int(i64),
    /// 64-bit integers, reported as decimal strings
    BigInt(i64),
    Float(f64),
    /// Arbitrary precision numeric in its decimal text form
    Decimal(String),
    Text(String),
    Json(Value),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub(crate) columns: Vec<String>,
    pub(crate) rows: Vec<Vec<RawValue>>,
}

/// One physical backend session.
///
/// Every call is a single statement; implementations must refuse to run more
/// than one statement per call.
pub trait Session {
    /// Runs a statement that returns no rows, binding each param as a JSON value
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, CaseError>;

    /// Runs a statement and collects every row it returns
    fn query(&mut self, sql: &str) -> Result<RawResult, CaseError>;
}
