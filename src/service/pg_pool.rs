/*
    r2d2 connection manager for postgres, plus the glue that lets a pooled
    client act as a grading `Session`
*/

use std::error::Error as StdError;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::{
    types::{FromSql, Kind, ToSql, Type},
    Client, NoTls,
};
use serde::Deserialize;
use serde_json::Value;

use crate::service::{
    error::CaseError,
    grading::session::{RawResult, RawValue, Session},
};

type DecodeError = Box<dyn StdError + Sync + Send>;

/// Backend connection parameters, read from the `PG*` environment variables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PgParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for PgParams {
    fn default() -> Self {
        PgParams {
            host: "127.0.0.1".into(),
            port: 5432,
            user: "postgres".into(),
            password: String::new(),
            database: "postgres".into(),
        }
    }
}

#[derive(Debug)]
pub struct PostgresConnectionManager {
    config: postgres::Config,
}

impl PostgresConnectionManager {
    /// Creates a new `PostgresConnectionManager`.
    ///
    /// No connection is attempted until the pool asks for one.
    pub fn new(params: &PgParams) -> PostgresConnectionManager {
        let mut config = postgres::Config::new();
        config
            .host(&params.host)
            .port(params.port)
            .user(&params.user)
            .dbname(&params.database)
            .application_name("sqlgrade");
        if !params.password.is_empty() {
            config.password(&params.password);
        }

        PostgresConnectionManager { config }
    }

    /// Opens a client outside of any pool
    pub fn open(&self) -> Result<Client, postgres::Error> {
        self.config.connect(NoTls)
    }
}

impl r2d2::ManageConnection for PostgresConnectionManager {
    type Connection = Client;
    type Error = postgres::Error;

    fn connect(&self) -> Result<Client, postgres::Error> {
        self.open()
    }

    fn is_valid(&self, conn: &mut Client) -> Result<(), postgres::Error> {
        conn.simple_query("").map(|_| ())
    }

    fn has_broken(&self, conn: &mut Client) -> bool {
        conn.is_closed()
    }
}

/// Prefers the server's own message, which is what a candidate needs to see
fn backend_error(e: postgres::Error) -> CaseError {
    match e.as_db_error() {
        Some(db) => CaseError::Backend(db.message().to_string()),
        None => CaseError::Backend(e.to_string()),
    }
}

impl Session for Client {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, CaseError> {
        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        Client::execute(self, sql, &params).map_err(backend_error)
    }

    fn query(&mut self, sql: &str) -> Result<RawResult, CaseError> {
        let statement = self.prepare(sql).map_err(backend_error)?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let types: Vec<Type> = statement
            .columns()
            .iter()
            .map(|c| c.type_().clone())
            .collect();

        let statement = if types.iter().all(decodes_natively) {
            statement
        } else {
            let projected = text_projection(sql, &types);
            trace!("Re-projecting query without binary decoders: {}", projected);
            self.prepare(&projected).map_err(backend_error)?
        };

        let rows = Client::query(self, &statement, &[])
            .map_err(backend_error)?
            .iter()
            .map(|row| {
                (0..columns.len())
                    .map(|idx| {
                        row.try_get::<_, Option<PgCell>>(idx)
                            .map(|cell| cell.map_or(RawValue::Null, |c| c.0))
                            .map_err(|e| CaseError::Backend(decode_message(&e)))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RawResult { columns, rows })
    }
}

/// Wraps a query so that every column without a binary decoder comes back as
/// text, or as JSON for arrays and composites.
///
/// Output columns are renamed positionally so duplicate names survive the
/// derived table; the caller keeps the original names. The query sits on its
/// own lines so a trailing line comment cannot swallow the closing paren.
fn text_projection(sql: &str, types: &[Type]) -> String {
    let projection = types
        .iter()
        .enumerate()
        .map(|(idx, ty)| {
            let cell = format!("q.c{}", idx + 1);
            if decodes_natively(ty) {
                cell
            } else if *ty == Type::RECORD
                || matches!(ty.kind(), Kind::Array(_) | Kind::Composite(_))
            {
                format!("to_json({})", cell)
            } else {
                format!("{}::text", cell)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let aliases = (1..=types.len())
        .map(|idx| format!("c{}", idx))
        .collect::<Vec<_>>()
        .join(", ");

    format!("SELECT {} FROM (\n{}\n) AS q({})", projection, sql, aliases)
}

/// Column types `PgCell` reads straight from the binary wire format
fn decodes_natively(ty: &Type) -> bool {
    match *ty {
        Type::BOOL
        | Type::INT2
        | Type::INT4
        | Type::OID
        | Type::INT8
        | Type::FLOAT4
        | Type::FLOAT8
        | Type::NUMERIC
        | Type::JSON
        | Type::JSONB
        | Type::DATE
        | Type::TIME
        | Type::TIMESTAMP
        | Type::TIMESTAMPTZ
        | Type::UUID
        | Type::BYTEA => true,
        _ => <String as FromSql<'_>>::accepts(ty) || matches!(ty.kind(), Kind::Enum(_)),
    }
}

fn decode_message(e: &postgres::Error) -> String {
    match e.source() {
        Some(source) => source.to_string(),
        None => e.to_string(),
    }
}

/// Any result cell, decoded from the binary wire format by column type
struct PgCell(RawValue);

impl<'a> FromSql<'a> for PgCell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<PgCell, DecodeError> {
        let value = match *ty {
            Type::BOOL => RawValue::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => RawValue::Int(i16::from_sql(ty, raw)? as i64),
            Type::INT4 => RawValue::Int(i32::from_sql(ty, raw)? as i64),
            Type::OID => RawValue::Int(u32::from_sql(ty, raw)? as i64),
            Type::INT8 => RawValue::BigInt(i64::from_sql(ty, raw)?),
            // Shortest decimal that round-trips the f32, so a stored 1.1 stays 1.1
            Type::FLOAT4 => RawValue::Float(f32::from_sql(ty, raw)?.to_string().parse()?),
            Type::FLOAT8 => RawValue::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => RawValue::Decimal(decode_numeric(raw)?),
            Type::JSON | Type::JSONB => RawValue::Json(Value::from_sql(ty, raw)?),
            Type::DATE => RawValue::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => RawValue::Time(NaiveTime::from_sql(ty, raw)?),
            Type::TIMESTAMP => RawValue::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => RawValue::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::UUID => RawValue::Text(uuid::Uuid::from_sql(ty, raw)?.to_string()),
            Type::BYTEA => RawValue::Bytes(raw.to_vec()),
            _ if <String as FromSql<'_>>::accepts(ty) => RawValue::Text(String::from_sql(ty, raw)?),
            _ if matches!(ty.kind(), Kind::Enum(_)) => {
                RawValue::Text(std::str::from_utf8(raw)?.to_string())
            }
            // Unreachable through `Session::query`, which re-projects these columns
            _ => return Err(format!("no decoder for result column type {}", ty).into()),
        };

        Ok(PgCell(value))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Renders a binary `numeric` as exact decimal text, keeping its display scale.
///
/// Layout: ndigits, weight, sign, dscale (all 16 bit), then `ndigits` base
/// 10000 digits, the first carrying weight `weight`.
fn decode_numeric(raw: &[u8]) -> Result<String, DecodeError> {
    let word = |at: usize| -> Result<u16, DecodeError> {
        raw.get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "numeric value is truncated".into())
    };

    let ndigits = word(0)? as usize;
    let weight = word(2)? as i16 as i32;
    let sign = word(4)?;
    let dscale = word(6)? as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".into()),
        NUMERIC_PINF => return Ok("Infinity".into()),
        NUMERIC_NINF => return Ok("-Infinity".into()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(8 + i * 2))
        .collect::<Result<Vec<u16>, _>>()?;
    let group = |position: i32| -> u16 {
        if position < 0 {
            0
        } else {
            digits.get(position as usize).copied().unwrap_or(0)
        }
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&group(0).to_string());
        for position in 1..=weight {
            text.push_str(&format!("{:04}", group(position)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut position = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(position)));
            position += 1;
        }
        fraction.truncate(dscale);

        text.push('.');
        text.push_str(&fraction);
    }

    Ok(text)
}
