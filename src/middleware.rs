use serde::Deserialize;
use serde_json::Value;

use crate::service::{
    error::RequestError,
    grading::{
        models::PreparedCase,
        safety::{self, SafeQuery},
    },
};

/// Body of `POST /api/run`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default)]
    pub(crate) problem_text: Option<String>,

    /// JSON text holding `{ cases: [...] }`, or the older `{ tables: [...] }`
    #[serde(default)]
    pub(crate) tables_json: Option<String>,

    /// Kept untyped so a non-string value is reported as a bad query
    #[serde(default)]
    pub(crate) sql: Value,
}

/// A request that made it through every check that does not need the database
#[derive(Debug, Clone)]
pub struct AdmittedRun {
    pub(crate) problem_text: String,
    pub(crate) query: SafeQuery,
    pub(crate) cases: Vec<PreparedCase>,
}

/// run_request_interceptor
///
/// Validates the candidate SQL and decodes the cases before a run is queued
pub fn run_request_interceptor(request: RunRequest) -> Result<AdmittedRun, RequestError> {
    let sql = match &request.sql {
        Value::String(sql) if !sql.is_empty() => sql,
        _ => return Err(RequestError::EmptySql),
    };
    let query = safety::validate(sql)?;

    let tables_json = request.tables_json.as_deref().unwrap_or("");
    let tables_json = if tables_json.trim().is_empty() { "{}" } else { tables_json };
    let payload: Value = serde_json::from_str(tables_json)
        .map_err(|e| RequestError::InvalidCasesJson(e.to_string()))?;

    let cases = extract_cases(payload);
    if cases.is_empty() {
        return Err(RequestError::NoCases);
    }

    info!("Admitted run request with {} case(s)", cases.len());
    Ok(AdmittedRun {
        problem_text: request.problem_text.unwrap_or_default(),
        query,
        cases,
    })
}

/// Pulls the cases out of a payload, wrapping a bare table list into a single
/// case named `case1`
fn extract_cases(mut payload: Value) -> Vec<PreparedCase> {
    let raw_cases = if let Some(Value::Array(cases)) = payload.get_mut("cases") {
        std::mem::take(cases)
    } else if let Some(tables) = payload.get_mut("tables").filter(|t| t.is_array()) {
        vec![serde_json::json!({ "name": "case1", "tables": tables.take() })]
    } else {
        Vec::new()
    };

    raw_cases
        .into_iter()
        .enumerate()
        .map(|(position, raw)| PreparedCase::decode(position, raw))
        .collect()
}
