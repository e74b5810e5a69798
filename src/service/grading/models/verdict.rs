use serde::{Deserialize, Serialize};

use super::{case::ExpectedResult, table::NormalizedTable, Row};

/// Verdict of a case or a run.
///
/// Variants are declared in aggregation priority, so the overall verdict of a
/// run is the maximum of its case verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Executed, no expectation was given
    Ok,
    /// Accepted
    Ac,
    /// Wrong answer
    Wa,
    /// Setup or execution failure
    Error,
}

/// Rows present on one side of the comparison but not the other
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowDiff {
    pub(crate) missing: Vec<Row>,
    pub(crate) extra: Vec<Row>,
}

impl RowDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }

    /// Cuts both lists down to `limit` entries for reporting
    pub fn truncated(mut self, limit: usize) -> Self {
        self.missing.truncate(limit);
        self.extra.truncate(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    pub(crate) name: String,
    pub(crate) status: Status,

    /// Wall clock time from case start to final outcome
    pub(crate) runtime_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) actual: Option<NormalizedTable>,

    /// The expectation as it was compared, after normalization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) expected: Option<ExpectedResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) diff: Option<RowDiff>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl CaseResult {
    pub fn failed(name: String, runtime_ms: u64, error: String) -> Self {
        CaseResult {
            name,
            status: Status::Error,
            runtime_ms,
            actual: None,
            expected: None,
            diff: None,
            error: Some(error),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub(crate) overall: Status,
    pub(crate) cases: Vec<CaseResult>,
}

impl RunResult {
    /// ERROR beats WA beats AC beats OK
    pub fn aggregate(cases: Vec<CaseResult>) -> Self {
        let overall = cases
            .iter()
            .map(CaseResult::status)
            .max()
            .unwrap_or(Status::Ok);

        RunResult { overall, cases }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: Status) -> CaseResult {
        CaseResult {
            name: "c".into(),
            status,
            runtime_ms: 0,
            actual: None,
            expected: None,
            diff: None,
            error: None,
        }
    }

    #[test]
    fn overall_verdict_follows_priority() {
        let run = |statuses: &[Status]| {
            RunResult::aggregate(statuses.iter().copied().map(result).collect()).overall
        };

        assert_eq!(run(&[Status::Ok, Status::Ok]), Status::Ok);
        assert_eq!(run(&[Status::Ok, Status::Ac]), Status::Ac);
        assert_eq!(run(&[Status::Ac, Status::Wa, Status::Ok]), Status::Wa);
        assert_eq!(run(&[Status::Wa, Status::Error, Status::Ac]), Status::Error);
    }

    #[test]
    fn status_serializes_as_upper_case_code() {
        assert_eq!(serde_json::to_string(&Status::Wa).unwrap(), "\"WA\"");
        assert_eq!(serde_json::to_string(&Status::Error).unwrap(), "\"ERROR\"");
    }

    #[test]
    fn case_result_uses_camel_case_and_omits_absent_parts() {
        let json = serde_json::to_value(CaseResult::failed("case1".into(), 7, "boom".into()))
            .unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "name": "case1",
                "status": "ERROR",
                "runtimeMs": 7,
                "error": "boom"
            })
        );
    }
}
