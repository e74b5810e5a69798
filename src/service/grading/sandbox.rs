use std::time::Instant;

use serde_json::{Map, Value};

use crate::service::error::CaseError;

use super::{
    comparator,
    models::{Case, CaseResult, NormalizedTable, PreparedCase, Status, TableSpec},
    normalizer,
    safety::SafeQuery,
    session::Session,
    GradingLimits,
};

/*
    # Life of a case inside its sandbox

    START ──► BEGIN + SET LOCAL statement_timeout ──► CREATE SCHEMA + search_path
                                                              │
    ┌──────────────── fixtures (CREATE TABLE, INSERT) ◄───────┘
    │
    └──► candidate query ──► normalize ──► DROP SCHEMA + COMMIT ──► DONE

    Any failure before the query result is captured issues a ROLLBACK, which
    takes the schema and everything in it along with the transaction.
*/

/// Quotes an identifier for the backend, doubling any embedded `"`
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Fresh namespace name with 48 random bits
pub fn allocate_namespace() -> String {
    let suffix: [u8; 6] = rand::random();
    let hex: String = suffix.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sandbox_{}", hex)
}

/// Runs the candidate query against one case and judges the outcome.
///
/// Never fails: every error is folded into an ERROR case result, and the
/// session is left outside of any transaction.
pub fn run_case<S>(
    session: &mut S,
    query: &SafeQuery,
    case: &PreparedCase,
    limits: &GradingLimits,
) -> CaseResult
where
    S: Session + ?Sized,
{
    let started = Instant::now();
    let elapsed_ms = || started.elapsed().as_millis() as u64;

    let spec = match &case.spec {
        Ok(spec) => spec,
        Err(e) => return CaseResult::failed(case.name.clone(), elapsed_ms(), e.to_string()),
    };

    let namespace = allocate_namespace();
    trace!("case {}: START in namespace {}", case.name(), namespace);

    let actual = match materialize_and_query(session, &namespace, spec, query, limits) {
        Ok(actual) => actual,
        Err(e) => {
            rollback(session, case.name());
            debug!("case {}: FAILED after {}ms: {}", case.name(), elapsed_ms(), e);
            return CaseResult::failed(case.name.clone(), elapsed_ms(), e.to_string());
        }
    };

    teardown(session, &namespace, case.name());

    let result = judge(case.name.clone(), spec, actual, elapsed_ms(), limits);
    debug!(
        "case {}: DONE with {:?} after {}ms",
        result.name, result.status, result.runtime_ms
    );
    result
}

fn materialize_and_query<S>(
    session: &mut S,
    namespace: &str,
    spec: &Case,
    query: &SafeQuery,
    limits: &GradingLimits,
) -> Result<NormalizedTable, CaseError>
where
    S: Session + ?Sized,
{
    session.execute("BEGIN", &[])?;
    session.execute(
        &format!("SET LOCAL statement_timeout = {}", limits.statement_timeout_ms),
        &[],
    )?;

    session.execute(&format!("CREATE SCHEMA {}", quote_ident(namespace)), &[])?;
    session.execute(
        &format!("SET LOCAL search_path TO {}", quote_ident(namespace)),
        &[],
    )?;
    trace!("namespace {}: SCOPE_CREATED", namespace);

    for table in &spec.tables {
        load_fixture(session, table)?;
    }
    trace!("namespace {}: FIXTURES_LOADED", namespace);

    let raw = session.query(query.statement())?;
    trace!("namespace {}: QUERY_EXECUTED", namespace);

    Ok(normalizer::normalize(raw, limits.row_limit))
}

fn load_fixture<S>(session: &mut S, table: &TableSpec) -> Result<(), CaseError>
where
    S: Session + ?Sized,
{
    let table_name = quote_ident(&table.name);
    let definitions = table
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(c.name()), c.declaration()))
        .collect::<Vec<_>>()
        .join(", ");
    session.execute(&format!("CREATE TABLE {} ({})", table_name, definitions), &[])?;

    if table.rows.is_empty() {
        return Ok(());
    }

    // Values travel as one bound JSON object per row and are cast server side
    // to each column's declared type
    let column_list = table
        .columns
        .iter()
        .map(|c| quote_ident(c.name()))
        .collect::<Vec<_>>()
        .join(", ");
    let insert = format!(
        "INSERT INTO {table} ({cols}) SELECT {cols} FROM json_populate_record(NULL::{table}, $1::json)",
        table = table_name,
        cols = column_list
    );

    for row in &table.rows {
        let record: Map<String, Value> = table
            .columns
            .iter()
            .zip(row)
            .map(|(column, value)| (column.name().to_string(), value.clone()))
            .collect();
        session.execute(&insert, &[Value::Object(record)])?;
    }

    Ok(())
}

/// Drops the namespace and commits. Failures here are advisory: the rollback
/// that follows discards the namespace anyway.
fn teardown<S>(session: &mut S, namespace: &str, case_name: &str)
where
    S: Session + ?Sized,
{
    let cleanup = session
        .execute(&format!("DROP SCHEMA {} CASCADE", quote_ident(namespace)), &[])
        .and_then(|_| session.execute("COMMIT", &[]));

    match cleanup {
        Ok(_) => trace!("namespace {}: SCOPE_DROPPED", namespace),
        Err(e) => {
            warn!(
                "case {}: dropping namespace {} failed, rolling back instead: {}",
                case_name, namespace, e
            );
            rollback(session, case_name);
        }
    }
}

fn rollback<S>(session: &mut S, case_name: &str)
where
    S: Session + ?Sized,
{
    if let Err(e) = session.execute("ROLLBACK", &[]) {
        warn!("case {}: rollback failed: {}", case_name, e);
    }
}

fn judge(
    name: String,
    spec: &Case,
    actual: NormalizedTable,
    runtime_ms: u64,
    limits: &GradingLimits,
) -> CaseResult {
    let expected = match &spec.expected {
        Some(expected) => expected.normalized(),
        None => {
            return CaseResult {
                name,
                status: Status::Ok,
                runtime_ms,
                actual: Some(actual),
                expected: None,
                diff: None,
                error: None,
            }
        }
    };

    let judgement = comparator::compare(&actual, &expected, limits.diff_limit);
    CaseResult {
        name,
        status: judgement.status,
        runtime_ms,
        actual: Some(actual),
        expected: Some(expected),
        diff: Some(judgement.diff),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;
    use crate::service::grading::{
        safety,
        session::{fake::FakeSession, RawResult, RawValue},
    };

    const QUERY: &str = "SELECT name FROM employees ORDER BY salary DESC LIMIT 1";

    fn employees_case(expected: Value) -> PreparedCase {
        let mut case = json!({
            "name": "case1",
            "tables": [{
                "name": "employees",
                "columns": [["id", "INT"], ["name", "TEXT"], ["salary", "INT"]],
                "rows": [[1, "Alice", 100], [2, "Bob", 80], [3, "Cindy", 120]]
            }]
        });
        if !expected.is_null() {
            case["expected"] = expected;
        }
        PreparedCase::decode(0, case)
    }

    fn cindy() -> RawResult {
        RawResult {
            columns: vec!["name".into()],
            rows: vec![vec![RawValue::Text("Cindy".into())]],
        }
    }

    fn query() -> SafeQuery {
        safety::validate(&format!("{};", QUERY)).unwrap()
    }

    #[test]
    fn quotes_identifiers_by_doubling_quotes() {
        assert_eq!(quote_ident("employees"), "\"employees\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn namespaces_are_unique_and_well_formed() {
        let names: HashSet<String> = (0..1000).map(|_| allocate_namespace()).collect();
        assert_eq!(names.len(), 1000);
        for name in names {
            assert_eq!(name.len(), "sandbox_".len() + 12);
            assert!(name["sandbox_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn successful_case_walks_every_state_in_order() {
        let mut session = FakeSession::default().with_result(QUERY, cindy());
        let case = employees_case(json!({ "columns": ["name"], "rows": [["Cindy"]] }));

        let result = run_case(&mut session, &query(), &case, &GradingLimits::default());

        assert_eq!(result.status, Status::Ac);
        let insert = "INSERT INTO \"employees\" (\"id\", \"name\", \"salary\") SELECT \"id\", \"name\", \"salary\" FROM json_populate_record(NULL::\"employees\", $1::json)";
        assert_eq!(
            session.transcript(),
            vec![
                "BEGIN".to_string(),
                "SET LOCAL statement_timeout = 2000".into(),
                "CREATE SCHEMA <ns>".into(),
                "SET LOCAL search_path TO <ns>".into(),
                "CREATE TABLE \"employees\" (\"id\" INT, \"name\" TEXT, \"salary\" INT)".into(),
                insert.into(),
                insert.into(),
                insert.into(),
                QUERY.into(),
                "DROP SCHEMA <ns> CASCADE".into(),
                "COMMIT".into(),
            ]
        );
    }

    #[test]
    fn seed_rows_are_bound_not_interpolated() {
        let mut session = FakeSession::default().with_result(QUERY, cindy());
        run_case(&mut session, &query(), &employees_case(Value::Null), &GradingLimits::default());

        let bound: Vec<&Vec<Value>> = session.params.iter().filter(|p| !p.is_empty()).collect();
        assert_eq!(bound.len(), 3);
        assert_eq!(bound[0][0], json!({ "id": 1, "name": "Alice", "salary": 100 }));
        assert!(session.statements.iter().all(|s| !s.contains("Alice")));
    }

    #[test]
    fn missing_expectation_yields_ok_with_actual() {
        let mut session = FakeSession::default().with_result(QUERY, cindy());
        let result = run_case(&mut session, &query(), &employees_case(Value::Null), &GradingLimits::default());

        assert_eq!(result.status, Status::Ok);
        assert_eq!(result.actual.unwrap().rows(), &[vec![json!("Cindy")]]);
        assert!(result.diff.is_none());
    }

    #[test]
    fn wrong_rows_yield_wa_with_diff() {
        let mut session = FakeSession::default().with_result(QUERY, cindy());
        let case = employees_case(json!({ "columns": ["name"], "rows": [["Alice"]] }));

        let result = run_case(&mut session, &query(), &case, &GradingLimits::default());

        assert_eq!(result.status, Status::Wa);
        let diff = result.diff.unwrap();
        assert_eq!(diff.missing, &[vec![json!("Alice")]]);
        assert_eq!(diff.extra, &[vec![json!("Cindy")]]);
    }

    #[test]
    fn failing_fixture_rolls_back_without_running_the_query() {
        let mut session = FakeSession::default()
            .with_result(QUERY, cindy())
            .failing_on("INSERT INTO");
        let case = employees_case(json!({ "columns": ["name"], "rows": [["Cindy"]] }));

        let result = run_case(&mut session, &query(), &case, &GradingLimits::default());

        assert_eq!(result.status, Status::Error);
        assert_eq!(result.error.as_deref(), Some("fake failure on INSERT INTO"));
        assert_eq!(session.statements.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!session.statements.iter().any(|s| s == QUERY));
        assert!(!session.statements.iter().any(|s| s.starts_with("DROP SCHEMA")));
    }

    #[test]
    fn failing_query_is_an_error_for_the_case() {
        let mut session = FakeSession::default();
        let result = run_case(&mut session, &query(), &employees_case(Value::Null), &GradingLimits::default());

        assert_eq!(result.status, Status::Error);
        assert!(result.actual.is_none());
        assert_eq!(session.statements.last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn failed_cleanup_keeps_the_verdict() {
        let mut session = FakeSession::default()
            .with_result(QUERY, cindy())
            .failing_on("DROP SCHEMA");
        let case = employees_case(json!({ "columns": ["name"], "rows": [["Cindy"]] }));

        let result = run_case(&mut session, &query(), &case, &GradingLimits::default());

        assert_eq!(result.status, Status::Ac);
        assert_eq!(session.statements.last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn malformed_case_never_reaches_the_backend() {
        let mut session = FakeSession::default();
        let case = PreparedCase::decode(1, json!({ "tables": [{ "columns": [["id", "INT"]] }] }));

        let result = run_case(&mut session, &query(), &case, &GradingLimits::default());

        assert_eq!(result.name, "case2");
        assert_eq!(result.status, Status::Error);
        assert!(result.error.unwrap().starts_with("malformed case"));
        assert!(session.statements.is_empty());
    }

    #[test]
    fn configured_timeout_is_scoped_to_the_transaction() {
        let mut session = FakeSession::default().with_result(QUERY, cindy());
        let limits = GradingLimits {
            statement_timeout_ms: 500,
            ..GradingLimits::default()
        };

        run_case(&mut session, &query(), &employees_case(Value::Null), &limits);

        assert_eq!(session.statements[1], "SET LOCAL statement_timeout = 500");
    }
}
