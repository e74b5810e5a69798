use crate::service::error::RequestError;

/// A candidate query that passed the read-only gate, with any trailing
/// semicolon removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeQuery {
    statement: String,
}

impl SafeQuery {
    pub fn statement(&self) -> &str {
        &self.statement
    }
}

/// Lexical gate for candidate SQL.
///
/// This is a heuristic, not a parser: a semicolon inside a string literal is
/// still treated as a statement separator, and a data-modifying CTE such as
/// `WITH x AS (INSERT ... RETURNING *) SELECT * FROM x` passes because it
/// starts with `with`. Writes of that kind only ever land in the case's
/// namespace, which is dropped afterwards.
pub fn validate(sql: &str) -> Result<SafeQuery, RequestError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(RequestError::EmptySql);
    }

    match trimmed.find(';') {
        Some(idx) if idx != trimmed.len() - 1 => return Err(RequestError::MultipleStatements),
        _ => {}
    }

    let lowered = trimmed.to_lowercase();
    if !(lowered.starts_with("select") || lowered.starts_with("with")) {
        return Err(RequestError::NotReadOnly);
    }

    let statement = trimmed.strip_suffix(';').unwrap_or(trimmed).to_string();
    Ok(SafeQuery { statement })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_select_and_strips_trailing_semicolon() {
        let query = validate("  SELECT name FROM employees ORDER BY salary DESC LIMIT 1;\n").unwrap();
        assert_eq!(
            query.statement(),
            "SELECT name FROM employees ORDER BY salary DESC LIMIT 1"
        );
    }

    #[test]
    fn accepts_common_table_expressions() {
        assert!(validate("with t as (select 1) select * from t").is_ok());
    }

    #[test]
    fn rejects_writes() {
        assert_eq!(validate("DELETE FROM employees;"), Err(RequestError::NotReadOnly));
    }

    #[test]
    fn rejects_multiple_statements() {
        assert_eq!(
            validate("SELECT 1; SELECT 2;"),
            Err(RequestError::MultipleStatements)
        );
    }

    #[test]
    fn rejects_blank_sql() {
        assert_eq!(validate(" \n\t"), Err(RequestError::EmptySql));
    }

    #[test]
    fn single_semicolon_alone_is_not_a_query() {
        assert_eq!(validate(";"), Err(RequestError::NotReadOnly));
    }
}
