use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::service::{error::CaseError, grading::normalizer};

use super::Row;

/// One `[name, type declaration]` pair of a fixture table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec(pub(crate) String, pub(crate) String);

impl ColumnSpec {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn declaration(&self) -> &str {
        &self.1
    }
}

/// A fixture table, created inside the case's namespace before the query runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub(crate) name: String,
    pub(crate) columns: Vec<ColumnSpec>,

    /// Seed rows, positionally aligned with `columns`
    #[serde(default)]
    pub(crate) rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedResult {
    #[serde(default)]
    pub(crate) columns: Vec<String>,

    #[serde(default)]
    pub(crate) rows: Vec<Row>,

    #[serde(default)]
    pub(crate) order_sensitive: bool,
}

impl ExpectedResult {
    /// Copy of the expectation with every cell run through the same
    /// normalization as actual query output
    pub fn normalized(&self) -> ExpectedResult {
        ExpectedResult {
            columns: self.columns.clone(),
            rows: self.rows.iter().map(|row| normalizer::normalize_row(row)).collect(),
            order_sensitive: self.order_sensitive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    #[serde(default)]
    pub(crate) name: Option<String>,

    #[serde(default)]
    pub(crate) tables: Vec<TableSpec>,

    #[serde(default)]
    pub(crate) expected: Option<ExpectedResult>,
}

impl Case {
    /// Checks what the backend cannot be trusted to reject on its own
    fn validate(&self) -> Result<(), CaseError> {
        for table in &self.tables {
            check_identifier("table name", &table.name)?;

            for column in &table.columns {
                check_identifier("column name", column.name())?;
                if column.declaration().trim().is_empty() {
                    return Err(CaseError::Setup(format!(
                        "column \"{}\" of table \"{}\" has no type",
                        column.name(),
                        table.name
                    )));
                }
            }

            for (index, row) in table.rows.iter().enumerate() {
                if row.len() != table.columns.len() {
                    return Err(CaseError::Setup(format!(
                        "row {} of table \"{}\" has {} values but the table has {} columns",
                        index + 1,
                        table.name,
                        row.len(),
                        table.columns.len()
                    )));
                }
            }
        }

        Ok(())
    }
}

fn check_identifier(kind: &str, ident: &str) -> Result<(), CaseError> {
    if ident.is_empty() || ident.contains('\0') {
        return Err(CaseError::Setup(format!("invalid {}: {:?}", kind, ident)));
    }

    Ok(())
}

/// A case as it enters a grading run.
///
/// Decoding failures are kept so the case can still be reported by name as an
/// ERROR instead of failing the whole request.
#[derive(Debug, Clone)]
pub struct PreparedCase {
    pub(crate) name: String,
    pub(crate) spec: Result<Case, CaseError>,
}

impl PreparedCase {
    /// Decodes the case at `position` (zero based) of a request
    pub fn decode(position: usize, raw: Value) -> Self {
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("case{}", position + 1));

        let spec = serde_json::from_value::<Case>(raw)
            .map_err(|e| {
                CaseError::Setup(format!(
                    "malformed case, every table needs a name and a list of [column, type] pairs: {}",
                    e
                ))
            })
            .and_then(|case| case.validate().map(|_| case));

        PreparedCase { name, spec }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
