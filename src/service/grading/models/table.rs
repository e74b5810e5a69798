use serde::{Deserialize, Serialize};

/// A normalized cell, always one of null, string, number or boolean
pub type Cell = serde_json::Value;

pub type Row = Vec<Cell>;

/// Portable rendition of a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTable {
    /// Output column names in the order the backend reported them
    pub(crate) columns: Vec<String>,

    /// At most `row_limit` rows, in backend order
    pub(crate) rows: Vec<Row>,

    /// Set when the backend produced more rows than were kept
    pub(crate) truncated: bool,
}

impl NormalizedTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}
