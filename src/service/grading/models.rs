pub use case::{Case, ColumnSpec, ExpectedResult, PreparedCase, TableSpec};
pub use table::{Cell, NormalizedTable, Row};
pub use verdict::{CaseResult, RowDiff, RunResult, Status};

// Request side models (what the caller sends in)
pub mod case;

// Result side models (what is sent back)
pub mod table;
pub mod verdict;
