use std::collections::HashMap;

use super::models::{Cell, ExpectedResult, NormalizedTable, Row, RowDiff, Status};

#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub(crate) status: Status,
    pub(crate) diff: RowDiff,
}

/// Judges `actual` against an already normalized expectation.
///
/// The verdict is computed over the full row sets; `diff_limit` only caps
/// what is reported.
pub fn compare(actual: &NormalizedTable, expected: &ExpectedResult, diff_limit: usize) -> Judgement {
    if !columns_match(actual.columns(), &expected.columns) {
        return Judgement {
            status: Status::Wa,
            diff: RowDiff::default(),
        };
    }

    let (accepted, diff) = if expected.order_sensitive {
        let in_order = actual.rows().len() == expected.rows.len()
            && actual
                .rows()
                .iter()
                .zip(&expected.rows)
                .all(|(a, e)| row_key(a) == row_key(e));

        // The bag diff is only diagnostic here, the verdict is positional
        let diff = if in_order {
            RowDiff::default()
        } else {
            multiset_diff(actual.rows(), &expected.rows)
        };
        (in_order, diff)
    } else {
        let diff = multiset_diff(actual.rows(), &expected.rows);
        (diff.is_empty(), diff)
    };

    Judgement {
        status: if accepted { Status::Ac } else { Status::Wa },
        diff: diff.truncated(diff_limit),
    }
}

/// Same length, same names at the same positions, ignoring case
pub fn columns_match(actual: &[String], expected: &[String]) -> bool {
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected)
            .all(|(a, e)| a.to_lowercase() == e.to_lowercase())
}

/// Bag difference with multiplicity: `missing = expected \ actual`,
/// `extra = actual \ expected`. Extra rows come out in actual order.
pub fn multiset_diff(actual: &[Row], expected: &[Row]) -> RowDiff {
    let actual_keys: Vec<String> = actual.iter().map(|row| row_key(row)).collect();

    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for key in &actual_keys {
        *remaining.entry(key.as_str()).or_default() += 1;
    }

    let mut missing = Vec::new();
    for row in expected {
        let key = row_key(row);
        match remaining.get_mut(key.as_str()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => missing.push(row.clone()),
        }
    }

    let mut extra = Vec::new();
    for (row, key) in actual.iter().zip(&actual_keys) {
        if let Some(count) = remaining.get_mut(key.as_str()) {
            if *count > 0 {
                *count -= 1;
                extra.push(row.clone());
            }
        }
    }

    RowDiff { missing, extra }
}

/// Injective encoding of a normalized row.
///
/// Each cell is its JSON text; JSON text never contains a raw U+001F, so the
/// separator cannot be confused with cell content.
pub fn row_key(row: &[Cell]) -> String {
    let mut key = String::new();
    for cell in row {
        key.push_str(&cell.to_string());
        key.push('\u{1f}');
    }
    key
}
