//! Padding recovered rows to a common width.

use crate::recovery::RecoveredRow;
use crate::sqlite::record::Value;

/// Pad every row on the right with `Null` to the widest row's column count.
///
/// Returns the column count. Existing values keep their positions.
///
/// # Examples
///
/// ```
/// use sqlrec::recovery::normalize::normalize_rows;
/// use sqlrec::recovery::{Origin, RecoveredRow};
/// use sqlrec::sqlite::record::Value;
///
/// let row = |n: usize| RecoveredRow {
///     values: vec![Value::Integer(1); n],
///     origin: Origin::Live,
///     corrupted: false,
///     page: 2,
///     offset: 0,
///     rowid: None,
/// };
/// let mut rows = vec![row(2), row(3), row(1)];
/// assert_eq!(normalize_rows(&mut rows), 3);
/// assert!(rows.iter().all(|r| r.values.len() == 3));
/// assert_eq!(rows[2].values[1], Value::Null);
/// ```
pub fn normalize_rows(rows: &mut [RecoveredRow]) -> usize {
    let width = rows.iter().map(|r| r.values.len()).max().unwrap_or(0);
    for row in rows.iter_mut() {
        row.values.resize(width, Value::Null);
    }
    width
}

/// Column names `field1..fieldN`.
pub fn column_names(width: usize) -> Vec<String> {
    (1..=width).map(|i| format!("field{}", i)).collect()
}
