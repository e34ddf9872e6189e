//! SQLite emission through `rusqlite`.
//!
//! Rows go into a single table `recovered_data(field1..fieldN)` with no
//! declared column types, so every value keeps its original storage class.

use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};

use crate::recovery::RecoveredRow;
use crate::sqlite::record::Value;
use crate::util::hex::format_bytes;
use crate::RecoveryError;

/// Name of the table rows are written to.
pub const TABLE_NAME: &str = "recovered_data";

/// How BLOB values that reach the emitter are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStorage {
    /// As BLOB values.
    Blob,
    /// As lowercase hex text.
    Hex,
}

fn to_sql(value: &Value, blobs: BlobStorage) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(n) => SqlValue::Integer(*n),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => match blobs {
            BlobStorage::Blob => SqlValue::Blob(b.clone()),
            BlobStorage::Hex => SqlValue::Text(format_bytes(b)),
        },
    }
}

/// Create `recovered_data` in the database at `path` and insert all rows in
/// one transaction.
///
/// Fails with [`RecoveryError::OutputWrite`] if the database cannot be
/// opened, the table already exists, or any insert fails. Nothing is
/// committed in that case.
pub fn write_sqlite(
    path: &Path,
    columns: &[String],
    rows: &[RecoveredRow],
    blobs: BlobStorage,
) -> Result<(), RecoveryError> {
    let err = |e: rusqlite::Error| {
        RecoveryError::OutputWrite(format!("{}: {}", path.display(), e))
    };

    if columns.is_empty() {
        return Err(RecoveryError::OutputWrite(format!(
            "{}: no columns to write",
            path.display()
        )));
    }

    let mut conn = Connection::open(path).map_err(err)?;
    let tx = conn.transaction().map_err(err)?;

    let column_list: Vec<String> = columns.iter().map(|c| format!("\"{}\"", c)).collect();
    tx.execute(
        &format!("CREATE TABLE {} ({})", TABLE_NAME, column_list.join(", ")),
        [],
    )
    .map_err(err)?;

    {
        let placeholders = vec!["?"; columns.len()].join(", ");
        let mut stmt = tx
            .prepare(&format!("INSERT INTO {} VALUES ({})", TABLE_NAME, placeholders))
            .map_err(err)?;
        for row in rows {
            stmt.execute(params_from_iter(row.values.iter().map(|v| to_sql(v, blobs))))
                .map_err(err)?;
        }
    }

    tx.commit().map_err(err)
}
