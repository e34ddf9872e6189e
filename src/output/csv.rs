//! CSV emission (RFC 4180).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::recovery::RecoveredRow;
use crate::sqlite::record::Value;
use crate::util::hex::format_bytes;
use crate::RecoveryError;

/// Render one value as a CSV field.
///
/// NULL is an empty field, blobs are lowercase hex, reals keep a decimal
/// point (`1.0`, not `1`) so they stay distinguishable from integers.
///
/// # Examples
///
/// ```
/// use sqlrec::output::csv::csv_field;
/// use sqlrec::sqlite::record::Value;
///
/// assert_eq!(csv_field(&Value::Null), "");
/// assert_eq!(csv_field(&Value::Real(1.0)), "1.0");
/// assert_eq!(csv_field(&Value::Text("a,b".into())), "\"a,b\"");
/// assert_eq!(csv_field(&Value::Blob(vec![0xDE, 0xAD])), "dead");
/// ```
pub fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(n) => n.to_string(),
        Value::Real(f) => format!("{:?}", f),
        Value::Text(s) => csv_escape(s),
        Value::Blob(b) => format_bytes(b),
    }
}

/// Quote a string field if it contains a delimiter, quote or line break.
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Write a header line and one line per row.
pub fn write_csv(
    writer: &mut dyn Write,
    columns: &[String],
    rows: &[RecoveredRow],
) -> Result<(), RecoveryError> {
    let header: Vec<String> = columns.iter().map(|c| csv_escape(c)).collect();
    write_line(writer, &header.join(","))?;

    for row in rows {
        let fields: Vec<String> = row.values.iter().map(csv_field).collect();
        write_line(writer, &fields.join(","))?;
    }
    Ok(())
}

/// Create (or truncate) `path` and write the rows as CSV.
pub fn write_csv_file(
    path: &Path,
    columns: &[String],
    rows: &[RecoveredRow],
) -> Result<(), RecoveryError> {
    let file = File::create(path).map_err(|e| {
        RecoveryError::OutputWrite(format!("Cannot create {}: {}", path.display(), e))
    })?;
    let mut writer = BufWriter::new(file);
    write_csv(&mut writer, columns, rows)?;
    writer
        .flush()
        .map_err(|e| RecoveryError::OutputWrite(format!("Cannot write {}: {}", path.display(), e)))
}

// RFC 4180 records end in CRLF
fn write_line(writer: &mut dyn Write, line: &str) -> Result<(), RecoveryError> {
    write!(writer, "{}\r\n", line).map_err(|e| RecoveryError::OutputWrite(e.to_string()))
}
