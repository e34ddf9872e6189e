//! Record format decoding and encoding.
//!
//! A record is a header followed by a body. The header starts with a varint
//! giving the total header length (including itself), followed by one
//! serial-type varint per column. The body holds the column values in the
//! same order, each sized by its serial type:
//!
//! | Serial type | Storage class | Body bytes |
//! |-------------|---------------|------------|
//! | 0 | NULL | 0 |
//! | 1..=6 | signed big-endian integer | 1, 2, 3, 4, 6, 8 |
//! | 7 | IEEE-754 double | 8 |
//! | 8, 9 | integer constant 0 / 1 | 0 |
//! | 10, 11 | reserved | invalid |
//! | N >= 12, even | BLOB | (N-12)/2 |
//! | N >= 13, odd | TEXT | (N-13)/2 |
//!
//! [`decode_record`] never fails: it stops at the first inconsistency and
//! returns whatever columns it decoded, flagged as corrupted.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::sqlite::header::TextEncoding;
use crate::sqlite::varint::{read_varint, varint_len, write_varint};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Storage class name as SQLite's `typeof()` reports it.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Blob(v) => write!(f, "{}", crate::util::hex::format_bytes(v)),
        }
    }
}

/// A column's serial type, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialType {
    Null,
    /// Signed big-endian integer of the given width in bytes.
    Int(usize),
    Float,
    Zero,
    One,
    Blob(usize),
    Text(usize),
    /// Codes 10 and 11, reserved for internal use and never valid on disk.
    Reserved(u64),
}

impl SerialType {
    /// Classify a serial-type code.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlrec::sqlite::record::SerialType;
    ///
    /// assert_eq!(SerialType::from_code(5), SerialType::Int(6));
    /// assert_eq!(SerialType::from_code(12), SerialType::Blob(0));
    /// assert_eq!(SerialType::from_code(19), SerialType::Text(3));
    /// assert_eq!(SerialType::from_code(19).content_len(), Some(3));
    /// assert_eq!(SerialType::from_code(10).content_len(), None);
    /// ```
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => SerialType::Null,
            1 => SerialType::Int(1),
            2 => SerialType::Int(2),
            3 => SerialType::Int(3),
            4 => SerialType::Int(4),
            5 => SerialType::Int(6),
            6 => SerialType::Int(8),
            7 => SerialType::Float,
            8 => SerialType::Zero,
            9 => SerialType::One,
            10 | 11 => SerialType::Reserved(code),
            n if n % 2 == 0 => SerialType::Blob(((n - 12) / 2) as usize),
            n => SerialType::Text(((n - 13) / 2) as usize),
        }
    }

    /// Number of body bytes this column occupies, or `None` for reserved codes.
    pub fn content_len(self) -> Option<usize> {
        match self {
            SerialType::Null | SerialType::Zero | SerialType::One => Some(0),
            SerialType::Int(n) => Some(n),
            SerialType::Float => Some(8),
            SerialType::Blob(n) | SerialType::Text(n) => Some(n),
            SerialType::Reserved(_) => None,
        }
    }

    /// The canonical serial-type code for `value` with its text already
    /// encoded to `text_len` bytes.
    pub fn code_for(value: &Value, text_len: usize) -> u64 {
        match value {
            Value::Null => 0,
            Value::Integer(0) => 8,
            Value::Integer(1) => 9,
            Value::Integer(v) => match *v {
                -128..=127 => 1,
                -32768..=32767 => 2,
                -8_388_608..=8_388_607 => 3,
                -2_147_483_648..=2_147_483_647 => 4,
                -140_737_488_355_328..=140_737_488_355_327 => 5,
                _ => 6,
            },
            Value::Real(_) => 7,
            Value::Blob(b) => 12 + 2 * b.len() as u64,
            Value::Text(_) => 13 + 2 * text_len as u64,
        }
    }
}

/// Outcome of decoding one record.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// Columns decoded, in header order.
    pub values: Vec<Value>,
    /// Bytes consumed from the start of the span (header plus decoded bodies).
    pub consumed: usize,
    /// Declared header length, or 0 if not even that could be read.
    pub header_len: usize,
    /// Set when decoding stopped before the header was exhausted.
    pub corrupted: bool,
    /// Why decoding stopped early.
    pub error: Option<String>,
}

impl DecodedRecord {
    fn failed(values: Vec<Value>, consumed: usize, header_len: usize, why: String) -> Self {
        DecodedRecord {
            values,
            consumed,
            header_len,
            corrupted: true,
            error: Some(why),
        }
    }
}

/// Decode a record from the start of `data`.
///
/// `data` is the byte span believed to hold the record; it may be longer than
/// the record (carving) or shorter (truncated payload). The header length
/// never extends past `data`. Decoding stops at the first malformed serial
/// type, header inconsistency, or body that would run past the span, and the
/// columns decoded so far are returned with `corrupted` set.
///
/// # Examples
///
/// ```
/// use sqlrec::sqlite::header::TextEncoding;
/// use sqlrec::sqlite::record::{decode_record, Value};
///
/// // header: len=3, int8, text(2); body: 0x2A, "hi"
/// let rec = decode_record(&[3, 1, 17, 0x2A, b'h', b'i'], TextEncoding::Utf8);
/// assert!(!rec.corrupted);
/// assert_eq!(rec.values, vec![Value::Integer(42), Value::Text("hi".into())]);
/// assert_eq!(rec.consumed, 6);
/// ```
pub fn decode_record(data: &[u8], encoding: TextEncoding) -> DecodedRecord {
    let (header_len, n) = match read_varint(data) {
        Some(v) => v,
        None => {
            return DecodedRecord::failed(Vec::new(), 0, 0, "unreadable header length".into())
        }
    };
    if header_len < n as u64 || header_len > data.len() as u64 {
        return DecodedRecord::failed(
            Vec::new(),
            0,
            0,
            format!(
                "header length {} outside span of {} bytes",
                header_len,
                data.len()
            ),
        );
    }
    let header_len = header_len as usize;

    // Serial types
    let mut types = Vec::new();
    let mut pos = n;
    let mut header_error = None;
    while pos < header_len {
        match read_varint(&data[pos..header_len]) {
            Some((code, len)) => {
                let st = SerialType::from_code(code);
                if let SerialType::Reserved(c) = st {
                    header_error = Some(format!("reserved serial type {} at header byte {}", c, pos));
                    break;
                }
                types.push(st);
                pos += len;
            }
            None => {
                header_error = Some(format!("serial type crosses header end at byte {}", pos));
                break;
            }
        }
    }

    // Bodies
    let mut values = Vec::with_capacity(types.len());
    let mut body = header_len;
    for (idx, st) in types.iter().enumerate() {
        // content_len() is Some for every non-reserved type
        let len = st.content_len().unwrap_or(0);
        if body + len > data.len() {
            return DecodedRecord::failed(
                values,
                body,
                header_len,
                format!(
                    "column {} needs {} bytes at offset {}, span is {} bytes",
                    idx + 1,
                    len,
                    body,
                    data.len()
                ),
            );
        }
        values.push(decode_value(*st, &data[body..body + len], encoding));
        body += len;
    }

    match header_error {
        Some(why) => DecodedRecord::failed(values, body, header_len, why),
        None => DecodedRecord {
            values,
            consumed: body,
            header_len,
            corrupted: false,
            error: None,
        },
    }
}

/// Decode one column body. `bytes` is exactly `st.content_len()` long.
fn decode_value(st: SerialType, bytes: &[u8], encoding: TextEncoding) -> Value {
    match st {
        SerialType::Null | SerialType::Reserved(_) => Value::Null,
        SerialType::Zero => Value::Integer(0),
        SerialType::One => Value::Integer(1),
        SerialType::Int(n) => Value::Integer(BigEndian::read_int(bytes, n)),
        SerialType::Float => Value::Real(BigEndian::read_f64(bytes)),
        SerialType::Blob(_) => Value::Blob(bytes.to_vec()),
        SerialType::Text(_) => Value::Text(encoding.decode(bytes)),
    }
}

/// Encode `values` as a record using the canonical (smallest) serial types.
///
/// # Examples
///
/// ```
/// use sqlrec::sqlite::header::TextEncoding;
/// use sqlrec::sqlite::record::{encode_record, Value};
///
/// let rec = encode_record(&[Value::Integer(42), Value::Text("hi".into())], TextEncoding::Utf8);
/// assert_eq!(rec, vec![3, 1, 17, 0x2A, b'h', b'i']);
/// ```
pub fn encode_record(values: &[Value], encoding: TextEncoding) -> Vec<u8> {
    let mut header = Vec::new();
    let mut body = Vec::new();

    for value in values {
        let text = match value {
            Value::Text(s) => encoding.encode(s),
            _ => Vec::new(),
        };
        let code = SerialType::code_for(value, text.len());
        header.extend_from_slice(&write_varint(code));

        match value {
            Value::Null => {}
            Value::Integer(v) => {
                if let SerialType::Int(width) = SerialType::from_code(code) {
                    let mut buf = [0u8; 8];
                    BigEndian::write_i64(&mut buf, *v);
                    body.extend_from_slice(&buf[8 - width..]);
                }
            }
            Value::Real(v) => {
                let mut buf = [0u8; 8];
                BigEndian::write_f64(&mut buf, *v);
                body.extend_from_slice(&buf);
            }
            Value::Text(_) => body.extend_from_slice(&text),
            Value::Blob(b) => body.extend_from_slice(b),
        }
    }

    // The header length counts its own varint, whose size depends on the total.
    let mut header_len = header.len() + 1;
    if varint_len(header_len as u64) > 1 {
        header_len = header.len() + varint_len((header.len() + 2) as u64);
    }

    let mut out = write_varint(header_len as u64);
    out.extend_from_slice(&header);
    out.extend_from_slice(&body);
    out
}
