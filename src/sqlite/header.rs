//! SQLite database header parsing.
//!
//! The first 100 bytes of page 1 hold the database header ([`DatabaseHeader`]):
//! the magic string, page size, reserved bytes per page, the in-header database
//! size, the freelist anchor (first trunk page and total freelist pages), the
//! text encoding, and assorted version/cookie fields.
//!
//! The magic string is the only field treated as authoritative. Every other
//! field is reported as found; callers decide how far to trust it.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::sqlite::constants::*;
use crate::RecoveryError;

/// Text encoding declared in the database header (offset 56).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    /// Map the header value to an encoding. Unknown values (including 0, which
    /// SQLite writes before the schema exists) fall back to UTF-8.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlrec::sqlite::header::TextEncoding;
    ///
    /// assert_eq!(TextEncoding::from_u32(1), TextEncoding::Utf8);
    /// assert_eq!(TextEncoding::from_u32(2), TextEncoding::Utf16Le);
    /// assert_eq!(TextEncoding::from_u32(3), TextEncoding::Utf16Be);
    /// assert_eq!(TextEncoding::from_u32(0), TextEncoding::Utf8);
    /// ```
    pub fn from_u32(val: u32) -> Self {
        match val {
            TEXT_ENCODING_UTF16LE => TextEncoding::Utf16Le,
            TEXT_ENCODING_UTF16BE => TextEncoding::Utf16Be,
            _ => TextEncoding::Utf8,
        }
    }

    /// Decode raw text bytes, replacing invalid sequences.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| match self {
                        TextEncoding::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                        _ => u16::from_be_bytes([pair[0], pair[1]]),
                    })
                    .collect();
                let mut text = String::from_utf16_lossy(&units);
                if bytes.len() % 2 == 1 {
                    text.push(char::REPLACEMENT_CHARACTER);
                }
                text
            }
        }
    }

    /// Encode a string the way it would be stored on disk.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            TextEncoding::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16Le => "UTF-16le",
            TextEncoding::Utf16Be => "UTF-16be",
        }
    }
}

/// Parsed database header (100 bytes at the start of the file).
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHeader {
    /// Page size in bytes, with the on-disk value 1 already mapped to 65536.
    /// Not validated; see [`DatabaseHeader::page_size_is_valid`].
    pub page_size: u32,
    /// File format write version (1 legacy, 2 WAL). Byte 18.
    pub write_version: u8,
    /// File format read version (1 legacy, 2 WAL). Byte 19.
    pub read_version: u8,
    /// Bytes reserved at the end of every page. Byte 20.
    pub reserved_space: u8,
    /// File change counter. Bytes 24-27.
    pub change_counter: u32,
    /// Database size in pages as recorded by the last writer. Bytes 28-31.
    pub database_size: u32,
    /// First freelist trunk page, 0 if the freelist is empty. Bytes 32-35.
    pub freelist_trunk: u32,
    /// Total number of freelist pages (trunks and leaves). Bytes 36-39.
    pub freelist_count: u32,
    /// Schema cookie. Bytes 40-43.
    pub schema_cookie: u32,
    /// Schema format number. Bytes 44-47.
    pub schema_format: u32,
    /// Largest root b-tree page in auto-vacuum mode, else 0. Bytes 52-55.
    pub largest_root_page: u32,
    /// Text encoding. Bytes 56-59.
    pub text_encoding: TextEncoding,
    /// User version (`PRAGMA user_version`). Bytes 60-63.
    pub user_version: u32,
    /// Non-zero for incremental vacuum mode. Bytes 64-67.
    pub incremental_vacuum: u32,
    /// Application ID (`PRAGMA application_id`). Bytes 68-71.
    pub application_id: u32,
    /// Change counter value for which `database_size` is valid. Bytes 92-95.
    pub version_valid_for: u32,
    /// SQLITE_VERSION_NUMBER of the last writer. Bytes 96-99.
    pub sqlite_version: u32,
}

impl DatabaseHeader {
    /// Parse and validate the database header at the start of `data`.
    ///
    /// Fails with [`RecoveryError::Format`] when the buffer is shorter than the
    /// header or does not begin with the `"SQLite format 3\0"` magic string.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlrec::sqlite::header::DatabaseHeader;
    ///
    /// let mut data = vec![0u8; 100];
    /// data[..16].copy_from_slice(b"SQLite format 3\0");
    /// data[16] = 0x10; // page size 4096
    /// let hdr = DatabaseHeader::parse(&data).unwrap();
    /// assert_eq!(hdr.page_size, 4096);
    ///
    /// assert!(DatabaseHeader::parse(b"not a database").is_err());
    /// ```
    pub fn parse(data: &[u8]) -> Result<Self, RecoveryError> {
        if data.len() < HEADER_SIZE {
            return Err(RecoveryError::Format(format!(
                "File too small to be a valid SQLite database: {} bytes",
                data.len()
            )));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(RecoveryError::Format(
                "Not a valid SQLite 3 database file (bad magic string)".to_string(),
            ));
        }

        let raw_page_size = BigEndian::read_u16(&data[HDR_PAGE_SIZE..]);
        let page_size = if raw_page_size == 1 {
            MAX_PAGE_SIZE
        } else {
            raw_page_size as u32
        };

        Ok(DatabaseHeader {
            page_size,
            write_version: data[HDR_WRITE_VERSION],
            read_version: data[HDR_READ_VERSION],
            reserved_space: data[HDR_RESERVED_SPACE],
            change_counter: BigEndian::read_u32(&data[HDR_CHANGE_COUNTER..]),
            database_size: BigEndian::read_u32(&data[HDR_DATABASE_SIZE..]),
            freelist_trunk: BigEndian::read_u32(&data[HDR_FREELIST_TRUNK..]),
            freelist_count: BigEndian::read_u32(&data[HDR_FREELIST_COUNT..]),
            schema_cookie: BigEndian::read_u32(&data[HDR_SCHEMA_COOKIE..]),
            schema_format: BigEndian::read_u32(&data[HDR_SCHEMA_FORMAT..]),
            largest_root_page: BigEndian::read_u32(&data[HDR_LARGEST_ROOT_PAGE..]),
            text_encoding: TextEncoding::from_u32(BigEndian::read_u32(
                &data[HDR_TEXT_ENCODING..],
            )),
            user_version: BigEndian::read_u32(&data[HDR_USER_VERSION..]),
            incremental_vacuum: BigEndian::read_u32(&data[HDR_INCREMENTAL_VACUUM..]),
            application_id: BigEndian::read_u32(&data[HDR_APPLICATION_ID..]),
            version_valid_for: BigEndian::read_u32(&data[HDR_VERSION_VALID_FOR..]),
            sqlite_version: BigEndian::read_u32(&data[HDR_SQLITE_VERSION..]),
        })
    }

    /// Returns true if the page size is a power of two in `[512, 65536]`.
    pub fn page_size_is_valid(&self) -> bool {
        is_valid_page_size(self.page_size)
    }

    /// Returns true if the in-header database size can be trusted, i.e. it is
    /// non-zero and was written by the same transaction that last bumped the
    /// change counter.
    pub fn database_size_is_valid(&self) -> bool {
        self.database_size != 0 && self.change_counter == self.version_valid_for
    }

    /// Returns true if auto-vacuum or incremental-vacuum mode is enabled.
    pub fn auto_vacuum(&self) -> bool {
        self.largest_root_page != 0
    }

    /// Format the SQLite library version of the last writer (e.g. `3.45.1`).
    pub fn sqlite_version_string(&self) -> String {
        let v = self.sqlite_version;
        format!("{}.{}.{}", v / 1_000_000, (v / 1000) % 1000, v % 1000)
    }
}

/// Returns true if `page_size` is a power of two in `[512, 65536]`.
pub fn is_valid_page_size(page_size: u32) -> bool {
    (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) && page_size.is_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(page_size: u16) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[..16].copy_from_slice(MAGIC);
        BigEndian::write_u16(&mut data[HDR_PAGE_SIZE..], page_size);
        data[HDR_WRITE_VERSION] = 1;
        data[HDR_READ_VERSION] = 1;
        data[HDR_MAX_PAYLOAD_FRACTION] = 64;
        data[HDR_MIN_PAYLOAD_FRACTION] = 32;
        data[HDR_LEAF_PAYLOAD_FRACTION] = 32;
        data
    }

    #[test]
    fn test_parse_basic_fields() {
        let mut data = header_bytes(4096);
        data[HDR_RESERVED_SPACE] = 8;
        BigEndian::write_u32(&mut data[HDR_CHANGE_COUNTER..], 7);
        BigEndian::write_u32(&mut data[HDR_DATABASE_SIZE..], 12);
        BigEndian::write_u32(&mut data[HDR_FREELIST_TRUNK..], 5);
        BigEndian::write_u32(&mut data[HDR_FREELIST_COUNT..], 3);
        BigEndian::write_u32(&mut data[HDR_TEXT_ENCODING..], 2);
        BigEndian::write_u32(&mut data[HDR_VERSION_VALID_FOR..], 7);
        BigEndian::write_u32(&mut data[HDR_SQLITE_VERSION..], 3_045_001);

        let hdr = DatabaseHeader::parse(&data).unwrap();
        assert_eq!(hdr.page_size, 4096);
        assert_eq!(hdr.reserved_space, 8);
        assert_eq!(hdr.database_size, 12);
        assert_eq!(hdr.freelist_trunk, 5);
        assert_eq!(hdr.freelist_count, 3);
        assert_eq!(hdr.text_encoding, TextEncoding::Utf16Le);
        assert!(hdr.database_size_is_valid());
        assert_eq!(hdr.sqlite_version_string(), "3.45.1");
    }

    #[test]
    fn test_page_size_one_means_64k() {
        let hdr = DatabaseHeader::parse(&header_bytes(1)).unwrap();
        assert_eq!(hdr.page_size, 65536);
        assert!(hdr.page_size_is_valid());
    }

    #[test]
    fn test_invalid_page_sizes() {
        assert!(!DatabaseHeader::parse(&header_bytes(1000)).unwrap().page_size_is_valid());
        assert!(!DatabaseHeader::parse(&header_bytes(256)).unwrap().page_size_is_valid());
        assert!(!DatabaseHeader::parse(&header_bytes(0)).unwrap().page_size_is_valid());
        assert!(is_valid_page_size(512));
        assert!(is_valid_page_size(32768));
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut data = header_bytes(4096);
        data[0] = b'X';
        match DatabaseHeader::parse(&data) {
            Err(RecoveryError::Format(msg)) => assert!(msg.contains("magic")),
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_short_buffer_is_format_error() {
        let data = header_bytes(4096);
        assert!(matches!(
            DatabaseHeader::parse(&data[..50]),
            Err(RecoveryError::Format(_))
        ));
    }

    #[test]
    fn test_stale_database_size() {
        let mut data = header_bytes(4096);
        BigEndian::write_u32(&mut data[HDR_CHANGE_COUNTER..], 9);
        BigEndian::write_u32(&mut data[HDR_DATABASE_SIZE..], 4);
        BigEndian::write_u32(&mut data[HDR_VERSION_VALID_FOR..], 8);
        let hdr = DatabaseHeader::parse(&data).unwrap();
        assert!(!hdr.database_size_is_valid());
    }

    #[test]
    fn test_utf16_decode() {
        assert_eq!(TextEncoding::Utf16Le.decode(&[b'h', 0, b'i', 0]), "hi");
        assert_eq!(TextEncoding::Utf16Be.decode(&[0, b'h', 0, b'i']), "hi");
        assert_eq!(TextEncoding::Utf16Be.encode("hi"), vec![0, b'h', 0, b'i']);
        // odd trailing byte is replaced, not dropped silently
        assert_eq!(TextEncoding::Utf16Le.decode(&[b'h', 0, b'i']), "h\u{FFFD}");
    }

    #[test]
    fn test_utf8_lossy() {
        assert_eq!(TextEncoding::Utf8.decode(b"abc"), "abc");
        assert_eq!(TextEncoding::Utf8.decode(&[0x61, 0xFF]), "a\u{FFFD}");
    }
}
