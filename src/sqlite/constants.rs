/// SQLite file format constants.
///
/// Offsets and sizes follow the "Database File Format" document of the
/// SQLite project (sections 1.3 database header, 1.6 b-tree pages,
/// 1.5 freelist, 2.1 record format).
// Database header (100 bytes at the start of page 1)
pub const HEADER_SIZE: usize = 100;
pub const MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const HDR_PAGE_SIZE: usize = 16; // 2 bytes - page size (1 means 65536)
pub const HDR_WRITE_VERSION: usize = 18; // 1 byte - 1 legacy, 2 WAL
pub const HDR_READ_VERSION: usize = 19; // 1 byte - 1 legacy, 2 WAL
pub const HDR_RESERVED_SPACE: usize = 20; // 1 byte - unused bytes at the end of each page
pub const HDR_MAX_PAYLOAD_FRACTION: usize = 21; // 1 byte - must be 64
pub const HDR_MIN_PAYLOAD_FRACTION: usize = 22; // 1 byte - must be 32
pub const HDR_LEAF_PAYLOAD_FRACTION: usize = 23; // 1 byte - must be 32
pub const HDR_CHANGE_COUNTER: usize = 24; // 4 bytes - file change counter
pub const HDR_DATABASE_SIZE: usize = 28; // 4 bytes - size of the database in pages
pub const HDR_FREELIST_TRUNK: usize = 32; // 4 bytes - first freelist trunk page
pub const HDR_FREELIST_COUNT: usize = 36; // 4 bytes - total number of freelist pages
pub const HDR_SCHEMA_COOKIE: usize = 40; // 4 bytes
pub const HDR_SCHEMA_FORMAT: usize = 44; // 4 bytes - 1..4
pub const HDR_LARGEST_ROOT_PAGE: usize = 52; // 4 bytes - non-zero in auto/incremental vacuum mode
pub const HDR_TEXT_ENCODING: usize = 56; // 4 bytes - 1 UTF-8, 2 UTF-16le, 3 UTF-16be
pub const HDR_USER_VERSION: usize = 60; // 4 bytes
pub const HDR_INCREMENTAL_VACUUM: usize = 64; // 4 bytes
pub const HDR_APPLICATION_ID: usize = 68; // 4 bytes
pub const HDR_VERSION_VALID_FOR: usize = 92; // 4 bytes
pub const HDR_SQLITE_VERSION: usize = 96; // 4 bytes - SQLITE_VERSION_NUMBER

// Page sizes
pub const MIN_PAGE_SIZE: u32 = 512;
pub const MAX_PAGE_SIZE: u32 = 65536;

// B-tree page types (first byte of the b-tree page header)
pub const PAGE_TYPE_INDEX_INTERIOR: u8 = 0x02;
pub const PAGE_TYPE_TABLE_INTERIOR: u8 = 0x05;
pub const PAGE_TYPE_INDEX_LEAF: u8 = 0x0A;
pub const PAGE_TYPE_TABLE_LEAF: u8 = 0x0D;

// B-tree page header
pub const BTREE_LEAF_HEADER_SIZE: usize = 8;
pub const BTREE_INTERIOR_HEADER_SIZE: usize = 12;
pub const BTREE_FIRST_FREEBLOCK: usize = 1; // 2 bytes - 0 if none
pub const BTREE_CELL_COUNT: usize = 3; // 2 bytes
pub const BTREE_CONTENT_START: usize = 5; // 2 bytes - 0 means 65536
pub const BTREE_FRAGMENTED_BYTES: usize = 7; // 1 byte
pub const BTREE_RIGHT_CHILD: usize = 8; // 4 bytes - interior pages only
pub const CELL_POINTER_SIZE: usize = 2;
pub const FREEBLOCK_HEADER_SIZE: usize = 4;

// Freelist trunk page
pub const TRUNK_NEXT: usize = 0; // 4 bytes - next trunk page, 0 at the end
pub const TRUNK_LEAF_COUNT: usize = 4; // 4 bytes - number of leaf page numbers
pub const TRUNK_LEAVES: usize = 8; // 4 bytes each
pub const PAGE_NUMBER_SIZE: usize = 4;

// Overflow page: 4-byte next page, then content
pub const OVERFLOW_HEADER_SIZE: usize = 4;

// Varints are at most 9 bytes
pub const MAX_VARINT_LEN: usize = 9;

// Text encodings
pub const TEXT_ENCODING_UTF8: u32 = 1;
pub const TEXT_ENCODING_UTF16LE: u32 = 2;
pub const TEXT_ENCODING_UTF16BE: u32 = 3;
