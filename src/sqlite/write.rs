//! Builders for synthetic SQLite database images.
//!
//! These produce byte-exact page layouts (database header, table b-tree
//! pages, freelist trunks, overflow chains) without going through the SQLite
//! engine, so recovery can be exercised against damage a real engine would
//! never write: cycles, out-of-range pointers, stale freelist pages, records
//! hidden in unallocated space. Used by the test suites and benchmarks.

use byteorder::{BigEndian, ByteOrder};

use crate::sqlite::cell::{local_payload_size, parse_table_leaf_cell};
use crate::sqlite::constants::*;
use crate::sqlite::header::TextEncoding;
use crate::sqlite::record::{encode_record, Value};
use crate::sqlite::varint::write_varint;

/// Build the 100-byte database header.
pub fn build_header(
    page_size: u32,
    page_count: u32,
    freelist_trunk: u32,
    freelist_count: u32,
    encoding: TextEncoding,
) -> Vec<u8> {
    let mut hdr = vec![0u8; HEADER_SIZE];
    hdr[..MAGIC.len()].copy_from_slice(MAGIC);
    let raw_page_size = if page_size == MAX_PAGE_SIZE { 1 } else { page_size as u16 };
    BigEndian::write_u16(&mut hdr[HDR_PAGE_SIZE..], raw_page_size);
    hdr[HDR_WRITE_VERSION] = 1;
    hdr[HDR_READ_VERSION] = 1;
    hdr[HDR_MAX_PAYLOAD_FRACTION] = 64;
    hdr[HDR_MIN_PAYLOAD_FRACTION] = 32;
    hdr[HDR_LEAF_PAYLOAD_FRACTION] = 32;
    BigEndian::write_u32(&mut hdr[HDR_CHANGE_COUNTER..], 1);
    BigEndian::write_u32(&mut hdr[HDR_DATABASE_SIZE..], page_count);
    BigEndian::write_u32(&mut hdr[HDR_FREELIST_TRUNK..], freelist_trunk);
    BigEndian::write_u32(&mut hdr[HDR_FREELIST_COUNT..], freelist_count);
    BigEndian::write_u32(&mut hdr[HDR_SCHEMA_FORMAT..], 4);
    let enc = match encoding {
        TextEncoding::Utf8 => TEXT_ENCODING_UTF8,
        TextEncoding::Utf16Le => TEXT_ENCODING_UTF16LE,
        TextEncoding::Utf16Be => TEXT_ENCODING_UTF16BE,
    };
    BigEndian::write_u32(&mut hdr[HDR_TEXT_ENCODING..], enc);
    BigEndian::write_u32(&mut hdr[HDR_VERSION_VALID_FOR..], 1);
    BigEndian::write_u32(&mut hdr[HDR_SQLITE_VERSION..], 3_045_001);
    hdr
}

/// Encode a table leaf cell whose payload fits on the page.
pub fn leaf_cell(rowid: i64, payload: &[u8]) -> Vec<u8> {
    let mut cell = write_varint(payload.len() as u64);
    cell.extend(write_varint(rowid as u64));
    cell.extend_from_slice(payload);
    cell
}

/// Encode a table leaf cell whose payload spills to overflow pages.
///
/// Returns the cell (local prefix plus the pointer to `first_overflow`) and
/// the bytes that belong on the overflow chain.
pub fn overflow_cell(
    rowid: i64,
    payload: &[u8],
    usable: usize,
    first_overflow: u32,
) -> (Vec<u8>, Vec<u8>) {
    let local = local_payload_size(payload.len() as u64, usable);
    let mut cell = write_varint(payload.len() as u64);
    cell.extend(write_varint(rowid as u64));
    cell.extend_from_slice(&payload[..local]);
    if local < payload.len() {
        let mut ptr = [0u8; PAGE_NUMBER_SIZE];
        BigEndian::write_u32(&mut ptr, first_overflow);
        cell.extend_from_slice(&ptr);
    }
    (cell, payload[local..].to_vec())
}

/// Build a table leaf page holding `cells`.
///
/// Cells are packed downward from the end of the page; the pointer array
/// lists them in the given order.
///
/// # Panics
///
/// Panics if the cells do not fit on one page.
pub fn build_table_leaf(page_size: u32, header_offset: usize, cells: &[Vec<u8>]) -> Vec<u8> {
    let mut page = vec![0u8; page_size as usize];
    page[header_offset] = PAGE_TYPE_TABLE_LEAF;
    let ptr_start = header_offset + BTREE_LEAF_HEADER_SIZE;
    let content_start = place_cells(&mut page, ptr_start, cells);
    finish_btree_header(&mut page, header_offset, cells.len(), content_start);
    page
}

/// Build a table interior page.
///
/// `children` lists `(left_child, divider_rowid)` pairs in key order.
pub fn build_table_interior(
    page_size: u32,
    header_offset: usize,
    children: &[(u32, i64)],
    right_child: u32,
) -> Vec<u8> {
    let mut page = vec![0u8; page_size as usize];
    page[header_offset] = PAGE_TYPE_TABLE_INTERIOR;
    BigEndian::write_u32(&mut page[header_offset + BTREE_RIGHT_CHILD..], right_child);

    let cells: Vec<Vec<u8>> = children
        .iter()
        .map(|&(child, rowid)| {
            let mut cell = vec![0u8; PAGE_NUMBER_SIZE];
            BigEndian::write_u32(&mut cell, child);
            cell.extend(write_varint(rowid as u64));
            cell
        })
        .collect();

    let ptr_start = header_offset + BTREE_INTERIOR_HEADER_SIZE;
    let content_start = place_cells(&mut page, ptr_start, &cells);
    finish_btree_header(&mut page, header_offset, cells.len(), content_start);
    page
}

/// Build a freelist trunk page.
pub fn build_freelist_trunk(page_size: u32, next_trunk: u32, leaves: &[u32]) -> Vec<u8> {
    let mut page = vec![0u8; page_size as usize];
    BigEndian::write_u32(&mut page[TRUNK_NEXT..], next_trunk);
    BigEndian::write_u32(&mut page[TRUNK_LEAF_COUNT..], leaves.len() as u32);
    for (i, &leaf) in leaves.iter().enumerate() {
        BigEndian::write_u32(&mut page[TRUNK_LEAVES + i * PAGE_NUMBER_SIZE..], leaf);
    }
    page
}

/// Split `content` across a chain of overflow pages numbered from `first_page`.
pub fn build_overflow_chain(page_size: u32, first_page: u32, content: &[u8]) -> Vec<Vec<u8>> {
    let chunk = page_size as usize - OVERFLOW_HEADER_SIZE;
    let chunks: Vec<&[u8]> = content.chunks(chunk).collect();
    chunks
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let mut page = vec![0u8; page_size as usize];
            let next = if i + 1 < chunks.len() {
                first_page + i as u32 + 1
            } else {
                0
            };
            BigEndian::write_u32(&mut page[..PAGE_NUMBER_SIZE], next);
            page[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + part.len()].copy_from_slice(part);
            page
        })
        .collect()
}

/// Delete cell `index` from a table leaf page the way SQLite does: drop its
/// pointer and turn its bytes into a freeblock. The cell body past the
/// 4-byte freeblock header is left in place.
pub fn free_cell(page: &mut [u8], header_offset: usize, usable: usize, index: usize) {
    let count = BigEndian::read_u16(&page[header_offset + BTREE_CELL_COUNT..]) as usize;
    if index >= count {
        return;
    }
    let ptr_start = header_offset + BTREE_LEAF_HEADER_SIZE;
    let cell_offset = BigEndian::read_u16(&page[ptr_start + index * CELL_POINTER_SIZE..]) as usize;
    let size = match parse_table_leaf_cell(page, cell_offset, usable) {
        Ok(cell) => {
            let spill = if cell.overflow_page.is_some() { PAGE_NUMBER_SIZE } else { 0 };
            (cell.payload_offset + cell.local_size + spill - cell_offset).max(FREEBLOCK_HEADER_SIZE)
        }
        Err(_) => return,
    };

    // close the gap in the pointer array
    let from = ptr_start + (index + 1) * CELL_POINTER_SIZE;
    let to = ptr_start + count * CELL_POINTER_SIZE;
    page.copy_within(from..to, from - CELL_POINTER_SIZE);
    BigEndian::write_u16(&mut page[to - CELL_POINTER_SIZE..], 0);
    BigEndian::write_u16(&mut page[header_offset + BTREE_CELL_COUNT..], (count - 1) as u16);

    add_freeblock(page, header_offset, cell_offset, size);
}

/// Link a freeblock of `size` bytes at `offset` into the page's chain,
/// keeping the chain in ascending offset order.
pub fn add_freeblock(page: &mut [u8], header_offset: usize, offset: usize, size: usize) {
    let head = header_offset + BTREE_FIRST_FREEBLOCK;
    let mut link = head;
    loop {
        let next = BigEndian::read_u16(&page[link..]) as usize;
        if next == 0 || next > offset {
            BigEndian::write_u16(&mut page[offset..], next as u16);
            BigEndian::write_u16(&mut page[offset + 2..], size as u16);
            BigEndian::write_u16(&mut page[link..], offset as u16);
            return;
        }
        link = next;
    }
}

fn place_cells(page: &mut [u8], ptr_start: usize, cells: &[Vec<u8>]) -> usize {
    let mut content_start = page.len();
    for (i, cell) in cells.iter().enumerate() {
        let ptr_end = ptr_start + (i + 1) * CELL_POINTER_SIZE;
        assert!(
            content_start >= ptr_end + cell.len(),
            "cell {} ({} bytes) does not fit on a {}-byte page",
            i,
            cell.len(),
            page.len()
        );
        content_start -= cell.len();
        page[content_start..content_start + cell.len()].copy_from_slice(cell);
        BigEndian::write_u16(
            &mut page[ptr_start + i * CELL_POINTER_SIZE..],
            content_start as u16,
        );
    }
    content_start
}

fn finish_btree_header(page: &mut [u8], header_offset: usize, cell_count: usize, content_start: usize) {
    BigEndian::write_u16(&mut page[header_offset + BTREE_CELL_COUNT..], cell_count as u16);
    // 65536 is stored as 0
    BigEndian::write_u16(
        &mut page[header_offset + BTREE_CONTENT_START..],
        content_start as u16,
    );
}

/// Assembles a database image page by page.
///
/// Page 1 starts out as an empty table leaf behind the database header and
/// can be replaced with [`DatabaseBuilder::page_one`]. Every other method
/// appends the next page.
///
/// # Examples
///
/// ```
/// use sqlrec::sqlite::record::Value;
/// use sqlrec::sqlite::write::DatabaseBuilder;
///
/// let image = DatabaseBuilder::new(1024)
///     .table_leaf(&[(1, vec![Value::Text("a".into())])])
///     .build();
/// assert_eq!(image.len(), 2048);
/// ```
pub struct DatabaseBuilder {
    page_size: u32,
    encoding: TextEncoding,
    pages: Vec<Vec<u8>>,
    freelist_trunk: u32,
    freelist_count: u32,
}

impl DatabaseBuilder {
    pub fn new(page_size: u32) -> Self {
        DatabaseBuilder {
            page_size,
            encoding: TextEncoding::Utf8,
            pages: vec![build_table_leaf(page_size, HEADER_SIZE, &[])],
            freelist_trunk: 0,
            freelist_count: 0,
        }
    }

    /// Set the text encoding used for the header and for encoding rows.
    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Record the freelist head and page count in the header.
    pub fn freelist(mut self, trunk: u32, count: u32) -> Self {
        self.freelist_trunk = trunk;
        self.freelist_count = count;
        self
    }

    /// Replace page 1 with a table leaf holding `rows`.
    pub fn page_one(mut self, rows: &[(i64, Vec<Value>)]) -> Self {
        let cells = self.row_cells(rows);
        self.pages[0] = build_table_leaf(self.page_size, HEADER_SIZE, &cells);
        self
    }

    /// Append a table leaf page holding `rows`.
    pub fn table_leaf(self, rows: &[(i64, Vec<Value>)]) -> Self {
        let cells = self.row_cells(rows);
        self.leaf_cells(&cells)
    }

    /// Append a table leaf page holding pre-encoded cells.
    pub fn leaf_cells(self, cells: &[Vec<u8>]) -> Self {
        let page = build_table_leaf(self.page_size, 0, cells);
        self.raw_page(page)
    }

    /// Append a table interior page.
    pub fn table_interior(self, children: &[(u32, i64)], right_child: u32) -> Self {
        let page = build_table_interior(self.page_size, 0, children, right_child);
        self.raw_page(page)
    }

    /// Append a freelist trunk page.
    pub fn freelist_trunk(self, next_trunk: u32, leaves: &[u32]) -> Self {
        let page = build_freelist_trunk(self.page_size, next_trunk, leaves);
        self.raw_page(page)
    }

    /// Append an all-zero page.
    pub fn empty_page(self) -> Self {
        let page = vec![0u8; self.page_size as usize];
        self.raw_page(page)
    }

    /// Append a page as given (resized to the page size).
    pub fn raw_page(mut self, mut page: Vec<u8>) -> Self {
        page.resize(self.page_size as usize, 0);
        self.pages.push(page);
        self
    }

    /// Encode `values` as a record in this builder's text encoding.
    pub fn record(&self, values: &[Value]) -> Vec<u8> {
        encode_record(values, self.encoding)
    }

    fn row_cells(&self, rows: &[(i64, Vec<Value>)]) -> Vec<Vec<u8>> {
        rows.iter()
            .map(|(rowid, values)| leaf_cell(*rowid, &self.record(values)))
            .collect()
    }

    /// Finish the image: write the header onto page 1 and concatenate pages.
    pub fn build(self) -> Vec<u8> {
        let header = build_header(
            self.page_size,
            self.pages.len() as u32,
            self.freelist_trunk,
            self.freelist_count,
            self.encoding,
        );
        let mut pages = self.pages;
        pages[0][..HEADER_SIZE].copy_from_slice(&header);
        pages.concat()
    }
}
