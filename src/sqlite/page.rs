//! Page classification and b-tree page structure.
//!
//! Every b-tree page starts with an 8-byte (leaf) or 12-byte (interior)
//! header ([`BTreePageHeader`]), located at byte 100 on page 1 and byte 0 on
//! every other page. The header is followed by the cell pointer array, a run
//! of 2-byte offsets to the cells stored at the end of the page.
//!
//! Space on a page that is not covered by the header, the pointer array or a
//! live cell is *unallocated*: the gap between the pointer array and the cell
//! content area, plus the freeblock chain left behind by deleted cells.
//! [`unallocated_regions`] computes both.

use std::fmt;
use std::ops::Range;

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::sqlite::constants::*;

/// What a page is used for.
///
/// B-tree kinds come from the page's type byte. Freelist and overflow kinds
/// cannot be read off the page itself: they are assigned by whoever walked
/// the freelist chain or an overflow chain and found the page there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PageKind {
    TableLeaf,
    TableInterior,
    IndexLeaf,
    IndexInterior,
    FreelistTrunk,
    FreelistLeaf,
    Overflow,
    Unrecognized,
}

impl PageKind {
    /// Classify a b-tree type byte.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlrec::sqlite::page::PageKind;
    ///
    /// assert_eq!(PageKind::from_type_byte(0x0D), PageKind::TableLeaf);
    /// assert_eq!(PageKind::from_type_byte(0x05), PageKind::TableInterior);
    /// assert_eq!(PageKind::from_type_byte(0x0A), PageKind::IndexLeaf);
    /// assert_eq!(PageKind::from_type_byte(0x00), PageKind::Unrecognized);
    /// ```
    pub fn from_type_byte(val: u8) -> Self {
        match val {
            PAGE_TYPE_TABLE_LEAF => PageKind::TableLeaf,
            PAGE_TYPE_TABLE_INTERIOR => PageKind::TableInterior,
            PAGE_TYPE_INDEX_LEAF => PageKind::IndexLeaf,
            PAGE_TYPE_INDEX_INTERIOR => PageKind::IndexInterior,
            _ => PageKind::Unrecognized,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PageKind::TableLeaf => "TABLE_LEAF",
            PageKind::TableInterior => "TABLE_INTERIOR",
            PageKind::IndexLeaf => "INDEX_LEAF",
            PageKind::IndexInterior => "INDEX_INTERIOR",
            PageKind::FreelistTrunk => "FREELIST_TRUNK",
            PageKind::FreelistLeaf => "FREELIST_LEAF",
            PageKind::Overflow => "OVERFLOW",
            PageKind::Unrecognized => "UNRECOGNIZED",
        }
    }

    /// True for table b-tree pages, the only b-tree kind rows are read from.
    pub fn is_table(self) -> bool {
        matches!(self, PageKind::TableLeaf | PageKind::TableInterior)
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Offset of the b-tree page header within a page.
pub fn btree_header_offset(page_number: u32) -> usize {
    if page_number == 1 {
        HEADER_SIZE
    } else {
        0
    }
}

/// Parsed b-tree page header.
#[derive(Debug, Clone, Serialize)]
pub struct BTreePageHeader {
    /// Offset of this header within the page (100 on page 1, else 0).
    pub header_offset: usize,
    /// Raw type byte.
    pub page_type: u8,
    /// Kind derived from the type byte.
    pub kind: PageKind,
    /// Offset of the first freeblock, 0 if there is none.
    pub first_freeblock: u16,
    /// Number of cells on the page.
    pub cell_count: u16,
    /// Start of the cell content area (on-disk 0 already mapped to 65536).
    pub content_start: usize,
    /// Number of fragmented free bytes within the content area.
    pub fragmented_bytes: u8,
    /// Right-most child page (interior pages only).
    pub right_child: Option<u32>,
}

impl BTreePageHeader {
    /// Parse the b-tree header at `header_offset` within `page`.
    ///
    /// Any type byte is accepted; the kind tells the caller what was found.
    /// Returns `None` only if the page is too short to hold the header.
    pub fn parse(page: &[u8], header_offset: usize) -> Option<Self> {
        let data = page.get(header_offset..)?;
        if data.len() < BTREE_LEAF_HEADER_SIZE {
            return None;
        }
        let page_type = data[0];
        let kind = PageKind::from_type_byte(page_type);

        let right_child = if matches!(kind, PageKind::TableInterior | PageKind::IndexInterior) {
            if data.len() < BTREE_INTERIOR_HEADER_SIZE {
                return None;
            }
            Some(BigEndian::read_u32(&data[BTREE_RIGHT_CHILD..]))
        } else {
            None
        };

        let raw_content_start = BigEndian::read_u16(&data[BTREE_CONTENT_START..]);
        Some(BTreePageHeader {
            header_offset,
            page_type,
            kind,
            first_freeblock: BigEndian::read_u16(&data[BTREE_FIRST_FREEBLOCK..]),
            cell_count: BigEndian::read_u16(&data[BTREE_CELL_COUNT..]),
            content_start: if raw_content_start == 0 {
                MAX_PAGE_SIZE as usize
            } else {
                raw_content_start as usize
            },
            fragmented_bytes: data[BTREE_FRAGMENTED_BYTES],
            right_child,
        })
    }

    /// Parse a page's header as if it were a table leaf, whatever its type byte.
    ///
    /// Freed pages keep their old cell pointer array, but the type byte is not
    /// guaranteed to survive (page 1 of a trunk, zeroed roots).
    pub fn parse_as_table_leaf(page: &[u8], header_offset: usize) -> Option<Self> {
        let mut hdr = Self::parse(page, header_offset)?;
        hdr.page_type = PAGE_TYPE_TABLE_LEAF;
        hdr.kind = PageKind::TableLeaf;
        hdr.right_child = None;
        Some(hdr)
    }

    /// Size of the header itself (8 or 12 bytes).
    pub fn header_size(&self) -> usize {
        if self.right_child.is_some() {
            BTREE_INTERIOR_HEADER_SIZE
        } else {
            BTREE_LEAF_HEADER_SIZE
        }
    }

    /// Offset of the first cell pointer.
    pub fn cell_pointer_start(&self) -> usize {
        self.header_offset + self.header_size()
    }

    /// Offset just past the last cell pointer.
    pub fn cell_pointer_end(&self) -> usize {
        self.cell_pointer_start() + self.cell_count as usize * CELL_POINTER_SIZE
    }

    /// Returns true if the header describes a layout that fits a page with
    /// `usable` usable bytes: the pointer array ends before the content area,
    /// which in turn starts inside the page.
    pub fn is_consistent(&self, usable: usize) -> bool {
        let ptr_end = self.cell_pointer_end();
        ptr_end <= usable && self.content_start >= ptr_end && self.content_start <= usable
    }
}

/// Read the cell pointer array.
///
/// The declared cell count is clamped to what physically fits before
/// `usable`, so a corrupt count never reads past the page. Pointer values
/// are returned as stored; callers validate them with [`cell_pointer_in_bounds`].
pub fn cell_pointers(page: &[u8], hdr: &BTreePageHeader, usable: usize) -> Vec<usize> {
    let start = hdr.cell_pointer_start();
    let limit = usable.min(page.len());
    if start >= limit {
        return Vec::new();
    }
    let fits = (limit - start) / CELL_POINTER_SIZE;
    let count = (hdr.cell_count as usize).min(fits);

    (0..count)
        .map(|i| BigEndian::read_u16(&page[start + i * CELL_POINTER_SIZE..]) as usize)
        .collect()
}

/// Returns true if a cell pointer lands inside the page's cell area: after
/// the pointer array and before the end of the usable space.
pub fn cell_pointer_in_bounds(ptr: usize, hdr: &BTreePageHeader, usable: usize) -> bool {
    ptr >= hdr.cell_pointer_end() && ptr < usable
}

/// Walk the freeblock chain, returning `(offset, size)` pairs.
///
/// Each freeblock starts with a 2-byte offset of the next freeblock and a
/// 2-byte size (including those 4 bytes). SQLite keeps the chain in
/// ascending order, so the walk stops as soon as an offset fails to increase,
/// a block runs past `usable`, or a size is too small to be a freeblock.
pub fn freeblocks(page: &[u8], hdr: &BTreePageHeader, usable: usize) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let limit = usable.min(page.len());
    let mut offset = hdr.first_freeblock as usize;
    let mut min_offset = hdr.cell_pointer_end();

    while offset != 0 {
        if offset < min_offset || offset + FREEBLOCK_HEADER_SIZE > limit {
            break;
        }
        let next = BigEndian::read_u16(&page[offset..]) as usize;
        let size = BigEndian::read_u16(&page[offset + 2..]) as usize;
        if size < FREEBLOCK_HEADER_SIZE || offset + size > limit {
            break;
        }
        blocks.push((offset, size));
        min_offset = offset + size;
        offset = next;
    }

    blocks
}

/// Compute the unallocated byte ranges of a b-tree page.
///
/// Returns the gap between the end of the cell pointer array and the start
/// of the cell content area, followed by the body of each freeblock (the
/// 4-byte freeblock header is excluded). Empty ranges are dropped. If the
/// header is inconsistent, everything after the header is one region.
pub fn unallocated_regions(page: &[u8], hdr: &BTreePageHeader, usable: usize) -> Vec<Range<usize>> {
    let limit = usable.min(page.len());
    let mut regions = Vec::new();

    if !hdr.is_consistent(limit) {
        let start = hdr.cell_pointer_start().min(limit);
        if start < limit {
            regions.push(start..limit);
        }
        return regions;
    }

    let gap = hdr.cell_pointer_end()..hdr.content_start;
    if !gap.is_empty() {
        regions.push(gap);
    }
    for (offset, size) in freeblocks(page, hdr, limit) {
        let body = offset + FREEBLOCK_HEADER_SIZE..offset + size;
        if !body.is_empty() {
            regions.push(body);
        }
    }
    regions
}
