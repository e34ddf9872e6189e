//! Freelist chain walking and freed-page row recovery.
//!
//! The freelist is a linked list of trunk pages starting at header offset 32.
//! Each trunk holds the next trunk's page number, a leaf count, and that many
//! leaf page numbers. SQLite does not wipe a page when it frees it (unless
//! `secure_delete` is on), so a freed table leaf usually keeps its old cell
//! pointer array and cells. [`recover_freelist`] reads every freelist leaf as
//! if it were still a table leaf.

use std::collections::{BTreeSet, HashSet};

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::recovery::{Origin, Pass, RecoveredRow, ScanContext};
use crate::sqlite::constants::*;
use crate::sqlite::database::Database;
use crate::sqlite::header::TextEncoding;
use crate::sqlite::page::{cell_pointer_in_bounds, cell_pointers, BTreePageHeader};
use crate::sqlite::record::decode_record;
use crate::sqlite::varint::read_varint_at;
use crate::RecoveryError;

/// Pages on the freelist chain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FreelistPages {
    /// Trunk pages in chain order.
    pub trunks: Vec<u32>,
    /// Leaf pages, ascending.
    pub leaves: BTreeSet<u32>,
}

impl FreelistPages {
    pub fn is_trunk(&self, page: u32) -> bool {
        self.trunks.contains(&page)
    }

    pub fn is_leaf(&self, page: u32) -> bool {
        self.leaves.contains(&page)
    }

    /// Trunks plus leaves.
    pub fn len(&self) -> usize {
        self.trunks.len() + self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trunks.is_empty() && self.leaves.is_empty()
    }
}

/// Walk the trunk chain from the header and collect freelist pages.
///
/// The walk ends at the end of the chain, at a revisited trunk (counted as a
/// cycle) or at a trunk the file cannot supply (counted as a page read
/// error). Leaf numbers outside the file are counted and dropped. A non-zero
/// freelist count in the header covers trunks and leaves together, and
/// collection stops once that many pages are known.
pub fn collect(db: &Database, ctx: &mut ScanContext) -> FreelistPages {
    let mut pages = FreelistPages::default();
    let declared = db.header().freelist_count as usize;
    let max_leaves = (db.usable_size() - TRUNK_LEAVES) / PAGE_NUMBER_SIZE;
    let mut seen = HashSet::new();
    let mut next = db.header().freelist_trunk;

    while next != 0 {
        if !seen.insert(next) {
            ctx.cycle(next, "freelist trunk chain");
            break;
        }
        let data = match db.page_data(next) {
            Ok(d) => d,
            Err(e) => {
                ctx.page_error(&e);
                break;
            }
        };
        pages.trunks.push(next);

        let count = (BigEndian::read_u32(&data[TRUNK_LEAF_COUNT..]) as usize).min(max_leaves);
        for i in 0..count {
            if declared != 0 && pages.len() >= declared {
                break;
            }
            let leaf = BigEndian::read_u32(&data[TRUNK_LEAVES + i * PAGE_NUMBER_SIZE..]);
            if !db.contains(leaf) {
                ctx.page_error(&RecoveryError::PageRead(format!(
                    "Freelist leaf {} listed on trunk {} is out of range",
                    leaf, next
                )));
                continue;
            }
            if !seen.insert(leaf) {
                ctx.cycle(leaf, "freelist");
                continue;
            }
            pages.leaves.insert(leaf);
        }

        next = BigEndian::read_u32(&data[TRUNK_NEXT..]);
    }

    pages
}

/// Recover rows from every freelist leaf page, in ascending page order.
pub fn recover_freelist(
    db: &Database,
    freelist: &FreelistPages,
    ctx: &mut ScanContext,
    progress: &mut dyn FnMut(Pass, u64),
) -> Vec<RecoveredRow> {
    let mut rows = Vec::new();
    for (i, &leaf) in freelist.leaves.iter().enumerate() {
        progress(Pass::Freelist, i as u64 + 1);
        if let Ok(data) = db.page_data(leaf) {
            rows.extend(freed_leaf_rows(leaf, data, db.usable_size(), db.text_encoding()));
        }
    }
    for _ in &rows {
        ctx.count_row(Origin::Freelist);
    }
    rows
}

/// Read a freed page with the table leaf layout, whatever its type byte.
///
/// Only cells that decode cleanly are kept. Anything else on a freed page is
/// expected debris and is dropped without being counted. Payloads that
/// claim more bytes than the page holds are cut at the page end; overflow
/// pointers of freed cells are not followed.
pub fn freed_leaf_rows(
    page_number: u32,
    data: &[u8],
    usable: usize,
    encoding: TextEncoding,
) -> Vec<RecoveredRow> {
    let area = &data[..usable.min(data.len())];
    let hdr = match BTreePageHeader::parse_as_table_leaf(area, 0) {
        Some(h) => h,
        None => return Vec::new(),
    };

    let mut rows = Vec::new();
    for ptr in cell_pointers(area, &hdr, area.len()) {
        if !cell_pointer_in_bounds(ptr, &hdr, area.len()) {
            continue;
        }
        let (payload_len, n1) = match read_varint_at(area, ptr) {
            Some(v) => v,
            None => continue,
        };
        let (rowid, n2) = match read_varint_at(area, ptr + n1) {
            Some(v) => v,
            None => continue,
        };
        let start = ptr + n1 + n2;
        if start >= area.len() {
            continue;
        }
        let end = (start as u64).saturating_add(payload_len).min(area.len() as u64) as usize;

        let rec = decode_record(&area[start..end], encoding);
        if rec.values.is_empty() || rec.corrupted {
            continue;
        }
        rows.push(RecoveredRow {
            values: rec.values,
            origin: Origin::Freelist,
            corrupted: false,
            page: page_number,
            offset: ptr,
            rowid: Some(rowid as i64),
        });
    }
    rows
}
