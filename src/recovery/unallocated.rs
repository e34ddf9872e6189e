//! Record carving from unallocated page space.
//!
//! Deleting a row on a page that stays in use turns its cell into a
//! freeblock: the first 4 bytes are overwritten with the freeblock header but
//! the rest of the record survives until the space is reused. Shrinking
//! pointer arrays and freed trunk pages leave similar residue. This pass
//! tries to decode a record at every byte offset of those regions.
//!
//! A candidate is accepted only if it has a header of at least two bytes,
//! decodes without inconsistency, fits inside the region and is not all
//! NULLs. Zero-filled space decodes as all-NULL records, hence the last rule.
//! After a hit, carving resumes right after the consumed bytes. Otherwise it
//! moves on by one byte.
//!
//! The freeblock header only spares a deleted record when the cell's payload
//! length and rowid varints take up 4 bytes between them, as with rowids of
//! 16384 and above on short rows. Small rowids leave 1 or 2 bytes of that
//! prefix, so the header clobbers the record's own header length and first
//! serial types. Such rows are not recovered intact; at best a later column
//! run is carved as a shorter record.

use std::ops::Range;

use byteorder::{BigEndian, ByteOrder};

use crate::recovery::{Origin, Pass, PageMap, RecoveredRow, ScanContext};
use crate::sqlite::constants::*;
use crate::sqlite::database::{Database, Page};
use crate::sqlite::header::TextEncoding;
use crate::sqlite::page::{btree_header_offset, unallocated_regions, BTreePageHeader, PageKind};
use crate::sqlite::record::{decode_record, DecodedRecord};

/// Byte ranges of a page worth carving, given its classification.
pub fn carve_regions(page: &Page<'_>, kind: PageKind, usable: usize) -> Vec<Range<usize>> {
    let data = page.usable(usable);
    let end = data.len();
    let whole = |start: usize| if start < end { vec![start..end] } else { Vec::new() };

    match kind {
        PageKind::TableLeaf | PageKind::TableInterior => match page.btree_header() {
            Some(hdr) => unallocated_regions(data, &hdr, end),
            None => whole(btree_header_offset(page.number)),
        },
        PageKind::FreelistLeaf => match BTreePageHeader::parse(data, 0) {
            Some(hdr) if hdr.kind.is_table() && hdr.is_consistent(end) => {
                unallocated_regions(data, &hdr, end)
            }
            _ => whole(0),
        },
        PageKind::FreelistTrunk => {
            let max_leaves = (end - TRUNK_LEAVES) / PAGE_NUMBER_SIZE;
            let count = (BigEndian::read_u32(&data[TRUNK_LEAF_COUNT..]) as usize).min(max_leaves);
            whole(TRUNK_LEAVES + count * PAGE_NUMBER_SIZE)
        }
        PageKind::Unrecognized => whole(btree_header_offset(page.number)),
        PageKind::IndexLeaf | PageKind::IndexInterior | PageKind::Overflow => Vec::new(),
    }
}

/// Returns true if a carved record is plausible enough to keep.
fn is_plausible(rec: &DecodedRecord) -> bool {
    !rec.corrupted
        && rec.header_len >= 2
        && !rec.values.is_empty()
        && !rec.values.iter().all(|v| v.is_null())
}

/// Carve records from `data[range]`, returning `(offset, record)` pairs.
pub fn carve(data: &[u8], range: Range<usize>, encoding: TextEncoding) -> Vec<(usize, DecodedRecord)> {
    let mut found = Vec::new();
    let end = range.end.min(data.len());
    let mut pos = range.start;

    while pos < end {
        let rec = decode_record(&data[pos..end], encoding);
        if is_plausible(&rec) && rec.consumed <= end - pos {
            let consumed = rec.consumed.max(1);
            found.push((pos, rec));
            pos += consumed;
        } else {
            pos += 1;
        }
    }
    found
}

/// Carve every readable page in ascending order.
pub fn recover_unallocated(
    db: &Database,
    pages: &PageMap,
    ctx: &mut ScanContext,
    progress: &mut dyn FnMut(Pass, u64),
) -> Vec<RecoveredRow> {
    let usable = db.usable_size();
    let encoding = db.text_encoding();
    let mut rows = Vec::new();

    for (number, kind) in pages.iter() {
        progress(Pass::Unallocated, number as u64);
        let page = match db.page(number) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let data = page.usable(usable);
        for region in carve_regions(&page, kind, usable) {
            for (offset, rec) in carve(data, region, encoding) {
                ctx.count_row(Origin::Unallocated);
                rows.push(RecoveredRow {
                    values: rec.values,
                    origin: Origin::Unallocated,
                    corrupted: false,
                    page: number,
                    offset,
                    rowid: None,
                });
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::freelist::FreelistPages;
    use crate::sqlite::record::{encode_record, Value};
    use crate::sqlite::write::{build_table_leaf, free_cell, leaf_cell, DatabaseBuilder};

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn run(image: Vec<u8>) -> (Vec<RecoveredRow>, ScanContext) {
        let db = Database::from_bytes(image).unwrap();
        let mut ctx = ScanContext::new();
        let pages = PageMap::classify(&db, &FreelistPages::default(), &mut ctx, &mut |_, _| {});
        let rows = recover_unallocated(&db, &pages, &mut ctx, &mut |_, _| {});
        (rows, ctx)
    }

    #[test]
    fn test_zero_region_yields_nothing() {
        let data = vec![0u8; 512];
        assert!(carve(&data, 0..512, TextEncoding::Utf8).is_empty());
    }

    #[test]
    fn test_carve_finds_embedded_records() {
        let a = encode_record(&[text("first"), Value::Integer(1)], TextEncoding::Utf8);
        let b = encode_record(&[text("second"), Value::Real(2.5)], TextEncoding::Utf8);
        let mut data = vec![0u8; 200];
        data[20..20 + a.len()].copy_from_slice(&a);
        data[100..100 + b.len()].copy_from_slice(&b);

        let found = carve(&data, 0..200, TextEncoding::Utf8);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, 20);
        assert_eq!(found[0].1.values, vec![text("first"), Value::Integer(1)]);
        assert_eq!(found[1].0, 100);
        assert_eq!(found[1].1.values, vec![text("second"), Value::Real(2.5)]);
    }

    #[test]
    fn test_record_crossing_region_end_rejected() {
        let a = encode_record(&[text("truncated record")], TextEncoding::Utf8);
        let mut data = vec![0u8; 64];
        data[10..10 + a.len()].copy_from_slice(&a);
        let found = carve(&data, 0..(10 + a.len() - 3), TextEncoding::Utf8);
        assert!(found
            .iter()
            .all(|(_, rec)| rec.values != vec![text("truncated record")]));
    }

    #[test]
    fn test_gap_between_pointers_and_content() {
        let mut image = DatabaseBuilder::new(1024)
            .table_leaf(&[(1, vec![text("live")])])
            .build();
        let hidden = encode_record(&[text("hidden"), Value::Integer(77)], TextEncoding::Utf8);
        let at = 1024 + 200;
        image[at..at + hidden.len()].copy_from_slice(&hidden);

        let (rows, ctx) = run(image);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values, vec![text("hidden"), Value::Integer(77)]);
        assert_eq!(rows[0].page, 2);
        assert_eq!(rows[0].offset, 200);
        assert_eq!(rows[0].origin, Origin::Unallocated);
        assert_eq!(ctx.unallocated_rows, 1);
    }

    #[test]
    fn test_deleted_cell_in_freeblock() {
        // a 3-byte rowid varint plus a 1-byte length varint is exactly the
        // 4 bytes the freeblock header overwrites, so the record survives
        let deleted = encode_record(&[text("deleted row"), Value::Integer(5)], TextEncoding::Utf8);
        let kept = encode_record(&[text("kept row"), Value::Integer(6)], TextEncoding::Utf8);
        let cells = vec![leaf_cell(20_000, &deleted), leaf_cell(20_001, &kept)];
        let mut page = build_table_leaf(1024, 0, &cells);
        free_cell(&mut page, 0, 1024, 0);

        let image = DatabaseBuilder::new(1024).raw_page(page).build();
        let (rows, _) = run(image);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values, vec![text("deleted row"), Value::Integer(5)]);
    }

    #[test]
    fn test_small_rowid_deleted_cell_loses_header() {
        // 1-byte length and 1-byte rowid: the freeblock header covers the
        // record header length and the first serial type
        let deleted = encode_record(&[text("deleted row"), Value::Integer(5)], TextEncoding::Utf8);
        let cells = vec![
            leaf_cell(4, &encode_record(&[text("before"), Value::Integer(4)], TextEncoding::Utf8)),
            leaf_cell(5, &deleted),
            leaf_cell(6, &encode_record(&[text("after"), Value::Integer(6)], TextEncoding::Utf8)),
        ];
        let mut page = build_table_leaf(1024, 0, &cells);
        free_cell(&mut page, 0, 1024, 1);

        let image = DatabaseBuilder::new(1024).raw_page(page).build();
        let (rows, _) = run(image);
        assert!(rows
            .iter()
            .all(|r| r.values != vec![text("deleted row"), Value::Integer(5)]));
    }

    #[test]
    fn test_trunk_residue() {
        let residue = encode_record(&[text("old"), Value::Integer(3)], TextEncoding::Utf8);
        let mut image = DatabaseBuilder::new(1024)
            .freelist_trunk(0, &[])
            .freelist(2, 1)
            .build();
        let at = 1024 + 500;
        image[at..at + residue.len()].copy_from_slice(&residue);

        let db = Database::from_bytes(image).unwrap();
        let mut ctx = ScanContext::new();
        let freelist = crate::recovery::freelist::collect(&db, &mut ctx);
        let pages = PageMap::classify(&db, &freelist, &mut ctx, &mut |_, _| {});
        assert_eq!(pages.kind(2), Some(PageKind::FreelistTrunk));
        let rows = recover_unallocated(&db, &pages, &mut ctx, &mut |_, _| {});
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].offset, 500);
    }

    #[test]
    fn test_index_and_overflow_pages_skipped() {
        let mut index_page = vec![0u8; 1024];
        index_page[0] = PAGE_TYPE_INDEX_LEAF;
        let residue = encode_record(&[text("index key")], TextEncoding::Utf8);
        index_page[600..600 + residue.len()].copy_from_slice(&residue);
        let page = Page {
            number: 2,
            offset: 1024,
            data: &index_page,
        };
        assert!(carve_regions(&page, PageKind::IndexLeaf, 1024).is_empty());
        assert!(carve_regions(&page, PageKind::Overflow, 1024).is_empty());
        assert_eq!(carve_regions(&page, PageKind::Unrecognized, 1024), vec![0..1024]);
    }
}
