//! Integration tests for sqlite-recovery.
//!
//! These tests construct synthetic SQLite database images byte by byte with
//! `sqlrec::sqlite::write` and run the full recovery pipeline against them.

use byteorder::{BigEndian, ByteOrder};
use std::io::Write;
use tempfile::NamedTempFile;

use sqlrec::recovery::images::identify_image;
use sqlrec::recovery::normalize::{column_names, normalize_rows};
use sqlrec::recovery::{recover, Origin, RecoveryPlan};
use sqlrec::sqlite::constants::*;
use sqlrec::sqlite::database::Database;
use sqlrec::sqlite::header::TextEncoding;
use sqlrec::sqlite::page::PageKind;
use sqlrec::sqlite::record::{decode_record, encode_record, Value};
use sqlrec::sqlite::write::{build_table_leaf, free_cell, leaf_cell, DatabaseBuilder};
use sqlrec::RecoveryError;

const PAGE_SIZE: u32 = 1024;
const PS: usize = PAGE_SIZE as usize;

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn person(rowid: i64) -> (i64, Vec<Value>) {
    (
        rowid,
        vec![
            text(&format!("person-{}", rowid)),
            Value::Integer(rowid * 10),
            Value::Real(rowid as f64 + 0.5),
        ],
    )
}

/// Page 2 is an interior root over leaves 3, 4 and 5 (rowids 1..=15).
fn build_three_leaf_tree() -> Vec<u8> {
    let leaf = |range: std::ops::RangeInclusive<i64>| -> Vec<(i64, Vec<Value>)> {
        range.map(person).collect()
    };
    DatabaseBuilder::new(PAGE_SIZE)
        .table_interior(&[(3, 5), (4, 10)], 5)
        .table_leaf(&leaf(1..=5))
        .table_leaf(&leaf(6..=10))
        .table_leaf(&leaf(11..=15))
        .build()
}

fn write_temp(image: &[u8]) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().expect("create temp file");
    tmp.write_all(image).expect("write temp file");
    tmp.flush().expect("flush");
    tmp
}

#[test]
fn test_open_from_file() {
    let tmp = write_temp(&build_three_leaf_tree());
    let db = Database::open(tmp.path()).unwrap();
    assert_eq!(db.page_size(), PAGE_SIZE);
    assert_eq!(db.page_count(), 5);
    assert_eq!(db.file_size(), 5 * PS as u64);
    assert_eq!(db.text_encoding(), TextEncoding::Utf8);
}

#[test]
fn test_bad_magic_is_format_error() {
    let mut image = build_three_leaf_tree();
    image[..16].copy_from_slice(b"Not a database!\0");
    assert!(matches!(
        Database::from_bytes(image),
        Err(RecoveryError::Format(_))
    ));
}

#[test]
fn test_live_walk_in_key_order() {
    let db = Database::from_bytes(build_three_leaf_tree()).unwrap();
    let run = recover(&db, &RecoveryPlan::default());

    let live: Vec<_> = run.rows.iter().filter(|r| r.origin == Origin::Live).collect();
    assert_eq!(live.len(), 15);
    for (i, row) in live.iter().enumerate() {
        let (rowid, values) = person(i as i64 + 1);
        assert_eq!(row.rowid, Some(rowid));
        assert_eq!(row.values, values);
        assert!(!row.corrupted);
    }
    assert_eq!(run.context.live_rows, 15);
    assert_eq!(run.context.corruption_count(), 0);
    assert_eq!(run.pages.kind(2), Some(PageKind::TableInterior));
}

#[test]
fn test_explicit_root_limits_the_walk() {
    let db = Database::from_bytes(build_three_leaf_tree()).unwrap();
    let plan = RecoveryPlan {
        root: Some(4),
        freelist: false,
        unallocated: false,
        ..RecoveryPlan::default()
    };
    let run = recover(&db, &plan);
    let rowids: Vec<_> = run.rows.iter().filter_map(|r| r.rowid).collect();
    assert_eq!(rowids, vec![6, 7, 8, 9, 10]);
}

#[test]
fn test_freed_leaf_rows_recovered() {
    // page 2 is a live leaf, page 3 the freelist trunk, page 4 a freed leaf
    // that still holds the rows of a dropped table
    let image = DatabaseBuilder::new(PAGE_SIZE)
        .table_leaf(&[person(1)])
        .freelist_trunk(0, &[4])
        .table_leaf(&[
            (7, vec![text("dropped-a"), Value::Integer(1)]),
            (8, vec![text("dropped-b"), Value::Integer(2)]),
        ])
        .freelist(3, 2)
        .build();
    let db = Database::from_bytes(image).unwrap();
    let run = recover(&db, &RecoveryPlan::default());

    assert_eq!(run.pages.kind(3), Some(PageKind::FreelistTrunk));
    assert_eq!(run.pages.kind(4), Some(PageKind::FreelistLeaf));

    let freed: Vec<_> = run
        .rows
        .iter()
        .filter(|r| r.origin == Origin::Freelist)
        .collect();
    assert_eq!(freed.len(), 2);
    assert_eq!(freed[0].values, vec![text("dropped-a"), Value::Integer(1)]);
    assert_eq!(freed[1].rowid, Some(8));
    assert_eq!(freed[1].page, 4);

    // the freed page is not mistaken for a live table
    assert_eq!(run.context.live_rows, 1);
}

#[test]
fn test_deleted_row_carved_from_freeblock() {
    let deleted = encode_record(&[text("deleted secret"), Value::Integer(99)], TextEncoding::Utf8);
    let kept = encode_record(&[text("kept"), Value::Integer(1)], TextEncoding::Utf8);
    let mut page = build_table_leaf(PAGE_SIZE, 0, &[leaf_cell(30_000, &kept), leaf_cell(30_001, &deleted)]);
    free_cell(&mut page, 0, PS, 1);

    let image = DatabaseBuilder::new(PAGE_SIZE).raw_page(page).build();
    let db = Database::from_bytes(image).unwrap();
    let run = recover(&db, &RecoveryPlan::default());

    let live: Vec<_> = run.rows.iter().filter(|r| r.origin == Origin::Live).collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].values, vec![text("kept"), Value::Integer(1)]);

    let carved: Vec<_> = run
        .rows
        .iter()
        .filter(|r| r.origin == Origin::Unallocated)
        .collect();
    assert_eq!(carved.len(), 1);
    assert_eq!(carved[0].values, vec![text("deleted secret"), Value::Integer(99)]);
    assert_eq!(carved[0].page, 2);
    assert_eq!(carved[0].rowid, None);
}

#[test]
fn test_rows_come_out_in_pass_order() {
    let hidden = encode_record(&[text("hidden"), Value::Integer(5)], TextEncoding::Utf8);
    let mut image = DatabaseBuilder::new(PAGE_SIZE)
        .table_leaf(&[person(1)])
        .freelist_trunk(0, &[4])
        .table_leaf(&[(3, vec![text("freed")])])
        .freelist(3, 2)
        .build();
    let at = PS + 300;
    image[at..at + hidden.len()].copy_from_slice(&hidden);

    let db = Database::from_bytes(image).unwrap();
    let run = recover(&db, &RecoveryPlan::default());
    let origins: Vec<_> = run.rows.iter().map(|r| r.origin).collect();
    let mut sorted = origins.clone();
    sorted.sort();
    assert_eq!(origins, sorted);
    assert!(origins.contains(&Origin::Live));
    assert!(origins.contains(&Origin::Freelist));
    assert!(origins.contains(&Origin::Unallocated));
}

#[test]
fn test_disabled_passes() {
    let image = DatabaseBuilder::new(PAGE_SIZE)
        .table_leaf(&[person(1)])
        .freelist_trunk(0, &[4])
        .table_leaf(&[(3, vec![text("freed")])])
        .freelist(3, 2)
        .build();
    let db = Database::from_bytes(image).unwrap();
    let plan = RecoveryPlan {
        freelist: false,
        unallocated: false,
        ..RecoveryPlan::default()
    };
    let run = recover(&db, &plan);
    assert!(run.rows.iter().all(|r| r.origin == Origin::Live));
    assert_eq!(run.context.freelist_rows, 0);
}

#[test]
fn test_decoder_consumes_header_plus_payload() {
    let values = vec![
        Value::Null,
        Value::Integer(-1),
        Value::Integer(1 << 40),
        Value::Real(3.25),
        text("abc"),
        Value::Blob(vec![0xAA; 20]),
    ];
    let bytes = encode_record(&values, TextEncoding::Utf8);
    let mut padded = bytes.clone();
    padded.extend_from_slice(&[0xEE; 16]);

    let rec = decode_record(&padded, TextEncoding::Utf8);
    assert!(!rec.corrupted);
    assert_eq!(rec.consumed, bytes.len());
    assert_eq!(rec.header_len, bytes[0] as usize);
    assert_eq!(rec.values, values);
}

#[test]
fn test_utf16_database() {
    let image = DatabaseBuilder::new(PAGE_SIZE)
        .encoding(TextEncoding::Utf16Le)
        .table_leaf(&[(1, vec![text("grüße"), Value::Integer(2)])])
        .build();
    let db = Database::from_bytes(image).unwrap();
    assert_eq!(db.text_encoding(), TextEncoding::Utf16Le);
    let run = recover(&db, &RecoveryPlan::default());
    assert_eq!(run.rows.len(), 1);
    assert_eq!(run.rows[0].values[0], text("grüße"));
}

#[test]
fn test_truncated_file_is_contained() {
    let mut image = build_three_leaf_tree();
    // cut through the middle of page 4
    image.truncate(3 * PS + PS / 2);
    let db = Database::from_bytes(image).unwrap();
    let run = recover(&db, &RecoveryPlan::default());

    assert!(run.context.corruption_count() > 0);
    assert!(run.context.page_read_errors > 0);
    // leaf 3 is still complete
    let rowids: Vec<_> = run.rows.iter().filter_map(|r| r.rowid).collect();
    assert!(rowids.starts_with(&[1, 2, 3, 4, 5]));
}

#[test]
fn test_corrupt_cell_pointer_is_skipped() {
    let mut image = build_three_leaf_tree();
    // page 3: aim the first cell pointer past the usable area
    let ptr = 2 * PS + BTREE_LEAF_HEADER_SIZE;
    BigEndian::write_u16(&mut image[ptr..], 0xFFF0);
    let db = Database::from_bytes(image).unwrap();
    let run = recover(&db, &RecoveryPlan::default());

    assert!(run.context.skipped_cells > 0);
    assert_eq!(run.context.live_rows, 14);
}

#[test]
fn test_cyclic_interior_page() {
    // page 2 lists itself as its right child
    let image = DatabaseBuilder::new(PAGE_SIZE)
        .table_interior(&[(3, 1)], 2)
        .table_leaf(&[person(1)])
        .build();
    let db = Database::from_bytes(image).unwrap();
    let run = recover(&db, &RecoveryPlan::default());
    assert!(run.context.cycles > 0);
    assert_eq!(run.context.live_rows, 1);
}

#[test]
fn test_recovery_is_idempotent() {
    let hidden = encode_record(&[text("residue"), Value::Integer(3)], TextEncoding::Utf8);
    let mut image = build_three_leaf_tree();
    let at = 3 * PS + 400;
    image[at..at + hidden.len()].copy_from_slice(&hidden);
    let tmp = write_temp(&image);

    let first = recover(&Database::open(tmp.path()).unwrap(), &RecoveryPlan::default());
    let second = recover(&Database::open(tmp.path()).unwrap(), &RecoveryPlan::default());
    assert_eq!(first.rows, second.rows);
    assert_eq!(first.context.total_rows(), second.context.total_rows());
}

#[test]
fn test_normalize_mixed_widths() {
    let image = DatabaseBuilder::new(PAGE_SIZE)
        .table_leaf(&[
            (1, vec![Value::Integer(1), Value::Integer(2)]),
            (2, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]),
            (3, vec![Value::Integer(1)]),
        ])
        .build();
    let db = Database::from_bytes(image).unwrap();
    let mut run = recover(&db, &RecoveryPlan::default());

    let width = normalize_rows(&mut run.rows);
    assert_eq!(width, 3);
    assert!(run.rows.iter().all(|r| r.values.len() == 3));
    assert_eq!(run.rows[2].values, vec![Value::Integer(1), Value::Null, Value::Null]);
    assert_eq!(column_names(width), vec!["field1", "field2", "field3"]);
}

#[test]
fn test_image_signatures() {
    let sig = identify_image(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]).unwrap();
    assert_eq!(sig.name, "JPEG");
    assert_eq!(sig.extension, "jpg");
    assert!(identify_image(&[0x13, 0x37, 0xC0, 0xDE, 0x42]).is_none());
}
