#![cfg(feature = "cli")]
//! Recovery against databases written by SQLite itself.
//!
//! Fixtures are created with `rusqlite` (bundled SQLite) in a temp directory,
//! the connection is closed, and the file is then read back with `sqlrec`.

use std::path::{Path, PathBuf};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection};
use tempfile::TempDir;

use sqlrec::cli::recover::{execute, Format, RecoverOptions};
use sqlrec::recovery::{recover, Origin, RecoveredRow, RecoveryPlan};
use sqlrec::sqlite::database::Database;
use sqlrec::sqlite::record::Value;

fn to_value(v: SqlValue) -> Value {
    match v {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(n) => Value::Integer(n),
        SqlValue::Real(f) => Value::Real(f),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Blob(b) => Value::Blob(b),
    }
}

fn open_fixture(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "PRAGMA page_size = 4096;
         PRAGMA auto_vacuum = NONE;",
    )
    .unwrap();
    // deleted content must stay on disk
    let secure: i64 = conn
        .pragma_update_and_check(None, "secure_delete", false, |row| row.get(0))
        .unwrap();
    assert_eq!(secure, 0);
    conn
}

fn people(conn: &Connection, table: &str, count: i64) {
    conn.execute_batch(&format!(
        "CREATE TABLE {} (name TEXT, age INTEGER, score REAL, tag BLOB);",
        table
    ))
    .unwrap();
    let tx = conn.unchecked_transaction().unwrap();
    for i in 1..=count {
        tx.execute(
            &format!("INSERT INTO {} VALUES (?1, ?2, ?3, ?4)", table),
            params![
                format!("{}-person-{:04}", table, i),
                i * 3,
                i as f64 + 0.25,
                vec![(i % 251) as u8; 6]
            ],
        )
        .unwrap();
    }
    tx.commit().unwrap();
}

fn select_all(conn: &Connection, table: &str) -> Vec<Vec<Value>> {
    let mut stmt = conn
        .prepare(&format!("SELECT name, age, score, tag FROM {} ORDER BY rowid", table))
        .unwrap();
    let rows: Vec<Vec<Value>> = stmt
        .query_map([], |r| {
            (0..4)
                .map(|i| r.get::<_, SqlValue>(i).map(to_value))
                .collect()
        })
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    rows
}

fn fixture_path(dir: &TempDir) -> PathBuf {
    dir.path().join("fixture.db")
}

fn rows_from(rows: &[RecoveredRow], origin: Origin) -> Vec<&RecoveredRow> {
    rows.iter().filter(|r| r.origin == origin).collect()
}

#[test]
fn test_live_walk_matches_select() {
    let dir = TempDir::new().unwrap();
    let path = fixture_path(&dir);
    let expected = {
        let conn = open_fixture(&path);
        people(&conn, "people", 600);
        select_all(&conn, "people")
    };

    let db = Database::open(&path).unwrap();
    assert_eq!(db.page_size(), 4096);
    let plan = RecoveryPlan {
        freelist: false,
        unallocated: false,
        ..RecoveryPlan::default()
    };
    let run = recover(&db, &plan);

    let table_rows: Vec<Vec<Value>> = run.rows.iter().map(|r| r.values.clone()).collect();
    assert_eq!(table_rows, expected);
    assert_eq!(run.context.corruption_count(), 0);
}

#[test]
fn test_schema_rows_on_request() {
    let dir = TempDir::new().unwrap();
    let path = fixture_path(&dir);
    {
        let conn = open_fixture(&path);
        conn.execute_batch("CREATE TABLE t (a TEXT); INSERT INTO t VALUES ('x');")
            .unwrap();
    }

    let db = Database::open(&path).unwrap();
    let mut plan = RecoveryPlan {
        freelist: false,
        unallocated: false,
        ..RecoveryPlan::default()
    };
    let run = recover(&db, &plan);
    assert_eq!(run.rows.len(), 1);
    assert_eq!(run.rows[0].values, vec![Value::Text("x".into())]);

    plan.schema = true;
    let run = recover(&db, &plan);
    let live = rows_from(&run.rows, Origin::Live);
    assert_eq!(live.len(), 2);
    assert_eq!(live[0].page, 1);
    assert_eq!(live[0].values[0], Value::Text("table".into()));
    assert_eq!(live[0].values[1], Value::Text("t".into()));
    assert_eq!(live[1].values, vec![Value::Text("x".into())]);
}

#[test]
fn test_drop_table_rows_on_freelist() {
    let dir = TempDir::new().unwrap();
    let path = fixture_path(&dir);
    let dropped = {
        let conn = open_fixture(&path);
        people(&conn, "keep", 5);
        people(&conn, "gone", 300);
        let rows = select_all(&conn, "gone");
        conn.execute_batch("DROP TABLE gone;").unwrap();
        rows
    };

    let db = Database::open(&path).unwrap();
    assert!(db.header().freelist_count > 1);
    let run = recover(&db, &RecoveryPlan::default());

    let freed = rows_from(&run.rows, Origin::Freelist);
    let found = dropped
        .iter()
        .filter(|values| freed.iter().any(|r| &r.values == *values))
        .count();
    // one freed page becomes the trunk and loses its cells
    assert!(
        found * 2 >= dropped.len(),
        "only {} of {} dropped rows recovered",
        found,
        dropped.len()
    );

    let live = rows_from(&run.rows, Origin::Live);
    assert_eq!(live.len(), 5);
}

#[test]
fn test_deleted_row_carved() {
    let dir = TempDir::new().unwrap();
    let path = fixture_path(&dir);
    {
        let conn = open_fixture(&path);
        conn.execute_batch("CREATE TABLE notes (body TEXT, n INTEGER);")
            .unwrap();
        // rowids of 3 varint bytes so the freeblock header only covers the
        // cell's length and rowid
        for i in 0..10 {
            conn.execute(
                "INSERT INTO notes (rowid, body, n) VALUES (?1, ?2, ?3)",
                params![20_000 + i, format!("note number {}", i), i],
            )
            .unwrap();
        }
        conn.execute("DELETE FROM notes WHERE rowid = 20004", [])
            .unwrap();
    }

    let db = Database::open(&path).unwrap();
    let run = recover(&db, &RecoveryPlan::default());

    let live = rows_from(&run.rows, Origin::Live);
    assert_eq!(live.len(), 9);
    assert!(live.iter().all(|r| r.rowid != Some(20_004)));

    let carved = rows_from(&run.rows, Origin::Unallocated);
    assert!(carved
        .iter()
        .any(|r| r.values == vec![Value::Text("note number 4".into()), Value::Integer(4)]));
}

#[test]
fn test_truncated_database() {
    let dir = TempDir::new().unwrap();
    let path = fixture_path(&dir);
    {
        let conn = open_fixture(&path);
        people(&conn, "people", 400);
    }

    let mut bytes = std::fs::read(&path).unwrap();
    let keep = bytes.len() / 2 + 1000;
    bytes.truncate(keep);
    let db = Database::from_bytes(bytes).unwrap();
    let run = recover(&db, &RecoveryPlan::default());

    assert!(run.context.corruption_count() > 0);
    assert!(run.context.page_read_errors > 0);
    assert!(run.context.live_rows > 0);
}

#[test]
fn test_recovery_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = fixture_path(&dir);
    {
        let conn = open_fixture(&path);
        people(&conn, "people", 200);
        conn.execute("DELETE FROM people WHERE age % 7 = 0", [])
            .unwrap();
    }

    let first = recover(&Database::open(&path).unwrap(), &RecoveryPlan::default());
    let second = recover(&Database::open(&path).unwrap(), &RecoveryPlan::default());
    assert_eq!(first.rows, second.rows);
}

#[test]
fn test_end_to_end_sqlite_output() {
    let dir = TempDir::new().unwrap();
    let path = fixture_path(&dir);
    {
        let conn = open_fixture(&path);
        conn.execute_batch("CREATE TABLE photos (caption TEXT, data BLOB);")
            .unwrap();
        let png: Vec<u8> = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x01];
        conn.execute(
            "INSERT INTO photos VALUES (?1, ?2)",
            params!["beach", png],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO photos VALUES (?1, ?2)",
            params!["raw", vec![0x01u8, 0x02, 0x03]],
        )
        .unwrap();
    }

    let output = dir.path().join("recovered.db");
    let image_dir = dir.path().join("images");
    let opts = RecoverOptions {
        input: path.display().to_string(),
        output: output.display().to_string(),
        format: Format::Sqlite,
        extract_images: true,
        image_dir: image_dir.display().to_string(),
        root: None,
        freelist: true,
        unallocated: true,
        schema: false,
        page_size: None,
        mmap: true,
        verbose: false,
        json: true,
    };
    let mut report = Vec::new();
    let written = execute(&opts, &mut report).unwrap();
    assert!(written >= 2);

    assert!(image_dir.join("image_1.png").exists());

    let conn = Connection::open(&output).unwrap();
    let captions: Vec<(String, String)> = {
        let mut stmt = conn
            .prepare("SELECT field1, field2 FROM recovered_data WHERE field1 IN ('beach', 'raw') ORDER BY rowid")
            .unwrap();
        let rows: Vec<(String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        rows
    };
    assert_eq!(
        captions,
        vec![
            ("beach".to_string(), "image_1.png".to_string()),
            ("raw".to_string(), "010203".to_string()),
        ]
    );
}
