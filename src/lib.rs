//! SQLite forensic recovery toolkit.
//!
//! The `sqlite-recovery` crate (library name `sqlrec`) parses the raw byte
//! layout of a SQLite database file without going through the SQLite engine,
//! so it can surface rows a normal client cannot see:
//!
//! - **live** rows reachable from table b-trees,
//! - **freelist** rows left behind on pages freed by `DELETE` / `DROP TABLE`,
//! - **unallocated** fragments carved out of the unused space of every page.
//!
//! BLOB values that carry an embedded image (JPEG, PNG, GIF, BMP, TIFF, ICO)
//! can be extracted to files and replaced by the file name.
//!
//! # CLI Reference
//!
//! ```text
//! sqlrec -i evidence.db -o recovered.db                  # SQLite output
//! sqlrec -i evidence.db -o recovered.csv -f csv -e       # CSV + image extraction
//! sqlrec -i evidence.db -o out.csv -f csv --json -v      # JSON run report
//! ```
//!
//! Always run recovery against a copy of the evidence file. The input is only
//! opened for reading, but a live SQLite process may still rewrite it.
//!
//! # Library API
//!
//! ```no_run
//! use sqlrec::sqlite::database::Database;
//! use sqlrec::recovery::{recover, RecoveryPlan};
//!
//! let db = Database::open("evidence.db").unwrap();
//! let run = recover(&db, &RecoveryPlan::default());
//! for row in &run.rows {
//!     println!("{:?} {:?}", row.origin, row.values);
//! }
//! println!("corrupt items: {}", run.context.corruption_count());
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`sqlite::header`] | 100-byte database header parsing |
//! | [`sqlite::database`] | Page frames over the raw file buffer |
//! | [`sqlite::page`] | Page classification, b-tree page headers, cell pointers |
//! | [`sqlite::varint`] | SQLite variable-length integers |
//! | [`sqlite::record`] | Record format decoding and encoding |
//! | [`sqlite::cell`] | Table cell parsing and overflow chains |
//! | [`sqlite::write`] | Synthetic database builders for tests and fixtures |
//! | [`recovery`] | The three recovery walks, image carving and row normalization |
//! | [`output`] | CSV and SQLite emitters |
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli` | on | The `sqlrec` binary, SQLite output (`rusqlite`), memory-mapped input, progress bars. |

#[cfg(feature = "cli")]
pub mod cli;
pub mod output;
pub mod recovery;
pub mod sqlite;
pub mod util;

use thiserror::Error;

/// Errors returned by `sqlrec` operations.
///
/// Only [`Format`](RecoveryError::Format), [`OutputWrite`](RecoveryError::OutputWrite),
/// [`Io`](RecoveryError::Io) and [`Argument`](RecoveryError::Argument) abort a
/// run. The other variants are contained at the page, cell or asset that raised
/// them and only show up as counters in the run summary.
#[derive(Error, Debug)]
pub enum RecoveryError {
    /// Missing or invalid database header (magic string, page size).
    #[error("Format error: {0}")]
    Format(String),

    /// A page number outside the file, or a truncated page.
    #[error("Page read error: {0}")]
    PageRead(String),

    /// An inconsistent record header or payload.
    #[error("Record decode error: {0}")]
    RecordDecode(String),

    /// An extracted image could not be written.
    #[error("Image write error: {0}")]
    ImageWrite(String),

    /// The final SQLite or CSV artifact could not be produced.
    #[error("Output write error: {0}")]
    OutputWrite(String),

    /// An I/O error occurred (input open/read, report output).
    #[error("I/O error: {0}")]
    Io(String),

    /// An invalid argument was supplied.
    #[error("Invalid argument: {0}")]
    Argument(String),
}

/// Result of reading a page frame.
pub type PageResult<T> = Result<T, RecoveryError>;

/// Result of parsing a cell or record.
pub type RecordResult<T> = Result<T, RecoveryError>;
