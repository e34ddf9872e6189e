//! Emitters for recovered rows.
//!
//! Both emitters take rows that have already been normalized (every row the
//! same width) and, when image extraction is on, carved. Columns are named
//! `field1..fieldN`.

pub mod csv;
#[cfg(feature = "cli")]
pub mod sqlite;
