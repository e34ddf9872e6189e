//! SQLite binary format parsing.
//!
//! Types and functions for reading the on-disk structures of a SQLite
//! version 3 database file: the database header, b-tree pages, cells,
//! overflow chains and the record format. Everything here works on byte
//! slices and never trusts a length or pointer without bounds-checking it.
//!
//! Start with [`database::Database`] to wrap a file buffer, then use
//! [`page::BTreePageHeader`] and [`record::decode_record`] on its pages.

pub mod cell;
pub mod constants;
pub mod database;
pub mod header;
pub mod page;
pub mod record;
pub mod varint;
pub mod write;
