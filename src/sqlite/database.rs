//! SQLite database file access.
//!
//! Provides [`Database`], the entry point for reading a SQLite file as a
//! sequence of fixed-size page frames. The page size comes from the 100-byte
//! header on page 1 (or from an explicit override when the header is
//! damaged). Pages are numbered from 1, as SQLite numbers them: page `n`
//! occupies bytes `(n - 1) * page_size .. n * page_size`.
//!
//! The file is held entirely in memory, either as an owned buffer or as a
//! read-only memory map, and page accessors hand out borrowed slices. A file
//! whose length is not a multiple of the page size keeps its trailing partial
//! page reachable through [`Database::page`], which reports it as truncated.

use std::ops::{Deref, RangeInclusive};

use crate::sqlite::constants::*;
use crate::sqlite::header::{is_valid_page_size, DatabaseHeader, TextEncoding};
use crate::sqlite::page::{btree_header_offset, BTreePageHeader};
use crate::{PageResult, RecoveryError};

/// Smallest usable size SQLite accepts once reserved bytes are subtracted.
const MIN_USABLE_SIZE: usize = 480;

/// Where the file bytes live.
enum Backing {
    Owned(Vec<u8>),
    #[cfg(feature = "cli")]
    Mapped(memmap2::Mmap),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Backing::Owned(v) => v,
            #[cfg(feature = "cli")]
            Backing::Mapped(m) => m,
        }
    }
}

/// A page frame borrowed from a [`Database`].
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    /// 1-based page number.
    pub number: u32,
    /// Byte offset of the page within the file.
    pub offset: u64,
    /// The full page, `page_size` bytes long.
    pub data: &'a [u8],
}

impl<'a> Page<'a> {
    /// Page bytes up to the usable size (reserved bytes at the end excluded).
    pub fn usable(&self, usable_size: usize) -> &'a [u8] {
        &self.data[..usable_size.min(self.data.len())]
    }

    /// Parse this page's b-tree header from its type byte.
    pub fn btree_header(&self) -> Option<BTreePageHeader> {
        BTreePageHeader::parse(self.data, btree_header_offset(self.number))
    }
}

/// An open SQLite database file or in-memory image.
pub struct Database {
    data: Backing,
    header: DatabaseHeader,
    page_size: u32,
    usable_size: usize,
    page_count: u32,
}

impl Database {
    /// Open a SQLite database file, reading it into memory.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self, RecoveryError> {
        Self::init(Backing::Owned(read_file(path.as_ref())?), None)
    }

    /// Open with a specific page size (bypass the header field).
    pub fn open_with_page_size<P: AsRef<std::path::Path>>(
        path: P,
        page_size: u32,
    ) -> Result<Self, RecoveryError> {
        Self::init(Backing::Owned(read_file(path.as_ref())?), Some(page_size))
    }

    /// Open a SQLite database file using memory-mapped I/O.
    ///
    /// # Safety
    ///
    /// The underlying `mmap` call is marked `unsafe` because the mapped file
    /// must not be modified by another process while the mapping is active.
    /// Recovery should always run against a copy of the evidence file, which
    /// nothing else writes to.
    #[cfg(feature = "cli")]
    pub fn open_mmap<P: AsRef<std::path::Path>>(
        path: P,
        page_size: Option<u32>,
    ) -> Result<Self, RecoveryError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| RecoveryError::Io(format!("Cannot open {}: {}", path.display(), e)))?;

        let mmap = unsafe {
            memmap2::Mmap::map(&file)
                .map_err(|e| RecoveryError::Io(format!("Cannot mmap {}: {}", path.display(), e)))?
        };

        Self::init(Backing::Mapped(mmap), page_size)
    }

    /// Create a database from an in-memory byte buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlrec::sqlite::database::Database;
    /// use sqlrec::sqlite::write::DatabaseBuilder;
    ///
    /// let image = DatabaseBuilder::new(4096).build();
    /// let db = Database::from_bytes(image).unwrap();
    /// assert_eq!(db.page_size(), 4096);
    /// assert_eq!(db.page_count(), 1);
    /// ```
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, RecoveryError> {
        Self::init(Backing::Owned(data), None)
    }

    /// Create a database from an in-memory buffer with a specific page size.
    pub fn from_bytes_with_page_size(data: Vec<u8>, page_size: u32) -> Result<Self, RecoveryError> {
        Self::init(Backing::Owned(data), Some(page_size))
    }

    /// Shared initialization: parse the header and fix the page geometry.
    fn init(data: Backing, forced_page_size: Option<u32>) -> Result<Self, RecoveryError> {
        let header = DatabaseHeader::parse(&data)?;

        let page_size = match forced_page_size {
            Some(ps) if is_valid_page_size(ps) => ps,
            Some(ps) => {
                return Err(RecoveryError::Argument(format!(
                    "Invalid page size {}: must be a power of two between {} and {}",
                    ps, MIN_PAGE_SIZE, MAX_PAGE_SIZE
                )))
            }
            None if header.page_size_is_valid() => header.page_size,
            None => {
                return Err(RecoveryError::Format(format!(
                    "Invalid page size {} in database header",
                    header.page_size
                )))
            }
        };

        // A reserved-space value that would leave less than the SQLite minimum
        // usable area is itself corrupt; fall back to the whole page.
        let reserved = header.reserved_space as usize;
        let usable_size = if (page_size as usize).saturating_sub(reserved) >= MIN_USABLE_SIZE {
            page_size as usize - reserved
        } else {
            page_size as usize
        };

        let page_count = u32::try_from(data.len() as u64 / page_size as u64).map_err(|_| {
            RecoveryError::Format(format!("File too large: {} bytes", data.len()))
        })?;

        Ok(Database {
            data,
            header,
            page_size,
            usable_size,
            page_count,
        })
    }

    /// The parsed 100-byte database header.
    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Page size minus the reserved bytes at the end of each page.
    pub fn usable_size(&self) -> usize {
        self.usable_size
    }

    /// Number of complete pages in the file.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// File size in bytes.
    pub fn file_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Text encoding declared in the header.
    pub fn text_encoding(&self) -> TextEncoding {
        self.header.text_encoding
    }

    /// Raw file bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns true if `page_number` names a complete page of this file.
    pub fn contains(&self, page_number: u32) -> bool {
        page_number >= 1 && page_number <= self.page_count
    }

    /// Highest page number a full scan should attempt.
    ///
    /// This is the number of complete pages, plus one when the file ends in
    /// a partial page. It never exceeds what the file can hold, however many
    /// pages the header claims.
    pub fn scan_limit(&self) -> u32 {
        let mut limit = self.page_count;
        if self.data.len() as u64 % self.page_size as u64 != 0 {
            limit = limit.saturating_add(1);
        }
        limit
    }

    /// Pages the header claims but the file cannot supply, if any.
    ///
    /// Only a trustworthy in-header size is considered. The range starts
    /// after [`Database::scan_limit`].
    pub fn missing_pages(&self) -> Option<RangeInclusive<u32>> {
        let claimed = self.header.database_size;
        let limit = self.scan_limit();
        if self.header.database_size_is_valid() && claimed > limit {
            Some(limit + 1..=claimed)
        } else {
            None
        }
    }

    /// Read page `page_number` (1-based).
    ///
    /// Fails with [`RecoveryError::PageRead`] if the page lies beyond the end
    /// of the file or is only partially present.
    pub fn page(&self, page_number: u32) -> PageResult<Page<'_>> {
        let data = self.page_data(page_number)?;
        Ok(Page {
            number: page_number,
            offset: (page_number as u64 - 1) * self.page_size as u64,
            data,
        })
    }

    /// Borrow the bytes of page `page_number` (1-based).
    pub fn page_data(&self, page_number: u32) -> PageResult<&[u8]> {
        if page_number == 0 {
            return Err(RecoveryError::PageRead(
                "Page 0 does not exist (pages are numbered from 1)".to_string(),
            ));
        }
        let page_size = self.page_size as u64;
        let offset = (page_number as u64 - 1) * page_size;
        let file_size = self.data.len() as u64;

        if offset >= file_size {
            return Err(RecoveryError::PageRead(format!(
                "Page {} out of range (file has {} pages)",
                page_number, self.page_count
            )));
        }
        if offset + page_size > file_size {
            return Err(RecoveryError::PageRead(format!(
                "Page {} truncated: only {} of {} bytes present",
                page_number,
                file_size - offset,
                page_size
            )));
        }

        let start = offset as usize;
        Ok(&self.data[start..start + self.page_size as usize])
    }
}

fn read_file(path: &std::path::Path) -> Result<Vec<u8>, RecoveryError> {
    std::fs::read(path)
        .map_err(|e| RecoveryError::Io(format!("Cannot read {}: {}", path.display(), e)))
}
