//! Table b-tree cells and overflow chains.
//!
//! A table leaf cell is `payload_len varint | rowid varint | payload`. When
//! the payload is larger than the page can hold locally, only a prefix is
//! stored in the cell, followed by a 4-byte page number that starts a chain
//! of overflow pages. Each overflow page holds a 4-byte next pointer and
//! `usable_size - 4` bytes of payload.
//!
//! A table interior cell is `left_child u32 | rowid varint`.

use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder};

use crate::sqlite::constants::*;
use crate::sqlite::database::Database;
use crate::sqlite::varint::read_varint_at;
use crate::{RecordResult, RecoveryError};

/// Number of payload bytes a table leaf cell keeps on the page.
///
/// With `U` the usable size and `P` the payload size, the threshold is
/// `X = U - 35`. Payloads up to `X` are stored entirely on the page. Larger
/// payloads keep `K = M + (P - M) % (U - 4)` bytes locally if `K <= X`,
/// otherwise `M`, where `M = (U - 12) * 32 / 255 - 23`.
///
/// # Examples
///
/// ```
/// use sqlrec::sqlite::cell::local_payload_size;
///
/// assert_eq!(local_payload_size(100, 4096), 100);
/// assert_eq!(local_payload_size(4061, 4096), 4061);
/// assert!(local_payload_size(10_000, 4096) < 4061);
/// ```
pub fn local_payload_size(payload_size: u64, usable: usize) -> usize {
    let u = usable as u64;
    let max_local = u - 35;
    if payload_size <= max_local {
        return payload_size as usize;
    }
    let min_local = (u - 12) * 32 / 255 - 23;
    let k = min_local + (payload_size - min_local) % (u - 4);
    if k <= max_local {
        k as usize
    } else {
        min_local as usize
    }
}

/// A parsed table leaf cell.
#[derive(Debug, Clone)]
pub struct TableLeafCell {
    /// Offset of the cell within its page.
    pub offset: usize,
    /// Declared total payload size.
    pub payload_size: u64,
    /// Row id.
    pub rowid: i64,
    /// Offset of the first payload byte within the page.
    pub payload_offset: usize,
    /// Payload bytes stored on this page.
    pub local_size: usize,
    /// First overflow page, if the payload spills.
    pub overflow_page: Option<u32>,
}

impl TableLeafCell {
    /// The payload bytes stored on the page.
    pub fn local_payload<'a>(&self, page: &'a [u8]) -> &'a [u8] {
        &page[self.payload_offset..self.payload_offset + self.local_size]
    }

    /// Bytes of payload that live on overflow pages.
    pub fn overflow_size(&self) -> u64 {
        self.payload_size - self.local_size as u64
    }
}

/// Parse the table leaf cell at `offset`.
///
/// Fails with [`RecoveryError::RecordDecode`] if the cell header is
/// truncated or the local payload (plus overflow pointer) runs past `usable`.
pub fn parse_table_leaf_cell(
    page: &[u8],
    offset: usize,
    usable: usize,
) -> RecordResult<TableLeafCell> {
    let area = &page[..usable.min(page.len())];

    let (payload_size, n1) = read_varint_at(area, offset).ok_or_else(|| {
        RecoveryError::RecordDecode(format!("Truncated payload length at offset {}", offset))
    })?;
    let (rowid, n2) = read_varint_at(area, offset + n1).ok_or_else(|| {
        RecoveryError::RecordDecode(format!("Truncated rowid at offset {}", offset + n1))
    })?;

    let payload_offset = offset + n1 + n2;
    let local_size = local_payload_size(payload_size, usable);
    let spills = (local_size as u64) < payload_size;
    let end = payload_offset + local_size + if spills { PAGE_NUMBER_SIZE } else { 0 };
    if end > area.len() {
        return Err(RecoveryError::RecordDecode(format!(
            "Cell at offset {} overruns page: payload {} bytes ends at {} (usable {})",
            offset,
            payload_size,
            end,
            area.len()
        )));
    }

    let overflow_page = if spills {
        Some(BigEndian::read_u32(&area[payload_offset + local_size..]))
    } else {
        None
    };

    Ok(TableLeafCell {
        offset,
        payload_size,
        rowid: rowid as i64,
        payload_offset,
        local_size,
        overflow_page,
    })
}

/// A parsed table interior cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableInteriorCell {
    /// Child page holding rows with rowid <= `rowid`.
    pub left_child: u32,
    /// Divider key.
    pub rowid: i64,
}

/// Parse the table interior cell at `offset`.
pub fn parse_table_interior_cell(
    page: &[u8],
    offset: usize,
    usable: usize,
) -> RecordResult<TableInteriorCell> {
    let area = &page[..usable.min(page.len())];
    if offset + PAGE_NUMBER_SIZE > area.len() {
        return Err(RecoveryError::RecordDecode(format!(
            "Interior cell at offset {} overruns page",
            offset
        )));
    }
    let left_child = BigEndian::read_u32(&area[offset..]);
    let (rowid, _) = read_varint_at(area, offset + PAGE_NUMBER_SIZE).ok_or_else(|| {
        RecoveryError::RecordDecode(format!("Truncated interior rowid at offset {}", offset))
    })?;
    Ok(TableInteriorCell {
        left_child,
        rowid: rowid as i64,
    })
}

/// Why an overflow chain could not be followed to the end.
#[derive(Debug)]
pub enum OverflowFault {
    /// The chain revisited a page.
    Cycle(u32),
    /// The chain pointed at a page the file cannot supply.
    PageRead(RecoveryError),
    /// The chain ended (next pointer 0) before the payload was complete.
    EndedEarly { missing: u64 },
}

/// A cell's payload, reassembled from the page and its overflow chain.
#[derive(Debug)]
pub struct Payload {
    /// Payload bytes gathered, possibly short of the declared size.
    pub bytes: Vec<u8>,
    /// Overflow pages visited, in chain order.
    pub overflow_pages: Vec<u32>,
    /// Set when the chain could not be followed to the end.
    pub fault: Option<OverflowFault>,
}

/// Gather a table leaf cell's full payload.
///
/// Follows the overflow chain until the declared size is reached. The walk
/// stops at a revisited page, an unreadable page or a premature end of chain;
/// the bytes gathered so far are returned together with the fault.
pub fn read_payload(db: &Database, page: &[u8], cell: &TableLeafCell) -> Payload {
    let mut bytes = cell.local_payload(page).to_vec();
    let mut overflow_pages = Vec::new();
    let mut remaining = cell.overflow_size();
    let mut next = cell.overflow_page.unwrap_or(0);
    let mut visited = HashSet::new();
    let chunk = db.usable_size() - OVERFLOW_HEADER_SIZE;

    while remaining > 0 {
        if next == 0 {
            return Payload {
                bytes,
                overflow_pages,
                fault: Some(OverflowFault::EndedEarly { missing: remaining }),
            };
        }
        if !visited.insert(next) {
            return Payload {
                bytes,
                overflow_pages,
                fault: Some(OverflowFault::Cycle(next)),
            };
        }
        let data = match db.page_data(next) {
            Ok(d) => d,
            Err(e) => {
                return Payload {
                    bytes,
                    overflow_pages,
                    fault: Some(OverflowFault::PageRead(e)),
                }
            }
        };
        overflow_pages.push(next);

        let take = (remaining as usize).min(chunk);
        bytes.extend_from_slice(&data[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + take]);
        remaining -= take as u64;
        next = BigEndian::read_u32(&data[..PAGE_NUMBER_SIZE]);
    }

    Payload {
        bytes,
        overflow_pages,
        fault: None,
    }
}
