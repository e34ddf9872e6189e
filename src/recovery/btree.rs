//! Live row recovery from table b-trees.
//!
//! Without a schema there is no list of root pages, so roots are discovered:
//! every table b-tree page that no table interior page points at is the root
//! of some tree. Trees are walked depth-first in stored key order, which
//! returns each table's rows in rowid order. Table pages still unvisited
//! after that (orphans, or pages only reachable through a cycle) are walked
//! as roots of their own.
//!
//! Page 1 holds the `sqlite_master` table. Its tree is walked first so its
//! pages count as visited, but schema rows are only emitted when asked for
//! (or when page 1 is the explicit root). Cells whose record has no columns
//! are counted as corrupt and dropped.

use std::collections::HashSet;

use crate::recovery::{Origin, Pass, PageMap, RecoveredRow, ScanContext};
use crate::sqlite::cell::{
    parse_table_interior_cell, parse_table_leaf_cell, read_payload, OverflowFault,
};
use crate::sqlite::database::{Database, Page};
use crate::sqlite::page::{cell_pointer_in_bounds, cell_pointers, BTreePageHeader, PageKind};
use crate::sqlite::record::decode_record;
use crate::RecoveryError;

/// Table b-tree pages not referenced as a child by any table interior page,
/// ascending. Freelist pages are never roots.
pub fn discover_roots(db: &Database, pages: &PageMap) -> Vec<u32> {
    let mut tables = Vec::new();
    let mut children = HashSet::new();

    for (number, kind) in pages.iter() {
        if !kind.is_table() {
            continue;
        }
        tables.push(number);
        if kind == PageKind::TableInterior {
            if let Ok(page) = db.page(number) {
                if let Some(hdr) = page.btree_header() {
                    children.extend(interior_links(page.data, &hdr, db.usable_size()));
                }
            }
        }
    }

    tables.retain(|n| !children.contains(n));
    tables
}

/// Child page numbers of an interior page in key order, right child last.
/// Unreadable cells are left out.
fn interior_links(data: &[u8], hdr: &BTreePageHeader, usable: usize) -> Vec<u32> {
    let mut links: Vec<u32> = cell_pointers(data, hdr, usable)
        .into_iter()
        .filter(|&ptr| cell_pointer_in_bounds(ptr, hdr, usable))
        .filter_map(|ptr| parse_table_interior_cell(data, ptr, usable).ok())
        .map(|cell| cell.left_child)
        .collect();
    links.extend(hdr.right_child);
    links
}

/// Recover every row reachable from table b-trees.
///
/// With `root` set, only that tree is walked. Otherwise the discovered roots
/// are walked in ascending order, then any table page left unvisited. The
/// schema tree on page 1 contributes rows only when `schema` is set.
pub fn recover_live(
    db: &Database,
    pages: &mut PageMap,
    root: Option<u32>,
    schema: bool,
    ctx: &mut ScanContext,
    progress: &mut dyn FnMut(Pass, u64),
) -> Vec<RecoveredRow> {
    let mut walker = TreeWalker {
        db,
        visited: HashSet::new(),
        rows: Vec::new(),
        emit: true,
    };

    match root {
        Some(r) => {
            if db.contains(r) {
                walker.walk(r, pages, ctx, progress);
            } else {
                ctx.page_error(&RecoveryError::PageRead(format!(
                    "Root page {} out of range (file has {} pages)",
                    r,
                    db.page_count()
                )));
            }
        }
        None => {
            if !schema && pages.kind(1).is_some_and(PageKind::is_table) {
                walker.emit = false;
                walker.walk(1, pages, ctx, progress);
                walker.emit = true;
            }
            for r in discover_roots(db, pages) {
                if !walker.visited.contains(&r) {
                    walker.walk(r, pages, ctx, progress);
                }
            }
            let orphans: Vec<u32> = pages
                .iter()
                .filter(|(n, kind)| kind.is_table() && !walker.visited.contains(n))
                .map(|(n, _)| n)
                .collect();
            for r in orphans {
                if !walker.visited.contains(&r) {
                    walker.walk(r, pages, ctx, progress);
                }
            }
        }
    }

    for _ in &walker.rows {
        ctx.count_row(Origin::Live);
    }
    walker.rows
}

struct TreeWalker<'a> {
    db: &'a Database,
    visited: HashSet<u32>,
    rows: Vec<RecoveredRow>,
    /// Off while walking the schema tree.
    emit: bool,
}

impl TreeWalker<'_> {
    /// Depth-first walk from `root`, children in stored order then the right
    /// child. The explicit stack keeps deep or hostile trees off the call stack.
    fn walk(
        &mut self,
        root: u32,
        pages: &mut PageMap,
        ctx: &mut ScanContext,
        progress: &mut dyn FnMut(Pass, u64),
    ) {
        let mut stack = vec![root];

        while let Some(number) = stack.pop() {
            if !self.visited.insert(number) {
                ctx.cycle(number, "b-tree");
                continue;
            }
            progress(Pass::Live, self.visited.len() as u64);

            let page = match self.db.page(number) {
                Ok(p) => p,
                Err(e) => {
                    ctx.page_error(&e);
                    continue;
                }
            };
            let hdr = match page.btree_header() {
                Some(h) => h,
                None => continue,
            };

            match hdr.kind {
                PageKind::TableLeaf => self.read_leaf(&page, &hdr, pages, ctx),
                PageKind::TableInterior => {
                    let children = self.read_interior(&page, &hdr, pages, ctx);
                    stack.extend(children.into_iter().rev());
                }
                other => ctx.skipped_cell(
                    number,
                    hdr.header_offset,
                    &format!("Page {} in a table b-tree is {}", number, other),
                ),
            }
        }
    }

    /// Validated child pointers of an interior page, in visiting order.
    fn read_interior(
        &self,
        page: &Page<'_>,
        hdr: &BTreePageHeader,
        pages: &PageMap,
        ctx: &mut ScanContext,
    ) -> Vec<u32> {
        let usable = self.db.usable_size();
        let mut children = Vec::new();

        for ptr in cell_pointers(page.data, hdr, usable) {
            if !cell_pointer_in_bounds(ptr, hdr, usable) {
                ctx.skipped_cell(page.number, ptr, "cell pointer outside the page");
                continue;
            }
            match parse_table_interior_cell(page.data, ptr, usable) {
                Ok(cell) => children.push(cell.left_child),
                Err(e) => ctx.skipped_cell(page.number, ptr, &e.to_string()),
            }
        }
        children.extend(hdr.right_child);

        children.retain(|&child| {
            if !self.db.contains(child) {
                ctx.page_error(&RecoveryError::PageRead(format!(
                    "Child page {} of page {} out of range (file has {} pages)",
                    child,
                    page.number,
                    self.db.page_count()
                )));
                return false;
            }
            if matches!(
                pages.kind(child),
                Some(PageKind::FreelistTrunk | PageKind::FreelistLeaf)
            ) {
                ctx.skipped_cell(
                    page.number,
                    hdr.header_offset,
                    &format!("Child page {} is on the freelist", child),
                );
                return false;
            }
            true
        });
        children
    }

    fn read_leaf(
        &mut self,
        page: &Page<'_>,
        hdr: &BTreePageHeader,
        pages: &mut PageMap,
        ctx: &mut ScanContext,
    ) {
        let usable = self.db.usable_size();
        let encoding = self.db.text_encoding();

        for ptr in cell_pointers(page.data, hdr, usable) {
            if !cell_pointer_in_bounds(ptr, hdr, usable) {
                ctx.skipped_cell(page.number, ptr, "cell pointer outside the page");
                continue;
            }
            let cell = match parse_table_leaf_cell(page.data, ptr, usable) {
                Ok(c) => c,
                Err(e) => {
                    ctx.skipped_cell(page.number, ptr, &e.to_string());
                    continue;
                }
            };

            let payload = read_payload(self.db, page.data, &cell);
            for &overflow in &payload.overflow_pages {
                pages.mark_overflow(overflow);
            }
            if !self.emit {
                continue;
            }

            let mut problem = match payload.fault {
                None => None,
                Some(OverflowFault::Cycle(p)) => {
                    ctx.cycle(p, "overflow chain");
                    Some(format!("overflow chain revisits page {}", p))
                }
                Some(OverflowFault::PageRead(e)) => {
                    let msg = e.to_string();
                    ctx.page_error(&e);
                    Some(msg)
                }
                Some(OverflowFault::EndedEarly { missing }) => Some(format!(
                    "overflow chain ended {} bytes short",
                    missing
                )),
            };

            let rec = decode_record(&payload.bytes, encoding);
            if rec.corrupted && problem.is_none() {
                problem = rec.error.clone();
            }
            if rec.values.is_empty() {
                let reason = problem.unwrap_or_else(|| "record has no columns".to_string());
                ctx.corrupt_record(page.number, ptr, &reason);
                continue;
            }
            let corrupted = rec.corrupted || problem.is_some();
            if corrupted {
                let reason = problem.unwrap_or_else(|| "inconsistent record".to_string());
                ctx.corrupt_record(page.number, ptr, &reason);
            }

            self.rows.push(RecoveredRow {
                values: rec.values,
                origin: Origin::Live,
                corrupted,
                page: page.number,
                offset: ptr,
                rowid: Some(cell.rowid),
            });
        }
    }
}
