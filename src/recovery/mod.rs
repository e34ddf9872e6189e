//! Row recovery from a SQLite database image.
//!
//! A run makes up to three passes over the same immutable [`Database`]:
//!
//! 1. **Live** ([`btree`]): table b-trees are walked depth-first from their
//!    roots and every leaf cell is decoded.
//! 2. **Freelist** ([`freelist`]): pages on the freelist chain are read as if
//!    they were still table leaves, which recovers rows from pages freed by
//!    `DELETE` or `DROP TABLE` and not yet reused.
//! 3. **Unallocated** ([`unallocated`]): the unused bytes of every page are
//!    carved for anything that decodes as a plausible record.
//!
//! Before the passes, every page up to [`Database::scan_limit`] is read and
//! classified into a [`PageMap`]. Freelist membership overrides the type byte,
//! so a freed page whose stale header still says "table leaf" is not mistaken
//! for a live one.
//!
//! Problems with individual pages, cells or records never abort a run. They
//! are counted in the run's [`ScanContext`] and surface in the summary.
//!
//! Rows come back in pass order, and within a pass in page order.
//! [`normalize`] pads them to a common width and [`images`] replaces embedded
//! pictures with files before they are emitted.

pub mod btree;
pub mod freelist;
pub mod images;
pub mod normalize;
pub mod unallocated;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::recovery::freelist::FreelistPages;
use crate::sqlite::database::Database;
use crate::sqlite::page::PageKind;
use crate::sqlite::record::Value;
use crate::RecoveryError;

/// Diagnostics kept per run; counters keep counting past this.
const MAX_DIAGNOSTICS: usize = 200;

/// Where a recovered row was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Live,
    Freelist,
    Unallocated,
}

impl Origin {
    pub fn name(self) -> &'static str {
        match self {
            Origin::Live => "live",
            Origin::Freelist => "freelist",
            Origin::Unallocated => "unallocated",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A row recovered from the database image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveredRow {
    /// Column values in record order.
    pub values: Vec<Value>,
    /// Which pass found the row.
    pub origin: Origin,
    /// The record (or its overflow chain) was inconsistent; `values` holds
    /// the columns decoded before the inconsistency.
    pub corrupted: bool,
    /// Page the record was found on.
    pub page: u32,
    /// Offset of the cell or carved record within the page.
    pub offset: usize,
    /// Row id, when the record came with a cell header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rowid: Option<i64>,
}

/// A recovery pass, reported to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Classify,
    Live,
    Freelist,
    Unallocated,
}

impl Pass {
    pub fn name(self) -> &'static str {
        match self {
            Pass::Classify => "Classifying pages",
            Pass::Live => "Walking table b-trees",
            Pass::Freelist => "Reading freelist pages",
            Pass::Unallocated => "Carving unallocated space",
        }
    }
}

/// Counters accumulated over one recovery run.
///
/// Created fresh per run and threaded through every pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanContext {
    /// Pages successfully read during classification.
    pub pages_visited: u64,
    /// Pages that could not be read (out of range, truncated).
    pub page_read_errors: u64,
    /// Live records decoded only in part.
    pub corrupt_records: u64,
    /// Live cells skipped entirely (bad pointer, unreadable cell header).
    pub skipped_cells: u64,
    /// Revisited pages in b-tree, freelist or overflow chains.
    pub cycles: u64,
    /// Rows recovered by the live pass.
    pub live_rows: u64,
    /// Rows recovered by the freelist pass.
    pub freelist_rows: u64,
    /// Rows carved from unallocated space.
    pub unallocated_rows: u64,
    /// The first few problems, for the verbose report.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl ScanContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a page that could not be read.
    pub fn page_error(&mut self, err: &RecoveryError) {
        self.page_read_errors += 1;
        self.note(err.to_string());
    }

    /// Count a record that decoded only in part.
    pub fn corrupt_record(&mut self, page: u32, offset: usize, reason: &str) {
        self.corrupt_records += 1;
        self.note(format!("Page {} offset {}: {}", page, offset, reason));
    }

    /// Count a cell that was skipped.
    pub fn skipped_cell(&mut self, page: u32, offset: usize, reason: &str) {
        self.skipped_cells += 1;
        self.note(format!("Page {} cell at {}: {}", page, offset, reason));
    }

    /// Count a revisited page.
    pub fn cycle(&mut self, page: u32, chain: &str) {
        self.cycles += 1;
        self.note(format!("Cycle in {} at page {}", chain, page));
    }

    /// Count a recovered row.
    pub fn count_row(&mut self, origin: Origin) {
        match origin {
            Origin::Live => self.live_rows += 1,
            Origin::Freelist => self.freelist_rows += 1,
            Origin::Unallocated => self.unallocated_rows += 1,
        }
    }

    /// Total rows recovered across passes.
    pub fn total_rows(&self) -> u64 {
        self.live_rows + self.freelist_rows + self.unallocated_rows
    }

    /// Total of every corruption counter.
    pub fn corruption_count(&self) -> u64 {
        self.page_read_errors + self.corrupt_records + self.skipped_cells + self.cycles
    }

    fn note(&mut self, msg: String) {
        if self.diagnostics.len() < MAX_DIAGNOSTICS {
            self.diagnostics.push(msg);
        }
    }
}

/// Kind of every page up to the scan limit.
#[derive(Debug, Clone)]
pub struct PageMap {
    // index 0 unused; None marks an unreadable page
    kinds: Vec<Option<PageKind>>,
}

impl PageMap {
    /// Read and classify pages `1..=db.scan_limit()`.
    ///
    /// Unreadable pages are counted as page read errors and left
    /// unclassified. Pages the header claims beyond the end of the file are
    /// reported as a single page read error for the whole range.
    pub fn classify(
        db: &Database,
        freelist: &FreelistPages,
        ctx: &mut ScanContext,
        progress: &mut dyn FnMut(Pass, u64),
    ) -> Self {
        let limit = db.scan_limit();
        let mut kinds = vec![None; limit as usize + 1];

        for number in 1..=limit {
            progress(Pass::Classify, number as u64);
            let page = match db.page(number) {
                Ok(p) => p,
                Err(e) => {
                    ctx.page_error(&e);
                    continue;
                }
            };
            ctx.pages_visited += 1;

            let kind = if freelist.is_trunk(number) {
                PageKind::FreelistTrunk
            } else if freelist.is_leaf(number) {
                PageKind::FreelistLeaf
            } else {
                page.btree_header()
                    .map(|h| h.kind)
                    .unwrap_or(PageKind::Unrecognized)
            };
            kinds[number as usize] = Some(kind);
        }

        if let Some(missing) = db.missing_pages() {
            ctx.page_error(&RecoveryError::PageRead(format!(
                "Pages {}..={} claimed by the header are missing (file has {} pages)",
                missing.start(),
                missing.end(),
                db.page_count()
            )));
        }

        PageMap { kinds }
    }

    /// Kind of page `number`, or `None` if it was unreadable or out of range.
    pub fn kind(&self, number: u32) -> Option<PageKind> {
        self.kinds.get(number as usize).copied().flatten()
    }

    /// Mark a page as belonging to a live overflow chain.
    pub fn mark_overflow(&mut self, number: u32) {
        if let Some(slot) = self.kinds.get_mut(number as usize) {
            if slot.is_some() {
                *slot = Some(PageKind::Overflow);
            }
        }
    }

    /// Readable pages in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, PageKind)> + '_ {
        self.kinds
            .iter()
            .enumerate()
            .filter_map(|(n, k)| k.map(|kind| (n as u32, kind)))
    }

    /// Page counts per kind name.
    pub fn summary(&self) -> BTreeMap<&'static str, u64> {
        let mut counts = BTreeMap::new();
        for (_, kind) in self.iter() {
            *counts.entry(kind.name()).or_insert(0) += 1;
        }
        counts
    }
}

/// Which passes a run performs.
#[derive(Debug, Clone)]
pub struct RecoveryPlan {
    /// Walk only the table b-tree rooted here instead of discovering roots.
    pub root: Option<u32>,
    /// Run the live b-tree pass.
    pub live: bool,
    /// Run the freelist pass.
    pub freelist: bool,
    /// Run the unallocated-space pass.
    pub unallocated: bool,
    /// Emit `sqlite_master` rows from the live pass.
    pub schema: bool,
}

impl Default for RecoveryPlan {
    fn default() -> Self {
        RecoveryPlan {
            root: None,
            live: true,
            freelist: true,
            unallocated: true,
            schema: false,
        }
    }
}

/// The outcome of a recovery run.
#[derive(Debug)]
pub struct RecoveryRun {
    /// Rows in pass order (live, freelist, unallocated).
    pub rows: Vec<RecoveredRow>,
    /// Counters for the run.
    pub context: ScanContext,
    /// Classification of every readable page.
    pub pages: PageMap,
    /// The freelist chain as walked.
    pub freelist: FreelistPages,
}

impl RecoveryRun {
    /// Rows recovered from page `number`.
    pub fn rows_on_page(&self, number: u32) -> impl Iterator<Item = &RecoveredRow> {
        self.rows.iter().filter(move |r| r.page == number)
    }
}

/// Run every pass the plan enables.
pub fn recover(db: &Database, plan: &RecoveryPlan) -> RecoveryRun {
    recover_with_progress(db, plan, &mut |_, _| {})
}

/// Run every pass the plan enables, reporting `(pass, position)` as pages
/// are processed.
pub fn recover_with_progress(
    db: &Database,
    plan: &RecoveryPlan,
    progress: &mut dyn FnMut(Pass, u64),
) -> RecoveryRun {
    let mut ctx = ScanContext::new();

    // The chain is needed even when its rows are not, to keep freed pages
    // out of root discovery.
    let freelist = freelist::collect(db, &mut ctx);
    let mut pages = PageMap::classify(db, &freelist, &mut ctx, progress);
    let mut rows = Vec::new();

    if plan.live {
        rows.extend(btree::recover_live(
            db,
            &mut pages,
            plan.root,
            plan.schema,
            &mut ctx,
            progress,
        ));
    }
    if plan.freelist {
        rows.extend(freelist::recover_freelist(db, &freelist, &mut ctx, progress));
    }
    if plan.unallocated {
        rows.extend(unallocated::recover_unallocated(db, &pages, &mut ctx, progress));
    }

    RecoveryRun {
        rows,
        context: ctx,
        pages,
        freelist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::write::DatabaseBuilder;

    #[test]
    fn test_context_counters() {
        let mut ctx = ScanContext::new();
        ctx.page_error(&RecoveryError::PageRead("gone".into()));
        ctx.corrupt_record(2, 100, "overrun");
        ctx.skipped_cell(2, 4, "pointer");
        ctx.cycle(3, "b-tree");
        ctx.count_row(Origin::Live);
        ctx.count_row(Origin::Unallocated);
        assert_eq!(ctx.corruption_count(), 4);
        assert_eq!(ctx.total_rows(), 2);
        assert_eq!(ctx.diagnostics.len(), 4);
    }

    #[test]
    fn test_diagnostics_capped() {
        let mut ctx = ScanContext::new();
        for i in 0..(MAX_DIAGNOSTICS as u32 + 10) {
            ctx.cycle(i, "freelist");
        }
        assert_eq!(ctx.cycles, MAX_DIAGNOSTICS as u64 + 10);
        assert_eq!(ctx.diagnostics.len(), MAX_DIAGNOSTICS);
    }

    #[test]
    fn test_classify_pages() {
        let image = DatabaseBuilder::new(1024)
            .table_leaf(&[(1, vec![Value::Integer(5)])])
            .table_interior(&[(2, 1)], 2)
            .freelist_trunk(0, &[5])
            .table_leaf(&[(9, vec![Value::Integer(9)])])
            .empty_page()
            .freelist(4, 2)
            .build();
        let db = Database::from_bytes(image).unwrap();
        let run = recover(&db, &RecoveryPlan::default());

        assert_eq!(run.pages.kind(1), Some(PageKind::TableLeaf));
        assert_eq!(run.pages.kind(2), Some(PageKind::TableLeaf));
        assert_eq!(run.pages.kind(3), Some(PageKind::TableInterior));
        assert_eq!(run.pages.kind(4), Some(PageKind::FreelistTrunk));
        // a stale table header does not win over freelist membership
        assert_eq!(run.pages.kind(5), Some(PageKind::FreelistLeaf));
        assert_eq!(run.pages.kind(6), Some(PageKind::Unrecognized));
        assert_eq!(run.pages.kind(7), None);
        assert_eq!(run.context.pages_visited, 6);
        assert_eq!(run.pages.summary()["TABLE_LEAF"], 2);
    }

    #[test]
    fn test_passes_in_order() {
        let image = DatabaseBuilder::new(1024)
            .table_leaf(&[(1, vec![Value::Text("live".into())])])
            .freelist_trunk(0, &[4])
            .table_leaf(&[(1, vec![Value::Text("freed".into())])])
            .freelist(3, 2)
            .build();
        let db = Database::from_bytes(image).unwrap();
        let run = recover(&db, &RecoveryPlan::default());

        let origins: Vec<Origin> = run.rows.iter().map(|r| r.origin).collect();
        let live_end = origins.iter().rposition(|o| *o == Origin::Live).unwrap();
        let freelist_start = origins.iter().position(|o| *o == Origin::Freelist).unwrap();
        assert!(live_end < freelist_start);
        assert_eq!(run.rows[freelist_start].values, vec![Value::Text("freed".into())]);
        assert_eq!(run.context.live_rows, 1);
        assert_eq!(run.context.freelist_rows, 1);
        assert_eq!(run.rows_on_page(2).count(), 1);
    }

    #[test]
    fn test_plan_disables_passes() {
        let image = DatabaseBuilder::new(1024)
            .table_leaf(&[(1, vec![Value::Text("live".into())])])
            .freelist_trunk(0, &[4])
            .table_leaf(&[(1, vec![Value::Text("freed".into())])])
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
        assert_eq!(run.rows.len(), 1);
    }

    #[test]
    fn test_absurd_header_size_is_one_error() {
        use byteorder::{BigEndian, ByteOrder};
        use crate::sqlite::constants::HDR_DATABASE_SIZE;

        let mut image = DatabaseBuilder::new(1024)
            .table_leaf(&[(1, vec![Value::Integer(7)])])
            .build();
        BigEndian::write_u32(&mut image[HDR_DATABASE_SIZE..], 100_000_000);
        let db = Database::from_bytes(image).unwrap();
        let run = recover(&db, &RecoveryPlan::default());

        assert_eq!(run.context.page_read_errors, 1);
        assert_eq!(run.context.pages_visited, 2);
        assert_eq!(run.pages.kind(3), None);
        assert_eq!(run.context.live_rows, 1);
        assert!(run.context.diagnostics[0].contains("3..=100000000"));
    }
}
