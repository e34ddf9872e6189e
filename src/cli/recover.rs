use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use colored::Colorize;
use serde::Serialize;

use crate::cli::{create_progress_bar, open_database, wprint, wprintln};
use crate::output::csv::write_csv_file;
use crate::output::sqlite::{write_sqlite, BlobStorage};
use crate::recovery::images::ImageCarver;
use crate::recovery::normalize::{column_names, normalize_rows};
use crate::recovery::{recover_with_progress, Pass, RecoveryPlan, RecoveryRun};
use crate::sqlite::database::Database;
use crate::sqlite::page::PageKind;
use crate::util::hex::{format_bytes_preview, format_offset};
use crate::RecoveryError;

/// Output artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Sqlite,
    Csv,
}

/// Options for a `sqlrec` run.
pub struct RecoverOptions {
    /// Path to the SQLite database to recover from.
    pub input: String,
    /// Path of the artifact to write.
    pub output: String,
    /// Artifact format.
    pub format: Format,
    /// Extract images embedded in BLOB values.
    pub extract_images: bool,
    /// Directory extracted images go to.
    pub image_dir: String,
    /// Walk only the table b-tree rooted at this page.
    pub root: Option<u32>,
    /// Run the freelist pass.
    pub freelist: bool,
    /// Run the unallocated-space pass.
    pub unallocated: bool,
    /// Include `sqlite_master` rows in the live pass.
    pub schema: bool,
    /// Override the page size stored in the header.
    pub page_size: Option<u32>,
    /// Use memory-mapped I/O for the input file.
    pub mmap: bool,
    /// Show per-page details.
    pub verbose: bool,
    /// Emit the report as JSON.
    pub json: bool,
}

/// Top-level JSON output for the run report.
#[derive(Serialize)]
struct RecoverReport {
    input: String,
    output: String,
    format: Format,
    file_size: u64,
    page_size: u32,
    usable_size: usize,
    page_count: u32,
    text_encoding: &'static str,
    columns: usize,
    rows: RowCounts,
    corruption: CorruptionCounts,
    page_types: BTreeMap<&'static str, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<ImageReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pages: Vec<PageInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    diagnostics: Vec<String>,
}

#[derive(Serialize)]
struct RowCounts {
    total: u64,
    live: u64,
    freelist: u64,
    unallocated: u64,
}

#[derive(Serialize)]
struct CorruptionCounts {
    total: u64,
    pages_visited: u64,
    page_read_errors: u64,
    corrupt_records: u64,
    skipped_cells: u64,
    cycles: u64,
}

#[derive(Serialize)]
struct ImageReport {
    directory: String,
    extracted: Vec<String>,
    failures: usize,
}

/// Per-page info for verbose output.
#[derive(Serialize)]
struct PageInfo {
    page_number: u32,
    page_type: PageKind,
    offset: u64,
    rows: u64,
}

/// Run a recovery and write the report to `writer`.
///
/// Opens the input, runs the enabled passes, pads rows to a common width,
/// optionally extracts images, and writes the artifact. Returns the number
/// of rows written. When no row with at least one column was recovered,
/// "No records recovered." is reported, no artifact is written, and `Ok(0)`
/// is returned; the binary turns that into a nonzero exit status.
pub fn execute(opts: &RecoverOptions, writer: &mut dyn Write) -> Result<u64, RecoveryError> {
    if opts.root == Some(0) {
        return Err(RecoveryError::Argument(
            "--root must be a page number of 1 or more".to_string(),
        ));
    }

    let db = open_database(&opts.input, opts.page_size, opts.mmap)?;
    let plan = RecoveryPlan {
        root: opts.root,
        live: true,
        freelist: opts.freelist,
        unallocated: opts.unallocated,
        schema: opts.schema,
    };

    let mut run = run_passes(&db, &plan, !opts.json);

    // rows without a single column have nothing to write
    let width = normalize_rows(&mut run.rows);
    if width == 0 {
        if opts.json {
            output_json(opts, &db, &run, 0, None, writer)?;
        } else {
            output_text(opts, &db, &run, 0, None, writer)?;
        }
        wprintln!(writer, "No records recovered.")?;
        return Ok(0);
    }

    let columns = column_names(width);

    let carver = if opts.extract_images {
        let mut carver = ImageCarver::create(&opts.image_dir)?;
        for row in run.rows.iter_mut() {
            carver.carve_row(&mut row.values);
        }
        for failure in &carver.failures {
            eprintln!("Warning: {}", failure);
        }
        Some(carver)
    } else {
        None
    };

    let output = Path::new(&opts.output);
    match opts.format {
        Format::Csv => write_csv_file(output, &columns, &run.rows)?,
        Format::Sqlite => {
            let blobs = if opts.extract_images {
                BlobStorage::Hex
            } else {
                BlobStorage::Blob
            };
            write_sqlite(output, &columns, &run.rows, blobs)?
        }
    }

    if opts.json {
        output_json(opts, &db, &run, width, carver.as_ref(), writer)?;
    } else {
        output_text(opts, &db, &run, width, carver.as_ref(), writer)?;
    }

    Ok(run.rows.len() as u64)
}

/// Run the passes, driving one progress bar per pass when enabled.
fn run_passes(db: &Database, plan: &RecoveryPlan, show_progress: bool) -> RecoveryRun {
    if !show_progress {
        return recover_with_progress(db, plan, &mut |_, _| {});
    }

    let pb = create_progress_bar(db.scan_limit() as u64, "pages");
    let mut current: Option<Pass> = None;
    let run = recover_with_progress(db, plan, &mut |pass, position| {
        if current != Some(pass) {
            current = Some(pass);
            pb.reset();
            pb.set_message(pass.name());
        }
        pb.set_position(position);
    });
    pb.finish_and_clear();
    run
}

fn rows_per_page(run: &RecoveryRun) -> BTreeMap<u32, u64> {
    let mut counts = BTreeMap::new();
    for row in &run.rows {
        *counts.entry(row.page).or_insert(0) += 1;
    }
    counts
}

fn output_text(
    opts: &RecoverOptions,
    db: &Database,
    run: &RecoveryRun,
    width: usize,
    carver: Option<&ImageCarver>,
    writer: &mut dyn Write,
) -> Result<(), RecoveryError> {
    let ctx = &run.context;

    wprintln!(writer, "Recovery: {}", opts.input)?;
    wprintln!(
        writer,
        "File size: {} bytes ({} pages x {} bytes, {} usable)",
        db.file_size(),
        db.page_count(),
        db.page_size(),
        db.usable_size()
    )?;
    wprintln!(writer, "Text encoding: {}", db.text_encoding().name())?;
    wprintln!(writer)?;

    if opts.verbose {
        let counts = rows_per_page(run);
        for (number, kind) in run.pages.iter() {
            let offset = (number as u64 - 1) * db.page_size() as u64;
            let mut line = format!(
                "Page {:>5}: {:<16} offset={}",
                number,
                kind.name(),
                format_offset(offset)
            );
            if let Some(n) = counts.get(&number) {
                line.push_str(&format!("  rows={}", n));
            }
            if kind == PageKind::Unrecognized {
                if let Ok(data) = db.page_data(number) {
                    line.push_str(&format!("  data={}", format_bytes_preview(data, 16)));
                }
            }
            wprintln!(writer, "{}", line)?;
        }
        wprintln!(writer)?;
    }

    wprintln!(writer, "Page Type Summary:")?;
    for (name, count) in run.pages.summary() {
        wprintln!(writer, "  {:<16} {:>6}", name, count)?;
    }
    wprintln!(writer)?;

    wprintln!(writer, "Recovered Rows:")?;
    wprintln!(writer, "  Live:        {:>6}", ctx.live_rows)?;
    wprintln!(writer, "  Freelist:    {:>6}", ctx.freelist_rows)?;
    wprintln!(writer, "  Unallocated: {:>6}", ctx.unallocated_rows)?;
    wprintln!(writer, "  Total:       {:>6}", ctx.total_rows())?;
    wprintln!(writer)?;

    wprintln!(writer, "Corruption:")?;
    wprintln!(writer, "  Pages visited:    {:>6}", ctx.pages_visited)?;
    write_count(writer, "Page read errors:", ctx.page_read_errors)?;
    write_count(writer, "Corrupt records: ", ctx.corrupt_records)?;
    write_count(writer, "Skipped cells:   ", ctx.skipped_cells)?;
    write_count(writer, "Cycles:          ", ctx.cycles)?;

    if opts.verbose && !ctx.diagnostics.is_empty() {
        wprintln!(writer)?;
        wprintln!(writer, "Diagnostics:")?;
        for d in &ctx.diagnostics {
            wprintln!(writer, "  {}", d)?;
        }
    }

    if let Some(carver) = carver {
        wprintln!(writer)?;
        wprint!(
            writer,
            "Images: {} extracted to {}",
            carver.extracted.len(),
            carver.dir().display()
        )?;
        if !carver.failures.is_empty() {
            wprint!(
                writer,
                " ({} failed)",
                format!("{}", carver.failures.len()).red()
            )?;
        }
        wprintln!(writer)?;
    }

    if width > 0 {
        wprintln!(writer)?;
        wprintln!(
            writer,
            "Wrote {} rows x {} columns to {}",
            run.rows.len(),
            width,
            opts.output
        )?;
    }
    Ok(())
}

fn write_count(writer: &mut dyn Write, label: &str, count: u64) -> Result<(), RecoveryError> {
    if count > 0 {
        wprintln!(writer, "  {} {:>6}", label, format!("{}", count).red())
    } else {
        wprintln!(writer, "  {} {:>6}", label, count)
    }
}

fn output_json(
    opts: &RecoverOptions,
    db: &Database,
    run: &RecoveryRun,
    width: usize,
    carver: Option<&ImageCarver>,
    writer: &mut dyn Write,
) -> Result<(), RecoveryError> {
    let ctx = &run.context;

    let pages: Vec<PageInfo> = if opts.verbose {
        let counts = rows_per_page(run);
        run.pages
            .iter()
            .map(|(number, kind)| PageInfo {
                page_number: number,
                page_type: kind,
                offset: (number as u64 - 1) * db.page_size() as u64,
                rows: counts.get(&number).copied().unwrap_or(0),
            })
            .collect()
    } else {
        Vec::new()
    };

    let report = RecoverReport {
        input: opts.input.clone(),
        output: opts.output.clone(),
        format: opts.format,
        file_size: db.file_size(),
        page_size: db.page_size(),
        usable_size: db.usable_size(),
        page_count: db.page_count(),
        text_encoding: db.text_encoding().name(),
        columns: width,
        rows: RowCounts {
            total: ctx.total_rows(),
            live: ctx.live_rows,
            freelist: ctx.freelist_rows,
            unallocated: ctx.unallocated_rows,
        },
        corruption: CorruptionCounts {
            total: ctx.corruption_count(),
            pages_visited: ctx.pages_visited,
            page_read_errors: ctx.page_read_errors,
            corrupt_records: ctx.corrupt_records,
            skipped_cells: ctx.skipped_cells,
            cycles: ctx.cycles,
        },
        page_types: run.pages.summary(),
        images: carver.map(|c| ImageReport {
            directory: c.dir().display().to_string(),
            extracted: c.extracted.clone(),
            failures: c.failures.len(),
        }),
        pages,
        diagnostics: if opts.verbose {
            ctx.diagnostics.clone()
        } else {
            Vec::new()
        },
    };

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| RecoveryError::Io(format!("JSON serialization error: {}", e)))?;
    wprintln!(writer, "{}", json)?;
    Ok(())
}
