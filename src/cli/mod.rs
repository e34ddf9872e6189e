//! CLI implementation for the `sqlrec` binary.
//!
//! Argument parsing uses clap derive macros. The [`app::Cli`] struct is
//! defined in [`app`] and shared between `main.rs` and `build.rs` (for man
//! page and shell completion generation) via `include!()`.
//!
//! `main.rs` maps the parsed [`app::Cli`] into a [`recover::RecoverOptions`]
//! and calls `recover::execute(opts, writer)`. The `writer: &mut dyn Write`
//! parameter receives the run report, so it can be captured in tests or
//! redirected to a file with `--report`.
//!
//! # Common patterns
//!
//! - **`--json`**: the run report is a `#[derive(Serialize)]` struct rendered
//!   with `serde_json`.
//! - **`--page-size`**: override the page size stored in the header, for
//!   databases whose header is damaged.
//! - **`--verbose` / `-v`**: add the per-page classification table and the
//!   first diagnostics collected during the walks.
//! - **`--color`**: control colored terminal output (`auto`, `always`,
//!   `never`).
//!
//! A progress bar (via [`indicatif`]) is shown on stderr for each recovery
//! pass unless `--json` is set. The `wprintln!` and `wprint!` macros wrap
//! `writeln!`/`write!` to convert `io::Error` into `RecoveryError`.

pub mod app;
pub mod recover;

/// Write a line to the given writer, converting io::Error to RecoveryError.
macro_rules! wprintln {
    ($w:expr) => {
        writeln!($w).map_err(|e| $crate::RecoveryError::Io(e.to_string()))
    };
    ($w:expr, $($arg:tt)*) => {
        writeln!($w, $($arg)*).map_err(|e| $crate::RecoveryError::Io(e.to_string()))
    };
}

/// Write (without newline) to the given writer, converting io::Error to RecoveryError.
macro_rules! wprint {
    ($w:expr, $($arg:tt)*) => {
        write!($w, $($arg)*).map_err(|e| $crate::RecoveryError::Io(e.to_string()))
    };
}

pub(crate) use wprint;
pub(crate) use wprintln;

use crate::sqlite::database::Database;
use crate::RecoveryError;
use indicatif::{ProgressBar, ProgressStyle};

/// Open a database file, selecting mmap or buffered I/O based on the flag.
///
/// When `page_size` is `Some`, the page size in the header is ignored.
pub(crate) fn open_database(
    path: &str,
    page_size: Option<u32>,
    use_mmap: bool,
) -> Result<Database, RecoveryError> {
    match (use_mmap, page_size) {
        (true, ps) => Database::open_mmap(path, ps),
        (false, Some(ps)) => Database::open_with_page_size(path, ps),
        (false, None) => Database::open(path),
    }
}

/// Create a styled progress bar for iterating over pages.
pub(crate) fn create_progress_bar(count: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(count);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} {{msg:<12}} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{eta}})",
            unit
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}
