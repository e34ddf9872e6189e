use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(name = "sqlrec")]
#[command(about = "Recover live, deleted and fragmentary rows from SQLite database files")]
#[command(version)]
pub struct Cli {
    /// Path to the SQLite database to recover from (work on a copy)
    #[arg(short, long)]
    pub input: String,

    /// Path of the SQLite or CSV file to write recovered rows to
    #[arg(short, long)]
    pub output: String,

    /// Output format
    #[arg(short, long, default_value = "sqlite")]
    pub format: OutputFormat,

    /// Extract images embedded in BLOB values
    #[arg(short, long = "extract-images")]
    pub extract_images: bool,

    /// Directory extracted images are written to
    #[arg(short = 'd', long = "image-dir", default_value = "images")]
    pub image_dir: String,

    /// Walk only the table b-tree rooted at this page
    #[arg(long)]
    pub root: Option<u32>,

    /// Skip recovery from freelist pages
    #[arg(long = "no-freelist")]
    pub no_freelist: bool,

    /// Skip carving of unallocated page space
    #[arg(long = "no-unallocated")]
    pub no_unallocated: bool,

    /// Include sqlite_master rows from page 1 in the output
    #[arg(long)]
    pub schema: bool,

    /// Override page size (default: read from the database header)
    #[arg(long = "page-size")]
    pub page_size: Option<u32>,

    /// Use memory-mapped I/O for the input file
    #[arg(long)]
    pub mmap: bool,

    /// Show per-page classification and diagnostics
    #[arg(short, long)]
    pub verbose: bool,

    /// Write the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the run report to a file instead of stdout
    #[arg(long)]
    pub report: Option<String>,

    /// Control colored output
    #[arg(long, default_value = "auto")]
    pub color: ColorMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Sqlite,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}
