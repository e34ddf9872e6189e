#[cfg(not(feature = "cli"))]
compile_error!("The `sqlrec` binary requires the `cli` feature. Build with `--features cli`.");

use clap::Parser;
use std::fs::File;
use std::io::Write;
use std::process;

use sqlrec::cli;
use sqlrec::cli::app::{Cli, ColorMode, OutputFormat};
use sqlrec::cli::recover::{Format, RecoverOptions};
use sqlrec::RecoveryError;

fn main() {
    let cli = Cli::parse();

    match cli.color {
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Auto => {} // colored auto-detects tty
    }

    let writer_result: Result<Box<dyn Write>, RecoveryError> = match &cli.report {
        Some(path) => File::create(path)
            .map(|f| Box::new(f) as Box<dyn Write>)
            .map_err(|e| RecoveryError::Io(format!("Cannot create {}: {}", path, e))),
        None => Ok(Box::new(std::io::stdout()) as Box<dyn Write>),
    };

    let mut writer = match writer_result {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let opts = RecoverOptions {
        input: cli.input,
        output: cli.output,
        format: match cli.format {
            OutputFormat::Sqlite => Format::Sqlite,
            OutputFormat::Csv => Format::Csv,
        },
        extract_images: cli.extract_images,
        image_dir: cli.image_dir,
        root: cli.root,
        freelist: !cli.no_freelist,
        unallocated: !cli.no_unallocated,
        schema: cli.schema,
        page_size: cli.page_size,
        mmap: cli.mmap,
        verbose: cli.verbose,
        json: cli.json,
    };

    let result = cli::recover::execute(&opts, &mut writer);
    let _ = writer.flush();

    match result {
        Ok(0) => process::exit(1),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
