//! Convert traffic survey reports to canonical CSVs and merge those into daily datasets.
//!
//! Run with `cargo run -- [convert|merge|all]` (default `all`):
//!   - `convert` - parse every report (.txt) in `DATA_DIR` and write a canonical CSV per lane,
//!     or per section, into `CSV_DIR`
//!   - `merge` - merge the canonical CSVs into the daily datasets
//!   - `all` - both, in that order
//!
//! Reports are text conversions of the survey PDFs; see the `convert_pdfs` binary.
//!
//! Settings come from environment variables or a .env file; see [`traffic_reports::config`].
//! A [log][`LOG`] is kept in `LOG_DIR`. Problems with a single report or row are logged and that
//! report or row skipped; only misconfiguration stops the run.
use std::env;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use traffic_reports::{
    config::Config,
    emit::{convert_report, reset_dir},
    lane_registry::LaneRegistry,
    merge::{merge, write_datasets},
};

const LOG: &str = "traffic_reports.log";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Convert,
    Merge,
    All,
}

fn main() {
    // Load file containing environment variables, panic if it doesn't exist.
    dotenvy::dotenv().expect("Unable to load .env file.");

    let config = match Config::from_env() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };

    // Set up logging, panic if it fails.
    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Debug,
            log_config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(
            LevelFilter::Info,
            log_config,
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(config.log_dir.join(LOG))
                .expect("Could not open log file."),
        ),
    ])
    .expect("Could not configure logging.");

    let step = match env::args().nth(1).as_deref() {
        None | Some("all") => Step::All,
        Some("convert") => Step::Convert,
        Some("merge") => Step::Merge,
        Some(other) => {
            error!("Unknown step `{other}`; expected `convert`, `merge`, or `all`.");
            return;
        }
    };

    // Both steps need the lane registry; don't do any work without it.
    let registry = match LaneRegistry::load(&config.lane_table) {
        Ok(v) => v,
        Err(e) => {
            error!("Unable to load lane table {:?}: {e}", config.lane_table);
            return;
        }
    };

    if matches!(step, Step::Convert | Step::All) {
        convert_all(&config, &registry);
    }

    if matches!(step, Step::Merge | Step::All) {
        let datasets = match merge(&config.csv_dirs(), &config.merge_targets, &registry) {
            Ok(v) => v,
            Err(e) => {
                error!("Merge failed: {e}");
                return;
            }
        };
        if let Err(e) = write_datasets(&datasets) {
            error!("Unable to write merged datasets: {e}");
        }
    }
}

/// Convert every report in the data directory, logging (and skipping) any that fail.
fn convert_all(config: &Config, registry: &LaneRegistry) {
    for dir in config.csv_dirs() {
        if let Err(e) = reset_dir(&dir) {
            error!("Unable to prepare output directory {dir:?}: {e}");
            return;
        }
    }

    let mut paths = match collect_reports(&config.data_dir) {
        Ok(v) => v,
        Err(e) => {
            error!("Unable to read {:?}: {e}", config.data_dir);
            return;
        }
    };
    paths.sort();

    let mut written = 0;
    for path in paths {
        info!("Processing {path:?}.");
        match convert_report(&path, &config.extract, registry, &config.csv_dir) {
            Ok(v) => written += v.len(),
            Err(e) => error!("{path:?} not processed: {e}"),
        }
    }
    info!("Wrote {written} canonical CSVs.");
}

// Reports are the .txt files directly in the data directory.
fn collect_reports(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|x| x == "txt") {
            paths.push(path);
        }
    }
    Ok(paths)
}
