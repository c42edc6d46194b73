//! Convert every survey report PDF under `DATA_DIR` to text, with `pdftotext -layout`.
//!
//! The text file is written next to its PDF, with the same name and a .txt extension. These
//! are the reports the main program parses. Failures are logged and the next PDF tried.
//!
//! NOTE: this can be run with `cargo run --bin convert_pdfs`
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{error, info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use traffic_reports::{config::Config, ReportError};

const LOG: &str = "convert_pdfs.log";
const PDFTOTEXT: &str = "pdftotext";

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

    let mut paths = vec![];
    let paths = match collect_pdfs(config.data_dir.clone(), &mut paths) {
        Ok(v) => v,
        Err(e) => {
            error!("{e}");
            return;
        }
    };
    paths.sort();

    for pdf in paths.iter() {
        match convert(pdf) {
            Ok(txt) => info!("Converted {pdf:?} to {txt:?}."),
            Err(e) => error!("{e}"),
        }
    }
}

fn collect_pdfs(dir: PathBuf, paths: &mut Vec<PathBuf>) -> io::Result<&mut Vec<PathBuf>> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            collect_pdfs(path, paths)?;
        } else if path.extension().is_some_and(|x| x == "pdf") {
            paths.push(path)
        }
    }
    Ok(paths)
}

fn convert(pdf: &Path) -> Result<PathBuf, ReportError> {
    let txt = pdf.with_extension("txt");
    let output = Command::new(PDFTOTEXT)
        .arg("-layout")
        .arg(pdf)
        .arg(&txt)
        .output()?;

    if output.status.success() {
        Ok(txt)
    } else {
        Err(ReportError::SubprocessFailure {
            program: PDFTOTEXT.to_string(),
            path: pdf.to_owned(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
