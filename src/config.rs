//! Settings, taken from environment variables (a .env file is loaded by the binaries).
//!
//! Required:
//!   - `DATA_DIR` - where the reports (.pdf/.txt) are
//!   - `LOG_DIR` - where log files are kept
//!
//! Optional:
//!   - `CSV_DIR` - root of the per-report CSVs (default `$DATA_DIR/csvs`)
//!   - `LANE_TABLE` - lane name to link id table (default `$DATA_DIR/lane_to_linkid.csv`)
//!   - `MERGE_OUTPUT_DIR` - where the merged datasets go (default `$DATA_DIR`)
//!   - `REPORT_YEAR` - year of the dates in report filenames (default 2024)
//!   - `TOTAL_COLUMN` - column of the hourly total in report tables (default 7)
//!   - `SPLIT_STRATEGY` - `marker` or `midpoint` (default `marker`)
//!   - `MISSING_SECTIONS` - section letters absent from multi-section reports, as
//!     comma-separated `month/day:section:letter` (default `1/9:1:B`)
use std::env;
use std::path::PathBuf;

use crate::{
    extract_from_file::{ColumnLayout, ExtractOptions, MissingSection, SplitStrategy},
    merge::{default_targets, MergeTarget},
    ReportKind, ReportError,
};

const DEFAULT_MISSING_SECTIONS: &str = "1/9:1:B";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub csv_dir: PathBuf,
    pub lane_table: PathBuf,
    pub extract: ExtractOptions,
    pub merge_targets: Vec<MergeTarget>,
}

impl Config {
    pub fn from_env() -> Result<Self, ReportError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ReportError> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| ReportError::Config(format!("{key} is not set")))
        };
        let data_dir = PathBuf::from(required("DATA_DIR")?);
        let log_dir = PathBuf::from(required("LOG_DIR")?);

        let csv_dir = lookup("CSV_DIR").map_or_else(|| data_dir.join("csvs"), PathBuf::from);
        let lane_table = lookup("LANE_TABLE")
            .map_or_else(|| data_dir.join("lane_to_linkid.csv"), PathBuf::from);
        let merge_output_dir =
            lookup("MERGE_OUTPUT_DIR").map_or_else(|| data_dir.clone(), PathBuf::from);

        let year = match lookup("REPORT_YEAR") {
            Some(v) => v
                .parse()
                .map_err(|_| ReportError::Config(format!("REPORT_YEAR `{v}` is not a year")))?,
            None => 2024,
        };
        let total_column = match lookup("TOTAL_COLUMN") {
            Some(v) => v.parse().map_err(|_| {
                ReportError::Config(format!("TOTAL_COLUMN `{v}` is not a column index"))
            })?,
            None => ColumnLayout::default().total_column,
        };
        let split = match lookup("SPLIT_STRATEGY") {
            Some(v) => v.parse().map_err(|_| {
                ReportError::Config(format!(
                    "SPLIT_STRATEGY `{v}` should be `marker` or `midpoint`"
                ))
            })?,
            None => SplitStrategy::default(),
        };
        let missing_sections = parse_missing_sections(
            &lookup("MISSING_SECTIONS").unwrap_or_else(|| DEFAULT_MISSING_SECTIONS.to_string()),
        )?;

        Ok(Self {
            data_dir,
            log_dir,
            csv_dir,
            lane_table,
            extract: ExtractOptions {
                year,
                layout: ColumnLayout {
                    total_column,
                    split,
                },
                missing_sections,
            },
            merge_targets: default_targets(&merge_output_dir)?,
        })
    }

    /// The directories canonical CSVs are written to, one per kind of report.
    pub fn csv_dirs(&self) -> Vec<PathBuf> {
        [
            ReportKind::MultiSection,
            ReportKind::DualDirection,
            ReportKind::SingleDirection,
        ]
        .iter()
        .map(|kind| self.csv_dir.join(kind.dir_name()))
        .collect()
    }
}

/// Parse `month/day:section:letter[,...]`.
pub fn parse_missing_sections(value: &str) -> Result<Vec<MissingSection>, ReportError> {
    let invalid = |entry: &str| {
        ReportError::Config(format!(
            "MISSING_SECTIONS entry `{entry}` should look like `1/9:1:B`"
        ))
    };

    let mut sections = vec![];
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() != 3 {
            return Err(invalid(entry));
        }
        let (month, day) = parts[0].split_once('/').ok_or_else(|| invalid(entry))?;
        let mut chars = parts[2].chars();
        let (Some(letter), None) = (chars.next(), chars.next()) else {
            return Err(invalid(entry));
        };
        sections.push(MissingSection {
            month: month.parse().map_err(|_| invalid(entry))?,
            day: day.parse().map_err(|_| invalid(entry))?,
            section_num: parts[1].parse().map_err(|_| invalid(entry))?,
            letter,
        });
    }
    Ok(sections)
}
