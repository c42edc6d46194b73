//! Extract hourly vehicle counts from text conversions of traffic survey reports, normalize
//! them into canonical records, and merge those into daily traffic datasets.
//!
//! The pipeline, in order:
//!   - [`lane_registry`] - lane name to link id lookup
//!   - [`extract_from_file`] - parse the hourly totals out of a report
//!   - [`normalize`] - turn hourly totals into [`CanonicalRecord`]s
//!   - [`emit`] - write one canonical CSV per parsed report
//!   - [`merge`] - fold all canonical CSVs into the daily datasets
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod emit;
pub mod extract_from_file;
pub mod lane_registry;
pub mod merge;
pub mod normalize;

/// The first hour of the daily counting window (07:00).
pub const FIRST_HOUR: u32 = 7;

/// Number of one-hour buckets in a report block (07:00 through 19:00).
pub const HOURS_PER_BLOCK: usize = 13;

/// Link id used when a lane isn't in the lane registry.
pub const UNKNOWN_LINK_ID: &str = "Unknown";

/// Format of the start and end timestamps of a [`CanonicalRecord`].
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";

/// Header of the CSV written for each report.
pub const CANONICAL_HEADER: [&str; 5] = [
    "集計開始時刻",
    "集計終了時刻",
    "リンクID",
    "交通量",
    "レーン名",
];

/// Header of the merged daily datasets.
pub const MERGED_HEADER: [&str; 5] = ["start", "end", "linkid", "volume", "lanename"];

static REPORT_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{1,2})月([0-9]{1,2})日_([0-9]+)(?:_([A-Z])(?:_(in|out))?)?\.txt$")
        .expect("report filename regex is valid")
});

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("problem with file or directory path {0:?}")]
    BadPath(PathBuf),
    #[error("unable to read or write file: {0}")]
    Io(#[from] io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("the filename at {path:?} is not a report name: {problem:?}")]
    InvalidFileName {
        problem: FileNameProblem,
        path: PathBuf,
    },
    #[error("data start (a line beginning with 7時台) not found in {0:?}")]
    MissingDataAnchor(PathBuf),
    #[error("only {found} of 13 hourly rows found in {path:?}")]
    ShortBlock { path: PathBuf, found: usize },
    #[error("hour {hour} of {lane} has {found} columns, total expected at column {column}")]
    InsufficientColumns {
        lane: String,
        hour: usize,
        found: usize,
        column: usize,
    },
    #[error("row {row:?} in {path:?} rejected: {reason}")]
    RowRejected {
        path: PathBuf,
        row: Vec<String>,
        reason: RejectReason,
    },
    #[error("`{program}` failed on {path:?} ({status}): {stderr}")]
    SubprocessFailure {
        program: String,
        path: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("lane table {0:?} has no `lanename`/`linkid` columns")]
    BadLaneTable(PathBuf),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Identifying the problem when there's an error with a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileNameProblem {
    NotUtf8,
    PatternMismatch,
    InvalidDate,
}

/// Why a row was kept out of the merged datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ColumnCount(usize),
    DateNotTargeted,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ColumnCount(n) => write!(f, "{n} columns instead of 5"),
            RejectReason::DateNotTargeted => write!(f, "start is not on a target date"),
        }
    }
}

/// Direction of traffic on a lane, relative to the counting location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = ();
    fn from_str(input: &str) -> Result<Direction, Self::Err> {
        match input {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The layout of a report, as determined by its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// All sections of one section number in a single text, e.g. 1月16日_1.txt
    MultiSection,
    /// In and out side by side for one section, e.g. 1月9日_7_A.txt
    DualDirection,
    /// One direction of one section, e.g. 1月9日_10_A_in.txt
    SingleDirection,
}

impl ReportKind {
    /// Name of the subdirectory canonical CSVs of this kind are written to.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ReportKind::MultiSection => "multi_section",
            ReportKind::DualDirection => "dual_direction",
            ReportKind::SingleDirection => "single_direction",
        }
    }
}

/// What a report's filename tells us about it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportMetadata {
    pub date: NaiveDate,
    pub section_num: u32,
    pub section_letter: Option<char>,
    pub direction: Option<Direction>,
}

impl ReportMetadata {
    /// Get a report's metadata from its path.
    ///
    /// `<month>月<day>日_<section number>[_<section letter>[_<in|out>]].txt`,
    /// e.g. 1月9日_10_A_in.txt. Filenames carry no year, so it's supplied.
    pub fn from_path(path: &Path, year: i32) -> Result<Self, ReportError> {
        let filename = path
            .file_name()
            .ok_or_else(|| ReportError::BadPath(path.to_owned()))?
            .to_str()
            .ok_or_else(|| ReportError::InvalidFileName {
                problem: FileNameProblem::NotUtf8,
                path: path.to_owned(),
            })?;

        let caps = REPORT_FILENAME
            .captures(filename)
            .ok_or_else(|| ReportError::InvalidFileName {
                problem: FileNameProblem::PatternMismatch,
                path: path.to_owned(),
            })?;

        let invalid_date = || ReportError::InvalidFileName {
            problem: FileNameProblem::InvalidDate,
            path: path.to_owned(),
        };
        let month: u32 = caps[1].parse().map_err(|_| invalid_date())?;
        let day: u32 = caps[2].parse().map_err(|_| invalid_date())?;
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid_date)?;

        let section_num = caps[3]
            .parse()
            .map_err(|_| ReportError::InvalidFileName {
                problem: FileNameProblem::PatternMismatch,
                path: path.to_owned(),
            })?;
        let section_letter = caps.get(4).and_then(|m| m.as_str().chars().next());
        let direction = caps.get(5).and_then(|m| m.as_str().parse().ok());

        Ok(Self {
            date,
            section_num,
            section_letter,
            direction,
        })
    }

    pub fn kind(&self) -> ReportKind {
        match (self.section_letter, self.direction) {
            (None, _) => ReportKind::MultiSection,
            (Some(_), None) => ReportKind::DualDirection,
            (Some(_), Some(_)) => ReportKind::SingleDirection,
        }
    }
}

/// Name of a lane, e.g. Link10_A_in.
pub fn lane_name(section_num: u32, section_letter: char, direction: Direction) -> String {
    format!("Link{section_num}_{section_letter}_{direction}")
}

/// One hour's total from a report block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourlyCount {
    /// 0 is 07:00-08:00, 12 is 19:00-20:00.
    pub hour_index: usize,
    /// Thousands separators removed; empty if the report had no value.
    pub raw_value: String,
}

/// The 13 hourly counts of one lane on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneCounts {
    pub lane: String,
    pub date: NaiveDate,
    pub counts: Vec<HourlyCount>,
    /// Hours whose in/out split was a guess at the middle of the line rather than at an hour
    /// marker. Values for these hours may be misaligned.
    pub approximate_rows: Vec<usize>,
}

impl LaneCounts {
    pub fn is_approximate(&self) -> bool {
        !self.approximate_rows.is_empty()
    }
}

/// The normalized unit written to every CSV: a lane's volume over one hour.
///
/// Fields are kept as the strings they're written as, so that rows read back during the merge
/// pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub start: String,
    pub end: String,
    pub link_id: String,
    pub volume: String,
    pub lane_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_parse_from_path_single_direction() {
        let path = Path::new("some/path/1月9日_10_A_in.txt");
        let metadata = ReportMetadata::from_path(path, 2024).unwrap();
        assert_eq!(
            metadata,
            ReportMetadata {
                date: NaiveDate::from_ymd_opt(2024, 1, 9).unwrap(),
                section_num: 10,
                section_letter: Some('A'),
                direction: Some(Direction::In),
            }
        );
        assert_eq!(metadata.kind(), ReportKind::SingleDirection);
    }

    #[test]
    fn metadata_parse_from_path_dual_direction() {
        let path = Path::new("1月16日_7_C.txt");
        let metadata = ReportMetadata::from_path(path, 2024).unwrap();
        assert_eq!(metadata.date, NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        assert_eq!(metadata.section_num, 7);
        assert_eq!(metadata.section_letter, Some('C'));
        assert_eq!(metadata.direction, None);
        assert_eq!(metadata.kind(), ReportKind::DualDirection);
    }

    #[test]
    fn metadata_parse_from_path_multi_section() {
        let path = Path::new("1月9日_1.txt");
        let metadata = ReportMetadata::from_path(path, 2024).unwrap();
        assert_eq!(metadata.section_num, 1);
        assert_eq!(metadata.kind(), ReportKind::MultiSection);
    }

    #[test]
    fn metadata_parse_from_path_two_digit_month() {
        let path = Path::new("12月24日_3_B_out.txt");
        let metadata = ReportMetadata::from_path(path, 2023).unwrap();
        assert_eq!(metadata.date, NaiveDate::from_ymd_opt(2023, 12, 24).unwrap());
        assert_eq!(metadata.direction, Some(Direction::Out));
    }

    #[test]
    fn metadata_parse_from_path_errs_if_pattern_mismatch() {
        for name in [
            "1月9日_10_A_up.txt",
            "1月9日_10_a_in.txt",
            "1月9日.txt",
            "1月9日_10_A_in.csv",
            "notes.txt",
        ] {
            assert!(
                matches!(
                    ReportMetadata::from_path(Path::new(name), 2024),
                    Err(ReportError::InvalidFileName {
                        problem: FileNameProblem::PatternMismatch,
                        ..
                    })
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn metadata_parse_from_path_errs_if_date_impossible() {
        let path = Path::new("2月30日_10_A_in.txt");
        assert!(matches!(
            ReportMetadata::from_path(path, 2024),
            Err(ReportError::InvalidFileName {
                problem: FileNameProblem::InvalidDate,
                ..
            })
        ))
    }

    #[test]
    fn lane_name_is_correct() {
        assert_eq!(lane_name(10, 'A', Direction::In), "Link10_A_in");
        assert_eq!(lane_name(1, 'B', Direction::Out), "Link1_B_out");
    }
}
