//! Extract hourly totals from the text of traffic survey reports.
//!
//! Reports come out of `pdftotext -layout`, so their tables are whitespace-aligned text. Three
//! layouts are handled, distinguished by filename (see [`ReportKind`]):
//!   - [`SingleDirectionReport`]: one table, one lane
//!   - [`DualDirectionReport`]: in and out tables printed side by side
//!   - [`MultiSectionReport`]: every section of a location, each with in/out/total tables
use std::fs::{self, File};
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::Datelike;
use csv::{Reader, ReaderBuilder};
use log::{debug, warn};
use regex::Regex;

use crate::{
    lane_name, Direction, HourlyCount, LaneCounts, ReportError, ReportKind, ReportMetadata,
    HOURS_PER_BLOCK,
};

/// Marks the first row of data: the 07:00 hour.
const DATA_ANCHOR: &str = "7時台";

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("whitespace regex is valid"));

// The second hour label on a line is where the out table begins.
static SECOND_HOUR_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:7|8|9|10|11|12|13|14|15|16|17|18|19)時台.*?((?:7|8|9|10|11|12|13|14|15|16|17|18|19)時台)",
    )
    .expect("hour label regex is valid")
});

static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"自\s*動\s*車\s*交通量\s*調査結果集計表").expect("section header regex is valid")
});

static TABLE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"時\s*間\s*帯").expect("table header regex is valid"));

static ALL_VEHICLE_TOTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"全\s*車\s*合\s*計\s*([0-9\s]+)").expect("all-vehicle total regex is valid")
});

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("number regex is valid"));

/// How to divide a line holding both the in and out tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitStrategy {
    /// Split at the second hour label, or at the middle of the line if there isn't one.
    #[default]
    HourMarker,
    /// Always split at the middle of the line.
    Midpoint,
}

impl FromStr for SplitStrategy {
    type Err = ();
    fn from_str(input: &str) -> Result<SplitStrategy, Self::Err> {
        match input {
            "marker" => Ok(SplitStrategy::HourMarker),
            "midpoint" => Ok(SplitStrategy::Midpoint),
            _ => Err(()),
        }
    }
}

/// Where the hourly total sits in a table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    /// Index of the total, counting the hour label as column 0.
    pub total_column: usize,
    pub split: SplitStrategy,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            total_column: 7,
            split: SplitStrategy::default(),
        }
    }
}

/// A section letter that a multi-section report skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingSection {
    pub month: u32,
    pub day: u32,
    pub section_num: u32,
    pub letter: char,
}

impl MissingSection {
    fn applies_to(&self, metadata: &ReportMetadata, letter: char) -> bool {
        self.month == metadata.date.month()
            && self.day == metadata.date.day()
            && self.section_num == metadata.section_num
            && self.letter == letter
    }
}

/// Everything extraction needs beyond the report itself.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Report filenames have no year.
    pub year: i32,
    pub layout: ColumnLayout,
    pub missing_sections: Vec<MissingSection>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            year: 2024,
            layout: ColumnLayout::default(),
            missing_sections: vec![MissingSection {
                month: 1,
                day: 9,
                section_num: 1,
                letter: 'B',
            }],
        }
    }
}

/// The lanes that go into one canonical CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutput {
    /// Filename of the CSV, e.g. 1月9日_7_A_in.csv.
    pub filename: String,
    pub lanes: Vec<LaneCounts>,
}

/// A trait for extracting hourly counts from a report file.
pub trait Extract {
    type Item;
    fn extract(
        path: &Path,
        metadata: &ReportMetadata,
        options: &ExtractOptions,
    ) -> Result<Vec<Self::Item>, ReportError>;
}

/// One direction of one section, e.g. 1月9日_10_A_in.txt.
pub struct SingleDirectionReport;

/// Both directions of one section printed side by side, e.g. 1月9日_7_A.txt.
pub struct DualDirectionReport;

/// All sections of a location, each in its own set of tables, e.g. 1月16日_1.txt.
pub struct MultiSectionReport;

impl Extract for SingleDirectionReport {
    type Item = ReportOutput;

    fn extract(
        path: &Path,
        metadata: &ReportMetadata,
        options: &ExtractOptions,
    ) -> Result<Vec<Self::Item>, ReportError> {
        let (Some(letter), Some(direction)) = (metadata.section_letter, metadata.direction) else {
            return Err(ReportError::BadPath(path.to_owned()));
        };
        let text = fs::read_to_string(path)?;
        let lines = content_lines(&text);
        let block = data_block(&lines, path)?;

        let lane = lane_name(metadata.section_num, letter, direction);
        let counts = block
            .iter()
            .enumerate()
            .map(|(hour, line)| {
                let raw_value =
                    total_or_empty(&collapse_whitespace(line), &lane, hour, &options.layout);
                HourlyCount {
                    hour_index: hour,
                    raw_value,
                }
            })
            .collect();

        Ok(vec![ReportOutput {
            filename: csv_filename(path, "")?,
            lanes: vec![LaneCounts {
                lane,
                date: metadata.date,
                counts,
                approximate_rows: vec![],
            }],
        }])
    }
}

impl Extract for DualDirectionReport {
    type Item = ReportOutput;

    fn extract(
        path: &Path,
        metadata: &ReportMetadata,
        options: &ExtractOptions,
    ) -> Result<Vec<Self::Item>, ReportError> {
        let Some(letter) = metadata.section_letter else {
            return Err(ReportError::BadPath(path.to_owned()));
        };
        let text = fs::read_to_string(path)?;
        let lines = content_lines(&text);
        let block = data_block(&lines, path)?;

        let lane_in = lane_name(metadata.section_num, letter, Direction::In);
        let lane_out = lane_name(metadata.section_num, letter, Direction::Out);

        let mut in_counts = vec![];
        let mut out_counts = vec![];
        let mut approximate_rows = vec![];
        for (hour, line) in block.iter().enumerate() {
            let line = collapse_whitespace(line);
            let (left, right, approximate) = split_directions(&line, options.layout.split);
            if approximate {
                approximate_rows.push(hour);
            }
            in_counts.push(HourlyCount {
                hour_index: hour,
                raw_value: total_or_empty(left, &lane_in, hour, &options.layout),
            });
            out_counts.push(HourlyCount {
                hour_index: hour,
                raw_value: total_or_empty(right, &lane_out, hour, &options.layout),
            });
        }

        let mut outputs = vec![];
        for (direction, lane, counts) in [
            (Direction::In, lane_in, in_counts),
            (Direction::Out, lane_out, out_counts),
        ] {
            outputs.push(ReportOutput {
                filename: csv_filename(path, &format!("_{direction}"))?,
                lanes: vec![LaneCounts {
                    lane,
                    date: metadata.date,
                    counts,
                    approximate_rows: approximate_rows.clone(),
                }],
            });
        }
        Ok(outputs)
    }
}

impl Extract for MultiSectionReport {
    type Item = ReportOutput;

    fn extract(
        path: &Path,
        metadata: &ReportMetadata,
        options: &ExtractOptions,
    ) -> Result<Vec<Self::Item>, ReportError> {
        let text = fs::read_to_string(path)?;

        let mut outputs = vec![];
        let mut letter = next_letter(None, metadata, &options.missing_sections);
        for section in section_totals(&text) {
            let mut lanes = vec![];
            for (direction, totals) in [
                (Direction::In, section.inbound),
                (Direction::Out, section.outbound),
            ] {
                let Some(totals) = totals else {
                    debug!("No all-vehicle total for section {letter} ({direction}) in {path:?}.");
                    continue;
                };
                lanes.push(LaneCounts {
                    lane: lane_name(metadata.section_num, letter, direction),
                    date: metadata.date,
                    counts: totals
                        .into_iter()
                        .enumerate()
                        .map(|(hour_index, raw_value)| HourlyCount {
                            hour_index,
                            raw_value,
                        })
                        .collect(),
                    approximate_rows: vec![],
                });
            }
            if !lanes.is_empty() {
                outputs.push(ReportOutput {
                    filename: csv_filename(path, &format!("_{letter}"))?,
                    lanes,
                });
            }
            letter = next_letter(Some(letter), metadata, &options.missing_sections);
        }
        Ok(outputs)
    }
}

/// Extract whatever the report at `path` holds, according to the layout its filename implies.
pub fn extract_report(
    path: &Path,
    options: &ExtractOptions,
) -> Result<(ReportKind, Vec<ReportOutput>), ReportError> {
    let metadata = ReportMetadata::from_path(path, options.year)?;
    let kind = metadata.kind();
    let outputs = match kind {
        ReportKind::SingleDirection => SingleDirectionReport::extract(path, &metadata, options)?,
        ReportKind::DualDirection => DualDirectionReport::extract(path, &metadata, options)?,
        ReportKind::MultiSection => MultiSectionReport::extract(path, &metadata, options)?,
    };
    Ok((kind, outputs))
}

/// Trimmed, non-blank lines of a report.
pub fn content_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// The 13 lines starting at the 07:00 row.
pub fn data_block<'a, 'b>(
    lines: &'a [&'b str],
    path: &Path,
) -> Result<&'a [&'b str], ReportError> {
    let start = lines
        .iter()
        .position(|line| line.starts_with(DATA_ANCHOR))
        .ok_or_else(|| ReportError::MissingDataAnchor(path.to_owned()))?;
    let block = &lines[start..];
    if block.len() < HOURS_PER_BLOCK {
        return Err(ReportError::ShortBlock {
            path: path.to_owned(),
            found: block.len(),
        });
    }
    Ok(&block[..HOURS_PER_BLOCK])
}

/// Replace each run of spaces/tabs with a single space.
pub fn collapse_whitespace(line: &str) -> String {
    WHITESPACE_RUN.replace_all(line, " ").into_owned()
}

/// Divide a (whitespace-collapsed) line into its in and out halves.
///
/// The third value is true if the split was made at the midpoint of the line, in which case the
/// halves may not line up with the tables.
pub fn split_directions(line: &str, strategy: SplitStrategy) -> (&str, &str, bool) {
    if strategy == SplitStrategy::HourMarker {
        if let Some(m) = SECOND_HOUR_LABEL.captures(line).and_then(|c| c.get(1)) {
            let (left, right) = line.split_at(m.start());
            return (left.trim(), right.trim(), false);
        }
    }
    let mid_char = line.chars().count() / 2;
    let mid = line
        .char_indices()
        .nth(mid_char)
        .map_or(line.len(), |(i, _)| i);
    let (left, right) = line.split_at(mid);
    (left.trim(), right.trim(), true)
}

/// The value in the total column of a row, thousands separators removed.
pub fn total_column(row: &str, column: usize) -> Option<String> {
    row.trim()
        .split(' ')
        .nth(column)
        .map(|value| value.replace(',', ""))
}

fn total_or_empty(row: &str, lane: &str, hour: usize, layout: &ColumnLayout) -> String {
    match total_column(row, layout.total_column) {
        Some(v) => v,
        None => {
            let e = ReportError::InsufficientColumns {
                lane: lane.to_string(),
                hour,
                found: row.trim().split(' ').count(),
                column: layout.total_column,
            };
            warn!("{e}; leaving volume empty");
            String::new()
        }
    }
}

/// The all-vehicle totals of the in and out tables of one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTotals {
    pub inbound: Option<Vec<String>>,
    pub outbound: Option<Vec<String>>,
}

/// Find the in/out all-vehicle totals of each section in a multi-section report.
///
/// Each section header is followed by three tables (in, out, and the sum of both); the third
/// isn't needed.
pub fn section_totals(text: &str) -> Vec<SectionTotals> {
    let mut sections = vec![];
    for block in SECTION_HEADER.split(text) {
        let tables: Vec<&str> = TABLE_HEADER.split(block).collect();
        let mut i = 1;
        while i + 1 < tables.len() {
            sections.push(SectionTotals {
                inbound: all_vehicle_totals(tables[i]),
                outbound: all_vehicle_totals(tables[i + 1]),
            });
            i += 3;
        }
    }
    sections
}

/// The first 13 numbers following the all-vehicle total label of a table.
pub fn all_vehicle_totals(table: &str) -> Option<Vec<String>> {
    let caps = ALL_VEHICLE_TOTAL.captures(table)?;
    let mut values: Vec<String> = NUMBER
        .find_iter(&caps[1])
        .map(|m| m.as_str().to_string())
        .collect();
    if values.len() < HOURS_PER_BLOCK {
        return None;
    }
    values.truncate(HOURS_PER_BLOCK);
    Some(values)
}

// The section letter after `current` (or the first, if None), passing over missing ones.
fn next_letter(
    current: Option<char>,
    metadata: &ReportMetadata,
    missing: &[MissingSection],
) -> char {
    let mut letter = match current {
        Some(c) => char::from_u32(c as u32 + 1).unwrap_or(c),
        None => 'A',
    };
    while missing.iter().any(|m| m.applies_to(metadata, letter)) {
        letter = char::from_u32(letter as u32 + 1).unwrap_or(letter);
    }
    letter
}

// `<file stem><suffix>.csv`
fn csv_filename(path: &Path, suffix: &str) -> Result<String, ReportError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ReportError::BadPath(path.to_owned()))?;
    Ok(format!("{stem}{suffix}.csv"))
}

/// Create CSV reader from file.
pub fn create_reader(file: &File) -> Reader<&File> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const DUAL_ROW: &str = "8時台 10 20 30 40 50 60 1,210 9 8時台 1 2 3 4 5 6 321 7";

    fn metadata(month: u32, day: u32, section_num: u32) -> ReportMetadata {
        ReportMetadata {
            date: NaiveDate::from_ymd_opt(2024, month, day).unwrap(),
            section_num,
            section_letter: None,
            direction: None,
        }
    }

    #[test]
    fn collapse_whitespace_handles_tabs_and_runs() {
        assert_eq!(collapse_whitespace("7時台\t 12  \t\t3"), "7時台 12 3");
    }

    #[test]
    fn total_column_strips_thousands_separators() {
        let row = collapse_whitespace("7時台  1  2  3  4  5  6  1,234  99");
        assert_eq!(total_column(&row, 7), Some("1234".to_string()));
        assert_eq!(total_column("7時台 1 2", 7), None);
    }

    #[test]
    fn split_directions_at_second_hour_label() {
        let (left, right, approximate) = split_directions(DUAL_ROW, SplitStrategy::HourMarker);
        assert_eq!(left, "8時台 10 20 30 40 50 60 1,210 9");
        assert_eq!(right, "8時台 1 2 3 4 5 6 321 7");
        assert!(!approximate);
        assert_eq!(total_column(left, 7), Some("1210".to_string()));
        assert_eq!(total_column(right, 7), Some("321".to_string()));
    }

    #[test]
    fn split_directions_two_digit_hours() {
        let row = "12時台 1 1 1 1 1 1 6 0 12時台 2 2 2 2 2 2 12 0";
        let (left, right, approximate) = split_directions(row, SplitStrategy::HourMarker);
        assert_eq!(left, "12時台 1 1 1 1 1 1 6 0");
        assert_eq!(right, "12時台 2 2 2 2 2 2 12 0");
        assert!(!approximate);
    }

    #[test]
    fn split_directions_falls_back_to_midpoint() {
        let row = "7時台 1 2 3 4 5 6 7 8 1 2 3 4 5 6 7 8";
        let (left, right, approximate) = split_directions(row, SplitStrategy::HourMarker);
        assert!(approximate);
        assert_eq!(format!("{left} {right}"), row);
    }

    #[test]
    fn split_directions_midpoint_only() {
        let (_, _, approximate) = split_directions(DUAL_ROW, SplitStrategy::Midpoint);
        assert!(approximate);
    }

    #[test]
    fn data_block_requires_anchor() {
        let lines = content_lines("header\n\n8時台 1 2 3\n");
        assert!(matches!(
            data_block(&lines, Path::new("x.txt")),
            Err(ReportError::MissingDataAnchor(_))
        ));
    }

    #[test]
    fn data_block_anchor_must_start_line() {
        // 17時台 contains 7時台, but doesn't begin with it.
        let lines = content_lines("17時台 1 2 3\n");
        assert!(matches!(
            data_block(&lines, Path::new("x.txt")),
            Err(ReportError::MissingDataAnchor(_))
        ));
    }

    #[test]
    fn data_block_errs_if_short() {
        let text = (7..=15)
            .map(|h| format!("{h}時台 0 0 0 0 0 0 0"))
            .collect::<Vec<_>>()
            .join("\n");
        let lines = content_lines(&text);
        assert!(matches!(
            data_block(&lines, Path::new("x.txt")),
            Err(ReportError::ShortBlock { found: 9, .. })
        ));
    }

    #[test]
    fn data_block_takes_13_lines_from_anchor() {
        let mut text = String::from("title\n  時間帯 a b c\n\n");
        for h in 7..=19 {
            text.push_str(&format!("  {h}時台 0 0 0 0 0 0 {h}\n\n"));
        }
        text.push_str("合計 0 0 0 0 0 0 169\n");
        let lines = content_lines(&text);
        let block = data_block(&lines, Path::new("x.txt")).unwrap();
        assert_eq!(block.len(), 13);
        assert!(block[0].starts_with("7時台"));
        assert!(block[12].starts_with("19時台"));
    }

    #[test]
    fn all_vehicle_totals_takes_first_13() {
        let table = "小型車 1 2\n全 車 合 計   1 2 3 4 5 6 7 8 9 10 11 12 13 91\n";
        let totals = all_vehicle_totals(table).unwrap();
        assert_eq!(totals.len(), 13);
        assert_eq!(totals[0], "1");
        assert_eq!(totals[12], "13");
    }

    #[test]
    fn all_vehicle_totals_none_if_too_few() {
        assert_eq!(all_vehicle_totals("全車合計 1 2 3"), None);
        assert_eq!(all_vehicle_totals("no totals here"), None);
    }

    #[test]
    fn section_totals_skips_sum_table() {
        let totals = |n: u32| {
            (0..13)
                .map(|i| (n + i).to_string())
                .collect::<Vec<_>>()
                .join(" ")
        };
        let text = format!(
            "preamble\n自動車 交通量調査結果集計表\n時 間 帯\n全車合計 {}\n時間帯\n全車合計 {}\n時間帯\n全車合計 {}\n",
            totals(100),
            totals(200),
            totals(300)
        );
        let sections = section_totals(&text);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].inbound.as_ref().unwrap()[0], "100");
        assert_eq!(sections[0].outbound.as_ref().unwrap()[0], "200");
    }

    #[test]
    fn next_letter_passes_over_missing_sections() {
        let missing = ExtractOptions::default().missing_sections;
        let jan9 = metadata(1, 9, 1);
        assert_eq!(next_letter(None, &jan9, &missing), 'A');
        assert_eq!(next_letter(Some('A'), &jan9, &missing), 'C');

        let jan16 = metadata(1, 16, 1);
        assert_eq!(next_letter(Some('A'), &jan16, &missing), 'B');

        let jan9_section10 = metadata(1, 9, 10);
        assert_eq!(next_letter(Some('A'), &jan9_section10, &missing), 'B');
    }

    #[test]
    fn split_strategy_from_str() {
        assert_eq!("marker".parse::<SplitStrategy>(), Ok(SplitStrategy::HourMarker));
        assert_eq!("midpoint".parse::<SplitStrategy>(), Ok(SplitStrategy::Midpoint));
        assert!("middle".parse::<SplitStrategy>().is_err());
    }
}
