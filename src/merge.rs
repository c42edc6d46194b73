//! Merge the canonical CSVs of every report into daily datasets.
//!
//! Each [`MergeTarget`] is one output dataset. A row goes to the first target whose date it
//! starts with; rows that fit no target, or that don't have exactly five columns, are dropped.
//!
//! Targets can also back-fill lanes that some days have no report for, with a volume of 0, and
//! sort their rows by lane and start. By default only the first target does either.
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use csv::StringRecord;
use log::{debug, error, info, warn};

use crate::{
    emit::write_records,
    extract_from_file::create_reader,
    lane_registry::LaneRegistry,
    normalize::{hourly_window, link_id_or_unknown, timestamp},
    CanonicalRecord, RejectReason, ReportError, MERGED_HEADER,
};

/// Lanes known to sometimes have no report on the first target date.
pub const BACKFILL_LANES: [&str; 4] = ["Link1_B_in", "Link1_B_out", "Link2_D_in", "Link2_D_out"];

/// Zero-volume records to add for lanes with no data.
#[derive(Debug, Clone, PartialEq)]
pub struct Backfill {
    /// Date used for the added records' timestamps.
    pub date: NaiveDate,
    pub lanes: Vec<String>,
}

/// One merged daily dataset and the rules for building it.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeTarget {
    /// The date rows are folded onto.
    pub date: NaiveDate,
    /// Years whose rows on this target's month and day are accepted.
    ///
    /// Reports have been converted with both 2024 and 2025 as the year; rows from either all
    /// belong to this target. Only the bucket is chosen this way: rows keep their timestamps.
    pub fold_years: Vec<i32>,
    pub backfill: Option<Backfill>,
    /// Sort rows by (lane name, start).
    pub sort: bool,
    pub output: PathBuf,
}

impl MergeTarget {
    /// YYYYMMDD prefixes of the start timestamps this target accepts.
    pub fn accepted_prefixes(&self) -> Vec<String> {
        self.fold_years
            .iter()
            .filter_map(|year| self.date.with_year(*year))
            .map(|date| date.format("%Y%m%d").to_string())
            .collect()
    }

    pub fn accepts(&self, start: &str) -> bool {
        self.accepted_prefixes()
            .iter()
            .any(|prefix| start.starts_with(prefix.as_str()))
    }
}

/// The records merged for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDataset {
    pub date: NaiveDate,
    pub output: PathBuf,
    pub records: Vec<CanonicalRecord>,
}

/// The two daily datasets: 9 and 16 January, with 2024 and 2025 rows folded onto 2025.
///
/// Only 9 January is back-filled and sorted; 16 January is written in the order read.
pub fn default_targets(output_dir: &Path) -> Result<Vec<MergeTarget>, ReportError> {
    Ok(vec![
        MergeTarget {
            date: date(2025, 1, 9)?,
            fold_years: vec![2024, 2025],
            backfill: Some(Backfill {
                date: date(2024, 1, 9)?,
                lanes: BACKFILL_LANES.iter().map(|s| s.to_string()).collect(),
            }),
            sort: true,
            output: output_dir.join("traffic_data_20240109.csv"),
        },
        MergeTarget {
            date: date(2025, 1, 16)?,
            fold_years: vec![2024, 2025],
            backfill: None,
            sort: false,
            output: output_dir.join("traffic_data_20240116.csv"),
        },
    ])
}

fn date(year: i32, month: u32, day: u32) -> Result<NaiveDate, ReportError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| ReportError::Config(format!("invalid date {year}-{month}-{day}")))
}

/// All CSV files directly within the directories, sorted by path.
///
/// A directory that doesn't exist is logged and passed over.
pub fn collect_csv_paths(dirs: &[PathBuf]) -> Result<Vec<PathBuf>, ReportError> {
    let mut paths = vec![];
    for dir in dirs {
        if !dir.is_dir() {
            warn!("{dir:?} is not a directory; no CSVs read from it.");
            continue;
        }
        info!("Searching {dir:?} for CSVs.");
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|x| x == "csv") {
                paths.push(path);
            }
        }
    }
    paths.sort();
    Ok(paths)
}

/// Which target a row belongs to, by index.
pub fn classify_row(row: &StringRecord, targets: &[MergeTarget]) -> Result<usize, RejectReason> {
    if row.len() != 5 {
        return Err(RejectReason::ColumnCount(row.len()));
    }
    targets
        .iter()
        .position(|target| target.accepts(&row[0]))
        .ok_or(RejectReason::DateNotTargeted)
}

/// Read the rows of every file into the bucket of the target they belong to.
///
/// Problems with a file or row are logged, and that file or row skipped.
pub fn read_into_buckets(paths: &[PathBuf], targets: &[MergeTarget]) -> Vec<Vec<CanonicalRecord>> {
    let mut buckets = vec![vec![]; targets.len()];
    for path in paths {
        info!("Reading {path:?}.");
        let file = match File::open(path) {
            Ok(v) => v,
            Err(e) => {
                error!("Unable to open {path:?}: {e}. File not merged.");
                continue;
            }
        };
        let mut rdr = create_reader(&file);
        for row in rdr.records() {
            let row = match row {
                Ok(v) => v,
                Err(e) => {
                    error!("Unreadable row in {path:?}: {e}. Row not merged.");
                    continue;
                }
            };
            match classify_row(&row, targets) {
                Ok(i) => buckets[i].push(CanonicalRecord {
                    start: row[0].to_string(),
                    end: row[1].to_string(),
                    link_id: row[2].to_string(),
                    volume: row[3].to_string(),
                    lane_name: row[4].to_string(),
                }),
                Err(reason) => {
                    let e = ReportError::RowRejected {
                        path: path.clone(),
                        row: row.iter().map(String::from).collect(),
                        reason,
                    };
                    debug!("Skipping: {e}");
                }
            }
        }
    }
    buckets
}

/// Add zero-volume records for each hour of each back-fill lane that has no record yet.
///
/// Returns the number of records added. Running it again adds nothing.
pub fn backfill(
    records: &mut Vec<CanonicalRecord>,
    backfill: &Backfill,
    registry: &LaneRegistry,
) -> usize {
    let mut added = 0;
    for lane in &backfill.lanes {
        let link_id = link_id_or_unknown(registry, lane);
        for (start, end) in hourly_window(backfill.date) {
            let start = timestamp(start);
            let end = timestamp(end);
            if records
                .iter()
                .any(|r| r.start == start && r.end == end && &r.lane_name == lane)
            {
                continue;
            }
            records.push(CanonicalRecord {
                start,
                end,
                link_id: link_id.clone(),
                volume: "0".to_string(),
                lane_name: lane.clone(),
            });
            added += 1;
        }
    }
    added
}

/// Sort by lane name, then start. Both compare as strings; fixed-width timestamps make that
/// chronological.
pub fn sort_records(records: &mut [CanonicalRecord]) {
    records.sort_by(|a, b| (&a.lane_name, &a.start).cmp(&(&b.lane_name, &b.start)));
}

/// Build each target's dataset from the CSVs in `input_dirs`.
pub fn merge(
    input_dirs: &[PathBuf],
    targets: &[MergeTarget],
    registry: &LaneRegistry,
) -> Result<Vec<MergedDataset>, ReportError> {
    let paths = collect_csv_paths(input_dirs)?;
    let buckets = read_into_buckets(&paths, targets);

    let mut datasets = vec![];
    for (target, mut records) in targets.iter().zip(buckets) {
        info!("{} rows found for {}.", records.len(), target.date);
        if let Some(v) = &target.backfill {
            let added = backfill(&mut records, v, registry);
            info!("Back-filled {added} zero-volume rows for {}.", target.date);
        }
        if target.sort {
            sort_records(&mut records);
        }
        datasets.push(MergedDataset {
            date: target.date,
            output: target.output.clone(),
            records,
        });
    }
    Ok(datasets)
}

/// Write each dataset to its output file, replacing whatever is there.
pub fn write_datasets(datasets: &[MergedDataset]) -> Result<(), ReportError> {
    for dataset in datasets {
        if let Some(parent) = dataset.output.parent() {
            fs::create_dir_all(parent)?;
        }
        write_records(&dataset.output, &MERGED_HEADER, &dataset.records)?;
        info!(
            "Wrote {:?} ({} rows).",
            dataset.output,
            dataset.records.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane_registry::LaneEntry;

    fn targets() -> Vec<MergeTarget> {
        default_targets(Path::new("out")).unwrap()
    }

    fn record(start: &str, lane: &str, volume: &str) -> CanonicalRecord {
        let next_hour = start[..10].parse::<u64>().unwrap() + 1;
        CanonicalRecord {
            start: start.to_string(),
            end: format!("{next_hour}00"),
            link_id: "1".to_string(),
            volume: volume.to_string(),
            lane_name: lane.to_string(),
        }
    }

    #[test]
    fn accepted_prefixes_fold_both_years() {
        let targets = targets();
        assert_eq!(targets[0].accepted_prefixes(), vec!["20240109", "20250109"]);
        assert_eq!(targets[1].accepted_prefixes(), vec!["20240116", "20250116"]);
    }

    #[test]
    fn classify_row_by_date_prefix() {
        let targets = targets();
        let row = |start: &str| StringRecord::from(vec![start, "x", "1", "10", "Link1_A_in"]);
        assert_eq!(classify_row(&row("202401090700"), &targets), Ok(0));
        assert_eq!(classify_row(&row("202501090700"), &targets), Ok(0));
        assert_eq!(classify_row(&row("202401160700"), &targets), Ok(1));
        assert_eq!(classify_row(&row("202501161900"), &targets), Ok(1));
        assert_eq!(
            classify_row(&row("202601090700"), &targets),
            Err(RejectReason::DateNotTargeted)
        );
        assert_eq!(
            classify_row(&row("集計開始時刻"), &targets),
            Err(RejectReason::DateNotTargeted)
        );
    }

    #[test]
    fn classify_row_rejects_wrong_column_count() {
        let targets = targets();
        let four = StringRecord::from(vec!["202401090700", "202401090800", "1", "10"]);
        let six = StringRecord::from(vec!["202401090700", "202401090800", "1", "10", "L", "x"]);
        assert_eq!(
            classify_row(&four, &targets),
            Err(RejectReason::ColumnCount(4))
        );
        assert_eq!(classify_row(&six, &targets), Err(RejectReason::ColumnCount(6)));
    }

    #[test]
    fn backfill_only_adds_missing_hours() {
        let registry = LaneRegistry::from_entries([LaneEntry {
            lane_name: "Link1_B_in".to_string(),
            link_id: "48101".to_string(),
        }]);
        let backfill_rule = Backfill {
            date: NaiveDate::from_ymd_opt(2024, 1, 9).unwrap(),
            lanes: vec!["Link1_B_in".to_string()],
        };
        let mut records = vec![record("202401090700", "Link1_B_in", "55")];

        assert_eq!(backfill(&mut records, &backfill_rule, &registry), 12);
        assert_eq!(records.len(), 13);
        assert_eq!(records[0].volume, "55");
        assert!(records[1..]
            .iter()
            .all(|r| r.volume == "0" && r.link_id == "48101"));

        // Again, with everything already present.
        assert_eq!(backfill(&mut records, &backfill_rule, &registry), 0);
        assert_eq!(records.len(), 13);
    }

    #[test]
    fn sort_records_by_lane_then_start() {
        let mut records = vec![
            record("202401090800", "Link2_A_in", "1"),
            record("202401090700", "Link2_A_in", "2"),
            record("202401091900", "Link10_A_in", "3"),
            record("202401090700", "Link10_A_in", "4"),
        ];
        sort_records(&mut records);
        let order: Vec<&str> = records.iter().map(|r| r.volume.as_str()).collect();
        // "Link10" sorts before "Link2" as strings.
        assert_eq!(order, vec!["4", "3", "2", "1"]);
    }
}
