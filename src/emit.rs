//! Write canonical records to CSV.
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use csv::{Writer, WriterBuilder};
use log::info;

use crate::{
    extract_from_file::{extract_report, ExtractOptions},
    lane_registry::LaneRegistry,
    normalize::normalize,
    CanonicalRecord, ReportError, CANONICAL_HEADER,
};

/// Write a header and records to `path`, replacing anything already there.
pub fn write_records(
    path: &Path,
    header: &[&str],
    records: &[CanonicalRecord],
) -> Result<(), ReportError> {
    let mut wtr = create_writer(File::create(path)?);
    wtr.write_record(header)?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Create CSV writer to file. Headers are written explicitly rather than from field names.
pub fn create_writer(file: File) -> Writer<File> {
    WriterBuilder::new().has_headers(false).from_writer(file)
}

/// Remove and recreate a directory, so output from a previous run doesn't linger.
pub fn reset_dir(dir: &Path) -> Result<(), ReportError> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Parse a report, normalize its counts, and write a canonical CSV for each of its outputs.
///
/// CSVs go into a subdirectory of `csv_dir` named for the kind of report. Returns the paths
/// written.
pub fn convert_report(
    path: &Path,
    options: &ExtractOptions,
    registry: &LaneRegistry,
    csv_dir: &Path,
) -> Result<Vec<PathBuf>, ReportError> {
    let (kind, outputs) = extract_report(path, options)?;
    let out_dir = csv_dir.join(kind.dir_name());
    fs::create_dir_all(&out_dir)?;

    let mut written = vec![];
    for output in outputs {
        let records = output
            .lanes
            .iter()
            .flat_map(|lane_counts| normalize(lane_counts, registry))
            .collect::<Vec<_>>();
        let out_path = out_dir.join(&output.filename);
        write_records(&out_path, &CANONICAL_HEADER, &records)?;
        info!("Wrote {out_path:?} ({} rows).", records.len());
        written.push(out_path);
    }
    Ok(written)
}
