//! Turn parsed hourly counts into canonical records.
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use log::warn;

use crate::{
    lane_registry::LaneRegistry, CanonicalRecord, LaneCounts, FIRST_HOUR, HOURS_PER_BLOCK,
    TIMESTAMP_FORMAT, UNKNOWN_LINK_ID,
};

/// The start and end of each of the 13 one-hour buckets of a day, 07:00-08:00 through
/// 19:00-20:00.
pub fn hourly_window(date: NaiveDate) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..HOURS_PER_BLOCK as i64)
        .map(|i| {
            let start = midnight + TimeDelta::hours(i64::from(FIRST_HOUR) + i);
            (start, start + TimeDelta::hours(1))
        })
        .collect()
}

/// Format a datetime as YYYYMMDDHHMM.
pub fn timestamp(datetime: NaiveDateTime) -> String {
    datetime.format(TIMESTAMP_FORMAT).to_string()
}

/// Link id of a lane, or [`UNKNOWN_LINK_ID`] if the registry doesn't have it.
pub fn link_id_or_unknown(registry: &LaneRegistry, lane: &str) -> String {
    match registry.get(lane) {
        Some(v) => v.to_string(),
        None => {
            warn!("No link id for lane {lane}; using {UNKNOWN_LINK_ID}.");
            UNKNOWN_LINK_ID.to_string()
        }
    }
}

/// Create one canonical record per hour for a lane's counts.
pub fn normalize(lane_counts: &LaneCounts, registry: &LaneRegistry) -> Vec<CanonicalRecord> {
    if lane_counts.is_approximate() {
        warn!(
            "{} on {}: in/out split guessed at the middle of the line for hours {:?}; volumes may be misaligned.",
            lane_counts.lane, lane_counts.date, lane_counts.approximate_rows
        );
    }

    let link_id = link_id_or_unknown(registry, &lane_counts.lane);

    hourly_window(lane_counts.date)
        .into_iter()
        .zip(&lane_counts.counts)
        .map(|((start, end), count)| CanonicalRecord {
            start: timestamp(start),
            end: timestamp(end),
            link_id: link_id.clone(),
            volume: count.raw_value.clone(),
            lane_name: lane_counts.lane.clone(),
        })
        .collect()
}
