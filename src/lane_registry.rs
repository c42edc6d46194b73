//! Lookup of a lane's link id by its name.
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::ReaderBuilder;
use log::{debug, info};
use serde::Deserialize;

use crate::ReportError;

/// A row of the lane table. Any other columns in the table are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LaneEntry {
    #[serde(rename = "lanename")]
    pub lane_name: String,
    #[serde(rename = "linkid")]
    pub link_id: String,
}

/// Lane name to link id, loaded once and never modified.
#[derive(Debug, Clone, Default)]
pub struct LaneRegistry {
    lanes: HashMap<String, String>,
}

impl LaneRegistry {
    /// Load the registry from a CSV with (at least) `lanename` and `linkid` columns.
    ///
    /// If a lane is listed more than once, the last one wins.
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let file = File::open(path)?;
        let mut rdr = ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(file);

        let header = rdr.headers()?;
        if !header.iter().any(|x| x == "lanename") || !header.iter().any(|x| x == "linkid") {
            return Err(ReportError::BadLaneTable(path.to_owned()));
        }

        let registry = Self::from_entries(
            rdr.deserialize::<LaneEntry>()
                .collect::<Result<Vec<_>, _>>()?,
        );
        info!("Loaded {} lanes from {path:?}.", registry.len());
        Ok(registry)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = LaneEntry>) -> Self {
        let mut lanes = HashMap::new();
        for entry in entries {
            if let Some(old) = lanes.insert(entry.lane_name.clone(), entry.link_id) {
                debug!("Lane {} listed more than once; replacing link id {old}.", entry.lane_name);
            }
        }
        Self { lanes }
    }

    /// Get the link id of a lane, if the lane is known.
    pub fn get(&self, lane_name: &str) -> Option<&str> {
        self.lanes.get(lane_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}
