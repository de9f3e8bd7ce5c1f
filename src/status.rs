// status.rs — JSON run summary for the display/persistence collaborators.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::EngineCounters;
use crate::events::{CheckpointResult, MilestoneResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    /// Engine time of the last processed input, seconds.
    pub timestamp: f64,
    pub duration_secs: f64,
    pub speed_m_s: f64,
    pub distance_m: f64,
    pub launched: bool,
    pub calibrated: bool,
    pub gps_reliability: f64,
    pub counters: EngineCounters,
    pub checkpoints: Vec<CheckpointResult>,
    pub milestones: Vec<MilestoneResult>,
}

impl RunSummary {
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
