//! Replay: serialize/deserialize generated events for offline refits.

use crate::scenarios::{Scenario, ScenarioEvent};
use detector::{TelescopeConfig, TelescopeGeometry};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

/// A full recorded simulation log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayLog {
    pub scenario_name: String,
    pub seed: u64,
    /// Layout the event was simulated in; needed to refit it
    pub telescope: TelescopeConfig,
    pub event: ScenarioEvent,
}

impl ReplayLog {
    pub fn new(scenario: &Scenario, event: ScenarioEvent) -> Self {
        Self {
            scenario_name: scenario.name.clone(),
            seed: scenario.seed,
            telescope: scenario.telescope.clone(),
            event,
        }
    }

    pub fn geometry(&self) -> anyhow::Result<Arc<TelescopeGeometry>> {
        Ok(Arc::new(TelescopeGeometry::from_config(&self.telescope)?))
    }
}

/// Save a replay log to a JSON file.
pub fn save_replay(log: &ReplayLog, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, log)?;
    Ok(())
}

/// Load a replay log from a JSON file.
pub fn load_replay(path: &Path) -> anyhow::Result<ReplayLog> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let log: ReplayLog = serde_json::from_reader(reader)?;
    Ok(log)
}
