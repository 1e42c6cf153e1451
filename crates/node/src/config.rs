//! Node Configuration

use anyhow::{Context, Result};
use leader_consensus::ElectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Local simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Leader election parameters
    pub election: ElectionConfig,
    /// Number of simulated validators
    pub validators: usize,
    /// Heights to produce before exiting (0 = run until Ctrl+C)
    pub heights: u64,
    /// Every N-th height the elected leader stays silent (0 = never)
    pub stall_every: u64,
    /// Wall-clock pacing between heights in milliseconds
    pub block_interval_ms: u64,
    /// Simulated seconds between a parent block and its child
    pub block_time_secs: i64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            election: ElectionConfig::default(),
            validators: 4,
            heights: 0,
            stall_every: 0,
            block_interval_ms: 500,
            block_time_secs: 3,
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file; missing fields fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.election.validate()?;
        anyhow::ensure!(self.validators > 0, "at least one validator is required");
        anyhow::ensure!(self.block_time_secs > 0, "block_time_secs must be > 0");
        Ok(())
    }
}
