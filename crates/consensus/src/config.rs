//! Leader election configuration
//!
//! Loaded externally (genesis or node config file) and handed to the
//! controller manager and vote pool at startup.

use crate::error::ConfigError;
use crate::interval::BroadcastInterval;
use crate::types::Address;
use serde::{Deserialize, Serialize};

/// Turn timing, all values in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderConfig {
    /// Extra time granted to consensus turn 0 for mining the parent block
    pub parent_mining_time: i64,
    /// Length of the POS window
    pub pos_out_time: i64,
    /// Length of each reelection round
    pub reelect_out_time: i64,
    /// How often a reelection master re-drives its inquiry
    pub reelect_handle_interval: i64,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            parent_mining_time: 20,
            pos_out_time: 20,
            reelect_out_time: 40,
            reelect_handle_interval: 3,
        }
    }
}

impl LeaderConfig {
    /// POS window length for `consensus_turn`
    pub fn pos_time(&self, consensus_turn: u32) -> i64 {
        if consensus_turn == 0 {
            self.pos_out_time.saturating_add(self.parent_mining_time)
        } else {
            self.pos_out_time
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pos_out_time <= 0 {
            return Err(ConfigError::InvalidPosOutTime);
        }
        if self.reelect_out_time <= 0 {
            return Err(ConfigError::InvalidReelectOutTime);
        }
        Ok(())
    }
}

/// Vote pool bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotePoolConfig {
    /// Votes older than this are evicted (milliseconds)
    pub timeout_ms: i64,
    /// Maximum votes held per signer
    pub account_vote_count_limit: usize,
}

impl Default for VotePoolConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 55_000,
            account_vote_count_limit: 5,
        }
    }
}

/// Full configuration surface of the leader election core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    pub leader: LeaderConfig,
    pub vote_pool: VotePoolConfig,
    /// Account that leads broadcast and reelection heights
    pub broadcast_address: Address,
    pub interval: BroadcastInterval,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            leader: LeaderConfig::default(),
            vote_pool: VotePoolConfig::default(),
            broadcast_address: Address::ZERO,
            interval: BroadcastInterval::default(),
        }
    }
}

impl ElectionConfig {
    /// Parse and validate a JSON config document
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.leader.validate()?;
        self.interval.validate()?;
        if self.vote_pool.account_vote_count_limit == 0 {
            return Err(ConfigError::InvalidVoteCountLimit);
        }
        Ok(())
    }
}
