//! Broadcast and reelection height intervals
//!
//! Every `bc_interval`-th height is produced by the broadcast account instead
//! of a rotating validator. Every `reelect_interval`-th height starts a new
//! validator epoch; it is always a broadcast height too.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastInterval {
    /// Broadcast period in blocks
    pub bc_interval: u64,
    /// Reelection period in blocks
    pub reelect_interval: u64,
}

impl Default for BroadcastInterval {
    fn default() -> Self {
        Self {
            bc_interval: 100,
            reelect_interval: 300,
        }
    }
}

impl BroadcastInterval {
    pub fn new(bc_interval: u64, reelect_interval: u64) -> Self {
        Self {
            bc_interval,
            reelect_interval,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bc_interval == 0 {
            return Err(ConfigError::InvalidBroadcastInterval);
        }
        if self.reelect_interval == 0 || self.reelect_interval % self.bc_interval != 0 {
            return Err(ConfigError::InvalidReelectInterval {
                broadcast: self.bc_interval,
                reelect: self.reelect_interval,
            });
        }
        Ok(())
    }

    /// Always false for an unvalidated zero interval
    pub fn is_broadcast_number(&self, number: u64) -> bool {
        number.checked_rem(self.bc_interval) == Some(0)
    }

    pub fn is_reelection_number(&self, number: u64) -> bool {
        number.checked_rem(self.reelect_interval) == Some(0)
    }

    /// Highest broadcast height `<= number`
    pub fn last_broadcast_number(&self, number: u64) -> u64 {
        number - number.checked_rem(self.bc_interval).unwrap_or(0)
    }

    /// Lowest broadcast height `>= number`
    pub fn next_broadcast_number(&self, number: u64) -> u64 {
        round_up(number, self.bc_interval)
    }

    /// Highest reelection height `<= number`
    pub fn last_reelection_number(&self, number: u64) -> u64 {
        number - number.checked_rem(self.reelect_interval).unwrap_or(0)
    }

    /// Lowest reelection height `>= number`
    pub fn next_reelection_number(&self, number: u64) -> u64 {
        round_up(number, self.reelect_interval)
    }
}

fn round_up(number: u64, interval: u64) -> u64 {
    match number.checked_rem(interval) {
        None | Some(0) => number,
        Some(rem) => number.saturating_add(interval - rem),
    }
}
