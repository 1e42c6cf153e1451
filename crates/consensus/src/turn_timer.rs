//! Turn timing
//!
//! Each consensus turn has a POS window followed by back-to-back reelection
//! rounds. Only the begin time of a consensus turn is recorded; every window
//! boundary is derived from it. All times are unix seconds.

use crate::config::LeaderConfig;
use crate::error::{ElectionError, Result};
use crate::types::ConsensusState;
use std::collections::HashMap;

/// Phase of a turn at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnState {
    /// `Pos` or `Reelect`
    pub phase: ConsensusState,
    /// Seconds until the current window ends
    pub remain_time: i64,
    /// 0 while in POS
    pub reelect_turn: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TurnTimer {
    begin_times: HashMap<u32, i64>,
    config: LeaderConfig,
}

impl TurnTimer {
    pub fn new(config: LeaderConfig) -> Self {
        Self {
            begin_times: HashMap::new(),
            config,
        }
    }

    /// Adopt new durations, e.g. the ones read from the parent state
    pub fn set_time_config(&mut self, config: LeaderConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &LeaderConfig {
        &self.config
    }

    pub fn reelect_handle_interval(&self) -> i64 {
        self.config.reelect_handle_interval
    }

    /// Record the begin time of `consensus_turn`.
    ///
    /// Only a strictly later time replaces a stored one. Returns whether the
    /// write took effect.
    pub fn set_begin_time(&mut self, consensus_turn: u32, time: i64) -> bool {
        if let Some(old) = self.begin_times.get(&consensus_turn) {
            if time <= *old {
                return false;
            }
        }
        self.begin_times.insert(consensus_turn, time);
        true
    }

    /// Begin time of `consensus_turn`, 0 if never recorded
    pub fn begin_time(&self, consensus_turn: u32) -> i64 {
        self.begin_times.get(&consensus_turn).copied().unwrap_or(0)
    }

    pub fn pos_end_time(&self, consensus_turn: u32) -> i64 {
        self.cal_turn_time(consensus_turn, 0).1
    }

    /// Phase, remaining time and reelect turn of `consensus_turn` at `now`
    pub fn cal_state(&self, consensus_turn: u32, now: i64) -> TurnState {
        let pos_time = self.config.pos_time(consensus_turn);
        let pass_time = now.saturating_sub(self.begin_time(consensus_turn));
        if pass_time < pos_time {
            return TurnState {
                phase: ConsensusState::Pos,
                remain_time: pos_time.saturating_sub(pass_time),
                reelect_turn: 0,
            };
        }

        let rounds = pass_time.saturating_sub(pos_time) / self.config.reelect_out_time.max(1);
        let reelect_turn = u32::try_from(rounds).unwrap_or(u32::MAX).saturating_add(1);
        let (_, end_time) = self.cal_turn_time(consensus_turn, reelect_turn);
        TurnState {
            phase: ConsensusState::Reelect,
            remain_time: end_time.saturating_sub(now),
            reelect_turn,
        }
    }

    pub fn cal_remain_time(&self, consensus_turn: u32, reelect_turn: u32, now: i64) -> i64 {
        self.cal_turn_time(consensus_turn, reelect_turn).1.saturating_sub(now)
    }

    /// `(begin, end)` of the window for `(consensus_turn, reelect_turn)`
    pub fn cal_turn_time(&self, consensus_turn: u32, reelect_turn: u32) -> (i64, i64) {
        let pos_time = self.config.pos_time(consensus_turn);
        let turn_begin = self.begin_time(consensus_turn);
        if reelect_turn == 0 {
            return (turn_begin, turn_begin.saturating_add(pos_time));
        }

        let reelect_time = self.config.reelect_out_time;
        let begin = turn_begin
            .saturating_add(pos_time)
            .saturating_add((reelect_turn as i64 - 1).saturating_mul(reelect_time));
        (begin, begin.saturating_add(reelect_time))
    }

    /// Fails unless `begin < time < end` for the window
    pub fn check_time_legal(&self, consensus_turn: u32, reelect_turn: u32, time: i64) -> Result<()> {
        let (begin, end) = self.cal_turn_time(consensus_turn, reelect_turn);
        if time <= begin || time >= end {
            return Err(ElectionError::TimeIllegal { time, begin, end });
        }
        Ok(())
    }
}
