//! Error types

use crate::types::{Address, Hash};
use thiserror::Error;

/// Leader rotation and turn timing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElectionError {
    #[error("validator list is empty")]
    ValidatorsIsNil,

    #[error("previous leader {0} not found in validator list")]
    ValidatorNotFound(Address),

    #[error("chain lookup failed: {0}")]
    Chain(String),

    #[error("time {time} outside turn window ({begin} - {end})")]
    TimeIllegal { time: i64, begin: i64, end: i64 },

    #[error("turn {consensus_turn} + reelect turn {reelect_turn} overflows")]
    TurnOverflow { consensus_turn: u32, reelect_turn: u32 },

    #[error("validator query for height {number} at or above current height {current}")]
    NumberTooHigh { number: u64, current: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Height window errors from the controller manager
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerError {
    #[error("height {number} is below current height {current}")]
    HeightTooLow { number: u64, current: u64 },

    #[error("height {number} is too far above current height {current}")]
    HeightTooHigh { number: u64, current: u64 },
}

/// Vote pool admission errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("vote sign account {signer} != from account {from}")]
    SignerMismatch { signer: Address, from: Address },

    #[error("vote from {signer} for {hash:?} already exists")]
    Duplicate { signer: Address, hash: Hash },
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pos_out_time must be > 0")]
    InvalidPosOutTime,

    #[error("reelect_out_time must be > 0")]
    InvalidReelectOutTime,

    #[error("broadcast interval must be > 0")]
    InvalidBroadcastInterval,

    #[error("reelection interval {reelect} must be a non-zero multiple of broadcast interval {broadcast}")]
    InvalidReelectInterval { broadcast: u64, reelect: u64 },

    #[error("account_vote_count_limit must be > 0")]
    InvalidVoteCountLimit,

    #[error("failed to parse config: {0}")]
    Parse(String),
}

pub type Result<T, E = ElectionError> = std::result::Result<T, E>;
