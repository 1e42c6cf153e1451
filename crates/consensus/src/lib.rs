//! Leader consensus - rotation, turn timing and vote aggregation
//!
//! Architecture:
//! - Each height gets a controller holding a consensus context
//! - The context rotates leadership over the validator set, starting after
//!   the previous block's leader
//! - A leader that misses its POS window triggers escalating reelection turns
//! - Votes are cached in a bounded pool until the dispatch layer counts them

pub mod cdc;
pub mod chain;
pub mod clock;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod interval;
pub mod leader_cal;
pub mod manager;
pub mod notify;
pub mod pool;
pub mod turn_timer;
pub mod types;
pub mod vote_pool;

#[cfg(test)]
mod tests;

pub use cdc::ConsensusContext;
pub use chain::{ChainReader, MemoryChain};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ElectionConfig, LeaderConfig, VotePoolConfig};
pub use controller::{Controller, ControllerMsg, StartControllerMsg};
pub use crypto::{Secp256k1Verifier, SecretKey, SignatureVerifier};
pub use error::{ConfigError, ControllerError, ElectionError, VoteError};
pub use interval::BroadcastInterval;
pub use leader_cal::LeaderCalculator;
pub use manager::{ControllerHandle, ControllerManager, ControllerManagerBuilder};
pub use notify::{LeaderNotifier, NotifierStats};
pub use pool::TimedPool;
pub use turn_timer::{TurnState, TurnTimer};
pub use types::*;
pub use vote_pool::VotePool;
