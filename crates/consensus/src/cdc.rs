//! Consensus context of one height
//!
//! Owns the rotation table and turn timer of the height, and tracks the turn
//! counters with the leaders they put in force. Plain value; callers
//! serialize access.

use crate::chain::ChainReader;
use crate::config::ElectionConfig;
use crate::error::{ElectionError, Result};
use crate::interval::BroadcastInterval;
use crate::leader_cal::LeaderCalculator;
use crate::turn_timer::TurnTimer;
use crate::types::{Address, ConsensusState, LeaderChangeNotify, ValidatorSet};
use std::sync::Arc;

pub struct ConsensusContext {
    state: ConsensusState,
    number: u64,
    consensus_turn: u32,
    consensus_leader: Address,
    reelect_turn: u32,
    reelect_master: Address,
    leader_cal: LeaderCalculator,
    turn_timer: TurnTimer,
    chain: Arc<dyn ChainReader>,
}

impl ConsensusContext {
    pub fn new(number: u64, config: &ElectionConfig, chain: Arc<dyn ChainReader>) -> Self {
        Self {
            state: ConsensusState::Idle,
            number,
            consensus_turn: 0,
            consensus_leader: Address::ZERO,
            reelect_turn: 0,
            reelect_master: Address::ZERO,
            leader_cal: LeaderCalculator::new(number, config.broadcast_address, config.interval),
            turn_timer: TurnTimer::new(config.leader),
            chain,
        }
    }

    /// Install the validator set and recompute the leaders in force.
    ///
    /// Right after a broadcast height the rotation continues from the leader
    /// of the block before it, since the broadcast block itself was not
    /// produced by a rotating validator. After a reelection height the
    /// substituted leader is only reported; the rotation restarts at 0.
    pub fn set_validators(&mut self, pre_leader: Address, validators: ValidatorSet) -> Result<()> {
        let mut pre_leader = pre_leader;
        if self.number > 1 && self.interval().is_broadcast_number(self.number - 1) {
            let header = self.chain.header_by_number(self.number - 2)?;
            tracing::debug!(
                "Height {}: parent is a broadcast block, rotating after {} (leader of {})",
                self.number,
                header.leader,
                header.number
            );
            pre_leader = header.leader;
        }

        self.leader_cal.set_validators(pre_leader, validators)?;

        let consensus_leader = self.get_leader(self.consensus_turn)?;
        self.reelect_master = if self.reelect_turn != 0 {
            self.get_leader(turn_index(self.consensus_turn, self.reelect_turn)?)?
        } else {
            Address::ZERO
        };
        self.consensus_leader = consensus_leader;
        Ok(())
    }

    /// Move to `consensus_turn`, clearing any reelection
    pub fn set_consensus_turn(&mut self, consensus_turn: u32) -> Result<()> {
        let consensus_leader = self.get_leader(consensus_turn)?;
        self.consensus_leader = consensus_leader;
        self.consensus_turn = consensus_turn;
        self.reelect_master = Address::ZERO;
        self.reelect_turn = 0;
        Ok(())
    }

    pub fn set_reelect_turn(&mut self, reelect_turn: u32) -> Result<()> {
        if self.reelect_turn == reelect_turn {
            return Ok(());
        }
        if reelect_turn == 0 {
            self.reelect_master = Address::ZERO;
            self.reelect_turn = 0;
            return Ok(());
        }
        let master = self.get_leader(turn_index(self.consensus_turn, reelect_turn)?)?;
        self.reelect_master = master;
        self.reelect_turn = reelect_turn;
        Ok(())
    }

    /// Leader of `turn`
    pub fn get_leader(&self, turn: u32) -> Result<Address> {
        Ok(self.leader_cal.get_leader(turn)?.leader)
    }

    pub fn consensus_leader(&self) -> Address {
        self.consensus_leader
    }

    /// Zero address unless a reelection is running
    pub fn reelect_master(&self) -> Address {
        self.reelect_master
    }

    /// Announcement of the leaders in force for the current turn pair
    pub fn prepare_leader_msg(&self) -> Result<LeaderChangeNotify> {
        let leaders = self
            .leader_cal
            .get_leader(turn_index(self.consensus_turn, self.reelect_turn)?)?;
        Ok(LeaderChangeNotify {
            consensus_state: self.state != ConsensusState::Reelect,
            pre_leader: self.leader_cal.pre_leader(),
            leader: leaders.leader,
            next_leader: leaders.next_leader,
            number: self.number,
            consensus_turn: self.consensus_turn,
            reelect_turn: self.reelect_turn,
            turn_begin_time: self.turn_timer.begin_time(self.consensus_turn),
            turn_end_time: self.turn_timer.pos_end_time(self.consensus_turn),
        })
    }

    /// Validator set in force after block `number`, for `number` below this height
    pub fn validator_by_number(&self, number: u64) -> Result<ValidatorSet> {
        if number >= self.number {
            return Err(ElectionError::NumberTooHigh {
                number,
                current: self.number,
            });
        }
        match self.chain.validators_by_number(number) {
            Ok(validators) => Ok(validators),
            Err(_) if number + 1 == self.number => self.leader_cal.validators(),
            Err(e) => Err(e),
        }
    }

    pub fn state(&self) -> ConsensusState {
        self.state
    }

    pub fn set_state(&mut self, state: ConsensusState) {
        self.state = state;
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn consensus_turn(&self) -> u32 {
        self.consensus_turn
    }

    pub fn reelect_turn(&self) -> u32 {
        self.reelect_turn
    }

    pub fn turn_timer(&self) -> &TurnTimer {
        &self.turn_timer
    }

    pub fn turn_timer_mut(&mut self) -> &mut TurnTimer {
        &mut self.turn_timer
    }

    pub fn interval(&self) -> &BroadcastInterval {
        self.leader_cal.interval()
    }
}

/// Rotation index of reelection round `reelect_turn` within `consensus_turn`
pub fn turn_index(consensus_turn: u32, reelect_turn: u32) -> Result<u32> {
    consensus_turn
        .checked_add(reelect_turn)
        .ok_or(ElectionError::TurnOverflow {
            consensus_turn,
            reelect_turn,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChain;
    use crate::types::{Hash, Header};

    const BROADCAST: Address = Address([0xbb; 20]);

    fn accounts(n: u8) -> Vec<Address> {
        (1..=n).map(|i| Address([i; 20])).collect()
    }

    fn config() -> ElectionConfig {
        ElectionConfig {
            broadcast_address: BROADCAST,
            interval: BroadcastInterval::new(10, 30),
            ..Default::default()
        }
    }

    fn cdc(number: u64, chain: Arc<MemoryChain>) -> ConsensusContext {
        ConsensusContext::new(number, &config(), chain)
    }

    #[test]
    fn test_turn_changes_update_leaders() {
        let accs = accounts(4);
        let mut cdc = cdc(5, Arc::new(MemoryChain::new()));
        cdc.set_validators(accs[0], ValidatorSet::from_accounts(accs.clone()))
            .unwrap();
        assert_eq!(cdc.consensus_leader(), accs[1]);
        assert_eq!(cdc.reelect_master(), Address::ZERO);

        cdc.set_reelect_turn(2).unwrap();
        assert_eq!(cdc.reelect_master(), accs[3]);
        cdc.set_reelect_turn(0).unwrap();
        assert_eq!(cdc.reelect_master(), Address::ZERO);

        cdc.set_reelect_turn(1).unwrap();
        cdc.set_consensus_turn(2).unwrap();
        assert_eq!(cdc.consensus_leader(), accs[3]);
        assert_eq!(cdc.reelect_turn(), 0);
        assert_eq!(cdc.reelect_master(), Address::ZERO);
    }

    #[test]
    fn test_set_validators_keeps_reelect_master() {
        let accs = accounts(3);
        let mut cdc = cdc(5, Arc::new(MemoryChain::new()));
        cdc.set_validators(accs[0], ValidatorSet::from_accounts(accs.clone()))
            .unwrap();
        cdc.set_reelect_turn(1).unwrap();
        assert_eq!(cdc.reelect_master(), accs[2]);

        cdc.set_validators(accs[1], ValidatorSet::from_accounts(accs.clone()))
            .unwrap();
        assert_eq!(cdc.consensus_leader(), accs[2]);
        assert_eq!(cdc.reelect_master(), accs[0]);
    }

    #[test]
    fn test_reelect_turn_overflow_is_rejected() {
        let accs = accounts(3);
        let mut cdc = cdc(5, Arc::new(MemoryChain::new()));
        cdc.set_validators(accs[0], ValidatorSet::from_accounts(accs.clone()))
            .unwrap();
        cdc.set_consensus_turn(u32::MAX).unwrap();
        assert_eq!(
            cdc.set_reelect_turn(1),
            Err(ElectionError::TurnOverflow {
                consensus_turn: u32::MAX,
                reelect_turn: 1,
            })
        );
        assert_eq!(cdc.reelect_turn(), 0);
        assert!(cdc.prepare_leader_msg().is_ok());
    }

    #[test]
    fn test_turn_change_without_validators_fails() {
        let mut cdc = cdc(5, Arc::new(MemoryChain::new()));
        assert_eq!(cdc.set_consensus_turn(1), Err(ElectionError::ValidatorsIsNil));
        assert_eq!(cdc.consensus_turn(), 0);
        assert_eq!(cdc.set_reelect_turn(1), Err(ElectionError::ValidatorsIsNil));
        assert!(cdc.set_reelect_turn(0).is_ok());
        assert!(cdc.prepare_leader_msg().is_err());
    }

    #[test]
    fn test_after_broadcast_height_rotates_from_earlier_leader() {
        let accs = accounts(3);
        let chain = Arc::new(MemoryChain::new());
        chain.insert(
            Header::new(9, Hash::ZERO, accs[1], 1_000),
            ValidatorSet::from_accounts(accs.clone()),
        );

        let mut cdc = cdc(11, chain);
        cdc.set_validators(BROADCAST, ValidatorSet::from_accounts(accs.clone()))
            .unwrap();
        assert_eq!(cdc.consensus_leader(), accs[2]);
    }

    #[test]
    fn test_after_reelection_height_restarts_despite_substitution() {
        let accs = accounts(4);
        let chain = Arc::new(MemoryChain::new());
        chain.insert(
            Header::new(29, Hash::ZERO, accs[2], 1_000),
            ValidatorSet::from_accounts(accs.clone()),
        );

        // leader of 29 left the set of the new epoch
        let next_epoch: Vec<Address> = accs.iter().copied().filter(|a| *a != accs[2]).collect();
        let mut cdc = cdc(31, chain);
        cdc.set_validators(BROADCAST, ValidatorSet::from_accounts(next_epoch))
            .unwrap();
        assert_eq!(cdc.consensus_leader(), accs[0]);
        assert_eq!(cdc.get_leader(2).unwrap(), accs[3]);
        assert_eq!(cdc.prepare_leader_msg().unwrap().pre_leader, accs[2]);
    }

    #[test]
    fn test_after_broadcast_height_missing_header_fails() {
        let accs = accounts(3);
        let mut cdc = cdc(21, Arc::new(MemoryChain::new()));
        assert!(matches!(
            cdc.set_validators(BROADCAST, ValidatorSet::from_accounts(accs)),
            Err(ElectionError::Chain(_))
        ));
    }

    #[test]
    fn test_prepare_leader_msg() {
        let accs = accounts(3);
        let mut cdc = cdc(8, Arc::new(MemoryChain::new()));
        cdc.set_validators(accs[2], ValidatorSet::from_accounts(accs.clone()))
            .unwrap();
        cdc.turn_timer_mut().set_begin_time(0, 1_000);
        cdc.set_state(ConsensusState::Pos);

        let msg = cdc.prepare_leader_msg().unwrap();
        assert!(msg.consensus_state);
        assert_eq!(msg.pre_leader, accs[2]);
        assert_eq!(msg.leader, accs[0]);
        assert_eq!(msg.next_leader, accs[1]);
        assert_eq!(msg.number, 8);
        assert_eq!(msg.turn_begin_time, 1_000);
        assert_eq!(msg.turn_end_time, 1_040);

        cdc.set_state(ConsensusState::Reelect);
        cdc.set_reelect_turn(1).unwrap();
        let msg = cdc.prepare_leader_msg().unwrap();
        assert!(!msg.consensus_state);
        assert_eq!(msg.leader, accs[1]);
        assert_eq!(msg.reelect_turn, 1);
        assert_eq!(msg.turn_end_time, 1_040);
    }

    #[test]
    fn test_validator_by_number_falls_back_for_parent() {
        let accs = accounts(2);
        let chain = Arc::new(MemoryChain::new());
        let old = ValidatorSet::from_accounts(accounts(1));
        chain.insert(Header::new(3, Hash::ZERO, accs[0], 1_000), old.clone());

        let mut cdc = cdc(6, chain);
        cdc.set_validators(accs[0], ValidatorSet::from_accounts(accs.clone()))
            .unwrap();

        assert_eq!(cdc.validator_by_number(3).unwrap(), old);
        assert_eq!(cdc.validator_by_number(5).unwrap().len(), 2);
        assert!(matches!(
            cdc.validator_by_number(4),
            Err(ElectionError::Chain(_))
        ));
        assert_eq!(
            cdc.validator_by_number(6),
            Err(ElectionError::NumberTooHigh {
                number: 6,
                current: 6,
            })
        );
    }
}
