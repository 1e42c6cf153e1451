//! Leader rotation table for a single height
//!
//! The table is a cyclic permutation of the validator set starting right after
//! the previous leader, so turn `t` is led by `table[t % N]`. A reelection
//! height and the height after it restart at position 0. Broadcast and
//! reelection heights hand the leader slot to the configured broadcast account.

use crate::error::{ElectionError, Result};
use crate::interval::BroadcastInterval;
use crate::types::{Address, LeaderAssignment, ValidatorSet};

/// Computes who leads each consensus turn of one height
#[derive(Debug, Clone)]
pub struct LeaderCalculator {
    number: u64,
    pre_leader: Address,
    leader_list: Vec<Address>,
    validators: ValidatorSet,
    broadcast_address: Address,
    interval: BroadcastInterval,
}

impl LeaderCalculator {
    pub fn new(number: u64, broadcast_address: Address, interval: BroadcastInterval) -> Self {
        Self {
            number,
            pre_leader: Address::ZERO,
            leader_list: Vec::new(),
            validators: ValidatorSet::default(),
            broadcast_address,
            interval,
        }
    }

    /// Rebuild the rotation table from `validators`, offset after `pre_leader`
    pub fn set_validators(&mut self, pre_leader: Address, validators: ValidatorSet) -> Result<()> {
        if validators.is_empty() {
            return Err(ElectionError::ValidatorsIsNil);
        }

        let leader_list = cal_leader_list(pre_leader, &validators, self.number, &self.interval)?;
        tracing::debug!(
            "Height {}: rotation rebuilt after {}, {} validators",
            self.number,
            pre_leader,
            validators.len()
        );
        self.leader_list = leader_list;
        self.pre_leader = pre_leader;
        self.validators = validators;
        Ok(())
    }

    /// Leader and next leader for `turn`
    pub fn get_leader(&self, turn: u32) -> Result<LeaderAssignment> {
        let count = self.leader_list.len();
        if count == 0 {
            return Err(ElectionError::ValidatorsIsNil);
        }
        let at = |offset: u32| {
            self.leader_list[((u64::from(turn) + u64::from(offset)) % count as u64) as usize]
        };

        if self.interval.is_reelection_number(self.number)
            || self.interval.is_broadcast_number(self.number)
        {
            return Ok(LeaderAssignment {
                leader: self.broadcast_address,
                next_leader: at(0),
            });
        }

        let next_leader = if self.interval.is_broadcast_number(self.number + 1) {
            self.broadcast_address
        } else {
            at(1)
        };
        Ok(LeaderAssignment {
            leader: at(0),
            next_leader,
        })
    }

    pub fn validators(&self) -> Result<ValidatorSet> {
        if self.validators.is_empty() {
            return Err(ElectionError::ValidatorsIsNil);
        }
        Ok(self.validators.clone())
    }

    /// Leader the rotation was offset from
    pub fn pre_leader(&self) -> Address {
        self.pre_leader
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn interval(&self) -> &BroadcastInterval {
        &self.interval
    }

    pub fn broadcast_address(&self) -> Address {
        self.broadcast_address
    }
}

fn cal_leader_list(
    pre_leader: Address,
    validators: &ValidatorSet,
    number: u64,
    interval: &BroadcastInterval,
) -> Result<Vec<Address>> {
    let count = validators.len();
    let epoch_start = interval.is_reelection_number(number)
        || (number > 0 && interval.is_reelection_number(number - 1));
    let start_pos = if epoch_start {
        0
    } else {
        let pre_index = validators
            .position_of(&pre_leader)
            .ok_or(ElectionError::ValidatorNotFound(pre_leader))?;
        pre_index + 1
    };

    Ok((0..count)
        .filter_map(|i| validators.get((start_pos + i) % count))
        .map(|v| v.account)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROADCAST: Address = Address([0xbb; 20]);

    fn accounts(n: u8) -> Vec<Address> {
        (1..=n).map(|i| Address([i; 20])).collect()
    }

    fn calculator(number: u64) -> LeaderCalculator {
        LeaderCalculator::new(number, BROADCAST, BroadcastInterval::new(10, 30))
    }

    #[test]
    fn test_rotation_visits_every_validator_once() {
        for n in 1..=6u8 {
            let accs = accounts(n);
            for (prev_pos, prev) in accs.iter().enumerate() {
                let mut cal = calculator(5);
                cal.set_validators(*prev, ValidatorSet::from_accounts(accs.clone()))
                    .unwrap();

                let leaders: Vec<Address> = (0..n as u32)
                    .map(|turn| cal.get_leader(turn).unwrap().leader)
                    .collect();
                for (turn, leader) in leaders.iter().enumerate() {
                    assert_eq!(*leader, accs[(prev_pos + 1 + turn) % n as usize]);
                }
                let mut sorted = leaders.clone();
                sorted.sort();
                sorted.dedup();
                assert_eq!(sorted.len(), n as usize);
            }
        }
    }

    #[test]
    fn test_rotation_wraps_past_cycle() {
        let accs = accounts(3);
        let mut cal = calculator(4);
        cal.set_validators(accs[0], ValidatorSet::from_accounts(accs.clone()))
            .unwrap();
        assert_eq!(cal.get_leader(0).unwrap().leader, accs[1]);
        assert_eq!(cal.get_leader(3).unwrap().leader, accs[1]);
        assert_eq!(cal.get_leader(4).unwrap().leader, accs[2]);
        assert_eq!(
            cal.get_leader(2).unwrap(),
            LeaderAssignment {
                leader: accs[0],
                next_leader: accs[1],
            }
        );
    }

    #[test]
    fn test_reelection_height_restarts_without_offset() {
        let accs = accounts(4);
        for prev in [accs[2], Address([0x77; 20])] {
            let mut cal = calculator(30);
            cal.set_validators(prev, ValidatorSet::from_accounts(accs.clone()))
                .unwrap();
            let leaders = cal.get_leader(0).unwrap();
            assert_eq!(leaders.leader, BROADCAST);
            assert_eq!(leaders.next_leader, accs[0]);
            assert_eq!(cal.get_leader(1).unwrap().next_leader, accs[1]);
        }
    }

    #[test]
    fn test_height_after_reelection_restarts_at_first_validator() {
        let accs = accounts(4);
        // previous leader may have left the new epoch's set
        for prev in [accs[2], BROADCAST, Address([0x77; 20])] {
            let mut cal = calculator(31);
            cal.set_validators(prev, ValidatorSet::from_accounts(accs.clone()))
                .unwrap();
            let leaders = cal.get_leader(0).unwrap();
            assert_eq!(leaders.leader, accs[0]);
            assert_eq!(leaders.next_leader, accs[1]);
            assert_eq!(cal.get_leader(3).unwrap().leader, accs[3]);
        }
    }

    #[test]
    fn test_broadcast_height_leader_is_broadcast_account() {
        let accs = accounts(3);
        let mut cal = calculator(20);
        cal.set_validators(accs[1], ValidatorSet::from_accounts(accs.clone()))
            .unwrap();
        let leaders = cal.get_leader(0).unwrap();
        assert_eq!(leaders.leader, BROADCAST);
        assert_eq!(leaders.next_leader, accs[2]);
    }

    #[test]
    fn test_next_leader_before_broadcast_height() {
        let accs = accounts(3);
        let mut cal = calculator(19);
        cal.set_validators(accs[0], ValidatorSet::from_accounts(accs.clone()))
            .unwrap();
        let leaders = cal.get_leader(0).unwrap();
        assert_eq!(leaders.leader, accs[1]);
        assert_eq!(leaders.next_leader, BROADCAST);
    }

    #[test]
    fn test_empty_validators_rejected() {
        let mut cal = calculator(5);
        assert_eq!(
            cal.set_validators(Address([1; 20]), ValidatorSet::default()),
            Err(ElectionError::ValidatorsIsNil)
        );
        assert_eq!(cal.get_leader(0), Err(ElectionError::ValidatorsIsNil));
        assert_eq!(cal.validators(), Err(ElectionError::ValidatorsIsNil));
    }

    #[test]
    fn test_unknown_pre_leader_keeps_previous_table() {
        let accs = accounts(3);
        let mut cal = calculator(5);
        cal.set_validators(accs[0], ValidatorSet::from_accounts(accs.clone()))
            .unwrap();

        let stranger = Address([0x55; 20]);
        assert_eq!(
            cal.set_validators(stranger, ValidatorSet::from_accounts(accounts(2))),
            Err(ElectionError::ValidatorNotFound(stranger))
        );
        assert_eq!(cal.get_leader(0).unwrap().leader, accs[1]);
        assert_eq!(cal.validators().unwrap().len(), 3);
        assert_eq!(cal.pre_leader(), accs[0]);
    }
}
