//! Local multi-validator simulation
//!
//! All validators live in this process. Each height is started on the
//! controller manager, the elected leader seals a block once two thirds of
//! the validators signed its leader notify, and the block is appended to an
//! in-memory chain. Simulated time runs on a manual clock.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use leader_consensus::{
    Address, Clock, ControllerManager, ControllerManagerBuilder, ControllerMsg, Hash, Header,
    LeaderChangeNotify, LeaderNotifier, ManualClock, MemoryChain, RoleType, Secp256k1Verifier,
    SecretKey, StartControllerMsg, ValidatorSet, VotePool,
};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

#[derive(Debug, Default, Clone)]
pub struct SimStats {
    pub blocks: u64,
    pub broadcast_blocks: u64,
    pub reelections: u64,
    pub votes: u64,
}

pub struct Simulation {
    config: NodeConfig,
    keys: Vec<SecretKey>,
    validators: ValidatorSet,
    broadcast_address: Address,
    chain: Arc<MemoryChain>,
    clock: ManualClock,
    manager: ControllerManager,
    votes: VotePool,
    notifications: broadcast::Receiver<LeaderChangeNotify>,
    stats: SimStats,
}

impl Simulation {
    pub fn new(mut config: NodeConfig, notifier: Arc<LeaderNotifier>) -> Result<Self> {
        let keys: Vec<SecretKey> = (0..config.validators).map(|_| SecretKey::generate()).collect();
        let validators = ValidatorSet::from_accounts(keys.iter().map(|k| k.address()));
        if config.election.broadcast_address.is_zero() {
            config.election.broadcast_address = SecretKey::generate().address();
        }
        let broadcast_address = config.election.broadcast_address;

        for v in validators.iter() {
            tracing::info!("Validator {}: {}", v.position, v.account);
        }
        tracing::info!("Broadcast account: {}", broadcast_address);

        // Height 1 follows the genesis epoch boundary, so its rotation starts at 0 anyway
        let genesis_leader = keys
            .last()
            .map(|k| k.address())
            .context("no validators configured")?;
        let genesis_time = chrono::Utc::now().timestamp();
        let chain = Arc::new(MemoryChain::new());
        chain.insert(
            Header::new(0, Hash::ZERO, genesis_leader, genesis_time),
            validators.clone(),
        );

        let clock = ManualClock::from_secs(genesis_time);
        let manager = ControllerManagerBuilder::new(chain.clone())
            .config(config.election.clone())
            .notifier(notifier.clone())
            .clock(Arc::new(clock.clone()))
            .build()?;
        let votes = VotePool::new(
            config.election.vote_pool,
            Arc::new(Secp256k1Verifier),
            Arc::new(clock.clone()),
            "sim",
        );

        Ok(Self {
            config,
            keys,
            validators,
            broadcast_address,
            chain,
            clock,
            manager,
            votes,
            notifications: notifier.subscribe(),
            stats: SimStats::default(),
        })
    }

    /// Run one height to completion and return its header
    pub fn produce_height(&mut self) -> Result<Header> {
        let parent = self.chain.current_header().context("chain has no head")?;
        let number = parent.number + 1;

        self.clock.set_millis((parent.time + 1) * 1000);
        self.manager.start_controller(
            number,
            StartControllerMsg {
                role: RoleType::Validator,
                validators: self.validators.clone(),
                parent_header: parent.clone(),
            },
        );
        let mut notify = self
            .next_notify(number)
            .with_context(|| format!("no leader announced for height {}", number))?;

        if notify.leader == self.broadcast_address {
            self.stats.broadcast_blocks += 1;
            return Ok(self.seal(number, &parent, notify.leader));
        }

        let stalled = self.config.stall_every > 0 && number % self.config.stall_every == 0;
        if stalled {
            notify = self.reelect(number, notify)?;
        }
        self.commit(number, &parent, notify)
    }

    /// Latest notify published for `number`
    fn next_notify(&mut self, number: u64) -> Option<LeaderChangeNotify> {
        let mut latest = None;
        loop {
            match self.notifications.try_recv() {
                Ok(notify) if notify.number == number => latest = Some(notify),
                Ok(_) => {}
                Err(TryRecvError::Lagged(n)) => {
                    tracing::warn!("Simulation lagged {} notifications", n);
                }
                Err(_) => break,
            }
        }
        latest
    }

    /// Let the POS window run out and hand the height to the reelect master
    fn reelect(&mut self, number: u64, notify: LeaderChangeNotify) -> Result<LeaderChangeNotify> {
        tracing::warn!("Height {}: leader {} stays silent", number, notify.leader);

        let leader_config = &self.config.election.leader;
        let step = leader_config.reelect_handle_interval.max(1);
        let max_steps =
            (leader_config.pos_time(notify.consensus_turn) + leader_config.reelect_out_time) / step + 2;

        let mut escalated = None;
        for _ in 0..max_steps {
            self.clock.advance_secs(step);
            self.manager.tick(self.clock.now_secs());
            if let Some(n) = self.next_notify(number) {
                if n.reelect_turn > 0 {
                    escalated = Some(n);
                    break;
                }
            }
        }
        let escalated = escalated
            .with_context(|| format!("height {} never escalated to reelection", number))?;
        let master = escalated.leader;
        tracing::info!(
            "Height {}: reelect turn {}, master {}",
            number,
            escalated.reelect_turn,
            master
        );

        self.manager.receive_msg(
            number,
            ControllerMsg::ReelectFinished {
                consensus_turn: escalated.consensus_turn,
                reelect_turn: escalated.reelect_turn,
                begin_time: self.clock.now_secs(),
            },
        )?;
        let elected = self
            .next_notify(number)
            .with_context(|| format!("no leader after reelection at height {}", number))?;
        anyhow::ensure!(
            elected.leader == master,
            "height {}: elected {} but master was {}",
            number,
            elected.leader,
            master
        );
        self.stats.reelections += 1;
        Ok(elected)
    }

    /// Collect votes on the leader notify and seal the block at quorum
    fn commit(
        &mut self,
        number: u64,
        parent: &Header,
        notify: LeaderChangeNotify,
    ) -> Result<Header> {
        let hash = notify.compute_hash();
        let quorum = self.keys.len() * 2 / 3 + 1;

        let mut voters: Vec<&SecretKey> = self.keys.iter().collect();
        voters.shuffle(&mut rand::thread_rng());
        let mut agree = 0;
        for key in voters {
            let sign = key.sign_with_validate(&hash, true)?;
            match self.votes.add_vote(hash, sign, key.address(), number, true) {
                Ok(()) => self.stats.votes += 1,
                Err(e) => tracing::warn!("Height {}: vote rejected: {}", number, e),
            }
            agree = self
                .votes
                .get_votes(&hash)
                .iter()
                .filter(|v| v.validate)
                .count();
            if agree >= quorum {
                break;
            }
        }
        anyhow::ensure!(
            agree >= quorum,
            "height {}: {} of {} votes, quorum {}",
            number,
            agree,
            self.keys.len(),
            quorum
        );

        self.manager.receive_msg(
            number,
            ControllerMsg::PosFinished {
                consensus_turn: notify.consensus_turn,
                reelect_turn: notify.reelect_turn,
            },
        )?;
        self.votes.del_votes(&hash);
        Ok(self.seal(number, parent, notify.leader))
    }

    fn seal(&mut self, number: u64, parent: &Header, leader: Address) -> Header {
        self.clock.advance_secs(self.config.block_time_secs);
        let header = Header::new(number, parent.hash, leader, self.clock.now_secs());
        self.chain.insert(header.clone(), self.validators.clone());
        self.stats.blocks += 1;
        tracing::info!(
            "Height {}: sealed by {}, hash {}",
            number,
            leader,
            header.hash.terminal_string()
        );
        header
    }

    pub fn stats(&self) -> SimStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leader_consensus::BroadcastInterval;

    fn config(stall_every: u64) -> NodeConfig {
        let mut config = NodeConfig {
            validators: 4,
            stall_every,
            ..Default::default()
        };
        config.election.interval = BroadcastInterval::new(10, 30);
        config
    }

    #[test]
    fn test_simulation_produces_through_reelection_epoch() {
        let notifier = Arc::new(LeaderNotifier::new());
        let mut sim = Simulation::new(config(0), notifier).unwrap();
        for number in 1..=35u64 {
            let header = sim.produce_height().unwrap();
            assert_eq!(header.number, number);
            if number % 10 == 0 {
                assert_eq!(header.leader, sim.broadcast_address);
            } else {
                assert!(sim.validators.contains(&header.leader));
            }
        }
        let stats = sim.stats();
        assert_eq!(stats.blocks, 35);
        assert_eq!(stats.broadcast_blocks, 3);
        assert_eq!(stats.reelections, 0);
    }

    #[test]
    fn test_stalled_leaders_are_replaced() {
        let notifier = Arc::new(LeaderNotifier::new());
        let mut sim = Simulation::new(config(4), notifier).unwrap();
        let mut leaders = Vec::new();
        for _ in 1..=9u64 {
            leaders.push(sim.produce_height().unwrap().leader);
        }
        assert_eq!(sim.stats().reelections, 2);
        // the reelect master is the validator after the silent one
        assert_eq!(leaders[3], sim.keys[0].address());
        assert_eq!(leaders[4], sim.keys[1].address());
        assert_eq!(leaders[7], sim.keys[1].address());
    }
}
