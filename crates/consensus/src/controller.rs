//! Per-height controller
//!
//! Drives one height's consensus context through its round states from
//! start, POS completion, reelection results and clock ticks, publishing a
//! leader notify on every transition.

use crate::chain::ChainReader;
use crate::clock::Clock;
use crate::config::ElectionConfig;
use crate::cdc::{turn_index, ConsensusContext};
use crate::notify::LeaderNotifier;
use crate::types::{ConsensusState, Header, RoleType, ValidatorSet};
use std::sync::Arc;

/// Starts a height once its parent block is known
#[derive(Debug, Clone)]
pub struct StartControllerMsg {
    /// Role of this node at the height
    pub role: RoleType,
    pub validators: ValidatorSet,
    pub parent_header: Header,
}

#[derive(Debug, Clone)]
pub enum ControllerMsg {
    Start(StartControllerMsg),
    /// The leader's proposal for the round was accepted
    PosFinished { consensus_turn: u32, reelect_turn: u32 },
    /// A reelection round elected a new leader
    ReelectFinished {
        consensus_turn: u32,
        reelect_turn: u32,
        /// Begin time of the new consensus turn (unix seconds)
        begin_time: i64,
    },
    /// Periodic clock drive (unix seconds)
    Tick { now: i64 },
}

pub struct Controller {
    cdc: ConsensusContext,
    role: RoleType,
    parent_header: Option<Header>,
    notifier: Arc<LeaderNotifier>,
    clock: Arc<dyn Clock>,
    closed: bool,
}

impl Controller {
    pub fn new(
        number: u64,
        config: &ElectionConfig,
        chain: Arc<dyn ChainReader>,
        notifier: Arc<LeaderNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cdc: ConsensusContext::new(number, config, chain),
            role: RoleType::Nil,
            parent_header: None,
            notifier,
            clock,
            closed: false,
        }
    }

    pub fn handle_msg(&mut self, msg: ControllerMsg) {
        if self.closed {
            tracing::debug!("Height {}: controller closed, message dropped", self.number());
            return;
        }
        match msg {
            ControllerMsg::Start(msg) => self.handle_start(msg),
            ControllerMsg::PosFinished {
                consensus_turn,
                reelect_turn,
            } => self.handle_pos_finished(consensus_turn, reelect_turn),
            ControllerMsg::ReelectFinished {
                consensus_turn,
                reelect_turn,
                begin_time,
            } => self.handle_reelect_finished(consensus_turn, reelect_turn, begin_time),
            ControllerMsg::Tick { now } => self.handle_tick(now),
        }
    }

    fn handle_start(&mut self, msg: StartControllerMsg) {
        let number = self.number();
        let parent = msg.parent_header;
        if let Some(cached) = &self.parent_header {
            if cached.time > parent.time {
                tracing::warn!(
                    "Height {}: start with parent time {} older than cached {}",
                    number,
                    parent.time,
                    cached.time
                );
                return;
            }
        }

        tracing::debug!(
            "Height {}: start, pre leader {}, parent time {}",
            number,
            parent.leader,
            parent.time
        );
        if let Err(e) = self.cdc.set_validators(parent.leader, msg.validators) {
            tracing::error!("Height {}: failed to set validators: {}", number, e);
            return;
        }

        self.role = msg.role;
        if self.role != RoleType::Validator {
            tracing::debug!("Height {}: role is {}, not a validator", number, self.role);
            self.parent_header = Some(parent);
            return;
        }

        if self.cdc.interval().is_broadcast_number(number) {
            tracing::debug!("Height {}: broadcast block, no turn timer", number);
            self.cdc.set_state(ConsensusState::Idle);
            self.publish_leader_msg();
            self.parent_header = Some(parent);
            return;
        }

        if self.cdc.turn_timer_mut().set_begin_time(0, parent.time) {
            self.parent_header = Some(parent);
            if self.cdc.consensus_turn() == 0 {
                let now = self.clock.now_secs();
                let state = self.cdc.turn_timer().cal_state(0, now);
                tracing::debug!(
                    "Height {}: state {}, remain {}s, reelect turn {}",
                    number,
                    state.phase,
                    state.remain_time,
                    state.reelect_turn
                );
                self.cdc.set_state(state.phase);
                if let Err(e) = self.cdc.set_reelect_turn(state.reelect_turn) {
                    tracing::error!("Height {}: failed to set reelect turn: {}", number, e);
                }
            }
        }

        self.publish_leader_msg();
    }

    fn handle_pos_finished(&mut self, consensus_turn: u32, reelect_turn: u32) {
        let number = self.number();
        match self.cdc.state() {
            ConsensusState::Pos | ConsensusState::Reelect => {}
            state => {
                tracing::debug!("Height {}: POS finished ignored in state {}", number, state);
                return;
            }
        }
        if consensus_turn < self.cdc.consensus_turn() {
            tracing::debug!(
                "Height {}: stale POS finished for turn {} (current {})",
                number,
                consensus_turn,
                self.cdc.consensus_turn()
            );
            return;
        }
        if consensus_turn > self.cdc.consensus_turn() {
            if let Err(e) = self.cdc.set_consensus_turn(consensus_turn) {
                tracing::error!("Height {}: failed to adopt turn {}: {}", number, consensus_turn, e);
                return;
            }
        }

        tracing::info!(
            "Height {}: POS finished at turn {}/{}, leader {}",
            number,
            consensus_turn,
            reelect_turn,
            self.cdc.consensus_leader()
        );
        self.cdc.set_state(ConsensusState::Mining);
        if let Err(e) = self.cdc.set_reelect_turn(0) {
            tracing::error!("Height {}: failed to reset reelect turn: {}", number, e);
        }
        self.publish_leader_msg();
    }

    fn handle_reelect_finished(&mut self, consensus_turn: u32, reelect_turn: u32, begin_time: i64) {
        let number = self.number();
        if self.cdc.state() == ConsensusState::Idle {
            tracing::debug!("Height {}: reelection result ignored before start", number);
            return;
        }
        let new_turn = match turn_index(consensus_turn, reelect_turn) {
            Ok(turn) => turn,
            Err(e) => {
                tracing::warn!("Height {}: reelection result dropped: {}", number, e);
                return;
            }
        };
        if new_turn < self.cdc.consensus_turn() {
            tracing::debug!(
                "Height {}: stale reelection result for turn {} (current {})",
                number,
                new_turn,
                self.cdc.consensus_turn()
            );
            return;
        }

        if let Err(e) = self.cdc.set_consensus_turn(new_turn) {
            tracing::error!("Height {}: failed to set consensus turn {}: {}", number, new_turn, e);
            return;
        }
        self.cdc.turn_timer_mut().set_begin_time(new_turn, begin_time);

        let now = self.clock.now_secs();
        let state = self.cdc.turn_timer().cal_state(new_turn, now);
        self.cdc.set_state(state.phase);
        if let Err(e) = self.cdc.set_reelect_turn(state.reelect_turn) {
            tracing::error!("Height {}: failed to set reelect turn: {}", number, e);
        }
        tracing::info!(
            "Height {}: reelection finished, consensus turn {}, leader {}, state {}",
            number,
            new_turn,
            self.cdc.consensus_leader(),
            state.phase
        );
        self.publish_leader_msg();
    }

    fn handle_tick(&mut self, now: i64) {
        let number = self.number();
        if !matches!(
            self.cdc.state(),
            ConsensusState::Pos | ConsensusState::Reelect
        ) {
            return;
        }

        let state = self
            .cdc
            .turn_timer()
            .cal_state(self.cdc.consensus_turn(), now);
        if state.phase != ConsensusState::Reelect || state.reelect_turn <= self.cdc.reelect_turn() {
            return;
        }

        tracing::warn!(
            "Height {}: turn {} timed out in {}, escalating to reelect turn {} ({}s left)",
            number,
            self.cdc.consensus_turn(),
            self.cdc.state(),
            state.reelect_turn,
            state.remain_time
        );
        self.cdc.set_state(ConsensusState::Reelect);
        if let Err(e) = self.cdc.set_reelect_turn(state.reelect_turn) {
            tracing::error!("Height {}: failed to set reelect turn: {}", number, e);
            return;
        }
        self.publish_leader_msg();
    }

    fn publish_leader_msg(&self) {
        match self.cdc.prepare_leader_msg() {
            Ok(msg) => {
                tracing::debug!(
                    "Height {}: publish leader {} next {} turn {}/{}",
                    msg.number,
                    msg.leader,
                    msg.next_leader,
                    msg.consensus_turn,
                    msg.reelect_turn
                );
                self.notifier.publish(&msg);
            }
            Err(e) => {
                tracing::error!("Height {}: failed to prepare leader msg: {}", self.number(), e);
            }
        }
    }

    pub fn close(&mut self) {
        if !self.closed {
            tracing::debug!("Height {}: controller closed", self.number());
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn number(&self) -> u64 {
        self.cdc.number()
    }

    pub fn state(&self) -> ConsensusState {
        self.cdc.state()
    }

    pub fn role(&self) -> RoleType {
        self.role
    }

    pub fn parent_header(&self) -> Option<&Header> {
        self.parent_header.as_ref()
    }

    pub fn cdc(&self) -> &ConsensusContext {
        &self.cdc
    }
}
