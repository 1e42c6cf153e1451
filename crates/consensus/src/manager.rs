//! Height-indexed controller registry
//!
//! Controllers exist only for heights in `[cur_number, cur_number + 2]`.
//! Advancing `cur_number` closes and drops every controller below it.

use crate::chain::ChainReader;
use crate::clock::{Clock, SystemClock};
use crate::config::ElectionConfig;
use crate::controller::{Controller, ControllerMsg, StartControllerMsg};
use crate::error::{ConfigError, ControllerError};
use crate::notify::LeaderNotifier;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// How far above the current height a controller may be referenced
const MAX_HEIGHT_AHEAD: u64 = 2;

pub type ControllerHandle = Arc<Mutex<Controller>>;

#[derive(Default)]
struct ManagerInner {
    cur_number: u64,
    controllers: HashMap<u64, ControllerHandle>,
}

pub struct ControllerManager {
    inner: Mutex<ManagerInner>,
    config: ElectionConfig,
    chain: Arc<dyn ChainReader>,
    notifier: Arc<LeaderNotifier>,
    clock: Arc<dyn Clock>,
}

impl ControllerManager {
    pub fn new(
        config: ElectionConfig,
        chain: Arc<dyn ChainReader>,
        notifier: Arc<LeaderNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Mutex::new(ManagerInner::default()),
            config,
            chain,
            notifier,
            clock,
        })
    }

    /// Start the controller of `number`, advancing the current height if needed.
    ///
    /// Heights below the current one are dropped. The registry lock is held
    /// until the controller has handled the start, so a concurrent start of a
    /// higher height cannot close it halfway through.
    pub fn start_controller(&self, number: u64, msg: StartControllerMsg) {
        let mut inner = self.inner.lock();
        if number < inner.cur_number {
            tracing::warn!(
                "Start for height {} dropped, current height {}",
                number,
                inner.cur_number
            );
            return;
        }
        if number > inner.cur_number {
            inner.cur_number = number;
            Self::fix_ctrl_map(&mut inner);
        }
        let handle = self.get_or_create(&mut inner, number);
        handle.lock().handle_msg(ControllerMsg::Start(msg));
    }

    /// Forward a non-start message to the controller of `number`
    pub fn receive_msg(&self, number: u64, msg: ControllerMsg) -> Result<(), ControllerError> {
        let handle = self.get_controller(number)?;
        handle.lock().handle_msg(msg);
        Ok(())
    }

    /// Drive the current height's controller, if it exists
    pub fn tick(&self, now: i64) {
        let handle = {
            let inner = self.inner.lock();
            inner.controllers.get(&inner.cur_number).cloned()
        };
        if let Some(handle) = handle {
            handle.lock().handle_msg(ControllerMsg::Tick { now });
        }
    }

    pub fn get_controller(&self, number: u64) -> Result<ControllerHandle, ControllerError> {
        let mut inner = self.inner.lock();
        check_number(inner.cur_number, number)?;
        Ok(self.get_or_create(&mut inner, number))
    }

    pub fn get_cur_controller(&self) -> Result<ControllerHandle, ControllerError> {
        let number = self.cur_number();
        self.get_controller(number)
    }

    pub fn cur_number(&self) -> u64 {
        self.inner.lock().cur_number
    }

    pub fn controller_count(&self) -> usize {
        self.inner.lock().controllers.len()
    }

    pub fn notifier(&self) -> &Arc<LeaderNotifier> {
        &self.notifier
    }

    fn get_or_create(&self, inner: &mut ManagerInner, number: u64) -> ControllerHandle {
        inner
            .controllers
            .entry(number)
            .or_insert_with(|| {
                tracing::debug!("Creating controller for height {}", number);
                Arc::new(Mutex::new(Controller::new(
                    number,
                    &self.config,
                    self.chain.clone(),
                    self.notifier.clone(),
                    self.clock.clone(),
                )))
            })
            .clone()
    }

    fn fix_ctrl_map(inner: &mut ManagerInner) {
        let cur_number = inner.cur_number;
        inner.controllers.retain(|number, ctrl| {
            if *number >= cur_number {
                return true;
            }
            ctrl.lock().close();
            tracing::debug!("Dropped controller for height {}", number);
            false
        });
    }
}

fn check_number(cur_number: u64, number: u64) -> Result<(), ControllerError> {
    if number < cur_number {
        return Err(ControllerError::HeightTooLow {
            number,
            current: cur_number,
        });
    }
    if number > cur_number.saturating_add(MAX_HEIGHT_AHEAD) {
        return Err(ControllerError::HeightTooHigh {
            number,
            current: cur_number,
        });
    }
    Ok(())
}

/// Builder for ControllerManager
pub struct ControllerManagerBuilder {
    config: ElectionConfig,
    chain: Arc<dyn ChainReader>,
    notifier: Option<Arc<LeaderNotifier>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ControllerManagerBuilder {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self {
            config: ElectionConfig::default(),
            chain,
            notifier: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: ElectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<LeaderNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fails if the election config does not validate
    pub fn build(self) -> Result<ControllerManager, ConfigError> {
        ControllerManager::new(
            self.config,
            self.chain,
            self.notifier.unwrap_or_default(),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        )
    }
}
