//! Leader change notification bus
//!
//! Controllers publish here, the dispatch layer subscribes.

use crate::types::LeaderChangeNotify;
use parking_lot::RwLock;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Default, Clone)]
pub struct NotifierStats {
    pub published: u64,
    /// Publishes that found no subscriber
    pub dropped: u64,
    pub last_number: u64,
}

pub struct LeaderNotifier {
    tx: broadcast::Sender<LeaderChangeNotify>,
    stats: RwLock<NotifierStats>,
}

impl LeaderNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            stats: RwLock::new(NotifierStats::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeaderChangeNotify> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notify: &LeaderChangeNotify) {
        let mut stats = self.stats.write();
        stats.last_number = notify.number;
        match self.tx.send(notify.clone()) {
            Ok(n) => {
                stats.published += 1;
                tracing::debug!(
                    "Leader notify for height {} turn {}/{} sent to {} subscribers",
                    notify.number,
                    notify.consensus_turn,
                    notify.reelect_turn,
                    n
                );
            }
            Err(_) => {
                // No subscribers
                stats.dropped += 1;
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn stats(&self) -> NotifierStats {
        self.stats.read().clone()
    }
}

impl Default for LeaderNotifier {
    fn default() -> Self {
        Self::new()
    }
}
