//! Concurrent pool of verified votes keyed by (signer, message hash)

use crate::clock::Clock;
use crate::config::VotePoolConfig;
use crate::crypto::SignatureVerifier;
use crate::error::VoteError;
use crate::pool::TimedPool;
use crate::types::{Address, Hash, Signature, VerifiedSign};
use parking_lot::RwLock;
use std::sync::Arc;

/// Vote cache bounded by age and per-signer count
pub struct VotePool {
    pool: RwLock<TimedPool<Address, Hash, VerifiedSign>>,
    verifier: Arc<dyn SignatureVerifier>,
    clock: Arc<dyn Clock>,
    /// Prefix for log lines, names the pool's owner
    log_info: String,
}

impl VotePool {
    pub fn new(
        config: VotePoolConfig,
        verifier: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn Clock>,
        log_info: impl Into<String>,
    ) -> Self {
        Self {
            pool: RwLock::new(TimedPool::new(
                config.timeout_ms,
                config.account_vote_count_limit,
            )),
            verifier,
            clock,
            log_info: log_info.into(),
        }
    }

    /// Verify and store a vote.
    ///
    /// The recovered signer must match `from_account` when `verify_from` is
    /// set. A (signer, hash) pair already in the pool is rejected and the
    /// stored vote kept as is.
    pub fn add_vote(
        &self,
        sign_hash: Hash,
        sign: Signature,
        from_account: Address,
        height: u64,
        verify_from: bool,
    ) -> Result<(), VoteError> {
        let (signer, validate) = self.verifier.recover(&sign_hash, &sign)?;
        if verify_from && signer != from_account {
            return Err(VoteError::SignerMismatch {
                signer,
                from: from_account,
            });
        }

        let vote = VerifiedSign {
            sign,
            account: signer,
            validate,
        };

        let mut pool = self.pool.write();
        let now = self.clock.now_millis();
        let Some(evicted) = pool.insert(signer, sign_hash, vote, now) else {
            tracing::warn!(
                "[{}] Vote already exists, hash {} from {}",
                self.log_info,
                sign_hash.terminal_string(),
                signer
            );
            return Err(VoteError::Duplicate {
                signer,
                hash: sign_hash,
            });
        };

        tracing::debug!(
            "[{}] Vote added at height {}: hash {} from {} ({} votes from signer)",
            self.log_info,
            height,
            sign_hash.terminal_string(),
            signer,
            pool.signer_count(&signer)
        );
        if evicted.by_timeout > 0 || evicted.by_count > 0 {
            tracing::debug!(
                "[{}] Evicted {} timed out and {} over-limit votes",
                self.log_info,
                evicted.by_timeout,
                evicted.by_count
            );
        }
        Ok(())
    }

    /// All votes for `sign_hash`
    pub fn get_votes(&self, sign_hash: &Hash) -> Vec<VerifiedSign> {
        self.pool.read().values_for_key(sign_hash).copied().collect()
    }

    /// Drop every signer's vote for `sign_hash`
    pub fn del_votes(&self, sign_hash: &Hash) {
        if sign_hash.is_empty() {
            return;
        }
        let removed = self.pool.write().remove_key(sign_hash);
        if removed > 0 {
            tracing::debug!(
                "[{}] Deleted {} votes for {}",
                self.log_info,
                removed,
                sign_hash.terminal_string()
            );
        }
    }

    pub fn clear(&self) {
        self.pool.write().clear();
    }

    pub fn len(&self) -> usize {
        self.pool.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.read().is_empty()
    }

    pub fn signer_vote_count(&self, signer: &Address) -> usize {
        self.pool.read().signer_count(signer)
    }

    /// Millisecond timestamp the pool recorded for a vote
    pub fn vote_time(&self, signer: &Address, sign_hash: &Hash) -> Option<i64> {
        self.pool.read().insert_time(signer, sign_hash)
    }
}
