//! Read access to the persisted chain

use crate::error::{ElectionError, Result};
use crate::types::{Hash, Header, ValidatorSet};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Lookups the election core needs from the block store
pub trait ChainReader: Send + Sync {
    fn header_by_number(&self, number: u64) -> Result<Header>;

    /// Validator set in force after block `number` was applied
    fn validators_by_number(&self, number: u64) -> Result<ValidatorSet>;
}

#[derive(Debug, Default)]
struct ChainInner {
    headers: HashMap<u64, Header>,
    validators: HashMap<u64, ValidatorSet>,
    head: Option<u64>,
}

/// In-memory chain, used by the local node and in tests
#[derive(Debug, Default)]
pub struct MemoryChain {
    inner: RwLock<ChainInner>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header together with the validator set it leaves in force
    pub fn insert(&self, header: Header, validators: ValidatorSet) {
        let mut inner = self.inner.write();
        let number = header.number;
        inner.headers.insert(number, header);
        inner.validators.insert(number, validators);
        if inner.head.map_or(true, |head| number > head) {
            inner.head = Some(number);
        }
    }

    pub fn current_header(&self) -> Option<Header> {
        let inner = self.inner.read();
        inner.head.and_then(|n| inner.headers.get(&n).cloned())
    }

    pub fn current_number(&self) -> Option<u64> {
        self.inner.read().head
    }

    pub fn head_hash(&self) -> Hash {
        self.current_header().map(|h| h.hash).unwrap_or(Hash::ZERO)
    }
}

impl ChainReader for MemoryChain {
    fn header_by_number(&self, number: u64) -> Result<Header> {
        self.inner
            .read()
            .headers
            .get(&number)
            .cloned()
            .ok_or_else(|| ElectionError::Chain(format!("header {} not found", number)))
    }

    fn validators_by_number(&self, number: u64) -> Result<ValidatorSet> {
        self.inner
            .read()
            .validators
            .get(&number)
            .cloned()
            .ok_or_else(|| ElectionError::Chain(format!("validators at {} not found", number)))
    }
}
