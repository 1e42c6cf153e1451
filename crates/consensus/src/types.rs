//! Core types shared by leader rotation, turn timing and vote aggregation

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// 20-byte account address, serialized as a `0x` hex string in JSON
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Build an address from the trailing 20 bytes of `bytes`
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut addr = [0u8; 20];
        let len = bytes.len().min(20);
        addr[20 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
        Address(addr)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut addr = [0u8; 20];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut addr)?;
        Ok(Address(addr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// 32-byte digest
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
    Serialize, Deserialize,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn is_empty(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short form used in log lines
    pub fn terminal_string(&self) -> String {
        let full = hex::encode(self.0);
        format!("{}…{}", &full[..6], &full[58..])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.terminal_string())
    }
}

/// Role of a node in the topology
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize,
    Deserialize,
)]
pub enum RoleType {
    #[default]
    Nil,
    Miner,
    Validator,
    Broadcast,
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoleType::Nil => "nil",
            RoleType::Miner => "miner",
            RoleType::Validator => "validator",
            RoleType::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

/// A validator entry in the topology
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Validator {
    /// Deposit account of the validator
    pub account: Address,
    /// Position in the topology graph
    pub position: u16,
    /// Role recorded in the topology
    pub role: RoleType,
}

impl Validator {
    pub fn new(account: Address, position: u16) -> Self {
        Self {
            account,
            position,
            role: RoleType::Validator,
        }
    }
}

/// Ordered, position-stable validator list. Order defines rotation order.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<Validator>) -> Self {
        Self { validators }
    }

    /// Build a set from bare accounts, assigning positions in order
    pub fn from_accounts(accounts: impl IntoIterator<Item = Address>) -> Self {
        let validators = accounts
            .into_iter()
            .enumerate()
            .map(|(i, account)| Validator::new(account, i as u16))
            .collect();
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    /// Index of `account` in rotation order
    pub fn position_of(&self, account: &Address) -> Option<usize> {
        self.validators.iter().position(|v| v.account == *account)
    }

    pub fn contains(&self, account: &Address) -> bool {
        self.position_of(account).is_some()
    }
}

/// Slice of a block header read by the leader election core
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Header {
    /// Block height
    pub number: u64,
    /// Hash of this header
    pub hash: Hash,
    /// Hash of the parent header
    pub parent_hash: Hash,
    /// Leader that produced this block
    pub leader: Address,
    /// Block timestamp (unix seconds)
    pub time: i64,
}

impl Header {
    /// Create a header and compute its hash
    pub fn new(number: u64, parent_hash: Hash, leader: Address, time: i64) -> Self {
        let mut header = Self {
            number,
            hash: Hash::ZERO,
            parent_hash,
            leader,
            time,
        };
        header.hash = header.compute_hash();
        header
    }

    /// Hash over every field except `hash` itself
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.number.to_le_bytes());
        hasher.update(self.parent_hash.as_bytes());
        hasher.update(self.leader.as_bytes());
        hasher.update(&self.time.to_le_bytes());
        Hash(*hasher.finalize().as_bytes())
    }
}

/// Acting leader for a turn and the leader that takes over next
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaderAssignment {
    pub leader: Address,
    pub next_leader: Address,
}

/// Round state of a height
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusState {
    /// Nothing started for this height yet
    #[default]
    Idle,
    /// Assigned leader is within its proposing window
    Pos,
    /// Proposing window expired, fallback reelection in progress
    Reelect,
    /// A proposal was accepted for the round
    Mining,
}

impl fmt::Display for ConsensusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsensusState::Idle => "idle",
            ConsensusState::Pos => "pos",
            ConsensusState::Reelect => "reelect",
            ConsensusState::Mining => "mining",
        };
        f.write_str(name)
    }
}

/// Leader identity announcement published on every round transition
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct LeaderChangeNotify {
    /// `false` exactly while the height is in reelection
    pub consensus_state: bool,
    /// Leader the rotation was offset from
    pub pre_leader: Address,
    pub leader: Address,
    pub next_leader: Address,
    pub number: u64,
    pub consensus_turn: u32,
    pub reelect_turn: u32,
    /// Begin time of the consensus turn (unix seconds)
    pub turn_begin_time: i64,
    /// End of the POS window of the consensus turn (unix seconds)
    pub turn_end_time: i64,
}

impl LeaderChangeNotify {
    /// Digest validators sign when voting on this transition
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.number.to_le_bytes());
        hasher.update(&self.consensus_turn.to_le_bytes());
        hasher.update(&self.reelect_turn.to_le_bytes());
        hasher.update(self.leader.as_bytes());
        hasher.update(self.next_leader.as_bytes());
        hasher.update(&[self.consensus_state as u8]);
        hasher.update(&self.turn_begin_time.to_le_bytes());
        hasher.update(&self.turn_end_time.to_le_bytes());
        Hash(*hasher.finalize().as_bytes())
    }

    /// Serialize for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("LeaderChangeNotify serialization should not fail")
    }

    /// Deserialize from network
    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Raw 65-byte recoverable signature: `r || s || v`
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    pub const LEN: usize = 65;

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 65] = bytes.try_into().ok()?;
        Some(Signature(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.0))
    }
}

/// A signature together with what recovery learned about it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedSign {
    pub sign: Signature,
    /// Recovered signer
    pub account: Address,
    /// Whether the signer voted the message valid (recovery byte 0/1)
    pub validate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_slice_takes_tail() {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(&[7u8; 20]);
        bytes[0] = 0xff;
        assert_eq!(Address::from_slice(&bytes), Address([7u8; 20]));
    }

    #[test]
    fn test_address_json_is_hex() {
        let addr = Address([0xab; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(20)));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), addr);
        assert!("0x1234".parse::<Address>().is_err());
    }

    #[test]
    fn test_validator_set_positions() {
        let set = ValidatorSet::from_accounts([Address([1; 20]), Address([2; 20])]);
        assert_eq!(set.position_of(&Address([2; 20])), Some(1));
        assert_eq!(set.get(1).unwrap().position, 1);
        assert!(!set.contains(&Address([3; 20])));
    }

    #[test]
    fn test_header_hash_covers_leader() {
        let a = Header::new(5, Hash([1; 32]), Address([1; 20]), 100);
        let b = Header::new(5, Hash([1; 32]), Address([2; 20]), 100);
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.hash, a.compute_hash());
    }

    #[test]
    fn test_notify_wire_format() {
        let notify = LeaderChangeNotify {
            consensus_state: true,
            pre_leader: Address([9; 20]),
            leader: Address([1; 20]),
            next_leader: Address([2; 20]),
            number: 42,
            consensus_turn: 3,
            reelect_turn: 1,
            turn_begin_time: 1_000,
            turn_end_time: 1_020,
        };
        let decoded = LeaderChangeNotify::from_bytes(&notify.to_bytes()).unwrap();
        assert_eq!(decoded, notify);
        assert_eq!(decoded.compute_hash(), notify.compute_hash());
    }
}
