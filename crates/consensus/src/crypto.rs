//! Recoverable secp256k1 signatures carrying a validity vote
//!
//! A signer marks a message as invalid by signing `hash + 1` instead of
//! `hash` and adding 2 to the recovery byte. Recovery bytes 0/1 therefore
//! mean "valid", 2/3 mean "invalid". Accounts are the last 20 bytes of the
//! Keccak-256 of the uncompressed public key.

use crate::error::VoteError;
use crate::types::{Address, Hash, Signature};
use k256::ecdsa::{RecoveryId, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

/// Recovers the signer of a vote
pub trait SignatureVerifier: Send + Sync {
    /// Signer account and whether the signer voted the message valid
    fn recover(&self, hash: &Hash, sign: &Signature) -> Result<(Address, bool), VoteError>;
}

/// secp256k1 recovery with the validity encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Verifier;

impl SignatureVerifier for Secp256k1Verifier {
    fn recover(&self, hash: &Hash, sign: &Signature) -> Result<(Address, bool), VoteError> {
        let bytes = sign.as_bytes();
        let (v, validate) = match bytes[64] {
            v @ 0..=1 => (v, true),
            v @ 2..=3 => (v - 2, false),
            v => {
                return Err(VoteError::InvalidSignature(format!(
                    "unexpected recovery id {}",
                    v
                )))
            }
        };
        let digest = if validate { *hash } else { increment_hash(hash) };

        let recid = RecoveryId::from_byte(v)
            .ok_or_else(|| VoteError::InvalidSignature(format!("bad recovery id {}", v)))?;
        let sig = k256::ecdsa::Signature::from_slice(&bytes[..64])
            .map_err(|e| VoteError::InvalidSignature(e.to_string()))?;
        let vk = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recid)
            .map_err(|e| VoteError::InvalidSignature(e.to_string()))?;
        Ok((pubkey_to_address(&vk), validate))
    }
}

/// secp256k1 signing key of a validator
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    pub fn generate() -> Self {
        Self(SigningKey::random(&mut rand::rngs::OsRng))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VoteError> {
        let key =
            SigningKey::from_slice(bytes).map_err(|e| VoteError::InvalidSignature(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn address(&self) -> Address {
        pubkey_to_address(self.0.verifying_key())
    }

    /// Sign `hash` and encode `validate` into the recovery byte
    pub fn sign_with_validate(&self, hash: &Hash, validate: bool) -> Result<Signature, VoteError> {
        let digest = if validate { *hash } else { increment_hash(hash) };
        let (sig, recid) = self
            .0
            .sign_prehash_recoverable(digest.as_bytes())
            .map_err(|e| VoteError::InvalidSignature(e.to_string()))?;

        let mut out = [0u8; Signature::LEN];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = if validate {
            recid.to_byte()
        } else {
            recid.to_byte() + 2
        };
        Ok(Signature(out))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({})", self.address())
    }
}

pub fn pubkey_to_address(vk: &VerifyingKey) -> Address {
    let point = vk.as_affine().to_encoded_point(false);
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}

/// `hash + 1` as a 256-bit big-endian integer, wrapping at the top
fn increment_hash(hash: &Hash) -> Hash {
    let mut out = *hash;
    for byte in out.0.iter_mut().rev() {
        let (next, carry) = byte.overflowing_add(1);
        *byte = next;
        if !carry {
            break;
        }
    }
    out
}
