//! Domain-separated deterministic hashing.
//!
//! Every hash domain absorbs its 8-byte tag, the buffer length as a
//! little-endian u64, a fixed separator, the buffer and a fixed footer. The
//! length framing and delimiters make the encoding injective, so a collision
//! across domains requires a Keccak-256 collision. The tag byte sequences
//! are compatibility-critical and must not drift.

use primitive_types::H256;
use sha3::{Digest, Keccak256};
use towns_core::{Err, Result, RiverError};

/// String 'ABCDEFG>' as bytes.
pub const HASH_SEPARATOR: [u8; 8] = [65, 66, 67, 68, 69, 70, 71, 62];

/// String '<GFEDCBA' as bytes.
pub const HASH_FOOTER: [u8; 8] = [60, 71, 70, 69, 68, 67, 66, 65];

/// String 'RIVERSIG' as bytes.
pub const DELEGATE_HASH_HEADER: [u8; 8] = [82, 73, 86, 69, 82, 83, 73, 71];

/// A hasher with a fixed 8-byte domain tag. Distinct tags are used for
/// distinct hash types to rule out replays between domains.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TownsHash([u8; 8]);

impl TownsHash {
    /// Event payload hashing ('CSBLANCA').
    pub const EVENTS: Self = Self(*b"CSBLANCA");

    /// Snapshot hashing ('SNAPSHOT').
    pub const SNAPSHOTS: Self = Self(*b"SNAPSHOT");

    /// Node-to-node mTLS certificate fingerprints ('INTRCERT').
    pub const CERT: Self = Self(*b"INTRCERT");

    /// Computes the domain hash of `buffer`.
    pub fn hash(self, buffer: &[u8]) -> H256 {
        let mut hasher = Keccak256::new();
        hasher.update(self.0);
        hasher.update((buffer.len() as u64).to_le_bytes());
        hasher.update(HASH_SEPARATOR);
        hasher.update(buffer);
        hasher.update(HASH_FOOTER);
        H256(hasher.finalize().into())
    }
}

/// Plain Keccak-256.
pub fn keccak256(data: impl AsRef<[u8]>) -> H256 {
    let hash: [u8; 32] = Keccak256::digest(data).into();
    H256(hash)
}

/// The byte sequence a root wallet signs to authorize a delegate key until
/// `expiry_epoch_ms`. The result is not itself a hash; callers typically run
/// it through [`eth_message_hash`] before signing or recovery.
pub fn river_delegate_hash_src(
    delegate_public_key: &[u8],
    expiry_epoch_ms: i64,
) -> Result<Vec<u8>> {
    if expiry_epoch_ms < 0 {
        return Err(RiverError::new(Err::InvalidArgument, "expiryEpochMs must be non-negative"));
    }
    if delegate_public_key.len() != 64 && delegate_public_key.len() != 65 {
        return Err(RiverError::new(
            Err::InvalidArgument,
            "delegatePublicKey must be 64 or 65 bytes",
        )
        .tag("len", delegate_public_key.len()));
    }
    let mut src = Vec::with_capacity(8 + delegate_public_key.len() + 8);
    src.extend_from_slice(&DELEGATE_HASH_HEADER);
    src.extend_from_slice(delegate_public_key);
    src.extend_from_slice(&expiry_epoch_ms.to_le_bytes());
    Ok(src)
}

/// Keccak-256 of `msg` under Ethereum's personal-message framing. Applied
/// before recovery on externally-produced signatures.
pub fn eth_message_hash(msg: &[u8]) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(msg.len().to_string().as_bytes());
    hasher.update(msg);
    H256(hasher.finalize().into())
}

/// [`eth_message_hash`] of a 32-byte digest.
pub fn to_eth_message_hash(message_hash: H256) -> H256 {
    eth_message_hash(message_hash.as_bytes())
}
