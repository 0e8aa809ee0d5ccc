//! Hashing and signing primitives for the Towns node: domain-separated
//! Keccak-256 framings and the long-lived secp256k1 node identity.
#![deny(missing_docs)]

pub mod hash;
pub mod wallet;

pub use hash::{
    eth_message_hash, keccak256, river_delegate_hash_src, to_eth_message_hash, TownsHash,
};
pub use wallet::{
    checksum_hex, pack_with_nonce, public_key_to_address, recover_signer_public_key, Wallet,
};
