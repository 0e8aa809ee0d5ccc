//! The node's long-lived secp256k1 signing identity.
//!
//! A wallet is created once per process start and only read afterwards;
//! signing is a pure computation. On disk a wallet is three sibling files
//! (private key hex, public key hex, address hex) with mode `0o600`.

use crate::hash::keccak256;
use ethabi::Token;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use primitive_types::{H160, H256, U256};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use towns_core::{Err, Result, RiverError};

/// Default wallet directory.
pub const WALLET_PATH: &str = "./wallet";
/// Default private key file.
pub const WALLET_PATH_PRIVATE_KEY: &str = "./wallet/private_key";
/// Default public key file.
pub const WALLET_PATH_PUBLIC_KEY: &str = "./wallet/public_key";
/// Default node address file.
pub const WALLET_PATH_NODE_ADDRESS: &str = "./wallet/node_address";
/// Mode bits applied to every key file.
pub const KEY_FILE_PERMISSIONS: u32 = 0o600;

/// Long-lived secp256k1 keypair plus the derived node address. Immutable
/// once constructed.
pub struct Wallet {
    signing_key: SigningKey,
    address: H160,
}

impl Wallet {
    /// Generates a wallet from a uniformly random private key.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let address = address_of(signing_key.verifying_key());
        log::info!(
            "New wallet generated. address={} publicKey={}",
            checksum_hex(address),
            hex::encode(uncompressed_key(signing_key.verifying_key())),
        );
        Self { signing_key, address }
    }

    /// Imports a wallet from a hex-encoded private key, with or without a
    /// `0x` prefix.
    pub fn from_private_key(priv_key: &str) -> Result<Self> {
        let priv_key = priv_key.trim().strip_prefix("0x").unwrap_or_else(|| priv_key.trim());
        let bytes = hex::decode(priv_key).map_err(|err| {
            RiverError::with_base(Err::InvalidArgument, "failed to decode private key from hex", err)
                .func("from_private_key")
        })?;
        let signing_key = SigningKey::from_slice(&bytes).map_err(|err| {
            RiverError::with_base(Err::InvalidArgument, "invalid private key scalar", err)
                .func("from_private_key")
        })?;
        let address = address_of(signing_key.verifying_key());
        log::info!("Wallet loaded from configured private key. address={}", checksum_hex(address));
        Ok(Self { signing_key, address })
    }

    /// Imports a wallet from a named environment variable.
    pub fn from_env(env_var: &str) -> Result<Self> {
        let priv_key = std::env::var(env_var).map_err(|err| {
            RiverError::with_base(Err::BadConfig, "environment variable not set", err)
                .tag("variable", env_var)
                .func("from_env")
        })?;
        Self::from_private_key(&priv_key)
    }

    /// Loads a wallet from a hex-encoded private key file.
    pub fn load(filename: impl AsRef<Path>) -> Result<Self> {
        let filename = filename.as_ref();
        let contents = std::fs::read_to_string(filename).map_err(|err| {
            RiverError::with_base(Err::BadConfig, "failed to load wallet from file", err)
                .tag("filename", filename.display())
                .func("load_wallet")
        })?;
        Self::from_private_key(&contents).map_err(|err| {
            RiverError::with_base(Err::BadConfig, "failed to load wallet from file", err)
                .tag("filename", filename.display())
                .func("load_wallet")
        })
    }

    /// Persists the wallet as three sibling files. With `overwrite` unset,
    /// an existing file fails the save (exclusive create). A failure midway
    /// is reported and leaves the partial state on disk; callers treat a
    /// failed save as fatal.
    pub fn save(
        &self,
        private_key_filename: impl AsRef<Path>,
        public_key_filename: impl AsRef<Path>,
        address_filename: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<()> {
        let private_key_filename = private_key_filename.as_ref();
        let public_key_filename = public_key_filename.as_ref();
        let address_filename = address_filename.as_ref();

        let f_priv = open_key_file(private_key_filename, overwrite)?;
        let f_pub = open_key_file(public_key_filename, overwrite)?;
        let f_addr = open_key_file(address_filename, overwrite)?;

        write_key_file(f_priv, private_key_filename, &self.private_key_hex())?;
        write_key_file(
            f_pub,
            public_key_filename,
            &hex::encode(uncompressed_key(self.signing_key.verifying_key())),
        )?;
        write_key_file(f_addr, address_filename, &checksum_hex(self.address))?;

        log::info!(
            "Wallet saved. address={} filename={}",
            checksum_hex(self.address),
            private_key_filename.display(),
        );
        Ok(())
    }

    /// Signs a 32-byte digest, producing the 65-byte `r ‖ s ‖ v` form.
    pub fn sign_hash(&self, hash: H256) -> Result<[u8; 65]> {
        let (signature, recovery_id): (Signature, RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(hash.as_bytes())
            .map_err(|err| {
                RiverError::with_base(Err::Internal, "failed to sign hash", err).func("sign_hash")
            })?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }

    /// The node address derived from the public key.
    pub const fn address(&self) -> H160 {
        self.address
    }

    /// The 65-byte uncompressed public key, `0x04`-prefixed.
    pub fn public_key(&self) -> [u8; 65] {
        uncompressed_key(self.signing_key.verifying_key())
    }

    /// The private scalar as 64 hex chars, no prefix.
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&checksum_hex(self.address))
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet").field("address", &checksum_hex(self.address)).finish()
    }
}

/// Recovers the 65-byte uncompressed public key that produced `signature`
/// over the 32-byte `hash`.
pub fn recover_signer_public_key(hash: H256, signature: &[u8]) -> Result<[u8; 65]> {
    let recover = || -> std::result::Result<VerifyingKey, k256::ecdsa::Error> {
        let recovery_id = RecoveryId::from_byte(*signature.last().unwrap_or(&0xff))
            .ok_or_else(k256::ecdsa::Error::new)?;
        let signature = Signature::from_slice(&signature[..signature.len() - 1])?;
        VerifyingKey::recover_from_prehash(hash.as_bytes(), &signature, recovery_id)
    };
    if signature.len() != 65 {
        return Err(RiverError::new(Err::InvalidArgument, "signature must be 65 bytes")
            .tag("len", signature.len())
            .func("recover_signer_public_key"));
    }
    match recover() {
        Ok(key) => Ok(uncompressed_key(&key)),
        Err(err) => Err(RiverError::with_base(
            Err::InvalidArgument,
            "could not recover public key from signature",
            err,
        )
        .func("recover_signer_public_key")),
    }
}

/// `keccak256(public_key[1..])[12..]`: the address of a 65-byte uncompressed
/// public key.
pub fn public_key_to_address(public_key: &[u8]) -> H160 {
    let hash = keccak256(&public_key[1..]);
    H160::from_slice(&hash.as_bytes()[12..])
}

/// ABI-encodes `(address, uint256 nonce)` and hashes the 64-byte payload.
/// Binds a single-use nonce to a target address for EIP-191 signatures.
pub fn pack_with_nonce(address: H160, nonce: u64) -> Result<H256> {
    let packed = ethabi::encode(&[Token::Address(address), Token::Uint(U256::from(nonce))]);
    Ok(keccak256(&packed))
}

/// EIP-55 checksummed `0x…` rendering of an address.
pub fn checksum_hex(address: H160) -> String {
    let lower = hex::encode(address.as_bytes());
    let digest = hex::encode(keccak256(lower.as_bytes()).as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (nibble_index, mut character) in lower.chars().enumerate() {
        if character.is_alphabetic() && digest.as_bytes()[nibble_index] as char > '7' {
            character = character.to_ascii_uppercase();
        }
        out.push(character);
    }
    out
}

fn address_of(key: &VerifyingKey) -> H160 {
    public_key_to_address(&uncompressed_key(key))
}

fn uncompressed_key(key: &VerifyingKey) -> [u8; 65] {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; 65];
    out.copy_from_slice(point.as_bytes());
    out
}

fn open_key_file(path: &Path, overwrite: bool) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true);
    if overwrite {
        opts.create(true).truncate(true);
    } else {
        opts.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(KEY_FILE_PERMISSIONS);
    }
    opts.open(path).map_err(|err| {
        RiverError::with_base(Err::BadConfig, "failed to open key file", err)
            .tag("filename", path.display())
            .func("save_wallet")
    })
}

fn write_key_file(mut file: File, path: &Path, contents: &str) -> Result<()> {
    let io_err = |err: std::io::Error| {
        RiverError::with_base(Err::Internal, "failed to write key file", err)
            .tag("filename", path.display())
            .func("save_wallet")
    };
    file.write_all(contents.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const PRIV_KEY_ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn known_address_for_private_key_one() {
        let wallet = Wallet::from_private_key(PRIV_KEY_ONE).unwrap();
        assert_eq!(
            wallet.address(),
            H160::from(hex!("7e5f4552091a69125d5dfcb7b8c2659029395bdf"))
        );
        assert_eq!(wallet.to_string(), "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf");
    }

    #[test]
    fn hex_prefix_is_optional() {
        let with = Wallet::from_private_key(&format!("0x{PRIV_KEY_ONE}")).unwrap();
        let without = Wallet::from_private_key(PRIV_KEY_ONE).unwrap();
        assert_eq!(with.address(), without.address());
    }

    #[test]
    fn malformed_private_key_is_invalid_argument() {
        assert_eq!(
            Wallet::from_private_key("0xzz").unwrap_err().kind(),
            towns_core::Err::InvalidArgument
        );
        assert_eq!(
            Wallet::from_private_key("0011").unwrap_err().kind(),
            towns_core::Err::InvalidArgument
        );
    }

    #[test]
    fn address_matches_public_key_derivation() {
        let wallet = Wallet::generate();
        assert_eq!(public_key_to_address(&wallet.public_key()), wallet.address());
    }

    #[test]
    fn sign_and_recover_round_trip() {
        let wallet = Wallet::generate();
        let digest = keccak256(b"message");
        let signature = wallet.sign_hash(digest).unwrap();
        let recovered = recover_signer_public_key(digest, &signature).unwrap();
        assert_eq!(recovered, wallet.public_key());
        assert_eq!(public_key_to_address(&recovered), wallet.address());
    }

    #[test]
    fn recover_rejects_malformed_signatures() {
        let digest = keccak256(b"message");
        assert_eq!(
            recover_signer_public_key(digest, &[0u8; 64]).unwrap_err().kind(),
            towns_core::Err::InvalidArgument
        );
        let mut sig = [0u8; 65];
        sig[64] = 0x7f;
        assert_eq!(
            recover_signer_public_key(digest, &sig).unwrap_err().kind(),
            towns_core::Err::InvalidArgument
        );
    }

    #[test]
    fn private_key_round_trip() {
        let wallet = Wallet::generate();
        let reloaded = Wallet::from_private_key(&wallet.private_key_hex()).unwrap();
        assert_eq!(reloaded.private_key_hex(), wallet.private_key_hex());
        assert_eq!(reloaded.address(), wallet.address());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let priv_path = dir.path().join("private_key");
        let pub_path = dir.path().join("public_key");
        let addr_path = dir.path().join("node_address");

        let wallet = Wallet::generate();
        wallet.save(&priv_path, &pub_path, &addr_path, false).unwrap();

        let reloaded = Wallet::load(&priv_path).unwrap();
        assert_eq!(reloaded.private_key_hex(), wallet.private_key_hex());

        let private = std::fs::read_to_string(&priv_path).unwrap();
        assert_eq!(private.len(), 64);
        let public = std::fs::read_to_string(&pub_path).unwrap();
        assert_eq!(public.len(), 130);
        assert!(public.starts_with("04"));
        let address = std::fs::read_to_string(&addr_path).unwrap();
        assert_eq!(address, checksum_hex(wallet.address()));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&priv_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, KEY_FILE_PERMISSIONS);
        }
    }

    #[test]
    fn save_honors_overwrite_flag() {
        let dir = tempfile::tempdir().unwrap();
        let priv_path = dir.path().join("private_key");
        let pub_path = dir.path().join("public_key");
        let addr_path = dir.path().join("node_address");

        let wallet = Wallet::generate();
        wallet.save(&priv_path, &pub_path, &addr_path, false).unwrap();
        let err = wallet.save(&priv_path, &pub_path, &addr_path, false).unwrap_err();
        assert_eq!(err.kind(), towns_core::Err::BadConfig);
        wallet.save(&priv_path, &pub_path, &addr_path, true).unwrap();
    }

    #[test]
    fn load_missing_file_is_bad_config() {
        let err = Wallet::load("/nonexistent/wallet/private_key").unwrap_err();
        assert_eq!(err.kind(), towns_core::Err::BadConfig);
    }

    #[test]
    fn missing_env_var_is_bad_config() {
        let err = Wallet::from_env("TOWNS_TEST_WALLET_UNSET_VARIABLE").unwrap_err();
        assert_eq!(err.kind(), towns_core::Err::BadConfig);
    }

    #[test]
    fn pack_with_nonce_layout() {
        let address = H160::from(hex!("7e5f4552091a69125d5dfcb7b8c2659029395bdf"));
        let packed = pack_with_nonce(address, 7).unwrap();

        // (address, uint256) packs to two left-padded 32-byte words.
        let mut expected = [0u8; 64];
        expected[12..32].copy_from_slice(address.as_bytes());
        expected[63] = 7;
        assert_eq!(packed, keccak256(expected));
    }

    #[test]
    fn pack_with_nonce_abi_round_trip() {
        let address = H160::repeat_byte(0x42);
        let packed = ethabi::encode(&[Token::Address(address), Token::Uint(U256::from(99u64))]);
        let tokens = ethabi::decode(
            &[ethabi::ParamType::Address, ethabi::ParamType::Uint(256)],
            &packed,
        )
        .unwrap();
        assert_eq!(tokens[0], Token::Address(address));
        assert_eq!(tokens[1], Token::Uint(U256::from(99u64)));
    }
}
