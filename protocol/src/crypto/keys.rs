//! # secp256k1 Keypairs
//!
//! The operator countersigns every light transaction with its own key, and
//! clients sign theirs. The node only ever *recovers* addresses, but the
//! operator tooling, benches and tests need to produce signatures, so the
//! signing side lives here too.

use std::fmt;

use k256::ecdsa::SigningKey;

use super::hash::strip_hex_prefix;
use super::signatures::{
    address_of, address_to_field, eth_signed_message_hash_hex, RecoverableSignature,
    SignatureError,
};

/// A secp256k1 signing key with Ethereum address derivation.
#[derive(Clone)]
pub struct EthKeypair {
    signing_key: SigningKey,
}

impl EthKeypair {
    /// Generate a fresh random keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Load from a 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
        Ok(Self { signing_key })
    }

    /// Load from a hex-encoded secret, `0x` optional.
    pub fn from_secret_hex(secret: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(strip_hex_prefix(secret))
            .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignatureError::SigningFailed("secret must be 32 bytes".into()))?;
        Self::from_secret_bytes(&bytes)
    }

    /// The 20-byte Ethereum address.
    pub fn address(&self) -> [u8; 20] {
        address_of(self.signing_key.verifying_key())
    }

    /// The address as 40 hex chars.
    pub fn address_hex(&self) -> String {
        hex::encode(self.address())
    }

    /// The address padded to the 64-char light transaction field width.
    pub fn address_field(&self) -> String {
        address_to_field(&self.address())
    }

    /// Sign a 32-byte prehash. `v` is returned in the legacy 27/28 form.
    pub fn sign_prehash(&self, prehash: &[u8; 32]) -> Result<RecoverableSignature, SignatureError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(prehash)
            .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        Ok(RecoverableSignature {
            v: 27 + recovery_id.to_byte(),
            r,
            s,
        })
    }

    /// `eth_sign` a hex digest, the way wallets sign a `lightTxHash`.
    pub fn sign_digest_hex(&self, digest_hex: &str) -> Result<RecoverableSignature, SignatureError> {
        let prehash = eth_signed_message_hash_hex(digest_hex)?;
        self.sign_prehash(&prehash)
    }
}

impl fmt::Debug for EthKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthKeypair")
            .field("address", &self.address_hex())
            .finish_non_exhaustive()
    }
}
