//! # Signature Recovery
//!
//! Light transactions carry Ethereum-style recoverable ECDSA signatures over
//! secp256k1. We never verify against a known public key; instead we
//! recover the signer's address from `(digest, v, r, s)` and compare it to
//! the address the transaction claims.
//!
//! Signers sign with `eth_sign` semantics, so the digest handed to the
//! curve is not the light transaction hash itself but
//! `keccak256("\x19Ethereum Signed Message:\n32" ++ raw_hash_bytes)`.
//! [`eth_signed_message_hash`] builds that.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use thiserror::Error;

use super::hash::{keccak256, strip_hex_prefix};
use crate::config::{ETH_SIGNED_MESSAGE_PREFIX, FIELD_HEX_LEN};

/// Errors during signature decoding or recovery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// `v` is not one of 0, 1, 27, 28.
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u64),

    /// `r` or `s` is not 32 bytes of hex.
    #[error("invalid signature component `{component}`: {reason}")]
    InvalidComponent {
        component: &'static str,
        reason: String,
    },

    /// The digest is not a 32-byte hex string.
    #[error("invalid message digest: {0}")]
    InvalidDigest(String),

    /// `(r, s)` is not a valid signature on the curve.
    #[error("malformed signature")]
    Malformed,

    /// No public key could be recovered from the signature.
    #[error("public key recovery failed")]
    RecoveryFailed,

    /// Signing with a local key failed.
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// A recoverable ECDSA signature in Ethereum's `(v, r, s)` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl RecoverableSignature {
    /// Decode from the textual form clients send: `v` as an integer and
    /// `r`/`s` as 32-byte hex strings with or without `0x`.
    pub fn from_parts(v: u64, r: &str, s: &str) -> Result<Self, SignatureError> {
        let v = match v {
            0 | 1 | 27 | 28 => v as u8,
            other => return Err(SignatureError::InvalidRecoveryId(other)),
        };
        Ok(Self {
            v,
            r: decode_component("r", r)?,
            s: decode_component("s", s)?,
        })
    }

    /// Recovery id normalized to 0 or 1.
    pub fn recovery_byte(&self) -> u8 {
        if self.v >= 27 {
            self.v - 27
        } else {
            self.v
        }
    }

    /// `r ++ s` as 64 raw bytes.
    pub fn rs_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r);
        out[32..].copy_from_slice(&self.s);
        out
    }
}

fn decode_component(component: &'static str, text: &str) -> Result<[u8; 32], SignatureError> {
    let raw = strip_hex_prefix(text.trim());
    let padded = format!("{raw:0>64}");
    let bytes = hex::decode(&padded).map_err(|e| SignatureError::InvalidComponent {
        component,
        reason: e.to_string(),
    })?;
    bytes
        .try_into()
        .map_err(|_| SignatureError::InvalidComponent {
            component,
            reason: format!("expected at most 64 hex chars, got {}", raw.len()),
        })
}

/// Wrap a 32-byte digest in the `eth_sign` envelope and hash it.
pub fn eth_signed_message_hash(digest: &[u8; 32]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(ETH_SIGNED_MESSAGE_PREFIX.len() + 32);
    buf.extend_from_slice(ETH_SIGNED_MESSAGE_PREFIX);
    buf.extend_from_slice(digest);
    keccak256(&buf)
}

/// Same as [`eth_signed_message_hash`] for a hex digest such as a
/// `lightTxHash`.
pub fn eth_signed_message_hash_hex(digest_hex: &str) -> Result<[u8; 32], SignatureError> {
    let bytes = hex::decode(strip_hex_prefix(digest_hex))
        .map_err(|e| SignatureError::InvalidDigest(e.to_string()))?;
    let digest: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SignatureError::InvalidDigest(digest_hex.to_string()))?;
    Ok(eth_signed_message_hash(&digest))
}

/// Recover the 20-byte Ethereum address that produced `sig` over
/// `prehash`.
pub fn recover_address(
    prehash: &[u8; 32],
    sig: &RecoverableSignature,
) -> Result<[u8; 20], SignatureError> {
    let recovery_id =
        RecoveryId::from_byte(sig.recovery_byte()).ok_or(SignatureError::InvalidRecoveryId(sig.v as u64))?;
    let signature = Signature::from_slice(&sig.rs_bytes()).map_err(|_| SignatureError::Malformed)?;

    let key = VerifyingKey::recover_from_prehash(prehash, &signature, recovery_id)
        .map_err(|_| SignatureError::RecoveryFailed)?;

    Ok(address_of(&key))
}

/// Derive the Ethereum address of a public key: the last 20 bytes of the
/// Keccak-256 of the uncompressed point without its `0x04` tag.
pub fn address_of(key: &VerifyingKey) -> [u8; 20] {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Left-pad a 20-byte address to the 64-hex-char field width used by light
/// transactions.
pub fn address_to_field(address: &[u8; 20]) -> String {
    format!("{:0>width$}", hex::encode(address), width = FIELD_HEX_LEN)
}
