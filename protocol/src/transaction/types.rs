//! Core type definitions for light transactions.
//!
//! Every amount, counter and address in a light transaction is carried as
//! a 64-character lowercase hex string: a 256-bit big-endian integer, or a
//! 20-byte address left-padded with zeros. Arithmetic happens on
//! [`U256`]; the hex form is what gets hashed and stored.

use std::fmt;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::crypto::hash::strip_hex_prefix;
use crate::crypto::signatures::{RecoverableSignature, SignatureError};
use crate::config::FIELD_HEX_LEN;

// ---------------------------------------------------------------------------
// LightTxType
// ---------------------------------------------------------------------------

/// What a light transaction does to the ledger, derived from its endpoints
/// and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LightTxType {
    /// `from` is the zero address: funds enter the child chain.
    Deposit,
    /// `to` is the zero address and the value exceeds the instant limit.
    Withdrawal,
    /// `to` is the zero address and the value is at or below the instant
    /// limit.
    InstantWithdrawal,
    /// Both endpoints are accounts.
    Remittance,
}

impl fmt::Display for LightTxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::Withdrawal => write!(f, "withdrawal"),
            Self::InstantWithdrawal => write!(f, "instantWithdrawal"),
            Self::Remittance => write!(f, "remittance"),
        }
    }
}

/// Kinds of parent-chain proposal events that turn into light
/// transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProposalKind {
    Deposit,
    Withdrawal,
}

// ---------------------------------------------------------------------------
// LightTxSignature
// ---------------------------------------------------------------------------

/// A complete `{v, r, s}` signature slot. `r` and `s` are stored as 64
/// lowercase hex chars without prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightTxSignature {
    pub v: u8,
    pub r: String,
    pub s: String,
}

impl LightTxSignature {
    pub fn to_recoverable(&self) -> Result<RecoverableSignature, SignatureError> {
        RecoverableSignature::from_parts(self.v as u64, &self.r, &self.s)
    }
}

impl From<RecoverableSignature> for LightTxSignature {
    fn from(sig: RecoverableSignature) -> Self {
        Self {
            v: sig.v,
            r: hex::encode(sig.r),
            s: hex::encode(sig.s),
        }
    }
}

// ---------------------------------------------------------------------------
// Field encoding
// ---------------------------------------------------------------------------

/// Encode a 256-bit integer as 64 lowercase hex chars.
pub fn u256_to_field(value: &U256) -> String {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    hex::encode(buf)
}

/// Decode a hex field (with or without `0x`, at most 64 chars) to a
/// 256-bit integer.
pub fn field_to_u256(field: &str) -> Option<U256> {
    let raw = strip_hex_prefix(field);
    if raw.is_empty() || raw.len() > FIELD_HEX_LEN || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let padded = format!("{raw:0>64}");
    let bytes = hex::decode(padded).ok()?;
    Some(U256::from_big_endian(&bytes))
}

/// `true` if every char of the field is `0`.
pub fn is_zero_field(field: &str) -> bool {
    field.bytes().all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_encoding_is_fixed_width() {
        assert_eq!(u256_to_field(&U256::zero()), "0".repeat(64));
        let hundred = u256_to_field(&U256::from(100u64));
        assert_eq!(hundred.len(), 64);
        assert!(hundred.ends_with("64"));
        assert_eq!(u256_to_field(&U256::MAX), "f".repeat(64));
    }

    #[test]
    fn field_decoding_round_trip() {
        let v = U256::from(123_456_789u64) * U256::exp10(18);
        assert_eq!(field_to_u256(&u256_to_field(&v)), Some(v));
        assert_eq!(field_to_u256("0x64"), Some(U256::from(100u64)));
        assert_eq!(field_to_u256("FF"), Some(U256::from(255u64)));
    }

    #[test]
    fn field_decoding_rejects_garbage() {
        assert_eq!(field_to_u256(""), None);
        assert_eq!(field_to_u256("0x"), None);
        assert_eq!(field_to_u256("xyz"), None);
        assert_eq!(field_to_u256(&"1".repeat(65)), None);
    }

    #[test]
    fn zero_field_detection() {
        assert!(is_zero_field(&"0".repeat(64)));
        assert!(!is_zero_field(&format!("{}1", "0".repeat(63))));
    }

    #[test]
    fn type_display_matches_wire_names() {
        assert_eq!(LightTxType::InstantWithdrawal.to_string(), "instantWithdrawal");
        assert_eq!(
            serde_json::to_string(&LightTxType::InstantWithdrawal).unwrap(),
            "\"instantWithdrawal\""
        );
    }

    #[test]
    fn signature_slot_from_recoverable() {
        let sig = RecoverableSignature {
            v: 28,
            r: [1u8; 32],
            s: [2u8; 32],
        };
        let slot = LightTxSignature::from(sig);
        assert_eq!(slot.r, "01".repeat(32));
        assert_eq!(slot.to_recoverable().unwrap(), sig);
    }
}
