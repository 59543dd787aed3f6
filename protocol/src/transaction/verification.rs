//! Signature verification for light transactions.
//!
//! Both slots must be filled. The server slot must recover to the operator
//! address. The client slot must recover to the account whose funds move
//! toward the chain's books: `to` for deposits, `from` for everything
//! else. The cheap presence checks run before any curve arithmetic.

use thiserror::Error;

use super::light_tx::LightTransaction;
use super::types::{LightTxSignature, LightTxType};
use crate::crypto::signatures::{
    address_to_field, eth_signed_message_hash_hex, recover_address, SignatureError,
};

/// Why a light transaction's signatures were refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The client slot is `{}`.
    #[error("missing client signature")]
    MissingClientSignature,

    /// The server slot is `{}`.
    #[error("missing server signature")]
    MissingServerSignature,

    /// The client signature recovered to someone other than the expected
    /// account.
    #[error("client signature recovers to {recovered}, expected {expected}")]
    ClientSignerMismatch { expected: String, recovered: String },

    /// The server signature was not produced by the operator.
    #[error("server signature recovers to {recovered}, expected operator {expected}")]
    ServerSignerMismatch { expected: String, recovered: String },

    /// Recovery itself failed.
    #[error("signature recovery failed: {0}")]
    Recovery(#[from] SignatureError),
}

/// Check both signature slots of `tx`.
///
/// `operator_address` is the 64-char padded operator field.
pub fn verify_signatures(tx: &LightTransaction, operator_address: &str) -> Result<(), VerificationError> {
    let sigs = tx.signatures();
    let client = sigs
        .client
        .as_ref()
        .ok_or(VerificationError::MissingClientSignature)?;
    let server = sigs
        .server
        .as_ref()
        .ok_or(VerificationError::MissingServerSignature)?;

    let prehash = eth_signed_message_hash_hex(tx.light_tx_hash())?;

    let expected_client = match tx.kind() {
        LightTxType::Deposit => &tx.data().to,
        LightTxType::Withdrawal | LightTxType::InstantWithdrawal | LightTxType::Remittance => {
            &tx.data().from
        }
    };
    let recovered = recover_field(&prehash, client)?;
    if recovered != *expected_client {
        return Err(VerificationError::ClientSignerMismatch {
            expected: expected_client.clone(),
            recovered,
        });
    }

    let recovered = recover_field(&prehash, server)?;
    if recovered != operator_address {
        return Err(VerificationError::ServerSignerMismatch {
            expected: operator_address.to_string(),
            recovered,
        });
    }

    Ok(())
}

fn recover_field(prehash: &[u8; 32], sig: &LightTxSignature) -> Result<String, SignatureError> {
    let address = recover_address(prehash, &sig.to_recoverable()?)?;
    Ok(address_to_field(&address))
}
