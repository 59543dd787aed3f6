//! # Transaction Module
//!
//! Light transactions are the only way value moves on the child chain.
//! This module turns a client payload into a canonical, hashed
//! [`LightTransaction`], checks its signatures, and seals the result into
//! a [`Receipt`] once the ledger has accepted it.
//!
//! ## Architecture
//!
//! ```text
//! types.rs        — LightTxType, signature slots, 64-hex field encoding
//! light_tx.rs     — Fixed-schema parsing, normalization, hashing, signing
//! verification.rs — Client/server signature recovery checks
//! receipt.rs      — Immutable post-application receipts
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Parse**: [`LightTransaction::from_json_str`] normalizes every field.
//! 2. **Sign**: the client fills `clientLightTx`, the operator fills
//!    `serverLightTx`.
//! 3. **Verify**: [`verify_signatures`] recovers both signers.
//! 4. **Apply**: the ledger mutates balances; a [`Receipt`] is sealed with
//!    the next GSN.

pub mod light_tx;
pub mod receipt;
pub mod types;
pub mod verification;

pub use light_tx::{address_field, LightTransaction, LightTxData, LightTxError, LightTxPayload, ProposalEvent, Signatures};
pub use receipt::Receipt;
pub use types::{field_to_u256, u256_to_field, LightTxSignature, LightTxType, ProposalKind};
pub use verification::{verify_signatures, VerificationError};
