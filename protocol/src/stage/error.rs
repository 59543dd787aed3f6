//! Error types for the stage lifecycle.
//!
//! Every lifecycle operation that can fail returns a [`StageError`]. Each
//! variant maps to a stable [`ErrorCode`] (what clients see on the wire)
//! and an [`ErrorCategory`] (how the node decides whether to retry, reject,
//! or page someone).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ports::{ChainError, RootHashes};
use super::StageState;
use crate::ledger::LedgerError;
use crate::storage::DbError;
use crate::transaction::{LightTxError, VerificationError};
use crate::tree::{CodecError, TreeError};

/// Stable, client-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SomethingWentWrong,
    InvalidConfiguration,
    InvalidLightTx,
    ContainsKnownLightTx,
    StaleStageHeight,
    FutureStageHeight,
    WrongSignature,
    InsufficientBalance,
    ReceiptsAreEmpty,
    CheckpointInProgress,
    NoPendingCheckpoint,
    StageNotFound,
    ReceiptNotFound,
    RootHashMismatch,
    SubmissionFailed,
    ChainOutOfSync,
    StorageFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SomethingWentWrong => "SOMETHING_WENT_WRONG",
            Self::InvalidConfiguration => "INVALID_CONFIGURATION",
            Self::InvalidLightTx => "INVALID_LIGHT_TX",
            Self::ContainsKnownLightTx => "CONTAINS_KNOWN_LIGHT_TX",
            Self::StaleStageHeight => "STALE_STAGE_HEIGHT",
            Self::FutureStageHeight => "FUTURE_STAGE_HEIGHT",
            Self::WrongSignature => "WRONG_SIGNATURE",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::ReceiptsAreEmpty => "RECEIPTS_ARE_EMPTY",
            Self::CheckpointInProgress => "CHECKPOINT_IN_PROGRESS",
            Self::NoPendingCheckpoint => "NO_PENDING_CHECKPOINT",
            Self::StageNotFound => "STAGE_NOT_FOUND",
            Self::ReceiptNotFound => "RECEIPT_NOT_FOUND",
            Self::RootHashMismatch => "ROOT_HASH_MISMATCH",
            Self::SubmissionFailed => "SUBMISSION_FAILED",
            Self::ChainOutOfSync => "CHAIN_OUT_OF_SYNC",
            Self::StorageFailure => "STORAGE_FAILURE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    /// Bad tree height or other startup parameter.
    Configuration,
    /// Out-of-order or duplicate input.
    Sequencing,
    /// Malformed input or bad signatures.
    Validation,
    InsufficientBalance,
    /// Another checkpoint already owns the lifecycle.
    ConcurrencyConflict,
    /// Parent chain or storage failed.
    External,
}

/// Errors raised by [`StageLifecycle`](super::StageLifecycle).
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Contains known light transaction.")]
    KnownLightTx(String),

    #[error("stage height {stage_height} is stale, current stage is {expected}")]
    StaleStageHeight { stage_height: u64, expected: u64 },

    #[error("stage height {stage_height} is ahead of current stage {expected}")]
    FutureStageHeight { stage_height: u64, expected: u64 },

    #[error("Contains wrong signature receipt.")]
    WrongSignature(#[source] VerificationError),

    #[error("invalid light transaction: {0}")]
    InvalidLightTx(#[from] LightTxError),

    #[error("ledger rejected light transaction: {0}")]
    Ledger(#[source] LedgerError),

    #[error("Receipts are empty.")]
    ReceiptsAreEmpty,

    #[error("a checkpoint is already in progress (state: {0})")]
    CheckpointInProgress(StageState),

    #[error("no checkpoint is awaiting commit for stage {stage_height} (state: {state})")]
    NoPendingCheckpoint { stage_height: u64, state: StageState },

    #[error("stage {0} not found")]
    StageNotFound(u64),

    #[error("receipt {0} not found")]
    ReceiptNotFound(String),

    #[error("root hashes for stage {stage_height} do not match: local {local:?}, remote {remote:?}")]
    RootHashMismatch {
        stage_height: u64,
        local: RootHashes,
        remote: RootHashes,
    },

    #[error("replaying receipt {light_tx_hash} produced different balances")]
    ReplayDiverged { light_tx_hash: String },

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("tree codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("parent chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("parent chain is at stage {chain}, local committed height is {local}")]
    ChainOutOfSync { local: u64, chain: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl StageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::KnownLightTx(_) => ErrorCode::ContainsKnownLightTx,
            Self::StaleStageHeight { .. } => ErrorCode::StaleStageHeight,
            Self::FutureStageHeight { .. } => ErrorCode::FutureStageHeight,
            Self::WrongSignature(_) => ErrorCode::WrongSignature,
            Self::InvalidLightTx(_) => ErrorCode::InvalidLightTx,
            Self::Ledger(LedgerError::InsufficientBalance { .. }) => ErrorCode::InsufficientBalance,
            Self::Ledger(_) => ErrorCode::InvalidLightTx,
            Self::ReceiptsAreEmpty => ErrorCode::ReceiptsAreEmpty,
            Self::CheckpointInProgress(_) => ErrorCode::CheckpointInProgress,
            Self::NoPendingCheckpoint { .. } => ErrorCode::NoPendingCheckpoint,
            Self::StageNotFound(_) => ErrorCode::StageNotFound,
            Self::ReceiptNotFound(_) => ErrorCode::ReceiptNotFound,
            Self::RootHashMismatch { .. } => ErrorCode::RootHashMismatch,
            Self::Tree(TreeError::InvalidHeight(_)) => ErrorCode::InvalidConfiguration,
            Self::ReplayDiverged { .. } | Self::Tree(_) | Self::Codec(_) => {
                ErrorCode::SomethingWentWrong
            }
            Self::Chain(_) => ErrorCode::SubmissionFailed,
            Self::ChainOutOfSync { .. } => ErrorCode::ChainOutOfSync,
            Self::Storage(_) => ErrorCode::StorageFailure,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.code() {
            ErrorCode::InvalidConfiguration => ErrorCategory::Configuration,
            ErrorCode::ContainsKnownLightTx
            | ErrorCode::StaleStageHeight
            | ErrorCode::FutureStageHeight
            | ErrorCode::ReceiptsAreEmpty
            | ErrorCode::NoPendingCheckpoint
            | ErrorCode::StageNotFound
            | ErrorCode::ReceiptNotFound
            | ErrorCode::RootHashMismatch => ErrorCategory::Sequencing,
            ErrorCode::InvalidLightTx | ErrorCode::WrongSignature => ErrorCategory::Validation,
            ErrorCode::InsufficientBalance => ErrorCategory::InsufficientBalance,
            ErrorCode::CheckpointInProgress => ErrorCategory::ConcurrencyConflict,
            ErrorCode::SomethingWentWrong
            | ErrorCode::SubmissionFailed
            | ErrorCode::ChainOutOfSync
            | ErrorCode::StorageFailure => ErrorCategory::External,
        }
    }
}

impl From<LedgerError> for StageError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl From<VerificationError> for StageError {
    fn from(e: VerificationError) -> Self {
        Self::WrongSignature(e)
    }
}
