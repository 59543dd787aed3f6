//! # Stage Module
//!
//! A *stage* is the batch of receipts the operator commits to the parent
//! chain in one root-hash submission. This module owns the pending pool,
//! the working and finalized ledgers, and the checkpoint state machine.
//!
//! ## Architecture
//!
//! ```text
//! lifecycle.rs — StageLifecycle: admission, checkpoint, commit, rollback, queries
//! ports.rs     — ParentChain and StageStore traits, StageRecord, RootHashes
//! chain.rs     — LoopbackParentChain, an in-process settlement contract
//! error.rs     — StageError and the client-facing ErrorCode
//! ```

pub mod chain;
pub mod error;
pub mod lifecycle;
pub mod ports;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use chain::LoopbackParentChain;
pub use error::{ErrorCategory, ErrorCode, StageError};
pub use lifecycle::{Checkpoint, InclusionProof, LifecycleStatus, StageLifecycle, StageOutcome};
pub use ports::{ChainError, ParentChain, RootHashes, StageRecord, StageStore};

/// Where the checkpoint state machine is.
///
/// `Committed` and `RolledBack` are outcomes: the lifecycle passes through
/// them and is back in `Idle` by the time the call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageState {
    Idle,
    Building,
    AwaitingCommit,
    Committed,
    RolledBack,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::AwaitingCommit => "awaitingCommit",
            Self::Committed => "committed",
            Self::RolledBack => "rolledBack",
        };
        f.write_str(name)
    }
}
