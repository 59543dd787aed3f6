//! Collaborators the lifecycle talks to but does not own: the parent-chain
//! contract and the persistence backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::BalanceLedger;
use crate::storage::DbError;
use crate::transaction::Receipt;
use crate::tree::{CodecError, IndexedMerkleTree, TreeSnapshot, TrustedSnapshot};

/// The roots a stage commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootHashes {
    #[serde(rename = "receiptRootHash")]
    pub receipt_root: String,
    /// `None` when the deployment does not commit an account tree.
    #[serde(rename = "accountRootHash", default)]
    pub account_root: Option<String>,
}

impl RootHashes {
    pub fn new(receipt_root: impl Into<String>, account_root: Option<String>) -> Self {
        Self {
            receipt_root: receipt_root.into(),
            account_root,
        }
    }
}

// ---------------------------------------------------------------------------
// Parent chain
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The contract refused the submission.
    #[error("parent chain rejected submission: {0}")]
    Rejected(String),

    /// The chain could not be reached.
    #[error("parent chain unavailable: {0}")]
    Unavailable(String),
}

/// The settlement contract on the parent chain.
#[async_trait]
pub trait ParentChain: Send + Sync {
    /// Highest stage the contract has accepted.
    async fn stage_height(&self) -> Result<u64, ChainError>;

    /// Broadcast an operator-signed root submission. Returns the parent
    /// chain transaction hash.
    async fn submit_root_hashes(
        &self,
        stage_height: u64,
        roots: &RootHashes,
        signed_tx: &str,
    ) -> Result<String, ChainError>;

    /// Roots the contract holds for `stage_height`, if any.
    async fn root_hashes(&self, stage_height: u64) -> Result<Option<RootHashes>, ChainError>;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Everything persisted for a committed stage.
///
/// Only ever read back from the node's own store, which is why the trees
/// are restored without rehashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage_height: u64,
    pub roots: RootHashes,
    /// GSNs of the receipts in this stage, ascending.
    pub gsns: Vec<u64>,
    pub light_tx_hashes: Vec<String>,
    /// Parent-chain transaction that carried the roots.
    pub parent_tx_hash: Option<String>,
    pub committed_at: DateTime<Utc>,
    receipt_tree: TreeSnapshot,
    account_tree: Option<TreeSnapshot>,
}

impl StageRecord {
    pub fn new(
        stage_height: u64,
        roots: RootHashes,
        receipts: &[Receipt],
        parent_tx_hash: Option<String>,
        receipt_tree: &IndexedMerkleTree,
        account_tree: Option<&IndexedMerkleTree>,
    ) -> Self {
        Self {
            stage_height,
            roots,
            gsns: receipts.iter().map(Receipt::gsn).collect(),
            light_tx_hashes: receipts
                .iter()
                .map(|r| r.light_tx_hash().to_string())
                .collect(),
            parent_tx_hash,
            committed_at: Utc::now(),
            receipt_tree: receipt_tree.export(),
            account_tree: account_tree.map(IndexedMerkleTree::export),
        }
    }

    pub fn receipt_count(&self) -> usize {
        self.light_tx_hashes.len()
    }

    pub fn receipt_tree(&self) -> Result<IndexedMerkleTree, CodecError> {
        IndexedMerkleTree::restore_trusted(TrustedSnapshot::new(self.receipt_tree.clone()))
    }

    pub fn account_tree(&self) -> Result<Option<IndexedMerkleTree>, CodecError> {
        self.account_tree
            .clone()
            .map(|s| IndexedMerkleTree::restore_trusted(TrustedSnapshot::new(s)))
            .transpose()
    }

    /// The raw receipt tree export, for handing to external auditors.
    pub fn receipt_snapshot(&self) -> &TreeSnapshot {
        &self.receipt_tree
    }
}

/// Durable state behind the lifecycle.
///
/// `put_pending_receipt` and `save_stage` must each be atomic: a crash
/// leaves either all of a call's writes or none of them.
pub trait StageStore: Send + Sync {
    /// Highest committed stage, 0 before the first commit.
    fn committed_height(&self) -> Result<u64, DbError>;

    /// Highest GSN ever issued, 0 if none.
    fn last_gsn(&self) -> Result<u64, DbError>;

    /// Highest stage ever captured for a checkpoint, 0 if none. May be one
    /// ahead of `committed_height` while a checkpoint is unfinished.
    fn captured_height(&self) -> Result<u64, DbError>;

    /// Durably record that `stage_height` has been captured. Admissions
    /// for it are closed from here on, across restarts.
    fn set_captured_height(&self, stage_height: u64) -> Result<(), DbError>;

    fn load_stage(&self, stage_height: u64) -> Result<Option<StageRecord>, DbError>;

    /// Persist a committed stage together with the new finalized
    /// balances, advance the committed height and drop the stage's
    /// receipts from the pending set.
    fn save_stage(&self, record: &StageRecord, finalized: &BalanceLedger) -> Result<(), DbError>;

    /// Record a freshly admitted receipt as pending.
    fn put_pending_receipt(&self, receipt: &Receipt) -> Result<(), DbError>;

    /// Pending receipts in GSN order.
    fn list_pending_receipts(&self) -> Result<Vec<Receipt>, DbError>;

    /// Any receipt ever admitted, pending or committed.
    fn get_receipt(&self, light_tx_hash: &str) -> Result<Option<Receipt>, DbError>;

    fn finalized_balances(&self) -> Result<BalanceLedger, DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_hashes_wire_names() {
        let roots = RootHashes::new("aa", Some("bb".into()));
        let json = serde_json::to_value(&roots).unwrap();
        assert_eq!(json["receiptRootHash"], "aa");
        assert_eq!(json["accountRootHash"], "bb");

        let back: RootHashes = serde_json::from_str(r#"{"receiptRootHash":"aa"}"#).unwrap();
        assert_eq!(back, RootHashes::new("aa", None));
    }

    #[test]
    fn record_restores_trees() {
        let tree = IndexedMerkleTree::build(
            4,
            1,
            &[crate::tree::LeafEntry::new("r1", "r1", "")],
        )
        .unwrap();
        let roots = RootHashes::new(tree.root_digest(), None);
        let record = StageRecord::new(1, roots, &[], None, &tree, None);
        let restored = record.receipt_tree().unwrap();
        assert_eq!(restored.root_digest(), tree.root_digest());
        assert!(record.account_tree().unwrap().is_none());

        let bytes = bincode::serialize(&record).unwrap();
        let back: StageRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, record);
    }
}
