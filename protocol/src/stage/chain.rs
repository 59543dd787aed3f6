//! In-process model of the settlement contract.
//!
//! Accepts root submissions strictly in stage order, keeps them in memory
//! and hands back a deterministic transaction hash. Devnet nodes and tests
//! run against it instead of a real parent chain.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::ports::{ChainError, ParentChain, RootHashes};
use crate::crypto::hash::hash_concat;

#[derive(Debug, Default)]
pub struct LoopbackParentChain {
    stages: RwLock<BTreeMap<u64, RootHashes>>,
    fail_next: AtomicBool,
}

impl LoopbackParentChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from roots already accepted in an earlier run, so a restarted
    /// node keeps submitting at the right height.
    pub fn with_history<I>(stages: I) -> Self
    where
        I: IntoIterator<Item = (u64, RootHashes)>,
    {
        Self {
            stages: RwLock::new(stages.into_iter().collect()),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next submission fail as if the chain were unreachable.
    pub fn fail_next_submission(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of stages accepted so far.
    pub async fn accepted_stages(&self) -> usize {
        self.stages.read().await.len()
    }
}

#[async_trait]
impl ParentChain for LoopbackParentChain {
    async fn stage_height(&self) -> Result<u64, ChainError> {
        Ok(self
            .stages
            .read()
            .await
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    async fn submit_root_hashes(
        &self,
        stage_height: u64,
        roots: &RootHashes,
        signed_tx: &str,
    ) -> Result<String, ChainError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            warn!(stage_height, "loopback chain dropping submission");
            return Err(ChainError::Unavailable("injected failure".into()));
        }
        if signed_tx.is_empty() {
            return Err(ChainError::Rejected("empty signed transaction".into()));
        }

        let mut stages = self.stages.write().await;
        let current = stages.keys().next_back().copied().unwrap_or(0);
        if stage_height != current + 1 {
            return Err(ChainError::Rejected(format!(
                "expected stage {}, got {stage_height}",
                current + 1
            )));
        }
        stages.insert(stage_height, roots.clone());

        let stage_field = format!("{stage_height:064x}");
        let tx_hash = hash_concat([
            signed_tx,
            stage_field.as_str(),
            roots.receipt_root.as_str(),
            roots.account_root.as_deref().unwrap_or(""),
        ]);
        debug!(stage_height, %tx_hash, "loopback chain accepted roots");
        Ok(tx_hash)
    }

    async fn root_hashes(&self, stage_height: u64) -> Result<Option<RootHashes>, ChainError> {
        Ok(self.stages.read().await.get(&stage_height).cloned())
    }
}
