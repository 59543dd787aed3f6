//! # Stage Lifecycle
//!
//! The single writer of the child chain. Admits light transactions into the
//! pending pool, turns the pool into a committed stage, and answers balance
//! and inclusion queries.
//!
//! ```text
//!   Idle ──checkpoint──▶ Building ──trees ready──▶ AwaitingCommit
//!    ▲                     │                          │        │
//!    │                  (empty /                   commit   rollback /
//!    │                 diverged)                      │      mismatch
//!    └─────────────────────┴────────── Idle ◀─────────┴────────┘
//! ```
//!
//! ## Ledgers
//!
//! Two ledgers are kept. The *working* ledger answers admission and
//! balance queries and always equals `finalized + pending`. The *finalized*
//! ledger only moves on commit: building replays the captured receipts on a
//! copy of it, and that copy replaces it when the parent chain confirms the
//! roots. A rollback just discards the copy and puts the receipts back at
//! the front of the pool.
//!
//! ## Stage heights
//!
//! Admissions target the *open* stage. Capturing stage `N` opens `N + 1`;
//! a rollback of `N` leaves `N + 1` open and `N` is retried with the same
//! receipts. Pending receipts are therefore always a run of stage `N`
//! followed by a run of stage `N + 1`, in GSN order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::StageError;
use super::ports::{ChainError, ParentChain, RootHashes, StageRecord, StageStore};
use super::StageState;
use crate::config::StageConfig;
use crate::ledger::BalanceLedger;
use crate::transaction::{address_field, verify_signatures, LightTransaction, Receipt};
use crate::tree::{validate_height, IndexedMerkleTree, LeafEntry};

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// Result of a successful checkpoint request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub stage_height: u64,
    pub roots: RootHashes,
    pub receipt_count: usize,
    pub max_collision: usize,
    pub average_collision: f64,
    pub build_millis: u64,
}

/// How the last in-flight stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum StageOutcome {
    #[serde(rename_all = "camelCase")]
    Committed {
        stage_height: u64,
        parent_tx_hash: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RolledBack { stage_height: u64, reason: String },
}

impl StageOutcome {
    pub fn state(&self) -> StageState {
        match self {
            Self::Committed { .. } => StageState::Committed,
            Self::RolledBack { .. } => StageState::RolledBack,
        }
    }
}

/// Snapshot of the lifecycle for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStatus {
    pub state: StageState,
    pub committed_height: u64,
    pub open_stage: u64,
    pub in_flight_stage: Option<u64>,
    pub pending_receipts: usize,
    pub next_gsn: u64,
    pub account_count: usize,
    pub last_outcome: Option<StageOutcome>,
}

/// Inclusion proof of one receipt in a stage's receipt tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    pub stage_height: u64,
    pub light_tx_hash: String,
    pub receipt_hash: String,
    pub tree_node_index: usize,
    /// `[l0, r0, l1, r1, …, root]`.
    pub slice: Vec<String>,
    /// Every receipt hash sharing the leaf, in insertion order.
    pub receipt_hash_array: Vec<String>,
    pub root: String,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct BuiltStage {
    stage_height: u64,
    receipts: Vec<Receipt>,
    staged: BalanceLedger,
    receipt_tree: IndexedMerkleTree,
    account_tree: Option<IndexedMerkleTree>,
    roots: RootHashes,
}

enum Phase {
    Idle,
    Building {
        stage_height: u64,
        light_tx_hashes: Vec<String>,
    },
    AwaitingCommit(Box<BuiltStage>),
}

impl Phase {
    fn state(&self) -> StageState {
        match self {
            Self::Idle => StageState::Idle,
            Self::Building { .. } => StageState::Building,
            Self::AwaitingCommit(_) => StageState::AwaitingCommit,
        }
    }

    fn in_flight_stage(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Building { stage_height, .. } => Some(*stage_height),
            Self::AwaitingCommit(built) => Some(built.stage_height),
        }
    }
}

struct Inner {
    phase: Phase,
    committed_height: u64,
    open_stage: u64,
    next_gsn: u64,
    pending: VecDeque<Receipt>,
    working: BalanceLedger,
    finalized: BalanceLedger,
    last_outcome: Option<StageOutcome>,
}

impl Inner {
    fn check_stage(&self, stage_height: u64) -> Result<(), StageError> {
        let expected = self.open_stage;
        if stage_height < expected {
            return Err(StageError::StaleStageHeight {
                stage_height,
                expected,
            });
        }
        if stage_height > expected {
            return Err(StageError::FutureStageHeight {
                stage_height,
                expected,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StageLifecycle
// ---------------------------------------------------------------------------

/// Owner of the pending pool, both ledgers and the in-flight stage.
///
/// All mutation goes through one mutex, which is never held across an
/// `.await`. Tree building runs outside the lock so admissions for the next
/// stage continue while a checkpoint is being built.
pub struct StageLifecycle {
    config: StageConfig,
    store: Arc<dyn StageStore>,
    inner: Mutex<Inner>,
}

impl StageLifecycle {
    /// Recover the lifecycle from `store`.
    ///
    /// Reloads the committed height and finalized balances, replays every
    /// pending receipt onto the working ledger and resumes GSN numbering.
    /// A stage captured before the restart stays closed to admissions.
    pub fn open(config: StageConfig, store: Arc<dyn StageStore>) -> Result<Self, StageError> {
        validate_height(config.tree_height)?;

        let committed_height = store.committed_height()?;
        let captured_height = store.captured_height()?;
        let finalized = store.finalized_balances()?;
        let pending: VecDeque<Receipt> = store.list_pending_receipts()?.into();

        let mut working = finalized.clone();
        for receipt in &pending {
            replay(&mut working, receipt)?;
        }

        let open_stage = pending
            .iter()
            .map(|r| r.light_tx().stage_height())
            .max()
            .unwrap_or(0)
            .max(committed_height + 1)
            .max(captured_height + 1);
        let next_gsn = store.last_gsn()? + 1;

        info!(
            committed_height,
            captured_height,
            open_stage,
            pending = pending.len(),
            next_gsn,
            accounts = working.account_count(),
            "stage lifecycle recovered"
        );

        Ok(Self {
            config,
            store,
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                committed_height,
                open_stage,
                next_gsn,
                pending,
                working,
                finalized,
                last_outcome: None,
            }),
        })
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn state(&self) -> StageState {
        self.inner.lock().phase.state()
    }

    pub fn committed_height(&self) -> u64 {
        self.inner.lock().committed_height
    }

    /// Stage new light transactions must target.
    pub fn open_stage(&self) -> u64 {
        self.inner.lock().open_stage
    }

    pub fn status(&self) -> LifecycleStatus {
        let inner = self.inner.lock();
        LifecycleStatus {
            state: inner.phase.state(),
            committed_height: inner.committed_height,
            open_stage: inner.open_stage,
            in_flight_stage: inner.phase.in_flight_stage(),
            pending_receipts: inner.pending.len(),
            next_gsn: inner.next_gsn,
            account_count: inner.working.account_count(),
            last_outcome: inner.last_outcome.clone(),
        }
    }

    // -- Admission ---------------------------------------------------------

    /// Admit a signed light transaction.
    ///
    /// Checks run in a fixed order: duplicate, stage height, signatures,
    /// balance. Nothing is mutated unless all of them pass, and the receipt
    /// is persisted before the working ledger moves.
    pub fn submit(&self, tx: LightTransaction) -> Result<Receipt, StageError> {
        let light_tx_hash = tx.light_tx_hash().to_string();
        let stage_height = tx.stage_height();

        // Cheap checks first so a replayed payload never costs a recovery.
        self.check_known(&light_tx_hash)?;
        self.inner.lock().check_stage(stage_height)?;
        verify_signatures(&tx, &self.config.operator_address)?;

        let mut inner = self.inner.lock();
        self.check_known(&light_tx_hash)?;
        inner.check_stage(stage_height)?;

        let change = inner.working.preview(&tx)?;
        let receipt = Receipt::new(tx, inner.next_gsn, change.from_balance, change.to_balance);
        self.store.put_pending_receipt(&receipt)?;
        inner.working.apply(receipt.light_tx())?;
        inner.next_gsn += 1;
        inner.pending.push_back(receipt.clone());

        debug!(
            light_tx_hash = %light_tx_hash,
            gsn = receipt.gsn(),
            stage_height,
            kind = %receipt.light_tx().kind(),
            "light transaction admitted"
        );
        Ok(receipt)
    }

    fn check_known(&self, light_tx_hash: &str) -> Result<(), StageError> {
        if self.store.get_receipt(light_tx_hash)?.is_some() {
            return Err(StageError::KnownLightTx(light_tx_hash.to_string()));
        }
        Ok(())
    }

    // -- Checkpoint --------------------------------------------------------

    /// Capture the pending receipts of `committed + 1` and build the stage.
    ///
    /// Fails fast with `CheckpointInProgress` if another stage is in flight
    /// and with `ReceiptsAreEmpty` if there is nothing to capture.
    pub fn request_checkpoint(&self) -> Result<Checkpoint, StageError> {
        let (stage_height, receipts, base) = {
            let mut inner = self.inner.lock();
            if !matches!(inner.phase, Phase::Idle) {
                return Err(StageError::CheckpointInProgress(inner.phase.state()));
            }
            let stage_height = inner.committed_height + 1;
            let count = inner
                .pending
                .iter()
                .take_while(|r| r.light_tx().stage_height() == stage_height)
                .count();
            if count == 0 {
                return Err(StageError::ReceiptsAreEmpty);
            }

            if inner.open_stage == stage_height {
                self.store.set_captured_height(stage_height)?;
                inner.open_stage += 1;
            }
            let receipts: Vec<Receipt> = inner.pending.drain(..count).collect();
            inner.phase = Phase::Building {
                stage_height,
                light_tx_hashes: receipts
                    .iter()
                    .map(|r| r.light_tx_hash().to_string())
                    .collect(),
            };
            (stage_height, receipts, inner.finalized.clone())
        };

        info!(stage_height, receipts = receipts.len(), "building stage");
        let started = Instant::now();

        match self.build(stage_height, &receipts, base) {
            Ok((staged, receipt_tree, account_tree)) => {
                let roots = RootHashes::new(
                    receipt_tree.root_digest(),
                    account_tree.as_ref().map(|t| t.root_digest().to_string()),
                );
                let checkpoint = Checkpoint {
                    stage_height,
                    roots: roots.clone(),
                    receipt_count: receipts.len(),
                    max_collision: receipt_tree.max_collision_count(),
                    average_collision: receipt_tree.average_collision_count(),
                    build_millis: started.elapsed().as_millis() as u64,
                };
                self.inner.lock().phase = Phase::AwaitingCommit(Box::new(BuiltStage {
                    stage_height,
                    receipts,
                    staged,
                    receipt_tree,
                    account_tree,
                    roots,
                }));
                info!(
                    stage_height,
                    receipt_root = %checkpoint.roots.receipt_root,
                    build_millis = checkpoint.build_millis,
                    "stage awaiting commit"
                );
                Ok(checkpoint)
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                for receipt in receipts.into_iter().rev() {
                    inner.pending.push_front(receipt);
                }
                inner.phase = Phase::Idle;
                warn!(stage_height, error = %e, "stage build failed, receipts returned to pool");
                Err(e)
            }
        }
    }

    fn build(
        &self,
        stage_height: u64,
        receipts: &[Receipt],
        mut staged: BalanceLedger,
    ) -> Result<(BalanceLedger, IndexedMerkleTree, Option<IndexedMerkleTree>), StageError> {
        for receipt in receipts {
            replay(&mut staged, receipt)?;
        }

        let entries: Vec<LeafEntry> = receipts
            .iter()
            .map(|r| LeafEntry::new(r.receipt_hash(), r.receipt_hash(), ""))
            .collect();
        let receipt_tree = IndexedMerkleTree::build(self.config.tree_height, stage_height, &entries)?;

        let account_tree = if self.config.commit_account_tree {
            let entries: Vec<LeafEntry> = staged
                .account_entries()
                .into_iter()
                .map(|(address, balance)| LeafEntry::new(address.clone(), address, balance))
                .collect();
            Some(IndexedMerkleTree::build(
                self.config.tree_height,
                stage_height,
                &entries,
            )?)
        } else {
            None
        };

        debug!(
            stage_height,
            max_collision = receipt_tree.max_collision_count(),
            accounts = staged.account_count(),
            "stage trees built"
        );
        Ok((staged, receipt_tree, account_tree))
    }

    // -- Commit / rollback -------------------------------------------------

    /// Finalize the in-flight stage once `onchain` roots are known.
    ///
    /// A root mismatch rolls the stage back. A storage failure leaves the
    /// stage awaiting commit so the call can be retried.
    pub fn commit(
        &self,
        stage_height: u64,
        onchain: &RootHashes,
        parent_tx_hash: Option<String>,
    ) -> Result<StageRecord, StageError> {
        let mut inner = self.inner.lock();
        let built = match std::mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::AwaitingCommit(built) if built.stage_height == stage_height => *built,
            other => {
                let state = other.state();
                inner.phase = other;
                return Err(StageError::NoPendingCheckpoint {
                    stage_height,
                    state,
                });
            }
        };

        if built.roots != *onchain {
            let err = StageError::RootHashMismatch {
                stage_height,
                local: built.roots.clone(),
                remote: onchain.clone(),
            };
            roll_back(&mut inner, built, err.to_string());
            return Err(err);
        }

        let record = StageRecord::new(
            stage_height,
            built.roots.clone(),
            &built.receipts,
            parent_tx_hash.clone(),
            &built.receipt_tree,
            built.account_tree.as_ref(),
        );
        if let Err(e) = self.store.save_stage(&record, &built.staged) {
            warn!(stage_height, error = %e, "persisting stage failed, still awaiting commit");
            inner.phase = Phase::AwaitingCommit(Box::new(built));
            return Err(e.into());
        }

        inner.finalized = built.staged;
        inner.committed_height = stage_height;
        inner.last_outcome = Some(StageOutcome::Committed {
            stage_height,
            parent_tx_hash,
        });
        info!(
            stage_height,
            receipts = record.receipt_count(),
            receipt_root = %record.roots.receipt_root,
            "stage committed"
        );
        Ok(record)
    }

    /// Abandon the in-flight stage and return its receipts to the pool.
    pub fn rollback(&self, stage_height: u64, reason: &str) -> Result<(), StageError> {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::AwaitingCommit(built) if built.stage_height == stage_height => {
                roll_back(&mut inner, *built, reason.to_string());
                Ok(())
            }
            other => {
                let state = other.state();
                inner.phase = other;
                Err(StageError::NoPendingCheckpoint {
                    stage_height,
                    state,
                })
            }
        }
    }

    /// Roots of the stage currently awaiting commit.
    pub fn awaiting_roots(&self, stage_height: u64) -> Result<RootHashes, StageError> {
        let inner = self.inner.lock();
        match &inner.phase {
            Phase::AwaitingCommit(built) if built.stage_height == stage_height => {
                Ok(built.roots.clone())
            }
            other => Err(StageError::NoPendingCheckpoint {
                stage_height,
                state: other.state(),
            }),
        }
    }

    /// Submit operator-signed roots to the parent chain and commit.
    ///
    /// Any failure rolls the stage back and is returned. See
    /// [`publish_roots`](Self::publish_roots) for the parent-chain half.
    pub async fn attach(
        &self,
        stage_height: u64,
        signed: &RootHashes,
        signed_tx: &str,
        chain: &dyn ParentChain,
    ) -> Result<StageRecord, StageError> {
        let (onchain, parent_tx_hash) = self
            .publish_roots(stage_height, signed, signed_tx, chain)
            .await?;
        self.commit(stage_height, &onchain, parent_tx_hash)
    }

    /// Put the in-flight stage's roots on the parent chain and read them
    /// back, returning the recorded roots and the submission hash.
    ///
    /// The signed roots must equal the local ones. If the chain already
    /// holds identical roots for the stage (a retry after a crash between
    /// submission and commit) nothing is resubmitted and the hash is
    /// `None`. Any failure rolls the stage back and is returned.
    pub async fn publish_roots(
        &self,
        stage_height: u64,
        signed: &RootHashes,
        signed_tx: &str,
        chain: &dyn ParentChain,
    ) -> Result<(RootHashes, Option<String>), StageError> {
        let local = self.awaiting_roots(stage_height)?;
        if local != *signed {
            let err = StageError::RootHashMismatch {
                stage_height,
                local,
                remote: signed.clone(),
            };
            return Err(self.fail_attach(stage_height, err));
        }

        let parent_tx_hash = match chain.root_hashes(stage_height).await {
            Ok(Some(existing)) if existing == local => {
                info!(stage_height, "roots already on parent chain, skipping submission");
                None
            }
            Ok(_) => match chain.submit_root_hashes(stage_height, &local, signed_tx).await {
                Ok(tx_hash) => Some(tx_hash),
                Err(e) => return Err(self.fail_attach(stage_height, e.into())),
            },
            Err(e) => return Err(self.fail_attach(stage_height, e.into())),
        };

        match chain.root_hashes(stage_height).await {
            Ok(Some(onchain)) => Ok((onchain, parent_tx_hash)),
            Ok(None) => {
                let err = ChainError::Rejected(format!("no roots recorded for stage {stage_height}"));
                Err(self.fail_attach(stage_height, err.into()))
            }
            Err(e) => Err(self.fail_attach(stage_height, e.into())),
        }
    }

    /// Line local state up with the parent chain's stage height.
    ///
    /// A chain one stage ahead of the committed height holds roots whose
    /// commit never landed here. That stage is closed to admissions so the
    /// next checkpoint rebuilds exactly what was submitted. Any other gap
    /// fails with `ChainOutOfSync`.
    pub async fn reconcile(&self, chain: &dyn ParentChain) -> Result<(), StageError> {
        let chain_height = chain.stage_height().await?;

        let mut inner = self.inner.lock();
        let local = inner.committed_height;
        if chain_height == local {
            return Ok(());
        }
        if chain_height != local + 1 {
            return Err(StageError::ChainOutOfSync {
                local,
                chain: chain_height,
            });
        }
        if inner.open_stage <= chain_height {
            self.store.set_captured_height(chain_height)?;
            inner.open_stage = chain_height + 1;
            warn!(
                stage_height = chain_height,
                "parent chain holds an uncommitted stage, closed it to admissions"
            );
        }
        Ok(())
    }

    fn fail_attach(&self, stage_height: u64, err: StageError) -> StageError {
        if let Err(rollback_err) = self.rollback(stage_height, &err.to_string()) {
            warn!(stage_height, error = %rollback_err, "rollback after failed attach did not apply");
        }
        err
    }

    // -- Queries -----------------------------------------------------------

    /// Working balance of `address` (any accepted form).
    pub fn balance(&self, address: &str) -> Result<U256, StageError> {
        let field = address_field(address)?;
        Ok(self.inner.lock().working.get_balance(&field))
    }

    /// Balance as of the last committed stage.
    pub fn finalized_balance(&self, address: &str) -> Result<U256, StageError> {
        let field = address_field(address)?;
        Ok(self.inner.lock().finalized.get_balance(&field))
    }

    pub fn receipt(&self, light_tx_hash: &str) -> Result<Receipt, StageError> {
        self.store
            .get_receipt(light_tx_hash)?
            .ok_or_else(|| StageError::ReceiptNotFound(light_tx_hash.to_string()))
    }

    /// Hashes of every admitted but uncommitted transaction, in-flight
    /// stage first.
    pub fn pending_light_tx_hashes(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let in_flight: Vec<String> = match &inner.phase {
            Phase::Idle => Vec::new(),
            Phase::Building {
                light_tx_hashes, ..
            } => light_tx_hashes.clone(),
            Phase::AwaitingCommit(built) => built
                .receipts
                .iter()
                .map(|r| r.light_tx_hash().to_string())
                .collect(),
        };
        in_flight
            .into_iter()
            .chain(inner.pending.iter().map(|r| r.light_tx_hash().to_string()))
            .collect()
    }

    pub fn stage_record(&self, stage_height: u64) -> Result<StageRecord, StageError> {
        self.store
            .load_stage(stage_height)?
            .ok_or(StageError::StageNotFound(stage_height))
    }

    /// Roots of a committed stage, or of the stage awaiting commit.
    pub fn stage_roots(&self, stage_height: u64) -> Result<RootHashes, StageError> {
        if let Ok(roots) = self.awaiting_roots(stage_height) {
            return Ok(roots);
        }
        Ok(self.stage_record(stage_height)?.roots)
    }

    /// Inclusion proof for a light transaction's receipt in `stage_height`.
    pub fn proof(&self, stage_height: u64, light_tx_hash: &str) -> Result<InclusionProof, StageError> {
        let receipt = self.receipt(light_tx_hash)?;
        let receipt_hash = receipt.receipt_hash().to_string();

        self.with_receipt_tree(stage_height, |tree| {
            let receipt_hash_array = tree.user_ciphertexts_of(&receipt_hash).to_vec();
            if !receipt_hash_array.contains(&receipt_hash) {
                return Err(StageError::ReceiptNotFound(light_tx_hash.to_string()));
            }
            let slice = tree.extract_proof(&receipt_hash);
            Ok(InclusionProof {
                stage_height,
                light_tx_hash: light_tx_hash.to_string(),
                receipt_hash: receipt_hash.clone(),
                tree_node_index: slice.leaf_index,
                slice: slice.to_flat(),
                receipt_hash_array,
                root: tree.root_digest().to_string(),
            })
        })
    }

    fn with_receipt_tree<T>(
        &self,
        stage_height: u64,
        f: impl FnOnce(&IndexedMerkleTree) -> Result<T, StageError>,
    ) -> Result<T, StageError> {
        {
            let inner = self.inner.lock();
            if let Phase::AwaitingCommit(built) = &inner.phase {
                if built.stage_height == stage_height {
                    return f(&built.receipt_tree);
                }
            }
        }
        let tree = self.stage_record(stage_height)?.receipt_tree()?;
        f(&tree)
    }
}

/// Apply a stored receipt and check the ledger agrees with what it recorded.
fn replay(ledger: &mut BalanceLedger, receipt: &Receipt) -> Result<(), StageError> {
    let diverged = || StageError::ReplayDiverged {
        light_tx_hash: receipt.light_tx_hash().to_string(),
    };
    let change = ledger.apply(receipt.light_tx()).map_err(|_| diverged())?;
    if change.from_balance != receipt.from_balance() || change.to_balance != receipt.to_balance() {
        return Err(diverged());
    }
    Ok(())
}

fn roll_back(inner: &mut Inner, built: BuiltStage, reason: String) {
    let stage_height = built.stage_height;
    let returned = built.receipts.len();
    for receipt in built.receipts.into_iter().rev() {
        inner.pending.push_front(receipt);
    }
    inner.phase = Phase::Idle;
    warn!(stage_height, returned, reason = %reason, "stage rolled back");
    inner.last_outcome = Some(StageOutcome::RolledBack {
        stage_height,
        reason,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::EthKeypair;
    use crate::stage::{ErrorCode, LoopbackParentChain};
    use crate::storage::SettlementDb;
    use crate::transaction::LightTxData;

    struct Fixture {
        operator: EthKeypair,
        alice: EthKeypair,
        bob: EthKeypair,
        db: Arc<SettlementDb>,
        lifecycle: StageLifecycle,
    }

    fn config(operator: &EthKeypair) -> StageConfig {
        StageConfig {
            tree_height: 8,
            commit_account_tree: true,
            operator_address: operator.address_field(),
        }
    }

    fn fixture() -> Fixture {
        let operator = EthKeypair::generate();
        let db = Arc::new(SettlementDb::open_temporary().unwrap());
        let lifecycle = StageLifecycle::open(config(&operator), db.clone()).unwrap();
        Fixture {
            operator,
            alice: EthKeypair::generate(),
            bob: EthKeypair::generate(),
            db,
            lifecycle,
        }
    }

    impl Fixture {
        fn signed(&self, client: &EthKeypair, from: &str, to: &str, value: &str, lsn: u64, stage: u64) -> LightTransaction {
            let data = LightTxData::new(from, to, value, "0", &lsn.to_string(), &stage.to_string()).unwrap();
            let mut tx = LightTransaction::unsigned(data);
            tx.sign_client(client).unwrap();
            tx.sign_server(&self.operator).unwrap();
            tx
        }

        fn deposit(&self, to: &EthKeypair, value: &str, lsn: u64, stage: u64) -> LightTransaction {
            self.signed(to, "0", &to.address_hex(), value, lsn, stage)
        }

        fn withdraw(&self, from: &EthKeypair, value: &str, lsn: u64, stage: u64) -> LightTransaction {
            self.signed(from, &from.address_hex(), "0", value, lsn, stage)
        }
    }

    fn ether(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[test]
    fn deposit_then_overdraw_is_rejected_without_side_effects() {
        let f = fixture();
        let receipt = f.lifecycle.submit(f.deposit(&f.alice, "100", 1, 1)).unwrap();
        assert_eq!(receipt.gsn(), 1);
        assert_eq!(receipt.to_balance(), ether(100));

        let err = f.lifecycle.submit(f.withdraw(&f.alice, "150", 2, 1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientBalance);
        assert_eq!(f.lifecycle.balance(&f.alice.address_hex()).unwrap(), ether(100));
        assert_eq!(f.lifecycle.status().next_gsn, 2);
        assert_eq!(f.lifecycle.pending_light_tx_hashes().len(), 1);
    }

    #[test]
    fn duplicates_and_bad_stage_heights_rejected() {
        let f = fixture();
        let tx = f.deposit(&f.alice, "1", 1, 1);
        f.lifecycle.submit(tx.clone()).unwrap();
        assert_eq!(
            f.lifecycle.submit(tx).unwrap_err().code(),
            ErrorCode::ContainsKnownLightTx
        );
        assert_eq!(
            f.lifecycle.submit(f.deposit(&f.alice, "1", 2, 0)).unwrap_err().code(),
            ErrorCode::StaleStageHeight
        );
        assert_eq!(
            f.lifecycle.submit(f.deposit(&f.alice, "1", 3, 5)).unwrap_err().code(),
            ErrorCode::FutureStageHeight
        );
    }

    #[test]
    fn wrong_signer_rejected() {
        let f = fixture();
        // Deposit to alice signed by bob.
        let tx = f.signed(&f.bob, "0", &f.alice.address_hex(), "1", 1, 1);
        let err = f.lifecycle.submit(tx).unwrap_err();
        assert_eq!(err.code(), ErrorCode::WrongSignature);
        assert!(f.lifecycle.pending_light_tx_hashes().is_empty());
    }

    #[test]
    fn empty_checkpoint_reports_empty() {
        let f = fixture();
        assert_eq!(
            f.lifecycle.request_checkpoint().unwrap_err().code(),
            ErrorCode::ReceiptsAreEmpty
        );
        assert_eq!(f.lifecycle.state(), StageState::Idle);
    }

    #[test]
    fn second_checkpoint_fails_fast() {
        let f = fixture();
        f.lifecycle.submit(f.deposit(&f.alice, "1", 1, 1)).unwrap();
        f.lifecycle.request_checkpoint().unwrap();
        assert_eq!(f.lifecycle.state(), StageState::AwaitingCommit);
        assert_eq!(
            f.lifecycle.request_checkpoint().unwrap_err().code(),
            ErrorCode::CheckpointInProgress
        );
    }

    #[test]
    fn commit_finalizes_and_advances() {
        let f = fixture();
        f.lifecycle.submit(f.deposit(&f.alice, "10", 1, 1)).unwrap();
        let checkpoint = f.lifecycle.request_checkpoint().unwrap();
        assert_eq!(checkpoint.stage_height, 1);
        assert_eq!(checkpoint.receipt_count, 1);
        assert!(checkpoint.roots.account_root.is_some());
        assert_eq!(f.lifecycle.finalized_balance(&f.alice.address_hex()).unwrap(), U256::zero());

        // Admissions now target stage 2.
        assert_eq!(f.lifecycle.open_stage(), 2);
        f.lifecycle.submit(f.deposit(&f.bob, "1", 2, 2)).unwrap();

        let record = f.lifecycle.commit(1, &checkpoint.roots, None).unwrap();
        assert_eq!(record.receipt_count(), 1);
        assert_eq!(f.lifecycle.committed_height(), 1);
        assert_eq!(f.lifecycle.finalized_balance(&f.alice.address_hex()).unwrap(), ether(10));
        assert_eq!(f.lifecycle.finalized_balance(&f.bob.address_hex()).unwrap(), U256::zero());
        assert_eq!(f.lifecycle.stage_roots(1).unwrap(), checkpoint.roots);
        assert_eq!(f.lifecycle.pending_light_tx_hashes().len(), 1);
        assert!(matches!(
            f.lifecycle.status().last_outcome,
            Some(StageOutcome::Committed { stage_height: 1, .. })
        ));
    }

    #[test]
    fn mismatched_roots_roll_back() {
        let f = fixture();
        let first = f.lifecycle.submit(f.deposit(&f.alice, "10", 1, 1)).unwrap();
        let checkpoint = f.lifecycle.request_checkpoint().unwrap();
        f.lifecycle.submit(f.deposit(&f.bob, "1", 2, 2)).unwrap();

        let wrong = RootHashes::new("00".repeat(32), checkpoint.roots.account_root.clone());
        let err = f.lifecycle.commit(1, &wrong, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RootHashMismatch);
        assert_eq!(f.lifecycle.state(), StageState::Idle);
        assert_eq!(f.lifecycle.committed_height(), 0);

        // Receipts are back in front, and stage 2 stays open.
        let pending = f.lifecycle.pending_light_tx_hashes();
        assert_eq!(pending[0], first.light_tx_hash());
        assert_eq!(f.lifecycle.open_stage(), 2);

        // Retrying builds the same stage with the same roots.
        let retry = f.lifecycle.request_checkpoint().unwrap();
        assert_eq!(retry.stage_height, 1);
        assert_eq!(retry.receipt_count, 1);
        assert_eq!(retry.roots, checkpoint.roots);
    }

    #[test]
    fn rollback_requires_matching_stage() {
        let f = fixture();
        assert_eq!(
            f.lifecycle.rollback(1, "nothing").unwrap_err().code(),
            ErrorCode::NoPendingCheckpoint
        );
        f.lifecycle.submit(f.deposit(&f.alice, "1", 1, 1)).unwrap();
        f.lifecycle.request_checkpoint().unwrap();
        assert!(f.lifecycle.rollback(2, "wrong stage").is_err());
        assert_eq!(f.lifecycle.state(), StageState::AwaitingCommit);
        f.lifecycle.rollback(1, "operator abort").unwrap();
        assert_eq!(f.lifecycle.state(), StageState::Idle);
    }

    #[test]
    fn proof_verifies_against_root() {
        let f = fixture();
        f.lifecycle.submit(f.deposit(&f.alice, "3", 1, 1)).unwrap();
        let receipt = f.lifecycle.submit(f.deposit(&f.bob, "4", 2, 1)).unwrap();
        let checkpoint = f.lifecycle.request_checkpoint().unwrap();

        let proof = f.lifecycle.proof(1, receipt.light_tx_hash()).unwrap();
        assert_eq!(proof.root, checkpoint.roots.receipt_root);
        assert_eq!(proof.slice.last(), Some(&proof.root));
        assert_eq!(proof.slice.len(), 2 * 7 + 1);
        assert!(proof.receipt_hash_array.contains(&proof.receipt_hash));

        f.lifecycle.commit(1, &checkpoint.roots, None).unwrap();
        let stored = f.lifecycle.proof(1, receipt.light_tx_hash()).unwrap();
        assert_eq!(stored, proof);
    }

    #[test]
    fn recovery_restores_pool_and_ledgers() {
        let f = fixture();
        f.lifecycle.submit(f.deposit(&f.alice, "5", 1, 1)).unwrap();
        let checkpoint = f.lifecycle.request_checkpoint().unwrap();
        f.lifecycle.commit(1, &checkpoint.roots, None).unwrap();
        f.lifecycle
            .submit(f.signed(&f.alice, &f.alice.address_hex(), &f.bob.address_hex(), "2", 2, 2))
            .unwrap();

        let reopened = StageLifecycle::open(config(&f.operator), f.db.clone()).unwrap();
        assert_eq!(reopened.committed_height(), 1);
        assert_eq!(reopened.open_stage(), 2);
        assert_eq!(reopened.status().next_gsn, 3);
        assert_eq!(reopened.balance(&f.alice.address_hex()).unwrap(), ether(3));
        assert_eq!(reopened.balance(&f.bob.address_hex()).unwrap(), ether(2));
        assert_eq!(reopened.finalized_balance(&f.alice.address_hex()).unwrap(), ether(5));
        assert_eq!(reopened.pending_light_tx_hashes().len(), 1);
    }

    #[test]
    fn captured_stage_stays_closed_after_reopen() {
        let f = fixture();
        f.lifecycle.submit(f.deposit(&f.alice, "5", 1, 1)).unwrap();
        let checkpoint = f.lifecycle.request_checkpoint().unwrap();
        assert_eq!(f.db.captured_height().unwrap(), 1);

        let reopened = StageLifecycle::open(config(&f.operator), f.db.clone()).unwrap();
        assert_eq!(reopened.committed_height(), 0);
        assert_eq!(reopened.open_stage(), 2);

        let err = reopened.submit(f.deposit(&f.bob, "1", 2, 1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StaleStageHeight);
        reopened.submit(f.deposit(&f.bob, "1", 3, 2)).unwrap();

        let rebuilt = reopened.request_checkpoint().unwrap();
        assert_eq!(rebuilt.stage_height, 1);
        assert_eq!(rebuilt.receipt_count, 1);
        assert_eq!(rebuilt.roots, checkpoint.roots);
    }

    #[tokio::test]
    async fn reconcile_closes_stage_already_on_chain() {
        let f = fixture();
        f.lifecycle.submit(f.deposit(&f.alice, "5", 1, 1)).unwrap();
        let chain = LoopbackParentChain::with_history([(1, RootHashes::new("22".repeat(32), None))]);

        f.lifecycle.reconcile(&chain).await.unwrap();
        assert_eq!(f.lifecycle.open_stage(), 2);
        assert_eq!(f.db.captured_height().unwrap(), 1);
        let err = f.lifecycle.submit(f.deposit(&f.bob, "1", 2, 1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StaleStageHeight);

        // Idempotent.
        f.lifecycle.reconcile(&chain).await.unwrap();
        assert_eq!(f.lifecycle.open_stage(), 2);
    }

    #[tokio::test]
    async fn reconcile_rejects_chain_gap() {
        let f = fixture();
        f.lifecycle.reconcile(&LoopbackParentChain::new()).await.unwrap();

        let roots = RootHashes::new("22".repeat(32), None);
        let chain = LoopbackParentChain::with_history([(1, roots.clone()), (2, roots)]);
        let err = f.lifecycle.reconcile(&chain).await.unwrap_err();
        assert!(matches!(err, StageError::ChainOutOfSync { local: 0, chain: 2 }));
        assert_eq!(err.code(), ErrorCode::ChainOutOfSync);
        assert_eq!(f.lifecycle.open_stage(), 1);
    }

    #[test]
    fn invalid_tree_height_is_configuration_error() {
        let operator = EthKeypair::generate();
        let db = Arc::new(SettlementDb::open_temporary().unwrap());
        let mut cfg = config(&operator);
        cfg.tree_height = 0;
        let err = StageLifecycle::open(cfg, db).err().unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[tokio::test]
    async fn attach_commits_through_parent_chain() {
        let f = fixture();
        f.lifecycle.submit(f.deposit(&f.alice, "1", 1, 1)).unwrap();
        let checkpoint = f.lifecycle.request_checkpoint().unwrap();
        let chain = LoopbackParentChain::new();

        let record = f
            .lifecycle
            .attach(1, &checkpoint.roots, "0xsigned", &chain)
            .await
            .unwrap();
        assert!(record.parent_tx_hash.is_some());
        assert_eq!(chain.stage_height().await.unwrap(), 1);
        assert_eq!(f.lifecycle.committed_height(), 1);
    }

    #[tokio::test]
    async fn attach_failure_rolls_back() {
        let f = fixture();
        f.lifecycle.submit(f.deposit(&f.alice, "1", 1, 1)).unwrap();
        let checkpoint = f.lifecycle.request_checkpoint().unwrap();
        let chain = LoopbackParentChain::new();
        chain.fail_next_submission();

        let err = f
            .lifecycle
            .attach(1, &checkpoint.roots, "0xsigned", &chain)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SubmissionFailed);
        assert_eq!(f.lifecycle.state(), StageState::Idle);
        assert!(matches!(
            f.lifecycle.status().last_outcome,
            Some(StageOutcome::RolledBack { stage_height: 1, .. })
        ));

        // Second attempt goes through.
        let checkpoint = f.lifecycle.request_checkpoint().unwrap();
        f.lifecycle
            .attach(1, &checkpoint.roots, "0xsigned", &chain)
            .await
            .unwrap();
        assert_eq!(f.lifecycle.committed_height(), 1);
    }

    #[tokio::test]
    async fn attach_with_foreign_roots_rolls_back() {
        let f = fixture();
        f.lifecycle.submit(f.deposit(&f.alice, "1", 1, 1)).unwrap();
        f.lifecycle.request_checkpoint().unwrap();
        let chain = LoopbackParentChain::new();

        let forged = RootHashes::new("11".repeat(32), None);
        let err = f.lifecycle.attach(1, &forged, "0xsigned", &chain).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RootHashMismatch);
        assert_eq!(chain.accepted_stages().await, 0);
        assert_eq!(f.lifecycle.state(), StageState::Idle);
    }
}
