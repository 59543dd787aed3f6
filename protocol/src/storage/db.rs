//! # SettlementDb — Persistent Storage Engine
//!
//! The persistence layer for the child chain, built on sled's embedded
//! key-value store. Everything the lifecycle needs to survive a restart
//! flows through here.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                      | Value                      |
//! |------------|--------------------------|----------------------------|
//! | `stages`   | `stage_height` (8B BE)   | `bincode(StageRecord)`     |
//! | `receipts` | `lightTxHash` (UTF-8)    | `bincode(Receipt)`         |
//! | `pending`  | `gsn` (8B BE)            | `lightTxHash` (UTF-8)      |
//! | `balances` | address field (UTF-8)    | balance, 64 hex (UTF-8)    |
//! | `metadata` | key (UTF-8)              | value (bytes)              |
//!
//! Stage heights and GSNs are big-endian so sled's lexicographic order is
//! numeric order, which is what makes `pending` iterate in GSN order.
//!
//! `metadata` holds `committed_stage_height`, `last_gsn` and
//! `captured_stage_height`, each a `u64` (8B BE). The captured height is
//! written and flushed when a checkpoint closes a stage to admissions.
//!
//! ## Atomicity
//!
//! Admitting a receipt and committing a stage each touch several trees.
//! Both run as a single multi-tree sled transaction, so a crash leaves
//! either all of the writes or none of them. Stage commits are flushed
//! before returning; receipt admissions ride sled's periodic flush.

use std::collections::HashSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{TransactionError, TransactionResult};
use sled::{Db, IVec, Transactional, Tree};

use crate::ledger::BalanceLedger;
use crate::stage::{StageRecord, StageStore};
use crate::transaction::Receipt;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

const META_COMMITTED_HEIGHT: &[u8] = b"committed_stage_height";
const META_LAST_GSN: &[u8] = b"last_gsn";
const META_CAPTURED_HEIGHT: &[u8] = b"captured_stage_height";

// ---------------------------------------------------------------------------
// SettlementDb
// ---------------------------------------------------------------------------

/// Persistent storage for stages, receipts and finalized balances.
///
/// sled trees are safe for concurrent use, so a `SettlementDb` can be
/// shared as `Arc<SettlementDb>` without extra locking.
#[derive(Debug, Clone)]
pub struct SettlementDb {
    db: Db,
    stages: Tree,
    receipts: Tree,
    pending: Tree,
    balances: Tree,
    metadata: Tree,
}

impl SettlementDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let stages = db.open_tree("stages")?;
        let receipts = db.open_tree("receipts")?;
        let pending = db.open_tree("pending")?;
        let balances = db.open_tree("balances")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            stages,
            receipts,
            pending,
            balances,
            metadata,
        })
    }

    // -- Stage operations ---------------------------------------------------

    /// Heights of every committed stage, ascending.
    pub fn stage_heights(&self) -> DbResult<Vec<u64>> {
        self.stages
            .iter()
            .keys()
            .map(|key| read_u64(&key?))
            .collect()
    }

    // -- Utility operations -------------------------------------------------

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Receipts ever admitted, pending or committed.
    pub fn receipt_count(&self) -> usize {
        self.receipts.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn account_count(&self) -> usize {
        self.balances.len()
    }

    /// Block until every buffered write is on disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn meta_u64(&self, key: &[u8]) -> DbResult<u64> {
        match self.metadata.get(key)? {
            Some(bytes) => read_u64(&bytes),
            None => Ok(0),
        }
    }
}

impl StageStore for SettlementDb {
    fn committed_height(&self) -> DbResult<u64> {
        self.meta_u64(META_COMMITTED_HEIGHT)
    }

    fn last_gsn(&self) -> DbResult<u64> {
        self.meta_u64(META_LAST_GSN)
    }

    fn captured_height(&self) -> DbResult<u64> {
        self.meta_u64(META_CAPTURED_HEIGHT)
    }

    fn set_captured_height(&self, stage_height: u64) -> DbResult<()> {
        self.metadata
            .insert(META_CAPTURED_HEIGHT, &stage_height.to_be_bytes()[..])?;
        self.db.flush()?;
        Ok(())
    }

    fn load_stage(&self, stage_height: u64) -> DbResult<Option<StageRecord>> {
        self.stages
            .get(stage_height.to_be_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn save_stage(&self, record: &StageRecord, finalized: &BalanceLedger) -> DbResult<()> {
        let stage_key = record.stage_height.to_be_bytes();
        let stage_bytes = encode(record)?;
        let gsn_keys: Vec<[u8; 8]> = record.gsns.iter().map(|g| g.to_be_bytes()).collect();

        let entries = finalized.account_entries();
        let keep: HashSet<&[u8]> = entries.iter().map(|(a, _)| a.as_bytes()).collect();
        let mut stale: Vec<IVec> = Vec::new();
        for key in self.balances.iter().keys() {
            let key = key?;
            if !keep.contains(&key[..]) {
                stale.push(key);
            }
        }

        let result: TransactionResult<()> =
            (&self.stages, &self.pending, &self.balances, &self.metadata).transaction(
                |(stages, pending, balances, metadata)| {
                    stages.insert(&stage_key[..], stage_bytes.as_slice())?;
                    for gsn in &gsn_keys {
                        pending.remove(&gsn[..])?;
                    }
                    for key in &stale {
                        balances.remove(key.clone())?;
                    }
                    for (address, balance) in &entries {
                        balances.insert(address.as_bytes(), balance.as_bytes())?;
                    }
                    metadata.insert(META_COMMITTED_HEIGHT, &stage_key[..])?;
                    Ok(())
                },
            );
        result.map_err(transaction_error)?;

        self.db.flush()?;
        Ok(())
    }

    fn put_pending_receipt(&self, receipt: &Receipt) -> DbResult<()> {
        let gsn_key = receipt.gsn().to_be_bytes();
        let hash = receipt.light_tx_hash().as_bytes();
        let bytes = encode(receipt)?;

        let result: TransactionResult<()> = (&self.receipts, &self.pending, &self.metadata)
            .transaction(|(receipts, pending, metadata)| {
                receipts.insert(hash, bytes.as_slice())?;
                pending.insert(&gsn_key[..], hash)?;
                metadata.insert(META_LAST_GSN, &gsn_key[..])?;
                Ok(())
            });
        result.map_err(transaction_error)
    }

    fn list_pending_receipts(&self) -> DbResult<Vec<Receipt>> {
        let mut out = Vec::with_capacity(self.pending.len());
        for entry in self.pending.iter() {
            let (_gsn, hash) = entry?;
            let hash = String::from_utf8_lossy(&hash).into_owned();
            let receipt = self
                .get_receipt(&hash)?
                .ok_or_else(|| DbError::NotFound(format!("pending receipt {hash}")))?;
            out.push(receipt);
        }
        Ok(out)
    }

    fn get_receipt(&self, light_tx_hash: &str) -> DbResult<Option<Receipt>> {
        self.receipts
            .get(light_tx_hash.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn finalized_balances(&self) -> DbResult<BalanceLedger> {
        let mut entries = Vec::with_capacity(self.balances.len());
        for entry in self.balances.iter() {
            let (address, balance) = entry?;
            entries.push((
                String::from_utf8_lossy(&address).into_owned(),
                String::from_utf8_lossy(&balance).into_owned(),
            ));
        }
        BalanceLedger::from_encoded(entries).map_err(|e| DbError::Serialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

fn read_u64(bytes: &[u8]) -> DbResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("invalid u64 bytes".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}

fn transaction_error(e: TransactionError<()>) -> DbError {
    match e {
        TransactionError::Storage(e) => DbError::Sled(e),
        TransactionError::Abort(()) => DbError::Serialization("transaction aborted".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::RootHashes;
    use crate::transaction::{LightTransaction, LightTxData};
    use crate::tree::{IndexedMerkleTree, LeafEntry};
    use primitive_types::U256;

    // -- Helpers ------------------------------------------------------------

    fn receipt(gsn: u64, to: &str, value: u64) -> Receipt {
        let data = LightTxData::new("0", to, &value.to_string(), "0", &gsn.to_string(), "1").unwrap();
        Receipt::new(LightTransaction::unsigned(data), gsn, U256::zero(), U256::from(value))
    }

    fn record(stage_height: u64, receipts: &[Receipt]) -> StageRecord {
        let entries: Vec<LeafEntry> = receipts
            .iter()
            .map(|r| LeafEntry::new(r.receipt_hash(), r.receipt_hash(), ""))
            .collect();
        let tree = IndexedMerkleTree::build(4, stage_height, &entries).unwrap();
        let roots = RootHashes::new(tree.root_digest(), None);
        StageRecord::new(stage_height, roots, receipts, Some("0xabc".into()), &tree, None)
    }

    // -- Tests --------------------------------------------------------------

    #[test]
    fn open_temporary_database() {
        let db = SettlementDb::open_temporary().expect("should create temp db");
        assert_eq!(db.stage_count(), 0);
        assert_eq!(db.committed_height().unwrap(), 0);
        assert_eq!(db.last_gsn().unwrap(), 0);
        assert!(db.finalized_balances().unwrap().account_entries().is_empty());
    }

    #[test]
    fn pending_receipts_list_in_gsn_order() {
        let db = SettlementDb::open_temporary().unwrap();
        // Insert out of order; keys are big-endian so iteration is numeric.
        for gsn in [3u64, 1, 256, 2] {
            db.put_pending_receipt(&receipt(gsn, "aa", gsn)).unwrap();
        }
        let gsns: Vec<u64> = db
            .list_pending_receipts()
            .unwrap()
            .iter()
            .map(Receipt::gsn)
            .collect();
        assert_eq!(gsns, vec![1, 2, 3, 256]);
        assert_eq!(db.last_gsn().unwrap(), 2);
    }

    #[test]
    fn receipt_lookup_by_hash() {
        let db = SettlementDb::open_temporary().unwrap();
        let r = receipt(1, "aa", 5);
        db.put_pending_receipt(&r).unwrap();
        assert_eq!(db.get_receipt(r.light_tx_hash()).unwrap(), Some(r));
        assert!(db.get_receipt("missing").unwrap().is_none());
    }

    #[test]
    fn save_stage_commits_everything_together() {
        let db = SettlementDb::open_temporary().unwrap();
        let r1 = receipt(1, "aa", 5);
        let r2 = receipt(2, "bb", 7);
        let r3 = receipt(3, "cc", 9);
        for r in [&r1, &r2, &r3] {
            db.put_pending_receipt(r).unwrap();
        }

        let mut ledger = BalanceLedger::new();
        ledger.apply(r1.light_tx()).unwrap();
        ledger.apply(r2.light_tx()).unwrap();
        let rec = record(1, &[r1.clone(), r2.clone()]);
        db.save_stage(&rec, &ledger).unwrap();

        assert_eq!(db.committed_height().unwrap(), 1);
        assert_eq!(db.load_stage(1).unwrap(), Some(rec.clone()));
        assert!(db.load_stage(2).unwrap().is_none());
        assert_eq!(db.stage_heights().unwrap(), vec![1]);

        // Only the uncommitted receipt is still pending, but all are known.
        let pending = db.list_pending_receipts().unwrap();
        assert_eq!(pending, vec![r3.clone()]);
        assert!(db.get_receipt(r1.light_tx_hash()).unwrap().is_some());

        assert_eq!(db.finalized_balances().unwrap(), ledger);
        let tree = db.load_stage(1).unwrap().unwrap().receipt_tree().unwrap();
        assert_eq!(tree.root_digest(), rec.roots.receipt_root);
    }

    #[test]
    fn zeroed_accounts_are_dropped_on_commit() {
        let db = SettlementDb::open_temporary().unwrap();
        let mut ledger = BalanceLedger::new();
        let a = "aa".repeat(32);
        ledger.deposit(&a, U256::from(5u64)).unwrap();
        db.save_stage(&record(1, &[]), &ledger).unwrap();
        assert_eq!(db.account_count(), 1);

        ledger.withdraw(&a, U256::from(5u64)).unwrap();
        db.save_stage(&record(2, &[]), &ledger).unwrap();
        assert_eq!(db.account_count(), 0);
        assert_eq!(db.committed_height().unwrap(), 2);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let r = receipt(1, "aa", 5);
        {
            let db = SettlementDb::open(dir.path()).expect("should open db");
            db.put_pending_receipt(&r).unwrap();
            db.flush().unwrap();
        }
        let db = SettlementDb::open(dir.path()).expect("should reopen db");
        assert_eq!(db.list_pending_receipts().unwrap(), vec![r]);
        assert_eq!(db.last_gsn().unwrap(), 1);
    }

    #[test]
    fn captured_height_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = SettlementDb::open(dir.path()).expect("should open db");
            assert_eq!(db.captured_height().unwrap(), 0);
            db.set_captured_height(3).unwrap();
        }
        let db = SettlementDb::open(dir.path()).expect("should reopen db");
        assert_eq!(db.captured_height().unwrap(), 3);
        assert_eq!(db.committed_height().unwrap(), 0);
    }
}
