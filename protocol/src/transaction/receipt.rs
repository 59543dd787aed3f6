//! Receipts: the operator's record that a light transaction was applied.
//!
//! A receipt is created exactly once, right after the ledger accepted the
//! transaction, and never changes afterwards. It pins the global sequence
//! number (GSN) and the post-transaction balances of both endpoints, and
//! its hash is what goes into the stage's receipt tree.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::light_tx::LightTransaction;
use super::types::{field_to_u256, u256_to_field};
use crate::crypto::hash::hash_concat;

/// Immutable proof of application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    light_tx: LightTransaction,
    gsn: u64,
    from_balance: String,
    to_balance: String,
    receipt_hash: String,
}

impl Receipt {
    /// Seal a receipt. Balances are the post-application balances; the zero
    /// address side is reported as zero.
    pub fn new(light_tx: LightTransaction, gsn: u64, from_balance: U256, to_balance: U256) -> Self {
        let from_balance = u256_to_field(&from_balance);
        let to_balance = u256_to_field(&to_balance);
        let receipt_hash = hash_concat([
            light_tx.light_tx_hash(),
            u256_to_field(&U256::from(gsn)).as_str(),
            from_balance.as_str(),
            to_balance.as_str(),
        ]);
        Self {
            light_tx,
            gsn,
            from_balance,
            to_balance,
            receipt_hash,
        }
    }

    pub fn light_tx(&self) -> &LightTransaction {
        &self.light_tx
    }

    pub fn light_tx_hash(&self) -> &str {
        self.light_tx.light_tx_hash()
    }

    /// Global sequence number, 1-based, unique across stages.
    pub fn gsn(&self) -> u64 {
        self.gsn
    }

    pub fn from_balance(&self) -> U256 {
        field_to_u256(&self.from_balance).unwrap_or_default()
    }

    pub fn to_balance(&self) -> U256 {
        field_to_u256(&self.to_balance).unwrap_or_default()
    }

    pub fn receipt_hash(&self) -> &str {
        &self.receipt_hash
    }

    /// Wire form: the light transaction's JSON plus `receiptData` and
    /// `receiptHash`.
    pub fn to_json(&self) -> Value {
        let mut out = self.light_tx.to_json();
        out["receiptData"] = json!({
            "stageHeight": self.light_tx.data().stage_height,
            "GSN": u256_to_field(&U256::from(self.gsn)),
            "lightTxHash": self.light_tx.light_tx_hash(),
            "fromBalance": self.from_balance,
            "toBalance": self.to_balance,
        });
        out["receiptHash"] = json!(self.receipt_hash);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::hash_text;
    use crate::transaction::light_tx::LightTxData;

    fn sample_tx() -> LightTransaction {
        LightTransaction::unsigned(LightTxData::new("0", "ab", "100", "0", "1", "1").unwrap())
    }

    #[test]
    fn hash_covers_gsn_and_balances() {
        let r = Receipt::new(sample_tx(), 1, U256::zero(), U256::from(100u64));
        let expected = hash_text(&format!(
            "{}{}{}{}",
            r.light_tx_hash(),
            u256_to_field(&U256::one()),
            "0".repeat(64),
            u256_to_field(&U256::from(100u64)),
        ));
        assert_eq!(r.receipt_hash(), expected);

        let other_gsn = Receipt::new(sample_tx(), 2, U256::zero(), U256::from(100u64));
        assert_ne!(other_gsn.receipt_hash(), r.receipt_hash());
    }

    #[test]
    fn balances_round_trip() {
        let r = Receipt::new(sample_tx(), 5, U256::from(7u64), U256::from(9u64));
        assert_eq!(r.from_balance(), U256::from(7u64));
        assert_eq!(r.to_balance(), U256::from(9u64));
        assert_eq!(r.gsn(), 5);
    }

    #[test]
    fn json_carries_receipt_data() {
        let r = Receipt::new(sample_tx(), 3, U256::zero(), U256::from(100u64));
        let json = r.to_json();
        assert_eq!(json["receiptHash"], r.receipt_hash());
        assert_eq!(json["receiptData"]["lightTxHash"], r.light_tx_hash());
        assert_eq!(json["lightTxHash"], r.light_tx_hash());
        assert_eq!(json["receiptData"]["GSN"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn bincode_round_trip() {
        let r = Receipt::new(sample_tx(), 3, U256::zero(), U256::from(100u64));
        let back: Receipt = bincode::deserialize(&bincode::serialize(&r).unwrap()).unwrap();
        assert_eq!(back, r);
    }
}
