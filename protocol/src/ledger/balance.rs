//! # Balance Ledger
//!
//! The authoritative `address -> balance` map of the child chain. Balances
//! are unsigned 256-bit integers in wei, so "negative balance" is not a
//! state this type can represent: a debit larger than the balance is
//! refused before anything changes.
//!
//! Remittances touch two accounts. Both sides are computed first and only
//! then written, so a failed remittance leaves the sender and the recipient
//! exactly as they were.

use std::collections::BTreeMap;

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ZERO_ADDRESS;
use crate::transaction::types::{field_to_u256, u256_to_field};
use crate::transaction::{LightTransaction, LightTxType};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during ledger mutations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Attempted to debit more than the available balance.
    #[error("insufficient balance: {address} has {available}, requested {requested}")]
    InsufficientBalance {
        address: String,
        available: U256,
        requested: U256,
    },

    /// A credit would exceed 2^256 - 1.
    ///
    /// Not reachable with real funds; treat as corruption or an attack.
    #[error("balance overflow crediting {credit} to {address} (current {current})")]
    Overflow {
        address: String,
        current: U256,
        credit: U256,
    },

    /// The zero address was used as an account.
    #[error("the zero address cannot hold a balance")]
    ZeroAddress,

    /// A stored balance is not a valid 64-hex field.
    #[error("corrupt balance encoding for {address}: '{encoded}'")]
    CorruptBalance { address: String, encoded: String },
}

/// Post-application balances of a transaction's two endpoints. The zero
/// address side is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub from_balance: U256,
    pub to_balance: U256,
}

// ---------------------------------------------------------------------------
// BalanceLedger
// ---------------------------------------------------------------------------

/// Address-keyed balances. Addresses are 64-char padded fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceLedger {
    balances: BTreeMap<String, U256>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of `address`, zero if it has never been credited.
    pub fn get_balance(&self, address: &str) -> U256 {
        self.balances.get(address).copied().unwrap_or_default()
    }

    /// Credit `value` to `to`. Returns the new balance.
    pub fn deposit(&mut self, to: &str, value: U256) -> Result<U256, LedgerError> {
        let next = self.credited(to, value)?;
        self.set(to, next);
        Ok(next)
    }

    /// Debit `value` from `from`. Returns the new balance.
    pub fn withdraw(&mut self, from: &str, value: U256) -> Result<U256, LedgerError> {
        let next = self.debited(from, value)?;
        self.set(from, next);
        Ok(next)
    }

    /// Move `value` from `from` to `to` atomically. Returns both new
    /// balances.
    pub fn remit(&mut self, from: &str, to: &str, value: U256) -> Result<(U256, U256), LedgerError> {
        let from_next = self.debited(from, value)?;
        if from == to {
            // Self-transfer: debit succeeded, so the balance is unchanged.
            return Ok((self.get_balance(from), self.get_balance(to)));
        }
        let to_next = self.credited(to, value)?;
        self.set(from, from_next);
        self.set(to, to_next);
        Ok((from_next, to_next))
    }

    /// Balances `tx` would produce, without mutating anything.
    ///
    /// Fees are carried on the transaction and hashed, but not charged
    /// against balances.
    pub fn preview(&self, tx: &LightTransaction) -> Result<BalanceChange, LedgerError> {
        let data = tx.data();
        let value = tx.value();
        match tx.kind() {
            LightTxType::Deposit => Ok(BalanceChange {
                from_balance: U256::zero(),
                to_balance: self.credited(&data.to, value)?,
            }),
            LightTxType::Withdrawal | LightTxType::InstantWithdrawal => Ok(BalanceChange {
                from_balance: self.debited(&data.from, value)?,
                to_balance: U256::zero(),
            }),
            LightTxType::Remittance => {
                let from_balance = self.debited(&data.from, value)?;
                if data.from == data.to {
                    let unchanged = self.get_balance(&data.from);
                    return Ok(BalanceChange {
                        from_balance: unchanged,
                        to_balance: unchanged,
                    });
                }
                Ok(BalanceChange {
                    from_balance,
                    to_balance: self.credited(&data.to, value)?,
                })
            }
        }
    }

    /// Apply a light transaction according to its type and return the
    /// resulting endpoint balances.
    pub fn apply(&mut self, tx: &LightTransaction) -> Result<BalanceChange, LedgerError> {
        let change = self.preview(tx)?;
        let data = tx.data();
        match tx.kind() {
            LightTxType::Deposit => self.set(&data.to, change.to_balance),
            LightTxType::Withdrawal | LightTxType::InstantWithdrawal => {
                self.set(&data.from, change.from_balance)
            }
            LightTxType::Remittance => {
                self.set(&data.from, change.from_balance);
                self.set(&data.to, change.to_balance);
            }
        }
        Ok(change)
    }

    /// Accounts with a non-zero balance, in address order, with balances
    /// encoded as 64-hex fields.
    pub fn account_entries(&self) -> Vec<(String, String)> {
        self.balances
            .iter()
            .filter(|(_, b)| !b.is_zero())
            .map(|(a, b)| (a.clone(), encode_balance(b)))
            .collect()
    }

    /// Number of accounts with a non-zero balance.
    pub fn account_count(&self) -> usize {
        self.balances.values().filter(|b| !b.is_zero()).count()
    }

    /// Rebuild from encoded `(address, balance)` pairs.
    pub fn from_encoded<I>(entries: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut ledger = Self::new();
        for (address, encoded) in entries {
            let balance = decode_balance(&encoded).ok_or_else(|| LedgerError::CorruptBalance {
                address: address.clone(),
                encoded: encoded.clone(),
            })?;
            ledger.set(&address, balance);
        }
        Ok(ledger)
    }

    fn credited(&self, address: &str, value: U256) -> Result<U256, LedgerError> {
        if address == ZERO_ADDRESS {
            return Err(LedgerError::ZeroAddress);
        }
        let current = self.get_balance(address);
        current.checked_add(value).ok_or_else(|| LedgerError::Overflow {
            address: address.to_string(),
            current,
            credit: value,
        })
    }

    fn debited(&self, address: &str, value: U256) -> Result<U256, LedgerError> {
        if address == ZERO_ADDRESS {
            return Err(LedgerError::ZeroAddress);
        }
        let available = self.get_balance(address);
        available
            .checked_sub(value)
            .ok_or_else(|| LedgerError::InsufficientBalance {
                address: address.to_string(),
                available,
                requested: value,
            })
    }

    fn set(&mut self, address: &str, balance: U256) {
        if balance.is_zero() {
            self.balances.remove(address);
        } else {
            self.balances.insert(address.to_string(), balance);
        }
    }
}

/// Encode a balance as 64 left-padded hex chars.
pub fn encode_balance(balance: &U256) -> String {
    u256_to_field(balance)
}

/// Decode a 64-hex balance.
pub fn decode_balance(encoded: &str) -> Option<U256> {
    field_to_u256(encoded)
}
