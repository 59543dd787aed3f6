//! # Ledger
//!
//! Balance bookkeeping for the child chain. See [`balance`] for the rules.

pub mod balance;

pub use balance::{decode_balance, encode_balance, BalanceChange, BalanceLedger, LedgerError};
