//! # Storage Module
//!
//! Persistent storage for the child chain. [`SettlementDb`] is the sled
//! backed implementation of the lifecycle's
//! [`StageStore`](crate::stage::StageStore) port.
//!
//! ## Design Decisions
//!
//! 1. **Named sled trees per concern.** Stages, receipts, the pending index,
//!    finalized balances and metadata each get their own keyspace.
//!
//! 2. **Bincode for on-disk serialization.** Compact and deterministic.
//!    JSON is for the API and for tree exports handed to auditors.
//!
//! 3. **Balances as 64-hex text.** The same encoding the account tree
//!    commits to, so a stored balance can be compared with a proof
//!    without conversion.

pub mod db;

pub use db::{DbError, DbResult, SettlementDb};
