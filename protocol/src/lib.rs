// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Child Chain Settlement — Core Library
//!
//! The settlement layer of a single-operator child chain. Users move value
//! off the parent chain with *light transactions*; the operator orders them,
//! keeps the balances, and periodically commits a Merkle root of everything
//! it accepted back to the parent chain. Anyone holding a receipt can then
//! prove its inclusion against that root.
//!
//! ## Architecture
//!
//! - **crypto** — Keccak-256, secp256k1 recovery, Ethereum-style signing.
//! - **tree** — Fixed-height indexed Merkle tree with collision buckets,
//!   inclusion slices and JSON export/import.
//! - **transaction** — Light transaction parsing, hashing, signatures and
//!   receipts.
//! - **ledger** — Non-negative 256-bit balances with atomic remittances.
//! - **stage** — The checkpoint state machine and its parent-chain and
//!   storage ports.
//! - **storage** — sled persistence behind the stage store port.
//! - **config** — Protocol constants and stage parameters.
//!
//! ## Design Philosophy
//!
//! 1. One writer. Every ledger mutation goes through the stage lifecycle.
//! 2. Nothing is final until the parent chain holds the root.
//! 3. If it touches money, it has tests. Plural.

pub mod config;
pub mod crypto;
pub mod ledger;
pub mod stage;
pub mod storage;
pub mod transaction;
pub mod tree;
