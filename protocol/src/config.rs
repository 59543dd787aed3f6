//! # Protocol Configuration & Constants
//!
//! Every magic number the settlement layer depends on lives here. Several of
//! these values are baked into root hashes that end up on the parent chain,
//! so changing one after a stage has been committed means the operator can
//! no longer reproduce its own history. Choose during devnet, then leave
//! them alone.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tree Parameters
// ---------------------------------------------------------------------------

/// Seed hashed to produce the digest of a leaf that has never received an
/// insertion. The exact bytes matter: every empty-tree root is derived
/// from this string.
pub const EMPTY_LEAF_SEED: &str = "initial no data";

/// Default tree height for receipt and account trees. A height-16 tree has
/// 32,768 leaves, which keeps collision buckets short for stages of a few
/// thousand receipts.
pub const DEFAULT_TREE_HEIGHT: u32 = 16;

/// Upper bound on tree height. The node array holds `2^height` entries, so
/// anything past this is a memory bomb rather than a configuration choice.
pub const MAX_TREE_HEIGHT: u32 = 24;

/// Number of leading hex characters of `hash(id)` used to pick a leaf.
/// 12 hex chars = 48 bits, comfortably inside a `u64`.
pub const LEAF_INDEX_HEX_CHARS: usize = 12;

// ---------------------------------------------------------------------------
// Value Encoding
// ---------------------------------------------------------------------------

/// Width of every canonical field (address, amount, counter) in hex chars.
pub const FIELD_HEX_LEN: usize = 64;

/// Decimal exponent between the display unit and the base unit (wei).
pub const WEI_DECIMALS: usize = 18;

/// Withdrawals strictly above this many whole units are ordinary
/// withdrawals; anything at or below is an instant withdrawal.
pub const INSTANT_WITHDRAWAL_LIMIT: u64 = 10;

/// The all-zero address. Appears as `from` on deposits and `to` on
/// withdrawals, and is never a ledger account.
pub const ZERO_ADDRESS: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Prefix prepended to a 32-byte digest before signing, per `eth_sign`.
pub const ETH_SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default port for the HTTP API.
pub const DEFAULT_RPC_PORT: u16 = 3001;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9101;

/// Default on-disk location for the settlement database.
pub const DEFAULT_DATA_DIR: &str = "./childchain-data";

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Per-deployment parameters for the stage lifecycle.
///
/// The node fills this from CLI flags; tests usually start from
/// [`StageConfig::default`] and override the operator address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Height of the receipt and account trees built at every checkpoint.
    pub tree_height: u32,
    /// Whether checkpoints also commit an account tree. When disabled the
    /// account root is reported as `None` and not compared on commit.
    pub commit_account_tree: bool,
    /// Operator address (64 hex chars, no prefix) that must have produced
    /// every server signature.
    pub operator_address: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            tree_height: DEFAULT_TREE_HEIGHT,
            commit_account_tree: true,
            operator_address: ZERO_ADDRESS.to_string(),
        }
    }
}
