//! Error types for the indexed Merkle tree and its codec.

use thiserror::Error;

use crate::config::MAX_TREE_HEIGHT;

/// Errors raised by tree construction, insertion and lookup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Height is zero or larger than the supported maximum.
    #[error("tree height must be between 1 and {max}, got {0}", max = MAX_TREE_HEIGHT)]
    InvalidHeight(u32),

    /// An insertion was attempted before the owning stage was set.
    #[error("stage height must be set before inserting")]
    StageHeightUnset,

    /// A transaction-level lookup addressed an internal node.
    #[error("node [{0}] is not a leaf")]
    NotALeaf(usize),

    /// The node index does not exist in this tree.
    #[error("node index {index} out of range (tree has {len} nodes)")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// Number of addressable nodes, i.e. `2^height`.
        len: usize,
    },

    /// An audited leaf has never received an insertion.
    #[error("node [{0}] has no bucket")]
    EmptyLeaf(usize),

    /// A supplied digest is not usable for leaf indexing.
    #[error("invalid digest `{0}`")]
    InvalidDigest(String),
}

/// Errors raised while exporting or importing tree snapshots.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The snapshot's height is not a valid tree height.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// The snapshot does not contain exactly `2^height - 1` nodes.
    #[error("snapshot has {found} nodes, expected {expected}")]
    NodeCount {
        /// Expected node count for the declared height.
        expected: usize,
        /// Node count actually present.
        found: usize,
    },

    /// A node's position and its declared id disagree, or its leaf flag is
    /// wrong for its position.
    #[error("snapshot node at position {position} is inconsistent: {reason}")]
    Shape {
        /// 1-based array position.
        position: usize,
        /// What was wrong.
        reason: String,
    },

    /// A recomputed digest differs from the one carried by the snapshot.
    #[error("digest mismatch at node {index}: snapshot has {claimed}, recomputed {computed}")]
    DigestMismatch {
        /// Node index.
        index: usize,
        /// Digest stored in the snapshot.
        claimed: String,
        /// Digest recomputed from children or bucket contents.
        computed: String,
    },

    /// JSON encoding or decoding failed.
    #[error("snapshot json error: {0}")]
    Json(#[from] serde_json::Error),
}
