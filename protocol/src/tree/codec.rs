//! Tree snapshots.
//!
//! A snapshot is the full node arena plus `height`, `stageHeight` and the
//! build time. There are two ways back into a live tree and they are kept
//! apart by type:
//!
//! - [`IndexedMerkleTree::import_verified`] accepts any [`TreeSnapshot`],
//!   recomputes every digest from bucket contents upward and refuses the
//!   snapshot if a single stored digest disagrees.
//! - [`IndexedMerkleTree::restore_trusted`] takes a [`TrustedSnapshot`],
//!   which only this crate can construct, and adopts the stored digests
//!   as-is. It exists for snapshots the node wrote to its own database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{empty_leaf_digest, validate_height, IndexedMerkleTree, Node};
use super::error::CodecError;
use crate::crypto::hash::hash_concat;

/// Serializable image of a tree.
///
/// `nodes` holds positions `1..2^height`; the unused slot 0 is not
/// exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSnapshot {
    pub height: u32,
    pub stage_height: Option<u64>,
    #[serde(rename = "time")]
    pub made_at: Option<DateTime<Utc>>,
    pub nodes: Vec<Node>,
}

impl TreeSnapshot {
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A snapshot this crate produced and persisted itself.
#[derive(Debug, Clone)]
pub struct TrustedSnapshot(TreeSnapshot);

impl TrustedSnapshot {
    pub(crate) fn new(snapshot: TreeSnapshot) -> Self {
        Self(snapshot)
    }

    pub fn snapshot(&self) -> &TreeSnapshot {
        &self.0
    }
}

impl IndexedMerkleTree {
    /// Export the whole tree.
    pub fn export(&self) -> TreeSnapshot {
        TreeSnapshot {
            height: self.height,
            stage_height: self.stage_height,
            made_at: self.made_at,
            nodes: self.nodes[1..].to_vec(),
        }
    }

    /// Restore a self-produced snapshot without recomputing digests.
    ///
    /// Shape is still checked (node count, ids, leaf flags, bucket
    /// consistency) since a truncated record would otherwise panic on the
    /// first lookup.
    pub fn restore_trusted(trusted: TrustedSnapshot) -> Result<Self, CodecError> {
        let snapshot = trusted.0;
        let nodes = check_shape(snapshot.height, snapshot.nodes)?;
        Ok(Self {
            height: snapshot.height,
            stage_height: snapshot.stage_height,
            made_at: snapshot.made_at,
            nodes,
        })
    }

    /// Import an externally supplied snapshot, recomputing and checking
    /// every digest.
    pub fn import_verified(snapshot: TreeSnapshot) -> Result<Self, CodecError> {
        let nodes = check_shape(snapshot.height, snapshot.nodes)?;
        let first_leaf = nodes.len() >> 1;

        for node in &nodes[first_leaf..] {
            let computed = match &node.bucket {
                Some(bucket) => {
                    for (k, digest) in bucket.digests.iter().enumerate() {
                        let entry = hash_concat([bucket.user[k].as_str(), bucket.counterparty[k].as_str()]);
                        if entry != *digest {
                            return Err(CodecError::DigestMismatch {
                                index: node.id,
                                claimed: digest.clone(),
                                computed: entry,
                            });
                        }
                    }
                    bucket.leaf_digest()
                }
                None => empty_leaf_digest().to_string(),
            };
            ensure_digest(node, computed)?;
        }

        for i in (1..first_leaf).rev() {
            let computed = hash_concat([nodes[2 * i].digest.as_str(), nodes[2 * i + 1].digest.as_str()]);
            ensure_digest(&nodes[i], computed)?;
        }

        Ok(Self {
            height: snapshot.height,
            stage_height: snapshot.stage_height,
            made_at: snapshot.made_at,
            nodes,
        })
    }
}

fn ensure_digest(node: &Node, computed: String) -> Result<(), CodecError> {
    if node.digest != computed {
        return Err(CodecError::DigestMismatch {
            index: node.id,
            claimed: node.digest.clone(),
            computed,
        });
    }
    Ok(())
}

/// Validate the arena layout and re-insert the placeholder at slot 0.
fn check_shape(height: u32, exported: Vec<Node>) -> Result<Vec<Node>, CodecError> {
    validate_height(height)?;
    let size = 1usize << height;
    if exported.len() != size - 1 {
        return Err(CodecError::NodeCount {
            expected: size - 1,
            found: exported.len(),
        });
    }

    let first_leaf = size >> 1;
    let mut nodes = Vec::with_capacity(size);
    nodes.push(Node {
        id: 0,
        is_leaf: false,
        digest: String::new(),
        bucket: None,
    });

    for (offset, node) in exported.into_iter().enumerate() {
        let position = offset + 1;
        let shape_error = |reason: &str| CodecError::Shape {
            position,
            reason: reason.to_string(),
        };
        if node.id != position {
            return Err(shape_error("id does not match position"));
        }
        if node.is_leaf != (position >= first_leaf) {
            return Err(shape_error("leaf flag does not match position"));
        }
        if let Some(bucket) = &node.bucket {
            if !node.is_leaf {
                return Err(shape_error("internal node carries a bucket"));
            }
            if !bucket.is_well_formed() {
                return Err(shape_error("bucket sequences are empty or uneven"));
            }
        }
        nodes.push(node);
    }
    Ok(nodes)
}
