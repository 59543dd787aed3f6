//! Inclusion proofs ("slices") and batch subtree extraction.
//!
//! A slice lists, for every level from the leaf up, the `(left, right)`
//! pair of digests that hash into the parent, and finishes with the root.
//! On the wire it is flattened to `[l0, r0, l1, r1, ..., root]`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{IndexedMerkleTree, TreeError};
use crate::crypto::hash::hash_concat;

/// Co-path from one leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice {
    pub leaf_index: usize,
    pub pairs: Vec<(String, String)>,
    pub root: String,
}

impl Slice {
    /// The flat wire layout.
    pub fn to_flat(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.pairs.len() * 2 + 1);
        for (left, right) in &self.pairs {
            out.push(left.clone());
            out.push(right.clone());
        }
        out.push(self.root.clone());
        out
    }

    /// Check that `leaf_digest` folds up through the co-path to
    /// `published_root`.
    ///
    /// At each level the running digest must sit on the side the index
    /// parity says it does; a slice for the right leaf checked against the
    /// wrong root, or a tampered pair, fails.
    pub fn verify(&self, leaf_digest: &str, published_root: &str) -> bool {
        if self.root != published_root {
            return false;
        }
        let mut index = self.leaf_index;
        let mut current = leaf_digest.to_string();
        for (left, right) in &self.pairs {
            if index <= 1 {
                return false;
            }
            let on_path = if index % 2 == 0 { left } else { right };
            if *on_path != current {
                return false;
            }
            current = hash_concat([left.as_str(), right.as_str()]);
            index >>= 1;
        }
        index == 1 && current == self.root
    }
}

/// A node handed out by [`IndexedMerkleTree::collect_subtrees`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofNode {
    pub id: usize,
    pub digest: String,
    pub is_leaf: bool,
    /// Entry digests for occupied leaves; `None` for internal nodes and
    /// empty leaves.
    pub bucket_digests: Option<Vec<String>>,
}

impl IndexedMerkleTree {
    /// Inclusion slice for the leaf `id` maps to.
    pub fn extract_proof(&self, id: &str) -> Slice {
        self.slice_from(self.leaf_index_of(id))
    }

    /// Inclusion slice for a leaf index.
    pub fn extract_proof_at(&self, leaf_index: usize) -> Result<Slice, TreeError> {
        self.leaf_bucket(leaf_index)?;
        Ok(self.slice_from(leaf_index))
    }

    fn slice_from(&self, leaf_index: usize) -> Slice {
        let nodes = self.nodes();
        let mut pairs = Vec::with_capacity(self.height() as usize - 1);
        let mut index = leaf_index;
        while index > 1 {
            let left = index & !1;
            pairs.push((nodes[left].digest.clone(), nodes[left + 1].digest.clone()));
            index >>= 1;
        }
        Slice {
            leaf_index,
            pairs,
            root: self.root_digest().to_string(),
        }
    }

    /// Minimal set of nodes from which the path of every requested node
    /// to the root can be recomputed.
    ///
    /// Indices may be leaves or internal nodes; index 1 is the root
    /// itself. Returns the requested nodes plus each sibling of a path
    /// node that is not already derivable from another requested path.
    /// Duplicates are ignored.
    pub fn collect_subtrees(&self, indices: &[usize]) -> Result<BTreeMap<usize, ProofNode>, TreeError> {
        let mut on_path = BTreeSet::new();
        for &index in indices {
            self.node(index)?;
            let mut i = index;
            while i >= 1 && on_path.insert(i) {
                i >>= 1;
            }
        }

        let mut wanted: BTreeSet<usize> = indices.iter().copied().collect();
        for &i in &on_path {
            if i > 1 && !on_path.contains(&(i ^ 1)) {
                wanted.insert(i ^ 1);
            }
        }

        let nodes = self.nodes();
        Ok(wanted
            .into_iter()
            .map(|i| {
                let node = &nodes[i];
                let proof = ProofNode {
                    id: i,
                    digest: node.digest.clone(),
                    is_leaf: node.is_leaf,
                    bucket_digests: node.bucket.as_ref().map(|b| b.digests().to_vec()),
                };
                (i, proof)
            })
            .collect())
    }
}
