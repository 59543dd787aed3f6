//! # Indexed Merkle Tree
//!
//! A fixed-height binary Merkle tree whose leaves are *collision buckets*.
//! Items are not appended left to right; each one is routed to a
//! pseudo-random leaf derived from the hash of its identifier, and items
//! that land on the same leaf are concatenated in insertion order.
//!
//! ## Layout
//!
//! ```text
//!                    1                      root
//!            2               3
//!        4       5       6       7
//!      8   9  10  11  12  13  14  15        leaves (height = 4)
//! ```
//!
//! Nodes live in one flat vector indexed from 1; index 0 is a placeholder.
//! Children of `i` are `2i` and `2i + 1`, the leaves occupy
//! `[2^(h-1), 2^h)`, and the tree owns the vector outright. No node ever
//! holds a reference to another.
//!
//! ## Digests
//!
//! - empty leaf: `H("initial no data")`
//! - bucket entry: `H(user ++ counterparty)`
//! - occupied leaf: `H(entry_0 ++ entry_1 ++ ...)` in insertion order
//! - internal node: `H(left ++ right)`
//!
//! where `H` is Keccak-256 over UTF-8 text and `++` concatenates hex
//! strings. Because bucket order feeds the leaf digest, reordering a
//! bucket changes the root.

pub mod codec;
pub mod error;
pub mod proof;

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{EMPTY_LEAF_SEED, LEAF_INDEX_HEX_CHARS, MAX_TREE_HEIGHT};
use crate::crypto::hash::{hash_concat, hash_text, keccak256, strip_hex_prefix};

pub use codec::{TreeSnapshot, TrustedSnapshot};
pub use error::{CodecError, TreeError};
pub use proof::{ProofNode, Slice};

/// Digest of a leaf that has never been written.
pub fn empty_leaf_digest() -> &'static str {
    static EMPTY: OnceLock<String> = OnceLock::new();
    EMPTY.get_or_init(|| hash_text(EMPTY_LEAF_SEED))
}

/// Reject heights outside `1..=MAX_TREE_HEIGHT`.
pub fn validate_height(height: u32) -> Result<(), TreeError> {
    if height == 0 || height > MAX_TREE_HEIGHT {
        return Err(TreeError::InvalidHeight(height));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// The ordered contents of one leaf.
///
/// The three sequences always have equal length and entry `k` of each
/// describes the same insertion. They only grow through [`Bucket::push`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    digests: Vec<String>,
    user: Vec<String>,
    counterparty: Vec<String>,
}

impl Bucket {
    fn push(&mut self, user: &str, counterparty: &str) {
        self.digests.push(hash_concat([user, counterparty]));
        self.user.push(user.to_string());
        self.counterparty.push(counterparty.to_string());
    }

    fn push_hashed(&mut self, digest: String, user: String, counterparty: String) {
        self.digests.push(digest);
        self.user.push(user);
        self.counterparty.push(counterparty);
    }

    /// Per-entry digests, in insertion order.
    pub fn digests(&self) -> &[String] {
        &self.digests
    }

    /// User-side ciphertexts, in insertion order.
    pub fn user_ciphertexts(&self) -> &[String] {
        &self.user
    }

    /// Counterparty-side ciphertexts, in insertion order.
    pub fn counterparty_ciphertexts(&self) -> &[String] {
        &self.counterparty
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Digest of the leaf holding this bucket.
    pub fn leaf_digest(&self) -> String {
        hash_concat(self.digests.iter().map(String::as_str))
    }

    fn is_well_formed(&self) -> bool {
        !self.digests.is_empty()
            && self.digests.len() == self.user.len()
            && self.digests.len() == self.counterparty.len()
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One slot of the tree arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    id: usize,
    is_leaf: bool,
    digest: String,
    bucket: Option<Bucket>,
}

impl Node {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// `None` for internal nodes and for leaves nothing has landed on.
    pub fn bucket(&self) -> Option<&Bucket> {
        self.bucket.as_ref()
    }
}

/// One item for [`IndexedMerkleTree::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub id: String,
    pub user: String,
    pub counterparty: String,
}

impl LeafEntry {
    pub fn new(id: impl Into<String>, user: impl Into<String>, counterparty: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user: user.into(),
            counterparty: counterparty.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// IndexedMerkleTree
// ---------------------------------------------------------------------------

/// Fixed-height Merkle tree with hash-indexed collision buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedMerkleTree {
    height: u32,
    stage_height: Option<u64>,
    made_at: Option<DateTime<Utc>>,
    nodes: Vec<Node>,
}

impl IndexedMerkleTree {
    /// Allocate an empty tree of `height` levels.
    ///
    /// Every leaf starts at the empty-leaf digest and internal nodes are
    /// aggregated bottom-up, so two empty trees of equal height always have
    /// equal roots.
    pub fn new(height: u32) -> Result<Self, TreeError> {
        validate_height(height)?;
        let size = 1usize << height;
        let first_leaf = size >> 1;
        let empty = empty_leaf_digest();

        let nodes = (0..size)
            .map(|id| {
                let is_leaf = id >= first_leaf;
                Node {
                    id,
                    is_leaf,
                    digest: if is_leaf { empty.to_string() } else { String::new() },
                    bucket: None,
                }
            })
            .collect();

        let mut tree = Self {
            height,
            stage_height: None,
            made_at: None,
            nodes,
        };
        tree.aggregate_internal();
        Ok(tree)
    }

    /// Build a tree for `stage_height` from `entries` in one pass.
    ///
    /// Entry and leaf digests are computed on the rayon pool; the result is
    /// identical to inserting the entries one by one in the given order.
    pub fn build(height: u32, stage_height: u64, entries: &[LeafEntry]) -> Result<Self, TreeError> {
        let mut tree = Self::new(height)?;
        tree.set_stage_height(stage_height);

        let hashed: Vec<(usize, String)> = entries
            .par_iter()
            .map(|e| {
                (
                    tree.leaf_index_of(&e.id),
                    hash_concat([e.user.as_str(), e.counterparty.as_str()]),
                )
            })
            .collect();

        let mut touched: Vec<usize> = Vec::new();
        for ((leaf, digest), entry) in hashed.into_iter().zip(entries) {
            let bucket = tree.nodes[leaf].bucket.get_or_insert_with(|| {
                touched.push(leaf);
                Bucket::default()
            });
            bucket.push_hashed(digest, entry.user.clone(), entry.counterparty.clone());
        }

        let leaf_digests: Vec<(usize, String)> = touched
            .par_iter()
            .filter_map(|&leaf| {
                tree.nodes[leaf]
                    .bucket
                    .as_ref()
                    .map(|b| (leaf, b.leaf_digest()))
            })
            .collect();
        for (leaf, digest) in leaf_digests {
            tree.nodes[leaf].digest = digest;
        }

        tree.aggregate_internal();
        tree.made_at = Some(Utc::now());
        Ok(tree)
    }

    // -- Accessors ---------------------------------------------------------

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stage_height(&self) -> Option<u64> {
        self.stage_height
    }

    pub fn set_stage_height(&mut self, stage_height: u64) {
        self.stage_height = Some(stage_height);
    }

    /// When the tree was built, if recorded.
    pub fn made_at(&self) -> Option<DateTime<Utc>> {
        self.made_at
    }

    pub fn set_made_at(&mut self, at: DateTime<Utc>) {
        self.made_at = Some(at);
    }

    /// Number of leaves, `2^(height-1)`.
    pub fn leaf_count(&self) -> usize {
        1usize << (self.height - 1)
    }

    /// Indices of every leaf.
    pub fn leaf_ids(&self) -> Range<usize> {
        self.leaf_count()..self.nodes.len()
    }

    /// Indices of every node, root first.
    pub fn node_ids(&self) -> Range<usize> {
        1..self.nodes.len()
    }

    pub fn is_leaf_index(&self, index: usize) -> bool {
        self.leaf_ids().contains(&index)
    }

    pub fn root_digest(&self) -> &str {
        &self.nodes[1].digest
    }

    /// The node at `index`.
    pub fn node(&self, index: usize) -> Result<&Node, TreeError> {
        if index == 0 || index >= self.nodes.len() {
            return Err(TreeError::IndexOutOfRange {
                index,
                len: self.nodes.len(),
            });
        }
        Ok(&self.nodes[index])
    }

    pub fn node_digest(&self, index: usize) -> Result<&str, TreeError> {
        self.node(index).map(Node::digest)
    }

    /// Digests for a set of node indices.
    pub fn node_digests(&self, indices: &[usize]) -> Result<BTreeMap<usize, String>, TreeError> {
        indices
            .iter()
            .map(|&i| self.node_digest(i).map(|d| (i, d.to_string())))
            .collect()
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    // -- Leaf indexing -----------------------------------------------------

    /// Leaf an identifier is routed to.
    ///
    /// Takes the first 48 bits of `H(id)` as an integer `v` and returns
    /// `2^(h-1) + v mod 2^(h-1)`.
    pub fn leaf_index_of(&self, id: &str) -> usize {
        let digest = keccak256(id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix[2..].copy_from_slice(&digest[..LEAF_INDEX_HEX_CHARS / 2]);
        self.leaf_slot(u64::from_be_bytes(prefix))
    }

    /// Leaf for an identifier that has already been hashed, given as hex
    /// with an optional `0x` prefix.
    pub fn leaf_index_of_digest(&self, digest: &str) -> Result<usize, TreeError> {
        let hex = strip_hex_prefix(digest);
        let end = hex.len().min(LEAF_INDEX_HEX_CHARS);
        let prefix = hex
            .get(..end)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| TreeError::InvalidDigest(digest.to_string()))?;
        let value = u64::from_str_radix(prefix, 16)
            .map_err(|_| TreeError::InvalidDigest(digest.to_string()))?;
        Ok(self.leaf_slot(value))
    }

    fn leaf_slot(&self, value: u64) -> usize {
        let leaves = self.leaf_count() as u64;
        (leaves + value % leaves) as usize
    }

    /// Leaf indices for a batch of pre-hashed identifiers, failing if any of
    /// them lands on a leaf that holds nothing. Used when auditing a
    /// committed stage.
    pub fn audit_leaf_indices<S: AsRef<str>>(&self, digests: &[S]) -> Result<Vec<usize>, TreeError> {
        digests
            .iter()
            .map(|d| {
                let leaf = self.leaf_index_of_digest(d.as_ref())?;
                match self.nodes[leaf].bucket {
                    Some(_) => Ok(leaf),
                    None => Err(TreeError::EmptyLeaf(leaf)),
                }
            })
            .collect()
    }

    // -- Insertion ---------------------------------------------------------

    /// Append `(user, counterparty)` to the bucket `id` maps to and refresh
    /// every digest on its path. Returns the leaf index.
    pub fn insert(&mut self, id: &str, user: &str, counterparty: &str) -> Result<usize, TreeError> {
        if self.stage_height.is_none() {
            return Err(TreeError::StageHeightUnset);
        }
        let leaf = self.leaf_index_of(id);
        self.nodes[leaf]
            .bucket
            .get_or_insert_with(Bucket::default)
            .push(user, counterparty);
        self.refresh_path(leaf);
        Ok(leaf)
    }

    fn refresh_path(&mut self, leaf: usize) {
        self.refresh_leaf(leaf);
        let mut i = leaf >> 1;
        while i > 0 {
            self.refresh_internal(i);
            i >>= 1;
        }
    }

    fn refresh_leaf(&mut self, leaf: usize) {
        let digest = match &self.nodes[leaf].bucket {
            Some(bucket) => bucket.leaf_digest(),
            None => empty_leaf_digest().to_string(),
        };
        self.nodes[leaf].digest = digest;
    }

    fn refresh_internal(&mut self, i: usize) {
        let digest = hash_concat([
            self.nodes[2 * i].digest.as_str(),
            self.nodes[2 * i + 1].digest.as_str(),
        ]);
        self.nodes[i].digest = digest;
    }

    fn aggregate_internal(&mut self) {
        for i in (1..self.leaf_count()).rev() {
            self.refresh_internal(i);
        }
    }

    // -- Bucket lookups ----------------------------------------------------

    /// Bucket of the leaf `id` maps to, if anything landed there.
    pub fn bucket_of(&self, id: &str) -> Option<&Bucket> {
        self.nodes[self.leaf_index_of(id)].bucket.as_ref()
    }

    /// Entry digests of the leaf `id` maps to, including any collisions.
    pub fn bucket_digests_of(&self, id: &str) -> &[String] {
        self.bucket_of(id).map(Bucket::digests).unwrap_or(&[])
    }

    pub fn user_ciphertexts_of(&self, id: &str) -> &[String] {
        self.bucket_of(id).map(Bucket::user_ciphertexts).unwrap_or(&[])
    }

    pub fn counterparty_ciphertexts_of(&self, id: &str) -> &[String] {
        self.bucket_of(id)
            .map(Bucket::counterparty_ciphertexts)
            .unwrap_or(&[])
    }

    /// Bucket at a leaf index. Fails on internal nodes.
    pub fn leaf_bucket(&self, index: usize) -> Result<Option<&Bucket>, TreeError> {
        let node = self.node(index)?;
        if !node.is_leaf {
            return Err(TreeError::NotALeaf(index));
        }
        Ok(node.bucket.as_ref())
    }

    /// Entry digests for several leaves at once.
    pub fn leaf_bucket_digests(&self, indices: &[usize]) -> Result<BTreeMap<usize, Vec<String>>, TreeError> {
        indices
            .iter()
            .map(|&i| {
                let digests = self
                    .leaf_bucket(i)?
                    .map(|b| b.digests.clone())
                    .unwrap_or_default();
                Ok((i, digests))
            })
            .collect()
    }

    // -- Statistics --------------------------------------------------------

    fn occupied_buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.nodes[self.leaf_ids()]
            .iter()
            .filter_map(|n| n.bucket.as_ref())
    }

    /// Size of the largest bucket; 0 for an empty tree.
    pub fn max_collision_count(&self) -> usize {
        self.occupied_buckets().map(Bucket::len).max().unwrap_or(0)
    }

    /// Mean bucket size over occupied leaves; 0.0 for an empty tree.
    pub fn average_collision_count(&self) -> f64 {
        let (total, occupied) = self
            .occupied_buckets()
            .fold((0usize, 0usize), |(t, n), b| (t + b.len(), n + 1));
        if occupied == 0 {
            0.0
        } else {
            total as f64 / occupied as f64
        }
    }

    /// Total number of entries across all buckets.
    pub fn entry_count(&self) -> usize {
        self.occupied_buckets().map(Bucket::len).sum()
    }

    /// Every user ciphertext, leaf by leaf in index order.
    pub fn all_user_ciphertexts(&self) -> Vec<&str> {
        self.occupied_buckets()
            .flat_map(|b| b.user.iter().map(String::as_str))
            .collect()
    }

    /// Every counterparty ciphertext, leaf by leaf in index order.
    pub fn all_counterparty_ciphertexts(&self) -> Vec<&str> {
        self.occupied_buckets()
            .flat_map(|b| b.counterparty.iter().map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(height: u32) -> IndexedMerkleTree {
        let mut tree = IndexedMerkleTree::new(height).unwrap();
        tree.set_stage_height(1);
        tree
    }

    /// Find two ids that collide in a tree of the given height.
    fn colliding_pair(tree: &IndexedMerkleTree) -> (String, String) {
        let mut seen: BTreeMap<usize, String> = BTreeMap::new();
        for n in 0.. {
            let id = format!("id-{n}");
            let leaf = tree.leaf_index_of(&id);
            if let Some(prev) = seen.insert(leaf, id.clone()) {
                return (prev, id);
            }
        }
        unreachable!()
    }

    #[test]
    fn zero_height_rejected() {
        assert_eq!(
            IndexedMerkleTree::new(0).unwrap_err(),
            TreeError::InvalidHeight(0)
        );
    }

    #[test]
    fn oversized_height_rejected() {
        assert!(IndexedMerkleTree::new(MAX_TREE_HEIGHT + 1).is_err());
    }

    #[test]
    fn empty_root_is_deterministic() {
        let a = IndexedMerkleTree::new(5).unwrap();
        let b = IndexedMerkleTree::new(5).unwrap();
        assert_eq!(a.root_digest(), b.root_digest());
        assert_ne!(a.root_digest(), IndexedMerkleTree::new(6).unwrap().root_digest());
    }

    #[test]
    fn empty_height_two_root_by_hand() {
        let tree = IndexedMerkleTree::new(2).unwrap();
        let e = empty_leaf_digest();
        assert_eq!(tree.root_digest(), hash_concat([e, e]));
    }

    #[test]
    fn empty_root_folds_empty_leaf_per_level() {
        for height in 1..=6 {
            let mut expected = empty_leaf_digest().to_string();
            for _ in 1..height {
                expected = hash_concat([expected.as_str(), expected.as_str()]);
            }
            let tree = IndexedMerkleTree::new(height).unwrap();
            assert_eq!(tree.root_digest(), expected, "height {height}");
        }
    }

    #[test]
    fn height_one_tree_is_a_single_leaf() {
        let mut tree = staged(1);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.root_digest(), empty_leaf_digest());
        let leaf = tree.insert("x", "u", "c").unwrap();
        assert_eq!(leaf, 1);
        assert_eq!(tree.root_digest(), hash_concat([hash_text("uc").as_str()]));
    }

    #[test]
    fn leaf_index_in_range() {
        let tree = IndexedMerkleTree::new(4).unwrap();
        for n in 0..200 {
            let idx = tree.leaf_index_of(&format!("tx{n}"));
            assert!((8..16).contains(&idx), "index {idx} out of leaf range");
        }
    }

    #[test]
    fn leaf_index_matches_hex_prefix_rule() {
        let tree = IndexedMerkleTree::new(4).unwrap();
        let digest = hash_text("tx1");
        let v = u64::from_str_radix(&digest[..12], 16).unwrap();
        assert_eq!(tree.leaf_index_of("tx1"), 8 + (v % 8) as usize);
        assert_eq!(tree.leaf_index_of_digest(&digest).unwrap(), tree.leaf_index_of("tx1"));
        assert_eq!(
            tree.leaf_index_of_digest(&format!("0x{digest}")).unwrap(),
            tree.leaf_index_of("tx1")
        );
    }

    #[test]
    fn leaf_index_of_bad_digest() {
        let tree = IndexedMerkleTree::new(4).unwrap();
        assert!(tree.leaf_index_of_digest("0x").is_err());
        assert!(tree.leaf_index_of_digest("zz").is_err());
    }

    #[test]
    fn insert_requires_stage_height() {
        let mut tree = IndexedMerkleTree::new(3).unwrap();
        assert_eq!(
            tree.insert("a", "u", "c").unwrap_err(),
            TreeError::StageHeightUnset
        );
    }

    #[test]
    fn insert_changes_root_and_records_bucket() {
        let mut tree = staged(4);
        let empty_root = tree.root_digest().to_string();
        let leaf = tree.insert("tx1", "u1", "c1").unwrap();

        assert_ne!(tree.root_digest(), empty_root);
        assert_eq!(tree.bucket_digests_of("tx1"), &[hash_text("u1c1")]);
        assert_eq!(tree.user_ciphertexts_of("tx1"), &["u1".to_string()]);
        assert_eq!(tree.counterparty_ciphertexts_of("tx1"), &["c1".to_string()]);
        assert_eq!(tree.node_digest(leaf).unwrap(), hash_text(&hash_text("u1c1")));
    }

    #[test]
    fn collisions_concatenate_in_order() {
        let mut forward = staged(3);
        let (a, b) = colliding_pair(&forward);
        forward.insert(&a, "ua", "ca").unwrap();
        forward.insert(&b, "ub", "cb").unwrap();

        let mut reverse = staged(3);
        reverse.insert(&b, "ub", "cb").unwrap();
        reverse.insert(&a, "ua", "ca").unwrap();

        let bucket = forward.bucket_of(&a).unwrap();
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.digests()[0], hash_text("uaca"));
        assert_eq!(bucket.digests()[1], hash_text("ubcb"));
        assert_ne!(forward.root_digest(), reverse.root_digest());
    }

    #[test]
    fn build_matches_incremental_insertion() {
        let entries: Vec<LeafEntry> = (0..300)
            .map(|n| LeafEntry::new(format!("r{n}"), format!("u{n}"), format!("c{n}")))
            .collect();

        let built = IndexedMerkleTree::build(6, 9, &entries).unwrap();

        let mut incremental = IndexedMerkleTree::new(6).unwrap();
        incremental.set_stage_height(9);
        for e in &entries {
            incremental.insert(&e.id, &e.user, &e.counterparty).unwrap();
        }

        assert_eq!(built.root_digest(), incremental.root_digest());
        assert_eq!(built.nodes, incremental.nodes);
        assert_eq!(built.stage_height(), Some(9));
        assert!(built.made_at().is_some());
    }

    #[test]
    fn build_with_no_entries_is_empty_tree() {
        let built = IndexedMerkleTree::build(4, 1, &[]).unwrap();
        assert_eq!(built.root_digest(), IndexedMerkleTree::new(4).unwrap().root_digest());
    }

    #[test]
    fn leaf_bucket_rejects_internal_nodes() {
        let tree = staged(4);
        assert_eq!(tree.leaf_bucket(3).unwrap_err(), TreeError::NotALeaf(3));
        assert!(tree.leaf_bucket(8).unwrap().is_none());
        assert!(matches!(
            tree.leaf_bucket(16),
            Err(TreeError::IndexOutOfRange { index: 16, len: 16 })
        ));
        assert!(tree.leaf_bucket_digests(&[8, 2]).is_err());
    }

    #[test]
    fn node_zero_is_not_addressable() {
        let tree = staged(3);
        assert!(tree.node(0).is_err());
        assert_eq!(tree.node_ids(), 1..8);
        assert_eq!(tree.leaf_ids(), 4..8);
    }

    #[test]
    fn node_digests_bulk_lookup() {
        let mut tree = staged(3);
        tree.insert("a", "u", "c").unwrap();
        let map = tree.node_digests(&[1, 4, 5]).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map[&1], tree.root_digest());
    }

    #[test]
    fn collision_statistics() {
        let mut tree = staged(3);
        assert_eq!(tree.max_collision_count(), 0);
        assert_eq!(tree.average_collision_count(), 0.0);

        let (a, b) = colliding_pair(&tree);
        tree.insert(&a, "1", "1").unwrap();
        tree.insert(&b, "2", "2").unwrap();
        let lone = (0..)
            .map(|n| format!("lone-{n}"))
            .find(|id| tree.leaf_index_of(id) != tree.leaf_index_of(&a))
            .unwrap();
        tree.insert(&lone, "3", "3").unwrap();

        assert_eq!(tree.max_collision_count(), 2);
        assert_eq!(tree.average_collision_count(), 1.5);
        assert_eq!(tree.entry_count(), 3);
    }

    #[test]
    fn ciphertext_export_covers_all_entries() {
        let mut tree = staged(4);
        for n in 0..10 {
            tree.insert(&format!("t{n}"), &format!("u{n}"), &format!("c{n}")).unwrap();
        }
        let mut users = tree.all_user_ciphertexts();
        users.sort();
        let mut expected: Vec<String> = (0..10).map(|n| format!("u{n}")).collect();
        expected.sort();
        assert_eq!(users, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(tree.all_counterparty_ciphertexts().len(), 10);
    }

    #[test]
    fn audit_requires_occupied_leaves() {
        let mut tree = staged(4);
        tree.insert("present", "u", "c").unwrap();
        let present = hash_text("present");
        assert_eq!(
            tree.audit_leaf_indices(&[present.clone()]).unwrap(),
            vec![tree.leaf_index_of("present")]
        );

        let absent = (0..)
            .map(|n| hash_text(&format!("absent-{n}")))
            .find(|d| tree.leaf_index_of_digest(d).unwrap() != tree.leaf_index_of("present"))
            .unwrap();
        assert!(matches!(
            tree.audit_leaf_indices(&[present, absent]),
            Err(TreeError::EmptyLeaf(_))
        ));
    }
}
