//! # Merkle Engine
//!
//! Builds balanced binary Merkle trees over ordered leaf digests, generates
//! inclusion proofs, and verifies them.
//!
//! ## Construction Rules
//!
//! - Leaves sit at level 0 in input order (callers order by ascending
//!   sequence number).
//! - Adjacent nodes pair up; an odd tail pairs **with itself**: the parent
//!   hash input duplicates the left child, while the parent's
//!   `right_child_hash` is stored as `None` to mark the self-pair.
//! - A parent's hash is `merkle_hash(left, right)` — hex-string
//!   concatenation, see [`DecisionHasher::merkle_hash`].
//! - `tree_depth` counts levels above the leaves; a single-leaf tree has
//!   depth 0 and its leaf is the root.
//!
//! ## Proof Convention
//!
//! Each proof step records the sibling's hash and the side the *sibling*
//! occupies. A self-paired odd tail emits the node's own hash with side
//! `right`. Verification folds from the leaf: a `left` sibling is hashed
//! on the left of the running value, a `right` sibling on the right.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veritrail_core::{HexDigest, MerkleNode};

use crate::error::CryptoError;
use crate::hasher::DecisionHasher;

/// Which side of the pair a proof-step sibling occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingSide {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: HexDigest,
    pub position: SiblingSide,
}

/// An inclusion proof from a leaf to a root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: HexDigest,
    pub root_hash: HexDigest,
    pub proof_path: Vec<ProofStep>,
}

/// A fully materialized tree, ready for persistence.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    /// Every node, leaves first, then interior levels bottom-up. Leaf
    /// record back-references and `root_id` are filled in by the caller
    /// at persistence time.
    pub nodes: Vec<MerkleNode>,
    pub root_hash: HexDigest,
    pub tree_depth: u32,
    pub leaf_count: u64,
}

/// Build a tree from ordered leaf digests.
///
/// `max_depth` is the configured safety cap; a batch requiring more levels
/// is rejected before any hashing beyond that point.
pub fn build_tree(
    hasher: &DecisionHasher,
    leaves: &[HexDigest],
    max_depth: u32,
) -> Result<BuiltTree, CryptoError> {
    if leaves.is_empty() {
        return Err(CryptoError::EmptyInput);
    }

    let created_at = Utc::now();
    let mut nodes: Vec<MerkleNode> = leaves
        .iter()
        .enumerate()
        .map(|(i, leaf)| MerkleNode {
            id: Uuid::new_v4(),
            node_hash: leaf.clone(),
            level: 0,
            position: i as u64,
            is_leaf: true,
            is_root: false,
            record_id: None,
            left_child_hash: None,
            right_child_hash: None,
            parent_hash: None,
            root_id: None,
            created_at,
        })
        .collect();

    let mut current: Vec<usize> = (0..nodes.len()).collect();
    let mut level = 0u32;

    while current.len() > 1 {
        level += 1;
        if level > max_depth {
            return Err(CryptoError::DepthExceeded {
                depth: level,
                max: max_depth,
            });
        }

        let mut next = Vec::with_capacity(current.len().div_ceil(2));
        let mut i = 0;
        while i < current.len() {
            let left_idx = current[i];
            let right_idx = current.get(i + 1).copied();

            let left_hash = nodes[left_idx].node_hash.clone();
            // Odd tail: the node pairs with itself. The hash input
            // duplicates the left child even though no right node exists,
            // and the stored right child stays empty to mark the self-pair.
            let right_hash = right_idx
                .map(|ri| nodes[ri].node_hash.clone())
                .unwrap_or_else(|| left_hash.clone());
            let parent_hash = hasher.merkle_hash(&left_hash, &right_hash);

            nodes[left_idx].parent_hash = Some(parent_hash.clone());
            if let Some(ri) = right_idx {
                nodes[ri].parent_hash = Some(parent_hash.clone());
            }
            let right_child_hash = right_idx.map(|_| right_hash);

            nodes.push(MerkleNode {
                id: Uuid::new_v4(),
                node_hash: parent_hash,
                level,
                position: (i / 2) as u64,
                is_leaf: false,
                is_root: false,
                record_id: None,
                left_child_hash: Some(left_hash),
                right_child_hash,
                parent_hash: None,
                root_id: None,
                created_at,
            });
            next.push(nodes.len() - 1);
            i += 2;
        }
        current = next;
    }

    let root_idx = current[0];
    nodes[root_idx].is_root = true;
    let root_hash = nodes[root_idx].node_hash.clone();

    Ok(BuiltTree {
        nodes,
        root_hash,
        tree_depth: level,
        leaf_count: leaves.len() as u64,
    })
}

/// Generate an inclusion proof for a leaf over a persisted node set.
///
/// Walks leaf → root: at each level the sibling is the node sharing the
/// same parent hash with a different node hash. No sibling means the node
/// was self-paired, so the step carries its own hash on the `right`.
pub fn prove(nodes: &[MerkleNode], leaf_hash: &HexDigest) -> Result<MerkleProof, CryptoError> {
    let mut current = nodes
        .iter()
        .find(|n| n.is_leaf && n.node_hash.ct_eq(leaf_hash))
        .ok_or_else(|| CryptoError::LeafNotFound(leaf_hash.to_string()))?;

    let mut proof_path = Vec::new();
    while !current.is_root {
        let parent_hash = current
            .parent_hash
            .clone()
            .ok_or_else(|| CryptoError::MalformedTree("non-root node missing parent".into()))?;

        let sibling = nodes.iter().find(|n| {
            n.level == current.level
                && n.parent_hash.as_ref() == Some(&parent_hash)
                && !n.node_hash.ct_eq(&current.node_hash)
        });

        match sibling {
            Some(s) => proof_path.push(ProofStep {
                hash: s.node_hash.clone(),
                position: if s.position > current.position {
                    SiblingSide::Right
                } else {
                    SiblingSide::Left
                },
            }),
            None => proof_path.push(ProofStep {
                hash: current.node_hash.clone(),
                position: SiblingSide::Right,
            }),
        }

        current = nodes
            .iter()
            .find(|n| n.level == current.level + 1 && n.node_hash.ct_eq(&parent_hash))
            .ok_or_else(|| {
                CryptoError::MalformedTree(format!("parent node {parent_hash} missing"))
            })?;
    }

    Ok(MerkleProof {
        leaf_hash: leaf_hash.clone(),
        root_hash: current.node_hash.clone(),
        proof_path,
    })
}

/// Verify an inclusion proof against a root, constant-time at the final
/// comparison.
pub fn verify(
    hasher: &DecisionHasher,
    leaf_hash: &HexDigest,
    root_hash: &HexDigest,
    proof_path: &[ProofStep],
) -> bool {
    let mut cur = leaf_hash.clone();
    for step in proof_path {
        cur = match step.position {
            SiblingSide::Left => hasher.merkle_hash(&step.hash, &cur),
            SiblingSide::Right => hasher.merkle_hash(&cur, &step.hash),
        };
    }
    cur.ct_eq(root_hash)
}
