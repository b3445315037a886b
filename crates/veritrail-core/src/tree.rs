//! # Merkle Tree Entities
//!
//! Persisted representation of a Merkle batch: individual nodes and the
//! root summary. Nodes reference each other by hash, never by in-memory
//! pointers — walking upward from a leaf is a lookup by `parent_hash`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::HexDigest;

/// One node of a materialized Merkle tree.
///
/// Leaves sit at `level` 0 with `position` equal to their index in the
/// batch; each level above halves (rounding up) the position space. A
/// non-leaf hash is the `merkle_hash` of its children's hex strings. For
/// an odd tail the node is paired with itself: `right_child_hash` is
/// stored as `None` while the hash input duplicates the left child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleNode {
    pub id: Uuid,
    pub node_hash: HexDigest,
    pub level: u32,
    pub position: u64,
    pub is_leaf: bool,
    pub is_root: bool,

    /// Leaf-only back-reference to the decision record it fingerprints.
    pub record_id: Option<Uuid>,

    pub left_child_hash: Option<HexDigest>,
    pub right_child_hash: Option<HexDigest>,
    pub parent_hash: Option<HexDigest>,

    /// The root this node belongs to. Set when the batch is persisted.
    pub root_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Root summary of a persisted Merkle batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleRoot {
    pub id: Uuid,
    pub root_hash: HexDigest,
    /// Levels above the leaves: 0 for a single-leaf tree.
    pub tree_depth: u32,
    pub leaf_count: u64,

    /// Actual inclusive sequence range of the batched records, ordered by
    /// ascending sequence number.
    pub start_sequence: i64,
    pub end_sequence: i64,

    pub created_at: DateTime<Utc>,

    pub anchor_id: Option<Uuid>,
    pub is_anchored: bool,
    pub anchored_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_serde_roundtrip() {
        let node = MerkleNode {
            id: Uuid::new_v4(),
            node_hash: HexDigest::from_bytes(&[1u8; 32]),
            level: 1,
            position: 0,
            is_leaf: false,
            is_root: false,
            record_id: None,
            left_child_hash: Some(HexDigest::from_bytes(&[2u8; 32])),
            right_child_hash: None,
            parent_hash: Some(HexDigest::from_bytes(&[3u8; 32])),
            root_id: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&node).unwrap();
        let back: MerkleNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_hash, node.node_hash);
        assert!(back.right_child_hash.is_none());
    }

    #[test]
    fn root_serde_roundtrip() {
        let root = MerkleRoot {
            id: Uuid::new_v4(),
            root_hash: HexDigest::from_bytes(&[9u8; 32]),
            tree_depth: 3,
            leaf_count: 5,
            start_sequence: 11,
            end_sequence: 15,
            created_at: Utc::now(),
            anchor_id: None,
            is_anchored: false,
            anchored_at: None,
        };
        let json = serde_json::to_string(&root).unwrap();
        let back: MerkleRoot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.start_sequence, 11);
        assert_eq!(back.end_sequence, 15);
        assert!(!back.is_anchored);
    }
}
