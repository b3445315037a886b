//! Merkle root and node persistence.
//!
//! A root and its nodes are written in one transaction so a crash can
//! never leave a root without its proof material.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use veritrail_core::{HexDigest, MerkleNode, MerkleRoot};

use super::{parse_digest, parse_digest_opt};
use crate::StoreError;

pub async fn insert_tree(
    pool: &PgPool,
    root: MerkleRoot,
    nodes: Vec<MerkleNode>,
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO merkle_roots (id, root_hash, tree_depth, leaf_count, start_sequence, \
         end_sequence, created_at, anchor_id, is_anchored, anchored_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(root.id)
    .bind(root.root_hash.as_str())
    .bind(root.tree_depth as i32)
    .bind(root.leaf_count as i64)
    .bind(root.start_sequence)
    .bind(root.end_sequence)
    .bind(root.created_at)
    .bind(root.anchor_id)
    .bind(root.is_anchored)
    .bind(root.anchored_at)
    .execute(&mut *tx)
    .await?;

    for node in &nodes {
        sqlx::query(
            "INSERT INTO merkle_nodes (id, node_hash, level, position, is_leaf, is_root, \
             record_id, left_child_hash, right_child_hash, parent_hash, root_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(node.id)
        .bind(node.node_hash.as_str())
        .bind(node.level as i32)
        .bind(node.position as i64)
        .bind(node.is_leaf)
        .bind(node.is_root)
        .bind(node.record_id)
        .bind(node.left_child_hash.as_ref().map(|h| h.as_str().to_string()))
        .bind(
            node.right_child_hash
                .as_ref()
                .map(|h| h.as_str().to_string()),
        )
        .bind(node.parent_hash.as_ref().map(|h| h.as_str().to_string()))
        .bind(root.id)
        .bind(node.created_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn get_root_by_hash(
    pool: &PgPool,
    root_hash: &HexDigest,
) -> Result<Option<MerkleRoot>, StoreError> {
    let row = sqlx::query_as::<_, RootRow>(
        "SELECT id, root_hash, tree_depth, leaf_count, start_sequence, end_sequence, \
         created_at, anchor_id, is_anchored, anchored_at \
         FROM merkle_roots WHERE root_hash = $1",
    )
    .bind(root_hash.as_str())
    .fetch_optional(pool)
    .await?;
    row.map(RootRow::into_root).transpose()
}

pub async fn nodes_for_root(pool: &PgPool, root_id: Uuid) -> Result<Vec<MerkleNode>, StoreError> {
    let rows = sqlx::query_as::<_, NodeRow>(
        "SELECT id, node_hash, level, position, is_leaf, is_root, record_id, \
         left_child_hash, right_child_hash, parent_hash, root_id, created_at \
         FROM merkle_nodes WHERE root_id = $1 ORDER BY level, position",
    )
    .bind(root_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(NodeRow::into_node).collect()
}

pub async fn mark_root_anchored(
    pool: &PgPool,
    root_id: Uuid,
    anchor_id: Uuid,
    anchored_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE merkle_roots SET is_anchored = TRUE, anchor_id = $1, anchored_at = $2 \
         WHERE id = $3",
    )
    .bind(anchor_id)
    .bind(anchored_at)
    .bind(root_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("merkle root {root_id}")));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct RootRow {
    id: Uuid,
    root_hash: String,
    tree_depth: i32,
    leaf_count: i64,
    start_sequence: i64,
    end_sequence: i64,
    created_at: DateTime<Utc>,
    anchor_id: Option<Uuid>,
    is_anchored: bool,
    anchored_at: Option<DateTime<Utc>>,
}

impl RootRow {
    fn into_root(self) -> Result<MerkleRoot, StoreError> {
        Ok(MerkleRoot {
            id: self.id,
            root_hash: parse_digest("root_hash", &self.root_hash)?,
            tree_depth: self.tree_depth as u32,
            leaf_count: self.leaf_count as u64,
            start_sequence: self.start_sequence,
            end_sequence: self.end_sequence,
            created_at: self.created_at,
            anchor_id: self.anchor_id,
            is_anchored: self.is_anchored,
            anchored_at: self.anchored_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: Uuid,
    node_hash: String,
    level: i32,
    position: i64,
    is_leaf: bool,
    is_root: bool,
    record_id: Option<Uuid>,
    left_child_hash: Option<String>,
    right_child_hash: Option<String>,
    parent_hash: Option<String>,
    root_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl NodeRow {
    fn into_node(self) -> Result<MerkleNode, StoreError> {
        Ok(MerkleNode {
            id: self.id,
            node_hash: parse_digest("node_hash", &self.node_hash)?,
            level: self.level as u32,
            position: self.position as u64,
            is_leaf: self.is_leaf,
            is_root: self.is_root,
            record_id: self.record_id,
            left_child_hash: parse_digest_opt("left_child_hash", self.left_child_hash.as_deref())?,
            right_child_hash: parse_digest_opt(
                "right_child_hash",
                self.right_child_hash.as_deref(),
            )?,
            parent_hash: parse_digest_opt("parent_hash", self.parent_hash.as_deref())?,
            root_id: self.root_id,
            created_at: self.created_at,
        })
    }
}
