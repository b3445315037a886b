//! # Merkle Batcher
//!
//! Periodically drains records that no root covers yet, builds a Merkle
//! tree over their full hashes in ascending sequence order, persists the
//! tree, stamps `merkle_root` back onto every covered record, and hands
//! the root to the anchor worker.
//!
//! ## Range Semantics
//!
//! A batch covers the **actual** closed sequence range
//! `[first.sequence_number, last.sequence_number]` of the drained records.
//! Sequence assignment is monotonic, so no record with a sequence inside
//! the range can appear after the drain — the range is closed the moment
//! the snapshot is taken.
//!
//! Anchoring failures never fail the batch: the anchor row carries the
//! failure and a later worker tick retries.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;
use veritrail_anchor::{AnchorWorker, LedgerClient};
use veritrail_core::{AuditError, HexDigest, MerkleRoot};
use veritrail_crypto::{build_tree, DecisionHasher};
use veritrail_store::AuditStore;

/// Batcher configuration.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Merkle depth safety cap.
    pub max_tree_depth: u32,
    /// Maximum records drained per batch.
    pub batch_limit: i64,
}

impl BatchConfig {
    pub fn from_settings(settings: &veritrail_core::Settings) -> Self {
        Self {
            max_tree_depth: settings.merkle_tree_depth,
            ..Self::default()
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: 32,
            batch_limit: 1024,
        }
    }
}

/// Builds and anchors Merkle batches over the append-only log.
pub struct MerkleBatcher<S, L> {
    store: Arc<S>,
    hasher: DecisionHasher,
    worker: AnchorWorker<S, L>,
    config: BatchConfig,
}

impl<S: AuditStore, L: LedgerClient> MerkleBatcher<S, L> {
    pub fn new(
        store: Arc<S>,
        hasher: DecisionHasher,
        worker: AnchorWorker<S, L>,
        config: BatchConfig,
    ) -> Self {
        Self {
            store,
            hasher,
            worker,
            config,
        }
    }

    /// Build one batch. Returns the new root, or `None` when no records
    /// are waiting.
    pub async fn run_once(&self) -> Result<Option<MerkleRoot>, AuditError> {
        let records = self
            .store
            .list_unbatched(self.config.batch_limit)
            .await
            .map_err(AuditError::from)?;
        if records.is_empty() {
            return Ok(None);
        }

        let leaves: Vec<HexDigest> = records.iter().map(|r| r.full_hash.clone()).collect();
        let mut tree = build_tree(&self.hasher, &leaves, self.config.max_tree_depth)
            .map_err(AuditError::from)?;

        // Leaf nodes come back in input order: stamp record back-references.
        for (node, record) in tree.nodes.iter_mut().zip(records.iter()) {
            node.record_id = Some(record.id);
        }

        let start_sequence = records[0].sequence_number;
        let end_sequence = records[records.len() - 1].sequence_number;
        let root = MerkleRoot {
            id: Uuid::new_v4(),
            root_hash: tree.root_hash.clone(),
            tree_depth: tree.tree_depth,
            leaf_count: tree.leaf_count,
            start_sequence,
            end_sequence,
            created_at: Utc::now(),
            anchor_id: None,
            is_anchored: false,
            anchored_at: None,
        };

        self.store
            .insert_tree(root.clone(), tree.nodes)
            .await
            .map_err(AuditError::from)?;
        let covered = self
            .store
            .set_merkle_root(start_sequence, end_sequence, &root.root_hash)
            .await
            .map_err(AuditError::from)?;

        tracing::info!(
            root = %root.root_hash,
            leaves = root.leaf_count,
            start = start_sequence,
            end = end_sequence,
            covered,
            "merkle batch built"
        );

        if let Err(e) = self.worker.anchor_root(&root).await {
            // The anchor row carries the failure; a later tick retries.
            tracing::warn!(root = %root.root_hash, error = %e, "anchoring deferred");
        }

        Ok(Some(root))
    }

    /// Run on an interval until the shutdown signal flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("merkle batcher stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "merkle batch failed");
                    }
                    if let Err(e) = self.worker.tick().await {
                        tracing::warn!(error = %e, "anchor maintenance tick failed");
                    }
                }
            }
        }
    }
}
