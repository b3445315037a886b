//! # In-Memory Store
//!
//! Full-fidelity implementation of [`AuditStore`] backed by parking_lot
//! mutexes. Serves development and tests; behavior (sequence assignment,
//! uniqueness, ordering) matches the Postgres store so the services can be
//! exercised without a database.
//!
//! No lock is ever held across an await point — every method locks,
//! operates synchronously, and returns owned clones.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;
use veritrail_core::{
    AnchorRecord, AnchorStatus, ComplianceMarker, DecisionContext, DecisionRecord, HexDigest,
    InteractionPayload, MerkleNode, MerkleRoot, TombstoneRecord,
};

use crate::{AuditStore, StoreError};

#[derive(Default)]
struct Inner {
    records: Vec<DecisionRecord>,
    payloads: Vec<InteractionPayload>,
    contexts: Vec<DecisionContext>,
    markers: Vec<ComplianceMarker>,
    roots: Vec<MerkleRoot>,
    nodes: Vec<MerkleNode>,
    anchors: Vec<AnchorRecord>,
    tombstones: Vec<TombstoneRecord>,
    next_sequence: i64,
}

/// Mutex-guarded in-memory audit store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored `full_hash` in place.
    ///
    /// Fault-injection hook for tamper drills: lets tests corrupt the
    /// persisted fingerprint without touching the plaintext, which is the
    /// scenario the integrity verifier exists to catch.
    pub fn corrupt_full_hash(&self, decision_id: &str, bogus: HexDigest) -> bool {
        let mut inner = self.inner.lock();
        match inner
            .records
            .iter_mut()
            .find(|r| r.decision_id == decision_id)
        {
            Some(record) => {
                record.full_hash = bogus;
                true
            }
            None => false,
        }
    }

    /// Number of records currently held. Test support.
    pub fn record_count(&self) -> usize {
        self.inner.lock().records.len()
    }
}

impl AuditStore for MemoryStore {
    async fn insert_decision(
        &self,
        mut record: DecisionRecord,
        payload: InteractionPayload,
        context: DecisionContext,
        markers: Vec<ComplianceMarker>,
    ) -> Result<DecisionRecord, StoreError> {
        let mut inner = self.inner.lock();
        if inner
            .records
            .iter()
            .any(|r| r.decision_id == record.decision_id)
        {
            return Err(StoreError::Duplicate {
                field: "decision_id",
                value: record.decision_id,
            });
        }

        inner.next_sequence += 1;
        record.sequence_number = inner.next_sequence;

        inner.records.push(record.clone());
        inner.payloads.push(payload);
        inner.contexts.push(context);
        inner.markers.extend(markers);
        Ok(record)
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<DecisionRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn get_by_decision_id(
        &self,
        decision_id: &str,
        include_deleted: bool,
    ) -> Result<Option<DecisionRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .records
            .iter()
            .find(|r| r.decision_id == decision_id && (include_deleted || !r.is_gdpr_deleted))
            .cloned())
    }

    async fn list_by_organization(
        &self,
        organization_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        include_deleted: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DecisionRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut matched: Vec<DecisionRecord> = inner
            .records
            .iter()
            .filter(|r| r.organization_id == organization_id)
            .filter(|r| include_deleted || !r.is_gdpr_deleted)
            .filter(|r| start.map_or(true, |s| r.created_at >= s))
            .filter(|r| end.map_or(true, |e| r.created_at <= e))
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.sequence_number);
        Ok(matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_sequence_range(
        &self,
        start_sequence: i64,
        end_sequence: i64,
    ) -> Result<Vec<DecisionRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut matched: Vec<DecisionRecord> = inner
            .records
            .iter()
            .filter(|r| r.sequence_number >= start_sequence && r.sequence_number <= end_sequence)
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.sequence_number);
        Ok(matched)
    }

    async fn list_unbatched(&self, limit: i64) -> Result<Vec<DecisionRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut matched: Vec<DecisionRecord> = inner
            .records
            .iter()
            .filter(|r| r.merkle_root.is_none())
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.sequence_number);
        Ok(matched.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn get_payload(
        &self,
        record_id: Uuid,
    ) -> Result<Option<InteractionPayload>, StoreError> {
        Ok(self
            .inner
            .lock()
            .payloads
            .iter()
            .find(|p| p.record_id == record_id)
            .cloned())
    }

    async fn get_context(&self, record_id: Uuid) -> Result<Option<DecisionContext>, StoreError> {
        Ok(self
            .inner
            .lock()
            .contexts
            .iter()
            .find(|c| c.record_id == record_id)
            .cloned())
    }

    async fn set_merkle_root(
        &self,
        start_sequence: i64,
        end_sequence: i64,
        root_hash: &HexDigest,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let mut updated = 0;
        for record in inner.records.iter_mut() {
            if record.sequence_number >= start_sequence
                && record.sequence_number <= end_sequence
            {
                record.merkle_root = Some(root_hash.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn set_anchor_tx(
        &self,
        root_hash: &HexDigest,
        tx_hash: &str,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let mut updated = 0;
        for record in inner.records.iter_mut() {
            if record.merkle_root.as_ref() == Some(root_hash) {
                record.anchor_tx_hash = Some(tx_hash.to_string());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn mark_deleted(
        &self,
        record_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| StoreError::NotFound(format!("record {record_id}")))?;
        record.is_gdpr_deleted = true;
        record.gdpr_deleted_at = Some(deleted_at);
        Ok(())
    }

    async fn purge_plaintext(&self, record_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.payloads.retain(|p| p.record_id != record_id);
        inner.contexts.retain(|c| c.record_id != record_id);
        Ok(())
    }

    async fn insert_tree(
        &self,
        root: MerkleRoot,
        nodes: Vec<MerkleNode>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let root_id = root.id;
        inner.roots.push(root);
        inner.nodes.extend(nodes.into_iter().map(|mut n| {
            n.root_id = Some(root_id);
            n
        }));
        Ok(())
    }

    async fn get_root_by_hash(
        &self,
        root_hash: &HexDigest,
    ) -> Result<Option<MerkleRoot>, StoreError> {
        Ok(self
            .inner
            .lock()
            .roots
            .iter()
            .find(|r| &r.root_hash == root_hash)
            .cloned())
    }

    async fn nodes_for_root(&self, root_id: Uuid) -> Result<Vec<MerkleNode>, StoreError> {
        Ok(self
            .inner
            .lock()
            .nodes
            .iter()
            .filter(|n| n.root_id == Some(root_id))
            .cloned()
            .collect())
    }

    async fn mark_root_anchored(
        &self,
        root_id: Uuid,
        anchor_id: Uuid,
        anchored_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let root = inner
            .roots
            .iter_mut()
            .find(|r| r.id == root_id)
            .ok_or_else(|| StoreError::NotFound(format!("merkle root {root_id}")))?;
        root.is_anchored = true;
        root.anchor_id = Some(anchor_id);
        root.anchored_at = Some(anchored_at);
        Ok(())
    }

    async fn insert_anchor(&self, anchor: AnchorRecord) -> Result<(), StoreError> {
        self.inner.lock().anchors.push(anchor);
        Ok(())
    }

    async fn update_anchor(&self, anchor: &AnchorRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let existing = inner
            .anchors
            .iter_mut()
            .find(|a| a.id == anchor.id)
            .ok_or_else(|| StoreError::NotFound(format!("anchor {}", anchor.id)))?;
        *existing = anchor.clone();
        Ok(())
    }

    async fn get_anchor(&self, id: Uuid) -> Result<Option<AnchorRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .anchors
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn list_anchors_by_status(
        &self,
        status: AnchorStatus,
    ) -> Result<Vec<AnchorRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .anchors
            .iter()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    async fn insert_tombstone(
        &self,
        tombstone: TombstoneRecord,
    ) -> Result<TombstoneRecord, StoreError> {
        let mut inner = self.inner.lock();
        if inner
            .tombstones
            .iter()
            .any(|t| t.deletion_hash == tombstone.deletion_hash)
        {
            return Err(StoreError::Duplicate {
                field: "deletion_hash",
                value: tombstone.deletion_hash.to_string(),
            });
        }
        inner.tombstones.push(tombstone.clone());
        Ok(tombstone)
    }

    async fn get_tombstone(&self, id: Uuid) -> Result<Option<TombstoneRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .tombstones
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn update_tombstone(&self, tombstone: &TombstoneRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let existing = inner
            .tombstones
            .iter_mut()
            .find(|t| t.id == tombstone.id)
            .ok_or_else(|| StoreError::NotFound(format!("tombstone {}", tombstone.id)))?;
        *existing = tombstone.clone();
        Ok(())
    }

    async fn list_tombstones_for_user(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Vec<TombstoneRecord>, StoreError> {
        let inner = self.inner.lock();
        let decision_ids: Vec<&str> = inner
            .records
            .iter()
            .filter(|r| {
                r.user_id.as_deref() == Some(user_id) && r.organization_id == organization_id
            })
            .map(|r| r.decision_id.as_str())
            .collect();
        let mut matched: Vec<TombstoneRecord> = inner
            .tombstones
            .iter()
            .filter(|t| decision_ids.contains(&t.original_decision_id.as_str()))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn count_orphan_tombstones(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock();
        let count = inner
            .tombstones
            .iter()
            .filter(|t| match t.record_id {
                Some(record_id) => !inner.records.iter().any(|r| r.id == record_id),
                None => true,
            })
            .count();
        Ok(count as u64)
    }
}
