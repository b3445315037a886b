//! # Privacy Deletion
//!
//! GDPR/CCPA-style erasure that keeps the log verifiable. For every
//! selected record:
//!
//! 1. A cryptographic tombstone binds the record's `full_hash` to the
//!    deletion event (who, when, why).
//! 2. The record is flagged deleted and its interaction payload and
//!    context plaintext are purged.
//! 3. The record row and its four hashes remain, so Merkle proofs over
//!    past roots keep verifying.
//! 4. When ledger anchoring is enabled, each tombstone's `deletion_hash`
//!    is anchored as a single-leaf tree; anchoring failures never fail
//!    the deletion.
//!
//! Tombstones must be retained at least until their retention date.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veritrail_anchor::{AnchorWorker, LedgerClient};
use veritrail_core::{AuditError, DecisionRecord, HexDigest, MerkleRoot, TombstoneRecord};
use veritrail_crypto::{build_tree, DecisionHasher};
use veritrail_store::AuditStore;

/// A deletion request scoped to one user within one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub user_id: String,
    pub organization_id: String,
    pub requested_by: String,
    pub reason: String,
    #[serde(default)]
    pub legal_basis: Option<String>,
    /// Narrow the deletion to specific decisions.
    #[serde(default)]
    pub specific_decision_ids: Option<Vec<String>>,
    #[serde(default)]
    pub date_range_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_range_end: Option<DateTime<Utc>>,
    /// Override the configured tombstone retention floor.
    #[serde(default)]
    pub retention_override_days: Option<i64>,
}

/// Outcome of a processed deletion request.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionReceipt {
    pub deletion_id: String,
    pub completed_at: DateTime<Utc>,
    pub affected_decisions: u64,
    pub tombstone_ids: Vec<Uuid>,
    /// Group proof over the whole request; absent when nothing matched.
    pub deletion_proof_hash: Option<HexDigest>,
    pub retention_until: DateTime<Utc>,
}

/// Verification view of one tombstone.
#[derive(Debug, Clone, Serialize)]
pub struct TombstoneVerification {
    pub tombstone_id: Uuid,
    pub original_decision_id: String,
    /// Recomputed deletion hash matches the stored one.
    pub deletion_verified: bool,
    pub ledger_anchored: bool,
    pub created_at: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
}

/// One line of a user's deletion history.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionHistoryEntry {
    pub tombstone_id: Uuid,
    pub original_decision_id: String,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: String,
    pub reason: String,
    pub deletion_hash: HexDigest,
}

/// Hash-level data portability export for one user.
#[derive(Debug, Clone, Serialize)]
pub struct PortabilityExport {
    pub user_id: String,
    pub organization_id: String,
    pub exported_at: DateTime<Utc>,
    pub total_records: u64,
    pub records: Vec<PortabilityRecord>,
    /// HMAC-SHA3-256 over the canonical form of `records`, when a signing
    /// key is configured.
    pub signature: Option<HexDigest>,
}

/// One exported record: fingerprints and anchoring references only,
/// never plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct PortabilityRecord {
    pub decision_id: String,
    pub created_at: DateTime<Utc>,
    pub model_name: String,
    pub decision_type: String,
    pub input_hash: HexDigest,
    pub output_hash: HexDigest,
    pub full_hash: HexDigest,
    pub merkle_root: Option<HexDigest>,
    pub anchor_tx_hash: Option<String>,
}

/// Erases records behind cryptographic tombstones.
pub struct DeletionService<S, L> {
    store: Arc<S>,
    hasher: DecisionHasher,
    worker: AnchorWorker<S, L>,
    /// Anchor tombstone hashes to the ledger.
    anchor_tombstones: bool,
    /// Default retention floor in days.
    retention_days: i64,
}

impl<S: AuditStore, L: LedgerClient> DeletionService<S, L> {
    pub fn new(
        store: Arc<S>,
        hasher: DecisionHasher,
        worker: AnchorWorker<S, L>,
        anchor_tombstones: bool,
        retention_days: i64,
    ) -> Self {
        Self {
            store,
            hasher,
            worker,
            anchor_tombstones,
            retention_days,
        }
    }

    /// Process a deletion request.
    pub async fn request_deletion(
        &self,
        request: DeletionRequest,
    ) -> Result<DeletionReceipt, AuditError> {
        let deletion_id = format!("gdpr_del_{}", &Uuid::new_v4().simple().to_string()[..16]);

        let targets = self.select_targets(&request).await?;
        if targets.is_empty() {
            return Ok(DeletionReceipt {
                deletion_id,
                completed_at: Utc::now(),
                affected_decisions: 0,
                tombstone_ids: vec![],
                deletion_proof_hash: None,
                retention_until: Utc::now(),
            });
        }

        let retention_days = request
            .retention_override_days
            .unwrap_or(self.retention_days);
        let retention_until = Utc::now() + Duration::days(retention_days);

        let mut tombstone_ids = Vec::with_capacity(targets.len());
        for record in &targets {
            let tombstone = self
                .erase_record(record, &request, retention_until)
                .await?;
            tombstone_ids.push(tombstone.id);
        }

        let id_strings: Vec<String> = tombstone_ids.iter().map(|id| id.to_string()).collect();
        let completed_at = Utc::now();
        let proof = self.hasher.deletion_proof_hash(
            &deletion_id,
            &id_strings,
            &request.requested_by,
            &timestamp_string(completed_at),
        );

        tracing::info!(
            deletion_id = %deletion_id,
            affected = targets.len(),
            organization = %request.organization_id,
            "deletion completed"
        );

        Ok(DeletionReceipt {
            deletion_id,
            completed_at,
            affected_decisions: targets.len() as u64,
            tombstone_ids,
            deletion_proof_hash: Some(proof),
            retention_until,
        })
    }

    /// Recompute a tombstone's deletion hash from its stored fields and
    /// compare, constant-time.
    pub async fn verify_tombstone(
        &self,
        tombstone_id: Uuid,
    ) -> Result<TombstoneVerification, AuditError> {
        let tombstone = self
            .store
            .get_tombstone(tombstone_id)
            .await
            .map_err(AuditError::from)?
            .ok_or_else(|| AuditError::NotFound(format!("tombstone {tombstone_id}")))?;

        let recomputed = self.hasher.tombstone_hash(
            &tombstone.original_hash,
            &timestamp_string(tombstone.created_at),
            &tombstone.deleted_by,
            &tombstone.deletion_reason,
        );

        Ok(TombstoneVerification {
            tombstone_id,
            original_decision_id: tombstone.original_decision_id,
            deletion_verified: recomputed.ct_eq(&tombstone.deletion_hash),
            ledger_anchored: tombstone.deletion_anchor_tx_hash.is_some(),
            created_at: tombstone.created_at,
            retention_until: tombstone.permanent_retention_until,
        })
    }

    /// A user's deletion history, newest first.
    pub async fn deletion_history(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Vec<DeletionHistoryEntry>, AuditError> {
        let tombstones = self
            .store
            .list_tombstones_for_user(user_id, organization_id)
            .await
            .map_err(AuditError::from)?;
        Ok(tombstones
            .into_iter()
            .map(|t| DeletionHistoryEntry {
                tombstone_id: t.id,
                original_decision_id: t.original_decision_id,
                deleted_at: t.created_at,
                deleted_by: t.deleted_by,
                reason: t.deletion_reason,
                deletion_hash: t.deletion_hash,
            })
            .collect())
    }

    /// Export a user's remaining (non-deleted) records at hash level.
    pub async fn export_portability(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<PortabilityExport, AuditError> {
        let records = self
            .store
            .list_by_organization(organization_id, None, None, false, 100_000, 0)
            .await
            .map_err(AuditError::from)?;

        let records: Vec<PortabilityRecord> = records
            .into_iter()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .map(|r| PortabilityRecord {
                decision_id: r.decision_id,
                created_at: r.created_at,
                model_name: r.model_name,
                decision_type: r.decision_type.as_str().to_string(),
                input_hash: r.input_hash,
                output_hash: r.output_hash,
                full_hash: r.full_hash,
                merkle_root: r.merkle_root,
                anchor_tx_hash: r.anchor_tx_hash,
            })
            .collect();

        let signature = match serde_json::to_value(&records) {
            Ok(value) => {
                let canonical = veritrail_core::CanonicalBytes::new(&value);
                self.hasher.sign_hmac(canonical.as_str(), None).ok()
            }
            Err(_) => None,
        };

        Ok(PortabilityExport {
            user_id: user_id.to_string(),
            organization_id: organization_id.to_string(),
            exported_at: Utc::now(),
            total_records: records.len() as u64,
            records,
            signature,
        })
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn select_targets(
        &self,
        request: &DeletionRequest,
    ) -> Result<Vec<DecisionRecord>, AuditError> {
        let candidates = self
            .store
            .list_by_organization(
                &request.organization_id,
                request.date_range_start,
                request.date_range_end,
                false,
                100_000,
                0,
            )
            .await
            .map_err(AuditError::from)?;

        Ok(candidates
            .into_iter()
            .filter(|r| r.user_id.as_deref() == Some(request.user_id.as_str()))
            .filter(|r| match &request.specific_decision_ids {
                Some(ids) => ids.contains(&r.decision_id),
                None => true,
            })
            .collect())
    }

    async fn erase_record(
        &self,
        record: &DecisionRecord,
        request: &DeletionRequest,
        retention_until: DateTime<Utc>,
    ) -> Result<TombstoneRecord, AuditError> {
        let deleted_at = Utc::now();
        let deletion_hash = self.hasher.tombstone_hash(
            &record.full_hash,
            &timestamp_string(deleted_at),
            &request.requested_by,
            &request.reason,
        );

        let mut tombstone = TombstoneRecord {
            id: Uuid::new_v4(),
            record_id: Some(record.id),
            original_decision_id: record.decision_id.clone(),
            deleted_by: request.requested_by.clone(),
            deletion_reason: request.reason.clone(),
            legal_basis: request.legal_basis.clone(),
            original_hash: record.full_hash.clone(),
            deletion_hash,
            deletion_anchor_tx_hash: None,
            created_at: deleted_at,
            permanent_retention_until: retention_until,
            deletion_verified: false,
            verified_at: None,
        };
        tombstone = self
            .store
            .insert_tombstone(tombstone)
            .await
            .map_err(AuditError::from)?;

        self.store
            .mark_deleted(record.id, deleted_at)
            .await
            .map_err(AuditError::from)?;
        self.store
            .purge_plaintext(record.id)
            .await
            .map_err(AuditError::from)?;

        if self.anchor_tombstones {
            self.anchor_tombstone(&mut tombstone).await;
        }

        tracing::info!(
            decision_id = %tombstone.original_decision_id,
            tombstone = %tombstone.id,
            "record erased"
        );
        Ok(tombstone)
    }

    /// Anchor a tombstone's deletion hash as a single-leaf tree. Errors
    /// are logged, never propagated — the deletion itself already
    /// happened.
    async fn anchor_tombstone(&self, tombstone: &mut TombstoneRecord) {
        let result: Result<(), AuditError> = async {
            let tree = build_tree(&self.hasher, &[tombstone.deletion_hash.clone()], 32)
                .map_err(AuditError::from)?;
            let root = MerkleRoot {
                id: Uuid::new_v4(),
                root_hash: tree.root_hash.clone(),
                tree_depth: tree.tree_depth,
                leaf_count: tree.leaf_count,
                start_sequence: 0,
                end_sequence: 0,
                created_at: Utc::now(),
                anchor_id: None,
                is_anchored: false,
                anchored_at: None,
            };
            self.store
                .insert_tree(root.clone(), tree.nodes)
                .await
                .map_err(AuditError::from)?;

            let anchor = self.worker.anchor_root(&root).await?;
            tombstone.deletion_anchor_tx_hash = anchor.tx_hash.clone();
            tombstone.deletion_verified = true;
            tombstone.verified_at = Some(Utc::now());
            self.store
                .update_tombstone(tombstone)
                .await
                .map_err(AuditError::from)?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(
                tombstone = %tombstone.id,
                error = %e,
                "tombstone anchoring failed; deletion stands"
            );
        }
    }
}

/// ISO-8601 UTC with explicit offset at microsecond precision — the form
/// bound into tombstone hashes. Microseconds match what the store
/// round-trips, so recomputation from persisted fields is stable.
pub(crate) fn timestamp_string(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestService;
    use veritrail_anchor::{AnchorConfig, JsonRpcLedger};
    use veritrail_core::{ContextInput, DecisionInput, DecisionType, InteractionInput};
    use veritrail_store::MemoryStore;

    fn decision(user: &str, n: usize) -> DecisionInput {
        DecisionInput {
            organization_id: "org1".into(),
            user_id: Some(user.into()),
            session_id: None,
            model_name: "m".into(),
            model_version: "1".into(),
            provider: "acme".into(),
            decision_type: DecisionType::Recommendation,
            decision_id: Some(format!("dec_{user}_{n:03}")),
            interaction: InteractionInput {
                prompt: format!("question {n}"),
                response: format!("answer {n}"),
                prompt_tokens: 2,
                completion_tokens: 2,
                total_tokens: 4,
                estimated_cost_usd: None,
                temperature: None,
                max_tokens: None,
                top_p: None,
                latency_ms: 9,
                raw_request: None,
                raw_response: None,
            },
            context: ContextInput::default(),
            compliance_markers: vec![],
        }
    }

    fn service(
        store: Arc<MemoryStore>,
        anchor_tombstones: bool,
    ) -> DeletionService<MemoryStore, JsonRpcLedger> {
        let worker = AnchorWorker::new(store.clone(), None, AnchorConfig::default());
        DeletionService::new(
            store,
            DecisionHasher::with_secret_key("test-signing-key"),
            worker,
            anchor_tombstones,
            30,
        )
    }

    fn request(user: &str) -> DeletionRequest {
        DeletionRequest {
            user_id: user.into(),
            organization_id: "org1".into(),
            requested_by: "dpo@example.com".into(),
            reason: "user_request".into(),
            legal_basis: Some("GDPR Art. 17".into()),
            specific_decision_ids: None,
            date_range_start: None,
            date_range_end: None,
            retention_override_days: None,
        }
    }

    #[tokio::test]
    async fn deletion_tombstones_and_purges_but_keeps_hashes() {
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestService::new(store.clone(), DecisionHasher::new());
        let record = ingest.capture(decision("u1", 0)).await.unwrap();

        let receipt = service(store.clone(), false)
            .request_deletion(request("u1"))
            .await
            .unwrap();
        assert_eq!(receipt.affected_decisions, 1);
        assert_eq!(receipt.tombstone_ids.len(), 1);
        assert!(receipt.deletion_proof_hash.is_some());

        // Plaintext gone.
        assert!(store.get_payload(record.id).await.unwrap().is_none());
        assert!(store.get_context(record.id).await.unwrap().is_none());
        // Row and hashes remain.
        let kept = store.get_record(record.id).await.unwrap().unwrap();
        assert!(kept.is_gdpr_deleted);
        assert_eq!(kept.full_hash, record.full_hash);
    }

    #[tokio::test]
    async fn tombstone_binds_original_hash() {
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestService::new(store.clone(), DecisionHasher::new());
        let record = ingest.capture(decision("u1", 0)).await.unwrap();

        let svc = service(store.clone(), false);
        let receipt = svc.request_deletion(request("u1")).await.unwrap();
        let tombstone = store
            .get_tombstone(receipt.tombstone_ids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tombstone.original_hash, record.full_hash);
        assert_eq!(tombstone.original_decision_id, record.decision_id);
    }

    #[tokio::test]
    async fn verify_tombstone_recomputes_deletion_hash() {
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestService::new(store.clone(), DecisionHasher::new());
        ingest.capture(decision("u1", 0)).await.unwrap();

        let svc = service(store.clone(), false);
        let receipt = svc.request_deletion(request("u1")).await.unwrap();
        let verification = svc
            .verify_tombstone(receipt.tombstone_ids[0])
            .await
            .unwrap();
        assert!(verification.deletion_verified);
        assert!(!verification.ledger_anchored);
    }

    #[tokio::test]
    async fn anchored_tombstone_records_transaction() {
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestService::new(store.clone(), DecisionHasher::new());
        ingest.capture(decision("u1", 0)).await.unwrap();

        let svc = service(store.clone(), true);
        let receipt = svc.request_deletion(request("u1")).await.unwrap();
        let tombstone = store
            .get_tombstone(receipt.tombstone_ids[0])
            .await
            .unwrap()
            .unwrap();
        assert!(tombstone.deletion_anchor_tx_hash.is_some());
        assert!(tombstone.deletion_verified);
        assert!(tombstone.verified_at.is_some());
    }

    #[tokio::test]
    async fn deletion_scopes_to_user_and_ids() {
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestService::new(store.clone(), DecisionHasher::new());
        ingest.capture(decision("u1", 0)).await.unwrap();
        ingest.capture(decision("u1", 1)).await.unwrap();
        ingest.capture(decision("u2", 0)).await.unwrap();

        let mut req = request("u1");
        req.specific_decision_ids = Some(vec!["dec_u1_001".into()]);
        let receipt = service(store.clone(), false)
            .request_deletion(req)
            .await
            .unwrap();
        assert_eq!(receipt.affected_decisions, 1);

        // The other records are untouched.
        assert!(store
            .get_by_decision_id("dec_u1_000", false)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_by_decision_id("dec_u2_000", false)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn empty_match_completes_with_zero_affected() {
        let store = Arc::new(MemoryStore::new());
        let receipt = service(store, false)
            .request_deletion(request("nobody"))
            .await
            .unwrap();
        assert_eq!(receipt.affected_decisions, 0);
        assert!(receipt.deletion_proof_hash.is_none());
    }

    #[tokio::test]
    async fn repeated_deletion_finds_nothing_left() {
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestService::new(store.clone(), DecisionHasher::new());
        ingest.capture(decision("u1", 0)).await.unwrap();

        let svc = service(store.clone(), false);
        let first = svc.request_deletion(request("u1")).await.unwrap();
        assert_eq!(first.affected_decisions, 1);
        let second = svc.request_deletion(request("u1")).await.unwrap();
        assert_eq!(second.affected_decisions, 0);
    }

    #[tokio::test]
    async fn retention_override_extends_the_floor() {
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestService::new(store.clone(), DecisionHasher::new());
        ingest.capture(decision("u1", 0)).await.unwrap();

        let mut req = request("u1");
        req.retention_override_days = Some(90);
        let receipt = service(store, false).request_deletion(req).await.unwrap();
        let days = (receipt.retention_until - receipt.completed_at).num_days();
        assert!((89..=90).contains(&days));
    }

    #[tokio::test]
    async fn deletion_history_lists_tombstones() {
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestService::new(store.clone(), DecisionHasher::new());
        ingest.capture(decision("u1", 0)).await.unwrap();
        ingest.capture(decision("u1", 1)).await.unwrap();

        let svc = service(store.clone(), false);
        svc.request_deletion(request("u1")).await.unwrap();
        let history = svc.deletion_history("u1", "org1").await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn portability_export_covers_remaining_records_and_signs() {
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestService::new(store.clone(), DecisionHasher::new());
        ingest.capture(decision("u1", 0)).await.unwrap();
        ingest.capture(decision("u1", 1)).await.unwrap();
        ingest.capture(decision("u2", 0)).await.unwrap();

        let svc = service(store.clone(), false);
        let mut req = request("u1");
        req.specific_decision_ids = Some(vec!["dec_u1_000".into()]);
        svc.request_deletion(req).await.unwrap();

        let export = svc.export_portability("u1", "org1").await.unwrap();
        assert_eq!(export.total_records, 1);
        assert_eq!(export.records[0].decision_id, "dec_u1_001");
        assert!(export.signature.is_some());
    }

    #[test]
    fn timestamp_string_is_stable_for_a_given_instant() {
        let t = Utc::now();
        assert_eq!(timestamp_string(t), timestamp_string(t));
        assert!(timestamp_string(t).ends_with("+00:00"));
    }
}
