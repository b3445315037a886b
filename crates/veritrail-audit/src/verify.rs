//! # Integrity Verifier
//!
//! Re-derives every fingerprint from stored plaintext, re-verifies Merkle
//! proofs, validates root/anchor linkage, and scans the sequence for
//! gaps. Nothing here ever raises for a verification failure: every
//! finding is data in the [`IntegrityReport`].
//!
//! GDPR-deleted records are excluded from plaintext recomputation (their
//! plaintext is gone on purpose) but counted, and their sequence
//! positions still verify through the tree.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use veritrail_core::{AnchorStatus, AuditError, DecisionRecord, HexDigest, MerkleNode};
use veritrail_crypto::{merkle, DecisionHasher, MerkleProof};
use veritrail_store::AuditStore;

/// One record whose recomputed hash diverges from the stored one.
#[derive(Debug, Clone, Serialize)]
pub struct TamperedRecord {
    pub decision_id: String,
    /// The fingerprint the log claims.
    pub stored_hash: HexDigest,
    /// The fingerprint the plaintext actually produces.
    pub recomputed_hash: HexDigest,
    pub timestamp: DateTime<Utc>,
}

/// Full integrity picture for an organization/time window.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub generated_at: DateTime<Utc>,
    pub organization_id: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,

    pub overall_integrity: bool,
    /// `verified / active` in [0, 1]; 1.0 for an empty window.
    pub integrity_score: f64,

    pub total_records: u64,
    pub active_records: u64,
    pub gdpr_deleted_records: u64,
    pub verified_records: u64,
    pub tampered_records: Vec<TamperedRecord>,
    /// Active records whose plaintext is missing without a deletion flag.
    pub unverifiable_records: u64,

    pub merkle_roots_checked: u64,
    pub merkle_proofs_checked: u64,
    /// Decision ids whose inclusion proof failed against the stored root.
    pub merkle_proof_failures: Vec<String>,

    pub anchors_checked: u64,
    pub anchors_verified: u64,

    pub sequence_gaps: Vec<i64>,
    pub sequence_integrity: bool,
}

/// Verification view of a single decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionVerification {
    pub decision_id: String,
    pub hash_verified: bool,
    /// `None` when the record has no Merkle root yet.
    pub merkle_verified: Option<bool>,
    pub anchor_verified: bool,
    pub tampered: bool,
}

/// Recomputes and cross-checks the persisted log.
pub struct IntegrityService<S> {
    store: Arc<S>,
    hasher: DecisionHasher,
}

impl<S: AuditStore> IntegrityService<S> {
    pub fn new(store: Arc<S>, hasher: DecisionHasher) -> Self {
        Self { store, hasher }
    }

    /// Produce the integrity report for an organization and window.
    pub async fn integrity_report(
        &self,
        organization_id: &str,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<IntegrityReport, AuditError> {
        let records = self
            .store
            .list_by_organization(organization_id, start_date, end_date, true, 100_000, 0)
            .await
            .map_err(AuditError::from)?;

        let total = records.len() as u64;
        let deleted = records.iter().filter(|r| r.is_gdpr_deleted).count() as u64;
        let active = total - deleted;

        let mut verified = 0u64;
        let mut unverifiable = 0u64;
        let mut tampered = Vec::new();

        for record in records.iter().filter(|r| !r.is_gdpr_deleted) {
            match self.recompute(record).await? {
                Recomputed::Match => verified += 1,
                Recomputed::Mismatch(recomputed_hash) => tampered.push(TamperedRecord {
                    decision_id: record.decision_id.clone(),
                    stored_hash: record.full_hash.clone(),
                    recomputed_hash,
                    timestamp: record.created_at,
                }),
                Recomputed::MissingPlaintext => unverifiable += 1,
            }
        }

        // Load each referenced root's node set once, checking its anchor
        // along the way.
        let mut distinct_roots: Vec<HexDigest> = Vec::new();
        let mut seen = BTreeSet::new();
        for record in &records {
            if let Some(root_hash) = &record.merkle_root {
                if seen.insert(root_hash.as_str().to_string()) {
                    distinct_roots.push(root_hash.clone());
                }
            }
        }
        let mut node_sets: HashMap<String, Vec<MerkleNode>> = HashMap::new();
        let mut anchors_checked = 0u64;
        let mut anchors_verified = 0u64;
        for root_hash in &distinct_roots {
            if let Some(root) = self
                .store
                .get_root_by_hash(root_hash)
                .await
                .map_err(AuditError::from)?
            {
                let nodes = self
                    .store
                    .nodes_for_root(root.id)
                    .await
                    .map_err(AuditError::from)?;
                node_sets.insert(root_hash.as_str().to_string(), nodes);
            }
            let (checked, ok) = self.check_anchor(root_hash).await?;
            anchors_checked += checked;
            anchors_verified += ok;
        }

        // Re-verify every covered record's inclusion proof.
        let mut proofs_checked = 0u64;
        let mut proof_failures = Vec::new();
        for record in &records {
            let Some(root_hash) = &record.merkle_root else {
                continue;
            };
            let Some(nodes) = node_sets.get(root_hash.as_str()) else {
                proof_failures.push(record.decision_id.clone());
                continue;
            };
            proofs_checked += 1;
            let ok = merkle::prove(nodes, &record.full_hash)
                .map(|proof| {
                    merkle::verify(&self.hasher, &record.full_hash, root_hash, &proof.proof_path)
                })
                .unwrap_or(false);
            if !ok {
                proof_failures.push(record.decision_id.clone());
            }
        }

        // Sequence scan: every position in the covered range must hold a
        // record of some organization; gaps are excused only by orphan
        // tombstones (rows that are actually gone).
        let (sequence_gaps, sequence_integrity) = self.scan_sequence(&records).await?;

        let integrity_score = if active > 0 {
            verified as f64 / active as f64
        } else {
            1.0
        };

        let report = IntegrityReport {
            generated_at: Utc::now(),
            organization_id: organization_id.to_string(),
            start_date,
            end_date,
            overall_integrity: tampered.is_empty()
                && proof_failures.is_empty()
                && sequence_integrity,
            integrity_score,
            total_records: total,
            active_records: active,
            gdpr_deleted_records: deleted,
            verified_records: verified,
            tampered_records: tampered,
            unverifiable_records: unverifiable,
            merkle_roots_checked: distinct_roots.len() as u64,
            merkle_proofs_checked: proofs_checked,
            merkle_proof_failures: proof_failures,
            anchors_checked,
            anchors_verified,
            sequence_gaps,
            sequence_integrity,
        };

        if !report.overall_integrity {
            tracing::warn!(
                organization = organization_id,
                tampered = report.tampered_records.len(),
                proof_failures = report.merkle_proof_failures.len(),
                gaps = report.sequence_gaps.len(),
                "integrity verification found divergence"
            );
        }
        Ok(report)
    }

    /// Verify one decision end to end.
    pub async fn verify_decision(
        &self,
        decision_id: &str,
    ) -> Result<DecisionVerification, AuditError> {
        let record = self
            .store
            .get_by_decision_id(decision_id, false)
            .await
            .map_err(AuditError::from)?
            .ok_or_else(|| AuditError::NotFound(format!("decision '{decision_id}'")))?;

        let hash_verified = matches!(self.recompute(&record).await?, Recomputed::Match);

        let merkle_verified = match &record.merkle_root {
            None => None,
            Some(root_hash) => Some(match self.proof_for(&record, root_hash).await {
                Ok(proof) => {
                    merkle::verify(&self.hasher, &record.full_hash, root_hash, &proof.proof_path)
                }
                Err(_) => false,
            }),
        };

        let anchor_verified = match &record.merkle_root {
            Some(root_hash) => self.check_anchor(root_hash).await?.1 > 0,
            None => false,
        };

        Ok(DecisionVerification {
            decision_id: record.decision_id,
            hash_verified,
            merkle_verified,
            anchor_verified,
            tampered: !hash_verified,
        })
    }

    /// Generate (and self-check) the inclusion proof for a decision.
    pub async fn merkle_proof(&self, decision_id: &str) -> Result<MerkleProof, AuditError> {
        let record = self
            .store
            .get_by_decision_id(decision_id, true)
            .await
            .map_err(AuditError::from)?
            .ok_or_else(|| AuditError::NotFound(format!("decision '{decision_id}'")))?;
        let root_hash = record.merkle_root.clone().ok_or_else(|| {
            AuditError::InvalidInput(format!("decision '{decision_id}' has no Merkle root"))
        })?;
        self.proof_for(&record, &root_hash).await
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn proof_for(
        &self,
        record: &DecisionRecord,
        root_hash: &HexDigest,
    ) -> Result<MerkleProof, AuditError> {
        let root = self
            .store
            .get_root_by_hash(root_hash)
            .await
            .map_err(AuditError::from)?
            .ok_or_else(|| AuditError::NotFound(format!("merkle root {root_hash}")))?;
        let nodes = self
            .store
            .nodes_for_root(root.id)
            .await
            .map_err(AuditError::from)?;
        merkle::prove(&nodes, &record.full_hash).map_err(AuditError::from)
    }

    async fn recompute(&self, record: &DecisionRecord) -> Result<Recomputed, AuditError> {
        let payload = self
            .store
            .get_payload(record.id)
            .await
            .map_err(AuditError::from)?;
        let context = self
            .store
            .get_context(record.id)
            .await
            .map_err(AuditError::from)?;
        let (Some(payload), Some(context)) = (payload, context) else {
            return Ok(Recomputed::MissingPlaintext);
        };

        let recomputed = self.hasher.compute_audit_hash(
            &payload.prompt,
            &payload.response,
            &context.fingerprint_value(),
            &record.hash_metadata(),
        );
        if recomputed.full_hash.ct_eq(&record.full_hash) {
            Ok(Recomputed::Match)
        } else {
            Ok(Recomputed::Mismatch(recomputed.full_hash))
        }
    }

    /// Returns `(checked, verified)` — 1/0 counts for the root's anchor.
    async fn check_anchor(&self, root_hash: &HexDigest) -> Result<(u64, u64), AuditError> {
        let Some(root) = self
            .store
            .get_root_by_hash(root_hash)
            .await
            .map_err(AuditError::from)?
        else {
            return Ok((0, 0));
        };
        let Some(anchor_id) = root.anchor_id else {
            return Ok((0, 0));
        };
        let Some(anchor) = self
            .store
            .get_anchor(anchor_id)
            .await
            .map_err(AuditError::from)?
        else {
            return Ok((1, 0));
        };

        let verified = matches!(
            anchor.status,
            AnchorStatus::Confirmed | AnchorStatus::Finalized
        ) && anchor.root_hash.ct_eq(&root.root_hash);
        Ok((1, u64::from(verified)))
    }

    async fn scan_sequence(
        &self,
        records: &[DecisionRecord],
    ) -> Result<(Vec<i64>, bool), AuditError> {
        let Some(min_seq) = records.iter().map(|r| r.sequence_number).min() else {
            return Ok((vec![], true));
        };
        let max_seq = records.iter().map(|r| r.sequence_number).max().unwrap_or(min_seq);

        // Sequences are global across organizations, so the gap scan runs
        // over the unfiltered range.
        let global = self
            .store
            .list_sequence_range(min_seq, max_seq)
            .await
            .map_err(AuditError::from)?;
        let present: BTreeSet<i64> = global.iter().map(|r| r.sequence_number).collect();
        let gaps: Vec<i64> = (min_seq..=max_seq)
            .filter(|seq| !present.contains(seq))
            .collect();

        if gaps.is_empty() {
            return Ok((vec![], true));
        }
        let orphans = self
            .store
            .count_orphan_tombstones()
            .await
            .map_err(AuditError::from)?;
        let excused = (gaps.len() as u64) <= orphans;
        Ok((gaps, excused))
    }
}

enum Recomputed {
    Match,
    Mismatch(HexDigest),
    MissingPlaintext,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchConfig, MerkleBatcher};
    use crate::ingest::IngestService;
    use veritrail_anchor::{AnchorConfig, AnchorWorker, JsonRpcLedger};
    use veritrail_core::{ContextInput, DecisionInput, DecisionType, InteractionInput};
    use veritrail_store::MemoryStore;

    fn decision(n: usize) -> DecisionInput {
        DecisionInput {
            organization_id: "org1".into(),
            user_id: Some("u1".into()),
            session_id: None,
            model_name: "m".into(),
            model_version: "1".into(),
            provider: "acme".into(),
            decision_type: DecisionType::Prediction,
            decision_id: Some(format!("dec_{n:04}")),
            interaction: InteractionInput {
                prompt: format!("input {n}"),
                response: format!("output {n}"),
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
                estimated_cost_usd: None,
                temperature: None,
                max_tokens: None,
                top_p: None,
                latency_ms: 1,
                raw_request: None,
                raw_response: None,
            },
            context: ContextInput::default(),
            compliance_markers: vec![],
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        ingest: IngestService<MemoryStore>,
        batcher: MerkleBatcher<MemoryStore, JsonRpcLedger>,
        verifier: IntegrityService<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let hasher = DecisionHasher::new();
        let worker = AnchorWorker::new(store.clone(), None, AnchorConfig::default());
        Fixture {
            store: store.clone(),
            ingest: IngestService::new(store.clone(), hasher.clone()),
            batcher: MerkleBatcher::new(
                store.clone(),
                hasher.clone(),
                worker,
                BatchConfig::default(),
            ),
            verifier: IntegrityService::new(store, hasher),
        }
    }

    #[tokio::test]
    async fn clean_log_scores_one() {
        let f = fixture();
        for n in 0..4 {
            f.ingest.capture(decision(n)).await.unwrap();
        }
        f.batcher.run_once().await.unwrap();

        let report = f
            .verifier
            .integrity_report("org1", None, None)
            .await
            .unwrap();
        assert!(report.overall_integrity);
        assert_eq!(report.integrity_score, 1.0);
        assert_eq!(report.verified_records, 4);
        assert!(report.tampered_records.is_empty());
        assert_eq!(report.merkle_roots_checked, 1);
        assert_eq!(report.merkle_proofs_checked, 4);
        assert_eq!(report.anchors_checked, 1);
        assert_eq!(report.anchors_verified, 1);
        assert!(report.sequence_integrity);
    }

    #[tokio::test]
    async fn empty_window_scores_one() {
        let f = fixture();
        let report = f
            .verifier
            .integrity_report("org1", None, None)
            .await
            .unwrap();
        assert!(report.overall_integrity);
        assert_eq!(report.integrity_score, 1.0);
        assert_eq!(report.total_records, 0);
    }

    #[tokio::test]
    async fn flipped_hash_reports_exactly_one_tampered_record() {
        let f = fixture();
        for n in 0..16 {
            f.ingest.capture(decision(n)).await.unwrap();
        }
        f.batcher.run_once().await.unwrap();

        // Flip the stored fingerprint of record 7.
        let original = f
            .store
            .get_by_decision_id("dec_0007", true)
            .await
            .unwrap()
            .unwrap();
        let mut bytes = original.full_hash.to_bytes();
        bytes[0] ^= 0x01;
        f.store
            .corrupt_full_hash("dec_0007", HexDigest::from_bytes(&bytes));

        let report = f
            .verifier
            .integrity_report("org1", None, None)
            .await
            .unwrap();
        assert!(!report.overall_integrity);
        assert_eq!(report.tampered_records.len(), 1);
        assert_eq!(report.tampered_records[0].decision_id, "dec_0007");
        assert_ne!(
            report.tampered_records[0].stored_hash,
            report.tampered_records[0].recomputed_hash
        );
        assert_eq!(report.verified_records, 15);
        assert!((report.integrity_score - 15.0 / 16.0).abs() < 1e-9);
        // The corrupted leaf also falls out of the tree.
        assert_eq!(report.merkle_proof_failures, vec!["dec_0007".to_string()]);
    }

    #[tokio::test]
    async fn deleted_records_are_counted_not_recomputed() {
        let f = fixture();
        for n in 0..3 {
            f.ingest.capture(decision(n)).await.unwrap();
        }
        let record = f
            .store
            .get_by_decision_id("dec_0001", false)
            .await
            .unwrap()
            .unwrap();
        f.store.mark_deleted(record.id, Utc::now()).await.unwrap();
        f.store.purge_plaintext(record.id).await.unwrap();

        let report = f
            .verifier
            .integrity_report("org1", None, None)
            .await
            .unwrap();
        assert_eq!(report.total_records, 3);
        assert_eq!(report.gdpr_deleted_records, 1);
        assert_eq!(report.active_records, 2);
        assert_eq!(report.verified_records, 2);
        assert!(report.overall_integrity);
    }

    #[tokio::test]
    async fn verify_decision_reports_all_dimensions() {
        let f = fixture();
        f.ingest.capture(decision(0)).await.unwrap();
        f.batcher.run_once().await.unwrap();

        let v = f.verifier.verify_decision("dec_0000").await.unwrap();
        assert!(v.hash_verified);
        assert_eq!(v.merkle_verified, Some(true));
        assert!(v.anchor_verified);
        assert!(!v.tampered);
    }

    #[tokio::test]
    async fn unbatched_decision_has_no_merkle_dimension() {
        let f = fixture();
        f.ingest.capture(decision(0)).await.unwrap();
        let v = f.verifier.verify_decision("dec_0000").await.unwrap();
        assert!(v.hash_verified);
        assert_eq!(v.merkle_verified, None);
        assert!(!v.anchor_verified);
    }

    #[tokio::test]
    async fn merkle_proof_errors_without_root() {
        let f = fixture();
        f.ingest.capture(decision(0)).await.unwrap();
        let err = f.verifier.merkle_proof("dec_0000").await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn merkle_proof_verifies_after_batching() {
        let f = fixture();
        for n in 0..3 {
            f.ingest.capture(decision(n)).await.unwrap();
        }
        f.batcher.run_once().await.unwrap();

        let proof = f.verifier.merkle_proof("dec_0001").await.unwrap();
        assert!(merkle::verify(
            &DecisionHasher::new(),
            &proof.leaf_hash,
            &proof.root_hash,
            &proof.proof_path
        ));
    }

    #[tokio::test]
    async fn unknown_decision_is_not_found() {
        let f = fixture();
        let err = f.verifier.verify_decision("dec_none").await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }
}
