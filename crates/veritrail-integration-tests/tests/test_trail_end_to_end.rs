//! # End-to-End Audit Trail
//!
//! Drives the full pipeline against the in-memory store with simulated
//! anchoring: capture → Merkle batch → anchor → privacy deletion →
//! proof re-verification → integrity report.
//!
//! The load-bearing property: deleting a record erases its plaintext and
//! nothing else. Its four hashes, its Merkle coverage, and every other
//! record's inclusion proof keep verifying against the anchored root.

use std::sync::Arc;

use veritrail_anchor::{AnchorConfig, AnchorWorker, JsonRpcLedger};
use veritrail_audit::{
    BatchConfig, DeletionRequest, DeletionService, IngestService, IntegrityService, MerkleBatcher,
};
use veritrail_core::{ContextInput, DecisionInput, DecisionType, InteractionInput};
use veritrail_crypto::{merkle, DecisionHasher};
use veritrail_store::{AuditStore, MemoryStore};

fn decision(n: usize) -> DecisionInput {
    DecisionInput {
        organization_id: "org-acme".into(),
        user_id: Some("user-7".into()),
        session_id: Some("sess-1".into()),
        model_name: "fraud-screener".into(),
        model_version: "2.3.1".into(),
        provider: "inhouse".into(),
        decision_type: DecisionType::Classification,
        decision_id: Some(format!("dec_e2e_{n:03}")),
        interaction: InteractionInput {
            prompt: format!("screen transaction {n}"),
            response: format!("verdict {n}: approve"),
            prompt_tokens: 42,
            completion_tokens: 7,
            total_tokens: 49,
            estimated_cost_usd: Some(0.0004),
            temperature: Some(0.0),
            max_tokens: Some(64),
            top_p: None,
            latency_ms: 180,
            raw_request: Some(serde_json::json!({"tx": n})),
            raw_response: None,
        },
        context: ContextInput {
            environment: Some("production".into()),
            application_id: Some("payments".into()),
            request_id: Some(format!("req-{n}")),
            ..Default::default()
        },
        compliance_markers: vec![],
    }
}

struct Pipeline {
    store: Arc<MemoryStore>,
    ingest: IngestService<MemoryStore>,
    batcher: MerkleBatcher<MemoryStore, JsonRpcLedger>,
    deletion: DeletionService<MemoryStore, JsonRpcLedger>,
    verifier: IntegrityService<MemoryStore>,
    hasher: DecisionHasher,
}

fn pipeline() -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    let hasher = DecisionHasher::with_secret_key("e2e-signing-key");
    let worker = |s: &Arc<MemoryStore>| AnchorWorker::new(s.clone(), None, AnchorConfig::default());
    Pipeline {
        ingest: IngestService::new(store.clone(), hasher.clone()),
        batcher: MerkleBatcher::new(
            store.clone(),
            hasher.clone(),
            worker(&store),
            BatchConfig::default(),
        ),
        deletion: DeletionService::new(store.clone(), hasher.clone(), worker(&store), true, 30),
        verifier: IntegrityService::new(store.clone(), hasher.clone()),
        store,
        hasher,
    }
}

#[tokio::test]
async fn deletion_preserves_proofs_of_the_remaining_log() {
    let p = pipeline();

    // Ingest 8 records and batch them under one anchored root.
    for n in 0..8 {
        p.ingest.capture(decision(n)).await.unwrap();
    }
    let root = p.batcher.run_once().await.unwrap().unwrap();
    assert_eq!(root.leaf_count, 8);
    assert!(root.tree_depth >= 3);

    // Delete record 4.
    let receipt = p
        .deletion
        .request_deletion(DeletionRequest {
            user_id: "user-7".into(),
            organization_id: "org-acme".into(),
            requested_by: "dpo@acme.example".into(),
            reason: "user_request".into(),
            legal_basis: Some("GDPR Art. 17".into()),
            specific_decision_ids: Some(vec!["dec_e2e_004".into()]),
            date_range_start: None,
            date_range_end: None,
            retention_override_days: None,
        })
        .await
        .unwrap();
    assert_eq!(receipt.affected_decisions, 1);

    // The deleted record: plaintext gone, hashes and coverage intact.
    let erased = p
        .store
        .get_by_decision_id("dec_e2e_004", true)
        .await
        .unwrap()
        .unwrap();
    assert!(erased.is_gdpr_deleted);
    assert!(p.store.get_payload(erased.id).await.unwrap().is_none());
    assert_eq!(erased.merkle_root.as_ref(), Some(&root.root_hash));

    // A proof for record 2 still verifies against the original root,
    // because the tree holds hashes, not plaintext.
    let proof = p.verifier.merkle_proof("dec_e2e_002").await.unwrap();
    assert_eq!(proof.root_hash, root.root_hash);
    assert!(merkle::verify(
        &p.hasher,
        &proof.leaf_hash,
        &proof.root_hash,
        &proof.proof_path
    ));

    // So does a proof for the erased record itself.
    let erased_proof = p.verifier.merkle_proof("dec_e2e_004").await.unwrap();
    assert!(merkle::verify(
        &p.hasher,
        &erased_proof.leaf_hash,
        &erased_proof.root_hash,
        &erased_proof.proof_path
    ));

    // Its tombstone verifies and carries its own anchor.
    let verification = p
        .deletion
        .verify_tombstone(receipt.tombstone_ids[0])
        .await
        .unwrap();
    assert!(verification.deletion_verified);
    assert!(verification.ledger_anchored);

    // The integrity report stays clean: 7 active verified records, one
    // deletion counted, no tampering, sequence intact.
    let report = p
        .verifier
        .integrity_report("org-acme", None, None)
        .await
        .unwrap();
    assert!(report.overall_integrity);
    assert_eq!(report.total_records, 8);
    assert_eq!(report.gdpr_deleted_records, 1);
    assert_eq!(report.verified_records, 7);
    assert_eq!(report.integrity_score, 1.0);
    assert!(report.sequence_integrity);
}

#[tokio::test]
async fn anchored_batch_stamps_every_covered_record() {
    let p = pipeline();
    for n in 0..5 {
        p.ingest.capture(decision(n)).await.unwrap();
    }
    let root = p.batcher.run_once().await.unwrap().unwrap();

    for n in 0..5 {
        let record = p
            .ingest
            .get_decision(&format!("dec_e2e_{n:03}"), false)
            .await
            .unwrap();
        assert_eq!(record.merkle_root.as_ref(), Some(&root.root_hash));
        let tx = record.anchor_tx_hash.expect("anchored record has a tx");
        assert!(tx.starts_with("0x"));
    }

    let stored_root = p
        .store
        .get_root_by_hash(&root.root_hash)
        .await
        .unwrap()
        .unwrap();
    assert!(stored_root.is_anchored);
    assert_eq!(stored_root.start_sequence, 1);
    assert_eq!(stored_root.end_sequence, 5);
}

#[tokio::test]
async fn tampering_is_caught_after_anchoring() {
    let p = pipeline();
    for n in 0..16 {
        p.ingest.capture(decision(n)).await.unwrap();
    }
    p.batcher.run_once().await.unwrap();

    // Flip one bit of record 7's stored fingerprint.
    let target = p
        .ingest
        .get_decision("dec_e2e_007", false)
        .await
        .unwrap();
    let mut bytes = target.full_hash.to_bytes();
    bytes[31] ^= 0x80;
    assert!(p
        .store
        .corrupt_full_hash("dec_e2e_007", veritrail_core::HexDigest::from_bytes(&bytes)));

    let report = p
        .verifier
        .integrity_report("org-acme", None, None)
        .await
        .unwrap();
    assert!(!report.overall_integrity);
    assert_eq!(report.tampered_records.len(), 1);
    assert_eq!(report.tampered_records[0].decision_id, "dec_e2e_007");
    assert_eq!(report.verified_records, 15);

    // The single-decision view agrees.
    let v = p.verifier.verify_decision("dec_e2e_007").await.unwrap();
    assert!(v.tampered);
    assert!(!v.hash_verified);
    assert_eq!(v.merkle_verified, Some(false));
}

#[tokio::test]
async fn portability_export_is_signed_and_hash_only() {
    let p = pipeline();
    for n in 0..3 {
        p.ingest.capture(decision(n)).await.unwrap();
    }
    p.batcher.run_once().await.unwrap();

    let export = p
        .deletion
        .export_portability("user-7", "org-acme")
        .await
        .unwrap();
    assert_eq!(export.total_records, 3);
    assert!(export.signature.is_some());
    for record in &export.records {
        assert_eq!(record.full_hash.as_str().len(), 64);
        assert!(record.merkle_root.is_some());
    }

    // The signature verifies with the same key.
    let value = serde_json::to_value(&export.records).unwrap();
    let canonical = veritrail_core::CanonicalBytes::new(&value);
    assert!(p
        .hasher
        .verify_hmac(
            canonical.as_str(),
            export.signature.as_ref().unwrap().as_str(),
            None
        )
        .unwrap());
}

#[tokio::test]
async fn multiple_batches_form_a_growing_log() {
    let p = pipeline();
    for n in 0..3 {
        p.ingest.capture(decision(n)).await.unwrap();
    }
    let first = p.batcher.run_once().await.unwrap().unwrap();
    for n in 3..8 {
        p.ingest.capture(decision(n)).await.unwrap();
    }
    let second = p.batcher.run_once().await.unwrap().unwrap();

    assert_eq!(first.start_sequence, 1);
    assert_eq!(first.end_sequence, 3);
    assert_eq!(second.start_sequence, 4);
    assert_eq!(second.end_sequence, 8);

    // Records in each batch prove against their own root only.
    let early = p.verifier.merkle_proof("dec_e2e_001").await.unwrap();
    let late = p.verifier.merkle_proof("dec_e2e_006").await.unwrap();
    assert_eq!(early.root_hash, first.root_hash);
    assert_eq!(late.root_hash, second.root_hash);

    let report = p
        .verifier
        .integrity_report("org-acme", None, None)
        .await
        .unwrap();
    assert!(report.overall_integrity);
    assert_eq!(report.merkle_roots_checked, 2);
    assert_eq!(report.anchors_verified, 2);
}
