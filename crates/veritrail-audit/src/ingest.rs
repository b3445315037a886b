//! # Ingest Pipeline
//!
//! Accepts a decision, computes its four fingerprints, and persists the
//! record with its payload and context in one transaction. Failures are
//! raised synchronously — the caller must see them.
//!
//! Merkle coverage is deferred: a freshly captured record has no
//! `merkle_root` until the periodic batcher picks it up.

use std::sync::Arc;

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use uuid::Uuid;
use veritrail_core::{
    metadata_projection, AuditError, ComplianceMarker, DecisionContext, DecisionInput,
    DecisionRecord, HexDigest, InteractionPayload,
};
use veritrail_crypto::DecisionHasher;
use veritrail_store::AuditStore;

/// Captures decision records into the audit log.
pub struct IngestService<S> {
    store: Arc<S>,
    hasher: DecisionHasher,
}

impl<S: AuditStore> IngestService<S> {
    pub fn new(store: Arc<S>, hasher: DecisionHasher) -> Self {
        Self { store, hasher }
    }

    /// Capture one decision. Returns the persisted record with its
    /// store-assigned sequence number.
    pub async fn capture(&self, input: DecisionInput) -> Result<DecisionRecord, AuditError> {
        validate(&input)?;

        let record_id = Uuid::new_v4();
        let decision_id = input
            .decision_id
            .clone()
            .unwrap_or_else(generate_decision_id);
        let now = Utc::now();

        let payload = InteractionPayload {
            id: Uuid::new_v4(),
            record_id,
            prompt: input.interaction.prompt,
            response: input.interaction.response,
            prompt_tokens: input.interaction.prompt_tokens,
            completion_tokens: input.interaction.completion_tokens,
            total_tokens: input.interaction.total_tokens,
            estimated_cost_usd: input.interaction.estimated_cost_usd,
            temperature: input.interaction.temperature,
            max_tokens: input.interaction.max_tokens,
            top_p: input.interaction.top_p,
            latency_ms: input.interaction.latency_ms,
            recorded_at: now,
            raw_request: input.interaction.raw_request,
            raw_response: input.interaction.raw_response,
        };

        let context = DecisionContext {
            id: Uuid::new_v4(),
            record_id,
            application_id: input.context.application_id,
            application_version: input.context.application_version,
            environment: input
                .context
                .environment
                .unwrap_or_else(|| "production".into()),
            request_id: input.context.request_id,
            client_ip: input.context.client_ip,
            user_agent: input.context.user_agent,
            business_unit: input.context.business_unit,
            project_id: input.context.project_id,
            workflow_id: input.context.workflow_id,
            source_data_ids: input.context.source_data_ids,
            related_decisions: input.context.related_decisions,
            parent_decision_id: input.context.parent_decision_id,
            data_classification: input
                .context
                .data_classification
                .unwrap_or_else(|| "INTERNAL".into()),
            legal_basis: input.context.legal_basis,
            consent_reference: input.context.consent_reference,
            context_data: input.context.context_data,
        };

        let metadata = metadata_projection(
            &input.organization_id,
            input.user_id.as_deref(),
            &input.model_name,
            input.decision_type,
        );
        let hashes = self.hasher.compute_audit_hash(
            &payload.prompt,
            &payload.response,
            &context.fingerprint_value(),
            &metadata,
        );

        let record = DecisionRecord {
            id: record_id,
            created_at: now,
            // Assigned by the store.
            sequence_number: 0,
            organization_id: input.organization_id,
            user_id: input.user_id,
            session_id: input.session_id,
            model_name: input.model_name,
            model_version: input.model_version,
            provider: input.provider,
            decision_type: input.decision_type,
            decision_id,
            input_hash: hashes.input_hash,
            output_hash: hashes.output_hash,
            context_hash: hashes.context_hash,
            full_hash: hashes.full_hash,
            is_gdpr_deleted: false,
            gdpr_deleted_at: None,
            merkle_root: None,
            anchor_tx_hash: None,
        };

        let markers: Vec<ComplianceMarker> = input
            .compliance_markers
            .into_iter()
            .map(|m| ComplianceMarker {
                id: Uuid::new_v4(),
                record_id,
                standard: m.standard,
                requirement_id: m.requirement_id,
                control_id: m.control_id,
                evidence_data: m.evidence_data,
                reviewer_notes: m.reviewer_notes,
            })
            .collect();

        let persisted = self
            .store
            .insert_decision(record, payload, context, markers)
            .await
            .map_err(AuditError::from)?;

        tracing::info!(
            decision_id = %persisted.decision_id,
            sequence = persisted.sequence_number,
            organization = %persisted.organization_id,
            "decision captured"
        );
        Ok(persisted)
    }

    /// Lookup by caller-visible decision id.
    pub async fn get_decision(
        &self,
        decision_id: &str,
        include_deleted: bool,
    ) -> Result<DecisionRecord, AuditError> {
        self.store
            .get_by_decision_id(decision_id, include_deleted)
            .await
            .map_err(AuditError::from)?
            .ok_or_else(|| AuditError::NotFound(format!("decision '{decision_id}'")))
    }

    /// The four fingerprints and anchoring references of a decision.
    pub async fn hash_details(&self, decision_id: &str) -> Result<HashDetails, AuditError> {
        let record = self.get_decision(decision_id, false).await?;
        Ok(HashDetails {
            decision_id: record.decision_id,
            input_hash: record.input_hash,
            output_hash: record.output_hash,
            context_hash: record.context_hash,
            full_hash: record.full_hash,
            merkle_root: record.merkle_root,
            anchor_tx_hash: record.anchor_tx_hash,
            created_at: record.created_at,
        })
    }
}

/// Hash-level view of one decision.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HashDetails {
    pub decision_id: String,
    pub input_hash: HexDigest,
    pub output_hash: HexDigest,
    pub context_hash: HexDigest,
    pub full_hash: HexDigest,
    pub merkle_root: Option<HexDigest>,
    pub anchor_tx_hash: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

fn validate(input: &DecisionInput) -> Result<(), AuditError> {
    let required = [
        ("organization_id", &input.organization_id),
        ("model_name", &input.model_name),
        ("model_version", &input.model_version),
        ("provider", &input.provider),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(AuditError::InvalidInput(format!("{field} is required")));
        }
    }
    if input.interaction.prompt_tokens < 0
        || input.interaction.completion_tokens < 0
        || input.interaction.total_tokens < 0
        || input.interaction.latency_ms < 0
    {
        return Err(AuditError::InvalidInput(
            "token counts and latency must be non-negative".into(),
        ));
    }
    if let Some(id) = &input.decision_id {
        if id.trim().is_empty() {
            return Err(AuditError::InvalidInput(
                "decision_id must not be blank when supplied".into(),
            ));
        }
    }
    Ok(())
}

/// `dec_` + 12 hex chars of randomness.
fn generate_decision_id() -> String {
    let mut bytes = [0u8; 6];
    OsRng.fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("dec_{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use veritrail_core::{ContextInput, DecisionType, InteractionInput};
    use veritrail_store::MemoryStore;

    fn service() -> IngestService<MemoryStore> {
        IngestService::new(Arc::new(MemoryStore::new()), DecisionHasher::new())
    }

    fn input(org: &str) -> DecisionInput {
        DecisionInput {
            organization_id: org.into(),
            user_id: Some("u1".into()),
            session_id: None,
            model_name: "m".into(),
            model_version: "1.0".into(),
            provider: "acme".into(),
            decision_type: DecisionType::Generation,
            decision_id: None,
            interaction: InteractionInput {
                prompt: "Hello".into(),
                response: "Hi".into(),
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
                estimated_cost_usd: None,
                temperature: None,
                max_tokens: None,
                top_p: None,
                latency_ms: 12,
                raw_request: None,
                raw_response: None,
            },
            context: ContextInput {
                environment: Some("prod".into()),
                context_data: Some(json!({"k": "v"})),
                ..Default::default()
            },
            compliance_markers: vec![],
        }
    }

    #[tokio::test]
    async fn capture_assigns_ids_and_hashes() {
        let svc = service();
        let record = svc.capture(input("org1")).await.unwrap();

        assert!(record.decision_id.starts_with("dec_"));
        assert_eq!(record.decision_id.len(), 16);
        assert_eq!(record.sequence_number, 1);
        assert!(record.merkle_root.is_none());

        // input_hash is SHA3-256("Hello").
        assert_eq!(
            record.input_hash.as_str(),
            "8ca66ee6b2fe4bb928a8e3cd2f508de4119c0895f22e011117e22cf9b13de7ef"
        );
    }

    #[tokio::test]
    async fn capture_respects_supplied_decision_id() {
        let svc = service();
        let mut i = input("org1");
        i.decision_id = Some("dec_custom_0001".into());
        let record = svc.capture(i).await.unwrap();
        assert_eq!(record.decision_id, "dec_custom_0001");
    }

    #[tokio::test]
    async fn duplicate_decision_id_is_conflict() {
        let svc = service();
        let mut first = input("org1");
        first.decision_id = Some("dec_same".into());
        svc.capture(first).await.unwrap();

        let mut second = input("org1");
        second.decision_id = Some("dec_same".into());
        let err = svc.capture(second).await.unwrap_err();
        assert_eq!(err.kind(), "CONFLICT");
    }

    #[tokio::test]
    async fn blank_required_field_is_invalid() {
        let svc = service();
        let mut bad = input("  ");
        bad.organization_id = "  ".into();
        let err = svc.capture(bad).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
        assert!(err.to_string().contains("organization_id"));
    }

    #[tokio::test]
    async fn negative_token_counts_are_invalid() {
        let svc = service();
        let mut bad = input("org1");
        bad.interaction.prompt_tokens = -1;
        let err = svc.capture(bad).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn stored_plaintext_recomputes_to_stored_full_hash() {
        let store = Arc::new(MemoryStore::new());
        let hasher = DecisionHasher::new();
        let svc = IngestService::new(store.clone(), hasher.clone());
        let record = svc.capture(input("org1")).await.unwrap();

        let payload = store.get_payload(record.id).await.unwrap().unwrap();
        let context = store.get_context(record.id).await.unwrap().unwrap();
        assert!(hasher.verify_audit_hash(
            &payload.prompt,
            &payload.response,
            &context.fingerprint_value(),
            &record.hash_metadata(),
            &record.full_hash,
        ));
    }

    #[tokio::test]
    async fn hash_details_reports_the_quadruple() {
        let svc = service();
        let record = svc.capture(input("org1")).await.unwrap();
        let details = svc.hash_details(&record.decision_id).await.unwrap();
        assert_eq!(details.full_hash, record.full_hash);
        assert!(details.merkle_root.is_none());
    }

    #[tokio::test]
    async fn unknown_decision_is_not_found() {
        let svc = service();
        let err = svc.get_decision("dec_missing", false).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[test]
    fn generated_ids_have_expected_shape() {
        let id = generate_decision_id();
        assert!(id.starts_with("dec_"));
        assert_eq!(id.len(), 16);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_decision_id(), generate_decision_id());
    }
}
