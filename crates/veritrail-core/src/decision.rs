//! # Decision Records
//!
//! The audited unit: one AI decision, its interaction payload, the context
//! it was made in, and optional compliance markers.
//!
//! ## Fingerprint Invariants
//!
//! A persisted record carries four immutable digests: `input_hash` over the
//! prompt, `output_hash` over the response, `context_hash` over the
//! canonical context projection, and `full_hash` binding all three to a
//! fixed metadata projection. The projections are produced here
//! ([`DecisionContext::fingerprint_value`], [`DecisionRecord::hash_metadata`])
//! so that ingest and re-verification share a single code path — a verifier
//! that rebuilt the projection independently could silently diverge.
//!
//! ## Erasure Semantics
//!
//! [`InteractionPayload`] and [`DecisionContext`] are the erasable plaintext.
//! On privacy deletion they are purged; the [`DecisionRecord`] row and its
//! four digests remain so Merkle proofs over past roots keep verifying.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::digest::HexDigest;

/// Classification of the AI decision being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    Classification,
    Generation,
    Recommendation,
    Prediction,
    Analysis,
    Summarization,
    Custom,
}

impl DecisionType {
    /// The canonical string form used inside hash projections.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "CLASSIFICATION",
            Self::Generation => "GENERATION",
            Self::Recommendation => "RECOMMENDATION",
            Self::Prediction => "PREDICTION",
            Self::Analysis => "ANALYSIS",
            Self::Summarization => "SUMMARIZATION",
            Self::Custom => "CUSTOM",
        }
    }
}

impl std::fmt::Display for DecisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compliance standards a marker can attest against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStandard {
    Soc2,
    Iso27001,
    Gdpr,
    Ccpa,
    Hipaa,
    PciDss,
}

impl ComplianceStandard {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soc2 => "SOC2",
            Self::Iso27001 => "ISO27001",
            Self::Gdpr => "GDPR",
            Self::Ccpa => "CCPA",
            Self::Hipaa => "HIPAA",
            Self::PciDss => "PCI_DSS",
        }
    }
}

/// A persisted audit record for one AI decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Globally monotonic position in the append-only log. Assigned by the
    /// store's sequencing primitive, never by the caller.
    pub sequence_number: i64,

    pub organization_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,

    pub model_name: String,
    pub model_version: String,
    pub provider: String,
    pub decision_type: DecisionType,
    /// Caller-visible identifier, unique per organization.
    pub decision_id: String,

    // Immutable once persisted.
    pub input_hash: HexDigest,
    pub output_hash: HexDigest,
    pub context_hash: HexDigest,
    pub full_hash: HexDigest,

    pub is_gdpr_deleted: bool,
    pub gdpr_deleted_at: Option<DateTime<Utc>>,

    pub merkle_root: Option<HexDigest>,
    pub anchor_tx_hash: Option<String>,
}

/// The fixed metadata projection bound into a record's `full_hash`.
///
/// Exactly these four keys, missing values emitted as `null`. Changing this
/// projection invalidates every previously computed full hash, so ingest
/// and re-verification both go through this one function.
pub fn metadata_projection(
    organization_id: &str,
    user_id: Option<&str>,
    model_name: &str,
    decision_type: DecisionType,
) -> Value {
    json!({
        "organization_id": organization_id,
        "user_id": user_id,
        "model_name": model_name,
        "decision_type": decision_type.as_str(),
    })
}

impl DecisionRecord {
    /// This record's metadata projection (see [`metadata_projection`]).
    pub fn hash_metadata(&self) -> Value {
        metadata_projection(
            &self.organization_id,
            self.user_id.as_deref(),
            &self.model_name,
            self.decision_type,
        )
    }
}

/// Interaction plaintext owned 1:1 by a decision record. Erasable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionPayload {
    pub id: Uuid,
    pub record_id: Uuid,

    pub prompt: String,
    pub response: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub estimated_cost_usd: Option<f64>,

    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub top_p: Option<f64>,

    pub latency_ms: i64,
    pub recorded_at: DateTime<Utc>,

    pub raw_request: Option<Value>,
    pub raw_response: Option<Value>,
}

/// Context plaintext owned 1:1 by a decision record. Erasable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    pub id: Uuid,
    pub record_id: Uuid,

    pub application_id: Option<String>,
    pub application_version: Option<String>,
    pub environment: String,

    pub request_id: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,

    pub business_unit: Option<String>,
    pub project_id: Option<String>,
    pub workflow_id: Option<String>,

    pub source_data_ids: Option<Vec<String>>,
    /// Ordered lineage pointers to downstream decisions.
    pub related_decisions: Option<Vec<String>>,
    pub parent_decision_id: Option<String>,

    pub data_classification: String,
    pub legal_basis: Option<String>,
    pub consent_reference: Option<String>,

    /// Opaque caller-supplied JSON. Never introspected beyond
    /// canonicalization.
    pub context_data: Option<Value>,
}

impl DecisionContext {
    /// The context projection that `context_hash` is computed over.
    ///
    /// Every domain field appears, absent values as `null`, so that the
    /// same context always canonicalizes to the same bytes regardless of
    /// which optional fields were supplied. Row identifiers are excluded:
    /// they are storage artifacts, not audited content.
    pub fn fingerprint_value(&self) -> Value {
        json!({
            "application_id": self.application_id,
            "application_version": self.application_version,
            "environment": self.environment,
            "request_id": self.request_id,
            "client_ip": self.client_ip,
            "user_agent": self.user_agent,
            "business_unit": self.business_unit,
            "project_id": self.project_id,
            "workflow_id": self.workflow_id,
            "source_data_ids": self.source_data_ids,
            "related_decisions": self.related_decisions,
            "parent_decision_id": self.parent_decision_id,
            "data_classification": self.data_classification,
            "legal_basis": self.legal_basis,
            "consent_reference": self.consent_reference,
            "context_data": self.context_data,
        })
    }
}

/// A compliance tag attached to a decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceMarker {
    pub id: Uuid,
    pub record_id: Uuid,
    pub standard: ComplianceStandard,
    pub requirement_id: String,
    pub control_id: Option<String>,
    pub evidence_data: Option<Value>,
    pub reviewer_notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Ingest input shapes
// ---------------------------------------------------------------------------

/// Caller input for capturing one decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInput {
    pub organization_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,

    pub model_name: String,
    pub model_version: String,
    pub provider: String,
    pub decision_type: DecisionType,
    /// Optional caller-supplied identifier; generated when absent.
    #[serde(default)]
    pub decision_id: Option<String>,

    pub interaction: InteractionInput,
    #[serde(default)]
    pub context: ContextInput,
    #[serde(default)]
    pub compliance_markers: Vec<MarkerInput>,
}

/// Interaction portion of the ingest input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionInput {
    pub prompt: String,
    pub response: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    #[serde(default)]
    pub estimated_cost_usd: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    pub latency_ms: i64,
    #[serde(default)]
    pub raw_request: Option<Value>,
    #[serde(default)]
    pub raw_response: Option<Value>,
}

/// Context portion of the ingest input. All fields optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextInput {
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub application_version: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub business_unit: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub source_data_ids: Option<Vec<String>>,
    #[serde(default)]
    pub related_decisions: Option<Vec<String>>,
    #[serde(default)]
    pub parent_decision_id: Option<String>,
    #[serde(default)]
    pub data_classification: Option<String>,
    #[serde(default)]
    pub legal_basis: Option<String>,
    #[serde(default)]
    pub consent_reference: Option<String>,
    #[serde(default)]
    pub context_data: Option<Value>,
}

/// Compliance marker portion of the ingest input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerInput {
    pub standard: ComplianceStandard,
    pub requirement_id: String,
    #[serde(default)]
    pub control_id: Option<String>,
    #[serde(default)]
    pub evidence_data: Option<Value>,
    #[serde(default)]
    pub reviewer_notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::CanonicalBytes;

    fn sample_digest() -> HexDigest {
        HexDigest::from_bytes(&[7u8; 32])
    }

    fn sample_record() -> DecisionRecord {
        DecisionRecord {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            sequence_number: 1,
            organization_id: "org1".into(),
            user_id: None,
            session_id: None,
            model_name: "m".into(),
            model_version: "1.0".into(),
            provider: "acme".into(),
            decision_type: DecisionType::Generation,
            decision_id: "dec_000000000001".into(),
            input_hash: sample_digest(),
            output_hash: sample_digest(),
            context_hash: sample_digest(),
            full_hash: sample_digest(),
            is_gdpr_deleted: false,
            gdpr_deleted_at: None,
            merkle_root: None,
            anchor_tx_hash: None,
        }
    }

    #[test]
    fn decision_type_serializes_screaming() {
        let json = serde_json::to_string(&DecisionType::Generation).unwrap();
        assert_eq!(json, "\"GENERATION\"");
        let back: DecisionType = serde_json::from_str("\"CLASSIFICATION\"").unwrap();
        assert_eq!(back, DecisionType::Classification);
    }

    #[test]
    fn hash_metadata_has_fixed_projection() {
        let record = sample_record();
        let meta = record.hash_metadata();
        let obj = meta.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        assert_eq!(obj["organization_id"], "org1");
        assert!(obj["user_id"].is_null());
        assert_eq!(obj["model_name"], "m");
        assert_eq!(obj["decision_type"], "GENERATION");
    }

    #[test]
    fn context_fingerprint_emits_missing_fields_as_null() {
        let ctx = DecisionContext {
            id: Uuid::new_v4(),
            record_id: Uuid::new_v4(),
            application_id: None,
            application_version: None,
            environment: "production".into(),
            request_id: None,
            client_ip: None,
            user_agent: None,
            business_unit: None,
            project_id: None,
            workflow_id: None,
            source_data_ids: None,
            related_decisions: None,
            parent_decision_id: None,
            data_classification: "INTERNAL".into(),
            legal_basis: None,
            consent_reference: None,
            context_data: None,
        };
        let v = ctx.fingerprint_value();
        let obj = v.as_object().unwrap();
        assert_eq!(obj.len(), 16);
        assert!(obj["application_id"].is_null());
        assert_eq!(obj["environment"], "production");
    }

    #[test]
    fn context_fingerprint_excludes_row_identifiers() {
        let ctx = DecisionContext {
            id: Uuid::new_v4(),
            record_id: Uuid::new_v4(),
            application_id: Some("app".into()),
            application_version: None,
            environment: "prod".into(),
            request_id: None,
            client_ip: None,
            user_agent: None,
            business_unit: None,
            project_id: None,
            workflow_id: None,
            source_data_ids: None,
            related_decisions: None,
            parent_decision_id: None,
            data_classification: "INTERNAL".into(),
            legal_basis: None,
            consent_reference: None,
            context_data: None,
        };
        let mut other = ctx.clone();
        other.id = Uuid::new_v4();
        other.record_id = Uuid::new_v4();
        // Same domain content, different row ids: identical canonical bytes.
        assert_eq!(
            CanonicalBytes::new(&ctx.fingerprint_value()),
            CanonicalBytes::new(&other.fingerprint_value())
        );
    }

    #[test]
    fn decision_input_minimal_deserializes() {
        let input: DecisionInput = serde_json::from_str(
            r#"{
                "organization_id": "org1",
                "model_name": "m",
                "model_version": "1",
                "provider": "acme",
                "decision_type": "ANALYSIS",
                "interaction": {
                    "prompt": "p",
                    "response": "r",
                    "prompt_tokens": 1,
                    "completion_tokens": 1,
                    "total_tokens": 2,
                    "latency_ms": 10
                }
            }"#,
        )
        .unwrap();
        assert!(input.decision_id.is_none());
        assert!(input.context.environment.is_none());
        assert!(input.compliance_markers.is_empty());
    }
}
