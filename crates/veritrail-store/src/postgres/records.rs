//! Decision record persistence.
//!
//! All functions take a `&PgPool`. The multi-row insert runs in a single
//! transaction; `sequence_number` comes back from the table's serial
//! sequence, which gives serializable monotonic assignment.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;
use veritrail_core::{
    ComplianceMarker, DecisionContext, DecisionRecord, DecisionType, HexDigest,
    InteractionPayload,
};

use super::{map_unique, parse_digest, parse_digest_opt};
use crate::StoreError;

const RECORD_COLUMNS: &str = "id, created_at, sequence_number, organization_id, user_id, \
     session_id, model_name, model_version, provider, decision_type, decision_id, \
     input_hash, output_hash, context_hash, full_hash, is_gdpr_deleted, gdpr_deleted_at, \
     merkle_root, anchor_tx_hash";

pub async fn insert_decision(
    pool: &PgPool,
    mut record: DecisionRecord,
    payload: InteractionPayload,
    context: DecisionContext,
    markers: Vec<ComplianceMarker>,
) -> Result<DecisionRecord, StoreError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        "INSERT INTO decision_records (id, created_at, organization_id, user_id, session_id, \
         model_name, model_version, provider, decision_type, decision_id, input_hash, \
         output_hash, context_hash, full_hash, is_gdpr_deleted, gdpr_deleted_at, merkle_root, \
         anchor_tx_hash) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
         RETURNING sequence_number",
    )
    .bind(record.id)
    .bind(record.created_at)
    .bind(&record.organization_id)
    .bind(&record.user_id)
    .bind(&record.session_id)
    .bind(&record.model_name)
    .bind(&record.model_version)
    .bind(&record.provider)
    .bind(record.decision_type.as_str())
    .bind(&record.decision_id)
    .bind(record.input_hash.as_str())
    .bind(record.output_hash.as_str())
    .bind(record.context_hash.as_str())
    .bind(record.full_hash.as_str())
    .bind(record.is_gdpr_deleted)
    .bind(record.gdpr_deleted_at)
    .bind(record.merkle_root.as_ref().map(|h| h.as_str().to_string()))
    .bind(&record.anchor_tx_hash)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| map_unique(e, "decision_id", record.decision_id.clone()))?;

    record.sequence_number = row.get::<i64, _>("sequence_number");

    sqlx::query(
        "INSERT INTO interaction_payloads (id, record_id, prompt, response, prompt_tokens, \
         completion_tokens, total_tokens, estimated_cost_usd, temperature, max_tokens, top_p, \
         latency_ms, recorded_at, raw_request, raw_response) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(payload.id)
    .bind(payload.record_id)
    .bind(&payload.prompt)
    .bind(&payload.response)
    .bind(payload.prompt_tokens)
    .bind(payload.completion_tokens)
    .bind(payload.total_tokens)
    .bind(payload.estimated_cost_usd)
    .bind(payload.temperature)
    .bind(payload.max_tokens)
    .bind(payload.top_p)
    .bind(payload.latency_ms)
    .bind(payload.recorded_at)
    .bind(&payload.raw_request)
    .bind(&payload.raw_response)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO decision_contexts (id, record_id, application_id, application_version, \
         environment, request_id, client_ip, user_agent, business_unit, project_id, \
         workflow_id, source_data_ids, related_decisions, parent_decision_id, \
         data_classification, legal_basis, consent_reference, context_data) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
    )
    .bind(context.id)
    .bind(context.record_id)
    .bind(&context.application_id)
    .bind(&context.application_version)
    .bind(&context.environment)
    .bind(&context.request_id)
    .bind(&context.client_ip)
    .bind(&context.user_agent)
    .bind(&context.business_unit)
    .bind(&context.project_id)
    .bind(&context.workflow_id)
    .bind(context.source_data_ids.as_ref().map(|v| serde_json::json!(v)))
    .bind(
        context
            .related_decisions
            .as_ref()
            .map(|v| serde_json::json!(v)),
    )
    .bind(&context.parent_decision_id)
    .bind(&context.data_classification)
    .bind(&context.legal_basis)
    .bind(&context.consent_reference)
    .bind(&context.context_data)
    .execute(&mut *tx)
    .await?;

    for marker in &markers {
        sqlx::query(
            "INSERT INTO compliance_markers (id, record_id, standard, requirement_id, \
             control_id, evidence_data, reviewer_notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(marker.id)
        .bind(marker.record_id)
        .bind(marker.standard.as_str())
        .bind(&marker.requirement_id)
        .bind(&marker.control_id)
        .bind(&marker.evidence_data)
        .bind(&marker.reviewer_notes)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(record)
}

pub async fn get_record(pool: &PgPool, id: Uuid) -> Result<Option<DecisionRecord>, StoreError> {
    let row = sqlx::query_as::<_, DecisionRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM decision_records WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(DecisionRow::into_record).transpose()
}

pub async fn get_by_decision_id(
    pool: &PgPool,
    decision_id: &str,
    include_deleted: bool,
) -> Result<Option<DecisionRecord>, StoreError> {
    let row = sqlx::query_as::<_, DecisionRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM decision_records \
         WHERE decision_id = $1 AND ($2 OR NOT is_gdpr_deleted)"
    ))
    .bind(decision_id)
    .bind(include_deleted)
    .fetch_optional(pool)
    .await?;
    row.map(DecisionRow::into_record).transpose()
}

#[allow(clippy::too_many_arguments)]
pub async fn list_by_organization(
    pool: &PgPool,
    organization_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    include_deleted: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<DecisionRecord>, StoreError> {
    let rows = sqlx::query_as::<_, DecisionRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM decision_records \
         WHERE organization_id = $1 \
           AND ($2::timestamptz IS NULL OR created_at >= $2) \
           AND ($3::timestamptz IS NULL OR created_at <= $3) \
           AND ($4 OR NOT is_gdpr_deleted) \
         ORDER BY sequence_number \
         LIMIT $5 OFFSET $6"
    ))
    .bind(organization_id)
    .bind(start)
    .bind(end)
    .bind(include_deleted)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(DecisionRow::into_record).collect()
}

pub async fn list_sequence_range(
    pool: &PgPool,
    start_sequence: i64,
    end_sequence: i64,
) -> Result<Vec<DecisionRecord>, StoreError> {
    let rows = sqlx::query_as::<_, DecisionRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM decision_records \
         WHERE sequence_number BETWEEN $1 AND $2 \
         ORDER BY sequence_number"
    ))
    .bind(start_sequence)
    .bind(end_sequence)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(DecisionRow::into_record).collect()
}

pub async fn list_unbatched(pool: &PgPool, limit: i64) -> Result<Vec<DecisionRecord>, StoreError> {
    let rows = sqlx::query_as::<_, DecisionRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM decision_records \
         WHERE merkle_root IS NULL \
         ORDER BY sequence_number \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(DecisionRow::into_record).collect()
}

pub async fn get_payload(
    pool: &PgPool,
    record_id: Uuid,
) -> Result<Option<InteractionPayload>, StoreError> {
    let row = sqlx::query_as::<_, PayloadRow>(
        "SELECT id, record_id, prompt, response, prompt_tokens, completion_tokens, \
         total_tokens, estimated_cost_usd, temperature, max_tokens, top_p, latency_ms, \
         recorded_at, raw_request, raw_response \
         FROM interaction_payloads WHERE record_id = $1",
    )
    .bind(record_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(PayloadRow::into_payload))
}

pub async fn get_context(
    pool: &PgPool,
    record_id: Uuid,
) -> Result<Option<DecisionContext>, StoreError> {
    let row = sqlx::query_as::<_, ContextRow>(
        "SELECT id, record_id, application_id, application_version, environment, request_id, \
         client_ip, user_agent, business_unit, project_id, workflow_id, source_data_ids, \
         related_decisions, parent_decision_id, data_classification, legal_basis, \
         consent_reference, context_data \
         FROM decision_contexts WHERE record_id = $1",
    )
    .bind(record_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(ContextRow::into_context))
}

pub async fn set_merkle_root(
    pool: &PgPool,
    start_sequence: i64,
    end_sequence: i64,
    root_hash: &HexDigest,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE decision_records SET merkle_root = $1 \
         WHERE sequence_number BETWEEN $2 AND $3",
    )
    .bind(root_hash.as_str())
    .bind(start_sequence)
    .bind(end_sequence)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn set_anchor_tx(
    pool: &PgPool,
    root_hash: &HexDigest,
    tx_hash: &str,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE decision_records SET anchor_tx_hash = $1 WHERE merkle_root = $2",
    )
    .bind(tx_hash)
    .bind(root_hash.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_deleted(
    pool: &PgPool,
    record_id: Uuid,
    deleted_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE decision_records SET is_gdpr_deleted = TRUE, gdpr_deleted_at = $1 \
         WHERE id = $2",
    )
    .bind(deleted_at)
    .bind(record_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("record {record_id}")));
    }
    Ok(())
}

pub async fn purge_plaintext(pool: &PgPool, record_id: Uuid) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM interaction_payloads WHERE record_id = $1")
        .bind(record_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM decision_contexts WHERE record_id = $1")
        .bind(record_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct DecisionRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    sequence_number: i64,
    organization_id: String,
    user_id: Option<String>,
    session_id: Option<String>,
    model_name: String,
    model_version: String,
    provider: String,
    decision_type: String,
    decision_id: String,
    input_hash: String,
    output_hash: String,
    context_hash: String,
    full_hash: String,
    is_gdpr_deleted: bool,
    gdpr_deleted_at: Option<DateTime<Utc>>,
    merkle_root: Option<String>,
    anchor_tx_hash: Option<String>,
}

impl DecisionRow {
    fn into_record(self) -> Result<DecisionRecord, StoreError> {
        let decision_type: DecisionType =
            serde_json::from_value(serde_json::Value::String(self.decision_type.clone()))
                .unwrap_or_else(|e| {
                    tracing::warn!(
                        id = %self.id,
                        decision_type = %self.decision_type,
                        error = %e,
                        "unknown decision type in database, defaulting to CUSTOM"
                    );
                    DecisionType::Custom
                });

        Ok(DecisionRecord {
            id: self.id,
            created_at: self.created_at,
            sequence_number: self.sequence_number,
            organization_id: self.organization_id,
            user_id: self.user_id,
            session_id: self.session_id,
            model_name: self.model_name,
            model_version: self.model_version,
            provider: self.provider,
            decision_type,
            decision_id: self.decision_id,
            input_hash: parse_digest("input_hash", &self.input_hash)?,
            output_hash: parse_digest("output_hash", &self.output_hash)?,
            context_hash: parse_digest("context_hash", &self.context_hash)?,
            full_hash: parse_digest("full_hash", &self.full_hash)?,
            is_gdpr_deleted: self.is_gdpr_deleted,
            gdpr_deleted_at: self.gdpr_deleted_at,
            merkle_root: parse_digest_opt("merkle_root", self.merkle_root.as_deref())?,
            anchor_tx_hash: self.anchor_tx_hash,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PayloadRow {
    id: Uuid,
    record_id: Uuid,
    prompt: String,
    response: String,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    estimated_cost_usd: Option<f64>,
    temperature: Option<f64>,
    max_tokens: Option<i64>,
    top_p: Option<f64>,
    latency_ms: i64,
    recorded_at: DateTime<Utc>,
    raw_request: Option<serde_json::Value>,
    raw_response: Option<serde_json::Value>,
}

impl PayloadRow {
    fn into_payload(self) -> InteractionPayload {
        InteractionPayload {
            id: self.id,
            record_id: self.record_id,
            prompt: self.prompt,
            response: self.response,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            estimated_cost_usd: self.estimated_cost_usd,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            latency_ms: self.latency_ms,
            recorded_at: self.recorded_at,
            raw_request: self.raw_request,
            raw_response: self.raw_response,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ContextRow {
    id: Uuid,
    record_id: Uuid,
    application_id: Option<String>,
    application_version: Option<String>,
    environment: String,
    request_id: Option<String>,
    client_ip: Option<String>,
    user_agent: Option<String>,
    business_unit: Option<String>,
    project_id: Option<String>,
    workflow_id: Option<String>,
    source_data_ids: Option<serde_json::Value>,
    related_decisions: Option<serde_json::Value>,
    parent_decision_id: Option<String>,
    data_classification: String,
    legal_basis: Option<String>,
    consent_reference: Option<String>,
    context_data: Option<serde_json::Value>,
}

impl ContextRow {
    fn into_context(self) -> DecisionContext {
        let string_list = |value: Option<serde_json::Value>, column: &str| match value {
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .unwrap_or_else(|e| {
                    tracing::warn!(column, error = %e, "malformed string list, treating as absent");
                    None
                }),
            None => None,
        };

        DecisionContext {
            id: self.id,
            record_id: self.record_id,
            application_id: self.application_id,
            application_version: self.application_version,
            environment: self.environment,
            request_id: self.request_id,
            client_ip: self.client_ip,
            user_agent: self.user_agent,
            business_unit: self.business_unit,
            project_id: self.project_id,
            workflow_id: self.workflow_id,
            source_data_ids: string_list(self.source_data_ids, "source_data_ids"),
            related_decisions: string_list(self.related_decisions, "related_decisions"),
            parent_decision_id: self.parent_decision_id,
            data_classification: self.data_classification,
            legal_basis: self.legal_basis,
            consent_reference: self.consent_reference,
            context_data: self.context_data,
        }
    }
}
