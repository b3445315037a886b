//! Tombstone persistence.
//!
//! Tombstones are never deleted here; retention enforcement is a policy of
//! the deletion service, and this layer only ever inserts and updates.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;
use veritrail_core::TombstoneRecord;

use super::{map_unique, parse_digest};
use crate::StoreError;

const TOMBSTONE_COLUMNS: &str = "id, record_id, original_decision_id, deleted_by, \
     deletion_reason, legal_basis, original_hash, deletion_hash, deletion_anchor_tx_hash, \
     created_at, permanent_retention_until, deletion_verified, verified_at";

pub async fn insert(
    pool: &PgPool,
    tombstone: TombstoneRecord,
) -> Result<TombstoneRecord, StoreError> {
    sqlx::query(
        "INSERT INTO tombstone_records (id, record_id, original_decision_id, deleted_by, \
         deletion_reason, legal_basis, original_hash, deletion_hash, \
         deletion_anchor_tx_hash, created_at, permanent_retention_until, deletion_verified, \
         verified_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(tombstone.id)
    .bind(tombstone.record_id)
    .bind(&tombstone.original_decision_id)
    .bind(&tombstone.deleted_by)
    .bind(&tombstone.deletion_reason)
    .bind(&tombstone.legal_basis)
    .bind(tombstone.original_hash.as_str())
    .bind(tombstone.deletion_hash.as_str())
    .bind(&tombstone.deletion_anchor_tx_hash)
    .bind(tombstone.created_at)
    .bind(tombstone.permanent_retention_until)
    .bind(tombstone.deletion_verified)
    .bind(tombstone.verified_at)
    .execute(pool)
    .await
    .map_err(|e| map_unique(e, "deletion_hash", tombstone.deletion_hash.to_string()))?;
    Ok(tombstone)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<TombstoneRecord>, StoreError> {
    let row = sqlx::query_as::<_, TombstoneRow>(&format!(
        "SELECT {TOMBSTONE_COLUMNS} FROM tombstone_records WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(TombstoneRow::into_tombstone).transpose()
}

pub async fn update(pool: &PgPool, tombstone: &TombstoneRecord) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE tombstone_records SET deletion_anchor_tx_hash = $1, deletion_verified = $2, \
         verified_at = $3 \
         WHERE id = $4",
    )
    .bind(&tombstone.deletion_anchor_tx_hash)
    .bind(tombstone.deletion_verified)
    .bind(tombstone.verified_at)
    .bind(tombstone.id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("tombstone {}", tombstone.id)));
    }
    Ok(())
}

pub async fn list_for_user(
    pool: &PgPool,
    user_id: &str,
    organization_id: &str,
) -> Result<Vec<TombstoneRecord>, StoreError> {
    let rows = sqlx::query_as::<_, TombstoneRow>(&format!(
        "SELECT {TOMBSTONE_COLUMNS} FROM tombstone_records \
         WHERE original_decision_id IN ( \
             SELECT decision_id FROM decision_records \
             WHERE user_id = $1 AND organization_id = $2) \
         ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .bind(organization_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TombstoneRow::into_tombstone).collect()
}

pub async fn count_orphans(pool: &PgPool) -> Result<u64, StoreError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS orphans FROM tombstone_records t \
         WHERE t.record_id IS NULL \
            OR NOT EXISTS (SELECT 1 FROM decision_records r WHERE r.id = t.record_id)",
    )
    .fetch_one(pool)
    .await?;
    Ok(row.get::<i64, _>("orphans") as u64)
}

#[derive(sqlx::FromRow)]
struct TombstoneRow {
    id: Uuid,
    record_id: Option<Uuid>,
    original_decision_id: String,
    deleted_by: String,
    deletion_reason: String,
    legal_basis: Option<String>,
    original_hash: String,
    deletion_hash: String,
    deletion_anchor_tx_hash: Option<String>,
    created_at: DateTime<Utc>,
    permanent_retention_until: DateTime<Utc>,
    deletion_verified: bool,
    verified_at: Option<DateTime<Utc>>,
}

impl TombstoneRow {
    fn into_tombstone(self) -> Result<TombstoneRecord, StoreError> {
        Ok(TombstoneRecord {
            id: self.id,
            record_id: self.record_id,
            original_decision_id: self.original_decision_id,
            deleted_by: self.deleted_by,
            deletion_reason: self.deletion_reason,
            legal_basis: self.legal_basis,
            original_hash: parse_digest("original_hash", &self.original_hash)?,
            deletion_hash: parse_digest("deletion_hash", &self.deletion_hash)?,
            deletion_anchor_tx_hash: self.deletion_anchor_tx_hash,
            created_at: self.created_at,
            permanent_retention_until: self.permanent_retention_until,
            deletion_verified: self.deletion_verified,
            verified_at: self.verified_at,
        })
    }
}
