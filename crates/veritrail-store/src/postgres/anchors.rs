//! Ledger anchor persistence.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use veritrail_core::{AnchorRecord, AnchorStatus};

use super::parse_digest;
use crate::StoreError;

const ANCHOR_COLUMNS: &str = "id, anchor_id, root_id, root_hash, chain_id, network_name, \
     tx_hash, block_number, block_hash, gas_used, status, submitted_at, confirmed_at, \
     finalized_at, retry_count, last_error";

pub async fn insert(pool: &PgPool, anchor: AnchorRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO ledger_anchors (id, anchor_id, root_id, root_hash, chain_id, \
         network_name, tx_hash, block_number, block_hash, gas_used, status, submitted_at, \
         confirmed_at, finalized_at, retry_count, last_error) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(anchor.id)
    .bind(&anchor.anchor_id)
    .bind(anchor.root_id)
    .bind(anchor.root_hash.as_str())
    .bind(anchor.chain_id as i64)
    .bind(&anchor.network_name)
    .bind(&anchor.tx_hash)
    .bind(anchor.block_number.map(|n| n as i64))
    .bind(&anchor.block_hash)
    .bind(anchor.gas_used.map(|n| n as i64))
    .bind(anchor.status.as_str())
    .bind(anchor.submitted_at)
    .bind(anchor.confirmed_at)
    .bind(anchor.finalized_at)
    .bind(anchor.retry_count as i32)
    .bind(&anchor.last_error)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update(pool: &PgPool, anchor: &AnchorRecord) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE ledger_anchors SET tx_hash = $1, block_number = $2, block_hash = $3, \
         gas_used = $4, status = $5, confirmed_at = $6, finalized_at = $7, retry_count = $8, \
         last_error = $9 \
         WHERE id = $10",
    )
    .bind(&anchor.tx_hash)
    .bind(anchor.block_number.map(|n| n as i64))
    .bind(&anchor.block_hash)
    .bind(anchor.gas_used.map(|n| n as i64))
    .bind(anchor.status.as_str())
    .bind(anchor.confirmed_at)
    .bind(anchor.finalized_at)
    .bind(anchor.retry_count as i32)
    .bind(&anchor.last_error)
    .bind(anchor.id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("anchor {}", anchor.id)));
    }
    Ok(())
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<AnchorRecord>, StoreError> {
    let row = sqlx::query_as::<_, AnchorRow>(&format!(
        "SELECT {ANCHOR_COLUMNS} FROM ledger_anchors WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(AnchorRow::into_anchor).transpose()
}

pub async fn list_by_status(
    pool: &PgPool,
    status: AnchorStatus,
) -> Result<Vec<AnchorRecord>, StoreError> {
    let rows = sqlx::query_as::<_, AnchorRow>(&format!(
        "SELECT {ANCHOR_COLUMNS} FROM ledger_anchors WHERE status = $1 ORDER BY submitted_at"
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(AnchorRow::into_anchor).collect()
}

#[derive(sqlx::FromRow)]
struct AnchorRow {
    id: Uuid,
    anchor_id: String,
    root_id: Option<Uuid>,
    root_hash: String,
    chain_id: i64,
    network_name: String,
    tx_hash: Option<String>,
    block_number: Option<i64>,
    block_hash: Option<String>,
    gas_used: Option<i64>,
    status: String,
    submitted_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    finalized_at: Option<DateTime<Utc>>,
    retry_count: i32,
    last_error: Option<String>,
}

impl AnchorRow {
    fn into_anchor(self) -> Result<AnchorRecord, StoreError> {
        let status: AnchorStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone()))
                .map_err(|e| {
                    StoreError::Corrupt(format!(
                        "anchor {} has unknown status {:?}: {e}",
                        self.id, self.status
                    ))
                })?;

        Ok(AnchorRecord {
            id: self.id,
            anchor_id: self.anchor_id,
            root_id: self.root_id,
            root_hash: parse_digest("root_hash", &self.root_hash)?,
            chain_id: self.chain_id as u64,
            network_name: self.network_name,
            tx_hash: self.tx_hash,
            block_number: self.block_number.map(|n| n as u64),
            block_hash: self.block_hash,
            gas_used: self.gas_used.map(|n| n as u64),
            status,
            submitted_at: self.submitted_at,
            confirmed_at: self.confirmed_at,
            finalized_at: self.finalized_at,
            retry_count: self.retry_count as u32,
            last_error: self.last_error,
        })
    }
}
