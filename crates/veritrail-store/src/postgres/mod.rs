//! # Postgres Store
//!
//! SQLx-backed implementation of [`AuditStore`]. Queries are runtime-bound
//! (never macros), split into per-entity modules with private row structs
//! mapped by `into_*` converters. Migrations are embedded and applied on
//! pool initialization.
//!
//! The database is optional: [`init_pool`] returns `None` when
//! `DATABASE_URL` is unset and the system falls back to the in-memory
//! store.

mod anchors;
mod records;
mod tombstones;
mod trees;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;
use veritrail_core::{
    AnchorRecord, AnchorStatus, ComplianceMarker, DecisionContext, DecisionRecord, HexDigest,
    InteractionPayload, MerkleNode, MerkleRoot, TombstoneRecord,
};

use crate::{AuditStore, StoreError};

/// Initialize the connection pool and run embedded migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set — running in-memory only mode. \
                 State will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Postgres-backed audit store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a unique-violation (SQLSTATE 23505) onto [`StoreError::Duplicate`].
pub(crate) fn map_unique(err: sqlx::Error, field: &'static str, value: String) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return StoreError::Duplicate { field, value };
        }
    }
    StoreError::Database(err)
}

/// Parse a persisted digest column, surfacing corruption as an error
/// rather than a silent default.
pub(crate) fn parse_digest(column: &str, value: &str) -> Result<HexDigest, StoreError> {
    HexDigest::parse(value)
        .map_err(|e| StoreError::Corrupt(format!("column {column} holds {value:?}: {e}")))
}

pub(crate) fn parse_digest_opt(
    column: &str,
    value: Option<&str>,
) -> Result<Option<HexDigest>, StoreError> {
    value.map(|v| parse_digest(column, v)).transpose()
}

impl AuditStore for PgStore {
    async fn insert_decision(
        &self,
        record: DecisionRecord,
        payload: InteractionPayload,
        context: DecisionContext,
        markers: Vec<ComplianceMarker>,
    ) -> Result<DecisionRecord, StoreError> {
        records::insert_decision(&self.pool, record, payload, context, markers).await
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<DecisionRecord>, StoreError> {
        records::get_record(&self.pool, id).await
    }

    async fn get_by_decision_id(
        &self,
        decision_id: &str,
        include_deleted: bool,
    ) -> Result<Option<DecisionRecord>, StoreError> {
        records::get_by_decision_id(&self.pool, decision_id, include_deleted).await
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
        records::list_by_organization(
            &self.pool,
            organization_id,
            start,
            end,
            include_deleted,
            limit,
            offset,
        )
        .await
    }

    async fn list_sequence_range(
        &self,
        start_sequence: i64,
        end_sequence: i64,
    ) -> Result<Vec<DecisionRecord>, StoreError> {
        records::list_sequence_range(&self.pool, start_sequence, end_sequence).await
    }

    async fn list_unbatched(&self, limit: i64) -> Result<Vec<DecisionRecord>, StoreError> {
        records::list_unbatched(&self.pool, limit).await
    }

    async fn get_payload(
        &self,
        record_id: Uuid,
    ) -> Result<Option<InteractionPayload>, StoreError> {
        records::get_payload(&self.pool, record_id).await
    }

    async fn get_context(&self, record_id: Uuid) -> Result<Option<DecisionContext>, StoreError> {
        records::get_context(&self.pool, record_id).await
    }

    async fn set_merkle_root(
        &self,
        start_sequence: i64,
        end_sequence: i64,
        root_hash: &HexDigest,
    ) -> Result<u64, StoreError> {
        records::set_merkle_root(&self.pool, start_sequence, end_sequence, root_hash).await
    }

    async fn set_anchor_tx(
        &self,
        root_hash: &HexDigest,
        tx_hash: &str,
    ) -> Result<u64, StoreError> {
        records::set_anchor_tx(&self.pool, root_hash, tx_hash).await
    }

    async fn mark_deleted(
        &self,
        record_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        records::mark_deleted(&self.pool, record_id, deleted_at).await
    }

    async fn purge_plaintext(&self, record_id: Uuid) -> Result<(), StoreError> {
        records::purge_plaintext(&self.pool, record_id).await
    }

    async fn insert_tree(
        &self,
        root: MerkleRoot,
        nodes: Vec<MerkleNode>,
    ) -> Result<(), StoreError> {
        trees::insert_tree(&self.pool, root, nodes).await
    }

    async fn get_root_by_hash(
        &self,
        root_hash: &HexDigest,
    ) -> Result<Option<MerkleRoot>, StoreError> {
        trees::get_root_by_hash(&self.pool, root_hash).await
    }

    async fn nodes_for_root(&self, root_id: Uuid) -> Result<Vec<MerkleNode>, StoreError> {
        trees::nodes_for_root(&self.pool, root_id).await
    }

    async fn mark_root_anchored(
        &self,
        root_id: Uuid,
        anchor_id: Uuid,
        anchored_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        trees::mark_root_anchored(&self.pool, root_id, anchor_id, anchored_at).await
    }

    async fn insert_anchor(&self, anchor: AnchorRecord) -> Result<(), StoreError> {
        anchors::insert(&self.pool, anchor).await
    }

    async fn update_anchor(&self, anchor: &AnchorRecord) -> Result<(), StoreError> {
        anchors::update(&self.pool, anchor).await
    }

    async fn get_anchor(&self, id: Uuid) -> Result<Option<AnchorRecord>, StoreError> {
        anchors::get_by_id(&self.pool, id).await
    }

    async fn list_anchors_by_status(
        &self,
        status: AnchorStatus,
    ) -> Result<Vec<AnchorRecord>, StoreError> {
        anchors::list_by_status(&self.pool, status).await
    }

    async fn insert_tombstone(
        &self,
        tombstone: TombstoneRecord,
    ) -> Result<TombstoneRecord, StoreError> {
        tombstones::insert(&self.pool, tombstone).await
    }

    async fn get_tombstone(&self, id: Uuid) -> Result<Option<TombstoneRecord>, StoreError> {
        tombstones::get_by_id(&self.pool, id).await
    }

    async fn update_tombstone(&self, tombstone: &TombstoneRecord) -> Result<(), StoreError> {
        tombstones::update(&self.pool, tombstone).await
    }

    async fn list_tombstones_for_user(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Vec<TombstoneRecord>, StoreError> {
        tombstones::list_for_user(&self.pool, user_id, organization_id).await
    }

    async fn count_orphan_tombstones(&self) -> Result<u64, StoreError> {
        tombstones::count_orphans(&self.pool).await
    }
}
