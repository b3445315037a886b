//! # veritrail-store — Audit Store Contract and Implementations
//!
//! The append-only persistence layer behind the audit core. Everything the
//! core needs from storage is expressed in one trait, [`AuditStore`]; the
//! services are generic over it.
//!
//! ## Ordering Guarantee
//!
//! `sequence_number` assignment belongs to the store, not the core. The
//! Postgres store uses a `BIGSERIAL` column (serializable, monotonic); the
//! in-memory store a counter behind a mutex. Callers never supply sequence
//! numbers.
//!
//! ## Implementations
//!
//! - [`MemoryStore`] — development and test parity, including a
//!   fault-injection hook for tamper drills.
//! - [`PgStore`] — SQLx runtime queries over Postgres with embedded
//!   migrations. Optional: when `DATABASE_URL` is absent the system runs
//!   memory-only (state does not survive restarts).

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use veritrail_core::{
    AnchorRecord, AnchorStatus, AuditError, ComplianceMarker, DecisionContext, DecisionRecord,
    HexDigest, InteractionPayload, MerkleNode, MerkleRoot, TombstoneRecord,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Failures from the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("duplicate {field}: {value}")]
    Duplicate {
        /// The unique field, e.g. `decision_id` or `deletion_hash`.
        field: &'static str,
        /// The conflicting value.
        value: String,
    },

    /// The referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row content could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row violates an invariant (e.g. malformed digest).
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<StoreError> for AuditError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { .. } => AuditError::Conflict(err.to_string()),
            StoreError::NotFound(_) => AuditError::NotFound(err.to_string()),
            StoreError::Database(_) | StoreError::Serialization(_) | StoreError::Corrupt(_) => {
                AuditError::Internal(err.to_string())
            }
        }
    }
}

/// The persistence contract consumed by the audit core.
///
/// Every method is a suspension point; implementations mediate concurrency
/// (transactions for multi-row writes, serial sequence assignment).
#[allow(async_fn_in_trait)]
pub trait AuditStore: Send + Sync {
    // ── Decision records ────────────────────────────────────────────

    /// Atomically insert a record with its payload, context, and markers.
    ///
    /// The store assigns `sequence_number`; the caller's value is ignored.
    /// Returns the persisted record. Duplicate `decision_id` →
    /// [`StoreError::Duplicate`].
    async fn insert_decision(
        &self,
        record: DecisionRecord,
        payload: InteractionPayload,
        context: DecisionContext,
        markers: Vec<ComplianceMarker>,
    ) -> Result<DecisionRecord, StoreError>;

    async fn get_record(&self, id: Uuid) -> Result<Option<DecisionRecord>, StoreError>;

    async fn get_by_decision_id(
        &self,
        decision_id: &str,
        include_deleted: bool,
    ) -> Result<Option<DecisionRecord>, StoreError>;

    /// Records for an organization within an optional time window,
    /// ordered by ascending sequence number.
    async fn list_by_organization(
        &self,
        organization_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        include_deleted: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DecisionRecord>, StoreError>;

    /// All records in the closed sequence range, any organization,
    /// ordered by ascending sequence number.
    async fn list_sequence_range(
        &self,
        start_sequence: i64,
        end_sequence: i64,
    ) -> Result<Vec<DecisionRecord>, StoreError>;

    /// Records not yet covered by a Merkle root, ordered by ascending
    /// sequence number.
    async fn list_unbatched(&self, limit: i64) -> Result<Vec<DecisionRecord>, StoreError>;

    async fn get_payload(&self, record_id: Uuid)
        -> Result<Option<InteractionPayload>, StoreError>;

    async fn get_context(&self, record_id: Uuid) -> Result<Option<DecisionContext>, StoreError>;

    /// Stamp `merkle_root` on every record in the closed sequence range.
    /// Returns the number of records updated.
    async fn set_merkle_root(
        &self,
        start_sequence: i64,
        end_sequence: i64,
        root_hash: &HexDigest,
    ) -> Result<u64, StoreError>;

    /// Stamp `anchor_tx_hash` on every record covered by the root.
    async fn set_anchor_tx(
        &self,
        root_hash: &HexDigest,
        tx_hash: &str,
    ) -> Result<u64, StoreError>;

    /// Flag a record as deleted. The row and its hashes remain.
    async fn mark_deleted(
        &self,
        record_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Erase the record's interaction payload and context plaintext.
    async fn purge_plaintext(&self, record_id: Uuid) -> Result<(), StoreError>;

    // ── Merkle trees ────────────────────────────────────────────────

    /// Atomically persist a root and its nodes (nodes stamped with the
    /// root's id).
    async fn insert_tree(
        &self,
        root: MerkleRoot,
        nodes: Vec<MerkleNode>,
    ) -> Result<(), StoreError>;

    async fn get_root_by_hash(&self, root_hash: &HexDigest)
        -> Result<Option<MerkleRoot>, StoreError>;

    /// All nodes belonging to a root, leaves first.
    async fn nodes_for_root(&self, root_id: Uuid) -> Result<Vec<MerkleNode>, StoreError>;

    /// Mark a root anchored by the given anchor.
    async fn mark_root_anchored(
        &self,
        root_id: Uuid,
        anchor_id: Uuid,
        anchored_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ── Ledger anchors ──────────────────────────────────────────────

    async fn insert_anchor(&self, anchor: AnchorRecord) -> Result<(), StoreError>;

    /// Full-row update keyed by the anchor's internal id.
    async fn update_anchor(&self, anchor: &AnchorRecord) -> Result<(), StoreError>;

    async fn get_anchor(&self, id: Uuid) -> Result<Option<AnchorRecord>, StoreError>;

    async fn list_anchors_by_status(
        &self,
        status: AnchorStatus,
    ) -> Result<Vec<AnchorRecord>, StoreError>;

    // ── Tombstones ──────────────────────────────────────────────────

    /// Duplicate `deletion_hash` → [`StoreError::Duplicate`].
    async fn insert_tombstone(
        &self,
        tombstone: TombstoneRecord,
    ) -> Result<TombstoneRecord, StoreError>;

    async fn get_tombstone(&self, id: Uuid) -> Result<Option<TombstoneRecord>, StoreError>;

    async fn update_tombstone(&self, tombstone: &TombstoneRecord) -> Result<(), StoreError>;

    /// Tombstones for records that belonged to a (user, organization)
    /// pair, newest first.
    async fn list_tombstones_for_user(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Vec<TombstoneRecord>, StoreError>;

    /// Tombstones whose original record row no longer resolves. Used by
    /// the integrity verifier to excuse sequence gaps.
    async fn count_orphan_tombstones(&self) -> Result<u64, StoreError>;
}
