//! # Cryptographic Tombstones
//!
//! A tombstone proves that a specific original hash was deleted at a
//! specific time, by a specific actor, for a specific reason — without
//! retaining the plaintext it described. Tombstones outlive the payload
//! they describe and must not be removed before their retention date.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::HexDigest;

/// Proof record for one erased decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TombstoneRecord {
    pub id: Uuid,

    /// Row reference to the original record; nullable so the tombstone
    /// survives even if the record row is ever physically removed.
    pub record_id: Option<Uuid>,
    /// Stable string identifier of the deleted decision.
    pub original_decision_id: String,

    pub deleted_by: String,
    pub deletion_reason: String,
    pub legal_basis: Option<String>,

    /// The record's `full_hash` at deletion time.
    pub original_hash: HexDigest,
    /// Digest over `{original_hash, deletion_timestamp, deleted_by,
    /// reason, type:"TOMBSTONE"}` in canonical form. Unique.
    pub deletion_hash: HexDigest,
    /// Ledger transaction that anchored the deletion, when enabled.
    pub deletion_anchor_tx_hash: Option<String>,

    pub created_at: DateTime<Utc>,
    /// The tombstone itself must be kept at least until this date.
    pub permanent_retention_until: DateTime<Utc>,

    pub deletion_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_serde_roundtrip() {
        let t = TombstoneRecord {
            id: Uuid::new_v4(),
            record_id: Some(Uuid::new_v4()),
            original_decision_id: "dec_4f2a9b1c8d3e".into(),
            deleted_by: "dpo@example.com".into(),
            deletion_reason: "user_request".into(),
            legal_basis: Some("GDPR Art. 17".into()),
            original_hash: HexDigest::from_bytes(&[5u8; 32]),
            deletion_hash: HexDigest::from_bytes(&[6u8; 32]),
            deletion_anchor_tx_hash: None,
            created_at: Utc::now(),
            permanent_retention_until: Utc::now(),
            deletion_verified: false,
            verified_at: None,
        };
        let json = serde_json::to_string(&t).unwrap();
        let back: TombstoneRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.original_decision_id, t.original_decision_id);
        assert_eq!(back.deletion_hash, t.deletion_hash);
    }
}
