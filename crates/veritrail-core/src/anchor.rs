//! # Ledger Anchor Entities
//!
//! An anchor is one attempt to commit a Merkle root to the external ledger.
//! Its lifecycle is a strict forward-only state machine; the worker drives
//! transitions and the store persists every step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::HexDigest;

/// Lifecycle state of a ledger anchor.
///
/// ```text
/// PENDING --submit--> SUBMITTED --receipt--> CONFIRMED --12 confs--> FINALIZED
///    ^                     |                      |
///    |                     +-----fail-----+------+
///    |                                    v
///    +---------------- retry ---------- FAILED
/// ```
///
/// `Finalized` is the only terminal state. `Failed` may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnchorStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    Finalized,
}

impl AnchorStatus {
    /// The set of states this state may legally move to.
    pub fn valid_transitions(&self) -> &'static [AnchorStatus] {
        match self {
            Self::Pending => &[Self::Submitted, Self::Confirmed, Self::Failed],
            Self::Submitted => &[Self::Confirmed, Self::Failed],
            Self::Confirmed => &[Self::Finalized, Self::Failed],
            Self::Failed => &[Self::Pending],
            Self::Finalized => &[],
        }
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: AnchorStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
            Self::Finalized => "FINALIZED",
        }
    }
}

impl std::fmt::Display for AnchorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger anchoring attempt for a Merkle root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: Uuid,
    /// Opaque external identifier, `anchor_` + 16 hex chars.
    pub anchor_id: String,

    pub root_id: Option<Uuid>,
    /// Duplicated from the root for denormalized lookup.
    pub root_hash: HexDigest,

    pub chain_id: u64,
    pub network_name: String,

    // Nullable until the transaction is submitted / mined.
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub block_hash: Option<String>,
    pub gas_used: Option<u64>,

    pub status: AnchorStatus,

    pub submitted_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,

    pub retry_count: u32,
    pub last_error: Option<String>,
}
