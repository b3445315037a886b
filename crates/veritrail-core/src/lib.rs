//! # veritrail-core — Foundational Types for the Audit Trail
//!
//! This crate provides the building blocks shared by every other crate in
//! the workspace:
//!
//! - **Canonical JSON bytes** ([`CanonicalBytes`]) — the single sanctioned
//!   serialization for anything that gets fingerprinted.
//! - **Hex digests** ([`HexDigest`]) — validated 64-char lowercase hex
//!   SHA3-256 values with constant-time equality.
//! - **Domain entities** — decision records with their erasable payload and
//!   context, Merkle nodes and roots, ledger anchors, and tombstones.
//! - **Error taxonomy** ([`AuditError`]) — stable machine-readable kinds.
//! - **Settings** ([`Settings`]) — explicit configuration values; nothing
//!   reads the environment ambiently after startup.
//!
//! ## Layering
//!
//! `veritrail-core` has no knowledge of storage, hashing primitives, or the
//! ledger. It defines *what* the system talks about; `veritrail-crypto`,
//! `veritrail-store`, and `veritrail-anchor` define *how*.

pub mod anchor;
pub mod canonical;
pub mod decision;
pub mod digest;
pub mod error;
pub mod settings;
pub mod tombstone;
pub mod tree;

// Re-export primary types.
pub use anchor::{AnchorRecord, AnchorStatus};
pub use canonical::CanonicalBytes;
pub use decision::{
    metadata_projection, ComplianceMarker, ComplianceStandard, ContextInput, DecisionContext,
    DecisionInput, DecisionRecord, DecisionType, InteractionInput, InteractionPayload, MarkerInput,
};
pub use digest::{DigestParseError, HexDigest};
pub use error::AuditError;
pub use settings::Settings;
pub use tombstone::TombstoneRecord;
pub use tree::{MerkleNode, MerkleRoot};
