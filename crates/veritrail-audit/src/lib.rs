//! # veritrail-audit — Audit Services
//!
//! The service layer over the store, hasher, Merkle engine, and anchor
//! worker:
//!
//! - [`IngestService`] — validates and captures decisions; failures raise
//!   synchronously so callers see them.
//! - [`MerkleBatcher`] — periodically batches uncovered records into a
//!   Merkle tree over their actual sequence range and hands the root to
//!   the anchor worker.
//! - [`DeletionService`] — privacy deletion behind cryptographic
//!   tombstones; plaintext is purged, fingerprints and proofs survive.
//! - [`IntegrityService`] — recomputes everything and reports divergence
//!   as data, never as errors.
//!
//! ## Control Flow
//!
//! ```text
//! capture ─▶ hasher ─▶ store
//!                        │  (periodic)
//!                        ▼
//!               batcher ─▶ merkle ─▶ store ─▶ anchor worker ─▶ ledger
//!
//! deletion ─▶ store (tombstone + purge) ─▶ [merkle + anchor]
//! verify   ─▶ store ─▶ hasher + merkle   ─▶ IntegrityReport
//! ```

pub mod batch;
pub mod deletion;
pub mod ingest;
pub mod verify;

// Re-export primary types.
pub use batch::{BatchConfig, MerkleBatcher};
pub use deletion::{
    DeletionHistoryEntry, DeletionReceipt, DeletionRequest, DeletionService, PortabilityExport,
    PortabilityRecord, TombstoneVerification,
};
pub use ingest::{HashDetails, IngestService};
pub use verify::{DecisionVerification, IntegrityReport, IntegrityService, TamperedRecord};
