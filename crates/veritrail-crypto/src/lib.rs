//! # veritrail-crypto — Cryptographic Primitives for the Audit Trail
//!
//! This crate provides the fingerprinting and proof machinery used
//! throughout the workspace:
//!
//! - **SHA3-256 hashing** over strings, bytes, and canonical JSON values,
//!   producing [`HexDigest`](veritrail_core::HexDigest) values.
//! - **Record hash quadruples** — `input_hash`, `output_hash`,
//!   `context_hash`, and the binding `full_hash`.
//! - **HMAC-SHA3-256** signing for export integrity.
//! - **The Merkle engine** — balanced binary tree construction with
//!   odd-tail self-pairing, inclusion proof generation, and verification.
//!
//! ## Security Invariants
//!
//! - Every dictionary fingerprint goes through
//!   [`CanonicalBytes`](veritrail_core::CanonicalBytes); there is no raw
//!   `&[u8]` path for JSON content.
//! - Every digest comparison is constant-time (`subtle`).
//! - The Merkle parent hash concatenates child digests as hex strings;
//!   this is the published contract and independent verifiers depend on it.

pub mod error;
pub mod hasher;
pub mod merkle;

// Re-export primary types.
pub use error::CryptoError;
pub use hasher::{DecisionHasher, RecordHashes};
pub use merkle::{build_tree, prove, verify, BuiltTree, MerkleProof, ProofStep, SiblingSide};
