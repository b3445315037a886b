//! # Decision Hasher
//!
//! SHA3-256 fingerprinting for everything the audit trail commits to:
//! strings, byte blobs, canonical JSON values, record hash quadruples,
//! Merkle parent hashes, tombstone hashes, and HMAC export signatures.
//!
//! ## Cross-Implementation Contract
//!
//! Two rules here are load-bearing and must never change:
//!
//! 1. Dictionary fingerprints digest [`CanonicalBytes`] — sorted keys, no
//!    whitespace, raw UTF-8. Any reimplementation that produces different
//!    bytes for the same semantic value breaks verification across
//!    deployments.
//! 2. [`merkle_hash`](DecisionHasher::merkle_hash) concatenates the two
//!    child digests as *hex strings* and hashes the resulting ASCII, not
//!    the raw bytes. Switching to raw-byte concatenation silently changes
//!    every root.
//!
//! All digest comparisons are constant-time.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha3::{Digest, Sha3_256};
use subtle::ConstantTimeEq;
use veritrail_core::{CanonicalBytes, HexDigest};

use crate::error::CryptoError;

type HmacSha3 = Hmac<Sha3_256>;

/// The four fingerprints of one decision record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHashes {
    pub input_hash: HexDigest,
    pub output_hash: HexDigest,
    pub context_hash: HexDigest,
    pub full_hash: HexDigest,
}

/// Pure-value hashing component.
///
/// Holds no state beyond the optional HMAC signing key; it is cheap to
/// clone and safe to share. Construct one from settings and pass it to
/// each component that fingerprints data.
#[derive(Debug, Clone, Default)]
pub struct DecisionHasher {
    secret_key: Option<String>,
}

impl DecisionHasher {
    /// A hasher without an HMAC signing key.
    pub fn new() -> Self {
        Self::default()
    }

    /// A hasher carrying the HMAC signing key for export signatures.
    pub fn with_secret_key(key: impl Into<String>) -> Self {
        Self {
            secret_key: Some(key.into()),
        }
    }

    /// SHA3-256 over the UTF-8 encoding of a string.
    pub fn hash_string(&self, data: &str) -> HexDigest {
        self.hash_bytes(data.as_bytes())
    }

    /// SHA3-256 over raw bytes.
    pub fn hash_bytes(&self, data: &[u8]) -> HexDigest {
        let out: [u8; 32] = Sha3_256::digest(data).into();
        HexDigest::from_bytes(&out)
    }

    /// Deterministic dictionary fingerprint: canonicalize, then digest.
    pub fn hash_value(&self, value: &Value) -> HexDigest {
        self.hash_bytes(CanonicalBytes::new(value).as_bytes())
    }

    /// Compute the four fingerprints of a decision.
    ///
    /// `full_hash` binds the other three to the fixed metadata projection:
    /// it is the dictionary fingerprint of `{input_hash, output_hash,
    /// context_hash, metadata}`.
    pub fn compute_audit_hash(
        &self,
        input: &str,
        output: &str,
        context: &Value,
        metadata: &Value,
    ) -> RecordHashes {
        let input_hash = self.hash_string(input);
        let output_hash = self.hash_string(output);
        let context_hash = self.hash_value(context);

        let full_hash = self.hash_value(&serde_json::json!({
            "input_hash": input_hash,
            "output_hash": output_hash,
            "context_hash": context_hash,
            "metadata": metadata,
        }));

        RecordHashes {
            input_hash,
            output_hash,
            context_hash,
            full_hash,
        }
    }

    /// Recompute and compare a full hash, constant-time.
    pub fn verify_audit_hash(
        &self,
        input: &str,
        output: &str,
        context: &Value,
        metadata: &Value,
        expected_full_hash: &HexDigest,
    ) -> bool {
        let computed = self.compute_audit_hash(input, output, context, metadata);
        computed.full_hash.ct_eq(expected_full_hash)
    }

    /// Parent hash of two Merkle children.
    ///
    /// Contract: hex concatenation of the child digests, digested as an
    /// ASCII string. Never raw-byte concatenation.
    pub fn merkle_hash(&self, left: &HexDigest, right: &HexDigest) -> HexDigest {
        let mut combined = String::with_capacity(128);
        combined.push_str(left.as_str());
        combined.push_str(right.as_str());
        self.hash_string(&combined)
    }

    /// Tombstone hash binding an erased record's fingerprint to the
    /// deletion event.
    pub fn tombstone_hash(
        &self,
        original_hash: &HexDigest,
        deletion_timestamp: &str,
        deleted_by: &str,
        reason: &str,
    ) -> HexDigest {
        self.hash_value(&serde_json::json!({
            "original_hash": original_hash,
            "deletion_timestamp": deletion_timestamp,
            "deleted_by": deleted_by,
            "reason": reason,
            "type": "TOMBSTONE",
        }))
    }

    /// Group proof over a whole deletion request.
    pub fn deletion_proof_hash(
        &self,
        deletion_id: &str,
        tombstone_ids: &[String],
        requested_by: &str,
        timestamp: &str,
    ) -> HexDigest {
        self.hash_value(&serde_json::json!({
            "deletion_id": deletion_id,
            "tombstone_ids": tombstone_ids,
            "requested_by": requested_by,
            "timestamp": timestamp,
            "type": "GDPR_DELETION",
        }))
    }

    /// HMAC-SHA3-256 signature, hex output.
    ///
    /// Uses the explicit key when given, otherwise the configured signing
    /// key. No key at all is an error, never a silent fallback.
    pub fn sign_hmac(&self, data: &str, key: Option<&str>) -> Result<HexDigest, CryptoError> {
        let key = key
            .or(self.secret_key.as_deref())
            .ok_or(CryptoError::MissingKey)?;
        let mut mac = HmacSha3::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        mac.update(data.as_bytes());
        let out: [u8; 32] = mac.finalize().into_bytes().into();
        Ok(HexDigest::from_bytes(&out))
    }

    /// Verify an HMAC signature, constant-time.
    pub fn verify_hmac(
        &self,
        data: &str,
        signature: &str,
        key: Option<&str>,
    ) -> Result<bool, CryptoError> {
        let expected = self.sign_hmac(data, key)?;
        Ok(expected.ct_eq_str(signature))
    }

    /// Constant-time equality for arbitrary strings.
    pub fn compare(&self, a: &str, b: &str) -> bool {
        a.as_bytes().ct_eq(b.as_bytes()).into()
    }
}
