//! Error types for hashing and Merkle operations.

use thiserror::Error;
use veritrail_core::AuditError;

/// Failures from the cryptographic layer.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// A Merkle build was requested over zero leaves.
    #[error("cannot build a Merkle tree from an empty leaf batch")]
    EmptyInput,

    /// The tree would exceed the configured depth cap.
    #[error("tree depth {depth} exceeds configured cap {max}")]
    DepthExceeded {
        /// Depth the batch would require.
        depth: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The requested leaf is not present under this root.
    #[error("leaf {0} not present in tree")]
    LeafNotFound(String),

    /// The persisted node set is structurally inconsistent.
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    /// HMAC was requested but no key is available.
    #[error("HMAC signing key required but not configured")]
    MissingKey,

    /// The HMAC key was rejected by the primitive.
    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),
}

impl From<CryptoError> for AuditError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::EmptyInput
            | CryptoError::DepthExceeded { .. }
            | CryptoError::MissingKey
            | CryptoError::InvalidKey(_) => AuditError::InvalidInput(err.to_string()),
            CryptoError::LeafNotFound(_) => AuditError::NotFound(err.to_string()),
            CryptoError::MalformedTree(_) => AuditError::Internal(err.to_string()),
        }
    }
}
