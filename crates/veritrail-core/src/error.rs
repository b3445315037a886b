//! # Error Taxonomy
//!
//! One structured error type for the whole audit core. Every variant maps
//! to a stable machine-readable kind so that outer layers (HTTP, CLI,
//! batch drivers) can translate without string matching.
//!
//! Integrity mismatches are deliberately absent: a recomputed hash that
//! differs from the stored one is *data* in an integrity report, never an
//! error that propagates.

use thiserror::Error;

/// Failures surfaced by the audit core.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Malformed input: bad hash length, empty Merkle batch, invalid
    /// proof step, missing required field.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Record, root, anchor, or tombstone absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate `decision_id` or `deletion_hash`.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Ledger RPC transport failure. Retryable.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Contract reverted or receipt shows failure. Not retryable without
    /// operator action.
    #[error("ledger rejected: {0}")]
    LedgerRejected(String),

    /// Confirmation poll exceeded its budget.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuditError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            Self::LedgerRejected(_) => "LEDGER_REJECTED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a caller-driven retry can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LedgerUnavailable(_) | Self::Timeout(_))
    }
}

impl From<crate::digest::DigestParseError> for AuditError {
    fn from(err: crate::digest::DigestParseError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(AuditError::InvalidInput("x".into()).kind(), "INVALID_INPUT");
        assert_eq!(AuditError::NotFound("x".into()).kind(), "NOT_FOUND");
        assert_eq!(AuditError::Conflict("x".into()).kind(), "CONFLICT");
        assert_eq!(
            AuditError::LedgerUnavailable("x".into()).kind(),
            "LEDGER_UNAVAILABLE"
        );
        assert_eq!(
            AuditError::LedgerRejected("x".into()).kind(),
            "LEDGER_REJECTED"
        );
        assert_eq!(AuditError::Timeout("x".into()).kind(), "TIMEOUT");
        assert_eq!(AuditError::Internal("x".into()).kind(), "INTERNAL");
    }

    #[test]
    fn transport_failures_are_retryable() {
        assert!(AuditError::LedgerUnavailable("rpc down".into()).is_retryable());
        assert!(AuditError::Timeout("poll budget".into()).is_retryable());
        assert!(!AuditError::LedgerRejected("reverted".into()).is_retryable());
        assert!(!AuditError::Conflict("dup".into()).is_retryable());
    }

    #[test]
    fn display_carries_detail() {
        let err = AuditError::NotFound("decision 'dec_123'".into());
        assert!(err.to_string().contains("dec_123"));
    }

    #[test]
    fn digest_parse_error_converts_to_invalid_input() {
        let parse_err = crate::digest::HexDigest::parse("short").unwrap_err();
        let err: AuditError = parse_err.into();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }
}
