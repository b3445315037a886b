//! # Hex Digest Newtype
//!
//! A validated 64-character lowercase hexadecimal SHA3-256 digest. This is
//! the persisted and wire form of every fingerprint in the system: record
//! hashes, Merkle node hashes, root hashes, and tombstone hashes.
//!
//! ## Comparison Invariant
//!
//! Equality is constant-time. Digest comparison happens on verification
//! paths where a timing side channel would leak how much of an expected
//! hash an attacker has matched, so `PartialEq` routes through `subtle`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Error parsing a hex digest string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestParseError {
    /// The string is not 64 characters long.
    #[error("digest must be 64 hex chars, got {0}")]
    BadLength(usize),

    /// The string contains a non-hexadecimal character.
    #[error("digest contains non-hex character {0:?}")]
    BadCharacter(char),
}

/// A 64-character lowercase hex SHA3-256 digest.
///
/// Construction is validating: uppercase input is normalized to lowercase,
/// anything that is not exactly 64 hex characters is rejected. Once built,
/// the inner string cannot be mutated, so the invariant holds for the
/// lifetime of the value.
#[derive(Debug, Clone, Eq, Hash)]
pub struct HexDigest(String);

impl HexDigest {
    /// Parse and validate a digest string, normalizing to lowercase.
    pub fn parse(s: &str) -> Result<Self, DigestParseError> {
        if s.len() != 64 {
            return Err(DigestParseError::BadLength(s.len()));
        }
        if let Some(c) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(DigestParseError::BadCharacter(c));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Hex-encode 32 raw digest bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let mut s = String::with_capacity(64);
        for b in bytes {
            s.push_str(&format!("{b:02x}"));
        }
        Self(s)
    }

    /// The digest as a hex string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode back to 32 raw bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, chunk) in self.0.as_bytes().chunks_exact(2).enumerate() {
            // Both nibbles are guaranteed hex by construction.
            let hi = (chunk[0] as char).to_digit(16).unwrap_or(0) as u8;
            let lo = (chunk[1] as char).to_digit(16).unwrap_or(0) as u8;
            out[i] = (hi << 4) | lo;
        }
        out
    }

    /// Constant-time equality against another digest.
    pub fn ct_eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }

    /// Constant-time equality against an unvalidated hex string.
    ///
    /// The candidate is lowercased before comparison so that case
    /// differences alone never count as a mismatch.
    pub fn ct_eq_str(&self, candidate: &str) -> bool {
        self.0
            .as_bytes()
            .ct_eq(candidate.to_ascii_lowercase().as_bytes())
            .into()
    }
}

impl PartialEq for HexDigest {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other)
    }
}

impl std::fmt::Display for HexDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for HexDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for HexDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
