//! # Ledger Client
//!
//! The narrow contract the audit core consumes from the external ledger:
//! submit a 32-byte root, poll for a receipt, read the current block
//! height. Nothing else about the chain leaks into the core.
//!
//! ## EVM Implementation
//!
//! [`JsonRpcLedger`] speaks JSON-RPC 2.0 to an EVM-compatible endpoint.
//! The anchor transaction calls the contract's
//! `anchorMerkleRoot(bytes32)` function; its 4-byte selector is
//! `0x76972d8e`. Transaction signing is delegated to the RPC endpoint's
//! key management — this client never holds private keys, and the `from`
//! address must be managed by the provider's signing service.

use serde_json::Value;
use thiserror::Error;
use veritrail_core::AuditError;

/// Errors from ledger interaction.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Transport-level failure (endpoint unreachable, timeout, bad JSON).
    /// Retryable.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The node or contract rejected the request. Not retryable without
    /// operator action.
    #[error("ledger rejected: {0}")]
    Rejected(String),
}

impl From<LedgerError> for AuditError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable(msg) => AuditError::LedgerUnavailable(msg),
            LedgerError::Rejected(msg) => AuditError::LedgerRejected(msg),
        }
    }
}

/// Mined-transaction data the worker records on confirmation.
#[derive(Debug, Clone)]
pub struct LedgerReceipt {
    pub block_number: u64,
    pub block_hash: String,
    pub gas_used: u64,
    /// False when the receipt shows a reverted transaction.
    pub succeeded: bool,
}

/// The submit/poll interface the anchor worker drives.
#[allow(async_fn_in_trait)]
pub trait LedgerClient: Send + Sync {
    /// Submit the root as a fixed 32-byte value; returns the transaction
    /// hash. A fresh nonce is fetched per submission by the signing layer.
    async fn submit_root(&self, root: [u8; 32]) -> Result<String, LedgerError>;

    /// Fetch the receipt for a submitted transaction. `None` while the
    /// transaction is still pending.
    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<LedgerReceipt>, LedgerError>;

    /// Current chain head height.
    async fn current_block(&self) -> Result<u64, LedgerError>;
}

/// 4-byte function selector for `anchorMerkleRoot(bytes32)`.
const ANCHOR_ROOT_SELECTOR: &str = "76972d8e";

/// Configuration for the EVM JSON-RPC ledger client.
#[derive(Debug, Clone)]
pub struct JsonRpcLedgerConfig {
    /// JSON-RPC endpoint URL (HTTPS in production).
    pub rpc_url: String,
    /// Anchor contract address (0x-prefixed, 40 hex chars).
    pub contract_address: String,
    /// Sender address whose transactions the RPC provider signs.
    pub from_address: String,
    /// EVM chain id.
    pub chain_id: u64,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// EVM JSON-RPC ledger client.
#[derive(Debug)]
pub struct JsonRpcLedger {
    client: reqwest::Client,
    config: JsonRpcLedgerConfig,
}

impl JsonRpcLedger {
    pub fn new(config: JsonRpcLedgerConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        if !is_valid_eth_address(&config.contract_address) {
            return Err(LedgerError::Rejected(format!(
                "invalid contract address: {}",
                config.contract_address
            )));
        }
        if !is_valid_eth_address(&config.from_address) {
            return Err(LedgerError::Rejected(format!(
                "invalid from address: {}",
                config.from_address
            )));
        }

        Ok(Self { client, config })
    }

    /// Send a JSON-RPC request and return the `result` field.
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Unavailable("request timed out".into())
                } else {
                    LedgerError::Unavailable(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(LedgerError::Unavailable(format!("HTTP {}", resp.status())));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("invalid JSON response: {e}")))?;

        if let Some(error) = json.get("error") {
            let msg = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown RPC error");
            return Err(LedgerError::Rejected(msg.to_string()));
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| LedgerError::Unavailable("response missing 'result' field".into()))
    }

    /// ABI-encode the anchor call: 4-byte selector + 32-byte root.
    fn encode_calldata(root: &[u8; 32]) -> String {
        let mut data = String::with_capacity(2 + 8 + 64);
        data.push_str("0x");
        data.push_str(ANCHOR_ROOT_SELECTOR);
        for b in root {
            data.push_str(&format!("{b:02x}"));
        }
        data
    }
}

impl LedgerClient for JsonRpcLedger {
    async fn submit_root(&self, root: [u8; 32]) -> Result<String, LedgerError> {
        let tx = serde_json::json!({
            "from": self.config.from_address,
            "to": self.config.contract_address,
            "data": Self::encode_calldata(&root),
        });

        let result = self
            .rpc_call("eth_sendTransaction", serde_json::json!([tx]))
            .await?;

        result
            .as_str()
            .map(String::from)
            .ok_or_else(|| {
                LedgerError::Rejected("eth_sendTransaction returned non-string result".into())
            })
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<LedgerReceipt>, LedgerError> {
        let receipt = self
            .rpc_call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
            .await?;

        // Null receipt: still pending.
        if receipt.is_null() {
            return Ok(None);
        }

        let succeeded = receipt
            .get("status")
            .and_then(|s| s.as_str())
            .map(|s| s != "0x0")
            .unwrap_or(false);

        let block_number = receipt
            .get("blockNumber")
            .and_then(|b| b.as_str())
            .and_then(parse_hex_quantity)
            .unwrap_or(0);

        let block_hash = receipt
            .get("blockHash")
            .and_then(|b| b.as_str())
            .unwrap_or_default()
            .to_string();

        let gas_used = receipt
            .get("gasUsed")
            .and_then(|g| g.as_str())
            .and_then(parse_hex_quantity)
            .unwrap_or(0);

        Ok(Some(LedgerReceipt {
            block_number,
            block_hash,
            gas_used,
            succeeded,
        }))
    }

    async fn current_block(&self) -> Result<u64, LedgerError> {
        let result = self.rpc_call("eth_blockNumber", serde_json::json!([])).await?;
        result
            .as_str()
            .and_then(parse_hex_quantity)
            .ok_or_else(|| LedgerError::Unavailable("malformed eth_blockNumber result".into()))
    }
}

fn parse_hex_quantity(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Well-formed Ethereum address: 0x + 40 hex chars.
fn is_valid_eth_address(addr: &str) -> bool {
    addr.len() == 42
        && addr.starts_with("0x")
        && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
}
