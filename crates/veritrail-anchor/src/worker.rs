//! # Anchor Worker
//!
//! Drives the anchor lifecycle:
//!
//! ```text
//! PENDING --submit--> SUBMITTED --receipt--> CONFIRMED --12 confs--> FINALIZED
//!    ^                     |                      |
//!    |                     +-----fail-----+------+
//!    |                                    v
//!    +---------------- retry ---------- FAILED
//! ```
//!
//! Every transition is persisted before the worker moves on, so a crash
//! leaves an anchor in its last durable state and the next tick resumes
//! from there. Failures during submission or polling are swallowed into
//! the anchor row (`last_error`, `retry_count`, state `FAILED`) and also
//! returned to the immediate caller.
//!
//! A `SUBMITTED` anchor is never submitted again: if the receipt poll
//! budget elapses the anchor stays `SUBMITTED` and
//! [`AnchorWorker::resume_submitted`] picks it up on a later tick.
//!
//! ## Simulation Mode
//!
//! Without a ledger client the worker creates anchors directly in
//! `CONFIRMED` state with synthetic transaction and block values. This is
//! a dev/test mode only; simulated anchors are excluded from
//! finalization.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;
use veritrail_core::{AnchorRecord, AnchorStatus, AuditError, MerkleRoot, Settings};
use veritrail_store::AuditStore;

use crate::ledger::{LedgerClient, LedgerReceipt};

/// Anchor worker configuration, sliced from [`Settings`].
#[derive(Debug, Clone)]
pub struct AnchorConfig {
    pub chain_id: u64,
    pub network_name: String,
    /// Sleep between receipt polls.
    pub poll_interval: Duration,
    /// Total receipt poll budget per submission.
    pub wait_budget: Duration,
    /// Confirmations required for finalization.
    pub finality_confirmations: u64,
}

impl AnchorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chain_id: settings.chain_id,
            network_name: "ethereum".into(),
            poll_interval: Duration::from_secs(settings.anchor_poll_seconds),
            wait_budget: Duration::from_secs(settings.anchor_wait_seconds),
            finality_confirmations: 12,
        }
    }
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            network_name: "ethereum".into(),
            poll_interval: Duration::from_secs(5),
            wait_budget: Duration::from_secs(300),
            finality_confirmations: 12,
        }
    }
}

/// The anchoring state machine driver.
pub struct AnchorWorker<S, L> {
    store: Arc<S>,
    /// `None` puts the worker in simulation mode.
    ledger: Option<Arc<L>>,
    config: AnchorConfig,
}

impl<S: AuditStore, L: LedgerClient> AnchorWorker<S, L> {
    pub fn new(store: Arc<S>, ledger: Option<Arc<L>>, config: AnchorConfig) -> Self {
        Self {
            store,
            ledger,
            config,
        }
    }

    /// Anchor a Merkle root to the ledger.
    ///
    /// Creates the anchor row, submits, and waits (bounded) for the
    /// receipt. On success the root is marked anchored and every covered
    /// record gets the transaction hash stamped on it.
    pub async fn anchor_root(&self, root: &MerkleRoot) -> Result<AnchorRecord, AuditError> {
        if root.is_anchored {
            return Err(AuditError::Conflict(format!(
                "root {} is already anchored",
                root.root_hash
            )));
        }

        let Some(ledger) = self.ledger.clone() else {
            return self.simulate_anchor(root).await;
        };

        let mut anchor = AnchorRecord {
            id: Uuid::new_v4(),
            anchor_id: new_anchor_id(),
            root_id: Some(root.id),
            root_hash: root.root_hash.clone(),
            chain_id: self.config.chain_id,
            network_name: self.config.network_name.clone(),
            tx_hash: None,
            block_number: None,
            block_hash: None,
            gas_used: None,
            status: AnchorStatus::Pending,
            submitted_at: Utc::now(),
            confirmed_at: None,
            finalized_at: None,
            retry_count: 0,
            last_error: None,
        };
        self.store
            .insert_anchor(anchor.clone())
            .await
            .map_err(AuditError::from)?;

        self.submit_and_confirm(&mut anchor, &ledger).await?;
        Ok(anchor)
    }

    /// Poll every `SUBMITTED` anchor once and confirm those with
    /// receipts. Returns the number confirmed.
    pub async fn resume_submitted(&self) -> Result<u32, AuditError> {
        let Some(ledger) = self.ledger.clone() else {
            return Ok(0);
        };

        let submitted = self
            .store
            .list_anchors_by_status(AnchorStatus::Submitted)
            .await
            .map_err(AuditError::from)?;

        let mut confirmed = 0;
        for mut anchor in submitted {
            let Some(tx_hash) = anchor.tx_hash.clone() else {
                // Submission never completed; requeue through the retry path.
                self.record_failure(&mut anchor, "submitted anchor has no transaction hash")
                    .await;
                continue;
            };
            match ledger.transaction_receipt(&tx_hash).await {
                Ok(Some(receipt)) => {
                    if self.confirm(&mut anchor, receipt).await.is_ok() {
                        confirmed += 1;
                    }
                }
                Ok(None) => {
                    tracing::debug!(anchor = %anchor.anchor_id, tx = %tx_hash, "still pending");
                }
                Err(e) => {
                    self.record_failure(&mut anchor, &e.to_string()).await;
                }
            }
        }
        Ok(confirmed)
    }

    /// Re-drive every `FAILED` anchor through submission. Returns the
    /// number that reached `CONFIRMED`.
    pub async fn retry_failed(&self) -> Result<u32, AuditError> {
        let Some(ledger) = self.ledger.clone() else {
            return Ok(0);
        };

        let failed = self
            .store
            .list_anchors_by_status(AnchorStatus::Failed)
            .await
            .map_err(AuditError::from)?;

        let mut recovered = 0;
        for mut anchor in failed {
            anchor.status = AnchorStatus::Pending;
            anchor.tx_hash = None;
            if let Err(e) = self.store.update_anchor(&anchor).await {
                tracing::error!(anchor = %anchor.anchor_id, error = %e, "failed to requeue anchor");
                continue;
            }
            match self.submit_and_confirm(&mut anchor, &ledger).await {
                Ok(()) => recovered += 1,
                Err(e) => {
                    tracing::warn!(anchor = %anchor.anchor_id, error = %e, "retry did not confirm");
                }
            }
        }
        Ok(recovered)
    }

    /// Promote `CONFIRMED` anchors with enough confirmations to
    /// `FINALIZED`. Returns the number finalized.
    pub async fn finalize_pass(&self) -> Result<u32, AuditError> {
        let Some(ledger) = self.ledger.clone() else {
            return Ok(0);
        };

        let confirmed = self
            .store
            .list_anchors_by_status(AnchorStatus::Confirmed)
            .await
            .map_err(AuditError::from)?;
        if confirmed.is_empty() {
            return Ok(0);
        }

        let current_block = ledger.current_block().await.map_err(AuditError::from)?;

        let mut finalized = 0;
        for mut anchor in confirmed {
            if anchor.network_name == "simulated" {
                continue;
            }
            let Some(block_number) = anchor.block_number else {
                continue;
            };
            let confirmations = current_block.saturating_sub(block_number);
            if confirmations >= self.config.finality_confirmations {
                anchor.status = AnchorStatus::Finalized;
                anchor.finalized_at = Some(Utc::now());
                self.store
                    .update_anchor(&anchor)
                    .await
                    .map_err(AuditError::from)?;
                tracing::info!(
                    anchor = %anchor.anchor_id,
                    root = %anchor.root_hash,
                    confirmations,
                    "anchor finalized"
                );
                finalized += 1;
            }
        }
        Ok(finalized)
    }

    /// One maintenance tick: retry failures, resume submitted, finalize.
    pub async fn tick(&self) -> Result<(), AuditError> {
        self.retry_failed().await?;
        self.resume_submitted().await?;
        self.finalize_pass().await?;
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn simulate_anchor(&self, root: &MerkleRoot) -> Result<AnchorRecord, AuditError> {
        let now = Utc::now();
        let tx_hash = synthetic_hex32();
        let anchor = AnchorRecord {
            id: Uuid::new_v4(),
            anchor_id: new_anchor_id(),
            root_id: Some(root.id),
            root_hash: root.root_hash.clone(),
            chain_id: self.config.chain_id,
            network_name: "simulated".into(),
            tx_hash: Some(tx_hash.clone()),
            block_number: Some(1),
            block_hash: Some(synthetic_hex32()),
            gas_used: Some(21_000),
            status: AnchorStatus::Confirmed,
            submitted_at: now,
            confirmed_at: Some(now),
            finalized_at: None,
            retry_count: 0,
            last_error: None,
        };
        self.store
            .insert_anchor(anchor.clone())
            .await
            .map_err(AuditError::from)?;
        self.store
            .mark_root_anchored(root.id, anchor.id, now)
            .await
            .map_err(AuditError::from)?;
        self.store
            .set_anchor_tx(&root.root_hash, &tx_hash)
            .await
            .map_err(AuditError::from)?;
        tracing::debug!(root = %root.root_hash, tx = %tx_hash, "simulated anchor confirmed");
        Ok(anchor)
    }

    /// PENDING → SUBMITTED → (poll) → CONFIRMED, persisting each step.
    async fn submit_and_confirm(
        &self,
        anchor: &mut AnchorRecord,
        ledger: &Arc<L>,
    ) -> Result<(), AuditError> {
        let root_bytes = anchor.root_hash.to_bytes();

        let tx_hash = match ledger.submit_root(root_bytes).await {
            Ok(tx) => tx,
            Err(e) => {
                self.record_failure(anchor, &e.to_string()).await;
                return Err(e.into());
            }
        };

        anchor.status = AnchorStatus::Submitted;
        anchor.tx_hash = Some(tx_hash.clone());
        self.store
            .update_anchor(anchor)
            .await
            .map_err(AuditError::from)?;
        tracing::info!(anchor = %anchor.anchor_id, tx = %tx_hash, "anchor submitted");

        let deadline = tokio::time::Instant::now() + self.config.wait_budget;
        let receipt = loop {
            match ledger.transaction_receipt(&tx_hash).await {
                Ok(Some(receipt)) => break receipt,
                Ok(None) => {
                    if tokio::time::Instant::now() >= deadline {
                        // Stays SUBMITTED: a later tick resumes polling,
                        // never re-submits.
                        return Err(AuditError::Timeout(format!(
                            "transaction {tx_hash} not confirmed within {}s",
                            self.config.wait_budget.as_secs()
                        )));
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    self.record_failure(anchor, &e.to_string()).await;
                    return Err(e.into());
                }
            }
        };

        self.confirm(anchor, receipt).await
    }

    async fn confirm(
        &self,
        anchor: &mut AnchorRecord,
        receipt: LedgerReceipt,
    ) -> Result<(), AuditError> {
        if !receipt.succeeded {
            self.record_failure(anchor, "transaction reverted on chain")
                .await;
            return Err(AuditError::LedgerRejected(format!(
                "transaction {} reverted",
                anchor.tx_hash.as_deref().unwrap_or("<unknown>")
            )));
        }

        let now = Utc::now();
        anchor.status = AnchorStatus::Confirmed;
        anchor.block_number = Some(receipt.block_number);
        anchor.block_hash = Some(receipt.block_hash);
        anchor.gas_used = Some(receipt.gas_used);
        anchor.confirmed_at = Some(now);
        self.store
            .update_anchor(anchor)
            .await
            .map_err(AuditError::from)?;

        if let Some(root_id) = anchor.root_id {
            self.store
                .mark_root_anchored(root_id, anchor.id, now)
                .await
                .map_err(AuditError::from)?;
        }
        if let Some(tx_hash) = anchor.tx_hash.as_deref() {
            self.store
                .set_anchor_tx(&anchor.root_hash, tx_hash)
                .await
                .map_err(AuditError::from)?;
        }

        tracing::info!(
            anchor = %anchor.anchor_id,
            root = %anchor.root_hash,
            block = receipt.block_number,
            "anchor confirmed"
        );
        Ok(())
    }

    /// Persist a failure onto the anchor row. Errors here are logged, not
    /// propagated: the original failure is what the caller needs to see.
    async fn record_failure(&self, anchor: &mut AnchorRecord, detail: &str) {
        anchor.status = AnchorStatus::Failed;
        anchor.last_error = Some(detail.to_string());
        anchor.retry_count += 1;
        if let Err(e) = self.store.update_anchor(anchor).await {
            tracing::error!(
                anchor = %anchor.anchor_id,
                error = %e,
                "failed to persist anchor failure"
            );
        }
        tracing::warn!(anchor = %anchor.anchor_id, detail, "anchor failed");
    }
}

fn new_anchor_id() -> String {
    format!("anchor_{}", &Uuid::new_v4().simple().to_string()[..16])
}

/// Synthetic 0x-prefixed 32-byte hex value for simulation mode.
fn synthetic_hex32() -> String {
    format!(
        "0x{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}
