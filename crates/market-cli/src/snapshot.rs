//! # Store Snapshots
//!
//! A snapshot is a JSON document holding the records the escalation
//! evaluator reads and writes:
//!
//! ```json
//! {
//!   "disputes": [ ... ],
//!   "proposals": [ ... ],
//!   "early_warnings": [ ... ],
//!   "escrow_accounts": [ ... ]
//! }
//! ```
//!
//! Only `disputes` is required. Records use the same serde shape the API
//! stores in its `record` columns, so an export of those columns loads
//! directly.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use market_disputes::{
    Dispute, DisputeService, DisputeStore, EarlyWarning, EscrowAccount, EscrowLedger, MemoryOutbox,
    MemoryStore, Proposal,
};

/// The service the CLI drives: in-memory store, ledger and outbox seeded
/// from a snapshot.
pub type SnapshotService = DisputeService<MemoryStore, EscrowLedger, MemoryOutbox>;

/// Records loaded from or written to a snapshot file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub disputes: Vec<Dispute>,
    #[serde(default)]
    pub proposals: Vec<Proposal>,
    #[serde(default)]
    pub early_warnings: Vec<EarlyWarning>,
    #[serde(default)]
    pub escrow_accounts: Vec<EscrowAccount>,
}

impl Snapshot {
    /// Read and validate a snapshot file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("snapshot not found: {}", path.display());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot: {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse snapshot: {}", path.display()))?;

        for dispute in &snapshot.disputes {
            if let Err(reason) = dispute.check_invariants() {
                bail!("dispute {} in {} is inconsistent: {reason}", dispute.id, path.display());
            }
        }
        tracing::debug!(
            path = %path.display(),
            disputes = snapshot.disputes.len(),
            proposals = snapshot.proposals.len(),
            early_warnings = snapshot.early_warnings.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Write the snapshot as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize snapshot")?;
        std::fs::write(path, json + "\n")
            .with_context(|| format!("failed to write snapshot: {}", path.display()))?;
        tracing::info!(path = %path.display(), "snapshot written");
        Ok(())
    }

    /// Seed an in-memory service with the snapshot's records.
    pub fn into_service(self) -> SnapshotService {
        let store = MemoryStore::new();
        for dispute in self.disputes {
            store.restore_dispute(dispute);
        }
        for proposal in self.proposals {
            store.restore_proposal(proposal);
        }
        for warning in self.early_warnings {
            store.restore_early_warning(warning);
        }
        let ledger = EscrowLedger::new();
        for account in self.escrow_accounts {
            ledger.restore(account);
        }
        DisputeService::new(store, ledger, MemoryOutbox::default())
    }

    /// Capture the service's current records. Proposals are carried over
    /// from `previous` since nothing the CLI runs touches them.
    pub fn capture(service: &SnapshotService, previous: Vec<Proposal>) -> Result<Self> {
        let mut early_warnings = service.store().early_warnings()?;
        early_warnings.sort_by_key(|w| w.raised_at);
        let mut escrow_accounts = service.escrow().accounts();
        escrow_accounts.sort_by_key(|a| a.created_at);
        Ok(Self {
            disputes: service.list_disputes()?,
            proposals: previous,
            early_warnings,
            escrow_accounts,
        })
    }
}
