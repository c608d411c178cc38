//! # Dispute Record Store
//!
//! [`DisputeStore`] is the seam between the dispute flow and whatever holds
//! the records. Every mutation goes through a read-validate-update closure
//! that runs against a copy of the record; the copy replaces the stored
//! record only when the closure returns `Ok`, so a rejected operation never
//! leaves a half-applied change behind.
//!
//! [`MemoryStore`] keeps everything in process behind `parking_lot` locks.
//! Locks are never held across an `.await`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use market_core::{DisputeId, EarlyWarningId, ProposalId};

use crate::dispute::{Dispute, EscalationOutcome};
use crate::early_warning::EarlyWarning;
use crate::error::{DisputeError, StoreError};
use crate::escalation::EscalationReason;
use crate::proposal::Proposal;

/// Record storage used by [`DisputeService`](crate::service::DisputeService).
pub trait DisputeStore: Send + Sync {
    /// Store a new dispute, assigning its sequential `number`.
    fn insert_dispute(&self, dispute: Dispute) -> Result<Dispute, DisputeError>;

    /// Fetch one dispute.
    fn get_dispute(&self, id: &DisputeId) -> Result<Option<Dispute>, DisputeError>;

    /// Every dispute, ordered by number.
    fn list_disputes(&self) -> Result<Vec<Dispute>, DisputeError>;

    /// Atomically read-validate-update one dispute.
    ///
    /// # Errors
    ///
    /// [`DisputeError::DisputeNotFound`] if absent, otherwise whatever the
    /// closure returns. Nothing is written on error.
    fn update_dispute<R>(
        &self,
        id: &DisputeId,
        f: impl FnOnce(&mut Dispute) -> Result<R, DisputeError>,
    ) -> Result<(Dispute, R), DisputeError>;

    /// Apply an escalation: append `reasons` and raise the level unless it
    /// moved within `cooldown`. Safe to apply repeatedly for the same stall.
    fn escalate(
        &self,
        id: &DisputeId,
        reasons: &[EscalationReason],
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<EscalationOutcome, DisputeError> {
        self.update_dispute(id, |d| d.escalate(reasons, now, cooldown))
            .map(|(_, outcome)| outcome)
    }

    /// Store a new proposal, superseding every open proposal on the same
    /// dispute in the same operation. Returns the superseded records.
    fn insert_proposal(&self, proposal: Proposal) -> Result<Vec<Proposal>, DisputeError>;

    /// Fetch one proposal.
    fn get_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, DisputeError>;

    /// Proposals on one dispute, oldest first.
    fn proposals_for(&self, dispute_id: &DisputeId) -> Result<Vec<Proposal>, DisputeError>;

    /// Atomically read-validate-update one proposal.
    fn update_proposal<R>(
        &self,
        id: &ProposalId,
        f: impl FnOnce(&mut Proposal) -> Result<R, DisputeError>,
    ) -> Result<(Proposal, R), DisputeError>;

    /// Every early-warning record, active and cleared.
    fn early_warnings(&self) -> Result<Vec<EarlyWarning>, DisputeError>;

    /// Insert or replace an early-warning record.
    fn upsert_early_warning(&self, warning: EarlyWarning) -> Result<(), DisputeError>;
}

// -- Generic In-Memory Table --------------------------------------------------

/// Thread-safe, cloneable in-memory table.
#[derive(Debug)]
pub struct Table<K, T> {
    data: Arc<RwLock<HashMap<K, T>>>,
}

impl<K, T> Clone for Table<K, T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<K: Eq + Hash, T: Clone> Table<K, T> {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, key: K, value: T) -> Option<T> {
        self.data.write().insert(key, value)
    }

    /// Retrieve a record.
    pub fn get(&self, key: &K) -> Option<T> {
        self.data.read().get(key).cloned()
    }

    /// All records, in no particular order.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Run `f` against a copy of the record under the write lock, keeping
    /// the copy only if `f` succeeds. `None` if the key is absent.
    pub fn try_update<R, E>(
        &self,
        key: &K,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<(T, R), E>> {
        let mut guard = self.data.write();
        let entry = guard.get_mut(key)?;
        let mut draft = entry.clone();
        Some(f(&mut draft).map(|r| {
            *entry = draft.clone();
            (draft, r)
        }))
    }

    /// Run `f` with exclusive access to the whole table.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut HashMap<K, T>) -> R) -> R {
        f(&mut self.data.write())
    }
}

impl<K: Eq + Hash, T: Clone> Default for Table<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- In-Memory Store ----------------------------------------------------------

/// In-process [`DisputeStore`]. Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    disputes: Table<DisputeId, Dispute>,
    proposals: Table<ProposalId, Proposal>,
    warnings: Table<EarlyWarningId, EarlyWarning>,
    last_number: Arc<AtomicU64>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an existing dispute without renumbering it.
    pub fn restore_dispute(&self, dispute: Dispute) {
        self.last_number.fetch_max(dispute.number, Ordering::SeqCst);
        self.disputes.insert(dispute.id, dispute);
    }

    /// Load an existing proposal.
    pub fn restore_proposal(&self, proposal: Proposal) {
        self.proposals.insert(proposal.id, proposal);
    }

    /// Load an existing early-warning record.
    pub fn restore_early_warning(&self, warning: EarlyWarning) {
        self.warnings.insert(warning.id, warning);
    }
}

impl DisputeStore for MemoryStore {
    fn insert_dispute(&self, mut dispute: Dispute) -> Result<Dispute, DisputeError> {
        if self.disputes.get(&dispute.id).is_some() {
            return Err(StoreError::Conflict(format!("dispute {} already exists", dispute.id)).into());
        }
        dispute.number = self.last_number.fetch_add(1, Ordering::SeqCst) + 1;
        self.disputes.insert(dispute.id, dispute.clone());
        Ok(dispute)
    }

    fn get_dispute(&self, id: &DisputeId) -> Result<Option<Dispute>, DisputeError> {
        Ok(self.disputes.get(id))
    }

    fn list_disputes(&self) -> Result<Vec<Dispute>, DisputeError> {
        let mut all = self.disputes.list();
        all.sort_by_key(|d| d.number);
        Ok(all)
    }

    fn update_dispute<R>(
        &self,
        id: &DisputeId,
        f: impl FnOnce(&mut Dispute) -> Result<R, DisputeError>,
    ) -> Result<(Dispute, R), DisputeError> {
        self.disputes
            .try_update(id, f)
            .unwrap_or_else(|| Err(DisputeError::DisputeNotFound(id.to_string())))
    }

    fn insert_proposal(&self, proposal: Proposal) -> Result<Vec<Proposal>, DisputeError> {
        let now = proposal.created_at;
        self.proposals.with_write(|table| {
            if table.contains_key(&proposal.id) {
                return Err(DisputeError::from(StoreError::Conflict(format!(
                    "proposal {} already exists",
                    proposal.id
                ))));
            }
            let mut superseded = Vec::new();
            for existing in table.values_mut() {
                if existing.dispute_id == proposal.dispute_id && existing.supersede(now) {
                    superseded.push(existing.clone());
                }
            }
            table.insert(proposal.id, proposal);
            Ok(superseded)
        })
    }

    fn get_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, DisputeError> {
        Ok(self.proposals.get(id))
    }

    fn proposals_for(&self, dispute_id: &DisputeId) -> Result<Vec<Proposal>, DisputeError> {
        let mut found: Vec<Proposal> = self
            .proposals
            .list()
            .into_iter()
            .filter(|p| p.dispute_id == *dispute_id)
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }

    fn update_proposal<R>(
        &self,
        id: &ProposalId,
        f: impl FnOnce(&mut Proposal) -> Result<R, DisputeError>,
    ) -> Result<(Proposal, R), DisputeError> {
        self.proposals
            .try_update(id, f)
            .unwrap_or_else(|| Err(DisputeError::ProposalNotFound(id.to_string())))
    }

    fn early_warnings(&self) -> Result<Vec<EarlyWarning>, DisputeError> {
        let mut all = self.warnings.list();
        all.sort_by_key(|w| w.raised_at);
        Ok(all)
    }

    fn upsert_early_warning(&self, warning: EarlyWarning) -> Result<(), DisputeError> {
        self.warnings.insert(warning.id, warning);
        Ok(())
    }
}
