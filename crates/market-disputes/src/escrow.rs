//! # Escrow
//!
//! Funds held against a disputed job. The dispute flow talks to escrow only
//! through the [`EscrowGateway`] trait: a hold when the dispute is filed,
//! a release per agreed allocation when it is resolved, and a refund to the
//! payer when it is closed.
//!
//! [`EscrowLedger`] is the in-process implementation used by tests, the CLI
//! and single-node deployments.
//!
//! ## Security Invariant
//!
//! Every release and refund carries a caller-chosen `reference`. Settling
//! the same reference twice returns the stored receipt instead of moving
//! funds again, so a finalization retried after a partial failure can never
//! pay out twice. Allocations that exceed the held balance are rejected
//! before any funds move.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use market_core::{DisputeId, JobId, Money, UserId, ValidationError};

use crate::dispute::PartyRole;

// ── Errors ─────────────────────────────────────────────────────────────

/// Failure reported by the escrow collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    /// No funds are held for the dispute.
    #[error("no escrow account for dispute {0}")]
    AccountNotFound(String),

    /// Funds are already held for the dispute.
    #[error("escrow already held for dispute {0}")]
    AlreadyHeld(String),

    /// The account has already been fully released or refunded.
    #[error("escrow for dispute {dispute_id} is already {status}")]
    AlreadySettled {
        /// The dispute identifier.
        dispute_id: String,
        /// The account status.
        status: String,
    },

    /// The requested allocations exceed the held balance.
    #[error("escrow for dispute {dispute_id} holds {held}, requested {requested}")]
    InsufficientBalance {
        /// The dispute identifier.
        dispute_id: String,
        /// Amount requested across all allocations.
        requested: String,
        /// Amount currently held.
        held: String,
    },

    /// An amount was malformed or in the wrong currency.
    #[error("invalid escrow amount: {0}")]
    InvalidAmount(#[from] ValidationError),

    /// The payment provider could not be reached.
    #[error("escrow provider unavailable: {0}")]
    Unavailable(String),
}

// ── Status & Transactions ──────────────────────────────────────────────

/// The status of an escrow account.
///
/// Status machine: `Funded → [PartiallyReleased] → FullyReleased | Refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Funds are held.
    Funded,
    /// Some funds have been released; balance remains.
    PartiallyReleased,
    /// All funds have been released. Terminal.
    FullyReleased,
    /// The balance went back to the payer. Terminal.
    Refunded,
}

impl EscrowStatus {
    /// Whether no further funds can move.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FullyReleased | Self::Refunded)
    }

    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Funded => "funded",
            Self::PartiallyReleased => "partially_released",
            Self::FullyReleased => "fully_released",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of escrow transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Initial hold.
    Hold,
    /// Payout to one party.
    Release,
    /// Return of the balance to the payer.
    Refund,
}

/// A recorded escrow transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTransaction {
    /// Transaction type.
    pub transaction_type: TransactionType,
    /// Who received the funds; `None` for holds.
    pub recipient: Option<UserId>,
    /// Amount moved.
    pub amount: Money,
    /// Settlement reference the transaction belongs to.
    pub reference: String,
    /// When the transaction occurred.
    pub timestamp: DateTime<Utc>,
}

// ── Requests & Receipts ────────────────────────────────────────────────

/// Hold funds for a newly filed dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRequest {
    /// The dispute the funds are held for.
    pub dispute_id: DisputeId,
    /// The job the funds were paid against.
    pub job_id: JobId,
    /// Who paid the funds (the client).
    pub payer: UserId,
    /// Amount to hold.
    pub amount: Money,
    /// When the hold was requested.
    pub at: DateTime<Utc>,
}

/// One party's share of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// The receiving user.
    pub recipient: UserId,
    /// Which side the recipient is on.
    pub role: PartyRole,
    /// Amount to pay out.
    pub amount: Money,
}

/// Release held funds per the agreed allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    /// The dispute the funds are held for.
    pub dispute_id: DisputeId,
    /// The job the funds were paid against.
    pub job_id: JobId,
    /// Idempotency key for this settlement.
    pub reference: String,
    /// Who receives what.
    pub allocations: Vec<Allocation>,
    /// When the release was requested.
    pub at: DateTime<Utc>,
}

/// Return the remaining held balance to the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    /// The dispute the funds are held for.
    pub dispute_id: DisputeId,
    /// Idempotency key for this settlement.
    pub reference: String,
    /// When the refund was requested.
    pub at: DateTime<Utc>,
}

/// Confirmation of a completed release or refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReceipt {
    /// The dispute the funds were held for.
    pub dispute_id: DisputeId,
    /// The settlement reference.
    pub reference: String,
    /// What was paid to whom.
    pub transfers: Vec<EscrowTransaction>,
    /// Balance still held after the settlement.
    pub remaining: Money,
    /// Account status after the settlement.
    pub status: EscrowStatus,
}

/// The escrow/payment collaborator.
pub trait EscrowGateway: Send + Sync {
    /// Hold funds for a dispute.
    fn hold(&self, request: HoldRequest) -> Result<(), EscrowError>;

    /// Release held funds. Repeating a reference returns the original
    /// receipt without moving funds.
    fn release(&self, request: ReleaseRequest) -> Result<ReleaseReceipt, EscrowError>;

    /// Refund the remaining balance to the payer. Repeating a reference
    /// returns the original receipt.
    fn refund(&self, request: RefundRequest) -> Result<ReleaseReceipt, EscrowError>;
}

// ── Escrow Account ─────────────────────────────────────────────────────

/// Funds held for one dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAccount {
    /// The dispute the funds are held for.
    pub dispute_id: DisputeId,
    /// The job the funds were paid against.
    pub job_id: JobId,
    /// Who paid the funds.
    pub payer: UserId,
    /// Amount originally held.
    pub deposited: Money,
    /// Amount currently held.
    pub held: Money,
    /// Current status.
    pub status: EscrowStatus,
    /// Transaction history.
    pub transactions: Vec<EscrowTransaction>,
    /// When the funds were first held.
    pub created_at: DateTime<Utc>,
}

impl EscrowAccount {
    /// Open a funded account.
    pub fn fund(request: HoldRequest) -> Self {
        let hold = EscrowTransaction {
            transaction_type: TransactionType::Hold,
            recipient: None,
            amount: request.amount.clone(),
            reference: format!("hold:{}", request.dispute_id),
            timestamp: request.at,
        };
        Self {
            dispute_id: request.dispute_id,
            job_id: request.job_id,
            payer: request.payer,
            deposited: request.amount.clone(),
            held: request.amount,
            status: EscrowStatus::Funded,
            transactions: vec![hold],
            created_at: request.at,
        }
    }

    /// Pay out the given allocations. Zero allocations are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::AlreadySettled`] on a terminal account and
    /// [`EscrowError::InsufficientBalance`] when the allocations exceed the
    /// held balance. No funds move on error.
    pub fn release(
        &mut self,
        allocations: &[Allocation],
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<EscrowTransaction>, EscrowError> {
        self.require_open()?;
        let mut requested = Money::zero(self.held.currency())?;
        for allocation in allocations {
            requested = requested.checked_add(&allocation.amount)?;
        }
        let remaining = self.held.checked_sub(&requested).map_err(|e| match e {
            ValidationError::AmountOutOfRange => EscrowError::InsufficientBalance {
                dispute_id: self.dispute_id.to_string(),
                requested: requested.to_string(),
                held: self.held.to_string(),
            },
            other => EscrowError::InvalidAmount(other),
        })?;

        let transfers: Vec<EscrowTransaction> = allocations
            .iter()
            .filter(|a| !a.amount.is_zero())
            .map(|a| EscrowTransaction {
                transaction_type: TransactionType::Release,
                recipient: Some(a.recipient),
                amount: a.amount.clone(),
                reference: reference.to_string(),
                timestamp: at,
            })
            .collect();

        self.held = remaining;
        self.status = if self.held.is_zero() {
            EscrowStatus::FullyReleased
        } else {
            EscrowStatus::PartiallyReleased
        };
        self.transactions.extend(transfers.iter().cloned());
        Ok(transfers)
    }

    /// Return the remaining balance to the payer.
    pub fn refund(&mut self, reference: &str, at: DateTime<Utc>) -> Result<Vec<EscrowTransaction>, EscrowError> {
        self.require_open()?;
        let mut transfers = Vec::new();
        if !self.held.is_zero() {
            transfers.push(EscrowTransaction {
                transaction_type: TransactionType::Refund,
                recipient: Some(self.payer),
                amount: self.held.clone(),
                reference: reference.to_string(),
                timestamp: at,
            });
        }
        self.held = Money::zero(self.held.currency())?;
        self.status = EscrowStatus::Refunded;
        self.transactions.extend(transfers.iter().cloned());
        Ok(transfers)
    }

    fn require_open(&self) -> Result<(), EscrowError> {
        if self.status.is_terminal() {
            return Err(EscrowError::AlreadySettled {
                dispute_id: self.dispute_id.to_string(),
                status: self.status.as_str().to_string(),
            });
        }
        Ok(())
    }
}

// ── In-Process Ledger ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LedgerInner {
    accounts: HashMap<DisputeId, EscrowAccount>,
    receipts: HashMap<String, ReleaseReceipt>,
}

/// In-process escrow ledger. Cloning shares the underlying accounts.
#[derive(Debug, Clone, Default)]
pub struct EscrowLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

impl EscrowLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one account.
    pub fn account(&self, dispute_id: &DisputeId) -> Option<EscrowAccount> {
        self.inner.lock().accounts.get(dispute_id).cloned()
    }

    /// Snapshot of every account.
    pub fn accounts(&self) -> Vec<EscrowAccount> {
        self.inner.lock().accounts.values().cloned().collect()
    }

    /// Load an existing account, e.g. from a snapshot file.
    pub fn restore(&self, account: EscrowAccount) {
        self.inner.lock().accounts.insert(account.dispute_id, account);
    }

    fn settle(
        &self,
        dispute_id: DisputeId,
        reference: &str,
        apply: impl FnOnce(&mut EscrowAccount) -> Result<Vec<EscrowTransaction>, EscrowError>,
    ) -> Result<ReleaseReceipt, EscrowError> {
        let mut inner = self.inner.lock();
        if let Some(receipt) = inner.receipts.get(reference) {
            return Ok(receipt.clone());
        }
        let account = inner
            .accounts
            .get_mut(&dispute_id)
            .ok_or_else(|| EscrowError::AccountNotFound(dispute_id.to_string()))?;
        let transfers = apply(account)?;
        let receipt = ReleaseReceipt {
            dispute_id,
            reference: reference.to_string(),
            transfers,
            remaining: account.held.clone(),
            status: account.status,
        };
        inner
            .receipts
            .insert(reference.to_string(), receipt.clone());
        Ok(receipt)
    }
}

impl EscrowGateway for EscrowLedger {
    fn hold(&self, request: HoldRequest) -> Result<(), EscrowError> {
        let mut inner = self.inner.lock();
        if inner.accounts.contains_key(&request.dispute_id) {
            return Err(EscrowError::AlreadyHeld(request.dispute_id.to_string()));
        }
        tracing::debug!(
            dispute_id = %request.dispute_id,
            amount = %request.amount,
            "escrow hold"
        );
        inner
            .accounts
            .insert(request.dispute_id, EscrowAccount::fund(request));
        Ok(())
    }

    fn release(&self, request: ReleaseRequest) -> Result<ReleaseReceipt, EscrowError> {
        let receipt = self.settle(request.dispute_id, &request.reference, |account| {
            account.release(&request.allocations, &request.reference, request.at)
        })?;
        tracing::debug!(
            dispute_id = %receipt.dispute_id,
            reference = %receipt.reference,
            status = %receipt.status,
            "escrow release"
        );
        Ok(receipt)
    }

    fn refund(&self, request: RefundRequest) -> Result<ReleaseReceipt, EscrowError> {
        let receipt = self.settle(request.dispute_id, &request.reference, |account| {
            account.refund(&request.reference, request.at)
        })?;
        tracing::debug!(
            dispute_id = %receipt.dispute_id,
            reference = %receipt.reference,
            "escrow refund"
        );
        Ok(receipt)
    }
}
