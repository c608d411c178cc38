#![deny(missing_docs)]

//! # market-disputes: Dispute Escalation & Resolution
//!
//! The dispute workflow of the marketplace:
//!
//! - **Error** ([`error`]): Structured error hierarchy: authorization,
//!   precondition and external-dependency failures.
//!
//! - **Dispute** ([`dispute`]): The dispute record and its lifecycle. One
//!   [`Phase`] value drives both the workflow state and the stage.
//!
//! - **Escalation** ([`escalation`]): The evaluator deciding whether a
//!   dispute has stalled, with `now` passed in explicitly.
//!
//! - **Early Warnings** ([`early_warning`]): Heads-up records for disputes
//!   approaching escalation.
//!
//! - **Proposals** ([`proposal`]): Resolution terms and independent party
//!   answers.
//!
//! - **Escrow** ([`escrow`]): The escrow collaborator trait and an
//!   in-process ledger.
//!
//! - **Outbox** ([`outbox`]): Fire-and-forget notifications.
//!
//! - **Store** ([`store`]): The record store trait and an in-process store.
//!
//! - **Service** ([`service`]): The operations, wired over store, escrow
//!   and outbox.
//!
//! - **Analytics** ([`analytics`]): Admin KPIs.

pub mod analytics;
pub mod dispute;
pub mod early_warning;
pub mod error;
pub mod escalation;
pub mod escrow;
pub mod outbox;
pub mod proposal;
pub mod service;
pub mod store;

// Re-export primary types for ergonomic imports.

// Error types
pub use error::{DisputeError, StoreError};

// Dispute lifecycle
pub use dispute::{
    Actor, Dispute, EscalationEntry, EscalationLevel, EscalationOutcome, FilingRequest, PartyRole,
    Phase, Resolution, ResolutionKind, Stage, TimelineEntry, TimelineEvent, WorkflowState,
};

// Escalation
pub use early_warning::{EarlyWarning, EarlyWarningKind};
pub use escalation::{evaluate, EscalationCheck, EscalationPolicy, EscalationReason, RunReport};

// Resolution
pub use proposal::{Decision, PartyDecision, Proposal, ProposalStatus, Proposer, ResolutionTerms};
pub use service::{DisputeService, ForcedDecision, ProposalOpened, ProposalResponse};

// Collaborators
pub use escrow::{
    Allocation, EscrowAccount, EscrowError, EscrowGateway, EscrowLedger, EscrowStatus,
    HoldRequest, RefundRequest, ReleaseReceipt, ReleaseRequest,
};
pub use outbox::{MemoryOutbox, Notification, Outbox, OutboxError, Priority};
pub use store::{DisputeStore, MemoryStore};

// Analytics
pub use analytics::DisputeAnalytics;
