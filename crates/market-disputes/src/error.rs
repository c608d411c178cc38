//! # Dispute Error Types
//!
//! Structured error hierarchy for the dispute subsystem. Variants fall into
//! three groups that callers treat differently:
//!
//! - **Authorization**: [`NotAParty`](DisputeError::NotAParty),
//!   [`Forbidden`](DisputeError::Forbidden).
//! - **Precondition**: transitions that are not valid from the current
//!   state, closed proposals, missing records.
//! - **External dependency**: escrow and store failures.
//!
//! State machine rejections carry the current state, the attempted target
//! and the reason.

use thiserror::Error;

use crate::escrow::EscrowError;
use crate::outbox::OutboxError;

/// Failure reported by a dispute store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write collided with an existing record.
    #[error("store conflict: {0}")]
    Conflict(String),
}

/// Errors arising from dispute operations.
#[derive(Error, Debug)]
pub enum DisputeError {
    /// The caller is neither the client nor the professional on the dispute.
    #[error("user {user_id} is not a party to dispute {dispute_id}")]
    NotAParty {
        /// The dispute identifier.
        dispute_id: String,
        /// The caller's user identifier.
        user_id: String,
    },

    /// The caller's role does not permit the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Attempted transition is not valid from the current phase.
    #[error("invalid dispute transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// The current phase name.
        from: String,
        /// The attempted target phase name.
        to: String,
        /// Human-readable reason for the rejection.
        reason: String,
    },

    /// The dispute is resolved or closed and accepts no further mutation.
    #[error("dispute {dispute_id} is in terminal state {state}")]
    TerminalState {
        /// The dispute identifier.
        dispute_id: String,
        /// The terminal workflow state.
        state: String,
    },

    /// The proposal is no longer open for responses.
    #[error("proposal {proposal_id} is {status} and accepts no further responses")]
    ProposalClosed {
        /// The proposal identifier.
        proposal_id: String,
        /// The proposal's current status.
        status: String,
    },

    /// The party already answered the proposal differently.
    #[error("{party} already {decision} proposal {proposal_id}")]
    DecisionAlreadyRecorded {
        /// The proposal identifier.
        proposal_id: String,
        /// The responding party.
        party: String,
        /// The decision already on record.
        decision: String,
    },

    /// No dispute with the given identifier exists.
    #[error("dispute {0} not found")]
    DisputeNotFound(String),

    /// No proposal with the given identifier exists.
    #[error("proposal {0} not found")]
    ProposalNotFound(String),

    /// Input failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] market_core::ValidationError),

    /// A dispute filing is malformed (e.g. the same user on both sides).
    #[error("invalid filing: {0}")]
    InvalidFiling(String),

    /// Proposed settlement terms are inconsistent with the held funds.
    #[error("invalid resolution terms: {0}")]
    InvalidTerms(String),

    /// The escrow collaborator rejected or failed the request.
    #[error("escrow error: {0}")]
    Escrow(#[from] EscrowError),

    /// The store backend failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The notification outbox rejected a message.
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),
}

impl DisputeError {
    /// Whether this error came from an external collaborator rather than
    /// the caller's request.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::Escrow(_) | Self::Store(_) | Self::Outbox(_))
    }
}
