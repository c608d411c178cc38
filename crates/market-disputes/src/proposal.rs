//! # Resolution Proposals
//!
//! Terms put forward to settle a dispute. Client and professional answer
//! independently; each answer touches only that party's field, so the two
//! can respond concurrently. A proposal's status is derived from the two
//! answers rather than stored:
//!
//! | client     | professional | status     |
//! |------------|--------------|------------|
//! | accepted   | accepted     | `accepted` |
//! | rejected   | any          | `rejected` |
//! | any        | rejected     | `rejected` |
//! | otherwise  |              | `open`     |
//!
//! A newer proposal on the same dispute marks the older open one
//! `superseded`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use market_core::{DisputeId, Money, ProposalId, UserId, ValidationError};

use crate::dispute::{Dispute, PartyRole};
use crate::error::DisputeError;
use crate::escrow::Allocation;

/// Who put the terms forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proposer {
    /// The client.
    Client,
    /// The professional.
    Professional,
    /// Platform staff.
    Platform,
}

impl Proposer {
    /// Return the string representation of this proposer.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Professional => "professional",
            Self::Platform => "platform",
        }
    }
}

impl From<PartyRole> for Proposer {
    fn from(role: PartyRole) -> Self {
        match role {
            PartyRole::Client => Self::Client,
            PartyRole::Professional => Self::Professional,
        }
    }
}

/// One party's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyDecision {
    /// Not answered yet.
    Pending,
    /// Accepted the terms.
    Accepted,
    /// Rejected the terms.
    Rejected,
}

impl PartyDecision {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// An answer a party may submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Accept the terms.
    Accept,
    /// Reject the terms.
    Reject,
}

impl From<Decision> for PartyDecision {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Accept => Self::Accepted,
            Decision::Reject => Self::Rejected,
        }
    }
}

/// Derived proposal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Waiting on at least one party.
    Open,
    /// Both parties accepted.
    Accepted,
    /// At least one party rejected.
    Rejected,
    /// Replaced by a newer proposal.
    Superseded,
}

impl ProposalStatus {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Superseded => "superseded",
        }
    }
}

/// The settlement on offer.
///
/// When funds are held, the shares say how they are split. Supplying one
/// share assigns the remainder to the other side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionTerms {
    /// The terms in prose.
    pub summary: String,
    /// Amount paid to the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_share: Option<Money>,
    /// Amount paid to the professional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub professional_share: Option<Money>,
}

impl ResolutionTerms {
    /// Prose-only terms.
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            client_share: None,
            professional_share: None,
        }
    }

    /// Check the terms against the funds held for the dispute and fill in a
    /// missing share with the remainder.
    ///
    /// # Errors
    ///
    /// Returns [`DisputeError::InvalidTerms`] when shares are given without
    /// held funds, are missing while funds are held, or do not add up to
    /// the held amount.
    pub fn normalize(mut self, held: Option<&Money>) -> Result<Self, DisputeError> {
        if self.summary.trim().is_empty() {
            return Err(ValidationError::EmptyField("summary").into());
        }
        let held = match held.filter(|m| !m.is_zero()) {
            Some(held) => held,
            None => {
                if self.client_share.is_some() || self.professional_share.is_some() {
                    return Err(DisputeError::InvalidTerms(
                        "no funds are held for this dispute".to_string(),
                    ));
                }
                return Ok(self);
            }
        };

        let (client, professional) = match (self.client_share.take(), self.professional_share.take()) {
            (None, None) => {
                return Err(DisputeError::InvalidTerms(format!(
                    "terms must say how the held {held} is split"
                )))
            }
            (Some(c), None) => {
                let p = held.checked_sub(&c).map_err(|e| remainder_error(e, held))?;
                (c, p)
            }
            (None, Some(p)) => {
                let c = held.checked_sub(&p).map_err(|e| remainder_error(e, held))?;
                (c, p)
            }
            (Some(c), Some(p)) => (c, p),
        };
        let total = client.checked_add(&professional)?;
        if total != *held {
            return Err(DisputeError::InvalidTerms(format!(
                "shares total {total} but {held} is held"
            )));
        }
        self.client_share = Some(client);
        self.professional_share = Some(professional);
        Ok(self)
    }

    /// The escrow payouts these terms call for.
    pub fn allocations(&self, dispute: &Dispute) -> Vec<Allocation> {
        let shares = [
            (PartyRole::Client, &self.client_share),
            (PartyRole::Professional, &self.professional_share),
        ];
        shares
            .into_iter()
            .filter_map(|(role, share)| {
                share.as_ref().map(|amount| Allocation {
                    recipient: dispute.party_id(role),
                    role,
                    amount: amount.clone(),
                })
            })
            .collect()
    }
}

fn remainder_error(err: ValidationError, held: &Money) -> DisputeError {
    match err {
        ValidationError::AmountOutOfRange => {
            DisputeError::InvalidTerms(format!("share exceeds the held {held}"))
        }
        other => other.into(),
    }
}

/// A resolution proposal attached to a dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique proposal identifier.
    pub id: ProposalId,
    /// The parent dispute.
    pub dispute_id: DisputeId,
    /// Who put the terms forward.
    pub proposed_by: Proposer,
    /// The proposing user, if a user proposed.
    pub proposer_id: Option<UserId>,
    /// The settlement on offer.
    pub terms: ResolutionTerms,
    /// The client's answer.
    pub client_decision: PartyDecision,
    /// The professional's answer.
    pub professional_decision: PartyDecision,
    /// When the proposal was made.
    pub created_at: DateTime<Utc>,
    /// When the last answer was recorded.
    pub responded_at: Option<DateTime<Utc>>,
    /// When a newer proposal replaced this one.
    pub superseded_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Create a proposal against an active dispute. Both answers start
    /// `pending`.
    pub fn new(
        dispute: &Dispute,
        proposed_by: Proposer,
        proposer_id: Option<UserId>,
        terms: ResolutionTerms,
        now: DateTime<Utc>,
    ) -> Result<Self, DisputeError> {
        dispute.require_active()?;
        let terms = terms.normalize(dispute.disputed_amount.as_ref())?;
        Ok(Self {
            id: ProposalId::new(),
            dispute_id: dispute.id,
            proposed_by,
            proposer_id,
            terms,
            client_decision: PartyDecision::Pending,
            professional_decision: PartyDecision::Pending,
            created_at: now,
            responded_at: None,
            superseded_at: None,
        })
    }

    /// Derived status.
    pub fn status(&self) -> ProposalStatus {
        if self.superseded_at.is_some() {
            ProposalStatus::Superseded
        } else if self.client_decision == PartyDecision::Rejected
            || self.professional_decision == PartyDecision::Rejected
        {
            ProposalStatus::Rejected
        } else if self.is_mutually_accepted() {
            ProposalStatus::Accepted
        } else {
            ProposalStatus::Open
        }
    }

    /// Whether both parties accepted.
    pub fn is_mutually_accepted(&self) -> bool {
        self.client_decision == PartyDecision::Accepted
            && self.professional_decision == PartyDecision::Accepted
    }

    /// One party's answer.
    pub fn decision(&self, role: PartyRole) -> PartyDecision {
        match role {
            PartyRole::Client => self.client_decision,
            PartyRole::Professional => self.professional_decision,
        }
    }

    /// Record one party's answer.
    ///
    /// Returns `Ok(false)` when the same answer is already on record, which
    /// lets a caller retry a finalization that failed after the answer was
    /// stored.
    ///
    /// # Errors
    ///
    /// [`DisputeError::DecisionAlreadyRecorded`] when the party already
    /// answered differently; [`DisputeError::ProposalClosed`] when the
    /// proposal is no longer open.
    pub fn record(&mut self, role: PartyRole, decision: Decision, now: DateTime<Utc>) -> Result<bool, DisputeError> {
        let current = self.decision(role);
        let wanted = PartyDecision::from(decision);
        if current == wanted {
            return Ok(false);
        }
        let status = self.status();
        if status != ProposalStatus::Open {
            return Err(DisputeError::ProposalClosed {
                proposal_id: self.id.to_string(),
                status: status.as_str().to_string(),
            });
        }
        if current != PartyDecision::Pending {
            return Err(DisputeError::DecisionAlreadyRecorded {
                proposal_id: self.id.to_string(),
                party: role.as_str().to_string(),
                decision: current.as_str().to_string(),
            });
        }
        match role {
            PartyRole::Client => self.client_decision = wanted,
            PartyRole::Professional => self.professional_decision = wanted,
        }
        self.responded_at = Some(now);
        Ok(true)
    }

    /// Mark the proposal replaced. No-op unless it is open.
    pub fn supersede(&mut self, now: DateTime<Utc>) -> bool {
        if self.status() != ProposalStatus::Open {
            return false;
        }
        self.superseded_at = Some(now);
        true
    }

    /// The escrow payouts these terms call for.
    pub fn allocations(&self, dispute: &Dispute) -> Vec<Allocation> {
        self.terms.allocations(dispute)
    }
}
