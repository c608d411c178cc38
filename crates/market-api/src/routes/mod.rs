//! # API Route Modules
//!
//! - `disputes`: filing, evidence, responses, review, deadlines, closure.
//! - `proposals`: resolution proposals and party answers.
//! - `admin`: forced resolution, escalation runs, KPIs and early warnings.
//! - `notifications`: per-recipient view of the notification outbox.
//!
//! Shared response bodies live here so every module renders a dispute the
//! same way.

pub mod admin;
pub mod disputes;
pub mod notifications;
pub mod proposals;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use market_core::Money;
use market_disputes::{Dispute, EarlyWarning, Proposal, ResolutionKind};

use crate::error::AppError;

/// A monetary amount on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MoneyBody {
    /// Decimal amount, e.g. `"150.00"`.
    pub amount: String,
    /// ISO 4217 currency code.
    pub currency: String,
}

impl MoneyBody {
    fn parse(&self) -> Result<Money, AppError> {
        Ok(Money::new(&self.amount, &self.currency)?)
    }

    fn parse_opt(body: Option<&Self>) -> Result<Option<Money>, AppError> {
        body.map(Self::parse).transpose()
    }
}

impl From<&Money> for MoneyBody {
    fn from(money: &Money) -> Self {
        Self {
            amount: money.amount_string(),
            currency: money.currency().to_string(),
        }
    }
}

/// Pagination parameters for list endpoints.
#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct PaginationParams {
    /// Maximum number of items to return (default: 100, max: 1000).
    pub limit: Option<usize>,
    /// Number of items to skip (default: 0).
    pub offset: Option<usize>,
}

impl PaginationParams {
    const DEFAULT_LIMIT: usize = 100;
    const MAX_LIMIT: usize = 1000;

    fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        let limit = self.limit.unwrap_or(Self::DEFAULT_LIMIT).min(Self::MAX_LIMIT);
        let offset = self.offset.unwrap_or(0);
        items.into_iter().skip(offset).take(limit).collect()
    }
}

/// How a dispute was resolved.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResolutionBody {
    /// `mutual` or `admin_forced`.
    pub kind: String,
    /// The accepted proposal, for mutual resolutions.
    pub proposal_id: Option<Uuid>,
    /// The deciding administrator, for forced resolutions.
    pub admin_id: Option<Uuid>,
    /// The decision in prose.
    pub summary: String,
}

/// Dispute as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DisputeResponse {
    pub id: Uuid,
    pub number: u64,
    pub job_id: Uuid,
    pub client_id: Uuid,
    pub professional_id: Uuid,
    /// `client` or `professional`.
    pub filed_by: String,
    pub category: String,
    pub title: String,
    pub description: String,
    /// `open`, `in_progress`, `resolved` or `closed`.
    pub workflow_state: String,
    /// Stage number, 1 to 5.
    pub stage: u8,
    pub stage_label: String,
    /// Escalation level, 0 to 3.
    pub escalation_level: u8,
    /// Escalation audit entries, oldest first.
    pub escalation_reasons: Vec<serde_json::Value>,
    pub last_escalated_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub response_deadline: Option<DateTime<Utc>>,
    pub escrow_frozen: bool,
    pub disputed_amount: Option<MoneyBody>,
    pub resolution: Option<ResolutionBody>,
    pub closure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Append-only event history.
    pub timeline: Vec<serde_json::Value>,
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Internal(format!("response serialization failed: {e}")))
}

pub(crate) fn dispute_to_response(d: &Dispute) -> Result<DisputeResponse, AppError> {
    let resolution = d.resolution.as_ref().map(|r| {
        let (kind, proposal_id, admin_id) = match r.kind {
            ResolutionKind::Mutual { proposal_id } => ("mutual", Some(*proposal_id.as_uuid()), None),
            ResolutionKind::AdminForced { admin_id } => ("admin_forced", None, Some(*admin_id.as_uuid())),
        };
        ResolutionBody {
            kind: kind.to_string(),
            proposal_id,
            admin_id,
            summary: r.summary.clone(),
        }
    });

    Ok(DisputeResponse {
        id: *d.id.as_uuid(),
        number: d.number,
        job_id: *d.job_id.as_uuid(),
        client_id: *d.client_id.as_uuid(),
        professional_id: *d.professional_id.as_uuid(),
        filed_by: d.filed_by.as_str().to_string(),
        category: d.category.clone(),
        title: d.title.clone(),
        description: d.description.clone(),
        workflow_state: d.workflow_state().as_str().to_string(),
        stage: d.stage().number(),
        stage_label: d.stage().label().to_string(),
        escalation_level: d.escalation_level.value(),
        escalation_reasons: d.escalation_reasons.iter().map(to_json).collect::<Result<_, _>>()?,
        last_escalated_at: d.last_escalated_at,
        last_activity_at: d.last_activity_at,
        response_deadline: d.response_deadline,
        escrow_frozen: d.escrow_frozen,
        disputed_amount: d.disputed_amount.as_ref().map(MoneyBody::from),
        resolution,
        closure_reason: d.closure_reason.clone(),
        created_at: d.created_at,
        resolved_at: d.resolved_at(),
        timeline: d.timeline.iter().map(to_json).collect::<Result<_, _>>()?,
    })
}

/// Resolution proposal as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProposalBody {
    pub id: Uuid,
    pub dispute_id: Uuid,
    /// `client`, `professional` or `platform`.
    pub proposed_by: String,
    pub proposer_id: Option<Uuid>,
    pub summary: String,
    pub client_share: Option<MoneyBody>,
    pub professional_share: Option<MoneyBody>,
    /// `pending`, `accepted` or `rejected`.
    pub client_decision: String,
    pub professional_decision: String,
    /// `open`, `accepted`, `rejected` or `superseded`.
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

pub(crate) fn proposal_to_body(p: &Proposal) -> ProposalBody {
    ProposalBody {
        id: *p.id.as_uuid(),
        dispute_id: *p.dispute_id.as_uuid(),
        proposed_by: p.proposed_by.as_str().to_string(),
        proposer_id: p.proposer_id.map(|u| *u.as_uuid()),
        summary: p.terms.summary.clone(),
        client_share: p.terms.client_share.as_ref().map(MoneyBody::from),
        professional_share: p.terms.professional_share.as_ref().map(MoneyBody::from),
        client_decision: p.client_decision.as_str().to_string(),
        professional_decision: p.professional_decision.as_str().to_string(),
        status: p.status().as_str().to_string(),
        created_at: p.created_at,
        responded_at: p.responded_at,
    }
}

/// Early warning as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EarlyWarningBody {
    pub id: Uuid,
    pub dispute_id: Uuid,
    /// `inactivity` or `deadline_approaching`.
    pub kind: String,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
}

pub(crate) fn warning_to_body(w: &EarlyWarning) -> EarlyWarningBody {
    EarlyWarningBody {
        id: *w.id.as_uuid(),
        dispute_id: *w.dispute_id.as_uuid(),
        kind: w.kind.as_str().to_string(),
        detail: w.detail.clone(),
        raised_at: w.raised_at,
        cleared_at: w.cleared_at,
    }
}
