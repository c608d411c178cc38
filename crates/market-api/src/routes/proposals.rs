//! # Resolution Proposal API
//!
//! Terms are put on the table per dispute; each party answers
//! independently. Both acceptances finalize the dispute: held funds are
//! released per the terms and the dispute is resolved. Repeating an answer
//! already on record is accepted, which makes client retries safe.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use market_core::{DisputeId, ProposalId};
use market_disputes::{Decision, ResolutionTerms};

use super::{dispute_to_response, proposal_to_body, DisputeResponse, MoneyBody, ProposalBody};
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Validate};
use crate::state::{AppState, WriteSet};

/// Terms for a new proposal.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ProposeRequest {
    /// The terms in prose.
    pub summary: String,
    /// Share of the held funds paid to the client.
    pub client_share: Option<MoneyBody>,
    /// Share of the held funds paid to the professional.
    pub professional_share: Option<MoneyBody>,
}

impl Validate for ProposeRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("summary", &self.summary, 10_000)
    }
}

/// A party's answer.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AnswerRequest {
    /// `accept` or `reject`.
    pub decision: String,
}

impl Validate for AnswerRequest {
    fn validate(&self) -> Result<(), String> {
        parse_decision(&self.decision).map(|_| ())
    }
}

fn parse_decision(s: &str) -> Result<Decision, String> {
    match s {
        "accept" => Ok(Decision::Accept),
        "reject" => Ok(Decision::Reject),
        other => Err(format!("decision must be 'accept' or 'reject', got '{other}'")),
    }
}

/// A newly opened proposal.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProposalOpenedResponse {
    pub proposal: ProposalBody,
    /// Open proposals this one replaced.
    pub superseded: Vec<ProposalBody>,
    pub dispute: DisputeResponse,
}

/// Outcome of a party answer.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AnswerResponse {
    pub proposal: ProposalBody,
    pub dispute: DisputeResponse,
    /// Whether the dispute is now resolved by this proposal.
    pub finalized: bool,
}

/// Build the proposals router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/disputes/:id/proposals",
            post(propose_resolution).get(list_proposals),
        )
        .route("/v1/proposals/:id/respond", post(respond_to_proposal))
}

/// POST /v1/disputes/:id/proposals: Propose resolution terms.
#[utoipa::path(
    post,
    path = "/v1/disputes/{id}/proposals",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    request_body = ProposeRequest,
    responses(
        (status = 201, description = "Proposal opened", body = ProposalOpenedResponse),
        (status = 403, description = "Caller is not a party"),
        (status = 409, description = "Dispute is resolved or closed"),
        (status = 422, description = "Shares do not fit the held amount"),
    ),
    tag = "proposals"
)]
async fn propose_resolution(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ProposeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProposalOpenedResponse>), AppError> {
    let req = extract_validated_json(body)?;
    let terms = ResolutionTerms {
        summary: req.summary,
        client_share: MoneyBody::parse_opt(req.client_share.as_ref())?,
        professional_share: MoneyBody::parse_opt(req.professional_share.as_ref())?,
    };

    let opened = state.service.propose_resolution(
        &DisputeId::from_uuid(id),
        caller.actor()?,
        terms,
        Utc::now(),
    )?;
    state
        .persist(
            WriteSet::default()
                .dispute(&opened.dispute)
                .proposals(std::iter::once(&opened.proposal).chain(&opened.superseded)),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ProposalOpenedResponse {
            proposal: proposal_to_body(&opened.proposal),
            superseded: opened.superseded.iter().map(proposal_to_body).collect(),
            dispute: dispute_to_response(&opened.dispute)?,
        }),
    ))
}

/// GET /v1/disputes/:id/proposals: Proposals on a dispute, oldest first.
#[utoipa::path(
    get,
    path = "/v1/disputes/{id}/proposals",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    responses(
        (status = 200, description = "Proposals", body = Vec<ProposalBody>),
        (status = 403, description = "Caller is not a party"),
        (status = 404, description = "Dispute not found"),
    ),
    tag = "proposals"
)]
async fn list_proposals(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ProposalBody>>, AppError> {
    let dispute_id = DisputeId::from_uuid(id);
    let dispute = state.service.get_dispute(&dispute_id)?;
    if !caller.can_view(&dispute) {
        return Err(AppError::Forbidden(format!("not a party to dispute {id}")));
    }
    let proposals = state.service.proposals_for(&dispute_id)?;
    Ok(Json(proposals.iter().map(proposal_to_body).collect()))
}

/// POST /v1/proposals/:id/respond: Accept or reject a proposal.
#[utoipa::path(
    post,
    path = "/v1/proposals/{id}/respond",
    params(("id" = Uuid, Path, description = "Proposal ID")),
    request_body = AnswerRequest,
    responses(
        (status = 200, description = "Answer recorded", body = AnswerResponse),
        (status = 403, description = "Caller is not a party"),
        (status = 404, description = "Proposal not found"),
        (status = 409, description = "Proposal closed or a different answer is on record"),
        (status = 502, description = "Escrow release failed; retry the same answer"),
    ),
    tag = "proposals"
)]
async fn respond_to_proposal(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let decision = parse_decision(&req.decision).map_err(AppError::Validation)?;
    let user = caller.require_user()?;

    let answered = state.service.respond_to_proposal(
        &ProposalId::from_uuid(id),
        user,
        decision,
        Utc::now(),
    )?;
    state
        .persist(
            WriteSet::default()
                .dispute(&answered.dispute)
                .proposals([&answered.proposal]),
        )
        .await?;

    Ok(Json(AnswerResponse {
        proposal: proposal_to_body(&answered.proposal),
        dispute: dispute_to_response(&answered.dispute)?,
        finalized: answered.finalized,
    }))
}
