//! # Dispute Lifecycle API
//!
//! Filing, party evidence and responses, platform review, response
//! deadlines and closure. Every mutation is delegated to the dispute
//! service, which enforces party membership and the lifecycle rules; the
//! handlers map the caller onto an actor and write the result through.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use market_core::{DisputeId, JobId, UserId};
use market_disputes::{FilingRequest, WorkflowState};

use super::{dispute_to_response, DisputeResponse, MoneyBody, PaginationParams};
use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Validate};
use crate::state::{AppState, WriteSet};

const MAX_TITLE: usize = 200;
const MAX_TEXT: usize = 10_000;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Request to file a dispute.
#[derive(Debug, Deserialize, ToSchema)]
pub struct FileDisputeRequest {
    pub job_id: Uuid,
    pub client_id: Uuid,
    pub professional_id: Uuid,
    /// The filing party. Parties file as themselves; staff must name one.
    pub filed_by: Option<Uuid>,
    pub category: String,
    pub title: String,
    pub description: String,
    /// Funds to hold in escrow until the dispute ends.
    pub disputed_amount: Option<MoneyBody>,
    pub response_deadline: Option<DateTime<Utc>>,
}

impl Validate for FileDisputeRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("category", &self.category, MAX_TITLE)?;
        require_text("title", &self.title, MAX_TITLE)?;
        require_text("description", &self.description, MAX_TEXT)?;
        if self.client_id == self.professional_id {
            return Err("client_id and professional_id must differ".to_string());
        }
        Ok(())
    }
}

/// Party evidence.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EvidenceRequest {
    pub summary: String,
}

impl Validate for EvidenceRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("summary", &self.summary, MAX_TEXT)
    }
}

/// Party response message.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RespondRequest {
    pub message: String,
}

impl Validate for RespondRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("message", &self.message, MAX_TEXT)
    }
}

/// Response deadline update.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeadlineRequest {
    pub deadline: DateTime<Utc>,
}

impl Validate for DeadlineRequest {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Closure without resolution.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CloseRequest {
    pub reason: String,
}

impl Validate for CloseRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("reason", &self.reason, MAX_TEXT)
    }
}

/// Filters for the dispute list.
#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct ListDisputesParams {
    /// `open`, `in_progress`, `resolved` or `closed`.
    pub workflow_state: Option<String>,
    /// Maximum number of items to return (default: 100, max: 1000).
    pub limit: Option<usize>,
    /// Number of items to skip (default: 0).
    pub offset: Option<usize>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the dispute lifecycle router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/disputes", post(file_dispute).get(list_disputes))
        .route("/v1/disputes/:id", get(get_dispute))
        .route("/v1/disputes/:id/evidence", post(submit_evidence))
        .route("/v1/disputes/:id/respond", post(respond))
        .route("/v1/disputes/:id/review", post(begin_review))
        .route("/v1/disputes/:id/deadline", post(set_deadline))
        .route("/v1/disputes/:id/close", post(close_dispute))
}

fn parse_workflow_state(s: &str) -> Result<WorkflowState, AppError> {
    match s {
        "open" => Ok(WorkflowState::Open),
        "in_progress" => Ok(WorkflowState::InProgress),
        "resolved" => Ok(WorkflowState::Resolved),
        "closed" => Ok(WorkflowState::Closed),
        other => Err(AppError::Validation(format!("unknown workflow state: '{other}'"))),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/disputes: File a dispute.
#[utoipa::path(
    post,
    path = "/v1/disputes",
    request_body = FileDisputeRequest,
    responses(
        (status = 201, description = "Dispute filed", body = DisputeResponse),
        (status = 403, description = "Caller cannot file for this party"),
        (status = 422, description = "Validation error"),
    ),
    tag = "disputes"
)]
async fn file_dispute(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<FileDisputeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DisputeResponse>), AppError> {
    let req = extract_validated_json(body)?;

    let filed_by = match (caller.role, req.filed_by) {
        (Role::Party, Some(named)) if Some(UserId::from_uuid(named)) != caller.user_id => {
            return Err(AppError::Forbidden("parties may only file as themselves".into()));
        }
        (Role::Party, _) => caller.require_user()?,
        (_, Some(named)) => UserId::from_uuid(named),
        (_, None) => {
            return Err(AppError::Validation("filed_by is required for staff filings".into()));
        }
    };

    let request = FilingRequest {
        job_id: JobId::from_uuid(req.job_id),
        client_id: UserId::from_uuid(req.client_id),
        professional_id: UserId::from_uuid(req.professional_id),
        filed_by,
        category: req.category,
        title: req.title,
        description: req.description,
        disputed_amount: MoneyBody::parse_opt(req.disputed_amount.as_ref())?,
        response_deadline: req.response_deadline,
    };

    let dispute = state.service.file_dispute(request, Utc::now())?;
    state.persist(WriteSet::default().dispute(&dispute)).await?;

    Ok((StatusCode::CREATED, Json(dispute_to_response(&dispute)?)))
}

/// GET /v1/disputes: List disputes visible to the caller.
#[utoipa::path(
    get,
    path = "/v1/disputes",
    params(
        ("workflow_state" = Option<String>, Query, description = "Filter by workflow state"),
        ("limit" = Option<usize>, Query, description = "Max items to return (default 100, max 1000)"),
        ("offset" = Option<usize>, Query, description = "Items to skip (default 0)"),
    ),
    responses(
        (status = 200, description = "Disputes ordered by number", body = Vec<DisputeResponse>),
    ),
    tag = "disputes"
)]
async fn list_disputes(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(params): Query<ListDisputesParams>,
) -> Result<Json<Vec<DisputeResponse>>, AppError> {
    let wanted = params
        .workflow_state
        .as_deref()
        .map(parse_workflow_state)
        .transpose()?;

    let visible: Vec<_> = state
        .service
        .list_disputes()?
        .into_iter()
        .filter(|d| caller.can_view(d))
        .filter(|d| wanted.map_or(true, |w| d.workflow_state() == w))
        .collect();

    let pagination = PaginationParams {
        limit: params.limit,
        offset: params.offset,
    };
    let page = pagination
        .page(visible)
        .iter()
        .map(dispute_to_response)
        .collect::<Result<_, _>>()?;
    Ok(Json(page))
}

/// GET /v1/disputes/:id: Get one dispute.
#[utoipa::path(
    get,
    path = "/v1/disputes/{id}",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    responses(
        (status = 200, description = "The dispute", body = DisputeResponse),
        (status = 403, description = "Caller is not a party"),
        (status = 404, description = "Dispute not found"),
    ),
    tag = "disputes"
)]
async fn get_dispute(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<DisputeResponse>, AppError> {
    let dispute = state.service.get_dispute(&DisputeId::from_uuid(id))?;
    if !caller.can_view(&dispute) {
        return Err(AppError::Forbidden(format!("not a party to dispute {id}")));
    }
    Ok(Json(dispute_to_response(&dispute)?))
}

/// POST /v1/disputes/:id/evidence: Submit party evidence.
#[utoipa::path(
    post,
    path = "/v1/disputes/{id}/evidence",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    request_body = EvidenceRequest,
    responses(
        (status = 200, description = "Evidence recorded", body = DisputeResponse),
        (status = 403, description = "Caller is not a party"),
        (status = 409, description = "Dispute is resolved or closed"),
    ),
    tag = "disputes"
)]
async fn submit_evidence(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<EvidenceRequest>, JsonRejection>,
) -> Result<Json<DisputeResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let user = caller.require_user()?;
    let dispute = state
        .service
        .submit_evidence(&DisputeId::from_uuid(id), user, req.summary, Utc::now())?;
    state.persist(WriteSet::default().dispute(&dispute)).await?;
    Ok(Json(dispute_to_response(&dispute)?))
}

/// POST /v1/disputes/:id/respond: Post a party response.
#[utoipa::path(
    post,
    path = "/v1/disputes/{id}/respond",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    request_body = RespondRequest,
    responses(
        (status = 200, description = "Response recorded", body = DisputeResponse),
        (status = 403, description = "Caller is not a party"),
        (status = 409, description = "Dispute is resolved or closed"),
    ),
    tag = "disputes"
)]
async fn respond(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<RespondRequest>, JsonRejection>,
) -> Result<Json<DisputeResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let user = caller.require_user()?;
    let dispute = state
        .service
        .respond(&DisputeId::from_uuid(id), user, req.message, Utc::now())?;
    state.persist(WriteSet::default().dispute(&dispute)).await?;
    Ok(Json(dispute_to_response(&dispute)?))
}

/// POST /v1/disputes/:id/review: Put the dispute under platform review.
#[utoipa::path(
    post,
    path = "/v1/disputes/{id}/review",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    responses(
        (status = 200, description = "Dispute under review", body = DisputeResponse),
        (status = 403, description = "Admin role required"),
        (status = 409, description = "Stage cannot move back to review"),
    ),
    tag = "disputes"
)]
async fn begin_review(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<DisputeResponse>, AppError> {
    require_role(&caller, Role::Admin)?;
    let dispute = state
        .service
        .begin_review(&DisputeId::from_uuid(id), caller.actor()?, Utc::now())?;
    state.persist(WriteSet::default().dispute(&dispute)).await?;
    Ok(Json(dispute_to_response(&dispute)?))
}

/// POST /v1/disputes/:id/deadline: Set or move the response deadline.
#[utoipa::path(
    post,
    path = "/v1/disputes/{id}/deadline",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    request_body = DeadlineRequest,
    responses(
        (status = 200, description = "Deadline set", body = DisputeResponse),
        (status = 403, description = "Admin role required"),
    ),
    tag = "disputes"
)]
async fn set_deadline(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<DeadlineRequest>, JsonRejection>,
) -> Result<Json<DisputeResponse>, AppError> {
    require_role(&caller, Role::Admin)?;
    let req = extract_validated_json(body)?;
    let dispute = state.service.set_response_deadline(
        &DisputeId::from_uuid(id),
        caller.actor()?,
        req.deadline,
        Utc::now(),
    )?;
    state.persist(WriteSet::default().dispute(&dispute)).await?;
    Ok(Json(dispute_to_response(&dispute)?))
}

/// POST /v1/disputes/:id/close: Close without resolution, refunding escrow.
#[utoipa::path(
    post,
    path = "/v1/disputes/{id}/close",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    request_body = CloseRequest,
    responses(
        (status = 200, description = "Dispute closed", body = DisputeResponse),
        (status = 403, description = "Caller is not a party"),
        (status = 409, description = "Dispute is already resolved or closed"),
        (status = 502, description = "Escrow refund failed"),
    ),
    tag = "disputes"
)]
async fn close_dispute(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<CloseRequest>, JsonRejection>,
) -> Result<Json<DisputeResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let dispute = state.service.close_dispute(
        &DisputeId::from_uuid(id),
        caller.actor()?,
        req.reason,
        Utc::now(),
    )?;
    state.persist(WriteSet::default().dispute(&dispute)).await?;
    Ok(Json(dispute_to_response(&dispute)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_state_filter_parses_known_values() {
        assert_eq!(parse_workflow_state("in_progress").unwrap(), WorkflowState::InProgress);
        assert!(parse_workflow_state("pending").is_err());
    }

    #[test]
    fn filing_requires_distinct_parties() {
        let same = Uuid::new_v4();
        let req = FileDisputeRequest {
            job_id: Uuid::new_v4(),
            client_id: same,
            professional_id: same,
            filed_by: None,
            category: "quality".into(),
            title: "Leaking pipe".into(),
            description: "Fixed pipe still leaks".into(),
            disputed_amount: None,
            response_deadline: None,
        };
        assert!(req.validate().is_err());
    }
}
