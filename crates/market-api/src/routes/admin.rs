//! # Admin API
//!
//! Administrator-only endpoints: forced resolution, on-demand escalation
//! runs, and the KPI dashboard with the current early warnings.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use market_core::DisputeId;
use market_disputes::{DisputeAnalytics, ForcedDecision, RunReport};

use super::{dispute_to_response, warning_to_body, DisputeResponse, EarlyWarningBody, MoneyBody};
use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Validate};
use crate::middleware::metrics::ApiMetrics;
use crate::state::{AppState, WriteSet};

/// An imposed outcome.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ForceResolveRequest {
    /// The decision in prose.
    pub summary: String,
    /// Share of the held funds paid to the client.
    pub client_share: Option<MoneyBody>,
    /// Share of the held funds paid to the professional.
    pub professional_share: Option<MoneyBody>,
}

impl Validate for ForceResolveRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("summary", &self.summary, 10_000)
    }
}

/// Escalation run parameters.
#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct RunParams {
    /// Evaluation instant. Defaults to the current time.
    pub at: Option<DateTime<Utc>>,
}

/// One dispute escalated during a run.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OutcomeBody {
    pub dispute_id: Uuid,
    pub previous_level: u8,
    pub level: u8,
    pub reasons_recorded: usize,
}

/// Summary of one escalation run.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RunReportBody {
    pub run_at: DateTime<Utc>,
    pub scanned: usize,
    pub escalated: usize,
    pub level_changes: usize,
    pub failed: usize,
    pub warnings_raised: usize,
    pub warnings_cleared: usize,
    pub outcomes: Vec<OutcomeBody>,
    pub warning_changes: Vec<EarlyWarningBody>,
}

impl From<&RunReport> for RunReportBody {
    fn from(report: &RunReport) -> Self {
        Self {
            run_at: report.run_at,
            scanned: report.scanned,
            escalated: report.escalated,
            level_changes: report.level_changes,
            failed: report.failed,
            warnings_raised: report.warnings_raised,
            warnings_cleared: report.warnings_cleared,
            outcomes: report
                .outcomes
                .iter()
                .map(|o| OutcomeBody {
                    dispute_id: *o.dispute_id.as_uuid(),
                    previous_level: o.previous.value(),
                    level: o.current.value(),
                    reasons_recorded: o.reasons_recorded,
                })
                .collect(),
            warning_changes: report.warning_changes.iter().map(warning_to_body).collect(),
        }
    }
}

/// Dispute KPIs.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct KpiBody {
    pub total: usize,
    pub open: usize,
    pub in_progress: usize,
    /// Resolved by mutual acceptance.
    pub resolved: usize,
    /// Resolved by administrative override.
    pub admin_forced: usize,
    pub closed: usize,
    /// Mean hours from filing to resolution, mutual and forced.
    pub average_resolution_hours: Option<f64>,
    /// Disputes at escalation level 1 or above.
    pub escalated: usize,
    pub active_early_warnings: usize,
}

impl From<DisputeAnalytics> for KpiBody {
    fn from(a: DisputeAnalytics) -> Self {
        Self {
            total: a.total,
            open: a.open,
            in_progress: a.in_progress,
            resolved: a.resolved,
            admin_forced: a.admin_forced,
            closed: a.closed,
            average_resolution_hours: a.average_resolution_hours,
            escalated: a.escalated,
            active_early_warnings: a.active_early_warnings,
        }
    }
}

/// HTTP counters since process start.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RequestMetricsBody {
    pub requests: u64,
    pub client_errors: u64,
    pub server_errors: u64,
}

/// The admin dashboard.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DashboardResponse {
    pub kpis: KpiBody,
    /// Early warnings not yet cleared.
    pub early_warnings: Vec<EarlyWarningBody>,
    pub requests: RequestMetricsBody,
}

/// Build the admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/disputes/:id/force-resolve", post(force_resolve))
        .route("/v1/admin/escalations/run", post(run_escalation))
        .route("/v1/admin/kpis", get(kpis))
}

/// POST /v1/admin/disputes/:id/force-resolve: Impose an outcome.
#[utoipa::path(
    post,
    path = "/v1/admin/disputes/{id}/force-resolve",
    params(("id" = Uuid, Path, description = "Dispute ID")),
    request_body = ForceResolveRequest,
    responses(
        (status = 200, description = "Dispute resolved", body = DisputeResponse),
        (status = 403, description = "Admin role required"),
        (status = 409, description = "Dispute is already resolved or closed"),
        (status = 502, description = "Escrow release failed; retry"),
    ),
    tag = "admin"
)]
async fn force_resolve(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ForceResolveRequest>, JsonRejection>,
) -> Result<Json<DisputeResponse>, AppError> {
    require_role(&caller, Role::Admin)?;
    let req = extract_validated_json(body)?;
    let decision = ForcedDecision {
        summary: req.summary,
        client_share: MoneyBody::parse_opt(req.client_share.as_ref())?,
        professional_share: MoneyBody::parse_opt(req.professional_share.as_ref())?,
    };

    let dispute = state.service.force_resolve(
        &DisputeId::from_uuid(id),
        caller.actor()?,
        decision,
        Utc::now(),
    )?;
    state.persist(WriteSet::default().dispute(&dispute)).await?;
    Ok(Json(dispute_to_response(&dispute)?))
}

/// POST /v1/admin/escalations/run: Run the escalation evaluator now.
#[utoipa::path(
    post,
    path = "/v1/admin/escalations/run",
    params(("at" = Option<String>, Query, description = "RFC 3339 evaluation instant (default now)")),
    responses(
        (status = 200, description = "Run report", body = RunReportBody),
        (status = 403, description = "Admin role required"),
        (status = 409, description = "A run is already in progress"),
    ),
    tag = "admin"
)]
async fn run_escalation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(params): Query<RunParams>,
) -> Result<Json<RunReportBody>, AppError> {
    require_role(&caller, Role::Admin)?;
    let at = params.at.unwrap_or_else(Utc::now);
    let report = state.run_escalation(at).await?;
    Ok(Json(RunReportBody::from(&report)))
}

/// GET /v1/admin/kpis: Dispute KPIs and active early warnings.
#[utoipa::path(
    get,
    path = "/v1/admin/kpis",
    responses(
        (status = 200, description = "Dashboard", body = DashboardResponse),
        (status = 403, description = "Admin role required"),
    ),
    tag = "admin"
)]
async fn kpis(
    State(state): State<AppState>,
    caller: CallerIdentity,
    metrics: Option<Extension<ApiMetrics>>,
) -> Result<Json<DashboardResponse>, AppError> {
    require_role(&caller, Role::Admin)?;
    let analytics = state.service.analytics()?;
    let warnings = state.service.active_early_warnings()?;
    let requests = match metrics {
        Some(Extension(m)) => RequestMetricsBody {
            requests: m.requests(),
            client_errors: m.client_errors(),
            server_errors: m.server_errors(),
        },
        None => RequestMetricsBody {
            requests: 0,
            client_errors: 0,
            server_errors: 0,
        },
    };
    Ok(Json(DashboardResponse {
        kpis: KpiBody::from(analytics),
        early_warnings: warnings.iter().map(warning_to_body).collect(),
        requests,
    }))
}
