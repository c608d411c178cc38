//! # OpenAPI Specification Assembly
//!
//! Assembles every utoipa-documented route into one OpenAPI document,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI spec for the entire API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marketplace Disputes API",
        version = "0.3.0",
        description = "Dispute filing, escalation and resolution for client/professional jobs.",
        license(name = "BUSL-1.1")
    ),
    paths(
        // Disputes
        crate::routes::disputes::file_dispute,
        crate::routes::disputes::list_disputes,
        crate::routes::disputes::get_dispute,
        crate::routes::disputes::submit_evidence,
        crate::routes::disputes::respond,
        crate::routes::disputes::begin_review,
        crate::routes::disputes::set_deadline,
        crate::routes::disputes::close_dispute,
        // Proposals
        crate::routes::proposals::propose_resolution,
        crate::routes::proposals::list_proposals,
        crate::routes::proposals::respond_to_proposal,
        // Admin
        crate::routes::admin::force_resolve,
        crate::routes::admin::run_escalation,
        crate::routes::admin::kpis,
        // Notifications
        crate::routes::notifications::drain_notifications,
    ),
    components(schemas(
        // Error types
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        // Shared bodies
        crate::routes::MoneyBody,
        crate::routes::DisputeResponse,
        crate::routes::ResolutionBody,
        crate::routes::ProposalBody,
        crate::routes::EarlyWarningBody,
        // Dispute DTOs
        crate::routes::disputes::FileDisputeRequest,
        crate::routes::disputes::EvidenceRequest,
        crate::routes::disputes::RespondRequest,
        crate::routes::disputes::DeadlineRequest,
        crate::routes::disputes::CloseRequest,
        // Proposal DTOs
        crate::routes::proposals::ProposeRequest,
        crate::routes::proposals::AnswerRequest,
        crate::routes::proposals::ProposalOpenedResponse,
        crate::routes::proposals::AnswerResponse,
        // Admin DTOs
        crate::routes::admin::ForceResolveRequest,
        crate::routes::admin::RunReportBody,
        crate::routes::admin::OutcomeBody,
        crate::routes::admin::KpiBody,
        crate::routes::admin::RequestMetricsBody,
        crate::routes::admin::DashboardResponse,
        // Notification DTOs
        crate::routes::notifications::NotificationBody,
    )),
    tags(
        (name = "disputes", description = "Dispute lifecycle"),
        (name = "proposals", description = "Resolution proposals"),
        (name = "admin", description = "Administrator operations and KPIs"),
        (name = "notifications", description = "Notification outbox"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/v1/disputes",
            "/v1/disputes/{id}",
            "/v1/disputes/{id}/proposals",
            "/v1/proposals/{id}/respond",
            "/v1/admin/kpis",
            "/v1/admin/escalations/run",
            "/v1/notifications",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
