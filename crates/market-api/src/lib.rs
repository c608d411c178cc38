//! # market-api: Axum API Services for Marketplace Disputes
//!
//! HTTP surface over the `market-disputes` service: clients and
//! professionals file disputes, exchange evidence and answer resolution
//! proposals; administrators review, force outcomes, run the escalation
//! evaluator and read KPIs.
//!
//! ## API Surface
//!
//! | Prefix                    | Module                        | Domain            |
//! |---------------------------|-------------------------------|-------------------|
//! | `/v1/disputes/*`          | [`routes::disputes`]          | Dispute lifecycle |
//! | `/v1/disputes/:id/proposals`, `/v1/proposals/*` | [`routes::proposals`] | Resolution |
//! | `/v1/admin/*`             | [`routes::admin`]             | Admin             |
//! | `/v1/notifications`       | [`routes::notifications`]     | Outbox            |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → Handler
//! ```
//!
//! ## OpenAPI
//!
//! Generated via utoipa derive macros, served at `/openapi.json`.

pub mod auth;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::middleware::from_fn;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::middleware::metrics::ApiMetrics;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) are mounted outside the auth middleware
/// so they remain accessible without credentials.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };
    let metrics = ApiMetrics::new();

    let api = Router::new()
        .merge(routes::disputes::router())
        .merge(routes::proposals::router())
        .merge(routes::admin::router())
        .merge(routes::notifications::router())
        .merge(openapi::router())
        .layer(from_fn(auth::auth_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::Extension(auth_config))
        .layer(axum::Extension(metrics))
        .with_state(state);

    let health = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    Router::new().merge(health).merge(api)
}

/// Liveness probe: 200 while the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 200 once the application is ready to serve.
async fn readiness() -> &'static str {
    "ready"
}
