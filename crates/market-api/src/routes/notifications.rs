//! # Notification Outbox API
//!
//! Recipients collect their queued notifications here. Reading drains the
//! recipient's queue; with a database configured the drained messages are
//! stamped as delivered so they are not requeued on restart.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use market_core::UserId;
use market_disputes::Notification;

use crate::auth::{CallerIdentity, Role};
use crate::error::AppError;
use crate::state::AppState;

/// Which recipient's queue to drain.
#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct NotificationParams {
    /// Defaults to the caller. Only support staff and admins may name
    /// another user.
    pub recipient: Option<Uuid>,
}

/// A delivered notification.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NotificationBody {
    pub id: Uuid,
    pub recipient: Uuid,
    pub title: String,
    pub description: String,
    /// `low`, `normal`, `high` or `urgent`.
    pub priority: String,
    /// In-app path, e.g. `/disputes/{id}`.
    pub link: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Notification> for NotificationBody {
    fn from(n: &Notification) -> Self {
        Self {
            id: *n.id.as_uuid(),
            recipient: *n.recipient.as_uuid(),
            title: n.title.clone(),
            description: n.description.clone(),
            priority: n.priority.as_str().to_string(),
            link: n.link.clone(),
            created_at: n.created_at,
        }
    }
}

/// Build the notifications router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/notifications", get(drain_notifications))
}

/// GET /v1/notifications: Drain queued notifications for a recipient.
#[utoipa::path(
    get,
    path = "/v1/notifications",
    params(("recipient" = Option<Uuid>, Query, description = "Recipient user ID (default: caller)")),
    responses(
        (status = 200, description = "Notifications, oldest first", body = Vec<NotificationBody>),
        (status = 403, description = "Caller may not read this recipient's queue"),
    ),
    tag = "notifications"
)]
async fn drain_notifications(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(params): Query<NotificationParams>,
) -> Result<Json<Vec<NotificationBody>>, AppError> {
    let recipient = match params.recipient.map(UserId::from_uuid) {
        Some(named) if Some(named) != caller.user_id && !caller.has_role(Role::Support) => {
            return Err(AppError::Forbidden(
                "parties may only read their own notifications".into(),
            ));
        }
        Some(named) => named,
        None => caller.require_user()?,
    };

    let drained = state.service.outbox().drain_for(&recipient);
    if let Some(pool) = &state.db_pool {
        if !drained.is_empty() {
            crate::db::notifications::insert_pending(pool, &drained).await?;
            crate::db::notifications::mark_delivered(pool, &drained, Utc::now()).await?;
        }
    }

    tracing::debug!(recipient = %recipient, count = drained.len(), "notifications drained");
    Ok(Json(drained.iter().map(NotificationBody::from).collect()))
}
