//! Outbound notification persistence on the `notifications` table.
//!
//! Queued notifications are copied here as they are produced. Draining a
//! recipient's queue through the API stamps `delivered_at`; notifications
//! without it are requeued on startup.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use market_disputes::Notification;

use super::{from_record, to_record};

/// Insert queued notifications not yet stored.
pub async fn insert_pending(pool: &PgPool, pending: &[Notification]) -> Result<(), sqlx::Error> {
    for notification in pending {
        let record = to_record(notification, "notification")?;
        sqlx::query(
            "INSERT INTO notifications (id, recipient, record, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(notification.id.as_uuid())
        .bind(notification.recipient.as_uuid())
        .bind(&record)
        .bind(notification.created_at)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Stamp delivered notifications. Returns the number of rows updated.
pub async fn mark_delivered(
    pool: &PgPool,
    delivered: &[Notification],
    at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let ids: Vec<Uuid> = delivered.iter().map(|n| *n.id.as_uuid()).collect();
    let result = sqlx::query(
        "UPDATE notifications SET delivered_at = $1 WHERE id = ANY($2) AND delivered_at IS NULL",
    )
    .bind(at)
    .bind(&ids)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Load notifications not yet delivered, oldest first.
pub async fn load_undelivered(pool: &PgPool) -> Result<Vec<Notification>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid, serde_json::Value)>(
        "SELECT id, record FROM notifications WHERE delivered_at IS NULL ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, record)| from_record(record, "notification", &id))
        .collect()
}
