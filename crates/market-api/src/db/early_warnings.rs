//! Early-warning persistence on the `early_warnings` table.

use sqlx::PgPool;
use uuid::Uuid;

use market_disputes::EarlyWarning;

use super::{from_record, to_record};

/// Insert a warning, or record its clearing.
pub async fn upsert(pool: &PgPool, warning: &EarlyWarning) -> Result<(), sqlx::Error> {
    let record = to_record(warning, "early_warning")?;

    sqlx::query(
        "INSERT INTO early_warnings (id, dispute_id, kind, record, raised_at, cleared_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (id) DO UPDATE SET
             record = EXCLUDED.record,
             cleared_at = EXCLUDED.cleared_at",
    )
    .bind(warning.id.as_uuid())
    .bind(warning.dispute_id.as_uuid())
    .bind(warning.kind.as_str())
    .bind(&record)
    .bind(warning.raised_at)
    .bind(warning.cleared_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load every warning, active and cleared.
pub async fn load_all(pool: &PgPool) -> Result<Vec<EarlyWarning>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid, serde_json::Value)>(
        "SELECT id, record FROM early_warnings ORDER BY raised_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, record)| from_record(record, "early_warning", &id))
        .collect()
}
