//! Dispute persistence operations on the `disputes` table.
//!
//! Writes are guarded by `revision`, the count of timeline and escalation
//! entries. Both lists are append-only, so a stale snapshot written after
//! a newer one is ignored.

use sqlx::PgPool;
use uuid::Uuid;

use market_disputes::Dispute;

use super::{from_record, to_record};

fn revision(dispute: &Dispute) -> i64 {
    (dispute.timeline.len() + dispute.escalation_reasons.len()) as i64
}

/// Insert or update a dispute.
pub async fn upsert(pool: &PgPool, dispute: &Dispute) -> Result<(), sqlx::Error> {
    let record = to_record(dispute, "dispute")?;

    sqlx::query(
        "INSERT INTO disputes (id, number, workflow_state, escalation_level, revision, record, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
         ON CONFLICT (id) DO UPDATE SET
             workflow_state = EXCLUDED.workflow_state,
             escalation_level = EXCLUDED.escalation_level,
             revision = EXCLUDED.revision,
             record = EXCLUDED.record,
             updated_at = NOW()
         WHERE disputes.revision <= EXCLUDED.revision",
    )
    .bind(dispute.id.as_uuid())
    .bind(dispute.number as i64)
    .bind(dispute.workflow_state().as_str())
    .bind(dispute.escalation_level.value() as i16)
    .bind(revision(dispute))
    .bind(&record)
    .bind(dispute.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load all disputes, ordered by number.
pub async fn load_all(pool: &PgPool) -> Result<Vec<Dispute>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DisputeRow>(
        "SELECT id, record FROM disputes ORDER BY number",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(DisputeRow::into_dispute).collect()
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct DisputeRow {
    id: Uuid,
    record: serde_json::Value,
}

impl DisputeRow {
    fn into_dispute(self) -> Result<Dispute, sqlx::Error> {
        from_record(self.record, "dispute", &self.id)
    }
}
