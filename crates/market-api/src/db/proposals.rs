//! Resolution proposal persistence on the `proposals` table.

use sqlx::PgPool;
use uuid::Uuid;

use market_disputes::Proposal;

use super::{from_record, to_record};

/// Insert or update a proposal.
pub async fn upsert(pool: &PgPool, proposal: &Proposal) -> Result<(), sqlx::Error> {
    let record = to_record(proposal, "proposal")?;

    sqlx::query(
        "INSERT INTO proposals (id, dispute_id, status, record, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, NOW())
         ON CONFLICT (id) DO UPDATE SET
             status = EXCLUDED.status,
             record = EXCLUDED.record,
             updated_at = NOW()",
    )
    .bind(proposal.id.as_uuid())
    .bind(proposal.dispute_id.as_uuid())
    .bind(proposal.status().as_str())
    .bind(&record)
    .bind(proposal.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load all proposals, oldest first.
pub async fn load_all(pool: &PgPool) -> Result<Vec<Proposal>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid, serde_json::Value)>(
        "SELECT id, record FROM proposals ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, record)| from_record(record, "proposal", &id))
        .collect()
}
