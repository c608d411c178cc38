//! Escrow account persistence on the `escrow_accounts` table.

use sqlx::PgPool;
use uuid::Uuid;

use market_disputes::EscrowAccount;

use super::{from_record, to_record};

/// Insert or update an escrow account.
pub async fn upsert(pool: &PgPool, account: &EscrowAccount) -> Result<(), sqlx::Error> {
    let record = to_record(account, "escrow_account")?;

    sqlx::query(
        "INSERT INTO escrow_accounts (dispute_id, status, record, updated_at)
         VALUES ($1, $2, $3, NOW())
         ON CONFLICT (dispute_id) DO UPDATE SET
             status = EXCLUDED.status,
             record = EXCLUDED.record,
             updated_at = NOW()",
    )
    .bind(account.dispute_id.as_uuid())
    .bind(account.status.as_str())
    .bind(&record)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load every escrow account.
pub async fn load_all(pool: &PgPool) -> Result<Vec<EscrowAccount>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid, serde_json::Value)>(
        "SELECT dispute_id, record FROM escrow_accounts",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, record)| from_record(record, "escrow_account", &id))
        .collect()
}
