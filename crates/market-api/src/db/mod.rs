//! # Database Persistence Layer
//!
//! Postgres persistence for dispute records via SQLx.
//!
//! The database layer is **optional**. When `DATABASE_URL` is set, the API
//! writes every mutated dispute, proposal, early warning, escrow account
//! and outbound notification through to PostgreSQL and reloads them on
//! startup. When absent, the API runs in-memory only.
//!
//! Each table keeps the full record as JSONB next to a handful of indexed
//! columns used for ordering and filtering. Lifecycle rules are enforced by
//! the dispute service, not in SQL.

pub mod disputes;
pub mod early_warnings;
pub mod escrow;
pub mod notifications;
pub mod proposals;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set: running in-memory only mode. \
                 State will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Serialize a record to its JSONB column value.
fn to_record<T: Serialize>(value: &T, kind: &'static str) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, kind, "failed to serialize record");
        sqlx::Error::Encode(Box::new(e))
    })
}

/// Decode a JSONB record column.
///
/// A record that no longer decodes fails the load instead of being
/// skipped, so a schema drift cannot silently drop disputes on restart.
fn from_record<T: DeserializeOwned>(
    value: serde_json::Value,
    kind: &'static str,
    id: &uuid::Uuid,
) -> Result<T, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| {
        tracing::error!(error = %e, kind, %id, "failed to decode stored record");
        sqlx::Error::Decode(Box::new(e))
    })
}
