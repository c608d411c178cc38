//! # market-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for marketplace disputes and, when
//! `ESCALATION_INTERVAL_SECS` is set, the periodic escalation evaluator.

use market_api::state::{AppConfig, AppState, LogFormat};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(?config, "configuration loaded");

    // Absent DATABASE_URL means in-memory only.
    let db_pool = market_api::db::init_pool().await.map_err(|e| {
        tracing::error!("Database initialization failed: {e}");
        e
    })?;

    let state = AppState::with_config(config.clone(), db_pool);
    state.hydrate_from_db().await.map_err(|e| {
        tracing::error!("Database hydration failed: {e}");
        e
    })?;

    if let Some(interval) = config.escalation_interval {
        tokio::spawn(escalation_loop(state.clone(), interval));
    }

    let app = market_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Disputes API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run the evaluator on a fixed interval. A failed run is logged and the
/// loop waits for the next tick.
async fn escalation_loop(state: AppState, every: std::time::Duration) {
    tracing::info!(interval_secs = every.as_secs(), "scheduled escalation enabled");
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match state.run_escalation(chrono::Utc::now()).await {
            Ok(report) => tracing::debug!(
                scanned = report.scanned,
                escalated = report.escalated,
                "scheduled escalation run finished"
            ),
            Err(e) => tracing::warn!(error = %e, "scheduled escalation run failed"),
        }
    }
}
