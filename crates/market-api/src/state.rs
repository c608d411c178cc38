//! # Application State
//!
//! Shared state for the Axum application: the dispute service wired over
//! the in-process store, escrow ledger and outbox, plus the optional
//! database pool used for write-through persistence.
//!
//! ## Persistence
//!
//! The in-memory service is authoritative while the process runs. When a
//! pool is configured, every mutation is written through to PostgreSQL
//! before the response is returned, and [`AppState::hydrate_from_db`]
//! reloads the in-memory records on startup. Queued notifications are
//! written once each; ids already stored are remembered until the
//! notification leaves the outbox.
//!
//! ## Escalation runs
//!
//! Runs are single-flight within one process. A run started while another
//! is in progress fails fast with a conflict instead of queueing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use market_core::NotificationId;
use parking_lot::Mutex;
use sqlx::PgPool;

use market_disputes::{
    Dispute, DisputeService, EarlyWarning, EscrowLedger, MemoryOutbox, MemoryStore, Notification,
    Outbox, Proposal, RunReport,
};

use crate::error::AppError;

/// The dispute service as deployed by the API.
pub type Service = DisputeService<MemoryStore, EscrowLedger, MemoryOutbox>;

// -- Configuration ------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Application configuration, read from the environment.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Shared bearer secret. If `None`, authentication is disabled.
    pub auth_token: Option<String>,
    /// Interval for the scheduled escalation loop. `None` disables it.
    pub escalation_interval: Option<Duration>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Read `PORT`, `AUTH_TOKEN`, `ESCALATION_INTERVAL_SECS` and `LOG_FORMAT`.
    ///
    /// `DATABASE_URL` is read separately by [`crate::db::init_pool`].
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let port = match lookup("PORT") {
            Some(p) => p.parse().map_err(|e| format!("invalid PORT '{p}': {e}"))?,
            None => 8080,
        };
        let escalation_interval = match lookup("ESCALATION_INTERVAL_SECS") {
            Some(s) => {
                let secs: u64 = s
                    .parse()
                    .map_err(|e| format!("invalid ESCALATION_INTERVAL_SECS '{s}': {e}"))?;
                if secs == 0 {
                    return Err("ESCALATION_INTERVAL_SECS must be positive".to_string());
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };
        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") | Some("") | None => LogFormat::Pretty,
            Some(other) => return Err(format!("invalid LOG_FORMAT '{other}' (expected json or pretty)")),
        };
        Ok(Self {
            port,
            auth_token: lookup("AUTH_TOKEN").filter(|t| !t.is_empty()),
            escalation_interval,
            log_format,
        })
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("escalation_interval", &self.escalation_interval)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            escalation_interval: None,
            log_format: LogFormat::Pretty,
        }
    }
}

// -- Write set ----------------------------------------------------------------

/// Records touched by one operation, to be written through to the database.
#[derive(Debug, Default)]
pub struct WriteSet<'a> {
    disputes: Vec<&'a Dispute>,
    proposals: Vec<&'a Proposal>,
    warnings: Vec<&'a EarlyWarning>,
}

impl<'a> WriteSet<'a> {
    /// Include a dispute and its escrow account.
    pub fn dispute(mut self, dispute: &'a Dispute) -> Self {
        self.disputes.push(dispute);
        self
    }

    /// Include proposals.
    pub fn proposals(mut self, proposals: impl IntoIterator<Item = &'a Proposal>) -> Self {
        self.proposals.extend(proposals);
        self
    }

    /// Include early-warning records.
    pub fn warnings(mut self, warnings: impl IntoIterator<Item = &'a EarlyWarning>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

// -- Single-flight guard ------------------------------------------------------

/// Held for the duration of one escalation run.
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// -- Stored notifications -----------------------------------------------------

/// Ids of queued notifications already written to the database.
#[derive(Debug, Clone, Default)]
struct StoredNotifications(Arc<Mutex<HashSet<NotificationId>>>);

impl StoredNotifications {
    /// The queued notifications not yet written. Forgets ids no longer
    /// queued, so the set never outgrows the outbox.
    fn unstored(&self, pending: Vec<Notification>) -> Vec<Notification> {
        let mut stored = self.0.lock();
        let queued: HashSet<NotificationId> = pending.iter().map(|n| n.id).collect();
        stored.retain(|id| queued.contains(id));
        pending.into_iter().filter(|n| !stored.contains(&n.id)).collect()
    }

    fn mark(&self, written: &[Notification]) {
        self.0.lock().extend(written.iter().map(|n| n.id));
    }
}

// -- AppState -----------------------------------------------------------------

/// Shared application state. Cloning shares everything.
#[derive(Clone)]
pub struct AppState {
    /// The dispute flow.
    pub service: Service,
    /// Server configuration.
    pub config: AppConfig,
    /// PostgreSQL pool. `None` means in-memory only.
    pub db_pool: Option<PgPool>,
    escalation_running: Arc<AtomicBool>,
    stored_notifications: StoredNotifications,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("db_pool", &self.db_pool.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// In-memory state with default configuration.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), None)
    }

    /// State with explicit configuration and optional database pool.
    pub fn with_config(config: AppConfig, db_pool: Option<PgPool>) -> Self {
        Self {
            service: DisputeService::new(
                MemoryStore::new(),
                EscrowLedger::new(),
                MemoryOutbox::default(),
            ),
            config,
            db_pool,
            escalation_running: Arc::new(AtomicBool::new(false)),
            stored_notifications: StoredNotifications::default(),
        }
    }

    /// Run the escalation evaluator once at `now`, then write through every
    /// record the run touched.
    ///
    /// # Errors
    ///
    /// [`AppError::Conflict`] if another run is in progress.
    pub async fn run_escalation(&self, now: DateTime<Utc>) -> Result<RunReport, AppError> {
        let Some(_guard) = RunGuard::try_acquire(&self.escalation_running) else {
            tracing::info!("escalation run requested while one is in progress");
            return Err(AppError::Conflict("escalation run already in progress".into()));
        };

        let report = self.service.run_escalation(now)?;

        if self.db_pool.is_some() {
            let mut touched = Vec::with_capacity(report.outcomes.len());
            for outcome in &report.outcomes {
                touched.push(self.service.get_dispute(&outcome.dispute_id)?);
            }
            let mut writes = WriteSet::default().warnings(&report.warning_changes);
            for dispute in &touched {
                writes = writes.dispute(dispute);
            }
            self.persist(writes).await?;
        }
        Ok(report)
    }

    /// Write the given records, pending notifications included, through to
    /// the database. No-op without a pool.
    pub async fn persist(&self, writes: WriteSet<'_>) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let result = async {
            for dispute in &writes.disputes {
                crate::db::disputes::upsert(pool, dispute).await?;
                if let Some(account) = self.service.escrow().account(&dispute.id) {
                    crate::db::escrow::upsert(pool, &account).await?;
                }
            }
            for proposal in &writes.proposals {
                crate::db::proposals::upsert(pool, proposal).await?;
            }
            for warning in &writes.warnings {
                crate::db::early_warnings::upsert(pool, warning).await?;
            }
            let fresh = self.stored_notifications.unstored(self.service.outbox().pending());
            crate::db::notifications::insert_pending(pool, &fresh).await?;
            self.stored_notifications.mark(&fresh);
            Ok::<(), sqlx::Error>(())
        }
        .await;

        result.map_err(|e| {
            tracing::error!(error = %e, "failed to write through to database");
            AppError::Internal("recorded in-memory but database persist failed".to_string())
        })
    }

    /// Load disputes, proposals, early warnings, escrow accounts and
    /// undelivered notifications from the database. No-op without a pool.
    pub async fn hydrate_from_db(&self) -> Result<(), String> {
        let pool = match &self.db_pool {
            Some(pool) => pool,
            None => return Ok(()),
        };

        let disputes = crate::db::disputes::load_all(pool)
            .await
            .map_err(|e| format!("failed to load disputes: {e}"))?;
        let dispute_count = disputes.len();
        for dispute in disputes {
            self.service.store().restore_dispute(dispute);
        }

        let proposals = crate::db::proposals::load_all(pool)
            .await
            .map_err(|e| format!("failed to load proposals: {e}"))?;
        let proposal_count = proposals.len();
        for proposal in proposals {
            self.service.store().restore_proposal(proposal);
        }

        let warnings = crate::db::early_warnings::load_all(pool)
            .await
            .map_err(|e| format!("failed to load early warnings: {e}"))?;
        let warning_count = warnings.len();
        for warning in warnings {
            self.service.store().restore_early_warning(warning);
        }

        let accounts = crate::db::escrow::load_all(pool)
            .await
            .map_err(|e| format!("failed to load escrow accounts: {e}"))?;
        let account_count = accounts.len();
        for account in accounts {
            self.service.escrow().restore(account);
        }

        let notifications = crate::db::notifications::load_undelivered(pool)
            .await
            .map_err(|e| format!("failed to load notifications: {e}"))?;
        let notification_count = notifications.len();
        self.stored_notifications.mark(&notifications);
        for notification in notifications {
            self.service
                .outbox()
                .enqueue(notification)
                .map_err(|e| format!("failed to requeue notification: {e}"))?;
        }

        tracing::info!(
            disputes = dispute_count,
            proposals = proposal_count,
            early_warnings = warning_count,
            escrow_accounts = account_count,
            notifications = notification_count,
            "Hydrated in-memory stores from database"
        );

        Ok(())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
