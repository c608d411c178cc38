//! # Escalation Evaluator
//!
//! Decides, per dispute, whether it has stalled. The decision is a pure
//! function of the dispute and an explicit `now`; no clock is read here.
//!
//! A dispute is flagged when either:
//!
//! - more than [`EscalationPolicy::inactivity_threshold`] has passed since
//!   its last activity (`"Inactive for N hours"`), or
//! - its response deadline is in the past (`"Deadline overdue by N hours"`).
//!
//! Both reasons may apply at once; they accumulate. Hours are whole hours,
//! rounded down. Applying the decision is the store's
//! [`escalate`](crate::store::DisputeStore::escalate) operation, driven by
//! [`DisputeService::run_escalation`](crate::service::DisputeService::run_escalation).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use market_core::DisputeId;

use crate::dispute::{Dispute, EscalationOutcome};
use crate::early_warning::EarlyWarning;

/// Why a dispute was escalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    /// No activity for longer than the inactivity threshold.
    Inactive {
        /// Whole hours since the last activity.
        hours: i64,
    },
    /// The response deadline has passed.
    DeadlineOverdue {
        /// Whole hours past the deadline.
        hours: i64,
    },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive { hours } => write!(f, "Inactive for {hours} hours"),
            Self::DeadlineOverdue { hours } => write!(f, "Deadline overdue by {hours} hours"),
        }
    }
}

/// Thresholds that drive escalation and early warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Inactivity longer than this escalates.
    pub inactivity_threshold: Duration,
    /// Minimum time between two level increments of one dispute.
    pub cooldown: Duration,
    /// How far ahead of escalation an early warning is raised.
    pub warning_window: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            inactivity_threshold: Duration::hours(48),
            cooldown: Duration::hours(48),
            warning_window: Duration::hours(24),
        }
    }
}

/// The evaluator's decision for one dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationCheck {
    /// The evaluated dispute.
    pub dispute_id: DisputeId,
    /// Accumulated reasons; empty means no-op.
    pub reasons: Vec<EscalationReason>,
}

impl EscalationCheck {
    /// Whether the dispute should be escalated.
    pub fn should_escalate(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Evaluate one dispute at `now`. Terminal disputes never escalate.
pub fn evaluate(dispute: &Dispute, now: DateTime<Utc>, policy: &EscalationPolicy) -> EscalationCheck {
    let mut reasons = Vec::new();
    if dispute.workflow_state().is_active() {
        if let Some(last) = dispute.last_activity_at {
            let idle = now - last;
            if idle > policy.inactivity_threshold {
                reasons.push(EscalationReason::Inactive {
                    hours: idle.num_hours(),
                });
            }
        }
        if let Some(deadline) = dispute.response_deadline {
            if now > deadline {
                reasons.push(EscalationReason::DeadlineOverdue {
                    hours: (now - deadline).num_hours(),
                });
            }
        }
    }
    EscalationCheck {
        dispute_id: dispute.id,
        reasons,
    }
}

/// The externally observable result of one evaluator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// The `now` the run was evaluated at.
    pub run_at: DateTime<Utc>,
    /// Active disputes inspected.
    pub scanned: usize,
    /// Disputes whose escalate operation was applied.
    pub escalated: usize,
    /// Disputes whose level actually moved.
    pub level_changes: usize,
    /// Disputes whose escalate operation failed.
    pub failed: usize,
    /// Early warnings raised.
    pub warnings_raised: usize,
    /// Early warnings cleared.
    pub warnings_cleared: usize,
    /// Per-dispute escalation results.
    pub outcomes: Vec<EscalationOutcome>,
    /// Early-warning records raised or cleared in this run.
    pub warning_changes: Vec<EarlyWarning>,
}

impl RunReport {
    /// An empty report for a run at `run_at`.
    pub fn new(run_at: DateTime<Utc>) -> Self {
        Self {
            run_at,
            scanned: 0,
            escalated: 0,
            level_changes: 0,
            failed: 0,
            warnings_raised: 0,
            warnings_cleared: 0,
            outcomes: Vec::new(),
            warning_changes: Vec::new(),
        }
    }
}
