//! # Early Warnings
//!
//! Flags disputes that are heading for escalation so staff can step in
//! first. A warning is raised while a dispute sits inside the warning window
//! and cleared as soon as the condition stops holding, the dispute
//! escalates, or it becomes terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use market_core::{DisputeId, EarlyWarningId};

use crate::dispute::Dispute;
use crate::escalation::EscalationPolicy;

/// What the warning is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyWarningKind {
    /// Quiet for longer than the warning window.
    Inactivity,
    /// Response deadline is inside the warning window.
    DeadlineApproaching,
}

impl EarlyWarningKind {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactivity => "inactivity",
            Self::DeadlineApproaching => "deadline_approaching",
        }
    }
}

/// A raised (and possibly cleared) warning record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyWarning {
    /// Unique warning identifier.
    pub id: EarlyWarningId,
    /// The dispute the warning is about.
    pub dispute_id: DisputeId,
    /// What the warning is about.
    pub kind: EarlyWarningKind,
    /// Human-readable detail.
    pub detail: String,
    /// When it was raised.
    pub raised_at: DateTime<Utc>,
    /// When it was cleared; `None` while active.
    pub cleared_at: Option<DateTime<Utc>>,
}

impl EarlyWarning {
    /// Whether the warning is still active.
    pub fn is_active(&self) -> bool {
        self.cleared_at.is_none()
    }
}

/// Warnings that should currently be active for `dispute`.
///
/// Only disputes that are not already flagged for escalation get warnings,
/// so callers pass `escalating = true` to clear everything.
pub fn assess(
    dispute: &Dispute,
    now: DateTime<Utc>,
    policy: &EscalationPolicy,
    escalating: bool,
) -> Vec<(EarlyWarningKind, String)> {
    let mut wanted = Vec::new();
    if escalating || dispute.is_terminal() {
        return wanted;
    }
    if let Some(last) = dispute.last_activity_at {
        let idle = now - last;
        if idle > policy.warning_window && idle <= policy.inactivity_threshold {
            wanted.push((
                EarlyWarningKind::Inactivity,
                format!("No activity for {} hours", idle.num_hours()),
            ));
        }
    }
    if let Some(deadline) = dispute.response_deadline {
        if deadline > now && deadline <= now + policy.warning_window {
            wanted.push((
                EarlyWarningKind::DeadlineApproaching,
                format!("Response due in {} hours", (deadline - now).num_hours()),
            ));
        }
    }
    wanted
}

/// Reconcile the active warnings of one dispute with what should be active.
///
/// Returns the records to write: new warnings for kinds not yet active, and
/// cleared copies of active warnings whose condition no longer holds.
pub fn reconcile(
    dispute_id: DisputeId,
    active: &[EarlyWarning],
    wanted: &[(EarlyWarningKind, String)],
    now: DateTime<Utc>,
) -> Vec<EarlyWarning> {
    let mut changes = Vec::new();
    for (kind, detail) in wanted {
        if !active.iter().any(|w| w.kind == *kind && w.is_active()) {
            changes.push(EarlyWarning {
                id: EarlyWarningId::new(),
                dispute_id,
                kind: *kind,
                detail: detail.clone(),
                raised_at: now,
                cleared_at: None,
            });
        }
    }
    for warning in active.iter().filter(|w| w.is_active()) {
        if !wanted.iter().any(|(kind, _)| *kind == warning.kind) {
            let mut cleared = warning.clone();
            cleared.cleared_at = Some(now);
            changes.push(cleared);
        }
    }
    changes
}
