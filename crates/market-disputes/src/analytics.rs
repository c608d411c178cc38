//! # Dispute Analytics
//!
//! Aggregate KPIs for the admin dashboard. Mutually accepted resolutions
//! and admin-forced resolutions are counted separately.

use serde::{Deserialize, Serialize};

use crate::dispute::{Dispute, Phase, WorkflowState};
use crate::early_warning::EarlyWarning;

/// Aggregate dispute KPIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeAnalytics {
    /// All disputes.
    pub total: usize,
    /// Disputes in `open`.
    pub open: usize,
    /// Disputes in `in_progress`.
    pub in_progress: usize,
    /// Disputes resolved by mutual acceptance.
    pub resolved: usize,
    /// Disputes resolved by administrative override.
    pub admin_forced: usize,
    /// Disputes closed without resolution.
    pub closed: usize,
    /// Mean hours from filing to resolution over every resolved dispute,
    /// mutual and forced. `None` when nothing is resolved.
    pub average_resolution_hours: Option<f64>,
    /// Disputes at escalation level 1 or above.
    pub escalated: usize,
    /// Early warnings not yet cleared.
    pub active_early_warnings: usize,
}

impl DisputeAnalytics {
    /// Compute KPIs over a snapshot of disputes and warnings.
    pub fn compute(disputes: &[Dispute], warnings: &[EarlyWarning]) -> Self {
        let mut analytics = Self {
            total: disputes.len(),
            open: 0,
            in_progress: 0,
            resolved: 0,
            admin_forced: 0,
            closed: 0,
            average_resolution_hours: None,
            escalated: 0,
            active_early_warnings: warnings.iter().filter(|w| w.is_active()).count(),
        };

        let mut resolution_minutes: i64 = 0;
        let mut resolved_total: i64 = 0;
        for dispute in disputes {
            if dispute.escalation_level.value() > 0 {
                analytics.escalated += 1;
            }
            match dispute.workflow_state() {
                WorkflowState::Open => analytics.open += 1,
                WorkflowState::InProgress => analytics.in_progress += 1,
                WorkflowState::Closed => analytics.closed += 1,
                WorkflowState::Resolved => {
                    let forced = dispute
                        .resolution
                        .as_ref()
                        .is_some_and(|r| r.kind.is_admin_forced());
                    if forced {
                        analytics.admin_forced += 1;
                    } else {
                        analytics.resolved += 1;
                    }
                    if let Phase::Resolved { resolved_at } = dispute.phase {
                        resolution_minutes += (resolved_at - dispute.created_at).num_minutes();
                        resolved_total += 1;
                    }
                }
            }
        }
        if resolved_total > 0 {
            analytics.average_resolution_hours =
                Some(resolution_minutes as f64 / 60.0 / resolved_total as f64);
        }
        analytics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispute::tests::{filing, t0};
    use crate::dispute::{Actor, Resolution, ResolutionKind};
    use crate::escalation::EscalationReason;
    use chrono::Duration;
    use market_core::{ProposalId, UserId};

    fn resolved(kind: ResolutionKind, after: Duration) -> Dispute {
        let mut d = Dispute::file(filing(None), t0()).unwrap();
        d.resolve(
            Resolution {
                kind,
                summary: "done".to_string(),
            },
            t0() + after,
        )
        .unwrap();
        d
    }

    #[test]
    fn empty_snapshot() {
        let a = DisputeAnalytics::compute(&[], &[]);
        assert_eq!(a.total, 0);
        assert_eq!(a.average_resolution_hours, None);
    }

    #[test]
    fn forced_resolutions_are_counted_apart() {
        let disputes = vec![
            resolved(
                ResolutionKind::Mutual {
                    proposal_id: ProposalId::new(),
                },
                Duration::hours(10),
            ),
            resolved(
                ResolutionKind::AdminForced {
                    admin_id: UserId::new(),
                },
                Duration::hours(30),
            ),
            Dispute::file(filing(None), t0()).unwrap(),
        ];
        let a = DisputeAnalytics::compute(&disputes, &[]);
        assert_eq!(a.total, 3);
        assert_eq!(a.resolved, 1);
        assert_eq!(a.admin_forced, 1);
        assert_eq!(a.open, 1);
        assert_eq!(a.average_resolution_hours, Some(20.0));
    }

    #[test]
    fn counts_states_and_escalations() {
        let mut in_progress = Dispute::file(filing(None), t0()).unwrap();
        in_progress
            .submit_evidence(in_progress.client_id, "photos".into(), t0())
            .unwrap();
        in_progress
            .escalate(&[EscalationReason::Inactive { hours: 49 }], t0(), Duration::hours(48))
            .unwrap();
        let mut closed = Dispute::file(filing(None), t0()).unwrap();
        closed.close(Actor::System, "withdrawn".into(), t0()).unwrap();

        let a = DisputeAnalytics::compute(&[in_progress, closed], &[]);
        assert_eq!(a.in_progress, 1);
        assert_eq!(a.closed, 1);
        assert_eq!(a.escalated, 1);
    }
}
