//! # Dispute Service
//!
//! Orchestrates the dispute flow over three collaborators: a
//! [`DisputeStore`] for records, an [`EscrowGateway`] for held funds and an
//! [`Outbox`] for notifications.
//!
//! ## Finalization
//!
//! When both parties accept a proposal, or an administrator forces an
//! outcome, the held funds are released first, keyed by a settlement
//! reference. Only after the release succeeds is the dispute moved to
//! `Resolved`. A release failure is returned to the caller and leaves the
//! dispute untouched; repeating the request reuses the same reference, so
//! funds are never paid out twice.
//!
//! Notifications are enqueued after the record is committed. Enqueue
//! failures are logged and dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use market_core::{DisputeId, Money, ProposalId, UserId};

use crate::analytics::DisputeAnalytics;
use crate::dispute::{Actor, Dispute, EscalationLevel, FilingRequest, PartyRole, Resolution, ResolutionKind};
use crate::early_warning::{self, EarlyWarning};
use crate::error::DisputeError;
use crate::escalation::{self, EscalationPolicy, RunReport};
use crate::escrow::{Allocation, EscrowGateway, HoldRequest, RefundRequest, ReleaseRequest};
use crate::outbox::{Notification, Outbox, Priority};
use crate::proposal::{Decision, PartyDecision, Proposal, ProposalStatus, Proposer, ResolutionTerms};
use crate::store::DisputeStore;

/// Result of putting a proposal on the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalOpened {
    /// The new proposal.
    pub proposal: Proposal,
    /// Proposals it replaced.
    pub superseded: Vec<Proposal>,
    /// The dispute after advancing to the resolution stage.
    pub dispute: Dispute,
}

/// Result of a party answering a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResponse {
    /// The proposal after recording the answer.
    pub proposal: Proposal,
    /// The dispute after the answer.
    pub dispute: Dispute,
    /// Whether the dispute is now resolved by this proposal.
    pub finalized: bool,
}

/// An administrator's imposed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForcedDecision {
    /// The decision in prose.
    pub summary: String,
    /// Amount paid to the client.
    #[serde(default)]
    pub client_share: Option<Money>,
    /// Amount paid to the professional.
    #[serde(default)]
    pub professional_share: Option<Money>,
}

/// The dispute flow.
#[derive(Debug, Clone)]
pub struct DisputeService<S, E, O> {
    store: S,
    escrow: E,
    outbox: O,
    policy: EscalationPolicy,
}

impl<S, E, O> DisputeService<S, E, O>
where
    S: DisputeStore,
    E: EscrowGateway,
    O: Outbox,
{
    /// Build a service with the default escalation policy.
    pub fn new(store: S, escrow: E, outbox: O) -> Self {
        Self {
            store,
            escrow,
            outbox,
            policy: EscalationPolicy::default(),
        }
    }

    /// Replace the escalation policy.
    pub fn with_policy(mut self, policy: EscalationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The record store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The escrow collaborator.
    pub fn escrow(&self) -> &E {
        &self.escrow
    }

    /// The notification outbox.
    pub fn outbox(&self) -> &O {
        &self.outbox
    }

    /// The active escalation policy.
    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// Fetch one dispute.
    pub fn get_dispute(&self, id: &DisputeId) -> Result<Dispute, DisputeError> {
        self.store
            .get_dispute(id)?
            .ok_or_else(|| DisputeError::DisputeNotFound(id.to_string()))
    }

    /// Every dispute, ordered by number.
    pub fn list_disputes(&self) -> Result<Vec<Dispute>, DisputeError> {
        self.store.list_disputes()
    }

    /// Fetch one proposal.
    pub fn get_proposal(&self, id: &ProposalId) -> Result<Proposal, DisputeError> {
        self.store
            .get_proposal(id)?
            .ok_or_else(|| DisputeError::ProposalNotFound(id.to_string()))
    }

    /// Proposals on one dispute, oldest first.
    pub fn proposals_for(&self, dispute_id: &DisputeId) -> Result<Vec<Proposal>, DisputeError> {
        self.get_dispute(dispute_id)?;
        self.store.proposals_for(dispute_id)
    }

    /// Early warnings not yet cleared.
    pub fn active_early_warnings(&self) -> Result<Vec<EarlyWarning>, DisputeError> {
        Ok(self
            .store
            .early_warnings()?
            .into_iter()
            .filter(EarlyWarning::is_active)
            .collect())
    }

    /// Aggregate KPIs.
    pub fn analytics(&self) -> Result<DisputeAnalytics, DisputeError> {
        let disputes = self.store.list_disputes()?;
        let warnings = self.store.early_warnings()?;
        Ok(DisputeAnalytics::compute(&disputes, &warnings))
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// File a dispute, holding the disputed amount in escrow first.
    pub fn file_dispute(&self, request: FilingRequest, now: DateTime<Utc>) -> Result<Dispute, DisputeError> {
        let dispute = Dispute::file(request, now)?;
        if let Some(amount) = dispute.disputed_amount.clone().filter(|m| !m.is_zero()) {
            self.escrow.hold(HoldRequest {
                dispute_id: dispute.id,
                job_id: dispute.job_id,
                payer: dispute.client_id,
                amount,
                at: now,
            })?;
        }

        let dispute = match self.store.insert_dispute(dispute.clone()) {
            Ok(stored) => stored,
            Err(e) => {
                if dispute.escrow_frozen {
                    let refund = self.escrow.refund(RefundRequest {
                        dispute_id: dispute.id,
                        reference: format!("abort:{}", dispute.id),
                        at: now,
                    });
                    if let Err(refund_err) = refund {
                        tracing::error!(
                            dispute_id = %dispute.id,
                            error = %refund_err,
                            "escrow hold left in place after failed dispute insert"
                        );
                    }
                }
                return Err(e);
            }
        };

        tracing::info!(
            dispute_id = %dispute.id,
            number = dispute.number,
            filed_by = %dispute.filed_by,
            escrow_frozen = dispute.escrow_frozen,
            "dispute filed"
        );
        let counterpart = dispute.party_id(dispute.filed_by.counterpart());
        self.notify(Notification::for_dispute(
            counterpart,
            dispute.id,
            format!("Dispute #{} filed", dispute.number),
            dispute.title.clone(),
            Priority::High,
            now,
        ));
        Ok(dispute)
    }

    /// Record party evidence.
    pub fn submit_evidence(
        &self,
        id: &DisputeId,
        user: UserId,
        summary: String,
        now: DateTime<Utc>,
    ) -> Result<Dispute, DisputeError> {
        let (dispute, role) = self
            .store
            .update_dispute(id, |d| d.submit_evidence(user, summary, now))?;
        tracing::debug!(dispute_id = %id, party = %role, "evidence submitted");
        Ok(dispute)
    }

    /// Record a party response and notify the other side.
    pub fn respond(
        &self,
        id: &DisputeId,
        user: UserId,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<Dispute, DisputeError> {
        let (dispute, role) = self.store.update_dispute(id, |d| d.respond(user, message, now))?;
        self.notify(Notification::for_dispute(
            dispute.party_id(role.counterpart()),
            dispute.id,
            format!("New response on dispute #{}", dispute.number),
            format!("The {role} responded"),
            Priority::Normal,
            now,
        ));
        Ok(dispute)
    }

    /// Put the dispute under platform review. Admin only.
    pub fn begin_review(&self, id: &DisputeId, actor: Actor, now: DateTime<Utc>) -> Result<Dispute, DisputeError> {
        let admin_id = require_admin(&actor, "begin review")?;
        let (dispute, ()) = self.store.update_dispute(id, |d| d.begin_review(admin_id, now))?;
        tracing::info!(dispute_id = %id, admin_id = %admin_id, "dispute under review");
        Ok(dispute)
    }

    /// Set or move the passive response deadline. Admin only.
    pub fn set_response_deadline(
        &self,
        id: &DisputeId,
        actor: Actor,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Dispute, DisputeError> {
        require_admin(&actor, "set response deadline")?;
        let (dispute, ()) = self
            .store
            .update_dispute(id, |d| d.set_response_deadline(actor, deadline, now))?;
        let waiting_on = dispute.party_id(dispute.filed_by.counterpart());
        self.notify(Notification::for_dispute(
            waiting_on,
            dispute.id,
            format!("Response due on dispute #{}", dispute.number),
            format!("Please respond by {}", deadline.to_rfc3339()),
            Priority::High,
            now,
        ));
        Ok(dispute)
    }

    /// Close a dispute without resolution and refund held funds to the
    /// client. Parties and admins may close.
    pub fn close_dispute(
        &self,
        id: &DisputeId,
        actor: Actor,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<Dispute, DisputeError> {
        let current = self.get_dispute(id)?;
        current.require_active()?;
        if let Actor::User(user) = actor {
            current.require_party(&user)?;
        }
        // Escrow moves only once the closure itself is known to be valid.
        current.clone().close(actor, reason.clone(), now)?;
        if current.escrow_frozen {
            self.escrow.refund(RefundRequest {
                dispute_id: current.id,
                reference: format!("close:{}", current.id),
                at: now,
            })?;
        }
        let (dispute, ()) = self.store.update_dispute(id, |d| d.close(actor, reason, now))?;
        tracing::info!(dispute_id = %id, "dispute closed");
        self.notify_parties(&dispute, "closed", "The dispute was closed", Priority::Normal, now);
        Ok(dispute)
    }

    // ── Resolution ─────────────────────────────────────────────────────

    /// Put terms on the table. Parties propose as themselves; admins and the
    /// system propose as the platform.
    pub fn propose_resolution(
        &self,
        dispute_id: &DisputeId,
        actor: Actor,
        terms: ResolutionTerms,
        now: DateTime<Utc>,
    ) -> Result<ProposalOpened, DisputeError> {
        let current = self.get_dispute(dispute_id)?;
        let (proposed_by, proposer_id) = match actor {
            Actor::User(user) => (Proposer::from(current.require_party(&user)?), Some(user)),
            Actor::Admin(admin) => (Proposer::Platform, Some(admin)),
            Actor::System => (Proposer::Platform, None),
        };
        let proposal = Proposal::new(&current, proposed_by, proposer_id, terms, now)?;
        current.clone().open_resolution(actor, proposal.id, now)?;
        // A dispute in Resolution always has a stored proposal.
        let superseded = self.store.insert_proposal(proposal.clone())?;
        let (dispute, ()) = self
            .store
            .update_dispute(dispute_id, |d| d.open_resolution(actor, proposal.id, now))?;

        tracing::info!(
            dispute_id = %dispute_id,
            proposal_id = %proposal.id,
            superseded = superseded.len(),
            "resolution proposed"
        );
        for role in [PartyRole::Client, PartyRole::Professional] {
            let recipient = dispute.party_id(role);
            if Some(recipient) != proposer_id {
                self.notify(Notification::for_dispute(
                    recipient,
                    dispute.id,
                    format!("Resolution proposed on dispute #{}", dispute.number),
                    proposal.terms.summary.clone(),
                    Priority::High,
                    now,
                ));
            }
        }
        Ok(ProposalOpened {
            proposal,
            superseded,
            dispute,
        })
    }

    /// Record a party's answer; finalize when both have accepted.
    ///
    /// Repeating an answer already on record is accepted and retries a
    /// finalization that previously failed.
    pub fn respond_to_proposal(
        &self,
        proposal_id: &ProposalId,
        user: UserId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<ProposalResponse, DisputeError> {
        let proposal = self.get_proposal(proposal_id)?;
        let current = self.get_dispute(&proposal.dispute_id)?;
        let role = current.require_party(&user)?;

        if current.is_terminal() {
            let resolved_by_this = matches!(
                current.resolution.as_ref().map(|r| r.kind),
                Some(ResolutionKind::Mutual { proposal_id: id }) if id == proposal.id
            );
            if resolved_by_this && proposal.decision(role) == PartyDecision::from(decision) {
                return Ok(ProposalResponse {
                    proposal,
                    dispute: current,
                    finalized: true,
                });
            }
            current.require_active()?;
        }

        let (proposal, changed) = self
            .store
            .update_proposal(proposal_id, |p| p.record(role, decision, now))?;
        tracing::info!(
            proposal_id = %proposal_id,
            party = %role,
            decision = ?decision,
            status = proposal.status().as_str(),
            "proposal answered"
        );

        match proposal.status() {
            ProposalStatus::Accepted => {
                let resolution = Resolution {
                    kind: ResolutionKind::Mutual {
                        proposal_id: proposal.id,
                    },
                    summary: proposal.terms.summary.clone(),
                };
                let allocations = proposal.allocations(&current);
                let dispute = self.settle(&current, proposal.id.to_string(), allocations, resolution, now)?;
                Ok(ProposalResponse {
                    proposal,
                    dispute,
                    finalized: true,
                })
            }
            status => {
                let (dispute, ()) = self
                    .store
                    .update_dispute(&proposal.dispute_id, |d| d.record_activity(now))?;
                if changed {
                    if status == ProposalStatus::Rejected {
                        self.notify_parties(
                            &dispute,
                            "proposal rejected",
                            &format!("The {role} rejected the proposed resolution"),
                            Priority::Normal,
                            now,
                        );
                    } else {
                        self.notify(Notification::for_dispute(
                            dispute.party_id(role.counterpart()),
                            dispute.id,
                            format!("Dispute #{} awaits your answer", dispute.number),
                            format!("The {role} accepted the proposed resolution"),
                            Priority::High,
                            now,
                        ));
                    }
                }
                Ok(ProposalResponse {
                    proposal,
                    dispute,
                    finalized: false,
                })
            }
        }
    }

    /// Resolve a dispute regardless of party answers. Admin only.
    pub fn force_resolve(
        &self,
        dispute_id: &DisputeId,
        actor: Actor,
        decision: ForcedDecision,
        now: DateTime<Utc>,
    ) -> Result<Dispute, DisputeError> {
        let admin_id = require_admin(&actor, "force resolve")?;
        let current = self.get_dispute(dispute_id)?;
        current.require_active()?;
        let terms = ResolutionTerms {
            summary: decision.summary,
            client_share: decision.client_share,
            professional_share: decision.professional_share,
        }
        .normalize(current.disputed_amount.as_ref())?;

        let allocations = terms.allocations(&current);
        let resolution = Resolution {
            kind: ResolutionKind::AdminForced { admin_id },
            summary: terms.summary,
        };
        let dispute = self.settle(&current, format!("force:{}", current.id), allocations, resolution, now)?;
        tracing::warn!(dispute_id = %dispute_id, admin_id = %admin_id, "dispute force-resolved");
        Ok(dispute)
    }

    fn settle(
        &self,
        current: &Dispute,
        reference: String,
        allocations: Vec<Allocation>,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Result<Dispute, DisputeError> {
        if current.escrow_frozen {
            let receipt = self.escrow.release(ReleaseRequest {
                dispute_id: current.id,
                job_id: current.job_id,
                reference,
                allocations,
                at: now,
            })?;
            tracing::info!(
                dispute_id = %current.id,
                reference = %receipt.reference,
                transfers = receipt.transfers.len(),
                "escrow released"
            );
        }
        let (dispute, ()) = self
            .store
            .update_dispute(&current.id, |d| d.resolve(resolution, now))?;
        tracing::info!(dispute_id = %dispute.id, number = dispute.number, "dispute resolved");
        let summary = dispute
            .resolution
            .as_ref()
            .map(|r| r.summary.clone())
            .unwrap_or_default();
        self.notify_parties(&dispute, "resolved", &summary, Priority::High, now);
        Ok(dispute)
    }

    // ── Escalation ─────────────────────────────────────────────────────

    /// Run the escalation evaluator over every dispute at `now`.
    ///
    /// A failure to escalate one dispute is logged and counted; the run
    /// continues with the next dispute.
    ///
    /// # Errors
    ///
    /// Fails only when the candidate set cannot be read.
    pub fn run_escalation(&self, now: DateTime<Utc>) -> Result<RunReport, DisputeError> {
        let disputes = self.store.list_disputes()?;
        let warnings = self.store.early_warnings()?;
        let mut report = RunReport::new(now);

        for dispute in &disputes {
            let active: Vec<EarlyWarning> = warnings
                .iter()
                .filter(|w| w.dispute_id == dispute.id && w.is_active())
                .cloned()
                .collect();
            if dispute.is_terminal() {
                self.apply_warnings(&mut report, dispute.id, &active, &[], now);
                continue;
            }

            report.scanned += 1;
            let check = escalation::evaluate(dispute, now, &self.policy);
            if check.should_escalate() {
                match self.store.escalate(&dispute.id, &check.reasons, now, self.policy.cooldown) {
                    Ok(outcome) => {
                        report.escalated += 1;
                        if outcome.raised() {
                            report.level_changes += 1;
                            self.notify_escalation(dispute, outcome.current, &check.reasons, now);
                        }
                        tracing::info!(
                            dispute_id = %dispute.id,
                            level = outcome.current.value(),
                            raised = outcome.raised(),
                            "dispute escalated"
                        );
                        report.outcomes.push(outcome);
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(dispute_id = %dispute.id, error = %e, "escalation failed, continuing");
                        continue;
                    }
                }
            }

            let wanted = early_warning::assess(dispute, now, &self.policy, check.should_escalate());
            self.apply_warnings(&mut report, dispute.id, &active, &wanted, now);
        }

        tracing::info!(
            scanned = report.scanned,
            escalated = report.escalated,
            level_changes = report.level_changes,
            failed = report.failed,
            "escalation run complete"
        );
        Ok(report)
    }

    fn apply_warnings(
        &self,
        report: &mut RunReport,
        dispute_id: DisputeId,
        active: &[EarlyWarning],
        wanted: &[(early_warning::EarlyWarningKind, String)],
        now: DateTime<Utc>,
    ) {
        for change in early_warning::reconcile(dispute_id, active, wanted, now) {
            match self.store.upsert_early_warning(change.clone()) {
                Ok(()) => {
                    if change.is_active() {
                        report.warnings_raised += 1;
                    } else {
                        report.warnings_cleared += 1;
                    }
                    report.warning_changes.push(change);
                }
                Err(e) => {
                    tracing::warn!(dispute_id = %dispute_id, error = %e, "early warning update failed");
                }
            }
        }
    }

    // ── Notifications ──────────────────────────────────────────────────

    fn notify(&self, notification: Notification) {
        let recipient = notification.recipient;
        if let Err(e) = self.outbox.enqueue(notification) {
            tracing::warn!(recipient = %recipient, error = %e, "notification dropped");
        }
    }

    fn notify_parties(&self, dispute: &Dispute, what: &str, description: &str, priority: Priority, now: DateTime<Utc>) {
        for role in [PartyRole::Client, PartyRole::Professional] {
            self.notify(Notification::for_dispute(
                dispute.party_id(role),
                dispute.id,
                format!("Dispute #{} {what}", dispute.number),
                description,
                priority,
                now,
            ));
        }
    }

    fn notify_escalation(
        &self,
        dispute: &Dispute,
        level: EscalationLevel,
        reasons: &[escalation::EscalationReason],
        now: DateTime<Utc>,
    ) {
        let priority = if level.is_max() { Priority::Urgent } else { Priority::High };
        let description = reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        self.notify_parties(
            dispute,
            &format!("escalated to level {level}"),
            &description,
            priority,
            now,
        );
    }
}

fn require_admin(actor: &Actor, operation: &str) -> Result<UserId, DisputeError> {
    match actor {
        Actor::Admin(id) => Ok(*id),
        _ => Err(DisputeError::Forbidden(format!("{operation} requires the admin role"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispute::tests::{filing, t0};
    use crate::dispute::{Stage, WorkflowState};
    use crate::error::StoreError;
    use crate::escrow::{EscrowError, EscrowLedger, EscrowStatus, ReleaseReceipt};
    use crate::outbox::MemoryOutbox;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    type Service = DisputeService<MemoryStore, EscrowLedger, MemoryOutbox>;

    fn service() -> Service {
        DisputeService::new(MemoryStore::new(), EscrowLedger::new(), MemoryOutbox::default())
    }

    fn usd(amount: &str) -> Money {
        Money::new(amount, "USD").unwrap()
    }

    fn split_terms(client: &str) -> ResolutionTerms {
        ResolutionTerms {
            summary: "Partial refund".to_string(),
            client_share: Some(usd(client)),
            professional_share: None,
        }
    }

    #[test]
    fn filing_holds_escrow_and_notifies_counterpart() {
        let svc = service();
        let d = svc.file_dispute(filing(Some("400")), t0()).unwrap();
        assert_eq!(d.number, 1);
        let account = svc.escrow().account(&d.id).unwrap();
        assert_eq!(account.status, EscrowStatus::Funded);
        let inbox = svc.outbox().drain_for(&d.professional_id);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].link, format!("/disputes/{}", d.id));
    }

    #[test]
    fn end_to_end_inactivity_then_mutual_resolution() {
        let svc = service();
        let d = svc.file_dispute(filing(Some("400")), t0()).unwrap();
        assert_eq!(d.stage().number(), 1);
        assert_eq!(d.escalation_level.value(), 0);

        let later = t0() + Duration::hours(50);
        let report = svc.run_escalation(later).unwrap();
        assert_eq!((report.scanned, report.escalated, report.level_changes), (1, 1, 1));
        let d = svc.get_dispute(&d.id).unwrap();
        assert_eq!(d.escalation_level.value(), 1);
        assert_eq!(d.escalation_reasons[0].reason.to_string(), "Inactive for 50 hours");

        let opened = svc
            .propose_resolution(&d.id, Actor::Admin(UserId::new()), split_terms("100"), later)
            .unwrap();
        assert_eq!(opened.dispute.stage(), Stage::Resolution);

        let first = svc
            .respond_to_proposal(&opened.proposal.id, d.client_id, Decision::Accept, later)
            .unwrap();
        assert!(!first.finalized);
        assert_eq!(first.dispute.workflow_state(), WorkflowState::InProgress);

        let second = svc
            .respond_to_proposal(&opened.proposal.id, d.professional_id, Decision::Accept, later)
            .unwrap();
        assert!(second.finalized);
        assert_eq!(second.dispute.workflow_state(), WorkflowState::Resolved);
        assert_eq!(second.dispute.stage().number(), 5);
        assert_eq!(second.dispute.resolved_at(), Some(later));
        assert!(!second.dispute.escrow_frozen);

        let account = svc.escrow().account(&d.id).unwrap();
        assert_eq!(account.status, EscrowStatus::FullyReleased);
    }

    #[test]
    fn repeated_runs_do_not_raise_level_twice() {
        let svc = service();
        let d = svc.file_dispute(filing(None), t0()).unwrap();
        let later = t0() + Duration::hours(50);
        svc.run_escalation(later).unwrap();
        let again = svc.run_escalation(later).unwrap();
        assert_eq!((again.escalated, again.level_changes), (1, 0));
        let d = svc.get_dispute(&d.id).unwrap();
        assert_eq!(d.escalation_level.value(), 1);
        assert_eq!(d.escalation_reasons.len(), 2);
    }

    #[test]
    fn rejection_keeps_dispute_open_for_new_proposal() {
        let svc = service();
        let d = svc.file_dispute(filing(None), t0()).unwrap();
        let opened = svc
            .propose_resolution(&d.id, Actor::User(d.client_id), ResolutionTerms::summary("Redo work"), t0())
            .unwrap();
        assert_eq!(opened.proposal.proposed_by, Proposer::Client);
        let answer = svc
            .respond_to_proposal(&opened.proposal.id, d.professional_id, Decision::Reject, t0())
            .unwrap();
        assert!(!answer.finalized);
        assert!(!answer.dispute.is_terminal());

        let next = svc
            .propose_resolution(&d.id, Actor::User(d.professional_id), ResolutionTerms::summary("Discount"), t0())
            .unwrap();
        assert!(next.superseded.is_empty(), "rejected proposals are not superseded");
    }

    #[test]
    fn outsider_cannot_answer_proposal() {
        let svc = service();
        let d = svc.file_dispute(filing(None), t0()).unwrap();
        let opened = svc
            .propose_resolution(&d.id, Actor::System, ResolutionTerms::summary("x"), t0())
            .unwrap();
        assert!(matches!(
            svc.respond_to_proposal(&opened.proposal.id, UserId::new(), Decision::Accept, t0()),
            Err(DisputeError::NotAParty { .. })
        ));
    }

    #[test]
    fn force_resolve_requires_admin_and_counts_separately() {
        let svc = service();
        let d = svc.file_dispute(filing(Some("400")), t0()).unwrap();
        let decision = ForcedDecision {
            summary: "Full refund".to_string(),
            client_share: Some(usd("400")),
            professional_share: None,
        };
        assert!(matches!(
            svc.force_resolve(&d.id, Actor::User(d.client_id), decision.clone(), t0()),
            Err(DisputeError::Forbidden(_))
        ));

        let resolved = svc
            .force_resolve(&d.id, Actor::Admin(UserId::new()), decision, t0() + Duration::hours(6))
            .unwrap();
        assert_eq!(resolved.workflow_state(), WorkflowState::Resolved);
        assert_eq!(resolved.stage().number(), 5);
        assert!(!resolved.escrow_frozen);

        let kpis = svc.analytics().unwrap();
        assert_eq!(kpis.admin_forced, 1);
        assert_eq!(kpis.resolved, 0);
        assert_eq!(kpis.average_resolution_hours, Some(6.0));
    }

    #[test]
    fn resolved_dispute_rejects_further_answers_and_escalation() {
        let svc = service();
        let d = svc.file_dispute(filing(None), t0()).unwrap();
        let opened = svc
            .propose_resolution(&d.id, Actor::System, ResolutionTerms::summary("x"), t0())
            .unwrap();
        svc.force_resolve(
            &d.id,
            Actor::Admin(UserId::new()),
            ForcedDecision {
                summary: "closed out".to_string(),
                client_share: None,
                professional_share: None,
            },
            t0(),
        )
        .unwrap();

        assert!(matches!(
            svc.respond_to_proposal(&opened.proposal.id, d.client_id, Decision::Accept, t0()),
            Err(DisputeError::TerminalState { .. })
        ));
        let proposal = svc.get_proposal(&opened.proposal.id).unwrap();
        assert_eq!(proposal.client_decision, PartyDecision::Pending);

        let report = svc.run_escalation(t0() + Duration::days(10)).unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(svc.get_dispute(&d.id).unwrap().escalation_level.value(), 0);
    }

    #[test]
    fn close_refunds_client() {
        let svc = service();
        let d = svc.file_dispute(filing(Some("250")), t0()).unwrap();
        let closed = svc
            .close_dispute(&d.id, Actor::User(d.client_id), "Sorted out directly".to_string(), t0())
            .unwrap();
        assert_eq!(closed.workflow_state(), WorkflowState::Closed);
        assert_eq!(svc.escrow().account(&d.id).unwrap().status, EscrowStatus::Refunded);
    }

    #[test]
    fn blank_close_reason_leaves_escrow_held() {
        let svc = service();
        let d = svc.file_dispute(filing(Some("250")), t0()).unwrap();
        let err = svc
            .close_dispute(&d.id, Actor::User(d.client_id), "   ".to_string(), t0())
            .unwrap_err();
        assert!(matches!(err, DisputeError::Validation(_)));

        let still = svc.get_dispute(&d.id).unwrap();
        assert!(!still.is_terminal());
        assert!(still.escrow_frozen);
        assert_eq!(svc.escrow().account(&d.id).unwrap().status, EscrowStatus::Funded);

        // The held funds can still be split by agreement.
        let opened = svc
            .propose_resolution(&d.id, Actor::System, split_terms("100"), t0())
            .unwrap();
        svc.respond_to_proposal(&opened.proposal.id, d.client_id, Decision::Accept, t0())
            .unwrap();
        let done = svc
            .respond_to_proposal(&opened.proposal.id, d.professional_id, Decision::Accept, t0())
            .unwrap();
        assert!(done.finalized);
    }

    #[test]
    fn review_is_admin_only() {
        let svc = service();
        let d = svc.file_dispute(filing(None), t0()).unwrap();
        assert!(matches!(
            svc.begin_review(&d.id, Actor::User(d.client_id), t0()),
            Err(DisputeError::Forbidden(_))
        ));
        let reviewed = svc.begin_review(&d.id, Actor::Admin(UserId::new()), t0()).unwrap();
        assert_eq!(reviewed.stage(), Stage::UnderReview);
    }

    #[test]
    fn early_warning_raised_then_cleared_on_escalation() {
        let svc = service();
        svc.file_dispute(filing(None), t0()).unwrap();

        let warned = svc.run_escalation(t0() + Duration::hours(30)).unwrap();
        assert_eq!(warned.warnings_raised, 1);
        assert_eq!(svc.active_early_warnings().unwrap().len(), 1);

        let escalated = svc.run_escalation(t0() + Duration::hours(50)).unwrap();
        assert_eq!(escalated.warnings_cleared, 1);
        assert!(svc.active_early_warnings().unwrap().is_empty());
    }

    // -- Failure injection ----------------------------------------------------

    /// Escrow that fails releases until switched back on.
    #[derive(Clone)]
    struct FlakyEscrow {
        inner: EscrowLedger,
        down: Arc<AtomicBool>,
    }

    impl EscrowGateway for FlakyEscrow {
        fn hold(&self, request: HoldRequest) -> Result<(), EscrowError> {
            self.inner.hold(request)
        }

        fn release(&self, request: ReleaseRequest) -> Result<ReleaseReceipt, EscrowError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(EscrowError::Unavailable("payment provider timeout".into()));
            }
            self.inner.release(request)
        }

        fn refund(&self, request: RefundRequest) -> Result<ReleaseReceipt, EscrowError> {
            self.inner.refund(request)
        }
    }

    #[test]
    fn release_failure_surfaces_and_retry_finalizes() {
        let escrow = FlakyEscrow {
            inner: EscrowLedger::new(),
            down: Arc::new(AtomicBool::new(false)),
        };
        let svc = DisputeService::new(MemoryStore::new(), escrow.clone(), MemoryOutbox::default());
        let d = svc.file_dispute(filing(Some("400")), t0()).unwrap();
        let opened = svc
            .propose_resolution(&d.id, Actor::System, split_terms("200"), t0())
            .unwrap();
        svc.respond_to_proposal(&opened.proposal.id, d.client_id, Decision::Accept, t0())
            .unwrap();

        escrow.down.store(true, Ordering::SeqCst);
        let err = svc
            .respond_to_proposal(&opened.proposal.id, d.professional_id, Decision::Accept, t0())
            .unwrap_err();
        assert!(matches!(err, DisputeError::Escrow(EscrowError::Unavailable(_))));
        let still = svc.get_dispute(&d.id).unwrap();
        assert!(!still.is_terminal());
        assert!(still.escrow_frozen);

        escrow.down.store(false, Ordering::SeqCst);
        let retried = svc
            .respond_to_proposal(&opened.proposal.id, d.professional_id, Decision::Accept, t0())
            .unwrap();
        assert!(retried.finalized);
        assert_eq!(retried.dispute.workflow_state(), WorkflowState::Resolved);

        let replay = svc
            .respond_to_proposal(&opened.proposal.id, d.professional_id, Decision::Accept, t0())
            .unwrap();
        assert!(replay.finalized);
    }

    /// Store whose escalate fails for one dispute.
    #[derive(Clone)]
    struct FailingEscalate {
        inner: MemoryStore,
        broken: DisputeId,
    }

    impl DisputeStore for FailingEscalate {
        fn insert_dispute(&self, dispute: Dispute) -> Result<Dispute, DisputeError> {
            self.inner.insert_dispute(dispute)
        }
        fn get_dispute(&self, id: &DisputeId) -> Result<Option<Dispute>, DisputeError> {
            self.inner.get_dispute(id)
        }
        fn list_disputes(&self) -> Result<Vec<Dispute>, DisputeError> {
            self.inner.list_disputes()
        }
        fn update_dispute<R>(
            &self,
            id: &DisputeId,
            f: impl FnOnce(&mut Dispute) -> Result<R, DisputeError>,
        ) -> Result<(Dispute, R), DisputeError> {
            self.inner.update_dispute(id, f)
        }
        fn escalate(
            &self,
            id: &DisputeId,
            reasons: &[escalation::EscalationReason],
            now: DateTime<Utc>,
            cooldown: chrono::Duration,
        ) -> Result<crate::dispute::EscalationOutcome, DisputeError> {
            if *id == self.broken {
                return Err(StoreError::Unavailable("connection reset".into()).into());
            }
            self.inner.escalate(id, reasons, now, cooldown)
        }
        fn insert_proposal(&self, proposal: Proposal) -> Result<Vec<Proposal>, DisputeError> {
            self.inner.insert_proposal(proposal)
        }
        fn get_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, DisputeError> {
            self.inner.get_proposal(id)
        }
        fn proposals_for(&self, dispute_id: &DisputeId) -> Result<Vec<Proposal>, DisputeError> {
            self.inner.proposals_for(dispute_id)
        }
        fn update_proposal<R>(
            &self,
            id: &ProposalId,
            f: impl FnOnce(&mut Proposal) -> Result<R, DisputeError>,
        ) -> Result<(Proposal, R), DisputeError> {
            self.inner.update_proposal(id, f)
        }
        fn early_warnings(&self) -> Result<Vec<EarlyWarning>, DisputeError> {
            self.inner.early_warnings()
        }
        fn upsert_early_warning(&self, warning: EarlyWarning) -> Result<(), DisputeError> {
            self.inner.upsert_early_warning(warning)
        }
    }

    #[test]
    fn one_failing_dispute_does_not_abort_batch() {
        let inner = MemoryStore::new();
        let seed = DisputeService::new(inner.clone(), EscrowLedger::new(), MemoryOutbox::default());
        let broken = seed.file_dispute(filing(None), t0()).unwrap();
        let healthy = seed.file_dispute(filing(None), t0()).unwrap();

        let svc = DisputeService::new(
            FailingEscalate {
                inner,
                broken: broken.id,
            },
            EscrowLedger::new(),
            MemoryOutbox::default(),
        );
        let report = svc.run_escalation(t0() + Duration::hours(60)).unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.escalated, 1);
        assert_eq!(svc.get_dispute(&healthy.id).unwrap().escalation_level.value(), 1);
        assert_eq!(svc.get_dispute(&broken.id).unwrap().escalation_level.value(), 0);
    }

    /// Store whose proposal writes always fail.
    #[derive(Clone)]
    struct FailingProposalInsert {
        inner: MemoryStore,
    }

    impl DisputeStore for FailingProposalInsert {
        fn insert_dispute(&self, dispute: Dispute) -> Result<Dispute, DisputeError> {
            self.inner.insert_dispute(dispute)
        }
        fn get_dispute(&self, id: &DisputeId) -> Result<Option<Dispute>, DisputeError> {
            self.inner.get_dispute(id)
        }
        fn list_disputes(&self) -> Result<Vec<Dispute>, DisputeError> {
            self.inner.list_disputes()
        }
        fn update_dispute<R>(
            &self,
            id: &DisputeId,
            f: impl FnOnce(&mut Dispute) -> Result<R, DisputeError>,
        ) -> Result<(Dispute, R), DisputeError> {
            self.inner.update_dispute(id, f)
        }
        fn escalate(
            &self,
            id: &DisputeId,
            reasons: &[escalation::EscalationReason],
            now: DateTime<Utc>,
            cooldown: chrono::Duration,
        ) -> Result<crate::dispute::EscalationOutcome, DisputeError> {
            self.inner.escalate(id, reasons, now, cooldown)
        }
        fn insert_proposal(&self, _proposal: Proposal) -> Result<Vec<Proposal>, DisputeError> {
            Err(StoreError::Unavailable("disk full".into()).into())
        }
        fn get_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, DisputeError> {
            self.inner.get_proposal(id)
        }
        fn proposals_for(&self, dispute_id: &DisputeId) -> Result<Vec<Proposal>, DisputeError> {
            self.inner.proposals_for(dispute_id)
        }
        fn update_proposal<R>(
            &self,
            id: &ProposalId,
            f: impl FnOnce(&mut Proposal) -> Result<R, DisputeError>,
        ) -> Result<(Proposal, R), DisputeError> {
            self.inner.update_proposal(id, f)
        }
        fn early_warnings(&self) -> Result<Vec<EarlyWarning>, DisputeError> {
            self.inner.early_warnings()
        }
        fn upsert_early_warning(&self, warning: EarlyWarning) -> Result<(), DisputeError> {
            self.inner.upsert_early_warning(warning)
        }
    }

    #[test]
    fn failed_proposal_write_keeps_dispute_in_place() {
        let svc = DisputeService::new(
            FailingProposalInsert {
                inner: MemoryStore::new(),
            },
            EscrowLedger::new(),
            MemoryOutbox::default(),
        );
        let d = svc.file_dispute(filing(Some("400")), t0()).unwrap();
        let err = svc
            .propose_resolution(&d.id, Actor::System, split_terms("200"), t0())
            .unwrap_err();
        assert!(matches!(err, DisputeError::Store(StoreError::Unavailable(_))));

        let still = svc.get_dispute(&d.id).unwrap();
        assert_eq!(still.stage(), Stage::IssueRaised);
        assert!(still
            .timeline
            .iter()
            .all(|e| !matches!(e.event, crate::dispute::TimelineEvent::ProposalOpened { .. })));
        assert!(svc.proposals_for(&d.id).unwrap().is_empty());
    }
}
