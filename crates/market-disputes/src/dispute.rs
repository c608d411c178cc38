//! # Dispute Record & Lifecycle
//!
//! A dispute ties one job to one client and one professional and moves
//! through five stages:
//!
//! ```text
//! IssueRaised(1) ──▶ EvidenceGathering(2) ──▶ UnderReview(3) ──▶ Resolution(4) ──▶ Resolved(5)
//!      │                     │                      │                  │
//!      └─────────────────────┴───────── close() ────┴──────────────────┴──▶ Closed(stage frozen)
//! ```
//!
//! ## Single Source of Lifecycle Truth
//!
//! The coarse workflow state (`open`, `in_progress`, `resolved`, `closed`)
//! and the numeric stage are both projections of one [`Phase`] value.
//! [`Dispute::transition`] is the only place the phase changes, so the two
//! can never disagree: `Resolved` always reports stage 5 and carries its
//! resolution time, and a stage can never decrease.
//!
//! ## Terminal States
//!
//! `Resolved` and `Closed` reject every further mutation, including
//! escalation, with [`DisputeError::TerminalState`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use market_core::{DisputeId, JobId, Money, ProposalId, UserId, ValidationError};

use crate::error::DisputeError;
use crate::escalation::EscalationReason;

// ── Parties & Actors ───────────────────────────────────────────────────

/// Which side of the job a party is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    /// The party who hired the professional.
    Client,
    /// The party who performed the work.
    Professional,
}

impl PartyRole {
    /// The canonical string name of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Professional => "professional",
        }
    }

    /// The other side of the dispute.
    pub fn counterpart(&self) -> PartyRole {
        match self {
            Self::Client => Self::Professional,
            Self::Professional => Self::Client,
        }
    }
}

impl std::fmt::Display for PartyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who performed an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Actor {
    /// An authenticated marketplace user acting for themselves.
    User(UserId),
    /// An administrator acting with platform authority.
    Admin(UserId),
    /// The platform itself (scheduled jobs).
    System,
}

impl Actor {
    /// The acting user, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) | Self::Admin(id) => Some(*id),
            Self::System => None,
        }
    }

    /// Whether the actor carries administrative authority.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin(_))
    }
}

// ── Workflow State & Stage ─────────────────────────────────────────────

/// Coarse status of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Filed, nobody has engaged yet.
    Open,
    /// Evidence, review or resolution under way.
    InProgress,
    /// Settled by mutual acceptance or administrative override. Terminal.
    Resolved,
    /// Withdrawn or administratively closed without resolution. Terminal.
    Closed,
}

impl WorkflowState {
    /// The canonical string name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Whether the evaluator should scan disputes in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the five fixed lifecycle stages.
///
/// Declaration order is numeric order, so `Ord` compares stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// 1: the dispute was filed.
    IssueRaised,
    /// 2: parties are submitting evidence.
    EvidenceGathering,
    /// 3: the platform is reviewing the case.
    UnderReview,
    /// 4: a resolution has been proposed.
    Resolution,
    /// 5: the dispute is resolved.
    Completed,
}

impl Stage {
    /// The stage number, 1 through 5.
    pub fn number(&self) -> u8 {
        match self {
            Self::IssueRaised => 1,
            Self::EvidenceGathering => 2,
            Self::UnderReview => 3,
            Self::Resolution => 4,
            Self::Completed => 5,
        }
    }

    /// Human-readable label for progress trackers.
    pub fn label(&self) -> &'static str {
        match self {
            Self::IssueRaised => "Issue Raised",
            Self::EvidenceGathering => "Evidence Gathering",
            Self::UnderReview => "Under Review",
            Self::Resolution => "Resolution",
            Self::Completed => "Completed",
        }
    }
}

/// The lifecycle phase: one variant per combination of workflow state and
/// stage that may legally exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// Open, stage 1.
    IssueRaised,
    /// In progress, stage 2.
    EvidenceGathering,
    /// In progress, stage 3.
    UnderReview,
    /// In progress, stage 4.
    Resolution,
    /// Resolved, stage 5.
    Resolved {
        /// When the resolution was finalized.
        resolved_at: DateTime<Utc>,
    },
    /// Closed; the stage reached before closure is frozen.
    Closed {
        /// The stage the dispute had reached when it was closed.
        at_stage: Stage,
        /// When the dispute was closed.
        closed_at: DateTime<Utc>,
    },
}

impl Phase {
    /// The canonical string name of this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssueRaised => "issue_raised",
            Self::EvidenceGathering => "evidence_gathering",
            Self::UnderReview => "under_review",
            Self::Resolution => "resolution",
            Self::Resolved { .. } => "resolved",
            Self::Closed { .. } => "closed",
        }
    }

    /// Stage projection.
    pub fn stage(&self) -> Stage {
        match self {
            Self::IssueRaised => Stage::IssueRaised,
            Self::EvidenceGathering => Stage::EvidenceGathering,
            Self::UnderReview => Stage::UnderReview,
            Self::Resolution => Stage::Resolution,
            Self::Resolved { .. } => Stage::Completed,
            Self::Closed { at_stage, .. } => *at_stage,
        }
    }

    /// Workflow state projection.
    pub fn workflow_state(&self) -> WorkflowState {
        match self {
            Self::IssueRaised => WorkflowState::Open,
            Self::EvidenceGathering | Self::UnderReview | Self::Resolution => {
                WorkflowState::InProgress
            }
            Self::Resolved { .. } => WorkflowState::Resolved,
            Self::Closed { .. } => WorkflowState::Closed,
        }
    }

    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved { .. } | Self::Closed { .. })
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Escalation Level ───────────────────────────────────────────────────

/// Severity marker raised when a dispute stalls. Capped at
/// [`EscalationLevel::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct EscalationLevel(u8);

impl EscalationLevel {
    /// Highest escalation level.
    pub const MAX: u8 = 3;

    /// Level 0: not escalated.
    pub fn none() -> Self {
        Self(0)
    }

    /// The numeric level.
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Whether the level is at its cap.
    pub fn is_max(&self) -> bool {
        self.0 >= Self::MAX
    }

    /// The next level up, saturating at the cap.
    pub fn raised(&self) -> Self {
        Self((self.0 + 1).min(Self::MAX))
    }
}

impl TryFrom<u8> for EscalationLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > Self::MAX {
            return Err(format!(
                "escalation level {value} exceeds maximum {}",
                Self::MAX
            ));
        }
        Ok(Self(value))
    }
}

impl From<EscalationLevel> for u8 {
    fn from(level: EscalationLevel) -> Self {
        level.0
    }
}

impl std::fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One accumulated escalation reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationEntry {
    /// When the evaluator recorded the reason.
    pub at: DateTime<Utc>,
    /// The level after this escalation was applied.
    pub level: EscalationLevel,
    /// Why the dispute was escalated.
    pub reason: EscalationReason,
}

/// Result of applying an escalation to one dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationOutcome {
    /// The escalated dispute.
    pub dispute_id: DisputeId,
    /// Level before the escalation.
    pub previous: EscalationLevel,
    /// Level after the escalation.
    pub current: EscalationLevel,
    /// How many reasons were appended to the audit list.
    pub reasons_recorded: usize,
}

impl EscalationOutcome {
    /// Whether the level actually moved.
    pub fn raised(&self) -> bool {
        self.current > self.previous
    }
}

// ── Resolution ─────────────────────────────────────────────────────────

/// How a dispute reached `Resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionKind {
    /// Both parties accepted a proposal.
    Mutual {
        /// The accepted proposal.
        proposal_id: ProposalId,
    },
    /// An administrator overrode mutual acceptance.
    AdminForced {
        /// The administrator who forced the outcome.
        admin_id: UserId,
    },
}

impl ResolutionKind {
    /// Whether this resolution bypassed party acceptance.
    pub fn is_admin_forced(&self) -> bool {
        matches!(self, Self::AdminForced { .. })
    }
}

/// The recorded outcome of a resolved dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Mutual acceptance or admin override.
    pub kind: ResolutionKind,
    /// The agreed or imposed terms in prose.
    pub summary: String,
}

// ── Timeline ───────────────────────────────────────────────────────────

/// Something that happened to a dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineEvent {
    /// The dispute was filed.
    Filed,
    /// A party submitted evidence.
    EvidenceSubmitted {
        /// Short description of the evidence.
        summary: String,
    },
    /// A party responded on the dispute thread.
    Responded {
        /// The response text.
        message: String,
    },
    /// The lifecycle phase changed.
    PhaseChanged {
        /// Phase before the change.
        from: String,
        /// Phase after the change.
        to: String,
    },
    /// The passive response deadline was set or moved.
    DeadlineSet {
        /// The new deadline.
        deadline: DateTime<Utc>,
    },
    /// A resolution proposal was attached.
    ProposalOpened {
        /// The new proposal.
        proposal_id: ProposalId,
    },
    /// The dispute was closed without resolution.
    Closed {
        /// Why the dispute was closed.
        reason: String,
    },
}

/// An entry in the dispute's append-only timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Who did it.
    pub actor: Actor,
    /// What happened.
    pub event: TimelineEvent,
}

// ── Filing ─────────────────────────────────────────────────────────────

/// Everything needed to file a dispute against a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingRequest {
    /// The job/contract under dispute.
    pub job_id: JobId,
    /// The client on the job.
    pub client_id: UserId,
    /// The professional on the job.
    pub professional_id: UserId,
    /// The user filing; must be one of the two parties.
    pub filed_by: UserId,
    /// Free-form category label (e.g. "quality", "payment").
    pub category: String,
    /// Short title.
    pub title: String,
    /// Full description of the issue.
    pub description: String,
    /// Funds to hold in escrow pending the outcome.
    pub disputed_amount: Option<Money>,
    /// When the other party must respond by.
    pub response_deadline: Option<DateTime<Utc>>,
}

// ── The Dispute ────────────────────────────────────────────────────────

/// A formal disagreement between a client and a professional over one job.
///
/// Created via [`Dispute::file`] and mutated only through the methods
/// below, each of which rejects terminal disputes before touching any
/// field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// Unique dispute identifier.
    pub id: DisputeId,
    /// Sequential human-readable number, assigned by the store.
    pub number: u64,
    /// The job/contract under dispute.
    pub job_id: JobId,
    /// The client on the job.
    pub client_id: UserId,
    /// The professional on the job.
    pub professional_id: UserId,
    /// Which side filed.
    pub filed_by: PartyRole,
    /// Free-form category label.
    pub category: String,
    /// Short title.
    pub title: String,
    /// Full description.
    pub description: String,
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Current escalation level.
    pub escalation_level: EscalationLevel,
    /// Every escalation reason ever recorded, oldest first.
    pub escalation_reasons: Vec<EscalationEntry>,
    /// When the level last moved.
    pub last_escalated_at: Option<DateTime<Utc>>,
    /// When the dispute was filed.
    pub created_at: DateTime<Utc>,
    /// Last party or platform activity; `None` only for imported records.
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Passive deadline for the non-filing party's response.
    pub response_deadline: Option<DateTime<Utc>>,
    /// Whether funds are held pending resolution.
    pub escrow_frozen: bool,
    /// Amount held in escrow, if any.
    pub disputed_amount: Option<Money>,
    /// Outcome, present once resolved.
    pub resolution: Option<Resolution>,
    /// Why the dispute was closed, present once closed.
    pub closure_reason: Option<String>,
    /// Append-only history.
    pub timeline: Vec<TimelineEntry>,
}

impl Dispute {
    /// File a new dispute in [`Phase::IssueRaised`] at escalation level 0.
    ///
    /// # Errors
    ///
    /// Returns [`DisputeError::Validation`] for empty text fields and
    /// [`DisputeError::InvalidFiling`] when the parties are the same user
    /// or the filer is neither party.
    pub fn file(request: FilingRequest, now: DateTime<Utc>) -> Result<Self, DisputeError> {
        if request.title.trim().is_empty() {
            return Err(ValidationError::EmptyField("title").into());
        }
        if request.category.trim().is_empty() {
            return Err(ValidationError::EmptyField("category").into());
        }
        if request.client_id == request.professional_id {
            return Err(DisputeError::InvalidFiling(
                "client and professional must be different users".to_string(),
            ));
        }
        let filed_by = if request.filed_by == request.client_id {
            PartyRole::Client
        } else if request.filed_by == request.professional_id {
            PartyRole::Professional
        } else {
            return Err(DisputeError::InvalidFiling(format!(
                "filer {} is not a party to job {}",
                request.filed_by, request.job_id
            )));
        };

        let escrow_frozen = request
            .disputed_amount
            .as_ref()
            .is_some_and(|amount| !amount.is_zero());

        Ok(Self {
            id: DisputeId::new(),
            number: 0,
            job_id: request.job_id,
            client_id: request.client_id,
            professional_id: request.professional_id,
            filed_by,
            category: request.category.trim().to_string(),
            title: request.title.trim().to_string(),
            description: request.description,
            phase: Phase::IssueRaised,
            escalation_level: EscalationLevel::none(),
            escalation_reasons: Vec::new(),
            last_escalated_at: None,
            created_at: now,
            last_activity_at: Some(now),
            response_deadline: request.response_deadline,
            escrow_frozen,
            disputed_amount: request.disputed_amount,
            resolution: None,
            closure_reason: None,
            timeline: vec![TimelineEntry {
                at: now,
                actor: Actor::User(request.filed_by),
                event: TimelineEvent::Filed,
            }],
        })
    }

    /// Coarse workflow state.
    pub fn workflow_state(&self) -> WorkflowState {
        self.phase.workflow_state()
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.phase.stage()
    }

    /// When the dispute was resolved, if it was.
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        match self.phase {
            Phase::Resolved { resolved_at } => Some(resolved_at),
            _ => None,
        }
    }

    /// Whether the dispute accepts no further mutation.
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// The side `user` is on, if any.
    pub fn party_role(&self, user: &UserId) -> Option<PartyRole> {
        if *user == self.client_id {
            Some(PartyRole::Client)
        } else if *user == self.professional_id {
            Some(PartyRole::Professional)
        } else {
            None
        }
    }

    /// The user on the given side.
    pub fn party_id(&self, role: PartyRole) -> UserId {
        match role {
            PartyRole::Client => self.client_id,
            PartyRole::Professional => self.professional_id,
        }
    }

    /// Resolve `user` to a side or fail with [`DisputeError::NotAParty`].
    pub fn require_party(&self, user: &UserId) -> Result<PartyRole, DisputeError> {
        self.party_role(user).ok_or_else(|| DisputeError::NotAParty {
            dispute_id: self.id.to_string(),
            user_id: user.to_string(),
        })
    }

    /// Fail with [`DisputeError::TerminalState`] once resolved or closed.
    pub fn require_active(&self) -> Result<(), DisputeError> {
        if self.is_terminal() {
            return Err(DisputeError::TerminalState {
                dispute_id: self.id.to_string(),
                state: self.workflow_state().as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Record party evidence. Moves an `IssueRaised` dispute into
    /// `EvidenceGathering`; later phases stay where they are.
    pub fn submit_evidence(
        &mut self,
        user: UserId,
        summary: String,
        now: DateTime<Utc>,
    ) -> Result<PartyRole, DisputeError> {
        self.require_active()?;
        let role = self.require_party(&user)?;
        if summary.trim().is_empty() {
            return Err(ValidationError::EmptyField("summary").into());
        }
        let actor = Actor::User(user);
        self.advance(Phase::EvidenceGathering, actor, now)?;
        self.push(actor, TimelineEvent::EvidenceSubmitted { summary }, now);
        self.touch(now);
        Ok(role)
    }

    /// Record a party response. A response from the side that did not file
    /// satisfies the pending response deadline.
    pub fn respond(
        &mut self,
        user: UserId,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<PartyRole, DisputeError> {
        self.require_active()?;
        let role = self.require_party(&user)?;
        if message.trim().is_empty() {
            return Err(ValidationError::EmptyField("message").into());
        }
        let actor = Actor::User(user);
        self.advance(Phase::EvidenceGathering, actor, now)?;
        if role != self.filed_by {
            self.response_deadline = None;
        }
        self.push(actor, TimelineEvent::Responded { message }, now);
        self.touch(now);
        Ok(role)
    }

    /// Move the dispute under platform review.
    ///
    /// # Errors
    ///
    /// Returns [`DisputeError::InvalidTransition`] if the dispute is already
    /// under review or further along.
    pub fn begin_review(&mut self, admin_id: UserId, now: DateTime<Utc>) -> Result<(), DisputeError> {
        self.transition(Phase::UnderReview, Actor::Admin(admin_id), now)?;
        self.touch(now);
        Ok(())
    }

    /// Record that a proposal is on the table. Advances to the `Resolution`
    /// stage if the dispute is not there yet.
    pub fn open_resolution(
        &mut self,
        actor: Actor,
        proposal_id: ProposalId,
        now: DateTime<Utc>,
    ) -> Result<(), DisputeError> {
        self.require_active()?;
        self.advance(Phase::Resolution, actor, now)?;
        self.push(actor, TimelineEvent::ProposalOpened { proposal_id }, now);
        self.touch(now);
        Ok(())
    }

    /// Note party activity that has no other effect on the record, such as
    /// answering a proposal.
    pub fn record_activity(&mut self, now: DateTime<Utc>) -> Result<(), DisputeError> {
        self.require_active()?;
        self.touch(now);
        Ok(())
    }

    /// Set or move the passive response deadline.
    pub fn set_response_deadline(
        &mut self,
        actor: Actor,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), DisputeError> {
        self.require_active()?;
        self.response_deadline = Some(deadline);
        self.push(actor, TimelineEvent::DeadlineSet { deadline }, now);
        Ok(())
    }

    /// Apply an escalation.
    ///
    /// Every reason is appended to [`escalation_reasons`](Dispute::escalation_reasons).
    /// The level is raised by one only when it is below the cap and has not
    /// moved within `cooldown`; applying the same stall twice therefore
    /// moves the level at most once. Escalation is not activity and does not
    /// touch `last_activity_at`.
    pub fn escalate(
        &mut self,
        reasons: &[EscalationReason],
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<EscalationOutcome, DisputeError> {
        self.require_active()?;
        let previous = self.escalation_level;
        if reasons.is_empty() {
            return Ok(EscalationOutcome {
                dispute_id: self.id,
                previous,
                current: previous,
                reasons_recorded: 0,
            });
        }

        let cooled_down = self
            .last_escalated_at
            .map_or(true, |last| now - last >= cooldown);
        if !previous.is_max() && cooled_down {
            self.escalation_level = previous.raised();
            self.last_escalated_at = Some(now);
        }

        for reason in reasons {
            self.escalation_reasons.push(EscalationEntry {
                at: now,
                level: self.escalation_level,
                reason: reason.clone(),
            });
        }

        Ok(EscalationOutcome {
            dispute_id: self.id,
            previous,
            current: self.escalation_level,
            reasons_recorded: reasons.len(),
        })
    }

    /// Finalize the dispute: `Resolved`, stage 5, escrow released.
    pub fn resolve(&mut self, resolution: Resolution, now: DateTime<Utc>) -> Result<(), DisputeError> {
        let actor = match resolution.kind {
            ResolutionKind::AdminForced { admin_id } => Actor::Admin(admin_id),
            ResolutionKind::Mutual { .. } => Actor::System,
        };
        self.transition(Phase::Resolved { resolved_at: now }, actor, now)?;
        self.escrow_frozen = false;
        self.resolution = Some(resolution);
        self.touch(now);
        Ok(())
    }

    /// Close the dispute without resolution, freezing its stage.
    pub fn close(&mut self, actor: Actor, reason: String, now: DateTime<Utc>) -> Result<(), DisputeError> {
        if reason.trim().is_empty() {
            return Err(ValidationError::EmptyField("reason").into());
        }
        let at_stage = self.stage();
        self.transition(
            Phase::Closed {
                at_stage,
                closed_at: now,
            },
            actor,
            now,
        )?;
        self.escrow_frozen = false;
        self.push(actor, TimelineEvent::Closed { reason: reason.clone() }, now);
        self.closure_reason = Some(reason);
        Ok(())
    }

    /// Check the record-level invariants. Used by stores when importing
    /// records and by tests.
    pub fn check_invariants(&self) -> Result<(), String> {
        if let Phase::Resolved { .. } = self.phase {
            if self.resolution.is_none() {
                return Err("resolved dispute has no resolution".to_string());
            }
        }
        if self.is_terminal() && self.escrow_frozen {
            return Err(format!(
                "{} dispute still has escrow frozen",
                self.workflow_state()
            ));
        }
        if let Phase::Closed { at_stage, .. } = self.phase {
            if at_stage == Stage::Completed {
                return Err("closed dispute cannot be at the completed stage".to_string());
            }
        }
        let mut last_level = EscalationLevel::none();
        for entry in &self.escalation_reasons {
            if entry.level < last_level {
                return Err("escalation level decreased in audit list".to_string());
            }
            last_level = entry.level;
        }
        if last_level > self.escalation_level {
            return Err("escalation level lower than audit list".to_string());
        }
        Ok(())
    }

    /// The only place the phase changes.
    fn transition(&mut self, target: Phase, actor: Actor, now: DateTime<Utc>) -> Result<(), DisputeError> {
        self.require_active()?;
        if target.as_str() == self.phase.as_str() {
            return Err(DisputeError::InvalidTransition {
                from: self.phase.as_str().to_string(),
                to: target.as_str().to_string(),
                reason: "dispute is already in this phase".to_string(),
            });
        }
        if target.stage() < self.stage() {
            return Err(DisputeError::InvalidTransition {
                from: self.phase.as_str().to_string(),
                to: target.as_str().to_string(),
                reason: format!(
                    "stage cannot decrease from {} to {}",
                    self.stage().number(),
                    target.stage().number()
                ),
            });
        }
        let from = self.phase.as_str().to_string();
        self.phase = target;
        self.push(
            actor,
            TimelineEvent::PhaseChanged {
                from,
                to: target.as_str().to_string(),
            },
            now,
        );
        Ok(())
    }

    /// Move forward to `target` if it is a later stage; otherwise stay put.
    fn advance(&mut self, target: Phase, actor: Actor, now: DateTime<Utc>) -> Result<(), DisputeError> {
        if target.stage() > self.stage() {
            self.transition(target, actor, now)?;
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = Some(match self.last_activity_at {
            Some(last) if last > now => last,
            _ => now,
        });
    }

    fn push(&mut self, actor: Actor, event: TimelineEvent, now: DateTime<Utc>) {
        self.timeline.push(TimelineEntry { at: now, actor, event });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    pub(crate) fn filing(amount: Option<&str>) -> FilingRequest {
        let client = UserId::new();
        FilingRequest {
            job_id: JobId::new(),
            client_id: client,
            professional_id: UserId::new(),
            filed_by: client,
            category: "quality".to_string(),
            title: "Tiles cracked within a week".to_string(),
            description: "Bathroom retiling job, grout failing".to_string(),
            disputed_amount: amount.map(|a| Money::new(a, "USD").unwrap()),
            response_deadline: None,
        }
    }

    fn resolution(admin: UserId) -> Resolution {
        Resolution {
            kind: ResolutionKind::AdminForced { admin_id: admin },
            summary: "refund half".to_string(),
        }
    }

    #[test]
    fn file_starts_open_at_stage_one() {
        let d = Dispute::file(filing(Some("400")), t0()).unwrap();
        assert_eq!(d.workflow_state(), WorkflowState::Open);
        assert_eq!(d.stage().number(), 1);
        assert_eq!(d.escalation_level.value(), 0);
        assert!(d.escrow_frozen);
        assert_eq!(d.last_activity_at, Some(t0()));
        assert_eq!(d.filed_by, PartyRole::Client);
        assert_eq!(d.timeline.len(), 1);
    }

    #[test]
    fn file_without_amount_does_not_freeze_escrow() {
        let d = Dispute::file(filing(None), t0()).unwrap();
        assert!(!d.escrow_frozen);
    }

    #[test]
    fn file_rejects_outsider_filer() {
        let mut req = filing(None);
        req.filed_by = UserId::new();
        assert!(matches!(
            Dispute::file(req, t0()),
            Err(DisputeError::InvalidFiling(_))
        ));
    }

    #[test]
    fn file_rejects_same_user_on_both_sides() {
        let mut req = filing(None);
        req.professional_id = req.client_id;
        assert!(matches!(
            Dispute::file(req, t0()),
            Err(DisputeError::InvalidFiling(_))
        ));
    }

    #[test]
    fn file_rejects_blank_title() {
        let mut req = filing(None);
        req.title = "   ".to_string();
        assert!(matches!(
            Dispute::file(req, t0()),
            Err(DisputeError::Validation(ValidationError::EmptyField("title")))
        ));
    }

    #[test]
    fn evidence_moves_to_in_progress() {
        let mut d = Dispute::file(filing(None), t0()).unwrap();
        let later = t0() + Duration::hours(3);
        d.submit_evidence(d.client_id, "photos".to_string(), later).unwrap();
        assert_eq!(d.workflow_state(), WorkflowState::InProgress);
        assert_eq!(d.stage(), Stage::EvidenceGathering);
        assert_eq!(d.last_activity_at, Some(later));
    }

    #[test]
    fn evidence_from_outsider_is_rejected() {
        let mut d = Dispute::file(filing(None), t0()).unwrap();
        let err = d
            .submit_evidence(UserId::new(), "photos".to_string(), t0())
            .unwrap_err();
        assert!(matches!(err, DisputeError::NotAParty { .. }));
        assert_eq!(d.stage(), Stage::IssueRaised);
    }

    #[test]
    fn evidence_after_review_keeps_stage() {
        let mut d = Dispute::file(filing(None), t0()).unwrap();
        d.begin_review(UserId::new(), t0()).unwrap();
        d.submit_evidence(d.professional_id, "invoice".to_string(), t0())
            .unwrap();
        assert_eq!(d.stage(), Stage::UnderReview);
    }

    #[test]
    fn counterpart_response_clears_deadline() {
        let mut req = filing(None);
        req.response_deadline = Some(t0() + Duration::hours(24));
        let mut d = Dispute::file(req, t0()).unwrap();

        d.respond(d.client_id, "still waiting".to_string(), t0()).unwrap();
        assert!(d.response_deadline.is_some(), "filer's own reply keeps the deadline");

        d.respond(d.professional_id, "will fix Monday".to_string(), t0())
            .unwrap();
        assert!(d.response_deadline.is_none());
    }

    #[test]
    fn begin_review_twice_is_invalid() {
        let mut d = Dispute::file(filing(None), t0()).unwrap();
        let admin = UserId::new();
        d.begin_review(admin, t0()).unwrap();
        assert!(matches!(
            d.begin_review(admin, t0()),
            Err(DisputeError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn begin_review_after_proposal_cannot_regress() {
        let mut d = Dispute::file(filing(None), t0()).unwrap();
        d.open_resolution(Actor::System, ProposalId::new(), t0()).unwrap();
        let err = d.begin_review(UserId::new(), t0()).unwrap_err();
        assert!(err.to_string().contains("stage cannot decrease"));
        assert_eq!(d.stage(), Stage::Resolution);
    }

    #[test]
    fn resolve_sets_stage_five_and_unfreezes() {
        let mut d = Dispute::file(filing(Some("100")), t0()).unwrap();
        let at = t0() + Duration::hours(10);
        d.resolve(resolution(UserId::new()), at).unwrap();
        assert_eq!(d.workflow_state(), WorkflowState::Resolved);
        assert_eq!(d.stage().number(), 5);
        assert_eq!(d.resolved_at(), Some(at));
        assert!(!d.escrow_frozen);
        d.check_invariants().unwrap();
    }

    #[test]
    fn close_freezes_stage() {
        let mut d = Dispute::file(filing(Some("100")), t0()).unwrap();
        d.submit_evidence(d.client_id, "photos".to_string(), t0()).unwrap();
        d.close(Actor::User(d.client_id), "settled privately".to_string(), t0())
            .unwrap();
        assert_eq!(d.workflow_state(), WorkflowState::Closed);
        assert_eq!(d.stage(), Stage::EvidenceGathering);
        assert!(!d.escrow_frozen);
        assert_eq!(d.closure_reason.as_deref(), Some("settled privately"));
    }

    #[test]
    fn terminal_dispute_rejects_everything() {
        let mut d = Dispute::file(filing(None), t0()).unwrap();
        d.resolve(resolution(UserId::new()), t0()).unwrap();
        let snapshot = d.clone();
        let reasons = [EscalationReason::Inactive { hours: 60 }];

        assert!(matches!(
            d.escalate(&reasons, t0(), Duration::hours(48)),
            Err(DisputeError::TerminalState { .. })
        ));
        assert!(d.submit_evidence(d.client_id, "late".into(), t0()).is_err());
        assert!(d.respond(d.client_id, "late".into(), t0()).is_err());
        assert!(d.begin_review(UserId::new(), t0()).is_err());
        assert!(d.close(Actor::System, "x".into(), t0()).is_err());
        assert!(d.resolve(resolution(UserId::new()), t0()).is_err());
        assert_eq!(d, snapshot);
    }

    #[test]
    fn escalate_respects_cooldown_and_cap() {
        let mut d = Dispute::file(filing(None), t0()).unwrap();
        let cooldown = Duration::hours(48);
        let r = [EscalationReason::Inactive { hours: 50 }];

        let first = d.escalate(&r, t0(), cooldown).unwrap();
        assert!(first.raised());
        assert_eq!(d.escalation_level.value(), 1);

        let repeat = d.escalate(&r, t0(), cooldown).unwrap();
        assert!(!repeat.raised());
        assert_eq!(d.escalation_level.value(), 1);
        assert_eq!(d.escalation_reasons.len(), 2);

        for step in 1..=5 {
            d.escalate(&r, t0() + cooldown * step, cooldown).unwrap();
        }
        assert_eq!(d.escalation_level.value(), EscalationLevel::MAX);
        assert_eq!(d.escalation_reasons.len(), 7);
        d.check_invariants().unwrap();
    }

    #[test]
    fn escalation_level_rejects_out_of_range_on_deserialize() {
        assert!(serde_json::from_str::<EscalationLevel>("4").is_err());
        assert_eq!(
            serde_json::from_str::<EscalationLevel>("3").unwrap().value(),
            3
        );
    }

    #[test]
    fn dispute_serde_round_trip_keeps_phase() {
        let mut d = Dispute::file(filing(Some("10.50")), t0()).unwrap();
        d.close(Actor::System, "duplicate".to_string(), t0()).unwrap();
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["phase"]["phase"], "closed");
        assert_eq!(json["phase"]["at_stage"], "issue_raised");
        let back: Dispute = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Evidence,
        Respond,
        Review,
        Propose,
        Escalate(i64),
        Resolve,
        Close,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Evidence),
            Just(Op::Respond),
            Just(Op::Review),
            Just(Op::Propose),
            (0i64..200).prop_map(Op::Escalate),
            Just(Op::Resolve),
            Just(Op::Close),
        ]
    }

    proptest! {
        #[test]
        fn stage_and_level_never_decrease(ops in proptest::collection::vec(op_strategy(), 1..40)) {
            let mut d = Dispute::file(filing(Some("250")), t0()).unwrap();
            let mut now = t0();
            let admin = UserId::new();
            for op in ops {
                now += Duration::hours(7);
                let before = d.clone();
                let _ = match op {
                    Op::Evidence => d.submit_evidence(d.client_id, "e".into(), now).map(|_| ()),
                    Op::Respond => d.respond(d.professional_id, "r".into(), now).map(|_| ()),
                    Op::Review => d.begin_review(admin, now),
                    Op::Propose => d.open_resolution(Actor::System, ProposalId::new(), now),
                    Op::Escalate(h) => d
                        .escalate(&[EscalationReason::Inactive { hours: h }], now, Duration::hours(48))
                        .map(|_| ()),
                    Op::Resolve => d.resolve(resolution(admin), now),
                    Op::Close => d.close(Actor::System, "c".into(), now),
                };
                prop_assert!(d.stage() >= before.stage());
                prop_assert!(d.escalation_level >= before.escalation_level);
                if before.is_terminal() {
                    prop_assert_eq!(&d, &before);
                }
                if d.workflow_state() == WorkflowState::Resolved {
                    prop_assert_eq!(d.stage(), Stage::Completed);
                    prop_assert!(d.resolved_at().is_some());
                }
                prop_assert!(d.check_invariants().is_ok());
            }
        }
    }
}
