//! # Escalate Subcommand
//!
//! Runs the escalation evaluator once over a snapshot and prints the run
//! report as JSON. With `--write` the escalated records are saved back to
//! the snapshot file. The level cooldown applies exactly as it does in the
//! server, so repeating a run at the same `--now` moves no level twice.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use market_core::Timestamp;
use market_disputes::{Notification, RunReport};

use crate::snapshot::Snapshot;

/// Arguments for the `market escalate` subcommand.
#[derive(Args, Debug)]
pub struct EscalateArgs {
    /// Path to the snapshot JSON file.
    #[arg(long, value_name = "FILE")]
    pub snapshot: PathBuf,

    /// Evaluation instant (RFC 3339). Defaults to the current time.
    #[arg(long)]
    pub now: Option<String>,

    /// Save escalated records back to the snapshot file.
    #[arg(long)]
    pub write: bool,
}

/// Everything one offline run produced.
#[derive(Debug, Serialize)]
pub struct EscalationRun {
    pub report: RunReport,
    /// Messages the run would have delivered.
    pub notifications: Vec<Notification>,
    #[serde(skip)]
    pub snapshot: Snapshot,
}

/// Run the evaluator over `snapshot` at `now`.
pub fn escalate_snapshot(snapshot: Snapshot, now: DateTime<Utc>) -> Result<EscalationRun> {
    let proposals = snapshot.proposals.clone();
    let service = snapshot.into_service();
    let report = service
        .run_escalation(now)
        .context("escalation run failed")?;
    let notifications = service.outbox().pending();
    let snapshot = Snapshot::capture(&service, proposals)?;
    Ok(EscalationRun {
        report,
        notifications,
        snapshot,
    })
}

/// Execute the escalate subcommand.
///
/// Returns exit code 0 on success. Per-dispute failures are counted in the
/// report and logged; they do not fail the command.
pub fn run_escalate(args: &EscalateArgs) -> Result<u8> {
    let now = match &args.now {
        Some(raw) => Timestamp::parse(raw)
            .with_context(|| format!("invalid --now value: {raw}"))?
            .into_datetime(),
        None => Utc::now(),
    };

    let snapshot = Snapshot::load(&args.snapshot)?;
    let run = escalate_snapshot(snapshot, now)?;

    if run.report.failed > 0 {
        tracing::warn!(failed = run.report.failed, "some disputes could not be escalated");
    }
    tracing::info!(
        scanned = run.report.scanned,
        escalated = run.report.escalated,
        level_changes = run.report.level_changes,
        notifications = run.notifications.len(),
        "escalation run finished"
    );

    println!("{}", serde_json::to_string_pretty(&run)?);

    if args.write {
        run.snapshot.save(&args.snapshot)?;
    }
    Ok(0)
}
