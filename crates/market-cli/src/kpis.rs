//! # KPIs Subcommand
//!
//! Prints dispute analytics for a snapshot as JSON. Read-only.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use market_disputes::DisputeAnalytics;

use crate::snapshot::Snapshot;

/// Arguments for the `market kpis` subcommand.
#[derive(Args, Debug)]
pub struct KpisArgs {
    /// Path to the snapshot JSON file.
    #[arg(long, value_name = "FILE")]
    pub snapshot: PathBuf,
}

/// Compute analytics over a loaded snapshot.
pub fn snapshot_kpis(snapshot: &Snapshot) -> DisputeAnalytics {
    DisputeAnalytics::compute(&snapshot.disputes, &snapshot.early_warnings)
}

/// Execute the kpis subcommand.
pub fn run_kpis(args: &KpisArgs) -> Result<u8> {
    let snapshot = Snapshot::load(&args.snapshot)?;
    let kpis = snapshot_kpis(&snapshot);
    tracing::debug!(total = kpis.total, "kpis computed");
    println!("{}", serde_json::to_string_pretty(&kpis)?);
    Ok(0)
}
