//! # market-cli: Offline Tools for Marketplace Disputes
//!
//! Provides the `market` command-line interface. Both subcommands work on a
//! JSON snapshot of the dispute store, so an operator can rerun the
//! escalation evaluator or pull KPIs without a running server.
//!
//! ## Subcommands
//!
//! - `market escalate`: one evaluator run, optionally written back.
//! - `market kpis`: dispute analytics.
//!
//! ```bash
//! market escalate --snapshot disputes.json --now 2026-03-04T09:00:00Z --write
//! market kpis --snapshot disputes.json
//! ```

pub mod escalate;
pub mod kpis;
pub mod snapshot;
