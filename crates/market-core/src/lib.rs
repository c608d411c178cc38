#![deny(missing_docs)]

//! # market-core: Foundational Types for the Marketplace
//!
//! Every other crate in the workspace depends on this one. It has no
//! internal crate dependencies, only `serde`, `thiserror`, `chrono` and
//! `uuid` from the external ecosystem.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** A [`DisputeId`] cannot be passed
//!    where a [`JobId`] is expected.
//!
//! 2. **Money is never a float.** [`Money`] stores integer minor units and
//!    parses/prints decimal strings, so escrow splits add up exactly.
//!
//! 3. **UTC everywhere.** [`Timestamp`] wraps `DateTime<Utc>`; local time is
//!    a presentation concern.
//!
//! 4. **Structured errors.** [`ValidationError`] is a `thiserror` enum that
//!    the subsystem crates wrap, no `Box<dyn Error>`.

pub mod error;
pub mod identity;
pub mod money;
pub mod temporal;

pub use error::ValidationError;
pub use identity::{DisputeId, EarlyWarningId, JobId, NotificationId, ProposalId, UserId};
pub use money::Money;
pub use temporal::Timestamp;
