//! # Error Hierarchy
//!
//! Validation errors for the shared domain primitives, built with
//! `thiserror`. Subsystem crates wrap these in their own enums.

use thiserror::Error;

/// Validation errors for domain primitives.
///
/// Each variant carries the rejected input so operators can see exactly
/// what was submitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Identifier string is not a UUID.
    #[error("invalid identifier: \"{0}\" (expected a UUID)")]
    InvalidId(String),

    /// Monetary amount is not a non-negative decimal with at most two
    /// fractional digits.
    #[error("invalid monetary amount: \"{0}\" (expected a non-negative decimal with at most 2 fraction digits)")]
    InvalidAmount(String),

    /// Currency code is not three ASCII uppercase letters.
    #[error("invalid currency code: \"{0}\" (expected ISO 4217, e.g. USD)")]
    InvalidCurrency(String),

    /// Two amounts in different currencies were combined.
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency of the left operand.
        left: String,
        /// Currency of the right operand.
        right: String,
    },

    /// Amount arithmetic overflowed or went negative.
    #[error("amount arithmetic out of range")]
    AmountOutOfRange,

    /// Timestamp string is not valid RFC 3339.
    #[error("invalid timestamp: \"{value}\" ({reason})")]
    InvalidTimestamp {
        /// The string that failed to parse.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A required text field was empty.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}
