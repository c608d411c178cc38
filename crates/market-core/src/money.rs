//! # Money
//!
//! Monetary amounts held in escrow and allocated on resolution.
//!
//! ## Security Invariant
//!
//! Financial amounts are never floating-point. The wire form is a decimal
//! string (`"150.00"`) plus an ISO 4217 currency code; internally the amount
//! is an integer count of minor units (cents), so splitting a held balance
//! between two parties and summing it back is exact.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Number of fractional digits carried by every supported currency.
const MINOR_DIGITS: u32 = 2;
const MINOR_FACTOR: i64 = 10_i64.pow(MINOR_DIGITS);

/// A non-negative monetary amount in a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr", into = "MoneyRepr")]
pub struct Money {
    minor_units: i64,
    currency: String,
}

#[derive(Serialize, Deserialize)]
struct MoneyRepr {
    amount: String,
    currency: String,
}

impl TryFrom<MoneyRepr> for Money {
    type Error = ValidationError;

    fn try_from(repr: MoneyRepr) -> Result<Self, Self::Error> {
        Money::new(&repr.amount, &repr.currency)
    }
}

impl From<Money> for MoneyRepr {
    fn from(money: Money) -> Self {
        MoneyRepr {
            amount: money.amount_string(),
            currency: money.currency,
        }
    }
}

impl Money {
    /// Parse a decimal amount string (e.g. `"150"`, `"25000.50"`).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidAmount`] for empty, negative or
    /// malformed amounts or more than two fraction digits, and
    /// [`ValidationError::InvalidCurrency`] for a malformed currency code.
    pub fn new(amount: &str, currency: &str) -> Result<Self, ValidationError> {
        let currency = validate_currency(currency)?;
        let minor_units = parse_minor_units(amount)
            .ok_or_else(|| ValidationError::InvalidAmount(amount.to_string()))?;
        Ok(Self {
            minor_units,
            currency,
        })
    }

    /// Build an amount from integer minor units (cents).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AmountOutOfRange`] for negative units.
    pub fn from_minor_units(minor_units: i64, currency: &str) -> Result<Self, ValidationError> {
        if minor_units < 0 {
            return Err(ValidationError::AmountOutOfRange);
        }
        Ok(Self {
            minor_units,
            currency: validate_currency(currency)?,
        })
    }

    /// A zero amount in the given currency.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCurrency`] for a malformed code.
    pub fn zero(currency: &str) -> Result<Self, ValidationError> {
        Self::from_minor_units(0, currency)
    }

    /// Integer minor units.
    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// ISO 4217 currency code.
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Whether the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    /// Canonical decimal rendering with exactly two fraction digits.
    pub fn amount_string(&self) -> String {
        format!(
            "{}.{:02}",
            self.minor_units / MINOR_FACTOR,
            self.minor_units % MINOR_FACTOR
        )
    }

    /// Add two amounts of the same currency.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::CurrencyMismatch`] or
    /// [`ValidationError::AmountOutOfRange`] on overflow.
    pub fn checked_add(&self, other: &Money) -> Result<Money, ValidationError> {
        self.require_same_currency(other)?;
        let minor_units = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(ValidationError::AmountOutOfRange)?;
        Ok(Money {
            minor_units,
            currency: self.currency.clone(),
        })
    }

    /// Subtract `other` from `self`; the result may not go negative.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::CurrencyMismatch`] or
    /// [`ValidationError::AmountOutOfRange`] if the result would be negative.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, ValidationError> {
        self.require_same_currency(other)?;
        let minor_units = self.minor_units - other.minor_units;
        if minor_units < 0 {
            return Err(ValidationError::AmountOutOfRange);
        }
        Ok(Money {
            minor_units,
            currency: self.currency.clone(),
        })
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), ValidationError> {
        if self.currency != other.currency {
            return Err(ValidationError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount_string(), self.currency)
    }
}

fn validate_currency(code: &str) -> Result<String, ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(code.to_string())
    } else {
        Err(ValidationError::InvalidCurrency(code.to_string()))
    }
}

/// Parse `"123"`, `"123.4"` or `"123.45"` into minor units.
fn parse_minor_units(s: &str) -> Option<i64> {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac.len() > MINOR_DIGITS as usize || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if s.ends_with('.') {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let mut frac_units: i64 = if frac.is_empty() { 0 } else { frac.parse().ok()? };
    for _ in frac.len()..MINOR_DIGITS as usize {
        frac_units *= 10;
    }
    whole.checked_mul(MINOR_FACTOR)?.checked_add(frac_units)
}
