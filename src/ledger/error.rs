//! Core Error Taxonomy
//!
//! Every ledger-facing operation returns one of these tagged errors. The HTTP
//! layer maps them to status codes; the core never deals in HTTP.

use std::fmt;

/// Errors surfaced by the ledger, wager engine, withdrawal gate, referral
/// program, and payment reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Malformed input: bad phone, non-positive stake/amount, empty selections.
    InvalidInput(String),
    /// The requested debit would drive a balance pool negative.
    InsufficientFunds,
    /// Withdrawal amount below the configured floor.
    BelowMinimum { minimum: i64 },
    /// The entire real balance is referral-tainted; nothing is withdrawable.
    ReferralLocked,
    /// Withdrawal amount exceeds the current withdrawable ceiling.
    ExceedsWithdrawable { ceiling: i64 },
    /// The mobile-money gateway could not be reached or rejected the request.
    GatewayUnavailable(String),
    /// A payment notification payload could not be interpreted.
    InvalidCallback(String),
    /// Unknown account, wager, withdrawal, election, or candidate.
    NotFound(String),
    /// Storage or other infrastructure failure.
    Internal(String),
}

impl LedgerError {
    /// Machine-checkable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidInput(_) => "invalid_input",
            LedgerError::InsufficientFunds => "insufficient_funds",
            LedgerError::BelowMinimum { .. } => "below_minimum",
            LedgerError::ReferralLocked => "referral_locked",
            LedgerError::ExceedsWithdrawable { .. } => "exceeds_withdrawable",
            LedgerError::GatewayUnavailable(_) => "gateway_unavailable",
            LedgerError::InvalidCallback(_) => "invalid_callback",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::InvalidInput(detail) => write!(f, "{detail}"),
            LedgerError::InsufficientFunds => write!(f, "Insufficient balance"),
            LedgerError::BelowMinimum { minimum } => {
                write!(f, "Minimum withdrawal is {minimum} credits")
            }
            LedgerError::ReferralLocked => {
                write!(f, "Your balance is from referrals and cannot be withdrawn")
            }
            LedgerError::ExceedsWithdrawable { ceiling } => {
                write!(
                    f,
                    "You can only withdraw up to {ceiling} credits. Referral earnings are locked."
                )
            }
            LedgerError::GatewayUnavailable(detail) => {
                write!(f, "Payment gateway unavailable: {detail}")
            }
            LedgerError::InvalidCallback(detail) => {
                write!(f, "Invalid payment notification: {detail}")
            }
            LedgerError::NotFound(what) => write!(f, "{what} not found"),
            LedgerError::Internal(detail) => write!(f, "Internal error: {detail}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(err: anyhow::Error) -> Self {
        LedgerError::Internal(err.to_string())
    }
}
