//! Account ledger core: balances, wagers, withdrawals, referrals.

pub mod error;
pub mod referral;
pub mod store;
pub mod wager;
pub mod withdrawal;

pub use error::LedgerError;
pub use referral::{ReferralProgram, ReferralReward, ReferralStats};
pub use store::{Account, LedgerDb, Pool};
pub use wager::{Selection, Wager, WagerEngine};
pub use withdrawal::{WithdrawalGate, WithdrawalRequest};

/// One-time bonus credited to every new account, in credits.
pub const SIGNUP_BONUS: i64 = 2_500;

/// Fixed cash reward for a successful referral, in credits.
pub const REFERRAL_REWARD: i64 = 10_000;

/// Smallest withdrawal the gate will accept, in credits.
pub const MIN_WITHDRAWAL: i64 = 1_000;
