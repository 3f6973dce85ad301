//! Withdrawal Gate
//!
//! Computes the withdrawable ceiling from wagering history and referral taint
//! and authorizes or rejects withdrawal requests. Two independent ceilings
//! apply: `real_balance - referral_earned` (referral rewards are locked) and
//! `min(real_balance, total_wagered)` (money must be wagered before it can
//! leave); the enforced ceiling is the minimum of both.

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::ledger::error::LedgerError;
use crate::ledger::store::{LedgerDb, Pool};

/// One withdrawal attempt. Status transitions to success/failed are driven by
/// an external operator, not by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub method: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct WithdrawalGate {
    db: LedgerDb,
    min_withdrawal: i64,
}

impl WithdrawalGate {
    pub fn new(db: LedgerDb, min_withdrawal: i64) -> Self {
        Self { db, min_withdrawal }
    }

    /// The ceiling currently enforced for an account, given its balance,
    /// wagering history, and referral earnings.
    pub fn enforced_ceiling(real_balance: i64, total_wagered: i64, referral_earned: i64) -> i64 {
        let referral_ceiling = (real_balance - referral_earned).max(0);
        let wagered_ceiling = real_balance.min(total_wagered);
        referral_ceiling.min(wagered_ceiling)
    }

    /// Request a withdrawal. Preconditions are checked in a fixed order and
    /// the first failure wins; on success the real-pool debit and the request
    /// row commit together.
    pub async fn request_withdrawal(
        &self,
        account_id: i64,
        amount: i64,
        method: &str,
    ) -> Result<WithdrawalRequest, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidInput(
                "Withdrawal amount must be positive".into(),
            ));
        }
        if amount < self.min_withdrawal {
            return Err(LedgerError::BelowMinimum {
                minimum: self.min_withdrawal,
            });
        }

        let mut conn = self.db.conn().await;
        let tx = conn
            .transaction()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;

        let account = LedgerDb::get_account_in(&tx, account_id)?
            .ok_or_else(|| LedgerError::NotFound("Account".into()))?;

        if amount > account.real_balance {
            return Err(LedgerError::InsufficientFunds);
        }

        let referral_earned = LedgerDb::referral_earned_in(&tx, account_id)?;
        let referral_ceiling = (account.real_balance - referral_earned).max(0);
        if referral_ceiling == 0 {
            return Err(LedgerError::ReferralLocked);
        }

        let ceiling =
            Self::enforced_ceiling(account.real_balance, account.total_wagered, referral_earned);
        if amount > ceiling {
            return Err(LedgerError::ExceedsWithdrawable { ceiling });
        }

        LedgerDb::debit_in(&tx, account_id, amount, Pool::Real)?;

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO withdrawals (account_id, amount, method, status, created_at) \
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![account_id, amount, method, &now],
        )?;
        let id = tx.last_insert_rowid();

        tx.commit()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;

        Ok(WithdrawalRequest {
            id,
            account_id,
            amount,
            method: method.to_string(),
            status: "pending".to_string(),
            created_at: now,
        })
    }

    /// Withdrawal history for an account, newest first.
    pub async fn history(&self, account_id: i64) -> Result<Vec<WithdrawalRequest>, LedgerError> {
        let conn = self.db.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, amount, method, status, created_at \
             FROM withdrawals WHERE account_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![account_id], |row| {
                Ok(WithdrawalRequest {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    amount: row.get(2)?,
                    method: row.get(3)?,
                    status: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
