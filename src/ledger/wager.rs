//! Wager Engine
//!
//! Computes combined odds and payout for a multi-selection bet and drives the
//! ledger debit with the bonus/real split policy: real balance is consumed
//! first, bonus covers the remainder, and only the real portion advances
//! `total_wagered`.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::ledger::error::LedgerError;
use crate::ledger::store::{LedgerDb, Pool};

/// One leg of a wager: a candidate label and its decimal odds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub candidate: String,
    pub odds: f64,
}

/// A placed wager. Immutable after creation except `status`, whose terminal
/// transitions are driven by an external settlement process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: i64,
    pub account_id: i64,
    pub stake: i64,
    pub combined_odds: f64,
    pub possible_win: i64,
    pub real_used: i64,
    pub bonus_used: i64,
    pub status: String,
    pub created_at: String,
    pub selections: Vec<Selection>,
}

#[derive(Clone)]
pub struct WagerEngine {
    db: LedgerDb,
}

impl WagerEngine {
    pub fn new(db: LedgerDb) -> Self {
        Self { db }
    }

    /// Product of all selection odds, rounded half-up to 2 decimal places.
    pub fn combined_odds(selections: &[Selection]) -> f64 {
        let product: f64 = selections.iter().map(|s| s.odds).product();
        (product * 100.0).round() / 100.0
    }

    /// Payout if every selection wins: `floor(stake * combined_odds)`.
    pub fn possible_win(stake: i64, combined_odds: f64) -> i64 {
        (stake as f64 * combined_odds).floor() as i64
    }

    /// Place a wager. The dual-pool debit, the `total_wagered` increment, and
    /// the wager rows commit or roll back as one unit.
    pub async fn place_wager(
        &self,
        account_id: i64,
        stake: i64,
        selections: Vec<Selection>,
    ) -> Result<Wager, LedgerError> {
        if stake <= 0 {
            return Err(LedgerError::InvalidInput("Stake must be positive".into()));
        }
        if selections.is_empty() {
            return Err(LedgerError::InvalidInput(
                "At least one selection is required".into(),
            ));
        }
        if let Some(bad) = selections.iter().find(|s| !(s.odds > 0.0)) {
            return Err(LedgerError::InvalidInput(format!(
                "Invalid odds {} for candidate {}",
                bad.odds, bad.candidate
            )));
        }

        let mut conn = self.db.conn().await;
        let tx = conn
            .transaction()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;

        let account = LedgerDb::get_account_in(&tx, account_id)?
            .ok_or_else(|| LedgerError::NotFound("Account".into()))?;

        // Real money first, bonus covers the remainder
        let real_used = stake.min(account.real_balance);
        let bonus_used = (stake - real_used).min(account.bonus_balance);
        if real_used + bonus_used < stake {
            return Err(LedgerError::InsufficientFunds);
        }

        let combined_odds = Self::combined_odds(&selections);
        let possible_win = Self::possible_win(stake, combined_odds);

        LedgerDb::debit_in(&tx, account_id, real_used, Pool::Real)?;
        LedgerDb::debit_in(&tx, account_id, bonus_used, Pool::Bonus)?;

        // Bonus stakes carry no skin in the game: only real money advances
        // the withdrawal ceiling.
        tx.execute(
            "UPDATE accounts SET total_wagered = total_wagered + ?1 WHERE id = ?2",
            params![real_used, account_id],
        )?;

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO wagers \
             (account_id, stake, combined_odds, possible_win, real_used, bonus_used, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
            params![account_id, stake, combined_odds, possible_win, real_used, bonus_used, &now],
        )?;
        let wager_id = tx.last_insert_rowid();

        for (position, sel) in selections.iter().enumerate() {
            tx.execute(
                "INSERT INTO wager_selections (wager_id, position, candidate, odds) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![wager_id, position as i64, &sel.candidate, sel.odds],
            )?;
        }

        tx.commit()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;

        Ok(Wager {
            id: wager_id,
            account_id,
            stake,
            combined_odds,
            possible_win,
            real_used,
            bonus_used,
            status: "pending".to_string(),
            created_at: now,
            selections,
        })
    }

    /// Wager history for an account, newest first, selections attached.
    pub async fn history(&self, account_id: i64) -> Result<Vec<Wager>, LedgerError> {
        let conn = self.db.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, stake, combined_odds, possible_win, real_used, bonus_used, status, created_at \
             FROM wagers WHERE account_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let mut wagers = stmt
            .query_map(params![account_id], |row| {
                Ok(Wager {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    stake: row.get(2)?,
                    combined_odds: row.get(3)?,
                    possible_win: row.get(4)?,
                    real_used: row.get(5)?,
                    bonus_used: row.get(6)?,
                    status: row.get(7)?,
                    created_at: row.get(8)?,
                    selections: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for wager in &mut wagers {
            wager.selections = Self::selections_in(&conn, wager.id)?;
        }
        Ok(wagers)
    }

    fn selections_in(conn: &Connection, wager_id: i64) -> Result<Vec<Selection>, LedgerError> {
        let mut stmt = conn.prepare_cached(
            "SELECT candidate, odds FROM wager_selections WHERE wager_id = ?1 ORDER BY position ASC",
        )?;
        let selections = stmt
            .query_map(params![wager_id], |row| {
                Ok(Selection {
                    candidate: row.get(0)?,
                    odds: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(selections)
    }
}
