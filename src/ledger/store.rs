//! Account Ledger Storage
//!
//! Owns the SQLite schema and the per-account balance invariants. All
//! money-moving flows (wagers, withdrawals, referral rewards, top-up credits)
//! go through the guarded debit/credit primitives here, inside a transaction
//! on the shared connection, so concurrent writers can never double-spend a
//! stale balance.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::ledger::error::LedgerError;

/// Which balance pool an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    /// Withdrawable-eligible funds.
    Real,
    /// Promotional funds, wagerable but never withdrawable.
    Bonus,
}

/// One registered user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub phone: String,
    #[serde(skip_serializing)]
    pub pin_hash: String, // bcrypt hash - never serialize
    pub real_balance: i64,
    pub bonus_balance: i64,
    pub total_wagered: i64,
    pub referral_code: String,
    pub referred_by_code: Option<String>,
    pub created_at: String,
}

/// Ledger database handle. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct LedgerDb {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerDb {
    /// Open the database and initialize the schema.
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open ledger db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone TEXT UNIQUE NOT NULL,
                pin_hash TEXT NOT NULL,
                real_balance INTEGER NOT NULL DEFAULT 0 CHECK (real_balance >= 0),
                bonus_balance INTEGER NOT NULL DEFAULT 0 CHECK (bonus_balance >= 0),
                total_wagered INTEGER NOT NULL DEFAULT 0 CHECK (total_wagered >= 0),
                referral_code TEXT UNIQUE NOT NULL,
                referred_by_code TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS wagers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                stake INTEGER NOT NULL,
                combined_odds REAL NOT NULL,
                possible_win INTEGER NOT NULL,
                real_used INTEGER NOT NULL,
                bonus_used INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS wager_selections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                wager_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                candidate TEXT NOT NULL,
                odds REAL NOT NULL,
                FOREIGN KEY (wager_id) REFERENCES wagers(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS withdrawals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                amount INTEGER NOT NULL,
                method TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS referral_rewards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                referrer_id INTEGER NOT NULL,
                referred_id INTEGER NOT NULL,
                reward_amount INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (referrer_id) REFERENCES accounts(id),
                FOREIGN KEY (referred_id) REFERENCES accounts(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS payment_intents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER,
                phone TEXT NOT NULL,
                amount INTEGER NOT NULL,
                gateway_reference TEXT UNIQUE NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS elections (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                constituency TEXT,
                kind TEXT NOT NULL DEFAULT 'presidential'
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS candidates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                election_id TEXT NOT NULL,
                name TEXT NOT NULL,
                party TEXT,
                odds REAL NOT NULL DEFAULT 1.0,
                image TEXT,
                FOREIGN KEY (election_id) REFERENCES elections(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_wagers_account ON wagers(account_id, created_at DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_selections_wager ON wager_selections(wager_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_withdrawals_account ON withdrawals(account_id, created_at DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rewards_referrer ON referral_rewards(referrer_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_intents_status ON payment_intents(status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_candidates_election ON candidates(election_id)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the shared connection. Crate-internal: components use this to run
    /// multi-step mutations inside one transaction.
    pub(crate) async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    pub(crate) fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
        Ok(Account {
            id: row.get(0)?,
            phone: row.get(1)?,
            pin_hash: row.get(2)?,
            real_balance: row.get(3)?,
            bonus_balance: row.get(4)?,
            total_wagered: row.get(5)?,
            referral_code: row.get(6)?,
            referred_by_code: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    const ACCOUNT_COLS: &'static str = "id, phone, pin_hash, real_balance, bonus_balance, \
         total_wagered, referral_code, referred_by_code, created_at";

    pub(crate) fn get_account_in(
        conn: &Connection,
        account_id: i64,
    ) -> Result<Option<Account>, LedgerError> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM accounts WHERE id = ?1",
            Self::ACCOUNT_COLS
        ))?;
        Ok(stmt
            .query_row(params![account_id], Self::account_from_row)
            .optional()?)
    }

    pub async fn get_account(&self, account_id: i64) -> Result<Option<Account>, LedgerError> {
        let conn = self.conn().await;
        Self::get_account_in(&conn, account_id)
    }

    pub async fn find_by_phone(&self, phone: &str) -> Result<Option<Account>, LedgerError> {
        let conn = self.conn().await;
        Self::find_by_phone_in(&conn, phone)
    }

    pub(crate) fn find_by_phone_in(
        conn: &Connection,
        phone: &str,
    ) -> Result<Option<Account>, LedgerError> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM accounts WHERE phone = ?1",
            Self::ACCOUNT_COLS
        ))?;
        Ok(stmt
            .query_row(params![phone], Self::account_from_row)
            .optional()?)
    }

    pub(crate) fn find_by_referral_code_in(
        conn: &Connection,
        code: &str,
    ) -> Result<Option<Account>, LedgerError> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM accounts WHERE referral_code = ?1",
            Self::ACCOUNT_COLS
        ))?;
        Ok(stmt
            .query_row(params![code], Self::account_from_row)
            .optional()?)
    }

    /// Insert a new account row. Creation with referral attribution lives in
    /// the referral program, which wraps this in its own transaction.
    pub(crate) fn create_account_in(
        conn: &Connection,
        phone: &str,
        pin_hash: &str,
        referral_code: &str,
        referred_by_code: Option<&str>,
        signup_bonus: i64,
    ) -> Result<Account, LedgerError> {
        if Self::find_by_phone_in(conn, phone)?.is_some() {
            return Err(LedgerError::InvalidInput("Account already exists".into()));
        }
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO accounts \
             (phone, pin_hash, real_balance, bonus_balance, total_wagered, referral_code, referred_by_code, created_at) \
             VALUES (?1, ?2, 0, ?3, 0, ?4, ?5, ?6)",
            params![phone, pin_hash, signup_bonus, referral_code, referred_by_code, &now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Account {
            id,
            phone: phone.to_string(),
            pin_hash: pin_hash.to_string(),
            real_balance: 0,
            bonus_balance: signup_bonus,
            total_wagered: 0,
            referral_code: referral_code.to_string(),
            referred_by_code: referred_by_code.map(|c| c.to_string()),
            created_at: now,
        })
    }

    /// Debit one pool. The conditional `UPDATE ... WHERE balance >= amount`
    /// is the atomic read-modify-write: zero affected rows means the pool
    /// would have gone negative (or the account does not exist).
    pub(crate) fn debit_in(
        conn: &Connection,
        account_id: i64,
        amount: i64,
        pool: Pool,
    ) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::InvalidInput("debit amount must be >= 0".into()));
        }
        if amount == 0 {
            return Ok(());
        }
        let sql = match pool {
            Pool::Real => {
                "UPDATE accounts SET real_balance = real_balance - ?1 \
                 WHERE id = ?2 AND real_balance >= ?1"
            }
            Pool::Bonus => {
                "UPDATE accounts SET bonus_balance = bonus_balance - ?1 \
                 WHERE id = ?2 AND bonus_balance >= ?1"
            }
        };
        let rows = conn.execute(sql, params![amount, account_id])?;
        if rows == 1 {
            return Ok(());
        }
        if Self::get_account_in(conn, account_id)?.is_none() {
            return Err(LedgerError::NotFound("Account".into()));
        }
        Err(LedgerError::InsufficientFunds)
    }

    pub(crate) fn credit_in(
        conn: &Connection,
        account_id: i64,
        amount: i64,
        pool: Pool,
    ) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::InvalidInput("credit amount must be >= 0".into()));
        }
        if amount == 0 {
            return Ok(());
        }
        let sql = match pool {
            Pool::Real => "UPDATE accounts SET real_balance = real_balance + ?1 WHERE id = ?2",
            Pool::Bonus => "UPDATE accounts SET bonus_balance = bonus_balance + ?1 WHERE id = ?2",
        };
        let rows = conn.execute(sql, params![amount, account_id])?;
        if rows == 0 {
            return Err(LedgerError::NotFound("Account".into()));
        }
        Ok(())
    }

    pub async fn debit(
        &self,
        account_id: i64,
        amount: i64,
        pool: Pool,
    ) -> Result<(), LedgerError> {
        let conn = self.conn().await;
        Self::debit_in(&conn, account_id, amount, pool)
    }

    pub async fn credit(
        &self,
        account_id: i64,
        amount: i64,
        pool: Pool,
    ) -> Result<(), LedgerError> {
        let conn = self.conn().await;
        Self::credit_in(&conn, account_id, amount, pool)
    }

    /// Credit the real pool. The only entry point payment reconciliation and
    /// admin top-ups may use.
    pub async fn credit_real(&self, account_id: i64, amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidInput("credit amount must be > 0".into()));
        }
        self.credit(account_id, amount, Pool::Real).await
    }

    /// List accounts, newest first (admin view).
    pub async fn list_accounts(&self, limit: usize) -> Result<Vec<Account>, LedgerError> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM accounts ORDER BY created_at DESC LIMIT ?1",
            Self::ACCOUNT_COLS
        ))?;
        let accounts = stmt
            .query_map(params![limit], Self::account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    /// Sum of referral rewards earned by an account. Defines the
    /// referral-tainted portion of its real balance.
    pub(crate) fn referral_earned_in(
        conn: &Connection,
        account_id: i64,
    ) -> Result<i64, LedgerError> {
        let mut stmt = conn.prepare_cached(
            "SELECT COALESCE(SUM(reward_amount), 0) FROM referral_rewards WHERE referrer_id = ?1",
        )?;
        Ok(stmt.query_row(params![account_id], |row| row.get(0))?)
    }

    pub async fn referral_earned(&self, account_id: i64) -> Result<i64, LedgerError> {
        let conn = self.conn().await;
        Self::referral_earned_in(&conn, account_id)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (LedgerDb, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let db = LedgerDb::new(temp.path().to_str().unwrap()).unwrap();
        (db, temp)
    }

    #[tokio::test]
    async fn test_account_creation_grants_signup_bonus() {
        let (db, _temp) = create_test_db();
        let account = {
            let conn = db.conn().await;
            LedgerDb::create_account_in(&conn, "254712345678", "hash", "ABC123", None, 2500)
                .unwrap()
        };
        assert_eq!(account.real_balance, 0);
        assert_eq!(account.bonus_balance, 2500);
        assert_eq!(account.total_wagered, 0);

        let loaded = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(loaded.phone, "254712345678");
        assert_eq!(loaded.bonus_balance, 2500);
    }

    #[tokio::test]
    async fn test_duplicate_phone_rejected() {
        let (db, _temp) = create_test_db();
        let conn = db.conn().await;
        LedgerDb::create_account_in(&conn, "254712345678", "hash", "ABC123", None, 0).unwrap();
        let err = LedgerDb::create_account_in(&conn, "254712345678", "hash", "XYZ789", None, 0)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn test_debit_respects_pool_floor() {
        let (db, _temp) = create_test_db();
        let account = {
            let conn = db.conn().await;
            LedgerDb::create_account_in(&conn, "254712345678", "hash", "ABC123", None, 500)
                .unwrap()
        };
        db.credit(account.id, 1000, Pool::Real).await.unwrap();

        // Real pool has 1000: a 1001 debit must fail and change nothing
        let err = db.debit(account.id, 1001, Pool::Real).await.unwrap_err();
        assert_eq!(err, LedgerError::InsufficientFunds);
        let acct = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(acct.real_balance, 1000);
        assert_eq!(acct.bonus_balance, 500);

        // Exact-balance debit succeeds
        db.debit(account.id, 1000, Pool::Real).await.unwrap();
        let acct = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(acct.real_balance, 0);
    }

    #[tokio::test]
    async fn test_debit_unknown_account_is_not_found() {
        let (db, _temp) = create_test_db();
        let err = db.debit(999, 100, Pool::Real).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_credit_real_rejects_non_positive() {
        let (db, _temp) = create_test_db();
        let account = {
            let conn = db.conn().await;
            LedgerDb::create_account_in(&conn, "254712345678", "hash", "ABC123", None, 0).unwrap()
        };
        assert!(db.credit_real(account.id, 0).await.is_err());
        assert!(db.credit_real(account.id, -5).await.is_err());
        db.credit_real(account.id, 750).await.unwrap();
        let acct = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(acct.real_balance, 750);
    }

    #[tokio::test]
    async fn test_bonus_pool_is_independent() {
        let (db, _temp) = create_test_db();
        let account = {
            let conn = db.conn().await;
            LedgerDb::create_account_in(&conn, "254712345678", "hash", "ABC123", None, 2500)
                .unwrap()
        };
        db.debit(account.id, 2500, Pool::Bonus).await.unwrap();
        let err = db.debit(account.id, 1, Pool::Bonus).await.unwrap_err();
        assert_eq!(err, LedgerError::InsufficientFunds);
        let acct = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(acct.bonus_balance, 0);
    }
}
