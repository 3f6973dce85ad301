//! Referral Program
//!
//! Mints referral codes, attributes a new signup to its referrer, and issues
//! the fixed cash reward as an immutable ledger event. Attribution runs
//! exactly once, inside the account-creation transaction, so the referrer
//! credit can never be half-applied.

use chrono::Utc;
use rand::Rng;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ledger::error::LedgerError;
use crate::ledger::store::{Account, LedgerDb, Pool};

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;

/// Immutable record of one successful referral attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralReward {
    pub id: i64,
    pub referrer_id: i64,
    pub referred_id: i64,
    pub reward_amount: i64,
    pub created_at: String,
}

/// Aggregated referral view for one account.
#[derive(Debug, Clone, Serialize)]
pub struct ReferralStats {
    pub referral_code: String,
    pub total_referrals: i64,
    pub total_earned: i64,
    pub recent_rewards: Vec<ReferralReward>,
}

#[derive(Clone)]
pub struct ReferralProgram {
    db: LedgerDb,
    reward_amount: i64,
    signup_bonus: i64,
}

impl ReferralProgram {
    pub fn new(db: LedgerDb, reward_amount: i64, signup_bonus: i64) -> Self {
        Self {
            db,
            reward_amount,
            signup_bonus,
        }
    }

    /// Generate a referral code that does not collide with an existing one.
    /// Collisions are unlikely at 36^6 but checked, not assumed.
    fn generate_code_in(conn: &Connection) -> Result<String, LedgerError> {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
                .collect();
            if LedgerDb::find_by_referral_code_in(conn, &code)?.is_none() {
                return Ok(code);
            }
        }
    }

    /// Create an account and, when `referral_code_input` resolves, attribute
    /// the signup: set `referred_by_code`, credit the referrer's real balance
    /// by the fixed reward, and append the reward record. A code that does
    /// not resolve is silently ignored. Everything commits as one unit.
    pub async fn register_account(
        &self,
        phone: &str,
        pin_hash: &str,
        referral_code_input: Option<&str>,
    ) -> Result<Account, LedgerError> {
        let mut conn = self.db.conn().await;
        let tx = conn
            .transaction()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;

        let code = Self::generate_code_in(&tx)?;

        let referrer = match referral_code_input
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
        {
            Some(input) => LedgerDb::find_by_referral_code_in(&tx, &input)?,
            None => None,
        };

        let mut account = LedgerDb::create_account_in(
            &tx,
            phone,
            pin_hash,
            &code,
            referrer.as_ref().map(|r| r.referral_code.as_str()),
            self.signup_bonus,
        )?;

        if let Some(referrer) = &referrer {
            LedgerDb::credit_in(&tx, referrer.id, self.reward_amount, Pool::Real)?;
            tx.execute(
                "INSERT INTO referral_rewards (referrer_id, referred_id, reward_amount, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    referrer.id,
                    account.id,
                    self.reward_amount,
                    Utc::now().to_rfc3339()
                ],
            )?;
            account.referred_by_code = Some(referrer.referral_code.clone());
        }

        tx.commit()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;

        if let Some(referrer) = &referrer {
            info!(
                "🤝 Referral attributed: {} referred by {} (+{} credits)",
                account.phone, referrer.phone, self.reward_amount
            );
        }

        Ok(account)
    }

    /// Referral stats for an account: total referrals, total earned, and the
    /// most recent rewards.
    pub async fn stats(&self, account_id: i64) -> Result<ReferralStats, LedgerError> {
        let conn = self.db.conn().await;
        let account = LedgerDb::get_account_in(&conn, account_id)?
            .ok_or_else(|| LedgerError::NotFound("Account".into()))?;

        let total_referrals: i64 = conn
            .prepare_cached("SELECT COUNT(*) FROM accounts WHERE referred_by_code = ?1")?
            .query_row(params![&account.referral_code], |row| row.get(0))?;

        let total_earned = LedgerDb::referral_earned_in(&conn, account_id)?;

        let mut stmt = conn.prepare_cached(
            "SELECT id, referrer_id, referred_id, reward_amount, created_at \
             FROM referral_rewards WHERE referrer_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 5",
        )?;
        let recent_rewards = stmt
            .query_map(params![account_id], |row| {
                Ok(ReferralReward {
                    id: row.get(0)?,
                    referrer_id: row.get(1)?,
                    referred_id: row.get(2)?,
                    reward_amount: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ReferralStats {
            referral_code: account.referral_code,
            total_referrals,
            total_earned,
            recent_rewards,
        })
    }
}
