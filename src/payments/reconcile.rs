//! Payment Reconciliation
//!
//! Integrates the mobile-money push-payment gateway with the ledger: initiate
//! a top-up, then reconcile asynchronous callbacks and polled statuses into
//! exactly one real-balance credit per gateway reference. Notifications may
//! arrive out of order, be duplicated, or race the initiator's own persistence
//! and the polling sweep; the `pending -> terminal` conditional update is the
//! single guard that keeps the credit at-most-once.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::ledger::error::LedgerError;
use crate::ledger::store::{LedgerDb, Pool};
use crate::payments::gateway::{result_codes, MobileMoneyGateway};
use crate::phone::normalize_phone;

/// Lifecycle of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Success => "success",
            IntentStatus::Failed => "failed",
            IntentStatus::Cancelled => "cancelled",
        }
    }
}

/// One push-payment attempt, keyed by the gateway's correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: i64,
    pub account_id: Option<i64>,
    pub phone: String,
    pub amount: i64,
    pub gateway_reference: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// What a reconciliation attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The intent transitioned to success and the account was credited.
    Credited { account_id: i64, amount: i64 },
    /// The intent transitioned to success but no account matched; the credit
    /// is withheld and the orphan is logged.
    SuccessUnmatched,
    /// The intent transitioned to failed.
    Failed,
    /// The intent transitioned to cancelled.
    Cancelled,
    /// The gateway still reports the transaction in flight; nothing changed.
    StillPending,
    /// The intent was already terminal; duplicate notification, no-op.
    AlreadySettled,
}

/// Counters from one polling sweep over pending intents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub credited: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub still_pending: usize,
    pub query_errors: usize,
}

#[derive(Clone)]
pub struct PaymentReconciler {
    db: LedgerDb,
    gateway: Arc<dyn MobileMoneyGateway>,
}

impl PaymentReconciler {
    pub fn new(db: LedgerDb, gateway: Arc<dyn MobileMoneyGateway>) -> Self {
        Self { db, gateway }
    }

    /// Initiate a push payment. The intent is persisted only after the
    /// gateway acknowledges the request, so a timeout cannot leave a dangling
    /// reference with nothing to reconcile against.
    pub async fn initiate_top_up(
        &self,
        account_id: i64,
        phone: &str,
        amount: i64,
    ) -> Result<String, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidInput(
                "Top-up amount must be positive".into(),
            ));
        }
        self.db
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound("Account".into()))?;

        let reference = format!("TOPUP-{account_id}");
        let ack = self
            .gateway
            .initiate(phone, amount, &reference)
            .await
            .map_err(|e| LedgerError::GatewayUnavailable(e.to_string()))?;

        let conn = self.db.conn().await;
        let now = Utc::now().to_rfc3339();
        // A callback may have raced us and created the intent first; if so,
        // just claim it for this account.
        conn.execute(
            "INSERT INTO payment_intents (account_id, phone, amount, gateway_reference, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT(gateway_reference) DO UPDATE SET \
                account_id = COALESCE(payment_intents.account_id, excluded.account_id)",
            params![
                account_id,
                phone,
                amount,
                &ack.gateway_reference,
                IntentStatus::Pending.as_str(),
                &now
            ],
        )?;

        info!(
            "📲 Top-up initiated: account {} amount {} ref {}",
            account_id, amount, ack.gateway_reference
        );
        Ok(ack.gateway_reference)
    }

    /// Reconcile a gateway notification. Creating the intent (if the
    /// notification outran the initiator) and the terminal transition happen
    /// in one transaction. Amount and phone are validated only when they are
    /// needed to create the intent; a transition on an existing intent uses
    /// the stored values.
    pub async fn reconcile(
        &self,
        gateway_reference: &str,
        result_code: i64,
        amount: i64,
        phone: &str,
    ) -> Result<ReconcileOutcome, LedgerError> {
        let gateway_reference = gateway_reference.trim();
        if gateway_reference.is_empty() {
            return Err(LedgerError::InvalidCallback(
                "missing gateway reference".into(),
            ));
        }

        let mut conn = self.db.conn().await;
        let tx = conn
            .transaction()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;

        if Self::get_intent_in(&tx, gateway_reference)?.is_none() {
            // Notification outran the initiator: create the intent from the
            // notification payload, which must therefore be usable.
            if amount <= 0 {
                return Err(LedgerError::InvalidCallback(format!(
                    "non-positive amount {amount}"
                )));
            }
            let phone = normalize_phone(phone).map_err(|_| {
                LedgerError::InvalidCallback(format!("unparseable phone {phone}"))
            })?;
            let now = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO payment_intents (account_id, phone, amount, gateway_reference, status, created_at, updated_at) \
                 VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?5) \
                 ON CONFLICT(gateway_reference) DO NOTHING",
                params![
                    &phone,
                    amount,
                    gateway_reference,
                    IntentStatus::Pending.as_str(),
                    &now
                ],
            )?;
        }

        let outcome = Self::transition_in(&tx, gateway_reference, result_code)?;

        tx.commit()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        Ok(outcome)
    }

    /// Apply a gateway status to an existing intent. The conditional update's
    /// affected-row count gates the credit: only the caller that wins the
    /// `pending -> terminal` transition may touch the ledger.
    fn transition_in(
        conn: &Connection,
        gateway_reference: &str,
        result_code: i64,
    ) -> Result<ReconcileOutcome, LedgerError> {
        if result_code == result_codes::STILL_PENDING {
            return Ok(ReconcileOutcome::StillPending);
        }
        let terminal = match result_code {
            result_codes::SUCCESS => IntentStatus::Success,
            result_codes::CANCELLED => IntentStatus::Cancelled,
            _ => IntentStatus::Failed,
        };

        let now = Utc::now().to_rfc3339();
        let rows = conn.execute(
            "UPDATE payment_intents SET status = ?1, updated_at = ?2 \
             WHERE gateway_reference = ?3 AND status = 'pending'",
            params![terminal.as_str(), &now, gateway_reference],
        )?;
        if rows == 0 {
            return Ok(ReconcileOutcome::AlreadySettled);
        }

        if terminal != IntentStatus::Success {
            return Ok(match terminal {
                IntentStatus::Cancelled => ReconcileOutcome::Cancelled,
                _ => ReconcileOutcome::Failed,
            });
        }

        let intent = Self::get_intent_in(conn, gateway_reference)?
            .ok_or_else(|| LedgerError::NotFound("Payment intent".into()))?;

        // Resolve the account: the initiator recorded it, or the callback's
        // phone identifies it.
        let account = match intent.account_id {
            Some(id) => LedgerDb::get_account_in(conn, id)?,
            None => LedgerDb::find_by_phone_in(conn, &intent.phone)?,
        };

        match account {
            Some(account) => {
                LedgerDb::credit_in(conn, account.id, intent.amount, Pool::Real)?;
                conn.execute(
                    "UPDATE payment_intents SET account_id = ?1 WHERE id = ?2",
                    params![account.id, intent.id],
                )?;
                info!(
                    "💰 Top-up credited: account {} +{} credits (ref {})",
                    account.id, intent.amount, gateway_reference
                );
                Ok(ReconcileOutcome::Credited {
                    account_id: account.id,
                    amount: intent.amount,
                })
            }
            None => {
                warn!(
                    "⚠️ Successful payment with no matching account: phone {} ref {}",
                    intent.phone, gateway_reference
                );
                Ok(ReconcileOutcome::SuccessUnmatched)
            }
        }
    }

    /// Re-query the gateway for every pending intent and apply the same
    /// idempotent transition. One bad transaction never aborts the sweep.
    pub async fn sweep_pending(&self) -> Result<SweepReport, LedgerError> {
        let pending: Vec<String> = {
            let conn = self.db.conn().await;
            let mut stmt = conn.prepare_cached(
                "SELECT gateway_reference FROM payment_intents WHERE status = 'pending' \
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut report = SweepReport::default();
        for reference in pending {
            report.checked += 1;
            let status = match self.gateway.query(&reference).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("🔁 Sweep query failed for {}: {}", reference, e);
                    report.query_errors += 1;
                    continue;
                }
            };

            let mut conn = self.db.conn().await;
            let tx = conn
                .transaction()
                .map_err(|e| LedgerError::Internal(e.to_string()))?;
            let outcome = Self::transition_in(&tx, &reference, status.result_code)?;
            tx.commit()
                .map_err(|e| LedgerError::Internal(e.to_string()))?;

            match outcome {
                ReconcileOutcome::Credited { .. } | ReconcileOutcome::SuccessUnmatched => {
                    report.credited += 1
                }
                ReconcileOutcome::Failed => report.failed += 1,
                ReconcileOutcome::Cancelled => report.cancelled += 1,
                ReconcileOutcome::StillPending => report.still_pending += 1,
                ReconcileOutcome::AlreadySettled => {}
            }
        }

        info!(
            "🔄 Sweep complete: {} checked, {} credited, {} failed, {} cancelled, {} pending, {} errors",
            report.checked,
            report.credited,
            report.failed,
            report.cancelled,
            report.still_pending,
            report.query_errors
        );
        Ok(report)
    }

    fn get_intent_in(
        conn: &Connection,
        gateway_reference: &str,
    ) -> Result<Option<PaymentIntent>, LedgerError> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, phone, amount, gateway_reference, status, created_at, updated_at \
             FROM payment_intents WHERE gateway_reference = ?1",
        )?;
        Ok(stmt
            .query_row(params![gateway_reference], Self::intent_from_row)
            .optional()?)
    }

    fn intent_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentIntent> {
        Ok(PaymentIntent {
            id: row.get(0)?,
            account_id: row.get(1)?,
            phone: row.get(2)?,
            amount: row.get(3)?,
            gateway_reference: row.get(4)?,
            status: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    pub async fn get_intent(
        &self,
        gateway_reference: &str,
    ) -> Result<Option<PaymentIntent>, LedgerError> {
        let conn = self.db.conn().await;
        Self::get_intent_in(&conn, gateway_reference)
    }

    /// Recent intents, newest first (admin view).
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<PaymentIntent>, LedgerError> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.db.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, phone, amount, gateway_reference, status, created_at, updated_at \
             FROM payment_intents ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let intents = stmt
            .query_map(params![limit], Self::intent_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(intents)
    }
}
