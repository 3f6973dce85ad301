//! End-to-end ledger flow over a throwaway database: registration with a
//! referral, a mobile-money top-up reconciled through callback and sweep,
//! wager placement with the bonus/real split, and a gated withdrawal.

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::NamedTempFile;

use ballotbet_backend::ledger::{
    LedgerDb, LedgerError, ReferralProgram, Selection, WagerEngine, WithdrawalGate,
    MIN_WITHDRAWAL, REFERRAL_REWARD, SIGNUP_BONUS,
};
use ballotbet_backend::payments::{
    GatewayStatus, MobileMoneyGateway, PaymentReconciler, ReconcileOutcome, StkAck,
};
use ballotbet_backend::phone::normalize_phone;

/// Gateway double that acknowledges every push and serves scripted query
/// results.
#[derive(Default)]
struct ScriptedGateway {
    references: Mutex<Vec<String>>,
    queries: Mutex<HashMap<String, i64>>,
}

impl ScriptedGateway {
    fn script_query(&self, reference: &str, result_code: i64) {
        self.queries.lock().insert(reference.to_string(), result_code);
    }
}

#[async_trait]
impl MobileMoneyGateway for ScriptedGateway {
    async fn initiate(&self, _phone: &str, _amount: i64, reference: &str) -> anyhow::Result<StkAck> {
        let mut refs = self.references.lock();
        let gateway_reference = format!("ws_CO_{}_{}", reference, refs.len());
        refs.push(gateway_reference.clone());
        Ok(StkAck { gateway_reference })
    }

    async fn query(&self, gateway_reference: &str) -> anyhow::Result<GatewayStatus> {
        match self.queries.lock().get(gateway_reference) {
            Some(code) => Ok(GatewayStatus {
                result_code: *code,
                result_desc: "scripted".into(),
            }),
            None => Err(anyhow!("no scripted result")),
        }
    }
}

struct Harness {
    db: LedgerDb,
    referrals: ReferralProgram,
    wagers: WagerEngine,
    withdrawals: WithdrawalGate,
    payments: PaymentReconciler,
    gateway: Arc<ScriptedGateway>,
    _temp: NamedTempFile,
}

fn harness() -> Harness {
    let temp = NamedTempFile::new().unwrap();
    let db = LedgerDb::new(temp.path().to_str().unwrap()).unwrap();
    let gateway = Arc::new(ScriptedGateway::default());
    Harness {
        referrals: ReferralProgram::new(db.clone(), REFERRAL_REWARD, SIGNUP_BONUS),
        wagers: WagerEngine::new(db.clone()),
        withdrawals: WithdrawalGate::new(db.clone(), MIN_WITHDRAWAL),
        payments: PaymentReconciler::new(db.clone(), gateway.clone()),
        gateway,
        db,
        _temp: temp,
    }
}

#[tokio::test]
async fn full_flow_from_signup_to_withdrawal() {
    let h = harness();

    // Referrer signs up, then a friend registers with their code
    let referrer = h
        .referrals
        .register_account(&normalize_phone("0711000001").unwrap(), "hash-a", None)
        .await
        .unwrap();
    let friend = h
        .referrals
        .register_account(
            &normalize_phone("0711000002").unwrap(),
            "hash-b",
            Some(&referrer.referral_code),
        )
        .await
        .unwrap();

    // Referrer got the cash reward; the friend starts with only the bonus
    let referrer_acct = h.db.get_account(referrer.id).await.unwrap().unwrap();
    assert_eq!(referrer_acct.real_balance, REFERRAL_REWARD);
    assert_eq!(friend.real_balance, 0);
    assert_eq!(friend.bonus_balance, SIGNUP_BONUS);

    // Friend tops up 5000 via push payment; gateway confirms asynchronously
    let reference = h
        .payments
        .initiate_top_up(friend.id, &friend.phone, 5000)
        .await
        .unwrap();
    let outcome = h
        .payments
        .reconcile(&reference, 0, 5000, &friend.phone)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Credited {
            account_id: friend.id,
            amount: 5000
        }
    );

    // A duplicate callback delivery must not credit again
    let dup = h
        .payments
        .reconcile(&reference, 0, 5000, &friend.phone)
        .await
        .unwrap();
    assert_eq!(dup, ReconcileOutcome::AlreadySettled);
    let acct = h.db.get_account(friend.id).await.unwrap().unwrap();
    assert_eq!(acct.real_balance, 5000);

    // Friend places a 6000 wager: 5000 real + 1000 bonus
    let wager = h
        .wagers
        .place_wager(
            friend.id,
            6000,
            vec![
                Selection {
                    candidate: "Candidate A".into(),
                    odds: 1.5,
                },
                Selection {
                    candidate: "Candidate B".into(),
                    odds: 2.0,
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(wager.combined_odds, 3.0);
    assert_eq!(wager.possible_win, 18_000);
    assert_eq!(wager.real_used, 5000);
    assert_eq!(wager.bonus_used, 1000);

    let acct = h.db.get_account(friend.id).await.unwrap().unwrap();
    assert_eq!(acct.real_balance, 0);
    assert_eq!(acct.bonus_balance, 1500);
    assert_eq!(acct.total_wagered, 5000);

    // Fund again and withdraw: everything was wagered once, nothing is
    // referral-tainted, so the full 3000 clears the gate
    h.db.credit_real(friend.id, 3000).await.unwrap();
    let withdrawal = h
        .withdrawals
        .request_withdrawal(friend.id, 3000, "MTN")
        .await
        .unwrap();
    assert_eq!(withdrawal.status, "pending");
    let acct = h.db.get_account(friend.id).await.unwrap().unwrap();
    assert_eq!(acct.real_balance, 0);
}

#[tokio::test]
async fn referrer_cannot_cash_out_reward_without_wagering() {
    let h = harness();

    let referrer = h
        .referrals
        .register_account(&normalize_phone("0711000001").unwrap(), "hash-a", None)
        .await
        .unwrap();
    h.referrals
        .register_account(
            &normalize_phone("0711000002").unwrap(),
            "hash-b",
            Some(&referrer.referral_code),
        )
        .await
        .unwrap();

    // The entire balance is the referral reward: locked
    let err = h
        .withdrawals
        .request_withdrawal(referrer.id, 5000, "MTN")
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::ReferralLocked);

    // Even after a top-up, the reward stays excluded from the ceiling
    let reference = h
        .payments
        .initiate_top_up(referrer.id, &referrer.phone, 4000)
        .await
        .unwrap();
    h.payments
        .reconcile(&reference, 0, 4000, &referrer.phone)
        .await
        .unwrap();
    h.wagers
        .place_wager(
            referrer.id,
            4000,
            vec![Selection {
                candidate: "Candidate A".into(),
                odds: 1.5,
            }],
        )
        .await
        .unwrap();
    h.db.credit_real(referrer.id, 14_000).await.unwrap();

    // real = 24000, wagered = 4000, referral earned = 10000:
    // ceiling = min(24000 - 10000, min(24000, 4000)) = 4000
    let err = h
        .withdrawals
        .request_withdrawal(referrer.id, 4100, "MTN")
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::ExceedsWithdrawable { ceiling: 4000 });
    h.withdrawals
        .request_withdrawal(referrer.id, 4000, "MTN")
        .await
        .unwrap();
}

#[tokio::test]
async fn sweep_completes_payments_whose_callbacks_never_arrived() {
    let h = harness();

    let account = h
        .referrals
        .register_account(&normalize_phone("0711000001").unwrap(), "hash", None)
        .await
        .unwrap();

    let ref_a = h
        .payments
        .initiate_top_up(account.id, &account.phone, 1000)
        .await
        .unwrap();
    let ref_b = h
        .payments
        .initiate_top_up(account.id, &account.phone, 2000)
        .await
        .unwrap();

    // No callbacks ever arrive; the poller resolves one payment per round,
    // the unreachable one is skipped without aborting the sweep
    h.gateway.script_query(&ref_a, 0);
    let report = h.payments.sweep_pending().await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.credited, 1);
    assert_eq!(report.query_errors, 1);

    h.gateway.script_query(&ref_b, 1032);
    let report = h.payments.sweep_pending().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.cancelled, 1);

    let acct = h.db.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(acct.real_balance, 1000);

    // Ledger invariants hold at the end of the sequence
    assert!(acct.real_balance >= 0 && acct.bonus_balance >= 0 && acct.total_wagered >= 0);
}
