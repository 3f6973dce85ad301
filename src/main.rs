//! BallotBet - Election Betting Ledger Backend
//! Mission: Keep every credit accounted for, from top-up to withdrawal

use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::interval};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ballotbet_backend::{
    api::{create_router, AppState, ResponseCache},
    auth::JwtHandler,
    config::Config,
    elections::ElectionStore,
    ledger::{LedgerDb, ReferralProgram, WagerEngine, WithdrawalGate},
    middleware::request_logging,
    payments::{DarajaGateway, PaymentReconciler},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ballotbet_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!("🗳️  BallotBet backend starting on port {}", config.port);

    let db = LedgerDb::new(&config.database_path).context("initialize ledger database")?;
    info!("💾 Ledger database ready at {}", config.database_path);

    let gateway = Arc::new(DarajaGateway::new(config.gateway.clone())?);
    let jwt = Arc::new(JwtHandler::new(config.jwt_secret.clone()));

    let payments = PaymentReconciler::new(db.clone(), gateway);
    let state = AppState {
        db: db.clone(),
        wagers: WagerEngine::new(db.clone()),
        withdrawals: WithdrawalGate::new(db.clone(), config.min_withdrawal),
        referrals: ReferralProgram::new(db.clone(), config.referral_reward, config.signup_bonus),
        payments: payments.clone(),
        elections: ElectionStore::new(db),
        jwt,
        cache: ResponseCache::new(Duration::from_secs(30)),
    };

    // Periodic sweep over pending payment intents; complements the gateway's
    // asynchronous callbacks for notifications that never arrive.
    if config.sweep_interval_secs > 0 {
        let sweeper = payments.clone();
        let period = Duration::from_secs(config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                match sweeper.sweep_pending().await {
                    Ok(report) if report.checked > 0 => {
                        info!(
                            "🔄 Payment sweep: {}/{} resolved",
                            report.credited + report.failed + report.cancelled,
                            report.checked
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("Payment sweep failed: {}", e),
                }
            }
        });
    }

    let app = create_router(state)
        .layer(axum::middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .context("bind listener")?;
    info!("🚀 Listening on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}
