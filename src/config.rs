//! Application configuration, loaded from the environment.

use crate::ledger::{MIN_WITHDRAWAL, REFERRAL_REWARD, SIGNUP_BONUS};

/// Mobile-money gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub shortcode: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub passkey: String,
    pub token_url: String,
    pub stk_push_url: String,
    pub query_url: String,
    pub callback_url: String,
    pub timeout_secs: u64,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub jwt_secret: String,
    pub signup_bonus: i64,
    pub referral_reward: i64,
    pub min_withdrawal: i64,
    /// Seconds between pending-payment sweeps; 0 disables the sweeper.
    pub sweep_interval_secs: u64,
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./ballotbet.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let jwt_secret =
            std::env::var("JWT_SECRET").unwrap_or_else(|_| "change-this-in-production".to_string());

        let signup_bonus = env_i64("SIGNUP_BONUS", SIGNUP_BONUS);
        let referral_reward = env_i64("REFERRAL_REWARD", REFERRAL_REWARD);
        let min_withdrawal = env_i64("MIN_WITHDRAWAL", MIN_WITHDRAWAL);

        let sweep_interval_secs = std::env::var("SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .unwrap_or(120);

        let gateway = GatewayConfig {
            shortcode: std::env::var("GATEWAY_SHORTCODE").unwrap_or_else(|_| "303506".to_string()),
            consumer_key: std::env::var("GATEWAY_CONSUMER_KEY").unwrap_or_default(),
            consumer_secret: std::env::var("GATEWAY_CONSUMER_SECRET").unwrap_or_default(),
            passkey: std::env::var("GATEWAY_PASSKEY").unwrap_or_default(),
            token_url: std::env::var("GATEWAY_TOKEN_URL").unwrap_or_else(|_| {
                "https://api.safaricom.co.ke/oauth/v1/generate?grant_type=client_credentials"
                    .to_string()
            }),
            stk_push_url: std::env::var("GATEWAY_STK_PUSH_URL").unwrap_or_else(|_| {
                "https://api.safaricom.co.ke/mpesa/stkpush/v1/processrequest".to_string()
            }),
            query_url: std::env::var("GATEWAY_QUERY_URL").unwrap_or_else(|_| {
                "https://api.safaricom.co.ke/mpesa/stkpushquery/v1/query".to_string()
            }),
            callback_url: std::env::var("GATEWAY_CALLBACK_URL")
                .unwrap_or_else(|_| "http://localhost:8080/api/payments/callback".to_string()),
            timeout_secs: std::env::var("GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
        };

        Ok(Self {
            database_path,
            port,
            jwt_secret,
            signup_bonus,
            referral_reward,
            min_withdrawal,
            sweep_interval_secs,
            gateway,
        })
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}
