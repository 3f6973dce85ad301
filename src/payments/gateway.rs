//! Mobile-Money Gateway Client
//!
//! STK push integration: request a push payment on the customer's handset and
//! query the status of an earlier request. The trait is the seam the
//! reconciler depends on; the Daraja implementation talks to the real API.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::GatewayConfig;

/// Acknowledgement of an accepted push request.
#[derive(Debug, Clone)]
pub struct StkAck {
    /// The gateway's correlation id for this payment attempt.
    pub gateway_reference: String,
}

/// Status of a payment attempt as reported by the gateway.
#[derive(Debug, Clone)]
pub struct GatewayStatus {
    pub result_code: i64,
    pub result_desc: String,
}

/// Result codes the gateway uses for a transaction's lifecycle.
pub mod result_codes {
    /// Payment completed.
    pub const SUCCESS: i64 = 0;
    /// Customer has not acted yet; the transaction is still in flight.
    pub const STILL_PENDING: i64 = 1;
    /// Customer cancelled the push prompt.
    pub const CANCELLED: i64 = 1032;
}

#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    /// Ask the gateway to push a payment prompt to `phone`. Returns the
    /// gateway's correlation id only if the request was accepted.
    async fn initiate(&self, phone: &str, amount: i64, reference: &str) -> Result<StkAck>;

    /// Query the current status of an earlier push request.
    async fn query(&self, gateway_reference: &str) -> Result<GatewayStatus>;
}

/// Daraja STK push client.
pub struct DarajaGateway {
    http: reqwest::Client,
    cfg: GatewayConfig,
}

impl DarajaGateway {
    pub fn new(cfg: GatewayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build gateway http client")?;
        Ok(Self { http, cfg })
    }

    /// Fetch an OAuth bearer token using the consumer key/secret.
    async fn access_token(&self) -> Result<String> {
        let resp = self
            .http
            .get(&self.cfg.token_url)
            .basic_auth(&self.cfg.consumer_key, Some(&self.cfg.consumer_secret))
            .send()
            .await
            .context("gateway token request")?
            .error_for_status()
            .context("gateway token status")?;
        let body: serde_json::Value = resp.json().await.context("gateway token body")?;
        body["access_token"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("gateway token response missing access_token"))
    }

    /// Timestamped request password: base64(shortcode + passkey + timestamp).
    fn password(&self, timestamp: &str) -> String {
        BASE64.encode(format!(
            "{}{}{}",
            self.cfg.shortcode, self.cfg.passkey, timestamp
        ))
    }

    fn timestamp() -> String {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    }
}

#[async_trait]
impl MobileMoneyGateway for DarajaGateway {
    async fn initiate(&self, phone: &str, amount: i64, reference: &str) -> Result<StkAck> {
        let token = self.access_token().await?;
        let timestamp = Self::timestamp();

        let payload = json!({
            "BusinessShortCode": self.cfg.shortcode,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount,
            "PartyA": phone,
            "PartyB": self.cfg.shortcode,
            "PhoneNumber": phone,
            "CallBackURL": self.cfg.callback_url,
            "AccountReference": reference,
            "TransactionDesc": "Account top up",
        });

        let resp = self
            .http
            .post(&self.cfg.stk_push_url)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .context("stk push request")?
            .error_for_status()
            .context("stk push status")?;
        let body: serde_json::Value = resp.json().await.context("stk push body")?;

        debug!("STK push response: {}", body);

        let reference = body["CheckoutRequestID"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("stk push response missing CheckoutRequestID"))?;
        Ok(StkAck {
            gateway_reference: reference,
        })
    }

    async fn query(&self, gateway_reference: &str) -> Result<GatewayStatus> {
        let token = self.access_token().await?;
        let timestamp = Self::timestamp();

        let payload = json!({
            "BusinessShortCode": self.cfg.shortcode,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "CheckoutRequestID": gateway_reference,
        });

        let resp = self
            .http
            .post(&self.cfg.query_url)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .context("stk query request")?
            .error_for_status()
            .context("stk query status")?;
        let body: serde_json::Value = resp.json().await.context("stk query body")?;

        let result_code = match &body["ResultCode"] {
            serde_json::Value::Number(n) => n.as_i64().unwrap_or(result_codes::STILL_PENDING),
            serde_json::Value::String(s) => {
                s.parse::<i64>().unwrap_or(result_codes::STILL_PENDING)
            }
            _ => result_codes::STILL_PENDING,
        };
        let result_desc = body["ResultDesc"].as_str().unwrap_or("Unknown").to_string();

        Ok(GatewayStatus {
            result_code,
            result_desc,
        })
    }
}
