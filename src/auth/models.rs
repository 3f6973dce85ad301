//! Authentication Models
//! Mission: Define the request/response shapes for phone + PIN auth

use serde::{Deserialize, Serialize};

use crate::ledger::Account;

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (account id)
    pub phone: String,
    pub exp: usize, // expiration timestamp
}

impl Claims {
    /// The authenticated account id.
    pub fn account_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// Registration request body
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub phone: String,
    pub pin: String,
    #[serde(default, rename = "referralCode")]
    pub referral_code: Option<String>,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub phone: String,
    pub pin: String,
}

/// Issued-token response
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub expires_in: usize, // seconds until expiration
    pub account: AccountView,
}

/// Account response (sanitized)
#[derive(Debug, Serialize)]
pub struct AccountView {
    pub id: i64,
    pub phone: String,
    pub real_balance: i64,
    pub bonus_balance: i64,
    pub total_wagered: i64,
    pub referral_code: String,
    pub created_at: String,
}

impl AccountView {
    pub fn from_account(account: &Account) -> Self {
        Self {
            id: account.id,
            phone: account.phone.clone(),
            real_balance: account.real_balance,
            bonus_balance: account.bonus_balance,
            total_wagered: account.total_wagered,
            referral_code: account.referral_code.clone(),
            created_at: account.created_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_account_id_parses_subject() {
        let claims = Claims {
            sub: "42".to_string(),
            phone: "254712345678".to_string(),
            exp: 1234567890,
        };
        assert_eq!(claims.account_id(), Some(42));

        let bad = Claims {
            sub: "not-a-number".to_string(),
            phone: "254712345678".to_string(),
            exp: 1234567890,
        };
        assert_eq!(bad.account_id(), None);
    }

    #[test]
    fn test_account_view_omits_pin_hash() {
        let account = Account {
            id: 7,
            phone: "254712345678".to_string(),
            pin_hash: "secret-hash".to_string(),
            real_balance: 100,
            bonus_balance: 2500,
            total_wagered: 0,
            referral_code: "ABC123".to_string(),
            referred_by_code: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        };
        let view = AccountView::from_account(&account);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("ABC123"));
    }
}
