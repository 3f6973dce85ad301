//! HTTP API
//!
//! Maps each core operation to a route and each core error kind to a status
//! code and JSON shape. The core never sees HTTP; this layer never touches
//! balances except through the components it holds.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::cache::ResponseCache;
use crate::auth::{
    auth_middleware, AccountView, AuthResponse, Claims, JwtHandler, LoginRequest, RegisterRequest,
};
use crate::elections::ElectionStore;
use crate::ledger::{
    LedgerDb, LedgerError, ReferralProgram, Selection, WagerEngine, WithdrawalGate,
};
use crate::payments::PaymentReconciler;
use crate::phone::normalize_phone;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: LedgerDb,
    pub wagers: WagerEngine,
    pub withdrawals: WithdrawalGate,
    pub referrals: ReferralProgram,
    pub payments: PaymentReconciler,
    pub elections: ElectionStore,
    pub jwt: Arc<JwtHandler>,
    pub cache: ResponseCache,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/balance", get(balance))
        .route("/api/bets", post(place_bet))
        .route("/api/bets/history", get(bet_history))
        .route("/api/referrals/stats", get(referral_stats))
        .route("/api/withdraw", post(withdraw))
        .route("/api/withdrawals/history", get(withdrawal_history))
        .route("/api/payments/topup", post(initiate_top_up))
        .route("/api/payments/sweep", post(sweep_pending))
        .route("/api/admin/balance", post(admin_credit))
        .route("/api/admin/users", get(admin_list_accounts))
        .route("/api/admin/payments", get(admin_list_payments))
        .route_layer(middleware::from_fn_with_state(
            state.jwt.clone(),
            auth_middleware,
        ));

    let public = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/payments/callback", post(payment_callback))
        .route("/elections", get(list_elections))
        .route("/election", post(create_election))
        .route(
            "/election/:id",
            get(get_election).put(update_election).delete(delete_election),
        )
        .route("/candidate", post(create_candidate))
        .route(
            "/candidate/:id",
            put(update_candidate).delete(delete_candidate),
        );

    protected.merge(public).with_state(state)
}

// ===== Auth =====

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    let phone = normalize_phone(&payload.phone)?;
    if payload.pin.trim().len() < 4 {
        return Err(LedgerError::InvalidInput("PIN must be at least 4 digits".into()).into());
    }

    let pin_hash = hash(&payload.pin, DEFAULT_COST)
        .map_err(|e| LedgerError::Internal(e.to_string()))?;

    let account = state
        .referrals
        .register_account(&phone, &pin_hash, payload.referral_code.as_deref())
        .await?;

    let (token, expires_in) = state
        .jwt
        .generate_token(&account)
        .map_err(|e| LedgerError::Internal(e.to_string()))?;

    info!("🆕 Account registered: {}", account.phone);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            expires_in,
            account: AccountView::from_account(&account),
        }),
    )
        .into_response())
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let phone = normalize_phone(&payload.phone)?;

    let account = state
        .db
        .find_by_phone(&phone)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let valid = verify(&payload.pin, &account.pin_hash)
        .map_err(|e| LedgerError::Internal(e.to_string()))?;
    if !valid {
        warn!("❌ Failed login attempt: {}", phone);
        return Err(ApiError::Unauthorized);
    }

    let (token, expires_in) = state
        .jwt
        .generate_token(&account)
        .map_err(|e| LedgerError::Internal(e.to_string()))?;

    Ok(Json(AuthResponse {
        token,
        expires_in,
        account: AccountView::from_account(&account),
    }))
}

// ===== Balance =====

async fn balance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account_id = authenticated_id(&claims)?;
    let account = state
        .db
        .get_account(account_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound("Account".into()))?;

    // Informational figure; the withdrawal gate is the authority
    let withdrawable = account.real_balance.min(account.total_wagered);

    Ok(Json(json!({
        "balance": account.real_balance,
        "bonus_balance": account.bonus_balance,
        "total_wagered": account.total_wagered,
        "withdrawable": withdrawable,
        "currency": "credits",
    })))
}

// ===== Bets =====

#[derive(Debug, Deserialize)]
struct PlaceBetRequest {
    stake: i64,
    selections: Vec<Selection>,
}

async fn place_bet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<PlaceBetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account_id = authenticated_id(&claims)?;
    let wager = state
        .wagers
        .place_wager(account_id, payload.stake, payload.selections)
        .await?;

    Ok(Json(json!({
        "message": "Bet placed successfully",
        "bet_id": wager.id,
        "combined_odds": wager.combined_odds,
        "possible_win": wager.possible_win,
        "real_money_used": wager.real_used,
        "bonus_used": wager.bonus_used,
    })))
}

async fn bet_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account_id = authenticated_id(&claims)?;
    let wagers = state.wagers.history(account_id).await?;
    Ok(Json(json!(wagers)))
}

// ===== Referrals =====

async fn referral_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account_id = authenticated_id(&claims)?;
    let stats = state.referrals.stats(account_id).await?;
    Ok(Json(json!(stats)))
}

// ===== Withdrawals =====

#[derive(Debug, Deserialize)]
struct WithdrawRequestBody {
    amount: i64,
    method: Option<String>,
}

async fn withdraw(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<WithdrawRequestBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account_id = authenticated_id(&claims)?;
    let method = payload.method.as_deref().unwrap_or("MTN");
    let request = state
        .withdrawals
        .request_withdrawal(account_id, payload.amount, method)
        .await?;

    let remaining = state
        .db
        .get_account(account_id)
        .await?
        .map(|a| a.real_balance)
        .unwrap_or(0);

    Ok(Json(json!({
        "message": "Withdrawal submitted successfully",
        "withdrawal_id": request.id,
        "amount": request.amount,
        "remaining_balance": remaining,
    })))
}

async fn withdrawal_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account_id = authenticated_id(&claims)?;
    let history = state.withdrawals.history(account_id).await?;
    Ok(Json(json!(history)))
}

// ===== Payments =====

#[derive(Debug, Deserialize)]
struct TopUpRequest {
    amount: i64,
    /// Defaults to the account's own phone.
    phone: Option<String>,
}

async fn initiate_top_up(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<TopUpRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account_id = authenticated_id(&claims)?;
    let phone = match &payload.phone {
        Some(raw) => normalize_phone(raw)?,
        None => claims.phone.clone(),
    };

    let reference = state
        .payments
        .initiate_top_up(account_id, &phone, payload.amount)
        .await?;

    Ok(Json(json!({
        "message": "Payment push sent",
        "gateway_reference": reference,
    })))
}

/// Gateway callback: asynchronous notification with the push result.
async fn payment_callback(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (reference, result_code, amount, phone) = parse_stk_callback(&payload)?;
    state
        .payments
        .reconcile(&reference, result_code, amount, &phone)
        .await?;
    Ok(Json(json!({ "message": "Callback processed" })))
}

/// Extract (reference, result_code, amount, phone) from the gateway's
/// callback envelope.
fn parse_stk_callback(
    payload: &serde_json::Value,
) -> Result<(String, i64, i64, String), LedgerError> {
    let stk = payload
        .get("Body")
        .and_then(|b| b.get("stkCallback"))
        .ok_or_else(|| LedgerError::InvalidCallback("missing Body.stkCallback".into()))?;

    let result_code = stk
        .get("ResultCode")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| LedgerError::InvalidCallback("missing ResultCode".into()))?;

    let reference = stk
        .get("CheckoutRequestID")
        .and_then(|v| v.as_str())
        .ok_or_else(|| LedgerError::InvalidCallback("missing CheckoutRequestID".into()))?
        .to_string();

    let items = stk
        .get("CallbackMetadata")
        .and_then(|m| m.get("Item"))
        .and_then(|i| i.as_array());

    let metadata = |name: &str| -> Option<serde_json::Value> {
        items?.iter().find_map(|item| {
            (item.get("Name")?.as_str()? == name).then(|| item.get("Value").cloned())?
        })
    };

    let amount = metadata("Amount")
        .and_then(|v| v.as_f64().map(|f| f as i64).or_else(|| v.as_i64()));
    let phone = metadata("PhoneNumber").map(|v| match v {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    });

    // Failure notifications carry no metadata; the reconciler falls back to
    // the stored intent. A success without metadata is unusable.
    if result_code == 0 && (amount.is_none() || phone.is_none()) {
        return Err(LedgerError::InvalidCallback(
            "success callback missing Amount/PhoneNumber".into(),
        ));
    }

    Ok((
        reference,
        result_code,
        amount.unwrap_or(0),
        phone.unwrap_or_default(),
    ))
}

async fn sweep_pending(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state.payments.sweep_pending().await?;
    Ok(Json(json!(report)))
}

// ===== Admin =====

#[derive(Debug, Deserialize)]
struct AdminCreditRequest {
    account_id: i64,
    amount: i64,
}

async fn admin_credit(
    State(state): State<AppState>,
    Json(payload): Json<AdminCreditRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .db
        .credit_real(payload.account_id, payload.amount)
        .await?;
    Ok(Json(json!({ "message": "Balance updated" })))
}

async fn admin_list_accounts(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let accounts = state.db.list_accounts(200).await?;
    let views: Vec<AccountView> = accounts.iter().map(AccountView::from_account).collect();
    Ok(Json(json!(views)))
}

async fn admin_list_payments(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let intents = state.payments.list_recent(200).await?;
    Ok(Json(json!(intents)))
}

// ===== Elections & Candidates =====

#[derive(Debug, Deserialize)]
struct ElectionBody {
    id: Option<String>,
    title: Option<String>,
    constituency: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn create_election(
    State(state): State<AppState>,
    Json(payload): Json<ElectionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = payload.id.as_deref().unwrap_or_default();
    let title = payload.title.as_deref().unwrap_or_default();
    state
        .elections
        .create_election(
            id,
            title,
            payload.constituency.as_deref(),
            payload.kind.as_deref().unwrap_or("presidential"),
        )
        .await?;
    state.cache.invalidate_prefix("elections:");
    Ok(Json(json!({ "success": true, "id": id })))
}

async fn get_election(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let election = state.elections.get_election(&id).await?;
    Ok(Json(json!(election)))
}

async fn list_elections(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(cached) = state.cache.get("elections:all") {
        return Ok(Json(cached));
    }
    let elections = state.elections.list_elections().await?;
    let value = json!(elections);
    state.cache.put("elections:all", value.clone());
    Ok(Json(value))
}

async fn update_election(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ElectionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .elections
        .update_election(
            &id,
            payload.title.as_deref(),
            payload.constituency.as_deref(),
            payload.kind.as_deref(),
        )
        .await?;
    state.cache.invalidate_prefix("elections:");
    Ok(Json(json!({ "success": true })))
}

async fn delete_election(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.elections.delete_election(&id).await?;
    state.cache.invalidate_prefix("elections:");
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct CandidateBody {
    election_id: Option<String>,
    name: Option<String>,
    party: Option<String>,
    odds: Option<f64>,
    image: Option<String>,
}

async fn create_candidate(
    State(state): State<AppState>,
    Json(payload): Json<CandidateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let election_id = payload
        .election_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LedgerError::InvalidInput("election_id is required".into()))?;
    let name = payload
        .name
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LedgerError::InvalidInput("name is required".into()))?;

    let id = state
        .elections
        .create_candidate(
            election_id,
            name,
            payload.party.as_deref(),
            payload.odds.unwrap_or(1.0),
            payload.image.as_deref(),
        )
        .await?;
    state.cache.invalidate_prefix("elections:");
    Ok(Json(json!({ "success": true, "id": id })))
}

async fn update_candidate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<CandidateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .elections
        .update_candidate(
            id,
            payload.name.as_deref(),
            payload.party.as_deref(),
            payload.odds,
            payload.image.as_deref(),
        )
        .await?;
    state.cache.invalidate_prefix("elections:");
    Ok(Json(json!({ "success": true })))
}

async fn delete_candidate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.elections.delete_candidate(id).await?;
    state.cache.invalidate_prefix("elections:");
    Ok(Json(json!({ "success": true })))
}

// ===== Health =====

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ===== Error Handling =====

fn authenticated_id(claims: &Claims) -> Result<i64, ApiError> {
    claims.account_id().ok_or(ApiError::Unauthorized)
}

#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    Unauthorized,
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid login".to_string(),
            ),
            ApiError::Ledger(err) => {
                let status = match err {
                    LedgerError::InvalidInput(_)
                    | LedgerError::InsufficientFunds
                    | LedgerError::BelowMinimum { .. }
                    | LedgerError::ReferralLocked
                    | LedgerError::ExceedsWithdrawable { .. }
                    | LedgerError::InvalidCallback(_) => StatusCode::BAD_REQUEST,
                    LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
                    LedgerError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
                    LedgerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.kind(), err.to_string())
            }
        };

        if status.is_server_error() {
            warn!("API error: {}", message);
        }

        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}
