//! Authentication route handlers
//!
//! Login, password reset, federated login, renewal and the current profile.

use crate::accounts::{Account, AccountResponse};
use crate::auth::{Claims, ClientKey, IssuedToken};
use crate::error::{validation_error, ApiResult, AppError};
use crate::models::MessageResponse;
use crate::state::SharedState;
use axum::{
    extract::{Extension, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Shown for every reset request, whether or not the account exists
pub const RESET_REQUESTED_MESSAGE: &str = "If the email exists, a reset link has been sent.";

// ============================================
// Request/Response Types
// ============================================

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password too short"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RequestResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    pub token: String,
    #[validate(length(min = 6, message = "Password too short"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct FederatedLoginRequest {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AccountResponse,
}

impl AuthResponse {
    /// The profile's display name is the one carried in the token
    fn new(account: &Account, issued: IssuedToken) -> Self {
        let mut user = AccountResponse::from(account);
        user.display_name = issued.claims.display_name.clone().or(user.display_name);

        Self {
            success: true,
            token: issued.token,
            expires_at: issued.expires_at,
            user,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: AccountResponse,
}

// ============================================
// Route Handlers
// ============================================

/// POST /api/auth/login
///
/// Authenticate with email and password, receive a session token.
pub async fn login(
    State(state): State<SharedState>,
    ClientKey(client_key): ClientKey,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    req.validate().map_err(|e| validation_error(e.to_string()))?;

    let account = state.credentials.login(&req.email, &req.password, &client_key).await?;
    let issued = state.tokens.issue(&account)?;

    Ok(Json(AuthResponse::new(&account, issued)))
}

/// POST /api/auth/request-reset
///
/// Identical response for known and unknown emails.
pub async fn request_reset(
    State(state): State<SharedState>,
    Json(req): Json<RequestResetRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.reset.request_reset(req.email.trim()).await?;

    Ok(Json(MessageResponse::new(RESET_REQUESTED_MESSAGE)))
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<SharedState>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    req.validate().map_err(|e| validation_error(e.to_string()))?;

    state.reset.complete_reset(&req.token, &req.password).await?;

    Ok(Json(MessageResponse::new("Password has been reset.")))
}

/// POST /api/auth/microsoft
///
/// Exchange an identity provider token for a session token.
pub async fn federated_login(
    State(state): State<SharedState>,
    ClientKey(client_key): ClientKey,
    Json(req): Json<FederatedLoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let (account, issued) = state
        .federation
        .federated_login(req.token.as_deref(), &client_key)
        .await?;

    Ok(Json(AuthResponse::new(&account, issued)))
}

/// POST /api/auth/renew
///
/// Sliding expiration: a fresh token built from the account's current state.
pub async fn renew(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<AuthResponse>> {
    let (account, issued) = state.tokens.renew(state.accounts.as_ref(), claims.sub).await?;

    Ok(Json(AuthResponse::new(&account, issued)))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MeResponse>> {
    let account = state
        .accounts
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Account no longer exists".to_string()))?;

    Ok(Json(MeResponse {
        success: true,
        user: AccountResponse::from(&account),
    }))
}
