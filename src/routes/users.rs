//! Account management route handlers (admin only)
//!
//! Every mutation is written to the audit sink with the acting admin's email.

use crate::accounts::{
    Account, AccountResponse, NewAccount, UpdateAccountPassword, UpdateAccountProfile, UpdateAccountRole,
};
use crate::audit::AuditEvent;
use crate::auth::{hash_password, Claims, Role};
use crate::error::{not_found_error, validation_error, ApiResult, AppError};
use crate::models::{MessageResponse, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password too short"))]
    pub password: String,
    pub role: Role,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(email(message = "Invalid email"))]
    pub email: Option<String>,
    #[validate(length(min = 6, message = "Password too short"))]
    pub password: Option<String>,
    pub role: Option<Role>,
    pub display_name: Option<String>,
}

/// GET /api/users
pub async fn list_users(State(state): State<SharedState>) -> ApiResult<Json<SuccessResponse<Vec<AccountResponse>>>> {
    let users = state
        .accounts
        .list()
        .await?
        .iter()
        .map(AccountResponse::from)
        .collect();

    Ok(Json(SuccessResponse::with_data("Users loaded.", users)))
}

/// POST /api/users
pub async fn create_user(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<AccountResponse>>)> {
    req.validate().map_err(|e| validation_error(e.to_string()))?;

    let account = state
        .accounts
        .create(NewAccount {
            email: req.email,
            password_hash: hash_password(&req.password)?,
            role: req.role,
            display_name: req.display_name,
        })
        .await?;

    state
        .audit
        .record(&claims.email, AuditEvent::UserCreate, Some(account.id))
        .await?;
    info!(actor = %claims.email, account_id = account.id, role = %account.role, "Account created");

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data("User created.", AccountResponse::from(&account))),
    ))
}

/// PUT /api/users/{id}
///
/// Each supplied field becomes its own store command. Once any command has
/// committed, the update is audited, even when a later command fails.
pub async fn update_user(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<SuccessResponse<AccountResponse>>> {
    req.validate().map_err(|e| validation_error(e.to_string()))?;

    let current = state
        .accounts
        .find_by_id(id)
        .await?
        .ok_or_else(|| not_found_error("User not found"))?;

    let mut committed = false;
    let outcome = apply_update(&state, id, req, &mut committed).await;

    if committed {
        state
            .audit
            .record(&claims.email, AuditEvent::UserUpdate, Some(id))
            .await?;
        info!(actor = %claims.email, account_id = id, complete = outcome.is_ok(), "Account updated");
    }

    let account = outcome?.unwrap_or(current);
    Ok(Json(SuccessResponse::with_data("User updated.", AccountResponse::from(&account))))
}

/// Returns the account as left by the last committed command
async fn apply_update(
    state: &SharedState,
    id: i32,
    req: UpdateUserRequest,
    committed: &mut bool,
) -> ApiResult<Option<Account>> {
    // Hash before touching the store so a hashing failure commits nothing
    let password_hash = req.password.as_deref().map(hash_password).transpose()?;
    let mut account = None;

    if req.email.is_some() || req.display_name.is_some() {
        let updated = state
            .accounts
            .update_profile(UpdateAccountProfile {
                id,
                email: req.email,
                display_name: req.display_name,
            })
            .await?
            .ok_or_else(|| not_found_error("User not found"))?;
        *committed = true;
        account = Some(updated);
    }

    if let Some(role) = req.role {
        let updated = state
            .accounts
            .update_role(UpdateAccountRole { id, role })
            .await?
            .ok_or_else(|| not_found_error("User not found"))?;
        *committed = true;
        account = Some(updated);
    }

    if let Some(password_hash) = password_hash {
        let updated = state
            .accounts
            .update_password(UpdateAccountPassword { id, password_hash })
            .await?
            .ok_or_else(|| not_found_error("User not found"))?;
        *committed = true;
        account = Some(updated);
    }

    Ok(account)
}

/// DELETE /api/users/{id}
pub async fn delete_user(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i32>,
) -> ApiResult<Json<MessageResponse>> {
    if !state.accounts.delete(id).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    state
        .audit
        .record(&claims.email, AuditEvent::UserDelete, Some(id))
        .await?;
    info!(actor = %claims.email, account_id = id, "Account deleted");

    Ok(Json(MessageResponse::new("User deleted.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{
        AccountStore, ConsumeResetToken, InMemoryAccountStore, SetResetToken,
    };
    use crate::audit::testing::RecordingAuditSink;
    use crate::config::Settings;
    use crate::mail::testing::RecordingMailSender;
    use crate::state::AppState;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    /// In-memory store whose password updates always fail
    #[derive(Default)]
    struct PasswordWritesFail {
        inner: InMemoryAccountStore,
    }

    #[async_trait]
    impl AccountStore for PasswordWritesFail {
        async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
            self.inner.find_by_email(email).await
        }

        async fn find_by_id(&self, id: i32) -> Result<Option<Account>, AppError> {
            self.inner.find_by_id(id).await
        }

        async fn list(&self) -> Result<Vec<Account>, AppError> {
            self.inner.list().await
        }

        async fn create(&self, account: NewAccount) -> Result<Account, AppError> {
            self.inner.create(account).await
        }

        async fn update_role(&self, cmd: UpdateAccountRole) -> Result<Option<Account>, AppError> {
            self.inner.update_role(cmd).await
        }

        async fn update_password(&self, _cmd: UpdateAccountPassword) -> Result<Option<Account>, AppError> {
            Err(AppError::Internal("connection reset".to_string()))
        }

        async fn update_profile(&self, cmd: UpdateAccountProfile) -> Result<Option<Account>, AppError> {
            self.inner.update_profile(cmd).await
        }

        async fn set_reset_token(&self, cmd: SetResetToken) -> Result<(), AppError> {
            self.inner.set_reset_token(cmd).await
        }

        async fn consume_reset_token(&self, cmd: ConsumeResetToken) -> Result<Option<Account>, AppError> {
            self.inner.consume_reset_token(cmd).await
        }

        async fn delete(&self, id: i32) -> Result<bool, AppError> {
            self.inner.delete(id).await
        }
    }

    fn admin_claims() -> Claims {
        Claims {
            sub: 1,
            email: "admin@org.example".to_string(),
            role: Role::Admin,
            display_name: None,
            iat: 0,
            exp: 0,
        }
    }

    #[tokio::test]
    async fn test_partial_update_is_still_audited() {
        let store = Arc::new(PasswordWritesFail::default());
        let target = store
            .create(NewAccount {
                email: "user@org.example".to_string(),
                password_hash: "hash".to_string(),
                role: Role::User,
                display_name: None,
            })
            .await
            .unwrap();
        let audit = Arc::new(RecordingAuditSink::default());
        let state = Arc::new(
            AppState::new(
                Settings::default(),
                store.clone(),
                Arc::new(RecordingMailSender::default()),
                audit.clone(),
            )
            .unwrap(),
        );

        let result = update_user(
            State(state),
            Extension(admin_claims()),
            Path(target.id),
            Json(UpdateUserRequest {
                email: None,
                password: Some("new-password".to_string()),
                role: Some(Role::Vorstand),
                display_name: None,
            }),
        )
        .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(store.find_by_id(target.id).await.unwrap().unwrap().role, Role::Vorstand);
        assert_eq!(
            audit.events(),
            vec![("admin@org.example".to_string(), AuditEvent::UserUpdate, Some(target.id))]
        );
    }

    #[tokio::test]
    async fn test_empty_update_writes_no_audit_event() {
        let store = Arc::new(InMemoryAccountStore::new());
        let target = store
            .create(NewAccount {
                email: "user@org.example".to_string(),
                password_hash: "hash".to_string(),
                role: Role::User,
                display_name: None,
            })
            .await
            .unwrap();
        let audit = Arc::new(RecordingAuditSink::default());
        let state = Arc::new(
            AppState::new(
                Settings::default(),
                store,
                Arc::new(RecordingMailSender::default()),
                audit.clone(),
            )
            .unwrap(),
        );

        let Json(response) = update_user(
            State(state),
            Extension(admin_claims()),
            Path(target.id),
            Json(UpdateUserRequest {
                email: None,
                password: None,
                role: None,
                display_name: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.data.unwrap().email, "user@org.example");
        assert!(audit.events().is_empty());
    }
}
