//! Account storage
//!
//! The `AccountStore` port with an in-memory and a PostgreSQL implementation.
//! Mutations go through one command type per operation so a single call can
//! never touch both the role and the reset-token fields.

mod memory;
mod postgres;

pub use memory::InMemoryAccountStore;
pub use postgres::{PostgresAccountStore, ACCOUNTS_TABLE_DDL};

use crate::auth::Role;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stored account record
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i32,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub reset_token: Option<ResetTokenRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Name shown in session claims, falling back to the email
    pub fn display_name_or_email(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// Reset token digest and its expiry, always set or cleared together
#[derive(Debug, Clone, PartialEq)]
pub struct ResetTokenRecord {
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Public profile returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: i32,
    pub email: String,
    pub role: Role,
    pub display_name: Option<String>,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            role: account.role,
            display_name: account.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateAccountRole {
    pub id: i32,
    pub role: Role,
}

/// Replaces the password hash. Also clears any pending reset token.
#[derive(Debug, Clone)]
pub struct UpdateAccountPassword {
    pub id: i32,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct UpdateAccountProfile {
    pub id: i32,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SetResetToken {
    pub id: i32,
    pub token: ResetTokenRecord,
}

/// Rotate the password of whichever account holds an unexpired reset token
/// with this digest, clearing the token in the same step
#[derive(Debug, Clone)]
pub struct ConsumeResetToken {
    pub token_hash: String,
    pub new_password_hash: String,
    pub now: DateTime<Utc>,
}

/// Durable account persistence
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError>;

    async fn find_by_id(&self, id: i32) -> Result<Option<Account>, AppError>;

    async fn list(&self) -> Result<Vec<Account>, AppError>;

    /// Fails with `AppError::Conflict` when the email is taken
    async fn create(&self, account: NewAccount) -> Result<Account, AppError>;

    async fn update_role(&self, cmd: UpdateAccountRole) -> Result<Option<Account>, AppError>;

    async fn update_password(&self, cmd: UpdateAccountPassword) -> Result<Option<Account>, AppError>;

    async fn update_profile(&self, cmd: UpdateAccountProfile) -> Result<Option<Account>, AppError>;

    async fn set_reset_token(&self, cmd: SetResetToken) -> Result<(), AppError>;

    /// Atomic: at most one concurrent caller succeeds for a given token
    async fn consume_reset_token(&self, cmd: ConsumeResetToken) -> Result<Option<Account>, AppError>;

    /// Returns false when no account had this id
    async fn delete(&self, id: i32) -> Result<bool, AppError>;
}
