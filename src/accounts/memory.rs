//! In-memory account store

use super::{
    Account, AccountStore, ConsumeResetToken, NewAccount, SetResetToken, UpdateAccountPassword,
    UpdateAccountProfile, UpdateAccountRole,
};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Accounts {
    next_id: i32,
    by_id: HashMap<i32, Account>,
    email_index: HashMap<String, i32>,
}

/// Account store backed by a `HashMap`; all maps sit behind one lock so
/// compound updates are atomic
#[derive(Default)]
pub struct InMemoryAccountStore {
    inner: RwLock<Accounts>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, id: i32, apply: F) -> Result<Option<Account>, AppError>
    where
        F: FnOnce(&mut Account),
    {
        let mut inner = self.inner.write().await;
        Ok(inner.by_id.get_mut(&id).map(|account| {
            apply(account);
            account.updated_at = Utc::now();
            account.clone()
        }))
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .email_index
            .get(email)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<Account>, AppError> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Account>, AppError> {
        let inner = self.inner.read().await;
        let mut accounts: Vec<Account> = inner.by_id.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn create(&self, account: NewAccount) -> Result<Account, AppError> {
        let mut inner = self.inner.write().await;

        if inner.email_index.contains_key(&account.email) {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        inner.next_id += 1;
        let now = Utc::now();
        let created = Account {
            id: inner.next_id,
            email: account.email,
            password_hash: account.password_hash,
            role: account.role,
            display_name: account.display_name,
            reset_token: None,
            created_at: now,
            updated_at: now,
        };

        inner.email_index.insert(created.email.clone(), created.id);
        inner.by_id.insert(created.id, created.clone());

        Ok(created)
    }

    async fn update_role(&self, cmd: UpdateAccountRole) -> Result<Option<Account>, AppError> {
        self.modify(cmd.id, |account| account.role = cmd.role).await
    }

    async fn update_password(&self, cmd: UpdateAccountPassword) -> Result<Option<Account>, AppError> {
        self.modify(cmd.id, |account| {
            account.password_hash = cmd.password_hash;
            account.reset_token = None;
        })
        .await
    }

    async fn update_profile(&self, cmd: UpdateAccountProfile) -> Result<Option<Account>, AppError> {
        let mut inner = self.inner.write().await;

        let Some(current_email) = inner.by_id.get(&cmd.id).map(|a| a.email.clone()) else {
            return Ok(None);
        };

        if let Some(email) = &cmd.email {
            if *email != current_email {
                if inner.email_index.contains_key(email) {
                    return Err(AppError::Conflict("Email already registered".to_string()));
                }
                inner.email_index.remove(&current_email);
                inner.email_index.insert(email.clone(), cmd.id);
            }
        }

        let account = inner
            .by_id
            .get_mut(&cmd.id)
            .ok_or_else(|| AppError::Internal("Account index out of sync".to_string()))?;
        if let Some(email) = cmd.email {
            account.email = email;
        }
        if let Some(display_name) = cmd.display_name {
            account.display_name = Some(display_name);
        }
        account.updated_at = Utc::now();

        Ok(Some(account.clone()))
    }

    async fn set_reset_token(&self, cmd: SetResetToken) -> Result<(), AppError> {
        self.modify(cmd.id, |account| account.reset_token = Some(cmd.token))
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound("Account not found".to_string()))
    }

    async fn consume_reset_token(&self, cmd: ConsumeResetToken) -> Result<Option<Account>, AppError> {
        let mut inner = self.inner.write().await;

        let account = inner.by_id.values_mut().find(|account| {
            account
                .reset_token
                .as_ref()
                .is_some_and(|t| t.token_hash == cmd.token_hash && t.expires_at > cmd.now)
        });

        Ok(account.map(|account| {
            account.password_hash = cmd.new_password_hash;
            account.reset_token = None;
            account.updated_at = Utc::now();
            account.clone()
        }))
    }

    async fn delete(&self, id: i32) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        match inner.by_id.remove(&id) {
            Some(account) => {
                inner.email_index.remove(&account.email);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
