//! Email/password login with per-client lockout

use crate::accounts::{Account, AccountStore};
use crate::auth::{hash_password, random_secret, verify_password, LockoutTracker};
use crate::error::AppError;
use std::sync::Arc;
use tracing::{info, warn};

/// Checks credentials against the account store, consulting the lockout
/// tracker first
#[derive(Clone)]
pub struct CredentialVerifier {
    accounts: Arc<dyn AccountStore>,
    lockout: Arc<dyn LockoutTracker>,
    /// Compared against when the email is unknown, so both failure paths
    /// cost one bcrypt verification
    dummy_hash: Arc<str>,
}

/// A reserved lockout slot; released on drop unless settled
struct Attempt<'a> {
    lockout: &'a dyn LockoutTracker,
    key: &'a str,
    settled: bool,
}

impl<'a> Attempt<'a> {
    fn begin(lockout: &'a dyn LockoutTracker, key: &'a str) -> Option<Self> {
        // Built lazily: a rejected attempt holds no slot to release
        lockout.try_begin_attempt(key).then(|| Self {
            lockout,
            key,
            settled: false,
        })
    }

    fn fail(mut self) {
        self.settled = true;
        self.lockout.record_failure(self.key);
    }

    fn succeed(mut self) {
        self.settled = true;
        self.lockout.record_success(self.key);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.lockout.abandon_attempt(self.key);
        }
    }
}

impl CredentialVerifier {
    pub fn new(accounts: Arc<dyn AccountStore>, lockout: Arc<dyn LockoutTracker>) -> Result<Self, AppError> {
        Ok(Self {
            accounts,
            lockout,
            dummy_hash: hash_password(&random_secret())?.into(),
        })
    }

    /// Unknown email and wrong password both yield `InvalidCredentials` and
    /// both count against the client key.
    #[tracing::instrument(name = "CredentialVerifier::login", skip(self, password))]
    pub async fn login(&self, email: &str, password: &str, client_key: &str) -> Result<Account, AppError> {
        let Some(attempt) = Attempt::begin(self.lockout.as_ref(), client_key) else {
            warn!("Login rejected: client is locked out");
            return Err(AppError::LockedOut);
        };

        let account = self.accounts.find_by_email(email).await?;
        let hash = account.as_ref().map_or(&*self.dummy_hash, |a| a.password_hash.as_str());
        let matches = verify_password(password, hash)?;

        match account {
            Some(account) if matches => {
                attempt.succeed();
                info!(account_id = account.id, "Login succeeded");
                Ok(account)
            }
            _ => {
                attempt.fail();
                info!("Login failed");
                Err(AppError::InvalidCredentials)
            }
        }
    }
}
