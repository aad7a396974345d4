//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::accounts::AccountStore;
use crate::audit::AuditSink;
use crate::auth::{
    CredentialVerifier, FederationAdapter, InMemoryLockoutTracker, LockoutPolicy, LockoutTracker,
    PasswordResetFlow, TokenIssuer,
};
use crate::config::Settings;
use crate::error::AppError;
use crate::mail::MailSender;
use chrono::Duration;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Settings,

    /// Account persistence (Postgres or in-memory)
    pub accounts: Arc<dyn AccountStore>,

    pub audit: Arc<dyn AuditSink>,

    pub tokens: TokenIssuer,
    pub credentials: CredentialVerifier,
    pub reset: PasswordResetFlow,
    pub federation: FederationAdapter,
}

impl AppState {
    /// Wire all auth components around the given collaborators
    pub fn new(
        settings: Settings,
        accounts: Arc<dyn AccountStore>,
        mail: Arc<dyn MailSender>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, AppError> {
        let auth = &settings.auth;

        // Process-local failed-login throttle
        let lockout: Arc<dyn LockoutTracker> = Arc::new(InMemoryLockoutTracker::new(LockoutPolicy {
            threshold: auth.lockout_threshold,
            duration: Duration::minutes(auth.lockout_minutes),
            ..LockoutPolicy::default()
        }));
        let tokens = TokenIssuer::new(&auth.jwt_secret, Duration::minutes(auth.token_ttl_minutes));

        let credentials = CredentialVerifier::new(accounts.clone(), lockout)?;
        let reset = PasswordResetFlow::new(
            accounts.clone(),
            mail,
            Duration::minutes(auth.reset_token_ttl_minutes),
            auth.frontend_url.clone(),
        );
        let federation = FederationAdapter::new(&settings.federation, accounts.clone(), audit.clone(), tokens.clone())?;

        Ok(Self {
            settings,
            accounts,
            audit,
            tokens,
            credentials,
            reset,
            federation,
        })
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
