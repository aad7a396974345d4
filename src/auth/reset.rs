//! Password recovery via single-use emailed tokens

use crate::accounts::{AccountStore, ConsumeResetToken, ResetTokenRecord, SetResetToken};
use crate::auth::{hash_password, hash_reset_token, random_secret};
use crate::error::AppError;
use crate::mail::MailSender;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info};

const RESET_SUBJECT: &str = "Passwort zurücksetzen";

#[derive(Clone)]
pub struct PasswordResetFlow {
    accounts: Arc<dyn AccountStore>,
    mail: Arc<dyn MailSender>,
    token_ttl: Duration,
    frontend_url: String,
}

impl PasswordResetFlow {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        mail: Arc<dyn MailSender>,
        token_ttl: Duration,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            accounts,
            mail,
            token_ttl,
            frontend_url: frontend_url.into(),
        }
    }

    /// Returns `Ok(())` whether or not the email belongs to an account.
    /// A mail delivery failure is logged and leaves the stored token valid.
    #[tracing::instrument(name = "PasswordResetFlow::request_reset", skip(self))]
    pub async fn request_reset(&self, email: &str) -> Result<(), AppError> {
        let Some(account) = self.accounts.find_by_email(email).await? else {
            info!("Reset requested for unknown email");
            return Ok(());
        };

        // Only the digest is stored; the raw token leaves in the mail
        let token = random_secret();
        self.accounts
            .set_reset_token(SetResetToken {
                id: account.id,
                token: ResetTokenRecord {
                    token_hash: hash_reset_token(&token),
                    expires_at: Utc::now() + self.token_ttl,
                },
            })
            .await?;

        let reset_url = format!(
            "{}/reset-password?token={}",
            self.frontend_url.trim_end_matches('/'),
            token
        );
        let body = format!(
            "<p>Hallo,<br>du hast einen Passwort-Reset angefordert.<br>\
             Klicke auf folgenden Link, um ein neues Passwort zu setzen:<br>\
             <a href=\"{url}\">{url}</a><br>Der Link ist {minutes} Minuten gültig.</p>",
            url = reset_url,
            minutes = self.token_ttl.num_minutes()
        );

        if let Err(e) = self.mail.send(&[account.email.clone()], RESET_SUBJECT, &body).await {
            error!(account_id = account.id, error = %e, "Failed to deliver reset mail");
        } else {
            info!(account_id = account.id, "Reset mail sent");
        }

        Ok(())
    }

    /// Rotate the password. The token is cleared in the same store update.
    #[tracing::instrument(name = "PasswordResetFlow::complete_reset", skip_all)]
    pub async fn complete_reset(&self, token: &str, new_password: &str) -> Result<(), AppError> {
        if token.is_empty() {
            return Err(AppError::InvalidToken);
        }

        let account = self
            .accounts
            .consume_reset_token(ConsumeResetToken {
                token_hash: hash_reset_token(token),
                new_password_hash: hash_password(new_password)?,
                now: Utc::now(),
            })
            .await?
            .ok_or(AppError::InvalidToken)?;

        info!(account_id = account.id, "Password reset completed");
        Ok(())
    }
}
