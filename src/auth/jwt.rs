//! JWT session tokens
//!
//! Tokens are self-contained: HS256-signed claims with a fixed lifetime and
//! no server-side session table. Renewal re-reads the account, so a role
//! change is picked up on the next renew.

use crate::accounts::{Account, AccountStore};
use crate::auth::Role;
use crate::error::AppError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Subject (account ID)
    pub sub: i32,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// A freshly signed token
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub claims: Claims,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Sign a token for the account's current state
    pub fn issue(&self, account: &Account) -> Result<IssuedToken, AppError> {
        self.issue_at(account, account.display_name.clone(), Utc::now())
    }

    /// Like `issue`, with a display name that is not taken from the store
    pub fn issue_with_display_name(&self, account: &Account, display_name: String) -> Result<IssuedToken, AppError> {
        self.issue_at(account, Some(display_name), Utc::now())
    }

    pub(crate) fn issue_at(
        &self,
        account: &Account,
        display_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AppError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: account.id,
            email: account.email.clone(),
            role: account.role,
            display_name,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to create session token: {}", e)))?;

        Ok(IssuedToken {
            token,
            expires_at: Utc.timestamp_opt(claims.exp, 0).single().unwrap_or(expires_at),
            claims,
        })
    }

    /// Sliding renewal: re-read the account and sign from its current state,
    /// never from the claims of the token being renewed
    pub async fn renew(&self, accounts: &dyn AccountStore, account_id: i32) -> Result<(Account, IssuedToken), AppError> {
        let account = accounts
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::Unauthenticated("Account no longer exists".to_string()))?;

        let display_name = account.display_name_or_email().to_string();
        let token = self.issue_with_display_name(&account, display_name)?;
        Ok((account, token))
    }

    /// Check signature and expiry, then hand out the claims
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::Unauthenticated("Token expired".to_string()),
                _ => AppError::Unauthenticated("Invalid token".to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(role: Role) -> Account {
        Account {
            id: 7,
            email: "a@org.example".to_string(),
            password_hash: "hash".to_string(),
            role,
            display_name: Some("Anna".to_string()),
            reset_token: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_issued_token_verifies_with_fixed_lifetime() {
        let issuer = TokenIssuer::new("secret", Duration::minutes(15));
        let issued = issuer.issue(&account(Role::Vorstand)).unwrap();

        let claims = issuer.verify(&issued.token).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.role, Role::Vorstand);
        assert_eq!(claims.display_name.as_deref(), Some("Anna"));
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn test_expired_token_rejected() {
        let issuer = TokenIssuer::new("secret", Duration::minutes(15));
        let issued = issuer
            .issue_at(&account(Role::Admin), None, Utc::now() - Duration::minutes(16))
            .unwrap();

        let err = issuer.verify(&issued.token).unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(msg) if msg == "Token expired"));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let ours = TokenIssuer::new("secret", Duration::minutes(15));
        let theirs = TokenIssuer::new("other-secret", Duration::minutes(15));
        let forged = theirs.issue(&account(Role::Admin)).unwrap();

        assert!(matches!(ours.verify(&forged.token), Err(AppError::Unauthenticated(_))));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let issuer = TokenIssuer::new("secret", Duration::minutes(15));
        let issued = issuer.issue(&account(Role::User)).unwrap();

        let mut parts: Vec<&str> = issued.token.split('.').collect();
        let other = issuer.issue(&account(Role::Admin)).unwrap();
        let other_payload = other.token.split('.').nth(1).unwrap().to_string();
        parts[1] = &other_payload;

        assert!(issuer.verify(&parts.join(".")).is_err());
    }

    #[tokio::test]
    async fn test_renew_reflects_demotion() {
        use crate::accounts::{InMemoryAccountStore, NewAccount, UpdateAccountRole};

        let store = InMemoryAccountStore::new();
        let created = store
            .create(NewAccount {
                email: "a@org.example".to_string(),
                password_hash: "hash".to_string(),
                role: Role::Admin,
                display_name: None,
            })
            .await
            .unwrap();
        let issuer = TokenIssuer::new("secret", Duration::minutes(15));
        let original = issuer.issue(&created).unwrap();
        assert_eq!(original.claims.role, Role::Admin);

        store
            .update_role(UpdateAccountRole { id: created.id, role: Role::User })
            .await
            .unwrap();

        let (_, renewed) = issuer.renew(&store, original.claims.sub).await.unwrap();
        assert_eq!(renewed.claims.role, Role::User);
        assert_eq!(renewed.claims.display_name.as_deref(), Some("a@org.example"));
        assert_eq!(issuer.verify(&renewed.token).unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn test_renew_for_deleted_account() {
        let store = crate::accounts::InMemoryAccountStore::new();
        let issuer = TokenIssuer::new("secret", Duration::minutes(15));
        assert!(matches!(issuer.renew(&store, 42).await, Err(AppError::Unauthenticated(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        let issuer = TokenIssuer::new("secret", Duration::minutes(15));
        assert!(matches!(issuer.verify("not.a.token"), Err(AppError::Unauthenticated(_))));
    }
}
