//! Federated login from an external identity provider
//!
//! The provider's role claims are authoritative: every login re-derives the
//! internal role and overwrites the stored one. Accounts are provisioned on
//! first login with an unusable random password.

use crate::accounts::{Account, AccountStore, NewAccount, UpdateAccountRole};
use crate::audit::{AuditEvent, AuditSink};
use crate::auth::{hash_password, random_secret, IssuedToken, Role, TokenIssuer};
use crate::config::{AssertionTrust, FederationConfig};
use crate::error::AppError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Claims read from the provider's token
#[derive(Debug, Deserialize)]
struct AssertionClaims {
    preferred_username: Option<String>,
    email: Option<String>,
    name: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

/// Identity extracted from a trusted assertion
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedIdentity {
    pub email: String,
    pub display_name: String,
    pub role: Role,
}

impl TryFrom<AssertionClaims> for FederatedIdentity {
    type Error = AppError;

    fn try_from(claims: AssertionClaims) -> Result<Self, Self::Error> {
        let email = claims
            .preferred_username
            .or(claims.email)
            .filter(|e| !e.is_empty())
            .ok_or(AppError::InvalidAssertion)?;
        let display_name = claims
            .name
            .or(claims.display_name)
            .unwrap_or_else(|| email.clone());

        Ok(Self {
            role: Role::highest_of(claims.roles.as_slice()),
            email,
            display_name,
        })
    }
}

enum Verifier {
    Signed { key: DecodingKey, validation: Validation },
    Upstream { validation: Validation },
    Disabled,
}

#[derive(Clone)]
pub struct FederationAdapter {
    accounts: Arc<dyn AccountStore>,
    audit: Arc<dyn AuditSink>,
    tokens: TokenIssuer,
    allowed_domain: String,
    verifier: Arc<Verifier>,
}

impl FederationAdapter {
    pub fn new(
        config: &FederationConfig,
        accounts: Arc<dyn AccountStore>,
        audit: Arc<dyn AuditSink>,
        tokens: TokenIssuer,
    ) -> Result<Self, AppError> {
        let verifier = if config.enabled {
            Self::build_verifier(config)?
        } else {
            Verifier::Disabled
        };

        Ok(Self {
            accounts,
            audit,
            tokens,
            allowed_domain: config.allowed_domain.trim().to_ascii_lowercase(),
            verifier: Arc::new(verifier),
        })
    }

    fn build_verifier(config: &FederationConfig) -> Result<Verifier, AppError> {
        let trust = config
            .trust
            .as_ref()
            .ok_or_else(|| AppError::Config("Federation enabled without an assertion trust source".to_string()))?;

        let signed = |algorithm: Algorithm, key: DecodingKey| {
            let mut validation = Validation::new(algorithm);
            match &config.audience {
                Some(aud) => validation.set_audience(&[aud]),
                None => validation.validate_aud = false,
            }
            if let Some(iss) = &config.issuer {
                validation.set_issuer(&[iss]);
            }
            Verifier::Signed { key, validation }
        };

        Ok(match trust {
            AssertionTrust::PublicKeyPem(pem) => {
                let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| AppError::Config(format!("Invalid federation public key: {}", e)))?;
                signed(Algorithm::RS256, key)
            }
            AssertionTrust::SharedSecret(secret) => {
                signed(Algorithm::HS256, DecodingKey::from_secret(secret.as_bytes()))
            }
            AssertionTrust::Upstream => {
                warn!("Federated assertions are not signature-checked here; relying on upstream verification");
                let mut validation = Validation::default();
                validation.insecure_disable_signature_validation();
                validation.validate_aud = false;
                validation.validate_exp = false;
                validation.required_spec_claims.clear();
                Verifier::Upstream { validation }
            }
        })
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(*self.verifier, Verifier::Disabled)
    }

    /// Decode and trust-check an assertion. Any failure is `InvalidAssertion`.
    pub fn identify(&self, assertion: &str) -> Result<FederatedIdentity, AppError> {
        let claims = match &*self.verifier {
            Verifier::Signed { key, validation } => decode::<AssertionClaims>(assertion, key, validation),
            Verifier::Upstream { validation } => {
                decode::<AssertionClaims>(assertion, &DecodingKey::from_secret(&[]), validation)
            }
            Verifier::Disabled => return Err(AppError::FederationDisabled),
        }
        .map_err(|e| {
            warn!(error = %e, "Rejected federated assertion");
            AppError::InvalidAssertion
        })?
        .claims;

        FederatedIdentity::try_from(claims)
    }

    fn domain_allowed(&self, email: &str) -> bool {
        email.to_ascii_lowercase().ends_with(&self.allowed_domain)
    }

    /// Exchange an identity provider assertion for a session token
    #[tracing::instrument(name = "FederationAdapter::federated_login", skip_all, fields(client = client_key))]
    pub async fn federated_login(&self, assertion: Option<&str>, client_key: &str) -> Result<(Account, IssuedToken), AppError> {
        if !self.is_enabled() {
            return Err(AppError::FederationDisabled);
        }

        let assertion = assertion.map(str::trim).filter(|a| !a.is_empty()).ok_or_else(|| {
            info!("Federated login without token");
            AppError::BadRequest("No identity provider token supplied".to_string())
        })?;

        let identity = self.identify(assertion)?;
        info!(email = %identity.email, "Federated login attempt");

        if !self.domain_allowed(&identity.email) {
            warn!(email = %identity.email, "Federated login rejected: domain not allowed");
            return Err(AppError::DomainNotAllowed);
        }

        let account = self.provision_or_sync(&identity).await?;
        let token = self
            .tokens
            .issue_with_display_name(&account, identity.display_name)?;

        Ok((account, token))
    }

    async fn provision_or_sync(&self, identity: &FederatedIdentity) -> Result<Account, AppError> {
        match self.accounts.find_by_email(&identity.email).await? {
            None => {
                let account = self
                    .accounts
                    .create(NewAccount {
                        email: identity.email.clone(),
                        password_hash: hash_password(&random_secret())?,
                        role: identity.role,
                        display_name: Some(identity.display_name.clone()),
                    })
                    .await?;
                info!(email = %account.email, role = %account.role, "Provisioned federated account");
                self.audit_event(&account, AuditEvent::FederatedProvision).await;
                Ok(account)
            }
            Some(account) if account.role != identity.role => {
                let previous = account.role;
                let account = self
                    .accounts
                    .update_role(UpdateAccountRole {
                        id: account.id,
                        role: identity.role,
                    })
                    .await?
                    .ok_or_else(|| AppError::Internal("Account vanished during role sync".to_string()))?;
                info!(email = %account.email, from = %previous, to = %account.role, "Synchronised role from identity provider");
                self.audit_event(&account, AuditEvent::RoleSync).await;
                Ok(account)
            }
            Some(account) => Ok(account),
        }
    }

    async fn audit_event(&self, account: &Account, event: AuditEvent) {
        if let Err(e) = self.audit.record(&account.email, event, Some(account.id)).await {
            error!(error = %e, event = event.as_str(), "Failed to record audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::InMemoryAccountStore;
    use crate::audit::testing::RecordingAuditSink;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const IDP_SECRET: &str = "idp-shared-secret";

    struct Fixture {
        adapter: FederationAdapter,
        store: Arc<InMemoryAccountStore>,
        audit: Arc<RecordingAuditSink>,
    }

    fn config(trust: AssertionTrust) -> FederationConfig {
        FederationConfig {
            enabled: true,
            allowed_domain: "@org.example".to_string(),
            trust: Some(trust),
            audience: None,
            issuer: None,
        }
    }

    fn fixture_with(config: FederationConfig) -> Fixture {
        let store = Arc::new(InMemoryAccountStore::new());
        let audit = Arc::new(RecordingAuditSink::default());
        let adapter = FederationAdapter::new(
            &config,
            store.clone(),
            audit.clone(),
            TokenIssuer::new("session-secret", Duration::minutes(15)),
        )
        .unwrap();
        Fixture { adapter, store, audit }
    }

    fn fixture() -> Fixture {
        fixture_with(config(AssertionTrust::SharedSecret(IDP_SECRET.to_string())))
    }

    fn assertion(email: &str, roles: &[&str]) -> String {
        let claims = json!({
            "preferred_username": email,
            "name": "Anna Beispiel",
            "roles": roles,
            "exp": (Utc::now() + Duration::minutes(5)).timestamp(),
        });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(IDP_SECRET.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn test_precedence_upgrades_existing_account() {
        let f = fixture();
        let existing = f
            .store
            .create(NewAccount {
                email: "a@org.example".to_string(),
                password_hash: "hash".to_string(),
                role: Role::User,
                display_name: None,
            })
            .await
            .unwrap();

        let (account, token) = f
            .adapter
            .federated_login(Some(&assertion("a@org.example", &["admin", "user"])), "client")
            .await
            .unwrap();

        assert_eq!(account.role, Role::Admin);
        assert_eq!(token.claims.role, Role::Admin);
        assert_eq!(token.claims.display_name.as_deref(), Some("Anna Beispiel"));
        let stored = f.store.find_by_email("a@org.example").await.unwrap().unwrap();
        assert_eq!(stored.role, Role::Admin);
        assert_eq!(
            f.audit.events(),
            vec![("a@org.example".to_string(), AuditEvent::RoleSync, Some(existing.id))]
        );
    }

    #[tokio::test]
    async fn test_role_is_rederived_on_every_login() {
        let f = fixture();
        f.adapter
            .federated_login(Some(&assertion("b@org.example", &["admin"])), "client")
            .await
            .unwrap();
        let (account, _) = f
            .adapter
            .federated_login(Some(&assertion("b@org.example", &["vorstand"])), "client")
            .await
            .unwrap();
        assert_eq!(account.role, Role::Vorstand);

        let (account, _) = f
            .adapter
            .federated_login(Some(&assertion("b@org.example", &[])), "client")
            .await
            .unwrap();
        assert_eq!(account.role, Role::User);
        assert_eq!(f.store.find_by_id(account.id).await.unwrap().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn test_first_login_provisions_account() {
        let f = fixture();
        let (account, _) = f
            .adapter
            .federated_login(Some(&assertion("new@org.example", &["lgst"])), "client")
            .await
            .unwrap();

        assert_eq!(account.role, Role::Lgst);
        assert_eq!(account.display_name.as_deref(), Some("Anna Beispiel"));
        assert_eq!(account.password_hash.len(), 60);
        assert_eq!(f.audit.events()[0].1, AuditEvent::FederatedProvision);
    }

    #[tokio::test]
    async fn test_unchanged_role_writes_nothing() {
        let f = fixture();
        f.adapter
            .federated_login(Some(&assertion("c@org.example", &["vorstand"])), "client")
            .await
            .unwrap();
        f.adapter
            .federated_login(Some(&assertion("c@org.example", &["vorstand"])), "client")
            .await
            .unwrap();
        assert_eq!(f.audit.events().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_domain_rejected_without_account() {
        let f = fixture();
        let err = f
            .adapter
            .federated_login(Some(&assertion("eve@elsewhere.example", &["admin"])), "client")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DomainNotAllowed));
        assert!(f.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_assertion_rejected() {
        let f = fixture();
        assert!(matches!(
            f.adapter.federated_login(None, "client").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            f.adapter.federated_login(Some("  "), "client").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_assertion_fails_closed() {
        let f = fixture();
        for garbage in ["not-a-jwt", "a.b.c", "eyJhbGciOiJIUzI1NiJ9.e30"] {
            assert!(matches!(
                f.adapter.federated_login(Some(garbage), "client").await,
                Err(AppError::InvalidAssertion)
            ));
        }
    }

    #[tokio::test]
    async fn test_wrong_signature_rejected() {
        let f = fixture();
        let forged = encode(
            &Header::default(),
            &json!({
                "preferred_username": "a@org.example",
                "roles": ["admin"],
                "exp": (Utc::now() + Duration::minutes(5)).timestamp(),
            }),
            &EncodingKey::from_secret(b"attacker"),
        )
        .unwrap();

        assert!(matches!(
            f.adapter.federated_login(Some(&forged), "client").await,
            Err(AppError::InvalidAssertion)
        ));
        assert!(f.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assertion_without_subject_rejected() {
        let f = fixture();
        let token = encode(
            &Header::default(),
            &json!({ "roles": ["admin"], "exp": (Utc::now() + Duration::minutes(5)).timestamp() }),
            &EncodingKey::from_secret(IDP_SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            f.adapter.federated_login(Some(&token), "client").await,
            Err(AppError::InvalidAssertion)
        ));
    }

    #[tokio::test]
    async fn test_upstream_trust_accepts_unsigned_claims() {
        let f = fixture_with(config(AssertionTrust::Upstream));
        let token = encode(
            &Header::default(),
            &json!({ "email": "d@org.example", "displayName": "Dora", "roles": ["lgst"] }),
            &EncodingKey::from_secret(b"whatever-the-gateway-checked"),
        )
        .unwrap();

        let identity = f.adapter.identify(&token).unwrap();
        assert_eq!(
            identity,
            FederatedIdentity {
                email: "d@org.example".to_string(),
                display_name: "Dora".to_string(),
                role: Role::Lgst,
            }
        );
    }

    #[tokio::test]
    async fn test_disabled_adapter_rejects() {
        let f = fixture_with(FederationConfig::default());
        assert!(!f.adapter.is_enabled());
        assert!(matches!(
            f.adapter
                .federated_login(Some(&assertion("a@org.example", &["admin"])), "client")
                .await,
            Err(AppError::FederationDisabled)
        ));
    }

    #[test]
    fn test_enabled_without_trust_is_a_config_error() {
        let config = FederationConfig {
            enabled: true,
            ..Default::default()
        };
        let result = FederationAdapter::new(
            &config,
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(RecordingAuditSink::default()),
            TokenIssuer::new("s", Duration::minutes(15)),
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
