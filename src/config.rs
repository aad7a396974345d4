//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

const DEV_JWT_SECRET: &str = "kreis-auth-dev-secret-change-in-production";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
    /// Take the client key from `X-Forwarded-For` instead of the socket address
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
            trust_proxy_headers: false,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 10,
            require_tls: false,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Session, lockout and password reset policy
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub lockout_threshold: u32,
    pub lockout_minutes: i64,
    pub reset_token_ttl_minutes: i64,
    /// Base URL of the frontend; reset links point at `{frontend_url}/reset-password`
    pub frontend_url: String,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl_minutes: 15,
            lockout_threshold: 5,
            lockout_minutes: 15,
            reset_token_ttl_minutes: 60,
            frontend_url: "http://localhost:3000".to_string(),
            bootstrap_admin: None,
        }
    }
}

impl AuthConfig {
    /// Reject policy values that would disable a protection
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lockout_threshold == 0 {
            return Err(ConfigError::InvalidValue("LOCKOUT_THRESHOLD must be at least 1".to_string()));
        }

        for (name, minutes) in [
            ("TOKEN_TTL_MINUTES", self.token_ttl_minutes),
            ("LOCKOUT_MINUTES", self.lockout_minutes),
            ("RESET_TOKEN_TTL_MINUTES", self.reset_token_ttl_minutes),
        ] {
            if minutes <= 0 {
                return Err(ConfigError::InvalidValue(format!("{} must be positive, got {}", name, minutes)));
            }
        }

        Ok(())
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

/// Admin account created at startup when it does not exist yet
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

/// How federated assertions are trusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertionTrust {
    /// Verify RS256 signatures with this PEM-encoded public key
    PublicKeyPem(String),
    /// Verify HS256 signatures with this shared secret
    SharedSecret(String),
    /// Signatures are checked by an upstream gateway before requests reach us
    Upstream,
}

/// Federation adapter configuration
#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub enabled: bool,
    pub allowed_domain: String,
    pub trust: Option<AssertionTrust>,
    pub audience: Option<String>,
    pub issuer: Option<String>,
}

impl FederationConfig {
    /// The allow-list is a suffix match, so it must name a whole domain
    pub fn validate(&self) -> Result<(), ConfigError> {
        let domain = self.allowed_domain.trim();
        if domain.len() < 2 || !domain.starts_with('@') {
            return Err(ConfigError::InvalidValue(format!(
                "FEDERATION_ALLOWED_DOMAIN must look like @example.org, got {:?}",
                self.allowed_domain
            )));
        }

        Ok(())
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_domain: "@julis-sh.de".to_string(),
            trust: None,
            audience: None,
            issuer: None,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    /// `None` runs the service on the in-memory account store
    pub database: Option<DatabaseConfig>,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
    pub federation: FederationConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: parse_var("HOST")?.unwrap_or_else(|| ServerConfig::default().host),
            port: parse_var("PORT")?.unwrap_or_else(|| ServerConfig::default().port),
            trust_proxy_headers: parse_var("TRUST_PROXY_HEADERS")?.unwrap_or(false),
        };

        let database = match std::env::var("DATABASE_URL") {
            Ok(database_url) => Some(Self::parse_database_url(&database_url)?),
            Err(_) => None,
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let defaults = AuthConfig::default();
        let bootstrap_admin = match (std::env::var("ADMIN_EMAIL"), std::env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => Some(BootstrapAdmin { email, password }),
            (Ok(_), Err(_)) => return Err(ConfigError::MissingVar("ADMIN_PASSWORD".to_string())),
            _ => None,
        };
        let auth = AuthConfig {
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            token_ttl_minutes: parse_var("TOKEN_TTL_MINUTES")?.unwrap_or(defaults.token_ttl_minutes),
            lockout_threshold: parse_var("LOCKOUT_THRESHOLD")?.unwrap_or(defaults.lockout_threshold),
            lockout_minutes: parse_var("LOCKOUT_MINUTES")?.unwrap_or(defaults.lockout_minutes),
            reset_token_ttl_minutes: parse_var("RESET_TOKEN_TTL_MINUTES")?
                .unwrap_or(defaults.reset_token_ttl_minutes),
            frontend_url: std::env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            bootstrap_admin,
        };
        auth.validate()?;

        let federation = Self::load_federation()?;
        federation.validate()?;

        Ok(Self {
            server,
            database,
            cors,
            auth,
            federation,
        })
    }

    fn load_federation() -> Result<FederationConfig, ConfigError> {
        let enabled = parse_var("FEDERATION_ENABLED")?.unwrap_or(false);

        let trust = if let Ok(pem) = std::env::var("FEDERATION_PUBLIC_KEY_PEM") {
            Some(AssertionTrust::PublicKeyPem(pem))
        } else if let Ok(secret) = std::env::var("FEDERATION_SHARED_SECRET") {
            Some(AssertionTrust::SharedSecret(secret))
        } else if parse_var("FEDERATION_TRUST_UPSTREAM")?.unwrap_or(false) {
            Some(AssertionTrust::Upstream)
        } else {
            None
        };

        if enabled && trust.is_none() {
            return Err(ConfigError::InvalidValue(
                "FEDERATION_ENABLED requires FEDERATION_PUBLIC_KEY_PEM, FEDERATION_SHARED_SECRET \
                 or FEDERATION_TRUST_UPSTREAM=true"
                    .to_string(),
            ));
        }

        Ok(FederationConfig {
            enabled,
            allowed_domain: std::env::var("FEDERATION_ALLOWED_DOMAIN")
                .unwrap_or_else(|_| FederationConfig::default().allowed_domain),
            trust,
            audience: std::env::var("FEDERATION_AUDIENCE").ok(),
            issuer: std::env::var("FEDERATION_ISSUER").ok(),
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue("Invalid DATABASE_URL format (expected postgresql://...)".to_string())
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue("Missing database name in DATABASE_URL".to_string()));
        }

        let require_tls = parsed
            .query_pairs()
            .any(|(k, v)| k == "sslmode" && v == "require");

        Ok(DatabaseConfig {
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            max_pool_size: parse_var("DB_MAX_CONNECTIONS")?.unwrap_or(10),
            require_tls: require_tls || host.contains("neon.tech"),
            host,
            database,
        })
    }
}

/// Read and parse an optional environment variable
fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}
