//! Authentication and authorization module
//!
//! Login with lockout, JWT session tokens, password reset, federated login
//! and role-based request gating.

mod federation;
mod jwt;
mod lockout;
mod login;
mod middleware;
mod password;
mod reset;

pub use federation::FederationAdapter;
pub use jwt::{Claims, IssuedToken, TokenIssuer};
pub use lockout::{InMemoryLockoutTracker, LockoutPolicy, LockoutTracker};
pub use login::CredentialVerifier;
pub use middleware::{auth_middleware, require_admin, ClientKey};
pub use password::{hash_password, hash_reset_token, random_secret, verify_password};
pub use reset::PasswordResetFlow;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Account roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full administrative access
    Admin,
    /// Landesgeschäftsstelle (state office staff)
    Lgst,
    /// Board member
    Vorstand,
    /// Regular account
    User,
}

impl Role {
    /// Highest precedence first. Federated role mapping picks the first
    /// entry present in the identity provider's role claims.
    pub const PRECEDENCE: [Role; 4] = [Role::Admin, Role::Lgst, Role::Vorstand, Role::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Lgst => "lgst",
            Role::Vorstand => "vorstand",
            Role::User => "user",
        }
    }

    /// Map external role claims onto the highest-precedence internal role.
    /// Unknown claims are ignored; no match yields `Role::User`.
    pub fn highest_of<S: AsRef<str>>(claims: &[S]) -> Role {
        Self::PRECEDENCE
            .into_iter()
            .find(|role| claims.iter().any(|c| c.as_ref() == role.as_str()))
            .unwrap_or_default()
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRECEDENCE
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("Unknown role: {}", s))
    }
}
