//! Authentication middleware
//!
//! Extracts and validates JWT tokens from requests, gates routes by role and
//! derives the client key used for lockout.

use crate::auth::{Claims, Role};
use crate::error::AppError;
use crate::state::SharedState;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::{middleware::Next, response::Response};
use std::convert::Infallible;
use std::net::SocketAddr;

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthenticated("Missing authorization header".to_string()))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("Invalid authorization format".to_string()))
}

/// Resolve the bearer token to claims and attach them to the request
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = state.tokens.verify(bearer_token(request.headers())?)?;

    // Insert claims into request extensions for handlers to use
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Exact role match; there is no hierarchy at this layer
pub fn authorize(claims: &Claims, required: Role) -> Result<(), AppError> {
    if claims.role != required {
        return Err(AppError::Forbidden(format!(
            "Requires {} role, you have {}",
            required, claims.role
        )));
    }

    Ok(())
}

/// Layer for routes that only admins may call; runs after `auth_middleware`
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| AppError::Unauthenticated("Missing session".to_string()))?;
    authorize(claims, Role::Admin)?;

    Ok(next.run(request).await)
}

/// Network identity of the caller, used as the lockout key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    fn from_parts(parts: &Parts, trust_proxy_headers: bool) -> Self {
        if trust_proxy_headers {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return Self(ip.to_string());
            }
        }

        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| Self(addr.ip().to_string()))
            .unwrap_or_else(|| Self("unknown".to_string()))
    }
}

impl FromRequestParts<SharedState> for ClientKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts, state.settings.server.trust_proxy_headers))
    }
}
