// src/utils/jwt.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{FromRef, FromRequestParts, State},
    http::{Request, StatusCode, header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{config::Config, error::AppError, models::account::AccountState};

/// Identity token claims issued by the identity provider.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Account uid.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default = "default_role")]
    pub role: String,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

fn default_role() -> String {
    "user".to_string()
}

impl Claims {
    pub fn account(&self) -> AccountState {
        AccountState {
            uid: Some(self.sub.clone()),
            email: self.email.clone(),
            email_verified: self.email_verified,
            is_loaded: true,
            is_empty: false,
        }
    }
}

/// Signs a token. Used by tests and local tooling; production tokens come
/// from the identity provider.
pub fn sign_jwt(
    uid: &str,
    email: Option<&str>,
    email_verified: bool,
    role: &str,
    secret: &str,
    expiration_seconds: u64,
) -> Result<String, AppError> {
    let expiration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .as_secs() as usize
        + expiration_seconds as usize;

    let claims = Claims {
        sub: uid.to_owned(),
        email: email.map(str::to_owned),
        email_verified,
        role: role.to_owned(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    Ok(token_data.claims)
}

fn bearer(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").filter(|t| !t.is_empty())
}

/// The caller's identity. Anonymous when no `Authorization` header is sent;
/// a malformed or invalid token is rejected with 401.
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub AccountState);

impl<S> FromRequestParts<S> for CurrentAccount
where
    S: Send + Sync,
    Config: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(CurrentAccount(AccountState::anonymous()));
        };
        let token = value
            .to_str()
            .ok()
            .and_then(bearer)
            .ok_or_else(|| AppError::AuthError("Invalid authorization header".to_string()))?;

        let config = Config::from_ref(state);
        let claims = verify_jwt(token, &config.jwt_secret)?;
        Ok(CurrentAccount(claims.account()))
    }
}

/// Axum Middleware: Authentication.
///
/// Requires a valid bearer token and injects its `Claims` into the request
/// extensions.
pub async fn auth_middleware(
    State(config): State<Config>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    match verify_jwt(token, &config.jwt_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Axum Middleware: Admin Authorization.
///
/// Must run after `auth_middleware`.
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if claims.role != "admin" {
        tracing::warn!("non-admin {} tried {}", claims.sub, req.uri().path());
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trips_identity() {
        let token = sign_jwt("u1", Some("a@example.com"), true, "user", "secret", 60).unwrap();
        let account = verify_jwt(&token, "secret").unwrap().account();
        assert_eq!(account.signed_in_uid(), Some("u1"));
        assert_eq!(account.email.as_deref(), Some("a@example.com"));
        assert!(account.email_verified);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign_jwt("u1", None, false, "user", "secret", 60).unwrap();
        assert!(matches!(verify_jwt(&token, "other"), Err(AppError::AuthError(_))));
    }
}
