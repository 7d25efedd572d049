// src/config.rs

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

use crate::services::entitlement::{AllowList, ContentPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: SocketAddr,
    /// Origin of the web client. Return URLs must live under it.
    pub public_origin: String,
    pub allow_list: AllowList,
    pub content_policy: ContentPolicy,
    pub checkout_link_timeout: Duration,
    pub checkout_base_url: String,
    pub portal_link_url: String,
    pub dictionary_api_url: String,
    pub attempt_ttl: Duration,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

fn parse_secs(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let raw = var_or(name, &default.to_string());
    let secs: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());

        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;

        let rust_log = var_or("RUST_LOG", "info");

        let bind_addr: SocketAddr = var_or("BIND_ADDR", "0.0.0.0:3000")
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        let public_origin = var_or("PUBLIC_ORIGIN", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&public_origin).map_err(|e| ConfigError::Invalid {
            name: "PUBLIC_ORIGIN",
            reason: e.to_string(),
        })?;

        // Unset denies everyone.
        let allow_list = AllowList::parse(&var_or("PURCHASE_ALLOW_LIST", ""));

        let content_policy: ContentPolicy = var_or("CONTENT_POLICY", "matching")
            .parse()
            .map_err(|e: crate::services::entitlement::EntitlementError| ConfigError::Invalid {
                name: "CONTENT_POLICY",
                reason: e.to_string(),
            })?;

        let checkout_link_timeout = parse_secs("CHECKOUT_LINK_TIMEOUT_SECS", 30)?;
        let attempt_ttl = parse_secs("ATTEMPT_TTL_SECS", 6 * 60 * 60)?;

        Ok(Self {
            database_url,
            jwt_secret,
            rust_log,
            bind_addr,
            public_origin,
            allow_list,
            content_policy,
            checkout_link_timeout,
            checkout_base_url: var_or("CHECKOUT_BASE_URL", "https://checkout.stripe.com/c/pay/"),
            portal_link_url: var_or("PORTAL_LINK_URL", "http://localhost:5001/createPortalLink"),
            dictionary_api_url: var_or("DICTIONARY_API_URL", "https://api.dictionaryapi.dev/api/v1/entries/en/"),
            attempt_ttl,
        })
    }

    /// Default landing page after checkout or portal.
    pub fn default_return_url(&self) -> String {
        format!("{}/subscription", self.public_origin)
    }

    /// Resolves a caller supplied return URL. Anything off-origin is refused.
    pub fn resolve_return_url(&self, requested: Option<&str>) -> Option<String> {
        match requested {
            None => Some(self.default_return_url()),
            Some(url) if url == self.public_origin || url.starts_with(&format!("{}/", self.public_origin)) => {
                Some(url.to_string())
            }
            Some(_) => None,
        }
    }

    /// Settings used by tests and local tooling.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: None,
            jwt_secret: jwt_secret.to_string(),
            rust_log: "info".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            public_origin: "http://localhost:3000".to_string(),
            allow_list: AllowList::open(),
            content_policy: ContentPolicy::MatchingProduct,
            checkout_link_timeout: Duration::from_secs(5),
            checkout_base_url: "https://checkout.example.com/pay/".to_string(),
            portal_link_url: "http://127.0.0.1:9/createPortalLink".to_string(),
            dictionary_api_url: "http://127.0.0.1:9/entries/en/".to_string(),
            attempt_ttl: Duration::from_secs(60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_url_must_stay_on_origin() {
        let config = Config::for_tests("secret");
        assert_eq!(
            config.resolve_return_url(None).as_deref(),
            Some("http://localhost:3000/subscription")
        );
        assert!(config.resolve_return_url(Some("http://localhost:3000/groups/1")).is_some());
        assert!(config.resolve_return_url(Some("http://localhost:3000.evil.com/")).is_none());
        assert!(config.resolve_return_url(Some("https://evil.com/")).is_none());
    }
}
