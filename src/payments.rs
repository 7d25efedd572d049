// src/payments.rs

//! Payment processor collaborators: the hosted checkout redirect and the
//! billing portal link.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid checkout session id '{0}'")]
    InvalidSessionId(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("billing portal request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Hands a checkout session to the processor's hosted checkout page.
#[async_trait]
pub trait PaymentRedirect: Send + Sync {
    /// Returns the URL the browser should navigate to.
    async fn redirect_to_checkout(&self, session_id: &str) -> Result<String, PaymentError>;
}

/// Creates billing portal links for subscription management.
#[async_trait]
pub trait BillingPortal: Send + Sync {
    async fn create_portal_link(&self, uid: &str, return_url: &str) -> Result<String, PaymentError>;
}

static SESSION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^cs_(test|live)_[A-Za-z0-9]{1,200}$").expect("valid regex"));

/// Builds hosted checkout URLs under a configured base.
#[derive(Debug, Clone)]
pub struct HostedCheckout {
    base: Url,
}

impl HostedCheckout {
    pub fn new(base_url: &str) -> Result<Self, PaymentError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }
}

#[async_trait]
impl PaymentRedirect for HostedCheckout {
    async fn redirect_to_checkout(&self, session_id: &str) -> Result<String, PaymentError> {
        if !SESSION_ID.is_match(session_id) {
            return Err(PaymentError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.base.join(session_id)?.to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PortalLinkRequest<'a> {
    return_url: &'a str,
}

#[derive(Deserialize)]
struct PortalLinkResponse {
    url: String,
}

/// Calls the payment extension's `createPortalLink` function over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBillingPortal {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpBillingPortal {
    pub fn new(http: reqwest::Client, endpoint: &str) -> Result<Self, PaymentError> {
        Ok(Self {
            http,
            endpoint: Url::parse(endpoint)?,
        })
    }
}

#[async_trait]
impl BillingPortal for HttpBillingPortal {
    async fn create_portal_link(&self, uid: &str, return_url: &str) -> Result<String, PaymentError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header("X-Account-Uid", uid)
            .json(&PortalLinkRequest { return_url })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PaymentError::HttpStatus(response.status()));
        }

        let body: PortalLinkResponse = response.json().await?;
        Url::parse(&body.url)?;
        Ok(body.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hosted_checkout_url() {
        let checkout = HostedCheckout::new("https://checkout.example.com/pay").unwrap();
        let url = checkout.redirect_to_checkout("cs_test_a1B2c3").await.unwrap();
        assert_eq!(url, "https://checkout.example.com/pay/cs_test_a1B2c3");
    }

    #[tokio::test]
    async fn test_invalid_session_id_rejected() {
        let checkout = HostedCheckout::new("https://checkout.example.com/pay/").unwrap();
        for bad in ["", "cs_test_", "pi_123", "cs_test_abc/../x"] {
            assert!(matches!(
                checkout.redirect_to_checkout(bad).await,
                Err(PaymentError::InvalidSessionId(_))
            ));
        }
    }
}
