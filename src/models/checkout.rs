// src/models/checkout.rs

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Fields the client writes when it asks for a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCheckoutSession {
    pub price: String,
    #[serde(rename = "customerEmail")]
    pub customer_email: String,
    pub mode: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl NewCheckoutSession {
    pub fn subscription(price: impl Into<String>, customer_email: impl Into<String>, return_url: &str) -> Self {
        Self {
            price: price.into(),
            customer_email: customer_email.into(),
            mode: "subscription".to_string(),
            success_url: return_url.to_string(),
            cancel_url: return_url.to_string(),
        }
    }
}

/// Checkout session document as read back from the store.
///
/// `session_id` and `error` are written by the payment extension, never by
/// this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionDoc {
    pub id: String,
    pub uid: String,
    #[serde(flatten)]
    pub request: NewCheckoutSession,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// DTO for `POST /api/subscription/checkout`.
#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 100))]
    pub product_id: String,
    #[validate(url)]
    pub return_url: Option<String>,
}

/// DTO for `POST /api/subscription/portal`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct PortalRequest {
    #[validate(url)]
    pub return_url: Option<String>,
}

/// Where the browser should go next.
#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub redirect_url: String,
}
