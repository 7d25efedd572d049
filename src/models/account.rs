// src/models/account.rs

use serde::{Deserialize, Serialize};

use crate::services::entitlement::EntitlementError;

/// Identity of the caller as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountState {
    pub uid: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,

    /// No decision may be made until the identity has been resolved.
    pub is_loaded: bool,

    /// True for an unauthenticated caller.
    pub is_empty: bool,
}

impl AccountState {
    /// Identity not yet resolved.
    pub fn loading() -> Self {
        Self {
            uid: None,
            email: None,
            email_verified: false,
            is_loaded: false,
            is_empty: true,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            is_loaded: true,
            ..Self::loading()
        }
    }

    pub fn signed_in(uid: impl Into<String>, email: impl Into<String>, email_verified: bool) -> Self {
        Self {
            uid: Some(uid.into()),
            email: Some(email.into()),
            email_verified,
            is_loaded: true,
            is_empty: false,
        }
    }

    /// The uid of a loaded, authenticated account.
    pub fn signed_in_uid(&self) -> Option<&str> {
        if self.is_loaded && !self.is_empty {
            self.uid.as_deref()
        } else {
            None
        }
    }
}

/// The account's current subscription, read from the account document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "product", rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Not yet read from the store.
    Unknown,
    None,
    /// Name of the subscribed product.
    Active(String),
}

/// Raw `main` field of the account document.
///
/// The payment sync process writes a single product name. A list is accepted
/// on read only so that a corrupted document can be detected.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MainField {
    One(String),
    Many(Vec<String>),
}

/// Account document as stored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AccountDocument {
    #[serde(default)]
    pub main: Option<MainField>,
}

impl SubscriptionState {
    /// Decodes the denormalized subscription field.
    ///
    /// More than one subscribed product is an invariant violation.
    pub fn from_main_field(main: Option<&MainField>) -> Result<Self, EntitlementError> {
        let names: Vec<&str> = match main {
            None => Vec::new(),
            Some(MainField::One(name)) => vec![name.as_str()],
            Some(MainField::Many(names)) => names.iter().map(String::as_str).collect(),
        };
        let names: Vec<&str> = names.into_iter().filter(|n| !n.trim().is_empty()).collect();

        match names.as_slice() {
            [] => Ok(Self::None),
            [name] => Ok(Self::Active((*name).to_string())),
            _ => Err(EntitlementError::MultipleSubscriptions(
                names.iter().map(|n| n.to_string()).collect(),
            )),
        }
    }

    pub fn product(&self) -> Option<&str> {
        match self {
            Self::Active(name) => Some(name),
            _ => None,
        }
    }
}

/// Response body for `GET /api/account`.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub subscription: SubscriptionState,
}
