// src/models/product.rs

use serde::{Deserialize, Serialize};

use crate::services::entitlement::{EntitlementError, PurchaseAction};

/// A price attached to a product, in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    pub unit_amount: i64,
}

impl Price {
    /// Formats the amount as dollars, e.g. `1999` -> `"19.99"`.
    pub fn display_amount(&self) -> String {
        format!("{}.{:02}", self.unit_amount / 100, self.unit_amount.rem_euclid(100))
    }
}

/// A catalog product with its prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub prices: Vec<Price>,
}

impl Product {
    /// The price used for checkout.
    ///
    /// A product must carry exactly one price; anything else makes it
    /// unpurchasable rather than picking one arbitrarily.
    pub fn checkout_price(&self) -> Result<&Price, EntitlementError> {
        match self.prices.as_slice() {
            [price] => Ok(price),
            [] => Err(EntitlementError::NoPrice(self.id.clone())),
            _ => Err(EntitlementError::AmbiguousPrice(self.id.clone())),
        }
    }
}

/// Product row for the subscription page.
#[derive(Debug, Serialize)]
pub struct ProductView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Option<Price>,
    pub display_amount: Option<String>,
    pub action: PurchaseAction,
    pub label: String,
}
