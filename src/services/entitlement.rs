// src/services/entitlement.rs

//! Access decisions derived from account, subscription and catalog state.
//!
//! Everything here is pure: callers load the state and pass it in.

use std::collections::HashSet;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::models::account::{AccountState, SubscriptionState};
use crate::models::product::Product;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntitlementError {
    #[error("account holds more than one subscription: {0:?}")]
    MultipleSubscriptions(Vec<String>),

    #[error("product {0} has no price")]
    NoPrice(String),

    #[error("product {0} has more than one price")]
    AmbiguousPrice(String),

    #[error("unknown content policy '{0}'")]
    UnknownPolicy(String),
}

/// Why no purchase action is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Blocked {
    Loading,
    SignedOut,
    EmailUnverified,
    NotAllowListed,
    AlreadySubscribed,
    NotSubscribed,
    /// The product has no single price to check out with.
    Unavailable,
}

impl Blocked {
    pub fn message(self) -> &'static str {
        match self {
            Blocked::Loading => "Account is still loading.",
            Blocked::SignedOut => "Please sign in first.",
            Blocked::EmailUnverified => {
                "Your email has not been verified yet. Please check your email for a verification link."
            }
            Blocked::NotAllowListed => "Purchases are not yet available for this account.",
            Blocked::AlreadySubscribed => "You are already subscribed to this product.",
            Blocked::NotSubscribed => "You do not have a subscription to manage.",
            Blocked::Unavailable => "This product is not available for purchase.",
        }
    }
}

/// What the purchase control for a product should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum PurchaseAction {
    None(Blocked),
    Checkout,
    ManagePortal,
}

/// Emails allowed to purchase during rollout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    open: bool,
    emails: HashSet<String>,
}

impl AllowList {
    /// Everyone is allowed.
    pub fn open() -> Self {
        Self {
            open: true,
            emails: HashSet::new(),
        }
    }

    pub fn from_emails<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            open: false,
            emails: emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Parses `*` or a comma-separated list of emails.
    pub fn parse(raw: &str) -> Self {
        if raw.trim() == "*" {
            Self::open()
        } else {
            Self::from_emails(raw.split(','))
        }
    }

    pub fn is_allowed(&self, email: &str) -> bool {
        self.open || self.emails.contains(&email.trim().to_lowercase())
    }
}

/// How non-free content is unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentPolicy {
    /// Any subscription unlocks all non-free content.
    AnySubscription,
    /// The subscription must name the product the content belongs to.
    #[default]
    MatchingProduct,
}

impl FromStr for ContentPolicy {
    type Err = EntitlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(ContentPolicy::AnySubscription),
            "matching" => Ok(ContentPolicy::MatchingProduct),
            other => Err(EntitlementError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Gate carried by a piece of content (a group and its exercises).
#[derive(Debug, Clone, Copy)]
pub struct ContentGate<'a> {
    pub free: bool,
    /// Product that unlocks the content, if its category names one.
    pub required_product: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct EntitlementEvaluator {
    allow_list: AllowList,
    policy: ContentPolicy,
}

impl EntitlementEvaluator {
    pub fn new(allow_list: AllowList, policy: ContentPolicy) -> Self {
        Self { allow_list, policy }
    }

    pub fn policy(&self) -> ContentPolicy {
        self.policy
    }

    /// Checks the account-level preconditions shared by checkout and portal.
    fn purchase_precondition(
        &self,
        account: &AccountState,
        subscription: &SubscriptionState,
    ) -> Result<(), Blocked> {
        if !account.is_loaded || *subscription == SubscriptionState::Unknown {
            return Err(Blocked::Loading);
        }
        if account.is_empty || account.uid.is_none() {
            return Err(Blocked::SignedOut);
        }
        if !account.email_verified {
            return Err(Blocked::EmailUnverified);
        }
        match account.email.as_deref() {
            Some(email) if self.allow_list.is_allowed(email) => Ok(()),
            _ => Err(Blocked::NotAllowListed),
        }
    }

    /// Decides the purchase control for `product`.
    pub fn resolve_action(
        &self,
        account: &AccountState,
        subscription: &SubscriptionState,
        product: &Product,
    ) -> PurchaseAction {
        if let Err(blocked) = self.purchase_precondition(account, subscription) {
            return PurchaseAction::None(blocked);
        }
        match subscription.product() {
            None => PurchaseAction::Checkout,
            Some(current) if current != product.name => PurchaseAction::ManagePortal,
            Some(_) => PurchaseAction::None(Blocked::AlreadySubscribed),
        }
    }

    /// Whether the account may open the billing portal at all.
    pub fn can_manage(
        &self,
        account: &AccountState,
        subscription: &SubscriptionState,
    ) -> Result<(), Blocked> {
        self.purchase_precondition(account, subscription)?;
        if subscription.product().is_none() {
            return Err(Blocked::NotSubscribed);
        }
        Ok(())
    }

    /// Whether content may be shown.
    ///
    /// Free content is visible to everyone, signed in or not.
    pub fn can_view(&self, content: ContentGate<'_>, subscription: &SubscriptionState) -> bool {
        if content.free {
            return true;
        }
        let Some(current) = subscription.product() else {
            return false;
        };
        match (self.policy, content.required_product) {
            (ContentPolicy::AnySubscription, _) | (ContentPolicy::MatchingProduct, None) => true,
            (ContentPolicy::MatchingProduct, Some(required)) => current == required,
        }
    }
}

/// Button text for a product, given the caller's subscription.
pub fn purchase_label(subscription: &SubscriptionState, product: &Product, amount: Option<&str>) -> String {
    let price = amount.map(|a| format!("${a} USD/year")).unwrap_or_else(|| "price unavailable".to_string());
    match subscription.product() {
        None => format!("Subscribe for {price}"),
        Some(current) if current == product.name => format!("Currently subscribed ({price})"),
        Some(_) => format!("Update subscription ({price})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: &str) -> Product {
        Product {
            id: format!("prod_{}", name.replace(' ', "_")),
            name: name.to_string(),
            description: None,
            active: true,
            prices: vec![],
        }
    }

    fn verified() -> AccountState {
        AccountState::signed_in("u1", "learner@example.com", true)
    }

    fn evaluator() -> EntitlementEvaluator {
        EntitlementEvaluator::new(
            AllowList::from_emails(["learner@example.com"]),
            ContentPolicy::MatchingProduct,
        )
    }

    fn active(name: &str) -> SubscriptionState {
        SubscriptionState::Active(name.to_string())
    }

    #[test]
    fn test_unverified_is_always_none() {
        let account = AccountState::signed_in("u1", "learner@example.com", false);
        for sub in [SubscriptionState::None, active("Plan A"), active("Plan B")] {
            assert_eq!(
                evaluator().resolve_action(&account, &sub, &product("Plan A")),
                PurchaseAction::None(Blocked::EmailUnverified)
            );
        }
    }

    #[test]
    fn test_checkout_when_unsubscribed() {
        assert_eq!(
            evaluator().resolve_action(&verified(), &SubscriptionState::None, &product("Plan A")),
            PurchaseAction::Checkout
        );
    }

    #[test]
    fn test_same_and_different_product() {
        let sub = active("Plan A");
        assert_eq!(
            evaluator().resolve_action(&verified(), &sub, &product("Plan A")),
            PurchaseAction::None(Blocked::AlreadySubscribed)
        );
        assert_eq!(
            evaluator().resolve_action(&verified(), &sub, &product("Plan B")),
            PurchaseAction::ManagePortal
        );
    }

    #[test]
    fn test_not_allow_listed() {
        let account = AccountState::signed_in("u2", "someone@example.com", true);
        assert_eq!(
            evaluator().resolve_action(&account, &SubscriptionState::None, &product("Plan A")),
            PurchaseAction::None(Blocked::NotAllowListed)
        );
    }

    #[test]
    fn test_loading_and_signed_out() {
        let e = evaluator();
        assert_eq!(
            e.resolve_action(&AccountState::loading(), &SubscriptionState::None, &product("Plan A")),
            PurchaseAction::None(Blocked::Loading)
        );
        assert_eq!(
            e.resolve_action(&verified(), &SubscriptionState::Unknown, &product("Plan A")),
            PurchaseAction::None(Blocked::Loading)
        );
        assert_eq!(
            e.resolve_action(&AccountState::anonymous(), &SubscriptionState::None, &product("Plan A")),
            PurchaseAction::None(Blocked::SignedOut)
        );
    }

    #[test]
    fn test_allow_list_parsing() {
        let list = AllowList::parse(" Admin@Example.com , ,gerry@example.com");
        assert!(list.is_allowed("admin@example.com"));
        assert!(list.is_allowed("GERRY@example.com"));
        assert!(!list.is_allowed("other@example.com"));

        assert!(AllowList::parse("*").is_allowed("anyone@example.com"));
        assert!(!AllowList::parse("").is_allowed("anyone@example.com"));
    }

    #[test]
    fn test_free_content_visible_to_everyone() {
        let gate = ContentGate {
            free: true,
            required_product: Some("Plan A"),
        };
        for policy in [ContentPolicy::AnySubscription, ContentPolicy::MatchingProduct] {
            let e = EntitlementEvaluator::new(AllowList::default(), policy);
            for sub in [
                SubscriptionState::Unknown,
                SubscriptionState::None,
                active("Plan B"),
            ] {
                assert!(e.can_view(gate, &sub));
            }
        }
    }

    #[test]
    fn test_paid_content_policies() {
        let gate = ContentGate {
            free: false,
            required_product: Some("Plan A"),
        };
        let any = EntitlementEvaluator::new(AllowList::default(), ContentPolicy::AnySubscription);
        let matching = EntitlementEvaluator::new(AllowList::default(), ContentPolicy::MatchingProduct);

        assert!(!any.can_view(gate, &SubscriptionState::None));
        assert!(any.can_view(gate, &active("Plan B")));
        assert!(!matching.can_view(gate, &active("Plan B")));
        assert!(matching.can_view(gate, &active("Plan A")));

        let untagged = ContentGate {
            free: false,
            required_product: None,
        };
        assert!(matching.can_view(untagged, &active("Plan B")));
        assert!(!matching.can_view(untagged, &SubscriptionState::Unknown));
    }

    #[test]
    fn test_can_manage_requires_subscription() {
        let e = evaluator();
        assert_eq!(
            e.can_manage(&verified(), &SubscriptionState::None),
            Err(Blocked::NotSubscribed)
        );
        assert_eq!(e.can_manage(&verified(), &active("Plan A")), Ok(()));
    }

    #[test]
    fn test_multiple_subscriptions_rejected() {
        use crate::models::account::MainField;

        let many = MainField::Many(vec!["Plan A".into(), "Plan B".into()]);
        assert!(matches!(
            SubscriptionState::from_main_field(Some(&many)),
            Err(EntitlementError::MultipleSubscriptions(_))
        ));
        let one = MainField::Many(vec!["Plan A".into()]);
        assert_eq!(
            SubscriptionState::from_main_field(Some(&one)),
            Ok(active("Plan A"))
        );
        assert_eq!(
            SubscriptionState::from_main_field(None),
            Ok(SubscriptionState::None)
        );
    }

    #[test]
    fn test_checkout_price_requires_exactly_one() {
        use crate::models::product::Price;

        let mut p = product("Plan A");
        assert!(matches!(p.checkout_price(), Err(EntitlementError::NoPrice(_))));
        p.prices.push(Price {
            id: "price_1".into(),
            unit_amount: 1999,
        });
        assert_eq!(p.checkout_price().unwrap().display_amount(), "19.99");
        p.prices.push(Price {
            id: "price_2".into(),
            unit_amount: 2999,
        });
        assert!(matches!(p.checkout_price(), Err(EntitlementError::AmbiguousPrice(_))));
    }

    #[test]
    fn test_purchase_label() {
        let p = product("Plan A");
        assert_eq!(
            purchase_label(&SubscriptionState::None, &p, Some("20.00")),
            "Subscribe for $20.00 USD/year"
        );
        assert_eq!(
            purchase_label(&active("Plan A"), &p, Some("20.00")),
            "Currently subscribed ($20.00 USD/year)"
        );
        assert_eq!(
            purchase_label(&active("Plan B"), &p, Some("20.00")),
            "Update subscription ($20.00 USD/year)"
        );
    }
}
