// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::{Config, ConfigError},
    error::AppError,
    models::account::{AccountState, SubscriptionState},
    payments::{BillingPortal, HostedCheckout, HttpBillingPortal, PaymentRedirect},
    services::{
        attempts::AttemptRegistry, checkout::CheckoutService, dictionary::DictionaryClient,
        entitlement::EntitlementEvaluator,
    },
    store::{AccountStore, CatalogStore, CheckoutStore, ContentStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub content: Arc<dyn ContentStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub evaluator: EntitlementEvaluator,
    pub attempts: Arc<AttemptRegistry>,
    pub checkout: CheckoutService,
    pub dictionary: DictionaryClient,
}

impl AppState {
    /// Wires every seam to one store and the given payment collaborators.
    pub fn new<S>(
        config: Config,
        store: Arc<S>,
        redirect: Arc<dyn PaymentRedirect>,
        portal: Arc<dyn BillingPortal>,
        dictionary: DictionaryClient,
    ) -> Self
    where
        S: ContentStore + CatalogStore + AccountStore + CheckoutStore + 'static,
    {
        let checkout = CheckoutService::new(store.clone(), redirect, portal, config.checkout_link_timeout);
        Self {
            evaluator: EntitlementEvaluator::new(config.allow_list.clone(), config.content_policy),
            attempts: Arc::new(AttemptRegistry::new(config.attempt_ttl)),
            content: store.clone(),
            catalog: store.clone(),
            accounts: store,
            checkout,
            dictionary,
            config,
        }
    }

    /// Builds the HTTP collaborators from configuration.
    pub fn from_config<S>(config: Config, store: Arc<S>) -> Result<Self, ConfigError>
    where
        S: ContentStore + CatalogStore + AccountStore + CheckoutStore + 'static,
    {
        let http = reqwest::Client::new();

        let redirect = HostedCheckout::new(&config.checkout_base_url).map_err(|e| ConfigError::Invalid {
            name: "CHECKOUT_BASE_URL",
            reason: e.to_string(),
        })?;
        let portal =
            HttpBillingPortal::new(http.clone(), &config.portal_link_url).map_err(|e| ConfigError::Invalid {
                name: "PORTAL_LINK_URL",
                reason: e.to_string(),
            })?;
        let dictionary =
            DictionaryClient::new(http, &config.dictionary_api_url).map_err(|e| ConfigError::Invalid {
                name: "DICTIONARY_API_URL",
                reason: e.to_string(),
            })?;

        Ok(Self::new(config, store, Arc::new(redirect), Arc::new(portal), dictionary))
    }

    /// Subscription of the caller. Anonymous callers have none.
    pub async fn subscription_for(&self, account: &AccountState) -> Result<SubscriptionState, AppError> {
        match account.signed_in_uid() {
            Some(uid) => Ok(self.accounts.subscription(uid).await?),
            None => Ok(SubscriptionState::None),
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
