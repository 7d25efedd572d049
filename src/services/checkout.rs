// src/services/checkout.rs

//! Checkout reconciliation.
//!
//! A checkout writes a session record, then waits for the payment extension
//! to add a `sessionId` to that same record before redirecting. The manage
//! path asks the billing portal for a link instead.
//!
//! ```text
//! Idle -> CreatingSession -> AwaitingPaymentLink -> Redirecting -> Done | Failed
//! Idle -> RequestingPortalLink -> Redirecting -> Done | Failed
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::models::checkout::NewCheckoutSession;
use crate::payments::{BillingPortal, PaymentError, PaymentRedirect};
use crate::store::{CheckoutStore, StoreError};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("a checkout is already in progress for this account")]
    Busy,

    #[error("this checkout flow has already been used")]
    AlreadyStarted,

    #[error("failed to create checkout session: {0}")]
    CreateSession(#[source] StoreError),

    #[error("failed to watch checkout session: {0}")]
    Watch(#[source] StoreError),

    #[error("checkout session closed before a payment link arrived")]
    WatchClosed,

    #[error("payment provider rejected the checkout session: {0}")]
    Rejected(String),

    #[error("no payment link after {0:?}")]
    LinkTimeout(Duration),

    #[error("redirect to checkout failed: {0}")]
    Redirect(#[source] PaymentError),

    #[error("failed to load customer portal: {0}")]
    Portal(#[source] PaymentError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckoutState {
    Idle,
    CreatingSession,
    AwaitingPaymentLink { document_id: String },
    RequestingPortalLink,
    Redirecting { session_id: Option<String> },
    Done { redirect_url: String },
    Failed { message: String },
}

impl CheckoutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutState::Done { .. } | CheckoutState::Failed { .. })
    }
}

/// Per-account exclusive flags. At most one checkout or portal flow may be
/// in flight for an account.
#[derive(Debug, Clone, Default)]
pub struct FlowLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl FlowLocks {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Test-and-set. `None` if the account already holds the flag.
    pub fn try_acquire(&self, uid: &str) -> Option<FlowGuard> {
        if !self.lock().insert(uid.to_string()) {
            return None;
        }
        Some(FlowGuard {
            held: Arc::clone(&self.held),
            uid: uid.to_string(),
        })
    }

    pub fn is_held(&self, uid: &str) -> bool {
        self.lock().contains(uid)
    }
}

/// Releases the account's flag on drop.
#[derive(Debug)]
pub struct FlowGuard {
    held: Arc<Mutex<HashSet<String>>>,
    uid: String,
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.uid);
    }
}

/// Shared collaborators for checkout flows.
#[derive(Clone)]
pub struct CheckoutService {
    sessions: Arc<dyn CheckoutStore>,
    redirect: Arc<dyn PaymentRedirect>,
    portal: Arc<dyn BillingPortal>,
    link_timeout: Duration,
    locks: FlowLocks,
}

impl CheckoutService {
    pub fn new(
        sessions: Arc<dyn CheckoutStore>,
        redirect: Arc<dyn PaymentRedirect>,
        portal: Arc<dyn BillingPortal>,
        link_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            redirect,
            portal,
            link_timeout,
            locks: FlowLocks::default(),
        }
    }

    pub fn locks(&self) -> &FlowLocks {
        &self.locks
    }

    /// Starts a flow for `uid`, taking the account's in-flight flag.
    pub fn begin(&self, uid: &str) -> Result<CheckoutFlow, CheckoutError> {
        let guard = self.locks.try_acquire(uid).ok_or(CheckoutError::Busy)?;
        Ok(CheckoutFlow {
            service: self.clone(),
            uid: uid.to_string(),
            state: CheckoutState::Idle,
            guard: Some(guard),
        })
    }
}

/// One checkout or portal hand-off. Single use.
///
/// Dropping the flow mid-wait drops the document watch and the in-flight
/// flag, so nothing can redirect after the caller has gone away.
pub struct CheckoutFlow {
    service: CheckoutService,
    uid: String,
    state: CheckoutState,
    guard: Option<FlowGuard>,
}

impl CheckoutFlow {
    pub fn state(&self) -> &CheckoutState {
        &self.state
    }

    fn transition(&mut self, next: CheckoutState) {
        tracing::debug!(uid = %self.uid, from = ?self.state, to = ?next, "checkout transition");
        self.state = next;
        if self.state.is_terminal() {
            self.guard.take();
        }
    }

    fn fail(&mut self, err: CheckoutError) -> CheckoutError {
        tracing::warn!(uid = %self.uid, "checkout flow failed: {}", err);
        self.transition(CheckoutState::Failed {
            message: err.to_string(),
        });
        err
    }

    fn ensure_idle(&self) -> Result<(), CheckoutError> {
        if self.state != CheckoutState::Idle {
            return Err(CheckoutError::AlreadyStarted);
        }
        Ok(())
    }

    /// Runs a subscription checkout and returns the hosted checkout URL.
    pub async fn checkout(
        &mut self,
        customer_email: &str,
        price_id: &str,
        return_url: &str,
    ) -> Result<String, CheckoutError> {
        self.ensure_idle()?;
        let sessions = Arc::clone(&self.service.sessions);

        self.transition(CheckoutState::CreatingSession);
        let request = NewCheckoutSession::subscription(price_id, customer_email, return_url);
        let document_id = match sessions.create_session(&self.uid, &request).await {
            Ok(id) => id,
            Err(e) => return Err(self.fail(CheckoutError::CreateSession(e))),
        };
        tracing::info!(uid = %self.uid, document_id = %document_id, "checkout session created");

        self.transition(CheckoutState::AwaitingPaymentLink {
            document_id: document_id.clone(),
        });
        let limit = self.service.link_timeout;
        let waited = tokio::time::timeout(
            limit,
            wait_for_session_id(sessions.as_ref(), &self.uid, &document_id),
        )
        .await;
        let session_id = match waited {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => return Err(self.fail(CheckoutError::LinkTimeout(limit))),
        };

        self.transition(CheckoutState::Redirecting {
            session_id: Some(session_id.clone()),
        });
        let redirect = Arc::clone(&self.service.redirect);
        match redirect.redirect_to_checkout(&session_id).await {
            Ok(url) => {
                self.transition(CheckoutState::Done {
                    redirect_url: url.clone(),
                });
                Ok(url)
            }
            Err(e) => Err(self.fail(CheckoutError::Redirect(e))),
        }
    }

    /// Requests a billing portal link for managing the subscription.
    pub async fn open_portal(&mut self, return_url: &str) -> Result<String, CheckoutError> {
        self.ensure_idle()?;
        let portal = Arc::clone(&self.service.portal);

        self.transition(CheckoutState::RequestingPortalLink);
        let url = match portal.create_portal_link(&self.uid, return_url).await {
            Ok(url) => url,
            Err(e) => return Err(self.fail(CheckoutError::Portal(e))),
        };

        self.transition(CheckoutState::Redirecting { session_id: None });
        self.transition(CheckoutState::Done {
            redirect_url: url.clone(),
        });
        Ok(url)
    }
}

/// Waits for the payment extension to write `sessionId` on the document.
///
/// Snapshots without it, including the initial one, are skipped. The watch
/// is dropped as soon as an id or an error is seen.
async fn wait_for_session_id(
    sessions: &dyn CheckoutStore,
    uid: &str,
    document_id: &str,
) -> Result<String, CheckoutError> {
    let mut watch = sessions
        .watch_session(uid, document_id)
        .await
        .map_err(CheckoutError::Watch)?;

    while let Some(snapshot) = watch.next().await {
        let doc = snapshot.map_err(CheckoutError::Watch)?;
        if let Some(message) = doc.error {
            return Err(CheckoutError::Rejected(message));
        }
        if let Some(session_id) = doc.session_id.filter(|id| !id.is_empty()) {
            return Ok(session_id);
        }
        tracing::debug!(document_id, "checkout session has no payment link yet");
    }
    Err(CheckoutError::WatchClosed)
}
