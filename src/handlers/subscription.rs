// src/handlers/subscription.rs

use axum::{Json, extract::State, response::IntoResponse};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        account::AccountResponse,
        checkout::{CheckoutRequest, PortalRequest, RedirectResponse},
        product::ProductView,
    },
    services::entitlement::{Blocked, PurchaseAction, purchase_label},
    state::AppState,
    utils::jwt::CurrentAccount,
};

/// Active products with the purchase control the caller should see.
pub async fn list_products(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
) -> Result<impl IntoResponse, AppError> {
    let subscription = state.subscription_for(&account).await?;
    let products = state.catalog.active_products().await?;

    let views: Vec<ProductView> = products
        .into_iter()
        .map(|product| {
            let price = match product.checkout_price() {
                Ok(price) => Some(price.clone()),
                Err(e) => {
                    tracing::warn!("{}", e);
                    None
                }
            };
            let action = match price {
                Some(_) => state.evaluator.resolve_action(&account, &subscription, &product),
                None => PurchaseAction::None(Blocked::Unavailable),
            };
            let display_amount = price.as_ref().map(|p| p.display_amount());
            ProductView {
                label: purchase_label(&subscription, &product, display_amount.as_deref()),
                id: product.id,
                name: product.name,
                description: product.description,
                price,
                display_amount,
                action,
            }
        })
        .collect();

    Ok(Json(views))
}

pub async fn get_account(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
) -> Result<impl IntoResponse, AppError> {
    let uid = account
        .signed_in_uid()
        .ok_or(AppError::AuthError(Blocked::SignedOut.message().to_string()))?
        .to_string();
    let subscription = state.subscription_for(&account).await?;

    Ok(Json(AccountResponse {
        uid,
        email: account.email,
        email_verified: account.email_verified,
        subscription,
    }))
}

/// Creates a checkout session and waits for its payment link.
pub async fn start_checkout(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let return_url = state
        .config
        .resolve_return_url(payload.return_url.as_deref())
        .ok_or(AppError::BadRequest("return_url must point to this site".to_string()))?;

    let subscription = state.subscription_for(&account).await?;
    let product = state
        .catalog
        .active_products()
        .await?
        .into_iter()
        .find(|p| p.id == payload.product_id)
        .ok_or(AppError::NotFound("Product not found".to_string()))?;
    let price = product
        .checkout_price()
        .map_err(|e| {
            tracing::warn!("{}", e);
            AppError::from(Blocked::Unavailable)
        })?
        .clone();

    match state.evaluator.resolve_action(&account, &subscription, &product) {
        PurchaseAction::Checkout => {}
        PurchaseAction::ManagePortal => {
            return Err(AppError::Conflict(
                "You already have a subscription. Use the billing portal to change it.".to_string(),
            ));
        }
        PurchaseAction::None(blocked) => return Err(blocked.into()),
    }

    // Both are present once the purchase preconditions hold.
    let (Some(uid), Some(email)) = (account.uid.as_deref(), account.email.as_deref()) else {
        return Err(AppError::InternalServerError("verified account without identity".to_string()));
    };

    let mut flow = state.checkout.begin(uid)?;
    let redirect_url = flow.checkout(email, &price.id, &return_url).await?;
    tracing::info!("checkout for {} redirected", uid);

    Ok(Json(RedirectResponse { redirect_url }))
}

/// Returns a billing portal link for the subscribed caller.
pub async fn open_portal(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(payload): Json<PortalRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let return_url = state
        .config
        .resolve_return_url(payload.return_url.as_deref())
        .ok_or(AppError::BadRequest("return_url must point to this site".to_string()))?;

    let subscription = state.subscription_for(&account).await?;
    state.evaluator.can_manage(&account, &subscription)?;

    let uid = account
        .signed_in_uid()
        .ok_or(AppError::AuthError(Blocked::SignedOut.message().to_string()))?;
    let mut flow = state.checkout.begin(uid)?;
    let redirect_url = flow.open_portal(&return_url).await?;

    Ok(Json(RedirectResponse { redirect_url }))
}
