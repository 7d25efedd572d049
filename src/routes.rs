// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, catalog, exercise, subscription},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Public content and attempt routes resolve the caller per request.
/// * Admin routes require a valid token with the `admin` role.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = [state.config.public_origin.as_str(), "http://127.0.0.1:3000"]
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let content_routes = Router::new()
        .route("/categories", get(catalog::list_categories))
        .route("/categories/{id}/subcategories", get(catalog::list_subcategories))
        .route("/subcategories/{id}/groups", get(catalog::list_groups))
        .route("/groups/{id}", get(catalog::get_group));

    let attempt_routes = Router::new()
        .route("/exercises/{id}/attempts", post(exercise::start_attempt))
        .route("/attempts/{id}", delete(exercise::discard_attempt))
        .route("/attempts/{id}/submit", post(exercise::submit_attempt))
        .route("/attempts/{id}/restart", post(exercise::restart_attempt));

    let subscription_routes = Router::new()
        .route("/products", get(subscription::list_products))
        .route("/account", get(subscription::get_account))
        .route("/subscription/checkout", post(subscription::start_checkout))
        .route("/subscription/portal", post(subscription::open_portal));

    let admin_routes = Router::new()
        .route("/categories", post(admin::create_category))
        .route(
            "/categories/{id}",
            put(admin::update_category).delete(admin::delete_category),
        )
        .route("/categories/{id}/subcategories", post(admin::create_subcategory))
        .route("/subcategories/{id}", delete(admin::delete_subcategory))
        .route("/subcategories/{id}/groups", post(admin::create_group))
        .route(
            "/groups/{id}",
            put(admin::update_group).delete(admin::delete_group),
        )
        .route("/groups/{id}/words", put(admin::save_word))
        .route("/groups/{id}/words/{word}", delete(admin::delete_word))
        .route("/groups/{id}/exercises", post(admin::create_exercise))
        .route(
            "/exercises/{id}",
            put(admin::update_exercise).delete(admin::delete_exercise),
        )
        .route("/dictionary/{word}", get(admin::lookup_word))
        // Auth first, then the admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .nest(
            "/api",
            content_routes.merge(attempt_routes).merge(subscription_routes),
        )
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
