//! API routes

pub mod health;
pub mod invoices;
pub mod projects;
pub mod subscriptions;
pub mod tickets;
pub mod usage;
pub mod webhooks;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public API routes (signature-gated webhooks) - under /api/v1
    let public_api_routes = Router::new()
        .route("/webhooks/paypal", post(webhooks::paypal_webhook))
        .route("/webhooks/identity", post(webhooks::identity_webhook))
        .route("/webhooks/github", post(webhooks::github_webhook));

    // Protected API routes (auth required) - under /api/v1
    let protected_api_routes = Router::new()
        // Usage tracking
        .route("/usage", post(usage::ingest_usage))
        .route("/usage", get(usage::list_usage))
        .route("/usage/summary", get(usage::usage_summary))
        // Invoices
        .route("/invoices", get(invoices::list_invoices))
        .route("/invoices", post(invoices::create_invoice))
        .route("/invoices/:invoice_id", get(invoices::get_invoice))
        .route("/invoices/:invoice_id/export", get(invoices::export_invoice))
        .route("/invoices/:invoice_id/pay", post(invoices::pay_invoice))
        .route("/invoices/:invoice_id/capture", post(invoices::capture_invoice))
        // Service packages and subscriptions
        .route("/packages", get(subscriptions::list_packages))
        .route("/subscriptions", get(subscriptions::list_subscriptions))
        .route("/subscriptions", post(subscriptions::create_subscription))
        .route("/subscriptions/:subscription_id", delete(subscriptions::cancel_subscription))
        // Projects and budgets
        .route("/projects", get(projects::list_projects))
        .route("/projects", post(projects::create_project))
        .route("/projects/:project_id", get(projects::get_project))
        .route("/projects/:project_id/budget", get(projects::get_budget_status))
        .route("/projects/:project_id/budget", patch(projects::update_budget))
        // Support tickets
        .route("/tickets", get(tickets::list_tickets))
        .route("/tickets", post(tickets::create_ticket))
        .route("/tickets/:ticket_id", get(tickets::get_ticket))
        .route("/tickets/:ticket_id/messages", post(tickets::reply_to_ticket))
        .route("/tickets/:ticket_id/close", post(tickets::close_ticket))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        // Global request body size limit
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .with_state(state)
}
