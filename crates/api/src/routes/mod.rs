//! API routes

pub mod billing;
pub mod health;
pub mod organizations;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness));

    let api_v1_routes = Router::new()
        // Organization creation behind the payment gate
        .route("/orgs", post(organizations::create_org))
        .route("/orgs/checkout", post(organizations::initiate_checkout))
        .route("/orgs/checkout/resume", post(organizations::resume_checkout))
        // Billing for existing organizations
        .route("/orgs/:org_id/billing", get(billing::get_billing))
        .route("/orgs/:org_id/billing/sync-seats", post(billing::sync_seats))
        .route("/orgs/:org_id/billing/portal", post(billing::create_portal_session));

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}
