use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Web session: create and poll
    let web_routes = Router::new()
        .route("/login-ticket", post(handlers::create_ticket))
        .route("/login-ticket/:id/status", get(handlers::get_status))
        .route("/login-ticket/:id/cancel", post(handlers::cancel_ticket));

    // Mobile app: bearer-authenticated
    let app_routes = Router::new()
        .route("/login-ticket/:id/scan", post(handlers::scan_ticket))
        .route("/login-ticket/:id/confirm", post(handlers::confirm_ticket));

    let mut router = web_routes
        .merge(app_routes)
        .route("/_internal/health", get(handlers::health));

    // Test-only routes -- dangerous operations gated behind TEST_MODE
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
