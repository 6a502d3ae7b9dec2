//! Shared state and HTTP routes.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::gate::NotificationGate;
use crate::handlers;
use crate::provider::Subscriptions;

/// Process-wide state, built once in `main`
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<NotificationGate>,
    pub subscriptions: Arc<dyn Subscriptions>,
    pub client_state: Arc<str>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/webhook", post(handlers::webhook))
        .route("/renew", post(handlers::renew))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
