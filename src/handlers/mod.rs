pub mod cards;
pub mod payments;
pub mod webhook;

use axum::{Router, routing::post};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        // Card workflow
        .route("/api/cards/lookup", post(cards::lookup))
        .route("/api/cards/confirm", post(cards::confirm))
        .route("/api/cards/recharge", post(cards::recharge))
        .route("/api/cards/toggle-status", post(cards::toggle_status))
        // Payment gateway
        .route("/create-order", post(payments::create_order))
        .route("/api/razorpay-order", post(payments::create_order))
        .route("/webhook", post(webhook::handle_webhook))
        .route("/api/razorpay-webhook", post(webhook::handle_webhook))
        // Add middleware
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
