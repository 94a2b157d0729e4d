use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::services::PaymentService;
use crate::AppState;

pub mod health;
pub mod payment_webhooks;
pub mod payments;

/// Service handles shared with every handler through `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub payments: Arc<PaymentService>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/openapi.json", get(crate::openapi::serve_openapi))
        .route("/payments/initialize", post(payments::initialize_payment))
        .route("/payments", get(payments::list_payments))
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/:payment_id/refund", post(payments::refund_payment))
        .route("/payments/stats/:store_id", get(payments::store_stats))
        .route(
            "/payments/webhook/:gateway",
            post(payment_webhooks::payment_webhook),
        )
}
