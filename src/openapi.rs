use axum::Json;
use utoipa::OpenApi;

use crate::entities::payment::{PaymentGatewayKind, PaymentMethod, PaymentStatus};
use crate::errors::ErrorResponse;
use crate::handlers::payments::{PaymentListResponse, PaymentResponse};
use crate::repositories::{StatusBreakdown, StorePaymentStats};
use crate::services::payments::{
    InitializePaymentRequest, InitializePaymentResponse, RefundPaymentRequest,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::payments::initialize_payment,
        crate::handlers::payments::refund_payment,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::list_payments,
        crate::handlers::payments::store_stats,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        InitializePaymentRequest,
        InitializePaymentResponse,
        RefundPaymentRequest,
        PaymentResponse,
        PaymentListResponse,
        StorePaymentStats,
        StatusBreakdown,
        PaymentStatus,
        PaymentGatewayKind,
        PaymentMethod,
        ErrorResponse,
    )),
    tags(
        (name = "Payments", description = "Payment initialization, webhook reconciliation, and refunds")
    )
)]
pub struct ApiDoc;

// GET /api/v1/openapi.json
pub async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
