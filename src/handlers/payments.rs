use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::entities::payment::{
    Model as PaymentModel, PaymentGatewayKind, PaymentMethod, PaymentStatus,
};
use crate::errors::ServiceError;
use crate::repositories::{PaymentFilter, StorePaymentStats};
use crate::services::payments::{
    InitializePaymentRequest, InitializePaymentResponse, RefundPaymentRequest,
};
use crate::AppState;

/// Payment record as exposed over the API. Raw gateway metadata stays
/// internal.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub payment_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway: PaymentGatewayKind,
    pub method: PaymentMethod,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub saga_id: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentModel> for PaymentResponse {
    fn from(model: PaymentModel) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            customer_id: model.customer_id,
            owner_id: model.owner_id,
            store_id: model.store_id,
            payment_id: model.payment_id,
            amount: model.amount,
            currency: model.currency,
            status: model.status,
            gateway: model.gateway,
            method: model.method,
            customer_email: model.customer_email,
            customer_name: model.customer_name,
            saga_id: model.saga_id,
            paid_at: model.paid_at,
            failed_at: model.failed_at,
            refunded_at: model.refunded_at,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentListResponse {
    pub payments: Vec<PaymentResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListPaymentsQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub status: Option<PaymentStatus>,
    pub gateway: Option<PaymentGatewayKind>,
    pub order_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    20
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// POST /api/v1/payments/initialize
#[utoipa::path(
    post,
    path = "/api/v1/payments/initialize",
    request_body = InitializePaymentRequest,
    responses(
        (status = 200, description = "Payment initialized", body = InitializePaymentResponse),
        (status = 400, description = "Validation failure", body = crate::errors::ErrorResponse),
        (status = 402, description = "Gateway rejected the charge", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn initialize_payment(
    State(state): State<AppState>,
    Json(req): Json<InitializePaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.payments.initialize_payment(req).await?;
    Ok(Json(response))
}

// POST /api/v1/payments/{payment_id}/refund
#[utoipa::path(
    post,
    path = "/api/v1/payments/{payment_id}/refund",
    params(("payment_id" = String, Path, description = "Gateway transaction reference")),
    request_body = RefundPaymentRequest,
    responses(
        (status = 200, description = "Payment refunded", body = PaymentResponse),
        (status = 404, description = "Unknown payment", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment not refundable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
    Json(req): Json<RefundPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let updated = state
        .services
        .payments
        .refund_payment(&payment_id, req)
        .await?;
    Ok(Json(PaymentResponse::from(updated)))
}

// GET /api/v1/payments/{id}
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment record id")),
    responses(
        (status = 200, description = "Payment found", body = PaymentResponse),
        (status = 404, description = "Unknown payment", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let payment = state.services.payments.get_payment(id).await?;
    Ok(Json(PaymentResponse::from(payment)))
}

// GET /api/v1/payments
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(ListPaymentsQuery),
    responses(
        (status = 200, description = "Payments listed", body = PaymentListResponse)
    ),
    tag = "Payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let filter = PaymentFilter {
        status: query.status,
        gateway: query.gateway,
        order_id: query.order_id,
        customer_id: query.customer_id,
        store_id: query.store_id,
        ..Default::default()
    };
    let (items, total) = state
        .services
        .payments
        .list_payments(&filter, query.page, query.limit)
        .await?;

    Ok(Json(PaymentListResponse {
        payments: items.into_iter().map(PaymentResponse::from).collect(),
        total,
        page: query.page,
        per_page: query.limit,
    }))
}

// GET /api/v1/payments/stats/{store_id}
#[utoipa::path(
    get,
    path = "/api/v1/payments/stats/{store_id}",
    params(
        ("store_id" = Uuid, Path, description = "Store whose payments to aggregate"),
        StatsQuery
    ),
    responses(
        (status = 200, description = "Aggregated totals by status", body = StorePaymentStats)
    ),
    tag = "Payments"
)]
pub async fn store_stats(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let stats = state
        .services
        .payments
        .store_stats(store_id, query.from, query.to)
        .await?;
    Ok(Json(stats))
}
