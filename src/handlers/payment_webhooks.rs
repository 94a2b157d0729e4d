use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use tracing::info;

use crate::errors::ServiceError;
use crate::AppState;

// POST /api/v1/payments/webhook/{gateway}
//
// Returns 200 both on success and whenever a provider retry would be
// pointless (invalid signature, concurrent delivery already in flight), so
// the gateway does not hammer an unrecoverable case. Business validation
// failures keep their 4xx status.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook/{gateway}",
    params(("gateway" = String, Path, description = "Gateway that sent the webhook")),
    request_body = String,
    responses(
        (status = 200, description = "Webhook processed or idempotently ignored"),
        (status = 400, description = "Malformed payload or unknown gateway", body = crate::errors::ErrorResponse),
        (status = 404, description = "No payment for the reported transaction", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let kind = match state.gateways.kind_from_path(&gateway) {
        Ok(kind) => kind,
        Err(err) => return err.into_response(),
    };

    let signature = state
        .gateways
        .resolve(kind)
        .ok()
        .and_then(|adapter| adapter.signature_header())
        .and_then(|header| headers.get(header))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match state
        .services
        .payments
        .handle_webhook(kind, &body, signature.as_deref())
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "message": outcome.message(),
                "payment_id": outcome.payment().payment_id.clone(),
            })),
        )
            .into_response(),
        Err(ServiceError::WebhookRejected(message)) => {
            info!(gateway, "webhook ignored: {}", message);
            (
                StatusCode::OK,
                Json(json!({ "status": "ignored", "message": message })),
            )
                .into_response()
        }
        Err(ServiceError::LockContended(message)) => {
            info!(gateway, "webhook ignored: {}", message);
            (
                StatusCode::OK,
                Json(json!({ "status": "ignored", "message": message })),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}
