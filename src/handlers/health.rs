use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database_up = state.db.ping().await.is_ok();
    let redis_up = match state.redis.get_async_connection().await {
        Ok(mut conn) => redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok(),
        Err(_) => false,
    };

    // The cache/bus degrade gracefully; only the database is load-bearing.
    let status = if database_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database_up { "ok" } else { "degraded" },
            "database": if database_up { "up" } else { "down" },
            "redis": if redis_up { "up" } else { "down" },
        })),
    )
}
