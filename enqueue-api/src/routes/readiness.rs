use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use broker::QUEUE_NOTE_ENRICHMENT;
use serde_json::json;

use crate::state::EnqueueApiState;

/// Readiness probe: 200 only if both the database and the broker answer.
/// Broker reachability is inferred from `queue_health`'s `error` flag since
/// the broker surface never raises across its own boundary.
pub async fn ready(State(state): State<EnqueueApiState>) -> impl IntoResponse {
    let db_ok = state.db.client.query("RETURN true").await.is_ok();
    let health = state.broker.queue_health(QUEUE_NOTE_ENRICHMENT).await;
    let broker_ok = !health.error;

    let checks = json!({
        "db": if db_ok { "ok" } else { "fail" },
        "broker": if broker_ok { "ok" } else { "fail" },
    });

    if db_ok && broker_ok {
        (StatusCode::OK, Json(json!({"status": "ok", "checks": checks})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "checks": checks})),
        )
    }
}
