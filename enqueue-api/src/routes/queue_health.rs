use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::{queue_health, state::EnqueueApiState};

/// Per-queue depth, failure, and scheduled counts for the three named queues.
pub async fn queue_health_route(State(state): State<EnqueueApiState>) -> impl IntoResponse {
    let health = queue_health(&state).await;
    let body: serde_json::Map<String, serde_json::Value> = health
        .into_iter()
        .map(|(queue, h)| {
            (
                queue.to_string(),
                json!({
                    "pending_count": h.pending_count,
                    "failed_count": h.failed_count,
                    "scheduled_count": h.scheduled_count,
                    "worker_count": h.worker_count,
                    "is_empty": h.is_empty,
                    "error": h.error,
                }),
            )
        })
        .collect();
    Json(serde_json::Value::Object(body))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use broker::{MockBrokerAdapter, QueueHealth, QUEUE_NOTE_ENRICHMENT};
    use common::storage::db::SurrealDbClient;
    use tower::ServiceExt;

    use crate::{operational_routes, EnqueueApiState};

    #[tokio::test]
    async fn queue_health_route_surfaces_nonzero_pending_count() {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", "test_db")
                .await
                .expect("in-memory surrealdb"),
        );

        let mut mock_broker = MockBrokerAdapter::new();
        mock_broker.expect_queue_health().returning(|queue| {
            if queue == QUEUE_NOTE_ENRICHMENT {
                QueueHealth {
                    pending_count: 7,
                    is_empty: false,
                    ..QueueHealth::default()
                }
            } else {
                QueueHealth::default()
            }
        });

        let state = EnqueueApiState::new(db, Arc::new(mock_broker));
        let app: Router = Router::new().merge(operational_routes()).with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/queue-health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("valid json");
        assert_eq!(body[QUEUE_NOTE_ENRICHMENT]["pending_count"], 7);
        assert_eq!(body[QUEUE_NOTE_ENRICHMENT]["is_empty"], false);
    }
}
