//! Enqueue surface and operational HTTP routes sitting in front of the
//! broker. The library functions mirror the ambient platform's "ingest,
//! then enqueue" route handler pattern, generalized from one ingestion
//! queue to the three named queues of this subsystem, and exposed as plain
//! async functions rather than HTTP handlers so callers (API routes,
//! storage write paths) can invoke them directly without a round trip.
//! Callers that need HTTP get the thin operational routes below instead.

pub mod error;
pub mod routes;
pub mod state;

use std::collections::HashMap;

use axum::{extract::FromRef, routing::get, Router};
use broker::{
    EnqueueOptions, JobStatusView, QueueHealth, ALL_QUEUES, QUEUE_ACTIVITY_SCHEMA,
    QUEUE_NOTE_ENRICHMENT, QUEUE_TASK_ENRICHMENT,
};

pub use state::EnqueueApiState;

/// Enqueues a note for enrichment. Non-blocking, never raises across the
/// boundary: returns `None` on broker unavailability so the caller's write
/// transaction can proceed and be retried later.
pub async fn enqueue_note(note_id: &str, state: &EnqueueApiState) -> Option<String> {
    state
        .broker
        .enqueue(
            QUEUE_NOTE_ENRICHMENT,
            note_id,
            EnqueueOptions {
                job_id: Some(format!("note_processing_{note_id}")),
                ..EnqueueOptions::default()
            },
        )
        .await
}

pub async fn enqueue_task(task_id: &str, state: &EnqueueApiState) -> Option<String> {
    state
        .broker
        .enqueue(
            QUEUE_TASK_ENRICHMENT,
            task_id,
            EnqueueOptions {
                job_id: Some(format!("task_processing_{task_id}")),
                ..EnqueueOptions::default()
            },
        )
        .await
}

pub async fn enqueue_activity(activity_id: &str, state: &EnqueueApiState) -> Option<String> {
    state
        .broker
        .enqueue(
            QUEUE_ACTIVITY_SCHEMA,
            activity_id,
            EnqueueOptions {
                job_id: Some(format!("activity_processing_{activity_id}")),
                ..EnqueueOptions::default()
            },
        )
        .await
}

pub async fn job_status(job_id: &str, state: &EnqueueApiState) -> JobStatusView {
    state.broker.fetch_status(job_id).await
}

pub async fn queue_health(state: &EnqueueApiState) -> HashMap<&'static str, QueueHealth> {
    let mut health = HashMap::new();
    for queue in ALL_QUEUES {
        health.insert(queue, state.broker.queue_health(queue).await);
    }
    health
}

/// Operational HTTP surface: liveness, readiness, queue health. Deliberately
/// minimal ops tooling, not a user-facing API.
pub fn operational_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    EnqueueApiState: FromRef<S>,
{
    Router::new()
        .route("/live", get(routes::liveness::live))
        .route("/ready", get(routes::readiness::ready))
        .route("/queue-health", get(routes::queue_health::queue_health_route))
}
