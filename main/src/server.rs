use std::sync::Arc;

use axum::Router;
use broker::{BrokerAdapter, RedisBroker};
use common::{config::get_config, storage::db::SurrealDbClient};
use enqueue_api::{operational_routes, EnqueueApiState};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let broker: Arc<dyn BrokerAdapter> = Arc::new(RedisBroker::new(format!(
        "redis://{}:{}/{}",
        config.broker.broker_host, config.broker.broker_port, config.broker.broker_db
    )));

    let state = EnqueueApiState::new(db, broker);

    let app = Router::new()
        .merge(operational_routes())
        .with_state(state);

    info!(
        "Starting enqueue-api server listening on {}",
        config.http_bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.http_bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use broker::MockBrokerAdapter;
    use tower::ServiceExt;

    async fn build_test_app() -> Router {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", "test_db")
                .await
                .expect("failed to start in-memory surrealdb"),
        );

        let mut mock_broker = MockBrokerAdapter::new();
        mock_broker
            .expect_queue_health()
            .returning(|_| broker::QueueHealth::default());

        let state = EnqueueApiState::new(db, Arc::new(mock_broker));

        Router::new().merge(operational_routes()).with_state(state)
    }

    #[tokio::test]
    async fn live_and_ready_and_queue_health_all_return_ok() {
        let app = build_test_app().await;

        for path in ["/live", "/ready", "/queue-health"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).expect("request"))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK, "unexpected status for {path}");
        }
    }
}
