use std::sync::Arc;

use axum::Router;
use broker::{BrokerAdapter, RedisBroker, QUEUE_ACTIVITY_SCHEMA, QUEUE_NOTE_ENRICHMENT, QUEUE_TASK_ENRICHMENT};
use common::{config::get_config, storage::db::SurrealDbClient};
use enqueue_api::{operational_routes, EnqueueApiState};
use enrichment_pipeline::{
    handlers::{activity::ActivityHandler, note::NoteHandler, task::TaskHandler, HandlerRegistry},
    Dispatcher, DispatcherConfig,
};
use llm_port::{LlmPort, ProductionLlmPort, RateLimiter, RateLimiterConfig, SystemClock};
use tracing::{error, info};
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

    let state = EnqueueApiState::new(db.clone(), broker.clone());
    let app = Router::new().merge(operational_routes()).with_state(state);

    info!(
        "Starting enqueue-api server listening on {}",
        config.http_bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.http_bind_address).await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("server error: {e}");
        }
    });

    let limiter = Arc::new(RateLimiter::new(
        RateLimiterConfig {
            requests_per_minute: config.llm.llm_max_requests_per_minute,
            tokens_per_minute: config.llm.llm_max_tokens_per_minute as u64,
            max_retries: config.llm.llm_max_retries,
            base_delay: std::time::Duration::from_secs(config.llm.llm_retry_base_delay),
            max_delay: std::time::Duration::from_secs(config.llm.llm_retry_max_delay),
            jitter_ratio: config.llm.llm_retry_jitter,
        },
        Arc::new(SystemClock),
    ));
    let llm: Arc<dyn LlmPort> = Arc::new(ProductionLlmPort::new(config.llm.clone(), limiter));

    let handlers = HandlerRegistry::new()
        .register(
            QUEUE_NOTE_ENRICHMENT,
            Arc::new(NoteHandler::new(db.clone(), llm.clone(), broker.clone())),
        )
        .register(QUEUE_TASK_ENRICHMENT, Arc::new(TaskHandler::new(db.clone(), llm.clone())))
        .register(QUEUE_ACTIVITY_SCHEMA, Arc::new(ActivityHandler::new(db, llm)));

    let dispatcher = Dispatcher::new(broker, handlers, DispatcherConfig::default());

    info!("Starting enrichment worker process");
    tokio::select! {
        _ = dispatcher.run() => {}
        result = server_handle => {
            if let Err(e) = result {
                error!("server task panicked: {e}");
            }
        }
    }

    Ok(())
}
