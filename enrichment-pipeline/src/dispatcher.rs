//! Job dispatcher, grounded on the platform's existing `run_worker_loop`
//! (`ingestion-pipeline/src/lib.rs`): claim, idle backoff on empty, short backoff
//! on a claim error. Generalized here from one table/queue to the three named
//! queues and handler registry this subsystem needs, with job-level attempt
//! tracking and exponential backoff added on top.

use std::{sync::Arc, time::Duration};

use broker::{BrokerAdapter, ClaimedJob};
use rand::Rng;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::handlers::{HandlerRegistry, MAX_ATTEMPTS};

const IDLE_BACKOFF: Duration = Duration::from_millis(500);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queues: Vec<&'static str>,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter_ratio: f64,
    pub max_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queues: broker::ALL_QUEUES.to_vec(),
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(60),
            retry_jitter_ratio: 0.2,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

pub struct Dispatcher {
    broker: Arc<dyn BrokerAdapter>,
    handlers: HandlerRegistry,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(broker: Arc<dyn BrokerAdapter>, handlers: HandlerRegistry, config: DispatcherConfig) -> Self {
        Self {
            broker,
            handlers,
            config,
        }
    }

    /// Runs the blocking round-robin claim loop forever. Intended to run as the
    /// body of a worker process; callers that need graceful shutdown should race
    /// this future against a signal handler and let the current job finish.
    pub async fn run(&self) -> ! {
        let worker_id = format!("enrichment-worker-{}", Uuid::new_v4());
        info!(%worker_id, queues = ?self.config.queues, "dispatcher starting");

        loop {
            match self.broker.claim_next(&self.config.queues).await {
                Ok(Some(job)) => {
                    let _ = self.broker.heartbeat(&job.queue_name, &worker_id).await;
                    self.dispatch(job).await;
                }
                Ok(None) => sleep(IDLE_BACKOFF).await,
                Err(err) => {
                    error!(%worker_id, error = %err, "failed to claim job");
                    sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    #[tracing::instrument(level = "trace", skip_all, fields(job_id = %job.job_id, queue = %job.queue_name, attempt = job.attempt_count))]
    async fn dispatch(&self, job: ClaimedJob) {
        let Some(handler) = self.handlers.get(&job.queue_name) else {
            error!(queue = %job.queue_name, "no handler registered for queue");
            let _ = self.broker.mark_failed(&job.job_id, "no handler registered").await;
            return;
        };

        match handler.handle(&job).await {
            Ok(()) => {
                if let Err(err) = self.broker.mark_finished(&job.job_id).await {
                    warn!(job_id = %job.job_id, error = %err, "failed to mark job finished");
                }
            }
            Err(err) => {
                let retryable = err.is_retryable() && job.attempt_count < self.config.max_attempts;
                if retryable {
                    let delay = self.retry_delay(job.attempt_count);
                    warn!(
                        job_id = %job.job_id,
                        attempt = job.attempt_count,
                        retry_in_secs = delay.as_secs(),
                        error = %err,
                        "job failed; scheduling retry"
                    );
                    if let Err(requeue_err) = self.broker.requeue_with_delay(&job.job_id, delay).await {
                        error!(job_id = %job.job_id, error = %requeue_err, "failed to requeue job");
                    }
                } else {
                    warn!(job_id = %job.job_id, error = %err, "job failed terminally");
                    if let Err(fail_err) = self.broker.mark_failed(&job.job_id, &err.to_string()).await {
                        error!(job_id = %job.job_id, error = %fail_err, "failed to mark job failed");
                    }
                }
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let capped_attempt = attempt.saturating_sub(1).min(6);
        let multiplier = 2_u64.saturating_pow(capped_attempt);
        let base = self.config.retry_base_delay.as_secs().saturating_mul(multiplier);
        let capped = base.min(self.config.retry_max_delay.as_secs()) as f64;

        let jitter_span = (capped * self.config.retry_jitter_ratio).max(0.0);
        let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::JobHandler;
    use async_trait::async_trait;
    use common::error::AppError;

    struct AlwaysFailsPermanently;

    #[async_trait]
    impl JobHandler for AlwaysFailsPermanently {
        async fn handle(&self, _job: &ClaimedJob) -> Result<(), AppError> {
            Err(AppError::LlmPermanent("model refused".to_string()))
        }
    }

    #[tokio::test]
    async fn dispatch_marks_broker_job_failed_on_non_retryable_handler_error() {
        let mut mock_broker = broker::MockBrokerAdapter::new();
        mock_broker.expect_mark_failed().times(1).returning(|_, _| Ok(()));
        mock_broker.expect_requeue_with_delay().times(0).returning(|_, _| Ok(()));

        let dispatcher = Dispatcher {
            broker: Arc::new(mock_broker),
            handlers: HandlerRegistry::new()
                .register(broker::QUEUE_NOTE_ENRICHMENT, Arc::new(AlwaysFailsPermanently)),
            config: DispatcherConfig::default(),
        };

        let job = ClaimedJob {
            job_id: "job-1".to_string(),
            queue_name: broker::QUEUE_NOTE_ENRICHMENT.to_string(),
            target_entity_id: "note-1".to_string(),
            attempt_count: 1,
            meta: serde_json::Value::Null,
        };

        dispatcher.dispatch(job).await;
    }

    #[test]
    fn retry_delay_matches_base_factor_2_cap_60() {
        let dispatcher = Dispatcher {
            broker: Arc::new(broker::MockBrokerAdapter::new()),
            handlers: HandlerRegistry::new(),
            config: DispatcherConfig {
                retry_base_delay: Duration::from_secs(2),
                retry_max_delay: Duration::from_secs(60),
                retry_jitter_ratio: 0.0,
                ..DispatcherConfig::default()
            },
        };

        assert_eq!(dispatcher.retry_delay(1).as_secs(), 2);
        assert_eq!(dispatcher.retry_delay(2).as_secs(), 4);
        assert_eq!(dispatcher.retry_delay(3).as_secs(), 8);
        assert_eq!(dispatcher.retry_delay(6).as_secs(), 60);
        assert_eq!(dispatcher.retry_delay(20).as_secs(), 60);
    }
}
