//! Named durable FIFO queues with per-job metadata, backed by a
//! Redis-compatible store. Grounded on the legacy `RedisClientTrait`/`RedisClient`
//! pair (multiplexed async connection, a narrow trait seam so callers can mock
//! it in tests), generalized from a single cache client to the
//! enqueue/status/health/claim contract this subsystem needs.
//!
//! The blocking round-robin worker loop is composed one layer up, in
//! `enrichment-pipeline`'s dispatcher, out of the primitives exposed here
//! (`claim_next`, `mark_finished`, `mark_failed`, `requeue_with_delay`) —
//! mirroring the platform's own split between a storage client and the
//! pipeline's worker loop.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const QUEUE_NOTE_ENRICHMENT: &str = "note_enrichment";
pub const QUEUE_TASK_ENRICHMENT: &str = "task_enrichment";
pub const QUEUE_ACTIVITY_SCHEMA: &str = "activity_schema";

pub const ALL_QUEUES: [&str; 3] = [
    QUEUE_NOTE_ENRICHMENT,
    QUEUE_TASK_ENRICHMENT,
    QUEUE_ACTIVITY_SCHEMA,
];

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),
    #[error("broker command error: {0}")]
    Command(String),
    #[error("broker serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        BrokerError::Command(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub queue_name: String,
    pub target_entity_id: String,
    pub enqueued_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub result_ttl: u64,
    pub meta: Value,
}

/// Options accepted by `enqueue`.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub job_timeout: u64,
    pub ttl_in_queue: u64,
    pub result_ttl: u64,
    pub meta: Value,
    /// A deterministic id (e.g. `note_processing_<id>`) lets callers collapse
    /// metadata for repeated enqueues of the same target; the adapter itself does
    /// not deduplicate queue entries.
    pub job_id: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            job_timeout: 600,
            ttl_in_queue: 3600,
            result_ttl: 86400,
            meta: Value::Null,
            job_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub meta: Value,
}

#[derive(Debug, Clone, Default)]
pub struct QueueHealth {
    pub pending_count: u64,
    pub failed_count: u64,
    pub scheduled_count: u64,
    pub worker_count: u64,
    pub is_empty: bool,
    pub error: bool,
}

#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: String,
    pub queue_name: String,
    pub target_entity_id: String,
    pub attempt_count: u32,
    pub meta: Value,
}

/// The broker capability set consumed by the dispatcher, job handlers, and the
/// enqueue API. `enqueue`/`queue_health` never raise across their own boundary
/// and instead degrade to a default/`None` value; lower-level primitives used
/// only by the in-process dispatcher (`claim_next` and friends) return `Result`
/// since the dispatcher loop is in a position to log and retry on the next
/// iteration.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn enqueue(&self, queue: &str, target_entity_id: &str, options: EnqueueOptions) -> Option<String>;
    async fn fetch_status(&self, job_id: &str) -> JobStatusView;
    async fn queue_health(&self, queue: &str) -> QueueHealth;

    async fn claim_next(&self, queues: &[&str]) -> Result<Option<ClaimedJob>, BrokerError>;
    async fn mark_finished(&self, job_id: &str) -> Result<(), BrokerError>;
    async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<(), BrokerError>;
    async fn requeue_with_delay(&self, job_id: &str, delay: Duration) -> Result<(), BrokerError>;
    async fn heartbeat(&self, queue: &str, worker_id: &str) -> Result<(), BrokerError>;
}

pub struct RedisBroker {
    redis_url: String,
}

impl RedisBroker {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, BrokerError> {
        let client = redis::Client::open(self.redis_url.clone())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    fn job_key(job_id: &str) -> String {
        format!("job:{job_id}")
    }
    fn queue_key(queue: &str) -> String {
        format!("queue:{queue}")
    }
    fn failed_key(queue: &str) -> String {
        format!("failed:{queue}")
    }
    fn scheduled_key(queue: &str) -> String {
        format!("scheduled:{queue}")
    }
    fn workers_key(queue: &str) -> String {
        format!("workers:{queue}")
    }

    async fn load_record(
        conn: &mut redis::aio::MultiplexedConnection,
        job_id: &str,
    ) -> Result<Option<JobRecord>, BrokerError> {
        let raw: Option<String> = conn.get(Self::job_key(job_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save_record(
        conn: &mut redis::aio::MultiplexedConnection,
        record: &JobRecord,
        ttl_secs: u64,
    ) -> Result<(), BrokerError> {
        let serialized = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(Self::job_key(&record.job_id), serialized, ttl_secs)
            .await?;
        Ok(())
    }

    /// Moves any scheduled retries whose delay has elapsed back onto the live
    /// queue. Called opportunistically by `claim_next`.
    async fn promote_scheduled(
        conn: &mut redis::aio::MultiplexedConnection,
        queue: &str,
    ) -> Result<(), BrokerError> {
        let now = Utc::now().timestamp();
        let due: Vec<String> = conn
            .zrangebyscore(Self::scheduled_key(queue), i64::MIN, now)
            .await?;
        for job_id in due {
            let _: i64 = conn.zrem(Self::scheduled_key(queue), &job_id).await?;
            let _: i64 = conn.rpush(Self::queue_key(queue), &job_id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerAdapter for RedisBroker {
    async fn enqueue(&self, queue: &str, target_entity_id: &str, options: EnqueueOptions) -> Option<String> {
        let job_id = options.job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let record = JobRecord {
            job_id: job_id.clone(),
            queue_name: queue.to_string(),
            target_entity_id: target_entity_id.to_string(),
            enqueued_at: Utc::now(),
            ended_at: None,
            attempt_count: 0,
            status: JobStatus::Queued,
            last_error: None,
            result_ttl: options.result_ttl,
            meta: options.meta,
        };

        let outcome: Result<(), BrokerError> = async {
            let mut conn = self.connection().await?;
            Self::save_record(&mut conn, &record, options.ttl_in_queue.max(options.result_ttl)).await?;
            let _: i64 = conn.rpush(Self::queue_key(queue), &job_id).await?;
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => Some(job_id),
            Err(err) => {
                warn!(queue, error = %err, "broker unavailable, enqueue swallowed");
                None
            }
        }
    }

    async fn fetch_status(&self, job_id: &str) -> JobStatusView {
        let record = async {
            let mut conn = self.connection().await?;
            Self::load_record(&mut conn, job_id).await
        }
        .await;

        match record {
            Ok(Some(record)) => JobStatusView {
                status: record.status,
                created_at: Some(record.enqueued_at),
                ended_at: record.ended_at,
                last_error: record.last_error,
                meta: record.meta,
            },
            Ok(None) => JobStatusView {
                status: JobStatus::NotFound,
                created_at: None,
                ended_at: None,
                last_error: None,
                meta: Value::Null,
            },
            Err(err) => {
                warn!(job_id, error = %err, "broker unavailable, fetch_status degraded");
                JobStatusView {
                    status: JobStatus::NotFound,
                    created_at: None,
                    ended_at: None,
                    last_error: Some(err.to_string()),
                    meta: Value::Null,
                }
            }
        }
    }

    async fn queue_health(&self, queue: &str) -> QueueHealth {
        let outcome: Result<QueueHealth, BrokerError> = async {
            let mut conn = self.connection().await?;
            let pending_count: u64 = conn.llen(Self::queue_key(queue)).await?;
            let failed_count: u64 = conn.llen(Self::failed_key(queue)).await?;
            let scheduled_count: u64 = conn.zcard(Self::scheduled_key(queue)).await?;
            let worker_count: u64 = conn.hlen(Self::workers_key(queue)).await?;

            Ok(QueueHealth {
                pending_count,
                failed_count,
                scheduled_count,
                worker_count,
                is_empty: pending_count == 0,
                error: false,
            })
        }
        .await;

        outcome.unwrap_or_else(|err| {
            warn!(queue, error = %err, "broker unavailable, queue_health degraded");
            QueueHealth {
                is_empty: true,
                error: true,
                ..QueueHealth::default()
            }
        })
    }

    async fn claim_next(&self, queues: &[&str]) -> Result<Option<ClaimedJob>, BrokerError> {
        let mut conn = self.connection().await?;

        for queue in queues {
            Self::promote_scheduled(&mut conn, queue).await?;

            let job_id: Option<String> = conn.lpop(Self::queue_key(queue), None).await?;
            let Some(job_id) = job_id else { continue };

            let Some(mut record) = Self::load_record(&mut conn, &job_id).await? else {
                // Record expired or was never written; treat as a no-op.
                continue;
            };

            record.status = JobStatus::Started;
            record.attempt_count = record.attempt_count.saturating_add(1);
            Self::save_record(&mut conn, &record, record.result_ttl).await?;

            return Ok(Some(ClaimedJob {
                job_id: record.job_id,
                queue_name: record.queue_name,
                target_entity_id: record.target_entity_id,
                attempt_count: record.attempt_count,
                meta: record.meta,
            }));
        }

        Ok(None)
    }

    async fn mark_finished(&self, job_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let Some(mut record) = Self::load_record(&mut conn, job_id).await? else {
            return Ok(());
        };
        record.status = JobStatus::Finished;
        record.ended_at = Some(Utc::now());
        Self::save_record(&mut conn, &record, record.result_ttl).await
    }

    async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let Some(mut record) = Self::load_record(&mut conn, job_id).await? else {
            return Ok(());
        };
        record.status = JobStatus::Failed;
        record.ended_at = Some(Utc::now());
        record.last_error = Some(reason.to_string());
        Self::save_record(&mut conn, &record, record.result_ttl).await?;
        let _: i64 = conn.rpush(Self::failed_key(&record.queue_name), job_id).await?;
        Ok(())
    }

    async fn requeue_with_delay(&self, job_id: &str, delay: Duration) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let Some(mut record) = Self::load_record(&mut conn, job_id).await? else {
            return Ok(());
        };
        record.status = JobStatus::Queued;
        Self::save_record(&mut conn, &record, record.result_ttl).await?;

        let ready_at = (Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default()).timestamp();
        let _: i64 = conn
            .zadd(Self::scheduled_key(&record.queue_name), job_id, ready_at)
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, queue: &str, worker_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .hset(Self::workers_key(queue), worker_id, Utc::now().timestamp())
            .await?;
        Ok(())
    }
}
