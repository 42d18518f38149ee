use std::sync::Arc;

use async_trait::async_trait;
use broker::ClaimedJob;
use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    storage::types::task::{Task, TaskPriority as StoredPriority},
};
use llm_port::{LlmPort, TaskPriority as PortPriority, TextContext};
use tracing::{info, instrument, warn};

use super::{JobHandler, MAX_ATTEMPTS};

pub struct TaskHandler {
    db: Arc<SurrealDbClient>,
    llm: Arc<dyn LlmPort>,
}

impl TaskHandler {
    pub fn new(db: Arc<SurrealDbClient>, llm: Arc<dyn LlmPort>) -> Self {
        Self { db, llm }
    }
}

fn to_stored_priority(priority: PortPriority) -> StoredPriority {
    match priority {
        PortPriority::Low => StoredPriority::Low,
        PortPriority::Medium => StoredPriority::Medium,
        PortPriority::High => StoredPriority::High,
        PortPriority::Urgent => StoredPriority::Urgent,
    }
}

#[async_trait]
impl JobHandler for TaskHandler {
    #[instrument(level = "trace", skip_all, fields(job_id = %job.job_id, task_id = %job.target_entity_id, attempt = job.attempt_count))]
    async fn handle(&self, job: &ClaimedJob) -> Result<(), AppError> {
        let Some(task) = Task::claim_for_processing(&job.target_entity_id, &self.db).await? else {
            info!("task already processed or missing; no-op");
            return Ok(());
        };

        match self.llm.process_text(&task.content, TextContext::TaskEnrichment).await {
            Ok(result) => {
                let suggested_priority = result
                    .metadata
                    .get("suggested_priority")
                    .and_then(|v| v.as_str())
                    .and_then(|s| match s {
                        "LOW" => Some(PortPriority::Low),
                        "MEDIUM" => Some(PortPriority::Medium),
                        "HIGH" => Some(PortPriority::High),
                        "URGENT" => Some(PortPriority::Urgent),
                        _ => None,
                    })
                    .map(to_stored_priority);

                let suggested_due_date = result
                    .metadata
                    .get("suggested_due_date")
                    .and_then(|v| v.as_str())
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc));

                let enrichment_data = serde_json::json!({
                    "title": result.metadata.get("title"),
                    "content": result.content,
                    "tokens_used": result.tokens_used,
                    "model_name": result.model_name,
                    "created_at": result.created_at,
                });

                Task::complete_enrichment(
                    &task.id,
                    enrichment_data,
                    suggested_priority,
                    suggested_due_date,
                    chrono::Utc::now(),
                    &self.db,
                )
                .await?;
                Ok(())
            }
            Err(err) => {
                if err.is_retryable() && job.attempt_count < MAX_ATTEMPTS {
                    Task::revert_to_pending(&task.id, &self.db).await?;
                } else {
                    Task::mark_failed(&task.id, &self.db).await?;
                }
                warn!(error = %err, "task enrichment failed");
                Err(err)
            }
        }
    }
}
