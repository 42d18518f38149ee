use std::sync::Arc;

use async_trait::async_trait;
use broker::{BrokerAdapter, ClaimedJob, EnqueueOptions, QUEUE_TASK_ENRICHMENT};
use chrono::Utc;
use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    storage::types::{activity::Activity, moment::Moment, note::Note, task::Task, task::TaskPriority as StoredPriority},
};
use llm_port::{LlmPort, TaskPriority as PortPriority, TextContext};
use tracing::{info, instrument, warn};

use super::{JobHandler, MAX_ATTEMPTS};

pub struct NoteHandler {
    db: Arc<SurrealDbClient>,
    llm: Arc<dyn LlmPort>,
    broker: Arc<dyn BrokerAdapter>,
}

impl NoteHandler {
    pub fn new(db: Arc<SurrealDbClient>, llm: Arc<dyn LlmPort>, broker: Arc<dyn BrokerAdapter>) -> Self {
        Self { db, llm, broker }
    }

    fn to_stored_priority(priority: PortPriority) -> StoredPriority {
        match priority {
            PortPriority::Low => StoredPriority::Low,
            PortPriority::Medium => StoredPriority::Medium,
            PortPriority::High => StoredPriority::High,
            PortPriority::Urgent => StoredPriority::Urgent,
        }
    }

    /// Stage 2: extract zero or more child tasks. Non-fatal: any failure here is
    /// logged and the note still proceeds to COMPLETED.
    async fn extract_tasks_stage(&self, note: &Note) {
        let tasks = match self.llm.extract_tasks(&note.content, Utc::now()).await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(note_id = %note.id, error = %err, "task extraction failed; note still completes");
                return;
            }
        };

        for candidate in tasks {
            let priority = Self::to_stored_priority(candidate.priority);
            let created = Task::new(
                note.user_id.clone(),
                candidate.content,
                priority,
                candidate.due_date,
                None,
                Some(note.id.clone()),
            )
            .create_and_add_to_db(&self.db)
            .await;

            let Ok(created) = created else {
                warn!(note_id = %note.id, "failed to persist extracted task; skipping enqueue");
                continue;
            };

            let job_id = self
                .broker
                .enqueue(
                    QUEUE_TASK_ENRICHMENT,
                    &created.id,
                    EnqueueOptions {
                        job_id: Some(format!("task_processing_{}", created.id)),
                        ..EnqueueOptions::default()
                    },
                )
                .await;
            if job_id.is_none() {
                warn!(task_id = %created.id, "broker unavailable; extracted task stays unclaimed until next trigger");
            }
        }
    }

    /// Stage 3: extract zero or more moments against the user's existing activity
    /// schemas. Skipped entirely if the user has none, and non-fatal on failure.
    async fn extract_moments_stage(&self, note: &Note) {
        let activities = match Activity::for_user(&note.user_id, &self.db).await {
            Ok(activities) => activities,
            Err(err) => {
                warn!(note_id = %note.id, error = %err, "could not load activities for moment extraction");
                return;
            }
        };

        if activities.is_empty() {
            info!(note_id = %note.id, "no activities for user; skipping moment extraction");
            return;
        }

        let schemas = activities
            .iter()
            .map(|a| (a.name.clone(), a.activity_schema.clone()))
            .collect();

        let result = match self
            .llm
            .process_text(&note.content, TextContext::MomentExtraction { activities: schemas })
            .await
        {
            Ok(result) => result,
            Err(err) => {
                warn!(note_id = %note.id, error = %err, "moment extraction failed; note still completes");
                return;
            }
        };

        let Some(moments) = result.metadata.get("moments").and_then(|v| v.as_array()) else {
            return;
        };

        for moment in moments {
            let Some(activity_name) = moment.get("activity_name").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(data) = moment.get("data").filter(|d| d.is_object()) else {
                warn!(note_id = %note.id, "moment missing well-formed data object; discarding");
                continue;
            };
            let Some(activity) = activities.iter().find(|a| a.name == activity_name) else {
                warn!(note_id = %note.id, activity_name, "moment referenced unknown activity; discarding");
                continue;
            };

            let created = Moment::new(note.user_id.clone(), activity.id.clone(), data.clone(), Utc::now())
                .create_and_add_to_db(&self.db)
                .await;
            if let Err(err) = created {
                warn!(note_id = %note.id, error = %err, "failed to persist extracted moment");
            }
        }
    }
}

#[async_trait]
impl JobHandler for NoteHandler {
    #[instrument(level = "trace", skip_all, fields(job_id = %job.job_id, note_id = %job.target_entity_id, attempt = job.attempt_count))]
    async fn handle(&self, job: &ClaimedJob) -> Result<(), AppError> {
        let Some(note) = Note::claim_for_processing(&job.target_entity_id, &self.db).await? else {
            info!("note already processed or missing; no-op");
            return Ok(());
        };

        if note.content.trim().is_empty() {
            Note::mark_failed(&note.id, &self.db).await?;
            warn!("note content is empty; failing without an LLM call");
            return Err(AppError::ValidationFailure("note content is empty".to_string()));
        }

        let enrichment = match self.llm.process_text(&note.content, TextContext::NoteEnrichment).await {
            Ok(result) => result,
            Err(err) => {
                if err.is_retryable() && job.attempt_count < MAX_ATTEMPTS {
                    Note::revert_to_pending(&note.id, &self.db).await?;
                } else {
                    Note::mark_failed(&note.id, &self.db).await?;
                }
                warn!(error = %err, "note enrichment failed");
                return Err(err);
            }
        };

        self.extract_tasks_stage(&note).await;
        self.extract_moments_stage(&note).await;

        let enrichment_data = serde_json::json!({
            "title": enrichment.metadata.get("title"),
            "content": enrichment.content,
            "tokens_used": enrichment.tokens_used,
            "model_name": enrichment.model_name,
            "created_at": enrichment.created_at,
        });

        Note::complete_enrichment(&note.id, enrichment_data, Utc::now(), &self.db).await?;
        Ok(())
    }
}
