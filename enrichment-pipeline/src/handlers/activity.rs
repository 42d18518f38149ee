use std::sync::Arc;

use async_trait::async_trait;
use broker::ClaimedJob;
use common::{error::AppError, storage::db::SurrealDbClient, storage::types::activity::Activity};
use llm_port::LlmPort;
use tracing::{info, instrument, warn};

use super::{JobHandler, MAX_ATTEMPTS};

pub struct ActivityHandler {
    db: Arc<SurrealDbClient>,
    llm: Arc<dyn LlmPort>,
}

impl ActivityHandler {
    pub fn new(db: Arc<SurrealDbClient>, llm: Arc<dyn LlmPort>) -> Self {
        Self { db, llm }
    }
}

#[async_trait]
impl JobHandler for ActivityHandler {
    #[instrument(level = "trace", skip_all, fields(job_id = %job.job_id, activity_id = %job.target_entity_id, attempt = job.attempt_count))]
    async fn handle(&self, job: &ClaimedJob) -> Result<(), AppError> {
        let Some(activity) = Activity::claim_for_processing(&job.target_entity_id, &self.db).await? else {
            info!("activity already processed or missing; no-op");
            return Ok(());
        };

        match self.llm.analyze_activity_schema(&activity.activity_schema).await {
            Ok(render) => {
                let schema_render = serde_json::json!({
                    "render_type": render.render_type,
                    "layout": render.layout,
                    "field_groups": render.field_groups,
                });
                Activity::complete_enrichment(&activity.id, schema_render, chrono::Utc::now(), &self.db).await?;
                Ok(())
            }
            Err(err) => {
                if err.is_retryable() && job.attempt_count < MAX_ATTEMPTS {
                    Activity::revert_to_pending(&activity.id, &self.db).await?;
                } else {
                    Activity::mark_failed(&activity.id, &self.db).await?;
                }
                warn!(error = %err, "activity schema analysis failed");
                Err(err)
            }
        }
    }
}
