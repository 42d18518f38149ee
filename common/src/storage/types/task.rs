use serde_json::Value;
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{
    error::AppError, storage::db::SurrealDbClient, storage::types::processing_status::ProcessingStatus,
    stored_object,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

stored_object!(Task, "task", {
    user_id: String,
    content: String,
    status: TaskStatus,
    priority: TaskPriority,
    due_date: Option<DateTime<Utc>>,
    parent_id: Option<String>,
    note_id: Option<String>,
    processing_status: ProcessingStatus,
    enrichment_data: Option<Value>,
    processed_at: Option<DateTime<Utc>>
});

impl Task {
    pub fn new(
        user_id: String,
        content: String,
        priority: TaskPriority,
        due_date: Option<DateTime<Utc>>,
        parent_id: Option<String>,
        note_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            content,
            status: TaskStatus::Todo,
            priority,
            due_date,
            parent_id,
            note_id,
            processing_status: ProcessingStatus::Pending,
            enrichment_data: None,
            processed_at: None,
        }
    }

    pub async fn create_and_add_to_db(self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let stored: Option<Self> = db.store_item(self).await?;
        stored.ok_or_else(|| AppError::Persistence("task insert returned no row".to_string()))
    }

    pub async fn claim_for_processing(
        id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "UPDATE type::thing('task', $id) SET processing_status = 'PROCESSING', updated_at = time::now() WHERE processing_status = 'PENDING'",
            )
            .bind(("id", id.to_owned()))
            .await?;

        let claimed: Option<Self> = response.take(0)?;
        Ok(claimed)
    }

    /// Writes enrichment output, setting `priority`/`due_date` only when the caller's
    /// current value is still unset.
    pub async fn complete_enrichment(
        id: &str,
        enrichment_data: Value,
        suggested_priority: Option<TaskPriority>,
        suggested_due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let existing: Option<Self> = db.get_item(id).await?;
        let Some(existing) = existing else {
            return Err(AppError::EntityNotFound(id.to_string()));
        };

        let mut update = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/enrichment_data", enrichment_data))
            .patch(PatchOp::replace(
                "/processed_at",
                surrealdb::Datetime::from(now),
            ))
            .patch(PatchOp::replace("/processing_status", ProcessingStatus::Completed))
            .patch(PatchOp::replace("/updated_at", surrealdb::Datetime::from(now)));

        if let Some(priority) = suggested_priority {
            if existing.priority == TaskPriority::Medium {
                update = update.patch(PatchOp::replace("/priority", priority));
            }
        }
        if let Some(due_date) = suggested_due_date {
            if existing.due_date.is_none() {
                update = update.patch(PatchOp::replace("/due_date", surrealdb::Datetime::from(due_date)));
            }
        }

        let _updated: Option<Self> = update.await?;
        Ok(())
    }

    pub async fn mark_failed(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/processing_status", ProcessingStatus::Failed))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }

    /// Reverts a claimed task back to `PENDING` so a job-level retry can
    /// re-claim it. No-ops if the task is no longer `PROCESSING`.
    pub async fn revert_to_pending(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let mut response = db
            .query(
                "UPDATE type::thing('task', $id) SET processing_status = 'PENDING', updated_at = time::now() WHERE processing_status = 'PROCESSING'",
            )
            .bind(("id", id.to_owned()))
            .await?;
        let _reverted: Option<Self> = response.take(0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_enrichment_does_not_overwrite_explicit_priority() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        let task = Task::new(
            "user1".to_string(),
            "email sam".to_string(),
            TaskPriority::High,
            None,
            None,
            None,
        )
        .create_and_add_to_db(&db)
        .await
        .expect("create task");

        Task::claim_for_processing(&task.id, &db).await.expect("claim");

        Task::complete_enrichment(
            &task.id,
            serde_json::json!({"title": "Email Sam"}),
            Some(TaskPriority::Low),
            None,
            Utc::now(),
            &db,
        )
        .await
        .expect("complete");

        let fetched: Task = db.get_item(&task.id).await.expect("fetch").expect("present");
        assert_eq!(fetched.priority, TaskPriority::High);
        assert_eq!(fetched.processing_status, ProcessingStatus::Completed);
    }
}
