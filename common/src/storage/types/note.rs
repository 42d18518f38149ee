use serde_json::Value;
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{
    error::AppError, storage::db::SurrealDbClient, storage::types::processing_status::ProcessingStatus,
    stored_object,
};

stored_object!(Note, "note", {
    user_id: String,
    content: String,
    attachments: Option<Vec<String>>,
    processing_status: ProcessingStatus,
    enrichment_data: Option<Value>,
    processed_at: Option<DateTime<Utc>>
});

impl Note {
    pub fn new(user_id: String, content: String, attachments: Option<Vec<String>>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            content,
            attachments,
            processing_status: ProcessingStatus::Pending,
            enrichment_data: None,
            processed_at: None,
        }
    }

    pub async fn create_and_add_to_db(
        user_id: String,
        content: String,
        attachments: Option<Vec<String>>,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let note = Self::new(user_id, content, attachments);
        let stored: Option<Self> = db.store_item(note).await?;
        stored.ok_or_else(|| AppError::Persistence("note insert returned no row".to_string()))
    }

    /// Idempotency guard: atomically claims the note for processing only if it
    /// is still `PENDING`. Returns `None` if another worker already claimed it
    /// (or it was deleted), in which case the caller no-ops.
    pub async fn claim_for_processing(
        id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "UPDATE type::thing('note', $id) SET processing_status = 'PROCESSING', updated_at = time::now() WHERE processing_status = 'PENDING'",
            )
            .bind(("id", id.to_owned()))
            .await?;

        let claimed: Option<Self> = response.take(0)?;
        Ok(claimed)
    }

    pub async fn complete_enrichment(
        id: &str,
        enrichment_data: Value,
        now: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/enrichment_data", enrichment_data))
            .patch(PatchOp::replace(
                "/processed_at",
                surrealdb::Datetime::from(now),
            ))
            .patch(PatchOp::replace("/processing_status", ProcessingStatus::Completed))
            .patch(PatchOp::replace("/updated_at", surrealdb::Datetime::from(now)))
            .await?;
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

    /// Reverts a claimed note back to `PENDING` so a job-level retry can
    /// re-claim it. No-ops if the note is no longer `PROCESSING`.
    pub async fn revert_to_pending(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let mut response = db
            .query(
                "UPDATE type::thing('note', $id) SET processing_status = 'PENDING', updated_at = time::now() WHERE processing_status = 'PROCESSING'",
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
    async fn claim_for_processing_transitions_pending_to_processing() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        let note = Note::create_and_add_to_db(
            "user1".to_string(),
            "Tomorrow I should finish the report.".to_string(),
            None,
            &db,
        )
        .await
        .expect("create note");

        let claimed = Note::claim_for_processing(&note.id, &db)
            .await
            .expect("claim");
        assert!(claimed.is_some());
        assert_eq!(
            claimed.unwrap().processing_status,
            ProcessingStatus::Processing
        );

        // A second claim attempt finds the note already PROCESSING and no-ops.
        let second_claim = Note::claim_for_processing(&note.id, &db)
            .await
            .expect("second claim query");
        assert!(second_claim.is_none());
    }

    #[tokio::test]
    async fn complete_enrichment_sets_completed_and_processed_at() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        let note = Note::create_and_add_to_db(
            "user1".to_string(),
            "Some content".to_string(),
            None,
            &db,
        )
        .await
        .expect("create note");

        Note::claim_for_processing(&note.id, &db).await.expect("claim");

        let now = Utc::now();
        Note::complete_enrichment(
            &note.id,
            serde_json::json!({"title": "Title"}),
            now,
            &db,
        )
        .await
        .expect("complete");

        let fetched: Note = db
            .get_item(&note.id)
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(fetched.processing_status, ProcessingStatus::Completed);
        assert!(fetched.processed_at.is_some());
        assert!(fetched.enrichment_data.is_some());
    }
}
