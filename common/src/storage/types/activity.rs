use serde_json::Value;
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{
    error::AppError, storage::db::SurrealDbClient, storage::types::processing_status::ProcessingStatus,
    stored_object,
};

stored_object!(Activity, "activity", {
    user_id: String,
    name: String,
    activity_schema: Value,
    icon: String,
    color: String,
    processing_status: ProcessingStatus,
    schema_render: Option<Value>,
    processed_at: Option<DateTime<Utc>>
});

fn is_valid_hex_color(color: &str) -> bool {
    let stripped = color.strip_prefix('#').unwrap_or(color);
    (stripped.len() == 6 || stripped.len() == 3) && stripped.chars().all(|c| c.is_ascii_hexdigit())
}

impl Activity {
    pub fn new(
        user_id: String,
        name: String,
        activity_schema: Value,
        icon: String,
        color: String,
    ) -> Result<Self, AppError> {
        if !is_valid_hex_color(&color) {
            return Err(AppError::ValidationFailure(format!(
                "activity color '{color}' is not a valid hex code"
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            name,
            activity_schema,
            icon,
            color,
            processing_status: ProcessingStatus::Pending,
            schema_render: None,
            processed_at: None,
        })
    }

    pub async fn create_and_add_to_db(self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let stored: Option<Self> = db.store_item(self).await?;
        stored.ok_or_else(|| AppError::Persistence("activity insert returned no row".to_string()))
    }

    pub async fn claim_for_processing(
        id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "UPDATE type::thing('activity', $id) SET processing_status = 'PROCESSING', updated_at = time::now() WHERE processing_status = 'PENDING'",
            )
            .bind(("id", id.to_owned()))
            .await?;

        let claimed: Option<Self> = response.take(0)?;
        Ok(claimed)
    }

    pub async fn complete_enrichment(
        id: &str,
        schema_render: Value,
        now: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/schema_render", schema_render))
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

    /// Reverts a claimed activity back to `PENDING` so a job-level retry can
    /// re-claim it. No-ops if no longer `PROCESSING`.
    pub async fn revert_to_pending(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let mut response = db
            .query(
                "UPDATE type::thing('activity', $id) SET processing_status = 'PENDING', updated_at = time::now() WHERE processing_status = 'PROCESSING'",
            )
            .bind(("id", id.to_owned()))
            .await?;
        let _reverted: Option<Self> = response.take(0)?;
        Ok(())
    }

    pub async fn for_user(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE user_id = $user_id")
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }
}
