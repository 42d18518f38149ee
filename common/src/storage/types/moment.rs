use serde_json::Value;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Moment, "moment", {
    user_id: String,
    activity_id: String,
    data: Value,
    timestamp: DateTime<Utc>
});

impl Moment {
    pub fn new(user_id: String, activity_id: String, data: Value, timestamp: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            activity_id,
            data,
            timestamp,
        }
    }

    pub async fn create_and_add_to_db(self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let stored: Option<Self> = db.store_item(self).await?;
        stored.ok_or_else(|| AppError::Persistence("moment insert returned no row".to_string()))
    }
}
