//! The provider-agnostic capability set behind note, task, and activity enrichment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub content: String,
    pub metadata: HashMap<String, Value>,
    pub tokens_used: u64,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCandidate {
    pub content: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenderType {
    Form,
    Table,
    Timeline,
    Cards,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRender {
    pub render_type: RenderType,
    pub layout: Value,
    pub field_groups: Vec<Value>,
}

/// Context carried into `process_text`. `MomentExtraction` folds the note
/// handler's third sub-pipeline stage into this single operation rather than
/// adding a fifth port method, keeping the port's surface at exactly four
/// operations: the activity schemas the candidate moments must be checked
/// against travel alongside the note text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TextContext {
    NoteEnrichment,
    TaskEnrichment,
    MomentExtraction { activities: Vec<(String, Value)> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub ok: bool,
    pub observed_latency_ms: u64,
    pub provider_info: String,
}

#[async_trait]
pub trait LlmPort: Send + Sync {
    async fn process_text(&self, text: &str, context: TextContext) -> Result<EnrichmentResult, AppError>;
    async fn extract_tasks(&self, note_text: &str, now: DateTime<Utc>) -> Result<Vec<TaskCandidate>, AppError>;
    async fn analyze_activity_schema(&self, schema: &Value) -> Result<SchemaRender, AppError>;
    async fn health_check(&self) -> Result<HealthCheck, AppError>;
}

/// `ceil(char_count / 4) + overhead`.
pub fn estimate_tokens(text: &str, overhead: u64) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4) + overhead
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_rounds_up_and_adds_overhead() {
        assert_eq!(estimate_tokens("abcde", 10), 12);
        assert_eq!(estimate_tokens("", 5), 5);
    }
}
