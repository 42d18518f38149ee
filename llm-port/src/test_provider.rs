//! Deterministic in-memory `LlmPort` used by the test suite.
//! Every capability returns a canned, schema-conformant response; callers may
//! additionally script per-call behavior to exercise retry and failure scenarios.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::AppError;
use serde_json::{json, Value};

use crate::port::{EnrichmentResult, HealthCheck, LlmPort, RenderType, SchemaRender, TaskCandidate, TextContext};

/// A single scripted outcome for the next call to a given operation.
pub enum Scripted<T> {
    Ok(T),
    Err(AppError),
}

#[derive(Default)]
struct Scripts {
    process_text: VecDeque<Scripted<EnrichmentResult>>,
    extract_tasks: VecDeque<Scripted<Vec<TaskCandidate>>>,
    analyze_activity_schema: VecDeque<Scripted<SchemaRender>>,
}

/// Test double for [`LlmPort`]. Without scripting, `process_text` upper-cases the
/// input as its content and takes the first 50 characters as a title;
/// `extract_tasks` returns an empty list; `analyze_activity_schema` returns a
/// plain form render. Tests can push scripted outcomes with `script_*` to exercise
/// specific call sequences (e.g. fail-then-succeed).
#[derive(Default)]
pub struct TestLlmPort {
    scripts: Mutex<Scripts>,
}

impl TestLlmPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_process_text(&self, outcome: Scripted<EnrichmentResult>) {
        self.scripts.lock().expect("lock").process_text.push_back(outcome);
    }

    pub fn script_extract_tasks(&self, outcome: Scripted<Vec<TaskCandidate>>) {
        self.scripts.lock().expect("lock").extract_tasks.push_back(outcome);
    }

    pub fn script_analyze_activity_schema(&self, outcome: Scripted<SchemaRender>) {
        self.scripts
            .lock()
            .expect("lock")
            .analyze_activity_schema
            .push_back(outcome);
    }
}

#[async_trait]
impl LlmPort for TestLlmPort {
    async fn process_text(&self, text: &str, context: TextContext) -> Result<EnrichmentResult, AppError> {
        if let Some(scripted) = self.scripts.lock().expect("lock").process_text.pop_front() {
            return match scripted {
                Scripted::Ok(result) => Ok(result),
                Scripted::Err(err) => Err(err),
            };
        }

        if matches!(context, TextContext::MomentExtraction { .. }) {
            let mut metadata = HashMap::new();
            metadata.insert("moments".to_string(), Value::Array(Vec::new()));
            return Ok(EnrichmentResult {
                content: String::new(),
                metadata,
                tokens_used: 10,
                model_name: "test-model".to_string(),
                created_at: Utc::now(),
            });
        }

        let title: String = text.chars().take(50).collect();
        let mut metadata = HashMap::new();
        metadata.insert("title".to_string(), Value::String(title));

        Ok(EnrichmentResult {
            content: text.to_uppercase(),
            metadata,
            tokens_used: 10,
            model_name: "test-model".to_string(),
            created_at: Utc::now(),
        })
    }

    async fn extract_tasks(&self, _note_text: &str, _now: DateTime<Utc>) -> Result<Vec<TaskCandidate>, AppError> {
        if let Some(scripted) = self.scripts.lock().expect("lock").extract_tasks.pop_front() {
            return match scripted {
                Scripted::Ok(result) => Ok(result),
                Scripted::Err(err) => Err(err),
            };
        }

        Ok(Vec::new())
    }

    async fn analyze_activity_schema(&self, _schema: &Value) -> Result<SchemaRender, AppError> {
        if let Some(scripted) = self
            .scripts
            .lock()
            .expect("lock")
            .analyze_activity_schema
            .pop_front()
        {
            return match scripted {
                Scripted::Ok(result) => Ok(result),
                Scripted::Err(err) => Err(err),
            };
        }

        Ok(SchemaRender {
            render_type: RenderType::Form,
            layout: json!({}),
            field_groups: Vec::new(),
        })
    }

    async fn health_check(&self) -> Result<HealthCheck, AppError> {
        Ok(HealthCheck {
            ok: true,
            observed_latency_ms: 0,
            provider_info: "test-model".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_process_text_uppercases_and_titles() {
        let port = TestLlmPort::new();
        let result = port.process_text("hello world", TextContext::NoteEnrichment).await.unwrap();
        assert_eq!(result.content, "HELLO WORLD");
        assert_eq!(result.metadata["title"], Value::String("hello world".to_string()));
    }

    #[tokio::test]
    async fn scripted_failure_then_default_success() {
        let port = TestLlmPort::new();
        port.script_process_text(Scripted::Err(AppError::LlmTransient("boom".to_string())));

        let first = port.process_text("hi", TextContext::NoteEnrichment).await;
        assert!(first.is_err());

        let second = port.process_text("hi", TextContext::NoteEnrichment).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn extract_tasks_defaults_to_empty() {
        let port = TestLlmPort::new();
        let tasks = port.extract_tasks("buy milk", Utc::now()).await.unwrap();
        assert!(tasks.is_empty());
    }
}
