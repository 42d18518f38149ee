//! Production `LlmPort`, grounded on the platform's existing `async-openai` client
//! construction (`ingestion-pipeline/src/enricher.rs`,
//! `ingestion-pipeline/src/pipeline/services.rs`). Unlike that client's
//! `ResponseFormat::JsonSchema` convention, this port forces a single tool call per
//! operation so the result is always well-formed structured arguments rather than
//! free text that merely resembles JSON.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolChoiceOption, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionObject, FunctionObjectArgs,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{config::LlmConfig, error::AppError};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::port::{
    estimate_tokens, EnrichmentResult, HealthCheck, LlmPort, RenderType, SchemaRender,
    TaskCandidate, TaskPriority, TextContext,
};
use crate::rate_limiter::RateLimiter;

const TOKEN_OVERHEAD: u64 = 50;

pub struct ProductionLlmPort {
    client: async_openai::Client<OpenAIConfig>,
    model_name: String,
    config: LlmConfig,
    limiter: Arc<RateLimiter>,
}

impl ProductionLlmPort {
    pub fn new(config: LlmConfig, limiter: Arc<RateLimiter>) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.llm_api_key.clone())
            .with_api_base(config.llm_base_url.clone());

        Self {
            client: async_openai::Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            config,
            limiter,
        }
    }

    fn tool(name: &str, description: &str, parameters: Value) -> Result<ChatCompletionTool, AppError> {
        let function: FunctionObject = FunctionObjectArgs::default()
            .name(name)
            .description(description)
            .parameters(parameters)
            .build()
            .map_err(|e| AppError::LlmPermanent(e.to_string()))?;

        Ok(ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function,
        })
    }

    fn classify(err: &AppError) -> bool {
        err.is_retryable()
    }

    /// Issues a forced-tool-call request and returns the parsed JSON arguments of
    /// the single call, validating that every field in `required` is present.
    #[instrument(level = "trace", skip(self, system_prompt, user_message), fields(tool = tool_name))]
    async fn call_tool(
        &self,
        system_prompt: &str,
        user_message: &str,
        tool_name: &str,
        tool_description: &str,
        parameters: Value,
        required: &[&str],
    ) -> Result<(Value, u64), AppError> {
        let estimated = estimate_tokens(system_prompt, 0) + estimate_tokens(user_message, TOKEN_OVERHEAD);
        self.limiter.wait_for_capacity(estimated).await;

        let tool = Self::tool(tool_name, tool_description, parameters)?;
        let model = self.model_name.clone();
        let system_prompt = system_prompt.to_string();
        let user_message = user_message.to_string();
        let tool_name_owned = tool_name.to_string();

        let response = self
            .limiter
            .with_retry(
                || {
                    let tool = tool.clone();
                    let model = model.clone();
                    let system_prompt = system_prompt.clone();
                    let user_message = user_message.clone();
                    let tool_name_owned = tool_name_owned.clone();
                    async move {
                        let request = CreateChatCompletionRequestArgs::default()
                            .model(model)
                            .messages(vec![
                                ChatCompletionRequestSystemMessageArgs::default()
                                    .content(system_prompt)
                                    .build()
                                    .map_err(|e| AppError::LlmPermanent(e.to_string()))?
                                    .into(),
                                ChatCompletionRequestUserMessageArgs::default()
                                    .content(user_message)
                                    .build()
                                    .map_err(|e| AppError::LlmPermanent(e.to_string()))?
                                    .into(),
                            ])
                            .tools(vec![tool])
                            .tool_choice(ChatCompletionToolChoiceOption::Named(
                                async_openai::types::ChatCompletionNamedToolChoice {
                                    r#type: ChatCompletionToolType::Function,
                                    function: async_openai::types::FunctionName {
                                        name: tool_name_owned,
                                    },
                                },
                            ))
                            .build()
                            .map_err(|e| AppError::LlmPermanent(e.to_string()))?;

                        let result = self.client.chat().create(request).await.map_err(classify_openai_error);

                        // Every provider call counts against the window, whether or
                        // not it succeeded; a failed attempt still consumed provider
                        // capacity.
                        let tokens = result
                            .as_ref()
                            .ok()
                            .and_then(|r| r.usage.as_ref())
                            .map(|u| u.total_tokens as u64)
                            .unwrap_or(estimated);
                        self.limiter.record_usage(tokens).await;

                        result
                    }
                },
                Self::classify,
            )
            .await?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| AppError::LlmPermanent("no choices in response".to_string()))?;

        let call = choice
            .message
            .tool_calls
            .as_ref()
            .and_then(|calls| calls.first())
            .ok_or_else(|| AppError::ValidationFailure("provider did not return a tool call".to_string()))?;

        let arguments: Value = serde_json::from_str(&call.function.arguments)
            .map_err(|e| AppError::ValidationFailure(format!("tool call arguments not valid JSON: {e}")))?;

        for field in required {
            if arguments.get(field).is_none() {
                return Err(AppError::ValidationFailure(format!(
                    "tool call response missing required field '{field}'"
                )));
            }
        }

        let tokens_used = response
            .usage
            .as_ref()
            .map(|u| u.total_tokens as u64)
            .unwrap_or(estimated);

        Ok((arguments, tokens_used))
    }
}

impl ProductionLlmPort {
    /// Supplies the user's activity schemas alongside the note text and asks the
    /// provider for zero or more candidate moments, each tagged with the activity
    /// it belongs to.
    async fn process_moment_extraction(
        &self,
        note_text: &str,
        activities: &[(String, Value)],
    ) -> Result<EnrichmentResult, AppError> {
        let schemas_json = json!(activities
            .iter()
            .map(|(name, schema)| json!({"activity_name": name, "schema": schema}))
            .collect::<Vec<_>>());

        let user_message = format!("Note:\n{note_text}\n\nKnown activities:\n{schemas_json}");

        let parameters = json!({
            "type": "object",
            "properties": {
                "moments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "activity_name": {"type": "string"},
                            "data": {"type": "object"}
                        },
                        "required": ["activity_name", "data"]
                    }
                }
            },
            "required": ["moments"],
        });

        let (arguments, tokens_used) = self
            .call_tool(
                "Identify moments in the note that match one of the given activity schemas. Return an empty list if none match.",
                &user_message,
                "submit_moments",
                "Submits zero or more moments extracted from the note.",
                parameters,
                &["moments"],
            )
            .await?;

        let mut metadata = HashMap::new();
        metadata.insert("moments".to_string(), arguments["moments"].clone());

        Ok(EnrichmentResult {
            content: String::new(),
            metadata,
            tokens_used,
            model_name: self.model_name.clone(),
            created_at: Utc::now(),
        })
    }
}

fn classify_openai_error(err: async_openai::error::OpenAIError) -> AppError {
    match &err {
        async_openai::error::OpenAIError::ApiError(api_err) => {
            match (api_err.code.as_deref(), api_err.r#type.as_deref()) {
                (Some("rate_limit_exceeded"), _) => AppError::LlmRateLimited(err.to_string()),
                (_, Some("invalid_request_error" | "authentication_error" | "permission_error" | "not_found_error")) => {
                    AppError::LlmPermanent(err.to_string())
                }
                (Some("invalid_api_key" | "invalid_request_error" | "model_not_found"), _) => {
                    AppError::LlmPermanent(err.to_string())
                }
                _ => AppError::LlmTransient(err.to_string()),
            }
        }
        async_openai::error::OpenAIError::Reqwest(_) => AppError::LlmTransient(err.to_string()),
        _ => AppError::LlmPermanent(err.to_string()),
    }
}

#[async_trait]
impl LlmPort for ProductionLlmPort {
    async fn process_text(&self, text: &str, context: TextContext) -> Result<EnrichmentResult, AppError> {
        if let TextContext::MomentExtraction { activities } = &context {
            return self.process_moment_extraction(text, activities).await;
        }

        let (system_prompt, required) = match context {
            TextContext::NoteEnrichment => (
                self.config.robo_note_enrichment_prompt.as_str(),
                vec!["title", "content"],
            ),
            TextContext::TaskEnrichment => (
                self.config.robo_task_enrichment_prompt.as_str(),
                vec!["title", "content"],
            ),
            TextContext::MomentExtraction { .. } => unreachable!("handled above"),
        };

        let parameters = json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "maxLength": 50},
                "content": {"type": "string"},
                "suggested_priority": {"type": "string", "enum": ["LOW", "MEDIUM", "HIGH", "URGENT"]},
                "suggested_due_date": {"type": "string"}
            },
            "required": required,
        });

        let (arguments, tokens_used) = self
            .call_tool(
                system_prompt,
                text,
                "submit_enrichment",
                "Submits the structured enrichment result for the given content.",
                parameters,
                &required,
            )
            .await?;

        let title = arguments["title"].as_str().unwrap_or_default().to_string();
        let content = arguments["content"].as_str().unwrap_or_default().to_string();

        let mut metadata = HashMap::new();
        metadata.insert("title".to_string(), Value::String(title));
        if let Some(priority) = arguments.get("suggested_priority") {
            metadata.insert("suggested_priority".to_string(), priority.clone());
        }
        if let Some(due) = arguments.get("suggested_due_date") {
            metadata.insert("suggested_due_date".to_string(), due.clone());
        }

        Ok(EnrichmentResult {
            content,
            metadata,
            tokens_used,
            model_name: self.model_name.clone(),
            created_at: Utc::now(),
        })
    }

    async fn extract_tasks(&self, note_text: &str, now: DateTime<Utc>) -> Result<Vec<TaskCandidate>, AppError> {
        let parameters = json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {"type": "string"},
                            "due_date": {"type": "string"},
                            "priority": {"type": "string", "enum": ["LOW", "MEDIUM", "HIGH", "URGENT"]}
                        },
                        "required": ["content", "priority"]
                    }
                }
            },
            "required": ["tasks"],
        });

        let system_prompt = format!(
            "{} The current date/time for resolving relative phrases like 'tomorrow' is {}.",
            self.config.robo_task_enrichment_prompt,
            now.to_rfc3339()
        );

        let (arguments, _tokens) = self
            .call_tool(
                &system_prompt,
                note_text,
                "extract_tasks",
                "Submits zero or more tasks extracted from the note.",
                parameters,
                &["tasks"],
            )
            .await?;

        let tasks = arguments["tasks"].as_array().cloned().unwrap_or_default();
        let mut candidates = Vec::with_capacity(tasks.len());
        for task in tasks {
            let content = task["content"].as_str().unwrap_or_default().to_string();
            let priority = match task["priority"].as_str().unwrap_or("MEDIUM") {
                "LOW" => TaskPriority::Low,
                "HIGH" => TaskPriority::High,
                "URGENT" => TaskPriority::Urgent,
                _ => TaskPriority::Medium,
            };
            let due_date = task["due_date"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            candidates.push(TaskCandidate {
                content,
                due_date,
                priority,
            });
        }

        Ok(candidates)
    }

    async fn analyze_activity_schema(&self, schema: &Value) -> Result<SchemaRender, AppError> {
        let parameters = json!({
            "type": "object",
            "properties": {
                "render_type": {"type": "string", "enum": ["form", "table", "timeline", "cards"]},
                "layout": {"type": "object"},
                "field_groups": {"type": "array", "items": {"type": "object"}}
            },
            "required": ["render_type", "layout", "field_groups"],
        });

        let (arguments, _tokens) = self
            .call_tool(
                &self.config.robo_activity_schema_prompt,
                &schema.to_string(),
                "submit_schema_render",
                "Submits the proposed render hint for the given JSON Schema.",
                parameters,
                &["render_type", "layout", "field_groups"],
            )
            .await?;

        let render_type = match arguments["render_type"].as_str().unwrap_or("form") {
            "table" => RenderType::Table,
            "timeline" => RenderType::Timeline,
            "cards" => RenderType::Cards,
            _ => RenderType::Form,
        };

        Ok(SchemaRender {
            render_type,
            layout: arguments["layout"].clone(),
            field_groups: arguments["field_groups"].as_array().cloned().unwrap_or_default(),
        })
    }

    async fn health_check(&self) -> Result<HealthCheck, AppError> {
        let started = Instant::now();
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model_name.clone())
            .messages(vec![ChatCompletionRequestUserMessageArgs::default()
                .content("ping")
                .build()
                .map_err(|e| AppError::LlmPermanent(e.to_string()))?
                .into()])
            .max_tokens(1u32)
            .build()
            .map_err(|e| AppError::LlmPermanent(e.to_string()))?;

        match self.client.chat().create(request).await {
            Ok(_) => {
                info!("llm health check ok");
                Ok(HealthCheck {
                    ok: true,
                    observed_latency_ms: started.elapsed().as_millis() as u64,
                    provider_info: self.model_name.clone(),
                })
            }
            Err(err) => {
                warn!(error = %err, "llm health check failed");
                Ok(HealthCheck {
                    ok: false,
                    observed_latency_ms: started.elapsed().as_millis() as u64,
                    provider_info: self.model_name.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn api_error(code: Option<&str>, r#type: Option<&str>) -> async_openai::error::OpenAIError {
        async_openai::error::OpenAIError::ApiError(ApiError {
            message: "boom".to_string(),
            r#type: r#type.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        })
    }

    #[test]
    fn rate_limit_code_is_retryable() {
        let classified = classify_openai_error(api_error(Some("rate_limit_exceeded"), None));
        assert!(matches!(classified, AppError::LlmRateLimited(_)));
    }

    #[test]
    fn invalid_request_type_is_permanent() {
        let classified = classify_openai_error(api_error(None, Some("invalid_request_error")));
        assert!(matches!(classified, AppError::LlmPermanent(_)));
    }

    #[test]
    fn authentication_error_is_permanent() {
        let classified = classify_openai_error(api_error(None, Some("authentication_error")));
        assert!(matches!(classified, AppError::LlmPermanent(_)));
    }

    #[test]
    fn invalid_api_key_code_is_permanent() {
        let classified = classify_openai_error(api_error(Some("invalid_api_key"), None));
        assert!(matches!(classified, AppError::LlmPermanent(_)));
    }

    #[test]
    fn unrecognized_api_error_is_transient() {
        let classified = classify_openai_error(api_error(Some("server_error"), Some("server_error")));
        assert!(matches!(classified, AppError::LlmTransient(_)));
    }
}
