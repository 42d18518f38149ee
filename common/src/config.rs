use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Broker (Redis-compatible) connection settings.
#[derive(Clone, Deserialize, Debug)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub broker_host: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(default)]
    pub broker_db: u8,
    pub broker_password: Option<String>,
    #[serde(default)]
    pub broker_ssl: bool,
    #[serde(default = "default_broker_timeout")]
    pub broker_timeout: u64,
    #[serde(default = "default_job_timeout")]
    pub queue_job_timeout: u64,
    #[serde(default = "default_job_ttl")]
    pub queue_job_ttl: u64,
    #[serde(default = "default_result_ttl")]
    pub queue_result_ttl: u64,
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}
fn default_broker_port() -> u16 {
    6379
}
fn default_broker_timeout() -> u64 {
    5
}
fn default_job_timeout() -> u64 {
    600
}
fn default_job_ttl() -> u64 {
    3600
}
fn default_result_ttl() -> u64 {
    86400
}

/// LLM provider settings.
#[derive(Clone, Deserialize, Debug)]
pub struct LlmConfig {
    pub llm_api_key: String,
    pub llm_model_name: String,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default = "default_tokens_per_minute")]
    pub llm_max_tokens_per_minute: u32,
    #[serde(default = "default_requests_per_minute")]
    pub llm_max_requests_per_minute: u32,
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub llm_max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub llm_retry_base_delay: u64,
    #[serde(default = "default_retry_max_delay")]
    pub llm_retry_max_delay: u64,
    #[serde(default = "default_retry_jitter")]
    pub llm_retry_jitter: f64,
    #[serde(default = "default_note_prompt")]
    pub robo_note_enrichment_prompt: String,
    #[serde(default = "default_task_prompt")]
    pub robo_task_enrichment_prompt: String,
    #[serde(default = "default_activity_prompt")]
    pub robo_activity_schema_prompt: String,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_tokens_per_minute() -> u32 {
    100_000
}
fn default_requests_per_minute() -> u32 {
    50
}
fn default_llm_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    2
}
fn default_retry_max_delay() -> u64 {
    60
}
fn default_retry_jitter() -> f64 {
    0.2
}
fn default_note_prompt() -> String {
    "Reformat the user's note into a concise Markdown body and extract a short title."
        .to_string()
}
fn default_task_prompt() -> String {
    "Reformat the user's task into a concise Markdown body and suggest a priority and due date."
        .to_string()
}
fn default_activity_prompt() -> String {
    "Analyze the given JSON Schema and propose a render type, layout and field groups."
        .to_string()
}

/// Top-level application configuration, composing every ambient concern
/// (broker, LLM provider, queues, observability) into one loadable struct.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    #[serde(default = "default_surrealdb_username")]
    pub surrealdb_username: String,
    #[serde(default = "default_surrealdb_password")]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,
    #[serde(default = "default_http_bind_address")]
    pub http_bind_address: String,

    #[serde(flatten)]
    pub broker: BrokerConfig,
    #[serde(flatten)]
    pub llm: LlmConfig,
}

fn default_surrealdb_username() -> String {
    "root".to_string()
}
fn default_surrealdb_password() -> String {
    "root".to_string()
}
fn default_surrealdb_namespace() -> String {
    "enrichment".to_string()
}
fn default_surrealdb_database() -> String {
    "enrichment".to_string()
}
fn default_http_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Loads configuration from an optional `config` file, then environment
/// variables, failing fast with a `ConfigError` if a required field (such as
/// `LLM_API_KEY`) is absent, rather than lazily at first use.
pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises the same `try_deserialize` failure path `get_config` relies on,
    /// against an isolated in-memory source rather than the process environment
    /// (which tests must not mutate, since they run concurrently).
    #[test]
    fn missing_llm_api_key_fails_deserialization() {
        let config = Config::builder()
            .add_source(File::from_str(
                r#"surrealdb_address = "mem://""#,
                config::FileFormat::Toml,
            ))
            .build()
            .expect("builder succeeds even without required fields present");

        let result: Result<AppConfig, ConfigError> = config.try_deserialize();
        assert!(
            result.is_err(),
            "llm_api_key and llm_model_name have no default and must fail fast"
        );
    }

    #[test]
    fn all_required_fields_present_deserializes() {
        let config = Config::builder()
            .add_source(File::from_str(
                r#"
                surrealdb_address = "mem://"
                llm_api_key = "sk-test"
                llm_model_name = "gpt-4o-mini"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .expect("builder succeeds");

        let parsed: AppConfig = config.try_deserialize().expect("all required fields present");
        assert_eq!(parsed.surrealdb_namespace, "enrichment");
        assert_eq!(parsed.broker.broker_port, 6379);
    }
}
