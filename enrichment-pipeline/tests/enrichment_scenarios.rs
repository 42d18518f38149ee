//! End-to-end coverage of each job handler against an in-memory database and a
//! scripted LLM port, exercising the claim/enrich/finalize lifecycle the way a
//! worker process actually drives it.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use broker::{ClaimedJob, MockBrokerAdapter, QUEUE_ACTIVITY_SCHEMA, QUEUE_NOTE_ENRICHMENT, QUEUE_TASK_ENRICHMENT};
use chrono::Utc;
use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    storage::types::{
        activity::Activity,
        note::Note,
        processing_status::ProcessingStatus,
        task::{Task, TaskPriority as StoredPriority},
    },
};
use enrichment_pipeline::{
    handlers::{activity::ActivityHandler, note::NoteHandler},
    JobHandler,
};
use llm_port::{EnrichmentResult, HealthCheck, LlmPort, RenderType, SchemaRender, Scripted, TaskCandidate, TaskPriority, TestLlmPort, TextContext};
use serde_json::json;

fn claimed_job(queue: &str, entity_id: &str, attempt_count: u32) -> ClaimedJob {
    ClaimedJob {
        job_id: format!("{queue}_job_{entity_id}"),
        queue_name: queue.to_string(),
        target_entity_id: entity_id.to_string(),
        attempt_count,
        meta: serde_json::Value::Null,
    }
}

async fn memory_db() -> SurrealDbClient {
    let database = uuid::Uuid::new_v4().to_string();
    SurrealDbClient::memory("test_ns", &database)
        .await
        .expect("in-memory surrealdb")
}

/// Counts `process_text` calls so a test can assert "exactly one provider call"
/// without the scripted test double needing its own bookkeeping.
#[derive(Default)]
struct CountingLlmPort {
    inner: TestLlmPort,
    process_text_calls: AtomicU32,
}

#[async_trait]
impl LlmPort for CountingLlmPort {
    async fn process_text(&self, text: &str, context: TextContext) -> Result<EnrichmentResult, AppError> {
        self.process_text_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.process_text(text, context).await
    }

    async fn extract_tasks(&self, note_text: &str, now: chrono::DateTime<Utc>) -> Result<Vec<TaskCandidate>, AppError> {
        self.inner.extract_tasks(note_text, now).await
    }

    async fn analyze_activity_schema(&self, schema: &serde_json::Value) -> Result<SchemaRender, AppError> {
        self.inner.analyze_activity_schema(schema).await
    }

    async fn health_check(&self) -> Result<HealthCheck, AppError> {
        self.inner.health_check().await
    }
}

#[tokio::test]
async fn happy_path_note_extracts_two_tasks_and_enqueues_them() {
    let db = Arc::new(memory_db().await);
    let llm = Arc::new(TestLlmPort::new());

    llm.script_process_text(Scripted::Ok(EnrichmentResult {
        content: "- finish the report\n- email Sam".to_string(),
        metadata: {
            let mut m = std::collections::HashMap::new();
            m.insert("title".to_string(), json!("Report & email Sam"));
            m
        },
        tokens_used: 42,
        model_name: "test-model".to_string(),
        created_at: Utc::now(),
    }));
    llm.script_extract_tasks(Scripted::Ok(vec![
        TaskCandidate {
            content: "finish the report".to_string(),
            due_date: Some(Utc::now() + chrono::Duration::days(1)),
            priority: TaskPriority::Medium,
        },
        TaskCandidate {
            content: "email Sam".to_string(),
            due_date: None,
            priority: TaskPriority::Medium,
        },
    ]));

    let enqueued_queues = Arc::new(Mutex::new(Vec::new()));
    let recorded = enqueued_queues.clone();
    let mut mock_broker = MockBrokerAdapter::new();
    mock_broker.expect_enqueue().returning(move |queue, _id, _opts| {
        recorded.lock().expect("lock").push(queue.to_string());
        Some(format!("job-{queue}"))
    });

    let handler = NoteHandler::new(db.clone(), llm, Arc::new(mock_broker));

    let note = Note::create_and_add_to_db(
        "user1".to_string(),
        "Tomorrow I should finish the report and email Sam.".to_string(),
        None,
        &db,
    )
    .await
    .expect("create note");

    let job = claimed_job(QUEUE_NOTE_ENRICHMENT, &note.id, 1);
    handler.handle(&job).await.expect("handle succeeds");

    let fetched: Note = db.get_item(&note.id).await.expect("fetch").expect("present");
    assert_eq!(fetched.processing_status, ProcessingStatus::Completed);
    assert!(fetched.processed_at.is_some());
    assert_eq!(
        fetched.enrichment_data.as_ref().and_then(|d| d.get("title")).and_then(|t| t.as_str()),
        Some("Report & email Sam")
    );

    let tasks: Vec<Task> = db.get_all_stored_items().await.expect("fetch tasks");
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.note_id.as_deref() == Some(note.id.as_str())));
    assert!(tasks.iter().all(|t| t.processing_status == ProcessingStatus::Pending));
    assert!(tasks.iter().all(|t| t.priority == StoredPriority::Medium));

    let queues = enqueued_queues.lock().expect("lock");
    assert_eq!(queues.len(), 2);
    assert!(queues.iter().all(|q| q == QUEUE_TASK_ENRICHMENT));
}

#[tokio::test]
async fn persistent_llm_failure_marks_note_failed_with_no_derived_tasks() {
    let db = Arc::new(memory_db().await);
    let llm = Arc::new(TestLlmPort::new());
    llm.script_process_text(Scripted::Err(AppError::LlmPermanent("model refused".to_string())));

    let handler = NoteHandler::new(db.clone(), llm, Arc::new(MockBrokerAdapter::new()));

    let note = Note::create_and_add_to_db("user1".to_string(), "content".to_string(), None, &db)
        .await
        .expect("create note");

    let job = claimed_job(QUEUE_NOTE_ENRICHMENT, &note.id, 1);
    let result = handler.handle(&job).await;
    assert!(result.is_err(), "LlmPermanent is non-retryable and must surface");

    let fetched: Note = db.get_item(&note.id).await.expect("fetch").expect("present");
    assert_eq!(fetched.processing_status, ProcessingStatus::Failed);
    assert!(fetched.processed_at.is_none());

    let tasks: Vec<Task> = db.get_all_stored_items().await.expect("fetch tasks");
    assert!(tasks.is_empty());
}

#[tokio::test]
async fn redelivered_job_is_a_no_op_on_the_second_claim() {
    let db = Arc::new(memory_db().await);
    let llm = Arc::new(CountingLlmPort::default());

    let note = Note::create_and_add_to_db("user1".to_string(), "content".to_string(), None, &db)
        .await
        .expect("create note");

    let mut mock_broker = MockBrokerAdapter::new();
    mock_broker.expect_enqueue().returning(|_, _, _| Some("job".to_string()));
    let handler = NoteHandler::new(db.clone(), llm.clone(), Arc::new(mock_broker));

    let job = claimed_job(QUEUE_NOTE_ENRICHMENT, &note.id, 1);

    handler.handle(&job).await.expect("first delivery processes the note");
    handler.handle(&job).await.expect("second delivery is a clean no-op");

    assert_eq!(llm.process_text_calls.load(Ordering::SeqCst), 1);

    let fetched: Note = db.get_item(&note.id).await.expect("fetch").expect("present");
    assert_eq!(fetched.processing_status, ProcessingStatus::Completed);
}

#[tokio::test]
async fn deleted_entity_mid_flight_is_a_clean_no_op() {
    let db = memory_db().await;

    let note = Note::create_and_add_to_db("user1".to_string(), "content".to_string(), None, &db)
        .await
        .expect("create note");

    Note::claim_for_processing(&note.id, &db).await.expect("claim").expect("claimed");
    let _deleted: Option<Note> = db.delete_item(&note.id).await.expect("delete mid-flight");

    // Mirrors what a handler does after its claim succeeds but the row vanishes
    // before the finalize write: the patch targets a row that no longer exists.
    let outcome = Note::complete_enrichment(&note.id, json!({"title": "irrelevant"}), Utc::now(), &db).await;
    assert!(outcome.is_ok());

    let reloaded: Option<Note> = db.get_item(&note.id).await.expect("fetch");
    assert!(reloaded.is_none());
}

#[tokio::test]
async fn empty_note_content_fails_without_an_llm_call() {
    let db = Arc::new(memory_db().await);
    let llm = Arc::new(CountingLlmPort::default());

    let note = Note::create_and_add_to_db("user1".to_string(), "   \n\t".to_string(), None, &db)
        .await
        .expect("create note");

    let handler = NoteHandler::new(db.clone(), llm.clone(), Arc::new(MockBrokerAdapter::new()));

    let job = claimed_job(QUEUE_NOTE_ENRICHMENT, &note.id, 1);
    let result = handler.handle(&job).await;
    assert!(matches!(result, Err(AppError::ValidationFailure(_))));

    assert_eq!(llm.process_text_calls.load(Ordering::SeqCst), 0);

    let fetched: Note = db.get_item(&note.id).await.expect("fetch").expect("present");
    assert_eq!(fetched.processing_status, ProcessingStatus::Failed);
}

#[tokio::test]
async fn activity_schema_analysis_completes_with_llm_render() {
    let db = Arc::new(memory_db().await);
    let llm = Arc::new(TestLlmPort::new());
    llm.script_analyze_activity_schema(Scripted::Ok(SchemaRender {
        render_type: RenderType::Form,
        layout: json!({"columns": 1}),
        field_groups: vec![json!({"name": "mood", "label": "Mood"})],
    }));

    let handler = ActivityHandler::new(db.clone(), llm);

    let activity = Activity::new(
        "user1".to_string(),
        "Mood".to_string(),
        json!({"type": "object", "properties": {"mood": {"type": "string", "enum": ["Happy", "Sad"]}}}),
        "smile".to_string(),
        "#ff00aa".to_string(),
    )
    .expect("valid activity")
    .create_and_add_to_db(&db)
    .await
    .expect("create activity");

    let job = claimed_job(QUEUE_ACTIVITY_SCHEMA, &activity.id, 1);
    handler.handle(&job).await.expect("handle succeeds");

    let fetched: Activity = db.get_item(&activity.id).await.expect("fetch").expect("present");
    assert_eq!(fetched.processing_status, ProcessingStatus::Completed);
    assert!(fetched.processed_at.is_some());
    let render = fetched.schema_render.expect("schema_render set");
    assert_eq!(render["render_type"], json!("form"));
    assert_eq!(render["layout"], json!({"columns": 1}));
    assert_eq!(render["field_groups"], json!([{"name": "mood", "label": "Mood"}]));
}
