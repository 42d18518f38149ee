//! Job handlers, one per queue, sharing a claim/call-LLM/finalize skeleton.
//! Grounded on `ingestion-pipeline`'s `PipelineServices` capability-trait split
//! (`pipeline/services.rs`) and `stages/mod.rs`'s transaction-around-a-stage
//! shape, generalized from one table to three.

pub mod activity;
pub mod note;
pub mod task;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use broker::ClaimedJob;
use common::error::AppError;

/// Shared ceiling on entity-level retry, mirrored by the dispatcher's job-level
/// retry decision so both layers agree on when an error becomes terminal.
pub const MAX_ATTEMPTS: u32 = 5;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ClaimedJob) -> Result<(), AppError>;
}

/// Maps a queue name to the handler responsible for it, assembled once at
/// process startup and shared by the dispatcher across every claimed job.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, queue: &'static str, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(queue, handler);
        self
    }

    pub fn get(&self, queue: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(queue).cloned()
    }
}
