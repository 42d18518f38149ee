use std::sync::Arc;

use broker::BrokerAdapter;
use common::storage::db::SurrealDbClient;

/// Application state backing both the enqueue library surface and the
/// operational HTTP routes, mirroring the ambient platform's existing
/// `ApiState` (a DB handle plus config) generalized with a broker handle.
#[derive(Clone)]
pub struct EnqueueApiState {
    pub db: Arc<SurrealDbClient>,
    pub broker: Arc<dyn BrokerAdapter>,
}

impl EnqueueApiState {
    pub fn new(db: Arc<SurrealDbClient>, broker: Arc<dyn BrokerAdapter>) -> Self {
        Self { db, broker }
    }
}
