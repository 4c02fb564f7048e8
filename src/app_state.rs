use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{orchestrator::Orchestrator, queue::RedisTaskQueue, store::JobStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<RedisTaskQueue>,
    pub store: Arc<dyn JobStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        queue: Arc<RedisTaskQueue>,
        store: Arc<dyn JobStore>,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            db,
            queue,
            store,
            orchestrator: Arc::new(orchestrator),
        }
    }
}
