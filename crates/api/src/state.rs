//! Shared application state for the Axum API server.

use std::sync::Arc;

use nimbus_engine::scheduler::Scheduler;
use nimbus_engine::store::AlertStore;
use sqlx::PgPool;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub store: Arc<dyn AlertStore>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(pool: PgPool, store: Arc<dyn AlertStore>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            pool,
            store,
            scheduler,
        }
    }
}
