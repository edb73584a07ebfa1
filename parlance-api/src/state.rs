//! Shared application state for the Axum routers.

use std::sync::Arc;
use std::time::Instant;

use parlance_store::{CallStore, WorkQueue};

use crate::config::BotDefaults;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CallStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub defaults: BotDefaults,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CallStore>,
        queue: Arc<dyn WorkQueue>,
        defaults: BotDefaults,
    ) -> Self {
        Self {
            store,
            queue,
            defaults,
            start_time: Instant::now(),
        }
    }
}
