use std::sync::Arc;

use shared_config::AppConfig;
use shared_store::DocumentStore;
use shared_utils::Clock;

/// Shared router state: configuration plus the injected store and clock.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn DocumentStore>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { config, store, clock }
    }
}
