use std::sync::Arc;

use crate::config::HubConfig;
use crate::hub::BroadcastHub;

/// Shared application state, created once at server start
#[derive(Clone)]
pub struct AppState {
    pub hub: BroadcastHub,
    pub config: Arc<HubConfig>,
}

impl AppState {
    /// Build state and start the hub's dispatcher. Needs a tokio runtime.
    pub fn new(config: HubConfig) -> Self {
        let hub = BroadcastHub::new(&config);
        Self {
            hub,
            config: Arc::new(config),
        }
    }
}
