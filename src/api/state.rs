use std::sync::Arc;

use crate::config::Config;
use crate::observability::Metrics;
use crate::viewer::Viewer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub viewer: Arc<Viewer>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, viewer: Viewer) -> Self {
        let metrics = viewer.queue().metrics().clone();
        Self {
            config: Arc::new(config),
            viewer: Arc::new(viewer),
            metrics,
        }
    }

    pub(crate) fn max_payload_bytes(&self) -> usize {
        usize::try_from(self.config.server.max_payload_bytes.as_u64()).unwrap_or(usize::MAX)
    }
}
