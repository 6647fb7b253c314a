use std::sync::Arc;

use tokio::sync::Semaphore;

use fc_core::Pipeline;

/// Shared by every handler. The semaphore bounds how many runs may hold the
/// models at once.
pub struct AppState {
    pub pipeline: Pipeline,
    permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, max_concurrent_runs: usize) -> Self {
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }

    pub fn permits(&self) -> Arc<Semaphore> {
        self.permits.clone()
    }
}
