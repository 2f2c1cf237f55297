use std::sync::Arc;

use dagforge_core::{Configuration, Executor, TargetRegistry};
use dagforge_eventbus::EventBus;
use dagforge_storage::ResourceStorage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn ResourceStorage>,
    pub bus: Arc<EventBus>,
    pub executor: Arc<dyn Executor>,
    pub registry: Arc<TargetRegistry>,
    pub config: Configuration,
}
