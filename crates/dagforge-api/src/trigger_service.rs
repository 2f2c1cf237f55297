// Adapts `TriggerEngine` (which spawns its own background tick loop) to
// `dagforge_service::Service` so the controller starts and tears it down
// alongside the HTTP server.

use std::sync::Arc;

use async_trait::async_trait;
use dagforge_core::error::Result;
use dagforge_service::ApplicationContext;
use dagforge_triggers::TriggerEngine;

pub struct TriggerEngineService {
    engine: Arc<TriggerEngine>,
    idle: tokio::sync::Notify,
}

impl TriggerEngineService {
    pub fn new(engine: Arc<TriggerEngine>) -> Self {
        Self {
            engine,
            idle: tokio::sync::Notify::new(),
        }
    }
}

#[async_trait]
impl dagforge_service::Service for TriggerEngineService {
    fn name(&self) -> &'static str {
        "trigger-engine"
    }

    async fn startup(&self, _context: &ApplicationContext) -> Result<()> {
        self.engine.start().await;
        Ok(())
    }

    async fn run(&self, _context: &ApplicationContext) -> Result<()> {
        self.idle.notified().await;
        Ok(())
    }

    async fn shutdown(&self, _context: &ApplicationContext) -> Result<()> {
        self.engine.stop().await;
        self.idle.notify_one();
        Ok(())
    }
}
