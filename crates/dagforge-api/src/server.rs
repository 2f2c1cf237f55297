// Wraps the axum router as a `Service` so the controller's signal-based
// graceful shutdown governs the HTTP listener the same way it governs the
// trigger engine.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use dagforge_core::error::{DagforgeError, Result};
use dagforge_service::ApplicationContext;
use tokio::net::TcpListener;

pub struct ApiServerService {
    bind_address: String,
    router: Router,
    shutdown: Arc<tokio::sync::Notify>,
}

impl ApiServerService {
    pub fn new(bind_address: impl Into<String>, router: Router) -> Self {
        Self {
            bind_address: bind_address.into(),
            router,
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }
}

#[async_trait]
impl dagforge_service::Service for ApiServerService {
    fn name(&self) -> &'static str {
        "api-server"
    }

    async fn startup(&self, _context: &ApplicationContext) -> Result<()> {
        Ok(())
    }

    async fn run(&self, _context: &ApplicationContext) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address)
            .await
            .map_err(|e| DagforgeError::Internal(e.into()))?;
        tracing::info!(address = %self.bind_address, "api server listening");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await
            .map_err(|e| DagforgeError::Internal(e.into()))
    }

    async fn shutdown(&self, _context: &ApplicationContext) -> Result<()> {
        self.shutdown.notify_one();
        Ok(())
    }
}
