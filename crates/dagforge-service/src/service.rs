// Service lifecycle and the controller that drives it: every registered
// service gets startup, then all run concurrently until one exits or a
// shutdown signal arrives, then every service is torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dagforge_core::error::Result;
use futures::future::join_all;

use crate::context::ApplicationContext;

/// A long-running component of the process: the HTTP server, the trigger
/// engine, the workflow runtime's background workers. `startup` runs once
/// before any `run`; `shutdown` always runs, even if `startup` or `run`
/// failed, so it must tolerate partially-initialized state.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    async fn startup(&self, context: &ApplicationContext) -> Result<()>;
    async fn run(&self, context: &ApplicationContext) -> Result<()>;
    async fn shutdown(&self, context: &ApplicationContext) -> Result<()>;
}

/// Reports OK by default; services with a more interesting status override.
pub struct ServiceStatus {
    pub name: &'static str,
    pub ok: bool,
    pub detail: Option<String>,
}

/// Owns the registered services and the process's only signal handlers.
/// `run()` is the single entry point: install signal handlers, start every
/// service, mark the process ready, run every service until one of them
/// returns or a shutdown signal fires, then shut every service down within
/// `shutdown_timeout`.
pub struct ServiceController {
    context: Arc<ApplicationContext>,
    services: Vec<Arc<dyn Service>>,
    shutdown_timeout: Duration,
    shutdown_requested: Arc<AtomicBool>,
}

impl ServiceController {
    pub fn new(context: Arc<ApplicationContext>) -> Self {
        Self {
            context,
            services: Vec::new(),
            shutdown_timeout: Duration::from_secs(30),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    pub async fn service_statuses(&self) -> Vec<ServiceStatus> {
        // Real status probes are service-specific; the controller only
        // knows whether the process considers itself ready overall.
        self.services
            .iter()
            .map(|s| ServiceStatus { name: s.name(), ok: self.context.are_services_ready(), detail: None })
            .collect()
    }

    async fn wait_for_shutdown_signal(shutdown_requested: Arc<AtomicBool>) {
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        shutdown_requested.store(true, Ordering::SeqCst);
    }

    /// Runs startup -> run -> shutdown across every registered service.
    /// Returns the first error encountered in startup or run, if any,
    /// after shutdown has still been attempted for every service.
    pub async fn run(&self) -> Result<()> {
        let signal_flag = self.shutdown_requested.clone();
        let signal_task = tokio::spawn(Self::wait_for_shutdown_signal(signal_flag));

        let startup_results = join_all(self.services.iter().map(|s| s.startup(&self.context))).await;
        let startup_error = startup_results.into_iter().find_map(|r| r.err());

        let run_error = if startup_error.is_none() {
            self.context.mark_services_ready(true);
            tracing::info!(services = self.services.len(), "services ready");

            let run_all = join_all(self.services.iter().map(|s| s.run(&self.context)));
            tokio::select! {
                results = run_all => results.into_iter().find_map(|r| r.err()),
                _ = Self::shutdown_signal_wait(&self.shutdown_requested) => None,
            }
        } else {
            None
        };

        self.context.mark_services_ready(false);
        tracing::info!("stopping services");

        let shutdown = join_all(self.services.iter().map(|s| s.shutdown(&self.context)));
        match tokio::time::timeout(self.shutdown_timeout, shutdown).await {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "service shutdown failed");
                    }
                }
            }
            Err(_) => tracing::warn!("service shutdown exceeded timeout, abandoning remaining cleanup"),
        }

        signal_task.abort();
        startup_error.or(run_error).map(Err).unwrap_or(Ok(()))
    }

    async fn shutdown_signal_wait(flag: &AtomicBool) {
        while !flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct RecordingService {
        startup_calls: Arc<AtomicUsize>,
        shutdown_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Service for RecordingService {
        fn name(&self) -> &'static str {
            "recording"
        }
        async fn startup(&self, _context: &ApplicationContext) -> Result<()> {
            self.startup_calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }
        async fn run(&self, _context: &ApplicationContext) -> Result<()> {
            // Returns immediately, simulating a service with no ongoing work.
            Ok(())
        }
        async fn shutdown(&self, _context: &ApplicationContext) -> Result<()> {
            self.shutdown_calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_calls_startup_then_shutdown_when_every_service_finishes() {
        let startup_calls = Arc::new(AtomicUsize::new(0));
        let shutdown_calls = Arc::new(AtomicUsize::new(0));

        let context = Arc::new(ApplicationContext::new());
        let mut controller = ServiceController::new(context.clone()).with_shutdown_timeout(Duration::from_secs(1));
        controller.register(Arc::new(RecordingService {
            startup_calls: startup_calls.clone(),
            shutdown_calls: shutdown_calls.clone(),
        }));

        controller.run().await.unwrap();

        assert_eq!(startup_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(shutdown_calls.load(AtomicOrdering::SeqCst), 1);
        assert!(!context.are_services_ready());
    }

    struct FailingStartupService;

    #[async_trait]
    impl Service for FailingStartupService {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn startup(&self, _context: &ApplicationContext) -> Result<()> {
            Err(dagforge_core::error::DagforgeError::validation("boom"))
        }
        async fn run(&self, _context: &ApplicationContext) -> Result<()> {
            Ok(())
        }
        async fn shutdown(&self, _context: &ApplicationContext) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_still_attempts_shutdown_after_a_startup_failure() {
        let context = Arc::new(ApplicationContext::new());
        let mut controller = ServiceController::new(context.clone()).with_shutdown_timeout(Duration::from_secs(1));
        controller.register(Arc::new(FailingStartupService));

        let result = controller.run().await;
        assert!(result.is_err());
        assert!(!context.are_services_ready());
    }
}
