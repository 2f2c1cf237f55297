//! Executor backends: `LocalExecutor` (in-process, `tokio::spawn`-based) and
//! `DistributedExecutor` (remote worker pool over a `ClusterClient`), both
//! implementing `dagforge_core::runtime::Executor`. Also home to cluster
//! memory, the namespaced key/value store workers use to pass large
//! intermediate values by reference.

pub mod cluster_memory;
pub mod distributed;
pub mod local;

pub use cluster_memory::{ClusterMemoryClient, ClusterMemoryServer, LocalClusterMemory};
pub use distributed::{ClusterAddress, ClusterClient, DistributedExecutor, LocalStandInClient};
pub use local::LocalExecutor;

use std::sync::Arc;

use dagforge_core::error::{DagforgeError, Result};
use dagforge_core::runtime::Executor;
use dagforge_core::Configuration;

/// Build the configured `Executor` from process configuration, matching
/// `Configuration::executor` ("local" or "distributed").
pub fn executor_from_config(config: &Configuration) -> Result<Arc<dyn Executor>> {
    match config.executor.as_str() {
        "local" => Ok(Arc::new(LocalExecutor::from_config(config))),
        "distributed" => {
            let client: Arc<dyn ClusterClient> = Arc::new(LocalStandInClient::new());
            let cpus = config.executor_cpus.unwrap_or(1) as f64;
            Ok(Arc::new(DistributedExecutor::new(
                config.cluster_memory_socket_path.clone(),
                client,
                cpus,
                0.0,
            )))
        }
        other => Err(DagforgeError::validation(format!("unknown executor backend '{other}'"))),
    }
}
