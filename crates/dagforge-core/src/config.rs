// Process-wide configuration.
//
// `Configuration` is loaded once (from environment, with defaults) and
// shared read-only through `Configuration::get()`. Tests that need a
// different configuration build one directly with `Configuration::default()`
// and pass it through the `ApplicationContext` instead of touching the
// global cell, which is only set once by the service binary's entrypoint.

use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

static GLOBAL: OnceLock<Configuration> = OnceLock::new();

/// Process-wide immutable configuration: addresses, timeouts, the executor
/// selection, the broker URL, storage roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Executor backend to use: "local" or "distributed".
    #[serde(default = "default_executor")]
    pub executor: String,

    /// Number of worker processes/threads; `None` means cores - 1.
    #[serde(default)]
    pub executor_cpus: Option<usize>,

    /// Use OS processes (true) or threads (false) for the local executor pool.
    #[serde(default = "default_use_processes")]
    pub executor_use_processes: bool,

    /// Unix domain socket path for the cluster-memory server.
    #[serde(default = "default_cluster_memory_path")]
    pub cluster_memory_socket_path: String,

    /// "memory" or "amqp".
    #[serde(default = "default_broker")]
    pub event_bus_broker: String,

    /// Broker connection URL, only consulted when `event_bus_broker == "amqp"`.
    #[serde(default)]
    pub broker_url: Option<String>,

    /// Postgres connection string for the resource store; `None` selects the
    /// in-memory backend (used for local development and tests).
    #[serde(default)]
    pub database_url: Option<String>,

    /// Base path artifacts and other on-disk state are rooted under.
    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    /// Schedule-trigger tick cadence.
    #[serde(default = "default_schedule_tick", with = "duration_secs")]
    pub schedule_tick_interval: Duration,

    /// `None` disables run retention (runs are kept in memory only, never
    /// persisted); `Some(d)` retains finished runs for `d`.
    #[serde(default)]
    pub run_retention_duration: Option<Duration>,

    /// Address the API server binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_executor() -> String {
    "local".to_string()
}

fn default_use_processes() -> bool {
    true
}

fn default_cluster_memory_path() -> String {
    "/tmp/dagforge-cluster-memory.sock".to_string()
}

fn default_broker() -> String {
    "memory".to_string()
}

fn default_storage_root() -> String {
    "/var/lib/dagforge".to_string()
}

fn default_schedule_tick() -> Duration {
    Duration::from_secs(5)
}

fn default_bind_address() -> String {
    "0.0.0.0:9000".to_string()
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            executor: default_executor(),
            executor_cpus: None,
            executor_use_processes: default_use_processes(),
            cluster_memory_socket_path: default_cluster_memory_path(),
            event_bus_broker: default_broker(),
            broker_url: None,
            database_url: None,
            storage_root: default_storage_root(),
            schedule_tick_interval: default_schedule_tick(),
            run_retention_duration: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            bind_address: default_bind_address(),
        }
    }
}

impl Configuration {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DAGFORGE_EXECUTOR") {
            config.executor = v;
        }
        if let Ok(v) = std::env::var("DAGFORGE_EXECUTOR_CPUS") {
            config.executor_cpus = v.parse().ok();
        }
        if let Ok(v) = std::env::var("DAGFORGE_EXECUTOR_USE_PROCESSES") {
            config.executor_use_processes = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("DAGFORGE_CLUSTER_MEMORY_SOCKET") {
            config.cluster_memory_socket_path = v;
        }
        if let Ok(v) = std::env::var("DAGFORGE_EVENT_BUS_BROKER") {
            config.event_bus_broker = v;
        }
        if let Ok(v) = std::env::var("DAGFORGE_BROKER_URL") {
            config.broker_url = Some(v);
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            config.database_url = Some(v);
        }
        if let Ok(v) = std::env::var("DAGFORGE_STORAGE_ROOT") {
            config.storage_root = v;
        }
        if let Ok(v) = std::env::var("DAGFORGE_SCHEDULE_TICK_SECONDS") {
            if let Ok(secs) = v.parse() {
                config.schedule_tick_interval = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("DAGFORGE_RUN_RETENTION_SECONDS") {
            config.run_retention_duration = match v.as_str() {
                "disabled" | "0" => None,
                other => other.parse().ok().map(Duration::from_secs),
            };
        }
        if let Ok(v) = std::env::var("DAGFORGE_BIND_ADDRESS") {
            config.bind_address = v;
        }

        config
    }

    /// Set the process-wide configuration. Idempotent: later calls are
    /// ignored once the cell is populated, matching the "never mutate after
    /// startup" rule for global state.
    pub fn set_global(config: Configuration) {
        let _ = GLOBAL.set(config);
    }

    /// Fetch the process-wide configuration, re-hydrating it from the
    /// environment if a worker process hasn't initialized it yet (this is
    /// what lets a forked worker process pick up configuration without
    /// inheriting Rust statics across `fork`/`exec`).
    pub fn get() -> Configuration {
        GLOBAL.get_or_init(Configuration::from_env).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Configuration::default();
        assert_eq!(config.executor, "local");
        assert!(config.run_retention_duration.is_some());
    }
}
