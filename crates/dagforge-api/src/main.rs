// Process entrypoint: loads configuration, builds the storage/executor/bus
// backends the configuration selects, wires them into the HTTP router and
// the trigger engine, then hands both to the service controller so SIGTERM
// and Ctrl-C drive one coordinated shutdown.

use std::sync::Arc;
use std::time::Duration;

use dagforge_api::{build_router, AppState, ApiServerService, StorageTriggerRuleStore, TriggerEngineService};
use dagforge_core::{Configuration, TargetRegistry};
use dagforge_eventbus::{broker_from_name, EventBus};
use dagforge_executor::executor_from_config;
use dagforge_service::{ApplicationContext, ServiceController};
use dagforge_storage::storage_from_config;
use dagforge_triggers::TriggerEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = Configuration::from_env();
    Configuration::set_global(config.clone());

    let storage = storage_from_config(
        if config.database_url.is_some() { "postgres" } else { "memory" },
        config.database_url.as_deref(),
    )
    .await?;

    let executor = executor_from_config(&config)?;

    let broker = broker_from_name(&config.event_bus_broker, config.broker_url.as_deref())?;
    let bus = Arc::new(EventBus::new(broker, "dagforge-api"));
    bus.connect().await?;

    // No targets are registered here: stage targets are domain-specific
    // callables an operator links into their own build of this binary.
    let registry = Arc::new(TargetRegistry::new());

    let trigger_store = Arc::new(StorageTriggerRuleStore::new(storage.clone()));
    let trigger_engine = Arc::new(TriggerEngine::new(
        bus.clone(),
        trigger_store,
        config.schedule_tick_interval,
        "trigger-engine",
    ));

    let state = AppState {
        storage: storage.clone(),
        bus: bus.clone(),
        executor: executor.clone(),
        registry: registry.clone(),
        config: config.clone(),
    };
    let router = build_router(state);

    let context = Arc::new(ApplicationContext::new());
    let mut controller = ServiceController::new(context).with_shutdown_timeout(Duration::from_secs(30));
    controller.register(Arc::new(ApiServerService::new(config.bind_address.clone(), router)));
    controller.register(Arc::new(TriggerEngineService::new(trigger_engine)));

    controller.run().await?;
    Ok(())
}
