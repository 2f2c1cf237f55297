//! HTTP composition root: builds the axum router and the adapters that wire
//! the resource store, event bus, executor, and trigger engine into handlers.
//! The binary entrypoint (`main.rs`) is responsible for process wiring;
//! everything here is reusable by integration tests.

pub mod configs;
pub mod content_negotiation;
pub mod error;
pub mod health;
pub mod runs;
pub mod server;
pub mod state;
pub mod trigger_rules;
pub mod trigger_service;
pub mod workflows;

pub use error::ApiError;
pub use server::ApiServerService;
pub use state::AppState;
pub use trigger_rules::StorageTriggerRuleStore;
pub use trigger_service::TriggerEngineService;

use axum::Router;

/// Merges every resource module's routes into one router and applies the
/// content-negotiation middleware common to all of them.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes(state.clone()))
        .merge(workflows::routes(state.clone()))
        .merge(runs::routes(state.clone()))
        .merge(configs::routes(state.clone()))
        .merge(trigger_rules::routes(state))
        .layer(axum::middleware::from_fn(content_negotiation::negotiate))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}
