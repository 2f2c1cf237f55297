//! Service lifecycle: a typed `ApplicationContext` singleton container and
//! a `ServiceController` that runs startup, then run, then shutdown across
//! every registered `Service`, reacting to SIGINT/SIGTERM exactly once.

pub mod context;
pub mod service;

pub use context::ApplicationContext;
pub use service::{Service, ServiceController, ServiceStatus};
