//! Condition and cron trigger engine: evaluates condition rules against
//! every event on the bus, advances scheduled cron triggers on a tick loop,
//! and dispatches both through one action registry.

pub mod condition;
pub mod cron;
pub mod engine;

pub use engine::{TriggerEngine, TriggerRuleStore};
