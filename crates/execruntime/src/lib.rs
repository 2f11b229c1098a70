//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows: ordering nodes,
//! recording durable steps, driving runs to completion and persisting them.

mod claims;
mod config;
mod orchestrator;
mod sorter;
mod step_runner;
pub mod store;

pub use config::{Environment, RuntimeConfig, UnknownEnvironment};
pub use orchestrator::Orchestrator;
pub use sorter::{sort_nodes, sort_workflow};
pub use step_runner::DurableStepRunner;
pub use store::{parse_workflow, MemoryStore, SqliteStore};
