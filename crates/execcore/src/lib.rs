//! Core abstractions for the execution engine
//!
//! This crate provides the graph model, the run context, the executor and
//! step-runner contracts, the persistence contracts and the realtime status
//! channel that every other crate depends on.

mod context;
mod error;
pub mod events;
mod node;
mod node_type;
mod run;
mod step;
pub mod store;
pub mod template;
mod workflow;

pub use context::Context;
pub use error::{ChannelError, FlowError, NodeError, StoreError, WorkflowError};
pub use events::*;
pub use node::{NodeExecutor, NodeInvocation, NodeOutcome};
pub use node_type::NodeType;
pub use run::{ExecutionRun, RunFailure, RunId, RunStatus, TriggerEvent};
pub use step::{run_step_as, RetryPolicy, StepFuture, StepRunner};
pub use store::{Credential, CredentialStore, RunStore, StepStore, Store, WorkflowStore};
pub use template::TemplateEngine;
pub use workflow::{Connection, NodeConfig, NodeId, NodeSpec, WorkflowGraph, WorkflowId};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
