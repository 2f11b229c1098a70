//! Persistence contracts the engine consumes.
//!
//! Implementations must tolerate concurrent callers: distinct runs share a
//! store but never a run id.

use crate::{Context, ExecutionRun, RunFailure, StoreError, WorkflowGraph};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Load the current definition; `StoreError::NotFound` if absent.
    async fn load_workflow(&self, workflow_id: &str) -> Result<WorkflowGraph, StoreError>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a `PENDING` run. Returns `false` when a run with this id
    /// already exists, leaving it untouched.
    async fn create_run(&self, run: &ExecutionRun) -> Result<bool, StoreError>;

    /// Move a `PENDING` run to `RUNNING`. No-op for any other status.
    async fn mark_running(&self, run_id: &str) -> Result<(), StoreError>;

    /// Terminal write for success. Returns `false` if the run was already
    /// terminal, in which case nothing changes.
    async fn complete_run(&self, run_id: &str, output: &Context) -> Result<bool, StoreError>;

    /// Terminal write for failure, same guard as [`RunStore::complete_run`].
    async fn fail_run(&self, run_id: &str, failure: &RunFailure) -> Result<bool, StoreError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<ExecutionRun>, StoreError>;

    /// Take or renew the lease on a non-terminal run for `owner` until
    /// `until`. Succeeds when the run is unleased, already leased by
    /// `owner`, or its previous lease has expired; returns `false` when
    /// another owner holds a live lease or the run is terminal or missing.
    async fn claim_run(
        &self,
        run_id: &str,
        owner: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Drop the step results of runs that finished before `cutoff`.
    /// Returns the number of step entries removed.
    async fn prune_finished_steps(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Completed step results, keyed by run id and step name.
#[async_trait]
pub trait StepStore: Send + Sync {
    async fn load_step(&self, run_id: &str, step: &str) -> Result<Option<Value>, StoreError>;

    async fn save_step(&self, run_id: &str, step: &str, value: &Value) -> Result<(), StoreError>;
}

/// A stored secret for a third-party API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub value: String,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Credential with `credential_id` owned by `user_id`, if any.
    async fn find_credential(
        &self,
        credential_id: &str,
        user_id: &str,
    ) -> Result<Option<Credential>, StoreError>;
}

/// Everything the orchestrator needs from one backing store.
pub trait Store: WorkflowStore + RunStore + StepStore + CredentialStore {}

impl<T> Store for T where T: WorkflowStore + RunStore + StepStore + CredentialStore {}
