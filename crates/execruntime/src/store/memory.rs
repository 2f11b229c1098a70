use super::workflow_not_found;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use execcore::{
    Context, Credential, CredentialStore, ExecutionRun, RunFailure, RunStatus, RunStore,
    StepStore, StoreError, WorkflowGraph, WorkflowStore,
};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Store that lives for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, WorkflowGraph>>,
    runs: RwLock<HashMap<String, ExecutionRun>>,
    steps: RwLock<HashMap<String, Vec<(String, Value)>>>,
    /// run id -> (owner, lease expiry)
    leases: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
    credentials: RwLock<HashMap<String, Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save_workflow(&self, workflow: WorkflowGraph) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id.clone(), workflow);
    }

    pub async fn save_credential(&self, credential: Credential) {
        let mut credentials = self.credentials.write().await;
        credentials.insert(credential.id.clone(), credential);
    }

    /// Names of the steps completed for a run, in completion order.
    pub async fn completed_steps(&self, run_id: &str) -> Vec<String> {
        let steps = self.steps.read().await;
        steps
            .get(run_id)
            .map(|entries| entries.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    async fn finish(
        &self,
        run_id: &str,
        apply: impl FnOnce(&mut ExecutionRun),
    ) -> Result<bool, StoreError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run_id)))?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        apply(run);
        run.completed_at = Some(Utc::now());
        Ok(true)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn load_workflow(&self, workflow_id: &str) -> Result<WorkflowGraph, StoreError> {
        let workflows = self.workflows.read().await;
        workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| workflow_not_found(workflow_id))
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: &ExecutionRun) -> Result<bool, StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.run_id) {
            return Ok(false);
        }
        runs.insert(run.run_id.clone(), run.clone());
        Ok(true)
    }

    async fn mark_running(&self, run_id: &str) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(run_id) {
            if run.status == RunStatus::Pending {
                run.status = RunStatus::Running;
            }
        }
        Ok(())
    }

    async fn complete_run(&self, run_id: &str, output: &Context) -> Result<bool, StoreError> {
        self.finish(run_id, |run| {
            run.status = RunStatus::Success;
            run.output = Some(output.clone());
        })
        .await
    }

    async fn fail_run(&self, run_id: &str, failure: &RunFailure) -> Result<bool, StoreError> {
        self.finish(run_id, |run| {
            run.status = RunStatus::Failed;
            run.error = Some(failure.message.clone());
            run.error_detail = Some(failure.detail.clone());
        })
        .await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<ExecutionRun>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs.get(run_id).cloned())
    }

    async fn claim_run(
        &self,
        run_id: &str,
        owner: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // lock order: runs, then leases
        let runs = self.runs.read().await;
        match runs.get(run_id) {
            Some(run) if !run.status.is_terminal() => {}
            _ => return Ok(false),
        }

        let mut leases = self.leases.write().await;
        let now = Utc::now();
        let available = match leases.get(run_id) {
            Some((holder, expires)) => holder == owner || *expires <= now,
            None => true,
        };
        if available {
            leases.insert(run_id.to_string(), (owner.to_string(), until));
        }
        Ok(available)
    }

    async fn prune_finished_steps(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let runs = self.runs.read().await;
        let mut steps = self.steps.write().await;
        let mut leases = self.leases.write().await;

        let finished: Vec<String> = runs
            .values()
            .filter(|run| run.status.is_terminal())
            .filter(|run| run.completed_at.is_some_and(|at| at < cutoff))
            .map(|run| run.run_id.clone())
            .collect();

        let mut removed = 0;
        for run_id in finished {
            leases.remove(&run_id);
            if let Some(entries) = steps.remove(&run_id) {
                removed += entries.len();
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl StepStore for MemoryStore {
    async fn load_step(&self, run_id: &str, step: &str) -> Result<Option<Value>, StoreError> {
        let steps = self.steps.read().await;
        Ok(steps
            .get(run_id)
            .and_then(|entries| entries.iter().find(|(name, _)| name == step))
            .map(|(_, value)| value.clone()))
    }

    async fn save_step(&self, run_id: &str, step: &str, value: &Value) -> Result<(), StoreError> {
        let mut steps = self.steps.write().await;
        let entries = steps.entry(run_id.to_string()).or_default();
        match entries.iter_mut().find(|(name, _)| name == step) {
            Some(entry) => entry.1 = value.clone(),
            None => entries.push((step.to_string(), value.clone())),
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_credential(
        &self,
        credential_id: &str,
        user_id: &str,
    ) -> Result<Option<Credential>, StoreError> {
        let credentials = self.credentials.read().await;
        Ok(credentials
            .get(credential_id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }
}
