use chrono::{DateTime, Utc};
use crate::claims::RunLocks;
use crate::config::RuntimeConfig;
use crate::sorter::sort_workflow;
use crate::step_runner::DurableStepRunner;
use execcore::{
    run_step_as, Context, ExecutionRun, FlowError, NodeError, NodeInvocation, NodeSpec,
    RetryPolicy, RunFailure, RunStore, StatusPublisher, StepStore, Store, StoreError,
    TemplateEngine, TriggerEvent, WorkflowStore,
};
use execnodes::ExecutorRegistry;
use std::sync::Arc;
use uuid::Uuid;

/// Drives one workflow run per trigger event.
///
/// Every externally visible action goes through a named step, so handling
/// the same event again resumes the run instead of repeating it.
///
/// A run is executed by one worker at a time: concurrent deliveries inside
/// this process wait for each other, and across processes the store lease
/// taken before the first node keeps a second worker out until it expires.
pub struct Orchestrator {
    workflows: Arc<dyn WorkflowStore>,
    runs: Arc<dyn RunStore>,
    steps: Arc<dyn StepStore>,
    registry: Arc<ExecutorRegistry>,
    publisher: Arc<dyn StatusPublisher>,
    templates: TemplateEngine,
    retry: RetryPolicy,
    /// Lease owner id of this orchestrator.
    worker_id: String,
    lease: chrono::Duration,
    step_retention: chrono::Duration,
    active: RunLocks,
}

impl Orchestrator {
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        registry: Arc<ExecutorRegistry>,
        publisher: Arc<dyn StatusPublisher>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            workflows: store.clone(),
            runs: store.clone(),
            steps: store,
            registry,
            publisher,
            templates: TemplateEngine::new(),
            retry: config.retry.clone(),
            worker_id: Uuid::new_v4().to_string(),
            lease: config.run_lease,
            step_retention: config.step_retention,
            active: RunLocks::default(),
        }
    }

    pub fn with_templates(mut self, templates: TemplateEngine) -> Self {
        self.templates = templates;
        self
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<ExecutionRun>, FlowError> {
        Ok(self.runs.get_run(run_id).await?)
    }

    /// Drop memoized steps of runs that finished longer ago than the
    /// configured retention.
    pub async fn prune_finished_steps(&self) -> Result<usize, FlowError> {
        let cutoff = Utc::now() - self.step_retention;
        let removed = self.runs.prune_finished_steps(cutoff).await?;
        if removed > 0 {
            tracing::debug!("Pruned {} step results of finished runs", removed);
        }
        Ok(removed)
    }

    fn lease_deadline(&self) -> DateTime<Utc> {
        Utc::now() + self.lease
    }

    /// Take or renew this worker's lease on the run.
    async fn claim(&self, run_id: &str) -> Result<(), FlowError> {
        if self
            .runs
            .claim_run(run_id, &self.worker_id, self.lease_deadline())
            .await?
        {
            Ok(())
        } else {
            Err(FlowError::RunInProgress(run_id.to_string()))
        }
    }

    /// Run the workflow named by `event` to a terminal state.
    ///
    /// A run that fails inside the workflow is returned as `Ok` with status
    /// `FAILED`. `Err` means the event was rejected, another worker holds
    /// the run, or the run record itself could not be written; in the last
    /// two cases the event may be redelivered.
    pub async fn handle(&self, event: TriggerEvent) -> Result<ExecutionRun, FlowError> {
        let run_id = event.id.trim();
        if run_id.is_empty() {
            return Err(FlowError::InvalidTrigger("event id is required".to_string()));
        }
        let workflow_id = event
            .workflow_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FlowError::InvalidTrigger("workflowId is required".to_string()))?;

        let _active = self.active.acquire(run_id).await;

        let steps = DurableStepRunner::new(run_id, self.steps.clone(), self.retry.clone());
        let input = Context::from(event.initial_data.clone().unwrap_or_default());

        let pending = ExecutionRun::pending(run_id, workflow_id, input.clone());
        let pending = &pending;
        let runs = self.runs.as_ref();
        let created: bool = run_step_as(&steps, "create-execution", move || async move {
            Ok::<_, NodeError>(runs.create_run(pending).await?)
        })
        .await?;
        if !created {
            tracing::debug!("Run {} already exists", run_id);
        }

        if let Some(existing) = self.runs.get_run(run_id).await? {
            if existing.status.is_terminal() {
                tracing::info!("Run {} already finished with {}", run_id, existing.status);
                return Ok(existing);
            }
        }

        if let Err(error) = self.claim(run_id).await {
            // the holder may have finished between the check above and the claim
            if let Some(existing) = self.runs.get_run(run_id).await? {
                if existing.status.is_terminal() {
                    return Ok(existing);
                }
            }
            tracing::info!("Run {} is held by another worker", run_id);
            return Err(error);
        }

        tracing::info!("Starting run {} of workflow {}", run_id, workflow_id);

        match self.drive(run_id, workflow_id, input, &steps).await {
            Ok(()) => tracing::info!("Run {} completed", run_id),
            Err(error @ FlowError::RunInProgress(_)) => {
                tracing::warn!("Run {} lost its lease, leaving it to the new holder", run_id);
                return Err(error);
            }
            Err(error) => {
                tracing::error!("Run {} failed: {}", run_id, error);
                let failure = RunFailure {
                    message: error.to_string(),
                    detail: error.chain(),
                };
                if !self.runs.fail_run(run_id, &failure).await? {
                    tracing::warn!("Run {} was already terminal, failure not recorded", run_id);
                }
            }
        }

        self.runs
            .get_run(run_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run_id)).into())
    }

    async fn drive(
        &self,
        run_id: &str,
        workflow_id: &str,
        input: Context,
        steps: &DurableStepRunner,
    ) -> Result<(), FlowError> {
        let workflows = self.workflows.as_ref();
        let nodes: Vec<NodeSpec> = run_step_as(steps, "prepare-workflow", move || async move {
            let workflow = workflows.load_workflow(workflow_id).await?;
            Ok::<_, NodeError>(sort_workflow(&workflow)?)
        })
        .await?;

        let user_id: String = run_step_as(steps, "get-user-id", move || async move {
            Ok::<_, NodeError>(workflows.load_workflow(workflow_id).await?.user_id)
        })
        .await?;

        self.runs.mark_running(run_id).await?;

        let mut context = input;
        for node in &nodes {
            self.claim(run_id).await?;
            let invocation = NodeInvocation {
                node_id: &node.id,
                node_type: node.node_type,
                config: &node.config,
                context: &context,
                user_id: &user_id,
                steps,
                templates: &self.templates,
            };
            let next = self
                .registry
                .run(&invocation, self.publisher.as_ref())
                .await
                .map_err(|source| FlowError::Node {
                    node_id: node.id.clone(),
                    source,
                })?;
            context = next;
        }

        let runs = self.runs.as_ref();
        let output = &context;
        let _: bool = run_step_as(steps, "finalize-execution", move || async move {
            Ok::<_, NodeError>(runs.complete_run(run_id, output).await?)
        })
        .await?;

        Ok(())
    }
}
