use async_trait::async_trait;
use chrono::{DateTime, Utc};
use execcore::{NodeError, RetryPolicy, StepFuture, StepRunner, StepStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Step runner that persists every completed step in a [`StepStore`].
///
/// Results are keyed by run id and step name, so a run that is handled
/// again after a crash skips straight past the work it already finished.
pub struct DurableStepRunner {
    run_id: String,
    store: Arc<dyn StepStore>,
    retry: RetryPolicy,
}

impl DurableStepRunner {
    pub fn new(run_id: impl Into<String>, store: Arc<dyn StepStore>, retry: RetryPolicy) -> Self {
        Self {
            run_id: run_id.into(),
            store,
            retry,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

#[async_trait]
impl StepRunner for DurableStepRunner {
    async fn run_step<'s>(
        &self,
        name: &str,
        step: &(dyn Fn() -> StepFuture<'s> + Send + Sync + 's),
    ) -> Result<Value, NodeError> {
        if let Some(value) = self.store.load_step(&self.run_id, name).await? {
            tracing::debug!("Run {}: step '{}' already completed", self.run_id, name);
            return Ok(value);
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match step().await {
                Ok(value) => {
                    self.store.save_step(&self.run_id, name, &value).await?;
                    return Ok(value);
                }
                Err(e) if e.is_retriable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        "Run {}: step '{}' failed (attempt {}/{}): {}, retrying in {:?}",
                        self.run_id,
                        name,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        "Run {}: step '{}' failed after {} attempt(s): {}",
                        self.run_id,
                        name,
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn sleep(&self, name: &str, duration: Duration) -> Result<(), NodeError> {
        let wake_at: DateTime<Utc> = match self.store.load_step(&self.run_id, name).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| NodeError::Serialization(e.to_string()))?,
            None => {
                let delta = chrono::Duration::from_std(duration)
                    .map_err(|e| NodeError::Configuration(format!("Invalid sleep: {}", e)))?;
                let wake_at = Utc::now() + delta;
                let value = serde_json::to_value(wake_at)
                    .map_err(|e| NodeError::Serialization(e.to_string()))?;
                self.store.save_step(&self.run_id, name, &value).await?;
                wake_at
            }
        };

        // negative remaining time means the deadline already passed
        if let Ok(remaining) = (wake_at - Utc::now()).to_std() {
            tokio::time::sleep(remaining).await;
        }
        Ok(())
    }
}
