use crate::NodeError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Future produced by one attempt of a step.
pub type StepFuture<'a> = BoxFuture<'a, Result<Value, NodeError>>;

/// Durable execution substrate for side-effecting work.
///
/// A step runs at most once to completion per run: once `run_step` has
/// returned a value for a name, later calls with the same name return the
/// recorded value without invoking the closure again, including after a
/// process restart. Retriable failures are retried according to the
/// runner's policy; non-retriable ones are returned on the first attempt.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step<'s>(
        &self,
        name: &str,
        step: &(dyn Fn() -> StepFuture<'s> + Send + Sync + 's),
    ) -> Result<Value, NodeError>;

    /// Durable delay. Once the wake-up time is recorded, a resumed run only
    /// waits for whatever remains of it.
    async fn sleep(&self, name: &str, duration: Duration) -> Result<(), NodeError>;
}

/// Typed wrapper over [`StepRunner::run_step`]; the value round-trips
/// through JSON so a memoized result decodes to the same type.
pub async fn run_step_as<'s, T, F, Fut>(
    runner: &dyn StepRunner,
    name: &str,
    step: F,
) -> Result<T, NodeError>
where
    T: Serialize + DeserializeOwned + Send + 's,
    F: Fn() -> Fut + Send + Sync + 's,
    Fut: Future<Output = Result<T, NodeError>> + Send + 's,
{
    let erased = move || -> StepFuture<'s> {
        let attempt = step();
        Box::pin(async move {
            let value = attempt.await?;
            serde_json::to_value(value).map_err(|e| NodeError::Serialization(e.to_string()))
        })
    };

    let value = runner.run_step(name, &erased).await?;
    serde_json::from_value(value).map_err(|e| NodeError::Serialization(e.to_string()))
}

/// Retry policy for steps that fail with a retriable error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before attempt `attempt + 1`, given that `attempt` (1-based)
    /// just failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let ms = self.delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}
