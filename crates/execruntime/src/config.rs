use execcore::{EventBus, RetryPolicy};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown environment '{0}', expected development, test or production")]
pub struct UnknownEnvironment(String);

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(UnknownEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        })
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub environment: Environment,
    /// Applied to every step of every run.
    pub retry: RetryPolicy,
    pub event_buffer_size: usize,
    pub subscription_ttl: chrono::Duration,
    /// How long a worker's claim on a run lasts without renewal. Renewed
    /// before every node, so it must outlast the slowest single node.
    pub run_lease: chrono::Duration,
    /// Step results of finished runs older than this may be pruned.
    pub step_retention: chrono::Duration,
    pub openai_api_key: Option<String>,
}

impl RuntimeConfig {
    /// Production retries failed steps with backoff; other environments
    /// fail on the first error.
    pub fn for_environment(environment: Environment) -> Self {
        let retry = match environment {
            Environment::Production => RetryPolicy::default(),
            Environment::Development | Environment::Test => RetryPolicy::none(),
        };
        Self {
            environment,
            retry,
            event_buffer_size: 1000,
            subscription_ttl: chrono::Duration::minutes(5),
            run_lease: chrono::Duration::minutes(5),
            step_retention: chrono::Duration::hours(24),
            openai_api_key: None,
        }
    }

    pub fn with_openai_api_key(mut self, api_key: Option<String>) -> Self {
        self.openai_api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_run_lease(mut self, lease: chrono::Duration) -> Self {
        self.run_lease = lease;
        self
    }

    pub fn with_step_retention(mut self, retention: chrono::Duration) -> Self {
        self.step_retention = retention;
        self
    }

    /// Realtime channel sized by this config.
    pub fn event_bus(&self) -> EventBus {
        EventBus::new(self.event_buffer_size, self.subscription_ttl)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_follows_environment() {
        let prod = RuntimeConfig::for_environment(Environment::Production);
        assert_eq!(prod.retry.max_attempts, 4);

        let dev = RuntimeConfig::default();
        assert_eq!(dev.environment, Environment::Development);
        assert_eq!(dev.retry, RetryPolicy::none());
    }

    #[test]
    fn test_parse_environment() {
        assert_eq!("PRODUCTION".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!("dev".parse::<Environment>(), Ok(Environment::Development));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let config = RuntimeConfig::default().with_openai_api_key(Some("  ".to_string()));
        assert_eq!(config.openai_api_key, None);
    }
}
