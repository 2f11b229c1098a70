use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per run id, so a run is handled by at most one task of
/// this process at a time. Entries are dropped once nobody holds or waits
/// on them.
#[derive(Default)]
pub(crate) struct RunLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub(crate) struct RunGuard<'a> {
    locks: &'a RunLocks,
    run_id: String,
    _held: OwnedMutexGuard<()>,
}

impl RunLocks {
    /// Wait until no other task handles `run_id`, then hold it.
    pub(crate) async fn acquire(&self, run_id: &str) -> RunGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(run_id.to_string()).or_default().clone()
        };
        let held = lock.lock_owned().await;
        RunGuard {
            locks: self,
            run_id: run_id.to_string(),
            _held: held,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // the map and this guard account for two references; more means waiters
        let idle = locks
            .get(&self.run_id)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2);
        if idle {
            locks.remove(&self.run_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_holder_waits_for_first() {
        let locks = RunLocks::default();
        let first = locks.acquire("run-1").await;

        let waiting = tokio::time::timeout(Duration::from_millis(20), locks.acquire("run-1")).await;
        assert!(waiting.is_err());

        // other runs are independent
        let other = locks.acquire("run-2").await;
        drop(other);

        drop(first);
        let again = tokio::time::timeout(Duration::from_millis(20), locks.acquire("run-1")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_entries_are_removed_when_idle() {
        let locks = RunLocks::default();
        let guard = locks.acquire("run-1").await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert_eq!(locks.len(), 0);
    }
}
