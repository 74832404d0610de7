use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type ScopeKey = (String, String);

/// Hands out one writer lock per `(account, server_path)` scope. Passes over
/// different scopes never wait on each other.
#[derive(Debug, Default)]
pub struct ScopeLocks {
    scopes: Mutex<HashMap<ScopeKey, Arc<AsyncMutex<()>>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, account: &str, server_path: &str) -> OwnedMutexGuard<()> {
        let scope = {
            let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries only referenced by the map are idle.
            scopes.retain(|_, lock| Arc::strong_count(lock) > 1);
            scopes
                .entry((account.to_string(), server_path.to_string()))
                .or_default()
                .clone()
        };
        scope.lock_owned().await
    }

    pub fn active_scopes(&self) -> usize {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_scope_is_serialized() {
        let locks = Arc::new(ScopeLocks::new());
        let guard = locks.lock("alice", "/files").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("alice", "/files").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn distinct_scopes_do_not_block() {
        let locks = ScopeLocks::new();
        let _a = locks.lock("alice", "/files").await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock("alice", "/files/Docs"))
            .await
            .unwrap();
        let _c = tokio::time::timeout(Duration::from_secs(1), locks.lock("bob", "/files"))
            .await
            .unwrap();
        assert_eq!(locks.active_scopes(), 3);
    }

    #[tokio::test]
    async fn idle_scopes_are_dropped() {
        let locks = ScopeLocks::new();
        drop(locks.lock("alice", "/a").await);
        drop(locks.lock("alice", "/b").await);
        let _c = locks.lock("alice", "/c").await;
        assert_eq!(locks.scopes.lock().unwrap().len(), 1);
    }
}
