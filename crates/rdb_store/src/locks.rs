use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub const MIGRATION_LOCK: &str = "migration";
pub const SYNC_LOCK: &str = "sync";

/// Async mutexes addressed by name. Waiters queue on the lock instead of failing.
#[derive(Default)]
pub struct NamedLocks {
    locks: AsyncMutex<HashMap<&'static str, Arc<AsyncMutex<()>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, name: &'static str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(name).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{NamedLocks, MIGRATION_LOCK, SYNC_LOCK};

    #[tokio::test]
    async fn same_name_serializes_holders() {
        let locks = Arc::new(NamedLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(MIGRATION_LOCK).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_names_do_not_block() {
        let locks = NamedLocks::new();
        let _migration = locks.acquire(MIGRATION_LOCK).await;
        let sync = tokio::time::timeout(Duration::from_millis(100), locks.acquire(SYNC_LOCK)).await;
        assert!(sync.is_ok());
    }
}
