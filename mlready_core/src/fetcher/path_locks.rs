use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per destination path, so two `ensure` calls never race on
/// the same artifact.
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other caller holds `path`, then hold it until the guard drops.
    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody is holding or waiting on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(lock_key(path)).or_default())
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_path_is_serialized() {
        let locks = Arc::new(PathLocks::new());
        let guard = locks.acquire(Path::new("models/a.bin")).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(Path::new("models/a.bin")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.acquire(Path::new("models/a.bin")).await;
        let b = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire(Path::new("models/b.bin")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = PathLocks::new();
        drop(locks.acquire(Path::new("a.bin")).await);
        drop(locks.acquire(Path::new("b.bin")).await);
        assert_eq!(locks.len(), 1);
    }
}
