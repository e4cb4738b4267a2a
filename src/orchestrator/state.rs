use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Where a prompt run currently is. `Validating` and `Resolving` only occur
/// when a build validator is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Encoding,
    Generating,
    Applying,
    Committing,
    Validating,
    Resolving,
    Done,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Stage::Encoding => "encoding",
            Stage::Generating => "generating",
            Stage::Applying => "applying",
            Stage::Committing => "committing",
            Stage::Validating => "validating",
            Stage::Resolving => "resolving",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(label)
    }
}

type LockMap = HashMap<PathBuf, Arc<Mutex<()>>>;

/// Per-repository mutual exclusion. Callers on the same root queue up;
/// different roots never block each other. An entry lives only while some
/// caller holds or waits for it.
#[derive(Default)]
pub struct RootLocks {
    locks: Arc<StdMutex<LockMap>>,
}

impl RootLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `root`. Paths are canonicalized so
    /// `./app` and `/abs/app` share one lock.
    pub async fn acquire(&self, root: &Path) -> RootGuard {
        let key = tokio::fs::canonicalize(root)
            .await
            .unwrap_or_else(|_| root.to_path_buf());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };
        debug!(root = %key.display(), "Waiting for repository lock");
        let guard = lock.lock_owned().await;
        RootGuard {
            guard: Some(guard),
            key,
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Exclusive access to one repository root, released on drop.
pub struct RootGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: PathBuf,
    locks: Arc<StdMutex<LockMap>>,
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own reference left: nobody holds or waits for this root.
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
            debug!(root = %self.key.display(), "Released repository lock entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_same_root_is_exclusive() {
        let dir = tempdir().unwrap();
        let locks = RootLocks::new();
        let held = locks.acquire(dir.path()).await;

        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.acquire(dir.path())).await;
        assert!(waiting.is_err(), "second acquire should block while the first is held");

        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(500), locks.acquire(dir.path())).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_equivalent_paths_share_a_lock() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        let locks = RootLocks::new();
        let _held = locks.acquire(&dir.path().join("app")).await;

        let dotted = dir.path().join("app").join(".");
        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&dotted)).await;
        assert!(waiting.is_err());
    }

    #[tokio::test]
    async fn test_different_roots_are_independent() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let locks = RootLocks::new();
        let _held = locks.acquire(a.path()).await;
        let other = tokio::time::timeout(Duration::from_millis(500), locks.acquire(b.path())).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_released_roots_are_forgotten() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let locks = RootLocks::new();

        let held_a = locks.acquire(a.path()).await;
        let held_b = locks.acquire(b.path()).await;
        assert_eq!(locks.tracked(), 2);

        drop(held_a);
        assert_eq!(locks.tracked(), 1);
        drop(held_b);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_entry_survives_while_a_caller_waits() {
        let dir = tempdir().unwrap();
        let locks = Arc::new(RootLocks::new());
        let held = locks.acquire(dir.path()).await;

        let waiter = {
            let locks = locks.clone();
            let root = dir.path().to_path_buf();
            tokio::spawn(async move {
                let _guard = locks.acquire(&root).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        drop(held);
        assert_eq!(locks.tracked(), 1, "waiter still needs the entry");
        waiter.await.unwrap();
        assert_eq!(locks.tracked(), 0);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Resolving.to_string(), "resolving");
        assert_eq!(serde_json::to_string(&Stage::Done).unwrap(), "\"done\"");
    }
}
