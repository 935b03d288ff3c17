//! Per-application lock registry.
//!
//! Multi-step operations hold the lock for their application so
//! concurrent mutations of one app serialize while distinct apps proceed
//! in parallel. Locks are created on first use and never reclaimed; the
//! registry grows with the number of distinct app names seen, which is
//! bounded by the number of hosted applications.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct AppLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl AppLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `name`, waiting if another task holds it.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_name_serializes() {
        let locks = AppLocks::new();
        let counter = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("blog").await;
                counter.lock().unwrap().push(format!("start {i}"));
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.lock().unwrap().push(format!("end {i}"));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Critical sections never interleave: every "start i" is followed
        // directly by its "end i".
        let events = counter.lock().unwrap().clone();
        for pair in events.chunks(2) {
            assert_eq!(pair[0].replace("start", "end"), pair[1]);
        }
    }

    #[tokio::test]
    async fn distinct_names_run_in_parallel() {
        let locks = AppLocks::new();
        let blog = locks.acquire("blog").await;

        // A different app's lock is obtainable while "blog" is held.
        let wiki =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire("wiki")).await;
        assert!(wiki.is_ok());
        drop(blog);
    }

    #[tokio::test]
    async fn released_lock_is_reacquirable() {
        let locks = AppLocks::new();
        drop(locks.acquire("blog").await);
        let again =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire("blog")).await;
        assert!(again.is_ok());
    }
}
