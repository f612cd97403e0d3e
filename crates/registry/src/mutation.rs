use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

/// Process-wide critical section for every writer of the record graph.
///
/// Holding a [`MutationGuard`] is what entitles a caller to run the `*_locked` operations on
/// `Registry`; the data lock itself is only ever held briefly.
#[derive(Debug, Default)]
pub struct MutationLock {
    inner: Mutex<()>,
    wait_ms_last: AtomicU64,
    wait_ms_max: AtomicU64,
}

/// Proof that the mutation lock is held. Released on drop.
pub struct MutationGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl MutationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutationGuard<'_> {
        let start = Instant::now();
        let guard = self.inner.lock().await;
        self.record_wait(start.elapsed());
        MutationGuard { _guard: guard }
    }

    /// Non-blocking acquisition for periodic jobs.
    pub fn try_lock(&self) -> Option<MutationGuard<'_>> {
        let guard = self.inner.try_lock().ok()?;
        self.record_wait(Duration::ZERO);
        Some(MutationGuard { _guard: guard })
    }

    /// Wait at most `timeout`; `None` if the lock stayed busy.
    pub async fn lock_timeout(&self, timeout: Duration) -> Option<MutationGuard<'_>> {
        let start = Instant::now();
        let guard = tokio::time::timeout(timeout, self.inner.lock()).await.ok()?;
        self.record_wait(start.elapsed());
        Some(MutationGuard { _guard: guard })
    }

    pub fn wait_ms_last(&self) -> u64 {
        self.wait_ms_last.load(Ordering::Relaxed)
    }

    pub fn wait_ms_max(&self) -> u64 {
        self.wait_ms_max.load(Ordering::Relaxed)
    }

    fn record_wait(&self, waited: Duration) {
        let wait_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
        self.wait_ms_last.store(wait_ms, Ordering::Relaxed);
        self.wait_ms_max.fetch_max(wait_ms, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn try_lock_fails_while_held() {
        let lock = MutationLock::new();
        let guard = lock.lock().await;
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[tokio::test]
    async fn lock_timeout_gives_up() {
        let lock = MutationLock::new();
        let _held = lock.lock().await;
        let waited = lock.lock_timeout(Duration::from_millis(20)).await;
        assert!(waited.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiters_record_wait_time() {
        let lock = Arc::new(MutationLock::new());
        let held = lock.lock().await;

        let contender = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                let _guard = lock.lock().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(held);
        contender.await.unwrap();

        assert!(lock.wait_ms_max() >= 20);
    }
}
