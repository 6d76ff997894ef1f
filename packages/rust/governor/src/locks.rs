//! Stage locks and bounded concurrency limiters (§4.2).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A boolean mutex serializing one stage across all tasks.
///
/// `BrowserActivityLock`, `SynthesizeLock`, and `EmbedLock` are each one of
/// these. `try_acquire` never blocks; failure is reported to the caller so
/// the orchestrator can treat it as a retriable error (§4.2, §4.9).
#[derive(Clone)]
pub struct StageLock {
    held: Arc<AtomicBool>,
}

impl StageLock {
    pub fn new() -> Self {
        Self {
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attempt to acquire the lock. Returns `None` if already held.
    pub fn try_acquire(&self) -> Option<StageLockGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| StageLockGuard {
                held: self.held.clone(),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Default for StageLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard releasing a [`StageLock`] on drop.
pub struct StageLockGuard {
    held: Arc<AtomicBool>,
}

impl Drop for StageLockGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

/// A bounded counting semaphore capping concurrent in-flight operations of
/// one kind (`BrowserPageLimiter`, `LLMCallLimiter`).
#[derive(Clone)]
pub struct Limiter {
    semaphore: Arc<Semaphore>,
}

impl Limiter {
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Acquire one permit, suspending until one is free.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("limiter semaphore is never closed")
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_lock_excludes_second_acquire() {
        let lock = StageLock::new();
        let guard = lock.try_acquire().expect("first acquire succeeds");
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test]
    async fn limiter_bounds_concurrency() {
        let limiter = Limiter::new(2);
        let a = limiter.acquire().await;
        let b = limiter.acquire().await;
        assert_eq!(limiter.available_permits(), 0);
        drop(a);
        assert_eq!(limiter.available_permits(), 1);
        drop(b);
    }
}
