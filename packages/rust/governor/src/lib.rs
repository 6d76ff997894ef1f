//! Resource governor and retry helper (§4.2, §4.3).
//!
//! Every stage of the pipeline borrows concurrency control from here rather
//! than rolling its own: three stage locks keep the heaviest stages
//! one-at-a-time across the whole process, two limiters bound how many
//! browser pages or LLM calls are in flight at once, and the retry helper
//! gives every external call the same backoff-and-cancellation shape.

mod locks;
mod retry;

pub use locks::{Limiter, StageLock, StageLockGuard};
pub use retry::{
    CancellationCheck, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, retry,
};

use llmsforge_shared::ResolvedTunables;

/// Bundles the stage locks and limiters the orchestrator hands to each
/// stage. One instance is shared (via `Arc`) across the whole process.
pub struct ResourceGovernor {
    pub browser_activity: StageLock,
    pub synthesize: StageLock,
    pub embed: StageLock,
    pub browser_pages: Limiter,
    pub llm_calls: Limiter,
    pub qdrant_batch_size: usize,
}

impl ResourceGovernor {
    pub fn new(tunables: &ResolvedTunables) -> Self {
        Self {
            browser_activity: StageLock::new(),
            synthesize: StageLock::new(),
            embed: StageLock::new(),
            browser_pages: Limiter::new(tunables.browser_pool_size),
            llm_calls: Limiter::new(tunables.llm_concurrency),
            qdrant_batch_size: tunables.qdrant_batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunables() -> ResolvedTunables {
        ResolvedTunables {
            browser_pool_size: 2,
            llm_concurrency: 3,
            qdrant_batch_size: 64,
        }
    }

    #[test]
    fn governor_wires_up_independent_stage_locks() {
        let governor = ResourceGovernor::new(&tunables());
        let guard = governor.browser_activity.try_acquire().unwrap();
        assert!(governor.synthesize.try_acquire().is_some());
        assert!(governor.embed.try_acquire().is_some());
        assert!(governor.browser_activity.try_acquire().is_none());
        drop(guard);
        assert!(governor.browser_activity.try_acquire().is_some());
    }

    #[tokio::test]
    async fn governor_limiters_match_tunables() {
        let governor = ResourceGovernor::new(&tunables());
        assert_eq!(governor.browser_pages.available_permits(), 2);
        assert_eq!(governor.llm_calls.available_permits(), 3);
        assert_eq!(governor.qdrant_batch_size, 64);
    }
}
