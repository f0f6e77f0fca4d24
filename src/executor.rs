// 4.0 executor.rs: resilience for idempotent remote reads. bounded exponential
// backoff retry plus a per-chain single-flight cache for the collateral token
// address. funds-moving submissions never pass through here; replaying one can
// move money twice.

use crate::ledger::LedgerError;
use crate::types::{Address, ChainId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Bounded exponential backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt after `failed_attempt` (1-based).
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(failed_attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor)
    }
}

/// Run an idempotent operation up to `policy.max_attempts` times, sleeping the
/// backoff schedule between attempts. Indifferent to the failure kind; the last
/// error is surfaced when the budget runs out.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    %label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "remote call failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!(%label, attempt, error = %err, "retry budget exhausted");
                return Err(err);
            }
        }
    }
}

// 4.1: collateral token address cache. one resolution per chain per process;
// concurrent callers share the in-flight fetch instead of issuing their own.
// after the retry budget is spent the configured fallback address is installed
// permanently, so a flaky endpoint cannot make later quotes flap between
// addresses. an explicit reset is the only way to force a refetch.
pub struct TokenAddressCache {
    policy: RetryPolicy,
    cells: Mutex<HashMap<ChainId, Arc<OnceCell<Address>>>>,
}

impl TokenAddressCache {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, cells: Mutex::new(HashMap::new()) }
    }

    fn cell(&self, chain: ChainId) -> Arc<OnceCell<Address>> {
        let mut cells = self.cells.lock().unwrap();
        cells.entry(chain).or_default().clone()
    }

    /// Resolve the token address for `chain`, fetching at most once no matter
    /// how many callers arrive concurrently. `fallback` is installed for good
    /// when the retry budget runs out.
    pub async fn resolve<F, Fut>(&self, chain: ChainId, fallback: &Address, fetch: F) -> Address
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Address, LedgerError>>,
    {
        let cell = self.cell(chain);
        cell.get_or_init(|| async {
            match with_retry(&self.policy, "resolve_collateral_token", fetch).await {
                Ok(address) => {
                    tracing::debug!(%chain, %address, "collateral token resolved");
                    address
                }
                Err(err) => {
                    tracing::warn!(
                        %chain,
                        error = %err,
                        %fallback,
                        "token resolution exhausted retries, using fallback"
                    );
                    fallback.clone()
                }
            }
        })
        .await
        .clone()
    }

    /// The cached address, if any, without triggering a fetch.
    pub fn peek(&self, chain: ChainId) -> Option<Address> {
        let cells = self.cells.lock().unwrap();
        cells.get(&chain).and_then(|cell| cell.get().cloned())
    }

    /// Drop the cached entry for `chain`; the next resolve fetches again.
    pub fn reset(&self, chain: ChainId) {
        let mut cells = self.cells.lock().unwrap();
        cells.remove(&chain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    fn transport(msg: &str) -> LedgerError {
        LedgerError::Transport { message: msg.to_string() }
    }

    #[test]
    fn backoff_schedule_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_follow_the_backoff_schedule() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = with_retry(&fast_policy(), "flaky_read", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(transport("reset"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1000ms after attempt 1, 2000ms after attempt 2
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_the_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LedgerError> = with_retry(&fast_policy(), "dead_read", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(transport(&format!("failure {}", n))) }
        })
        .await;
        assert_eq!(result, Err(transport("failure 3")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_stops_retrying() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), "healthy_read", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, LedgerError>(42) }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_resolves_share_one_fetch() {
        let cache = TokenAddressCache::new(fast_policy());
        let fallback = Address::zero();
        let fetches = AtomicU32::new(0);
        let chain = ChainId(114);
        let fetch = || {
            fetches.fetch_add(1, Ordering::SeqCst);
            async { Ok(Address::new("0xtoken")) }
        };
        let (a, b) = futures::join!(
            cache.resolve(chain, &fallback, fetch),
            cache.resolve(chain, &fallback, fetch)
        );
        assert_eq!(a, Address::new("0xtoken"));
        assert_eq!(b, Address::new("0xtoken"));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn chains_are_cached_independently() {
        let cache = TokenAddressCache::new(fast_policy());
        let fallback = Address::zero();
        let a = cache
            .resolve(ChainId(114), &fallback, || async { Ok(Address::new("0xaaa")) })
            .await;
        let b = cache
            .resolve(ChainId(296), &fallback, || async { Ok(Address::new("0xbbb")) })
            .await;
        assert_eq!(a, Address::new("0xaaa"));
        assert_eq!(b, Address::new("0xbbb"));
        assert_eq!(cache.peek(ChainId(114)), Some(Address::new("0xaaa")));
        assert_eq!(cache.peek(ChainId(296)), Some(Address::new("0xbbb")));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_resolution_installs_the_fallback_permanently() {
        let fallback = Address::new("0xfallback");
        let cache = TokenAddressCache::new(fast_policy());
        let fetches = AtomicU32::new(0);
        let chain = ChainId(114);
        let failing = || {
            fetches.fetch_add(1, Ordering::SeqCst);
            async { Err(transport("down")) }
        };
        assert_eq!(cache.resolve(chain, &fallback, failing).await, fallback);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);

        // the fallback sticks; no further fetches even from a healthy endpoint
        let resolved = cache
            .resolve(chain, &fallback, || async { Ok(Address::new("0xtoken")) })
            .await;
        assert_eq!(resolved, fallback);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forces_a_refetch() {
        let cache = TokenAddressCache::new(fast_policy());
        let fallback = Address::zero();
        let chain = ChainId(114);
        cache.resolve(chain, &fallback, || async { Err(transport("down")) }).await;
        assert_eq!(cache.peek(chain), Some(Address::zero()));

        cache.reset(chain);
        assert_eq!(cache.peek(chain), None);
        let resolved = cache
            .resolve(chain, &fallback, || async { Ok(Address::new("0xtoken")) })
            .await;
        assert_eq!(resolved, Address::new("0xtoken"));
    }
}
