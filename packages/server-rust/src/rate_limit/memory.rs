//! In-process fixed-window counter store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{retry_after_secs, Decision, RateLimitPolicy, RateLimitStore};

/// Request counter for one client address within one window.
#[derive(Debug, Clone, Copy)]
struct ClientWindow {
    count: u32,
    reset_at: Instant,
}

impl ClientWindow {
    fn fresh(now: Instant, policy: &RateLimitPolicy) -> Self {
        Self {
            count: 1,
            reset_at: now + policy.window,
        }
    }
}

/// Fixed-window store backed by a sharded concurrent map.
///
/// The read-modify-write of a window happens while holding that key's
/// shard lock, so simultaneous requests from one address never lose
/// increments. The lock is never held across an `.await`.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    windows: DashMap<String, ClientWindow>,
}

impl MemoryRateLimitStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one request for `key` as observed at `now`.
    pub fn check_at(&self, key: &str, policy: &RateLimitPolicy, now: Instant) -> Decision {
        let window = match self.windows.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();
                if now >= window.reset_at {
                    *window = ClientWindow::fresh(now, policy);
                } else {
                    window.count = window.count.saturating_add(1);
                }
                *window
            }
            Entry::Vacant(vacant) => *vacant.insert(ClientWindow::fresh(now, policy)),
        };

        if window.count > policy.limit {
            Decision::Deny {
                limit: policy.limit,
                retry_after_secs: retry_after_secs(window.reset_at.saturating_duration_since(now)),
            }
        } else {
            Decision::Allow {
                limit: policy.limit,
                remaining: policy.limit - window.count,
            }
        }
    }

    /// Removes windows that have expired as of `now`.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now);
        before.saturating_sub(self.windows.len())
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn check(&self, key: &str, policy: &RateLimitPolicy) -> Decision {
        self.check_at(key, policy, Instant::now())
    }

    async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    fn per_minute(limit: u32) -> RateLimitPolicy {
        RateLimitPolicy::new(limit, Duration::from_millis(60_000))
    }

    #[test]
    fn twenty_per_minute_scenario() {
        let store = MemoryRateLimitStore::new();
        let policy = per_minute(20);
        let start = Instant::now();

        for i in 0..20u32 {
            let now = start + Duration::from_millis(u64::from(i) * 1_000);
            let decision = store.check_at("A", &policy, now);
            assert_eq!(
                decision,
                Decision::Allow {
                    limit: 20,
                    remaining: 19 - i
                }
            );
        }

        let decision = store.check_at("A", &policy, start + Duration::from_secs(20));
        assert_eq!(
            decision,
            Decision::Deny {
                limit: 20,
                retry_after_secs: 40
            }
        );
    }

    #[test]
    fn new_window_after_reset_allows_again() {
        let store = MemoryRateLimitStore::new();
        let policy = per_minute(2);
        let start = Instant::now();

        assert!(store.check_at("A", &policy, start).is_allowed());
        assert!(store.check_at("A", &policy, start).is_allowed());
        assert!(!store.check_at("A", &policy, start).is_allowed());

        let later = start + Duration::from_secs(60);
        assert_eq!(
            store.check_at("A", &policy, later),
            Decision::Allow {
                limit: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn zero_limit_denies_everything() {
        let store = MemoryRateLimitStore::new();
        let policy = per_minute(0);
        let now = Instant::now();

        let first = store.check_at("A", &policy, now);
        assert!(!first.is_allowed());
        assert!(matches!(first, Decision::Deny { retry_after_secs, .. } if retry_after_secs > 0));
        assert!(!store.check_at("A", &policy, now).is_allowed());
    }

    #[test]
    fn clients_are_counted_independently() {
        let store = MemoryRateLimitStore::new();
        let policy = per_minute(1);
        let now = Instant::now();

        assert!(store.check_at("A", &policy, now).is_allowed());
        assert!(!store.check_at("A", &policy, now).is_allowed());
        assert!(store.check_at("B", &policy, now).is_allowed());
        assert_eq!(store.tracked_clients(), 2);
    }

    #[test]
    fn purge_removes_only_expired_windows() {
        let store = MemoryRateLimitStore::new();
        let start = Instant::now();

        store.check_at("short", &RateLimitPolicy::new(5, Duration::from_secs(1)), start);
        store.check_at("long", &per_minute(5), start);

        assert_eq!(store.purge_expired_at(start + Duration::from_secs(2)), 1);
        assert_eq!(store.tracked_clients(), 1);
        assert_eq!(store.purge_expired_at(start + Duration::from_secs(61)), 1);
        assert_eq!(store.tracked_clients(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_never_lose_updates() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let policy = per_minute(50);

        let mut handles = Vec::new();
        for _ in 0..200 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.check("same-client", &policy).await.is_allowed()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn check_uses_tokio_clock() {
        let store = MemoryRateLimitStore::new();
        let policy = RateLimitPolicy::new(1, Duration::from_secs(10));

        assert!(store.check("A", &policy).await.is_allowed());
        assert!(!store.check("A", &policy).await.is_allowed());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(store.check("A", &policy).await.is_allowed());
        assert_eq!(store.purge_expired().await, 0);
    }

    proptest! {
        #[test]
        fn allows_exactly_limit_within_one_window(limit in 0u32..64, extra in 1u32..16) {
            let store = MemoryRateLimitStore::new();
            let policy = per_minute(limit);
            let now = Instant::now();

            let allowed = (0..limit + extra)
                .filter(|_| store.check_at("k", &policy, now).is_allowed())
                .count();
            prop_assert_eq!(allowed, limit as usize);
        }
    }
}
