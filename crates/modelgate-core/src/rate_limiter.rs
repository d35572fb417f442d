use std::sync::{atomic::AtomicU64, Arc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use modelgate_common::RateLimitConfig;

use crate::shared_store::SharedStore;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: f64,
    pub retry_after: Option<u64>,
}

/// Sliding-window admission control over a shared ordered set.
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    sequence: AtomicU64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            sequence: AtomicU64::new(0),
        }
    }

    /// Admits one request for `identifier` against `limit` within `window`:
    /// evict expired entries, read cardinality, reject or admit.
    pub async fn check(
        &self,
        identifier_type: &str,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitResult {
        let key = format!("rate_limit:{identifier_type}:{identifier}");
        let now = now_secs();
        let min_score = now - window.as_secs_f64();
        let member = self.sequence.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let before = self.store.sorted_set_admit(&key, member, now, min_score).await;

        if before >= limit as u64 {
            self.store.sorted_set_remove(&key, member).await;
            let oldest = self.store.sorted_set_min_score(&key).await;
            let reset_time = oldest.unwrap_or(now) + window.as_secs_f64();
            let retry_after = ((reset_time - now).ceil().max(1.0)) as u64;
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_time,
                retry_after: Some(retry_after),
            };
        }

        RateLimitResult {
            allowed: true,
            remaining: limit.saturating_sub(before as u32 + 1),
            reset_time: now + window.as_secs_f64(),
            retry_after: None,
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Names of the checks the composite limiter can fail. The first failing
/// name short-circuits admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDimension {
    GlobalRpm,
    GlobalTpm,
    KeyRpm,
    KeyTpm,
    AddressRpm,
}

impl RateLimitDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitDimension::GlobalRpm => "global_rpm",
            RateLimitDimension::GlobalTpm => "global_tpm",
            RateLimitDimension::KeyRpm => "key_rpm",
            RateLimitDimension::KeyTpm => "key_tpm",
            RateLimitDimension::AddressRpm => "address_rpm",
        }
    }
}

pub struct CompositeCheckOutcome {
    pub failing: Option<(RateLimitDimension, RateLimitResult)>,
}

impl CompositeCheckOutcome {
    pub fn allowed(&self) -> bool {
        self.failing.is_none()
    }
}

/// Runs every applicable dimension via `check_request(api_key?, client_addr?, estimated_tokens)`.
pub struct CompositeRateLimiter {
    limiter: RateLimiter,
    config: RateLimitConfig,
}

impl CompositeRateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, config: RateLimitConfig) -> Self {
        Self {
            limiter: RateLimiter::new(store),
            config,
        }
    }

    pub async fn check_request(
        &self,
        api_key: Option<&str>,
        client_addr: Option<&str>,
        estimated_tokens: u32,
    ) -> CompositeCheckOutcome {
        let window = Duration::from_secs(self.config.window_seconds);

        let checks: Vec<(RateLimitDimension, &str, &str, u32)> = {
            let mut v = vec![(
                RateLimitDimension::GlobalRpm,
                "global",
                "global",
                self.config.global_rpm,
            )];
            if estimated_tokens > 0 {
                v.push((
                    RateLimitDimension::GlobalTpm,
                    "global",
                    "global_tokens",
                    self.config.global_tpm,
                ));
            }
            if let Some(key) = api_key {
                v.push((RateLimitDimension::KeyRpm, "api_key", key, self.config.per_key_rpm));
                if estimated_tokens > 0 {
                    v.push((
                        RateLimitDimension::KeyTpm,
                        "api_key_tokens",
                        key,
                        self.config.per_key_tpm,
                    ));
                }
            }
            if let Some(addr) = client_addr {
                v.push((
                    RateLimitDimension::AddressRpm,
                    "address",
                    addr,
                    self.config.per_address_rpm,
                ));
            }
            v
        };

        for (dimension, identifier_type, identifier, limit) in checks {
            let result = self.limiter.check(identifier_type, identifier, limit, window).await;
            if !result.allowed {
                return CompositeCheckOutcome {
                    failing: Some((dimension, result)),
                };
            }
        }

        CompositeCheckOutcome { failing: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_store::InMemorySharedStore;

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects_with_retry_after() {
        let limiter = RateLimiter::new(InMemorySharedStore::new());
        let window = Duration::from_secs(60);

        let first = limiter.check("api_key", "tok-a", 1, window).await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        let second = limiter.check("api_key", "tok-a", 1, window).await;
        assert!(!second.allowed);
        assert!(second.retry_after.is_some());
    }

    #[tokio::test]
    async fn independent_identifiers_do_not_share_budget() {
        let limiter = RateLimiter::new(InMemorySharedStore::new());
        let window = Duration::from_secs(60);
        assert!(limiter.check("api_key", "a", 1, window).await.allowed);
        assert!(limiter.check("api_key", "b", 1, window).await.allowed);
    }
}
