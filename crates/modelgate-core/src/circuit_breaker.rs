use std::collections::HashMap;
use std::time::Duration;

use modelgate_common::{CircuitBreakerConfig, ProviderId};
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug, Clone, Copy)]
struct BreakerEntry {
    state: State,
    failures: u32,
    failures_expire_at: Option<Instant>,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: State::Closed,
            failures: 0,
            failures_expire_at: None,
        }
    }
}

/// Per-provider three-state health gate backed by shared in-process state.
/// A real multi-process deployment would back this with
/// `circuit_breaker:{provider_id}:{state|failures}` keys against the
/// `SharedStore`; kept as a dedicated map here because its state machine
/// (not just TTLs) needs compare-and-swap semantics a generic sorted set
/// does not give for free.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    entries: RwLock<HashMap<ProviderId, BreakerEntry>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// `true` if a request may be attempted against `provider_id` right now.
    pub async fn admit(&self, provider_id: ProviderId) -> bool {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(provider_id).or_default();
        let now = Instant::now();

        match entry.state {
            State::Closed => true,
            State::Open { until } if now < until => false,
            State::Open { .. } => {
                entry.state = State::HalfOpen {
                    probe_in_flight: true,
                };
                true
            }
            State::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    false
                } else {
                    entry.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    true
                }
            }
        }
    }

    pub async fn record_success(&self, provider_id: ProviderId) {
        let mut entries = self.entries.write().await;
        entries.insert(provider_id, BreakerEntry::default());
    }

    pub async fn record_failure(&self, provider_id: ProviderId) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(provider_id).or_default();
        let now = Instant::now();
        let recovery = Duration::from_secs(self.config.recovery_timeout_seconds);

        if entry.failures_expire_at.is_none_or(|expiry| expiry <= now) {
            entry.failures = 0;
        }
        entry.failures += 1;
        entry.failures_expire_at = Some(now + recovery);

        let was_half_open = matches!(entry.state, State::HalfOpen { .. });
        if was_half_open || entry.failures >= self.config.failure_threshold {
            entry.state = State::Open {
                until: now + recovery,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, recovery_secs: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout_seconds: recovery_secs,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_and_blocks_admission() {
        let breaker = CircuitBreaker::new(config(3, 60));
        for _ in 0..3 {
            assert!(breaker.admit(1).await);
            breaker.record_failure(1).await;
        }
        assert!(!breaker.admit(1).await);
    }

    #[tokio::test]
    async fn success_resets_failure_counter() {
        let breaker = CircuitBreaker::new(config(3, 60));
        breaker.record_failure(1).await;
        breaker.record_failure(1).await;
        breaker.record_success(1).await;
        breaker.record_failure(1).await;
        assert!(breaker.admit(1).await, "single failure after reset must not open");
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        tokio::time::pause();
        let breaker = CircuitBreaker::new(config(1, 1));
        breaker.record_failure(1).await;
        assert!(!breaker.admit(1).await);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(breaker.admit(1).await, "ttl expired must allow exactly one probe");
        assert!(!breaker.admit(1).await, "second concurrent admission must be blocked");

        breaker.record_failure(1).await;
        assert!(!breaker.admit(1).await, "failed probe must reopen the breaker");
    }
}
