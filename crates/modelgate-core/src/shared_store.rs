use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Atomic sorted-set, increment, and TTL primitives backing rate limits,
/// round-robin cursors, and circuit-breaker state. Cross-task coordination
/// stays in-process rather than reaching for Redis; this trait is the seam
/// a Redis-backed implementation would plug into for a multi-process
/// deployment, with `InMemorySharedStore` as the default.
#[async_trait::async_trait]
pub trait SharedStore: Send + Sync {
    /// Removes entries with score < `min_score`, then inserts `member` with
    /// `score`, then returns the cardinality *before* the insert. Atomic
    /// against concurrent callers for the same key.
    async fn sorted_set_admit(&self, key: &str, member: u64, score: f64, min_score: f64) -> u64;

    /// Removes `member` from the set (used to roll back a rejected admission).
    async fn sorted_set_remove(&self, key: &str, member: u64);

    /// The smallest score currently in the set, if any.
    async fn sorted_set_min_score(&self, key: &str) -> Option<f64>;

    /// Increments a counter keyed by `key`, resetting its TTL to `ttl` on
    /// first increment, and returns the new value.
    async fn incr_with_expiry(&self, key: &str, by: i64, ttl: Duration) -> i64;

    async fn get_counter(&self, key: &str) -> i64;

    /// `round_robin:provider:{id}`-style cursor with a 1-hour idle expiry.
    async fn next_round_robin_index(&self, key: &str, modulo: usize, ttl: Duration) -> usize;
}

#[derive(Default)]
struct CounterEntry {
    value: i64,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct RoundRobinEntry {
    index: usize,
    expires_at: Option<Instant>,
}

pub struct InMemorySharedStore {
    sorted_sets: Mutex<HashMap<String, BTreeMap<(u64, u64), ()>>>,
    counters: Mutex<HashMap<String, CounterEntry>>,
    round_robin: Mutex<HashMap<String, RoundRobinEntry>>,
}

impl InMemorySharedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sorted_sets: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            round_robin: Mutex::new(HashMap::new()),
        })
    }

    fn score_bits(score: f64) -> u64 {
        score.to_bits()
    }
}

#[async_trait::async_trait]
impl SharedStore for InMemorySharedStore {
    async fn sorted_set_admit(&self, key: &str, member: u64, score: f64, min_score: f64) -> u64 {
        let mut sets = self.sorted_sets.lock().await;
        let set = sets.entry(key.to_string()).or_default();
        set.retain(|(s, _), _| f64::from_bits(*s) >= min_score);
        let before = set.len() as u64;
        set.insert((Self::score_bits(score), member), ());
        before
    }

    async fn sorted_set_remove(&self, key: &str, member: u64) {
        let mut sets = self.sorted_sets.lock().await;
        if let Some(set) = sets.get_mut(key) {
            set.retain(|(_, m), _| *m != member);
        }
    }

    async fn sorted_set_min_score(&self, key: &str) -> Option<f64> {
        let sets = self.sorted_sets.lock().await;
        sets.get(key)
            .and_then(|set| set.keys().next().map(|(s, _)| f64::from_bits(*s)))
    }

    async fn incr_with_expiry(&self, key: &str, by: i64, ttl: Duration) -> i64 {
        let mut counters = self.counters.lock().await;
        let now = Instant::now();
        let entry = counters.entry(key.to_string()).or_default();
        if entry.expires_at.is_some_and(|deadline| deadline <= now) {
            entry.value = 0;
        }
        entry.value += by;
        entry.expires_at = Some(now + ttl);
        entry.value
    }

    async fn get_counter(&self, key: &str) -> i64 {
        let counters = self.counters.lock().await;
        match counters.get(key) {
            Some(entry) if entry.expires_at.is_none_or(|d| d > Instant::now()) => entry.value,
            _ => 0,
        }
    }

    async fn next_round_robin_index(&self, key: &str, modulo: usize, ttl: Duration) -> usize {
        if modulo == 0 {
            return 0;
        }
        let mut table = self.round_robin.lock().await;
        let now = Instant::now();
        let entry = table.entry(key.to_string()).or_default();
        if entry.expires_at.is_some_and(|deadline| deadline <= now) {
            entry.index = 0;
        }
        let current = entry.index % modulo;
        entry.index = (entry.index + 1) % modulo;
        entry.expires_at = Some(now + ttl);
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sliding_window_admits_no_more_than_limit() {
        let store = InMemorySharedStore::new();
        let limit = 3u64;
        let mut admitted = 0;
        for i in 0..5u64 {
            let before = store.sorted_set_admit("rl:x", i, i as f64, -1.0).await;
            if before < limit {
                admitted += 1;
            } else {
                store.sorted_set_remove("rl:x", i).await;
            }
        }
        assert_eq!(admitted, limit);
    }

    #[tokio::test]
    async fn round_robin_cycles_through_modulo() {
        let store = InMemorySharedStore::new();
        let seq: Vec<usize> = futures(&store, 5).await;
        assert_eq!(seq, vec![0, 1, 2, 0, 1]);
    }

    async fn futures(store: &InMemorySharedStore, n: usize) -> Vec<usize> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(
                store
                    .next_round_robin_index("rr:p", 3, Duration::from_secs(3600))
                    .await,
            );
        }
        out
    }
}
