//! Per-tenant admission control: a token-bucket rate limiter and a
//! concurrency gate for in-flight jobs.
//!
//! Both gates live in process memory. Buckets reset on restart; the
//! concurrency gate is rebuilt at startup from a `GROUP BY` over RUNNING
//! rows. Neither is distributed — multiple API instances multiply a
//! tenant's effective budget.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// Lazily-refilled token bucket.
///
/// Capacity equals the tenant's per-minute limit; refill is computed
/// from the elapsed time on each check rather than by a timer task.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_limit_per_minute: i32) -> Self {
        let capacity = rate_limit_per_minute.max(0) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }

    /// Re-cap the bucket when the tenant's configured limit changed.
    fn resize(&mut self, rate_limit_per_minute: i32) {
        let capacity = rate_limit_per_minute.max(0) as f64;
        if (capacity - self.capacity).abs() > f64::EPSILON {
            self.capacity = capacity;
            self.refill_per_sec = capacity / 60.0;
            self.tokens = self.tokens.min(capacity);
        }
    }
}

/// Process-local admission gates, keyed by tenant id.
pub struct Admission {
    buckets: RwLock<HashMap<String, TokenBucket>>,
    in_flight: RwLock<HashMap<String, u32>>,
}

impl Admission {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            in_flight: RwLock::new(HashMap::new()),
        }
    }

    /// Take one token from the tenant's bucket. Returns false when the
    /// bucket is empty (or the tenant's limit is zero).
    pub async fn try_acquire_rate(&self, tenant_id: &str, rate_limit_per_minute: i32) -> bool {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(tenant_id.to_string())
            .or_insert_with(|| TokenBucket::new(rate_limit_per_minute));
        bucket.resize(rate_limit_per_minute);
        bucket.try_acquire(Instant::now())
    }

    /// Return one token, capped at capacity. Used when a submission turns
    /// out not to be a new unit of work (idempotency hit) or fails after
    /// the gate was passed.
    pub async fn refund_rate(&self, tenant_id: &str) {
        let mut buckets = self.buckets.write().await;
        if let Some(bucket) = buckets.get_mut(tenant_id) {
            bucket.refund();
        }
    }

    /// Reserve an in-flight slot if the tenant is under its cap.
    pub async fn try_reserve(&self, tenant_id: &str, max_concurrent: i32) -> bool {
        let mut in_flight = self.in_flight.write().await;
        let count = in_flight.entry(tenant_id.to_string()).or_insert(0);
        if (*count as i64) < max_concurrent.max(0) as i64 {
            *count += 1;
            true
        } else {
            false
        }
    }

    /// Release an in-flight slot on a terminal transition or lease reclaim.
    pub async fn release(&self, tenant_id: &str) {
        let mut in_flight = self.in_flight.write().await;
        if let Some(count) = in_flight.get_mut(tenant_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Replace the in-flight counts wholesale, from a
    /// `COUNT(*) WHERE status = 'running' GROUP BY tenant_id` at startup.
    pub async fn rebuild(&self, counts: HashMap<String, i64>) {
        let mut in_flight = self.in_flight.write().await;
        in_flight.clear();
        for (tenant_id, count) in counts {
            in_flight.insert(tenant_id, count.max(0) as u32);
        }
    }

    pub async fn in_flight_count(&self, tenant_id: &str) -> u32 {
        self.in_flight
            .read()
            .await
            .get(tenant_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for Admission {
    fn default() -> Self {
        Self::new()
    }
}
