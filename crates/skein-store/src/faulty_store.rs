//! A [`ListStore`] wrapper that injects latency and failures.
//!
//! `FaultyStore` wraps any `Arc<dyn ListStore>`. It can sleep a random
//! duration before each call, fail calls at a configured rate, and replay a
//! script of specific faults. The RNG is seeded so chaos runs reproduce.
//!
//! # Example
//!
//! ```ignore
//! let faulty = FaultyStore::new(inner, "redis-01")
//!     .latency(1, 5)          // 1–5 ms per call
//!     .failure_rate(0.05)     // 5% of calls fail
//!     .seed(42);
//! faulty.script([Fault::Client, Fault::Timeout]);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::StoreError;
use crate::traits::{ConnectionParams, Connector, ListStore};

/// A failure to inject into one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail with [`StoreError::Client`].
    Client,
    /// Fail with [`StoreError::Timeout`].
    Timeout,
    /// Fail with [`StoreError::Backend`].
    Backend,
    /// Sleep this long, then run the call normally.
    Stall(Duration),
}

/// A [`ListStore`] wrapper that injects latency and failures before calls.
pub struct FaultyStore {
    inner: Arc<dyn ListStore>,
    host: String,
    latency_ms: (u64, u64),
    failure_rate: f64,
    script: Mutex<VecDeque<Fault>>,
    dead: AtomicBool,
    rng: Mutex<StdRng>,
}

impl FaultyStore {
    /// Wrap an existing session with no latency and no failures.
    pub fn new(inner: Arc<dyn ListStore>, host: impl Into<String>) -> Self {
        Self {
            inner,
            host: host.into(),
            latency_ms: (0, 0),
            failure_rate: 0.0,
            script: Mutex::new(VecDeque::new()),
            dead: AtomicBool::new(false),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    /// Set the per-call latency range in milliseconds (uniform random).
    pub fn latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = (min_ms, max_ms);
        self
    }

    /// Fraction of calls, in `[0, 1]`, that fail with a random fault.
    pub fn failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Queue faults to apply to the next calls, one per call, in order.
    pub fn script(&self, faults: impl IntoIterator<Item = Fault>) {
        self.script.lock().expect("lock poisoned").extend(faults);
    }

    /// Make [`ListStore::is_alive`] report `false` (calls still go through).
    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    fn next_fault(&self) -> Option<Fault> {
        if let Some(fault) = self.script.lock().expect("lock poisoned").pop_front() {
            return Some(fault);
        }
        if self.failure_rate <= 0.0 {
            return None;
        }
        let mut rng = self.rng.lock().expect("lock poisoned");
        if rng.random_bool(self.failure_rate) {
            Some(match rng.random_range(0..3) {
                0 => Fault::Client,
                1 => Fault::Timeout,
                _ => Fault::Backend,
            })
        } else {
            None
        }
    }

    /// Apply latency and any pending fault ahead of a call.
    async fn before_call(&self) -> Result<(), StoreError> {
        let (min, max) = self.latency_ms;
        if max > 0 {
            let ms = if min == max {
                min
            } else {
                self.rng.lock().expect("lock poisoned").random_range(min..=max)
            };
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        match self.next_fault() {
            None => Ok(()),
            Some(Fault::Client) => Err(StoreError::Client {
                host: self.host.clone(),
                message: "injected protocol error".to_string(),
            }),
            Some(Fault::Timeout) => Err(StoreError::Timeout(Duration::ZERO)),
            Some(Fault::Backend) => Err(StoreError::Backend("injected failure".to_string())),
            Some(Fault::Stall(pause)) => {
                tokio::time::sleep(pause).await;
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl ListStore for FaultyStore {
    async fn len(&self, key: &str) -> Result<u64, StoreError> {
        self.before_call().await?;
        self.inner.len(key).await
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>, StoreError> {
        self.before_call().await?;
        self.inner.range(key, start, stop).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.before_call().await?;
        self.inner.delete(key).await
    }

    async fn push_back(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError> {
        self.before_call().await?;
        self.inner.push_back(key, values).await
    }

    async fn push_back_if_exists(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError> {
        self.before_call().await?;
        self.inner.push_back_if_exists(key, values).await
    }

    async fn push_front_if_exists(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError> {
        self.before_call().await?;
        self.inner.push_front_if_exists(key, values).await
    }

    async fn remove(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        self.before_call().await?;
        self.inner.remove(key, value).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.before_call().await?;
        self.inner.expire(key, ttl).await
    }

    async fn quit(&self) -> Result<(), StoreError> {
        self.inner.quit().await
    }

    fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::Acquire) && self.inner.is_alive()
    }
}

/// A [`Connector`] that wraps every session it opens in a [`FaultyStore`].
///
/// Each session gets its own seed derived from the base seed and the number
/// of sessions opened so far.
pub struct FaultyConnector {
    inner: Arc<dyn Connector>,
    latency_ms: (u64, u64),
    failure_rate: f64,
    seed: u64,
    opened: Mutex<u64>,
}

impl FaultyConnector {
    /// Wrap `inner` with no latency and no failures.
    pub fn new(inner: Arc<dyn Connector>) -> Self {
        Self {
            inner,
            latency_ms: (0, 0),
            failure_rate: 0.0,
            seed: 0,
            opened: Mutex::new(0),
        }
    }

    /// Per-call latency range for every session.
    pub fn latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = (min_ms, max_ms);
        self
    }

    /// Failure rate for every session.
    pub fn failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate;
        self
    }

    /// Base RNG seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[async_trait::async_trait]
impl Connector for FaultyConnector {
    async fn connect(
        &self,
        host: &str,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn ListStore>, StoreError> {
        let session = self.inner.connect(host, params).await?;
        let n = {
            let mut opened = self.opened.lock().expect("lock poisoned");
            *opened += 1;
            *opened
        };
        Ok(Arc::new(
            FaultyStore::new(session, host)
                .latency(self.latency_ms.0, self.latency_ms.1)
                .failure_rate(self.failure_rate)
                .seed(self.seed.wrapping_add(n)),
        ))
    }
}
