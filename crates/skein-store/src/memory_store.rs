//! In-memory list engine.
//!
//! [`MemoryListStore`] holds one host's keyspace. [`MemoryBackend`] is a
//! [`Connector`] over many such keyspaces: every session it opens to a host
//! sees the same data, the way several client connections to one backend
//! server would.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{ConnectionParams, Connector, ListStore};

struct MemoryList {
    values: VecDeque<Bytes>,
    expires_at: Option<Instant>,
}

impl MemoryList {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// One host's keyspace of lists, backed by a `RwLock<HashMap>`.
///
/// Key expiration follows the tokio clock, so tests can drive it with
/// `tokio::time::advance`.
#[derive(Default)]
pub struct MemoryListStore {
    lists: RwLock<HashMap<String, MemoryList>>,
}

impl MemoryListStore {
    /// Create an empty keyspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a whole list (for tests and diagnostics).
    pub fn snapshot(&self, key: &str) -> Vec<Bytes> {
        let map = self.lists.read().expect("lock poisoned");
        match map.get(key) {
            Some(list) if !list.is_expired(Instant::now()) => list.values.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        let map = self.lists.read().expect("lock poisoned");
        map.values().filter(|l| !l.is_expired(now)).count()
    }

    /// Drop the list if it has expired, then run `f` against whatever is left.
    fn with_list_mut<T>(&self, key: &str, f: impl FnOnce(Option<&mut MemoryList>) -> T) -> T {
        let mut map = self.lists.write().expect("lock poisoned");
        if map.get(key).is_some_and(|l| l.is_expired(Instant::now())) {
            debug!(key, "list expired");
            map.remove(key);
        }
        f(map.get_mut(key))
    }
}

/// Translate inclusive, possibly negative `start..=stop` into a slice range.
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait::async_trait]
impl ListStore for MemoryListStore {
    async fn len(&self, key: &str) -> Result<u64, StoreError> {
        let map = self.lists.read().expect("lock poisoned");
        Ok(match map.get(key) {
            Some(list) if !list.is_expired(Instant::now()) => list.values.len() as u64,
            _ => 0,
        })
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>, StoreError> {
        let map = self.lists.read().expect("lock poisoned");
        let Some(list) = map.get(key).filter(|l| !l.is_expired(Instant::now())) else {
            return Ok(Vec::new());
        };
        Ok(match normalize_range(list.values.len(), start, stop) {
            Some((from, to)) => list.values.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut map = self.lists.write().expect("lock poisoned");
        let removed = map.remove(key);
        Ok(removed.is_some_and(|l| !l.is_expired(Instant::now())))
    }

    async fn push_back(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError> {
        let mut map = self.lists.write().expect("lock poisoned");
        let now = Instant::now();
        let list = map.entry(key.to_string()).or_insert_with(|| MemoryList {
            values: VecDeque::new(),
            expires_at: None,
        });
        if list.is_expired(now) {
            list.values.clear();
            list.expires_at = None;
        }
        list.values.extend(values.iter().cloned());
        Ok(list.values.len() as u64)
    }

    async fn push_back_if_exists(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError> {
        Ok(self.with_list_mut(key, |list| match list {
            Some(list) => {
                list.values.extend(values.iter().cloned());
                list.values.len() as u64
            }
            None => 0,
        }))
    }

    async fn push_front_if_exists(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError> {
        Ok(self.with_list_mut(key, |list| match list {
            Some(list) => {
                for value in values {
                    list.values.push_front(value.clone());
                }
                list.values.len() as u64
            }
            None => 0,
        }))
    }

    async fn remove(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        let mut map = self.lists.write().expect("lock poisoned");
        let Some(list) = map.get_mut(key).filter(|l| !l.is_expired(Instant::now())) else {
            return Ok(0);
        };
        let before = list.values.len();
        list.values.retain(|v| v.as_ref() != value);
        let removed = (before - list.values.len()) as u64;
        // An emptied list ceases to exist.
        if list.values.is_empty() {
            map.remove(key);
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self.with_list_mut(key, |list| match list {
            Some(list) => {
                list.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }))
    }

    async fn quit(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn is_alive(&self) -> bool {
        true
    }
}

/// A session to one host of a [`MemoryBackend`].
///
/// Shares the host's keyspace; fails every call after [`ListStore::quit`].
pub struct MemorySession {
    host: String,
    store: Arc<MemoryListStore>,
    open: AtomicBool,
}

impl MemorySession {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Closed(self.host.clone()))
        }
    }
}

#[async_trait::async_trait]
impl ListStore for MemorySession {
    async fn len(&self, key: &str) -> Result<u64, StoreError> {
        self.check_open()?;
        self.store.len(key).await
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>, StoreError> {
        self.check_open()?;
        self.store.range(key, start, stop).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check_open()?;
        self.store.delete(key).await
    }

    async fn push_back(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError> {
        self.check_open()?;
        self.store.push_back(key, values).await
    }

    async fn push_back_if_exists(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError> {
        self.check_open()?;
        self.store.push_back_if_exists(key, values).await
    }

    async fn push_front_if_exists(&self, key: &str, values: &[Bytes]) -> Result<u64, StoreError> {
        self.check_open()?;
        self.store.push_front_if_exists(key, values).await
    }

    async fn remove(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        self.check_open()?;
        self.store.remove(key, value).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_open()?;
        self.store.expire(key, ttl).await
    }

    async fn quit(&self) -> Result<(), StoreError> {
        // A second quit is an error, like sending QUIT on a closed socket.
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(host = %self.host, "memory session closed");
            Ok(())
        } else {
            Err(StoreError::Closed(self.host.clone()))
        }
    }

    fn is_alive(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// A set of in-memory hosts reachable through the [`Connector`] trait.
///
/// Hosts are created on first connect. A host marked down refuses new
/// sessions; existing sessions keep working.
#[derive(Default)]
pub struct MemoryBackend {
    hosts: RwLock<HashMap<String, Arc<MemoryListStore>>>,
    down: RwLock<HashSet<String>>,
    connects: AtomicU64,
}

impl MemoryBackend {
    /// Create a backend with no hosts.
    pub fn new() -> Self {
        Self::default()
    }

    /// The keyspace of `host`, created if needed.
    pub fn host(&self, host: &str) -> Arc<MemoryListStore> {
        if let Some(store) = self.hosts.read().expect("lock poisoned").get(host) {
            return store.clone();
        }
        self.hosts
            .write()
            .expect("lock poisoned")
            .entry(host.to_string())
            .or_default()
            .clone()
    }

    /// Refuse (or accept again) new sessions to `host`.
    pub fn set_down(&self, host: &str, down: bool) {
        let mut set = self.down.write().expect("lock poisoned");
        if down {
            set.insert(host.to_string());
        } else {
            set.remove(host);
        }
    }

    /// Total sessions opened so far.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Connector for MemoryBackend {
    async fn connect(
        &self,
        host: &str,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn ListStore>, StoreError> {
        if self.down.read().expect("lock poisoned").contains(host) {
            return Err(StoreError::Connect {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.connects.fetch_add(1, Ordering::Relaxed);
        debug!(host, pipeline = params.pipeline, "opening memory session");
        Ok(Arc::new(MemorySession {
            host: host.to_string(),
            store: self.host(host),
            open: AtomicBool::new(true),
        }))
    }
}
