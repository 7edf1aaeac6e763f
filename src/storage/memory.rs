//! In-memory object store.
//!
//! Buckets and objects live in a `tokio::sync::RwLock` shared by every
//! handle cloned from the same [`MemoryStore`], so handles behave like
//! separate clients of one server.  Every `put_object` call is also recorded
//! in order, which lets tests assert on upload counts and sequencing.
//!
//! [`MemoryConnector`] can fail a configurable number of connection attempts
//! and [`MemoryStore::fail_next_puts`] injects upload failures.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::backend::{compute_etag, Connect, ObjectStore, StoreFuture};

/// One recorded `put_object` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PutRecord {
    pub bucket: String,
    pub key: String,
    pub data: Bytes,
}

#[derive(Default)]
struct MemoryState {
    buckets: HashSet<String>,
    /// (bucket, key) -> (data, etag).
    objects: HashMap<(String, String), (Bytes, String)>,
    /// Successful puts, oldest first.
    puts: Vec<PutRecord>,
    /// Number of upcoming puts to reject.
    failing_puts: u32,
}

/// In-memory store; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<tokio::sync::RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` uploads with a store error.
    pub async fn fail_next_puts(&self, n: u32) {
        self.state.write().await.failing_puts = n;
    }

    /// Every successful upload so far, oldest first.
    pub async fn puts(&self) -> Vec<PutRecord> {
        self.state.read().await.puts.clone()
    }

    /// Current content of `bucket/key`.
    pub async fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state
            .read()
            .await
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(data, _etag)| data.clone())
    }

    /// Number of distinct objects across all buckets.
    pub async fn object_count(&self) -> usize {
        self.state.read().await.objects.len()
    }

    pub async fn has_bucket(&self, bucket: &str) -> bool {
        self.state.read().await.buckets.contains(bucket)
    }
}

// ── ObjectStore implementation ─────────────────────────────────────────

impl ObjectStore for MemoryStore {
    fn bucket_exists(&self, bucket: &str) -> StoreFuture<'_, bool> {
        let bucket = bucket.to_string();
        Box::pin(async move { Ok(self.state.read().await.buckets.contains(&bucket)) })
    }

    fn make_bucket(&self, bucket: &str) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.state.write().await.buckets.insert(bucket);
            Ok(())
        })
    }

    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreFuture<'_, String> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            if state.failing_puts > 0 {
                state.failing_puts -= 1;
                anyhow::bail!("injected put failure for {bucket}/{key}");
            }
            if !state.buckets.contains(&bucket) {
                anyhow::bail!("The specified bucket does not exist: {bucket}");
            }

            let etag = compute_etag(&data);
            state
                .objects
                .insert((bucket.clone(), key.clone()), (data.clone(), etag.clone()));
            state.puts.push(PutRecord { bucket, key, data });
            Ok(etag)
        })
    }
}

/// Hands out [`MemoryStore`] handles, optionally failing the first attempts.
pub struct MemoryConnector {
    store: MemoryStore,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self::failing_first(store, 0)
    }

    /// A connector whose first `failures` attempts report the store as
    /// unreachable.
    pub fn failing_first(store: MemoryStore, failures: u32) -> Self {
        Self {
            store,
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Connection attempts made so far, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connect for MemoryConnector {
    fn connect(&self) -> StoreFuture<'_, Box<dyn ObjectStore>> {
        Box::pin(async move {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                anyhow::bail!("connection refused (attempt {attempt})");
            }
            Ok(Box::new(self.store.clone()) as Box<dyn ObjectStore>)
        })
    }

    fn endpoint(&self) -> String {
        "memory://".to_string()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
