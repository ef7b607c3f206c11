//! In-memory object store
//!
//! Keeps objects in a [`HashMap`] behind an [`RwLock`] and simulates the
//! failures an S3 gateway produces: a missing bucket, a failing bucket
//! creation, flaky writes and corrupted reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::trace;

use super::{ObjectStore, StoreError, StoreResult};

/// Object store backed by process memory
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bucket: String,
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
    bucket_exists: Arc<AtomicBool>,
    fail_create: bool,
    put_failures: Arc<AtomicU32>,
    corrupt_reads: bool,
    create_calls: Arc<AtomicU32>,
}

impl MemoryStore {
    /// Create an empty store whose bucket already exists
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Arc::new(RwLock::new(HashMap::new())),
            bucket_exists: Arc::new(AtomicBool::new(true)),
            fail_create: false,
            put_failures: Arc::new(AtomicU32::new(0)),
            corrupt_reads: false,
            create_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Start without the bucket; writes fail until it is created
    pub fn without_bucket(self) -> Self {
        self.bucket_exists.store(false, Ordering::SeqCst);
        self
    }

    /// Make bucket creation fail
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Fail the next `count` writes with a generic error
    pub fn failing_puts(self, count: u32) -> Self {
        self.put_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Flip the first byte of every object read back
    pub fn corrupting_reads(mut self) -> Self {
        self.corrupt_reads = true;
        self
    }

    /// Number of bucket creation attempts
    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub async fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Every key, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, data: Bytes) -> StoreResult<()> {
        if !self.bucket_exists.load(Ordering::SeqCst) {
            return Err(StoreError::BucketNotFound);
        }
        let pending = self.put_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.put_failures.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Other("service unavailable".to_string()));
        }

        trace!("memory put {} ({} bytes)", key, data.len());
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        let data = self
            .object(key)
            .await
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if self.corrupt_reads && !data.is_empty() {
            let mut flipped = data.to_vec();
            flipped[0] ^= 0xff;
            return Ok(Bytes::from(flipped));
        }
        Ok(data)
    }

    async fn create_bucket(&self) -> StoreResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(StoreError::AccessDenied(format!(
                "not allowed to create bucket '{}'",
                self.bucket
            )));
        }
        self.bucket_exists.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new("b");
        store
            .put_object("k", Bytes::from_static(b"v"))
            .await
            .unwrap();
        assert_eq!(store.get_object("k").await.unwrap(), Bytes::from_static(b"v"));
        assert_eq!(
            store.get_object("missing").await,
            Err(StoreError::NotFound("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_bucket_until_created() {
        let store = MemoryStore::new("b").without_bucket();
        assert_eq!(
            store.put_object("k", Bytes::new()).await,
            Err(StoreError::BucketNotFound)
        );
        store.create_bucket().await.unwrap();
        assert!(store.put_object("k", Bytes::new()).await.is_ok());
        assert_eq!(store.keys().await, vec!["k".to_string()]);
    }
}
