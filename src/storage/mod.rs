//! Object writer
//!
//! Writes sealed segments to the destination bucket. The network side sits
//! behind [`ObjectStore`]; [`ObjectWriter`] adds the policy on top of it:
//!
//! - the capability must permit writes before anything is sent
//! - a missing bucket is created once per run, then the write is retried
//! - other write failures are retried once
//! - with verification on, the capability must also permit reads, and each
//!   segment is downloaded again and compared

#[cfg(test)]
pub(crate) mod memory;
pub mod s3;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::access::{Capability, Operation};
use crate::error::{RelayError, Result, UploadError};

/// Failure reported by an object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The bucket does not exist
    BucketNotFound,

    /// Credentials were rejected or lack permission
    AccessDenied(String),

    /// The object does not exist
    NotFound(String),

    /// Anything else (network, throttling, server errors)
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::BucketNotFound => write!(f, "bucket does not exist"),
            StoreError::AccessDenied(msg) => write!(f, "access denied: {msg}"),
            StoreError::NotFound(key) => write!(f, "object not found: {key}"),
            StoreError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Minimal object storage operations needed by an export
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket this store writes to
    fn bucket(&self) -> &str;

    /// Write an object, replacing any existing one
    async fn put_object(&self, key: &str, data: Bytes) -> StoreResult<()>;

    /// Read an object back
    async fn get_object(&self, key: &str) -> StoreResult<Bytes>;

    /// Create the bucket
    async fn create_bucket(&self) -> StoreResult<()>;
}

/// A segment that was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReceipt {
    pub key: String,
    pub bytes: usize,
    /// Whether the segment was read back and compared
    pub verified: bool,
}

/// Destination for sealed segments
#[async_trait]
pub trait SegmentWriter: Send {
    /// Segment capacity in bytes
    fn transfer_capacity(&self) -> usize;

    /// Write one sealed segment under `key`
    async fn write_segment(&mut self, key: &str, data: Bytes) -> Result<SegmentReceipt>;
}

/// Segment writer over an [`ObjectStore`]
pub struct ObjectWriter<S: ObjectStore> {
    store: S,
    capability: Capability,
    capacity: usize,
    verify: bool,
    write_retries: u32,
    create_attempted: bool,
}

impl<S: ObjectStore> ObjectWriter<S> {
    /// Create a writer
    ///
    /// # Arguments
    /// * `store` - Object store scoped to the capability's bucket
    /// * `capability` - Resolved access, checked before each write
    /// * `capacity` - Segment capacity in bytes
    pub fn new(store: S, capability: Capability, capacity: usize) -> Self {
        Self {
            store,
            capability,
            capacity,
            verify: false,
            write_retries: 1,
            create_attempted: false,
        }
    }

    /// Read every segment back after writing it
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write with the create-bucket fallback and the generic retry
    async fn put(&mut self, key: &str, data: &Bytes) -> Result<()> {
        let mut retries_left = self.write_retries;

        loop {
            match self.store.put_object(key, data.clone()).await {
                Ok(()) => return Ok(()),
                Err(StoreError::BucketNotFound) if !self.create_attempted => {
                    self.create_attempted = true;
                    let bucket = self.store.bucket().to_string();
                    warn!("Bucket '{}' does not exist, creating it", bucket);
                    self.store.create_bucket().await.map_err(|e| {
                        UploadError::BucketCreateFailed(format!("{bucket}: {e}"))
                    })?;
                    info!("Created bucket '{}'", bucket);
                }
                Err(StoreError::BucketNotFound) => {
                    return Err(UploadError::BucketNotFound(self.store.bucket().to_string()).into());
                }
                Err(StoreError::AccessDenied(msg)) => {
                    return Err(UploadError::AccessDenied(msg).into());
                }
                Err(e) if retries_left > 0 => {
                    retries_left -= 1;
                    warn!("Writing '{}' failed, retrying: {}", key, e);
                }
                Err(e) => {
                    return Err(UploadError::WriteFailed {
                        key: key.to_string(),
                        message: e.to_string(),
                    }
                    .into());
                }
            }
        }
    }

    /// Download `key` and compare it with what was uploaded
    pub async fn verify(&self, key: &str, expected: &Bytes) -> Result<()> {
        self.capability.require(Operation::Read)?;

        let actual = self
            .store
            .get_object(key)
            .await
            .map_err(|e| UploadError::ReadBackFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        if actual != *expected {
            return Err(RelayError::IntegrityMismatch {
                key: key.to_string(),
                expected: fingerprint(expected),
                actual: fingerprint(&actual),
            });
        }

        debug!("Verified '{}' ({} bytes)", key, actual.len());
        Ok(())
    }
}

#[async_trait]
impl<S: ObjectStore> SegmentWriter for ObjectWriter<S> {
    fn transfer_capacity(&self) -> usize {
        self.capacity
    }

    async fn write_segment(&mut self, key: &str, data: Bytes) -> Result<SegmentReceipt> {
        self.capability.require(Operation::Write)?;
        if self.verify {
            self.capability.require(Operation::Read)?;
        }

        debug!("Writing '{}' ({} bytes)", key, data.len());
        self.put(key, &data).await?;

        if self.verify {
            self.verify(key, &data).await?;
        }

        Ok(SegmentReceipt {
            key: key.to_string(),
            bytes: data.len(),
            verified: self.verify,
        })
    }
}

/// Size and short SHA-256 of a payload, for mismatch messages
fn fingerprint(data: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(data));
    format!("{} bytes (sha256 {})", data.len(), &digest[..16])
}
