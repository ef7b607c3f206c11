//! S3-compatible object store
//!
//! Talks to any gateway speaking the S3 API (AWS, MinIO, Storj's S3 gateway)
//! with the static credentials of a resolved [`Capability`]. When the
//! capability carries an encryption key, every request uses it as an
//! SSE-C customer key, so objects are stored encrypted and can only be read
//! back with the same key.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use md5::{Digest, Md5};
use tracing::{debug, info};

use super::{ObjectStore, StoreError, StoreResult};
use crate::access::Capability;

const SSE_ALGORITHM: &str = "AES256";

/// Region for which `CreateBucket` must not send a location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// Base64 forms of an SSE-C key, as the request headers want them
#[derive(Clone)]
struct CustomerKey {
    key: String,
    key_md5: String,
}

impl CustomerKey {
    fn new(raw: &[u8; 32]) -> Self {
        Self {
            key: STANDARD.encode(raw),
            key_md5: STANDARD.encode(Md5::digest(raw)),
        }
    }
}

/// Object store backed by an S3-compatible endpoint
pub struct S3Store {
    client: Client,
    bucket: String,
    region: String,
    customer_key: Option<CustomerKey>,
}

impl S3Store {
    /// Build a client for the capability's bucket
    ///
    /// # Arguments
    /// * `capability` - Resolved access; its endpoint, when present, selects
    ///   an S3-compatible gateway with path-style addressing
    pub async fn new(capability: &Capability) -> Self {
        info!(
            "Initializing S3 store: bucket={}, region={}",
            capability.bucket, capability.region
        );

        let credentials = Credentials::new(
            capability.access_key_id.clone(),
            capability.secret_access_key.clone(),
            None,
            None,
            "mongobucket",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(capability.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &capability.endpoint {
            debug!("Using S3 endpoint: {}", endpoint);
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // the object writer owns retries; one attempt per call here
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .retry_config(RetryConfig::standard().with_max_attempts(1));
        if capability.endpoint.is_some() {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: capability.bucket.clone(),
            region: capability.region.clone(),
            customer_key: capability.encryption_key.as_ref().map(CustomerKey::new),
        }
    }
}

/// Map an SDK error onto the store error kinds the writer acts on
fn classify<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err.code() {
        Some("NoSuchBucket") => StoreError::BucketNotFound,
        Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
            StoreError::AccessDenied(message)
        }
        Some("NoSuchKey") => StoreError::NotFound(message),
        _ => StoreError::Other(message),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, data: Bytes) -> StoreResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/octet-stream")
            .body(ByteStream::from(data));
        if let Some(sse) = &self.customer_key {
            request = request
                .sse_customer_algorithm(SSE_ALGORITHM)
                .sse_customer_key(&sse.key)
                .sse_customer_key_md5(&sse.key_md5);
        }

        request.send().await.map_err(classify)?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(sse) = &self.customer_key {
            request = request
                .sse_customer_algorithm(SSE_ALGORITHM)
                .sse_customer_key(&sse.key)
                .sse_customer_key_md5(&sse.key_md5);
        }

        let response = request.send().await.map_err(classify)?;
        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Other(format!("reading '{key}': {e}")))?;
        Ok(body.into_bytes())
    }

    async fn create_bucket(&self) -> StoreResult<()> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BucketAlreadyOwnedByYou") => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_key_headers() {
        let key = CustomerKey::new(&[0u8; 32]);
        assert_eq!(key.key, "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=");
        assert_eq!(key.key_md5, STANDARD.encode(Md5::digest([0u8; 32])));
        assert_eq!(STANDARD.decode(&key.key_md5).unwrap().len(), 16);
    }
}
