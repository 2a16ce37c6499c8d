//! S3-compatible storage backend.
//!
//! Works against AWS S3 and the S3-compatible services (MinIO, Backblaze B2,
//! Tigris, ...) commonly used to hold vault blobs.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file. The AWS
//! credential chain is deliberately not consulted.

use crate::backend::BlobStream;
use crate::error::{ErrorKind, Result};
use crate::{BlobInfo, StorageBackend, validate_path};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::DisplayErrorContext,
    primitives::{ByteStream, DateTime},
    types::{BucketLocationConstraint, CreateBucketConfiguration},
};
use bytes::Bytes;
use exn::{OptionExt, ResultExt};
use std::path::Path;
use std::sync::Arc;
use time::UtcDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// The one region in which `CreateBucket` must not carry a location constraint.
const DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible storage backend.
///
/// Stores blobs in one bucket, optionally under a key prefix. All paths are
/// relative to the configured prefix (if any).
///
/// # Examples
///
/// ```no_run
/// use cairn_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "minio",
///     "vault",
///     None,
///     "us-east-1",
///     Some("http://localhost:9000"),
///     "access_key_id",
///     "secret_access_key",
/// )?;
/// backend.ensure_bucket().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    region: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .filter(|p| !p.trim_matches('/').is_empty())
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        let region = region.into();
        let credentials = Credentials::new(key_id, key_secret, None, None, "cairn-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.clone()))
            // 1 initial attempt + 3 retries with exponential backoff
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for MinIO and friends.
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        let client = Client::from_conf(config_builder.build());
        Ok(Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
            region,
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Create the bucket if it doesn't exist yet.
    ///
    /// Intended to be called once at startup.
    pub async fn ensure_bucket(&self) -> Result<()> {
        let _permit = self.acquire_permit().await;
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(()),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {},
            Err(err) => exn::bail!(Self::network_error(&err)),
        }
        tracing::info!(backend = %self.name, bucket = %self.bucket, "creating missing bucket");
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != DEFAULT_REGION {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            request = request
                .create_bucket_configuration(CreateBucketConfiguration::builder().location_constraint(constraint).build());
        }
        match request.send().await {
            Ok(_) => Ok(()),
            // Lost a race with another process creating the same bucket.
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()) =>
            {
                Ok(())
            },
            Err(err) => exn::bail!(Self::network_error(&err)),
        }
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<String> {
        let validated = validate_path(path)?;
        let key = validated.to_str().ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
        Ok(join_key(self.prefix.as_deref(), key))
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> OwnedSemaphorePermit {
        // unwrap is safe: semaphore is never closed
        self.rate_limiter.clone().acquire_owned().await.unwrap()
    }

    fn network_error(err: &(dyn std::error::Error + 'static)) -> ErrorKind {
        ErrorKind::Network(DisplayErrorContext(err).to_string())
    }

    fn parse_datetime(dt: &DateTime) -> Result<UtcDateTime> {
        UtcDateTime::from_unix_timestamp(dt.secs())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }
}

/// Prefix a key, tolerating a trailing separator on the prefix.
fn join_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
        None => key.to_string(),
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&self, path: &Path) -> Result<BlobInfo> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await;
        let output = match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(err) => exn::bail!(Self::network_error(&err)),
        };
        let size = output.content_length().and_then(|l| u64::try_from(l).ok()).unwrap_or_default();
        let modified = match output.last_modified() {
            Some(dt) => Self::parse_datetime(dt)?,
            None => UtcDateTime::now(),
        };
        Ok(BlobInfo::new(path, size, modified).with_content_type(output.content_type().map(str::to_string)))
    }

    async fn reader(&self, path: &Path) -> Result<BlobStream> {
        let key = self.full_key(path)?;
        let permit = self.acquire_permit().await;
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(err) => exn::bail!(Self::network_error(&err)),
        };
        let mut body = output.body;
        Ok(Box::pin(stream! {
            // The permit travels with the body so that slow consumers still
            // count against the concurrency limit.
            let _permit = permit;
            loop {
                match body.try_next().await {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::network_error(&err)));
                        break;
                    },
                }
            }
        }))
    }

    async fn write(&self, path: &Path, data: Bytes, content_type: Option<&str>) -> Result<()> {
        let key = self.full_key(path)?;
        let length = i64::try_from(data.len()).or_raise(|| ErrorKind::BackendError("blob too large".to_string()))?;
        let _permit = self.acquire_permit().await;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_length(length)
            .set_content_type(content_type.map(str::to_string))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| Self::network_error(&err))?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await;
        // S3 reports success for keys that never existed.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| Self::network_error(&err))?;
        Ok(())
    }
}
