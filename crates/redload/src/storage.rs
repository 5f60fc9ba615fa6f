//! S3 client for reading the head of source objects
//!
//! Only the header preflight talks to S3 directly; the load itself is done
//! by the cluster through `COPY`.

use crate::config::S3BucketConfig;
use crate::error::{LoadError, Result};
use crate::preflight::ObjectHeaderSource;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use tracing::{debug, info, instrument};

/// Region used when the configuration names none
pub const DEFAULT_REGION: &str = "us-east-1";

/// Bytes requested from the start of each object
pub const HEADER_PROBE_BYTES: u64 = 64 * 1024;

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    /// Build a client from the `s3_bucket` section
    ///
    /// Inline keys are used when present; otherwise the default AWS
    /// credential chain (environment, profile, instance role) applies.
    pub async fn new(config: &S3BucketConfig) -> Self {
        let region = Region::new(
            config
                .region
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        );

        let mut builder = if config.aws_access_key_id.is_empty() || config.aws_secret_access_key.is_empty() {
            debug!("No inline S3 keys, using the default credential chain");
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        } else {
            let credentials = Credentials::new(
                config.aws_access_key_id.expose(),
                config.aws_secret_access_key.expose(),
                config
                    .aws_session_token
                    .as_ref()
                    .map(|t| t.expose().to_string()),
                None,
                "redload-config",
            );
            aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(credentials)
                .region(region)
        };

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        info!(bucket = %config.bucket, "Storage client initialized");

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// First [`HEADER_PROBE_BYTES`] of the object (fewer if it is shorter)
    #[instrument(skip(self))]
    pub async fn download_head(&self, key: &str) -> Result<Vec<u8>> {
        let key = key.trim_start_matches('/');
        debug!("Fetching head of s3://{}/{}", self.bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes=0-{}", HEADER_PROBE_BYTES - 1))
            .send()
            .await
            .map_err(|e| LoadError::storage(key, DisplayErrorContext(&e)))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| LoadError::storage(key, e))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);
        Ok(data)
    }
}

#[async_trait]
impl ObjectHeaderSource for Storage {
    async fn head_bytes(&self, key: &str) -> Result<Vec<u8>> {
        self.download_head(key).await
    }
}
