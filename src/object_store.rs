use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client;
use chrono::Duration;
use chrono::Utc;

use crate::configuration::ObjectStoreSettings;

#[derive(thiserror::Error, Debug)]
pub enum ObjectStoreError {
    #[error("object {key:?} not found in bucket {bucket:?}")]
    NotFound { bucket: String, key: String },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Thin gateway over the S3 SDK. The rest of the pipeline never sees SDK
/// types; it gets exact bytes and key listings.
#[derive(Clone)]
pub struct ObjectStoreClient {
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl ObjectStoreClient {
    pub async fn new(cfg: &ObjectStoreSettings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()));
        if let Some(endpoint) = &cfg.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        // custom endpoints (minio and friends) want path-style addressing
        let client = match cfg.endpoint.is_some() {
            true => Client::from_conf(
                aws_sdk_s3::config::Builder::from(&sdk_config)
                    .force_path_style(true)
                    .build(),
            ),
            false => Client::new(&sdk_config),
        };
        Self {
            client,
            bucket: cfg.bucket.clone(),
            key_prefix: cfg.key_prefix.clone(),
        }
    }

    pub fn default_bucket(&self) -> &str { &self.bucket }

    /// `{prefix}{messageId}`, for notifications that do not carry an object
    /// key.
    pub fn key_for_message_id(
        &self,
        message_id: &str,
    ) -> String {
        format!("{}{}", self.key_prefix, message_id)
    }

    /// Fetch the raw MIME blob, byte-exact. The body is aggregated as bytes;
    /// no string decode ever touches it.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<u8>, ObjectStoreError> {
        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await;
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                if matches!(e.as_service_error(), Some(GetObjectError::NoSuchKey(_))) {
                    return Err(ObjectStoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                return Err(anyhow::Error::new(e)
                    .context(format!("GetObject failed for {bucket}/{key}"))
                    .into());
            }
        };
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| anyhow::Error::new(e).context("could not read object body"))?
            .into_bytes();
        Ok(bytes.to_vec())
    }

    /// Keys under the configured prefix, newest allowed window first-come.
    /// `only_last_hours > 0` drops objects older than that.
    #[tracing::instrument(skip(self))]
    pub async fn list_keys(
        &self,
        max_keys: i32,
        only_last_hours: i64,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.key_prefix)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|e| anyhow::Error::new(e).context("ListObjectsV2 failed"))?;

        let cutoff = (only_last_hours > 0)
            .then(|| (Utc::now() - Duration::hours(only_last_hours)).timestamp());

        let keys = output
            .contents()
            .iter()
            .filter(|object| match (cutoff, object.last_modified()) {
                (Some(cutoff), Some(modified)) => modified.secs() >= cutoff,
                _ => true,
            })
            .filter_map(|object| object.key().map(str::to_string))
            .collect();
        Ok(keys)
    }
}
