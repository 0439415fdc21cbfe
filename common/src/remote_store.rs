//! # Remote Store Gateway
//!
//! Authenticated upload and existence probe against the external,
//! vessel-scoped object store that payloads are ultimately relayed to.
//! Backed by an S3-compatible client so a test double (MinIO, localstack)
//! can be substituted via an endpoint override.

use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteStoreError {
    #[error("auth error: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient error: {0}")]
    Transient(String),
    #[error("{0}")]
    Other(String),
}

/// Configuration needed to reach the remote store. `endpoint_override` is
/// only ever set in tests, pointed at a local S3-compatible double.
pub struct RemoteStoreConfig {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint_override: Option<String>,
}

/// The Remote Store Gateway.
#[derive(Clone)]
pub struct RemoteStore {
    client: Client,
    bucket: String,
}

impl RemoteStore {
    pub async fn new(config: RemoteStoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key,
            config.secret_key,
            None,
            None,
            "revelare-pipeline",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .behavior_version(aws_config::BehaviorVersion::latest());

        if let Some(endpoint) = config.endpoint_override {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload `bytes` to `key`, overwriting any existing object there.
    /// Returns the remote-reported content hash with surrounding quotes
    /// stripped.
    pub async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, RemoteStoreError> {
        let response = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(classify_put_error)?;

        let etag = response
            .e_tag()
            .unwrap_or_default()
            .trim_matches('"')
            .to_owned();

        Ok(etag)
    }

    /// Probe for the presence of `key`.
    pub async fn exists(&self, key: &str) -> Result<bool, RemoteStoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_not_found() => {
                Ok(false)
            }
            Err(err) => Err(classify_head_error(err)),
        }
    }
}

fn classify_put_error<E>(err: SdkError<E>) -> RemoteStoreError
where
    E: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            RemoteStoreError::Transient(format!("{err:?}"))
        }
        SdkError::ServiceError(_) => RemoteStoreError::Other(format!("{err:?}")),
        _ => RemoteStoreError::Other(format!("{err:?}")),
    }
}

fn classify_head_error<E>(err: SdkError<E>) -> RemoteStoreError
where
    E: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            RemoteStoreError::Transient(format!("{err:?}"))
        }
        _ => RemoteStoreError::Other(format!("{err:?}")),
    }
}

/// Build the remote key for a payload: `<VesselID>/data/<filename>`.
pub fn remote_key(vessel_id: &str, filename: &str) -> String {
    format!("{vessel_id}/data/{filename}")
}
