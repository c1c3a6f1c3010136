//! S3-compatible object store (AWS S3, Cloudflare R2, MinIO, ...).
//!
//! The store is created from an already-resolved [`Connection`]; the
//! SDK client itself is built on first use, so constructing the store
//! never performs I/O.  Credentials come from the connection record
//! only, never from the ambient AWS credential chain.

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::ChecksumMode;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::backend::{
    normalize_sha256, ObjectHead, ObjectStore, PutOptions, SignedOperation, StoredObject,
};
use super::signing;
use crate::config::Connection;
use crate::errors::SyncError;

/// Object store backed by an S3-compatible service.
pub struct S3ObjectStore {
    connection: Connection,
    client: OnceCell<Client>,
}

impl S3ObjectStore {
    /// Create a store for `connection`.  No network access happens here.
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            client: OnceCell::new(),
        }
    }

    /// The connection record this store was created from.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Return the SDK client, building it on first call.
    async fn client(&self) -> anyhow::Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                let conn = &self.connection;
                let creds = aws_sdk_s3::config::Credentials::new(
                    &conn.access_key_id,
                    &conn.secret_access_key,
                    None,
                    None,
                    "metasync-config",
                );
                let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(aws_config::Region::new(conn.region.clone()))
                    .endpoint_url(&conn.endpoint)
                    .credentials_provider(creds)
                    .load()
                    .await;
                let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
                    .force_path_style(conn.force_path_style)
                    .build();
                info!(
                    endpoint = %conn.endpoint,
                    bucket = %conn.bucket,
                    "S3 client initialized"
                );
                Ok(Client::from_conf(s3_config))
            })
            .await
    }

    /// Map an SDK error to an anyhow error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> anyhow::Error {
        anyhow::anyhow!("S3 {context}: {err}")
    }
}

/// Convert an SDK timestamp, falling back to now for out-of-range values.
fn to_chrono(ts: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    ts.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

impl ObjectStore for S3ObjectStore {
    fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ObjectHead>>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!(bucket = %bucket, key = %key, "S3 head_object");
            let result = self
                .client()
                .await?
                .head_object()
                .bucket(&bucket)
                .key(&key)
                .checksum_mode(ChecksumMode::Enabled)
                .send()
                .await;
            match result {
                Ok(resp) => Ok(Some(ObjectHead {
                    content_type: resp.content_type().map(str::to_string),
                    size: resp.content_length().and_then(|n| u64::try_from(n).ok()),
                    sha256: resp.checksum_sha256().map(str::to_string),
                    etag: resp.e_tag().map(str::to_string),
                    last_modified: to_chrono(resp.last_modified()),
                })),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(None)
                    } else {
                        Err(Self::map_sdk_error("head_object", service_err))
                    }
                }
            }
        })
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: PutOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!(bucket = %bucket, key = %key, size = body.len(), "S3 put_object");
            let mut request = self
                .client()
                .await?
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .body(aws_sdk_s3::primitives::ByteStream::from(body));
            if let Some(content_type) = &options.content_type {
                request = request.content_type(content_type);
            }
            let expected = match &options.sha256 {
                Some(sha) => Some(normalize_sha256(sha)?),
                None => None,
            };
            if let Some(sha) = &expected {
                request = request.checksum_sha256(sha);
            }
            request.send().await.map_err(|e| {
                let service_err = e.into_service_error();
                match (service_err.code(), expected.clone()) {
                    (Some("BadDigest" | "XAmzContentSHA256Mismatch"), Some(expected)) => {
                        SyncError::ChecksumMismatch {
                            expected,
                            actual: "rejected by object store".to_string(),
                        }
                        .into()
                    }
                    _ => Self::map_sdk_error("put_object", service_err),
                }
            })?;
            Ok(())
        })
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<StoredObject>>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!(bucket = %bucket, key = %key, "S3 get_object");
            let result = self
                .client()
                .await?
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await;
            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        return Ok(None);
                    }
                    return Err(Self::map_sdk_error("get_object", service_err));
                }
            };
            let content_type = resp.content_type().map(str::to_string);
            let last_modified = to_chrono(resp.last_modified());
            let data = resp
                .body
                .collect()
                .await
                .map_err(|e| Self::map_sdk_error("get_object body", e))?
                .into_bytes();
            Ok(Some(StoredObject {
                data,
                content_type,
                last_modified,
            }))
        })
    }

    fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!(bucket = %bucket, key = %key, "S3 delete_object");
            // S3 delete_object is idempotent: no error for missing keys.
            self.client()
                .await?
                .delete_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;
            Ok(())
        })
    }

    fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        operation: SignedOperation,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let presigning = PresigningConfig::expires_in(ttl)?;
            let client = self.client().await?;
            let request = match operation {
                SignedOperation::Get => client
                    .get_object()
                    .bucket(&bucket)
                    .key(&key)
                    .presigned(presigning)
                    .await
                    .map_err(|e| Self::map_sdk_error("presign get_object", e))?,
                SignedOperation::Put => client
                    .put_object()
                    .bucket(&bucket)
                    .key(&key)
                    .presigned(presigning)
                    .await
                    .map_err(|e| Self::map_sdk_error("presign put_object", e))?,
            };
            Ok(request.uri().to_string())
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> anyhow::Result<String> {
        let endpoint = &self.connection.endpoint;
        let path = signing::uri_encode_path(key);
        if self.connection.force_path_style {
            return Ok(format!("{endpoint}/{}{path}", signing::uri_encode(bucket)));
        }
        let url = reqwest::Url::parse(endpoint)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("endpoint has no host: {endpoint}"))?;
        let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
        Ok(format!("{}://{bucket}.{host}{port}{path}", url.scheme()))
    }
}
