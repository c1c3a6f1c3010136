//! In-memory object store.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>` keyed by
//! `(bucket, key)`.  Signed URLs point at `{endpoint}/store/{bucket}/{key}`
//! and carry a real SigV4 presigned query, which [`MemoryObjectStore::put_signed`]
//! and [`MemoryObjectStore::get_signed`] verify.  The HTTP server mounts
//! those two methods so clients can upload directly, exactly as they
//! would against S3.
//!
//! Used for development, for the test suite, and as the fake the sync
//! engine is exercised against.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{
    normalize_sha256, ObjectHead, ObjectStore, PutOptions, SignedOperation, StoredObject,
};
use super::signing::{self, SigningKey};
use crate::config::Connection;
use crate::errors::SyncError;

/// Path prefix under which signed URLs are served.
pub const SIGNED_PREFIX: &str = "/store/";

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    content_type: Option<String>,
    sha256: String,
    etag: String,
    last_modified: DateTime<Utc>,
}

/// In-memory object store.
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), MemoryObject>>,
    /// Public base URL, without a trailing slash.
    endpoint: String,
    signer: SigningKey,
    /// Deletes that should still fail before one goes through.
    pending_delete_failures: AtomicU32,
}

impl MemoryObjectStore {
    /// Create a store whose URLs live under `endpoint`, signing with a
    /// process-local credential pair.
    pub fn new(endpoint: &str) -> Self {
        Self::with_signer(
            endpoint,
            SigningKey {
                access_key_id: "metasync-memory".to_string(),
                secret_access_key: hex::encode(rand::random::<[u8; 20]>()),
                region: "auto".to_string(),
            },
        )
    }

    /// Create a store signing URLs with the given credentials.
    pub fn with_signer(endpoint: &str, signer: SigningKey) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            signer,
            pending_delete_failures: AtomicU32::new(0),
        }
    }

    /// Create a store from a resolved connection record.
    pub fn from_connection(connection: &Connection) -> Self {
        Self::with_signer(
            &connection.endpoint,
            SigningKey {
                access_key_id: connection.access_key_id.clone(),
                secret_access_key: connection.secret_access_key.clone(),
                region: connection.region.clone(),
            },
        )
    }

    /// Public base URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Make the next `n` deletes fail with a transient error.
    pub fn fail_next_deletes(&self, n: u32) {
        self.pending_delete_failures.store(n, Ordering::SeqCst);
    }

    /// Whether `bucket/key` currently exists.
    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .await
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    /// Total number of stored objects across buckets.
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Store `body` through a signed PUT URL.  `path_and_query` is the
    /// request target as received (`/store/{bucket}/{key}?X-Amz-...`).
    pub async fn put_signed(
        &self,
        path_and_query: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> Result<(String, String), SyncError> {
        let (bucket, key) = self.verify_target(SignedOperation::Put, path_and_query)?;
        self.insert(&bucket, &key, body, content_type)
            .await
            .map_err(SyncError::Internal)?;
        Ok((bucket, key))
    }

    /// Read an object through a signed GET URL.
    pub async fn get_signed(&self, path_and_query: &str) -> Result<StoredObject, SyncError> {
        let (bucket, key) = self.verify_target(SignedOperation::Get, path_and_query)?;
        let objects = self.objects.read().await;
        let obj = objects
            .get(&(bucket.clone(), key.clone()))
            .ok_or(SyncError::NotFound { bucket, key })?;
        Ok(StoredObject {
            data: obj.data.clone(),
            content_type: obj.content_type.clone(),
            last_modified: obj.last_modified,
        })
    }

    fn verify_target(
        &self,
        operation: SignedOperation,
        path_and_query: &str,
    ) -> Result<(String, String), SyncError> {
        let url = format!("{}{}", self.endpoint, path_and_query);
        let path = signing::verify(operation.method(), &url, &self.signer, Utc::now())
            .map_err(|e| SyncError::denied(e.to_string()))?;
        let (_, target) = path
            .split_once(SIGNED_PREFIX)
            .ok_or_else(|| SyncError::invalid(format!("not a signed object path: {path}")))?;
        match target.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok((bucket.to_string(), key.to_string()))
            }
            _ => Err(SyncError::invalid(format!(
                "signed path must name a bucket and a key: {path}"
            ))),
        }
    }

    async fn insert(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> anyhow::Result<String> {
        let digest = Sha256::digest(&body);
        let sha256 = base64_digest(&digest);
        let etag = format!("\"{}\"", hex::encode(&digest[..16]));
        debug!(bucket, key, size = body.len(), "memory store put");
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            MemoryObject {
                data: body,
                content_type,
                sha256: sha256.clone(),
                etag,
                last_modified: Utc::now(),
            },
        );
        Ok(sha256)
    }
}

fn base64_digest(digest: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(digest)
}

impl ObjectStore for MemoryObjectStore {
    fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ObjectHead>>> + Send + '_>> {
        let id = (bucket.to_string(), key.to_string());
        Box::pin(async move {
            let objects = self.objects.read().await;
            Ok(objects.get(&id).map(|obj| ObjectHead {
                content_type: obj.content_type.clone(),
                size: Some(obj.data.len() as u64),
                sha256: Some(obj.sha256.clone()),
                etag: Some(obj.etag.clone()),
                last_modified: obj.last_modified,
            }))
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
            if let Some(expected) = &options.sha256 {
                let expected = normalize_sha256(expected)?;
                let actual = base64_digest(&Sha256::digest(&body));
                if expected != actual {
                    return Err(SyncError::ChecksumMismatch { expected, actual }.into());
                }
            }
            self.insert(&bucket, &key, body, options.content_type).await?;
            Ok(())
        })
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<StoredObject>>> + Send + '_>> {
        let id = (bucket.to_string(), key.to_string());
        Box::pin(async move {
            let objects = self.objects.read().await;
            Ok(objects.get(&id).map(|obj| StoredObject {
                data: obj.data.clone(),
                content_type: obj.content_type.clone(),
                last_modified: obj.last_modified,
            }))
        })
    }

    fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let id = (bucket.to_string(), key.to_string());
        Box::pin(async move {
            let injected = self
                .pending_delete_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                anyhow::bail!("injected transient failure deleting {}/{}", id.0, id.1);
            }
            self.objects.write().await.remove(&id);
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
        let path = format!("{SIGNED_PREFIX}{bucket}/{key}");
        Box::pin(async move {
            let url = signing::presign(
                operation.method(),
                &self.endpoint,
                &path,
                &self.signer,
                Utc::now(),
                ttl.as_secs(),
            )?;
            Ok(url)
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> anyhow::Result<String> {
        Ok(format!(
            "{}/{}{}",
            self.endpoint,
            signing::uri_encode(bucket),
            signing::uri_encode_path(key)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::sha256_base64;

    const TTL: Duration = Duration::from_secs(60);

    fn store() -> MemoryObjectStore {
        MemoryObjectStore::new("http://localhost:9020/")
    }

    fn target(url: &str) -> &str {
        url.strip_prefix("http://localhost:9020").unwrap()
    }

    #[tokio::test]
    async fn test_put_head_get_delete() {
        let s = store();
        s.put_object(
            "photos",
            "abc123",
            Bytes::from_static(b"hello"),
            PutOptions {
                content_type: Some("text/plain".into()),
                sha256: None,
            },
        )
        .await
        .unwrap();

        let head = s.head_object("photos", "abc123").await.unwrap().unwrap();
        assert_eq!(head.size, Some(5));
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(head.sha256, Some(sha256_base64(b"hello")));

        let obj = s.get_object("photos", "abc123").await.unwrap().unwrap();
        assert_eq!(obj.data.as_ref(), b"hello");

        s.delete_object("photos", "abc123").await.unwrap();
        assert!(s.head_object("photos", "abc123").await.unwrap().is_none());
        // Idempotent.
        s.delete_object("photos", "abc123").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_rejects_wrong_checksum() {
        let s = store();
        let err = s
            .put_object(
                "b",
                "k",
                Bytes::from_static(b"hello"),
                PutOptions {
                    content_type: None,
                    sha256: Some(sha256_base64(b"other")),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::ChecksumMismatch { .. })
        ));
        assert!(!s.contains("b", "k").await);
    }

    #[tokio::test]
    async fn test_signed_put_then_signed_get() {
        let s = store();
        let put = s
            .signed_url("photos", "dir/abc", SignedOperation::Put, TTL)
            .await
            .unwrap();
        assert!(put.starts_with("http://localhost:9020/store/photos/dir/abc?"));

        let (bucket, key) = s
            .put_signed(target(&put), Bytes::from_static(b"png"), Some("image/png".into()))
            .await
            .unwrap();
        assert_eq!((bucket.as_str(), key.as_str()), ("photos", "dir/abc"));

        let get = s
            .signed_url("photos", "dir/abc", SignedOperation::Get, TTL)
            .await
            .unwrap();
        let obj = s.get_signed(target(&get)).await.unwrap();
        assert_eq!(obj.data.as_ref(), b"png");
        assert_eq!(obj.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_signed_get_url_cannot_upload() {
        let s = store();
        let get = s
            .signed_url("photos", "abc", SignedOperation::Get, TTL)
            .await
            .unwrap();
        let err = s
            .put_signed(target(&get), Bytes::from_static(b"x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied { .. }));
        assert_eq!(s.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsigned_put_is_denied() {
        let s = store();
        let err = s
            .put_signed("/store/photos/abc", Bytes::from_static(b"x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_fail_next_deletes() {
        let s = store();
        s.put_object("b", "k", Bytes::from_static(b"x"), PutOptions::default())
            .await
            .unwrap();
        s.fail_next_deletes(2);
        assert!(s.delete_object("b", "k").await.is_err());
        assert!(s.delete_object("b", "k").await.is_err());
        assert!(s.contains("b", "k").await);
        s.delete_object("b", "k").await.unwrap();
        assert!(!s.contains("b", "k").await);
    }

    #[test]
    fn test_object_url() {
        let s = store();
        assert_eq!(
            s.object_url("photos", "a b/c").unwrap(),
            "http://localhost:9020/photos/a%20b/c"
        );
    }
}
