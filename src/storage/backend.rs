//! Abstract object store trait.
//!
//! Every object store must implement [`ObjectStore`].  The trait covers
//! exactly what the sync protocol needs from the store: HEAD for the
//! authoritative attributes of an object, PUT/GET for server-side
//! transfers, an idempotent DELETE, and signed URL issuance for direct
//! client transfers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::SyncError;

/// Attributes reported by a HEAD request.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHead {
    /// MIME content type, if the store recorded one.
    pub content_type: Option<String>,
    /// Size in bytes.
    pub size: Option<u64>,
    /// Base64-encoded SHA-256, when the store tracks checksums.
    pub sha256: Option<String>,
    /// Store-side ETag.
    pub etag: Option<String>,
    /// Last modification time reported by the store.
    pub last_modified: DateTime<Utc>,
}

/// A fetched object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Optional attributes sent along with a PUT.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    /// Base64-encoded SHA-256 the store should verify the body against.
    pub sha256: Option<String>,
}

/// Operation a signed URL authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedOperation {
    Get,
    Put,
}

impl SignedOperation {
    pub fn method(self) -> &'static str {
        match self {
            SignedOperation::Get => "GET",
            SignedOperation::Put => "PUT",
        }
    }
}

/// Async object store contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch the attributes of `bucket/key`, or `None` if it does not exist.
    fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ObjectHead>>> + Send + '_>>;

    /// Write `body` to `bucket/key`, replacing any existing object.
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: PutOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Read the full object at `bucket/key`, or `None` if it does not exist.
    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<StoredObject>>> + Send + '_>>;

    /// Delete `bucket/key`.  Deleting a missing object is not an error.
    fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Issue a time-limited URL authorizing `operation` on `bucket/key`.
    fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        operation: SignedOperation,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;

    /// Stable, unsigned URL of `bucket/key`.
    fn object_url(&self, bucket: &str, key: &str) -> anyhow::Result<String>;
}

// -- Checksums ---------------------------------------------------------------

/// Base64-encoded SHA-256 of `data`, the form object stores report.
pub fn sha256_base64(data: &[u8]) -> String {
    BASE64.encode(Sha256::digest(data))
}

/// Normalize a SHA-256 checksum given as hex or base64 to base64.
pub fn normalize_sha256(checksum: &str) -> Result<String, SyncError> {
    let checksum = checksum.trim();
    let raw = if checksum.len() == 64 && checksum.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(checksum).map_err(|e| SyncError::invalid(format!("bad sha256: {e}")))?
    } else {
        BASE64
            .decode(checksum)
            .map_err(|e| SyncError::invalid(format!("bad sha256: {e}")))?
    };
    if raw.len() != 32 {
        return Err(SyncError::invalid(format!(
            "sha256 must be 32 bytes, got {}",
            raw.len()
        )));
    }
    Ok(BASE64.encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_HEX: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256_base64_known_value() {
        assert_eq!(
            sha256_base64(b"hello"),
            "LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ="
        );
    }

    #[test]
    fn test_normalize_hex_and_base64_agree() {
        let from_hex = normalize_sha256(HELLO_HEX).unwrap();
        let from_b64 = normalize_sha256(&sha256_base64(b"hello")).unwrap();
        assert_eq!(from_hex, from_b64);
    }

    #[test]
    fn test_normalize_uppercase_hex() {
        assert_eq!(
            normalize_sha256(&HELLO_HEX.to_uppercase()).unwrap(),
            sha256_base64(b"hello")
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_sha256("not a checksum!").is_err());
        assert!(normalize_sha256("aGVsbG8=").is_err()); // valid base64, wrong length
    }

    #[test]
    fn test_signed_operation_method() {
        assert_eq!(SignedOperation::Get.method(), "GET");
        assert_eq!(SignedOperation::Put.method(), "PUT");
    }
}
