//! The externally callable operation surface.
//!
//! Every operation runs its permission check first, then its effect hook,
//! then the sync engine or index read, then shapes the response.  A check
//! or hook error aborts before any side effect.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::SyncError;
use crate::metadata::cursor::{Cursor, Page};
use crate::metadata::store::{MetadataRecord, MetadataStore, Upserted};
use crate::metrics::PERMISSION_DENIALS_TOTAL;
use crate::permissions::{AllowAll, EffectHooks, HookFuture, NoEffects, PermissionGate};
use crate::retry::inprocess::InProcessExecutor;
use crate::retry::{BackoffPolicy, JobId, JobStatus, RetryExecutor};
use crate::storage::backend::{ObjectStore, SignedOperation, StoredObject};
use crate::sync::{
    metadata_error, object_store_error, DeletionCallback, DeletionReport, SyncEngine,
};

/// Longest key accepted, in bytes.
pub const MAX_KEY_BYTES: usize = 1024;

const DEFAULT_URL_TTL: Duration = Duration::from_secs(900);
const DEFAULT_PAGE_SIZE: usize = 100;

/// A key and the signed URL to upload it to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadUrl {
    pub key: String,
    pub url: String,
}

/// A metadata record together with a fresh signed download URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectMetadata {
    #[serde(flatten)]
    pub record: MetadataRecord,
    pub url: String,
}

/// Options for [`Client::store`] and [`Client::store_from_url`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Custom key; a random one is generated when absent.
    pub key: Option<String>,
    pub content_type: Option<String>,
    /// Expected SHA-256 of the body, hex or base64.
    pub sha256: Option<String>,
}

/// Reject empty and oversized keys.
pub fn validate_key(key: &str) -> Result<(), SyncError> {
    if key.is_empty() {
        return Err(SyncError::invalid("key must not be empty"));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(SyncError::invalid(format!(
            "key is {} bytes, the limit is {MAX_KEY_BYTES}",
            key.len()
        )));
    }
    Ok(())
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    bucket: String,
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    executor: Option<Arc<dyn RetryExecutor>>,
    gate: Arc<dyn PermissionGate>,
    effects: Arc<dyn EffectHooks>,
    policy: BackoffPolicy,
    url_ttl: Duration,
    default_page_size: usize,
    on_deletion: Option<DeletionCallback>,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    pub fn new(
        bucket: impl Into<String>,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            objects,
            metadata,
            executor: None,
            gate: Arc::new(AllowAll),
            effects: Arc::new(NoEffects),
            policy: BackoffPolicy::default(),
            url_ttl: DEFAULT_URL_TTL,
            default_page_size: DEFAULT_PAGE_SIZE,
            on_deletion: None,
            http: None,
        }
    }

    /// Executor for physical deletes.  Defaults to an [`InProcessExecutor`].
    pub fn executor(mut self, executor: Arc<dyn RetryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn permissions(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn effects(mut self, effects: Arc<dyn EffectHooks>) -> Self {
        self.effects = effects;
        self
    }

    pub fn retry_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Lifetime of issued signed URLs.
    pub fn url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }

    pub fn default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size.max(1);
        self
    }

    /// Called once for every scheduled deletion when it ends.
    pub fn on_deletion_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(DeletionReport) + Send + Sync + 'static,
    {
        self.on_deletion = Some(Arc::new(callback));
        self
    }

    /// HTTP client used by [`Client::store_from_url`].
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Client {
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(InProcessExecutor::new()));
        let mut engine = SyncEngine::new(self.objects, self.metadata, executor, self.policy);
        if let Some(callback) = self.on_deletion {
            engine = engine.with_deletion_callback(callback);
        }
        Client {
            bucket: self.bucket,
            engine,
            gate: self.gate,
            effects: self.effects,
            url_ttl: self.url_ttl,
            default_page_size: self.default_page_size,
            http: self.http.unwrap_or_default(),
        }
    }
}

/// Permission-gated access to one bucket's objects and their metadata.
pub struct Client {
    bucket: String,
    engine: SyncEngine,
    gate: Arc<dyn PermissionGate>,
    effects: Arc<dyn EffectHooks>,
    url_ttl: Duration,
    default_page_size: usize,
    http: reqwest::Client,
}

impl Client {
    pub fn builder(
        bucket: impl Into<String>,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> ClientBuilder {
        ClientBuilder::new(bucket, objects, metadata)
    }

    /// The bucket single-object operations act on.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    async fn guard(&self, operation: &'static str, hook: HookFuture<'_>) -> Result<(), SyncError> {
        let result = hook.await;
        if let Err(SyncError::PermissionDenied { message }) = &result {
            counter!(PERMISSION_DENIALS_TOTAL, "operation" => operation).increment(1);
            debug!(operation, %message, "operation denied");
        }
        result
    }

    fn page_limit(&self, limit: Option<usize>) -> usize {
        match limit {
            None => self.default_page_size,
            Some(0) => {
                warn!(
                    default = self.default_page_size,
                    "page limit of 0 requested, using the default"
                );
                self.default_page_size
            }
            Some(n) => n,
        }
    }

    /// Fail with [`SyncError::DuplicateKey`] if `key` already has a record.
    async fn ensure_key_free(&self, key: &str) -> Result<(), SyncError> {
        let existing = self
            .engine
            .metadata()
            .get(&self.bucket, key)
            .await
            .map_err(metadata_error)?;
        if existing.is_some() {
            return Err(SyncError::DuplicateKey {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the key for a new upload: validate and check a custom one,
    /// or generate a random one.
    async fn upload_key(&self, custom: Option<&str>) -> Result<String, SyncError> {
        match custom {
            Some(key) => {
                validate_key(key)?;
                self.ensure_key_free(key).await?;
                Ok(key.to_string())
            }
            None => Ok(Uuid::new_v4().to_string()),
        }
    }

    async fn signed(&self, key: &str, operation: SignedOperation, ttl: Duration) -> Result<String, SyncError> {
        self.engine
            .objects()
            .signed_url(&self.bucket, key, operation, ttl)
            .await
            .map_err(object_store_error)
    }

    /// Run `on_sync_metadata` for a write that just happened.  If the hook
    /// fails the write is undone: a new record is deleted, a replaced one
    /// is restored to `previous`.
    async fn after_sync(
        &self,
        key: &str,
        upserted: &Upserted,
        previous: Option<MetadataRecord>,
    ) -> Result<(), SyncError> {
        let hook = self
            .effects
            .on_sync_metadata(&self.bucket, key, &upserted.record, upserted.created)
            .await;
        let Err(err) = hook else {
            return Ok(());
        };

        let metadata = self.engine.metadata();
        let undo = match previous {
            Some(previous) if !upserted.created => metadata.upsert(previous).await.map(|_| ()),
            _ => metadata.delete(&self.bucket, key).await.map(|_| ()),
        };
        match undo {
            Ok(()) => debug!(bucket = %self.bucket, key, "metadata write rolled back"),
            Err(undo_err) => warn!(
                bucket = %self.bucket,
                key,
                error = %undo_err,
                "failed to roll back metadata write"
            ),
        }
        Err(err)
    }

    /// Issue a signed PUT URL for a new object.
    pub async fn generate_upload_url(&self, custom_key: Option<&str>) -> Result<UploadUrl, SyncError> {
        self.guard("upload", self.gate.check_upload(&self.bucket)).await?;
        let key = self.upload_key(custom_key).await?;
        let url = self.signed(&key, SignedOperation::Put, self.url_ttl).await?;
        debug!(bucket = %self.bucket, key = %key, "upload URL issued");
        Ok(UploadUrl { key, url })
    }

    /// Confirm an upload to `key` and write its metadata.
    pub async fn sync_metadata(
        &self,
        key: &str,
        expected_sha256: Option<&str>,
    ) -> Result<MetadataRecord, SyncError> {
        validate_key(key)?;
        self.guard("upload", self.gate.check_upload(&self.bucket)).await?;
        self.effects.on_upload(&self.bucket, key).await?;
        let previous = self
            .engine
            .metadata()
            .get(&self.bucket, key)
            .await
            .map_err(metadata_error)?;
        let upserted = self
            .engine
            .confirm_upload(&self.bucket, key, expected_sha256)
            .await?;
        self.after_sync(key, &upserted, previous).await?;
        Ok(upserted.record)
    }

    /// The record for `key` plus a fresh signed download URL, or `None`
    /// if no record exists.
    pub async fn get_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>, SyncError> {
        validate_key(key)?;
        self.guard("read_key", self.gate.check_read_key(&self.bucket, key))
            .await?;
        let record = self
            .engine
            .metadata()
            .get(&self.bucket, key)
            .await
            .map_err(metadata_error)?;
        match record {
            Some(record) => {
                let url = self.signed(key, SignedOperation::Get, self.url_ttl).await?;
                Ok(Some(ObjectMetadata { record, url }))
            }
            None => Ok(None),
        }
    }

    /// A signed download URL for `key`.  Does not consult the index.
    pub async fn get_url(&self, key: &str, ttl: Option<Duration>) -> Result<String, SyncError> {
        validate_key(key)?;
        self.guard("read_key", self.gate.check_read_key(&self.bucket, key))
            .await?;
        self.signed(key, SignedOperation::Get, ttl.unwrap_or(self.url_ttl))
            .await
    }

    /// One page of `bucket`'s records, resuming after `cursor`.
    pub async fn page_metadata(
        &self,
        bucket: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Page, SyncError> {
        if bucket.is_empty() {
            return Err(SyncError::invalid("bucket must not be empty"));
        }
        self.guard("read_bucket", self.gate.check_read_bucket(bucket))
            .await?;
        let cursor = cursor
            .filter(|c| !c.is_empty())
            .map(|c| Cursor::decode_for(bucket, c))
            .transpose()?;
        let limit = self.page_limit(limit);
        self.engine
            .metadata()
            .scan(bucket, cursor, limit)
            .await
            .map_err(metadata_error)
    }

    /// Up to `limit` records of `bucket` in scan order, starting after
    /// `cursor`.  Unlike [`page_metadata`](Self::page_metadata) this
    /// follows continue cursors until `limit` records are collected and
    /// drops the cursor state.
    pub async fn list_metadata(
        &self,
        bucket: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<MetadataRecord>, SyncError> {
        let limit = self.page_limit(limit);
        let mut records = Vec::new();
        let mut cursor: Option<String> = cursor.map(str::to_string);
        while records.len() < limit {
            let page = self
                .page_metadata(bucket, cursor.as_deref(), Some(limit - records.len()))
                .await?;
            records.extend(page.page);
            if page.is_done {
                break;
            }
            cursor = Some(page.continue_cursor);
        }
        records.truncate(limit);
        Ok(records)
    }

    /// Remove `key`'s record now and schedule the object's deletion.
    ///
    /// Returns the deletion job id.  Physical deletion failures are not
    /// reported here; see [`ClientBuilder::on_deletion_complete`].
    pub async fn delete_object(&self, key: &str) -> Result<JobId, SyncError> {
        validate_key(key)?;
        self.guard("delete", self.gate.check_delete(&self.bucket, key))
            .await?;
        self.effects.on_delete(&self.bucket, key).await?;
        self.engine.delete_key(&self.bucket, key).await
    }

    /// Upload `body` from the server side and sync its metadata.
    /// Returns the key.
    pub async fn store(&self, body: Bytes, options: StoreOptions) -> Result<String, SyncError> {
        self.guard("upload", self.gate.check_upload(&self.bucket)).await?;
        let key = self.upload_key(options.key.as_deref()).await?;
        self.effects.on_upload(&self.bucket, &key).await?;
        let upserted = self
            .engine
            .store_bytes(
                &self.bucket,
                &key,
                body,
                options.content_type,
                options.sha256.as_deref(),
            )
            .await?;
        self.after_sync(&key, &upserted, None).await?;
        Ok(key)
    }

    /// Fetch `url` and [`store`](Self::store) the response body.
    ///
    /// The response's `Content-Type` is used unless `options` sets one.
    pub async fn store_from_url(&self, url: &str, mut options: StoreOptions) -> Result<String, SyncError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| SyncError::invalid(format!("invalid URL {url}: {e}")))?;
        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .map_err(|e| SyncError::TransientStore(e.into()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::invalid(format!("fetching {url} returned {status}")));
        }
        if options.content_type.is_none() {
            options.content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::TransientStore(e.into()))?;
        self.store(body, options).await
    }

    /// The object's bytes, or `None` if the store does not have it.
    pub async fn get_object(&self, key: &str) -> Result<Option<StoredObject>, SyncError> {
        validate_key(key)?;
        self.guard("read_key", self.gate.check_read_key(&self.bucket, key))
            .await?;
        self.engine
            .objects()
            .get_object(&self.bucket, key)
            .await
            .map_err(object_store_error)
    }

    /// Status of a deletion job.
    pub async fn deletion_status(&self, job_id: JobId) -> Result<JobStatus, SyncError> {
        self.engine
            .executor()
            .status(job_id)
            .await?
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Cancel a pending deletion job.  Returns `false` if it had already
    /// finished.
    pub async fn cancel_deletion(&self, job_id: JobId) -> Result<bool, SyncError> {
        self.deletion_status(job_id).await?;
        Ok(self.engine.executor().cancel(job_id).await?)
    }

    /// Forget a finished deletion job.  Returns `false` while it is
    /// still running.
    pub async fn cleanup_deletion(&self, job_id: JobId) -> Result<bool, SyncError> {
        self.deletion_status(job_id).await?;
        Ok(self.engine.executor().cleanup(job_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::retry::RunResult;
    use crate::storage::backend::{sha256_base64, PutOptions};
    use crate::storage::memory::MemoryObjectStore;
    use crate::sync::DeletionOutcome;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct Fixture {
        objects: Arc<MemoryObjectStore>,
        executor: Arc<InProcessExecutor>,
        client: Client,
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_backoff: Duration::from_millis(1),
            base: 2.0,
            max_failures: 4,
            jitter: false,
        }
    }

    fn fixture_with(configure: impl FnOnce(ClientBuilder) -> ClientBuilder) -> Fixture {
        let objects = Arc::new(MemoryObjectStore::new("http://localhost:9020"));
        let metadata = Arc::new(MemoryMetadataStore::new());
        let executor = Arc::new(InProcessExecutor::new());
        let builder = Client::builder("photos", objects.clone(), metadata)
            .executor(executor.clone())
            .retry_policy(fast_policy());
        Fixture {
            objects,
            executor,
            client: configure(builder).build(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|b| b)
    }

    fn target(url: &str) -> &str {
        url.strip_prefix("http://localhost:9020").unwrap()
    }

    /// Upload the way a browser would: PUT to the signed URL.
    async fn upload(f: &Fixture, url: &str, body: Vec<u8>, content_type: &str) {
        f.objects
            .put_signed(target(url), Bytes::from(body), Some(content_type.to_string()))
            .await
            .unwrap();
    }

    #[derive(Default)]
    struct DenyDelete;

    impl PermissionGate for DenyDelete {
        fn check_delete<'a>(&'a self, _bucket: &'a str, _key: &'a str) -> HookFuture<'a> {
            Box::pin(async { Err(SyncError::denied("deletes are disabled")) })
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl EffectHooks for Recorder {
        fn on_upload<'a>(&'a self, _bucket: &'a str, key: &'a str) -> HookFuture<'a> {
            self.events.lock().expect("mutex poisoned").push(format!("upload:{key}"));
            Box::pin(async { Ok(()) })
        }

        fn on_sync_metadata<'a>(
            &'a self,
            _bucket: &'a str,
            key: &'a str,
            _record: &'a MetadataRecord,
            is_new: bool,
        ) -> HookFuture<'a> {
            self.events
                .lock()
                .expect("mutex poisoned")
                .push(format!("sync:{key}:{is_new}"));
            Box::pin(async { Ok(()) })
        }

        fn on_delete<'a>(&'a self, _bucket: &'a str, key: &'a str) -> HookFuture<'a> {
            self.events.lock().expect("mutex poisoned").push(format!("delete:{key}"));
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_photo_lifecycle() {
        let f = fixture();
        let upload_url = f.client.generate_upload_url(Some("abc123")).await.unwrap();
        assert_eq!(upload_url.key, "abc123");
        upload(&f, &upload_url.url, vec![7u8; 2048], "image/png").await;

        let record = f.client.sync_metadata("abc123", None).await.unwrap();
        assert_eq!(record.bucket, "photos");
        assert_eq!(record.key, "abc123");
        assert_eq!(record.size, Some(2048));
        assert_eq!(record.content_type.as_deref(), Some("image/png"));

        let meta = f.client.get_metadata("abc123").await.unwrap().unwrap();
        assert_eq!(meta.record, record);
        let fetched = f.objects.get_signed(target(&meta.url)).await.unwrap();
        assert_eq!(fetched.data.len(), 2048);

        let job = f.client.delete_object("abc123").await.unwrap();
        assert!(f.client.get_metadata("abc123").await.unwrap().is_none());

        assert!(matches!(
            f.executor.wait(job).await,
            Some(RunResult::Success(_))
        ));
        assert_eq!(
            f.client.deletion_status(job).await.unwrap(),
            JobStatus::Completed(RunResult::Success(serde_json::json!({
                "bucket": "photos",
                "key": "abc123"
            })))
        );
        assert!(!f.objects.contains("photos", "abc123").await);
    }

    #[tokio::test]
    async fn test_generated_keys_are_unique_uuids() {
        let f = fixture();
        let a = f.client.generate_upload_url(None).await.unwrap();
        let b = f.client.generate_upload_url(None).await.unwrap();
        assert_ne!(a.key, b.key);
        assert!(Uuid::parse_str(&a.key).is_ok());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_no_record() {
        let f = fixture();
        let up = f.client.generate_upload_url(Some("k")).await.unwrap();
        upload(&f, &up.url, b"actual".to_vec(), "text/plain").await;

        let err = f
            .client
            .sync_metadata("k", Some(&sha256_base64(b"expected")))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ChecksumMismatch { .. }));
        assert!(f.client.get_metadata("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_custom_key() {
        let f = fixture();
        let first = f.client.generate_upload_url(Some("dup")).await.unwrap();
        upload(&f, &first.url, b"x".to_vec(), "text/plain").await;
        f.client.sync_metadata("dup", None).await.unwrap();

        let err = f.client.generate_upload_url(Some("dup")).await.unwrap_err();
        assert!(matches!(err, SyncError::DuplicateKey { .. }));

        let err = f
            .client
            .store(
                Bytes::from_static(b"y"),
                StoreOptions {
                    key: Some("dup".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let f = fixture();
        assert!(matches!(
            f.client.generate_upload_url(Some("")).await,
            Err(SyncError::InvalidArgument { .. })
        ));
        let long = "k".repeat(MAX_KEY_BYTES + 1);
        assert!(matches!(
            f.client.sync_metadata(&long, None).await,
            Err(SyncError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_before_upload_is_not_found() {
        let f = fixture();
        let up = f.client.generate_upload_url(None).await.unwrap();
        let err = f.client.sync_metadata(&up.key, None).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let f = fixture();
        let up = f.client.generate_upload_url(Some("k")).await.unwrap();
        upload(&f, &up.url, b"same".to_vec(), "text/plain").await;
        let first = f.client.sync_metadata("k", None).await.unwrap();
        let second = f.client.sync_metadata("k", None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_denied_delete_touches_nothing() {
        let f = fixture_with(|b| b.permissions(Arc::new(DenyDelete)));
        let key = f
            .client
            .store(Bytes::from_static(b"keep me"), StoreOptions::default())
            .await
            .unwrap();

        let err = f.client.delete_object(&key).await.unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied { .. }));
        assert!(f.client.get_metadata(&key).await.unwrap().is_some());
        assert!(f.objects.contains("photos", &key).await);
        assert_eq!(f.executor.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn test_effect_hooks_run_in_order() {
        let recorder = Arc::new(Recorder::default());
        let f = fixture_with(|b| b.effects(recorder.clone()));

        let up = f.client.generate_upload_url(Some("k")).await.unwrap();
        upload(&f, &up.url, b"1".to_vec(), "text/plain").await;
        f.client.sync_metadata("k", None).await.unwrap();
        f.client.sync_metadata("k", None).await.unwrap();
        f.client.delete_object("k").await.unwrap();

        let events = recorder.events.lock().expect("mutex poisoned").clone();
        assert_eq!(
            events,
            ["upload:k", "sync:k:true", "upload:k", "sync:k:false", "delete:k"]
        );
    }

    #[tokio::test]
    async fn test_failing_effect_hook_aborts_delete() {
        struct Refuse;
        impl EffectHooks for Refuse {
            fn on_delete<'a>(&'a self, _bucket: &'a str, _key: &'a str) -> HookFuture<'a> {
                Box::pin(async { Err(SyncError::denied("still referenced")) })
            }
        }
        let f = fixture_with(|b| b.effects(Arc::new(Refuse)));
        let key = f
            .client
            .store(Bytes::from_static(b"x"), StoreOptions::default())
            .await
            .unwrap();
        assert!(f.client.delete_object(&key).await.is_err());
        assert!(f.client.get_metadata(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pagination_yields_every_record_once() {
        let f = fixture();
        let mut expected = HashSet::new();
        for i in 0..23 {
            let key = format!("k{i:02}");
            f.objects
                .put_object("photos", &key, Bytes::from(vec![1u8; i]), PutOptions::default())
                .await
                .unwrap();
            f.client.sync_metadata(&key, None).await.unwrap();
            expected.insert(key);
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = f
                .client
                .page_metadata("photos", cursor.as_deref(), Some(5))
                .await
                .unwrap();
            seen.extend(page.page.into_iter().map(|r| r.key));
            if page.is_done {
                break;
            }
            cursor = Some(page.continue_cursor);
        }
        assert_eq!(seen.len(), expected.len());
        assert_eq!(seen.into_iter().collect::<HashSet<_>>(), expected);
    }

    #[tokio::test]
    async fn test_cursor_from_other_bucket_rejected() {
        let f = fixture();
        let page = f.client.page_metadata("photos", None, None).await.unwrap();
        let err = f
            .client
            .page_metadata("docs", Some(&page.continue_cursor), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_list_metadata_limit() {
        let f = fixture();
        for _ in 0..4 {
            f.client
                .store(Bytes::from_static(b"x"), StoreOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(f.client.list_metadata("photos", None, Some(3)).await.unwrap().len(), 3);
        assert_eq!(f.client.list_metadata("photos", None, Some(0)).await.unwrap().len(), 4);
        assert!(f.client.list_metadata("empty", None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_metadata_resumes_from_cursor() {
        let f = fixture();
        let mut keys = Vec::new();
        for _ in 0..5 {
            keys.push(
                f.client
                    .store(Bytes::from_static(b"x"), StoreOptions::default())
                    .await
                    .unwrap(),
            );
        }
        let first = f.client.page_metadata("photos", None, Some(2)).await.unwrap();
        assert!(!first.is_done);
        let rest = f
            .client
            .list_metadata("photos", Some(&first.continue_cursor), Some(10))
            .await
            .unwrap();
        let rest: Vec<_> = rest.into_iter().map(|r| r.key).collect();
        assert_eq!(rest, keys[2..]);

        let err = f
            .client
            .list_metadata("photos", Some("not a cursor"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument { .. }));
    }

    /// Fails `on_sync_metadata`, optionally only for replacements.
    struct RejectSync {
        only_replacements: bool,
    }

    impl EffectHooks for RejectSync {
        fn on_sync_metadata<'a>(
            &'a self,
            _bucket: &'a str,
            _key: &'a str,
            _record: &'a MetadataRecord,
            is_new: bool,
        ) -> HookFuture<'a> {
            let reject = !is_new || !self.only_replacements;
            Box::pin(async move {
                if reject {
                    Err(SyncError::denied("mirror table rejected the record"))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn test_failing_sync_hook_leaves_no_new_record() {
        let f = fixture_with(|b| {
            b.effects(Arc::new(RejectSync {
                only_replacements: false,
            }))
        });
        let up = f.client.generate_upload_url(Some("cat.png")).await.unwrap();
        upload(&f, &up.url, vec![1u8; 16], "image/png").await;

        let err = f.client.sync_metadata("cat.png", None).await.unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied { .. }));
        assert!(f.client.get_metadata("cat.png").await.unwrap().is_none());

        let err = f
            .client
            .store(Bytes::from_static(b"x"), StoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied { .. }));
        assert!(f.client.list_metadata("photos", None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_sync_hook_restores_replaced_record() {
        let f = fixture_with(|b| {
            b.effects(Arc::new(RejectSync {
                only_replacements: true,
            }))
        });
        let up = f.client.generate_upload_url(Some("doc")).await.unwrap();
        upload(&f, &up.url, vec![1u8; 10], "text/plain").await;
        let original = f.client.sync_metadata("doc", None).await.unwrap();

        f.objects
            .put_object("photos", "doc", Bytes::from(vec![2u8; 99]), PutOptions::default())
            .await
            .unwrap();
        assert!(f.client.sync_metadata("doc", None).await.is_err());

        let kept = f.client.get_metadata("doc").await.unwrap().unwrap();
        assert_eq!(kept.record, original);
        assert_eq!(kept.record.size, Some(10));
    }

    #[tokio::test]
    async fn test_store_and_get_object() {
        let f = fixture();
        let key = f
            .client
            .store(
                Bytes::from_static(b"hello"),
                StoreOptions {
                    content_type: Some("text/plain".to_string()),
                    sha256: Some(
                        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
                            .to_string(),
                    ),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let obj = f.client.get_object(&key).await.unwrap().unwrap();
        assert_eq!(obj.data.as_ref(), b"hello");
        assert_eq!(obj.content_type.as_deref(), Some("text/plain"));
        let meta = f.client.get_metadata(&key).await.unwrap().unwrap();
        assert_eq!(meta.record.sha256, Some(sha256_base64(b"hello")));
        assert!(f.client.get_object("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_from_url_rejects_bad_url() {
        let f = fixture();
        let err = f
            .client
            .store_from_url("not a url", StoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_get_url_without_record() {
        let f = fixture();
        let url = f
            .client
            .get_url("anything", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(url.contains("X-Amz-Expires=30"));
    }

    #[tokio::test]
    async fn test_read_only_gate() {
        let f = fixture_with(|b| b.permissions(Arc::new(crate::permissions::ReadOnly)));
        assert!(matches!(
            f.client.generate_upload_url(None).await,
            Err(SyncError::PermissionDenied { .. })
        ));
        assert!(f.client.page_metadata("photos", None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_deletion_report_and_unknown_job() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let f = fixture_with(move |b| {
            b.on_deletion_complete(move |report| {
                sink.lock().expect("mutex poisoned").push(report);
            })
        });
        let key = f
            .client
            .store(Bytes::from_static(b"x"), StoreOptions::default())
            .await
            .unwrap();
        let job = f.client.delete_object(&key).await.unwrap();
        f.executor.wait(job).await.unwrap();

        let reports = reports.lock().expect("mutex poisoned");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].key, key);
        assert!(matches!(reports[0].outcome, DeletionOutcome::Deleted));
        drop(reports);

        assert!(f.client.cleanup_deletion(job).await.unwrap());
        assert!(matches!(
            f.client.deletion_status(job).await,
            Err(SyncError::JobNotFound { .. })
        ));
        assert!(matches!(
            f.client.cancel_deletion(JobId::new()).await,
            Err(SyncError::JobNotFound { .. })
        ));
    }
}
