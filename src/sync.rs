//! The sync engine: reconciles object store truth into the metadata index
//! and drives eventual physical deletion.
//!
//! Uploads are confirmed with a HEAD against the object store; the
//! attributes it reports are written to the index as one upsert.  Deletes
//! remove the index record synchronously, then hand the physical delete
//! to the [`RetryExecutor`].  Between the two steps an object may exist
//! without a record; that window is expected and never reported as an
//! error.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::SyncError;
use crate::metadata::store::{MetadataRecord, MetadataStore, Upserted};
use crate::metrics::{DELETIONS_SCHEDULED_TOTAL, SYNC_OPERATIONS_TOTAL};
use crate::retry::{BackoffPolicy, JobId, JobSpec, RetryAction, RetryExecutor, RunResult};
use crate::storage::backend::{normalize_sha256, sha256_base64, ObjectStore, PutOptions};

/// Name under which the physical delete action is registered.
pub const DELETE_OBJECT_ACTION: &str = "metasync.delete_object";

/// How a scheduled physical deletion ended.
#[derive(Debug)]
pub enum DeletionOutcome {
    Deleted,
    Failed(SyncError),
    Canceled,
}

/// Delivered once per scheduled deletion when its job ends.
#[derive(Debug)]
pub struct DeletionReport {
    pub bucket: String,
    pub key: String,
    pub job_id: JobId,
    pub outcome: DeletionOutcome,
}

/// Receives deletion reports.
pub type DeletionCallback = Arc<dyn Fn(DeletionReport) + Send + Sync + 'static>;

/// Map an object store error.  Errors that already carry a [`SyncError`]
/// keep it; anything else is a transient store failure.
pub(crate) fn object_store_error(err: anyhow::Error) -> SyncError {
    match err.downcast::<SyncError>() {
        Ok(err) => err,
        Err(err) => SyncError::TransientStore(err),
    }
}

/// Map a metadata store error.
pub(crate) fn metadata_error(err: anyhow::Error) -> SyncError {
    match err.downcast::<SyncError>() {
        Ok(err) => err,
        Err(err) => SyncError::Internal(err),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DeleteArgs {
    bucket: String,
    key: String,
}

/// Idempotent physical delete, run by the retry executor.
struct DeleteObjectAction {
    objects: Arc<dyn ObjectStore>,
}

impl RetryAction for DeleteObjectAction {
    fn run(
        &self,
        arguments: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, SyncError>> + Send + '_>> {
        Box::pin(async move {
            let args: DeleteArgs = serde_json::from_value(arguments.clone())
                .map_err(|e| SyncError::invalid(format!("bad delete arguments: {e}")))?;
            self.objects
                .delete_object(&args.bucket, &args.key)
                .await
                .map_err(object_store_error)?;
            debug!(bucket = %args.bucket, key = %args.key, "object physically deleted");
            Ok(arguments)
        })
    }
}

/// Orchestrates the upload confirmation and deletion protocols.
pub struct SyncEngine {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    executor: Arc<dyn RetryExecutor>,
    policy: BackoffPolicy,
    on_deletion: Option<DeletionCallback>,
}

impl SyncEngine {
    /// Create an engine and register the delete action with `executor`.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        executor: Arc<dyn RetryExecutor>,
        policy: BackoffPolicy,
    ) -> Self {
        executor.register(
            DELETE_OBJECT_ACTION,
            Arc::new(DeleteObjectAction {
                objects: objects.clone(),
            }),
        );
        Self {
            objects,
            metadata,
            executor,
            policy,
            on_deletion: None,
        }
    }

    /// Report every finished deletion to `callback`.
    pub fn with_deletion_callback(mut self, callback: DeletionCallback) -> Self {
        self.on_deletion = Some(callback);
        self
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn executor(&self) -> &Arc<dyn RetryExecutor> {
        &self.executor
    }

    /// HEAD `bucket/key` and write what the store reports into the index.
    ///
    /// Fails with [`SyncError::NotFound`] if the object does not exist.
    /// When `expected_sha256` is given and the store reports a checksum,
    /// the two must match or nothing is written.
    pub async fn confirm_upload(
        &self,
        bucket: &str,
        key: &str,
        expected_sha256: Option<&str>,
    ) -> Result<Upserted, SyncError> {
        let expected = expected_sha256.map(normalize_sha256).transpose()?;

        let head = self
            .objects
            .head_object(bucket, key)
            .await
            .map_err(object_store_error)?;
        let Some(head) = head else {
            counter!(SYNC_OPERATIONS_TOTAL, "outcome" => "not_found").increment(1);
            return Err(SyncError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        };

        match (&expected, &head.sha256) {
            (Some(expected), Some(actual)) if expected != actual => {
                counter!(SYNC_OPERATIONS_TOTAL, "outcome" => "checksum_mismatch").increment(1);
                warn!(bucket, key, %expected, %actual, "checksum mismatch, metadata not written");
                return Err(SyncError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
            (Some(_), None) => {
                debug!(bucket, key, "object store reported no checksum, skipping comparison");
            }
            _ => {}
        }

        let link = self.objects.object_url(bucket, key).map_err(SyncError::Internal)?;
        let record = MetadataRecord {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: head.content_type,
            size: head.size,
            sha256: head.sha256,
            last_modified: head.last_modified,
            link,
            created_at: Utc::now(),
        };
        let upserted = self.metadata.upsert(record).await.map_err(metadata_error)?;

        let outcome = if upserted.created { "created" } else { "replaced" };
        counter!(SYNC_OPERATIONS_TOTAL, "outcome" => outcome).increment(1);
        info!(bucket, key, outcome, size = ?upserted.record.size, "metadata synced");
        Ok(upserted)
    }

    /// PUT `body` to `bucket/key`, then confirm it.
    ///
    /// The body's SHA-256 is computed locally, checked against
    /// `expected_sha256` before anything is written, sent with the PUT,
    /// and required to match what the store reports afterwards.
    pub async fn store_bytes(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
        expected_sha256: Option<&str>,
    ) -> Result<Upserted, SyncError> {
        let computed = sha256_base64(&body);
        if let Some(expected) = expected_sha256 {
            let expected = normalize_sha256(expected)?;
            if expected != computed {
                counter!(SYNC_OPERATIONS_TOTAL, "outcome" => "checksum_mismatch").increment(1);
                return Err(SyncError::ChecksumMismatch {
                    expected,
                    actual: computed,
                });
            }
        }

        debug!(bucket, key, size = body.len(), "storing object");
        self.objects
            .put_object(
                bucket,
                key,
                body,
                PutOptions {
                    content_type,
                    sha256: Some(computed.clone()),
                },
            )
            .await
            .map_err(object_store_error)?;

        self.confirm_upload(bucket, key, Some(&computed)).await
    }

    /// Remove the index record for `bucket/key`, then schedule the
    /// physical delete.  Returns the deletion job's id.
    ///
    /// A missing record is not an error.  If scheduling fails the error
    /// is returned even though the record is already gone.
    pub async fn delete_key(&self, bucket: &str, key: &str) -> Result<JobId, SyncError> {
        let existed = self
            .metadata
            .delete(bucket, key)
            .await
            .map_err(metadata_error)?;
        debug!(bucket, key, existed, "metadata record removed");

        let arguments = serde_json::to_value(DeleteArgs {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
        .map_err(|e| SyncError::Internal(e.into()))?;
        let mut spec = JobSpec::new(DELETE_OBJECT_ACTION, arguments).with_policy(self.policy.clone());

        if let Some(callback) = self.on_deletion.clone() {
            let bucket = bucket.to_string();
            let key = key.to_string();
            spec = spec.on_complete(move |job_id, result| {
                let outcome = match result {
                    RunResult::Success(_) => DeletionOutcome::Deleted,
                    RunResult::Failed(failure) => DeletionOutcome::Failed(failure.to_error()),
                    RunResult::Canceled => DeletionOutcome::Canceled,
                };
                callback(DeletionReport {
                    bucket,
                    key,
                    job_id,
                    outcome,
                });
            });
        }

        let job_id = self.executor.submit(spec).await.map_err(|e| {
            warn!(bucket, key, error = %e, "failed to schedule physical deletion");
            SyncError::Internal(e)
        })?;
        counter!(DELETIONS_SCHEDULED_TOTAL).increment(1);
        info!(bucket, key, job_id = %job_id, "physical deletion scheduled");
        Ok(job_id)
    }
}
