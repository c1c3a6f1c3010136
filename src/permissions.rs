//! Authorization and effect hooks.
//!
//! A [`PermissionGate`] is consulted before every guarded operation; any
//! check that returns an error aborts the operation before a side effect
//! happens.  [`EffectHooks`] run once the check has passed and let the
//! host mirror state into its own tables.  An effect hook error aborts
//! the operation exactly like a failed check.
//!
//! Every method has a default that allows (or does nothing), so an
//! implementation only overrides the hooks it cares about.

use std::future::Future;
use std::pin::Pin;

use crate::errors::SyncError;
use crate::metadata::store::MetadataRecord;

/// Future returned by every hook.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send + 'a>>;

fn allow<'a>() -> HookFuture<'a> {
    Box::pin(std::future::ready(Ok(())))
}

/// Authorization checks.
pub trait PermissionGate: Send + Sync + 'static {
    /// Issuing upload URLs, syncing metadata and server-side stores.
    fn check_upload<'a>(&'a self, _bucket: &'a str) -> HookFuture<'a> {
        allow()
    }

    /// Reading one object's metadata, URL or bytes.
    fn check_read_key<'a>(&'a self, _bucket: &'a str, _key: &'a str) -> HookFuture<'a> {
        allow()
    }

    /// Listing a bucket.
    fn check_read_bucket<'a>(&'a self, _bucket: &'a str) -> HookFuture<'a> {
        allow()
    }

    /// Deleting an object.
    fn check_delete<'a>(&'a self, _bucket: &'a str, _key: &'a str) -> HookFuture<'a> {
        allow()
    }
}

/// Side effects mirrored into the host application.
pub trait EffectHooks: Send + Sync + 'static {
    /// An upload for `key` passed `check_upload` and is about to be
    /// confirmed or stored.
    fn on_upload<'a>(&'a self, _bucket: &'a str, _key: &'a str) -> HookFuture<'a> {
        allow()
    }

    /// `record` was written; `is_new` is false when it replaced one.
    fn on_sync_metadata<'a>(
        &'a self,
        _bucket: &'a str,
        _key: &'a str,
        _record: &'a MetadataRecord,
        _is_new: bool,
    ) -> HookFuture<'a> {
        allow()
    }

    /// `key` passed `check_delete` and is about to be removed.
    fn on_delete<'a>(&'a self, _bucket: &'a str, _key: &'a str) -> HookFuture<'a> {
        allow()
    }
}

/// Allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionGate for AllowAll {}

/// Does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEffects;

impl EffectHooks for NoEffects {}

/// Allows reads, denies uploads and deletes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadOnly;

impl PermissionGate for ReadOnly {
    fn check_upload<'a>(&'a self, bucket: &'a str) -> HookFuture<'a> {
        let err = SyncError::denied(format!("bucket {bucket} is read-only"));
        Box::pin(std::future::ready(Err(err)))
    }

    fn check_delete<'a>(&'a self, bucket: &'a str, _key: &'a str) -> HookFuture<'a> {
        let err = SyncError::denied(format!("bucket {bucket} is read-only"));
        Box::pin(std::future::ready(Err(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all() {
        let gate = AllowAll;
        assert!(gate.check_upload("b").await.is_ok());
        assert!(gate.check_read_key("b", "k").await.is_ok());
        assert!(gate.check_read_bucket("b").await.is_ok());
        assert!(gate.check_delete("b", "k").await.is_ok());
    }

    #[tokio::test]
    async fn test_read_only() {
        let gate = ReadOnly;
        assert!(matches!(
            gate.check_upload("b").await,
            Err(SyncError::PermissionDenied { .. })
        ));
        assert!(matches!(
            gate.check_delete("b", "k").await,
            Err(SyncError::PermissionDenied { .. })
        ));
        assert!(gate.check_read_key("b", "k").await.is_ok());
        assert!(gate.check_read_bucket("b").await.is_ok());
    }

    #[tokio::test]
    async fn test_overriding_one_hook() {
        struct OnlyOwner;
        impl PermissionGate for OnlyOwner {
            fn check_read_key<'a>(&'a self, _bucket: &'a str, key: &'a str) -> HookFuture<'a> {
                Box::pin(async move {
                    if key.starts_with("owner/") {
                        Ok(())
                    } else {
                        Err(SyncError::denied("not yours"))
                    }
                })
            }
        }

        let gate = OnlyOwner;
        assert!(gate.check_read_key("b", "owner/x").await.is_ok());
        assert!(gate.check_read_key("b", "other/x").await.is_err());
        assert!(gate.check_upload("b").await.is_ok());
    }
}
