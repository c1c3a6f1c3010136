//! Retried execution of side-effecting actions.
//!
//! The [`RetryExecutor`] trait is the contract the sync engine consumes
//! for physical object deletion: submit a named action with JSON
//! arguments and a [`BackoffPolicy`], poll its [`JobStatus`], cancel it,
//! and be told about the terminal [`RunResult`] through an optional
//! completion callback.  [`inprocess::InProcessExecutor`] runs jobs as
//! tokio tasks.

pub mod inprocess;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SyncError;

/// Identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Allocate a fresh random job id.
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| SyncError::invalid(format!("malformed job id: {s}")))
    }
}

/// Exponential backoff settings.
///
/// The n-th retry waits `initial_backoff * base^(n-1)`.  A job is marked
/// failed once it has failed more than `max_failures` times, so it runs
/// at most `max_failures + 1` times in total.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_backoff: Duration,
    pub base: f64,
    pub max_failures: u32,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            base: 2.0,
            max_failures: 4,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after the `failures`-th failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1) as i32;
        let mut millis = self.initial_backoff.as_millis() as f64 * self.base.powi(exponent);
        if self.jitter {
            millis *= rand::thread_rng().gen_range(0.5..1.5);
        }
        Duration::from_millis(millis.round() as u64)
    }

    /// Whether another attempt is allowed after `failures` failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures <= self.max_failures
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    /// Attempts made, including the last one.
    pub attempts: u32,
    /// Error of the last attempt.
    pub error: String,
    /// `false` when the action failed with a non-retryable error.
    pub retries_exhausted: bool,
}

impl JobFailure {
    /// Convert into the error reported to completion callbacks.
    pub fn to_error(&self) -> SyncError {
        if self.retries_exhausted {
            SyncError::RetryExhausted {
                attempts: self.attempts,
                last_error: self.error.clone(),
            }
        } else {
            SyncError::Internal(anyhow::anyhow!("{}", self.error))
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.retries_exhausted {
            write!(f, "gave up after {} attempts: {}", self.attempts, self.error)
        } else {
            write!(f, "failed on attempt {}: {}", self.attempts, self.error)
        }
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum RunResult {
    Success(serde_json::Value),
    Failed(JobFailure),
    Canceled,
}

/// Observable state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "state", content = "detail")]
pub enum JobStatus {
    InProgress { attempts: u32 },
    Completed(RunResult),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed(_))
    }
}

/// Callback invoked once with the terminal result of a job.
pub type OnComplete = Box<dyn FnOnce(JobId, &RunResult) + Send + 'static>;

/// A job submission: which action to run, with what, and how persistently.
pub struct JobSpec {
    pub action: String,
    pub arguments: serde_json::Value,
    pub policy: BackoffPolicy,
    pub on_complete: Option<OnComplete>,
}

impl JobSpec {
    pub fn new(action: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            arguments,
            policy: BackoffPolicy::default(),
            on_complete: None,
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(JobId, &RunResult) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("action", &self.action)
            .field("arguments", &self.arguments)
            .field("policy", &self.policy)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// A named side-effecting action.  Must be idempotent: it may run more
/// than once for the same arguments.
pub trait RetryAction: Send + Sync + 'static {
    /// Run once.  Errors for which [`SyncError::is_retryable`] holds are
    /// retried; any other error fails the job immediately.
    fn run(
        &self,
        arguments: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, SyncError>> + Send + '_>>;
}

/// Async retry executor contract.
pub trait RetryExecutor: Send + Sync + 'static {
    /// Make `action` available under `name`.  Re-registering replaces it.
    fn register(&self, name: &str, action: Arc<dyn RetryAction>);

    /// Start a job, returning its id.  Fails if the action is unknown.
    fn submit(
        &self,
        spec: JobSpec,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<JobId>> + Send + '_>>;

    /// Current status, or `None` for an unknown (or cleaned up) job.
    fn status(
        &self,
        id: JobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<JobStatus>>> + Send + '_>>;

    /// Cancel an in-progress job.  Returns `false` if it had already
    /// reached a terminal state or is unknown.
    fn cancel(
        &self,
        id: JobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Forget a terminal job.  Returns `false` if the job is unknown or
    /// still in progress.
    fn cleanup(
        &self,
        id: JobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;
}
