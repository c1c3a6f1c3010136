//! In-process retry executor.
//!
//! Each job runs as a tokio task that retries its action with
//! exponential backoff.  Job state lives in a mutex-guarded map; every
//! job publishes its terminal [`RunResult`] on a `watch` channel so
//! waiters do not have to poll.
//!
//! A finished job stays queryable for a retention period (five minutes
//! by default) and is then evicted.
//!
//! Jobs do not survive a process restart.  Callers that need durable
//! at-least-once semantics can plug in another [`RetryExecutor`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::{
    JobFailure, JobId, JobSpec, JobStatus, OnComplete, RetryAction, RetryExecutor, RunResult,
};
use crate::metrics::{JOBS_COMPLETED_TOTAL, RETRY_ATTEMPTS_TOTAL};

/// How long a finished job stays queryable.
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(300);

struct JobEntry {
    action: String,
    attempts: u32,
    /// Set once a terminal result has been claimed, before it is published.
    finished: bool,
    result: watch::Sender<Option<RunResult>>,
    handle: Option<AbortHandle>,
    on_complete: Option<OnComplete>,
}

impl JobEntry {
    fn status(&self) -> JobStatus {
        match self.result.borrow().clone() {
            Some(result) => JobStatus::Completed(result),
            None => JobStatus::InProgress {
                attempts: self.attempts,
            },
        }
    }
}

type JobTable = Arc<Mutex<HashMap<JobId, JobEntry>>>;

/// Retry executor backed by tokio tasks.
pub struct InProcessExecutor {
    actions: RwLock<HashMap<String, Arc<dyn RetryAction>>>,
    jobs: JobTable,
    retention: Duration,
}

impl InProcessExecutor {
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            retention: DEFAULT_JOB_RETENTION,
        }
    }

    /// Evict finished jobs `retention` after they complete.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Wait until the job reaches a terminal state.  Returns `None` for
    /// an unknown job.
    pub async fn wait(&self, id: JobId) -> Option<RunResult> {
        let mut rx = {
            let jobs = self.jobs.lock().expect("mutex poisoned");
            jobs.get(&id)?.result.subscribe()
        };
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return Some(result);
            }
            if rx.changed().await.is_err() {
                // Sender dropped by cleanup; the last value is final.
                return rx.borrow().clone();
            }
        }
    }

    /// Number of jobs currently tracked (in progress or terminal).
    pub fn tracked_jobs(&self) -> usize {
        self.jobs.lock().expect("mutex poisoned").len()
    }

    fn record_attempt(jobs: &JobTable, id: JobId) -> u32 {
        let mut jobs = jobs.lock().expect("mutex poisoned");
        match jobs.get_mut(&id) {
            Some(entry) => {
                entry.attempts += 1;
                entry.attempts
            }
            None => 0,
        }
    }

    /// Record the terminal result unless the job already has one
    /// (cancellation wins races against a finishing task).
    ///
    /// The completion callback runs before the result is published, so a
    /// waiter never observes a finished job whose callback is pending.
    fn finish(jobs: &JobTable, id: JobId, result: RunResult, retention: Duration) {
        let (callback, action) = {
            let mut jobs = jobs.lock().expect("mutex poisoned");
            let Some(entry) = jobs.get_mut(&id) else {
                return;
            };
            if entry.finished {
                return;
            }
            entry.finished = true;
            entry.handle = None;
            (entry.on_complete.take(), entry.action.clone())
        };

        let outcome = match &result {
            RunResult::Success(_) => "succeeded",
            RunResult::Failed(_) => "failed",
            RunResult::Canceled => "canceled",
        };
        counter!(JOBS_COMPLETED_TOTAL, "action" => action.clone(), "result" => outcome)
            .increment(1);
        info!(job_id = %id, action = %action, result = outcome, "job finished");

        if let Some(callback) = callback {
            callback(id, &result);
        }

        if let Some(entry) = jobs.lock().expect("mutex poisoned").get(&id) {
            entry.result.send_replace(Some(result));
        }

        let jobs = jobs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if jobs.lock().expect("mutex poisoned").remove(&id).is_some() {
                debug!(job_id = %id, "finished job evicted");
            }
        });
    }

    async fn drive(
        jobs: JobTable,
        id: JobId,
        action_name: String,
        action: Arc<dyn RetryAction>,
        spec_arguments: serde_json::Value,
        policy: super::BackoffPolicy,
        retention: Duration,
    ) {
        let mut failures = 0u32;
        loop {
            let attempt = Self::record_attempt(&jobs, id);
            debug!(job_id = %id, action = %action_name, attempt, "running job attempt");

            match action.run(spec_arguments.clone()).await {
                Ok(value) => {
                    counter!(RETRY_ATTEMPTS_TOTAL, "action" => action_name.clone(), "outcome" => "ok")
                        .increment(1);
                    Self::finish(&jobs, id, RunResult::Success(value), retention);
                    return;
                }
                Err(err) if err.is_retryable() => {
                    counter!(RETRY_ATTEMPTS_TOTAL, "action" => action_name.clone(), "outcome" => "retryable")
                        .increment(1);
                    failures += 1;
                    if !policy.allows_retry(failures) {
                        warn!(job_id = %id, action = %action_name, attempts = attempt, error = %err, "job exhausted its retries");
                        let failure = JobFailure {
                            attempts: attempt,
                            error: err.to_string(),
                            retries_exhausted: true,
                        };
                        Self::finish(&jobs, id, RunResult::Failed(failure), retention);
                        return;
                    }
                    let delay = policy.delay_for(failures);
                    warn!(
                        job_id = %id,
                        action = %action_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "job attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    counter!(RETRY_ATTEMPTS_TOTAL, "action" => action_name.clone(), "outcome" => "fatal")
                        .increment(1);
                    warn!(job_id = %id, action = %action_name, attempt, error = %err, "job failed permanently");
                    let failure = JobFailure {
                        attempts: attempt,
                        error: err.to_string(),
                        retries_exhausted: false,
                    };
                    Self::finish(&jobs, id, RunResult::Failed(failure), retention);
                    return;
                }
            }
        }
    }
}

impl Default for InProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutor for InProcessExecutor {
    fn register(&self, name: &str, action: Arc<dyn RetryAction>) {
        let mut actions = self.actions.write().expect("rwlock poisoned");
        actions.insert(name.to_string(), action);
    }

    fn submit(
        &self,
        spec: JobSpec,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<JobId>> + Send + '_>> {
        Box::pin(async move {
            let action = {
                let actions = self.actions.read().expect("rwlock poisoned");
                actions.get(&spec.action).cloned()
            };
            let Some(action) = action else {
                anyhow::bail!("no action registered under '{}'", spec.action);
            };

            let id = JobId::new();
            let (result, _) = watch::channel(None);
            {
                let mut jobs = self.jobs.lock().expect("mutex poisoned");
                jobs.insert(
                    id,
                    JobEntry {
                        action: spec.action.clone(),
                        attempts: 0,
                        finished: false,
                        result,
                        handle: None,
                        on_complete: spec.on_complete,
                    },
                );
            }

            let task = tokio::spawn(Self::drive(
                self.jobs.clone(),
                id,
                spec.action.clone(),
                action,
                spec.arguments,
                spec.policy,
                self.retention,
            ));

            {
                let mut jobs = self.jobs.lock().expect("mutex poisoned");
                if let Some(entry) = jobs.get_mut(&id) {
                    if !entry.finished {
                        entry.handle = Some(task.abort_handle());
                    }
                }
            }

            info!(job_id = %id, action = %spec.action, "job submitted");
            Ok(id)
        })
    }

    fn status(
        &self,
        id: JobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<JobStatus>>> + Send + '_>> {
        Box::pin(async move {
            let jobs = self.jobs.lock().expect("mutex poisoned");
            Ok(jobs.get(&id).map(JobEntry::status))
        })
    }

    fn cancel(
        &self,
        id: JobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let handle = {
                let mut jobs = self.jobs.lock().expect("mutex poisoned");
                let Some(entry) = jobs.get_mut(&id) else {
                    return Ok(false);
                };
                if entry.finished {
                    return Ok(false);
                }
                entry.handle.take()
            };
            if let Some(handle) = handle {
                handle.abort();
            }
            Self::finish(&self.jobs, id, RunResult::Canceled, self.retention);
            Ok(true)
        })
    }

    fn cleanup(
        &self,
        id: JobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().expect("mutex poisoned");
            let terminal = jobs
                .get(&id)
                .map(|entry| entry.result.borrow().is_some())
                .unwrap_or(false);
            if terminal {
                jobs.remove(&id);
            }
            Ok(terminal)
        })
    }
}
