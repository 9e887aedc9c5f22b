//! Joint request coordination.
//!
//! All writes go through the store's compare-and-swap. A writer that loses
//! the race reloads the snapshot and re-applies its change, so concurrent
//! member events for one join key never lose updates, and different keys
//! never contend.
//!
//! Completion is a two-step transition. The first writer to move a request
//! out of `InProgress` claims it (`Reporting`) and is the only one that sends
//! the downstream report. The claim owner then settles the request to its
//! final status, or to `Failed` when the report could not be sent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::notifier::JointNotifier;
use super::request::{CompletionReason, JointExecutionRequest, JointStatus, Readiness};
use super::store::{JointRequestStore, JointStoreError};
use crate::clock::{Clock, SystemClock};
use crate::config::JointConfig;
use crate::status::RequestStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JointError {
    #[error("no joint request for join key {0}")]
    UnknownJoinKey(String),

    #[error("joint request {join_key} needs at least one member, got {required_count}")]
    InvalidRequiredCount {
        join_key: String,
        required_count: usize,
    },

    #[error("gave up updating {join_key} after {attempts} conflicting writes")]
    RetriesExhausted { join_key: String, attempts: u32 },

    #[error("joint store error: {0}")]
    Store(#[from] JointStoreError),
}

pub type JointResult<T> = Result<T, JointError>;

/// Ready once every required member finished. Timeouts are ignored.
fn members_finished(request: &JointExecutionRequest) -> Option<CompletionReason> {
    (request.finished_count() >= request.required_count)
        .then_some(CompletionReason::AllMembersFinished)
}

/// Ready by members, or by timeout as of `now`.
fn due_at(now: DateTime<Utc>) -> impl Fn(&JointExecutionRequest) -> Option<CompletionReason> + Copy {
    move |request: &JointExecutionRequest| match request.readiness(now) {
        Readiness::Ready(reason) => Some(reason),
        Readiness::Pending => None,
    }
}

/// Outcome of one timeout sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// In-progress requests looked at.
    pub examined: usize,
    /// Requests completed because all members had finished.
    pub completed: usize,
    /// Requests completed by timeout.
    pub timed_out: usize,
    /// Requests that ended up failed, or could not be processed.
    pub failed: usize,
}

/// Coordinates joint execution requests over a versioned store.
pub struct JointCoordinator<S: ?Sized, N: ?Sized> {
    store: Arc<S>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    config: JointConfig,
}

impl<S, N> JointCoordinator<S, N>
where
    S: JointRequestStore + ?Sized,
    N: JointNotifier + ?Sized,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: JointConfig) -> Self {
        Self::with_clock(store, notifier, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        notifier: Arc<N>,
        config: JointConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &JointConfig {
        &self.config
    }

    /// Current snapshot for a join key.
    pub async fn get(&self, join_key: &str) -> JointResult<Option<JointExecutionRequest>> {
        Ok(self.store.get(join_key).await?)
    }

    /// Record that a member started, creating the joint request on the first
    /// member.
    ///
    /// `required_count` and `timeout` are only used when the request is
    /// created; later members join the existing request as is.
    pub async fn register_member(
        &self,
        join_key: &str,
        execution_request_id: Uuid,
        required_count: usize,
        timeout: Option<Duration>,
    ) -> JointResult<JointExecutionRequest> {
        if required_count == 0 {
            return Err(JointError::InvalidRequiredCount {
                join_key: join_key.to_string(),
                required_count,
            });
        }

        if self.store.get(join_key).await?.is_none() {
            let request = JointExecutionRequest::new(
                join_key,
                required_count,
                timeout.unwrap_or_else(|| self.config.default_timeout()),
                self.clock.now(),
            );
            match self.store.insert(request).await {
                Ok(created) => {
                    info!(
                        join_key = %join_key,
                        required_count,
                        timeout_secs = created.timeout.as_secs(),
                        "joint request created"
                    );
                }
                Err(JointStoreError::AlreadyExists(_)) => {
                    debug!(join_key = %join_key, "joint request created concurrently");
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.write_member(join_key, execution_request_id, RequestStatus::InProgress)
            .await
    }

    /// Store a member's latest status and complete the joint request if every
    /// required member has finished.
    ///
    /// Once the request has left `InProgress` the member list still updates,
    /// but the joint status does not change.
    pub async fn upsert_run(
        &self,
        join_key: &str,
        execution_request_id: Uuid,
        status: RequestStatus,
    ) -> JointResult<JointExecutionRequest> {
        let updated = self
            .write_member(join_key, execution_request_id, status)
            .await?;
        debug!(
            join_key = %join_key,
            execution_request_id = %execution_request_id,
            status = ?status,
            finished = updated.finished_count(),
            required = updated.required_count,
            "joint member updated"
        );
        if !updated.is_in_progress() {
            return Ok(updated);
        }
        self.evaluate_readiness(join_key).await
    }

    /// Complete the joint request if all required members finished.
    ///
    /// Timeouts are left to [`sweep_timeouts`](Self::sweep_timeouts).
    pub async fn evaluate_readiness(&self, join_key: &str) -> JointResult<JointExecutionRequest> {
        let current = self.load(join_key).await?;
        if current.is_in_progress() && members_finished(&current).is_some() {
            return self.finish(current, members_finished).await;
        }
        Ok(current)
    }

    /// Complete the joint request now, whatever its members' state.
    ///
    /// Has no effect on a request that already left `InProgress`.
    pub async fn complete_joint(&self, join_key: &str) -> JointResult<JointExecutionRequest> {
        let current = self.load(join_key).await?;
        self.finish(current, |_: &JointExecutionRequest| {
            Some(CompletionReason::AllMembersFinished)
        })
        .await
    }

    /// Mark the joint request failed and emit a failure event.
    ///
    /// Has no effect on a request that already reached a final status.
    pub async fn fail_joint(&self, join_key: &str, cause: &str) -> JointResult<JointExecutionRequest> {
        let (request, changed) = self.transition(join_key, |current| current.failed(cause)).await?;
        if changed {
            warn!(join_key = %join_key, cause = %cause, "joint request failed");
            if let Err(err) = self.notifier.emit_failure(join_key, cause).await {
                error!(join_key = %join_key, error = %err, "failed to emit joint failure");
            }
        }
        Ok(request)
    }

    /// Complete every in-progress request that is ready, by members or by
    /// timeout.
    pub async fn sweep_timeouts(&self) -> JointResult<SweepReport> {
        let now = self.clock.now();
        let open = self.store.list_in_progress().await?;
        let mut report = SweepReport {
            examined: open.len(),
            ..SweepReport::default()
        };

        let due = due_at(now);
        let ready: Vec<_> = open
            .into_iter()
            .filter(|request| due(request).is_some())
            .collect();

        let outcomes = join_all(ready.into_iter().map(|request| async move {
            let join_key = request.join_key.clone();
            (join_key, self.finish(request, due).await)
        }))
        .await;

        for (join_key, outcome) in outcomes {
            match outcome {
                Ok(request) => match request.status {
                    JointStatus::Completed => report.completed += 1,
                    JointStatus::CompletedByTimeout => report.timed_out += 1,
                    JointStatus::Failed => report.failed += 1,
                    JointStatus::InProgress | JointStatus::Reporting => {}
                },
                Err(err) => {
                    error!(join_key = %join_key, error = %err, "timeout sweep failed for joint request");
                    report.failed += 1;
                }
            }
        }

        if report.completed + report.timed_out + report.failed > 0 {
            info!(
                examined = report.examined,
                completed = report.completed,
                timed_out = report.timed_out,
                failed = report.failed,
                "joint timeout sweep finished"
            );
        }
        Ok(report)
    }

    /// Claim, notify and settle. Only the caller whose claim lands sends the
    /// report; everyone else gets the snapshot the winner left behind.
    ///
    /// `decide` picks the completion reason from the snapshot being claimed,
    /// and is asked again after every conflicting write.
    async fn finish<F>(
        &self,
        snapshot: JointExecutionRequest,
        decide: F,
    ) -> JointResult<JointExecutionRequest>
    where
        F: Fn(&JointExecutionRequest) -> Option<CompletionReason>,
    {
        let join_key = snapshot.join_key.clone();
        let Some(claimed) = self.claim(snapshot, &decide).await? else {
            return self.load(&join_key).await;
        };
        let reason = claimed.completion;

        let members = claimed.finished_members();
        info!(
            join_key = %join_key,
            reason = ?reason,
            members = members.len(),
            required = claimed.required_count,
            "joint request ready, sending report trigger"
        );

        match self.notifier.emit_report_trigger(&join_key, &members).await {
            Ok(()) => match self.settle(&join_key).await {
                Ok(settled) => Ok(settled),
                Err(err) => {
                    error!(join_key = %join_key, error = %err, "failed to settle reported joint request");
                    self.fail_joint(&join_key, &format!("settle failed: {}", err))
                        .await
                }
            },
            Err(err) => {
                let cause = format!("report trigger failed: {}", err);
                error!(join_key = %join_key, error = %err, "joint report trigger failed");
                self.fail_joint(&join_key, &cause).await
            }
        }
    }

    /// Move the request to `Reporting`. Returns `None` if it already left
    /// `InProgress` or is no longer ready.
    async fn claim<F>(
        &self,
        mut snapshot: JointExecutionRequest,
        decide: &F,
    ) -> JointResult<Option<JointExecutionRequest>>
    where
        F: Fn(&JointExecutionRequest) -> Option<CompletionReason>,
    {
        for _ in 0..self.config.cas_max_retries {
            let Some(reason) = decide(&snapshot) else {
                return Ok(None);
            };
            let Some(claimed) = snapshot.claimed(reason) else {
                return Ok(None);
            };
            match self.store.compare_and_swap(claimed).await {
                Ok(stored) => return Ok(Some(stored)),
                Err(JointStoreError::Conflict { .. }) => {
                    snapshot = self.load(&snapshot.join_key).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(JointError::RetriesExhausted {
            join_key: snapshot.join_key,
            attempts: self.config.cas_max_retries,
        })
    }

    /// Move a claimed request to its final status.
    ///
    /// Only the claim owner settles, so every conflict comes from a member
    /// update and the write is retried until it lands.
    async fn settle(&self, join_key: &str) -> JointResult<JointExecutionRequest> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let current = self.load(join_key).await?;
            let Some(next) = current.settled() else {
                return Ok(current);
            };
            match self.store.compare_and_swap(next).await {
                Ok(stored) => return Ok(stored),
                Err(JointStoreError::Conflict { .. }) => {
                    debug!(join_key = %join_key, attempt, "joint settle conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn write_member(
        &self,
        join_key: &str,
        execution_request_id: Uuid,
        status: RequestStatus,
    ) -> JointResult<JointExecutionRequest> {
        let now = self.clock.now();
        let (request, _) = self
            .transition(join_key, |current| {
                Some(current.with_member(execution_request_id, status, now))
            })
            .await?;
        Ok(request)
    }

    /// Apply `change` with compare-and-swap, retrying on conflicts.
    ///
    /// `change` returning `None` means there is nothing to write; the current
    /// snapshot is returned with `false`.
    async fn transition<F>(
        &self,
        join_key: &str,
        change: F,
    ) -> JointResult<(JointExecutionRequest, bool)>
    where
        F: Fn(&JointExecutionRequest) -> Option<JointExecutionRequest>,
    {
        for attempt in 1..=self.config.cas_max_retries {
            let current = self.load(join_key).await?;
            let Some(next) = change(&current) else {
                return Ok((current, false));
            };
            match self.store.compare_and_swap(next).await {
                Ok(stored) => return Ok((stored, true)),
                Err(JointStoreError::Conflict { .. }) => {
                    debug!(join_key = %join_key, attempt, "joint request write conflict, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(JointError::RetriesExhausted {
            join_key: join_key.to_string(),
            attempts: self.config.cas_max_retries,
        })
    }

    async fn load(&self, join_key: &str) -> JointResult<JointExecutionRequest> {
        self.store
            .get(join_key)
            .await?
            .ok_or_else(|| JointError::UnknownJoinKey(join_key.to_string()))
    }
}
