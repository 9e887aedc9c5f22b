//! Inbound events and the service that applies them.
//!
//! Events arrive concurrently and unordered from many test runs. Every entity
//! write is a single read-modify-write against the repository, so handlers can
//! run in parallel without coordinating with each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::joint::{JointCoordinator, JointExecutionRequest, JointNotifier, JointRequestStore};
use crate::model::{ExecutionRequest, LogRecord, ModelError, Run};
use crate::rates::{RateCalculator, RequestRates};
use crate::repository::ReportRepository;
use crate::status::{
    ExecutionStatus, HasTestingStatus, RequestStatus, StatusPriority, TestingStatus,
};

/// Events the service understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    RunStatusChanged {
        run_id: Uuid,
        status: TestingStatus,
    },
    /// Administrative correction; bypasses the severity merge.
    RunStatusOverridden {
        run_id: Uuid,
        status: TestingStatus,
    },
    LogRecordStatusChanged {
        record_id: Uuid,
        status: TestingStatus,
    },
    RunFinished {
        run_id: Uuid,
        execution_status: ExecutionStatus,
    },
    MemberEvent {
        join_key: String,
        execution_request_id: Uuid,
        status: RequestStatus,
    },
    JointMemberStarted {
        join_key: String,
        execution_request_id: Uuid,
        required_count: usize,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

/// Counts from draining an event channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub handled: usize,
    pub failed: usize,
}

/// Applies inbound events to runs, execution requests and joint requests.
pub struct ReportingService<R: ?Sized, S: ?Sized, N: ?Sized> {
    repository: Arc<R>,
    rates: RateCalculator<R>,
    coordinator: Arc<JointCoordinator<S, N>>,
    priority: StatusPriority,
}

impl<R, S, N> ReportingService<R, S, N>
where
    R: ReportRepository + ?Sized,
    S: JointRequestStore + ?Sized,
    N: JointNotifier + ?Sized,
{
    pub fn new(
        repository: Arc<R>,
        coordinator: Arc<JointCoordinator<S, N>>,
        priority: StatusPriority,
    ) -> Self {
        Self {
            rates: RateCalculator::new(Arc::clone(&repository)),
            repository,
            coordinator,
            priority,
        }
    }

    pub fn coordinator(&self) -> &Arc<JointCoordinator<S, N>> {
        &self.coordinator
    }

    /// Merge a new status into a run by severity.
    ///
    /// Runs that already reached a final execution state keep their status.
    pub async fn on_run_status_changed(&self, run_id: Uuid, status: TestingStatus) -> Result<Run> {
        let priority = self.priority.clone();
        let run = self
            .repository
            .update_run(
                run_id,
                Box::new(move |run: &mut Run| {
                    if !run.is_terminal() {
                        run.merge_testing_status(Some(status), &priority);
                    }
                }),
            )
            .await?
            .ok_or(Error::NotFound { kind: "run", id: run_id })?;
        debug!(run_id = %run_id, incoming = %status, merged = ?run.testing_status, "run status merged");
        Ok(run)
    }

    /// Replace a run's status regardless of severity.
    pub async fn on_run_status_overridden(
        &self,
        run_id: Uuid,
        status: TestingStatus,
    ) -> Result<Run> {
        let run = self
            .repository
            .update_run(
                run_id,
                Box::new(move |run: &mut Run| run.override_testing_status(status)),
            )
            .await?
            .ok_or(Error::NotFound { kind: "run", id: run_id })?;
        info!(run_id = %run_id, status = %status, "run status overridden");
        Ok(run)
    }

    /// Merge a status into a log record, then into its run.
    pub async fn on_log_record_status_changed(
        &self,
        record_id: Uuid,
        status: TestingStatus,
    ) -> Result<LogRecord> {
        let priority = self.priority.clone();
        let record = self
            .repository
            .update_log_record(
                record_id,
                Box::new(move |record: &mut LogRecord| {
                    record.merge_testing_status(Some(status), &priority);
                }),
            )
            .await?
            .ok_or(Error::NotFound {
                kind: "log record",
                id: record_id,
            })?;
        self.on_run_status_changed(record.run_id, status).await?;
        Ok(record)
    }

    /// Move a run to a final execution state and roll its status into the
    /// execution request. The request is finalized once all its runs are
    /// final.
    pub async fn on_run_finished(
        &self,
        run_id: Uuid,
        execution_status: ExecutionStatus,
    ) -> Result<Run> {
        if !execution_status.is_terminal() {
            return Err(Error::NotFinished {
                run_id,
                status: execution_status,
            });
        }

        let run = self
            .repository
            .update_run(
                run_id,
                Box::new(move |run: &mut Run| {
                    // a rejected transition leaves the run untouched
                    let _ = run.transition(execution_status);
                }),
            )
            .await?
            .ok_or(Error::NotFound { kind: "run", id: run_id })?;
        if run.execution_status != execution_status {
            return Err(ModelError::InvalidTransition {
                run_id,
                from: run.execution_status,
                to: execution_status,
            }
            .into());
        }

        let priority = self.priority.clone();
        let run_status = run.testing_status;
        let request_id = run.execution_request_id;
        self.repository
            .update_execution_request(
                request_id,
                Box::new(move |request: &mut ExecutionRequest| {
                    if request.status.is_terminal() {
                        return;
                    }
                    if request.status == RequestStatus::NotStarted {
                        request.status = RequestStatus::InProgress;
                    }
                    request.merge_testing_status(run_status, &priority);
                }),
            )
            .await?
            .ok_or(Error::NotFound {
                kind: "execution request",
                id: request_id,
            })?;
        debug!(
            run_id = %run_id,
            execution_request_id = %request_id,
            execution_status = ?execution_status,
            "run finished"
        );

        let runs = self.repository.runs_for_request(request_id).await?;
        if runs.iter().all(Run::is_terminal) {
            self.finalize_request(request_id).await?;
        }
        Ok(run)
    }

    /// Write all rates of an execution request, mark it finished and report it
    /// to its joint request, if any.
    ///
    /// Returns `None` when the request had already been finalized.
    pub async fn finalize_request(&self, execution_request_id: Uuid) -> Result<Option<RequestRates>> {
        // A request whose runs cannot be rated must stay open so a corrected
        // run can finalize it later.
        self.rates.request_rates(execution_request_id).await?;

        // Runs finishing concurrently may not have merged into the request
        // yet, so the final status is folded from all runs here.
        let runs = self.repository.runs_for_request(execution_request_id).await?;
        let rolled_up = self
            .priority
            .merge_all(runs.iter().filter_map(|run| run.testing_status));
        let priority = self.priority.clone();
        let claimed = Arc::new(AtomicBool::new(false));
        let claim = Arc::clone(&claimed);
        let request = self
            .repository
            .update_execution_request(
                execution_request_id,
                Box::new(move |request: &mut ExecutionRequest| {
                    if !request.status.is_terminal() {
                        request.merge_testing_status(rolled_up, &priority);
                        request.status = RequestStatus::Finished;
                        claim.store(true, Ordering::SeqCst);
                    }
                }),
            )
            .await?
            .ok_or(Error::NotFound {
                kind: "execution request",
                id: execution_request_id,
            })?;
        if !claimed.load(Ordering::SeqCst) {
            debug!(execution_request_id = %execution_request_id, "execution request already finalized");
            return Ok(None);
        }

        let rates = match self.rates.finalize_request(execution_request_id).await {
            Ok(rates) => rates,
            Err(err) => {
                warn!(
                    execution_request_id = %execution_request_id,
                    error = %err,
                    "request rates failed, reopening execution request"
                );
                self.release_claim(execution_request_id).await?;
                return Err(err.into());
            }
        };

        if let Some(join_key) = request.join_key.as_deref() {
            self.coordinator
                .upsert_run(join_key, execution_request_id, RequestStatus::Finished)
                .await?;
        }
        Ok(Some(rates))
    }

    /// Undo a finalization claim whose rates were never written.
    async fn release_claim(&self, execution_request_id: Uuid) -> Result<()> {
        self.repository
            .update_execution_request(
                execution_request_id,
                Box::new(|request: &mut ExecutionRequest| {
                    if request.status == RequestStatus::Finished && request.rates.is_none() {
                        request.status = RequestStatus::InProgress;
                    }
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn on_execution_request_member_event(
        &self,
        join_key: &str,
        execution_request_id: Uuid,
        status: RequestStatus,
    ) -> Result<JointExecutionRequest> {
        Ok(self
            .coordinator
            .upsert_run(join_key, execution_request_id, status)
            .await?)
    }

    /// Register an execution request with its joint request, creating the
    /// joint request on the first member.
    pub async fn on_joint_member_started(
        &self,
        join_key: &str,
        execution_request_id: Uuid,
        required_count: usize,
        timeout: Option<Duration>,
    ) -> Result<JointExecutionRequest> {
        let key = join_key.to_string();
        let known = self
            .repository
            .update_execution_request(
                execution_request_id,
                Box::new(move |request: &mut ExecutionRequest| {
                    request.join_key.get_or_insert(key);
                    if request.status == RequestStatus::NotStarted {
                        request.status = RequestStatus::InProgress;
                    }
                }),
            )
            .await?;
        if known.is_none() {
            debug!(
                join_key = %join_key,
                execution_request_id = %execution_request_id,
                "joint member is not a local execution request"
            );
        }

        Ok(self
            .coordinator
            .register_member(join_key, execution_request_id, required_count, timeout)
            .await?)
    }

    pub async fn dispatch(&self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::RunStatusChanged { run_id, status } => {
                self.on_run_status_changed(run_id, status).await?;
            }
            InboundEvent::RunStatusOverridden { run_id, status } => {
                self.on_run_status_overridden(run_id, status).await?;
            }
            InboundEvent::LogRecordStatusChanged { record_id, status } => {
                self.on_log_record_status_changed(record_id, status).await?;
            }
            InboundEvent::RunFinished {
                run_id,
                execution_status,
            } => {
                self.on_run_finished(run_id, execution_status).await?;
            }
            InboundEvent::MemberEvent {
                join_key,
                execution_request_id,
                status,
            } => {
                self.on_execution_request_member_event(&join_key, execution_request_id, status)
                    .await?;
            }
            InboundEvent::JointMemberStarted {
                join_key,
                execution_request_id,
                required_count,
                timeout_secs,
            } => {
                self.on_joint_member_started(
                    &join_key,
                    execution_request_id,
                    required_count,
                    timeout_secs.map(Duration::from_secs),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Apply events until the channel closes. A failing event is logged and
    /// does not stop the loop.
    pub async fn run(&self, mut receiver: mpsc::Receiver<InboundEvent>) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        while let Some(event) = receiver.recv().await {
            match self.dispatch(event).await {
                Ok(()) => summary.handled += 1,
                Err(err) => {
                    warn!(error = %err, "inbound event rejected");
                    summary.failed += 1;
                }
            }
        }
        info!(
            handled = summary.handled,
            failed = summary.failed,
            "event channel closed"
        );
        summary
    }
}
