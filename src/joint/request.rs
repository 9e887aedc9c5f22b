//! Joint execution request snapshots.
//!
//! A snapshot is never mutated in place. Every change produces a new value
//! which the store accepts only if the version it was derived from is still
//! current.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::RequestStatus;

/// Overall state of a joint request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JointStatus {
    InProgress,
    /// Claimed for completion; the downstream report is being sent.
    Reporting,
    Completed,
    CompletedByTimeout,
    Failed,
}

impl JointStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JointStatus::Completed | JointStatus::CompletedByTimeout | JointStatus::Failed
        )
    }
}

/// Why a joint request became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    AllMembersFinished,
    TimedOut,
}

impl CompletionReason {
    fn final_status(self) -> JointStatus {
        match self {
            CompletionReason::AllMembersFinished => JointStatus::Completed,
            CompletionReason::TimedOut => JointStatus::CompletedByTimeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready(CompletionReason),
}

/// Last known state of one member execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRun {
    pub execution_request_id: Uuid,
    pub status: RequestStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointExecutionRequest {
    pub id: Uuid,
    pub join_key: String,
    pub required_count: usize,
    pub timeout: Duration,
    pub start_date: DateTime<Utc>,
    /// One entry per member, in first-seen order.
    pub runs: Vec<MemberRun>,
    pub status: JointStatus,
    pub completion: Option<CompletionReason>,
    pub failure_cause: Option<String>,
    /// Bumped by the store on every accepted write.
    pub version: u64,
}

impl JointExecutionRequest {
    pub fn new(
        join_key: impl Into<String>,
        required_count: usize,
        timeout: Duration,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            join_key: join_key.into(),
            required_count,
            timeout,
            start_date,
            runs: Vec::new(),
            status: JointStatus::InProgress,
            completion: None,
            failure_cause: None,
            version: 0,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == JointStatus::InProgress
    }

    /// Snapshot with the member's status replaced or appended.
    ///
    /// The joint status is left alone.
    pub fn with_member(
        &self,
        execution_request_id: Uuid,
        status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Self {
        let mut next = self.clone();
        match next
            .runs
            .iter_mut()
            .find(|run| run.execution_request_id == execution_request_id)
        {
            Some(run) => {
                run.status = status;
                run.updated_at = at;
            }
            None => next.runs.push(MemberRun {
                execution_request_id,
                status,
                updated_at: at,
            }),
        }
        next
    }

    pub fn member_status(&self, execution_request_id: Uuid) -> Option<RequestStatus> {
        self.runs
            .iter()
            .find(|run| run.execution_request_id == execution_request_id)
            .map(|run| run.status)
    }

    /// Members whose last known status is terminal.
    pub fn finished_members(&self) -> Vec<Uuid> {
        self.runs
            .iter()
            .filter(|run| run.status.is_terminal())
            .map(|run| run.execution_request_id)
            .collect()
    }

    pub fn finished_count(&self) -> usize {
        self.runs.iter().filter(|run| run.status.is_terminal()).count()
    }

    /// Instant after which the request times out, if representable.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(self.timeout).ok()?;
        self.start_date.checked_add_signed(timeout)
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Ready when enough members finished, or when the timeout elapsed.
    pub fn readiness(&self, now: DateTime<Utc>) -> Readiness {
        if self.finished_count() >= self.required_count {
            Readiness::Ready(CompletionReason::AllMembersFinished)
        } else if self.is_timed_out(now) {
            Readiness::Ready(CompletionReason::TimedOut)
        } else {
            Readiness::Pending
        }
    }

    /// Claim the request for completion. Only an in-progress request can be
    /// claimed.
    pub fn claimed(&self, reason: CompletionReason) -> Option<Self> {
        if !self.is_in_progress() {
            return None;
        }
        let mut next = self.clone();
        next.status = JointStatus::Reporting;
        next.completion = Some(reason);
        Some(next)
    }

    /// Move a claimed request to its final status once the report went out.
    pub fn settled(&self) -> Option<Self> {
        if self.status != JointStatus::Reporting {
            return None;
        }
        let reason = self.completion?;
        let mut next = self.clone();
        next.status = reason.final_status();
        Some(next)
    }

    /// Mark the request failed. Requests already in a final status are left
    /// as they are.
    pub fn failed(&self, cause: impl Into<String>) -> Option<Self> {
        if self.status.is_terminal() {
            return None;
        }
        let mut next = self.clone();
        next.status = JointStatus::Failed;
        next.failure_cause = Some(cause.into());
        Some(next)
    }
}
