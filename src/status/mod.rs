//! Testing and execution status types.
//!
//! Testing statuses are merged by severity. The severity order is not
//! hard-coded on the enum: it lives in [`StatusPriority`], which is built
//! from configuration and shared by every call site that merges statuses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of a test step, run or execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestingStatus {
    Unknown,
    Skipped,
    Passed,
    Warning,
    Failed,
    Blocked,
    Stopped,
}

impl TestingStatus {
    /// Every status, in the default severity order.
    pub const ALL: [TestingStatus; 7] = [
        TestingStatus::Unknown,
        TestingStatus::Skipped,
        TestingStatus::Passed,
        TestingStatus::Warning,
        TestingStatus::Failed,
        TestingStatus::Blocked,
        TestingStatus::Stopped,
    ];

    /// Stable label used in logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestingStatus::Unknown => "UNKNOWN",
            TestingStatus::Skipped => "SKIPPED",
            TestingStatus::Passed => "PASSED",
            TestingStatus::Warning => "WARNING",
            TestingStatus::Failed => "FAILED",
            TestingStatus::Blocked => "BLOCKED",
            TestingStatus::Stopped => "STOPPED",
        }
    }

    /// Whether the status contributes to pass/warning/fail rates.
    pub fn is_rated(&self) -> bool {
        matches!(
            self,
            TestingStatus::Passed | TestingStatus::Warning | TestingStatus::Failed
        )
    }

    fn index(&self) -> usize {
        match self {
            TestingStatus::Unknown => 0,
            TestingStatus::Skipped => 1,
            TestingStatus::Passed => 2,
            TestingStatus::Warning => 3,
            TestingStatus::Failed => 4,
            TestingStatus::Blocked => 5,
            TestingStatus::Stopped => 6,
        }
    }
}

impl fmt::Display for TestingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestingStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        TestingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| StatusError::UnknownStatus(s.to_string()))
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    NotStarted,
    InProgress,
    Finished,
    Terminated,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Finished | ExecutionStatus::Terminated | ExecutionStatus::Stopped
        )
    }
}

/// Lifecycle of an execution request, also used for joint members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    #[default]
    NotStarted,
    InProgress,
    Finished,
    Terminated,
    TerminatedByTimeout,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Finished | RequestStatus::Terminated | RequestStatus::TerminatedByTimeout
        )
    }
}

/// Errors raised while building a severity order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("unknown testing status: {0}")]
    UnknownStatus(String),

    #[error("status {0} appears more than once in the priority order")]
    DuplicateStatus(TestingStatus),

    #[error("status {0} is missing from the priority order")]
    MissingStatus(TestingStatus),
}

/// Total severity order over [`TestingStatus`], least severe first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPriority {
    order: Vec<TestingStatus>,
    ranks: [usize; 7],
}

impl Default for StatusPriority {
    fn default() -> Self {
        Self::from_valid_order(TestingStatus::ALL.to_vec())
    }
}

impl StatusPriority {
    /// Build a priority from an ordered list, least severe first.
    ///
    /// The list must name every status exactly once so that merging stays
    /// commutative and associative.
    pub fn new(order: Vec<TestingStatus>) -> Result<Self, StatusError> {
        let mut seen = [false; 7];
        for status in &order {
            if std::mem::replace(&mut seen[status.index()], true) {
                return Err(StatusError::DuplicateStatus(*status));
            }
        }
        if let Some(missing) = TestingStatus::ALL
            .into_iter()
            .find(|status| !seen[status.index()])
        {
            return Err(StatusError::MissingStatus(missing));
        }
        Ok(Self::from_valid_order(order))
    }

    fn from_valid_order(order: Vec<TestingStatus>) -> Self {
        let mut ranks = [0; 7];
        for (rank, status) in order.iter().enumerate() {
            ranks[status.index()] = rank;
        }
        Self { order, ranks }
    }

    /// Severity rank; higher is more severe.
    pub fn rank(&self, status: TestingStatus) -> usize {
        self.ranks[status.index()]
    }

    /// The configured order, least severe first.
    pub fn order(&self) -> &[TestingStatus] {
        &self.order
    }

    /// The more severe of two statuses.
    pub fn more_severe(&self, a: TestingStatus, b: TestingStatus) -> TestingStatus {
        if self.rank(b) > self.rank(a) {
            b
        } else {
            a
        }
    }

    /// Soft merge of an incoming status into the current one.
    ///
    /// A missing incoming status leaves `current` untouched, and the first
    /// observed status is taken verbatim.
    pub fn merge(
        &self,
        current: Option<TestingStatus>,
        incoming: Option<TestingStatus>,
    ) -> Option<TestingStatus> {
        match (current, incoming) {
            (current, None) => current,
            (None, incoming) => incoming,
            (Some(current), Some(incoming)) => Some(self.more_severe(current, incoming)),
        }
    }

    /// Fold any number of statuses into the most severe one.
    pub fn merge_all<I>(&self, statuses: I) -> Option<TestingStatus>
    where
        I: IntoIterator<Item = TestingStatus>,
    {
        statuses
            .into_iter()
            .fold(None, |acc, status| self.merge(acc, Some(status)))
    }
}

/// Anything that carries a testing status.
///
/// Soft merges go through the shared [`StatusPriority`]; overrides bypass it
/// and are reserved for administrative corrections.
pub trait HasTestingStatus {
    fn testing_status(&self) -> Option<TestingStatus>;

    fn testing_status_mut(&mut self) -> &mut Option<TestingStatus>;

    /// Merge `incoming` by severity. Returns true when the stored status changed.
    fn merge_testing_status(
        &mut self,
        incoming: Option<TestingStatus>,
        priority: &StatusPriority,
    ) -> bool {
        let current = self.testing_status();
        let merged = priority.merge(current, incoming);
        *self.testing_status_mut() = merged;
        merged != current
    }

    /// Overwrite the status unconditionally.
    fn override_testing_status(&mut self, status: TestingStatus) {
        *self.testing_status_mut() = Some(status);
    }
}
