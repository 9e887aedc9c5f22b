//! Domain entities: runs, log records and execution requests.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::rates::{RequestRates, RunRates};
use crate::status::{ExecutionStatus, HasTestingStatus, RequestStatus, TestingStatus};

/// Errors raised by entity lifecycle guards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("run {run_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        run_id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("rates for run {0} were already recorded")]
    RatesAlreadyRecorded(Uuid),
}

/// One test case's execution instance within an execution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub test_case_id: Uuid,
    pub execution_request_id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub testing_status: Option<TestingStatus>,
    #[serde(default)]
    pub execution_status: ExecutionStatus,
    #[serde(default)]
    pub rates: Option<RunRates>,
}

impl Run {
    pub fn new(execution_request_id: Uuid, test_case_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_case_id,
            execution_request_id,
            name: name.into(),
            testing_status: None,
            execution_status: ExecutionStatus::NotStarted,
            rates: None,
        }
    }

    pub fn with_testing_status(mut self, status: TestingStatus) -> Self {
        self.testing_status = Some(status);
        self
    }

    pub fn with_execution_status(mut self, status: ExecutionStatus) -> Self {
        self.execution_status = status;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.execution_status.is_terminal()
    }

    /// Move the run along its lifecycle.
    ///
    /// Repeating the current state is accepted; leaving a terminal state or
    /// going back to `NotStarted` is not.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), ModelError> {
        let current = self.execution_status;
        let allowed = current == next
            || match current {
                ExecutionStatus::NotStarted => next != ExecutionStatus::NotStarted,
                ExecutionStatus::InProgress => next.is_terminal(),
                _ => false,
            };
        if !allowed {
            return Err(ModelError::InvalidTransition {
                run_id: self.id,
                from: current,
                to: next,
            });
        }
        self.execution_status = next;
        Ok(())
    }

    /// Record final rates. Rates are written once, at finalization.
    pub fn record_rates(&mut self, rates: RunRates) -> Result<(), ModelError> {
        if self.rates.is_some() {
            return Err(ModelError::RatesAlreadyRecorded(self.id));
        }
        self.rates = Some(rates);
        Ok(())
    }
}

impl HasTestingStatus for Run {
    fn testing_status(&self) -> Option<TestingStatus> {
        self.testing_status
    }

    fn testing_status_mut(&mut self) -> &mut Option<TestingStatus> {
        &mut self.testing_status
    }
}

/// A step or action within a run, arranged in a parent/child tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    #[serde(default)]
    pub parent_record_id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub testing_status: Option<TestingStatus>,
    #[serde(default)]
    pub is_section: bool,
}

impl LogRecord {
    pub fn new(run_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            parent_record_id: None,
            name: name.into(),
            testing_status: None,
            is_section: false,
        }
    }

    pub fn child_of(mut self, parent: &LogRecord) -> Self {
        self.parent_record_id = Some(parent.id);
        self
    }

    pub fn with_testing_status(mut self, status: TestingStatus) -> Self {
        self.testing_status = Some(status);
        self
    }

    pub fn section(mut self) -> Self {
        self.is_section = true;
        self
    }
}

impl HasTestingStatus for LogRecord {
    fn testing_status(&self) -> Option<TestingStatus> {
        self.testing_status
    }

    fn testing_status_mut(&mut self) -> &mut Option<TestingStatus> {
        &mut self.testing_status
    }
}

/// Per-request toggles that change how rates are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    IgnorePrerequisiteInPassRate,
    IgnoreValidationInPassRate,
}

/// Test cases in scope for a request, grouped by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestScope {
    #[serde(default)]
    pub prerequisite_case_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub validation_case_ids: Option<Vec<Uuid>>,
}

/// One logical test-execution batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub flags: HashSet<Flag>,
    #[serde(default)]
    pub test_scope: Option<TestScope>,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub testing_status: Option<TestingStatus>,
    #[serde(default)]
    pub join_key: Option<String>,
    #[serde(default)]
    pub rates: Option<RequestRates>,
}

impl ExecutionRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            flags: HashSet::new(),
            test_scope: None,
            status: RequestStatus::NotStarted,
            testing_status: None,
            join_key: None,
            rates: None,
        }
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn with_scope(mut self, scope: TestScope) -> Self {
        self.test_scope = Some(scope);
        self
    }

    pub fn with_join_key(mut self, join_key: impl Into<String>) -> Self {
        self.join_key = Some(join_key.into());
        self
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }
}

impl HasTestingStatus for ExecutionRequest {
    fn testing_status(&self) -> Option<TestingStatus> {
        self.testing_status
    }

    fn testing_status_mut(&mut self) -> &mut Option<TestingStatus> {
        &mut self.testing_status
    }
}
