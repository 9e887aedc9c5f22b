//! Pass/warning/fail rate calculation.
//!
//! Run rates are computed from the statuses of a run's log records.
//! Request rates and histograms are computed from the request's finished
//! runs, after applying the request's [`IgnorePolicy`].

mod calculator;
mod policy;
mod rounding;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{ExecutionRequest, Run};
use crate::repository::RepositoryError;
use crate::status::TestingStatus;

pub use calculator::RateCalculator;
pub use policy::IgnorePolicy;
pub use rounding::{RoundingPolicy, REQUEST_RATE_ROUNDING, RUN_RATE_ROUNDING};

/// Errors raised while computing rates.
#[derive(Error, Debug)]
pub enum RateError {
    /// A finished run has no testing status. This points at an upstream bug.
    #[error("run {run_id} has no testing status")]
    MissingStatus { run_id: Uuid },

    #[error("execution request {0} not found")]
    RequestNotFound(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

pub type RateResult<T> = Result<T, RateError>;

/// Rates of a single run, in percent with one decimal digit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRates {
    pub passed_rate: f64,
    pub warning_rate: f64,
    pub failed_rate: f64,
}

/// Rates of an execution request, in percent with one decimal digit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestRates {
    pub passed_rate: f64,
    pub warning_rate: f64,
    pub failed_rate: f64,
    /// Runs that entered the denominator.
    pub count_of_test_runs: u64,
}

/// Count and share of one status in a request histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusShare {
    pub count: u64,
    pub rate: f64,
}

/// Per-status counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTally {
    pub passed: u64,
    pub warning: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Statuses outside passed/warning/failed/skipped.
    pub other: u64,
    /// Runs left out by the ignore policy.
    pub not_counted: u64,
    pub total: u64,
}

impl StatusTally {
    /// Add one observed status.
    pub fn add(&mut self, status: TestingStatus) {
        self.total += 1;
        match status {
            TestingStatus::Passed => self.passed += 1,
            TestingStatus::Warning => self.warning += 1,
            TestingStatus::Failed => self.failed += 1,
            TestingStatus::Skipped => self.skipped += 1,
            _ => self.other += 1,
        }
    }

    /// Record an item excluded by the ignore policy.
    pub fn add_not_counted(&mut self) {
        self.total += 1;
        self.not_counted += 1;
    }

    /// Denominator for request-level rates.
    pub fn counted(&self) -> u64 {
        self.total - self.skipped - self.not_counted
    }

    /// Denominator for run-level rates.
    pub fn rated(&self) -> u64 {
        self.passed + self.warning + self.failed
    }
}

/// Rates of a run from the outcomes of its steps.
///
/// Only passed, warning and failed outcomes enter the denominator.
pub fn compute_run_rate<I>(outcomes: I) -> RunRates
where
    I: IntoIterator<Item = TestingStatus>,
{
    let mut tally = StatusTally::default();
    for status in outcomes {
        tally.add(status);
    }
    let denominator = tally.rated();
    RunRates {
        passed_rate: RUN_RATE_ROUNDING.percentage(tally.passed, denominator),
        warning_rate: RUN_RATE_ROUNDING.percentage(tally.warning, denominator),
        failed_rate: RUN_RATE_ROUNDING.percentage(tally.failed, denominator),
    }
}

/// Tally the finished runs of a request.
///
/// Runs that are not terminal are skipped entirely. Excluded runs only bump
/// `not_counted`, whatever their status.
pub fn tally_request_runs(request: &ExecutionRequest, runs: &[Run]) -> RateResult<StatusTally> {
    let policy = IgnorePolicy::for_request(request);
    let mut tally = StatusTally::default();
    for run in runs.iter().filter(|run| run.is_terminal()) {
        let status = run
            .testing_status
            .ok_or(RateError::MissingStatus { run_id: run.id })?;
        if policy.excludes(run.test_case_id) {
            tally.add_not_counted();
        } else {
            tally.add(status);
        }
    }
    Ok(tally)
}

/// Rates of an execution request from its runs.
pub fn compute_request_rate(request: &ExecutionRequest, runs: &[Run]) -> RateResult<RequestRates> {
    let tally = tally_request_runs(request, runs)?;
    let denominator = tally.counted();
    Ok(RequestRates {
        passed_rate: REQUEST_RATE_ROUNDING.percentage(tally.passed, denominator),
        warning_rate: REQUEST_RATE_ROUNDING.percentage(tally.warning, denominator),
        failed_rate: REQUEST_RATE_ROUNDING.percentage(tally.failed, denominator),
        count_of_test_runs: denominator,
    })
}

/// Count and rate of every status present among a request's counted runs.
///
/// Skipped runs are counted but their rate is left at 0.
pub fn compute_status_histogram(
    request: &ExecutionRequest,
    runs: &[Run],
) -> RateResult<HashMap<TestingStatus, StatusShare>> {
    let policy = IgnorePolicy::for_request(request);
    let mut tally = StatusTally::default();
    let mut counts: HashMap<TestingStatus, u64> = HashMap::new();
    for run in runs.iter().filter(|run| run.is_terminal()) {
        let status = run
            .testing_status
            .ok_or(RateError::MissingStatus { run_id: run.id })?;
        if policy.excludes(run.test_case_id) {
            tally.add_not_counted();
            continue;
        }
        tally.add(status);
        *counts.entry(status).or_insert(0) += 1;
    }

    let denominator = tally.counted();
    Ok(counts
        .into_iter()
        .map(|(status, count)| {
            let rate = if status == TestingStatus::Skipped {
                0.0
            } else {
                REQUEST_RATE_ROUNDING.percentage(count, denominator)
            };
            (status, StatusShare { count, rate })
        })
        .collect())
}
