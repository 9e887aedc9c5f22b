use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::{compute_request_rate, compute_run_rate, RateError, RateResult, RequestRates, RunRates};
use crate::repository::ReportRepository;

/// Computes rates from repository contents and writes them back.
///
/// Run rates are written in a single batch per call.
pub struct RateCalculator<R: ?Sized> {
    repository: Arc<R>,
}

impl<R: ReportRepository + ?Sized> RateCalculator<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Compute rates for each run from its non-section log records.
    pub async fn run_rates(&self, run_ids: &[Uuid]) -> RateResult<Vec<(Uuid, RunRates)>> {
        let mut computed = Vec::with_capacity(run_ids.len());
        for run_id in run_ids {
            let records = self.repository.log_records_for_run(*run_id).await?;
            let outcomes = records
                .iter()
                .filter(|record| !record.is_section)
                .filter_map(|record| record.testing_status);
            computed.push((*run_id, compute_run_rate(outcomes)));
        }
        Ok(computed)
    }

    /// Compute and persist rates for the given runs.
    pub async fn finalize_runs(&self, run_ids: &[Uuid]) -> RateResult<Vec<(Uuid, RunRates)>> {
        let computed = self.run_rates(run_ids).await?;
        if computed.is_empty() {
            return Ok(computed);
        }
        let updated = self.repository.save_run_rates(computed.clone()).await?;
        debug!(runs = computed.len(), updated, "run rates written");
        Ok(computed)
    }

    /// Compute request rates from the request's current runs.
    pub async fn request_rates(&self, execution_request_id: Uuid) -> RateResult<RequestRates> {
        let request = self
            .repository
            .get_execution_request(execution_request_id)
            .await?
            .ok_or(RateError::RequestNotFound(execution_request_id))?;
        let runs = self.repository.runs_for_request(execution_request_id).await?;
        compute_request_rate(&request, &runs)
    }

    /// Compute rates for every finished run of a request and for the request
    /// itself, then persist both.
    pub async fn finalize_request(&self, execution_request_id: Uuid) -> RateResult<RequestRates> {
        let request = self
            .repository
            .get_execution_request(execution_request_id)
            .await?
            .ok_or(RateError::RequestNotFound(execution_request_id))?;
        let runs = self.repository.runs_for_request(execution_request_id).await?;
        let rates = compute_request_rate(&request, &runs)?;

        let pending: Vec<Uuid> = runs
            .iter()
            .filter(|run| run.is_terminal() && run.rates.is_none())
            .map(|run| run.id)
            .collect();
        self.finalize_runs(&pending).await?;
        self.repository
            .save_request_rates(execution_request_id, rates)
            .await?;

        info!(
            execution_request_id = %execution_request_id,
            passed_rate = rates.passed_rate,
            warning_rate = rates.warning_rate,
            failed_rate = rates.failed_rate,
            count_of_test_runs = rates.count_of_test_runs,
            "execution request rates finalized"
        );
        Ok(rates)
    }
}
