//! Persistence seam for runs, log records and execution requests.
//!
//! The storage format belongs to the caller. The engine only needs lookups
//! by identifier, atomic read-modify-write of single entities, and batched
//! rate writes.

mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{ExecutionRequest, LogRecord, Run};
use crate::rates::{RequestRates, RunRates};

pub use memory::{InMemoryRepository, Snapshot};

/// Errors that can occur during repository operations.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

pub type RunUpdate = Box<dyn FnOnce(&mut Run) + Send>;
pub type LogRecordUpdate = Box<dyn FnOnce(&mut LogRecord) + Send>;
pub type RequestUpdate = Box<dyn FnOnce(&mut ExecutionRequest) + Send>;

#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn get_run(&self, run_id: Uuid) -> RepositoryResult<Option<Run>>;

    async fn save_run(&self, run: Run) -> RepositoryResult<()>;

    /// Apply `update` to a run atomically and return the stored result.
    /// Returns `None` when the run does not exist.
    async fn update_run(&self, run_id: Uuid, update: RunUpdate) -> RepositoryResult<Option<Run>>;

    async fn runs_for_request(&self, execution_request_id: Uuid) -> RepositoryResult<Vec<Run>>;

    async fn get_log_record(&self, record_id: Uuid) -> RepositoryResult<Option<LogRecord>>;

    async fn save_log_record(&self, record: LogRecord) -> RepositoryResult<()>;

    async fn update_log_record(
        &self,
        record_id: Uuid,
        update: LogRecordUpdate,
    ) -> RepositoryResult<Option<LogRecord>>;

    async fn log_records_for_run(&self, run_id: Uuid) -> RepositoryResult<Vec<LogRecord>>;

    async fn get_execution_request(
        &self,
        execution_request_id: Uuid,
    ) -> RepositoryResult<Option<ExecutionRequest>>;

    async fn save_execution_request(&self, request: ExecutionRequest) -> RepositoryResult<()>;

    async fn update_execution_request(
        &self,
        execution_request_id: Uuid,
        update: RequestUpdate,
    ) -> RepositoryResult<Option<ExecutionRequest>>;

    /// Write rates for many runs in one operation. Returns the number of
    /// runs updated. Unknown runs and runs that already carry rates are
    /// skipped.
    async fn save_run_rates(&self, rates: Vec<(Uuid, RunRates)>) -> RepositoryResult<usize>;

    async fn save_request_rates(
        &self,
        execution_request_id: Uuid,
        rates: RequestRates,
    ) -> RepositoryResult<()>;
}
