use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    LogRecordUpdate, ReportRepository, RepositoryError, RepositoryResult, RequestUpdate, RunUpdate,
};
use crate::model::{ExecutionRequest, LogRecord, Run};
use crate::rates::{RequestRates, RunRates};

/// Serializable dump of repository contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub execution_requests: Vec<ExecutionRequest>,
    #[serde(default)]
    pub runs: Vec<Run>,
    #[serde(default)]
    pub log_records: Vec<LogRecord>,
}

impl Snapshot {
    /// Load a snapshot from a JSON file.
    pub fn load(path: &Path) -> RepositoryResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            RepositoryError::Backend(format!("failed to read {}: {}", path.display(), err))
        })?;
        serde_json::from_str(&content).map_err(|err| {
            RepositoryError::Backend(format!("invalid snapshot {}: {}", path.display(), err))
        })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    requests: HashMap<Uuid, ExecutionRequest>,
    runs: HashMap<Uuid, Run>,
    records: HashMap<Uuid, LogRecord>,
}

/// Repository kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<MemoryState>,
    rate_batches: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let state = MemoryState {
            requests: snapshot
                .execution_requests
                .into_iter()
                .map(|request| (request.id, request))
                .collect(),
            runs: snapshot.runs.into_iter().map(|run| (run.id, run)).collect(),
            records: snapshot
                .log_records
                .into_iter()
                .map(|record| (record.id, record))
                .collect(),
        };
        Self {
            state: RwLock::new(state),
            rate_batches: AtomicUsize::new(0),
        }
    }

    /// Dump the current contents.
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        Snapshot {
            execution_requests: state.requests.values().cloned().collect(),
            runs: state.runs.values().cloned().collect(),
            log_records: state.records.values().cloned().collect(),
        }
    }

    /// Number of `save_run_rates` calls served so far.
    pub fn rate_batches(&self) -> usize {
        self.rate_batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportRepository for InMemoryRepository {
    async fn get_run(&self, run_id: Uuid) -> RepositoryResult<Option<Run>> {
        Ok(self.state.read().await.runs.get(&run_id).cloned())
    }

    async fn save_run(&self, run: Run) -> RepositoryResult<()> {
        self.state.write().await.runs.insert(run.id, run);
        Ok(())
    }

    async fn update_run(&self, run_id: Uuid, update: RunUpdate) -> RepositoryResult<Option<Run>> {
        let mut state = self.state.write().await;
        Ok(state.runs.get_mut(&run_id).map(|run| {
            update(run);
            run.clone()
        }))
    }

    async fn runs_for_request(&self, execution_request_id: Uuid) -> RepositoryResult<Vec<Run>> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .values()
            .filter(|run| run.execution_request_id == execution_request_id)
            .cloned()
            .collect())
    }

    async fn get_log_record(&self, record_id: Uuid) -> RepositoryResult<Option<LogRecord>> {
        Ok(self.state.read().await.records.get(&record_id).cloned())
    }

    async fn save_log_record(&self, record: LogRecord) -> RepositoryResult<()> {
        self.state.write().await.records.insert(record.id, record);
        Ok(())
    }

    async fn update_log_record(
        &self,
        record_id: Uuid,
        update: LogRecordUpdate,
    ) -> RepositoryResult<Option<LogRecord>> {
        let mut state = self.state.write().await;
        Ok(state.records.get_mut(&record_id).map(|record| {
            update(record);
            record.clone()
        }))
    }

    async fn log_records_for_run(&self, run_id: Uuid) -> RepositoryResult<Vec<LogRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|record| record.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn get_execution_request(
        &self,
        execution_request_id: Uuid,
    ) -> RepositoryResult<Option<ExecutionRequest>> {
        Ok(self
            .state
            .read()
            .await
            .requests
            .get(&execution_request_id)
            .cloned())
    }

    async fn save_execution_request(&self, request: ExecutionRequest) -> RepositoryResult<()> {
        self.state.write().await.requests.insert(request.id, request);
        Ok(())
    }

    async fn update_execution_request(
        &self,
        execution_request_id: Uuid,
        update: RequestUpdate,
    ) -> RepositoryResult<Option<ExecutionRequest>> {
        let mut state = self.state.write().await;
        Ok(state.requests.get_mut(&execution_request_id).map(|request| {
            update(request);
            request.clone()
        }))
    }

    async fn save_run_rates(&self, rates: Vec<(Uuid, RunRates)>) -> RepositoryResult<usize> {
        self.rate_batches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        let mut updated = 0;
        for (run_id, run_rates) in rates {
            // rates are written once; a second finalization leaves them alone
            if let Some(run) = state.runs.get_mut(&run_id) {
                if run.record_rates(run_rates).is_ok() {
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn save_request_rates(
        &self,
        execution_request_id: Uuid,
        rates: RequestRates,
    ) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        let request = state
            .requests
            .get_mut(&execution_request_id)
            .ok_or(RepositoryError::NotFound {
                kind: "execution request",
                id: execution_request_id,
            })?;
        request.rates = Some(rates);
        Ok(())
    }
}
