//! Ancestor paths of log records.
//!
//! A path lists the owning run first, then every ancestor record from the
//! root down, and ends with the record itself. Parent lookups that fail are
//! treated like reaching the root, so a path is always produced.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{LogRecord, Run};
use crate::repository::ReportRepository;

/// Default bound on the number of records in one path.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Resolves record paths by walking parent pointers through the repository.
pub struct PathResolver<R: ?Sized> {
    repository: Arc<R>,
    max_depth: usize,
}

impl<R: ReportRepository + ?Sized> PathResolver<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Path of a single record: `[run, root, ..., parent, record]`.
    ///
    /// Returns an empty path when the record itself cannot be loaded.
    pub async fn resolve_record_path(&self, record_id: Uuid) -> Vec<Uuid> {
        let mut cache = HashMap::new();
        self.walk(record_id, &mut cache).await
    }

    /// Paths of many records, sharing loaded ancestors between walks.
    pub async fn resolve_record_paths(&self, record_ids: &[Uuid]) -> HashMap<Uuid, Vec<Uuid>> {
        let mut cache = HashMap::new();
        let mut paths = HashMap::with_capacity(record_ids.len());
        for record_id in record_ids {
            let path = self.walk(*record_id, &mut cache).await;
            paths.insert(*record_id, path);
        }
        paths
    }

    async fn walk(&self, record_id: Uuid, cache: &mut HashMap<Uuid, LogRecord>) -> Vec<Uuid> {
        let Some(start) = self.lookup(record_id, cache).await else {
            warn!(record_id = %record_id, "log record not found, no path resolved");
            return Vec::new();
        };

        let mut path = vec![start.id];
        let mut visited = HashSet::from([start.id]);
        let mut parent = start.parent_record_id;

        while let Some(parent_id) = parent {
            if path.len() >= self.max_depth {
                warn!(
                    record_id = %record_id,
                    max_depth = self.max_depth,
                    "log record path truncated at maximum depth"
                );
                break;
            }
            if !visited.insert(parent_id) {
                warn!(
                    record_id = %record_id,
                    parent_id = %parent_id,
                    "cycle in log record parents, path stops here"
                );
                break;
            }
            match self.lookup(parent_id, cache).await {
                Some(record) => {
                    path.push(record.id);
                    parent = record.parent_record_id;
                }
                None => {
                    warn!(
                        record_id = %record_id,
                        parent_id = %parent_id,
                        "orphaned log record, treating it as root"
                    );
                    break;
                }
            }
        }

        path.push(start.run_id);
        path.reverse();
        path
    }

    async fn lookup(&self, id: Uuid, cache: &mut HashMap<Uuid, LogRecord>) -> Option<LogRecord> {
        if let Some(record) = cache.get(&id) {
            return Some(record.clone());
        }
        match self.repository.get_log_record(id).await {
            Ok(Some(record)) => {
                cache.insert(id, record.clone());
                Some(record)
            }
            Ok(None) => None,
            Err(err) => {
                debug!(record_id = %id, error = %err, "log record lookup failed");
                None
            }
        }
    }
}

/// Paths of top-level runs: each run is its own, zero-depth path.
pub fn resolve_run_paths(runs: &[Run]) -> Vec<Uuid> {
    runs.iter().map(|run| run.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::model::ExecutionRequest;
    use crate::repository::{
        InMemoryRepository, LogRecordUpdate, RepositoryError, RepositoryResult, RequestUpdate,
        RunUpdate,
    };
    use crate::rates::{RequestRates, RunRates};

    async fn chain(repository: &InMemoryRepository) -> (Uuid, LogRecord, LogRecord, LogRecord) {
        let run_id = Uuid::new_v4();
        let a = LogRecord::new(run_id, "A").section();
        let b = LogRecord::new(run_id, "B").section().child_of(&a);
        let c = LogRecord::new(run_id, "C").child_of(&b);
        for record in [&a, &b, &c] {
            repository.save_log_record(record.clone()).await.unwrap();
        }
        (run_id, a, b, c)
    }

    #[tokio::test]
    async fn test_path_runs_from_run_to_record() {
        let repository = Arc::new(InMemoryRepository::new());
        let (run_id, a, b, c) = chain(&repository).await;

        let resolver = PathResolver::new(repository);
        let path = resolver.resolve_record_path(c.id).await;
        assert_eq!(path, vec![run_id, a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn test_root_record_path() {
        let repository = Arc::new(InMemoryRepository::new());
        let (run_id, a, _, _) = chain(&repository).await;

        let resolver = PathResolver::new(repository);
        assert_eq!(resolver.resolve_record_path(a.id).await, vec![run_id, a.id]);
    }

    #[tokio::test]
    async fn test_orphaned_record_still_ends_at_run() {
        let repository = Arc::new(InMemoryRepository::new());
        let run_id = Uuid::new_v4();
        let mut orphan = LogRecord::new(run_id, "orphan");
        orphan.parent_record_id = Some(Uuid::new_v4());
        repository.save_log_record(orphan.clone()).await.unwrap();

        let resolver = PathResolver::new(repository);
        assert_eq!(
            resolver.resolve_record_path(orphan.id).await,
            vec![run_id, orphan.id]
        );
    }

    #[tokio::test]
    async fn test_missing_record_yields_empty_path() {
        let resolver = PathResolver::new(Arc::new(InMemoryRepository::new()));
        assert!(resolver.resolve_record_path(Uuid::new_v4()).await.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_is_cut() {
        let repository = Arc::new(InMemoryRepository::new());
        let run_id = Uuid::new_v4();
        let mut x = LogRecord::new(run_id, "x");
        let mut y = LogRecord::new(run_id, "y");
        x.parent_record_id = Some(y.id);
        y.parent_record_id = Some(x.id);
        repository.save_log_record(x.clone()).await.unwrap();
        repository.save_log_record(y.clone()).await.unwrap();

        let resolver = PathResolver::new(repository);
        assert_eq!(
            resolver.resolve_record_path(x.id).await,
            vec![run_id, y.id, x.id]
        );
    }

    #[tokio::test]
    async fn test_depth_is_bounded() {
        let repository = Arc::new(InMemoryRepository::new());
        let (run_id, _a, b, c) = chain(&repository).await;

        let resolver = PathResolver::new(repository).with_max_depth(2);
        assert_eq!(
            resolver.resolve_record_path(c.id).await,
            vec![run_id, b.id, c.id]
        );
    }

    #[tokio::test]
    async fn test_batch_resolution() {
        let repository = Arc::new(InMemoryRepository::new());
        let (run_id, a, b, c) = chain(&repository).await;

        let resolver = PathResolver::new(repository);
        let paths = resolver.resolve_record_paths(&[b.id, c.id]).await;
        assert_eq!(paths[&b.id], vec![run_id, a.id, b.id]);
        assert_eq!(paths[&c.id], vec![run_id, a.id, b.id, c.id]);
    }

    #[test]
    fn test_run_paths_are_run_ids() {
        let request = ExecutionRequest::new("er");
        let runs = vec![
            Run::new(request.id, Uuid::new_v4(), "a"),
            Run::new(request.id, Uuid::new_v4(), "b"),
        ];
        assert_eq!(resolve_run_paths(&runs), vec![runs[0].id, runs[1].id]);
    }

    /// Repository whose record lookups always fail after the first record.
    struct FlakyRecords {
        record: LogRecord,
    }

    #[async_trait]
    impl ReportRepository for FlakyRecords {
        async fn get_run(&self, _run_id: Uuid) -> RepositoryResult<Option<Run>> {
            Ok(None)
        }
        async fn save_run(&self, _run: Run) -> RepositoryResult<()> {
            Ok(())
        }
        async fn update_run(&self, _id: Uuid, _u: RunUpdate) -> RepositoryResult<Option<Run>> {
            Ok(None)
        }
        async fn runs_for_request(&self, _id: Uuid) -> RepositoryResult<Vec<Run>> {
            Ok(Vec::new())
        }
        async fn get_log_record(&self, record_id: Uuid) -> RepositoryResult<Option<LogRecord>> {
            if record_id == self.record.id {
                Ok(Some(self.record.clone()))
            } else {
                Err(RepositoryError::Backend("connection reset".to_string()))
            }
        }
        async fn save_log_record(&self, _record: LogRecord) -> RepositoryResult<()> {
            Ok(())
        }
        async fn update_log_record(
            &self,
            _id: Uuid,
            _u: LogRecordUpdate,
        ) -> RepositoryResult<Option<LogRecord>> {
            Ok(None)
        }
        async fn log_records_for_run(&self, _run_id: Uuid) -> RepositoryResult<Vec<LogRecord>> {
            Ok(Vec::new())
        }
        async fn get_execution_request(
            &self,
            _id: Uuid,
        ) -> RepositoryResult<Option<ExecutionRequest>> {
            Ok(None)
        }
        async fn save_execution_request(&self, _r: ExecutionRequest) -> RepositoryResult<()> {
            Ok(())
        }
        async fn update_execution_request(
            &self,
            _id: Uuid,
            _u: RequestUpdate,
        ) -> RepositoryResult<Option<ExecutionRequest>> {
            Ok(None)
        }
        async fn save_run_rates(&self, _rates: Vec<(Uuid, RunRates)>) -> RepositoryResult<usize> {
            Ok(0)
        }
        async fn save_request_rates(&self, _id: Uuid, _r: RequestRates) -> RepositoryResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lookup_errors_end_the_walk() {
        let run_id = Uuid::new_v4();
        let mut record = LogRecord::new(run_id, "step");
        record.parent_record_id = Some(Uuid::new_v4());
        let record_id = record.id;

        let resolver = PathResolver::new(Arc::new(FlakyRecords { record }));
        assert_eq!(
            resolver.resolve_record_path(record_id).await,
            vec![run_id, record_id]
        );
    }
}
