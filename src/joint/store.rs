use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use super::request::JointExecutionRequest;

/// Errors returned by joint request stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JointStoreError {
    /// The stored version moved on since the snapshot was read.
    #[error("version conflict on {join_key}: expected {expected}, found {actual}")]
    Conflict {
        join_key: String,
        expected: u64,
        actual: u64,
    },

    #[error("joint request {0} already exists")]
    AlreadyExists(String),

    #[error("joint request {0} not found")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type JointStoreResult<T> = Result<T, JointStoreError>;

/// Versioned storage of joint requests, keyed by join key.
#[async_trait]
pub trait JointRequestStore: Send + Sync {
    async fn get(&self, join_key: &str) -> JointStoreResult<Option<JointExecutionRequest>>;

    /// Store a new request at version 1.
    async fn insert(&self, request: JointExecutionRequest)
        -> JointStoreResult<JointExecutionRequest>;

    /// Replace the stored request if its version is still `next.version`.
    /// The accepted snapshot is returned with its version bumped.
    async fn compare_and_swap(
        &self,
        next: JointExecutionRequest,
    ) -> JointStoreResult<JointExecutionRequest>;

    async fn list_in_progress(&self) -> JointStoreResult<Vec<JointExecutionRequest>>;
}

/// Joint request store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJointStore {
    requests: RwLock<HashMap<String, JointExecutionRequest>>,
}

impl InMemoryJointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<JointExecutionRequest> {
        let mut all: Vec<_> = self.requests.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.join_key.cmp(&b.join_key));
        all
    }
}

#[async_trait]
impl JointRequestStore for InMemoryJointStore {
    async fn get(&self, join_key: &str) -> JointStoreResult<Option<JointExecutionRequest>> {
        Ok(self.requests.read().await.get(join_key).cloned())
    }

    async fn insert(
        &self,
        mut request: JointExecutionRequest,
    ) -> JointStoreResult<JointExecutionRequest> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.join_key) {
            return Err(JointStoreError::AlreadyExists(request.join_key));
        }
        request.version = 1;
        requests.insert(request.join_key.clone(), request.clone());
        Ok(request)
    }

    async fn compare_and_swap(
        &self,
        mut next: JointExecutionRequest,
    ) -> JointStoreResult<JointExecutionRequest> {
        let mut requests = self.requests.write().await;
        let current = requests
            .get_mut(&next.join_key)
            .ok_or_else(|| JointStoreError::NotFound(next.join_key.clone()))?;
        if current.version != next.version {
            return Err(JointStoreError::Conflict {
                join_key: next.join_key,
                expected: next.version,
                actual: current.version,
            });
        }
        next.version += 1;
        *current = next.clone();
        Ok(next)
    }

    async fn list_in_progress(&self) -> JointStoreResult<Vec<JointExecutionRequest>> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .filter(|request| request.is_in_progress())
            .cloned()
            .collect())
    }
}
