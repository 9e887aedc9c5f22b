use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::joint::JointError;
use crate::model::ModelError;
use crate::rates::RateError;
use crate::repository::RepositoryError;
use crate::status::ExecutionStatus;

/// Errors surfaced by the event-handling service and the command line.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("run {run_id} reported as finished with non-final status {status:?}")]
    NotFinished {
        run_id: Uuid,
        status: ExecutionStatus,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Rate(#[from] RateError),

    #[error(transparent)]
    Joint(#[from] JointError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
