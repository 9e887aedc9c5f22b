//! Test-run reporting core.
//!
//! Rolls test statuses up from log records to runs to execution requests,
//! computes pass/warning/fail rates, resolves log record ancestry, and
//! coordinates joint execution requests so their combined report fires
//! exactly once.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod joint;
pub mod model;
pub mod paths;
pub mod rates;
pub mod repository;
pub mod status;

pub use error::{Error, Result};
pub use events::{DispatchSummary, InboundEvent, ReportingService};
pub use joint::{JointCoordinator, JointExecutionRequest, JointStatus, TimeoutSweeper};
pub use model::{ExecutionRequest, LogRecord, Run};
pub use rates::{RateCalculator, RequestRates, RunRates};
pub use status::{ExecutionStatus, RequestStatus, StatusPriority, TestingStatus};
