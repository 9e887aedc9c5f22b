//! Joint execution requests.
//!
//! Several execution requests sharing a join key are reported together once
//! the required number of them has finished, or once the joint request times
//! out. The downstream report is triggered exactly once per join key.

mod coordinator;
mod notifier;
mod request;
mod store;
mod sweeper;

pub use coordinator::{JointCoordinator, JointError, JointResult, SweepReport};
pub use notifier::{ChannelNotifier, JointEvent, JointNotifier, NoopNotifier, NotifyError};
pub use request::{CompletionReason, JointExecutionRequest, JointStatus, MemberRun, Readiness};
pub use store::{InMemoryJointStore, JointRequestStore, JointStoreError, JointStoreResult};
pub use sweeper::TimeoutSweeper;
