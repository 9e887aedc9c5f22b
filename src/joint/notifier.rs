//! Outbound notifications for joint requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events emitted when a joint request reaches a final decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JointEvent {
    /// The joint report for the listed members should be produced.
    ReportTriggered {
        join_key: String,
        execution_request_ids: Vec<Uuid>,
    },
    /// The joint request could not be reported.
    Failed { join_key: String, cause: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification channel closed")]
    ChannelClosed,

    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Receives joint request decisions.
#[async_trait]
pub trait JointNotifier: Send + Sync {
    async fn emit_report_trigger(
        &self,
        join_key: &str,
        execution_request_ids: &[Uuid],
    ) -> Result<(), NotifyError>;

    async fn emit_failure(&self, join_key: &str, cause: &str) -> Result<(), NotifyError>;
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl JointNotifier for NoopNotifier {
    async fn emit_report_trigger(&self, _join_key: &str, _ids: &[Uuid]) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn emit_failure(&self, _join_key: &str, _cause: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// A notifier that forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<JointEvent>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<JointEvent>) -> Self {
        Self { sender }
    }

    /// Create a notifier together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JointEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl JointNotifier for ChannelNotifier {
    async fn emit_report_trigger(
        &self,
        join_key: &str,
        execution_request_ids: &[Uuid],
    ) -> Result<(), NotifyError> {
        self.sender
            .send(JointEvent::ReportTriggered {
                join_key: join_key.to_string(),
                execution_request_ids: execution_request_ids.to_vec(),
            })
            .map_err(|_| NotifyError::ChannelClosed)
    }

    async fn emit_failure(&self, join_key: &str, cause: &str) -> Result<(), NotifyError> {
        self.sender
            .send(JointEvent::Failed {
                join_key: join_key.to_string(),
                cause: cause.to_string(),
            })
            .map_err(|_| NotifyError::ChannelClosed)
    }
}
