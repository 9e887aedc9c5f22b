//! Periodic timeout sweep for joint requests.
//!
//! The sweeper runs [`JointCoordinator::sweep_timeouts`] on a fixed interval
//! in a background task and forwards each non-empty report through a channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::coordinator::{JointCoordinator, SweepReport};
use super::notifier::JointNotifier;
use super::store::JointRequestStore;

/// Background task that completes ready and timed-out joint requests.
///
/// # Example
///
/// ```ignore
/// let (sweeper, mut reports) = TimeoutSweeper::new(Arc::clone(&coordinator));
/// sweeper.start().await;
///
/// while let Some(report) = reports.recv().await {
///     println!("{} joint requests timed out", report.timed_out);
/// }
///
/// sweeper.stop().await;
/// ```
pub struct TimeoutSweeper<S: ?Sized, N: ?Sized> {
    coordinator: Arc<JointCoordinator<S, N>>,
    /// Channel sender for sweep reports that changed something.
    sender: mpsc::Sender<SweepReport>,
    /// Shutdown signal and handle of the running sweep task.
    task: Arc<Mutex<Option<(Arc<Notify>, JoinHandle<()>)>>>,
}

impl<S, N> TimeoutSweeper<S, N>
where
    S: JointRequestStore + ?Sized + 'static,
    N: JointNotifier + ?Sized + 'static,
{
    /// Creates a sweeper and the receiver for its reports.
    pub fn new(coordinator: Arc<JointCoordinator<S, N>>) -> (Self, mpsc::Receiver<SweepReport>) {
        let (sender, receiver) = mpsc::channel(16);

        let sweeper = Self {
            coordinator,
            sender,
            task: Arc::new(Mutex::new(None)),
        };

        (sweeper, receiver)
    }

    /// Starts sweeping every `sweep_interval` of the coordinator's config.
    ///
    /// Calling `start` on a running sweeper restarts it.
    pub async fn start(&self) {
        self.stop().await;

        let coordinator = Arc::clone(&self.coordinator);
        let sender = self.sender.clone();
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        let interval = coordinator.config().sweep_interval();

        let handle = tokio::spawn(async move {
            debug!(interval_ms = interval.as_millis() as u64, "joint timeout sweeper started");
            loop {
                // a stop raised mid-sweep leaves a permit, so it is seen here
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match coordinator.sweep_timeouts().await {
                    Ok(report) => {
                        if report.completed + report.timed_out + report.failed > 0 {
                            // nobody listening is fine
                            let _ = sender.send(report).await;
                        }
                    }
                    Err(err) => error!(error = %err, "joint timeout sweep failed"),
                }
            }
            debug!("joint timeout sweeper stopped");
        });

        let mut task = self.task.lock().await;
        *task = Some((shutdown, handle));
    }

    /// Signals the task to stop and waits for it. A sleeping task wakes up
    /// right away.
    pub async fn stop(&self) {
        let running = {
            let mut task = self.task.lock().await;
            task.take()
        };

        if let Some((shutdown, handle)) = running {
            shutdown.notify_one();
            let _ = handle.await;
        }
    }

    pub async fn is_running(&self) -> bool {
        let task = self.task.lock().await;
        if let Some((_, handle)) = task.as_ref() {
            !handle.is_finished()
        } else {
            false
        }
    }
}
