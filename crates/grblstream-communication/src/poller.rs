//! Periodic status queries
//!
//! GRBL only reports its state when asked. [`StatusPoller`] sends `?` on a
//! fixed interval from a tokio task for as long as the controller stays
//! connected.

use crate::firmware::grbl::GrblController;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a running status poll task
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct StatusPoller {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StatusPoller {
    /// Start polling on the current tokio runtime
    ///
    /// Returns `None` when `interval` is zero.
    pub fn spawn(controller: GrblController, interval: Duration) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!("Status polling every {:?}", interval);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if !controller.is_connected() {
                            continue;
                        }
                        if let Err(e) = controller.query_status() {
                            tracing::warn!("Status query failed: {}", e);
                        }
                    }
                }
            }

            tracing::debug!("Status polling stopped");
        });

        Some(Self {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Start polling at the interval configured in milliseconds
    pub fn from_millis(controller: GrblController, interval_ms: u64) -> Option<Self> {
        Self::spawn(controller, Duration::from_millis(interval_ms))
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
