//! Process-wide liveness probing of client connections
//!
//! One task serves every session: on each tick, a client that has not
//! acknowledged the previous probe is terminated, every other client is
//! probed again.

use crate::registry::Registry;
use crate::session::SessionHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Running keep-alive task; stops on [`KeepAlive::shutdown`] or drop
pub struct KeepAlive {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl KeepAlive {
    pub fn start(sessions: Registry<Arc<SessionHandle>>, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        info!("Starting keep-alive task (every {:?})", period);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => sweep(&sessions).await,
                    _ = &mut stop_rx => break,
                }
            }

            debug!("Keep-alive task stopped");
        });

        Self {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// One probe round over every registered session
pub async fn sweep(sessions: &Registry<Arc<SessionHandle>>) {
    for handle in sessions.values().await {
        if !handle.take_alive() {
            warn!("Session {}: no answer to last probe, terminating", handle.id());
            handle.terminate();
        } else if !handle.probe() {
            debug!("Session {}: probe not queued", handle.id());
        }
    }
}
