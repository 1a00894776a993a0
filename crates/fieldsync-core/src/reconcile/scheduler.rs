//! Background sync loop.
//!
//! Wakes on a fixed tick, on offline -> online transitions, on enqueue
//! (drain only) and on manual requests. While offline each tick may probe
//! the remote to detect recovery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::ReconciliationController;
use crate::audit::AuditSink;
use crate::connectivity::Connectivity;
use crate::gateway::RemoteGateway;
use crate::outbox::Outbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub interval: Duration,
    pub probe_when_offline: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_when_offline: true,
        }
    }
}

pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawn the loop on the current tokio runtime.
    pub fn spawn<G, A>(
        controller: Arc<ReconciliationController<G, A>>,
        outbox: Arc<Outbox>,
        connectivity: &Connectivity,
        options: SchedulerOptions,
    ) -> SchedulerHandle
    where
        G: RemoteGateway + 'static,
        A: AuditSink + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let manual = Arc::new(Notify::new());
        let task = tokio::spawn(run(
            controller,
            outbox,
            connectivity.subscribe(),
            stop_rx,
            Arc::clone(&manual),
            options,
        ));
        tracing::info!("Background sync started (every {:?})", options.interval);

        SchedulerHandle {
            stop: stop_tx,
            manual,
            task: Some(task),
        }
    }
}

async fn run<G, A>(
    controller: Arc<ReconciliationController<G, A>>,
    outbox: Arc<Outbox>,
    mut online: watch::Receiver<bool>,
    mut stop: watch::Receiver<bool>,
    manual: Arc<Notify>,
    options: SchedulerOptions,
) where
    G: RemoteGateway + 'static,
    A: AuditSink + 'static,
{
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let full_sync = tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                if *online.borrow() {
                    true
                } else if options.probe_when_offline {
                    // A successful probe flips connectivity; the watch arm syncs
                    controller.probe().await;
                    false
                } else {
                    false
                }
            }
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                let now_online = *online.borrow_and_update();
                if now_online {
                    tracing::info!("Back online; syncing");
                }
                now_online
            }
            () = outbox.enqueued().notified() => {
                if let Err(error) = controller.drain().await {
                    tracing::warn!("Drain after enqueue failed: {error}");
                }
                false
            }
            () = manual.notified() => true,
        };

        if full_sync {
            if let Err(error) = controller.sync_now().await {
                tracing::warn!("Background sync failed: {error}");
            }
        }
    }

    tracing::info!("Background sync stopped");
}

/// Owner of the background task; dropping it aborts the loop.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    manual: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Ask the loop for a drain and refresh as soon as possible.
    pub fn request_sync(&self) {
        self.manual.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop after the current iteration and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.stop.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                if !error.is_cancelled() {
                    tracing::warn!("Background sync task ended abnormally: {error}");
                }
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
