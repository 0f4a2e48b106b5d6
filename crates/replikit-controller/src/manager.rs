//! Controller manager.
//!
//! Subscribes to the store's watch stream, turns events into reconcile
//! requests for every registered controller and runs a fixed pool of
//! workers per controller. Delivery is at least once: a lagging watch
//! stream triggers a full resync instead of losing events.

use std::sync::Arc;

use anyhow::Context;
use replikit_state::WatchEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::ManagerConfig;
use crate::controller::{Controller, ReconcileOutcome};
use crate::workqueue::WorkQueue;

/// A controller together with its queue.
struct Registered {
    controller: Arc<dyn Controller>,
    queue: WorkQueue,
}

pub struct Manager {
    client: Client,
    config: ManagerConfig,
}

impl Manager {
    pub fn new(client: Client, config: ManagerConfig) -> Self {
        Self { client, config }
    }

    /// Run `controllers` until `shutdown` is cancelled.
    pub async fn run(
        &self,
        controllers: Vec<Arc<dyn Controller>>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        self.config.validate()?;

        // Subscribe before the initial resync so no change falls in between.
        let mut events = self.client.subscribe();

        let mut registered = Vec::with_capacity(controllers.len());
        for controller in controllers {
            controller
                .setup_cache()
                .await
                .with_context(|| format!("setting up cache for {} controller", controller.name()))?;
            registered.push(Registered {
                controller,
                queue: WorkQueue::new(self.config.backoff()),
            });
        }
        resync(&registered).await;

        let mut workers = JoinSet::new();
        for entry in &registered {
            for _ in 0..self.config.workers {
                workers.spawn(run_worker(Arc::clone(&entry.controller), entry.queue.clone()));
            }
        }
        info!(
            controllers = registered.len(),
            workers = self.config.workers,
            "manager started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("manager shutting down");
                    break;
                }
                received = events.recv() => match received {
                    Ok(event) => dispatch(&registered, &event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "watch stream lagged, resyncing");
                        resync(&registered).await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("watch stream closed");
                        break;
                    }
                },
            }
        }

        for entry in &registered {
            entry.queue.shut_down().await;
        }
        while workers.join_next().await.is_some() {}
        info!("manager stopped");
        Ok(())
    }
}

async fn dispatch(registered: &[Registered], event: &WatchEvent) {
    for entry in registered {
        for key in entry.controller.requests_for(event) {
            debug!(controller = entry.controller.name(), %key, event = ?event.event_type, "enqueue");
            entry.queue.add(key).await;
        }
    }
}

/// Queue every key each controller is responsible for.
async fn resync(registered: &[Registered]) {
    for entry in registered {
        match entry.controller.list_keys().await {
            Ok(keys) => {
                debug!(controller = entry.controller.name(), count = keys.len(), "resync");
                for key in keys {
                    entry.queue.add(key).await;
                }
            }
            Err(e) => warn!(controller = entry.controller.name(), error = %e, "resync failed"),
        }
    }
}

async fn run_worker(controller: Arc<dyn Controller>, queue: WorkQueue) {
    while let Some(key) = queue.get().await {
        match controller.reconcile(&key).await {
            ReconcileOutcome::Done => queue.forget(&key).await,
            ReconcileOutcome::Requeue => {
                queue.forget(&key).await;
                queue.add(key.clone()).await;
            }
            ReconcileOutcome::RequeueWithError(err) => {
                let delay = queue.add_rate_limited(key.clone()).await;
                warn!(
                    controller = controller.name(),
                    %key,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "reconcile failed"
                );
            }
        }
        queue.done(&key).await;
    }
}
