//! Reconcile dispatchers.
//!
//! A [`Controller`] maps watch events to reconcile requests and runs one
//! reconciliation per request. The [`Manager`](crate::manager::Manager)
//! owns queueing and scheduling; controllers only report a
//! [`ReconcileOutcome`].

use std::sync::Arc;

use async_trait::async_trait;
use replikit_state::{ObjectKey, WatchEvent};

use crate::client::Client;
use crate::error::{ControllerError, ControllerResult};
use crate::fleet::FleetController;
use crate::operation::OperationResult;
use crate::replica::ReplicaController;

/// Scheduling decision for a finished reconciliation.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Nothing left to do until the next change.
    Done,
    /// Run again immediately.
    Requeue,
    /// Run again after a backoff delay.
    RequeueWithError(ControllerError),
}

impl From<OperationResult> for ReconcileOutcome {
    fn from(result: OperationResult) -> Self {
        match result {
            OperationResult::Continue | OperationResult::Stop => ReconcileOutcome::Done,
            OperationResult::Requeue => ReconcileOutcome::Requeue,
            OperationResult::RequeueWithError(err) => ReconcileOutcome::RequeueWithError(err),
        }
    }
}

#[async_trait]
pub trait Controller: Send + Sync {
    fn name(&self) -> &'static str;

    /// Keys to reconcile in response to a store change.
    fn requests_for(&self, event: &WatchEvent) -> Vec<ObjectKey>;

    /// Prepare indexes before the first reconciliation.
    async fn setup_cache(&self) -> ControllerResult<()> {
        Ok(())
    }

    /// Every key this controller is responsible for, used for full resyncs.
    async fn list_keys(&self) -> ControllerResult<Vec<ObjectKey>>;

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome;
}

/// Controllers run by the daemon.
pub fn enabled_controllers(client: &Client) -> Vec<Arc<dyn Controller>> {
    vec![
        Arc::new(FleetController::new(client.clone())),
        Arc::new(ReplicaController::new(client.clone())),
    ]
}
