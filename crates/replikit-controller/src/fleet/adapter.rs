//! Reconciliation steps for a single fleet.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use replikit_state::{Fleet, HealthReason, Replica, Resource, epoch_secs};
use tracing::{debug, info};

use crate::client::Client;
use crate::error::ClientResult;
use crate::loader::ObjectLoader;
use crate::operation::{
    Adapter, OperationResult, continue_processing, requeue, requeue_on_error_or_continue,
    requeue_with_error,
};

/// Finalizer the fleet controller keeps on every live fleet.
pub const FINALIZER_NAME: &str = "replikit.dev/finalizer";

/// Fleet reconciliation steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetOperation {
    EnsureFinalizersAreCalled,
    EnsureFinalizerIsAdded,
    EnsureMaximumReplicas,
    EnsureMinimumReplicas,
    EnsureReplicaDataConsistency,
}

const OPERATIONS: &[FleetOperation] = &[
    FleetOperation::EnsureFinalizersAreCalled,
    FleetOperation::EnsureFinalizerIsAdded,
    FleetOperation::EnsureMaximumReplicas,
    FleetOperation::EnsureMinimumReplicas,
    FleetOperation::EnsureReplicaDataConsistency,
];

/// Holds what one fleet reconciliation needs.
///
/// `fleet` is the working copy; every successful write replaces it with the
/// stored result so later steps patch against the current resource version.
pub struct FleetAdapter {
    client: Client,
    fleet: Fleet,
    loader: Arc<dyn ObjectLoader>,
}

impl FleetAdapter {
    pub fn new(client: Client, fleet: Fleet, loader: Arc<dyn ObjectLoader>) -> Self {
        Self { client, fleet, loader }
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    fn desired(&self) -> usize {
        self.fleet.spec.desired_replicas as usize
    }

    /// Once the fleet is marked for deletion, delete its replicas and drop
    /// the finalizer. The fleet is always requeued so no other step runs.
    pub async fn ensure_finalizers_are_called(&mut self) -> OperationResult {
        if !self.fleet.metadata.is_being_deleted() {
            return continue_processing();
        }

        if self.fleet.metadata.has_finalizer(FINALIZER_NAME) {
            if let Err(e) = self.finalize_fleet().await {
                return requeue_with_error(e);
            }

            let mut patched = self.fleet.clone();
            patched.metadata.remove_finalizer(FINALIZER_NAME);
            match self.client.patch(&patched).await {
                Ok(fleet) => self.fleet = fleet,
                Err(e) => return requeue_with_error(e),
            }
            info!(fleet = %self.fleet.key(), "finalizer removed");
        }

        requeue()
    }

    pub async fn ensure_finalizer_is_added(&mut self) -> OperationResult {
        if self.fleet.metadata.has_finalizer(FINALIZER_NAME) {
            return continue_processing();
        }

        info!(fleet = %self.fleet.key(), "adding finalizer");
        let mut patched = self.fleet.clone();
        patched.metadata.add_finalizer(FINALIZER_NAME);
        let result = self.client.patch(&patched).await.map(|fleet| self.fleet = fleet);
        requeue_on_error_or_continue(result)
    }

    /// Delete the replicas past the desired count.
    pub async fn ensure_maximum_replicas(&mut self) -> OperationResult {
        let replicas = match self.loader.get_replicas(&self.client, &self.fleet).await {
            Ok(replicas) => replicas,
            Err(e) => return requeue_with_error(e),
        };

        let desired = self.desired();
        if replicas.len() <= desired {
            return continue_processing();
        }

        for replica in &replicas[desired..] {
            if let Err(e) = self.delete_replica(replica).await {
                return requeue_with_error(e);
            }
        }

        continue_processing()
    }

    /// Create replicas until the desired count is reached.
    pub async fn ensure_minimum_replicas(&mut self) -> OperationResult {
        let replicas = match self.loader.get_replicas(&self.client, &self.fleet).await {
            Ok(replicas) => replicas,
            Err(e) => return requeue_with_error(e),
        };

        let desired = self.desired();
        if replicas.len() >= desired {
            return continue_processing();
        }

        for _ in replicas.len()..desired {
            match self.client.create(&Replica::generated_for(&self.fleet)).await {
                Ok(replica) => info!(fleet = %self.fleet.key(), replica = %replica.key(), "replica created"),
                Err(e) => return requeue_with_error(e),
            }
        }

        continue_processing()
    }

    /// Record the observed replicas and the resulting health on the status.
    pub async fn ensure_replica_data_consistency(&mut self) -> OperationResult {
        let replicas = match self.loader.get_replicas(&self.client, &self.fleet).await {
            Ok(replicas) => replicas,
            Err(e) => return requeue_with_error(e),
        };

        let mut updated = self.fleet.clone();
        updated.status.replicas = replicas.iter().map(|r| r.metadata.name.clone()).collect();

        let now = epoch_secs();
        match replicas.len().cmp(&self.desired()) {
            Ordering::Equal => updated.mark_healthy(HealthReason::Healthy, now),
            Ordering::Greater => updated.mark_healthy(HealthReason::TooManyReplicas, now),
            Ordering::Less => updated.mark_unhealthy(now),
        }

        let result = self
            .client
            .patch_status(&updated)
            .await
            .map(|fleet| self.fleet = fleet);
        requeue_on_error_or_continue(result)
    }

    /// Delete every replica of the fleet.
    async fn finalize_fleet(&self) -> ClientResult<()> {
        let replicas = self.loader.get_replicas(&self.client, &self.fleet).await?;
        for replica in &replicas {
            self.delete_replica(replica).await?;
        }
        info!(fleet = %self.fleet.key(), deleted = replicas.len(), "fleet finalized");
        Ok(())
    }

    /// Delete one replica; a replica that is already gone counts as deleted.
    async fn delete_replica(&self, replica: &Replica) -> ClientResult<()> {
        match self.client.delete::<Replica>(&replica.key()).await {
            Ok(()) => {
                info!(fleet = %self.fleet.key(), replica = %replica.key(), "replica deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(replica = %replica.key(), "replica already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Adapter for FleetAdapter {
    type Operation = FleetOperation;

    fn operations(&self) -> &'static [FleetOperation] {
        OPERATIONS
    }

    async fn execute(&mut self, operation: FleetOperation) -> OperationResult {
        match operation {
            FleetOperation::EnsureFinalizersAreCalled => self.ensure_finalizers_are_called().await,
            FleetOperation::EnsureFinalizerIsAdded => self.ensure_finalizer_is_added().await,
            FleetOperation::EnsureMaximumReplicas => self.ensure_maximum_replicas().await,
            FleetOperation::EnsureMinimumReplicas => self.ensure_minimum_replicas().await,
            FleetOperation::EnsureReplicaDataConsistency => {
                self.ensure_replica_data_consistency().await
            }
        }
    }
}
