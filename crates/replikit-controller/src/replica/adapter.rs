use std::sync::Arc;

use async_trait::async_trait;
use replikit_state::{Replica, Resource};
use tracing::debug;

use crate::client::Client;
use crate::loader::ObjectLoader;
use crate::operation::{Adapter, OperationResult, continue_processing, requeue_with_error};
use crate::ownership::set_controller_reference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaOperation {
    EnsureOwnerReferenceIsSet,
}

const OPERATIONS: &[ReplicaOperation] = &[ReplicaOperation::EnsureOwnerReferenceIsSet];

pub struct ReplicaAdapter {
    client: Client,
    replica: Replica,
    loader: Arc<dyn ObjectLoader>,
}

impl ReplicaAdapter {
    pub fn new(client: Client, replica: Replica, loader: Arc<dyn ObjectLoader>) -> Self {
        Self {
            client,
            replica,
            loader,
        }
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Make the fleet named by the back-reference the replica's controller,
    /// so the replica is collected when the fleet goes away.
    pub async fn ensure_owner_reference_is_set(&mut self) -> OperationResult {
        let fleet = match self
            .loader
            .get_fleet(&self.client, &self.replica.spec.fleet, &self.replica.metadata.namespace)
            .await
        {
            Ok(fleet) => fleet,
            Err(e) => return requeue_with_error(e),
        };

        let mut patched = self.replica.clone();
        if let Err(e) = set_controller_reference(&fleet, &mut patched) {
            return requeue_with_error(e);
        }

        match self.client.patch(&patched).await {
            Ok(replica) => self.replica = replica,
            Err(e) if e.is_not_found() => {
                debug!(replica = %self.replica.key(), "replica deleted before owner reference was set");
            }
            Err(e) => return requeue_with_error(e),
        }

        continue_processing()
    }
}

#[async_trait]
impl Adapter for ReplicaAdapter {
    type Operation = ReplicaOperation;

    fn operations(&self) -> &'static [ReplicaOperation] {
        OPERATIONS
    }

    async fn execute(&mut self, operation: ReplicaOperation) -> OperationResult {
        match operation {
            ReplicaOperation::EnsureOwnerReferenceIsSet => self.ensure_owner_reference_is_set().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, ControllerError};
    use crate::loader::Loader;
    use crate::loader::mock::MockLoader;
    use replikit_state::{Fleet, Kind, OwnerReference, StateStore};

    fn client() -> Client {
        Client::new(StateStore::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn sets_controller_reference_to_fleet() {
        let client = client();
        let fleet = client.create(&Fleet::new("default", "web", 1)).await.unwrap();
        let replica = client.create(&Replica::new("default", "web-a", "web")).await.unwrap();
        let mut adapter = ReplicaAdapter::new(client.clone(), replica, Arc::new(Loader));

        assert!(adapter.ensure_owner_reference_is_set().await.is_continue());

        let stored: Replica = client.get(&adapter.replica().key()).await.unwrap();
        let reference = stored.metadata.controller_reference().unwrap();
        assert_eq!(reference.uid, fleet.metadata.uid);
        assert_eq!(reference.kind, Kind::Fleet);
    }

    #[tokio::test]
    async fn second_run_writes_nothing() {
        let client = client();
        client.create(&Fleet::new("default", "web", 1)).await.unwrap();
        let replica = client.create(&Replica::new("default", "web-a", "web")).await.unwrap();
        let mut adapter = ReplicaAdapter::new(client.clone(), replica, Arc::new(Loader));
        adapter.ensure_owner_reference_is_set().await;
        let version = adapter.replica().metadata.resource_version;

        let mut rx = client.subscribe();
        assert!(adapter.ensure_owner_reference_is_set().await.is_continue());

        assert_eq!(adapter.replica().metadata.resource_version, version);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_fleet_requeues_with_error() {
        let client = client();
        let replica = client.create(&Replica::new("default", "web-a", "web")).await.unwrap();
        let mut adapter = ReplicaAdapter::new(client, replica, Arc::new(Loader));

        match adapter.ensure_owner_reference_is_set().await {
            OperationResult::RequeueWithError(e) => assert!(e.is_not_found()),
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn foreign_controller_is_an_error() {
        let client = client();
        client.create(&Fleet::new("default", "web", 1)).await.unwrap();
        let mut replica = Replica::new("default", "web-a", "web");
        replica.metadata.owner_references.push(OwnerReference {
            kind: Kind::Fleet,
            name: "api".to_string(),
            uid: "fleet-other".to_string(),
            controller: true,
            block_owner_deletion: true,
        });
        let replica = client.create(&replica).await.unwrap();
        let mut adapter = ReplicaAdapter::new(client, replica, Arc::new(Loader));

        assert!(matches!(
            adapter.ensure_owner_reference_is_set().await,
            OperationResult::RequeueWithError(ControllerError::AlreadyOwned { .. })
        ));
    }

    #[tokio::test]
    async fn vanished_replica_is_success() {
        let client = client();
        client.create(&Fleet::new("default", "web", 1)).await.unwrap();
        // Never stored: the patch reports not found.
        let replica = Replica::new("default", "web-a", "web");
        let mut adapter = ReplicaAdapter::new(client, replica, Arc::new(Loader));

        assert!(adapter.ensure_owner_reference_is_set().await.is_continue());
    }

    #[tokio::test]
    async fn loader_failure_requeues() {
        let client = client();
        let replica = Replica::new("default", "web-a", "web");
        let loader = MockLoader::new().with_fleet(|| Err(ClientError::Cancelled));
        let mut adapter = ReplicaAdapter::new(client, replica, Arc::new(loader));

        assert!(matches!(
            adapter.ensure_owner_reference_is_set().await,
            OperationResult::RequeueWithError(ControllerError::Client(ClientError::Cancelled))
        ));
    }
}
