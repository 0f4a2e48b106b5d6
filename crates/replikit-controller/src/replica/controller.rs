use std::sync::Arc;

use async_trait::async_trait;
use replikit_state::{Kind, ObjectKey, Replica, Resource, WatchEvent};
use tracing::debug;

use super::adapter::ReplicaAdapter;
use crate::client::Client;
use crate::controller::{Controller, ReconcileOutcome};
use crate::error::ControllerResult;
use crate::loader::{Loader, ObjectLoader};
use crate::operation::reconcile_handler;

/// Keeps replica owner references in sync with their fleet back-reference.
pub struct ReplicaController {
    client: Client,
    loader: Arc<dyn ObjectLoader>,
}

impl ReplicaController {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            loader: Arc::new(Loader),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ObjectLoader>) -> Self {
        self.loader = loader;
        self
    }
}

#[async_trait]
impl Controller for ReplicaController {
    fn name(&self) -> &'static str {
        "replica"
    }

    fn requests_for(&self, event: &WatchEvent) -> Vec<ObjectKey> {
        match event.object.kind {
            Kind::Replica => vec![event.object.key.clone()],
            Kind::Fleet => Vec::new(),
        }
    }

    async fn list_keys(&self) -> ControllerResult<Vec<ObjectKey>> {
        let replicas = self.client.list::<Replica>(None).await?;
        Ok(replicas.iter().map(Resource::key).collect())
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome {
        let replica = match self.client.get::<Replica>(key).await {
            Ok(replica) => replica,
            Err(e) if e.is_not_found() => {
                debug!(replica = %key, "replica no longer exists");
                return ReconcileOutcome::Done;
            }
            Err(e) => return ReconcileOutcome::RequeueWithError(e.into()),
        };

        let mut adapter = ReplicaAdapter::new(self.client.clone(), replica, Arc::clone(&self.loader));
        reconcile_handler(&mut adapter).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replikit_state::{EventType, Fleet, ObjectRef, StateStore};

    #[test]
    fn only_replica_events_map() {
        let controller = ReplicaController::new(Client::new(StateStore::open_in_memory().unwrap()));
        let replica = WatchEvent {
            object: ObjectRef::new(Kind::Replica, ObjectKey::new("default", "web-a")),
            event_type: EventType::Deleted,
            owners: vec![],
        };
        let fleet = WatchEvent {
            object: ObjectRef::new(Kind::Fleet, ObjectKey::new("default", "web")),
            event_type: EventType::Created,
            owners: vec![],
        };

        assert_eq!(
            controller.requests_for(&replica),
            vec![ObjectKey::new("default", "web-a")]
        );
        assert!(controller.requests_for(&fleet).is_empty());
    }

    #[tokio::test]
    async fn reconcile_links_replica() {
        let client = Client::new(StateStore::open_in_memory().unwrap());
        client.create(&Fleet::new("default", "web", 1)).await.unwrap();
        client.create(&Replica::new("default", "web-a", "web")).await.unwrap();
        let controller = ReplicaController::new(client.clone());

        let key = ObjectKey::new("default", "web-a");
        assert!(matches!(controller.reconcile(&key).await, ReconcileOutcome::Done));

        let replica: Replica = client.get(&key).await.unwrap();
        assert!(replica.metadata.controller_reference().is_some());
    }
}
