use std::sync::Arc;

use async_trait::async_trait;
use replikit_state::{EventType, Fleet, Kind, ObjectKey, Resource, WatchEvent};
use tracing::{debug, info};

use super::adapter::FleetAdapter;
use crate::client::Client;
use crate::controller::{Controller, ReconcileOutcome};
use crate::error::ControllerResult;
use crate::loader::{Loader, ObjectLoader};
use crate::operation::reconcile_handler;

/// Reconciles fleets against their replicas.
pub struct FleetController {
    client: Client,
    loader: Arc<dyn ObjectLoader>,
}

impl FleetController {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            loader: Arc::new(Loader),
        }
    }

    /// Replace the loader used by the adapters.
    pub fn with_loader(mut self, loader: Arc<dyn ObjectLoader>) -> Self {
        self.loader = loader;
        self
    }
}

#[async_trait]
impl Controller for FleetController {
    fn name(&self) -> &'static str {
        "fleet"
    }

    // Fleet updates that leave the generation alone (status and finalizer
    // writes) are ignored; any replica change wakes the fleets it points at.
    fn requests_for(&self, event: &WatchEvent) -> Vec<ObjectKey> {
        match event.object.kind {
            Kind::Fleet => match event.event_type {
                EventType::Updated {
                    generation_changed: false,
                } => Vec::new(),
                _ => vec![event.object.key.clone()],
            },
            Kind::Replica => event
                .owners
                .iter()
                .filter(|owner| owner.kind == Kind::Fleet)
                .map(|owner| owner.key.clone())
                .collect(),
        }
    }

    async fn setup_cache(&self) -> ControllerResult<()> {
        let indexed = self.client.rebuild_replica_index().await?;
        info!(indexed, "replica index ready");
        Ok(())
    }

    async fn list_keys(&self) -> ControllerResult<Vec<ObjectKey>> {
        let fleets = self.client.list::<Fleet>(None).await?;
        Ok(fleets.iter().map(Resource::key).collect())
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome {
        let fleet = match self.client.get::<Fleet>(key).await {
            Ok(fleet) => fleet,
            Err(e) if e.is_not_found() => {
                debug!(fleet = %key, "fleet no longer exists");
                return ReconcileOutcome::Done;
            }
            Err(e) => return ReconcileOutcome::RequeueWithError(e.into()),
        };

        let mut adapter = FleetAdapter::new(self.client.clone(), fleet, Arc::clone(&self.loader));
        reconcile_handler(&mut adapter).await.into()
    }
}
