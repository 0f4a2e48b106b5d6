//! Validation for replica writes: the fleet back-reference must resolve.

use replikit_state::{Fleet, ObjectView, Replica, StateStore};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

use super::Webhook;

/// Rejects replicas that point at a fleet which does not exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaWebhook;

impl ReplicaWebhook {
    fn check_fleet_exists(&self, store: &StateStore, replica: &Replica) -> ClientResult<()> {
        if store.get::<Fleet>(&replica.fleet_key())?.is_some() {
            return Ok(());
        }
        debug!(replica = %replica.metadata.key(), fleet = %replica.spec.fleet, "rejecting replica with dangling fleet reference");
        Err(ClientError::Denied {
            webhook: self.name().to_string(),
            reason: format!(
                "resource references an unexistent Fleet resource ({}/{})",
                replica.metadata.namespace, replica.spec.fleet
            ),
        })
    }
}

impl Webhook for ReplicaWebhook {
    fn name(&self) -> &'static str {
        "replica"
    }

    fn validate_create(&self, store: &StateStore, object: ObjectView<'_>) -> ClientResult<()> {
        match object {
            ObjectView::Replica(replica) => self.check_fleet_exists(store, replica),
            ObjectView::Fleet(_) => Ok(()),
        }
    }

    // Only a changed back-reference is re-validated, so replicas of a fleet
    // that is being finalized can still have their metadata updated.
    fn validate_update(
        &self,
        store: &StateStore,
        old: ObjectView<'_>,
        new: ObjectView<'_>,
    ) -> ClientResult<()> {
        match (old, new) {
            (ObjectView::Replica(old), ObjectView::Replica(new)) if old.spec.fleet != new.spec.fleet => {
                self.check_fleet_exists(store, new)
            }
            _ => Ok(()),
        }
    }
}
