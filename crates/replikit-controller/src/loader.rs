//! Object accessor used by the adapters.
//!
//! All reads a reconciliation performs go through [`ObjectLoader`], so tests
//! can substitute individual lookups with [`mock::MockLoader`].

pub mod mock;

use async_trait::async_trait;
use replikit_state::{Fleet, ObjectKey, Replica};

use crate::client::Client;
use crate::error::ClientResult;

#[async_trait]
pub trait ObjectLoader: Send + Sync {
    /// Fetch a fleet by name. A missing fleet is a `NotFound` error.
    async fn get_fleet(&self, client: &Client, name: &str, namespace: &str) -> ClientResult<Fleet>;

    /// Replicas whose back-reference names `fleet`, in its namespace.
    async fn get_replicas(&self, client: &Client, fleet: &Fleet) -> ClientResult<Vec<Replica>>;

    /// Fetch a replica by name. A missing replica is a `NotFound` error.
    async fn get_replica(&self, client: &Client, name: &str, namespace: &str) -> ClientResult<Replica>;
}

/// Loader reading straight from the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Loader;

#[async_trait]
impl ObjectLoader for Loader {
    async fn get_fleet(&self, client: &Client, name: &str, namespace: &str) -> ClientResult<Fleet> {
        client.get(&ObjectKey::new(namespace, name)).await
    }

    async fn get_replicas(&self, client: &Client, fleet: &Fleet) -> ClientResult<Vec<Replica>> {
        client
            .list_replicas_for_fleet(&fleet.metadata.namespace, &fleet.metadata.name)
            .await
    }

    async fn get_replica(&self, client: &Client, name: &str, namespace: &str) -> ClientResult<Replica> {
        client.get(&ObjectKey::new(namespace, name)).await
    }
}
