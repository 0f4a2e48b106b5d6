//! Loader with injectable responses, for tests.

use std::sync::Arc;

use async_trait::async_trait;
use replikit_state::{Fleet, Replica};

use super::{Loader, ObjectLoader};
use crate::client::Client;
use crate::error::ClientResult;

type Responder<T> = Arc<dyn Fn() -> ClientResult<T> + Send + Sync>;

/// Delegates to [`Loader`] unless a response has been injected for a method.
#[derive(Clone, Default)]
pub struct MockLoader {
    inner: Loader,
    fleet: Option<Responder<Fleet>>,
    replicas: Option<Responder<Vec<Replica>>>,
    replica: Option<Responder<Replica>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fleet(mut self, respond: impl Fn() -> ClientResult<Fleet> + Send + Sync + 'static) -> Self {
        self.fleet = Some(Arc::new(respond));
        self
    }

    pub fn with_replicas(
        mut self,
        respond: impl Fn() -> ClientResult<Vec<Replica>> + Send + Sync + 'static,
    ) -> Self {
        self.replicas = Some(Arc::new(respond));
        self
    }

    pub fn with_replica(mut self, respond: impl Fn() -> ClientResult<Replica> + Send + Sync + 'static) -> Self {
        self.replica = Some(Arc::new(respond));
        self
    }
}

#[async_trait]
impl ObjectLoader for MockLoader {
    async fn get_fleet(&self, client: &Client, name: &str, namespace: &str) -> ClientResult<Fleet> {
        match &self.fleet {
            Some(respond) => respond(),
            None => self.inner.get_fleet(client, name, namespace).await,
        }
    }

    async fn get_replicas(&self, client: &Client, fleet: &Fleet) -> ClientResult<Vec<Replica>> {
        match &self.replicas {
            Some(respond) => respond(),
            None => self.inner.get_replicas(client, fleet).await,
        }
    }

    async fn get_replica(&self, client: &Client, name: &str, namespace: &str) -> ClientResult<Replica> {
        match &self.replica {
            Some(respond) => respond(),
            None => self.inner.get_replica(client, name, namespace).await,
        }
    }
}
