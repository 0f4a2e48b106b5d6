//! Async client over the state store.
//!
//! Every call runs the blocking redb transaction on the tokio blocking pool
//! and races it against the client's cancellation token. Writes pass
//! through the configured admission webhooks before reaching the store.

use std::sync::Arc;

use replikit_state::{ObjectKey, Replica, Resource, StateError, StateStore, WatchEvent};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ClientResult};
use crate::webhooks::Webhook;

/// Cheap-to-clone handle used by controllers, loaders and the API.
#[derive(Clone)]
pub struct Client {
    store: StateStore,
    webhooks: Arc<[Arc<dyn Webhook>]>,
    cancel: CancellationToken,
}

impl Client {
    /// A client with no webhooks and a token that is never cancelled.
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            webhooks: Arc::from(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_webhooks(mut self, webhooks: Vec<Arc<dyn Webhook>>) -> Self {
        self.webhooks = webhooks.into();
        self
    }

    /// Abort in-flight and future calls once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.store.subscribe()
    }

    /// Run a blocking store operation, honouring cancellation.
    async fn run<T, F>(&self, op: F) -> ClientResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&StateStore, &[Arc<dyn Webhook>]) -> ClientResult<T> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let store = self.store.clone();
        let webhooks = Arc::clone(&self.webhooks);
        let task = tokio::task::spawn_blocking(move || op(&store, &webhooks));

        tokio::select! {
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            joined = task => joined.map_err(|e| ClientError::Task(e.to_string()))?,
        }
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Fetch one object. A missing object is a `NotFound` error.
    pub async fn get<R: Resource>(&self, key: &ObjectKey) -> ClientResult<R> {
        let key = key.clone();
        self.run(move |store, _| {
            store
                .get::<R>(&key)?
                .ok_or_else(|| StateError::NotFound(format!("{} {key}", R::KIND)).into())
        })
        .await
    }

    pub async fn list<R: Resource>(&self, namespace: Option<&str>) -> ClientResult<Vec<R>> {
        let namespace = namespace.map(str::to_string);
        self.run(move |store, _| Ok(store.list::<R>(namespace.as_deref())?))
            .await
    }

    /// Replicas whose back-reference names `fleet`, ordered by name.
    pub async fn list_replicas_for_fleet(&self, namespace: &str, fleet: &str) -> ClientResult<Vec<Replica>> {
        let (namespace, fleet) = (namespace.to_string(), fleet.to_string());
        self.run(move |store, _| Ok(store.list_replicas_for_fleet(&namespace, &fleet)?))
            .await
    }

    // ── Writes ─────────────────────────────────────────────────────

    pub async fn create<R: Resource>(&self, object: &R) -> ClientResult<R> {
        let object = object.clone();
        self.run(move |store, webhooks| {
            for webhook in webhooks {
                webhook.validate_create(store, object.view())?;
            }
            Ok(store.create(&object)?)
        })
        .await
    }

    /// Version-checked update of spec and metadata.
    pub async fn patch<R: Resource>(&self, object: &R) -> ClientResult<R> {
        let object = object.clone();
        self.run(move |store, webhooks| {
            if let Some(old) = store.get::<R>(&object.key())? {
                for webhook in webhooks {
                    webhook.validate_update(store, old.view(), object.view())?;
                }
            }
            Ok(store.patch(&object)?)
        })
        .await
    }

    /// Version-checked update of the status subresource.
    pub async fn patch_status<R: Resource>(&self, object: &R) -> ClientResult<R> {
        let object = object.clone();
        self.run(move |store, _| Ok(store.patch_status(&object)?))
            .await
    }

    pub async fn delete<R: Resource>(&self, key: &ObjectKey) -> ClientResult<()> {
        let key = key.clone();
        self.run(move |store, webhooks| {
            if let Some(object) = store.get::<R>(&key)? {
                for webhook in webhooks {
                    webhook.validate_delete(store, object.view())?;
                }
            }
            Ok(store.delete::<R>(&key)?)
        })
        .await
    }

    pub async fn rebuild_replica_index(&self) -> ClientResult<usize> {
        self.run(|store, _| Ok(store.rebuild_replica_index()?)).await
    }
}
