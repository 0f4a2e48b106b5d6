//! Admission webhooks.
//!
//! Webhooks run inside the [`Client`](crate::client::Client) write path,
//! after the request is accepted and before the store commits. A webhook
//! that returns an error aborts the write.

pub mod replica;

use std::sync::Arc;

use replikit_state::{ObjectView, StateStore};

use crate::error::ClientResult;

pub use replica::ReplicaWebhook;

/// Validating admission hook. Every method defaults to allowing the request.
pub trait Webhook: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate_create(&self, _store: &StateStore, _object: ObjectView<'_>) -> ClientResult<()> {
        Ok(())
    }

    fn validate_update(
        &self,
        _store: &StateStore,
        _old: ObjectView<'_>,
        _new: ObjectView<'_>,
    ) -> ClientResult<()> {
        Ok(())
    }

    fn validate_delete(&self, _store: &StateStore, _object: ObjectView<'_>) -> ClientResult<()> {
        Ok(())
    }
}

/// Webhooks installed by the daemon.
pub fn enabled_webhooks() -> Vec<Arc<dyn Webhook>> {
    vec![Arc::new(ReplicaWebhook)]
}
