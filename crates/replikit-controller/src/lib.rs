//! replikit-controller: level-triggered reconciliation for fleets and replicas.
//!
//! A [`Fleet`](replikit_state::Fleet) declares how many replicas it wants;
//! the fleet controller creates and deletes [`Replica`](replikit_state::Replica)
//! objects until the count matches, reports a `Health` condition, and uses a
//! finalizer to clean up replicas when the fleet is deleted. The replica
//! controller links each replica back to its fleet with a controller owner
//! reference.
//!
//! # Architecture
//!
//! ```text
//! StateStore ──watch──▶ Manager ──▶ WorkQueue ──▶ Controller::reconcile
//!                                                   │
//!                                                   ▼
//!                                     Adapter + reconcile_handler
//!                                     (ordered, idempotent steps)
//! ```
//!
//! Every step returns an [`OperationResult`](operation::OperationResult):
//! continue, stop, requeue now, or requeue with backoff. Store access goes
//! through the async [`Client`](client::Client), which applies admission
//! webhooks and observes cancellation.

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod fleet;
pub mod loader;
pub mod manager;
pub mod operation;
pub mod ownership;
pub mod replica;
pub mod webhooks;
pub mod workqueue;

pub use client::Client;
pub use config::ManagerConfig;
pub use controller::{Controller, ReconcileOutcome, enabled_controllers};
pub use error::{ClientError, ClientResult, ControllerError, ControllerResult};
pub use manager::Manager;
pub use webhooks::enabled_webhooks;
