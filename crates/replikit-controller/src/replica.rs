//! Replica reconciliation: links every replica to its fleet.

pub mod adapter;
pub mod controller;

pub use adapter::{ReplicaAdapter, ReplicaOperation};
pub use controller::ReplicaController;
