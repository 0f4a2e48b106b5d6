//! Fleet reconciliation: finalization, scaling and health reporting.

pub mod adapter;
pub mod controller;

pub use adapter::{FINALIZER_NAME, FleetAdapter, FleetOperation};
pub use controller::FleetController;
