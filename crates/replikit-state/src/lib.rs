//! replikit-state: embedded object store for replikit.
//!
//! Backed by [redb](https://docs.rs/redb), holds the two reconciled kinds
//! (`Fleet` and `Replica`) and exposes the primitives a controller needs:
//! typed get/list, version-checked patches, finalizer-aware deletion,
//! owner-reference garbage collection, and a change notification stream.
//!
//! # Architecture
//!
//! All objects are JSON-serialized into redb's `&[u8]` value columns keyed
//! by `{namespace}/{name}`. Replicas are additionally indexed by their fleet
//! back-reference (`{namespace}/{fleet}/{replica}`) so listing the replicas
//! of one fleet is a range scan.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Every committed write is published
//! as a [`WatchEvent`] on a broadcast channel.

pub mod conditions;
pub mod error;
pub mod events;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use events::{EventType, WatchEvent};
pub use store::StateStore;
pub use types::*;
