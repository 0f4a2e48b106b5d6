//! Change notifications published after every committed write.

use serde::{Deserialize, Serialize};

use crate::types::{ObjectRef, Resource};

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Created,
    /// `generation_changed` is false for metadata-only and status writes.
    Updated { generation_changed: bool },
    Deleted,
}

/// A single object change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub object: ObjectRef,
    pub event_type: EventType,
    /// Objects related to the changed one through ownership or back-reference.
    pub owners: Vec<ObjectRef>,
}

impl WatchEvent {
    pub fn for_object<R: Resource>(event_type: EventType, object: &R) -> Self {
        Self {
            object: object.object_ref(),
            event_type,
            owners: object.owners(),
        }
    }
}
