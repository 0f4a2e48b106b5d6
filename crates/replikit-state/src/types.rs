//! Object model for the replikit state store.
//!
//! Two kinds are stored: `Fleet` declares a desired replica count and
//! carries the observed status, `Replica` is one unit of that fleet and
//! points back to it by name. Both share `ObjectMeta`, which holds identity,
//! optimistic-concurrency version, lifecycle markers and ownership.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::TableDefinition;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::conditions::set_condition;
use crate::tables::{FLEETS, REPLICAS};

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// The kinds of object held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Fleet,
    Replica,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Fleet => f.write_str("Fleet"),
            Kind::Replica => f.write_str("Replica"),
        }
    }
}

// ── Identity ──────────────────────────────────────────────────────

/// Namespace-scoped object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build the composite key for the object tables.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Full identity of an object: `{kind, namespace, name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: Kind,
    pub key: ObjectKey,
}

impl ObjectRef {
    pub fn new(kind: Kind, key: ObjectKey) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

// ── Metadata ──────────────────────────────────────────────────────

/// Link from a dependent object to the object that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: Kind,
    pub name: String,
    pub uid: String,
    /// At most one owner reference per object may be the controller.
    #[serde(default)]
    pub controller: bool,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Metadata shared by every stored object.
///
/// `uid`, `resource_version`, `generation`, `creation_timestamp` and
/// `deletion_timestamp` are owned by the store: values sent by a client are
/// ignored on write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    /// Prefix for a store-generated name, used when `name` is empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub creation_timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Metadata for an object with a fixed name.
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Metadata for an object whose name the store generates from `prefix`.
    pub fn generated(namespace: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            generate_name: prefix.into(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Whether deletion has been requested.
    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer. Returns false if it was already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove a finalizer. Returns false if it was not present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_reference(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// Whether an owner reference points at the given uid.
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|r| r.uid == uid)
    }
}

// ── Conditions ────────────────────────────────────────────────────

/// Tri-state status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single observation about an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Last time `status` changed.
    pub last_transition_time: Timestamp,
}

// ── Fleet ─────────────────────────────────────────────────────────

/// Condition type tracking the health of a fleet.
pub const HEALTH_CONDITION_TYPE: &str = "Health";

/// Reasons recorded on the `Health` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthReason {
    /// Observed replicas match the desired count.
    Healthy,
    /// The fleet needs to scale up.
    NotEnoughReplicas,
    /// The fleet needs to scale down.
    TooManyReplicas,
}

impl HealthReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthReason::Healthy => "Healthy",
            HealthReason::NotEnoughReplicas => "NotEnoughReplicas",
            HealthReason::TooManyReplicas => "TooManyReplicas",
        }
    }
}

/// Desired state of a fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSpec {
    /// Number of replicas that should exist at any given moment.
    pub desired_replicas: u32,
}

/// Observed state of a fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Names of the replicas observed on the last reconciliation.
    #[serde(default)]
    pub replicas: Vec<String>,
}

/// A fleet declares how many replicas should exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fleet {
    pub metadata: ObjectMeta,
    pub spec: FleetSpec,
    #[serde(default)]
    pub status: FleetStatus,
}

impl Fleet {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, desired_replicas: u32) -> Self {
        Self {
            metadata: ObjectMeta::named(namespace, name),
            spec: FleetSpec { desired_replicas },
            status: FleetStatus::default(),
        }
    }

    /// Mark the fleet healthy with the given reason.
    pub fn mark_healthy(&mut self, reason: HealthReason, now: Timestamp) {
        set_condition(
            &mut self.status.conditions,
            HEALTH_CONDITION_TYPE,
            ConditionStatus::True,
            reason.as_str(),
            now,
        );
    }

    /// Mark the fleet unhealthy because it lacks replicas.
    pub fn mark_unhealthy(&mut self, now: Timestamp) {
        set_condition(
            &mut self.status.conditions,
            HEALTH_CONDITION_TYPE,
            ConditionStatus::False,
            HealthReason::NotEnoughReplicas.as_str(),
            now,
        );
    }

    /// The current `Health` condition, if one has been recorded.
    pub fn health(&self) -> Option<&Condition> {
        crate::conditions::find_condition(&self.status.conditions, HEALTH_CONDITION_TYPE)
    }
}

// ── Replica ───────────────────────────────────────────────────────

/// Desired state of a replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSpec {
    /// Name of the fleet this replica belongs to (same namespace).
    pub fleet: String,
}

/// One replica of a fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub metadata: ObjectMeta,
    pub spec: ReplicaSpec,
}

impl Replica {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, fleet: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(namespace, name),
            spec: ReplicaSpec { fleet: fleet.into() },
        }
    }

    /// A replica for `fleet` whose name the store generates as `<fleet>-<suffix>`.
    pub fn generated_for(fleet: &Fleet) -> Self {
        Self {
            metadata: ObjectMeta::generated(
                fleet.metadata.namespace.clone(),
                format!("{}-", fleet.metadata.name),
            ),
            spec: ReplicaSpec {
                fleet: fleet.metadata.name.clone(),
            },
        }
    }

    /// Key of the fleet named by the back-reference.
    pub fn fleet_key(&self) -> ObjectKey {
        ObjectKey::new(self.metadata.namespace.clone(), self.spec.fleet.clone())
    }
}

// ── Resource trait ────────────────────────────────────────────────

/// Borrowed view of any stored object, used by admission webhooks.
#[derive(Debug, Clone, Copy)]
pub enum ObjectView<'a> {
    Fleet(&'a Fleet),
    Replica(&'a Replica),
}

/// Behaviour shared by every kind the store persists.
pub trait Resource: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {
    const KIND: Kind;

    /// Table holding objects of this kind.
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;

    type Spec: PartialEq;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn spec(&self) -> &Self::Spec;
    fn view(&self) -> ObjectView<'_>;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(Self::KIND, self.key())
    }

    /// Copy the status subresource from `other`. Kinds without a status
    /// leave this as a no-op.
    fn copy_status_from(&mut self, _other: &Self) {}

    /// Entry for the fleet back-reference index, if this kind is indexed.
    fn index_entry(&self) -> Option<String> {
        None
    }

    /// Objects that should hear about changes to this one.
    fn owners(&self) -> Vec<ObjectRef> {
        let meta = self.meta();
        meta.owner_references
            .iter()
            .map(|r| ObjectRef::new(r.kind, ObjectKey::new(meta.namespace.clone(), r.name.clone())))
            .collect()
    }
}

impl Resource for Fleet {
    const KIND: Kind = Kind::Fleet;
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = FLEETS;
    type Spec = FleetSpec;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &FleetSpec {
        &self.spec
    }

    fn view(&self) -> ObjectView<'_> {
        ObjectView::Fleet(self)
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

impl Resource for Replica {
    const KIND: Kind = Kind::Replica;
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = REPLICAS;
    type Spec = ReplicaSpec;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &ReplicaSpec {
        &self.spec
    }

    fn view(&self) -> ObjectView<'_> {
        ObjectView::Replica(self)
    }

    fn index_entry(&self) -> Option<String> {
        Some(format!(
            "{}/{}/{}",
            self.metadata.namespace, self.spec.fleet, self.metadata.name
        ))
    }

    // The back-reference counts as an owner before the owner reference is set.
    fn owners(&self) -> Vec<ObjectRef> {
        let mut owners = vec![ObjectRef::new(Kind::Fleet, self.fleet_key())];
        for r in &self.metadata.owner_references {
            let owner = ObjectRef::new(
                r.kind,
                ObjectKey::new(self.metadata.namespace.clone(), r.name.clone()),
            );
            if !owners.contains(&owner) {
                owners.push(owner);
            }
        }
        owners
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
