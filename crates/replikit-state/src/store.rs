//! StateStore: redb-backed object persistence for replikit.
//!
//! Provides typed operations over fleets and replicas. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! Writes follow the usual object-store contract:
//! - `create` assigns uid, resource version and (optionally) a generated name
//! - `patch` / `patch_status` are conditioned on the caller's resource
//!   version and fail with `Conflict` on mismatch
//! - writes that change nothing are not committed and emit no event
//! - `delete` marks objects that still carry finalizers and physically
//!   removes the rest, garbage-collecting the replicas they own

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::events::{EventType, WatchEvent};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Capacity of the change notification channel.
const EVENT_BUFFER: usize = 1024;

/// Length of the suffix appended to `generate_name`.
const NAME_SUFFIX_LEN: usize = 5;

/// Thread-safe object store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    events: broadcast::Sender<WatchEvent>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> StateResult<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let store = Self {
            db: Arc::new(db),
            events,
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(FLEETS).map_err(map_err!(Table))?;
        txn.open_table(REPLICAS).map_err(map_err!(Table))?;
        txn.open_table(REPLICAS_BY_FLEET).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to change notifications for every committed write.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    fn publish(&self, events: Vec<WatchEvent>) {
        for event in events {
            // No receivers is fine: nobody is watching yet.
            let _ = self.events.send(event);
        }
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Get an object by key.
    pub fn get<R: Resource>(&self, key: &ObjectKey) -> StateResult<Option<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
        match table.get(key.table_key().as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List objects of one kind, optionally restricted to a namespace.
    pub fn list<R: Resource>(&self, namespace: Option<&str>) -> StateResult<Vec<R>> {
        let prefix = namespace.map(|ns| format!("{ns}/")).unwrap_or_default();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// List the replicas whose back-reference names `fleet` in `namespace`.
    ///
    /// Served from the back-reference index; results are ordered by name.
    pub fn list_replicas_for_fleet(&self, namespace: &str, fleet: &str) -> StateResult<Vec<Replica>> {
        let prefix = format!("{namespace}/{fleet}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(REPLICAS_BY_FLEET).map_err(map_err!(Table))?;
        let replicas = txn.open_table(REPLICAS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in index.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let Some(name) = key.value().strip_prefix(&prefix) else {
                break;
            };
            let replica_key = format!("{namespace}/{name}");
            match replicas.get(replica_key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => results.push(decode(guard.value())?),
                None => warn!(key = %replica_key, "dangling replica index entry"),
            }
        }
        Ok(results)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Create a new object.
    ///
    /// If `metadata.name` is empty, a name is generated from
    /// `metadata.generate_name`, skipping names that are already taken.
    /// Fails with `AlreadyExists` if an explicitly chosen name is taken.
    pub fn create<R: Resource>(&self, object: &R) -> StateResult<R> {
        let mut object = object.clone();
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;

        let key = if object.meta().name.is_empty() {
            if object.meta().generate_name.is_empty() {
                return Err(StateError::Invalid(
                    "either name or generate_name is required".to_string(),
                ));
            }
            loop {
                let n = next_sequence(&txn, NAME_SEQUENCE)?;
                let meta = object.meta_mut();
                meta.name = format!("{}{}", meta.generate_name, name_suffix(n));
                validate_key(&object.key())?;
                let key = object.key().table_key();
                if read_object::<R>(&txn, &key)?.is_none() {
                    break key;
                }
                debug!(kind = %R::KIND, %key, "generated name taken, trying next");
            }
        } else {
            validate_key(&object.key())?;
            let key = object.key().table_key();
            if read_object::<R>(&txn, &key)?.is_some() {
                return Err(StateError::AlreadyExists(format!("{} {key}", R::KIND)));
            }
            key
        };

        let uid = next_sequence(&txn, UID_SEQUENCE)?;
        {
            let meta = object.meta_mut();
            meta.uid = format!("{}-{uid:08}", R::KIND.to_string().to_lowercase());
            meta.resource_version = 1;
            meta.generation = 1;
            meta.creation_timestamp = now;
            meta.deletion_timestamp = None;
        }
        write_object(&txn, None, &object)?;
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(kind = %R::KIND, %key, "object created");
        self.publish(vec![WatchEvent::for_object(EventType::Created, &object)]);
        Ok(object)
    }

    /// Replace spec and metadata of an object, conditioned on its resource version.
    ///
    /// Status and store-owned metadata are kept from the stored copy. If the
    /// object is being deleted and the patch removes its last finalizer, the
    /// object is removed physically.
    pub fn patch<R: Resource>(&self, object: &R) -> StateResult<R> {
        let key = object.key().table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored: R = read_object(&txn, &key)?.ok_or_else(|| not_found::<R>(&key))?;
        check_version(&key, object.meta(), stored.meta())?;

        let mut next = object.clone();
        next.copy_status_from(&stored);
        keep_store_fields(next.meta_mut(), stored.meta());
        if next == stored {
            debug!(kind = %R::KIND, %key, "patch is a no-op");
            return Ok(stored);
        }

        let generation_changed = next.spec() != stored.spec();
        {
            let meta = next.meta_mut();
            meta.resource_version += 1;
            if generation_changed {
                meta.generation += 1;
            }
        }

        let mut events = Vec::new();
        if next.meta().is_being_deleted() && next.meta().finalizers.is_empty() {
            remove_with_dependents(&txn, &next, &mut events)?;
            debug!(kind = %R::KIND, %key, "last finalizer removed, object deleted");
        } else {
            write_object(&txn, Some(&stored), &next)?;
            events.push(WatchEvent::for_object(
                EventType::Updated { generation_changed },
                &next,
            ));
            debug!(kind = %R::KIND, %key, version = next.meta().resource_version, "object patched");
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.publish(events);
        Ok(next)
    }

    /// Replace the status subresource of an object, conditioned on its
    /// resource version. Everything outside the status is ignored.
    pub fn patch_status<R: Resource>(&self, object: &R) -> StateResult<R> {
        let key = object.key().table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored: R = read_object(&txn, &key)?.ok_or_else(|| not_found::<R>(&key))?;
        check_version(&key, object.meta(), stored.meta())?;

        let mut next = stored.clone();
        next.copy_status_from(object);
        if next == stored {
            debug!(kind = %R::KIND, %key, "status patch is a no-op");
            return Ok(stored);
        }
        next.meta_mut().resource_version += 1;

        write_object(&txn, Some(&stored), &next)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = %R::KIND, %key, version = next.meta().resource_version, "status patched");
        self.publish(vec![WatchEvent::for_object(
            EventType::Updated {
                generation_changed: false,
            },
            &next,
        )]);
        Ok(next)
    }

    /// Delete an object by key.
    ///
    /// Objects with finalizers only get a deletion timestamp; the rest are
    /// removed together with the replicas they own.
    pub fn delete<R: Resource>(&self, key: &ObjectKey) -> StateResult<()> {
        let table_key = key.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored: R = read_object(&txn, &table_key)?.ok_or_else(|| not_found::<R>(&table_key))?;

        let mut events = Vec::new();
        if stored.meta().finalizers.is_empty() {
            remove_with_dependents(&txn, &stored, &mut events)?;
            debug!(kind = %R::KIND, key = %table_key, "object deleted");
        } else if !stored.meta().is_being_deleted() {
            let mut next = stored.clone();
            mark_for_deletion(next.meta_mut(), epoch_secs());
            write_object(&txn, Some(&stored), &next)?;
            events.push(WatchEvent::for_object(
                EventType::Updated {
                    generation_changed: true,
                },
                &next,
            ));
            debug!(
                kind = %R::KIND,
                key = %table_key,
                finalizers = ?next.meta().finalizers,
                "object marked for deletion"
            );
        } else {
            debug!(kind = %R::KIND, key = %table_key, "deletion already in progress");
            return Ok(());
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.publish(events);
        Ok(())
    }

    /// Rebuild the replica back-reference index from the replica table.
    ///
    /// Returns the number of indexed replicas.
    pub fn rebuild_replica_index(&self) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let entries: Vec<String> = {
            let table = txn.open_table(REPLICAS).map_err(map_err!(Table))?;
            let mut entries = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let replica: Replica = decode(value.value())?;
                entries.extend(replica.index_entry());
            }
            entries
        };
        {
            let mut index = txn.open_table(REPLICAS_BY_FLEET).map_err(map_err!(Table))?;
            let mut stale = Vec::new();
            for entry in index.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                stale.push(key.value().to_string());
            }
            for key in &stale {
                index.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for entry in &entries {
                index.insert(entry.as_str(), ()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = entries.len(), "replica index rebuilt");
        Ok(entries.len())
    }
}

// ── Transaction helpers ────────────────────────────────────────────

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn not_found<R: Resource>(key: &str) -> StateError {
    StateError::NotFound(format!("{} {key}", R::KIND))
}

fn check_version(key: &str, submitted: &ObjectMeta, stored: &ObjectMeta) -> StateResult<()> {
    if submitted.resource_version != stored.resource_version {
        return Err(StateError::Conflict {
            key: key.to_string(),
            expected: submitted.resource_version,
            found: stored.resource_version,
        });
    }
    Ok(())
}

/// Restore the metadata fields clients cannot change.
fn keep_store_fields(meta: &mut ObjectMeta, stored: &ObjectMeta) {
    meta.uid = stored.uid.clone();
    meta.generate_name = stored.generate_name.clone();
    meta.resource_version = stored.resource_version;
    meta.generation = stored.generation;
    meta.creation_timestamp = stored.creation_timestamp;
    meta.deletion_timestamp = stored.deletion_timestamp;
}

fn mark_for_deletion(meta: &mut ObjectMeta, now: Timestamp) {
    meta.deletion_timestamp = Some(now);
    meta.generation += 1;
    meta.resource_version += 1;
}

fn validate_key(key: &ObjectKey) -> StateResult<()> {
    for (field, value) in [("namespace", &key.namespace), ("name", &key.name)] {
        if value.is_empty() {
            return Err(StateError::Invalid(format!("{field} must not be empty")));
        }
        if value.contains('/') {
            return Err(StateError::Invalid(format!("{field} {value:?} must not contain '/'")));
        }
    }
    Ok(())
}

fn next_sequence(txn: &WriteTransaction, name: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(name)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(name, next).map_err(map_err!(Write))?;
    Ok(next)
}

/// Fixed-width base-36 suffix for generated names.
fn name_suffix(n: u64) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut n = n;
    let mut out = [b'0'; NAME_SUFFIX_LEN];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(n % 36) as usize];
        n /= 36;
    }
    out.iter().map(|&b| b as char).collect()
}

fn read_object<R: Resource>(txn: &WriteTransaction, key: &str) -> StateResult<Option<R>> {
    let table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
    let bytes = table
        .get(key)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_vec());
    bytes.map(|b| decode(&b)).transpose()
}

fn write_object<R: Resource>(txn: &WriteTransaction, previous: Option<&R>, object: &R) -> StateResult<()> {
    let key = object.key().table_key();
    let value = encode(object)?;
    {
        let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
        table
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
    }

    let old_entry = previous.and_then(|p| p.index_entry());
    let new_entry = object.index_entry();
    if old_entry != new_entry {
        let mut index = txn.open_table(REPLICAS_BY_FLEET).map_err(map_err!(Table))?;
        if let Some(old) = old_entry {
            index.remove(old.as_str()).map_err(map_err!(Write))?;
        }
        if let Some(new) = new_entry {
            index.insert(new.as_str(), ()).map_err(map_err!(Write))?;
        }
    }
    Ok(())
}

fn remove_object<R: Resource>(txn: &WriteTransaction, object: &R) -> StateResult<()> {
    let key = object.key().table_key();
    {
        let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    if let Some(entry) = object.index_entry() {
        let mut index = txn.open_table(REPLICAS_BY_FLEET).map_err(map_err!(Table))?;
        index.remove(entry.as_str()).map_err(map_err!(Write))?;
    }
    Ok(())
}

fn remove_with_dependents<R: Resource>(
    txn: &WriteTransaction,
    object: &R,
    events: &mut Vec<WatchEvent>,
) -> StateResult<()> {
    remove_object(txn, object)?;
    events.push(WatchEvent::for_object(EventType::Deleted, object));
    collect_garbage(txn, object.meta(), events)
}

/// Delete (or mark for deletion) every replica owned by `owner`.
///
/// Replicas are the only kind carrying owner references.
fn collect_garbage(
    txn: &WriteTransaction,
    owner: &ObjectMeta,
    events: &mut Vec<WatchEvent>,
) -> StateResult<()> {
    if owner.uid.is_empty() {
        return Ok(());
    }
    let prefix = format!("{}/", owner.namespace);
    let dependents: Vec<Replica> = {
        let table = txn.open_table(REPLICAS).map_err(map_err!(Table))?;
        let mut found = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let replica: Replica = decode(value.value())?;
            if replica.metadata.is_owned_by(&owner.uid) {
                found.push(replica);
            }
        }
        found
    };

    let now = epoch_secs();
    for dependent in dependents {
        if dependent.metadata.finalizers.is_empty() {
            remove_object(txn, &dependent)?;
            events.push(WatchEvent::for_object(EventType::Deleted, &dependent));
        } else if !dependent.metadata.is_being_deleted() {
            let mut next = dependent.clone();
            mark_for_deletion(next.meta_mut(), now);
            write_object(txn, Some(&dependent), &next)?;
            events.push(WatchEvent::for_object(
                EventType::Updated {
                    generation_changed: true,
                },
                &next,
            ));
        }
        debug!(owner = %owner.key(), dependent = %dependent.key(), "garbage collected dependent");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn owned_replica(fleet: &Fleet, name: &str) -> Replica {
        let mut replica = Replica::new(&fleet.metadata.namespace, name, &fleet.metadata.name);
        replica.metadata.owner_references.push(OwnerReference {
            kind: Kind::Fleet,
            name: fleet.metadata.name.clone(),
            uid: fleet.metadata.uid.clone(),
            controller: true,
            block_owner_deletion: true,
        });
        replica
    }

    fn drain(rx: &mut broadcast::Receiver<WatchEvent>) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ── Create / get ───────────────────────────────────────────────

    #[test]
    fn create_assigns_store_fields() {
        let store = store();
        let created = store.create(&Fleet::new("default", "web", 3)).unwrap();

        assert!(!created.metadata.uid.is_empty());
        assert_eq!(created.metadata.resource_version, 1);
        assert_eq!(created.metadata.generation, 1);
        assert!(created.metadata.creation_timestamp > 0);

        let fetched: Fleet = store.get(&ObjectKey::new("default", "web")).unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn get_nonexistent_returns_none() {
        let store = store();
        let result: Option<Fleet> = store.get(&ObjectKey::new("nope", "nothing")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn create_generates_unique_names() {
        let store = store();
        let fleet = Fleet::new("default", "web", 2);

        let a = store.create(&Replica::generated_for(&fleet)).unwrap();
        let b = store.create(&Replica::generated_for(&fleet)).unwrap();

        assert!(a.metadata.name.starts_with("web-"));
        assert_eq!(a.metadata.name.len(), "web-".len() + NAME_SUFFIX_LEN);
        assert_ne!(a.metadata.name, b.metadata.name);
    }

    #[test]
    fn create_skips_generated_names_already_taken() {
        let store = store();
        let fleet = Fleet::new("default", "web", 1);
        store.create(&Replica::new("default", "web-00001", "api")).unwrap();
        store.create(&Replica::new("default", "web-00002", "api")).unwrap();

        let generated = store.create(&Replica::generated_for(&fleet)).unwrap();
        assert_eq!(generated.metadata.name, "web-00003");

        let next = store.create(&Replica::generated_for(&fleet)).unwrap();
        assert_eq!(next.metadata.name, "web-00004");
    }

    #[test]
    fn create_rejects_duplicates_and_missing_names() {
        let store = store();
        store.create(&Fleet::new("default", "web", 1)).unwrap();

        let dup = store.create(&Fleet::new("default", "web", 1));
        assert!(matches!(dup, Err(StateError::AlreadyExists(_))));

        let unnamed = store.create(&Fleet::new("default", "", 1));
        assert!(matches!(unnamed, Err(StateError::Invalid(_))));

        let slashed = store.create(&Fleet::new("default", "a/b", 1));
        assert!(matches!(slashed, Err(StateError::Invalid(_))));
    }

    #[test]
    fn list_is_scoped_by_namespace() {
        let store = store();
        store.create(&Fleet::new("ns1", "a", 1)).unwrap();
        store.create(&Fleet::new("ns1", "b", 1)).unwrap();
        store.create(&Fleet::new("ns2", "c", 1)).unwrap();

        assert_eq!(store.list::<Fleet>(None).unwrap().len(), 3);
        assert_eq!(store.list::<Fleet>(Some("ns1")).unwrap().len(), 2);
        assert!(store.list::<Fleet>(Some("ns3")).unwrap().is_empty());
    }

    // ── Patch ──────────────────────────────────────────────────────

    #[test]
    fn patch_bumps_generation_only_on_spec_change() {
        let store = store();
        let mut fleet = store.create(&Fleet::new("default", "web", 1)).unwrap();

        fleet.metadata.add_finalizer("example.dev/finalizer");
        let fleet = store.patch(&fleet).unwrap();
        assert_eq!(fleet.metadata.resource_version, 2);
        assert_eq!(fleet.metadata.generation, 1);

        let mut scaled = fleet.clone();
        scaled.spec.desired_replicas = 5;
        let scaled = store.patch(&scaled).unwrap();
        assert_eq!(scaled.metadata.resource_version, 3);
        assert_eq!(scaled.metadata.generation, 2);
    }

    #[test]
    fn patch_with_stale_version_conflicts() {
        let store = store();
        let original = store.create(&Fleet::new("default", "web", 1)).unwrap();

        let mut first = original.clone();
        first.spec.desired_replicas = 2;
        store.patch(&first).unwrap();

        let mut second = original;
        second.spec.desired_replicas = 3;
        let err = store.patch(&second).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn patch_missing_object_is_not_found() {
        let store = store();
        let err = store.patch(&Fleet::new("default", "ghost", 1)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn identical_patch_is_not_committed() {
        let store = store();
        let fleet = store.create(&Fleet::new("default", "web", 1)).unwrap();
        let mut rx = store.subscribe();

        let same = store.patch(&fleet).unwrap();

        assert_eq!(same.metadata.resource_version, 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn patch_ignores_status_and_status_patch_ignores_spec() {
        let store = store();
        let fleet = store.create(&Fleet::new("default", "web", 1)).unwrap();

        let mut with_status = fleet.clone();
        with_status.status.replicas = vec!["web-00001".to_string()];
        with_status.spec.desired_replicas = 9;
        let after_status = store.patch_status(&with_status).unwrap();
        assert_eq!(after_status.spec.desired_replicas, 1);
        assert_eq!(after_status.status.replicas, vec!["web-00001".to_string()]);

        let mut with_spec = after_status.clone();
        with_spec.status.replicas.clear();
        with_spec.spec.desired_replicas = 2;
        let after_spec = store.patch(&with_spec).unwrap();
        assert_eq!(after_spec.spec.desired_replicas, 2);
        assert_eq!(after_spec.status.replicas, vec!["web-00001".to_string()]);
    }

    #[test]
    fn patch_cannot_clear_deletion_timestamp() {
        let store = store();
        let mut fleet = store.create(&Fleet::new("default", "web", 1)).unwrap();
        fleet.metadata.add_finalizer("a");
        fleet.metadata.add_finalizer("b");
        store.patch(&fleet).unwrap();
        store.delete::<Fleet>(&ObjectKey::new("default", "web")).unwrap();

        let mut deleting: Fleet = store.get(&ObjectKey::new("default", "web")).unwrap().unwrap();
        deleting.metadata.deletion_timestamp = None;
        deleting.metadata.remove_finalizer("a");
        let patched = store.patch(&deleting).unwrap();

        assert!(patched.metadata.is_being_deleted());
        assert_eq!(patched.metadata.finalizers, vec!["b".to_string()]);
    }

    // ── Delete ─────────────────────────────────────────────────────

    #[test]
    fn delete_without_finalizers_collects_owned_replicas() {
        let store = store();
        let fleet = store.create(&Fleet::new("default", "web", 2)).unwrap();
        store.create(&owned_replica(&fleet, "web-a")).unwrap();
        store.create(&owned_replica(&fleet, "web-b")).unwrap();
        // Back-reference only, not owned: survives.
        store.create(&Replica::new("default", "web-c", "web")).unwrap();

        store.delete::<Fleet>(&fleet.key()).unwrap();

        assert!(store.get::<Fleet>(&fleet.key()).unwrap().is_none());
        let left = store.list::<Replica>(Some("default")).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].metadata.name, "web-c");
    }

    #[test]
    fn delete_missing_object_is_not_found() {
        let store = store();
        let err = store.delete::<Replica>(&ObjectKey::new("default", "nope")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn delete_with_finalizer_marks_then_patch_removes() {
        let store = store();
        let mut fleet = store.create(&Fleet::new("default", "web", 1)).unwrap();
        fleet.metadata.add_finalizer("example.dev/finalizer");
        let fleet = store.patch(&fleet).unwrap();
        store.create(&owned_replica(&fleet, "web-a")).unwrap();
        let mut rx = store.subscribe();

        store.delete::<Fleet>(&fleet.key()).unwrap();
        // A second request while deletion is in flight changes nothing.
        store.delete::<Fleet>(&fleet.key()).unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].event_type,
            EventType::Updated {
                generation_changed: true
            }
        );

        let mut marked: Fleet = store.get(&fleet.key()).unwrap().unwrap();
        assert!(marked.metadata.is_being_deleted());
        assert_eq!(store.list_replicas_for_fleet("default", "web").unwrap().len(), 1);

        marked.metadata.remove_finalizer("example.dev/finalizer");
        store.patch(&marked).unwrap();

        assert!(store.get::<Fleet>(&fleet.key()).unwrap().is_none());
        assert!(store.list_replicas_for_fleet("default", "web").unwrap().is_empty());
    }

    // ── Index ──────────────────────────────────────────────────────

    #[test]
    fn replica_index_is_scoped_by_namespace_and_fleet() {
        let store = store();
        store.create(&Replica::new("ns1", "web-b", "web")).unwrap();
        store.create(&Replica::new("ns1", "web-a", "web")).unwrap();
        store.create(&Replica::new("ns1", "api-a", "api")).unwrap();
        store.create(&Replica::new("ns2", "web-c", "web")).unwrap();

        let names: Vec<String> = store
            .list_replicas_for_fleet("ns1", "web")
            .unwrap()
            .into_iter()
            .map(|r| r.metadata.name)
            .collect();
        assert_eq!(names, vec!["web-a".to_string(), "web-b".to_string()]);
    }

    #[test]
    fn changing_back_reference_moves_index_entry() {
        let store = store();
        let mut replica = store.create(&Replica::new("default", "r1", "web")).unwrap();

        replica.spec.fleet = "api".to_string();
        store.patch(&replica).unwrap();

        assert!(store.list_replicas_for_fleet("default", "web").unwrap().is_empty());
        assert_eq!(store.list_replicas_for_fleet("default", "api").unwrap().len(), 1);
    }

    #[test]
    fn rebuild_index_counts_replicas() {
        let store = store();
        store.create(&Replica::new("default", "r1", "web")).unwrap();
        store.create(&Replica::new("default", "r2", "web")).unwrap();

        assert_eq!(store.rebuild_replica_index().unwrap(), 2);
        assert_eq!(store.list_replicas_for_fleet("default", "web").unwrap().len(), 2);
    }

    // ── Events ─────────────────────────────────────────────────────

    #[test]
    fn events_carry_owners() {
        let store = store();
        let mut rx = store.subscribe();

        store.create(&Replica::new("default", "r1", "web")).unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Created);
        assert_eq!(events[0].object.kind, Kind::Replica);
        assert_eq!(events[0].owners[0].key, ObjectKey::new("default", "web"));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.create(&Fleet::new("prod", "api", 2)).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let fleet: Option<Fleet> = store.get(&ObjectKey::new("prod", "api")).unwrap();
        assert_eq!(fleet.unwrap().spec.desired_replicas, 2);
    }

    #[test]
    fn name_suffix_is_fixed_width() {
        assert_eq!(name_suffix(1), "00001");
        assert_eq!(name_suffix(36), "00010");
        assert_eq!(name_suffix(35), "0000z");
    }
}
