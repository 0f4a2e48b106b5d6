//! Controller owner references.

use replikit_state::{OwnerReference, Resource};

use crate::error::{ControllerError, ControllerResult};

/// Make `owner` the controller of `object`.
///
/// Existing non-controller references to the same owner are upgraded in
/// place; setting the reference twice leaves `object` unchanged. Fails if
/// `object` is already controlled by a different owner, or lives in another
/// namespace.
pub fn set_controller_reference<O: Resource, R: Resource>(owner: &O, object: &mut R) -> ControllerResult<()> {
    let owner_meta = owner.meta();
    if owner_meta.namespace != object.meta().namespace {
        return Err(ControllerError::CrossNamespace {
            object: object.key().to_string(),
            owner: owner.key().to_string(),
        });
    }

    if let Some(existing) = object.meta().controller_reference() {
        if existing.uid != owner_meta.uid {
            return Err(ControllerError::AlreadyOwned {
                object: object.key().to_string(),
                kind: existing.kind,
                owner: existing.name.clone(),
            });
        }
    }

    let reference = OwnerReference {
        kind: O::KIND,
        name: owner_meta.name.clone(),
        uid: owner_meta.uid.clone(),
        controller: true,
        block_owner_deletion: true,
    };
    let references = &mut object.meta_mut().owner_references;
    match references.iter_mut().find(|r| r.uid == reference.uid) {
        Some(slot) => *slot = reference,
        None => references.push(reference),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use replikit_state::{Fleet, Kind, Replica};

    fn fleet(name: &str, uid: &str) -> Fleet {
        let mut fleet = Fleet::new("default", name, 1);
        fleet.metadata.uid = uid.to_string();
        fleet
    }

    #[test]
    fn sets_reference_once() {
        let owner = fleet("web", "fleet-1");
        let mut replica = Replica::new("default", "web-a", "web");

        set_controller_reference(&owner, &mut replica).unwrap();
        let first = replica.clone();
        set_controller_reference(&owner, &mut replica).unwrap();

        assert_eq!(replica, first);
        let reference = replica.metadata.controller_reference().unwrap();
        assert_eq!(reference.kind, Kind::Fleet);
        assert_eq!(reference.uid, "fleet-1");
        assert!(reference.block_owner_deletion);
    }

    #[test]
    fn upgrades_plain_reference() {
        let owner = fleet("web", "fleet-1");
        let mut replica = Replica::new("default", "web-a", "web");
        replica.metadata.owner_references.push(OwnerReference {
            kind: Kind::Fleet,
            name: "web".to_string(),
            uid: "fleet-1".to_string(),
            controller: false,
            block_owner_deletion: false,
        });

        set_controller_reference(&owner, &mut replica).unwrap();

        assert_eq!(replica.metadata.owner_references.len(), 1);
        assert!(replica.metadata.owner_references[0].controller);
    }

    #[test]
    fn rejects_second_controller() {
        let mut replica = Replica::new("default", "web-a", "web");
        set_controller_reference(&fleet("web", "fleet-1"), &mut replica).unwrap();

        let err = set_controller_reference(&fleet("api", "fleet-2"), &mut replica).unwrap_err();
        assert!(matches!(err, ControllerError::AlreadyOwned { .. }));
    }

    #[test]
    fn rejects_cross_namespace_owner() {
        let owner = fleet("web", "fleet-1");
        let mut replica = Replica::new("other", "web-a", "web");

        let err = set_controller_reference(&owner, &mut replica).unwrap_err();
        assert!(matches!(err, ControllerError::CrossNamespace { .. }));
    }
}
