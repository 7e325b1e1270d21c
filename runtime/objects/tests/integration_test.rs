//! Integration tests for identifier resolution
//!
//! These tests drive a class registry and the global directory together the
//! way an object manager does:
//! - Global create on the owning node
//! - Announcement on a peer node
//! - Lookup by name and by identifier from both sides
//! - Delete and reuse of the slot

use tandem_objects::*;

const NAME: u32 = build_name(b'P', b'T', b'1', b' ');

fn node(n: u8) -> NodeId {
    NodeId::new(n).expect("valid node")
}

/// Test a global object created on node 1 and resolved from node 2
#[test]
fn test_global_object_resolves_on_both_nodes() {
    let mut owner: ClassRegistry<u64> =
        ClassRegistry::new(ObjectClass::PARTITIONS, node(1), 2, ClassConfig::fixed(4)).unwrap();
    let mut owner_directory = GlobalDirectory::new(8);

    let peer: ClassRegistry<u64> =
        ClassRegistry::new(ObjectClass::PARTITIONS, node(2), 2, ClassConfig::fixed(4)).unwrap();
    let mut peer_directory = GlobalDirectory::new(8);

    // 1. Create on node 1 and register globally
    let slot = owner.allocate(ObjectName::Word(NAME), 0x1000).unwrap();
    let entry = GlobalEntry::new(slot.id(), NAME, node(1));
    owner_directory.insert(entry).unwrap();

    // 2. Node 2 receives the announcement
    assert_eq!(peer_directory.open_announced(entry), Ok(Opened::Inserted));

    // 3. Both sides resolve the name to the same identifier
    let found = peer_directory
        .find_by_name(ObjectClass::PARTITIONS, NAME, None)
        .map(|entry| entry.id);
    assert_eq!(found, Some(slot.id()));
    assert_eq!(owner.name_to_id(&ObjectName::Word(NAME)), Some(slot.id()));

    // 4. The peer's registry classifies the id as remote; the owner's as local
    assert_eq!(peer.get(slot.id()), Location::Remote(node(1)));
    assert_eq!(owner.get(slot.id()), Location::Local(&0x1000));

    // 5. Delete on the owner, then the delete announcement on the peer
    assert_eq!(owner.free(slot).unwrap().1, 0x1000);
    assert!(owner_directory.remove(slot.id()).is_some());
    assert!(peer_directory.remove(slot.id()).is_some());
    assert!(peer_directory.is_empty());
    assert_eq!(owner.get(slot.id()), Location::Invalid);
}

/// Test that status codes survive the wire encoding used by responses
#[test]
fn test_status_wire_codes() {
    for status in [
        StatusCode::InvalidId,
        StatusCode::Timeout,
        StatusCode::ObjectWasDeleted,
        StatusCode::Unsatisfied,
        StatusCode::IllegalOnRemoteObject,
    ] {
        assert_eq!(StatusCode::from_wire(StatusCode::to_wire(Err(status))), Err(status));
    }
    assert_eq!(StatusCode::from_wire(StatusCode::to_wire(Ok(()))), Ok(()));
}

/// Test dispatch disabling around a registry update
#[test]
fn test_updates_under_dispatch_guard() {
    let dispatch = ThreadDispatch::new();
    let executing = ObjectId::new(ObjectClass::INTERNAL_THREADS, node(1), 1);
    let mut registry: ClassRegistry<()> =
        ClassRegistry::new(ObjectClass::SEMAPHORES, node(1), 1, ClassConfig::unlimited(1)).unwrap();

    {
        let _guard = dispatch.disable(executing);
        for word in 1..=3 {
            registry.allocate(ObjectName::Word(word), ()).unwrap();
        }
        assert_eq!(dispatch.level(), 1);
    }

    assert!(dispatch.is_enabled());
    assert_eq!(registry.active_count(), 3);
    assert_eq!(registry.maximum(), 3);
}
