//! Global Object Directory
//!
//! Every node keeps a directory of the objects created with the `GLOBAL`
//! attribute anywhere in the system. Entries arrive in two ways: the local
//! node creates a global object, or another node announces one. The
//! directory is indexed twice, by identifier and by (class, name), and both
//! indexes always hold the same set of entries.
//!
//! Two entries for one identifier mean two nodes disagree about who owns the
//! object. That is not recoverable and goes to [`fatal::terminate`]. The one
//! exception is an announcement repeated verbatim (a retransmitted or
//! duplicated broadcast), which reopens the existing entry.

use alloc::collections::{BTreeMap, BTreeSet};

use crate::fatal::{self, InternalError};
use crate::id::{NodeId, ObjectClass, ObjectId};
use crate::status::{Result, StatusCode};

/// One object visible to every node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalEntry {
    pub id: ObjectId,
    /// Word name; string-named objects are never global
    pub name: u32,
    /// Node that owns the object
    pub node: NodeId,
}

impl GlobalEntry {
    pub const fn new(id: ObjectId, name: u32, node: NodeId) -> Self {
        Self { id, name, node }
    }
}

/// Result of opening an announced entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opened {
    Inserted,
    /// Identical entry already present
    Reopened,
}

/// Directory of global objects
pub struct GlobalDirectory {
    by_id: BTreeMap<ObjectId, GlobalEntry>,
    by_name: BTreeSet<(ObjectClass, u32, ObjectId)>,
    capacity: usize,
}

impl GlobalDirectory {
    /// Create an empty directory holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            by_id: BTreeMap::new(),
            by_name: BTreeSet::new(),
            capacity,
        }
    }

    /// Register a global object created on this node
    ///
    /// # Errors
    /// * `InvalidId` - the identifier carries no known class
    /// * `TooMany` - the directory is full
    ///
    /// Terminates the node if the identifier is already registered.
    pub fn insert(&mut self, entry: GlobalEntry) -> Result<()> {
        let class = entry.id.object_class().ok_or(StatusCode::InvalidId)?;

        if let Some(existing) = self.by_id.get(&entry.id) {
            fatal::terminate(InternalError::DuplicateGlobalObject {
                id: entry.id,
                announced_by: existing.node,
            });
        }
        if self.is_full() {
            return Err(StatusCode::TooMany);
        }

        self.link(class, entry);
        Ok(())
    }

    /// Register an object announced by another node
    ///
    /// An identical entry already present is reopened rather than added.
    /// A conflicting entry or a full directory terminates the node.
    ///
    /// # Errors
    /// `InvalidId` if the announced identifier carries no known class
    pub fn open_announced(&mut self, entry: GlobalEntry) -> Result<Opened> {
        let class = entry.id.object_class().ok_or(StatusCode::InvalidId)?;

        if let Some(existing) = self.by_id.get(&entry.id) {
            if *existing == entry {
                log::debug!("directory: {} reopened", entry.id);
                return Ok(Opened::Reopened);
            }
            fatal::terminate(InternalError::DuplicateGlobalObject {
                id: entry.id,
                announced_by: entry.node,
            });
        }
        if self.is_full() {
            fatal::terminate(InternalError::OutOfGlobalObjects { id: entry.id });
        }

        self.link(class, entry);
        Ok(Opened::Inserted)
    }

    /// Remove an entry from both indexes
    pub fn remove(&mut self, id: ObjectId) -> Option<GlobalEntry> {
        let entry = self.by_id.remove(&id)?;
        if let Some(class) = id.object_class() {
            self.by_name.remove(&(class, entry.name, id));
        }
        log::debug!("directory: {} removed", id);
        Some(entry)
    }

    pub fn find_by_id(&self, id: ObjectId) -> Option<&GlobalEntry> {
        self.by_id.get(&id)
    }

    /// Find an object of `class` called `name`
    ///
    /// # Arguments
    /// * `node` - Restrict the search to objects owned by this node
    pub fn find_by_name(
        &self,
        class: ObjectClass,
        name: u32,
        node: Option<NodeId>,
    ) -> Option<&GlobalEntry> {
        let low = (class, name, ObjectId::NONE);
        let high = (class, name, ObjectId::from_raw(u32::MAX));
        self.by_name
            .range(low..=high)
            .filter_map(|(_, _, id)| self.by_id.get(id))
            .find(|entry| node.map_or(true, |node| entry.node == node))
    }

    /// Drop every entry owned by `node`
    ///
    /// # Returns
    /// Number of entries removed
    pub fn remove_node(&mut self, node: NodeId) -> usize {
        let owned: alloc::vec::Vec<ObjectId> = self
            .by_id
            .values()
            .filter(|entry| entry.node == node)
            .map(|entry| entry.id)
            .collect();

        for id in &owned {
            self.remove(*id);
        }

        if !owned.is_empty() {
            log::info!("directory: dropped {} object(s) of node {}", owned.len(), node);
        }
        owned.len()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.by_id.len() >= self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &GlobalEntry> {
        self.by_id.values()
    }

    fn link(&mut self, class: ObjectClass, entry: GlobalEntry) {
        self.by_id.insert(entry.id, entry);
        self.by_name.insert((class, entry.name, entry.id));
        debug_assert_eq!(self.by_id.len(), self.by_name.len());
        log::debug!("directory: {} owned by node {}", entry.id, entry.node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::build_name;

    const NAME: u32 = build_name(b'P', b'T', b'1', b' ');

    fn node(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn entry(owner: u8, index: u16, name: u32) -> GlobalEntry {
        GlobalEntry::new(
            ObjectId::new(ObjectClass::PARTITIONS, node(owner), index),
            name,
            node(owner),
        )
    }

    #[test]
    fn test_insert_and_find() {
        let mut directory = GlobalDirectory::new(4);
        let e = entry(2, 1, NAME);
        directory.insert(e).unwrap();

        assert_eq!(directory.find_by_id(e.id), Some(&e));
        assert_eq!(directory.find_by_name(ObjectClass::PARTITIONS, NAME, None), Some(&e));
        assert_eq!(directory.find_by_name(ObjectClass::PARTITIONS, NAME, Some(node(3))), None);
        assert_eq!(directory.find_by_name(ObjectClass::SEMAPHORES, NAME, None), None);
    }

    #[test]
    fn test_find_by_name_restricted_to_node() {
        let mut directory = GlobalDirectory::new(4);
        let on_two = entry(2, 1, NAME);
        let on_three = entry(3, 1, NAME);
        directory.insert(on_two).unwrap();
        directory.open_announced(on_three).unwrap();

        assert_eq!(
            directory.find_by_name(ObjectClass::PARTITIONS, NAME, Some(node(3))),
            Some(&on_three)
        );
        assert_eq!(
            directory.find_by_name(ObjectClass::PARTITIONS, NAME, Some(node(2))),
            Some(&on_two)
        );
    }

    #[test]
    fn test_remove_clears_both_indexes() {
        let mut directory = GlobalDirectory::new(4);
        let e = entry(2, 1, NAME);
        directory.insert(e).unwrap();

        assert_eq!(directory.remove(e.id), Some(e));
        assert_eq!(directory.remove(e.id), None);
        assert!(directory.find_by_name(ObjectClass::PARTITIONS, NAME, None).is_none());
        assert!(directory.is_empty());

        // The identifier may be registered again once removed
        directory.insert(e).unwrap();
    }

    #[test]
    fn test_repeated_announcement_reopens() {
        let mut directory = GlobalDirectory::new(4);
        let e = entry(2, 1, NAME);
        assert_eq!(directory.open_announced(e), Ok(Opened::Inserted));
        assert_eq!(directory.open_announced(e), Ok(Opened::Reopened));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_full_directory_rejects_local_create() {
        let mut directory = GlobalDirectory::new(1);
        directory.insert(entry(1, 1, NAME)).unwrap();
        assert_eq!(directory.insert(entry(1, 2, NAME)), Err(StatusCode::TooMany));
    }

    #[test]
    #[should_panic(expected = "duplicate global object")]
    fn test_duplicate_insert_is_fatal() {
        let mut directory = GlobalDirectory::new(4);
        directory.insert(entry(1, 1, NAME)).unwrap();
        // Same identifier claimed again with a different name
        let mut conflicting = entry(1, 1, NAME);
        conflicting.name = build_name(b'O', b'T', b'H', b'R');
        let _ = directory.open_announced(conflicting);
    }

    #[test]
    #[should_panic(expected = "duplicate global object")]
    fn test_duplicate_local_insert_is_fatal() {
        let mut directory = GlobalDirectory::new(4);
        let e = entry(1, 1, NAME);
        directory.insert(e).unwrap();
        let _ = directory.insert(e);
    }

    #[test]
    #[should_panic(expected = "no room in the global directory")]
    fn test_full_directory_on_announcement_is_fatal() {
        let mut directory = GlobalDirectory::new(1);
        directory.insert(entry(1, 1, NAME)).unwrap();
        let _ = directory.open_announced(entry(2, 1, NAME));
    }

    #[test]
    fn test_remove_node() {
        let mut directory = GlobalDirectory::new(8);
        directory.insert(entry(1, 1, NAME)).unwrap();
        directory.open_announced(entry(2, 1, NAME)).unwrap();
        directory.open_announced(entry(2, 2, build_name(b'P', b'T', b'2', b' '))).unwrap();

        assert_eq!(directory.remove_node(node(2)), 2);
        assert_eq!(directory.len(), 1);
        assert!(directory.find_by_name(ObjectClass::PARTITIONS, NAME, Some(node(2))).is_none());
        assert_eq!(directory.remove_node(node(2)), 0);
    }
}
