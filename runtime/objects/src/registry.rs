//! Class Registry
//!
//! One registry per object class owns the local objects of that class. It is
//! an arena: a table of slots, grouped in allocation blocks, plus a FIFO free
//! list of inactive slots.
//!
//! ## Slot Lifecycle
//!
//! ```text
//! inactive ──allocate()──► occupied ──free()──► inactive (generation + 1)
//! ```
//!
//! Every slot is pre-seeded with the identifier of its position, so the
//! identifier of an occupied slot always matches where it sits in the table.
//! The index part of an identifier is reused once the slot is recycled;
//! callers must fetch the identifier from the allocation, never carry one
//! across a free. What the registry does guarantee is that a [`SlotRef`]
//! from a previous life of the slot is rejected: each free bumps the slot's
//! generation, so a second free of the same handle cannot put the slot on the
//! free list twice.
//!
//! ## Growth
//!
//! A class configured with `auto_extend` appends another block of slots when
//! the free list runs dry, up to `maximum_blocks`. [`ClassRegistry::shrink`]
//! gives back extension blocks whose slots are all inactive; the first block
//! always stays.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::config::{ClassConfig, ConfigError};
use crate::id::{NodeId, ObjectClass, ObjectId, MINIMUM_INDEX};
use crate::name::ObjectName;
use crate::status::{Result, StatusCode};

/// Where an identifier points
#[derive(Debug, PartialEq, Eq)]
pub enum Location<T> {
    /// Object lives on this node
    Local(T),
    /// Object is owned by another node; ask it through the MPCI
    Remote(NodeId),
    /// Identifier does not name a live object of this class
    Invalid,
}

impl<T> Location<T> {
    /// The local object, or the status a local-only directive reports
    pub fn local(self) -> Result<T> {
        match self {
            Location::Local(object) => Ok(object),
            Location::Remote(_) => Err(StatusCode::IllegalOnRemoteObject),
            Location::Invalid => Err(StatusCode::InvalidId),
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Location::Invalid)
    }
}

/// Typed handle to one occupied slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    position: u16,
    generation: u32,
    id: ObjectId,
}

impl SlotRef {
    /// Identifier of the object in this slot
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Generation of the slot when this handle was issued
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Occupant<T> {
    name: ObjectName,
    created: u64,
    object: T,
}

struct Slot<T> {
    id: ObjectId,
    generation: u32,
    occupant: Option<Occupant<T>>,
}

/// Local objects of one class
pub struct ClassRegistry<T> {
    class: ObjectClass,
    node: NodeId,
    maximum_nodes: u8,
    config: ClassConfig,
    /// Allocation blocks; `None` marks a block given back by `shrink`
    blocks: Vec<Option<Vec<Slot<T>>>>,
    /// Inactive slot positions, oldest first
    inactive: VecDeque<u16>,
    inactive_per_block: Vec<u16>,
    creations: u64,
}

impl<T> ClassRegistry<T> {
    /// Create a registry and its first allocation block
    ///
    /// # Arguments
    /// * `class` - Object class served by this registry
    /// * `node` - Node the registry belongs to
    /// * `maximum_nodes` - Number of nodes in the system; ids of other
    ///   configured nodes are reported as remote
    /// * `config` - Table sizing
    ///
    /// # Errors
    /// Returns the configuration error if `config` is inconsistent
    pub fn new(
        class: ObjectClass,
        node: NodeId,
        maximum_nodes: u8,
        config: ClassConfig,
    ) -> core::result::Result<Self, ConfigError> {
        config.validate()?;

        let mut registry = Self {
            class,
            node,
            maximum_nodes,
            config,
            blocks: Vec::new(),
            inactive: VecDeque::new(),
            inactive_per_block: Vec::new(),
            creations: 0,
        };
        registry.add_block();
        Ok(registry)
    }

    /// Object class served by this registry
    #[inline]
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    /// Take an inactive slot and install `object` under `name`
    ///
    /// # Errors
    /// * `InvalidName` - the name is empty, too long, or of the wrong kind
    ///   for this class
    /// * `TooMany` - no inactive slot and the table cannot grow
    pub fn allocate(&mut self, name: ObjectName, object: T) -> Result<SlotRef> {
        self.check_name(&name)?;

        if self.inactive.is_empty() && self.config.auto_extend {
            self.extend();
        }

        let position = self.inactive.pop_front().ok_or(StatusCode::TooMany)?;
        let block = self.block_of(position);
        self.inactive_per_block[block] -= 1;
        self.creations += 1;

        let id = ObjectId::new(self.class, self.node, position + MINIMUM_INDEX);
        let created = self.creations;
        let slot = self
            .slot_mut(position)
            .ok_or(StatusCode::InternalError)?;
        debug_assert!(slot.occupant.is_none(), "free list held an occupied slot");

        slot.id = id;
        slot.occupant = Some(Occupant { name, created, object });

        Ok(SlotRef {
            position,
            generation: slot.generation,
            id,
        })
    }

    /// Return a slot to the free list
    ///
    /// # Returns
    /// The name and object that occupied the slot
    ///
    /// # Errors
    /// `InvalidId` if the handle is stale or the slot is already free
    pub fn free(&mut self, slot: SlotRef) -> Result<(ObjectName, T)> {
        let entry = self.slot_mut(slot.position).ok_or(StatusCode::InvalidId)?;
        if entry.generation != slot.generation {
            return Err(StatusCode::InvalidId);
        }
        let occupant = entry.occupant.take().ok_or(StatusCode::InvalidId)?;
        entry.generation = entry.generation.wrapping_add(1);

        let block = self.block_of(slot.position);
        self.inactive.push_back(slot.position);
        self.inactive_per_block[block] += 1;

        Ok((occupant.name, occupant.object))
    }

    /// Free the object named by `id`
    pub fn free_id(&mut self, id: ObjectId) -> Result<(ObjectName, T)> {
        let slot = self.slot_ref(id).ok_or(StatusCode::InvalidId)?;
        self.free(slot)
    }

    /// Handle to the occupied slot named by a local `id`
    pub fn slot_ref(&self, id: ObjectId) -> Option<SlotRef> {
        let position = self.local_position(id)?;
        let slot = self.slot(position)?;
        slot.occupant.as_ref()?;
        Some(SlotRef {
            position,
            generation: slot.generation,
            id: slot.id,
        })
    }

    /// Classify `id` and resolve it if local
    pub fn get(&self, id: ObjectId) -> Location<&T> {
        match self.classify(id) {
            Location::Local(position) => match self.slot(position) {
                Some(Slot {
                    occupant: Some(occupant),
                    ..
                }) => Location::Local(&occupant.object),
                _ => Location::Invalid,
            },
            Location::Remote(node) => Location::Remote(node),
            Location::Invalid => Location::Invalid,
        }
    }

    /// Mutable form of [`ClassRegistry::get`]
    pub fn get_mut(&mut self, id: ObjectId) -> Location<&mut T> {
        match self.classify(id) {
            Location::Local(position) => match self.slot_mut(position) {
                Some(Slot {
                    occupant: Some(occupant),
                    ..
                }) => Location::Local(&mut occupant.object),
                _ => Location::Invalid,
            },
            Location::Remote(node) => Location::Remote(node),
            Location::Invalid => Location::Invalid,
        }
    }

    /// Name of a local object
    pub fn name_of(&self, id: ObjectId) -> Option<&ObjectName> {
        let position = self.local_position(id)?;
        self.slot(position)?.occupant.as_ref().map(|o| &o.name)
    }

    /// Identifier of the oldest local object called `name`
    pub fn name_to_id(&self, name: &ObjectName) -> Option<ObjectId> {
        self.occupied()
            .filter(|(_, occupant)| occupant.name == *name)
            .min_by_key(|(_, occupant)| occupant.created)
            .map(|(slot, _)| slot.id)
    }

    /// All local objects in table order
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &ObjectName, &T)> {
        self.occupied()
            .map(|(slot, occupant)| (slot.id, &occupant.name, &occupant.object))
    }

    /// Number of slots currently in the table
    pub fn maximum(&self) -> usize {
        self.live_blocks() * usize::from(self.config.objects_per_block)
    }

    pub fn active_count(&self) -> usize {
        self.maximum() - self.inactive.len()
    }

    pub fn inactive_count(&self) -> usize {
        self.inactive.len()
    }

    /// Release extension blocks that hold no active object
    ///
    /// # Returns
    /// Number of blocks released
    pub fn shrink(&mut self) -> usize {
        let per_block = self.config.objects_per_block;
        let mut released = 0;

        for block in 1..self.blocks.len() {
            if self.blocks[block].is_some() && self.inactive_per_block[block] == per_block {
                self.blocks[block] = None;
                self.inactive_per_block[block] = 0;
                self.inactive
                    .retain(|&position| usize::from(position / per_block) != block);
                released += 1;
            }
        }

        while matches!(self.blocks.last(), Some(None)) {
            self.blocks.pop();
            self.inactive_per_block.pop();
        }

        if released > 0 {
            log::debug!("{:?}: released {} idle block(s)", self.class, released);
        }
        released
    }

    fn check_name(&self, name: &ObjectName) -> Result<()> {
        if !name.is_valid() {
            return Err(StatusCode::InvalidName);
        }
        match (name, self.config.name_length) {
            (ObjectName::Word(_), None) => Ok(()),
            (ObjectName::Text(text), Some(length)) if text.len() <= usize::from(length) => Ok(()),
            _ => Err(StatusCode::InvalidName),
        }
    }

    /// Add one block of inactive slots
    ///
    /// Reuses the first block released by `shrink` before growing the table.
    fn extend(&mut self) -> bool {
        if let Some(limit) = self.config.maximum_blocks {
            if self.live_blocks() >= usize::from(limit) {
                return false;
            }
        }

        let reused = self.blocks.iter().position(Option::is_none);
        let block = reused.unwrap_or(self.blocks.len());
        let per_block = usize::from(self.config.objects_per_block);
        if (block + 1) * per_block > usize::from(u16::MAX) {
            return false;
        }

        self.fill_block(block);
        log::debug!(
            "{:?}: extended to block {} ({} slots)",
            self.class,
            block,
            self.maximum()
        );
        true
    }

    fn add_block(&mut self) {
        let block = self.blocks.len();
        self.fill_block(block);
    }

    fn fill_block(&mut self, block: usize) {
        let per_block = self.config.objects_per_block;
        let first = block as u16 * per_block;
        let slots = (first..first + per_block)
            .map(|position| Slot {
                id: ObjectId::new(self.class, self.node, position + MINIMUM_INDEX),
                generation: 0,
                occupant: None,
            })
            .collect();

        if block == self.blocks.len() {
            self.blocks.push(Some(slots));
            self.inactive_per_block.push(per_block);
        } else {
            self.blocks[block] = Some(slots);
            self.inactive_per_block[block] = per_block;
        }
        self.inactive.extend(first..first + per_block);
    }

    fn classify(&self, id: ObjectId) -> Location<u16> {
        if id.object_class() != Some(self.class) {
            return Location::Invalid;
        }
        match id.node() {
            Some(node) if node == self.node => match self.local_position(id) {
                Some(position) => Location::Local(position),
                None => Location::Invalid,
            },
            Some(node) if self.maximum_nodes > 1 && node.get() <= self.maximum_nodes => {
                Location::Remote(node)
            }
            _ => Location::Invalid,
        }
    }

    fn local_position(&self, id: ObjectId) -> Option<u16> {
        if !id.is_local_to(self.node) || id.object_class() != Some(self.class) {
            return None;
        }
        id.index().checked_sub(MINIMUM_INDEX)
    }

    fn block_of(&self, position: u16) -> usize {
        usize::from(position / self.config.objects_per_block)
    }

    fn live_blocks(&self) -> usize {
        self.blocks.iter().filter(|block| block.is_some()).count()
    }

    fn slot(&self, position: u16) -> Option<&Slot<T>> {
        let per_block = self.config.objects_per_block;
        self.blocks
            .get(usize::from(position / per_block))?
            .as_ref()?
            .get(usize::from(position % per_block))
    }

    fn slot_mut(&mut self, position: u16) -> Option<&mut Slot<T>> {
        let per_block = self.config.objects_per_block;
        self.blocks
            .get_mut(usize::from(position / per_block))?
            .as_mut()?
            .get_mut(usize::from(position % per_block))
    }

    fn occupied(&self) -> impl Iterator<Item = (&Slot<T>, &Occupant<T>)> {
        self.blocks
            .iter()
            .flatten()
            .flatten()
            .filter_map(|slot| slot.occupant.as_ref().map(|occupant| (slot, occupant)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::build_name;
    use alloc::string::String;

    fn node(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn word(c: u8) -> ObjectName {
        ObjectName::Word(build_name(b'O', b'B', b'J', c))
    }

    fn partitions(config: ClassConfig) -> ClassRegistry<u32> {
        ClassRegistry::new(ObjectClass::PARTITIONS, node(1), 4, config).unwrap()
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    #[test]
    fn test_bounded_registry_scenario() {
        let mut registry = partitions(ClassConfig::fixed(2));

        let first = registry.allocate(word(b'1'), 10).unwrap();
        let second = registry.allocate(word(b'2'), 20).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.allocate(word(b'3'), 30), Err(StatusCode::TooMany));

        let (name, value) = registry.free(first).unwrap();
        assert_eq!(name, word(b'1'));
        assert_eq!(value, 10);

        let again = registry.allocate(word(b'4'), 40).unwrap();
        assert_eq!(again.id().index(), first.id().index());
        assert_eq!(
            again.id(),
            ObjectId::new(ObjectClass::PARTITIONS, node(1), first.id().index())
        );
        assert_eq!(registry.get(again.id()), Location::Local(&40));
        assert_ne!(again.generation(), first.generation());
    }

    #[test]
    fn test_occupied_id_matches_position() {
        let mut registry = partitions(ClassConfig::fixed(8));
        for value in 0..8 {
            let slot = registry.allocate(word(b'A' + value as u8), value).unwrap();
            assert_eq!(slot.id().index(), value as u16 + MINIMUM_INDEX);
        }
        for (id, _, value) in registry.iter() {
            assert_eq!(id.index(), *value as u16 + MINIMUM_INDEX);
        }
    }

    #[test]
    fn test_repeated_free_never_duplicates_free_list() {
        let mut registry = partitions(ClassConfig::fixed(4));
        let slot = registry.allocate(word(b'1'), 1).unwrap();
        assert_eq!(registry.inactive_count(), 3);

        assert!(registry.free(slot).is_ok());
        for _ in 0..5 {
            assert_eq!(registry.free(slot), Err(StatusCode::InvalidId));
        }
        assert_eq!(registry.inactive_count(), 4);
        assert_eq!(registry.active_count(), 0);

        // Every slot comes back exactly once
        let mut indexes: Vec<u16> = (0..4)
            .map(|v| registry.allocate(word(b'a' + v), 0).unwrap().id().index())
            .collect();
        indexes.sort_unstable();
        assert_eq!(indexes, [1, 2, 3, 4]);
    }

    #[test]
    fn test_name_validation() {
        let mut registry = partitions(ClassConfig::fixed(2));
        assert_eq!(registry.allocate(ObjectName::Word(0), 0), Err(StatusCode::InvalidName));
        assert_eq!(
            registry.allocate(ObjectName::Text(String::from("abc")), 0),
            Err(StatusCode::InvalidName)
        );

        let mut strings: ClassRegistry<u32> = ClassRegistry::new(
            ObjectClass::MESSAGE_QUEUES,
            node(1),
            1,
            ClassConfig::fixed(2).with_string_names(4),
        )
        .unwrap();
        assert!(strings.allocate(ObjectName::Text(String::from("mq0")), 0).is_ok());
        assert_eq!(
            strings.allocate(ObjectName::Text(String::from("toolong")), 0),
            Err(StatusCode::InvalidName)
        );
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    #[test]
    fn test_stale_id_is_invalid() {
        let mut registry = partitions(ClassConfig::fixed(2));
        let slot = registry.allocate(word(b'1'), 1).unwrap();
        registry.free(slot).unwrap();
        assert_eq!(registry.get(slot.id()), Location::Invalid);
        assert!(registry.slot_ref(slot.id()).is_none());
    }

    #[test]
    fn test_classification() {
        let registry = partitions(ClassConfig::fixed(2));

        let remote = ObjectId::new(ObjectClass::PARTITIONS, node(3), 1);
        assert_eq!(registry.get(remote), Location::Remote(node(3)));

        // Node beyond the configured set
        let stranger = ObjectId::new(ObjectClass::PARTITIONS, node(9), 1);
        assert_eq!(registry.get(stranger), Location::Invalid);

        // Wrong class
        let task = ObjectId::new(ObjectClass::TASKS, node(1), 1);
        assert_eq!(registry.get(task), Location::Invalid);

        // Local index outside the table
        let beyond = ObjectId::new(ObjectClass::PARTITIONS, node(1), 40);
        assert_eq!(registry.get(beyond), Location::Invalid);

        assert_eq!(registry.get(ObjectId::NONE), Location::Invalid);
    }

    #[test]
    fn test_single_node_never_reports_remote() {
        let registry: ClassRegistry<u32> =
            ClassRegistry::new(ObjectClass::TASKS, node(1), 1, ClassConfig::fixed(2)).unwrap();
        let other = ObjectId::new(ObjectClass::TASKS, node(2), 1);
        assert_eq!(registry.get(other), Location::Invalid);
    }

    #[test]
    fn test_name_to_id_returns_oldest() {
        let mut registry = partitions(ClassConfig::fixed(2));
        let a = registry.allocate(word(b'X'), 1).unwrap();
        let b = registry.allocate(word(b'X'), 2).unwrap();
        registry.free(a).unwrap();
        // Reuses a's slot, which sits before b in the table but is newer
        let c = registry.allocate(word(b'X'), 3).unwrap();
        assert_eq!(c.id().index(), a.id().index());

        assert_eq!(registry.name_to_id(&word(b'X')), Some(b.id()));
        assert_eq!(registry.name_to_id(&word(b'Q')), None);

        registry.free(b).unwrap();
        assert_eq!(registry.name_to_id(&word(b'X')), Some(c.id()));
    }

    // ========================================================================
    // Growth
    // ========================================================================

    #[test]
    fn test_unlimited_registry_extends() {
        let mut registry = partitions(ClassConfig::unlimited(2));
        let slots: Vec<SlotRef> = (0..5)
            .map(|v| registry.allocate(word(b'0' + v), u32::from(v)).unwrap())
            .collect();
        assert_eq!(registry.maximum(), 6);
        assert_eq!(slots[4].id().index(), 5);
    }

    #[test]
    fn test_block_limit_reports_too_many() {
        let mut registry = partitions(ClassConfig::unlimited(2).with_block_limit(2));
        for v in 0..4 {
            registry.allocate(word(b'0' + v), 0).unwrap();
        }
        assert_eq!(registry.allocate(word(b'9'), 0), Err(StatusCode::TooMany));
    }

    #[test]
    fn test_shrink_releases_idle_blocks() {
        let mut registry = partitions(ClassConfig::unlimited(2));
        let slots: Vec<SlotRef> = (0..6)
            .map(|v| registry.allocate(word(b'0' + v), 0).unwrap())
            .collect();
        assert_eq!(registry.maximum(), 6);

        // Empty the middle block only
        registry.free(slots[2]).unwrap();
        registry.free(slots[3]).unwrap();
        assert_eq!(registry.shrink(), 1);
        assert_eq!(registry.maximum(), 4);
        assert_eq!(registry.inactive_count(), 0);
        assert_eq!(registry.get(slots[5].id()), Location::Local(&0));

        // The released block is reused before the table grows
        let refill = registry.allocate(word(b'R'), 7).unwrap();
        assert_eq!(refill.id().index(), 3);
        assert_eq!(registry.maximum(), 6);
    }
}
