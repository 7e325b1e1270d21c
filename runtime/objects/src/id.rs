//! Object Identifier Codec
//!
//! Every kernel object is named by a 32-bit identifier that is meaningful on
//! every node of the system. The identifier is split into four fields:
//!
//! ```text
//!  31      27 26  24 23          16 15                    0
//! +----------+------+--------------+-----------------------+
//! |  class   | api  |     node     |         index         |
//! +----------+------+--------------+-----------------------+
//! ```
//!
//! - **api**: which personality owns the class (internal, classic, POSIX)
//! - **class**: kind of object within that API (task, semaphore, ...)
//! - **node**: node that owns the object; 0 is never a valid owner
//! - **index**: position of the object in its class table, starting at 1
//!
//! Identifiers are only ever produced by [`ObjectId::new`], so field ranges
//! are checked with debug assertions rather than runtime errors.

use core::fmt;
use static_assertions::const_assert_eq;

/// Number of bits in the index field
pub const INDEX_BITS: u32 = 16;
/// Number of bits in the node field
pub const NODE_BITS: u32 = 8;
/// Number of bits in the API field
pub const API_BITS: u32 = 3;
/// Number of bits in the class field
pub const CLASS_BITS: u32 = 5;

const INDEX_START: u32 = 0;
const NODE_START: u32 = INDEX_START + INDEX_BITS;
const API_START: u32 = NODE_START + NODE_BITS;
const CLASS_START: u32 = API_START + API_BITS;

const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const NODE_MASK: u32 = (1 << NODE_BITS) - 1;
const API_MASK: u32 = (1 << API_BITS) - 1;
const CLASS_MASK: u32 = (1 << CLASS_BITS) - 1;

const_assert_eq!(INDEX_BITS + NODE_BITS + API_BITS + CLASS_BITS, 32);

/// Lowest index handed out by a class registry
pub const MINIMUM_INDEX: u16 = 1;

/// Largest node number the identifier can carry
pub const MAXIMUM_NODE: u8 = NODE_MASK as u8;

/// Node number
///
/// Node 0 is reserved: it never owns an object. Use [`NodeId::new`] to build
/// one from a raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct NodeId(u8);

impl NodeId {
    /// Node 1, the only node of a single-node system
    pub const FIRST: NodeId = NodeId(1);

    /// Build a node number, rejecting the reserved value 0
    pub const fn new(node: u8) -> Option<Self> {
        if node == 0 {
            None
        } else {
            Some(Self(node))
        }
    }

    /// Raw node number
    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// API domain owning an object class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Api {
    /// Objects the kernel creates for itself (idle thread, MPCI receive server)
    Internal = 1,
    /// Classic directive set (tasks, semaphores, partitions, ...)
    Classic = 2,
    /// POSIX personality
    Posix = 3,
}

impl Api {
    /// Decode the API field of an identifier
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Internal),
            2 => Some(Self::Classic),
            3 => Some(Self::Posix),
            _ => None,
        }
    }
}

/// Object class: the (api, class) pair that selects one registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectClass {
    api: Api,
    class: u8,
}

impl ObjectClass {
    /// Kernel-internal threads
    pub const INTERNAL_THREADS: ObjectClass = ObjectClass::new(Api::Internal, 1);
    /// Classic tasks
    pub const TASKS: ObjectClass = ObjectClass::new(Api::Classic, 1);
    /// Classic timers
    pub const TIMERS: ObjectClass = ObjectClass::new(Api::Classic, 2);
    /// Classic semaphores
    pub const SEMAPHORES: ObjectClass = ObjectClass::new(Api::Classic, 3);
    /// Classic message queues
    pub const MESSAGE_QUEUES: ObjectClass = ObjectClass::new(Api::Classic, 4);
    /// Classic partitions
    pub const PARTITIONS: ObjectClass = ObjectClass::new(Api::Classic, 5);
    /// Classic regions
    pub const REGIONS: ObjectClass = ObjectClass::new(Api::Classic, 6);
    /// Classic dual-ported memory ports
    pub const PORTS: ObjectClass = ObjectClass::new(Api::Classic, 7);

    /// Build an object class
    ///
    /// `class` must fit the 5-bit class field and must not be 0.
    pub const fn new(api: Api, class: u8) -> Self {
        debug_assert!(class != 0 && (class as u32) <= CLASS_MASK);
        Self { api, class }
    }

    /// API domain
    #[inline]
    pub const fn api(self) -> Api {
        self.api
    }

    /// Class number within the API
    #[inline]
    pub const fn class(self) -> u8 {
        self.class
    }
}

/// Raw fields of an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdFields {
    pub api: u8,
    pub class: u8,
    pub node: u8,
    pub index: u16,
}

/// Object identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct ObjectId(u32);

impl ObjectId {
    /// "No object": no class and no owning node
    pub const NONE: ObjectId = ObjectId(0);

    /// Encode an identifier from its fields
    pub const fn new(class: ObjectClass, node: NodeId, index: u16) -> Self {
        Self::encode(class.api as u8, class.class, node.0, index)
    }

    /// Encode raw fields
    ///
    /// Out-of-range fields are a programming error.
    pub const fn encode(api: u8, class: u8, node: u8, index: u16) -> Self {
        debug_assert!((api as u32) <= API_MASK);
        debug_assert!((class as u32) <= CLASS_MASK);
        Self(
            ((class as u32) << CLASS_START)
                | ((api as u32) << API_START)
                | ((node as u32) << NODE_START)
                | ((index as u32) << INDEX_START),
        )
    }

    /// Split an identifier into its raw fields
    pub const fn decode(self) -> IdFields {
        IdFields {
            api: self.api_raw(),
            class: self.class_raw(),
            node: self.node_raw(),
            index: self.index(),
        }
    }

    /// Rebuild an identifier received on the wire
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw 32-bit value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn api_raw(self) -> u8 {
        ((self.0 >> API_START) & API_MASK) as u8
    }

    #[inline]
    pub const fn class_raw(self) -> u8 {
        ((self.0 >> CLASS_START) & CLASS_MASK) as u8
    }

    #[inline]
    pub const fn node_raw(self) -> u8 {
        ((self.0 >> NODE_START) & NODE_MASK) as u8
    }

    /// Index within the owning node's class table
    #[inline]
    pub const fn index(self) -> u16 {
        ((self.0 >> INDEX_START) & INDEX_MASK) as u16
    }

    /// Owning node, `None` for node 0
    #[inline]
    pub const fn node(self) -> Option<NodeId> {
        NodeId::new(self.node_raw())
    }

    /// Object class, `None` if the api field is not a known API
    pub const fn object_class(self) -> Option<ObjectClass> {
        match Api::from_raw(self.api_raw()) {
            Some(api) if self.class_raw() != 0 => Some(ObjectClass {
                api,
                class: self.class_raw(),
            }),
            _ => None,
        }
    }

    /// True if `node` owns this object
    #[inline]
    pub const fn is_local_to(self, node: NodeId) -> bool {
        self.node_raw() == node.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:#010x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Free-function form of [`ObjectId::encode`]
#[inline]
pub const fn encode(api: u8, class: u8, node: u8, index: u16) -> ObjectId {
    ObjectId::encode(api, class, node, index)
}

/// Free-function form of [`ObjectId::decode`]
#[inline]
pub const fn decode(id: ObjectId) -> IdFields {
    id.decode()
}

/// True if `self_node` owns `id`
#[inline]
pub const fn is_local(id: ObjectId, self_node: NodeId) -> bool {
    id.is_local_to(self_node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_layout() {
        let id = ObjectId::new(ObjectClass::PARTITIONS, NodeId::new(3).unwrap(), 0x0102);
        assert_eq!(id.raw(), (5 << 27) | (2 << 24) | (3 << 16) | 0x0102);
        assert_eq!(id.index(), 0x0102);
        assert_eq!(id.node(), NodeId::new(3));
        assert_eq!(id.object_class(), Some(ObjectClass::PARTITIONS));
    }

    #[test]
    fn test_decode_encode_round_trip() {
        for api in 0..=API_MASK as u8 {
            for class in [0u8, 1, 5, 17, CLASS_MASK as u8] {
                for node in [0u8, 1, 2, 127, MAXIMUM_NODE] {
                    for index in [0u16, MINIMUM_INDEX, 2, 0x7FFF, u16::MAX] {
                        let id = encode(api, class, node, index);
                        let fields = decode(id);
                        assert_eq!(fields, IdFields { api, class, node, index });
                        assert_eq!(encode(fields.api, fields.class, fields.node, fields.index), id);
                    }
                }
            }
        }
    }

    #[test]
    fn test_is_local() {
        let one = NodeId::new(1).unwrap();
        let two = NodeId::new(2).unwrap();
        let id = ObjectId::new(ObjectClass::TASKS, two, 4);
        assert!(is_local(id, two));
        assert!(!is_local(id, one));
    }

    #[test]
    fn test_node_zero_is_reserved() {
        assert_eq!(NodeId::new(0), None);
        assert_eq!(ObjectId::encode(2, 1, 0, 1).node(), None);
        assert!(ObjectId::NONE.is_none());
    }

    #[test]
    fn test_none_names_no_object() {
        assert_eq!(ObjectId::NONE.object_class(), None);
        assert_eq!(ObjectId::NONE.node(), None);
        assert!(!ObjectId::NONE.is_local_to(NodeId::FIRST));
    }

    #[test]
    fn test_unknown_api_has_no_class() {
        assert_eq!(ObjectId::encode(7, 1, 1, 1).object_class(), None);
        assert_eq!(ObjectId::encode(2, 0, 1, 1).object_class(), None);
    }
}
