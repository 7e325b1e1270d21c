//! Collaborator Contracts
//!
//! The MPCI layer moves bytes through a [`Transport`] and suspends threads
//! through a [`Scheduler`]. Neither is implemented here; a board supplies
//! them, and the `sim` feature provides an in-process pair for tests.

use core::num::NonZeroU32;

use tandem_objects::status::Result;
use tandem_objects::{NodeId, ObjectId};

/// Where a frame goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Node(NodeId),
    /// Every other node in the system
    AllNodes,
}

impl Destination {
    /// Decode a raw node number; 0 means every node
    pub const fn from_raw(node: u8) -> Self {
        match NodeId::new(node) {
            Some(node) => Self::Node(node),
            None => Self::AllNodes,
        }
    }
}

/// Byte-level interconnect
pub trait Transport: Send + Sync {
    /// Hand a frame to the interconnect; delivery is not confirmed
    fn send(&self, destination: Destination, frame: &[u8]) -> Result<()>;
}

/// How long a blocking wait may last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Forever,
    Ticks(NonZeroU32),
}

impl Timeout {
    /// Wire encoding: 0 waits forever
    pub const fn from_wire(ticks: u32) -> Self {
        match NonZeroU32::new(ticks) {
            Some(ticks) => Self::Ticks(ticks),
            None => Self::Forever,
        }
    }

    pub const fn to_wire(self) -> u32 {
        match self {
            Self::Forever => 0,
            Self::Ticks(ticks) => ticks.get(),
        }
    }
}

/// Why a blocked thread resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    Woken,
    TimedOut,
}

/// Thread scheduling services
///
/// `block` is the only place the core gives up the processor. Callers never
/// hold a dispatch guard or a table lock across it.
pub trait Scheduler: Send + Sync {
    /// Thread currently running on this node
    fn executing(&self) -> ObjectId;

    /// Suspend `thread` until `unblock` or the timeout
    fn block(&self, thread: ObjectId, timeout: Timeout) -> Wakeup;

    /// Make a blocked thread ready
    fn unblock(&self, thread: ObjectId);

    /// Remove `thread` from scheduling until resumed
    fn suspend(&self, _thread: ObjectId) {}

    fn resume(&self, _thread: ObjectId) {}

    fn set_priority(&self, _thread: ObjectId, _priority: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_wire_encoding() {
        assert_eq!(Timeout::from_wire(0), Timeout::Forever);
        assert_eq!(Timeout::from_wire(7).to_wire(), 7);
        assert_eq!(Timeout::Forever.to_wire(), 0);
    }

    #[test]
    fn test_destination_from_raw() {
        assert_eq!(Destination::from_raw(0), Destination::AllNodes);
        assert_eq!(Destination::from_raw(3), Destination::Node(NodeId::new(3).unwrap()));
    }
}
