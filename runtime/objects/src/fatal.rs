//! Unconditional Termination
//!
//! Some failures mean the shared tables can no longer be trusted: two nodes
//! claiming the same global object, or an announcement the directory has no
//! room for. Continuing would act on inconsistent state, so these conditions
//! never come back to the caller as a status. They are logged and the node
//! stops through the panic path, which the kernel's panic handler turns into
//! its shutdown sequence.

use crate::id::{NodeId, ObjectId};
use thiserror::Error;

/// Source of an internal fatal error
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InternalError {
    /// An object with this identifier is already registered globally
    #[error("duplicate global object {id} announced by {announced_by}")]
    DuplicateGlobalObject { id: ObjectId, announced_by: NodeId },

    /// A remote node announced an object and the directory is full
    #[error("no room in the global directory for {id}")]
    OutOfGlobalObjects { id: ObjectId },

    /// A packet pool handed out more packets than it owns
    #[error("packet pool corrupted")]
    PacketPoolCorrupted,
}

/// Terminate the node
pub fn terminate(error: InternalError) -> ! {
    log::error!("fatal: {}", error);
    panic!("fatal error: {}", error)
}
