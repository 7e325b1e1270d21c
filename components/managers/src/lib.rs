//! Tandem Managers - Object managers that work across nodes
//!
//! # Purpose
//! Tasks, partitions and semaphores addressed by identifier, wherever they
//! live. A directive on a local object runs in place; on an object of
//! another node it becomes an MPCI request and the caller waits for the
//! owner's answer.
//!
//! # Integration Points
//! - Depends on: `tandem-objects` (identifiers, registries, directory) and
//!   `tandem-mpci` (packets, waits, proxies)
//! - Provides to: the kernel's directive layer
//! - Collaborators: the board's [`Scheduler`](tandem_mpci::Scheduler) and
//!   [`Transport`](tandem_mpci::Transport)
//!
//! # Architecture
//! A [`Node`] owns one registry per class, the global directory and the
//! MPCI endpoint. Managers are borrowed views of a node. Each manager
//! defines its packet operations and handles the packets of its class.
//!
//! # Testing Strategy
//! - Unit tests: control-block rules and operation codes
//! - Integration tests: several nodes on the simulated interconnect
//!   (`tests/integration_test.rs`)

#![no_std]

#[cfg(test)]
extern crate std;

extern crate alloc;

pub mod node;
pub mod partition;
pub mod semaphore;
pub mod task;

pub use node::{Node, NodeConfig, SearchNode};
pub use partition::{Partition, PartitionManager, PartitionOp, BUFFER_ALIGNMENT, MINIMUM_BUFFER_SIZE};
pub use semaphore::{Semaphore, SemaphoreManager, SemaphoreOp, Waiter};
pub use task::{Task, TaskManager, TaskOp, CURRENT_PRIORITY, MAXIMUM_PRIORITY, MINIMUM_PRIORITY};
