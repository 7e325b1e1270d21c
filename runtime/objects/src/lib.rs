//! Tandem Objects - Object identification for a multi-node kernel
//!
//! # Purpose
//! Gives every kernel object a 32-bit identifier that means the same thing
//! on every node, owns the local objects of each class, and keeps the
//! directory of objects that are visible system wide.
//!
//! # Integration Points
//! - Depends on: nothing but `alloc`
//! - Provides to: the MPCI layer (`tandem-mpci`) and the object managers
//! - Fatal errors: routed through [`fatal::terminate`]
//!
//! # Architecture
//! An [`ObjectId`] packs {api, class, node, index}. A [`ClassRegistry`]
//! owns the objects of one class on one node and resolves an identifier to
//! a local object, a remote node, or nothing. The [`GlobalDirectory`] maps
//! identifiers and names of global objects to their owning node. All of it
//! is changed with thread dispatching disabled ([`ThreadDispatch`]).
//!
//! # Testing Strategy
//! - Unit tests: codec, registry lifecycle, directory consistency
//! - Integration tests: registry and directory used together the way a
//!   manager drives them
//! - Benchmarks: allocation and lookup (`benches/registry.rs`)

#![no_std]

#[cfg(test)]
extern crate std;

extern crate alloc;

pub mod attributes;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod fatal;
pub mod id;
pub mod name;
pub mod registry;
pub mod status;

pub use attributes::{Attributes, Options};
pub use config::{ClassConfig, ConfigError, MpConfiguration};
pub use directory::{GlobalDirectory, GlobalEntry, Opened};
pub use dispatch::{DispatchGuard, ThreadDispatch};
pub use id::{Api, NodeId, ObjectClass, ObjectId};
pub use name::{build_name, ObjectName};
pub use registry::{ClassRegistry, Location, SlotRef};
pub use status::{Result, StatusCode};
