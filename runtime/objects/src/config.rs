//! Node and Class Configuration
//!
//! Configuration is fixed at node bring-up. `MpConfiguration` describes the
//! node's place in the multi-node system and sizes the shared tables;
//! `ClassConfig` sizes one class registry.

use crate::id::{NodeId, MAXIMUM_NODE};
use thiserror::Error;

/// Configuration errors reported by `validate()`
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("node {node} is outside 1..={maximum_nodes}")]
    NodeOutOfRange { node: u8, maximum_nodes: u8 },

    #[error("maximum_nodes must be at least 1")]
    NoNodes,

    #[error("multiprocessing requires at least one packet buffer")]
    NoPackets,

    #[error("class table must allow at least one object")]
    EmptyClass,

    #[error("class table of {requested} objects exceeds the index range")]
    ClassTooLarge { requested: u32 },

    #[error("string names need a non-zero length")]
    ZeroNameLength,

    #[error("multiprocessing node needs a transport")]
    NoTransport,
}

/// Multi-node configuration of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MpConfiguration {
    /// This node's number
    pub node: NodeId,
    /// Number of nodes in the system; 1 disables multiprocessing
    pub maximum_nodes: u8,
    /// Capacity of the global object directory
    pub maximum_global_objects: usize,
    /// Capacity of the proxy table (remote threads blocked on local objects)
    pub maximum_proxies: usize,
    /// Number of packet buffers in the node's pool
    pub maximum_packets: usize,
    /// Ticks a remote request without its own timeout waits for the
    /// response; 0 waits forever
    pub default_timeout: u32,
}

impl MpConfiguration {
    /// Configuration of a stand-alone node
    pub const fn single_node() -> Self {
        Self {
            node: NodeId::FIRST,
            maximum_nodes: 1,
            maximum_global_objects: 0,
            maximum_proxies: 0,
            maximum_packets: 0,
            default_timeout: 0,
        }
    }

    /// Configuration of node `node` in a system of `maximum_nodes` nodes
    ///
    /// Table sizes start from small defaults; adjust with the `with_*`
    /// builders.
    pub const fn multiprocessing(node: NodeId, maximum_nodes: u8) -> Self {
        Self {
            node,
            maximum_nodes,
            maximum_global_objects: 32,
            maximum_proxies: 32,
            maximum_packets: 16,
            default_timeout: 100,
        }
    }

    pub const fn with_global_objects(mut self, maximum: usize) -> Self {
        self.maximum_global_objects = maximum;
        self
    }

    pub const fn with_proxies(mut self, maximum: usize) -> Self {
        self.maximum_proxies = maximum;
        self
    }

    pub const fn with_packets(mut self, maximum: usize) -> Self {
        self.maximum_packets = maximum;
        self
    }

    pub const fn with_default_timeout(mut self, ticks: u32) -> Self {
        self.default_timeout = ticks;
        self
    }

    /// True when more than one node is configured
    #[inline]
    pub const fn is_multiprocessing(&self) -> bool {
        self.maximum_nodes > 1
    }

    /// True if `node` names a configured node
    #[inline]
    pub const fn is_valid_node(&self, node: u8) -> bool {
        node >= 1 && node <= self.maximum_nodes
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maximum_nodes == 0 {
            return Err(ConfigError::NoNodes);
        }
        if self.maximum_nodes > MAXIMUM_NODE || !self.is_valid_node(self.node.get()) {
            return Err(ConfigError::NodeOutOfRange {
                node: self.node.get(),
                maximum_nodes: self.maximum_nodes,
            });
        }
        if self.is_multiprocessing() && self.maximum_packets == 0 {
            return Err(ConfigError::NoPackets);
        }
        Ok(())
    }
}

impl Default for MpConfiguration {
    fn default() -> Self {
        Self::single_node()
    }
}

/// Sizing of one class registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassConfig {
    /// Objects per allocation block; for a fixed class, the whole table
    pub objects_per_block: u16,
    /// Grow by another block when the free list runs dry
    pub auto_extend: bool,
    /// Upper bound on the number of blocks, standing in for workspace memory
    pub maximum_blocks: Option<u16>,
    /// Maximum length of string names; `None` for word-named classes
    pub name_length: Option<u16>,
}

impl ClassConfig {
    /// A table of exactly `maximum` objects
    pub const fn fixed(maximum: u16) -> Self {
        Self {
            objects_per_block: maximum,
            auto_extend: false,
            maximum_blocks: None,
            name_length: None,
        }
    }

    /// A table that grows `objects_per_block` objects at a time
    pub const fn unlimited(objects_per_block: u16) -> Self {
        Self {
            objects_per_block,
            auto_extend: true,
            maximum_blocks: None,
            name_length: None,
        }
    }

    /// Cap the number of blocks an unlimited table may grow to
    pub const fn with_block_limit(mut self, blocks: u16) -> Self {
        self.maximum_blocks = Some(blocks);
        self
    }

    /// Use string names of up to `length` bytes
    pub const fn with_string_names(mut self, length: u16) -> Self {
        self.name_length = Some(length);
        self
    }

    /// Check the sizing for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.objects_per_block == 0 {
            return Err(ConfigError::EmptyClass);
        }
        if let Some(blocks) = self.maximum_blocks {
            let requested = u32::from(blocks) * u32::from(self.objects_per_block);
            if blocks == 0 {
                return Err(ConfigError::EmptyClass);
            }
            if requested > u32::from(u16::MAX) {
                return Err(ConfigError::ClassTooLarge { requested });
            }
        }
        if self.name_length == Some(0) {
            return Err(ConfigError::ZeroNameLength);
        }
        Ok(())
    }
}
