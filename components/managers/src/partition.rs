//! Partition Manager
//!
//! A partition is a memory area cut into fixed-size buffers. The manager
//! never touches the memory itself; it hands out buffer addresses and takes
//! them back. Buffers of a global partition can be taken and returned from
//! any node, the owner keeping the books.
//!
//! Free buffers are handed out oldest first: the never-used buffers in
//! address order, then returned buffers in the order they came back.

use alloc::collections::VecDeque;

use tandem_mpci::{Operation, PacketClass, PacketError, PayloadReader, PayloadWriter, PooledPacket};
use tandem_objects::{Attributes, Location, ObjectClass, ObjectId, ObjectName, Result, StatusCode};

use crate::node::{Node, SearchNode};

/// Alignment of the area and of the buffer size
pub const BUFFER_ALIGNMENT: u64 = 8;

/// Smallest buffer; room for the two links of a free-list node
pub const MINIMUM_BUFFER_SIZE: u64 = 2 * BUFFER_ALIGNMENT;

/// Partition control block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    base: u64,
    buffer_size: u64,
    buffers: u64,
    /// Buffers at and above this index have never been handed out
    never_used: u64,
    returned: VecDeque<u64>,
    used: u64,
    attributes: Attributes,
}

impl Partition {
    fn new(base: u64, length: u64, buffer_size: u64, attributes: Attributes) -> Self {
        Self {
            base,
            buffer_size,
            buffers: length / buffer_size,
            never_used: 0,
            returned: VecDeque::new(),
            used: 0,
            attributes,
        }
    }

    fn allocate(&mut self) -> Option<u64> {
        let buffer = if self.never_used < self.buffers {
            self.never_used += 1;
            self.base + (self.never_used - 1) * self.buffer_size
        } else {
            self.returned.pop_front()?
        };
        self.used += 1;
        Some(buffer)
    }

    fn release(&mut self, buffer: u64) -> Result<()> {
        let offset = buffer.checked_sub(self.base).ok_or(StatusCode::InvalidAddress)?;
        let index = offset / self.buffer_size;
        if offset % self.buffer_size != 0 || index >= self.never_used || self.returned.contains(&buffer) {
            return Err(StatusCode::InvalidAddress);
        }
        self.returned.push_back(buffer);
        self.used -= 1;
        Ok(())
    }

    /// Buffers currently handed out
    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes
    }
}

/// Partition operations carried between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOp {
    AnnounceCreate { name: u32 },
    AnnounceDelete,
    GetBufferRequest,
    GetBufferResponse { buffer: u64 },
    ReturnBufferRequest { buffer: u64 },
    ReturnBufferResponse,
}

impl Operation for PartitionOp {
    const CLASS: PacketClass = PacketClass::Partition;

    fn code(&self) -> u32 {
        match self {
            Self::AnnounceCreate { .. } => 0,
            Self::AnnounceDelete => 1,
            Self::GetBufferRequest => 2,
            Self::GetBufferResponse { .. } => 3,
            Self::ReturnBufferRequest { .. } => 4,
            Self::ReturnBufferResponse => 5,
        }
    }

    fn encode_payload(&self, writer: &mut PayloadWriter<'_>) -> core::result::Result<(), PacketError> {
        match *self {
            Self::AnnounceCreate { name } => writer.word(name),
            Self::GetBufferResponse { buffer } | Self::ReturnBufferRequest { buffer } => {
                writer.word64(buffer)
            }
            Self::AnnounceDelete | Self::GetBufferRequest | Self::ReturnBufferResponse => Ok(()),
        }
    }

    fn decode(code: u32, reader: &mut PayloadReader<'_>) -> core::result::Result<Self, PacketError> {
        Ok(match code {
            0 => Self::AnnounceCreate { name: reader.word()? },
            1 => Self::AnnounceDelete,
            2 => Self::GetBufferRequest,
            3 => Self::GetBufferResponse { buffer: reader.word64()? },
            4 => Self::ReturnBufferRequest { buffer: reader.word64()? },
            5 => Self::ReturnBufferResponse,
            code => return Err(PacketError::UnknownOperation { class: Self::CLASS, code }),
        })
    }
}

/// Partition directives of one node
pub struct PartitionManager<'a> {
    node: &'a Node,
}

impl<'a> PartitionManager<'a> {
    pub(crate) fn new(node: &'a Node) -> Self {
        Self { node }
    }

    /// Create a partition over `length` bytes at `base`
    ///
    /// # Errors
    /// * `InvalidAddress` - `base` is null or misaligned
    /// * `InvalidSize` - sizes are zero, misaligned, too small for a buffer,
    ///   or the area cannot hold one buffer
    /// * `InvalidName`, `TooMany`, `MpNotConfigured`
    pub fn create(
        &self,
        name: ObjectName,
        base: u64,
        length: u64,
        buffer_size: u64,
        attributes: Attributes,
    ) -> Result<ObjectId> {
        if !name.is_valid() {
            return Err(StatusCode::InvalidName);
        }
        if base == 0 {
            return Err(StatusCode::InvalidAddress);
        }
        if length == 0
            || buffer_size == 0
            || length < buffer_size
            || buffer_size % BUFFER_ALIGNMENT != 0
            || buffer_size < MINIMUM_BUFFER_SIZE
        {
            return Err(StatusCode::InvalidSize);
        }
        if base % BUFFER_ALIGNMENT != 0 {
            return Err(StatusCode::InvalidAddress);
        }
        if base.checked_add(length).is_none() {
            return Err(StatusCode::InvalidSize);
        }

        let partition = Partition::new(base, length, buffer_size, attributes);
        let (id, global_name) = self
            .node
            .create_object(&self.node.partitions, name, attributes, partition)?;

        if let Some(name) = global_name {
            self.node.announce(id, &PartitionOp::AnnounceCreate { name });
        }
        log::debug!("node {}: partition {} over {:#x}+{:#x}", self.node.id(), id, base, length);
        Ok(id)
    }

    /// Delete a local partition
    ///
    /// # Errors
    /// `ResourceInUse` while any buffer is handed out
    pub fn delete(&self, id: ObjectId) -> Result<()> {
        let (_, global) = self.node.delete_object(&self.node.partitions, id, |partition| {
            if partition.used > 0 {
                Err(StatusCode::ResourceInUse)
            } else {
                Ok(())
            }
        })?;
        if global {
            self.node.announce(id, &PartitionOp::AnnounceDelete);
        }
        Ok(())
    }

    /// Find a partition by name
    pub fn ident(&self, name: &ObjectName, search: SearchNode) -> Result<ObjectId> {
        self.node.ident(&self.node.partitions, ObjectClass::PARTITIONS, name, search)
    }

    /// Take a buffer
    ///
    /// # Errors
    /// `Unsatisfied` when every buffer is handed out
    pub fn get_buffer(&self, id: ObjectId) -> Result<u64> {
        match self.node.locate(&self.node.partitions, id) {
            Location::Local(()) => self.get_buffer_local(id),
            Location::Remote(owner) => {
                let request = PartitionOp::GetBufferRequest;
                match self.node.request(owner, id, &request, self.node.remote_timeout())? {
                    PartitionOp::GetBufferResponse { buffer } => Ok(buffer),
                    _ => Err(StatusCode::InternalError),
                }
            }
            Location::Invalid => Err(StatusCode::InvalidId),
        }
    }

    /// Give a buffer back
    ///
    /// # Errors
    /// `InvalidAddress` if `buffer` is not a handed-out buffer of the
    /// partition
    pub fn return_buffer(&self, id: ObjectId, buffer: u64) -> Result<()> {
        match self.node.locate(&self.node.partitions, id) {
            Location::Local(()) => self.return_buffer_local(id, buffer),
            Location::Remote(owner) => self
                .node
                .request(
                    owner,
                    id,
                    &PartitionOp::ReturnBufferRequest { buffer },
                    self.node.remote_timeout(),
                )
                .map(|_| ()),
            Location::Invalid => Err(StatusCode::InvalidId),
        }
    }

    /// Buffers of a local partition currently handed out
    pub fn buffers_in_use(&self, id: ObjectId) -> Result<u64> {
        let _guard = self.node.disable_dispatch();
        let used = self.node.partitions.lock().get(id).local()?.used();
        Ok(used)
    }

    /// Handle a partition packet from another node
    pub(crate) fn process_packet(&self, packet: PooledPacket) -> core::result::Result<(), PacketError> {
        let id = packet.id;
        match packet.read_operation::<PartitionOp>()? {
            PartitionOp::AnnounceCreate { name } => self.node.open_announced(id, name),
            PartitionOp::AnnounceDelete => self.node.close_announced(id),
            PartitionOp::GetBufferRequest => match self.get_buffer_local(id) {
                Ok(buffer) => {
                    self.node
                        .respond(packet, Ok(()), &PartitionOp::GetBufferResponse { buffer })
                }
                Err(status) => {
                    self.node
                        .respond(packet, Err(status), &PartitionOp::GetBufferResponse { buffer: 0 })
                }
            },
            PartitionOp::ReturnBufferRequest { buffer } => {
                let result = self.return_buffer_local(id, buffer);
                self.node.respond(packet, result, &PartitionOp::ReturnBufferResponse);
            }
            PartitionOp::GetBufferResponse { .. } | PartitionOp::ReturnBufferResponse => {
                self.node.process_response(packet)
            }
        }
        Ok(())
    }

    fn get_buffer_local(&self, id: ObjectId) -> Result<u64> {
        let _guard = self.node.disable_dispatch();
        let mut partitions = self.node.partitions.lock();
        match partitions.get_mut(id) {
            Location::Local(partition) => partition.allocate().ok_or(StatusCode::Unsatisfied),
            Location::Remote(_) | Location::Invalid => Err(StatusCode::InvalidId),
        }
    }

    fn return_buffer_local(&self, id: ObjectId, buffer: u64) -> Result<()> {
        let _guard = self.node.disable_dispatch();
        let mut partitions = self.node.partitions.lock();
        match partitions.get_mut(id) {
            Location::Local(partition) => partition.release(buffer),
            Location::Remote(_) | Location::Invalid => Err(StatusCode::InvalidId),
        }
    }
}
