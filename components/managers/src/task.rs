//! Task Manager
//!
//! Tasks are the schedulable objects. The registry keeps their name,
//! priority and suspension state; the scheduler is told about changes
//! through its hooks. Suspend, resume and set-priority work on tasks of
//! any node; create and delete only on local ones.

use tandem_mpci::{Operation, PacketClass, PacketError, PayloadReader, PayloadWriter, PooledPacket};
use tandem_objects::{Attributes, Location, ObjectClass, ObjectId, ObjectName, Result, StatusCode};

use crate::node::{Node, SearchNode};

/// Highest priority; lower numbers run first
pub const MINIMUM_PRIORITY: u32 = 1;

pub const MAXIMUM_PRIORITY: u32 = 255;

/// Passed to `set_priority` to read the priority without changing it
pub const CURRENT_PRIORITY: u32 = 0;

/// Task control block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub priority: u32,
    pub suspended: bool,
    pub attributes: Attributes,
}

/// Task operations carried between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOp {
    AnnounceCreate { name: u32 },
    AnnounceDelete,
    SuspendRequest,
    SuspendResponse,
    ResumeRequest,
    ResumeResponse,
    SetPriorityRequest { priority: u32 },
    SetPriorityResponse { old: u32 },
}

impl Operation for TaskOp {
    const CLASS: PacketClass = PacketClass::Tasks;

    fn code(&self) -> u32 {
        match self {
            Self::AnnounceCreate { .. } => 0,
            Self::AnnounceDelete => 1,
            Self::SuspendRequest => 2,
            Self::SuspendResponse => 3,
            Self::ResumeRequest => 4,
            Self::ResumeResponse => 5,
            Self::SetPriorityRequest { .. } => 6,
            Self::SetPriorityResponse { .. } => 7,
        }
    }

    fn encode_payload(&self, writer: &mut PayloadWriter<'_>) -> core::result::Result<(), PacketError> {
        match *self {
            Self::AnnounceCreate { name } => writer.word(name),
            Self::SetPriorityRequest { priority } => writer.word(priority),
            Self::SetPriorityResponse { old } => writer.word(old),
            Self::AnnounceDelete
            | Self::SuspendRequest
            | Self::SuspendResponse
            | Self::ResumeRequest
            | Self::ResumeResponse => Ok(()),
        }
    }

    fn decode(code: u32, reader: &mut PayloadReader<'_>) -> core::result::Result<Self, PacketError> {
        Ok(match code {
            0 => Self::AnnounceCreate { name: reader.word()? },
            1 => Self::AnnounceDelete,
            2 => Self::SuspendRequest,
            3 => Self::SuspendResponse,
            4 => Self::ResumeRequest,
            5 => Self::ResumeResponse,
            6 => Self::SetPriorityRequest { priority: reader.word()? },
            7 => Self::SetPriorityResponse { old: reader.word()? },
            code => return Err(PacketError::UnknownOperation { class: Self::CLASS, code }),
        })
    }
}

/// Task directives of one node
pub struct TaskManager<'a> {
    node: &'a Node,
}

impl<'a> TaskManager<'a> {
    pub(crate) fn new(node: &'a Node) -> Self {
        Self { node }
    }

    /// Create a task
    ///
    /// # Errors
    /// * `InvalidPriority` - priority outside 1..=255
    /// * `InvalidName`, `TooMany`, `MpNotConfigured` - see the registry
    pub fn create(&self, name: ObjectName, priority: u32, attributes: Attributes) -> Result<ObjectId> {
        if !(MINIMUM_PRIORITY..=MAXIMUM_PRIORITY).contains(&priority) {
            return Err(StatusCode::InvalidPriority);
        }

        let task = Task {
            priority,
            suspended: false,
            attributes,
        };
        let (id, global_name) = self.node.create_object(&self.node.tasks, name, attributes, task)?;
        self.node.scheduler().set_priority(id, priority);

        if let Some(name) = global_name {
            self.node.announce(id, &TaskOp::AnnounceCreate { name });
        }
        log::debug!("node {}: task {} created", self.node.id(), id);
        Ok(id)
    }

    /// Delete a local task
    pub fn delete(&self, id: ObjectId) -> Result<()> {
        let (_, global) = self.node.delete_object(&self.node.tasks, id, |_| Ok(()))?;
        if global {
            self.node.announce(id, &TaskOp::AnnounceDelete);
        }
        Ok(())
    }

    /// Find a task by name
    pub fn ident(&self, name: &ObjectName, search: SearchNode) -> Result<ObjectId> {
        self.node.ident(&self.node.tasks, ObjectClass::TASKS, name, search)
    }

    /// Control block of a local task
    pub fn get(&self, id: ObjectId) -> Result<Task> {
        let _guard = self.node.disable_dispatch();
        self.node.tasks.lock().get(id).local().copied()
    }

    /// Stop `id` from being scheduled
    ///
    /// # Errors
    /// `AlreadySuspended` if it is suspended already
    pub fn suspend(&self, id: ObjectId) -> Result<()> {
        match self.node.locate(&self.node.tasks, id) {
            Location::Local(()) => self.suspend_local(id),
            Location::Remote(owner) => self
                .node
                .request(owner, id, &TaskOp::SuspendRequest, self.node.remote_timeout())
                .map(|_| ()),
            Location::Invalid => Err(StatusCode::InvalidId),
        }
    }

    /// Let a suspended task run again
    ///
    /// # Errors
    /// `IncorrectState` if it is not suspended
    pub fn resume(&self, id: ObjectId) -> Result<()> {
        match self.node.locate(&self.node.tasks, id) {
            Location::Local(()) => self.resume_local(id),
            Location::Remote(owner) => self
                .node
                .request(owner, id, &TaskOp::ResumeRequest, self.node.remote_timeout())
                .map(|_| ()),
            Location::Invalid => Err(StatusCode::InvalidId),
        }
    }

    /// Change the priority of `id`
    ///
    /// # Arguments
    /// * `priority` - New priority, or [`CURRENT_PRIORITY`] to leave it
    ///
    /// # Returns
    /// The priority before the call
    pub fn set_priority(&self, id: ObjectId, priority: u32) -> Result<u32> {
        if priority != CURRENT_PRIORITY && !(MINIMUM_PRIORITY..=MAXIMUM_PRIORITY).contains(&priority) {
            return Err(StatusCode::InvalidPriority);
        }

        match self.node.locate(&self.node.tasks, id) {
            Location::Local(()) => self.set_priority_local(id, priority),
            Location::Remote(owner) => {
                let request = TaskOp::SetPriorityRequest { priority };
                match self.node.request(owner, id, &request, self.node.remote_timeout())? {
                    TaskOp::SetPriorityResponse { old } => Ok(old),
                    _ => Err(StatusCode::InternalError),
                }
            }
            Location::Invalid => Err(StatusCode::InvalidId),
        }
    }

    /// Handle a task packet from another node
    pub(crate) fn process_packet(&self, packet: PooledPacket) -> core::result::Result<(), PacketError> {
        let id = packet.id;
        match packet.read_operation::<TaskOp>()? {
            TaskOp::AnnounceCreate { name } => self.node.open_announced(id, name),
            TaskOp::AnnounceDelete => self.node.close_announced(id),
            TaskOp::SuspendRequest => {
                let result = self.suspend_local(id);
                self.node.respond(packet, result, &TaskOp::SuspendResponse);
            }
            TaskOp::ResumeRequest => {
                let result = self.resume_local(id);
                self.node.respond(packet, result, &TaskOp::ResumeResponse);
            }
            TaskOp::SetPriorityRequest { priority } => match self.set_priority_local(id, priority) {
                Ok(old) => self.node.respond(packet, Ok(()), &TaskOp::SetPriorityResponse { old }),
                Err(status) => {
                    self.node.respond(packet, Err(status), &TaskOp::SetPriorityResponse { old: 0 })
                }
            },
            TaskOp::SuspendResponse | TaskOp::ResumeResponse | TaskOp::SetPriorityResponse { .. } => {
                self.node.process_response(packet)
            }
        }
        Ok(())
    }

    fn suspend_local(&self, id: ObjectId) -> Result<()> {
        {
            let _guard = self.node.disable_dispatch();
            let mut tasks = self.node.tasks.lock();
            let task = local(tasks.get_mut(id))?;
            if task.suspended {
                return Err(StatusCode::AlreadySuspended);
            }
            task.suspended = true;
        }
        self.node.scheduler().suspend(id);
        Ok(())
    }

    fn resume_local(&self, id: ObjectId) -> Result<()> {
        {
            let _guard = self.node.disable_dispatch();
            let mut tasks = self.node.tasks.lock();
            let task = local(tasks.get_mut(id))?;
            if !task.suspended {
                return Err(StatusCode::IncorrectState);
            }
            task.suspended = false;
        }
        self.node.scheduler().resume(id);
        Ok(())
    }

    fn set_priority_local(&self, id: ObjectId, priority: u32) -> Result<u32> {
        let old = {
            let _guard = self.node.disable_dispatch();
            let mut tasks = self.node.tasks.lock();
            let task = local(tasks.get_mut(id))?;
            let old = task.priority;
            if priority != CURRENT_PRIORITY {
                task.priority = priority;
            }
            old
        };
        if priority != CURRENT_PRIORITY {
            self.node.scheduler().set_priority(id, priority);
        }
        Ok(old)
    }
}

/// A task this node must own; requests for anything else are unknown ids
fn local<T>(location: Location<T>) -> Result<T> {
    match location {
        Location::Local(task) => Ok(task),
        Location::Remote(_) | Location::Invalid => Err(StatusCode::InvalidId),
    }
}
