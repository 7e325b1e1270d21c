//! Semaphore Manager
//!
//! Counting semaphores. A thread that cannot obtain a unit waits in FIFO
//! order; a thread of another node waits through a proxy kept by the
//! owner. Every waiter leaves the queue exactly once: granted by a release,
//! extracted by a delete, or gone after its timeout.
//!
//! ## Remote Waits
//!
//! ```text
//! requester                       owner
//!   obtain ── ObtainRequest ───────► count > 0 ──► ObtainResponse
//!                                    count = 0 ──► proxy queued
//!   ...                              release   ──► ObtainResponse
//!   timeout ── ExtractProxy ───────► proxy dropped
//! ```
//!
//! The owner keeps no timer for a proxy; the requester times itself out
//! and tells the owner to forget it.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use tandem_mpci::{
    Destination, Operation, Outcome, PacketClass, PacketError, PayloadReader, PayloadWriter,
    PooledPacket, Proxy, Timeout, LOCAL_WAIT,
};
use tandem_objects::{
    Attributes, Location, NodeId, ObjectClass, ObjectId, ObjectName, Options, Result, StatusCode,
};

use crate::node::{Node, SearchNode};

/// A thread queued on a semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waiter {
    /// Thread of this node
    Local(ObjectId),
    /// Thread of another node, represented by its proxy
    Proxy(ObjectId),
}

/// Semaphore control block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Semaphore {
    count: u32,
    waiters: VecDeque<Waiter>,
    attributes: Attributes,
}

impl Semaphore {
    fn new(count: u32, attributes: Attributes) -> Self {
        Self {
            count,
            waiters: VecDeque::new(),
            attributes,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    fn forget(&mut self, waiter: Waiter) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|queued| *queued != waiter);
        self.waiters.len() != before
    }
}

/// Semaphore operations carried between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreOp {
    AnnounceCreate { name: u32 },
    AnnounceDelete,
    /// Requester gave up; drop its proxy
    ExtractProxy,
    ObtainRequest { options: u32 },
    ObtainResponse,
    ReleaseRequest,
    ReleaseResponse,
}

impl Operation for SemaphoreOp {
    const CLASS: PacketClass = PacketClass::Semaphore;

    fn code(&self) -> u32 {
        match self {
            Self::AnnounceCreate { .. } => 0,
            Self::AnnounceDelete => 1,
            Self::ExtractProxy => 2,
            Self::ObtainRequest { .. } => 3,
            Self::ObtainResponse => 4,
            Self::ReleaseRequest => 5,
            Self::ReleaseResponse => 6,
        }
    }

    fn encode_payload(&self, writer: &mut PayloadWriter<'_>) -> core::result::Result<(), PacketError> {
        match *self {
            Self::AnnounceCreate { name } => writer.word(name),
            Self::ObtainRequest { options } => writer.word(options),
            Self::AnnounceDelete
            | Self::ExtractProxy
            | Self::ObtainResponse
            | Self::ReleaseRequest
            | Self::ReleaseResponse => Ok(()),
        }
    }

    fn decode(code: u32, reader: &mut PayloadReader<'_>) -> core::result::Result<Self, PacketError> {
        Ok(match code {
            0 => Self::AnnounceCreate { name: reader.word()? },
            1 => Self::AnnounceDelete,
            2 => Self::ExtractProxy,
            3 => Self::ObtainRequest { options: reader.word()? },
            4 => Self::ObtainResponse,
            5 => Self::ReleaseRequest,
            6 => Self::ReleaseResponse,
            code => return Err(PacketError::UnknownOperation { class: Self::CLASS, code }),
        })
    }
}

/// Who a release hands its unit to
enum Grant {
    Local(ObjectId),
    /// Remote waiter and the packet that carries its answer
    Proxy(Proxy, PooledPacket),
}

/// Result of an obtain attempt that may queue
enum Attempt {
    Obtained,
    Queued,
}

/// Semaphore directives of one node
pub struct SemaphoreManager<'a> {
    node: &'a Node,
}

impl<'a> SemaphoreManager<'a> {
    pub(crate) fn new(node: &'a Node) -> Self {
        Self { node }
    }

    /// Create a semaphore holding `count` units
    pub fn create(&self, name: ObjectName, count: u32, attributes: Attributes) -> Result<ObjectId> {
        let semaphore = Semaphore::new(count, attributes);
        let (id, global_name) = self
            .node
            .create_object(&self.node.semaphores, name, attributes, semaphore)?;

        if let Some(name) = global_name {
            self.node.announce(id, &SemaphoreOp::AnnounceCreate { name });
        }
        log::debug!("node {}: semaphore {} with {} units", self.node.id(), id, count);
        Ok(id)
    }

    /// Delete a local semaphore
    ///
    /// Every queued thread, local or remote, is released with
    /// `ObjectWasDeleted`.
    ///
    /// # Errors
    /// `NoMemory` if there are not enough free packets to answer every
    /// remote waiter; the semaphore is left as it was
    pub fn delete(&self, id: ObjectId) -> Result<()> {
        // One answer packet per remote waiter, taken before anything changes
        let mut answers = Vec::new();
        let (semaphore, global) = self.node.delete_object(&self.node.semaphores, id, |semaphore| {
            let remote = semaphore
                .waiters
                .iter()
                .filter(|waiter| matches!(waiter, Waiter::Proxy(_)))
                .count();
            if remote > 0 {
                let mpci = self.node.mpci_or_err()?;
                for _ in 0..remote {
                    answers.push(mpci.get_packet()?);
                }
            }
            Ok(())
        })?;

        for waiter in semaphore.waiters {
            match waiter {
                Waiter::Local(thread) => {
                    let outcome = Outcome::Extracted(StatusCode::ObjectWasDeleted);
                    if self.node.waits().complete(thread, LOCAL_WAIT, outcome) {
                        self.node.scheduler().unblock(thread);
                    }
                }
                Waiter::Proxy(remote_tid) => {
                    let proxy = self.take_proxy(remote_tid);
                    if let (Some(proxy), Some(packet)) = (proxy, answers.pop()) {
                        self.node.answer_proxy(
                            packet,
                            &proxy,
                            Err(StatusCode::ObjectWasDeleted),
                            &SemaphoreOp::ObtainResponse,
                        );
                    }
                }
            }
        }

        if global {
            self.node.announce(id, &SemaphoreOp::AnnounceDelete);
        }
        Ok(())
    }

    /// Find a semaphore by name
    pub fn ident(&self, name: &ObjectName, search: SearchNode) -> Result<ObjectId> {
        self.node.ident(&self.node.semaphores, ObjectClass::SEMAPHORES, name, search)
    }

    /// Take a unit, waiting up to `timeout` unless `options` say not to
    ///
    /// # Errors
    /// * `Unsatisfied` - no unit and `NO_WAIT` given
    /// * `Timeout` - no unit within `timeout`
    /// * `ObjectWasDeleted` - the semaphore went away while waiting
    pub fn obtain(&self, id: ObjectId, options: Options, timeout: Timeout) -> Result<()> {
        match self.node.locate(&self.node.semaphores, id) {
            Location::Local(()) => self.obtain_local(id, options, timeout),
            Location::Remote(owner) => self.obtain_remote(owner, id, options, timeout),
            Location::Invalid => Err(StatusCode::InvalidId),
        }
    }

    /// Give a unit back, waking the first waiter if there is one
    ///
    /// # Errors
    /// * `Unsatisfied` - the count would overflow
    /// * `NoMemory` - a remote thread is next and no packet is free to
    ///   answer it; nothing changes
    pub fn release(&self, id: ObjectId) -> Result<()> {
        match self.node.locate(&self.node.semaphores, id) {
            Location::Local(()) => self.release_local(id),
            Location::Remote(owner) => self
                .node
                .request(owner, id, &SemaphoreOp::ReleaseRequest, self.node.remote_timeout())
                .map(|_| ()),
            Location::Invalid => Err(StatusCode::InvalidId),
        }
    }

    /// Units held by a local semaphore
    pub fn count(&self, id: ObjectId) -> Result<u32> {
        let _guard = self.node.disable_dispatch();
        let count = self.node.semaphores.lock().get(id).local()?.count();
        Ok(count)
    }

    /// Threads queued on a local semaphore
    pub fn waiting(&self, id: ObjectId) -> Result<usize> {
        let _guard = self.node.disable_dispatch();
        let waiting = self.node.semaphores.lock().get(id).local()?.waiting();
        Ok(waiting)
    }

    /// Handle a semaphore packet from another node
    pub(crate) fn process_packet(&self, packet: PooledPacket) -> core::result::Result<(), PacketError> {
        let id = packet.id;
        match packet.read_operation::<SemaphoreOp>()? {
            SemaphoreOp::AnnounceCreate { name } => self.node.open_announced(id, name),
            SemaphoreOp::AnnounceDelete => self.node.close_announced(id),
            SemaphoreOp::ExtractProxy => {
                if let Some(proxy) = self.take_proxy(packet.source_tid) {
                    self.forget_proxy(&proxy);
                    log::debug!("node {}: extracted proxy of {}", self.node.id(), proxy.remote_tid);
                }
            }
            SemaphoreOp::ObtainRequest { options } => {
                let options = Options::from_bits_truncate(options);
                match self.obtain_for_proxy(id, packet.source_tid, packet.sequence, options) {
                    Ok(Attempt::Obtained) => {
                        self.node.respond(packet, Ok(()), &SemaphoreOp::ObtainResponse)
                    }
                    // Answered by a later release or delete
                    Ok(Attempt::Queued) => {}
                    Err(status) => {
                        self.node.respond(packet, Err(status), &SemaphoreOp::ObtainResponse)
                    }
                }
            }
            SemaphoreOp::ReleaseRequest => {
                let result = self.release_local(id);
                self.node.respond(packet, result, &SemaphoreOp::ReleaseResponse);
            }
            SemaphoreOp::ObtainResponse | SemaphoreOp::ReleaseResponse => {
                self.node.process_response(packet)
            }
        }
        Ok(())
    }

    /// Drop the queue entry of a proxy that no longer waits
    pub(crate) fn forget_proxy(&self, proxy: &Proxy) {
        let _guard = self.node.disable_dispatch();
        let mut semaphores = self.node.semaphores.lock();
        if let Location::Local(semaphore) = semaphores.get_mut(proxy.object) {
            semaphore.forget(Waiter::Proxy(proxy.remote_tid));
        }
    }

    fn obtain_local(&self, id: ObjectId, options: Options, timeout: Timeout) -> Result<()> {
        let thread = self.node.executing();
        {
            let _guard = self.node.disable_dispatch();
            let mut semaphores = self.node.semaphores.lock();
            let semaphore = local(semaphores.get_mut(id))?;
            if semaphore.count > 0 {
                semaphore.count -= 1;
                return Ok(());
            }
            if options.contains(Options::NO_WAIT) {
                return Err(StatusCode::Unsatisfied);
            }
            self.node.waits().begin(thread, LOCAL_WAIT)?;
            semaphore.waiters.push_back(Waiter::Local(thread));
        }

        let outcome = self
            .node
            .waits()
            .block_until_complete(self.node.scheduler(), thread, timeout);
        match outcome {
            Outcome::Granted => Ok(()),
            Outcome::TimedOut => {
                let _guard = self.node.disable_dispatch();
                if let Location::Local(semaphore) = self.node.semaphores.lock().get_mut(id) {
                    semaphore.forget(Waiter::Local(thread));
                }
                Err(StatusCode::Timeout)
            }
            Outcome::Extracted(status) => Err(status),
            Outcome::Responded(_) => Err(StatusCode::InternalError),
        }
    }

    fn obtain_remote(
        &self,
        owner: NodeId,
        id: ObjectId,
        options: Options,
        timeout: Timeout,
    ) -> Result<()> {
        let timeout = if options.contains(Options::NO_WAIT) {
            self.node.remote_timeout()
        } else {
            timeout
        };
        let request = SemaphoreOp::ObtainRequest {
            options: options.bits(),
        };

        match self.node.request(owner, id, &request, timeout) {
            Err(StatusCode::Timeout) => {
                let mpci = self.node.mpci_or_err()?;
                let extract = SemaphoreOp::ExtractProxy;
                if let Err(status) = self.node.notify(mpci, Destination::Node(owner), id, &extract) {
                    log::warn!("node {}: proxy extraction for {} not sent: {}", self.node.id(), id, status);
                }
                Err(StatusCode::Timeout)
            }
            result => result.map(|_| ()),
        }
    }

    /// Obtain on behalf of a remote thread, queueing a proxy if it must wait
    fn obtain_for_proxy(
        &self,
        id: ObjectId,
        remote_tid: ObjectId,
        sequence: u32,
        options: Options,
    ) -> Result<Attempt> {
        let mpci = self.node.mpci_or_err()?;
        let _guard = self.node.disable_dispatch();
        let mut semaphores = self.node.semaphores.lock();
        let semaphore = local(semaphores.get_mut(id))?;
        if semaphore.count > 0 {
            semaphore.count -= 1;
            return Ok(Attempt::Obtained);
        }
        if options.contains(Options::NO_WAIT) {
            return Err(StatusCode::Unsatisfied);
        }

        mpci.proxies().lock().insert(Proxy {
            remote_tid,
            object: id,
            sequence,
            class: PacketClass::Semaphore,
        })?;
        semaphore.waiters.push_back(Waiter::Proxy(remote_tid));
        Ok(Attempt::Queued)
    }

    /// Hand a unit to the first live waiter, or add it to the count
    ///
    /// # Errors
    /// `NoMemory` if a remote waiter is next and no packet is free to answer
    /// it; the waiter stays queued and the count is unchanged
    fn release_local(&self, id: ObjectId) -> Result<()> {
        let grant = {
            let _guard = self.node.disable_dispatch();
            let mut semaphores = self.node.semaphores.lock();
            let semaphore = local(semaphores.get_mut(id))?;
            loop {
                match semaphore.waiters.front().copied() {
                    None => {
                        semaphore.count = semaphore.count.checked_add(1).ok_or(StatusCode::Unsatisfied)?;
                        break None;
                    }
                    Some(Waiter::Local(thread)) => {
                        semaphore.waiters.pop_front();
                        if self.node.waits().complete(thread, LOCAL_WAIT, Outcome::Granted) {
                            break Some(Grant::Local(thread));
                        }
                    }
                    Some(Waiter::Proxy(remote_tid)) => {
                        let Some(mpci) = self.node.mpci() else {
                            semaphore.waiters.pop_front();
                            continue;
                        };
                        if mpci.proxies().lock().get(remote_tid).is_none() {
                            semaphore.waiters.pop_front();
                            continue;
                        }
                        let packet = mpci.get_packet()?;
                        semaphore.waiters.pop_front();
                        if let Some(proxy) = mpci.proxies().lock().take(remote_tid) {
                            break Some(Grant::Proxy(proxy, packet));
                        }
                    }
                }
            }
        };

        match grant {
            Some(Grant::Local(thread)) => self.node.scheduler().unblock(thread),
            Some(Grant::Proxy(proxy, packet)) => {
                self.node
                    .answer_proxy(packet, &proxy, Ok(()), &SemaphoreOp::ObtainResponse)
            }
            None => {}
        }
        Ok(())
    }

    fn take_proxy(&self, remote_tid: ObjectId) -> Option<Proxy> {
        self.node.mpci()?.proxies().lock().take(remote_tid)
    }
}

/// A semaphore this node must own
fn local<T>(location: Location<T>) -> Result<T> {
    match location {
        Location::Local(semaphore) => Ok(semaphore),
        Location::Remote(_) | Location::Invalid => Err(StatusCode::InvalidId),
    }
}
