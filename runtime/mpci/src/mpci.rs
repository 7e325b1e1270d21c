//! Multiprocessor Communications Interface
//!
//! [`Mpci`] is the node's endpoint on the interconnect. It hands out packet
//! buffers and sends them in one of three shapes:
//!
//! - **process**: one-way, to a node or to all nodes (announcements)
//! - **request**: to one node, then the calling thread blocks until the
//!   correlated response arrives or the timeout expires
//! - **response**: back to the node of the packet's `source_tid`
//!
//! Incoming frames are converted to host order by [`Mpci::receive`]; the
//! managers decode the operation and hand responses to
//! [`Mpci::process_response`]. This layer knows nothing about objects.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use spin::Mutex;
use tandem_objects::status::{Result, StatusCode};
use tandem_objects::{MpConfiguration, NodeId};

use crate::packet::{Packet, PacketError, MAXIMUM_PACKET_SIZE};
use crate::pool::{PacketPool, PooledPacket};
use crate::proxy::ProxyTable;
use crate::transport::{Destination, Scheduler, Timeout, Transport};
use crate::wait::{Outcome, ThreadWaits};

/// Traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MpciStats {
    pub sent: usize,
    pub received: usize,
    /// Responses that arrived after their wait ended
    pub late_responses: usize,
    /// Requests that gave up waiting
    pub timeouts: usize,
}

/// Interconnect endpoint of one node
pub struct Mpci {
    node: NodeId,
    maximum_nodes: u8,
    default_timeout: Timeout,
    pool: Arc<PacketPool>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    waits: Arc<ThreadWaits>,
    proxies: Mutex<ProxyTable>,
    sequence: AtomicU32,
    sent: AtomicUsize,
    received: AtomicUsize,
    late_responses: AtomicUsize,
    timeouts: AtomicUsize,
}

impl Mpci {
    /// Create the endpoint and its packet pool
    ///
    /// # Arguments
    /// * `config` - Node number, node count and table sizes
    /// * `transport` - Byte-level interconnect
    /// * `scheduler` - Used to block requesters and wake them
    /// * `waits` - Wait table shared with the node's managers
    pub fn new(
        config: &MpConfiguration,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        waits: Arc<ThreadWaits>,
    ) -> Self {
        log::info!(
            "mpci: node {} of {}, {} packets, {} proxies",
            config.node,
            config.maximum_nodes,
            config.maximum_packets,
            config.maximum_proxies
        );

        Self {
            node: config.node,
            maximum_nodes: config.maximum_nodes,
            default_timeout: Timeout::from_wire(config.default_timeout),
            pool: PacketPool::new(config.maximum_packets),
            transport,
            scheduler,
            waits,
            proxies: Mutex::new(ProxyTable::new(config.maximum_proxies)),
            sequence: AtomicU32::new(0),
            sent: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
            late_responses: AtomicUsize::new(0),
            timeouts: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn maximum_nodes(&self) -> u8 {
        self.maximum_nodes
    }

    /// Timeout of requests that do not carry their own
    #[inline]
    pub fn default_timeout(&self) -> Timeout {
        self.default_timeout
    }

    pub fn pool(&self) -> &Arc<PacketPool> {
        &self.pool
    }

    pub fn waits(&self) -> &Arc<ThreadWaits> {
        &self.waits
    }

    /// Owner-side proxies; never hold the lock across a send
    pub fn proxies(&self) -> &Mutex<ProxyTable> {
        &self.proxies
    }

    pub fn stats(&self) -> MpciStats {
        MpciStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            late_responses: self.late_responses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Take a packet buffer
    ///
    /// # Errors
    /// `NoMemory` when the pool is exhausted
    pub fn get_packet(&self) -> Result<PooledPacket> {
        self.pool.get()
    }

    /// Send a packet that expects no answer
    pub fn send_process_packet(&self, destination: Destination, packet: PooledPacket) -> Result<()> {
        self.transmit(destination, &packet)
    }

    /// Send a request and block the executing thread for its response
    ///
    /// The request packet goes back to the pool once sent; the response is
    /// a different packet. `timeout` is copied into the packet for the
    /// owner's information only; expiry is enforced here.
    ///
    /// # Errors
    /// * `Timeout` - no response within `timeout`
    /// * `IncorrectState` - the executing thread is already waiting
    /// * `InvalidNode` - `destination` is not another configured node
    /// * the status an extraction was answered with
    pub fn send_request_packet(
        &self,
        destination: NodeId,
        mut packet: PooledPacket,
        timeout: Timeout,
    ) -> Result<PooledPacket> {
        let thread = self.scheduler.executing();
        let sequence = self.next_sequence();

        packet.source_tid = thread;
        packet.sequence = sequence;
        packet.timeout = timeout.to_wire();

        self.waits.begin(thread, sequence)?;
        if let Err(status) = self.transmit(Destination::Node(destination), &packet) {
            self.waits.finish(thread);
            return Err(status);
        }
        drop(packet);

        match self
            .waits
            .block_until_complete(self.scheduler.as_ref(), thread, timeout)
        {
            Outcome::Responded(response) => Ok(response),
            Outcome::TimedOut => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                log::debug!("mpci: request {} to node {} timed out", sequence, destination);
                Err(StatusCode::Timeout)
            }
            Outcome::Extracted(status) => Err(status),
            Outcome::Granted => Err(StatusCode::InternalError),
        }
    }

    /// Send a response back to the requesting node
    pub fn send_response_packet(&self, packet: PooledPacket) -> Result<()> {
        let node = packet.source_tid.node().ok_or(StatusCode::InvalidNode)?;
        self.transmit(Destination::Node(node), &packet)
    }

    /// Take a frame off the interconnect
    pub fn receive(&self, frame: &[u8]) -> core::result::Result<PooledPacket, PacketError> {
        let mut packet = self.pool.get().map_err(|_| PacketError::PoolExhausted)?;
        packet.load(frame)?;
        self.received.fetch_add(1, Ordering::Relaxed);
        log::debug!("mpci: received {:?}", &*packet);
        Ok(packet)
    }

    /// Deliver a response to the thread waiting for it
    ///
    /// A response nobody waits for any more is dropped, which returns its
    /// buffer to the pool.
    pub fn process_response(&self, packet: PooledPacket) {
        let thread = packet.source_tid;
        let sequence = packet.sequence;

        if self.waits.complete(thread, sequence, Outcome::Responded(packet)) {
            self.scheduler.unblock(thread);
        } else {
            self.late_responses.fetch_add(1, Ordering::Relaxed);
            log::warn!("mpci: discarded late response {} for {}", sequence, thread);
        }
    }

    fn transmit(&self, destination: Destination, packet: &Packet) -> Result<()> {
        if let Destination::Node(node) = destination {
            if node == self.node || node.get() > self.maximum_nodes {
                return Err(StatusCode::InvalidNode);
            }
        }

        let mut buffer = [0u8; MAXIMUM_PACKET_SIZE];
        let frame = packet.encode(&mut buffer);
        self.transport.send(destination, frame)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        log::debug!("mpci: sent {:?} to {:?}", packet, destination);
        Ok(())
    }

    /// Next request number; 0 is kept for local waits
    fn next_sequence(&self) -> u32 {
        loop {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if sequence != crate::wait::LOCAL_WAIT {
                return sequence;
            }
        }
    }
}
