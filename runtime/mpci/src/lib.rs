//! Tandem MPCI - Multiprocessor communications for object managers
//!
//! # Purpose
//! Turns directives on objects owned by another node into packets, and
//! keeps a requesting thread blocked until the owner answers, the object
//! goes away, or the request times out.
//!
//! # Integration Points
//! - Depends on: `tandem-objects` for identifiers and status codes
//! - Provides to: the object managers (`tandem-managers`)
//! - Collaborators: a [`Transport`] and a [`Scheduler`] supplied by the board
//!
//! # Architecture
//! Packets come from a fixed [`PacketPool`] and return to it when dropped.
//! A request records an [`OutcomeCell`] for the calling thread in the node's
//! [`ThreadWaits`]; the response, an extraction or the timeout completes it,
//! whichever comes first. The owning node keeps a [`ProxyTable`] entry for
//! every remote thread it makes wait.
//!
//! # Testing Strategy
//! - Unit tests: wire format and byte order, pool accounting, wait states
//! - Simulation tests: request/response, timeouts and late responses over
//!   the `sim` interconnect

#![no_std]

#[cfg(test)]
extern crate std;

extern crate alloc;

pub mod mpci;
pub mod packet;
pub mod pool;
pub mod proxy;
pub mod transport;
pub mod wait;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use mpci::{Mpci, MpciStats};
pub use packet::{
    Operation, Packet, PacketClass, PacketError, PayloadReader, PayloadWriter, MAXIMUM_PACKET_SIZE,
};
pub use pool::{PacketPool, PooledPacket};
pub use proxy::{Proxy, ProxyTable};
pub use transport::{Destination, Scheduler, Timeout, Transport, Wakeup};
pub use wait::{Outcome, OutcomeCell, ThreadWaits, WaitState, LOCAL_WAIT};
