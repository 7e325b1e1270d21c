//! Packet Buffer Pool
//!
//! Every packet a node sends or receives lives in one of a fixed number of
//! buffers allocated at bring-up. A buffer is handed out as a
//! [`PooledPacket`] and goes back to the pool when that handle drops, so a
//! packet cannot leak on an error path or be returned twice.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use spin::Mutex;
use tandem_objects::fatal::{self, InternalError};
use tandem_objects::status::{Result, StatusCode};

use crate::packet::Packet;

/// Fixed set of packet buffers
pub struct PacketPool {
    free: Mutex<Vec<Box<Packet>>>,
    capacity: usize,
}

impl PacketPool {
    /// Allocate `capacity` packet buffers
    pub fn new(capacity: usize) -> Arc<Self> {
        let free = (0..capacity).map(|_| Box::new(Packet::new())).collect();
        Arc::new(Self {
            free: Mutex::new(free),
            capacity,
        })
    }

    /// Take a cleared packet
    ///
    /// # Errors
    /// `NoMemory` when every buffer is in use
    pub fn get(self: &Arc<Self>) -> Result<PooledPacket> {
        let mut packet = self.free.lock().pop().ok_or(StatusCode::NoMemory)?;
        packet.reset();
        Ok(PooledPacket {
            packet: ManuallyDrop::new(packet),
            pool: Arc::clone(self),
        })
    }

    /// Buffers currently free
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn put(&self, packet: Box<Packet>) {
        let mut free = self.free.lock();
        if free.len() >= self.capacity {
            drop(free);
            fatal::terminate(InternalError::PacketPoolCorrupted);
        }
        free.push(packet);
    }
}

/// A packet on loan from a [`PacketPool`]
pub struct PooledPacket {
    packet: ManuallyDrop<Box<Packet>>,
    pool: Arc<PacketPool>,
}

impl Deref for PooledPacket {
    type Target = Packet;

    fn deref(&self) -> &Packet {
        &self.packet
    }
}

impl DerefMut for PooledPacket {
    fn deref_mut(&mut self) -> &mut Packet {
        &mut self.packet
    }
}

impl Drop for PooledPacket {
    fn drop(&mut self) {
        // SAFETY: `packet` is never touched again after this point
        let packet = unsafe { ManuallyDrop::take(&mut self.packet) };
        self.pool.put(packet);
    }
}

impl core::fmt::Debug for PooledPacket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&**self.packet, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_and_return() {
        let pool = PacketPool::new(2);
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.get().err(), Some(StatusCode::NoMemory));

        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), pool.capacity());
    }

    #[test]
    fn test_packets_come_back_cleared() {
        let pool = PacketPool::new(1);
        {
            let mut packet = pool.get().unwrap();
            packet.sequence = 9;
            packet.return_code = 4;
        }
        let packet = pool.get().unwrap();
        assert_eq!(packet.sequence, 0);
        assert_eq!(packet.return_code, 0);
    }

    #[test]
    fn test_returned_on_error_path() {
        fn send_and_fail(pool: &Arc<PacketPool>) -> Result<()> {
            let _packet = pool.get()?;
            Err(StatusCode::InvalidNode)
        }

        let pool = PacketPool::new(1);
        assert_eq!(send_and_fail(&pool), Err(StatusCode::InvalidNode));
        assert_eq!(pool.available(), 1);
    }
}
