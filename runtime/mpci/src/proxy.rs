//! Owner-Side Proxies
//!
//! When a request from another node has to wait for a local object (a
//! semaphore with no units left), the owning node records a proxy for the
//! remote thread instead of answering. The object's wait queue refers to the
//! proxy by the remote thread's identifier; whoever satisfies or deletes the
//! object takes the proxy out of the table and answers through it.
//!
//! Taking a proxy removes it, so a remote thread receives at most one
//! answer for one proxy.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use tandem_objects::status::{Result, StatusCode};
use tandem_objects::{NodeId, ObjectId};

use crate::packet::PacketClass;

/// A remote thread blocked on a local object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proxy {
    /// Thread on the requesting node
    pub remote_tid: ObjectId,
    /// Local object the thread waits for
    pub object: ObjectId,
    /// Sequence of the request, echoed in the answer
    pub sequence: u32,
    /// Manager that created the proxy
    pub class: PacketClass,
}

impl Proxy {
    /// Node the remote thread runs on
    pub fn node(&self) -> Option<NodeId> {
        self.remote_tid.node()
    }
}

/// Proxies of remote threads, keyed by thread
pub struct ProxyTable {
    proxies: BTreeMap<ObjectId, Proxy>,
    capacity: usize,
}

impl ProxyTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            proxies: BTreeMap::new(),
            capacity,
        }
    }

    /// Record a proxy
    ///
    /// # Errors
    /// * `NoMemory` - table full
    /// * `IncorrectState` - the remote thread already has a proxy here
    pub fn insert(&mut self, proxy: Proxy) -> Result<()> {
        if self.proxies.contains_key(&proxy.remote_tid) {
            return Err(StatusCode::IncorrectState);
        }
        if self.proxies.len() >= self.capacity {
            return Err(StatusCode::NoMemory);
        }
        log::debug!("proxy: {} waits on {}", proxy.remote_tid, proxy.object);
        self.proxies.insert(proxy.remote_tid, proxy);
        Ok(())
    }

    /// Remove and return the proxy of `remote_tid`
    pub fn take(&mut self, remote_tid: ObjectId) -> Option<Proxy> {
        self.proxies.remove(&remote_tid)
    }

    pub fn get(&self, remote_tid: ObjectId) -> Option<&Proxy> {
        self.proxies.get(&remote_tid)
    }

    /// Remove every proxy whose thread runs on `node`
    pub fn remove_node(&mut self, node: NodeId) -> Vec<Proxy> {
        let gone: Vec<Proxy> = self
            .proxies
            .values()
            .filter(|proxy| proxy.node() == Some(node))
            .copied()
            .collect();
        for proxy in &gone {
            self.proxies.remove(&proxy.remote_tid);
        }
        gone
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_objects::ObjectClass;

    fn proxy(node: u8, index: u16) -> Proxy {
        Proxy {
            remote_tid: ObjectId::new(ObjectClass::TASKS, NodeId::new(node).unwrap(), index),
            object: ObjectId::new(ObjectClass::SEMAPHORES, NodeId::FIRST, 1),
            sequence: u32::from(index),
            class: PacketClass::Semaphore,
        }
    }

    #[test]
    fn test_take_is_exactly_once() {
        let mut table = ProxyTable::new(2);
        let p = proxy(2, 1);
        table.insert(p).unwrap();
        assert_eq!(table.insert(p), Err(StatusCode::IncorrectState));

        assert_eq!(table.take(p.remote_tid), Some(p));
        assert_eq!(table.take(p.remote_tid), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_capacity() {
        let mut table = ProxyTable::new(1);
        table.insert(proxy(2, 1)).unwrap();
        assert_eq!(table.insert(proxy(2, 2)), Err(StatusCode::NoMemory));
    }

    #[test]
    fn test_remove_node() {
        let mut table = ProxyTable::new(4);
        table.insert(proxy(2, 1)).unwrap();
        table.insert(proxy(2, 2)).unwrap();
        table.insert(proxy(3, 1)).unwrap();

        let gone = table.remove_node(NodeId::new(2).unwrap());
        assert_eq!(gone.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.get(proxy(3, 1).remote_tid).is_some());
    }
}
