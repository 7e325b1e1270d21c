//! Node
//!
//! A [`Node`] holds everything one node of the system owns: the class
//! registries of the managers, the global directory, the MPCI endpoint and
//! the dispatch state that serializes changes to all of them.
//!
//! Manager directives are reached through short-lived views
//! (`node.tasks()`, `node.partitions()`, `node.semaphores()`); packets from
//! other nodes enter through [`Node::receive_packet`].
//!
//! ## Locking Rules
//!
//! Tables are changed with dispatching disabled and their lock held. Both are
//! released before anything that can give up the processor: sending a
//! packet, blocking a thread, or answering a proxy.

use alloc::sync::Arc;

use spin::Mutex;
use tandem_mpci::{
    Destination, Mpci, Operation, PacketClass, PacketError, PooledPacket, Proxy, Scheduler,
    ThreadWaits, Timeout, Transport,
};
use tandem_objects::{
    Attributes, ClassConfig, ClassRegistry, ConfigError, DispatchGuard, GlobalDirectory,
    GlobalEntry, Location, MpConfiguration, NodeId, ObjectClass, ObjectId, ObjectName, Result,
    StatusCode, ThreadDispatch,
};

use crate::partition::{Partition, PartitionManager};
use crate::semaphore::{Semaphore, SemaphoreManager};
use crate::task::{Task, TaskManager};

/// Where `ident` looks for a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchNode {
    /// This node first, then the global objects of every node
    AllNodes,
    /// Only objects of this node
    LocalNode,
    /// Only global objects owned by one node
    Node(NodeId),
}

/// Configuration of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeConfig {
    pub mp: MpConfiguration,
    pub tasks: ClassConfig,
    pub partitions: ClassConfig,
    pub semaphores: ClassConfig,
}

impl NodeConfig {
    /// A stand-alone node with small fixed tables
    pub const fn single_node() -> Self {
        Self {
            mp: MpConfiguration::single_node(),
            tasks: ClassConfig::fixed(16),
            partitions: ClassConfig::fixed(8),
            semaphores: ClassConfig::fixed(16),
        }
    }

    /// Node `node` of `maximum_nodes`, with small fixed tables
    pub const fn multiprocessing(node: NodeId, maximum_nodes: u8) -> Self {
        Self {
            mp: MpConfiguration::multiprocessing(node, maximum_nodes),
            ..Self::single_node()
        }
    }

    pub const fn with_mp(mut self, mp: MpConfiguration) -> Self {
        self.mp = mp;
        self
    }

    pub const fn with_tasks(mut self, tasks: ClassConfig) -> Self {
        self.tasks = tasks;
        self
    }

    pub const fn with_partitions(mut self, partitions: ClassConfig) -> Self {
        self.partitions = partitions;
        self
    }

    pub const fn with_semaphores(mut self, semaphores: ClassConfig) -> Self {
        self.semaphores = semaphores;
        self
    }

    pub fn validate(&self) -> core::result::Result<(), ConfigError> {
        self.mp.validate()?;
        self.tasks.validate()?;
        self.partitions.validate()?;
        self.semaphores.validate()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::single_node()
    }
}

/// One node of the system
pub struct Node {
    config: NodeConfig,
    dispatch: ThreadDispatch,
    scheduler: Arc<dyn Scheduler>,
    waits: Arc<ThreadWaits>,
    mpci: Option<Mpci>,
    directory: Mutex<GlobalDirectory>,
    pub(crate) tasks: Mutex<ClassRegistry<Task>>,
    pub(crate) partitions: Mutex<ClassRegistry<Partition>>,
    pub(crate) semaphores: Mutex<ClassRegistry<Semaphore>>,
}

impl Node {
    /// Bring up a node
    ///
    /// # Arguments
    /// * `config` - Node and table configuration
    /// * `scheduler` - Thread services of this node
    /// * `transport` - Interconnect; required when more than one node is
    ///   configured, ignored otherwise
    ///
    /// # Errors
    /// The configuration error, or `NoTransport` for a multiprocessing node
    /// without a transport
    pub fn new(
        config: NodeConfig,
        scheduler: Arc<dyn Scheduler>,
        transport: Option<Arc<dyn Transport>>,
    ) -> core::result::Result<Self, ConfigError> {
        config.validate()?;

        let mp = &config.mp;
        let waits = Arc::new(ThreadWaits::new());
        let mpci = if mp.is_multiprocessing() {
            let transport = transport.ok_or(ConfigError::NoTransport)?;
            Some(Mpci::new(mp, transport, Arc::clone(&scheduler), Arc::clone(&waits)))
        } else {
            None
        };

        let tasks = ClassRegistry::new(ObjectClass::TASKS, mp.node, mp.maximum_nodes, config.tasks)?;
        let partitions =
            ClassRegistry::new(ObjectClass::PARTITIONS, mp.node, mp.maximum_nodes, config.partitions)?;
        let semaphores =
            ClassRegistry::new(ObjectClass::SEMAPHORES, mp.node, mp.maximum_nodes, config.semaphores)?;
        let directory = GlobalDirectory::new(mp.maximum_global_objects);

        log::info!(
            "node {}: up ({} of {} nodes)",
            mp.node,
            if mpci.is_some() { "multiprocessing" } else { "single" },
            mp.maximum_nodes
        );

        Ok(Self {
            config,
            dispatch: ThreadDispatch::new(),
            scheduler,
            waits,
            mpci,
            directory: Mutex::new(directory),
            tasks: Mutex::new(tasks),
            partitions: Mutex::new(partitions),
            semaphores: Mutex::new(semaphores),
        })
    }

    /// This node's number
    #[inline]
    pub fn id(&self) -> NodeId {
        self.config.mp.node
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn is_multiprocessing(&self) -> bool {
        self.mpci.is_some()
    }

    /// Interconnect endpoint, if multiprocessing
    pub fn mpci(&self) -> Option<&Mpci> {
        self.mpci.as_ref()
    }

    pub fn waits(&self) -> &Arc<ThreadWaits> {
        &self.waits
    }

    pub fn tasks(&self) -> TaskManager<'_> {
        TaskManager::new(self)
    }

    pub fn partitions(&self) -> PartitionManager<'_> {
        PartitionManager::new(self)
    }

    pub fn semaphores(&self) -> SemaphoreManager<'_> {
        SemaphoreManager::new(self)
    }

    /// Directory entry of a global object
    pub fn global_object(&self, id: ObjectId) -> Option<GlobalEntry> {
        self.directory.lock().find_by_id(id).copied()
    }

    /// Number of global objects known to this node
    pub fn global_count(&self) -> usize {
        self.directory.lock().len()
    }

    /// Handle a frame from the interconnect
    ///
    /// Runs on the receive server. Requests are answered before this
    /// returns; responses wake the thread waiting for them.
    pub fn receive_packet(&self, frame: &[u8]) -> core::result::Result<(), PacketError> {
        let Some(mpci) = &self.mpci else {
            log::warn!("node {}: packet received without multiprocessing", self.id());
            return Ok(());
        };

        let packet = mpci.receive(frame).map_err(|error| {
            log::warn!("node {}: dropped frame: {}", self.id(), error);
            error
        })?;

        let result = match packet.class {
            PacketClass::Tasks => self.tasks().process_packet(packet),
            PacketClass::Partition => self.partitions().process_packet(packet),
            PacketClass::Semaphore => self.semaphores().process_packet(packet),
            other => Err(PacketError::UnknownClass(other as u32)),
        };
        if let Err(error) = &result {
            log::warn!("node {}: dropped packet: {}", self.id(), error);
        }
        result
    }

    /// Forget everything that belongs to a node that left the system
    ///
    /// Its global objects leave the directory and its threads stop waiting
    /// on local objects. Local threads waiting for that node's answers are
    /// released by their timeouts.
    pub fn node_disconnected(&self, node: NodeId) {
        if node == self.id() {
            return;
        }
        let Some(mpci) = &self.mpci else {
            return;
        };

        let proxies = {
            let _guard = self.disable_dispatch();
            self.directory.lock().remove_node(node);
            mpci.proxies().lock().remove_node(node)
        };

        for proxy in proxies {
            match proxy.class {
                PacketClass::Semaphore => self.semaphores().forget_proxy(&proxy),
                other => log::warn!("node {}: proxy of unexpected class {:?}", self.id(), other),
            }
        }
        log::info!("node {}: node {} disconnected", self.id(), node);
    }

    // ========================================================================
    // Services shared by the managers
    // ========================================================================

    pub(crate) fn executing(&self) -> ObjectId {
        self.scheduler.executing()
    }

    pub(crate) fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub(crate) fn disable_dispatch(&self) -> DispatchGuard<'_> {
        self.dispatch.disable(self.scheduler.executing())
    }

    pub(crate) fn mpci_or_err(&self) -> Result<&Mpci> {
        self.mpci.as_ref().ok_or(StatusCode::MpNotConfigured)
    }

    /// Timeout of remote directives that do not wait on a resource
    pub(crate) fn remote_timeout(&self) -> Timeout {
        self.mpci
            .as_ref()
            .map_or(Timeout::Forever, |mpci| mpci.default_timeout())
    }

    /// Allocate `object` in `registry`, registering it globally if asked
    ///
    /// # Returns
    /// The identifier and, for a global object, the word name to announce
    pub(crate) fn create_object<T>(
        &self,
        registry: &Mutex<ClassRegistry<T>>,
        name: ObjectName,
        attributes: Attributes,
        object: T,
    ) -> Result<(ObjectId, Option<u32>)> {
        let global_name = if attributes.is_global() {
            if !self.is_multiprocessing() {
                return Err(StatusCode::MpNotConfigured);
            }
            Some(name.as_word().ok_or(StatusCode::InvalidName)?)
        } else {
            None
        };

        let _guard = self.disable_dispatch();
        let mut registry = registry.lock();
        let slot = registry.allocate(name, object)?;

        if let Some(word) = global_name {
            let entry = GlobalEntry::new(slot.id(), word, self.id());
            if let Err(status) = self.directory.lock().insert(entry) {
                registry.free(slot)?;
                return Err(status);
            }
        }
        Ok((slot.id(), global_name))
    }

    /// Free a local object after `check` accepts it
    ///
    /// # Returns
    /// The object and whether it was global
    ///
    /// # Errors
    /// * `IllegalOnRemoteObject` - the object lives on another node
    /// * `InvalidId` - no such object
    /// * whatever `check` reports
    pub(crate) fn delete_object<T>(
        &self,
        registry: &Mutex<ClassRegistry<T>>,
        id: ObjectId,
        check: impl FnOnce(&T) -> Result<()>,
    ) -> Result<(T, bool)> {
        let _guard = self.disable_dispatch();
        let mut registry = registry.lock();
        check(registry.get(id).local()?)?;

        let (_, object) = registry.free_id(id)?;
        let global = self.directory.lock().remove(id).is_some();
        Ok((object, global))
    }

    /// Classify `id` against `registry` without holding on to the object
    pub(crate) fn locate<T>(&self, registry: &Mutex<ClassRegistry<T>>, id: ObjectId) -> Location<()> {
        match registry.lock().get(id) {
            Location::Local(_) => Location::Local(()),
            Location::Remote(node) => Location::Remote(node),
            Location::Invalid => Location::Invalid,
        }
    }

    /// Resolve a name to an identifier
    pub(crate) fn ident<T>(
        &self,
        registry: &Mutex<ClassRegistry<T>>,
        class: ObjectClass,
        name: &ObjectName,
        search: SearchNode,
    ) -> Result<ObjectId> {
        if !name.is_valid() {
            return Err(StatusCode::InvalidName);
        }

        let local_only = match search {
            SearchNode::LocalNode => true,
            SearchNode::Node(node) => node == self.id(),
            SearchNode::AllNodes => false,
        };

        let _guard = self.disable_dispatch();
        if local_only || search == SearchNode::AllNodes {
            if let Some(id) = registry.lock().name_to_id(name) {
                return Ok(id);
            }
        }
        if local_only {
            return Err(StatusCode::InvalidName);
        }

        let owner = match search {
            SearchNode::Node(node) if !self.config.mp.is_valid_node(node.get()) => {
                return Err(StatusCode::InvalidNode);
            }
            SearchNode::Node(node) => Some(node),
            _ => None,
        };
        let word = name.as_word().ok_or(StatusCode::InvalidName)?;

        self.directory
            .lock()
            .find_by_name(class, word, owner)
            .map(|entry| entry.id)
            .ok_or(StatusCode::InvalidName)
    }

    /// Record an object another node announced
    pub(crate) fn open_announced(&self, id: ObjectId, name: u32) {
        let Some(owner) = id.node() else {
            log::warn!("node {}: announcement for {} without an owner", self.id(), id);
            return;
        };

        let _guard = self.disable_dispatch();
        if let Err(status) = self
            .directory
            .lock()
            .open_announced(GlobalEntry::new(id, name, owner))
        {
            log::warn!("node {}: announcement for {} rejected: {}", self.id(), id, status);
        }
    }

    /// Drop an object another node deleted
    pub(crate) fn close_announced(&self, id: ObjectId) {
        let _guard = self.disable_dispatch();
        if self.directory.lock().remove(id).is_none() {
            log::debug!("node {}: delete announced for unknown {}", self.id(), id);
        }
    }

    /// Tell every other node about `id`
    pub(crate) fn announce<O: Operation>(&self, id: ObjectId, operation: &O) {
        if let Some(mpci) = &self.mpci {
            if let Err(status) = self.notify(mpci, Destination::AllNodes, id, operation) {
                log::warn!("node {}: announcement for {} not sent: {}", self.id(), id, status);
            }
        }
    }

    /// Send a one-way packet about `id`
    pub(crate) fn notify<O: Operation>(
        &self,
        mpci: &Mpci,
        destination: Destination,
        id: ObjectId,
        operation: &O,
    ) -> Result<()> {
        let mut packet = mpci.get_packet()?;
        packet.id = id;
        packet.source_tid = self.executing();
        packet.write_operation(operation)?;
        mpci.send_process_packet(destination, packet)
    }

    /// Perform `operation` on `id` at its owner and wait for the answer
    ///
    /// # Returns
    /// The response operation, once the owner reported success
    pub(crate) fn request<O: Operation>(
        &self,
        owner: NodeId,
        id: ObjectId,
        operation: &O,
        timeout: Timeout,
    ) -> Result<O> {
        let mpci = self.mpci_or_err()?;
        let mut packet = mpci.get_packet()?;
        packet.id = id;
        packet.write_operation(operation)?;

        let response = mpci.send_request_packet(owner, packet, timeout)?;
        response.status()?;
        Ok(response.read_operation::<O>()?)
    }

    /// Answer a request in the packet it arrived in
    pub(crate) fn respond<O: Operation>(&self, mut packet: PooledPacket, result: Result<()>, operation: &O) {
        let Some(mpci) = &self.mpci else {
            return;
        };
        packet.set_status(result);
        let sent = packet
            .write_operation(operation)
            .map_err(StatusCode::from)
            .and_then(|()| mpci.send_response_packet(packet));
        if let Err(status) = sent {
            log::warn!("node {}: response not sent: {}", self.id(), status);
        }
    }

    /// Answer the remote thread behind `proxy` in `packet`
    ///
    /// The packet is taken from the pool before the proxy leaves its table,
    /// so a proxy is never dropped without its answer.
    pub(crate) fn answer_proxy<O: Operation>(
        &self,
        mut packet: PooledPacket,
        proxy: &Proxy,
        result: Result<()>,
        operation: &O,
    ) {
        packet.id = proxy.object;
        packet.source_tid = proxy.remote_tid;
        packet.sequence = proxy.sequence;
        self.respond(packet, result, operation);
    }

    /// Hand a response to the thread that waits for it
    pub(crate) fn process_response(&self, packet: PooledPacket) {
        if let Some(mpci) = &self.mpci {
            mpci.process_response(packet);
        }
    }
}
