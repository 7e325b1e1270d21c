//! Simulated Interconnect
//!
//! A deterministic, single-threaded stand-in for a multi-node system. All
//! nodes live in one process and share a [`SimWorld`]: a queue of frames in
//! flight, a virtual tick clock and a list of scripted events.
//!
//! Nothing runs on its own. Time passes and frames move only when a thread
//! blocks in [`SimScheduler::block`], or when a test calls
//! [`SimWorld::run_until_idle`] or [`SimWorld::advance`]. A blocked thread
//! drives the world until it is woken: it delivers queued frames, then runs
//! events that fall before its deadline, and finally moves the clock to the
//! deadline and times out.
//!
//! Knobs for failure scenarios:
//! - unresponsive nodes: frames addressed to them are held, not delivered
//! - duplicate delivery: every frame is queued twice
//! - foreign byte order: frames sent by a node are byte-swapped on the wire

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;
use spin::Mutex;
use tandem_objects::status::Result;
use tandem_objects::{NodeId, ObjectClass, ObjectId};

use crate::packet::swap_frame;
use crate::transport::{Destination, Scheduler, Timeout, Transport, Wakeup};

/// Internal thread that runs application code by default
pub const DEFAULT_THREAD_INDEX: u16 = 1;

/// Internal thread that processes received packets
pub const RECEIVE_SERVER_INDEX: u16 = 2;

type Sink = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct Frame {
    from: NodeId,
    to: NodeId,
    bytes: Vec<u8>,
}

struct Attached {
    scheduler: Weak<SimScheduler>,
    sink: Sink,
}

impl Clone for Attached {
    fn clone(&self) -> Self {
        Self {
            scheduler: Weak::clone(&self.scheduler),
            sink: Arc::clone(&self.sink),
        }
    }
}

struct Event {
    at: u64,
    order: u64,
    action: Box<dyn FnOnce() + Send>,
}

/// Shared state of a simulated system
pub struct SimWorld {
    wire: SegQueue<Frame>,
    held: Mutex<Vec<Frame>>,
    clock: AtomicU64,
    woken: Mutex<BTreeSet<ObjectId>>,
    events: Mutex<Vec<Event>>,
    event_order: AtomicU64,
    nodes: Mutex<BTreeMap<NodeId, Attached>>,
    unresponsive: Mutex<BTreeSet<NodeId>>,
    foreign: Mutex<BTreeSet<NodeId>>,
    duplicate: AtomicBool,
    delivered: AtomicUsize,
    dropped: AtomicUsize,
}

impl SimWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            wire: SegQueue::new(),
            held: Mutex::new(Vec::new()),
            clock: AtomicU64::new(0),
            woken: Mutex::new(BTreeSet::new()),
            events: Mutex::new(Vec::new()),
            event_order: AtomicU64::new(0),
            nodes: Mutex::new(BTreeMap::new()),
            unresponsive: Mutex::new(BTreeSet::new()),
            foreign: Mutex::new(BTreeSet::new()),
            duplicate: AtomicBool::new(false),
            delivered: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        })
    }

    /// Transport endpoint for `node`
    pub fn transport(self: &Arc<Self>, node: NodeId) -> Arc<SimTransport> {
        Arc::new(SimTransport {
            world: Arc::clone(self),
            node,
        })
    }

    /// Scheduler for the threads of `node`
    pub fn scheduler(self: &Arc<Self>, node: NodeId) -> Arc<SimScheduler> {
        Arc::new(SimScheduler::new(Arc::clone(self), node))
    }

    /// Connect `node` to the wire
    ///
    /// Frames addressed to the node are passed to `sink`, running as the
    /// node's receive server.
    pub fn attach(
        &self,
        node: NodeId,
        scheduler: &Arc<SimScheduler>,
        sink: impl Fn(&[u8]) + Send + Sync + 'static,
    ) {
        let attached = Attached {
            scheduler: Arc::downgrade(scheduler),
            sink: Arc::new(sink),
        };
        self.nodes.lock().insert(node, attached);
    }

    /// Disconnect `node`; frames to it are dropped from now on
    pub fn detach(&self, node: NodeId) {
        self.nodes.lock().remove(&node);
    }

    /// Current tick
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Hold frames addressed to `node` instead of delivering them
    ///
    /// Clearing the flag puts the held frames back on the wire.
    pub fn set_unresponsive(&self, node: NodeId, unresponsive: bool) {
        if unresponsive {
            self.unresponsive.lock().insert(node);
            return;
        }
        self.unresponsive.lock().remove(&node);

        let mut held = self.held.lock();
        let (release, keep): (Vec<Frame>, Vec<Frame>) =
            held.drain(..).partition(|frame| frame.to == node);
        *held = keep;
        drop(held);
        for frame in release {
            self.wire.push(frame);
        }
    }

    /// Treat `node` as running with the other byte order
    pub fn set_foreign_byte_order(&self, node: NodeId, foreign: bool) {
        let mut nodes = self.foreign.lock();
        if foreign {
            nodes.insert(node);
        } else {
            nodes.remove(&node);
        }
    }

    /// Queue every frame twice
    pub fn set_duplicate_delivery(&self, duplicate: bool) {
        self.duplicate.store(duplicate, Ordering::Release);
    }

    /// Run `action` once `after` ticks have passed
    pub fn schedule(&self, after: u64, action: impl FnOnce() + Send + 'static) {
        let event = Event {
            at: self.now() + after,
            order: self.event_order.fetch_add(1, Ordering::Relaxed),
            action: Box::new(action),
        };
        self.events.lock().push(event);
    }

    /// Deliver frames and run due events until nothing is left to do
    pub fn run_until_idle(&self) {
        while self.step() || self.run_due_event() {}
    }

    /// Let `ticks` ticks pass, running whatever falls inside them
    pub fn advance(&self, ticks: u64) {
        let target = self.now() + ticks;
        loop {
            self.run_until_idle();
            match self.next_event_at() {
                Some(at) if at <= target => self.move_clock(at),
                _ => break,
            }
        }
        self.move_clock(target);
        self.run_until_idle();
    }

    /// Frames delivered so far
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames addressed to no attached node
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames on the wire or held
    pub fn pending(&self) -> usize {
        self.wire.len() + self.held.lock().len()
    }

    fn submit(&self, from: NodeId, destination: Destination, frame: &[u8]) {
        let targets: Vec<NodeId> = match destination {
            Destination::Node(node) => alloc::vec![node],
            Destination::AllNodes => self
                .nodes
                .lock()
                .keys()
                .copied()
                .filter(|node| *node != from)
                .collect(),
        };

        let foreign = self.foreign.lock().contains(&from);
        let copies = if self.duplicate.load(Ordering::Acquire) { 2 } else { 1 };

        for to in targets {
            let mut bytes = frame.to_vec();
            if foreign {
                if let Err(error) = swap_frame(&mut bytes) {
                    log::warn!("sim: cannot swap frame from node {}: {}", from, error);
                }
            }
            for _ in 1..copies {
                self.wire.push(Frame { from, to, bytes: bytes.clone() });
            }
            self.wire.push(Frame { from, to, bytes });
        }
    }

    /// Deliver one frame
    fn step(&self) -> bool {
        let Some(frame) = self.wire.pop() else {
            return false;
        };

        if self.unresponsive.lock().contains(&frame.to) {
            self.held.lock().push(frame);
            return true;
        }

        let attached = self.nodes.lock().get(&frame.to).cloned();
        let target = attached.and_then(|a| a.scheduler.upgrade().map(|s| (s, a.sink)));
        let Some((scheduler, sink)) = target else {
            log::debug!("sim: dropped frame from node {} to node {}", frame.from, frame.to);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return true;
        };

        let previous = scheduler.set_executing(scheduler.receive_server());
        sink(&frame.bytes);
        scheduler.set_executing(previous);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn next_event_at(&self) -> Option<u64> {
        self.events.lock().iter().map(|event| event.at).min()
    }

    fn run_due_event(&self) -> bool {
        let now = self.now();
        let event = {
            let mut events = self.events.lock();
            let due = events
                .iter()
                .enumerate()
                .filter(|(_, event)| event.at <= now)
                .min_by_key(|(_, event)| (event.at, event.order))
                .map(|(index, _)| index);
            due.map(|index| events.swap_remove(index))
        };

        match event {
            Some(event) => {
                (event.action)();
                true
            }
            None => false,
        }
    }

    fn move_clock(&self, tick: u64) {
        self.clock.fetch_max(tick, Ordering::AcqRel);
    }

    fn wake(&self, thread: ObjectId) {
        self.woken.lock().insert(thread);
    }

    fn take_woken(&self, thread: ObjectId) -> bool {
        self.woken.lock().remove(&thread)
    }
}

/// Transport endpoint of one simulated node
pub struct SimTransport {
    world: Arc<SimWorld>,
    node: NodeId,
}

impl Transport for SimTransport {
    fn send(&self, destination: Destination, frame: &[u8]) -> Result<()> {
        self.world.submit(self.node, destination, frame);
        Ok(())
    }
}

/// Scheduler of one simulated node
///
/// Tracks which thread is executing and records the suspend and priority
/// hooks so tests can observe them.
pub struct SimScheduler {
    world: Arc<SimWorld>,
    executing: Mutex<ObjectId>,
    receive_server: ObjectId,
    suspended: Mutex<BTreeSet<ObjectId>>,
    priorities: Mutex<BTreeMap<ObjectId, u32>>,
}

impl SimScheduler {
    fn new(world: Arc<SimWorld>, node: NodeId) -> Self {
        Self {
            world,
            executing: Mutex::new(ObjectId::new(
                ObjectClass::INTERNAL_THREADS,
                node,
                DEFAULT_THREAD_INDEX,
            )),
            receive_server: ObjectId::new(ObjectClass::INTERNAL_THREADS, node, RECEIVE_SERVER_INDEX),
            suspended: Mutex::new(BTreeSet::new()),
            priorities: Mutex::new(BTreeMap::new()),
        }
    }

    /// Thread that processes received packets
    pub fn receive_server(&self) -> ObjectId {
        self.receive_server
    }

    /// Make `thread` the executing thread
    ///
    /// # Returns
    /// The previously executing thread
    pub fn set_executing(&self, thread: ObjectId) -> ObjectId {
        core::mem::replace(&mut *self.executing.lock(), thread)
    }

    /// Run `f` as `thread`
    pub fn run_as<R>(&self, thread: ObjectId, f: impl FnOnce() -> R) -> R {
        let previous = self.set_executing(thread);
        let result = f();
        self.set_executing(previous);
        result
    }

    pub fn is_suspended(&self, thread: ObjectId) -> bool {
        self.suspended.lock().contains(&thread)
    }

    /// Last priority set through the hook
    pub fn priority_of(&self, thread: ObjectId) -> Option<u32> {
        self.priorities.lock().get(&thread).copied()
    }
}

impl Scheduler for SimScheduler {
    fn executing(&self) -> ObjectId {
        *self.executing.lock()
    }

    fn block(&self, thread: ObjectId, timeout: Timeout) -> Wakeup {
        let world = &self.world;
        let deadline = match timeout {
            Timeout::Forever => None,
            Timeout::Ticks(ticks) => Some(world.now() + u64::from(ticks.get())),
        };

        loop {
            if world.take_woken(thread) {
                return Wakeup::Woken;
            }
            if world.step() {
                continue;
            }
            match world.next_event_at() {
                Some(at) if deadline.map_or(true, |deadline| at <= deadline) => {
                    world.move_clock(at);
                    world.run_due_event();
                    continue;
                }
                _ => {}
            }
            match deadline {
                Some(deadline) => {
                    world.move_clock(deadline);
                    return Wakeup::TimedOut;
                }
                None => panic!("sim: {} blocked forever with nothing left to run", thread),
            }
        }
    }

    fn unblock(&self, thread: ObjectId) {
        self.world.wake(thread);
    }

    fn suspend(&self, thread: ObjectId) {
        self.suspended.lock().insert(thread);
    }

    fn resume(&self, thread: ObjectId) {
        self.suspended.lock().remove(&thread);
    }

    fn set_priority(&self, thread: ObjectId, priority: u32) {
        self.priorities.lock().insert(thread, priority);
    }
}
