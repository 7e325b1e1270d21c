//! Thread Waits
//!
//! A thread that blocks for a remote response or a local resource owns one
//! [`OutcomeCell`]. Three parties may try to end the wait: the response (or
//! the local grant), the deleter of the object, and the timeout. The cell
//! accepts the first and ignores the rest, so every wait ends exactly once.
//!
//! ## State Machine
//!
//! ```text
//!            begin()                      first try_complete()
//! idle ───────────────► awaiting ───────────────────────────────► satisfied
//!   ▲                                                           │ timed-out
//!   │                       finish()                            │ extracted
//!   └───────────────────────────────────────────────────────────┘
//! ```
//!
//! A thread has at most one wait outstanding. Remote waits are keyed by
//! (thread, sequence): a response whose sequence is not the one the thread
//! is waiting for belongs to a wait that already ended and is discarded.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Mutex;
use tandem_objects::status::{Result, StatusCode};
use tandem_objects::ObjectId;

use crate::pool::PooledPacket;
use crate::transport::{Scheduler, Timeout, Wakeup};

/// Sequence of waits that are not tied to a remote request
pub const LOCAL_WAIT: u32 = 0;

const EMPTY: u8 = 0;
const CLAIMED: u8 = 1;
const READY: u8 = 2;

/// How a wait ended
#[derive(Debug)]
pub enum Outcome {
    /// Remote response arrived
    Responded(PooledPacket),
    /// Local resource handed over
    Granted,
    TimedOut,
    /// Pulled off the object's wait queue
    Extracted(StatusCode),
}

/// Observable state of a thread's wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Idle,
    Awaiting,
    Satisfied,
    TimedOut,
    Extracted,
}

/// Single-assignment slot for an [`Outcome`]
pub struct OutcomeCell {
    sequence: u32,
    state: AtomicU8,
    value: Mutex<Option<Outcome>>,
}

impl OutcomeCell {
    pub fn new(sequence: u32) -> Self {
        Self {
            sequence,
            state: AtomicU8::new(EMPTY),
            value: Mutex::new(None),
        }
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Store `outcome` if nothing was stored before
    ///
    /// # Returns
    /// `false` if the cell was already completed; `outcome` is dropped
    pub fn try_complete(&self, outcome: Outcome) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.value.lock() = Some(outcome);
        self.state.store(READY, Ordering::Release);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.state.load(Ordering::Acquire) != EMPTY
    }

    /// Remove the stored outcome
    pub fn take(&self) -> Option<Outcome> {
        match self.state.load(Ordering::Acquire) {
            EMPTY => None,
            _ => {
                while self.state.load(Ordering::Acquire) == CLAIMED {
                    core::hint::spin_loop();
                }
                self.value.lock().take()
            }
        }
    }

    fn wait_state(&self) -> WaitState {
        if !self.is_complete() {
            return WaitState::Awaiting;
        }
        match &*self.value.lock() {
            Some(Outcome::Responded(_)) | Some(Outcome::Granted) | None => WaitState::Satisfied,
            Some(Outcome::TimedOut) => WaitState::TimedOut,
            Some(Outcome::Extracted(_)) => WaitState::Extracted,
        }
    }
}

/// Outstanding waits of the threads on one node
#[derive(Default)]
pub struct ThreadWaits {
    waits: Mutex<BTreeMap<ObjectId, Arc<OutcomeCell>>>,
}

impl ThreadWaits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a wait for `thread`
    ///
    /// # Errors
    /// `IncorrectState` if the thread is already waiting
    pub fn begin(&self, thread: ObjectId, sequence: u32) -> Result<()> {
        let mut waits = self.waits.lock();
        if waits.contains_key(&thread) {
            return Err(StatusCode::IncorrectState);
        }
        waits.insert(thread, Arc::new(OutcomeCell::new(sequence)));
        Ok(())
    }

    /// End `thread`'s wait with `outcome` if it is the wait numbered
    /// `sequence` and nothing ended it first
    ///
    /// The caller unblocks the thread when this returns `true`.
    pub fn complete(&self, thread: ObjectId, sequence: u32, outcome: Outcome) -> bool {
        let cell = match self.cell(thread) {
            Some(cell) if cell.sequence() == sequence => cell,
            _ => return false,
        };
        cell.try_complete(outcome)
    }

    /// End `thread`'s wait with a timeout whatever its sequence
    pub fn expire(&self, thread: ObjectId) -> bool {
        self.cell(thread)
            .map_or(false, |cell| cell.try_complete(Outcome::TimedOut))
    }

    /// Close `thread`'s wait and collect how it ended
    pub fn finish(&self, thread: ObjectId) -> Option<Outcome> {
        let cell = self.waits.lock().remove(&thread)?;
        cell.take()
    }

    pub fn state(&self, thread: ObjectId) -> WaitState {
        self.cell(thread).map_or(WaitState::Idle, |cell| cell.wait_state())
    }

    /// Number of threads with a wait open
    pub fn len(&self) -> usize {
        self.waits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block `thread` until its wait ends, then close it
    ///
    /// The wait must have been opened with [`ThreadWaits::begin`]. A timeout
    /// only wins if nothing ended the wait first.
    pub fn block_until_complete(
        &self,
        scheduler: &dyn Scheduler,
        thread: ObjectId,
        timeout: Timeout,
    ) -> Outcome {
        loop {
            if self.cell(thread).map_or(true, |cell| cell.is_complete()) {
                break;
            }
            if scheduler.block(thread, timeout) == Wakeup::TimedOut {
                self.expire(thread);
                break;
            }
        }
        self.finish(thread)
            .unwrap_or(Outcome::Extracted(StatusCode::InternalError))
    }

    fn cell(&self, thread: ObjectId) -> Option<Arc<OutcomeCell>> {
        self.waits.lock().get(&thread).cloned()
    }
}
