//! Thread Dispatch Disabling
//!
//! Registries, the global directory, the proxy table and the packet pool are
//! only ever changed with thread dispatching disabled, so no other thread on
//! the node can observe a half-updated table. Disabling is reentrant: a
//! directive that already holds the section may call helpers that take it
//! again. The section is released when the outermost guard drops, on every
//! exit path.
//!
//! The owner is the executing thread's raw identifier. Identifiers are never
//! zero, so zero marks "dispatching enabled".
//!
//! Nothing may block while holding a [`DispatchGuard`]: the only suspension
//! point of the core is a thread wait, which is always entered after the
//! guard is dropped.

use crate::id::ObjectId;
use core::sync::atomic::{AtomicU32, Ordering};

const NO_OWNER: u32 = 0;

/// Per-node dispatch-disable state
pub struct ThreadDispatch {
    owner: AtomicU32,
    level: AtomicU32,
}

impl ThreadDispatch {
    /// Dispatching enabled, nobody inside
    pub const fn new() -> Self {
        Self {
            owner: AtomicU32::new(NO_OWNER),
            level: AtomicU32::new(0),
        }
    }

    /// Disable dispatching on behalf of `executing`
    ///
    /// Nests if `executing` already holds the section; otherwise waits for
    /// the current holder to leave it.
    pub fn disable(&self, executing: ObjectId) -> DispatchGuard<'_> {
        let me = executing.raw();
        debug_assert!(me != NO_OWNER, "dispatch owner must be a thread");

        if self.owner.load(Ordering::Acquire) != me {
            while self
                .owner
                .compare_exchange_weak(NO_OWNER, me, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                core::hint::spin_loop();
            }
        }
        self.level.fetch_add(1, Ordering::Relaxed);

        DispatchGuard { dispatch: self }
    }

    /// Current nesting depth; 0 when dispatching is enabled
    #[inline]
    pub fn level(&self) -> u32 {
        self.level.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.owner.load(Ordering::Acquire) == NO_OWNER
    }

    fn enable(&self) {
        let previous = self.level.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "dispatch enable without disable");
        if previous == 1 {
            self.owner.store(NO_OWNER, Ordering::Release);
        }
    }
}

impl Default for ThreadDispatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped dispatch-disabled section; dropping it re-enables one level
#[must_use = "dispatching is re-enabled as soon as the guard is dropped"]
pub struct DispatchGuard<'a> {
    dispatch: &'a ThreadDispatch,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.dispatch.enable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{NodeId, ObjectClass};

    fn thread(index: u16) -> ObjectId {
        ObjectId::new(ObjectClass::TASKS, NodeId::FIRST, index)
    }

    #[test]
    fn test_guard_nests_and_releases() {
        let dispatch = ThreadDispatch::new();
        assert!(dispatch.is_enabled());
        {
            let _outer = dispatch.disable(thread(1));
            {
                let _inner = dispatch.disable(thread(1));
                assert_eq!(dispatch.level(), 2);
            }
            assert_eq!(dispatch.level(), 1);
            assert!(!dispatch.is_enabled());
        }
        assert_eq!(dispatch.level(), 0);
        assert!(dispatch.is_enabled());
    }

    #[test]
    fn test_guard_released_on_early_return() {
        fn fails(dispatch: &ThreadDispatch) -> Result<(), ()> {
            let _guard = dispatch.disable(thread(2));
            let lookup: Result<u32, ()> = Err(());
            lookup?;
            Ok(())
        }

        let dispatch = ThreadDispatch::new();
        assert!(fails(&dispatch).is_err());
        assert!(dispatch.is_enabled());

        // Another thread can enter afterwards
        let _guard = dispatch.disable(thread(3));
        assert_eq!(dispatch.level(), 1);
    }
}
