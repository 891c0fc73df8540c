//! Global Pause
//!
//! Heap walks and full-heap iterations need a quiescent heap: no mutator may
//! observe or create partial state while the walker reads headers and fields.
//! The global pause provides that, and it also serializes walks because the
//! object marker borrows header bits that only one walk may own.
//!
//! ## Gate
//!
//! ```text
//! mutator ──enter_mutator()──► shared gate ◄──pause()── walker / collector
//!                                 (read)        (write)
//! ```
//!
//! Mutators hold the gate shared for the duration of one heap operation. A
//! pause holds it exclusively, so it waits for running operations to finish
//! and keeps new ones out until the [`PauseGuard`] drops. The thread holding
//! the pause passes its own mutator checks: the collector and the walker's
//! callbacks run on that thread.

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};

/// GlobalPause - stop-the-world coordination between walks and mutators
///
/// Holding a [`PauseGuard`] means the heap is paused. Only one guard exists
/// at a time; a second `pause()` blocks until the first guard is dropped.
///
/// # Examples
///
/// ```rust
/// use fti::runtime::safepoint::GlobalPause;
///
/// let pause = GlobalPause::new();
/// {
///     let _guard = pause.pause();
///     // the pausing thread may still touch the heap
///     let _mutator = pause.enter_mutator();
/// }
/// let _mutator = pause.enter_mutator();
/// ```
pub struct GlobalPause {
    /// Shared by mutators, exclusive for a pause
    gate: RwLock<()>,

    /// Thread holding the pause
    holder: Mutex<Option<ThreadId>>,
}

impl GlobalPause {
    pub fn new() -> Self {
        Self {
            gate: RwLock::new(()),
            holder: Mutex::new(None),
        }
    }

    /// Bring the heap to a pause and hold it until the guard drops
    ///
    /// Blocks until every running mutator operation has left the gate.
    pub fn pause(&self) -> PauseGuard<'_> {
        let gate = self.gate.write();
        *self.holder.lock() = Some(thread::current().id());
        PauseGuard {
            pause: self,
            _gate: gate,
        }
    }

    /// Enter the heap as a mutator
    ///
    /// Blocks while another thread holds the pause.
    pub fn enter_mutator(&self) -> MutatorGuard<'_> {
        if self.held_by_current_thread() {
            return MutatorGuard { _gate: None };
        }
        MutatorGuard {
            _gate: Some(self.gate.read()),
        }
    }

    fn held_by_current_thread(&self) -> bool {
        *self.holder.lock() == Some(thread::current().id())
    }
}

impl Default for GlobalPause {
    fn default() -> Self {
        Self::new()
    }
}

/// Scope of a global pause
///
/// Dropping the guard releases the pause.
pub struct PauseGuard<'a> {
    pause: &'a GlobalPause,
    _gate: RwLockWriteGuard<'a, ()>,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        // cleared before the gate opens
        *self.pause.holder.lock() = None;
    }
}

/// Scope of one mutator operation
pub struct MutatorGuard<'a> {
    _gate: Option<RwLockReadGuard<'a, ()>>,
}
