//! Marker Module - Visited-Set for Heap Walks
//!
//! A reachability walk records "already visited" in the object header
//! instead of in a side table: the header's lock bits are set to the marked
//! pattern. Headers carrying information (a hash, a lock, age bits) are saved
//! before they are overwritten and replayed when the walk ends.
//!
//! ## Lifecycle
//!
//! ```text
//! init ─▶ ensure heap parsable, allocate save stack
//!   │
//! mark* ─▶ save header if needed, set marked pattern
//!   │
//! done ─▶ reset every marked header to the prototype,
//!         then replay the saved headers
//! ```
//!
//! The marker must only be used under the global pause. Dropping an
//! [`ObjectMarker`] without calling [`ObjectMarker::done`] still restores
//! the headers, so an early return or a panicking callback cannot leave
//! marked objects behind.

pub mod visit_stack;

pub use visit_stack::{VisitStack, VisitStackStats};

use crate::object::{MarkWord, ObjectRef};
use crate::runtime::ManagedRuntime;

/// Counters of one marking session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MarkerStats {
    /// Objects marked visited
    pub marked: u64,
    /// Headers saved and restored
    pub preserved: usize,
}

/// Header-bit visited marker
pub struct ObjectMarker<'rt> {
    runtime: &'rt dyn ManagedRuntime,
    saved: Vec<(ObjectRef, MarkWord)>,
    marked: u64,
    active: bool,
}

impl<'rt> ObjectMarker<'rt> {
    /// Prepare the heap for marking
    pub fn init(runtime: &'rt dyn ManagedRuntime, save_capacity: usize) -> Self {
        runtime.ensure_parsability();
        Self {
            runtime,
            saved: Vec::with_capacity(save_capacity),
            marked: 0,
            active: true,
        }
    }

    /// Mark `obj` visited
    ///
    /// `obj` must not be marked yet.
    pub fn mark(&mut self, obj: ObjectRef) {
        let mark = self.runtime.mark_word(obj);
        debug_assert!(!mark.is_marked(), "{:?} marked twice", obj);
        if mark.must_be_preserved() {
            self.saved.push((obj, mark));
        }
        self.runtime.set_mark_word(obj, MarkWord::marked());
        self.marked += 1;
    }

    /// Check if `obj` was marked during this session
    #[inline]
    pub fn visited(&self, obj: ObjectRef) -> bool {
        self.runtime.mark_word(obj).is_marked()
    }

    pub fn marked_count(&self) -> u64 {
        self.marked
    }

    /// Restore every header and end the session
    pub fn done(mut self) -> MarkerStats {
        self.restore()
    }

    fn restore(&mut self) -> MarkerStats {
        self.active = false;
        let runtime = self.runtime;
        if self.marked > 0 {
            runtime.object_iterate(&mut |obj| {
                if runtime.mark_word(obj).is_marked() {
                    runtime.set_mark_word(obj, MarkWord::prototype());
                }
            });
        }
        let preserved = self.saved.len();
        for (obj, mark) in self.saved.drain(..) {
            runtime.set_mark_word(obj, mark);
        }
        log::trace!(
            "marker restored: {} marked, {} headers preserved",
            self.marked,
            preserved
        );
        MarkerStats {
            marked: self.marked,
            preserved,
        }
    }
}

impl Drop for ObjectMarker<'_> {
    fn drop(&mut self) {
        if self.active {
            self.restore();
        }
    }
}
