//! Visit Stack - Pending Objects of a Heap Walk
//!
//! Objects whose outgoing references have not been reported yet. The walk
//! is depth-first: the most recently discovered object is processed next.
//! A walk runs on one thread under the global pause, so the stack needs no
//! synchronization.

use crate::object::ObjectRef;

/// LIFO work list with counters
#[derive(Debug)]
pub struct VisitStack {
    stack: Vec<ObjectRef>,

    pushed: u64,
    popped: u64,
    peak: usize,
}

impl VisitStack {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stack: Vec::with_capacity(capacity),
            pushed: 0,
            popped: 0,
            peak: 0,
        }
    }

    /// Push an object to be visited
    #[inline]
    pub fn push(&mut self, obj: ObjectRef) {
        debug_assert!(!obj.is_null(), "null pushed on the visit stack");
        self.stack.push(obj);
        self.pushed += 1;
        self.peak = self.peak.max(self.stack.len());
    }

    /// Pop the next object; `None` when the walk is complete
    #[inline]
    pub fn pop(&mut self) -> Option<ObjectRef> {
        let obj = self.stack.pop();
        if obj.is_some() {
            self.popped += 1;
        }
        obj
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Drop pending objects, e.g. after an abort
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn stats(&self) -> VisitStackStats {
        VisitStackStats {
            pushed: self.pushed,
            popped: self.popped,
            pending: self.stack.len(),
            peak: self.peak,
        }
    }
}

/// Counters of a [`VisitStack`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VisitStackStats {
    /// Total pushes
    pub pushed: u64,
    /// Total pops
    pub popped: u64,
    /// Objects still waiting
    pub pending: usize,
    /// Highest depth reached
    pub peak: usize,
}
