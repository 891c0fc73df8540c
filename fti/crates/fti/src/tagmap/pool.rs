//! Entry Pool
//!
//! Tag entries live in one contiguous arena and are linked into hash chains
//! by [`EntryId`]. Up to `max_free_entries` destroyed entries go on a LIFO
//! free list for immediate reuse; the rest are released. Released slots at
//! the end of the arena are truncated away. A released hole further in is
//! refilled, lowest first, once the free list is empty, so live entries
//! drift toward the front and the tail keeps shrinking.

use crate::object::ObjectRef;
use fti_util::define_idx;
use fti_util::index_vec::IndexVec;
use std::collections::BTreeSet;

define_idx!(
    /// Position of a tag entry in the pool arena
    pub EntryId
);

/// A tag attached to one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagEntry {
    object: ObjectRef,
    tag: i64,
    next: Option<EntryId>,
}

impl TagEntry {
    #[inline]
    pub fn object(&self) -> ObjectRef {
        self.object
    }

    #[inline]
    pub fn tag(&self) -> i64 {
        self.tag
    }

    #[inline]
    pub(crate) fn next(&self) -> Option<EntryId> {
        self.next
    }

    #[inline]
    pub(crate) fn set_next(&mut self, next: Option<EntryId>) {
        self.next = next;
    }

    #[inline]
    pub(crate) fn set_object(&mut self, object: ObjectRef) {
        self.object = object;
    }

    #[inline]
    pub(crate) fn set_tag(&mut self, tag: i64) {
        debug_assert!(tag != 0, "zero tags are never stored");
        self.tag = tag;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Live,
    Pooled,
    Released,
}

#[derive(Debug, Clone)]
struct Slot {
    entry: TagEntry,
    state: SlotState,
}

/// Arena of tag entries with a bounded free list
#[derive(Debug)]
pub struct EntryPool {
    slots: IndexVec<EntryId, Slot>,
    free_list: Vec<EntryId>,
    /// Holes left by released entries
    released: BTreeSet<EntryId>,
    max_free_entries: usize,
    live: usize,
}

impl EntryPool {
    pub fn new(max_free_entries: usize) -> Self {
        Self {
            slots: IndexVec::new(),
            free_list: Vec::new(),
            released: BTreeSet::new(),
            max_free_entries,
            live: 0,
        }
    }

    /// Get an entry for `object`, recycling a pooled one if possible
    pub fn create_entry(&mut self, object: ObjectRef, tag: i64) -> EntryId {
        debug_assert!(tag != 0, "zero tags are never stored");
        let entry = TagEntry {
            object,
            tag,
            next: None,
        };
        self.live += 1;

        let reused = self.free_list.pop().or_else(|| self.released.pop_first());
        match reused {
            Some(id) => {
                self.slots[id] = Slot {
                    entry,
                    state: SlotState::Live,
                };
                id
            }
            None => self.slots.push(Slot {
                entry,
                state: SlotState::Live,
            }),
        }
    }

    /// Return an entry to the pool
    ///
    /// The entry must already be unlinked from its chain.
    pub fn destroy_entry(&mut self, id: EntryId) {
        let slot = &mut self.slots[id];
        debug_assert!(slot.state == SlotState::Live, "double destroy of {:?}", id);
        slot.entry.next = None;
        self.live -= 1;

        if self.free_list.len() < self.max_free_entries {
            slot.state = SlotState::Pooled;
            self.free_list.push(id);
        } else {
            slot.state = SlotState::Released;
            self.released.insert(id);
            self.trim_released_tail();
        }
    }

    /// Free released slots at the end of the arena
    fn trim_released_tail(&mut self) {
        let before = self.slots.len();
        while self
            .slots
            .last()
            .is_some_and(|slot| slot.state == SlotState::Released)
        {
            if let Some((id, _)) = self.slots.pop() {
                self.released.remove(&id);
            }
        }
        if self.slots.len() < before && self.slots.len() * 4 < self.slots.capacity() {
            self.slots.shrink_to_fit();
        }
    }

    #[inline]
    pub fn entry(&self, id: EntryId) -> &TagEntry {
        &self.slots[id].entry
    }

    #[inline]
    pub(crate) fn entry_mut(&mut self, id: EntryId) -> &mut TagEntry {
        &mut self.slots[id].entry
    }

    /// Number of entries in use
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of entries waiting on the free list
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Number of released holes still inside the arena
    pub fn released_count(&self) -> usize {
        self.released.len()
    }

    /// Arena length, holes included
    pub fn arena_len(&self) -> usize {
        self.slots.len()
    }

    pub fn max_free_entries(&self) -> usize {
        self.max_free_entries
    }

    /// Drop every entry, live or pooled
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_list.clear();
        self.released.clear();
        self.live = 0;
    }
}
