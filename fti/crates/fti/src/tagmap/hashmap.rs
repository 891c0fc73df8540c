//! Tag Hashmap
//!
//! Chained hash table from object identity to tag.
//!
//! ## Layout
//!
//! ```text
//! buckets:  [ Some(7) | None | Some(2) | ... ]      size from TABLE_SIZES
//!               │                 │
//!               ▼                 ▼
//! pool:     entry 7 ──next──▶ entry 4      entry 2
//! ```
//!
//! Chains are singly linked through [`EntryId`]s into the [`EntryPool`].
//! New entries go to the head of their chain. When the entry count passes
//! `load_factor * size` the bucket array grows to the next size in the
//! sequence; once the largest size is reached, or a larger bucket array
//! cannot be allocated, the table stops growing and chains get longer.

use super::pool::{EntryId, EntryPool, TagEntry};
use crate::config::TagMapConfig;
use crate::error::{Result, TagError};
use crate::logging::{self, TagEvent};
use crate::object::ObjectRef;
use std::alloc::{handle_alloc_error, Layout};
use std::mem::size_of;
use std::time::Instant;

static_assertions::assert_eq_size!(Option<EntryId>, u32);

/// Bucket counts, in growth order
pub const TABLE_SIZES: [usize; 11] = [
    4801, 76831, 307261, 614563, 1228891, 2457733, 4915219, 9830479, 19660831, 39321619,
    78643219,
];

/// Memory trace step while the trace threshold is below [`MEDIUM_TRACE_THRESHOLD`]
pub const SMALL_TRACE_THRESHOLD: usize = 10_000;
/// Memory trace step while the trace threshold is below [`LARGE_TRACE_THRESHOLD`]
pub const MEDIUM_TRACE_THRESHOLD: usize = 100_000;
/// Memory trace step from then on
pub const LARGE_TRACE_THRESHOLD: usize = 1_000_000;

#[cfg(target_pointer_width = "64")]
const ALIGNMENT_SHIFT: u32 = 3;
#[cfg(not(target_pointer_width = "64"))]
const ALIGNMENT_SHIFT: u32 = 2;

/// Bytes taken by a bucket array of `size` buckets
pub fn bucket_bytes(size: usize) -> usize {
    size.saturating_mul(size_of::<Option<EntryId>>())
}

/// Bucket for `obj` in a table of `size` buckets
///
/// The low bits of an aligned address are always zero, so they are shifted
/// out before taking the remainder.
#[inline]
pub fn hash(obj: ObjectRef, size: usize) -> usize {
    ((obj.raw() as u32) >> ALIGNMENT_SHIFT) as usize % size
}

/// Snapshot of table memory use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub entries: usize,
    pub size: usize,
    pub bucket_bytes: usize,
    pub entry_bytes: usize,
    pub pooled: usize,
    /// Entry arena length, released holes included
    pub arena_slots: usize,
}

impl MemoryUsage {
    /// Buckets plus live entries, rounded up to whole kilobytes
    pub fn total_kb(&self) -> usize {
        (self.bucket_bytes + self.entry_bytes).div_ceil(1024)
    }
}

/// Chained identity-to-tag table
///
/// Not synchronized; [`super::TagMap`] wraps it in a mutex.
#[derive(Debug)]
pub struct TagHashmap {
    pub(super) buckets: Vec<Option<EntryId>>,
    size_index: usize,
    entry_count: usize,
    load_factor: f32,
    resize_threshold: usize,
    resizing_enabled: bool,
    bucket_budget: Option<usize>,
    trace: bool,
    trace_threshold: usize,
    pub(super) pool: EntryPool,
}

impl TagHashmap {
    /// Create an empty table
    ///
    /// Failing to allocate the initial bucket array is fatal.
    pub fn new(config: &TagMapConfig) -> Self {
        let size_index = Self::size_index_for(config.initial_size);
        let size = TABLE_SIZES[size_index];
        let buckets = match Self::allocate_buckets(size, None) {
            Ok(buckets) => buckets,
            Err(_) => handle_alloc_error(Self::bucket_layout(size)),
        };
        let load_factor = config.effective_load_factor();

        Self {
            buckets,
            size_index,
            entry_count: 0,
            load_factor,
            resize_threshold: (load_factor * size as f32) as usize,
            resizing_enabled: true,
            bucket_budget: config.bucket_budget_bytes,
            trace: config.trace_object_tagging,
            trace_threshold: SMALL_TRACE_THRESHOLD,
            pool: EntryPool::new(config.max_free_entries),
        }
    }

    /// Bucket count the table starts with for a preferred initial size
    ///
    /// Rounds down to a size in [`TABLE_SIZES`], never below the smallest.
    pub fn size_for(preferred: Option<usize>) -> usize {
        TABLE_SIZES[Self::size_index_for(preferred)]
    }

    fn size_index_for(preferred: Option<usize>) -> usize {
        match preferred {
            Some(preferred) => TABLE_SIZES
                .iter()
                .rposition(|&size| size <= preferred)
                .unwrap_or(0),
            None => 0,
        }
    }

    fn bucket_layout(size: usize) -> Layout {
        Layout::array::<Option<EntryId>>(size).unwrap_or_else(|_| Layout::new::<Option<EntryId>>())
    }

    fn allocate_buckets(size: usize, budget: Option<usize>) -> Result<Vec<Option<EntryId>>> {
        let requested = bucket_bytes(size);
        if budget.is_some_and(|budget| requested > budget) {
            return Err(TagError::OutOfMemory { requested });
        }

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(size)
            .map_err(|_| TagError::OutOfMemory { requested })?;
        buckets.resize(size, None);
        Ok(buckets)
    }

    // === Accessors ===

    #[inline]
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn load_factor(&self) -> f32 {
        self.load_factor
    }

    pub fn resize_threshold(&self) -> usize {
        self.resize_threshold
    }

    pub fn is_resizing_enabled(&self) -> bool {
        self.resizing_enabled
    }

    pub(crate) fn set_resizing_enabled(&mut self, enabled: bool) {
        self.resizing_enabled = enabled;
    }

    pub fn trace_threshold(&self) -> usize {
        self.trace_threshold
    }

    pub fn pool(&self) -> &EntryPool {
        &self.pool
    }

    #[inline]
    pub fn entry(&self, id: EntryId) -> &TagEntry {
        self.pool.entry(id)
    }

    // === Lookup ===

    /// Find the entry for `obj`
    pub fn find(&self, obj: ObjectRef) -> Option<EntryId> {
        let mut cur = self.buckets[hash(obj, self.size())];
        while let Some(id) = cur {
            let entry = self.pool.entry(id);
            if entry.object() == obj {
                return Some(id);
            }
            cur = entry.next();
        }
        None
    }

    /// Tag of `obj`, 0 when untagged
    #[inline]
    pub fn tag_of(&self, obj: ObjectRef) -> i64 {
        self.find(obj).map_or(0, |id| self.pool.entry(id).tag())
    }

    // === Mutation ===

    /// Insert a new entry at the head of its chain
    ///
    /// `obj` must not already be in the table.
    pub fn add(&mut self, obj: ObjectRef, tag: i64) -> EntryId {
        debug_assert!(self.find(obj).is_none(), "{:?} is already tagged", obj);
        let id = self.pool.create_entry(obj, tag);
        self.link(id);
        self.entry_count += 1;

        if self.entry_count > self.resize_threshold && self.resizing_enabled {
            self.resize();
        }

        if self.trace && self.entry_count >= self.trace_threshold {
            self.trace_memory_usage();
            self.compute_next_trace_threshold();
        }
        id
    }

    /// Unlink the entry for `obj` and return it to the pool
    pub fn remove(&mut self, obj: ObjectRef) -> Option<TagEntry> {
        let pos = hash(obj, self.size());
        let mut prev: Option<EntryId> = None;
        let mut cur = self.buckets[pos];

        while let Some(id) = cur {
            let entry = *self.pool.entry(id);
            if entry.object() == obj {
                self.unlink(pos, prev, id);
                self.entry_count -= 1;
                self.pool.destroy_entry(id);
                return Some(entry);
            }
            prev = Some(id);
            cur = entry.next();
        }
        None
    }

    /// Overwrite the tag of a live entry; the tag must be non-zero
    pub fn set_entry_tag(&mut self, id: EntryId, tag: i64) {
        self.pool.entry_mut(id).set_tag(tag);
    }

    /// Store `tag` for `obj`
    ///
    /// Creates the entry on first non-zero tag, updates it in place, or
    /// removes it when `tag` is 0.
    pub fn update(&mut self, obj: ObjectRef, tag: i64) {
        match self.find(obj) {
            None if tag != 0 => {
                self.add(obj, tag);
            }
            None => {}
            Some(_) if tag == 0 => {
                self.remove(obj);
            }
            Some(id) => self.set_entry_tag(id, tag),
        }
    }

    #[inline]
    pub(super) fn link(&mut self, id: EntryId) {
        let pos = hash(self.pool.entry(id).object(), self.size());
        self.link_at(pos, id);
    }

    #[inline]
    pub(super) fn link_at(&mut self, pos: usize, id: EntryId) {
        let head = self.buckets[pos];
        self.pool.entry_mut(id).set_next(head);
        self.buckets[pos] = Some(id);
    }

    #[inline]
    pub(super) fn unlink(&mut self, pos: usize, prev: Option<EntryId>, id: EntryId) {
        let next = self.pool.entry(id).next();
        match prev {
            Some(prev) => self.pool.entry_mut(prev).set_next(next),
            None => self.buckets[pos] = next,
        }
    }

    pub(super) fn decrement_count(&mut self) {
        self.entry_count -= 1;
    }

    /// Grow the bucket array to the next size and rehash every entry
    fn resize(&mut self) {
        let new_index = self.size_index + 1;
        let Some(&new_size) = TABLE_SIZES.get(new_index) else {
            return;
        };

        let start = Instant::now();
        let mut new_buckets = match Self::allocate_buckets(new_size, self.bucket_budget) {
            Ok(buckets) => buckets,
            Err(err) => {
                let requested = match err {
                    TagError::OutOfMemory { requested } => requested,
                    _ => bucket_bytes(new_size),
                };
                log::warn!(
                    "unable to allocate larger hashtable for object tags ({} bytes)",
                    requested
                );
                logging::log_event(TagEvent::ResizeDisabled {
                    requested_bytes: requested,
                    entries: self.entry_count,
                });
                self.resizing_enabled = false;
                return;
            }
        };

        for pos in 0..self.buckets.len() {
            let mut cur = self.buckets[pos];
            while let Some(id) = cur {
                let entry = self.pool.entry_mut(id);
                cur = entry.next();
                let h = hash(entry.object(), new_size);
                entry.set_next(new_buckets[h]);
                new_buckets[h] = Some(id);
            }
        }

        let old_size = self.buckets.len();
        self.buckets = new_buckets;
        self.size_index = new_index;
        self.resize_threshold = (self.load_factor * new_size as f32) as usize;

        log::trace!(
            "tag table resized {} -> {} buckets at {} entries",
            old_size,
            new_size,
            self.entry_count
        );
        if self.trace {
            logging::log_event(TagEvent::TableResized {
                old_size,
                new_size,
                entries: self.entry_count,
                duration_us: start.elapsed().as_micros() as u64,
            });
        }
    }

    // === Iteration ===

    /// Visit every entry
    ///
    /// The visitor must not change the table.
    pub fn entry_iterate(&self, mut f: impl FnMut(&TagEntry)) {
        for &head in &self.buckets {
            let mut cur = head;
            while let Some(id) = cur {
                let entry = self.pool.entry(id);
                cur = entry.next();
                f(entry);
            }
        }
    }

    // === Tracing ===

    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            entries: self.entry_count,
            size: self.size(),
            bucket_bytes: bucket_bytes(self.size()),
            entry_bytes: self.entry_count * size_of::<TagEntry>(),
            pooled: self.pool.free_count(),
            arena_slots: self.pool.arena_len(),
        }
    }

    fn trace_memory_usage(&self) {
        let usage = self.memory_usage();
        logging::log_event(TagEvent::MemoryUsage {
            entries: usage.entries,
            size: usage.size,
            usage_kb: usage.total_kb(),
        });
    }

    fn compute_next_trace_threshold(&mut self) {
        self.trace_threshold += if self.trace_threshold < MEDIUM_TRACE_THRESHOLD {
            SMALL_TRACE_THRESHOLD
        } else if self.trace_threshold < LARGE_TRACE_THRESHOLD {
            MEDIUM_TRACE_THRESHOLD
        } else {
            LARGE_TRACE_THRESHOLD
        };
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.pool.clear();
        self.entry_count = 0;
    }
}
