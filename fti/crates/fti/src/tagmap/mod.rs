//! Tag Map - Per-Environment Object Tags
//!
//! A [`TagMap`] attaches 64-bit tags to heap objects without keeping them
//! alive. All operations take one mutex around the [`TagHashmap`]; heap walks
//! take the same lock for each callback's tag reads and write-backs, never
//! across a callback.
//!
//! Identities passed in here are already canonical: a class mirror has been
//! mapped to its descriptor by the caller (see
//! [`crate::runtime::ManagedRuntime::tag_identity`]).

pub mod hashmap;
pub mod pool;
pub mod weak;

pub use hashmap::{MemoryUsage, TagHashmap, TABLE_SIZES};
pub use pool::{EntryId, EntryPool, TagEntry};
pub use weak::{SweepStats, WeakOopClosure};

use crate::config::TagMapConfig;
use crate::error::Result;
use crate::logging::{self, TagEvent};
use crate::object::ObjectRef;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::time::Instant;

/// Called with the tag of each tagged object the collector freed
pub type ObjectFreeCallback = Box<dyn Fn(i64) + Send + Sync>;

/// Synchronized tag table owned by one tool environment
pub struct TagMap {
    hashmap: Mutex<TagHashmap>,
    object_free: RwLock<Option<ObjectFreeCallback>>,
    config: TagMapConfig,
}

impl TagMap {
    /// Create an empty tag map
    pub fn new(config: TagMapConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            hashmap: Mutex::new(TagHashmap::new(&config)),
            object_free: RwLock::new(None),
            config,
        })
    }

    pub fn config(&self) -> &TagMapConfig {
        &self.config
    }

    /// Lock the table
    ///
    /// Walks hold this guard only between callbacks.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, TagHashmap> {
        self.hashmap.lock()
    }

    /// Set the tag of `identity`; 0 removes it
    pub fn set_tag(&self, identity: ObjectRef, tag: i64) {
        self.lock().update(identity, tag);
    }

    /// Tag of `identity`, 0 when untagged
    pub fn get_tag(&self, identity: ObjectRef) -> i64 {
        self.lock().tag_of(identity)
    }

    /// Entries whose tag is in `tags`
    ///
    /// Each entry appears at most once, however often its tag is listed.
    pub fn objects_with_tags(&self, tags: &[i64]) -> Vec<(ObjectRef, i64)> {
        let table = self.lock();
        let mut found = Vec::new();
        table.entry_iterate(|entry| {
            if tags.contains(&entry.tag()) {
                found.push((entry.object(), entry.tag()));
            }
        });
        found
    }

    /// Visit every `(identity, tag)` pair under the lock
    ///
    /// The visitor must not call back into this map.
    pub fn entry_iterate(&self, mut f: impl FnMut(ObjectRef, i64)) {
        self.lock()
            .entry_iterate(|entry| f(entry.object(), entry.tag()));
    }

    pub fn entry_count(&self) -> usize {
        self.lock().entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.lock().memory_usage()
    }

    /// Install or clear the object-free callback
    pub fn set_object_free_callback(&self, callback: Option<ObjectFreeCallback>) {
        *self.object_free.write() = callback;
    }

    pub fn has_object_free_callback(&self) -> bool {
        self.object_free.read().is_some()
    }

    /// Sweep the table after a collection
    ///
    /// Called by the runtime inside the collection's pause, so it never runs
    /// while a walk of the same heap is in progress. Object-free
    /// events are posted after the table lock is released.
    pub fn weak_oops_do(&self, closure: &dyn WeakOopClosure) -> SweepStats {
        let start = Instant::now();
        let post_events = self.has_object_free_callback();
        let stats = self.lock().do_weak_oops(closure, post_events);

        if post_events {
            if let Some(callback) = self.object_free.read().as_ref() {
                for &tag in &stats.freed_tags {
                    callback(tag);
                }
            }
        }

        log::debug!(
            "tag sweep: {} -> {} entries, {} freed, {} moved, {} merged",
            stats.before,
            stats.after,
            stats.freed,
            stats.moved,
            stats.merged
        );
        if self.config.trace_object_tagging {
            logging::log_event(TagEvent::WeakSweep {
                before: stats.before,
                after: stats.after,
                freed: stats.freed,
                moved: stats.moved,
                duration_us: start.elapsed().as_micros() as u64,
            });
        }
        stats
    }
}

impl Default for TagMap {
    fn default() -> Self {
        let config = TagMapConfig::default();
        Self {
            hashmap: Mutex::new(TagHashmap::new(&config)),
            object_free: RwLock::new(None),
            config,
        }
    }
}

impl Drop for TagMap {
    fn drop(&mut self) {
        // exclusive access; no lock needed
        self.hashmap.get_mut().clear();
    }
}

impl std::fmt::Debug for TagMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagMap")
            .field("entries", &self.entry_count())
            .field("config", &self.config)
            .finish()
    }
}
