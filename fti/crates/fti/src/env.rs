//! Tool Environment
//!
//! [`TagEnv`] is what a profiler or debugger talks to. It owns one
//! [`TagMap`], resolves the tool's handles against the runtime and runs
//! walks and heap iterations under the runtime's global pause.
//!
//! # Walk Serialization
//!
//! Walks borrow header bits through the object marker, so only one may run
//! at a time. A walk started from another thread blocks on the global pause
//! until the running one finishes, and so do tag reads and writes made from
//! other threads. Callbacks of the running walk tag freely. A walk started
//! from inside a callback of a running walk on the same thread would
//! deadlock on that pause and is rejected with [`TagError::InvalidState`]
//! instead.
//!
//! # Examples
//!
//! ```rust
//! use fti::heap::{ClassSpec, SimHeap};
//! use fti::walk::{BasicCallbacks, IterationControl};
//! use fti::{TagEnv, TagMapConfig};
//! use std::sync::Arc;
//!
//! let heap = Arc::new(SimHeap::new());
//! let node = heap.define_class(ClassSpec::new("Node"));
//! let obj = heap.new_instance(node);
//! let handle = heap.new_global(obj);
//!
//! let env = TagEnv::new(heap.clone(), TagMapConfig::default())?;
//! env.set_tag(handle, 42)?;
//!
//! let mut tagged_roots = 0;
//! env.iterate_over_reachable_objects(BasicCallbacks::new().heap_root(|_, _, tag| {
//!     if *tag != 0 {
//!         tagged_roots += 1;
//!     }
//!     IterationControl::Continue
//! }))?;
//! assert_eq!(tagged_roots, 1);
//! # Ok::<(), fti::TagError>(())
//! ```

use crate::config::TagMapConfig;
use crate::error::{Result, TagError};
use crate::object::{ClassRef, ObjectHandle, ObjectKind, ObjectRef};
use crate::runtime::{ManagedRuntime, PauseGuard};
use crate::tagmap::{ObjectFreeCallback, TagMap};
use crate::walk::heap_iterate;
use crate::walk::{
    BasicCallbacks, HeapCallbacks, HeapFilter, HeapObjectFilter, HeapWalkOperation,
    IterationControl, IterationStats, ObjectInfo, ObjectReferenceKind, WalkStats,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Resolved klass filter
enum KlassFilter {
    Any,
    Class(ClassRef),
    /// A primitive type has no instances; nothing can match
    Primitive,
}

impl KlassFilter {
    fn class(&self) -> Option<ClassRef> {
        match self {
            KlassFilter::Class(class) => Some(*class),
            _ => None,
        }
    }
}

/// Held for the duration of one walk or heap iteration
struct WalkGuard<'e> {
    owner: &'e Mutex<Option<ThreadId>>,
    _pause: PauseGuard<'e>,
}

impl Drop for WalkGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

/// Object tagging and heap walking for one tool
pub struct TagEnv {
    runtime: Arc<dyn ManagedRuntime>,
    tag_map: Arc<TagMap>,
    /// Thread running the current walk
    walk_owner: Mutex<Option<ThreadId>>,
}

impl TagEnv {
    /// Create an environment with an empty tag map
    ///
    /// The map is registered with the runtime, which sweeps it after every
    /// collection.
    ///
    /// # Errors
    /// [`TagError::Config`] if `config` does not validate.
    pub fn new(runtime: Arc<dyn ManagedRuntime>, config: TagMapConfig) -> Result<Self> {
        let tag_map = Arc::new(TagMap::new(config)?);
        runtime.register_tag_map(Arc::downgrade(&tag_map));
        Ok(Self {
            runtime,
            tag_map,
            walk_owner: Mutex::new(None),
        })
    }

    pub fn runtime(&self) -> &dyn ManagedRuntime {
        self.runtime.as_ref()
    }

    pub fn tag_map(&self) -> &TagMap {
        &self.tag_map
    }

    fn resolve(&self, handle: ObjectHandle) -> Result<ObjectRef> {
        self.runtime
            .resolve(handle)
            .filter(|obj| !obj.is_null())
            .ok_or(TagError::InvalidObject)
    }

    fn resolve_klass(&self, klass: Option<ObjectHandle>) -> Result<KlassFilter> {
        let Some(handle) = klass else {
            return Ok(KlassFilter::Any);
        };
        let mirror = self.runtime.resolve(handle).ok_or(TagError::InvalidClass)?;
        if mirror.is_null() || self.runtime.object_kind(mirror) != ObjectKind::Mirror {
            return Err(TagError::InvalidClass);
        }
        Ok(match self.runtime.class_for_mirror(mirror) {
            Some(class) => KlassFilter::Class(class),
            None => KlassFilter::Primitive,
        })
    }

    fn begin_walk(&self) -> Result<WalkGuard<'_>> {
        let current = thread::current().id();
        crate::ensure!(
            *self.walk_owner.lock() != Some(current),
            TagError::InvalidState {
                expected: "no active walk",
                actual: "walk in progress",
            }
        );
        // not holding the owner lock here: another walk may be running
        let pause = self.runtime.pause();
        *self.walk_owner.lock() = Some(current);
        Ok(WalkGuard {
            owner: &self.walk_owner,
            _pause: pause,
        })
    }

    // ========================================================================
    // Tags
    // ========================================================================

    /// Tag an object; a zero tag removes the tag
    ///
    /// Waits while a walk or a collection runs on another thread, so the
    /// resolved identity cannot move before it is stored.
    pub fn set_tag(&self, object: ObjectHandle, tag: i64) -> Result<()> {
        let _mutator = self.runtime.enter_mutator();
        let obj = self.resolve(object)?;
        self.tag_map.set_tag(self.runtime.tag_identity(obj), tag);
        Ok(())
    }

    /// Tag of an object, 0 when untagged
    pub fn get_tag(&self, object: ObjectHandle) -> Result<i64> {
        let _mutator = self.runtime.enter_mutator();
        let obj = self.resolve(object)?;
        Ok(self.tag_map.get_tag(self.runtime.tag_identity(obj)))
    }

    /// Every tagged object whose tag is in `tags`, with its tag
    ///
    /// Each object appears once. Results come back as fresh local handles;
    /// class descriptors come back as their mirrors.
    ///
    /// # Errors
    /// [`TagError::IllegalArgument`] if `tags` contains 0.
    pub fn get_objects_with_tags(&self, tags: &[i64]) -> Result<Vec<(ObjectHandle, i64)>> {
        crate::ensure!(
            !tags.contains(&0),
            TagError::IllegalArgument("tag 0 cannot be queried".to_string())
        );
        let _mutator = self.runtime.enter_mutator();
        let found = self.tag_map.objects_with_tags(tags);
        Ok(found
            .into_iter()
            .map(|(identity, tag)| {
                let obj = self.runtime.external_object(identity);
                (self.runtime.make_local(obj), tag)
            })
            .collect())
    }

    /// Visit every `(object, tag)` pair of the table
    ///
    /// Objects are stored identities (class descriptors, not mirrors). The
    /// visitor runs under the table lock and must not call back into this
    /// environment.
    pub fn entry_iterate(&self, f: impl FnMut(ObjectRef, i64)) {
        self.tag_map.entry_iterate(f);
    }

    // ========================================================================
    // Reachability Walks
    // ========================================================================

    /// Walk everything reachable from the heap roots, basic protocol
    ///
    /// Without an object reference callback only the roots are reported.
    pub fn iterate_over_reachable_objects(
        &self,
        callbacks: BasicCallbacks<'_>,
    ) -> Result<WalkStats> {
        let _walk = self.begin_walk()?;
        Ok(HeapWalkOperation::basic(self.runtime.as_ref(), &self.tag_map, None, callbacks).run())
    }

    /// Walk everything reachable from `object`, basic protocol
    ///
    /// `object` itself is not reported.
    pub fn iterate_over_objects_reachable_from_object(
        &self,
        object: ObjectHandle,
        object_reference: impl FnMut(
            ObjectReferenceKind,
            &ObjectInfo,
            &mut i64,
            i64,
            i32,
        ) -> IterationControl,
    ) -> Result<WalkStats> {
        let seed = self.resolve(object)?;
        let callbacks = BasicCallbacks::new().object_reference(object_reference);
        let _walk = self.begin_walk()?;
        let operation =
            HeapWalkOperation::basic(self.runtime.as_ref(), &self.tag_map, Some(seed), callbacks);
        Ok(operation.run())
    }

    /// Walk from the roots, or from `initial_object`, advanced protocol
    ///
    /// `klass` restricts callbacks to objects of exactly that class; the
    /// walk still passes through everything else.
    pub fn follow_references(
        &self,
        heap_filter: HeapFilter,
        klass: Option<ObjectHandle>,
        initial_object: Option<ObjectHandle>,
        callbacks: HeapCallbacks<'_>,
    ) -> Result<WalkStats> {
        let seed = initial_object.map(|h| self.resolve(h)).transpose()?;
        let klass = self.resolve_klass(klass)?;
        if let KlassFilter::Primitive = klass {
            return Ok(WalkStats::default());
        }

        let _walk = self.begin_walk()?;
        Ok(HeapWalkOperation::advanced(
            self.runtime.as_ref(),
            &self.tag_map,
            seed,
            heap_filter,
            klass.class(),
            callbacks,
        )
        .run())
    }

    // ========================================================================
    // Heap Iteration
    // ========================================================================

    /// Report every visible object, reachable or not, basic protocol
    ///
    /// `klass` matches instances of the class and of its subclasses.
    pub fn iterate_over_heap(
        &self,
        object_filter: HeapObjectFilter,
        klass: Option<ObjectHandle>,
        callback: impl FnMut(&ObjectInfo, &mut i64) -> IterationControl,
    ) -> Result<IterationStats> {
        let klass = self.resolve_klass(klass)?;
        if let KlassFilter::Primitive = klass {
            return Ok(IterationStats::default());
        }

        let _walk = self.begin_walk()?;
        Ok(heap_iterate::iterate_over_heap(
            self.runtime.as_ref(),
            &self.tag_map,
            object_filter,
            klass.class(),
            callback,
        ))
    }

    /// Report every instance of `klass` and its subclasses
    pub fn iterate_over_instances_of_class(
        &self,
        klass: ObjectHandle,
        object_filter: HeapObjectFilter,
        callback: impl FnMut(&ObjectInfo, &mut i64) -> IterationControl,
    ) -> Result<IterationStats> {
        self.iterate_over_heap(object_filter, Some(klass), callback)
    }

    /// Report every visible object, reachable or not, advanced protocol
    ///
    /// `klass` matches instances of exactly that class.
    pub fn iterate_through_heap(
        &self,
        heap_filter: HeapFilter,
        klass: Option<ObjectHandle>,
        mut callbacks: HeapCallbacks<'_>,
    ) -> Result<IterationStats> {
        let klass = self.resolve_klass(klass)?;
        if let KlassFilter::Primitive = klass {
            return Ok(IterationStats::default());
        }

        let _walk = self.begin_walk()?;
        Ok(heap_iterate::iterate_through_heap(
            self.runtime.as_ref(),
            &self.tag_map,
            heap_filter,
            klass.class(),
            &mut callbacks,
        ))
    }

    // ========================================================================
    // Collector Interplay
    // ========================================================================

    /// Install or clear the callback told about freed tagged objects
    pub fn set_object_free_callback(&self, callback: Option<ObjectFreeCallback>) {
        self.tag_map.set_object_free_callback(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{ClassSpec, SimHeap};
    use crate::object::PrimitiveType;

    fn env() -> (Arc<SimHeap>, TagEnv) {
        let heap = Arc::new(SimHeap::new());
        let env = TagEnv::new(heap.clone(), TagMapConfig::default()).unwrap();
        (heap, env)
    }

    #[test]
    fn test_set_get_tag() {
        let (heap, env) = env();
        let node = heap.define_class(ClassSpec::new("Node"));
        let handle = heap.new_global(heap.new_instance(node));

        assert_eq!(env.get_tag(handle).unwrap(), 0);
        env.set_tag(handle, 9).unwrap();
        assert_eq!(env.get_tag(handle).unwrap(), 9);
        env.set_tag(handle, 0).unwrap();
        assert_eq!(env.get_tag(handle).unwrap(), 0);
        assert!(env.tag_map().is_empty());
    }

    #[test]
    fn test_deleted_handle_is_invalid() {
        let (heap, env) = env();
        let node = heap.define_class(ClassSpec::new("Node"));
        let handle = heap.new_global(heap.new_instance(node));
        heap.delete_handle(handle);

        assert!(matches!(env.set_tag(handle, 1), Err(TagError::InvalidObject)));
        assert!(matches!(env.get_tag(handle), Err(TagError::InvalidObject)));
    }

    #[test]
    fn test_zero_tag_query_rejected() {
        let (_, env) = env();
        assert!(matches!(
            env.get_objects_with_tags(&[1, 0]),
            Err(TagError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_klass_filter_must_be_class() {
        let (heap, env) = env();
        let node = heap.define_class(ClassSpec::new("Node"));
        let not_a_class = heap.new_global(heap.new_instance(node));

        let result = env.iterate_over_heap(HeapObjectFilter::Either, Some(not_a_class), |_, _| {
            IterationControl::Continue
        });
        assert!(matches!(result, Err(TagError::InvalidClass)));
    }

    #[test]
    fn test_primitive_klass_filter_matches_nothing() {
        let (heap, env) = env();
        let int_mirror = heap.new_global(heap.primitive_mirror(PrimitiveType::Int));

        let mut calls = 0;
        let stats = env
            .iterate_over_heap(HeapObjectFilter::Either, Some(int_mirror), |_, _| {
                calls += 1;
                IterationControl::Continue
            })
            .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(stats.objects_seen, 0);
    }

    #[test]
    fn test_nested_walk_rejected() {
        let (heap, env) = env();
        let node = heap.define_class(ClassSpec::new("Node"));
        heap.new_global(heap.new_instance(node));

        let mut nested = None;
        env.iterate_over_reachable_objects(BasicCallbacks::new().heap_root(|_, _, _| {
            if nested.is_none() {
                nested = Some(env.iterate_over_reachable_objects(BasicCallbacks::new()));
            }
            IterationControl::Abort
        }))
        .unwrap();

        assert!(matches!(nested, Some(Err(TagError::InvalidState { .. }))));
        // the owner is cleared once the walk ends
        assert!(env.iterate_over_reachable_objects(BasicCallbacks::new()).is_ok());
    }
}
