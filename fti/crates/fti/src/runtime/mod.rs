//! Runtime Module - Managed Runtime Integration
//!
//! The tagging core does not own the heap. Everything it needs from the
//! managed runtime goes through [`ManagedRuntime`]:
//! - resolving tool handles and creating result handles
//! - object classification, class layout and field reads
//! - header access for the object marker
//! - root and thread enumeration
//! - the global pause that makes a walk consistent
//!
//! [`crate::heap::sim::SimHeap`] is an in-process implementation.

pub mod safepoint;

pub use safepoint::{GlobalPause, MutatorGuard, PauseGuard};

use crate::object::{
    ClassInfo, ClassRef, FieldDescriptor, FieldValue, MarkWord, MethodId, ObjectHandle,
    ObjectKind, ObjectRef, PrimitiveValue, WellKnownClass,
};
use crate::tagmap::TagMap;
use std::sync::{Arc, Weak};

/// Content of a local variable slot
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LocalSlot {
    Reference(ObjectRef),
    Primitive,
}

/// One frame of a thread's stack
#[derive(Clone, Debug)]
pub enum StackFrame {
    /// Interpreted or compiled managed code
    Managed {
        method: MethodId,
        bci: i64,
        locals: Vec<LocalSlot>,
    },
    /// Managed method implemented natively
    Native { method: MethodId },
    /// Transition from native code into managed code; holds the JNI locals
    /// of the native frame above it
    Entry { handles: Vec<ObjectRef> },
}

/// Snapshot of a live thread taken under the global pause
#[derive(Clone, Debug)]
pub struct ThreadSnapshot {
    pub thread_object: ObjectRef,
    pub thread_id: i64,
    pub exiting: bool,
    pub hidden: bool,
    /// Innermost frame first
    pub frames: Vec<StackFrame>,
    /// JNI locals of the innermost native frame, or of the thread itself
    /// when it has no managed frames
    pub active_handles: Vec<ObjectRef>,
}

impl ThreadSnapshot {
    /// Check if the thread has entered managed code
    pub fn has_managed_frames(&self) -> bool {
        self.frames
            .iter()
            .any(|f| matches!(f, StackFrame::Managed { .. } | StackFrame::Native { .. }))
    }

    /// Check if the thread is reported by walks
    pub fn is_reportable(&self) -> bool {
        !self.thread_object.is_null() && !self.exiting && !self.hidden
    }
}

/// The managed runtime as consumed by the tagging core
///
/// Methods taking an object require a live, non-null identity. Methods
/// enumerating roots may yield null or internal identities; callers filter.
pub trait ManagedRuntime: Send + Sync {
    // === Handles ===

    /// Resolve a tool handle; `None` for null, deleted or cleared handles
    fn resolve(&self, handle: ObjectHandle) -> Option<ObjectRef>;

    /// Create a handle for a result returned to the tool
    fn make_local(&self, obj: ObjectRef) -> ObjectHandle;

    // === Object Model ===

    fn object_kind(&self, obj: ObjectRef) -> ObjectKind;

    /// Class of an object; for a mirror this is `java.lang.Class`
    fn class_of(&self, obj: ObjectRef) -> ClassRef;

    /// Object size in bytes
    fn object_size(&self, obj: ObjectRef) -> u64;

    fn mirror_of(&self, class: ClassRef) -> ObjectRef;

    /// Class a mirror stands for; `None` for primitive type mirrors
    fn class_for_mirror(&self, mirror: ObjectRef) -> Option<ClassRef>;

    fn class_info(&self, class: ClassRef) -> Arc<ClassInfo>;

    fn well_known_class(&self, which: WellKnownClass) -> ClassRef;

    /// Check if `class` is `other` or inherits from / implements it
    fn is_subtype_of(&self, class: ClassRef, other: ClassRef) -> bool;

    /// Read a field; static fields are read with the class descriptor as
    /// `holder`
    fn read_field(&self, holder: ObjectRef, field: &FieldDescriptor) -> FieldValue;

    fn array_length(&self, array: ObjectRef) -> usize;

    fn array_element(&self, array: ObjectRef, index: usize) -> ObjectRef;

    fn primitive_array_values(&self, array: ObjectRef) -> Vec<PrimitiveValue>;

    /// UTF-16 code units of a string instance
    fn string_value(&self, string: ObjectRef) -> Vec<u16>;

    // === Headers ===

    fn mark_word(&self, obj: ObjectRef) -> MarkWord;

    fn set_mark_word(&self, obj: ObjectRef, mark: MarkWord);

    /// Make every object in the heap safe to iterate (retire allocation
    /// buffers and so on)
    fn ensure_parsability(&self) {}

    /// Visit every object in the heap, internal ones included
    fn object_iterate(&self, f: &mut dyn FnMut(ObjectRef));

    // === Roots ===

    fn global_roots(&self, f: &mut dyn FnMut(ObjectRef));

    /// Always-strong class roots and the loaders that go with them
    fn system_class_roots(&self, f: &mut dyn FnMut(ObjectRef));

    fn monitor_roots(&self, f: &mut dyn FnMut(ObjectRef));

    fn other_roots(&self, f: &mut dyn FnMut(ObjectRef));

    fn threads(&self) -> Vec<ThreadSnapshot>;

    // === Pause ===

    fn pause(&self) -> PauseGuard<'_>;

    /// Enter the runtime for one tool operation; waits while another thread
    /// holds the pause
    fn enter_mutator(&self) -> MutatorGuard<'_>;

    // === Collector ===

    /// Register a tag map for sweeping
    ///
    /// After each collection the runtime calls [`TagMap::weak_oops_do`] on
    /// every registered map that is still alive, before it releases the
    /// collection's pause.
    fn register_tag_map(&self, map: Weak<TagMap>);

    // === Provided ===

    /// Identity under which an object's tag is stored
    ///
    /// A class mirror shares its tag with the class descriptor so that
    /// tagging through either path agrees.
    fn tag_identity(&self, obj: ObjectRef) -> ObjectRef {
        if self.object_kind(obj) == ObjectKind::Mirror {
            if let Some(class) = self.class_for_mirror(obj) {
                return class.as_object();
            }
        }
        obj
    }

    /// Object a tool sees for a stored identity
    fn external_object(&self, identity: ObjectRef) -> ObjectRef {
        if self.object_kind(identity) == ObjectKind::ClassDescriptor {
            self.mirror_of(ClassRef::new(identity))
        } else {
            identity
        }
    }

    /// Check if an object is an instance of `class` or one of its subtypes
    fn is_instance_of(&self, obj: ObjectRef, class: ClassRef) -> bool {
        self.is_subtype_of(self.class_of(obj), class)
    }

    /// Check if tools may observe an object
    fn is_visible(&self, obj: ObjectRef) -> bool {
        !obj.is_null() && self.object_kind(obj).is_visible()
    }
}
