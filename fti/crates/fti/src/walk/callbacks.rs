//! Callback Protocols
//!
//! Two calling conventions reach the tool:
//!
//! - **Basic**: root, stack-reference and object-reference callbacks that
//!   return an [`IterationControl`]. Used by the reachability walks and by
//!   [`crate::TagEnv::iterate_over_heap`].
//! - **Advanced**: a heap-reference callback plus optional primitive value
//!   callbacks that return [`VisitControl`] bits. Used by
//!   [`crate::TagEnv::follow_references`] and
//!   [`crate::TagEnv::iterate_through_heap`].
//!
//! Callbacks are closures. They may borrow local state for the duration of
//! one call into the environment; the walk invokes them on the calling
//! thread and never stores them past the call.
//!
//! Every callback receives the object's tag as `&mut i64`. Writing through it
//! tags, retags or (with 0) untags the object once the callback returns.

use crate::object::{MethodId, PrimitiveType, PrimitiveValue};
use serde::Serialize;
use std::fmt;
use std::ops::BitOr;

// ============================================================================
// Kinds
// ============================================================================

/// Root kinds of the basic protocol
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[repr(i32)]
pub enum HeapRootKind {
    JniGlobal = 1,
    SystemClass = 2,
    Monitor = 3,
    StackLocal = 4,
    JniLocal = 5,
    Thread = 6,
    Other = 7,
}

/// Reference kinds of the basic protocol
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[repr(i32)]
pub enum ObjectReferenceKind {
    Class = 1,
    Field = 2,
    ArrayElement = 3,
    ClassLoader = 4,
    Signers = 5,
    ProtectionDomain = 6,
    Interface = 7,
    StaticField = 8,
    ConstantPool = 9,
}

/// Reference and root kinds of the advanced protocol
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[repr(i32)]
pub enum HeapReferenceKind {
    Class = 1,
    Field = 2,
    ArrayElement = 3,
    ClassLoader = 4,
    Signers = 5,
    ProtectionDomain = 6,
    Interface = 7,
    StaticField = 8,
    ConstantPool = 9,
    Superclass = 10,
    JniGlobal = 21,
    SystemClass = 22,
    Monitor = 23,
    StackLocal = 24,
    JniLocal = 25,
    Thread = 26,
    Other = 27,
}

impl HeapReferenceKind {
    /// Check if this kind reports a root rather than an edge
    pub fn is_root(self) -> bool {
        self as i32 >= HeapReferenceKind::JniGlobal as i32
    }

    /// Basic root kind for a root kind; `None` for edge kinds
    pub fn to_root_kind(self) -> Option<HeapRootKind> {
        Some(match self {
            Self::JniGlobal => HeapRootKind::JniGlobal,
            Self::SystemClass => HeapRootKind::SystemClass,
            Self::Monitor => HeapRootKind::Monitor,
            Self::StackLocal => HeapRootKind::StackLocal,
            Self::JniLocal => HeapRootKind::JniLocal,
            Self::Thread => HeapRootKind::Thread,
            Self::Other => HeapRootKind::Other,
            _ => return None,
        })
    }

    /// Basic reference kind for an edge kind; `None` for root kinds
    ///
    /// The basic protocol has no superclass kind and reports superclass
    /// edges as class edges.
    pub fn to_object_reference_kind(self) -> Option<ObjectReferenceKind> {
        Some(match self {
            Self::Class | Self::Superclass => ObjectReferenceKind::Class,
            Self::Field => ObjectReferenceKind::Field,
            Self::ArrayElement => ObjectReferenceKind::ArrayElement,
            Self::ClassLoader => ObjectReferenceKind::ClassLoader,
            Self::Signers => ObjectReferenceKind::Signers,
            Self::ProtectionDomain => ObjectReferenceKind::ProtectionDomain,
            Self::Interface => ObjectReferenceKind::Interface,
            Self::StaticField => ObjectReferenceKind::StaticField,
            Self::ConstantPool => ObjectReferenceKind::ConstantPool,
            _ => return None,
        })
    }
}

impl fmt::Display for HeapReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Class => "class",
            Self::Field => "field",
            Self::ArrayElement => "array element",
            Self::ClassLoader => "class loader",
            Self::Signers => "signers",
            Self::ProtectionDomain => "protection domain",
            Self::Interface => "interface",
            Self::StaticField => "static field",
            Self::ConstantPool => "constant pool",
            Self::Superclass => "superclass",
            Self::JniGlobal => "JNI global",
            Self::SystemClass => "system class",
            Self::Monitor => "monitor",
            Self::StackLocal => "stack local",
            Self::JniLocal => "JNI local",
            Self::Thread => "thread",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Control Values
// ============================================================================

/// Result of a basic callback
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[repr(i32)]
pub enum IterationControl {
    /// Stop the walk
    Abort = 0,
    /// Continue, following the object's references
    Continue = 1,
    /// Continue without following the object's references
    Ignore = 2,
}

/// Result bits of an advanced callback
///
/// Unknown bits are ignored.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VisitControl(u32);

impl VisitControl {
    /// Continue without visiting the object's references
    pub const NONE: VisitControl = VisitControl(0);
    /// Visit the object's references
    pub const VISIT_OBJECTS: VisitControl = VisitControl(0x100);
    /// Stop the walk
    pub const ABORT: VisitControl = VisitControl(0x8000);

    pub const fn from_bits(bits: u32) -> Self {
        VisitControl(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_abort(self) -> bool {
        self.0 & Self::ABORT.0 != 0
    }

    #[inline]
    pub fn visits_objects(self) -> bool {
        self.0 & Self::VISIT_OBJECTS.0 != 0
    }
}

impl BitOr for VisitControl {
    type Output = VisitControl;

    fn bitor(self, rhs: Self) -> Self {
        VisitControl(self.0 | rhs.0)
    }
}

impl fmt::Debug for VisitControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VisitControl(0x{:x})", self.0)
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Tag filter of the advanced protocol
///
/// Each set bit excludes a class of objects:
///
/// | Bit | Excludes |
/// |-----|----------|
/// | `TAGGED` (0x4) | tagged objects |
/// | `UNTAGGED` (0x8) | untagged objects |
/// | `CLASS_TAGGED` (0x10) | objects whose class is tagged |
/// | `CLASS_UNTAGGED` (0x20) | objects whose class is untagged |
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HeapFilter(u32);

impl HeapFilter {
    pub const NONE: HeapFilter = HeapFilter(0);
    pub const TAGGED: HeapFilter = HeapFilter(0x4);
    pub const UNTAGGED: HeapFilter = HeapFilter(0x8);
    pub const CLASS_TAGGED: HeapFilter = HeapFilter(0x10);
    pub const CLASS_UNTAGGED: HeapFilter = HeapFilter(0x20);

    pub const fn from_bits(bits: u32) -> Self {
        HeapFilter(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn contains(self, other: HeapFilter) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if an object with these tags is excluded
    pub fn filters_out(self, tag: i64, class_tag: i64) -> bool {
        if self.0 == 0 {
            return false;
        }
        let object_bit = if tag != 0 {
            Self::TAGGED
        } else {
            Self::UNTAGGED
        };
        let class_bit = if class_tag != 0 {
            Self::CLASS_TAGGED
        } else {
            Self::CLASS_UNTAGGED
        };
        self.contains(object_bit) || self.contains(class_bit)
    }
}

impl BitOr for HeapFilter {
    type Output = HeapFilter;

    fn bitor(self, rhs: Self) -> Self {
        HeapFilter(self.0 | rhs.0)
    }
}

impl fmt::Debug for HeapFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapFilter(0x{:x})", self.0)
    }
}

/// Object filter of [`crate::TagEnv::iterate_over_heap`]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum HeapObjectFilter {
    Tagged,
    Untagged,
    Either,
}

impl HeapObjectFilter {
    /// Check if an object with this tag is excluded
    #[inline]
    pub fn filters_out(self, tag: i64) -> bool {
        match self {
            HeapObjectFilter::Tagged => tag == 0,
            HeapObjectFilter::Untagged => tag != 0,
            HeapObjectFilter::Either => false,
        }
    }
}

// ============================================================================
// Callback Arguments
// ============================================================================

/// Facts about the reported object
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct ObjectInfo {
    /// Tag of the object's class, 0 when untagged
    pub class_tag: i64,
    /// Size in bytes
    pub size: u64,
    /// Element count for arrays, -1 otherwise
    pub length: i32,
}

/// Location of a stack or JNI local root
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct StackInfo {
    pub thread_tag: i64,
    pub thread_id: i64,
    /// 0 for the innermost frame
    pub depth: i32,
    /// `None` for JNI locals of a thread without managed frames
    pub method: Option<MethodId>,
    /// Bytecode index; -1 for JNI locals
    pub location: i64,
    /// Local variable slot; -1 for JNI locals
    pub slot: i32,
}

/// Kind-specific detail of an advanced reference
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum ReferenceInfo {
    /// Instance or static field index
    Field { index: i32 },
    /// Array element index
    Array { index: i32 },
    /// Constant pool slot
    ConstantPool { index: i32 },
    /// Stack or JNI local root
    Stack(StackInfo),
}

/// One advanced root or reference report
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct HeapReference {
    pub kind: HeapReferenceKind,
    /// Present for field, static field, array element, constant pool,
    /// stack local and JNI local kinds
    pub info: Option<ReferenceInfo>,
    pub class_tag: i64,
    /// Class tag of the referrer; 0 for roots
    pub referrer_class_tag: i64,
    pub size: u64,
    pub length: i32,
}

/// Tag slots of one advanced reference report
///
/// For a self reference the object and the referrer share one slot: writing
/// the referrer tag writes the object tag and vice versa.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TagSlots {
    tag: i64,
    referrer: Option<i64>,
    self_reference: bool,
}

impl TagSlots {
    pub(crate) fn root(tag: i64) -> Self {
        Self {
            tag,
            referrer: None,
            self_reference: false,
        }
    }

    pub(crate) fn edge(tag: i64, referrer_tag: i64) -> Self {
        Self {
            tag,
            referrer: Some(referrer_tag),
            self_reference: false,
        }
    }

    pub(crate) fn self_reference(tag: i64) -> Self {
        Self {
            tag,
            referrer: None,
            self_reference: true,
        }
    }

    #[inline]
    pub fn tag(&self) -> i64 {
        self.tag
    }

    #[inline]
    pub fn set_tag(&mut self, tag: i64) {
        self.tag = tag;
    }

    /// Referrer tag; `None` when a root is reported
    pub fn referrer_tag(&self) -> Option<i64> {
        if self.self_reference {
            Some(self.tag)
        } else {
            self.referrer
        }
    }

    /// Write the referrer tag; ignored when a root is reported
    pub fn set_referrer_tag(&mut self, tag: i64) {
        if self.self_reference {
            self.tag = tag;
        } else if let Some(referrer) = self.referrer.as_mut() {
            *referrer = tag;
        }
    }

    #[inline]
    pub fn is_self_reference(&self) -> bool {
        self.self_reference
    }
}

/// One primitive field report
#[derive(Clone, Copy, PartialEq, Debug, Serialize)]
pub struct PrimitiveField {
    /// `Field` or `StaticField`
    pub kind: HeapReferenceKind,
    pub index: i32,
    pub class_tag: i64,
    pub value: PrimitiveValue,
}

impl PrimitiveField {
    pub fn value_type(&self) -> PrimitiveType {
        self.value.primitive_type()
    }
}

// ============================================================================
// Callback Sets
// ============================================================================

pub type HeapRootCallback<'cb> =
    Box<dyn FnMut(HeapRootKind, &ObjectInfo, &mut i64) -> IterationControl + 'cb>;

pub type StackReferenceCallback<'cb> =
    Box<dyn FnMut(HeapRootKind, &StackInfo, &ObjectInfo, &mut i64) -> IterationControl + 'cb>;

/// `(kind, object, tag, referrer_tag, index)`; index is -1 where it has no
/// meaning
pub type ObjectReferenceCallback<'cb> = Box<
    dyn FnMut(ObjectReferenceKind, &ObjectInfo, &mut i64, i64, i32) -> IterationControl + 'cb,
>;

pub type HeapIterationCallback<'cb> = Box<dyn FnMut(&ObjectInfo, &mut i64) -> VisitControl + 'cb>;

pub type HeapReferenceCallback<'cb> =
    Box<dyn FnMut(&HeapReference, &mut TagSlots) -> VisitControl + 'cb>;

pub type PrimitiveFieldCallback<'cb> =
    Box<dyn FnMut(&PrimitiveField, &mut i64) -> VisitControl + 'cb>;

pub type ArrayPrimitiveValueCallback<'cb> =
    Box<dyn FnMut(&ObjectInfo, &mut i64, PrimitiveType, &[PrimitiveValue]) -> VisitControl + 'cb>;

pub type StringPrimitiveValueCallback<'cb> =
    Box<dyn FnMut(&ObjectInfo, &mut i64, &[u16]) -> VisitControl + 'cb>;

/// Callbacks of a basic reachability walk
///
/// A walk follows object references only when `object_reference` is set.
///
/// # Examples
///
/// ```rust
/// use fti::walk::{BasicCallbacks, IterationControl};
///
/// let mut roots = 0;
/// let callbacks = BasicCallbacks::new().heap_root(|_, _, _| {
///     roots += 1;
///     IterationControl::Continue
/// });
/// assert!(!callbacks.is_following_references());
/// ```
#[derive(Default)]
pub struct BasicCallbacks<'cb> {
    pub(crate) heap_root: Option<HeapRootCallback<'cb>>,
    pub(crate) stack_reference: Option<StackReferenceCallback<'cb>>,
    pub(crate) object_reference: Option<ObjectReferenceCallback<'cb>>,
}

impl<'cb> BasicCallbacks<'cb> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heap_root(
        mut self,
        f: impl FnMut(HeapRootKind, &ObjectInfo, &mut i64) -> IterationControl + 'cb,
    ) -> Self {
        self.heap_root = Some(Box::new(f));
        self
    }

    pub fn stack_reference(
        mut self,
        f: impl FnMut(HeapRootKind, &StackInfo, &ObjectInfo, &mut i64) -> IterationControl + 'cb,
    ) -> Self {
        self.stack_reference = Some(Box::new(f));
        self
    }

    pub fn object_reference(
        mut self,
        f: impl FnMut(ObjectReferenceKind, &ObjectInfo, &mut i64, i64, i32) -> IterationControl
            + 'cb,
    ) -> Self {
        self.object_reference = Some(Box::new(f));
        self
    }

    pub fn is_following_references(&self) -> bool {
        self.object_reference.is_some()
    }
}

/// Callbacks of the advanced protocol
///
/// `heap_reference` drives [`crate::TagEnv::follow_references`];
/// `heap_iteration` drives [`crate::TagEnv::iterate_through_heap`]. The
/// value callbacks are shared by both.
#[derive(Default)]
pub struct HeapCallbacks<'cb> {
    pub(crate) heap_iteration: Option<HeapIterationCallback<'cb>>,
    pub(crate) heap_reference: Option<HeapReferenceCallback<'cb>>,
    pub(crate) primitive_field: Option<PrimitiveFieldCallback<'cb>>,
    pub(crate) array_primitive_value: Option<ArrayPrimitiveValueCallback<'cb>>,
    pub(crate) string_primitive_value: Option<StringPrimitiveValueCallback<'cb>>,
}

impl<'cb> HeapCallbacks<'cb> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heap_iteration(
        mut self,
        f: impl FnMut(&ObjectInfo, &mut i64) -> VisitControl + 'cb,
    ) -> Self {
        self.heap_iteration = Some(Box::new(f));
        self
    }

    pub fn heap_reference(
        mut self,
        f: impl FnMut(&HeapReference, &mut TagSlots) -> VisitControl + 'cb,
    ) -> Self {
        self.heap_reference = Some(Box::new(f));
        self
    }

    pub fn primitive_field(
        mut self,
        f: impl FnMut(&PrimitiveField, &mut i64) -> VisitControl + 'cb,
    ) -> Self {
        self.primitive_field = Some(Box::new(f));
        self
    }

    pub fn array_primitive_value(
        mut self,
        f: impl FnMut(&ObjectInfo, &mut i64, PrimitiveType, &[PrimitiveValue]) -> VisitControl
            + 'cb,
    ) -> Self {
        self.array_primitive_value = Some(Box::new(f));
        self
    }

    pub fn string_primitive_value(
        mut self,
        f: impl FnMut(&ObjectInfo, &mut i64, &[u16]) -> VisitControl + 'cb,
    ) -> Self {
        self.string_primitive_value = Some(Box::new(f));
        self
    }
}
