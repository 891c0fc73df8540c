//! Object Module - Identities, Values and Layout Descriptions
//!
//! Types shared by the runtime interface, the tag table and the heap walk.

pub mod header;
pub mod klass;

pub use header::{LockState, MarkWord};
pub use klass::{ClassInfo, ClassKind, ConstantPoolEntry, WellKnownClass};

use serde::Serialize;
use std::fmt;

/// Raw identity of a heap object
///
/// Two references denote the same object iff their identities are equal. The
/// value is the object's current address, so it changes when the collector
/// moves the object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct ObjectRef(usize);

impl ObjectRef {
    pub const NULL: ObjectRef = ObjectRef(0);

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        ObjectRef(raw)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `None` for the null reference
    #[inline]
    pub fn non_null(self) -> Option<Self> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef(0x{:x})", self.0)
    }
}

/// Identity of a class descriptor
///
/// Descriptors are runtime-internal objects. Tools see a class through its
/// mirror; tags placed on a mirror are stored under the descriptor identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ClassRef(ObjectRef);

impl ClassRef {
    #[inline]
    pub const fn new(descriptor: ObjectRef) -> Self {
        ClassRef(descriptor)
    }

    /// The descriptor as a plain object identity
    #[inline]
    pub const fn as_object(self) -> ObjectRef {
        self.0
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassRef(0x{:x})", self.0.raw())
    }
}

/// Opaque external reference handed out to tools
///
/// Handles stay valid across object moves. Zero is the null handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub const NULL: ObjectHandle = ObjectHandle(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        ObjectHandle(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Opaque method identifier reported with stack roots
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub struct MethodId(pub u64);

/// Primitive field and array element types
///
/// The discriminants are the type signature characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub enum PrimitiveType {
    Boolean = b'Z' as isize,
    Byte = b'B' as isize,
    Char = b'C' as isize,
    Short = b'S' as isize,
    Int = b'I' as isize,
    Long = b'J' as isize,
    Float = b'F' as isize,
    Double = b'D' as isize,
}

impl PrimitiveType {
    pub fn from_signature(sig: char) -> Option<Self> {
        match sig {
            'Z' => Some(Self::Boolean),
            'B' => Some(Self::Byte),
            'C' => Some(Self::Char),
            'S' => Some(Self::Short),
            'I' => Some(Self::Int),
            'J' => Some(Self::Long),
            'F' => Some(Self::Float),
            'D' => Some(Self::Double),
            _ => None,
        }
    }

    pub fn signature(self) -> char {
        self as u8 as char
    }

    /// Storage size in bytes
    pub fn byte_size(self) -> usize {
        match self {
            Self::Boolean | Self::Byte => 1,
            Self::Char | Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }

    /// Zero value of this type
    pub fn zero(self) -> PrimitiveValue {
        match self {
            Self::Boolean => PrimitiveValue::Boolean(false),
            Self::Byte => PrimitiveValue::Byte(0),
            Self::Char => PrimitiveValue::Char(0),
            Self::Short => PrimitiveValue::Short(0),
            Self::Int => PrimitiveValue::Int(0),
            Self::Long => PrimitiveValue::Long(0),
            Self::Float => PrimitiveValue::Float(0.0),
            Self::Double => PrimitiveValue::Double(0.0),
        }
    }
}

/// A primitive value as reported to tools
#[derive(Clone, Copy, PartialEq, Debug, Serialize)]
pub enum PrimitiveValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl PrimitiveValue {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            Self::Boolean(_) => PrimitiveType::Boolean,
            Self::Byte(_) => PrimitiveType::Byte,
            Self::Char(_) => PrimitiveType::Char,
            Self::Short(_) => PrimitiveType::Short,
            Self::Int(_) => PrimitiveType::Int,
            Self::Long(_) => PrimitiveType::Long,
            Self::Float(_) => PrimitiveType::Float,
            Self::Double(_) => PrimitiveType::Double,
        }
    }
}

/// Content of a field slot
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum FieldValue {
    Reference(ObjectRef),
    Primitive(PrimitiveValue),
}

impl From<ObjectRef> for FieldValue {
    fn from(obj: ObjectRef) -> Self {
        FieldValue::Reference(obj)
    }
}

impl From<PrimitiveValue> for FieldValue {
    fn from(value: PrimitiveValue) -> Self {
        FieldValue::Primitive(value)
    }
}

/// Declared type of a field
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum FieldKind {
    Reference,
    Primitive(PrimitiveType),
}

impl FieldKind {
    #[inline]
    pub fn is_primitive(self) -> bool {
        matches!(self, FieldKind::Primitive(_))
    }
}

/// Name-independent field description
///
/// `index` is the tool-visible field index; `offset` locates the value within
/// the object (instance fields) or the class's static area (static fields).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct FieldDescriptor {
    pub index: i32,
    pub kind: FieldKind,
    pub offset: usize,
}

/// Layout class of a heap object
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjectKind {
    /// Ordinary instance
    Instance,
    /// `java.lang.Class` instance standing for a class
    Mirror,
    /// Array of references
    ObjectArray,
    /// Array of primitive values
    PrimitiveArray(PrimitiveType),
    /// Runtime-internal class descriptor
    ClassDescriptor,
    /// Other runtime-internal object never shown to tools
    Internal,
}

impl ObjectKind {
    /// Check if tools may observe objects of this kind
    #[inline]
    pub fn is_visible(self) -> bool {
        !matches!(self, ObjectKind::ClassDescriptor | ObjectKind::Internal)
    }

    #[inline]
    pub fn is_array(self) -> bool {
        matches!(self, ObjectKind::ObjectArray | ObjectKind::PrimitiveArray(_))
    }
}
