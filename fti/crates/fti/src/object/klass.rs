//! Class layout as seen by the heap walk.

use super::{ClassRef, FieldDescriptor, ObjectRef};

/// Shape of the objects a class describes
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClassKind {
    Instance,
    ObjectArray,
    PrimitiveArray,
}

/// Constant pool slot
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConstantPoolEntry {
    /// Resolved string constant
    String(ObjectRef),
    /// Resolved class constant
    Class(ClassRef),
    /// Anything the walk does not report (numbers, unresolved symbols, ...)
    Other,
}

/// Classes the walk needs to recognize
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WellKnownClass {
    Object,
    Class,
    String,
}

/// Snapshot of a class descriptor
///
/// `instance_fields` lists every instance field an object of this class
/// carries, inherited ones included; `static_fields` lists only the fields
/// declared by this class. Both are in ascending `index` order.
#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: String,
    pub kind: ClassKind,
    pub linked: bool,
    pub super_class: Option<ClassRef>,
    pub class_loader: ObjectRef,
    pub protection_domain: ObjectRef,
    pub signers: ObjectRef,
    /// Slot 0 is never used
    pub constant_pool: Vec<ConstantPoolEntry>,
    pub interfaces: Vec<ClassRef>,
    pub instance_fields: Vec<FieldDescriptor>,
    pub static_fields: Vec<FieldDescriptor>,
}

impl ClassInfo {
    #[inline]
    pub fn is_instance_class(&self) -> bool {
        self.kind == ClassKind::Instance
    }
}
