//! Simulated Managed Heap
//!
//! ## Object Model
//!
//! ```text
//! descriptor (internal) ──mirror──▶ mirror (java.lang.Class instance)
//!      ▲                               │
//!      └───────────class_for_mirror────┘
//!
//! instance ──class_of──▶ descriptor
//! String ──value──▶ char[]
//! ```
//!
//! Objects are bump-allocated from [`HEAP_BASE`] with 8-byte alignment and
//! keyed by address. Class descriptors and mirrors never move and are never
//! collected; [`SimHeap::collect`] may move everything else.
//!
//! ## Roots
//!
//! - Global handles (JNI globals)
//! - Classes defined without a class loader, plus extra system roots
//! - Inflated monitors
//! - Thread objects, stack locals and JNI locals
//! - Extra "other" roots
//!
//! Local handles handed to the tool keep their objects alive but are not
//! reported as roots.
//!
//! ## Mutators
//!
//! Allocation, stores and header updates enter the global pause's mutator
//! gate, so they wait while a walk or a collection holds the pause.

use crate::object::{
    ClassInfo, ClassKind, ClassRef, ConstantPoolEntry, FieldDescriptor, FieldKind, FieldValue,
    LockState, MarkWord, MethodId, ObjectHandle, ObjectKind, ObjectRef, PrimitiveType,
    PrimitiveValue, WellKnownClass,
};
use crate::runtime::{
    GlobalPause, LocalSlot, ManagedRuntime, MutatorGuard, PauseGuard, StackFrame,
    ThreadSnapshot,
};
use crate::tagmap::{SweepStats, TagMap, WeakOopClosure};
use fti_util::{FxHashMap, FxHashSet};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// First object address
pub const HEAP_BASE: usize = 0x1000_0000;

const HEADER_BYTES: u64 = 16;
const ARRAY_HEADER_BYTES: u64 = 24;
const DESCRIPTOR_BYTES: u64 = 128;
const REFERENCE_BYTES: u64 = 8;

/// Index of a thread created by [`SimHeap::spawn_thread`]
pub type ThreadId = usize;

#[inline]
fn align(bytes: u64) -> u64 {
    (bytes + 7) & !7
}

fn field_bytes(kind: FieldKind) -> u64 {
    match kind {
        FieldKind::Reference => REFERENCE_BYTES,
        FieldKind::Primitive(ty) => ty.byte_size() as u64,
    }
}

fn default_value(kind: FieldKind) -> FieldValue {
    match kind {
        FieldKind::Reference => FieldValue::Reference(ObjectRef::NULL),
        FieldKind::Primitive(ty) => FieldValue::Primitive(ty.zero()),
    }
}

/// Description of a class to define
///
/// Instance fields of the superclass are inherited. Field indexes continue
/// after the superclass's and the interfaces' fields; own instance fields
/// come before own static fields.
///
/// # Examples
///
/// ```rust
/// use fti::heap::{ClassSpec, SimHeap};
/// use fti::object::{FieldKind, PrimitiveType};
///
/// let heap = SimHeap::new();
/// let node = heap.define_class(
///     ClassSpec::new("Node")
///         .field(FieldKind::Reference)
///         .field(FieldKind::Primitive(PrimitiveType::Int)),
/// );
/// let obj = heap.new_instance(node);
/// assert_eq!(heap.field(obj, 0), fti::object::FieldValue::Reference(fti::ObjectRef::NULL));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClassSpec {
    pub name: String,
    /// `None` selects `java.lang.Object`
    pub super_class: Option<ClassRef>,
    pub interfaces: Vec<ClassRef>,
    pub fields: Vec<FieldKind>,
    pub statics: Vec<FieldKind>,
    /// A null loader makes the class a system class root
    pub class_loader: ObjectRef,
    pub protection_domain: ObjectRef,
    pub signers: ObjectRef,
    /// Constant pool from slot 1 on
    pub constant_pool: Vec<ConstantPoolEntry>,
    pub unlinked: bool,
}

impl ClassSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn super_class(mut self, class: ClassRef) -> Self {
        self.super_class = Some(class);
        self
    }

    pub fn interface(mut self, class: ClassRef) -> Self {
        self.interfaces.push(class);
        self
    }

    pub fn field(mut self, kind: FieldKind) -> Self {
        self.fields.push(kind);
        self
    }

    pub fn static_field(mut self, kind: FieldKind) -> Self {
        self.statics.push(kind);
        self
    }

    pub fn class_loader(mut self, loader: ObjectRef) -> Self {
        self.class_loader = loader;
        self
    }

    pub fn protection_domain(mut self, domain: ObjectRef) -> Self {
        self.protection_domain = domain;
        self
    }

    pub fn signers(mut self, signers: ObjectRef) -> Self {
        self.signers = signers;
        self
    }

    pub fn constant(mut self, entry: ConstantPoolEntry) -> Self {
        self.constant_pool.push(entry);
        self
    }

    pub fn unlinked(mut self) -> Self {
        self.unlinked = true;
        self
    }
}

#[derive(Debug)]
enum Body {
    Fields(Vec<FieldValue>),
    RefArray(Vec<ObjectRef>),
    PrimArray(Vec<PrimitiveValue>),
    Mirror {
        class: Option<ClassRef>,
    },
    Descriptor {
        info: Arc<ClassInfo>,
        statics: Vec<FieldValue>,
        mirror: ObjectRef,
        field_index_end: i32,
    },
}

#[derive(Debug)]
struct SimObject {
    kind: ObjectKind,
    class: ClassRef,
    size: u64,
    mark: AtomicU64,
    body: Body,
}

impl SimObject {
    fn references(&self, out: &mut Vec<ObjectRef>) {
        out.push(self.class.as_object());
        match &self.body {
            Body::Fields(values) => out.extend(values.iter().filter_map(|v| match v {
                FieldValue::Reference(r) => Some(*r),
                FieldValue::Primitive(_) => None,
            })),
            Body::RefArray(elements) => out.extend_from_slice(elements),
            Body::PrimArray(_) => {}
            Body::Mirror { class } => out.extend(class.map(ClassRef::as_object)),
            Body::Descriptor {
                info,
                statics,
                mirror,
                ..
            } => {
                out.push(*mirror);
                out.extend(info.super_class.map(ClassRef::as_object));
                out.extend([info.class_loader, info.protection_domain, info.signers]);
                for entry in &info.constant_pool {
                    match entry {
                        ConstantPoolEntry::String(s) => out.push(*s),
                        ConstantPoolEntry::Class(c) => out.push(c.as_object()),
                        ConstantPoolEntry::Other => {}
                    }
                }
                out.extend(info.interfaces.iter().map(|c| c.as_object()));
                out.extend(statics.iter().filter_map(|v| match v {
                    FieldValue::Reference(r) => Some(*r),
                    FieldValue::Primitive(_) => None,
                }));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    Global,
    Local,
}

#[derive(Debug)]
struct SimThread {
    object: ObjectRef,
    id: i64,
    exiting: bool,
    hidden: bool,
    /// Innermost frame first
    frames: Vec<StackFrame>,
    active_handles: Vec<ObjectRef>,
}

#[derive(Debug, Clone, Copy)]
struct WellKnown {
    object: ClassRef,
    class: ClassRef,
    string: ClassRef,
    thread: ClassRef,
}

#[derive(Debug)]
struct HeapState {
    objects: BTreeMap<usize, SimObject>,
    top: usize,
    well_known: Option<WellKnown>,
    classes: Vec<ClassRef>,
    object_array_classes: FxHashMap<ClassRef, ClassRef>,
    primitive_array_classes: FxHashMap<PrimitiveType, ClassRef>,
    primitive_mirrors: FxHashMap<PrimitiveType, ObjectRef>,
    handles: FxHashMap<u64, (ObjectRef, HandleKind)>,
    next_handle: u64,
    system_roots: Vec<ObjectRef>,
    monitors: Vec<ObjectRef>,
    other_roots: Vec<ObjectRef>,
    threads: Vec<SimThread>,
    next_hash: u32,
    parsable: bool,
}

impl HeapState {
    fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            top: HEAP_BASE,
            well_known: None,
            classes: Vec::new(),
            object_array_classes: FxHashMap::default(),
            primitive_array_classes: FxHashMap::default(),
            primitive_mirrors: FxHashMap::default(),
            handles: FxHashMap::default(),
            next_handle: 1,
            system_roots: Vec::new(),
            monitors: Vec::new(),
            other_roots: Vec::new(),
            threads: Vec::new(),
            next_hash: 1,
            parsable: true,
        }
    }

    fn bump(&mut self, size: u64) -> usize {
        let addr = self.top;
        self.top += align(size.max(HEADER_BYTES)) as usize;
        self.parsable = false;
        addr
    }

    fn alloc(&mut self, kind: ObjectKind, class: ClassRef, size: u64, body: Body) -> ObjectRef {
        let addr = self.bump(size);
        self.objects.insert(
            addr,
            SimObject {
                kind,
                class,
                size,
                mark: AtomicU64::new(MarkWord::prototype().raw()),
                body,
            },
        );
        ObjectRef::from_raw(addr)
    }

    fn object(&self, obj: ObjectRef) -> &SimObject {
        match self.objects.get(&obj.raw()) {
            Some(o) => o,
            None => panic!("{:?} is not a live object", obj),
        }
    }

    fn object_mut(&mut self, obj: ObjectRef) -> &mut SimObject {
        match self.objects.get_mut(&obj.raw()) {
            Some(o) => o,
            None => panic!("{:?} is not a live object", obj),
        }
    }

    fn well_known(&self) -> WellKnown {
        match self.well_known {
            Some(wk) => wk,
            None => unreachable!("heap is bootstrapped in SimHeap::new"),
        }
    }

    fn descriptor(&self, class: ClassRef) -> (&Arc<ClassInfo>, &Vec<FieldValue>, ObjectRef, i32) {
        match &self.object(class.as_object()).body {
            Body::Descriptor {
                info,
                statics,
                mirror,
                field_index_end,
            } => (info, statics, *mirror, *field_index_end),
            _ => panic!("{:?} is not a class descriptor", class),
        }
    }

    /// Allocate a descriptor and its mirror
    fn define(
        &mut self,
        info: ClassInfo,
        statics: Vec<FieldKind>,
        field_index_end: i32,
    ) -> ClassRef {
        let statics_bytes: u64 = statics.iter().map(|k| field_bytes(*k)).sum();
        let statics = statics.into_iter().map(default_value).collect();
        let mirror_class = self.well_known.map(|wk| wk.class);

        // the first descriptors point at themselves until java.lang.Class exists
        let placeholder = ClassRef::new(ObjectRef::from_raw(self.top));
        let class = ClassRef::new(self.alloc(
            ObjectKind::ClassDescriptor,
            mirror_class.unwrap_or(placeholder),
            DESCRIPTOR_BYTES,
            Body::Descriptor {
                info: Arc::new(info),
                statics,
                mirror: ObjectRef::NULL,
                field_index_end,
            },
        ));
        self.classes.push(class);

        if let Some(mirror_class) = mirror_class {
            self.attach_mirror(class, mirror_class, statics_bytes);
        }
        class
    }

    fn attach_mirror(&mut self, class: ClassRef, mirror_class: ClassRef, statics_bytes: u64) {
        let mirror = self.alloc(
            ObjectKind::Mirror,
            mirror_class,
            align(HEADER_BYTES + statics_bytes),
            Body::Mirror { class: Some(class) },
        );
        let body = &mut self.object_mut(class.as_object()).body;
        if let Body::Descriptor { mirror: slot, .. } = body {
            *slot = mirror;
        }
    }

    fn array_class_info(&self, name: String, kind: ClassKind) -> ClassInfo {
        ClassInfo {
            name,
            kind,
            linked: true,
            super_class: self.well_known.map(|wk| wk.object),
            class_loader: ObjectRef::NULL,
            protection_domain: ObjectRef::NULL,
            signers: ObjectRef::NULL,
            constant_pool: vec![ConstantPoolEntry::Other],
            interfaces: Vec::new(),
            instance_fields: Vec::new(),
            static_fields: Vec::new(),
        }
    }

    fn object_array_class(&mut self, element: ClassRef) -> ClassRef {
        if let Some(&class) = self.object_array_classes.get(&element) {
            return class;
        }
        let name = format!("[L{};", self.descriptor(element).0.name);
        let info = self.array_class_info(name, ClassKind::ObjectArray);
        let class = self.define(info, Vec::new(), 0);
        self.object_array_classes.insert(element, class);
        class
    }

    fn primitive_array_class(&mut self, ty: PrimitiveType) -> ClassRef {
        if let Some(&class) = self.primitive_array_classes.get(&ty) {
            return class;
        }
        let info = self.array_class_info(format!("[{}", ty.signature()), ClassKind::PrimitiveArray);
        let class = self.define(info, Vec::new(), 0);
        self.primitive_array_classes.insert(ty, class);
        class
    }

    fn new_instance(&mut self, class: ClassRef) -> ObjectRef {
        let (info, ..) = self.descriptor(class);
        let kinds: Vec<FieldKind> = info.instance_fields.iter().map(|f| f.kind).collect();
        let size = HEADER_BYTES + kinds.iter().map(|k| field_bytes(*k)).sum::<u64>();
        let values = kinds.into_iter().map(default_value).collect();
        self.alloc(ObjectKind::Instance, class, align(size), Body::Fields(values))
    }

    fn new_primitive_array(&mut self, values: Vec<PrimitiveValue>, ty: PrimitiveType) -> ObjectRef {
        let class = self.primitive_array_class(ty);
        let size = ARRAY_HEADER_BYTES + values.len() as u64 * ty.byte_size() as u64;
        self.alloc(
            ObjectKind::PrimitiveArray(ty),
            class,
            align(size),
            Body::PrimArray(values),
        )
    }

    fn strong_roots(&self) -> Vec<ObjectRef> {
        let mut roots: Vec<ObjectRef> = self.classes.iter().map(|c| c.as_object()).collect();
        roots.extend(self.handles.values().map(|(obj, _)| *obj));
        roots.extend(self.primitive_mirrors.values().copied());
        roots.extend_from_slice(&self.system_roots);
        roots.extend_from_slice(&self.monitors);
        roots.extend_from_slice(&self.other_roots);
        for thread in &self.threads {
            roots.push(thread.object);
            roots.extend_from_slice(&thread.active_handles);
            for frame in &thread.frames {
                match frame {
                    StackFrame::Managed { locals, .. } => {
                        roots.extend(locals.iter().filter_map(|slot| match slot {
                            LocalSlot::Reference(r) => Some(*r),
                            LocalSlot::Primitive => None,
                        }))
                    }
                    StackFrame::Entry { handles } => roots.extend_from_slice(handles),
                    StackFrame::Native { .. } => {}
                }
            }
        }
        roots
    }

    /// Apply `f` to every reference slot outside and inside the heap
    fn for_each_slot_mut(&mut self, f: &mut dyn FnMut(&mut ObjectRef)) {
        for object in self.objects.values_mut() {
            match &mut object.body {
                Body::Fields(values) => values.iter_mut().for_each(|v| {
                    if let FieldValue::Reference(r) = v {
                        f(r);
                    }
                }),
                Body::RefArray(elements) => elements.iter_mut().for_each(&mut *f),
                Body::PrimArray(_) | Body::Mirror { .. } => {}
                Body::Descriptor { info, statics, .. } => {
                    let info = Arc::make_mut(info);
                    f(&mut info.class_loader);
                    f(&mut info.protection_domain);
                    f(&mut info.signers);
                    for entry in &mut info.constant_pool {
                        if let ConstantPoolEntry::String(s) = entry {
                            f(s);
                        }
                    }
                    statics.iter_mut().for_each(|v| {
                        if let FieldValue::Reference(r) = v {
                            f(r);
                        }
                    });
                }
            }
        }
        self.handles.values_mut().for_each(|(obj, _)| f(obj));
        self.system_roots.iter_mut().for_each(&mut *f);
        self.monitors.iter_mut().for_each(&mut *f);
        self.other_roots.iter_mut().for_each(&mut *f);
        for thread in &mut self.threads {
            f(&mut thread.object);
            thread.active_handles.iter_mut().for_each(&mut *f);
            for frame in &mut thread.frames {
                match frame {
                    StackFrame::Managed { locals, .. } => locals.iter_mut().for_each(|slot| {
                        if let LocalSlot::Reference(r) = slot {
                            f(r);
                        }
                    }),
                    StackFrame::Entry { handles } => handles.iter_mut().for_each(&mut *f),
                    StackFrame::Native { .. } => {}
                }
            }
        }
    }
}

/// Result of [`SimHeap::collect`]
///
/// Answers the tag table's weak sweep.
#[derive(Debug, Default)]
pub struct CollectionOutcome {
    /// Objects found unreachable, by their address before the collection
    pub dead: FxHashSet<ObjectRef>,
    /// Old address to new address of every moved object
    pub forwarding: IndexMap<ObjectRef, ObjectRef>,
    /// Objects that survived
    pub survivors: usize,
    /// Sweep of each registered tag map, in registration order
    pub sweeps: Vec<SweepStats>,
}

impl WeakOopClosure for CollectionOutcome {
    fn is_alive(&self, obj: ObjectRef) -> bool {
        !self.dead.contains(&obj)
    }

    fn forwardee(&self, obj: ObjectRef) -> ObjectRef {
        self.forwarding.get(&obj).copied().unwrap_or(obj)
    }
}

/// In-process managed heap
pub struct SimHeap {
    state: RwLock<HeapState>,
    pause: GlobalPause,
    tag_maps: Mutex<Vec<Weak<TagMap>>>,
    collections: AtomicU64,
}

impl SimHeap {
    /// Create a heap with `Object`, `Class`, `String` and `Thread` defined
    pub fn new() -> Self {
        let mut state = HeapState::new();
        let root_info = |name: &str, super_class: Option<ClassRef>, fields: Vec<FieldDescriptor>| {
            ClassInfo {
                name: name.to_string(),
                kind: ClassKind::Instance,
                linked: true,
                super_class,
                class_loader: ObjectRef::NULL,
                protection_domain: ObjectRef::NULL,
                signers: ObjectRef::NULL,
                constant_pool: vec![ConstantPoolEntry::Other],
                interfaces: Vec::new(),
                instance_fields: fields,
                static_fields: Vec::new(),
            }
        };

        let object = state.define(root_info("java.lang.Object", None, Vec::new()), Vec::new(), 0);
        let class =
            state.define(root_info("java.lang.Class", Some(object), Vec::new()), Vec::new(), 0);
        for descriptor in [object, class] {
            state.attach_mirror(descriptor, class, 0);
        }
        state.well_known = Some(WellKnown {
            object,
            class,
            string: object,
            thread: object,
        });

        let string = state.define(
            root_info(
                "java.lang.String",
                Some(object),
                vec![
                    FieldDescriptor {
                        index: 0,
                        kind: FieldKind::Reference,
                        offset: 0,
                    },
                    FieldDescriptor {
                        index: 1,
                        kind: FieldKind::Primitive(PrimitiveType::Int),
                        offset: 1,
                    },
                ],
            ),
            Vec::new(),
            2,
        );
        let thread = state.define(
            root_info(
                "java.lang.Thread",
                Some(object),
                vec![FieldDescriptor {
                    index: 0,
                    kind: FieldKind::Primitive(PrimitiveType::Long),
                    offset: 0,
                }],
            ),
            Vec::new(),
            1,
        );
        state.primitive_array_class(PrimitiveType::Char);
        state.well_known = Some(WellKnown {
            object,
            class,
            string,
            thread,
        });

        // descriptors are internal; their class is java.lang.Class
        for obj in state.objects.values_mut() {
            if obj.kind == ObjectKind::ClassDescriptor {
                obj.class = class;
            }
        }
        state.parsable = true;

        Self {
            state: RwLock::new(state),
            pause: GlobalPause::new(),
            tag_maps: Mutex::new(Vec::new()),
            collections: AtomicU64::new(0),
        }
    }

    // === Classes ===

    /// Define a class and its mirror
    pub fn define_class(&self, spec: ClassSpec) -> ClassRef {
        let _mutator = self.pause.enter_mutator();
        let mut state = self.state.write();
        let wk = state.well_known();
        let super_class = spec.super_class.unwrap_or(wk.object);
        let (super_info, _, _, super_end) = state.descriptor(super_class);
        let mut instance_fields = super_info.instance_fields.clone();

        let mut index = super_end;
        for interface in &spec.interfaces {
            index += state.descriptor(*interface).3;
        }

        let mut offset = instance_fields.len();
        for kind in &spec.fields {
            instance_fields.push(FieldDescriptor {
                index,
                kind: *kind,
                offset,
            });
            index += 1;
            offset += 1;
        }
        let static_fields: Vec<FieldDescriptor> = spec
            .statics
            .iter()
            .enumerate()
            .map(|(slot, kind)| {
                let field = FieldDescriptor {
                    index,
                    kind: *kind,
                    offset: slot,
                };
                index += 1;
                field
            })
            .collect();

        let mut constant_pool = vec![ConstantPoolEntry::Other];
        constant_pool.extend(spec.constant_pool);

        let info = ClassInfo {
            name: spec.name,
            kind: ClassKind::Instance,
            linked: !spec.unlinked,
            super_class: Some(super_class),
            class_loader: spec.class_loader,
            protection_domain: spec.protection_domain,
            signers: spec.signers,
            constant_pool,
            interfaces: spec.interfaces,
            instance_fields,
            static_fields,
        };
        state.define(info, spec.statics, index)
    }

    /// Mirror standing for a primitive type
    pub fn primitive_mirror(&self, ty: PrimitiveType) -> ObjectRef {
        let _mutator = self.pause.enter_mutator();
        let mut state = self.state.write();
        if let Some(&mirror) = state.primitive_mirrors.get(&ty) {
            return mirror;
        }
        let class = state.well_known().class;
        let mirror =
            state.alloc(ObjectKind::Mirror, class, HEADER_BYTES, Body::Mirror { class: None });
        state.primitive_mirrors.insert(ty, mirror);
        mirror
    }

    // === Allocation ===

    pub fn new_instance(&self, class: ClassRef) -> ObjectRef {
        let _mutator = self.pause.enter_mutator();
        self.state.write().new_instance(class)
    }

    /// Array of `length` null references with element class `element`
    pub fn new_object_array(&self, element: ClassRef, length: usize) -> ObjectRef {
        let _mutator = self.pause.enter_mutator();
        let mut state = self.state.write();
        let class = state.object_array_class(element);
        let size = ARRAY_HEADER_BYTES + length as u64 * REFERENCE_BYTES;
        state.alloc(
            ObjectKind::ObjectArray,
            class,
            align(size),
            Body::RefArray(vec![ObjectRef::NULL; length]),
        )
    }

    /// Primitive array holding `values`, all of type `ty`
    pub fn new_primitive_array(&self, ty: PrimitiveType, values: Vec<PrimitiveValue>) -> ObjectRef {
        let _mutator = self.pause.enter_mutator();
        debug_assert!(values.iter().all(|v| v.primitive_type() == ty));
        self.state.write().new_primitive_array(values, ty)
    }

    /// `java.lang.String` backed by a fresh `char[]`
    pub fn new_string(&self, value: &str) -> ObjectRef {
        let _mutator = self.pause.enter_mutator();
        let mut state = self.state.write();
        let chars = value.encode_utf16().map(PrimitiveValue::Char).collect();
        let array = state.new_primitive_array(chars, PrimitiveType::Char);
        let string = state.well_known().string;
        let obj = state.new_instance(string);
        if let Body::Fields(values) = &mut state.object_mut(obj).body {
            values[0] = FieldValue::Reference(array);
        }
        obj
    }

    /// Allocate an object the tools never see
    pub fn new_internal(&self) -> ObjectRef {
        let _mutator = self.pause.enter_mutator();
        let mut state = self.state.write();
        let class = state.well_known().object;
        state.alloc(ObjectKind::Internal, class, HEADER_BYTES, Body::Fields(Vec::new()))
    }

    // === Mutation ===

    /// Store into the instance field at `slot` (its layout offset)
    pub fn set_field(&self, obj: ObjectRef, slot: usize, value: impl Into<FieldValue>) {
        let _mutator = self.pause.enter_mutator();
        let mut state = self.state.write();
        if let Body::Fields(values) = &mut state.object_mut(obj).body {
            values[slot] = value.into();
        }
    }

    pub fn field(&self, obj: ObjectRef, slot: usize) -> FieldValue {
        let state = self.state.read();
        match &state.object(obj).body {
            Body::Fields(values) => values[slot],
            _ => FieldValue::Reference(ObjectRef::NULL),
        }
    }

    /// Store into the static field at `slot`
    pub fn set_static(&self, class: ClassRef, slot: usize, value: impl Into<FieldValue>) {
        let _mutator = self.pause.enter_mutator();
        let mut state = self.state.write();
        if let Body::Descriptor { statics, .. } = &mut state.object_mut(class.as_object()).body {
            statics[slot] = value.into();
        }
    }

    pub fn set_element(&self, array: ObjectRef, index: usize, value: ObjectRef) {
        let _mutator = self.pause.enter_mutator();
        let mut state = self.state.write();
        if let Body::RefArray(elements) = &mut state.object_mut(array).body {
            elements[index] = value;
        }
    }

    // === Handles ===

    /// Create a global handle; the object becomes a JNI global root
    pub fn new_global(&self, obj: ObjectRef) -> ObjectHandle {
        self.new_handle(obj, HandleKind::Global)
    }

    /// Create a tool-held local handle
    pub fn new_local(&self, obj: ObjectRef) -> ObjectHandle {
        self.new_handle(obj, HandleKind::Local)
    }

    fn new_handle(&self, obj: ObjectRef, kind: HandleKind) -> ObjectHandle {
        let mut state = self.state.write();
        let raw = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(raw, (obj, kind));
        ObjectHandle::from_raw(raw)
    }

    pub fn delete_handle(&self, handle: ObjectHandle) {
        self.state.write().handles.remove(&handle.raw());
    }

    // === Roots ===

    /// Add an object to the system class root set
    pub fn add_system_root(&self, obj: ObjectRef) {
        self.state.write().system_roots.push(obj);
    }

    pub fn add_other_root(&self, obj: ObjectRef) {
        self.state.write().other_roots.push(obj);
    }

    // === Threads ===

    /// Start a thread with no frames
    pub fn spawn_thread(&self) -> ThreadId {
        let mut state = self.state.write();
        let class = state.well_known().thread;
        let object = state.new_instance(class);
        let id = state.threads.len();
        let tid = id as i64 + 1;
        if let Body::Fields(values) = &mut state.object_mut(object).body {
            values[0] = FieldValue::Primitive(PrimitiveValue::Long(tid));
        }
        state.threads.push(SimThread {
            object,
            id: tid,
            exiting: false,
            hidden: false,
            frames: Vec::new(),
            active_handles: Vec::new(),
        });
        id
    }

    pub fn thread_object(&self, thread: ThreadId) -> ObjectRef {
        self.state.read().threads[thread].object
    }

    /// Push a new innermost frame
    pub fn push_frame(&self, thread: ThreadId, frame: StackFrame) {
        self.state.write().threads[thread].frames.insert(0, frame);
    }

    /// Push a managed frame with the given locals
    pub fn push_managed_frame(
        &self,
        thread: ThreadId,
        method: MethodId,
        bci: i64,
        locals: Vec<LocalSlot>,
    ) {
        self.push_frame(
            thread,
            StackFrame::Managed {
                method,
                bci,
                locals,
            },
        );
    }

    /// Add a JNI local to the thread's active handle block
    pub fn add_jni_local(&self, thread: ThreadId, obj: ObjectRef) {
        self.state.write().threads[thread].active_handles.push(obj);
    }

    pub fn set_exiting(&self, thread: ThreadId, exiting: bool) {
        self.state.write().threads[thread].exiting = exiting;
    }

    pub fn set_hidden(&self, thread: ThreadId, hidden: bool) {
        self.state.write().threads[thread].hidden = hidden;
    }

    // === Headers ===

    /// Install an identity hash in the header, if not already present
    pub fn identity_hash(&self, obj: ObjectRef) -> u32 {
        let _mutator = self.pause.enter_mutator();
        let mut state = self.state.write();
        let hash = state.next_hash;
        let object = state.object(obj);
        let mark = MarkWord::from_raw(object.mark.load(Ordering::Acquire));
        if mark.has_hash() {
            return mark.hash();
        }
        object.mark.store(mark.with_hash(hash).raw(), Ordering::Release);
        state.next_hash = state.next_hash % 0x7FFF_FFFF + 1;
        hash
    }

    /// Stack-lock an object
    pub fn lock_object(&self, obj: ObjectRef) {
        let _mutator = self.pause.enter_mutator();
        let state = self.state.read();
        let object = state.object(obj);
        let mark = MarkWord::from_raw(object.mark.load(Ordering::Acquire));
        object
            .mark
            .store(mark.with_lock_state(LockState::StackLocked).raw(), Ordering::Release);
    }

    /// Inflate an object's monitor; the object becomes a monitor root
    pub fn inflate_monitor(&self, obj: ObjectRef) {
        let _mutator = self.pause.enter_mutator();
        let mut state = self.state.write();
        let object = state.object(obj);
        let mark = MarkWord::from_raw(object.mark.load(Ordering::Acquire));
        object
            .mark
            .store(mark.with_lock_state(LockState::Monitor).raw(), Ordering::Release);
        state.monitors.push(obj);
    }

    // === Introspection ===

    pub fn object_count(&self) -> usize {
        self.state.read().objects.len()
    }

    pub fn contains(&self, obj: ObjectRef) -> bool {
        self.state.read().objects.contains_key(&obj.raw())
    }

    /// Check if every allocation is visible to heap iteration
    pub fn is_parsable(&self) -> bool {
        self.state.read().parsable
    }

    pub fn collection_count(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }

    // === Collection ===

    /// Collect unreachable objects, optionally moving the survivors
    ///
    /// Runs under the global pause. Class descriptors and mirrors always
    /// survive in place. Registered tag maps are swept before the pause is
    /// released, so no mutator sees a moved object ahead of its tag.
    pub fn collect(&self, compact: bool) -> CollectionOutcome {
        let _pause = self.pause.pause();
        let mut outcome = self.collect_paused(compact);
        outcome.sweeps = self.sweep_tag_maps(&outcome);
        outcome
    }

    fn sweep_tag_maps(&self, outcome: &CollectionOutcome) -> Vec<SweepStats> {
        let maps: Vec<Arc<TagMap>> = {
            let mut registered = self.tag_maps.lock();
            registered.retain(|map| map.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        // the heap lock is released: object-free callbacks may read the heap
        maps.iter().map(|map| map.weak_oops_do(outcome)).collect()
    }

    fn collect_paused(&self, compact: bool) -> CollectionOutcome {
        let mut state = self.state.write();

        let mut live: FxHashSet<usize> = FxHashSet::default();
        let mut stack = state.strong_roots();
        let mut refs = Vec::new();
        while let Some(obj) = stack.pop() {
            if obj.is_null() || !live.insert(obj.raw()) {
                continue;
            }
            if let Some(object) = state.objects.get(&obj.raw()) {
                refs.clear();
                object.references(&mut refs);
                stack.extend(refs.iter().copied().filter(|r| !live.contains(&r.raw())));
            }
        }

        let dead: FxHashSet<ObjectRef> = state
            .objects
            .keys()
            .filter(|addr| !live.contains(addr))
            .map(|&addr| ObjectRef::from_raw(addr))
            .collect();
        for obj in &dead {
            state.objects.remove(&obj.raw());
        }

        let mut forwarding = IndexMap::new();
        if compact {
            let movable: Vec<usize> = state
                .objects
                .iter()
                .filter(|(_, o)| {
                    matches!(
                        o.kind,
                        ObjectKind::Instance
                            | ObjectKind::ObjectArray
                            | ObjectKind::PrimitiveArray(_)
                    )
                })
                .map(|(&addr, _)| addr)
                .collect();
            for addr in movable {
                if let Some(object) = state.objects.remove(&addr) {
                    let to = state.bump(object.size);
                    state.objects.insert(to, object);
                    forwarding.insert(ObjectRef::from_raw(addr), ObjectRef::from_raw(to));
                }
            }
            state.for_each_slot_mut(&mut |slot| {
                if let Some(&to) = forwarding.get(slot) {
                    *slot = to;
                }
            });
        }
        state.parsable = true;

        let survivors = state.objects.len();
        self.collections.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "heap collected: {} dead, {} moved, {} survivors",
            dead.len(),
            forwarding.len(),
            survivors
        );
        CollectionOutcome {
            dead,
            forwarding,
            survivors,
            sweeps: Vec::new(),
        }
    }
}

impl Default for SimHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("SimHeap")
            .field("objects", &state.objects.len())
            .field("classes", &state.classes.len())
            .field("threads", &state.threads.len())
            .finish()
    }
}

impl ManagedRuntime for SimHeap {
    fn resolve(&self, handle: ObjectHandle) -> Option<ObjectRef> {
        let state = self.state.read();
        let (obj, _) = state.handles.get(&handle.raw())?;
        obj.non_null()
            .filter(|obj| state.objects.contains_key(&obj.raw()))
    }

    fn make_local(&self, obj: ObjectRef) -> ObjectHandle {
        self.new_local(obj)
    }

    fn object_kind(&self, obj: ObjectRef) -> ObjectKind {
        self.state.read().object(obj).kind
    }

    fn class_of(&self, obj: ObjectRef) -> ClassRef {
        self.state.read().object(obj).class
    }

    fn object_size(&self, obj: ObjectRef) -> u64 {
        self.state.read().object(obj).size
    }

    fn mirror_of(&self, class: ClassRef) -> ObjectRef {
        self.state.read().descriptor(class).2
    }

    fn class_for_mirror(&self, mirror: ObjectRef) -> Option<ClassRef> {
        match self.state.read().object(mirror).body {
            Body::Mirror { class } => class,
            _ => None,
        }
    }

    fn class_info(&self, class: ClassRef) -> Arc<ClassInfo> {
        Arc::clone(self.state.read().descriptor(class).0)
    }

    fn well_known_class(&self, which: WellKnownClass) -> ClassRef {
        let wk = self.state.read().well_known();
        match which {
            WellKnownClass::Object => wk.object,
            WellKnownClass::Class => wk.class,
            WellKnownClass::String => wk.string,
        }
    }

    fn is_subtype_of(&self, class: ClassRef, other: ClassRef) -> bool {
        let state = self.state.read();
        if other == state.well_known().object {
            return true;
        }
        let mut pending = vec![class];
        let mut seen = FxHashSet::default();
        while let Some(current) = pending.pop() {
            if current == other {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            let (info, ..) = state.descriptor(current);
            pending.extend(info.super_class);
            pending.extend(info.interfaces.iter().copied());
        }
        false
    }

    fn read_field(&self, holder: ObjectRef, field: &FieldDescriptor) -> FieldValue {
        let state = self.state.read();
        let values = match &state.object(holder).body {
            Body::Fields(values) => values,
            Body::Descriptor { statics, .. } => statics,
            _ => return default_value(field.kind),
        };
        values
            .get(field.offset)
            .copied()
            .unwrap_or_else(|| default_value(field.kind))
    }

    fn array_length(&self, array: ObjectRef) -> usize {
        match &self.state.read().object(array).body {
            Body::RefArray(elements) => elements.len(),
            Body::PrimArray(values) => values.len(),
            _ => 0,
        }
    }

    fn array_element(&self, array: ObjectRef, index: usize) -> ObjectRef {
        match &self.state.read().object(array).body {
            Body::RefArray(elements) => elements.get(index).copied().unwrap_or(ObjectRef::NULL),
            _ => ObjectRef::NULL,
        }
    }

    fn primitive_array_values(&self, array: ObjectRef) -> Vec<PrimitiveValue> {
        match &self.state.read().object(array).body {
            Body::PrimArray(values) => values.clone(),
            _ => Vec::new(),
        }
    }

    fn string_value(&self, string: ObjectRef) -> Vec<u16> {
        let state = self.state.read();
        let array = match &state.object(string).body {
            Body::Fields(values) => match values.first() {
                Some(FieldValue::Reference(array)) if !array.is_null() => *array,
                _ => return Vec::new(),
            }
            _ => return Vec::new(),
        };
        match &state.object(array).body {
            Body::PrimArray(values) => values
                .iter()
                .filter_map(|v| match v {
                    PrimitiveValue::Char(c) => Some(*c),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn mark_word(&self, obj: ObjectRef) -> MarkWord {
        MarkWord::from_raw(self.state.read().object(obj).mark.load(Ordering::Acquire))
    }

    fn set_mark_word(&self, obj: ObjectRef, mark: MarkWord) {
        self.state
            .read()
            .object(obj)
            .mark
            .store(mark.raw(), Ordering::Release);
    }

    fn ensure_parsability(&self) {
        self.state.write().parsable = true;
    }

    fn object_iterate(&self, f: &mut dyn FnMut(ObjectRef)) {
        let objects: Vec<usize> = self.state.read().objects.keys().copied().collect();
        for addr in objects {
            f(ObjectRef::from_raw(addr));
        }
    }

    fn global_roots(&self, f: &mut dyn FnMut(ObjectRef)) {
        let mut globals: Vec<(u64, ObjectRef)> = self
            .state
            .read()
            .handles
            .iter()
            .filter(|(_, (_, kind))| *kind == HandleKind::Global)
            .map(|(&raw, &(obj, _))| (raw, obj))
            .collect();
        globals.sort_unstable_by_key(|(raw, _)| *raw);
        globals.into_iter().for_each(|(_, obj)| f(obj));
    }

    fn system_class_roots(&self, f: &mut dyn FnMut(ObjectRef)) {
        let roots: Vec<ObjectRef> = {
            let state = self.state.read();
            state
                .classes
                .iter()
                .filter(|c| state.descriptor(**c).0.class_loader.is_null())
                .map(|c| c.as_object())
                .chain(state.system_roots.iter().copied())
                .collect()
        };
        roots.into_iter().for_each(f);
    }

    fn monitor_roots(&self, f: &mut dyn FnMut(ObjectRef)) {
        let monitors = self.state.read().monitors.clone();
        monitors.into_iter().for_each(f);
    }

    fn other_roots(&self, f: &mut dyn FnMut(ObjectRef)) {
        let roots = self.state.read().other_roots.clone();
        roots.into_iter().for_each(f);
    }

    fn threads(&self) -> Vec<ThreadSnapshot> {
        self.state
            .read()
            .threads
            .iter()
            .map(|t| ThreadSnapshot {
                thread_object: t.object,
                thread_id: t.id,
                exiting: t.exiting,
                hidden: t.hidden,
                frames: t.frames.clone(),
                active_handles: t.active_handles.clone(),
            })
            .collect()
    }

    fn pause(&self) -> PauseGuard<'_> {
        self.pause.pause()
    }

    fn enter_mutator(&self) -> MutatorGuard<'_> {
        self.pause.enter_mutator()
    }

    fn register_tag_map(&self, map: Weak<TagMap>) {
        self.tag_maps.lock().push(map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_classes() {
        let heap = SimHeap::new();
        let object = heap.well_known_class(WellKnownClass::Object);
        let class = heap.well_known_class(WellKnownClass::Class);
        let string = heap.well_known_class(WellKnownClass::String);

        assert_eq!(heap.object_kind(object.as_object()), ObjectKind::ClassDescriptor);
        let mirror = heap.mirror_of(class);
        assert_eq!(heap.object_kind(mirror), ObjectKind::Mirror);
        assert_eq!(heap.class_of(mirror), class);
        assert_eq!(heap.class_for_mirror(mirror), Some(class));
        assert!(heap.is_subtype_of(string, object));
        assert!(!heap.is_subtype_of(object, string));
    }

    #[test]
    fn test_tag_identity_of_mirror() {
        let heap = SimHeap::new();
        let node = heap.define_class(ClassSpec::new("Node"));
        let mirror = heap.mirror_of(node);
        assert_eq!(heap.tag_identity(mirror), node.as_object());
        assert_eq!(heap.external_object(node.as_object()), mirror);

        let obj = heap.new_instance(node);
        assert_eq!(heap.tag_identity(obj), obj);
    }

    #[test]
    fn test_field_layout_and_indexes() {
        let heap = SimHeap::new();
        let base = heap.define_class(
            ClassSpec::new("Base")
                .field(FieldKind::Reference)
                .static_field(FieldKind::Primitive(PrimitiveType::Int)),
        );
        let derived = heap.define_class(
            ClassSpec::new("Derived")
                .super_class(base)
                .field(FieldKind::Primitive(PrimitiveType::Long)),
        );

        let info = heap.class_info(derived);
        let indexes: Vec<i32> = info.instance_fields.iter().map(|f| f.index).collect();
        assert_eq!(indexes, vec![0, 2]);
        assert_eq!(info.instance_fields[1].offset, 1);

        let obj = heap.new_instance(derived);
        heap.set_field(obj, 1, PrimitiveValue::Long(9));
        assert_eq!(
            heap.read_field(obj, &info.instance_fields[1]),
            FieldValue::Primitive(PrimitiveValue::Long(9))
        );
        assert_eq!(heap.object_size(obj), 32);
    }

    #[test]
    fn test_strings() {
        let heap = SimHeap::new();
        let s = heap.new_string("hé");
        assert_eq!(heap.string_value(s), vec![b'h' as u16, 0xe9]);
        let string = heap.well_known_class(WellKnownClass::String);
        assert_eq!(heap.class_of(s), string);
    }

    #[test]
    fn test_handles() {
        let heap = SimHeap::new();
        let node = heap.define_class(ClassSpec::new("Node"));
        let obj = heap.new_instance(node);
        let handle = heap.new_global(obj);
        assert_eq!(heap.resolve(handle), Some(obj));
        heap.delete_handle(handle);
        assert_eq!(heap.resolve(handle), None);
        assert_eq!(heap.resolve(ObjectHandle::NULL), None);
    }

    #[test]
    fn test_collect_removes_unreachable() {
        let heap = SimHeap::new();
        let node = heap.define_class(ClassSpec::new("Node").field(FieldKind::Reference));
        let kept = heap.new_instance(node);
        let child = heap.new_instance(node);
        let garbage = heap.new_instance(node);
        heap.set_field(kept, 0, child);
        heap.new_global(kept);

        let outcome = heap.collect(false);
        assert!(outcome.dead.contains(&garbage));
        assert!(!outcome.dead.contains(&child));
        assert!(heap.contains(child));
        assert!(!heap.contains(garbage));
        assert!(outcome.forwarding.is_empty());
    }

    #[test]
    fn test_compaction_updates_references() {
        let heap = SimHeap::new();
        let node = heap.define_class(ClassSpec::new("Node").field(FieldKind::Reference));
        let a = heap.new_instance(node);
        let b = heap.new_instance(node);
        heap.set_field(a, 0, b);
        let handle = heap.new_global(a);

        let outcome = heap.collect(true);
        let a2 = outcome.forwardee(a);
        let b2 = outcome.forwardee(b);
        assert_ne!(a, a2);
        assert_eq!(heap.resolve(handle), Some(a2));
        assert_eq!(heap.field(a2, 0), FieldValue::Reference(b2));
        // descriptors stay put
        assert_eq!(outcome.forwardee(node.as_object()), node.as_object());
    }

    #[test]
    fn test_header_updates() {
        let heap = SimHeap::new();
        let node = heap.define_class(ClassSpec::new("Node"));
        let obj = heap.new_instance(node);
        assert!(!heap.mark_word(obj).must_be_preserved());

        let hash = heap.identity_hash(obj);
        assert_eq!(heap.identity_hash(obj), hash);
        assert!(heap.mark_word(obj).must_be_preserved());

        heap.inflate_monitor(obj);
        assert_eq!(heap.mark_word(obj).lock_state(), LockState::Monitor);
        let mut monitors = Vec::new();
        heap.monitor_roots(&mut |o| monitors.push(o));
        assert_eq!(monitors, vec![obj]);
    }
}
