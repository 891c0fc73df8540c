//! Walk Module - Reachability Walks and Heap Iteration
//!
//! ## Walk States
//!
//! ```text
//! Init ──▶ CollectingRoots ──┐
//!   │                        ├──▶ Draining ──▶ Done
//!   └────▶ SeedObject ───────┘
//! ```
//!
//! - `Init`: the caller holds the global pause; the marker and the visit
//!   stack are set up.
//! - `CollectingRoots`: every root is reported and, depending on the
//!   tool's answer, pushed.
//! - `SeedObject`: the seed is pushed instead.
//! - `Draining`: objects are popped, skipped if already visited, marked and
//!   scanned. The edges of one object are reported in a fixed order:
//!   class first, then fields / elements / class contents.
//! - `Done`: the stack is empty or the tool aborted. Headers are restored
//!   on every path out.
//!
//! The walk never recurses, so arbitrarily deep graphs are fine.

pub mod callbacks;
pub mod field_map;
pub mod heap_iterate;
pub mod reporter;
pub mod roots;
pub(crate) mod wrapper;

pub use callbacks::{
    BasicCallbacks, HeapCallbacks, HeapFilter, HeapObjectFilter, HeapReference, HeapReferenceKind,
    HeapRootKind, IterationControl, ObjectInfo, ObjectReferenceKind, PrimitiveField,
    ReferenceInfo, StackInfo, TagSlots, VisitControl,
};
pub use field_map::{ClassFieldMap, ClassFieldMapCache};
pub use heap_iterate::IterationStats;
pub use roots::RootStats;

use crate::logging::{self, TagEvent};
use crate::object::{
    ClassRef, ConstantPoolEntry, FieldKind, FieldValue, ObjectKind, ObjectRef, WellKnownClass,
};
use crate::runtime::ManagedRuntime;
use crate::tagmap::TagMap;
use reporter::{CallbackInvoker, ReferenceReporter};
use serde::Serialize;
use std::time::Instant;

/// Outcome of one reachability walk
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct WalkStats {
    pub roots: RootStats,
    /// Objects marked and scanned
    pub objects_visited: u64,
    /// Tool callbacks invoked
    pub callbacks_invoked: u64,
    /// The tool stopped the walk
    pub aborted: bool,
    pub field_map_hits: u64,
    pub field_map_misses: u64,
    /// Deepest the visit stack got
    pub peak_stack_depth: usize,
    /// Headers saved and replayed by the marker
    pub headers_preserved: usize,
    pub duration_ms: f64,
}

/// One reachability walk
///
/// Must run under the global pause; nothing else may move or mark objects
/// while it runs.
pub(crate) struct HeapWalkOperation<'w, 'cb> {
    runtime: &'w dyn ManagedRuntime,
    initial_object: Option<ObjectRef>,
    invoker: CallbackInvoker<'w, 'cb>,
    field_maps: ClassFieldMapCache,
    roots: RootStats,
    objects_visited: u64,
    object_class: ClassRef,
    string_class: ClassRef,
    trace: bool,
}

impl<'w, 'cb> HeapWalkOperation<'w, 'cb> {
    /// Walk with the basic protocol
    pub fn basic(
        runtime: &'w dyn ManagedRuntime,
        tags: &'w TagMap,
        initial_object: Option<ObjectRef>,
        callbacks: BasicCallbacks<'cb>,
    ) -> Self {
        Self::new(runtime, tags, initial_object, ReferenceReporter::basic(callbacks))
    }

    /// Walk with the advanced protocol
    pub fn advanced(
        runtime: &'w dyn ManagedRuntime,
        tags: &'w TagMap,
        initial_object: Option<ObjectRef>,
        heap_filter: HeapFilter,
        klass_filter: Option<ClassRef>,
        callbacks: HeapCallbacks<'cb>,
    ) -> Self {
        Self::new(
            runtime,
            tags,
            initial_object,
            ReferenceReporter::advanced(callbacks, heap_filter, klass_filter),
        )
    }

    fn new(
        runtime: &'w dyn ManagedRuntime,
        tags: &'w TagMap,
        initial_object: Option<ObjectRef>,
        reporter: ReferenceReporter<'cb>,
    ) -> Self {
        Self {
            runtime,
            initial_object,
            invoker: CallbackInvoker::new(runtime, tags, reporter),
            field_maps: ClassFieldMapCache::new(),
            roots: RootStats::default(),
            objects_visited: 0,
            object_class: runtime.well_known_class(WellKnownClass::Object),
            string_class: runtime.well_known_class(WellKnownClass::String),
            trace: tags.config().trace_object_tagging,
        }
    }

    fn kind_name(&self) -> &'static str {
        match (self.invoker.is_basic(), self.initial_object.is_some()) {
            (true, false) => "reachable objects",
            (true, true) => "objects reachable from object",
            (false, _) => "follow references",
        }
    }

    /// Run the walk to completion or abort
    pub fn run(mut self) -> WalkStats {
        let start = Instant::now();
        let kind = self.kind_name();
        log::debug!("heap walk started: {}", kind);
        if self.trace {
            logging::log_event(TagEvent::WalkStart { kind });
        }

        let completed = self.walk();
        let invoker_stats = self.invoker.finish();

        let stats = WalkStats {
            roots: self.roots,
            objects_visited: self.objects_visited,
            callbacks_invoked: invoker_stats.callbacks_invoked,
            aborted: !completed,
            field_map_hits: self.field_maps.hits(),
            field_map_misses: self.field_maps.misses(),
            peak_stack_depth: invoker_stats.stack.peak,
            headers_preserved: invoker_stats.marker.preserved,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };

        log::debug!(
            "heap walk finished: {}, {} objects visited, {} callbacks, {}{}",
            kind,
            stats.objects_visited,
            stats.callbacks_invoked,
            stats.roots,
            if stats.aborted { ", aborted" } else { "" }
        );
        if self.trace {
            logging::log_event(TagEvent::WalkEnd {
                kind,
                objects_visited: stats.objects_visited,
                references_reported: stats.callbacks_invoked,
                aborted: stats.aborted,
                duration_ms: stats.duration_ms,
            });
        }
        stats
    }

    /// Returns false when the tool aborted
    fn walk(&mut self) -> bool {
        match self.initial_object {
            None => {
                if !roots::collect_simple_roots(&mut self.invoker, &mut self.roots) {
                    return false;
                }
                if !roots::collect_stack_roots(&mut self.invoker, &mut self.roots) {
                    return false;
                }
            }
            Some(obj) => self.invoker.push(obj),
        }

        if self.invoker.is_following_references() {
            while let Some(obj) = self.invoker.pop() {
                if !self.invoker.visited(obj) && !self.visit(obj) {
                    return false;
                }
            }
        }
        true
    }

    /// Mark `obj` and report its outgoing references
    fn visit(&mut self, obj: ObjectRef) -> bool {
        self.invoker.mark(obj);
        self.objects_visited += 1;

        match self.runtime.object_kind(obj) {
            ObjectKind::Mirror => match self.runtime.class_for_mirror(obj) {
                Some(class) => self.iterate_over_class(class, obj),
                // primitive type mirror
                None => true,
            }
            ObjectKind::Instance => self.iterate_over_object(obj),
            ObjectKind::ObjectArray => self.iterate_over_array(obj),
            ObjectKind::PrimitiveArray(_) => self.iterate_over_type_array(obj),
            ObjectKind::ClassDescriptor | ObjectKind::Internal => true,
        }
    }

    #[inline]
    fn report_class_reference(&mut self, obj: ObjectRef) -> bool {
        let mirror = self.runtime.mirror_of(self.runtime.class_of(obj));
        self.invoker
            .report_reference(HeapReferenceKind::Class, obj, mirror, -1)
    }

    /// Class, then each non-null element
    fn iterate_over_array(&mut self, array: ObjectRef) -> bool {
        if !self.report_class_reference(array) {
            return false;
        }
        let runtime = self.runtime;
        for index in 0..runtime.array_length(array) {
            let element = runtime.array_element(array, index);
            if element.is_null() {
                continue;
            }
            let element = runtime.external_object(element);
            if !self
                .invoker
                .report_reference(HeapReferenceKind::ArrayElement, array, element, index as i32)
            {
                return false;
            }
        }
        true
    }

    /// Class, then the values if requested
    fn iterate_over_type_array(&mut self, array: ObjectRef) -> bool {
        if !self.report_class_reference(array) {
            return false;
        }
        if self.invoker.is_reporting_primitive_array_values() {
            return self.invoker.report_primitive_array_values(array);
        }
        true
    }

    /// Class, instance fields in index order, then the string value
    fn iterate_over_object(&mut self, obj: ObjectRef) -> bool {
        if !self.report_class_reference(obj) {
            return false;
        }

        let runtime = self.runtime;
        let class = runtime.class_of(obj);
        let field_map = self.field_maps.instance_fields(runtime, class);
        let reporting_primitives = self.invoker.is_reporting_primitive_fields();

        for field in field_map.fields() {
            let reported = match (field.kind, runtime.read_field(obj, field)) {
                (FieldKind::Reference, FieldValue::Reference(value)) if !value.is_null() => {
                    // reflection may hold a descriptor; tools see the mirror
                    let value = runtime.external_object(value);
                    self.invoker
                        .report_reference(HeapReferenceKind::Field, obj, value, field.index)
                }
                (FieldKind::Primitive(_), FieldValue::Primitive(value)) if reporting_primitives => {
                    self.invoker.report_primitive_field(
                        HeapReferenceKind::Field,
                        obj,
                        field.index,
                        value,
                    )
                }
                _ => true,
            };
            if !reported {
                return false;
            }
        }

        if self.invoker.is_reporting_string_values() && class == self.string_class {
            return self.invoker.report_string_value(obj);
        }
        true
    }

    /// Superclass, loader, protection domain, signers, constant pool,
    /// interfaces, then static fields
    ///
    /// Array classes and classes that are not linked yet report nothing.
    fn iterate_over_class(&mut self, class: ClassRef, mirror: ObjectRef) -> bool {
        let runtime = self.runtime;
        let info = runtime.class_info(class);
        if !info.is_instance_class() || !info.linked {
            return true;
        }

        if let Some(super_class) = info.super_class {
            if super_class != self.object_class {
                let super_mirror = runtime.mirror_of(super_class);
                if !self
                    .invoker
                    .report_reference(HeapReferenceKind::Superclass, mirror, super_mirror, -1)
                {
                    return false;
                }
            }
        }

        for (kind, referee) in [
            (HeapReferenceKind::ClassLoader, info.class_loader),
            (HeapReferenceKind::ProtectionDomain, info.protection_domain),
            (HeapReferenceKind::Signers, info.signers),
        ] {
            if !referee.is_null() && !self.invoker.report_reference(kind, mirror, referee, -1) {
                return false;
            }
        }

        for (index, entry) in info.constant_pool.iter().enumerate().skip(1) {
            let referee = match *entry {
                ConstantPoolEntry::String(string) if !string.is_null() => string,
                ConstantPoolEntry::Class(resolved) => runtime.mirror_of(resolved),
                _ => continue,
            };
            if !self
                .invoker
                .report_reference(HeapReferenceKind::ConstantPool, mirror, referee, index as i32)
            {
                return false;
            }
        }

        // already seen through the constant pool, but reported on their own
        for interface in &info.interfaces {
            let interface_mirror = runtime.mirror_of(*interface);
            if !self
                .invoker
                .report_reference(HeapReferenceKind::Interface, mirror, interface_mirror, -1)
            {
                return false;
            }
        }

        let statics = ClassFieldMap::static_fields(&info);
        let holder = class.as_object();
        let reporting_primitives = self.invoker.is_reporting_primitive_fields();
        for field in statics.fields() {
            let reported = match (field.kind, runtime.read_field(holder, field)) {
                (FieldKind::Reference, FieldValue::Reference(value)) if !value.is_null() => {
                    let value = runtime.external_object(value);
                    self.invoker.report_reference(
                        HeapReferenceKind::StaticField,
                        mirror,
                        value,
                        field.index,
                    )
                }
                (FieldKind::Primitive(_), FieldValue::Primitive(value)) if reporting_primitives => {
                    self.invoker.report_primitive_field(
                        HeapReferenceKind::StaticField,
                        mirror,
                        field.index,
                        value,
                    )
                }
                _ => true,
            };
            if !reported {
                return false;
            }
        }
        true
    }
}
