//! Full Heap Iteration
//!
//! Unlike the reachability walks, heap iteration visits every object in the
//! heap, reachable or not, in the runtime's iteration order. Nothing is
//! marked, so no headers need restoring; the caller still holds the global
//! pause so the heap cannot change underneath the iteration.

use super::callbacks::{
    HeapCallbacks, HeapFilter, HeapObjectFilter, HeapReferenceKind, IterationControl, ObjectInfo,
    PrimitiveField,
};
use super::field_map::{ClassFieldMap, ClassFieldMapCache};
use super::reporter::{invoke_array_primitive_value_callback, invoke_string_value_callback};
use super::wrapper::CallbackWrapper;
use crate::logging::{self, TagEvent};
use crate::object::{ClassRef, FieldValue, ObjectKind, ObjectRef, WellKnownClass};
use crate::runtime::ManagedRuntime;
use crate::tagmap::TagMap;
use serde::Serialize;
use std::time::Instant;

/// Outcome of one heap iteration
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct IterationStats {
    /// Visible objects looked at
    pub objects_seen: u64,
    /// Objects that passed the filters
    pub objects_reported: u64,
    pub callbacks_invoked: u64,
    pub aborted: bool,
    pub duration_ms: f64,
}

impl IterationStats {
    fn finish(mut self, kind: &'static str, start: Instant, trace: bool) -> Self {
        self.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        log::debug!(
            "heap iteration finished: {}, {} of {} objects reported{}",
            kind,
            self.objects_reported,
            self.objects_seen,
            if self.aborted { ", aborted" } else { "" }
        );
        if trace {
            logging::log_event(TagEvent::HeapIteration {
                kind,
                objects_seen: self.objects_seen,
                objects_reported: self.objects_reported,
                aborted: self.aborted,
                duration_ms: self.duration_ms,
            });
        }
        self
    }
}

/// Report every visible object that passes `object_filter` and, if given,
/// is an instance of `klass` or one of its subclasses
pub(crate) fn iterate_over_heap(
    runtime: &dyn ManagedRuntime,
    tags: &TagMap,
    object_filter: HeapObjectFilter,
    klass: Option<ClassRef>,
    mut callback: impl FnMut(&ObjectInfo, &mut i64) -> IterationControl,
) -> IterationStats {
    let kind = if klass.is_some() {
        "instances of class"
    } else {
        "heap"
    };
    let start = Instant::now();
    let mut stats = IterationStats::default();

    runtime.ensure_parsability();
    runtime.object_iterate(&mut |obj| {
        if stats.aborted || !runtime.is_visible(obj) {
            return;
        }
        stats.objects_seen += 1;
        if klass.is_some_and(|klass| !runtime.is_instance_of(obj, klass)) {
            return;
        }

        let mut wrapper = CallbackWrapper::new(runtime, tags, obj);
        if object_filter.filters_out(wrapper.tag()) {
            return;
        }
        stats.objects_reported += 1;
        stats.callbacks_invoked += 1;
        let info = wrapper.info();
        let control = callback(&info, wrapper.tag_mut());
        wrapper.finish(tags);
        stats.aborted = control == IterationControl::Abort;
    });

    stats.finish(kind, start, tags.config().trace_object_tagging)
}

/// Report every visible object of exactly class `klass` (or every object)
/// that passes `heap_filter` to the advanced callbacks
pub(crate) fn iterate_through_heap(
    runtime: &dyn ManagedRuntime,
    tags: &TagMap,
    heap_filter: HeapFilter,
    klass: Option<ClassRef>,
    callbacks: &mut HeapCallbacks<'_>,
) -> IterationStats {
    let start = Instant::now();
    let mut stats = IterationStats::default();
    let mut field_maps = ClassFieldMapCache::new();
    let string_class = runtime.well_known_class(WellKnownClass::String);

    runtime.ensure_parsability();
    runtime.object_iterate(&mut |obj| {
        if stats.aborted || !runtime.is_visible(obj) {
            return;
        }
        stats.objects_seen += 1;
        if klass.is_some_and(|klass| runtime.class_of(obj) != klass) {
            return;
        }

        let mut wrapper = CallbackWrapper::new(runtime, tags, obj);
        if heap_filter.filters_out(wrapper.tag(), wrapper.class_tag()) {
            return;
        }
        stats.objects_reported += 1;

        let mut report = ObjectReport {
            runtime,
            obj,
            wrapper: &mut wrapper,
            callbacks_invoked: 0,
        };
        let completed = report.run(callbacks, &mut field_maps, string_class);
        stats.callbacks_invoked += report.callbacks_invoked;
        wrapper.finish(tags);
        stats.aborted = !completed;
    });

    stats.finish("through heap", start, tags.config().trace_object_tagging)
}

/// Advanced callbacks for one object, sharing one tag snapshot
struct ObjectReport<'a> {
    runtime: &'a dyn ManagedRuntime,
    obj: ObjectRef,
    wrapper: &'a mut CallbackWrapper,
    callbacks_invoked: u64,
}

impl ObjectReport<'_> {
    /// Returns false on abort
    fn run(
        &mut self,
        callbacks: &mut HeapCallbacks<'_>,
        field_maps: &mut ClassFieldMapCache,
        string_class: ClassRef,
    ) -> bool {
        if let Some(cb) = callbacks.heap_iteration.as_mut() {
            self.callbacks_invoked += 1;
            let info = self.wrapper.info();
            if cb(&info, self.wrapper.tag_mut()).is_abort() {
                return false;
            }
        }

        let kind = self.runtime.object_kind(self.obj);
        if let Some(cb) = callbacks.primitive_field.as_mut() {
            let (fields, field_kind, holder) = match kind {
                ObjectKind::Mirror => match self.runtime.class_for_mirror(self.obj) {
                    Some(class) => {
                        let info = self.runtime.class_info(class);
                        if !info.is_instance_class() || !info.linked {
                            return self.report_values(callbacks, kind, string_class);
                        }
                        (
                            ClassFieldMap::static_fields(&info).fields().to_vec(),
                            HeapReferenceKind::StaticField,
                            class.as_object(),
                        )
                    }
                    None => return self.report_values(callbacks, kind, string_class),
                }
                ObjectKind::Instance => {
                    let class = self.runtime.class_of(self.obj);
                    let map = field_maps.instance_fields(self.runtime, class);
                    (map.fields().to_vec(), HeapReferenceKind::Field, self.obj)
                }
                _ => (Vec::new(), HeapReferenceKind::Field, self.obj),
            };

            for field in fields.iter().filter(|f| f.kind.is_primitive()) {
                let FieldValue::Primitive(value) = self.runtime.read_field(holder, field) else {
                    continue;
                };
                let report = PrimitiveField {
                    kind: field_kind,
                    index: field.index,
                    class_tag: self.wrapper.class_tag(),
                    value,
                };
                self.callbacks_invoked += 1;
                if cb(&report, self.wrapper.tag_mut()).is_abort() {
                    return false;
                }
            }
        }

        self.report_values(callbacks, kind, string_class)
    }

    fn report_values(
        &mut self,
        callbacks: &mut HeapCallbacks<'_>,
        kind: ObjectKind,
        string_class: ClassRef,
    ) -> bool {
        if let Some(cb) = callbacks.string_primitive_value.as_mut() {
            if kind == ObjectKind::Instance && self.runtime.class_of(self.obj) == string_class {
                self.callbacks_invoked += 1;
                let control =
                    invoke_string_value_callback(cb, self.runtime, self.wrapper, self.obj);
                if control.is_abort() {
                    return false;
                }
            }
        }

        if let Some(cb) = callbacks.array_primitive_value.as_mut() {
            if matches!(kind, ObjectKind::PrimitiveArray(_)) {
                self.callbacks_invoked += 1;
                let control =
                    invoke_array_primitive_value_callback(cb, self.runtime, self.wrapper, self.obj);
                if control.is_abort() {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{ClassSpec, SimHeap};
    use crate::object::{FieldKind, PrimitiveType, PrimitiveValue};
    use crate::walk::VisitControl;

    #[test]
    fn test_iterate_over_heap_object_filter() {
        let heap = SimHeap::new();
        let tags = TagMap::default();
        let node = heap.define_class(ClassSpec::new("Node"));
        let a = heap.new_instance(node);
        heap.new_instance(node);
        tags.set_tag(a, 7);

        let mut seen = Vec::new();
        let stats = iterate_over_heap(&heap, &tags, HeapObjectFilter::Tagged, None, |_, tag| {
            seen.push(*tag);
            IterationControl::Continue
        });
        assert_eq!(seen, vec![7]);
        assert_eq!(stats.objects_reported, 1);
        assert!(!stats.aborted);
    }

    #[test]
    fn test_iterate_over_heap_abort() {
        let heap = SimHeap::new();
        let tags = TagMap::default();
        let node = heap.define_class(ClassSpec::new("Node"));
        for _ in 0..5 {
            heap.new_instance(node);
        }

        let mut calls = 0;
        let stats = iterate_over_heap(&heap, &tags, HeapObjectFilter::Either, Some(node), |_, _| {
            calls += 1;
            IterationControl::Abort
        });
        assert_eq!(calls, 1);
        assert!(stats.aborted);
    }

    #[test]
    fn test_iterate_through_heap_primitive_fields() {
        let heap = SimHeap::new();
        let tags = TagMap::default();
        let point = heap.define_class(
            ClassSpec::new("Point")
                .field(FieldKind::Primitive(PrimitiveType::Int))
                .field(FieldKind::Reference)
                .field(FieldKind::Primitive(PrimitiveType::Long)),
        );
        let p = heap.new_instance(point);
        heap.set_field(p, 0, PrimitiveValue::Int(3));
        heap.set_field(p, 2, PrimitiveValue::Long(9));

        let mut values = Vec::new();
        let mut callbacks = HeapCallbacks::new().primitive_field(|field, tag| {
            values.push((field.index, field.value));
            *tag = 1;
            VisitControl::NONE
        });
        let stats =
            iterate_through_heap(&heap, &tags, HeapFilter::NONE, Some(point), &mut callbacks);
        drop(callbacks);

        assert_eq!(values, vec![(0, PrimitiveValue::Int(3)), (2, PrimitiveValue::Long(9))]);
        assert_eq!(stats.objects_reported, 1);
        assert_eq!(tags.get_tag(p), 1);
    }
}
