//! Callback Invoker
//!
//! Sits between the walk engine and the tool. The engine reports roots and
//! edges in protocol-neutral terms ([`HeapReferenceKind`] plus the objects
//! involved); the invoker applies filters, snapshots tags, calls the tool,
//! writes tags back and turns the tool's answer into "keep going" or "stop".
//!
//! ## Decision Table
//!
//! | Protocol | Answer | Object pushed | Walk continues |
//! |----------|--------|---------------|----------------|
//! | basic root | `Continue` | if following references | yes |
//! | basic root | `Ignore` | no | yes |
//! | basic edge | `Continue` | if unvisited | yes |
//! | basic edge | `Ignore` | no | yes |
//! | basic any | `Abort` | no | no |
//! | advanced | `VISIT_OBJECTS` | if unvisited | unless `ABORT` |
//! | advanced | no callback or filtered out | if unvisited | yes |

use super::callbacks::{
    ArrayPrimitiveValueCallback, BasicCallbacks, HeapCallbacks, HeapFilter, HeapReference,
    HeapReferenceKind, HeapRootKind, IterationControl, ObjectReferenceKind, PrimitiveField,
    ReferenceInfo, StackInfo, StringPrimitiveValueCallback, TagSlots, VisitControl,
};
use super::wrapper::{CallbackWrapper, TwoOopCallbackWrapper};
use crate::marker::{MarkerStats, ObjectMarker, VisitStack, VisitStackStats};
use crate::object::{ClassRef, ObjectKind, ObjectRef, PrimitiveValue};
use crate::runtime::ManagedRuntime;
use crate::tagmap::TagMap;

/// State every report touches
pub(crate) struct VisitContext<'w> {
    pub runtime: &'w dyn ManagedRuntime,
    pub tags: &'w TagMap,
    pub marker: ObjectMarker<'w>,
    pub stack: VisitStack,
    pub callbacks_invoked: u64,
}

impl<'w> VisitContext<'w> {
    /// Push `obj` unless it was visited already
    #[inline]
    fn check_for_visit(&mut self, obj: ObjectRef) -> bool {
        if !self.marker.visited(obj) {
            self.stack.push(obj);
        }
        true
    }

    #[inline]
    fn tag_for(&self, obj: ObjectRef) -> i64 {
        self.tags.get_tag(self.runtime.tag_identity(obj))
    }
}

/// Exact class match used by the advanced klass filter
#[inline]
fn filtered_by_klass(
    runtime: &dyn ManagedRuntime,
    klass_filter: Option<ClassRef>,
    obj: ObjectRef,
) -> bool {
    klass_filter.is_some_and(|klass| runtime.class_of(obj) != klass)
}

// ============================================================================
// Basic Protocol
// ============================================================================

pub(crate) struct BasicReporter<'cb> {
    callbacks: BasicCallbacks<'cb>,
    last_referrer: ObjectRef,
    last_referrer_tag: i64,
}

impl<'cb> BasicReporter<'cb> {
    fn new(callbacks: BasicCallbacks<'cb>) -> Self {
        Self {
            callbacks,
            last_referrer: ObjectRef::NULL,
            last_referrer_tag: 0,
        }
    }

    fn root_answer(
        &self,
        ctx: &mut VisitContext<'_>,
        control: IterationControl,
        obj: ObjectRef,
    ) -> bool {
        if control == IterationControl::Continue && self.callbacks.object_reference.is_some() {
            ctx.stack.push(obj);
        }
        control != IterationControl::Abort
    }

    fn heap_root(
        &mut self,
        ctx: &mut VisitContext<'_>,
        kind: HeapRootKind,
        obj: ObjectRef,
    ) -> bool {
        let Some(cb) = self.callbacks.heap_root.as_mut() else {
            return ctx.check_for_visit(obj);
        };
        let mut wrapper = CallbackWrapper::new(ctx.runtime, ctx.tags, obj);
        let info = wrapper.info();
        ctx.callbacks_invoked += 1;
        let control = cb(kind, &info, wrapper.tag_mut());
        wrapper.finish(ctx.tags);
        self.root_answer(ctx, control, obj)
    }

    fn stack_root(
        &mut self,
        ctx: &mut VisitContext<'_>,
        kind: HeapRootKind,
        stack: &StackInfo,
        obj: ObjectRef,
    ) -> bool {
        let Some(cb) = self.callbacks.stack_reference.as_mut() else {
            return ctx.check_for_visit(obj);
        };
        let mut wrapper = CallbackWrapper::new(ctx.runtime, ctx.tags, obj);
        let info = wrapper.info();
        ctx.callbacks_invoked += 1;
        let control = cb(kind, stack, &info, wrapper.tag_mut());
        wrapper.finish(ctx.tags);
        self.root_answer(ctx, control, obj)
    }

    fn reference(
        &mut self,
        ctx: &mut VisitContext<'_>,
        kind: ObjectReferenceKind,
        referrer: ObjectRef,
        obj: ObjectRef,
        index: i32,
    ) -> bool {
        // consecutive edges of one referrer reuse its tag
        let referrer_tag = if referrer == self.last_referrer {
            self.last_referrer_tag
        } else {
            ctx.tag_for(referrer)
        };

        let Some(cb) = self.callbacks.object_reference.as_mut() else {
            return ctx.check_for_visit(obj);
        };
        let mut wrapper = CallbackWrapper::new(ctx.runtime, ctx.tags, obj);
        let info = wrapper.info();
        ctx.callbacks_invoked += 1;
        let control = cb(kind, &info, wrapper.tag_mut(), referrer_tag, index);

        // a self reference may have retagged the referrer
        self.last_referrer = referrer;
        self.last_referrer_tag = if referrer == obj {
            wrapper.tag()
        } else {
            referrer_tag
        };
        wrapper.finish(ctx.tags);

        match control {
            IterationControl::Continue => ctx.check_for_visit(obj),
            IterationControl::Ignore => true,
            IterationControl::Abort => false,
        }
    }
}

// ============================================================================
// Advanced Protocol
// ============================================================================

pub(crate) struct AdvancedReporter<'cb> {
    callbacks: HeapCallbacks<'cb>,
    heap_filter: HeapFilter,
    klass_filter: Option<ClassRef>,
}

impl<'cb> AdvancedReporter<'cb> {
    fn answer(ctx: &mut VisitContext<'_>, control: VisitControl, obj: ObjectRef) -> bool {
        if control.is_abort() {
            return false;
        }
        if control.visits_objects() {
            ctx.check_for_visit(obj);
        }
        true
    }

    fn root(
        &mut self,
        ctx: &mut VisitContext<'_>,
        kind: HeapReferenceKind,
        info: Option<ReferenceInfo>,
        obj: ObjectRef,
    ) -> bool {
        let (heap_filter, klass_filter) = (self.heap_filter, self.klass_filter);
        let Some(cb) = self.callbacks.heap_reference.as_mut() else {
            return ctx.check_for_visit(obj);
        };
        if filtered_by_klass(ctx.runtime, klass_filter, obj) {
            return ctx.check_for_visit(obj);
        }

        let mut wrapper = CallbackWrapper::new(ctx.runtime, ctx.tags, obj);
        if heap_filter.filters_out(wrapper.tag(), wrapper.class_tag()) {
            return ctx.check_for_visit(obj);
        }

        let object = wrapper.info();
        let reference = HeapReference {
            kind,
            info,
            class_tag: object.class_tag,
            referrer_class_tag: 0,
            size: object.size,
            length: object.length,
        };
        let mut slots = TagSlots::root(wrapper.tag());
        ctx.callbacks_invoked += 1;
        let control = cb(&reference, &mut slots);
        *wrapper.tag_mut() = slots.tag();
        wrapper.finish(ctx.tags);
        Self::answer(ctx, control, obj)
    }

    fn reference(
        &mut self,
        ctx: &mut VisitContext<'_>,
        kind: HeapReferenceKind,
        referrer: ObjectRef,
        obj: ObjectRef,
        index: i32,
    ) -> bool {
        let (heap_filter, klass_filter) = (self.heap_filter, self.klass_filter);
        let Some(cb) = self.callbacks.heap_reference.as_mut() else {
            return ctx.check_for_visit(obj);
        };
        if filtered_by_klass(ctx.runtime, klass_filter, obj) {
            return ctx.check_for_visit(obj);
        }

        let mut wrapper = TwoOopCallbackWrapper::new(ctx.runtime, ctx.tags, referrer, obj);
        let object = wrapper.object().info();
        if heap_filter.filters_out(wrapper.object().tag(), object.class_tag) {
            return ctx.check_for_visit(obj);
        }

        let info = match kind {
            HeapReferenceKind::Field | HeapReferenceKind::StaticField => {
                Some(ReferenceInfo::Field { index })
            }
            HeapReferenceKind::ArrayElement => Some(ReferenceInfo::Array { index }),
            HeapReferenceKind::ConstantPool => Some(ReferenceInfo::ConstantPool { index }),
            _ => None,
        };
        let reference = HeapReference {
            kind,
            info,
            class_tag: object.class_tag,
            referrer_class_tag: wrapper.referrer_class_tag(),
            size: object.size,
            length: object.length,
        };
        let mut slots = wrapper.slots();
        ctx.callbacks_invoked += 1;
        let control = cb(&reference, &mut slots);
        wrapper.apply(&slots);
        wrapper.finish(ctx.tags);
        Self::answer(ctx, control, obj)
    }

    fn primitive_field(
        &mut self,
        ctx: &mut VisitContext<'_>,
        kind: HeapReferenceKind,
        obj: ObjectRef,
        index: i32,
        value: PrimitiveValue,
    ) -> bool {
        let (heap_filter, klass_filter) = (self.heap_filter, self.klass_filter);
        let Some(cb) = self.callbacks.primitive_field.as_mut() else {
            return true;
        };
        if filtered_by_klass(ctx.runtime, klass_filter, obj) {
            return true;
        }
        let mut wrapper = CallbackWrapper::new(ctx.runtime, ctx.tags, obj);
        if heap_filter.filters_out(wrapper.tag(), wrapper.class_tag()) {
            return true;
        }

        let field = PrimitiveField {
            kind,
            index,
            class_tag: wrapper.class_tag(),
            value,
        };
        ctx.callbacks_invoked += 1;
        let control = cb(&field, wrapper.tag_mut());
        wrapper.finish(ctx.tags);
        !control.is_abort()
    }

    fn string_value(&mut self, ctx: &mut VisitContext<'_>, obj: ObjectRef) -> bool {
        let (heap_filter, klass_filter) = (self.heap_filter, self.klass_filter);
        let Some(cb) = self.callbacks.string_primitive_value.as_mut() else {
            return true;
        };
        if filtered_by_klass(ctx.runtime, klass_filter, obj) {
            return true;
        }
        let mut wrapper = CallbackWrapper::new(ctx.runtime, ctx.tags, obj);
        if heap_filter.filters_out(wrapper.tag(), wrapper.class_tag()) {
            return true;
        }
        ctx.callbacks_invoked += 1;
        let control = invoke_string_value_callback(cb, ctx.runtime, &mut wrapper, obj);
        wrapper.finish(ctx.tags);
        !control.is_abort()
    }

    fn array_values(&mut self, ctx: &mut VisitContext<'_>, obj: ObjectRef) -> bool {
        let (heap_filter, klass_filter) = (self.heap_filter, self.klass_filter);
        let Some(cb) = self.callbacks.array_primitive_value.as_mut() else {
            return true;
        };
        if filtered_by_klass(ctx.runtime, klass_filter, obj) {
            return true;
        }
        let mut wrapper = CallbackWrapper::new(ctx.runtime, ctx.tags, obj);
        if heap_filter.filters_out(wrapper.tag(), wrapper.class_tag()) {
            return true;
        }
        ctx.callbacks_invoked += 1;
        let control = invoke_array_primitive_value_callback(cb, ctx.runtime, &mut wrapper, obj);
        wrapper.finish(ctx.tags);
        !control.is_abort()
    }
}

/// Report the UTF-16 value of a string
pub(crate) fn invoke_string_value_callback(
    cb: &mut StringPrimitiveValueCallback<'_>,
    runtime: &dyn ManagedRuntime,
    wrapper: &mut CallbackWrapper,
    string: ObjectRef,
) -> VisitControl {
    let value = runtime.string_value(string);
    let info = wrapper.info();
    cb(&info, wrapper.tag_mut(), &value)
}

/// Report the elements of a primitive array in one call
pub(crate) fn invoke_array_primitive_value_callback(
    cb: &mut ArrayPrimitiveValueCallback<'_>,
    runtime: &dyn ManagedRuntime,
    wrapper: &mut CallbackWrapper,
    array: ObjectRef,
) -> VisitControl {
    let ObjectKind::PrimitiveArray(element_type) = runtime.object_kind(array) else {
        return VisitControl::NONE;
    };
    let values = runtime.primitive_array_values(array);
    let info = wrapper.info();
    cb(&info, wrapper.tag_mut(), element_type, &values)
}

// ============================================================================
// Invoker
// ============================================================================

/// Callback protocol of one walk
pub(crate) enum ReferenceReporter<'cb> {
    Basic(BasicReporter<'cb>),
    Advanced(AdvancedReporter<'cb>),
}

impl<'cb> ReferenceReporter<'cb> {
    pub fn basic(callbacks: BasicCallbacks<'cb>) -> Self {
        ReferenceReporter::Basic(BasicReporter::new(callbacks))
    }

    pub fn advanced(
        callbacks: HeapCallbacks<'cb>,
        heap_filter: HeapFilter,
        klass_filter: Option<ClassRef>,
    ) -> Self {
        ReferenceReporter::Advanced(AdvancedReporter {
            callbacks,
            heap_filter,
            klass_filter,
        })
    }
}

/// Counters handed back when the invoker is torn down
#[derive(Debug, Clone, Copy)]
pub(crate) struct InvokerStats {
    pub marker: MarkerStats,
    pub stack: VisitStackStats,
    pub callbacks_invoked: u64,
}

/// Dispatches one walk's reports to the tool
pub(crate) struct CallbackInvoker<'w, 'cb> {
    ctx: VisitContext<'w>,
    reporter: ReferenceReporter<'cb>,
}

impl<'w, 'cb> CallbackInvoker<'w, 'cb> {
    /// Set up marking and the visit stack
    ///
    /// Must run under the global pause.
    pub fn new(
        runtime: &'w dyn ManagedRuntime,
        tags: &'w TagMap,
        reporter: ReferenceReporter<'cb>,
    ) -> Self {
        let config = tags.config();
        Self {
            ctx: VisitContext {
                runtime,
                tags,
                marker: ObjectMarker::init(runtime, config.initial_save_stack_size),
                stack: VisitStack::with_capacity(config.initial_visit_stack_size),
                callbacks_invoked: 0,
            },
            reporter,
        }
    }

    #[inline]
    pub fn runtime(&self) -> &'w dyn ManagedRuntime {
        self.ctx.runtime
    }

    pub fn is_basic(&self) -> bool {
        matches!(self.reporter, ReferenceReporter::Basic(_))
    }

    pub fn is_following_references(&self) -> bool {
        match &self.reporter {
            ReferenceReporter::Basic(r) => r.callbacks.is_following_references(),
            ReferenceReporter::Advanced(_) => true,
        }
    }

    pub fn is_reporting_primitive_fields(&self) -> bool {
        matches!(
            &self.reporter,
            ReferenceReporter::Advanced(r) if r.callbacks.primitive_field.is_some()
        )
    }

    pub fn is_reporting_string_values(&self) -> bool {
        matches!(
            &self.reporter,
            ReferenceReporter::Advanced(r) if r.callbacks.string_primitive_value.is_some()
        )
    }

    pub fn is_reporting_primitive_array_values(&self) -> bool {
        matches!(
            &self.reporter,
            ReferenceReporter::Advanced(r) if r.callbacks.array_primitive_value.is_some()
        )
    }

    // === Work List ===

    #[inline]
    pub fn push(&mut self, obj: ObjectRef) {
        self.ctx.stack.push(obj);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<ObjectRef> {
        self.ctx.stack.pop()
    }

    #[inline]
    pub fn visited(&self, obj: ObjectRef) -> bool {
        self.ctx.marker.visited(obj)
    }

    #[inline]
    pub fn mark(&mut self, obj: ObjectRef) {
        self.ctx.marker.mark(obj);
    }

    /// Tag of `obj`, read outside of any callback
    pub fn tag_for(&self, obj: ObjectRef) -> i64 {
        self.ctx.tag_for(obj)
    }

    // === Roots ===

    /// Report a root that is not a stack or JNI local
    pub fn report_simple_root(&mut self, kind: HeapReferenceKind, obj: ObjectRef) -> bool {
        debug_assert!(
            kind.is_root()
                && kind != HeapReferenceKind::StackLocal
                && kind != HeapReferenceKind::JniLocal,
            "{} is not a simple root",
            kind
        );
        match &mut self.reporter {
            ReferenceReporter::Basic(r) => {
                let root_kind = kind.to_root_kind().unwrap_or(HeapRootKind::Other);
                r.heap_root(&mut self.ctx, root_kind, obj)
            }
            ReferenceReporter::Advanced(r) => r.root(&mut self.ctx, kind, None, obj),
        }
    }

    /// Report a reference-typed local of a managed frame
    pub fn report_stack_ref_root(&mut self, stack: &StackInfo, obj: ObjectRef) -> bool {
        match &mut self.reporter {
            ReferenceReporter::Basic(r) => {
                r.stack_root(&mut self.ctx, HeapRootKind::StackLocal, stack, obj)
            }
            ReferenceReporter::Advanced(r) => r.root(
                &mut self.ctx,
                HeapReferenceKind::StackLocal,
                Some(ReferenceInfo::Stack(*stack)),
                obj,
            ),
        }
    }

    /// Report a JNI local handle of a native frame
    pub fn report_jni_local_root(&mut self, stack: &StackInfo, obj: ObjectRef) -> bool {
        match &mut self.reporter {
            ReferenceReporter::Basic(r) => {
                r.stack_root(&mut self.ctx, HeapRootKind::JniLocal, stack, obj)
            }
            ReferenceReporter::Advanced(r) => r.root(
                &mut self.ctx,
                HeapReferenceKind::JniLocal,
                Some(ReferenceInfo::Stack(*stack)),
                obj,
            ),
        }
    }

    // === Edges ===

    /// Report the edge `referrer -> obj`
    ///
    /// Invisible targets are dropped before any callback runs. `index` is
    /// the field, element or constant pool index, -1 where it has none.
    pub fn report_reference(
        &mut self,
        kind: HeapReferenceKind,
        referrer: ObjectRef,
        obj: ObjectRef,
        index: i32,
    ) -> bool {
        if !self.ctx.runtime.is_visible(obj) {
            return true;
        }
        match &mut self.reporter {
            ReferenceReporter::Basic(r) => match kind.to_object_reference_kind() {
                Some(basic_kind) => r.reference(&mut self.ctx, basic_kind, referrer, obj, index),
                None => true,
            }
            ReferenceReporter::Advanced(r) => {
                r.reference(&mut self.ctx, kind, referrer, obj, index)
            }
        }
    }

    // === Values ===

    pub fn report_primitive_field(
        &mut self,
        kind: HeapReferenceKind,
        obj: ObjectRef,
        index: i32,
        value: PrimitiveValue,
    ) -> bool {
        match &mut self.reporter {
            ReferenceReporter::Advanced(r) => {
                r.primitive_field(&mut self.ctx, kind, obj, index, value)
            }
            ReferenceReporter::Basic(_) => true,
        }
    }

    pub fn report_string_value(&mut self, obj: ObjectRef) -> bool {
        match &mut self.reporter {
            ReferenceReporter::Advanced(r) => r.string_value(&mut self.ctx, obj),
            ReferenceReporter::Basic(_) => true,
        }
    }

    pub fn report_primitive_array_values(&mut self, obj: ObjectRef) -> bool {
        match &mut self.reporter {
            ReferenceReporter::Advanced(r) => r.array_values(&mut self.ctx, obj),
            ReferenceReporter::Basic(_) => true,
        }
    }

    /// Restore headers and hand back the counters
    pub fn finish(self) -> InvokerStats {
        let stack = self.ctx.stack.stats();
        InvokerStats {
            marker: self.ctx.marker.done(),
            stack,
            callbacks_invoked: self.ctx.callbacks_invoked,
        }
    }
}
