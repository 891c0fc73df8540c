//! Root Collection
//!
//! A walk without a seed object starts from the heap roots, reported in this
//! order:
//!
//! 1. JNI global handles
//! 2. System classes and the loaders that go with them
//! 3. Inflated monitors
//! 4. Thread objects of live, visible threads
//! 5. Other runtime-internal roots
//! 6. Stack locals and JNI locals of every live, visible thread, innermost
//!    frame first
//!
//! Class descriptors found among the roots are reported as their mirrors.
//! Null and invisible roots are never reported.

use super::callbacks::{HeapReferenceKind, StackInfo};
use super::reporter::CallbackInvoker;
use crate::object::{ClassRef, ObjectKind, ObjectRef};
use crate::runtime::{LocalSlot, StackFrame, ThreadSnapshot};
use serde::Serialize;
use std::fmt;

/// Number of roots reported per kind
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RootStats {
    pub jni_global: u64,
    pub system_class: u64,
    pub monitor: u64,
    pub thread: u64,
    pub other: u64,
    pub stack_local: u64,
    pub jni_local: u64,
}

impl RootStats {
    pub fn record(&mut self, kind: HeapReferenceKind) {
        match kind {
            HeapReferenceKind::JniGlobal => self.jni_global += 1,
            HeapReferenceKind::SystemClass => self.system_class += 1,
            HeapReferenceKind::Monitor => self.monitor += 1,
            HeapReferenceKind::Thread => self.thread += 1,
            HeapReferenceKind::Other => self.other += 1,
            HeapReferenceKind::StackLocal => self.stack_local += 1,
            HeapReferenceKind::JniLocal => self.jni_local += 1,
            _ => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.jni_global
            + self.system_class
            + self.monitor
            + self.thread
            + self.other
            + self.stack_local
            + self.jni_local
    }
}

impl fmt::Display for RootStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} roots (jni_global={}, system_class={}, monitor={}, thread={}, other={}, stack_local={}, jni_local={})",
            self.total(),
            self.jni_global,
            self.system_class,
            self.monitor,
            self.thread,
            self.other,
            self.stack_local,
            self.jni_local
        )
    }
}

/// Reports one category of simple roots until the tool stops the walk
struct SimpleRoots<'a, 'w, 'cb> {
    invoker: &'a mut CallbackInvoker<'w, 'cb>,
    stats: &'a mut RootStats,
    kind: HeapReferenceKind,
    stopped: bool,
}

impl SimpleRoots<'_, '_, '_> {
    fn set_kind(&mut self, kind: HeapReferenceKind) {
        self.kind = kind;
    }

    fn do_root(&mut self, obj: ObjectRef) {
        if self.stopped || obj.is_null() {
            return;
        }
        let runtime = self.invoker.runtime();
        let mut obj = obj;
        let mut kind = self.kind;
        match runtime.object_kind(obj) {
            ObjectKind::ClassDescriptor => obj = runtime.mirror_of(ClassRef::new(obj)),
            // e.g. the application class loader
            ObjectKind::Instance | ObjectKind::Mirror if kind == HeapReferenceKind::SystemClass => {
                kind = HeapReferenceKind::Other
            }
            _ => {}
        }
        if !runtime.is_visible(obj) {
            return;
        }
        self.stats.record(kind);
        self.stopped = !self.invoker.report_simple_root(kind, obj);
    }
}

/// Report every root except stack and JNI locals
///
/// Returns false when the tool aborted the walk.
pub(crate) fn collect_simple_roots(
    invoker: &mut CallbackInvoker<'_, '_>,
    stats: &mut RootStats,
) -> bool {
    let runtime = invoker.runtime();
    let mut roots = SimpleRoots {
        invoker,
        stats,
        kind: HeapReferenceKind::JniGlobal,
        stopped: false,
    };

    runtime.global_roots(&mut |obj| roots.do_root(obj));
    if roots.stopped {
        return false;
    }

    roots.set_kind(HeapReferenceKind::SystemClass);
    runtime.system_class_roots(&mut |obj| roots.do_root(obj));
    if roots.stopped {
        return false;
    }

    roots.set_kind(HeapReferenceKind::Monitor);
    runtime.monitor_roots(&mut |obj| roots.do_root(obj));
    if roots.stopped {
        return false;
    }

    roots.set_kind(HeapReferenceKind::Thread);
    for thread in runtime.threads().iter().filter(|t| t.is_reportable()) {
        roots.do_root(thread.thread_object);
        if roots.stopped {
            return false;
        }
    }

    roots.set_kind(HeapReferenceKind::Other);
    runtime.other_roots(&mut |obj| roots.do_root(obj));
    !roots.stopped
}

/// Report stack and JNI locals of every reportable thread
pub(crate) fn collect_stack_roots(
    invoker: &mut CallbackInvoker<'_, '_>,
    stats: &mut RootStats,
) -> bool {
    let threads = invoker.runtime().threads();
    threads
        .iter()
        .filter(|t| t.is_reportable())
        .all(|thread| collect_thread_stack_roots(invoker, stats, thread))
}

fn report_jni_locals(
    invoker: &mut CallbackInvoker<'_, '_>,
    stats: &mut RootStats,
    stack: &StackInfo,
    handles: &[ObjectRef],
) -> bool {
    let runtime = invoker.runtime();
    for &obj in handles {
        if obj.is_null() || !runtime.is_visible(obj) {
            continue;
        }
        stats.record(HeapReferenceKind::JniLocal);
        if !invoker.report_jni_local_root(stack, obj) {
            return false;
        }
    }
    true
}

fn collect_thread_stack_roots(
    invoker: &mut CallbackInvoker<'_, '_>,
    stats: &mut RootStats,
    thread: &ThreadSnapshot,
) -> bool {
    let runtime = invoker.runtime();
    let thread_tag = invoker.tag_for(thread.thread_object);
    let jni_stack = |depth: i32, method| StackInfo {
        thread_tag,
        thread_id: thread.thread_id,
        depth,
        method,
        location: -1,
        slot: -1,
    };

    if !thread.has_managed_frames() {
        return report_jni_locals(invoker, stats, &jni_stack(0, None), &thread.active_handles);
    }

    let mut is_top_frame = true;
    let mut depth = 0;
    let mut last_entry: Option<&[ObjectRef]> = None;

    for frame in &thread.frames {
        match frame {
            StackFrame::Managed { method, bci, locals } => {
                for (slot, local) in locals.iter().enumerate() {
                    let LocalSlot::Reference(obj) = *local else {
                        continue;
                    };
                    if obj.is_null() || !runtime.is_visible(obj) {
                        continue;
                    }
                    let stack = StackInfo {
                        thread_tag,
                        thread_id: thread.thread_id,
                        depth,
                        method: Some(*method),
                        location: *bci,
                        slot: slot as i32,
                    };
                    stats.record(HeapReferenceKind::StackLocal);
                    if !invoker.report_stack_ref_root(&stack, obj) {
                        return false;
                    }
                }
                last_entry = None;
                depth += 1;
            }
            StackFrame::Native { method } => {
                // locals of the top native frame live in the thread's active
                // block, the others in the entry frame just inside them
                let handles = if is_top_frame {
                    Some(thread.active_handles.as_slice())
                } else {
                    last_entry
                };
                if let Some(handles) = handles {
                    let stack = jni_stack(depth, Some(*method));
                    if !report_jni_locals(invoker, stats, &stack, handles) {
                        return false;
                    }
                }
                last_entry = None;
                depth += 1;
            }
            StackFrame::Entry { handles } => last_entry = Some(handles.as_slice()),
        }
        is_top_frame = false;
    }
    true
}
