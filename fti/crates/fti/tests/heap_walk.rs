//! Basic Heap Walk Tests - Reachability, Control Flow and Roots
//!
//! These tests verify that the basic protocol walk:
//! - Visits every reachable object exactly once, cycles included
//! - Stops on abort and prunes on ignore
//! - Reports self references with one consistent tag
//! - Reports every root kind, stack and JNI locals included
//! - Leaves object headers as it found them

mod common;

use common::{assert_tag, TagFixture, LEFT, RIGHT};
use fti::object::{LockState, MethodId};
use fti::runtime::{LocalSlot, StackFrame};
use fti::walk::{BasicCallbacks, HeapRootKind, IterationControl, ObjectReferenceKind, StackInfo};
use fti::ObjectRef;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// ============================================================================
/// COVERAGE
/// ============================================================================

/// Test a two-object cycle reached from a root
///
/// **Bug this finds:** Visited marks not honoured, infinite loop on cycles
/// **Invariant verified:** A and B are each visited exactly once
#[test]
fn test_cycle_visited_once() {
    let fixture = TagFixture::with_defaults();
    let a = fixture.node();
    let b = fixture.node();
    fixture.link(a, LEFT, b);
    fixture.link(b, LEFT, a);
    fixture.global(a);
    fixture.tag(a, 1);
    fixture.tag(b, 2);

    let mut field_edges = Vec::new();
    let callbacks = BasicCallbacks::new().object_reference(|kind, _, tag, referrer_tag, index| {
        if kind == ObjectReferenceKind::Field {
            field_edges.push((referrer_tag, *tag, index));
        }
        IterationControl::Continue
    });
    let stats = fixture.env.iterate_over_reachable_objects(callbacks).unwrap();

    field_edges.sort();
    assert_eq!(field_edges, vec![(1, 2, 0), (2, 1, 0)], "each object scanned once");
    assert!(!stats.aborted);
    assert!(stats.roots.jni_global >= 1);
}

/// Test a random graph against a breadth-first model
///
/// **Bug this finds:** Objects missed or scanned twice on shared subgraphs
/// **Invariant verified:** Reported objects are exactly the reachable ones,
/// and each reachable object's fields are reported once
#[test]
fn test_random_graph_matches_model() {
    let fixture = TagFixture::with_defaults();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let nodes: Vec<ObjectRef> = (0..300).map(|_| fixture.node()).collect();
    let mut edges = vec![[None; 2]; nodes.len()];
    for (i, slots) in edges.iter_mut().enumerate() {
        for (slot, target) in slots.iter_mut().enumerate() {
            if rng.gen_bool(0.6) {
                let j = rng.gen_range(0..nodes.len());
                fixture.link(nodes[i], slot, nodes[j]);
                *target = Some(j);
            }
        }
    }
    let roots: Vec<usize> = (0..5).map(|_| rng.gen_range(0..nodes.len())).collect();
    for &r in &roots {
        fixture.global(nodes[r]);
    }
    for (i, obj) in nodes.iter().enumerate() {
        fixture.env.tag_map().set_tag(*obj, i as i64 + 1);
    }

    let mut reachable = HashSet::new();
    let mut queue: VecDeque<usize> = roots.iter().copied().collect();
    while let Some(i) = queue.pop_front() {
        if reachable.insert(i) {
            queue.extend(edges[i].iter().flatten().copied());
        }
    }
    let expected_fields: usize = reachable.iter().map(|&i| edges[i].iter().flatten().count()).sum();

    let mut reported = HashSet::new();
    let mut fields = 0;
    let mut roots_seen = Vec::new();
    fixture
        .env
        .iterate_over_reachable_objects(
            BasicCallbacks::new()
                .heap_root(|_, _, tag| {
                    roots_seen.push(*tag);
                    IterationControl::Continue
                })
                .object_reference(|kind, _, tag, _, _| {
                    if kind == ObjectReferenceKind::Field {
                        fields += 1;
                        reported.insert(*tag as usize - 1);
                    }
                    IterationControl::Continue
                }),
        )
        .unwrap();
    for tag in roots_seen.into_iter().filter(|t| *t != 0) {
        reported.insert(tag as usize - 1);
    }

    assert_eq!(reported, reachable);
    assert_eq!(fields, expected_fields);
}

/// Test a chain far deeper than any call stack
///
/// **Bug this finds:** Recursive traversal overflowing the stack
/// **Invariant verified:** The walk is iterative and reaches the tail
#[test]
fn test_deep_chain() {
    let fixture = TagFixture::with_defaults();
    let nodes = fixture.chain(50_000);
    let tail = *nodes.last().unwrap();
    fixture.tag(tail, 9);

    let mut reached_tail = false;
    let stats = fixture
        .env
        .iterate_over_objects_reachable_from_object(fixture.local(nodes[0]), |kind, _, tag, _, _| {
            if kind == ObjectReferenceKind::Field && *tag == 9 {
                reached_tail = true;
            }
            IterationControl::Continue
        })
        .unwrap();

    assert!(reached_tail);
    assert!(stats.objects_visited >= 50_000);
}

/// Test that a walk without an object callback stops at the roots
///
/// **Bug this finds:** Edges followed although nobody listens
/// **Invariant verified:** Only roots are reported; nothing is scanned
#[test]
fn test_roots_only_without_object_callback() {
    let fixture = TagFixture::with_defaults();
    let a = fixture.node();
    fixture.link(a, LEFT, fixture.node());
    fixture.global(a);

    let mut roots = 0;
    let stats = fixture
        .env
        .iterate_over_reachable_objects(BasicCallbacks::new().heap_root(|_, _, _| {
            roots += 1;
            IterationControl::Continue
        }))
        .unwrap();

    assert!(roots > 0);
    assert_eq!(stats.objects_visited, 0);
}

/// ============================================================================
/// CONTROL
/// ============================================================================

/// Test abort on the second edge
///
/// **Bug this finds:** Abort checked only between objects
/// **Invariant verified:** Exactly two edges are reported
#[test]
fn test_abort_on_second_edge() {
    let fixture = TagFixture::with_defaults();
    let nodes = fixture.chain(10);

    let mut edges = 0;
    let stats = fixture
        .env
        .iterate_over_objects_reachable_from_object(fixture.local(nodes[0]), |_, _, _, _, _| {
            edges += 1;
            if edges == 2 {
                IterationControl::Abort
            } else {
                IterationControl::Continue
            }
        })
        .unwrap();

    assert_eq!(edges, 2);
    assert!(stats.aborted, "abort is reported, not an error");
}

/// Test ignore on one object
///
/// **Bug this finds:** Ignored objects scanned anyway
/// **Invariant verified:** X is reported once; X's own edges never are
#[test]
fn test_ignore_prunes_subtree() {
    let fixture = TagFixture::with_defaults();
    let root = fixture.node();
    let x = fixture.node();
    let y = fixture.node();
    fixture.link(root, LEFT, x);
    fixture.link(x, LEFT, y);
    fixture.tag(x, 10);
    fixture.tag(y, 20);

    let mut x_reports = 0;
    let mut from_x = 0;
    let seed = fixture.local(root);
    fixture
        .env
        .iterate_over_objects_reachable_from_object(seed, |_, _, tag, referrer_tag, _| {
            if referrer_tag == 10 {
                from_x += 1;
            }
            if *tag == 10 {
                x_reports += 1;
                return IterationControl::Ignore;
            }
            IterationControl::Continue
        })
        .unwrap();

    assert_eq!(x_reports, 1);
    assert_eq!(from_x, 0, "edges of an ignored object were reported");
}

/// Test a field referencing its own object
///
/// **Bug this finds:** Referrer tag cache returning a stale value
/// **Invariant verified:** One edge; referrer tag equals object tag
#[test]
fn test_self_reference() {
    let fixture = TagFixture::with_defaults();
    let a = fixture.node();
    fixture.link(a, LEFT, a);
    fixture.tag(a, 5);

    let mut self_edges = Vec::new();
    let seed = fixture.local(a);
    fixture
        .env
        .iterate_over_objects_reachable_from_object(seed, |kind, _, tag, referrer_tag, _| {
            if kind == ObjectReferenceKind::Field {
                self_edges.push((referrer_tag, *tag));
                // retag through the object slot
                *tag = 6;
            }
            IterationControl::Continue
        })
        .unwrap();

    assert_eq!(self_edges, vec![(5, 5)]);
    assert_tag(&fixture, a, 6, "write-through on a self reference");
}

/// Test the referrer tag cache across a retagging callback
///
/// **Bug this finds:** Cache reusing the pre-callback tag after a self
/// reference wrote a new one
/// **Invariant verified:** Later edges of the same referrer see the new tag
#[test]
fn test_referrer_cache_sees_self_retag() {
    let fixture = TagFixture::with_defaults();
    let a = fixture.node();
    let b = fixture.node();
    fixture.link(a, LEFT, a);
    fixture.link(a, RIGHT, b);
    fixture.tag(a, 5);

    let mut referrer_tags = Vec::new();
    let seed = fixture.local(a);
    fixture
        .env
        .iterate_over_objects_reachable_from_object(seed, |kind, _, tag, referrer_tag, index| {
            if kind == ObjectReferenceKind::Field {
                referrer_tags.push((index, referrer_tag));
                if index == 0 {
                    *tag = 8;
                }
            }
            IterationControl::Continue
        })
        .unwrap();

    assert_eq!(referrer_tags, vec![(0, 5), (1, 8)]);
}

/// Test tagging through the environment from inside a callback
///
/// **Bug this finds:** Walk write-back clobbering a concurrent set_tag
/// **Invariant verified:** The callback's set_tag is visible after the walk
#[test]
fn test_tag_from_callback_visible_after_walk() {
    let fixture = TagFixture::with_defaults();
    let a = fixture.node();
    let b = fixture.node();
    fixture.link(a, LEFT, b);
    let b_handle = fixture.local(b);
    let env = &fixture.env;

    env.iterate_over_objects_reachable_from_object(fixture.local(a), |kind, _, _, _, _| {
        if kind == ObjectReferenceKind::Field {
            env.set_tag(b_handle, 44).unwrap();
        }
        IterationControl::Continue
    })
    .unwrap();

    assert_tag(&fixture, b, 44, "tag set during the walk");
}

/// Test that invisible objects are never reported
///
/// **Bug this finds:** Runtime-internal objects leaking to tools
/// **Invariant verified:** Edges to internal objects are dropped
#[test]
fn test_internal_objects_hidden() {
    let fixture = TagFixture::with_defaults();
    let a = fixture.node();
    fixture.link(a, LEFT, fixture.heap.new_internal());

    let mut fields = 0;
    fixture
        .env
        .iterate_over_objects_reachable_from_object(fixture.local(a), |kind, _, _, _, _| {
            if kind == ObjectReferenceKind::Field {
                fields += 1;
            }
            IterationControl::Continue
        })
        .unwrap();

    assert_eq!(fields, 0);
}

/// Test that marks and saved headers are undone
///
/// **Bug this finds:** Identity hash or lock state lost after a walk
/// **Invariant verified:** Every header is restored, abort included
#[test]
fn test_headers_restored() {
    let fixture = TagFixture::with_defaults();
    let nodes = fixture.chain(4);
    let hash = fixture.heap.identity_hash(nodes[1]);
    fixture.heap.lock_object(nodes[2]);
    let runtime = fixture.env.runtime();
    let before: Vec<_> = nodes.iter().map(|n| runtime.mark_word(*n)).collect();

    let stats = fixture
        .env
        .iterate_over_objects_reachable_from_object(fixture.local(nodes[0]), |_, _, _, _, _| {
            IterationControl::Continue
        })
        .unwrap();
    assert!(stats.headers_preserved >= 2);

    let mut calls = 0;
    fixture
        .env
        .iterate_over_objects_reachable_from_object(fixture.local(nodes[0]), |_, _, _, _, _| {
            calls += 1;
            if calls == 3 {
                IterationControl::Abort
            } else {
                IterationControl::Continue
            }
        })
        .unwrap();

    let after: Vec<_> = nodes.iter().map(|n| runtime.mark_word(*n)).collect();
    assert_eq!(before, after);
    assert_eq!(fixture.heap.identity_hash(nodes[1]), hash);
}

/// Test a mutator on another thread during a walk
///
/// **Bug this finds:** A lock taken mid-walk overwriting the visited bits,
/// so the object is scanned twice and its lock is lost on restore
/// **Invariant verified:** The mutator waits for the walk; A is scanned once
/// and stays locked afterwards
#[test]
fn test_mutator_waits_for_walk() {
    let fixture = TagFixture::with_defaults();
    let a = fixture.node();
    let b = fixture.node();
    fixture.link(a, LEFT, b);
    fixture.link(b, LEFT, a);
    fixture.tag(a, 1);
    fixture.tag(b, 2);

    let locked = Arc::new(AtomicBool::new(false));
    let mut mutator = None;
    let mut a_edges = 0;
    let seed = fixture.local(a);
    fixture
        .env
        .iterate_over_objects_reachable_from_object(seed, |kind, _, tag, referrer_tag, _| {
            if kind == ObjectReferenceKind::Field && referrer_tag == 1 {
                a_edges += 1;
            }
            if *tag == 2 && mutator.is_none() {
                let heap = fixture.heap.clone();
                let locked_in_mutator = Arc::clone(&locked);
                mutator = Some(thread::spawn(move || {
                    heap.lock_object(a);
                    locked_in_mutator.store(true, Ordering::SeqCst);
                }));
                thread::sleep(Duration::from_millis(50));
                assert!(!locked.load(Ordering::SeqCst), "mutator ran during the walk");
            }
            IterationControl::Continue
        })
        .unwrap();

    mutator.expect("walk should reach B").join().unwrap();
    assert!(locked.load(Ordering::SeqCst));
    assert_eq!(a_edges, 1, "A's fields reported more than once");
    assert_eq!(fixture.env.runtime().mark_word(a).lock_state(), LockState::StackLocked);
}

/// ============================================================================
/// ROOTS
/// ============================================================================

fn root_kinds(fixture: &TagFixture) -> Vec<(HeapRootKind, i64)> {
    let mut roots = Vec::new();
    fixture
        .env
        .iterate_over_reachable_objects(BasicCallbacks::new().heap_root(|kind, _, tag| {
            if *tag != 0 {
                roots.push((kind, *tag));
            }
            IterationControl::Continue
        }))
        .unwrap();
    roots
}

/// Test the simple root kinds
///
/// **Bug this finds:** Root categories swapped or missing
/// **Invariant verified:** Globals, system classes, monitors, threads and
/// other roots carry their own kind
#[test]
fn test_simple_root_kinds() {
    let fixture = TagFixture::with_defaults();
    let global = fixture.node();
    fixture.global(global);
    fixture.tag(global, 1);

    let runtime = fixture.env.runtime();
    fixture.tag(runtime.mirror_of(fixture.node_class), 2);

    let monitor = fixture.node();
    fixture.heap.inflate_monitor(monitor);
    fixture.tag(monitor, 3);

    let thread = fixture.heap.spawn_thread();
    fixture.tag(fixture.heap.thread_object(thread), 4);

    let other = fixture.node();
    fixture.heap.add_other_root(other);
    fixture.tag(other, 5);

    // a plain instance in the system class set is an "other" root
    let loader = fixture.node();
    fixture.heap.add_system_root(loader);
    fixture.tag(loader, 6);

    let mut roots = root_kinds(&fixture);
    roots.sort_by_key(|(_, tag)| *tag);
    assert_eq!(
        roots,
        vec![
            (HeapRootKind::JniGlobal, 1),
            (HeapRootKind::SystemClass, 2),
            (HeapRootKind::Monitor, 3),
            (HeapRootKind::Thread, 4),
            (HeapRootKind::Other, 5),
            (HeapRootKind::Other, 6),
        ]
    );
}

/// Test that exiting and hidden threads are skipped
///
/// **Bug this finds:** Dying or internal threads exposed to tools
/// **Invariant verified:** Only reportable threads appear as roots
#[test]
fn test_unreportable_threads_skipped() {
    let fixture = TagFixture::with_defaults();
    let exiting = fixture.heap.spawn_thread();
    let hidden = fixture.heap.spawn_thread();
    fixture.heap.set_exiting(exiting, true);
    fixture.heap.set_hidden(hidden, true);
    fixture.tag(fixture.heap.thread_object(exiting), 1);
    fixture.tag(fixture.heap.thread_object(hidden), 2);

    assert!(root_kinds(&fixture).is_empty());
}

/// Test stack locals and JNI locals of a mixed stack
///
/// **Bug this finds:** Wrong depth, slot or handle block for native frames
/// **Invariant verified:** Managed locals carry slot and bci; JNI locals
/// of a non-top native frame come from the entry frame below it
#[test]
fn test_stack_roots() {
    let fixture = TagFixture::with_defaults();
    let x = fixture.node();
    let y = fixture.node();
    let z = fixture.node();
    fixture.tag(x, 1);
    fixture.tag(y, 2);
    fixture.tag(z, 3);

    let thread = fixture.heap.spawn_thread();
    fixture.tag(fixture.heap.thread_object(thread), 100);
    // outermost first: native m2, its handle block, managed m1 on top
    fixture
        .heap
        .push_frame(thread, StackFrame::Native { method: MethodId(2) });
    fixture
        .heap
        .push_frame(thread, StackFrame::Entry { handles: vec![y] });
    fixture.heap.push_managed_frame(
        thread,
        MethodId(1),
        17,
        vec![LocalSlot::Primitive, LocalSlot::Reference(x), LocalSlot::Reference(ObjectRef::NULL)],
    );
    // active handles belong to no native frame here
    fixture.heap.add_jni_local(thread, z);

    let mut reports: Vec<(HeapRootKind, StackInfo, i64)> = Vec::new();
    let callbacks = BasicCallbacks::new().stack_reference(|kind, stack, _, tag| {
        reports.push((kind, *stack, *tag));
        IterationControl::Continue
    });
    fixture.env.iterate_over_reachable_objects(callbacks).unwrap();

    assert_eq!(reports.len(), 2, "unexpected stack roots: {:?}", reports);

    let (kind, stack, tag) = reports[0];
    assert_eq!((kind, tag), (HeapRootKind::StackLocal, 1));
    assert_eq!(stack.depth, 0);
    assert_eq!(stack.method, Some(MethodId(1)));
    assert_eq!(stack.location, 17);
    assert_eq!(stack.slot, 1);
    assert_eq!(stack.thread_tag, 100);

    let (kind, stack, tag) = reports[1];
    assert_eq!((kind, tag), (HeapRootKind::JniLocal, 2));
    assert_eq!(stack.depth, 1);
    assert_eq!(stack.method, Some(MethodId(2)));
    assert_eq!((stack.location, stack.slot), (-1, -1));
}

/// Test JNI locals of a thread that never entered managed code
///
/// **Bug this finds:** Attached native threads missing from the root set
/// **Invariant verified:** Active handles reported at depth 0, no method
#[test]
fn test_jni_locals_without_managed_frames() {
    let fixture = TagFixture::with_defaults();
    let obj = fixture.node();
    fixture.tag(obj, 7);
    let thread = fixture.heap.spawn_thread();
    fixture.heap.add_jni_local(thread, obj);

    let mut reports = Vec::new();
    let callbacks = BasicCallbacks::new().stack_reference(|kind, stack, _, tag| {
        reports.push((kind, stack.depth, stack.method, *tag));
        IterationControl::Continue
    });
    let stats = fixture.env.iterate_over_reachable_objects(callbacks).unwrap();

    assert_eq!(reports, vec![(HeapRootKind::JniLocal, 0, None, 7)]);
    assert_eq!(stats.roots.jni_local, 1);
}
