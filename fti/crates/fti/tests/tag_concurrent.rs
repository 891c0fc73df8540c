//! Concurrency Tests - Tagging and Walking From Many Threads
//!
//! These tests verify that:
//! - Concurrent set_tag calls on distinct objects all land
//! - Concurrent writes to one object leave exactly one entry
//! - Walks started from different threads are serialized, not rejected
//! - Tags written during collections land under the object's current address

mod common;

use common::TagFixture;
use fti::walk::{HeapObjectFilter, IterationControl};
use fti::ObjectRef;

const THREADS: usize = 8;
const PER_THREAD: usize = 1_000;

/// Test tagging distinct objects from many threads
///
/// **Bug this finds:** Lost updates while another thread resizes the table
/// **Invariant verified:** Every tag written is read back
#[test]
fn test_concurrent_distinct_tags() {
    let fixture = TagFixture::with_config(fti::TagMapConfig {
        load_factor: 0.5,
        ..Default::default()
    });
    let objects: Vec<Vec<ObjectRef>> = (0..THREADS)
        .map(|_| (0..PER_THREAD).map(|_| fixture.node()).collect())
        .collect();

    crossbeam::scope(|s| {
        for (t, batch) in objects.iter().enumerate() {
            let env = &fixture.env;
            let heap = &fixture.heap;
            s.spawn(move |_| {
                for (i, obj) in batch.iter().enumerate() {
                    let tag = (t * PER_THREAD + i) as i64 + 1;
                    env.set_tag(heap.new_local(*obj), tag).unwrap();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(fixture.env.tag_map().entry_count(), THREADS * PER_THREAD);
    for (t, batch) in objects.iter().enumerate() {
        for (i, obj) in batch.iter().enumerate() {
            assert_eq!(fixture.env.tag_map().get_tag(*obj), (t * PER_THREAD + i) as i64 + 1);
        }
    }
}

/// Test racing writes to one object
///
/// **Bug this finds:** Duplicate entries for one identity
/// **Invariant verified:** One entry holding one of the written tags
#[test]
fn test_concurrent_same_object() {
    let fixture = TagFixture::with_defaults();
    let obj = fixture.node();
    let handle = fixture.local(obj);

    crossbeam::scope(|s| {
        for t in 0..THREADS {
            let env = &fixture.env;
            s.spawn(move |_| {
                for _ in 0..PER_THREAD {
                    env.set_tag(handle, t as i64 + 1).unwrap();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(fixture.env.tag_map().entry_count(), 1);
    let tag = fixture.tag_of(obj);
    assert!((1..=THREADS as i64).contains(&tag), "unexpected tag {}", tag);
}

/// Test heap iterations started from several threads
///
/// **Bug this finds:** A walk on another thread mistaken for a nested walk
/// **Invariant verified:** Every iteration completes and sees every object
#[test]
fn test_concurrent_iterations_serialize() {
    let fixture = TagFixture::with_defaults();
    let nodes = fixture.chain(100);
    fixture.tag_all(&nodes);

    let counts: Vec<u64> = crossbeam::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let env = &fixture.env;
                s.spawn(move |_| {
                    let stats = env
                        .iterate_over_heap(HeapObjectFilter::Tagged, None, |_, _| {
                            IterationControl::Continue
                        })
                        .unwrap();
                    stats.objects_reported
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    })
    .unwrap();

    assert_eq!(counts, vec![100; 4]);
}

/// Test tagging while another thread walks
///
/// **Bug this finds:** set_tag on another thread deadlocking against the walk
/// **Invariant verified:** Both sides finish; tags set meanwhile persist
#[test]
fn test_tagging_during_walk() {
    let fixture = TagFixture::with_defaults();
    let nodes = fixture.chain(2_000);
    let extra: Vec<ObjectRef> = (0..500).map(|_| fixture.node()).collect();

    crossbeam::scope(|s| {
        let env = &fixture.env;
        let heap = &fixture.heap;
        let seed = fixture.local(nodes[0]);
        s.spawn(move |_| {
            env.iterate_over_objects_reachable_from_object(seed, |_, _, _, _, _| {
                IterationControl::Continue
            })
            .unwrap();
        });
        let extra = &extra;
        s.spawn(move |_| {
            for obj in extra {
                env.set_tag(heap.new_local(*obj), 5).unwrap();
            }
        });
    })
    .unwrap();

    assert_eq!(fixture.env.get_objects_with_tags(&[5]).unwrap().len(), extra.len());
}

/// Test retagging while the heap compacts
///
/// **Bug this finds:** A tag stored under an address the collector just
/// vacated, or two entries for one moved object
/// **Invariant verified:** One entry per object, holding the last tag written
#[test]
fn test_retag_during_compaction() {
    let fixture = TagFixture::with_defaults();
    let handles: Vec<_> = (0..50)
        .map(|_| {
            let _garbage = fixture.node();
            fixture.global(fixture.node())
        })
        .collect();
    const ROUNDS: i64 = 200;

    crossbeam::scope(|s| {
        let env = &fixture.env;
        let handles = &handles;
        s.spawn(move |_| {
            for round in 1..=ROUNDS {
                for handle in handles {
                    env.set_tag(*handle, round).unwrap();
                }
            }
        });
        for _ in 0..20 {
            fixture.heap.collect(true);
        }
    })
    .unwrap();

    assert_eq!(fixture.env.tag_map().entry_count(), handles.len());
    for handle in &handles {
        assert_eq!(fixture.env.get_tag(*handle).unwrap(), ROUNDS);
    }
}
