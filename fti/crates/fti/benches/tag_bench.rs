//! FTI Benchmarks
//!
//! Tag table throughput, resize cost and walk speed.
//! Run with: `cargo bench --package fti`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fti::heap::{ClassSpec, SimHeap};
use fti::object::{ClassRef, FieldKind};
use fti::walk::{
    BasicCallbacks, HeapCallbacks, HeapFilter, HeapObjectFilter, IterationControl, VisitControl,
};
use fti::{ObjectRef, TagEnv, TagMap, TagMapConfig};
use std::sync::Arc;

fn create_heap() -> (Arc<SimHeap>, ClassRef) {
    let heap = Arc::new(SimHeap::new());
    let node = heap.define_class(
        ClassSpec::new("Node")
            .field(FieldKind::Reference)
            .field(FieldKind::Reference),
    );
    (heap, node)
}

/// Binary tree of `count` nodes rooted at a global handle
fn create_tree(heap: &SimHeap, node: ClassRef, count: usize) -> Vec<ObjectRef> {
    let nodes: Vec<ObjectRef> = (0..count).map(|_| heap.new_instance(node)).collect();
    for i in 1..count {
        heap.set_field(nodes[(i - 1) / 2], (i - 1) % 2, nodes[i]);
    }
    heap.new_global(nodes[0]);
    nodes
}

fn bench_set_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_set_get");
    let (heap, node) = create_heap();
    let objects: Vec<ObjectRef> = (0..10_000).map(|_| heap.new_instance(node)).collect();
    let tags = TagMap::new(TagMapConfig::default()).unwrap();

    group.throughput(Throughput::Elements(objects.len() as u64));
    group.bench_function("set", |b| {
        b.iter(|| {
            for (i, obj) in objects.iter().enumerate() {
                tags.set_tag(*obj, i as i64 + 1);
            }
        })
    });

    group.bench_function("get", |b| {
        b.iter(|| {
            for obj in &objects {
                black_box(tags.get_tag(*obj));
            }
        })
    });

    group.bench_function("set_untag_churn", |b| {
        b.iter(|| {
            for obj in &objects {
                tags.set_tag(*obj, 0);
                tags.set_tag(*obj, 1);
            }
        })
    });

    group.finish();
}

fn bench_resize(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_resize");
    let (heap, node) = create_heap();

    for &count in &[1_000usize, 10_000, 100_000] {
        let objects: Vec<ObjectRef> = (0..count).map(|_| heap.new_instance(node)).collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &objects, |b, objects| {
            b.iter(|| {
                let tags = TagMap::new(TagMapConfig::default()).unwrap();
                for (i, obj) in objects.iter().enumerate() {
                    tags.set_tag(*obj, i as i64 + 1);
                }
                black_box(tags.lock().size())
            })
        });
    }

    group.finish();
}

fn bench_walks(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_walk");
    group.sample_size(20);

    let (heap, node) = create_heap();
    let nodes = create_tree(&heap, node, 50_000);
    let env = TagEnv::new(heap.clone(), TagMapConfig::default()).unwrap();
    for (i, obj) in nodes.iter().enumerate().step_by(3) {
        env.tag_map().set_tag(*obj, i as i64 + 1);
    }

    group.throughput(Throughput::Elements(nodes.len() as u64));
    group.bench_function("reachable_objects", |b| {
        b.iter(|| {
            let callbacks =
                BasicCallbacks::new().object_reference(|_, _, _, _, _| IterationControl::Continue);
            let stats = env.iterate_over_reachable_objects(callbacks).unwrap();
            black_box(stats.objects_visited)
        })
    });

    group.bench_function("follow_references_tagged_only", |b| {
        b.iter(|| {
            let stats = env
                .follow_references(
                    HeapFilter::UNTAGGED,
                    None,
                    None,
                    HeapCallbacks::new().heap_reference(|_, _| VisitControl::VISIT_OBJECTS),
                )
                .unwrap();
            black_box(stats.callbacks_invoked)
        })
    });

    group.bench_function("iterate_over_heap", |b| {
        b.iter(|| {
            let stats = env
                .iterate_over_heap(HeapObjectFilter::Tagged, None, |_, _| {
                    IterationControl::Continue
                })
                .unwrap();
            black_box(stats.objects_reported)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_set_get, bench_resize, bench_walks);
criterion_main!(benches);
