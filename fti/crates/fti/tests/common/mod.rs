//! Test Utilities for the FTI Test Suite
//!
//! Builds a [`SimHeap`] plus a [`TagEnv`] over it, and small object graphs
//! on top. Assertions are exact: a walk that reports one edge too many is a
//! bug, not noise.

#![allow(dead_code)]

use fti::heap::{ClassSpec, SimHeap};
use fti::object::{ClassRef, FieldKind, PrimitiveType, PrimitiveValue};
use fti::{ObjectHandle, ObjectRef, TagEnv, TagMapConfig};
use std::sync::Arc;

/// Layout slots of the `Node` test class
pub const LEFT: usize = 0;
pub const RIGHT: usize = 1;
pub const VALUE: usize = 2;

/// ============================================================================
/// TAG FIXTURE
/// ============================================================================

/// Heap, environment and a `Node { left, right, value: int }` class
pub struct TagFixture {
    pub heap: Arc<SimHeap>,
    pub env: TagEnv,
    pub node_class: ClassRef,
}

impl TagFixture {
    /// Fixture with the default configuration
    ///
    /// **Bug this finds:** Environment construction failures
    pub fn with_defaults() -> Self {
        Self::with_config(TagMapConfig::default())
    }

    pub fn with_config(config: TagMapConfig) -> Self {
        let heap = Arc::new(SimHeap::new());
        let env =
            TagEnv::new(heap.clone(), config).expect("valid config should create an environment");
        let node_class = heap.define_class(
            ClassSpec::new("Node")
                .field(FieldKind::Reference)
                .field(FieldKind::Reference)
                .field(FieldKind::Primitive(PrimitiveType::Int)),
        );
        Self {
            heap,
            env,
            node_class,
        }
    }

    /// New unreferenced `Node`
    pub fn node(&self) -> ObjectRef {
        self.heap.new_instance(self.node_class)
    }

    /// `Node` with `value` set
    pub fn node_with_value(&self, value: i32) -> ObjectRef {
        let node = self.node();
        self.heap.set_field(node, VALUE, PrimitiveValue::Int(value));
        node
    }

    pub fn link(&self, from: ObjectRef, slot: usize, to: ObjectRef) {
        self.heap.set_field(from, slot, to);
    }

    /// `len` nodes, each one's `left` pointing at the next
    pub fn chain(&self, len: usize) -> Vec<ObjectRef> {
        let nodes: Vec<ObjectRef> = (0..len).map(|_| self.node()).collect();
        for pair in nodes.windows(2) {
            self.link(pair[0], LEFT, pair[1]);
        }
        nodes
    }

    /// Tool-held local handle; keeps the object alive
    pub fn local(&self, obj: ObjectRef) -> ObjectHandle {
        self.heap.new_local(obj)
    }

    /// JNI global; makes the object a root
    pub fn global(&self, obj: ObjectRef) -> ObjectHandle {
        self.heap.new_global(obj)
    }

    pub fn tag(&self, obj: ObjectRef, tag: i64) {
        self.env
            .set_tag(self.local(obj), tag)
            .expect("live object should accept a tag");
    }

    pub fn tag_of(&self, obj: ObjectRef) -> i64 {
        self.env
            .get_tag(self.local(obj))
            .expect("live object should have a readable tag")
    }

    /// Tag each object with its position plus one
    pub fn tag_all(&self, objects: &[ObjectRef]) {
        for (i, obj) in objects.iter().enumerate() {
            self.tag(*obj, i as i64 + 1);
        }
    }
}

/// Assert the tag of `obj`
pub fn assert_tag(fixture: &TagFixture, obj: ObjectRef, expected: i64, context: &str) {
    let actual = fixture.tag_of(obj);
    assert_eq!(
        actual, expected,
        "{}: expected tag {}, found {}",
        context, expected, actual
    );
}
