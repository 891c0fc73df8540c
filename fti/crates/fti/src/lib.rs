//! # FTI - Object Tagging and Heap Walking
//!
//! FTI lets an external tool (a profiler, a heap analyzer, a debugger) attach
//! 64-bit tags to objects of a managed heap, find objects by tag, and walk
//! the object graph while being told about every root and reference it
//! crosses.
//!
//! ## Overview
//!
//! - **Tag map**: chained hash table keyed by object identity. Tags never
//!   keep objects alive; a weak sweep after each collection drops dead
//!   entries and rehomes moved ones.
//! - **Object marker**: visited marks live in the object header for the
//!   length of a walk and are restored afterwards.
//! - **Heap walk**: non-recursive traversal from the roots or from one
//!   object, with two callback protocols (basic and advanced).
//! - **Heap iteration**: every object in the heap, reachable or not.
//!
//! ## Quick Start
//!
//! ```rust
//! use fti::heap::{ClassSpec, SimHeap};
//! use fti::object::FieldKind;
//! use fti::walk::{IterationControl, ObjectReferenceKind};
//! use fti::{TagEnv, TagMapConfig};
//! use std::sync::Arc;
//!
//! let heap = Arc::new(SimHeap::new());
//! let node = heap.define_class(ClassSpec::new("Node").field(FieldKind::Reference));
//! let a = heap.new_instance(node);
//! let b = heap.new_instance(node);
//! heap.set_field(a, 0, b);
//!
//! let env = TagEnv::new(heap.clone(), TagMapConfig::default())?;
//! let mut fields = 0;
//! env.iterate_over_objects_reachable_from_object(heap.new_local(a), |kind, _, tag, _, _| {
//!     if kind == ObjectReferenceKind::Field {
//!         fields += 1;
//!         *tag = 7;
//!     }
//!     IterationControl::Continue
//! })?;
//!
//! assert_eq!(fields, 1);
//! assert_eq!(env.get_tag(heap.new_local(b))?, 7);
//! # Ok::<(), fti::TagError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Tool                            │
//! └───────────────┬──────────────────────────▲───────────────┘
//!                 │ set/get tag, walks       │ callbacks
//! ┌───────────────▼──────────────────────────┴───────────────┐
//! │  TagEnv                                                  │
//! │   ┌────────────┐   ┌──────────────────┐   ┌───────────┐  │
//! │   │  TagMap    │◀──│ CallbackInvoker  │◀──│ HeapWalk  │  │
//! │   │ (locked)   │   │ basic / advanced │   │ Operation │  │
//! │   └─────▲──────┘   └──────────────────┘   └─────┬─────┘  │
//! │         │ weak sweep            ObjectMarker ◀──┤        │
//! └─────────┼───────────────────────────────────────┼────────┘
//!           │                                       │
//! ┌─────────┴───────────────────────────────────────▼────────┐
//! │        ManagedRuntime (SimHeap or an embedder)           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! - `TagEnv` is `Send + Sync`; tags may be set and read from any thread
//! - Walks and heap iterations run under the runtime's global pause and are
//!   serialized by it
//! - Callbacks run on the thread that started the walk
//!
//! ## Modules
//!
//! - [`config`]: tag map configuration and validation
//! - [`error`]: error types
//! - [`logging`]: structured tagging and walk events
//! - [`object`]: identities, handles, values and header layout
//! - [`runtime`]: the interface to the managed runtime, and the global pause
//! - [`heap`]: an in-process managed heap
//! - [`tagmap`]: the tag table, its entry pool and the weak sweep
//! - [`marker`]: header-bit visited marks and the visit stack
//! - [`walk`]: callback protocols, root collection, walks and heap iteration
//! - [`env`]: the tool-facing environment

// Foundations
pub mod config;
pub mod error;
pub mod logging;
pub mod object;

// Runtime integration
pub mod heap;
pub mod runtime;

// Tagging and walking
pub mod env;
pub mod marker;
pub mod tagmap;
pub mod walk;

pub use config::TagMapConfig;
pub use env::TagEnv;
pub use error::{Result, TagError};
pub use object::{ObjectHandle, ObjectRef};
pub use tagmap::TagMap;
pub use walk::{IterationStats, WalkStats};

/// FTI version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create an environment over `runtime` with the default configuration,
/// overridden from the environment (`FTI_*` variables)
///
/// # Examples
///
/// ```rust
/// use fti::heap::SimHeap;
/// use std::sync::Arc;
///
/// let env = fti::init(Arc::new(SimHeap::new()))?;
/// assert!(env.tag_map().is_empty());
/// # Ok::<(), fti::TagError>(())
/// ```
pub fn init(runtime: std::sync::Arc<dyn runtime::ManagedRuntime>) -> Result<TagEnv> {
    TagEnv::new(runtime, TagMapConfig::from_env())
}
