//! Heap Module - In-Process Managed Heap
//!
//! [`SimHeap`] is a small managed heap with classes, mirrors, strings,
//! arrays, handles, threads and a tracing collector. It implements
//! [`crate::runtime::ManagedRuntime`], which makes the tag table and the
//! heap walks usable (and testable) without an external runtime.

pub mod sim;

pub use sim::{ClassSpec, CollectionOutcome, SimHeap, ThreadId};
