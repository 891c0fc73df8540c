//! fti-util - Foundation Types for the Fax Tool Interface
//!
//! ============================================================================
//! MODULE OVERVIEW
//! ============================================================================
//!
//! Small, dependency-light building blocks shared by the tagging core:
//!
//! - [`index_vec`]: typed indices and an index-addressed vector. The tag
//!   table stores its entries in an `IndexVec` and links hash chains by
//!   index rather than by pointer.
//! - [`FxHashMap`] / [`FxHashSet`]: fast non-cryptographic hashing for
//!   identity-keyed side tables (field map caches, forwarding tables).
//!
//! DESIGN PRINCIPLES:
//! ------------------
//! 1. ZERO-COST ABSTRACTIONS
//!    Typed indices compile down to plain integers. Index types produced by
//!    [`define_idx!`] reserve a niche so `Option<Id>` is no larger than `Id`.
//!
//! 2. TYPE SAFETY
//!    Distinct index spaces cannot be mixed up at compile time.

pub mod index_vec;

pub use index_vec::{Idx, IndexVec};

pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
