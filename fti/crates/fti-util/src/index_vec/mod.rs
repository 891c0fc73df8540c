//! Typed index vectors.
//!
//! ============================================================================
//! TYPED INDEX PATTERN
//! ============================================================================
//!
//! Arena-style data structures link their elements by position instead of by
//! pointer. Using bare `usize` for every such position makes it easy to index
//! one arena with another arena's handle. A newtype per index space turns that
//! mistake into a compile error:
//!
//! ```
//! use fti_util::define_idx;
//! use fti_util::index_vec::IndexVec;
//!
//! define_idx!(pub SlotId);
//!
//! let mut slots: IndexVec<SlotId, &str> = IndexVec::new();
//! let id = slots.push("first");
//! assert_eq!(slots[id], "first");
//! ```
//!
//! Index types generated by [`define_idx!`] are backed by `NonZeroU32`, so
//! `Option<SlotId>` still fits in four bytes. Bucket arrays made of
//! `Option<Id>` therefore cost the same as arrays of raw `u32` links.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

#[doc(hidden)]
pub use static_assertions as __static_assertions;

/// Conversion between a typed index and a raw position.
pub trait Idx: Copy + Eq {
    /// Convert from a raw position.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `idx` does not fit in the index type.
    fn from_usize(idx: usize) -> Self;

    /// Raw position for slice indexing.
    fn index(self) -> usize;
}

impl Idx for usize {
    #[inline]
    fn from_usize(idx: usize) -> Self {
        idx
    }

    #[inline]
    fn index(self) -> usize {
        self
    }
}

/// A vector indexed by a specific index type.
///
/// # Type Parameters
///
/// - `I`: The index type (must implement [`Idx`])
/// - `T`: The element type
#[derive(Clone)]
pub struct IndexVec<I, T> {
    raw: Vec<T>,
    _marker: PhantomData<fn(&I)>,
}

impl<I, T> IndexVec<I, T> {
    /// Create an empty vector.
    #[inline]
    pub fn new() -> Self {
        Self {
            raw: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Create an empty vector with room for `capacity` elements.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            raw: Vec::with_capacity(capacity),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// Drop every element, keeping the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.raw.clear()
    }

    /// Return unused capacity to the allocator.
    pub fn shrink_to_fit(&mut self) {
        self.raw.shrink_to_fit()
    }

    #[inline]
    pub fn last(&self) -> Option<&T> {
        self.raw.last()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.raw
    }

    /// Iterate over the elements in index order.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.raw.iter()
    }
}

impl<I: Idx, T> IndexVec<I, T> {
    /// Append an element and return its index.
    #[inline]
    pub fn push(&mut self, value: T) -> I {
        let idx = I::from_usize(self.raw.len());
        self.raw.push(value);
        idx
    }

    /// Remove the last element and return it with its index.
    #[inline]
    pub fn pop(&mut self) -> Option<(I, T)> {
        let value = self.raw.pop()?;
        Some((I::from_usize(self.raw.len()), value))
    }

    /// Index the next `push` will return.
    #[inline]
    pub fn next_index(&self) -> I {
        I::from_usize(self.raw.len())
    }

    #[inline]
    pub fn get(&self, index: I) -> Option<&T> {
        self.raw.get(index.index())
    }

    #[inline]
    pub fn get_mut(&mut self, index: I) -> Option<&mut T> {
        self.raw.get_mut(index.index())
    }

    /// Iterate over `(index, element)` pairs.
    pub fn iter_enumerated(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.raw
            .iter()
            .enumerate()
            .map(|(i, value)| (I::from_usize(i), value))
    }

    /// Iterate over every valid index.
    pub fn indices(&self) -> impl Iterator<Item = I> {
        (0..self.raw.len()).map(I::from_usize)
    }
}

impl<I: Idx, T> Index<I> for IndexVec<I, T> {
    type Output = T;

    #[inline]
    fn index(&self, index: I) -> &T {
        &self.raw[index.index()]
    }
}

impl<I: Idx, T> IndexMut<I> for IndexVec<I, T> {
    #[inline]
    fn index_mut(&mut self, index: I) -> &mut T {
        &mut self.raw[index.index()]
    }
}

impl<I, T> Default for IndexVec<I, T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<I, T> FromIterator<T> for IndexVec<I, T> {
    fn from_iter<It: IntoIterator<Item = T>>(iter: It) -> Self {
        Self {
            raw: iter.into_iter().collect(),
            _marker: PhantomData,
        }
    }
}

impl<I, T: fmt::Debug> fmt::Debug for IndexVec<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.raw, f)
    }
}

/// Define a niche-optimized index type.
///
/// The generated type stores `index + 1` in a `NonZeroU32`, so
/// `Option<$name>` has the same size as `$name`. A compile-time assertion
/// checks this for every generated type.
///
/// # Examples
///
/// ```
/// use fti_util::define_idx;
/// use fti_util::index_vec::{Idx, IndexVec};
///
/// define_idx!(pub EntryId);
///
/// let mut vec: IndexVec<EntryId, i64> = IndexVec::new();
/// let idx = vec.push(42);
/// assert_eq!(idx.index(), 0);
/// assert_eq!(std::mem::size_of::<Option<EntryId>>(), 4);
/// ```
#[macro_export]
macro_rules! define_idx {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name(::core::num::NonZeroU32);

        impl $crate::index_vec::Idx for $name {
            #[inline]
            fn from_usize(idx: usize) -> Self {
                assert!(
                    idx < u32::MAX as usize,
                    "index {} overflows {}",
                    idx,
                    stringify!($name)
                );
                match ::core::num::NonZeroU32::new(idx as u32 + 1) {
                    Some(raw) => $name(raw),
                    None => unreachable!(),
                }
            }

            #[inline]
            fn index(self) -> usize {
                (self.0.get() - 1) as usize
            }
        }

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(
                    f,
                    "{}({})",
                    stringify!($name),
                    $crate::index_vec::Idx::index(*self)
                )
            }
        }

        $crate::index_vec::__static_assertions::assert_eq_size!(Option<$name>, u32);
    };
}

#[cfg(test)]
mod tests;
