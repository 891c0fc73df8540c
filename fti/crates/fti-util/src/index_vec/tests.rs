//! Tests for the IndexVec module.

use super::*;
use quickcheck_macros::quickcheck;

crate::define_idx!(TestId);

// ============================================================================
// BASIC OPERATIONS
// ============================================================================

#[test]
fn test_new_and_empty() {
    let vec: IndexVec<TestId, i32> = IndexVec::new();
    assert!(vec.is_empty());
    assert_eq!(vec.len(), 0);
}

#[test]
fn test_with_capacity() {
    let vec: IndexVec<TestId, i32> = IndexVec::with_capacity(10);
    assert!(vec.is_empty());
    assert!(vec.capacity() >= 10);
}

#[test]
fn test_push_returns_sequential_indices() {
    let mut vec: IndexVec<TestId, &str> = IndexVec::new();
    let a = vec.push("a");
    let b = vec.push("b");

    assert_eq!(a.index(), 0);
    assert_eq!(b.index(), 1);
    assert_eq!(vec[a], "a");
    assert_eq!(vec[b], "b");
    assert_eq!(vec.next_index().index(), 2);
}

#[test]
fn test_get_out_of_bounds() {
    let mut vec: IndexVec<TestId, i32> = IndexVec::new();
    vec.push(1);
    assert_eq!(vec.get(TestId::from_usize(0)), Some(&1));
    assert_eq!(vec.get(TestId::from_usize(1)), None);
}

#[test]
fn test_get_mut_and_index_mut() {
    let mut vec: IndexVec<TestId, i32> = IndexVec::new();
    let id = vec.push(1);
    *vec.get_mut(id).unwrap() += 10;
    vec[id] *= 2;
    assert_eq!(vec[id], 22);
}

#[test]
fn test_clear_keeps_capacity() {
    let mut vec: IndexVec<TestId, i32> = IndexVec::with_capacity(8);
    vec.push(1);
    vec.push(2);
    vec.clear();
    assert!(vec.is_empty());
    assert!(vec.capacity() >= 8);
}

// ============================================================================
// ITERATION
// ============================================================================

#[test]
fn test_iter_enumerated() {
    let vec: IndexVec<TestId, char> = "xyz".chars().collect();
    let pairs: Vec<(usize, char)> = vec.iter_enumerated().map(|(i, c)| (i.index(), *c)).collect();
    assert_eq!(pairs, vec![(0, 'x'), (1, 'y'), (2, 'z')]);
}

#[test]
fn test_indices() {
    let vec: IndexVec<TestId, u8> = vec![7, 8, 9].into_iter().collect();
    let indices: Vec<usize> = vec.indices().map(Idx::index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[test]
fn test_indices_do_not_borrow() {
    let mut vec: IndexVec<TestId, u8> = vec![1, 2].into_iter().collect();
    let indices = vec.indices();
    vec.push(3);
    assert_eq!(indices.count(), 2);
}

#[test]
fn test_pop_returns_index() {
    let mut vec: IndexVec<TestId, u8> = vec![4, 5].into_iter().collect();
    assert_eq!(vec.last(), Some(&5));
    let (id, value) = vec.pop().unwrap();
    assert_eq!((id.index(), value), (1, 5));
    assert_eq!(vec.next_index(), id);
    vec.pop();
    assert!(vec.pop().is_none());
}

// ============================================================================
// NICHE LAYOUT
// ============================================================================

#[test]
fn test_option_index_is_four_bytes() {
    assert_eq!(std::mem::size_of::<TestId>(), 4);
    assert_eq!(std::mem::size_of::<Option<TestId>>(), 4);
}

#[test]
fn test_debug_format_shows_zero_based_index() {
    let id = TestId::from_usize(5);
    assert_eq!(format!("{:?}", id), "TestId(5)");
}

#[quickcheck]
fn prop_roundtrip_index(raw: u16) -> bool {
    TestId::from_usize(raw as usize).index() == raw as usize
}

#[quickcheck]
fn prop_push_then_get(values: Vec<i64>) -> bool {
    let mut vec: IndexVec<TestId, i64> = IndexVec::new();
    let ids: Vec<TestId> = values.iter().map(|v| vec.push(*v)).collect();
    ids.iter().zip(values.iter()).all(|(id, v)| vec.get(*id) == Some(v))
}
