//! Weak Sweep
//!
//! Tags never keep objects alive. After each collection the collector hands
//! the table a [`WeakOopClosure`]; the sweep drops entries whose object died
//! and moves entries whose object was relocated to the bucket of its new
//! address.
//!
//! An entry whose new bucket lies ahead of the scan position is parked on a
//! delayed list and linked once the scan is done, so it is never visited
//! twice.
//!
//! If the table already holds an entry under the new identity, that entry
//! was written after the object moved and wins; the stale one is dropped.

use super::hashmap::{hash, TagHashmap};
use super::pool::EntryId;
use crate::object::ObjectRef;
use serde::Serialize;

/// Liveness and forwarding answers from the collector
pub trait WeakOopClosure {
    /// Check if `obj` survived the collection
    fn is_alive(&self, obj: ObjectRef) -> bool;

    /// Current identity of a surviving object
    fn forwardee(&self, obj: ObjectRef) -> ObjectRef;
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Entries before the sweep
    pub before: usize,
    /// Entries after the sweep
    pub after: usize,
    /// Entries dropped for dead objects
    pub freed: usize,
    /// Entries rehomed to another bucket
    pub moved: usize,
    /// Stale entries dropped in favour of one already at the new identity
    pub merged: usize,
    /// Tags of the dropped entries, in sweep order
    #[serde(skip)]
    pub freed_tags: Vec<i64>,
}

impl TagHashmap {
    /// Sweep the table after a collection
    ///
    /// Resizing is re-enabled first: a collection may have freed enough
    /// memory for a previously failed resize to succeed.
    pub fn do_weak_oops(&mut self, closure: &dyn WeakOopClosure, collect_tags: bool) -> SweepStats {
        self.set_resizing_enabled(true);

        let mut stats = SweepStats {
            before: self.entry_count(),
            ..Default::default()
        };
        if self.is_empty() {
            return stats;
        }

        let size = self.size();
        let mut delayed: Option<EntryId> = None;

        for pos in 0..size {
            let mut prev: Option<EntryId> = None;
            let mut cur = self.buckets[pos];

            while let Some(id) = cur {
                let entry = *self.pool.entry(id);
                cur = entry.next();
                let obj = entry.object();

                if !closure.is_alive(obj) {
                    self.unlink(pos, prev, id);
                    self.decrement_count();
                    self.pool.destroy_entry(id);
                    stats.freed += 1;
                    if collect_tags {
                        stats.freed_tags.push(entry.tag());
                    }
                    continue;
                }

                let new_obj = closure.forwardee(obj);
                if new_obj != obj {
                    if self.retagged_after_move(new_obj, closure) {
                        self.unlink(pos, prev, id);
                        self.decrement_count();
                        self.pool.destroy_entry(id);
                        stats.merged += 1;
                        continue;
                    }
                    self.pool.entry_mut(id).set_object(new_obj);
                    let new_pos = hash(new_obj, size);
                    if new_pos != pos {
                        self.unlink(pos, prev, id);
                        stats.moved += 1;
                        if new_pos > pos {
                            self.pool.entry_mut(id).set_next(delayed);
                            delayed = Some(id);
                        } else {
                            self.link_at(new_pos, id);
                        }
                        continue;
                    }
                }
                prev = Some(id);
            }
        }

        while let Some(id) = delayed {
            delayed = self.pool.entry(id).next();
            self.link(id);
        }

        stats.after = self.entry_count();
        stats
    }

    /// Check if `new_obj` already has an entry of its own
    ///
    /// An entry keyed by an address that itself moved or died belongs to
    /// the previous occupant and is swept on its own.
    fn retagged_after_move(&self, new_obj: ObjectRef, closure: &dyn WeakOopClosure) -> bool {
        closure.is_alive(new_obj)
            && closure.forwardee(new_obj) == new_obj
            && self.find(new_obj).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagMapConfig;
    use fti_util::FxHashMap;
    use std::collections::HashSet;

    struct Outcome {
        dead: HashSet<ObjectRef>,
        moved: FxHashMap<ObjectRef, ObjectRef>,
    }

    impl WeakOopClosure for Outcome {
        fn is_alive(&self, obj: ObjectRef) -> bool {
            !self.dead.contains(&obj)
        }

        fn forwardee(&self, obj: ObjectRef) -> ObjectRef {
            self.moved.get(&obj).copied().unwrap_or(obj)
        }
    }

    fn obj(n: usize) -> ObjectRef {
        ObjectRef::from_raw(0x1000_0000 + n * 8)
    }

    fn table_with(n: usize) -> TagHashmap {
        let mut table = TagHashmap::new(&TagMapConfig::default());
        for i in 0..n {
            table.add(obj(i), i as i64 + 1);
        }
        table
    }

    #[test]
    fn test_sweep_empty_table() {
        let mut table = table_with(0);
        let stats = table.do_weak_oops(
            &Outcome {
                dead: HashSet::new(),
                moved: FxHashMap::default(),
            },
            true,
        );
        assert_eq!(stats, SweepStats::default());
    }

    #[test]
    fn test_sweep_drops_dead_entries() {
        let mut table = table_with(10);
        let outcome = Outcome {
            dead: [obj(2), obj(7)].into_iter().collect(),
            moved: FxHashMap::default(),
        };
        let stats = table.do_weak_oops(&outcome, true);

        assert_eq!(stats.before, 10);
        assert_eq!(stats.after, 8);
        assert_eq!(stats.freed, 2);
        let mut tags = stats.freed_tags.clone();
        tags.sort();
        assert_eq!(tags, vec![3, 8]);
        assert_eq!(table.tag_of(obj(2)), 0);
        assert_eq!(table.tag_of(obj(3)), 4);
    }

    #[test]
    fn test_sweep_rehomes_moved_entries() {
        let mut table = table_with(50);
        // move every object forward and backward across the table
        let moved: FxHashMap<_, _> = (0..50)
            .map(|i| {
                let to = if i % 2 == 0 { obj(i + 10_000) } else { obj(i + 3) };
                (obj(i), to)
            })
            .collect();
        // the odd moves overlap old identities, so map through a snapshot
        let expected: Vec<_> = (0..50).map(|i| (moved[&obj(i)], i as i64 + 1)).collect();

        let stats = table.do_weak_oops(
            &Outcome {
                dead: HashSet::new(),
                moved,
            },
            false,
        );
        assert_eq!(stats.after, 50);
        assert!(stats.moved > 0);
        assert!(stats.freed_tags.is_empty());

        let mut seen = 0;
        table.entry_iterate(|_| seen += 1);
        assert_eq!(seen, 50);
        for (to, tag) in expected {
            let id = table.find(to).expect("moved entry should be findable");
            assert_eq!(table.entry(id).tag(), tag);
        }
    }

    #[test]
    fn test_sweep_keeps_entry_written_after_move() {
        let mut table = table_with(20);
        // obj(3) moved to obj(500) and was tagged there before the sweep
        table.add(obj(500), 99);
        let outcome = Outcome {
            dead: HashSet::new(),
            moved: [(obj(3), obj(500))].into_iter().collect(),
        };
        let stats = table.do_weak_oops(&outcome, false);

        assert_eq!(stats.merged, 1);
        assert_eq!(stats.after, 20);
        assert_eq!(table.tag_of(obj(500)), 99);
        let mut keyed_500 = 0;
        table.entry_iterate(|e| {
            if e.object() == obj(500) {
                keyed_500 += 1;
            }
        });
        assert_eq!(keyed_500, 1);
    }

    #[test]
    fn test_sweep_reenables_resizing() {
        let mut table = table_with(1);
        table.set_resizing_enabled(false);
        table.do_weak_oops(
            &Outcome {
                dead: HashSet::new(),
                moved: FxHashMap::default(),
            },
            false,
        );
        assert!(table.is_resizing_enabled());
    }
}
