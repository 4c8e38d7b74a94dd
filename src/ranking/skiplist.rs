use std::cmp::Ordering;
use std::collections::HashMap;

/// Ordering function injected into the index. `Ordering::Less` means the
/// first value sorts earlier, i.e. is the better entry.
pub type Comparator<V> = fn(&V, &V) -> Ordering;

/// Outcome of an upsert against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The key was absent and a new entry was inserted.
    Inserted,
    /// The key existed and the new value was strictly better, so the old
    /// entry was replaced.
    Replaced,
    /// The key existed with an equal or better value; nothing changed.
    Ignored,
}

const MAX_LEVEL: usize = 128;
const LEVEL_P: f64 = 0.25;

/// Sentinel slot id for the list header.
const HEAD: usize = usize::MAX;

/// A forward pointer at one level of a node. `span` counts the base-level
/// entries the pointer traverses and is only meaningful while `next` is set.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
struct Link {
    next: Option<usize>,
    span: usize,
}

struct Node<V> {
    key: i64,
    value: V,
    links: Vec<Link>,
}

/// Order-statistic skip list keyed by a 64-bit id.
///
/// Entries are kept in comparator order (best first, key ascending as the
/// final tie-break), with a hash index for O(1) key lookups and per-level
/// span counters so `rank` runs in O(log n) instead of walking the base
/// level. Nodes live in an arena and link by slot index; freed slots are
/// recycled through a free list.
///
/// The list is not thread-safe; callers own synchronization.
pub struct SkipList<V> {
    head: Vec<Link>,
    arena: Vec<Node<V>>,
    free: Vec<usize>,
    index: HashMap<i64, usize>,
    level: usize,
    len: usize,
    cmp: Comparator<V>,
}

impl<V: Clone> SkipList<V> {
    pub fn new(cmp: Comparator<V>) -> Self {
        Self {
            head: vec![Link::default(); MAX_LEVEL],
            arena: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            level: 1,
            len: 0,
            cmp,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.head = vec![Link::default(); MAX_LEVEL];
        self.arena.clear();
        self.free.clear();
        self.index.clear();
        self.level = 1;
        self.len = 0;
    }

    /// Returns the stored value for `key`, if present. O(1).
    pub fn lookup(&self, key: i64) -> Option<&V> {
        self.index.get(&key).map(|&slot| &self.arena[slot].value)
    }

    /// Inserts `value` for `key`, replacing an existing entry only when the
    /// new value is strictly better per the comparator. Amortised O(log n).
    pub fn upsert(&mut self, key: i64, value: V) -> UpsertOutcome {
        match self.index.get(&key).copied() {
            Some(slot) => {
                if (self.cmp)(&value, &self.arena[slot].value) != Ordering::Less {
                    return UpsertOutcome::Ignored;
                }
                // Replace = delete the losing node, insert the winner. The
                // in-tree key tuple is never mutated in place.
                self.remove_slot(key, slot);
                self.insert_node(key, value);
                UpsertOutcome::Replaced
            }
            None => {
                self.insert_node(key, value);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Removes the entry for `key`. Returns whether it existed. O(log n).
    pub fn delete(&mut self, key: i64) -> bool {
        match self.index.get(&key).copied() {
            Some(slot) => {
                self.remove_slot(key, slot);
                true
            }
            None => false,
        }
    }

    /// 1-based position of `key` in best-first order, or `None` when the key
    /// is absent. O(log n): descends the levels summing traversed spans.
    pub fn rank(&self, key: i64) -> Option<usize> {
        let slot = *self.index.get(&key)?;
        let target = &self.arena[slot];
        let (key, value) = (target.key, &target.value);

        let mut x = HEAD;
        let mut rank = 0usize;
        for i in (0..self.level).rev() {
            while let Some(nx) = self.link(x, i).next {
                if nx == slot {
                    return Some(rank + self.link(x, i).span);
                }
                if self.precedes(nx, key, value) {
                    rank += self.link(x, i).span;
                    x = nx;
                } else {
                    break;
                }
            }
        }
        None
    }

    /// First `k` entries in best-first order as `(key, value, rank)`, rank
    /// starting at 1. O(k).
    pub fn top_k(&self, k: usize) -> Vec<(i64, V, u64)> {
        let mut out = Vec::with_capacity(k.min(self.len));
        let mut next = self.head[0].next;
        let mut rank = 1u64;
        while let Some(slot) = next {
            if out.len() >= k {
                break;
            }
            let node = &self.arena[slot];
            out.push((node.key, node.value.clone(), rank));
            rank += 1;
            next = node.links[0].next;
        }
        out
    }

    /// Linear walk returning every entry for which `predicate` holds.
    /// O(n); used by window compaction only.
    pub fn scan_expired<F>(&self, predicate: F) -> Vec<(i64, V)>
    where
        F: Fn(&V) -> bool,
    {
        let mut out = Vec::new();
        let mut next = self.head[0].next;
        while let Some(slot) = next {
            let node = &self.arena[slot];
            if predicate(&node.value) {
                out.push((node.key, node.value.clone()));
            }
            next = node.links[0].next;
        }
        out
    }

    /// Entries in best-first order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &V)> + '_ {
        std::iter::successors(self.head[0].next, move |&slot| {
            self.arena[slot].links[0].next
        })
        .map(move |slot| {
            let node = &self.arena[slot];
            (node.key, &node.value)
        })
    }

    fn link(&self, at: usize, level: usize) -> Link {
        if at == HEAD {
            self.head[level]
        } else {
            self.arena[at].links[level]
        }
    }

    fn set_link(&mut self, at: usize, level: usize, link: Link) {
        if at == HEAD {
            self.head[level] = link;
        } else {
            self.arena[at].links[level] = link;
        }
    }

    /// Whether the node in `slot` orders strictly before `(key, value)`.
    fn precedes(&self, slot: usize, key: i64, value: &V) -> bool {
        let node = &self.arena[slot];
        match (self.cmp)(&node.value, value) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => node.key < key,
        }
    }

    fn random_level(&self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && rand::random::<f64>() < LEVEL_P {
            level += 1;
        }
        level
    }

    fn alloc(&mut self, key: i64, value: V, level: usize) -> usize {
        let node = Node {
            key,
            value,
            links: vec![Link::default(); level],
        };
        match self.free.pop() {
            Some(slot) => {
                self.arena[slot] = node;
                slot
            }
            None => {
                self.arena.push(node);
                self.arena.len() - 1
            }
        }
    }

    fn insert_node(&mut self, key: i64, value: V) {
        // Standard update-vector descent, additionally tracking the rank of
        // each update node so the new spans can be derived.
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i + 1 == self.level { 0 } else { rank[i + 1] };
            while let Some(nx) = self.link(x, i).next {
                if self.precedes(nx, key, &value) {
                    rank[i] += self.link(x, i).span;
                    x = nx;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let new_level = self.random_level();
        if new_level > self.level {
            for i in self.level..new_level {
                rank[i] = 0;
                update[i] = HEAD;
                self.head[i].span = self.len;
            }
            self.level = new_level;
        }

        let slot = self.alloc(key, value, new_level);
        for i in 0..new_level {
            let up = self.link(update[i], i);
            let node_span = match up.next {
                Some(_) => up.span - (rank[0] - rank[i]),
                None => 0,
            };
            self.arena[slot].links[i] = Link {
                next: up.next,
                span: node_span,
            };
            self.set_link(
                update[i],
                i,
                Link {
                    next: Some(slot),
                    span: rank[0] - rank[i] + 1,
                },
            );
        }
        // Levels above the new node now traverse one more base entry.
        for i in new_level..self.level {
            let mut up = self.link(update[i], i);
            if up.next.is_some() {
                up.span += 1;
                self.set_link(update[i], i, up);
            }
        }

        self.index.insert(key, slot);
        self.len += 1;
    }

    fn remove_slot(&mut self, key: i64, slot: usize) {
        let value = self.arena[slot].value.clone();
        let mut update = [HEAD; MAX_LEVEL];
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(nx) = self.link(x, i).next {
                if nx != slot && self.precedes(nx, key, &value) {
                    x = nx;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        for i in 0..self.level {
            let up = self.link(update[i], i);
            if up.next == Some(slot) {
                let node_link = self.arena[slot].links[i];
                self.set_link(
                    update[i],
                    i,
                    Link {
                        next: node_link.next,
                        span: up.span + node_link.span - 1,
                    },
                );
            } else if up.next.is_some() {
                self.set_link(
                    update[i],
                    i,
                    Link {
                        next: up.next,
                        span: up.span - 1,
                    },
                );
            }
        }

        while self.level > 1 && self.head[self.level - 1].next.is_none() {
            self.level -= 1;
        }

        self.index.remove(&key);
        self.free.push(slot);
        self.len -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test value: (magnitude, arrival order). Higher magnitude first, on a
    /// tie the earlier arrival wins.
    fn best_first(a: &(u64, i64), b: &(u64, i64)) -> Ordering {
        b.0.cmp(&a.0).then(a.1.cmp(&b.1))
    }

    fn list() -> SkipList<(u64, i64)> {
        SkipList::new(best_first)
    }

    #[test]
    fn upsert_reports_outcomes() {
        let mut sl = list();
        assert_eq!(sl.upsert(1, (100, 1)), UpsertOutcome::Inserted);
        assert_eq!(sl.upsert(1, (200, 2)), UpsertOutcome::Replaced);
        assert_eq!(sl.upsert(1, (50, 3)), UpsertOutcome::Ignored);
        assert_eq!(sl.upsert(1, (200, 4)), UpsertOutcome::Ignored);
        assert_eq!(sl.len(), 1);
        assert_eq!(sl.lookup(1), Some(&(200, 2)));
    }

    #[test]
    fn size_tracks_distinct_keys() {
        let mut sl = list();
        for key in 0..50 {
            sl.upsert(key, (key as u64, key));
        }
        for key in 0..50 {
            sl.upsert(key, (1_000 + key as u64, key));
        }
        assert_eq!(sl.len(), 50);
    }

    #[test]
    fn top_k_is_best_first_with_dense_ranks() {
        let mut sl = list();
        sl.upsert(1, (100, 0));
        sl.upsert(2, (300, 0));
        sl.upsert(3, (200, 0));
        sl.upsert(4, (50, 0));

        let top = sl.top_k(2);
        assert_eq!(top.len(), 2);
        assert_eq!((top[0].0, top[0].1 .0, top[0].2), (2, 300, 1));
        assert_eq!((top[1].0, top[1].1 .0, top[1].2), (3, 200, 2));

        // Asking for more than the list holds returns everything.
        assert_eq!(sl.top_k(10).len(), 4);
    }

    #[test]
    fn rank_matches_count_of_better_entries() {
        let mut sl = list();
        sl.upsert(1, (100, 0));
        sl.upsert(2, (300, 0));
        sl.upsert(3, (200, 0));
        sl.upsert(4, (50, 0));

        assert_eq!(sl.rank(2), Some(1));
        assert_eq!(sl.rank(3), Some(2));
        assert_eq!(sl.rank(1), Some(3));
        assert_eq!(sl.rank(4), Some(4));
        assert_eq!(sl.rank(99), None);
    }

    #[test]
    fn equal_scores_rank_by_earlier_arrival() {
        let mut sl = list();
        sl.upsert(1, (100, 1));
        sl.upsert(2, (100, 2));

        let top = sl.top_k(2);
        assert_eq!(top[0].0, 1);
        assert_eq!(top[1].0, 2);
        assert_eq!(sl.rank(1), Some(1));
        assert_eq!(sl.rank(2), Some(2));
    }

    #[test]
    fn delete_relinks_and_reranks() {
        let mut sl = list();
        sl.upsert(1, (100, 0));
        sl.upsert(2, (300, 0));
        sl.upsert(3, (200, 0));

        assert!(sl.delete(2));
        assert!(!sl.delete(2));
        assert_eq!(sl.len(), 2);
        assert_eq!(sl.rank(3), Some(1));
        assert_eq!(sl.rank(1), Some(2));
        assert_eq!(sl.lookup(2), None);
    }

    #[test]
    fn top_k_of_full_length_equals_iteration_order() {
        let mut sl = list();
        for key in 0..32 {
            sl.upsert(key, ((key as u64 * 37) % 101, key));
        }
        let from_top: Vec<i64> = sl.top_k(sl.len()).into_iter().map(|e| e.0).collect();
        let from_iter: Vec<i64> = sl.iter().map(|(k, _)| k).collect();
        assert_eq!(from_top, from_iter);

        let ranks: Vec<u64> = sl.top_k(sl.len()).into_iter().map(|e| e.2).collect();
        assert_eq!(ranks, (1..=32).collect::<Vec<u64>>());
    }

    #[test]
    fn scan_expired_finds_matching_entries() {
        let mut sl = list();
        sl.upsert(1, (100, 10));
        sl.upsert(2, (300, 20));
        sl.upsert(3, (200, 30));

        let mut old: Vec<i64> = sl
            .scan_expired(|v| v.1 < 25)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        old.sort_unstable();
        assert_eq!(old, vec![1, 2]);

        for key in old {
            assert!(sl.delete(key));
        }
        assert_eq!(sl.len(), 1);
        assert_eq!(sl.rank(3), Some(1));
    }

    #[test]
    fn clear_resets_everything() {
        let mut sl = list();
        sl.upsert(1, (100, 0));
        sl.upsert(2, (200, 0));
        sl.clear();
        assert!(sl.is_empty());
        assert_eq!(sl.rank(1), None);
        assert_eq!(sl.upsert(1, (5, 0)), UpsertOutcome::Inserted);
        assert_eq!(sl.rank(1), Some(1));
    }

    #[test]
    fn spans_stay_consistent_under_churn() {
        // Deterministic pseudo-random workload; cross-check rank() against
        // the base-level position after every phase.
        let mut sl = list();
        let mut seed: u64 = 0x9e37_79b9;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            seed >> 33
        };

        for _ in 0..500 {
            let key = (next() % 64) as i64;
            let score = next() % 1_000;
            let ts = (next() % 1_000) as i64;
            sl.upsert(key, (score, ts));
        }
        for _ in 0..100 {
            let key = (next() % 64) as i64;
            sl.delete(key);
        }

        let positions: Vec<i64> = sl.iter().map(|(k, _)| k).collect();
        assert_eq!(positions.len(), sl.len());
        for (pos, key) in positions.iter().enumerate() {
            assert_eq!(sl.rank(*key), Some(pos + 1), "key {key} at position {pos}");
        }
    }
}
