use crate::world::time::GameTick;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

/// Due entry in the cron heap.
#[derive(Clone, Copy, Debug)]
struct CronEntry<K> {
    key: K,
    due: GameTick,
}

/// Min-heap by due tick, ties broken by key so equal ticks pop in a stable order.
impl<K: Ord> Ord for CronEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl<K: Ord> PartialOrd for CronEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> PartialEq for CronEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord> Eq for CronEntry<K> {}

/// Tick-keyed timer wheel. Rescheduling a key supersedes its previous entry;
/// stale heap entries are dropped lazily when they reach the top.
#[derive(Debug)]
pub struct CronSystem<K> {
    heap: BinaryHeap<CronEntry<K>>,
    index: HashMap<K, GameTick>,
}

impl<K: Copy + Eq + Hash + Ord> Default for CronSystem<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash + Ord> CronSystem<K> {
    pub fn new() -> Self {
        CronSystem {
            heap: BinaryHeap::new(),
            index: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: K, delay: u64, now: GameTick) {
        let due = GameTick(now.0.saturating_add(delay));
        self.index.insert(key, due);
        self.heap.push(CronEntry { key, due });
    }

    /// Earliest live entry without removing it.
    pub fn peek(&mut self) -> Option<(K, GameTick)> {
        loop {
            let entry = *self.heap.peek()?;
            match self.index.get(&entry.key) {
                Some(due) if *due == entry.due => return Some((entry.key, entry.due)),
                _ => {
                    self.heap.pop();
                }
            }
        }
    }

    pub fn pop_ready(&mut self, now: GameTick) -> Option<K> {
        let (key, due) = self.peek()?;
        if due > now {
            return None;
        }
        self.heap.pop();
        self.index.remove(&key);
        Some(key)
    }

    /// Removes the entry and returns the ticks it still had to run (at least 1).
    pub fn stop(&mut self, key: K, now: GameTick) -> Option<u64> {
        let due = self.index.remove(&key)?;
        Some(due.0.saturating_sub(now.0).max(1))
    }

    pub fn remaining(&self, key: K, now: GameTick) -> Option<u64> {
        let due = self.index.get(&key)?;
        Some(due.0.saturating_sub(now.0).max(1))
    }

    pub fn contains(&self, key: K) -> bool {
        self.index.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_entry_pops_first() {
        let mut cron = CronSystem::new();
        let now = GameTick(1000);
        cron.set(1u32, 10, now);
        cron.set(2u32, 5, now);
        assert_eq!(cron.len(), 2);

        assert_eq!(cron.pop_ready(GameTick(1004)), None);
        assert_eq!(cron.pop_ready(GameTick(1005)), Some(2));
        assert_eq!(cron.pop_ready(GameTick(1009)), None);
        assert_eq!(cron.pop_ready(GameTick(1010)), Some(1));
        assert!(cron.is_empty());
    }

    #[test]
    fn rescheduling_supersedes_old_entry() {
        let mut cron = CronSystem::new();
        cron.set(7u32, 3, GameTick(0));
        cron.set(7u32, 20, GameTick(0));
        assert_eq!(cron.pop_ready(GameTick(5)), None);
        assert_eq!(cron.remaining(7, GameTick(5)), Some(15));
        assert_eq!(cron.pop_ready(GameTick(20)), Some(7));
        assert_eq!(cron.pop_ready(GameTick(40)), None);
    }

    #[test]
    fn stop_reports_remaining_ticks() {
        let mut cron = CronSystem::new();
        cron.set(1u32, 10, GameTick(100));
        assert_eq!(cron.stop(1, GameTick(104)), Some(6));
        assert_eq!(cron.stop(1, GameTick(104)), None);
        assert!(!cron.contains(1));

        cron.set(2u32, 1, GameTick(100));
        assert_eq!(cron.remaining(2, GameTick(300)), Some(1));
    }

    #[test]
    fn same_tick_entries_pop_in_key_order() {
        let mut cron = CronSystem::new();
        for key in [3u32, 1, 2] {
            cron.set(key, 5, GameTick(0));
        }
        let mut ready = Vec::new();
        while let Some(key) = cron.pop_ready(GameTick(5)) {
            ready.push(key);
        }
        assert_eq!(ready, vec![1, 2, 3]);
    }
}
