//! Fixed-capacity cache with CLOCK (second-chance) eviction.
//!
//! Entries live in a slot array indexed by a key map. Every hit bumps the
//! entry's frequency counter (saturating at `MAX_FREQUENCY_LIMIT`); when the
//! cache is full, the clock hand sweeps the slots, decrementing counters
//! until it finds an entry at zero, which becomes the victim. Victims are
//! handed back to the caller so it can persist them.

use std::{
    cell::Cell,
    cmp::min,
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
};

/// Maximum frequency limit for an entry in the cache.
const MAX_FREQUENCY_LIMIT: u8 = 3;

struct Entry<K, V> {
    key: K,
    value: V,

    freq: Cell<u8>,
}

impl<K, V> Entry<K, V> {
    fn new(key: K, value: V) -> Self {
        Entry {
            key,
            value,
            freq: Cell::new(0),
        }
    }

    fn touch(&self) {
        self.freq
            .set(min(self.freq.get() + 1, MAX_FREQUENCY_LIMIT));
    }
}

pub struct Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    capacity: usize,
    /// filled in order until full, then recycled by the clock hand
    slots: Vec<Entry<K, V>>,
    /// key -> slot index
    index: HashMap<K, usize>,
    hand: usize,
    stats: Stats,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Cache {
            capacity,
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            hand: 0,
            stats: Stats::new(),
        }
    }

    /// Returns a reference to the value of the given key if it exists in the cache.
    pub fn get(&self, key: &K) -> Option<&V> {
        match self.index.get(key) {
            Some(&slot) => {
                let entry = &self.slots[slot];
                entry.touch();
                self.stats.hit();
                Some(&entry.value)
            }
            None => {
                self.stats.miss();
                None
            }
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.index.get(key) {
            Some(&slot) => {
                let entry = &mut self.slots[slot];
                entry.touch();
                self.stats.hit();
                Some(&mut entry.value)
            }
            None => {
                self.stats.miss();
                None
            }
        }
    }

    /// Like [`Cache::get`], but leaves the statistics and the entry's
    /// frequency alone.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&slot| &self.slots[slot].value)
    }

    pub fn peek_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.index.get(key) {
            Some(&slot) => Some(&mut self.slots[slot].value),
            None => None,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Inserts an entry, returning the entry evicted to make room for it.
    ///
    /// Inserting an existing key replaces its value in place and evicts
    /// nothing.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            self.slots[slot].value = value;
            self.slots[slot].touch();
            return None;
        }

        if self.slots.len() < self.capacity {
            self.index.insert(key.clone(), self.slots.len());
            self.slots.push(Entry::new(key, value));
            return None;
        }

        let slot = self.next_victim();
        let victim = std::mem::replace(&mut self.slots[slot], Entry::new(key.clone(), value));
        self.index.remove(&victim.key);
        self.index.insert(key, slot);
        Some((victim.key, victim.value))
    }

    fn next_victim(&mut self) -> usize {
        loop {
            let slot = self.hand;
            self.hand = (self.hand + 1) % self.capacity;

            let freq = &self.slots[slot].freq;
            if freq.get() == 0 {
                return slot;
            }
            freq.set(freq.get() - 1);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().map(|entry| (&entry.key, &entry.value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.slots
            .iter_mut()
            .map(|entry| (&entry.key, &mut entry.value))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `(hits, misses)`.
    pub fn stats(&self) -> (usize, usize) {
        self.stats.get()
    }
}

struct Stats {
    hits: Cell<usize>,
    misses: Cell<usize>,
}

impl Stats {
    fn new() -> Self {
        Stats {
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    fn hit(&self) {
        self.hits.set(self.hits.get() + 1);
    }

    fn miss(&self) {
        self.misses.set(self.misses.get() + 1);
    }

    fn get(&self) -> (usize, usize) {
        (self.hits.get(), self.misses.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = Cache::new(2);

        assert!(cache.insert(1u32, "root").is_none());
        assert!(cache.insert(2u32, "leaf").is_none());

        assert_eq!(cache.get(&1), Some(&"root"));
        assert_eq!(cache.get(&2), Some(&"leaf"));
        assert_eq!(cache.get(&3), None);
        assert_eq!(cache.stats(), (2, 1));

        assert_eq!(cache.peek(&1), Some(&"root"));
        assert_eq!(cache.peek(&3), None);
        assert_eq!(cache.stats(), (2, 1));
    }

    #[test]
    fn test_replace_existing_key() {
        let mut cache = Cache::new(1);
        cache.insert("seq", 1);
        assert!(cache.insert("seq", 2).is_none());
        assert_eq!(cache.get(&"seq"), Some(&2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_eviction_returns_victim() {
        let mut cache = Cache::new(2);
        cache.insert(1, 10);
        cache.insert(2, 20);

        let evicted = cache.insert(3, 30);
        assert_eq!(evicted, Some((1, 10)));
        assert!(!cache.contains(&1));
        assert_eq!(cache.get(&3), Some(&30));
    }

    #[test]
    fn test_second_chance() {
        let mut cache = Cache::new(2);
        cache.insert(1, 10);
        cache.insert(2, 20);

        // Referenced entries survive one sweep of the hand.
        cache.get(&1);
        let evicted = cache.insert(3, 30);
        assert_eq!(evicted, Some((2, 20)));
        assert!(cache.contains(&1));
    }

    #[test]
    fn test_every_insert_beyond_capacity_evicts_once() {
        let cap = 8;
        let mut cache = Cache::new(cap);
        let mut evicted = Vec::new();

        for i in 0..100 {
            if i % 3 == 0 {
                cache.get(&(i / 2));
            }
            if let Some((k, _)) = cache.insert(i, i) {
                evicted.push(k);
            }
        }

        assert_eq!(cache.len(), cap);
        assert_eq!(evicted.len(), 100 - cap);
        for (k, v) in cache.iter() {
            assert_eq!(k, v);
            assert!(!evicted.contains(k));
        }
    }

    #[test]
    fn test_iter_mut() {
        let mut cache = Cache::new(4);
        for i in 0..4 {
            cache.insert(i, false);
        }
        for (_, flag) in cache.iter_mut() {
            *flag = true;
        }
        assert!(cache.iter().all(|(_, flag)| *flag));
    }
}
