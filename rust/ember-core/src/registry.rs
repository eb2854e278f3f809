//! Concurrent append-only registries.
//!
//! Index assignment happens under a lock; reading an already-registered
//! entry by index never locks. Entries live in segments that are allocated
//! once and never move, so references handed out stay valid for the life of
//! the registry.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

const FIRST_SEGMENT_BITS: u32 = 5;
const FIRST_SEGMENT: usize = 1 << FIRST_SEGMENT_BITS;
/// Segment `s` holds `32 << s` slots; this many segments cover the address space.
const SEGMENTS: usize = (usize::BITS - FIRST_SEGMENT_BITS) as usize;

type Segment<T> = Box<[OnceCell<T>]>;

/// Maps a flat index to `(segment, offset)`.
fn locate(index: usize) -> (usize, usize) {
    let j = index + FIRST_SEGMENT;
    let bit = usize::BITS - 1 - j.leading_zeros();
    let segment = (bit - FIRST_SEGMENT_BITS) as usize;
    (segment, j - (1usize << bit))
}

pub struct AppendOnlyRegistry<T> {
    segments: Box<[OnceCell<Segment<T>>]>,
    len: AtomicUsize,
    writer: Mutex<()>,
}

impl<T> AppendOnlyRegistry<T> {
    pub fn new() -> Self {
        AppendOnlyRegistry {
            segments: (0..SEGMENTS).map(|_| OnceCell::new()).collect(),
            len: AtomicUsize::new(0),
            writer: Mutex::new(()),
        }
    }

    /// Appends `value` and returns its index.
    pub fn push(&self, value: T) -> usize {
        let _guard = self.writer.lock();
        self.push_locked(value)
    }

    /// Appends the value built from the index it will be stored at.
    pub fn push_with(&self, make: impl FnOnce(usize) -> T) -> usize {
        let _guard = self.writer.lock();
        let index = self.len.load(Ordering::Relaxed);
        self.push_locked(make(index))
    }

    fn push_locked(&self, value: T) -> usize {
        let index = self.len.load(Ordering::Relaxed);
        let (s, offset) = locate(index);
        let segment = self.segments[s]
            .get_or_init(|| (0..FIRST_SEGMENT << s).map(|_| OnceCell::new()).collect());
        // slots past `len` are never written before the writer lock reaches them
        let _ = segment[offset].set(value);
        self.len.store(index + 1, Ordering::Release);
        index
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len.load(Ordering::Acquire) {
            return None;
        }
        let (s, offset) = locate(index);
        self.segments[s].get()?.get(offset)?.get()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot iteration over entries registered so far.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let len = self.len();
        (0..len).filter_map(move |i| self.get(i))
    }
}

impl<T> Default for AppendOnlyRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AppendOnlyRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// An append-only registry deduplicated by key.
pub struct KeyedRegistry<K, T> {
    index: Mutex<HashMap<K, usize>>,
    entries: AppendOnlyRegistry<T>,
}

impl<K: Eq + Hash, T> KeyedRegistry<K, T> {
    pub fn new() -> Self {
        KeyedRegistry {
            index: Mutex::new(HashMap::new()),
            entries: AppendOnlyRegistry::new(),
        }
    }

    /// Index of `key`, registering `make(index)` first when the key is new.
    /// Returns the index and whether this call registered it.
    pub fn get_or_register(&self, key: K, make: impl FnOnce(usize) -> T) -> (usize, bool) {
        let mut index = self.index.lock();
        if let Some(&i) = index.get(&key) {
            return (i, false);
        }
        let i = self.entries.push_with(make);
        index.insert(key, i);
        (i, true)
    }

    /// Registers a value under a fresh key derived from `base`: the first
    /// registration keeps `base`, later ones get `base'1`, `base'2`, ...
    pub fn register_unique(&self, base: &str, make: impl FnOnce(usize, &str) -> T) -> usize
    where
        K: From<String>,
    {
        let mut index = self.index.lock();
        let mut name = base.to_string();
        let mut n = 0;
        while index.contains_key(&K::from(name.clone())) {
            n += 1;
            name = format!("{}'{}", base, n);
        }
        let i = self.entries.push_with(|i| make(i, &name));
        index.insert(K::from(name), i);
        i
    }

    pub fn lookup(&self, key: &K) -> Option<usize> {
        self.index.lock().get(key).copied()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter()
    }
}

impl<K: Eq + Hash, T> Default for KeyedRegistry<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T: std::fmt::Debug> std::fmt::Debug for KeyedRegistry<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_locate_segments() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(31), (0, 31));
        assert_eq!(locate(32), (1, 0));
        assert_eq!(locate(95), (1, 63));
        assert_eq!(locate(96), (2, 0));
    }

    #[test]
    fn test_push_and_get_across_segments() {
        let reg = AppendOnlyRegistry::new();
        for i in 0..200 {
            assert_eq!(reg.push(i * 2), i);
        }
        assert_eq!(reg.len(), 200);
        assert_eq!(reg.get(0), Some(&0));
        assert_eq!(reg.get(150), Some(&300));
        assert_eq!(reg.get(200), None);
    }

    #[test]
    fn test_keyed_dedup() {
        let reg: KeyedRegistry<String, String> = KeyedRegistry::new();
        let (a, fresh_a) = reg.get_or_register("x".into(), |i| format!("x#{}", i));
        let (b, fresh_b) = reg.get_or_register("x".into(), |_| unreachable!());
        assert_eq!(a, b);
        assert!(fresh_a && !fresh_b);
        assert_eq!(reg.get(a).map(String::as_str), Some("x#0"));
    }

    #[test]
    fn test_register_unique_suffixes() {
        let reg: KeyedRegistry<String, String> = KeyedRegistry::new();
        let names: Vec<String> = (0..3)
            .map(|_| {
                let i = reg.register_unique("call_foo", |_, name| name.to_string());
                reg.get(i).cloned().unwrap()
            })
            .collect();
        assert_eq!(names, vec!["call_foo", "call_foo'1", "call_foo'2"]);
    }

    #[test]
    fn test_concurrent_push() {
        let reg = Arc::new(AppendOnlyRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        reg.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 800);
        let mut all: Vec<_> = reg.iter().copied().collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 800);
    }
}
