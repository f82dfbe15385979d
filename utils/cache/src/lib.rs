use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

/// A fixed-capacity cache with least-recently-used eviction and hit/miss
/// accounting.
///
/// The cache is owned by a single worker (`&mut self` access), so it carries no
/// internal locking. Callers decide its lifetime; dropping it is the only
/// invalidation.
pub struct BoundedLruCache<K, V> {
    inner: LruCache<K, V>,
    hits: u64,
    misses: u64,
}

/// Point-in-time counters for a [`BoundedLruCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

impl<K, V> BoundedLruCache<K, V>
where
    K: Eq + Hash,
{
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        match self.inner.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert `value`, returning the entry evicted to make room, if any.
    ///
    /// Replacing the value of an existing key is not an eviction.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.inner.contains(&key) {
            self.inner.put(key, value);
            return None;
        }
        self.inner.push(key, value)
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: K,
        value: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E>
    where
        V: Clone,
    {
        if let Some(cached) = self.get(&key) {
            return Ok(cached.clone());
        }
        let value = value()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.inner.len(),
            capacity: self.capacity(),
        }
    }
}
