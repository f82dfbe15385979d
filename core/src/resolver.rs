use std::num::NonZeroUsize;
use std::sync::Arc;

use wikihist_state::Page;
use wikihist_utils_cache::BoundedLruCache;
use wikihist_utils_cache::CacheStats;

use crate::error::Result;
use crate::store::PageDirectory;
use crate::util::RetryPolicy;

pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// Cache counters for both resolver lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolverStats {
    pub by_title: CacheStats,
    pub by_id: CacheStats,
}

/// Pass-scoped page resolver.
///
/// Lookups by `(namespace, title)` and by id are memoized in independent LRU
/// caches. Misses are cached too: an absent page stays absent for the rest of
/// the pass. Failed lookups are not cached.
pub struct TargetResolver {
    directory: Arc<dyn PageDirectory>,
    by_title: BoundedLruCache<(i64, String), Option<Page>>,
    by_id: BoundedLruCache<i64, Option<Page>>,
    retry: RetryPolicy,
}

impl TargetResolver {
    pub fn new(
        directory: Arc<dyn PageDirectory>,
        capacity: NonZeroUsize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            directory,
            by_title: BoundedLruCache::new(capacity),
            by_id: BoundedLruCache::new(capacity),
            retry,
        }
    }

    pub async fn resolve(&mut self, namespace: i64, title: &str) -> Result<Option<Page>> {
        let key = (namespace, title.to_string());
        if let Some(cached) = self.by_title.get(&key) {
            return Ok(cached.clone());
        }
        let directory = self.directory.as_ref();
        let page = self
            .retry
            .run("page_by_title", || directory.page_by_title(namespace, title))
            .await?;
        self.by_title.insert(key, page.clone());
        Ok(page)
    }

    pub async fn resolve_by_id(&mut self, page_id: i64) -> Result<Option<Page>> {
        if let Some(cached) = self.by_id.get(&page_id) {
            return Ok(cached.clone());
        }
        let directory = self.directory.as_ref();
        let page = self
            .retry
            .run("page_by_id", || directory.page_by_id(page_id))
            .await?;
        self.by_id.insert(page_id, page.clone());
        Ok(page)
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            by_title: self.by_title.stats(),
            by_id: self.by_id.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySnapshot;
    use pretty_assertions::assert_eq;

    fn snapshot() -> Arc<InMemorySnapshot> {
        let snapshot = InMemorySnapshot::default();
        snapshot.add_page(7, 0, "Dog", false);
        snapshot.add_page(8, 0, "Cat", false);
        snapshot.add_page(42, 0, "Doggo", true);
        Arc::new(snapshot)
    }

    #[tokio::test]
    async fn repeated_lookups_hit_the_cache() {
        let snapshot = snapshot();
        let mut resolver = TargetResolver::new(
            snapshot.clone(),
            NonZeroUsize::MIN.saturating_add(1),
            RetryPolicy::no_retries(),
        );

        let dog = resolver.resolve(0, "Dog").await.expect("resolve");
        assert_eq!(dog.map(|page| page.id), Some(7));
        resolver.resolve(0, "Dog").await.expect("resolve");
        assert_eq!(resolver.resolve(0, "Wolf").await.expect("resolve"), None);
        assert_eq!(resolver.resolve(0, "Wolf").await.expect("resolve"), None);
        assert_eq!(snapshot.lookups(), 2);

        let stats = resolver.stats();
        assert_eq!(stats.by_title.hits, 2);
        assert_eq!(stats.by_title.misses, 2);
        assert_eq!(
            stats.by_id,
            CacheStats {
                capacity: 2,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn least_recently_used_entries_are_evicted() {
        let snapshot = snapshot();
        let mut resolver = TargetResolver::new(
            snapshot.clone(),
            NonZeroUsize::MIN.saturating_add(1),
            RetryPolicy::no_retries(),
        );

        for id in [7, 8, 7, 42, 7, 8] {
            resolver.resolve_by_id(id).await.expect("resolve");
        }
        // 7 miss, 8 miss, 7 hit, 42 miss (evicts 8), 7 hit, 8 miss (evicts 42).
        assert_eq!(snapshot.lookups(), 4);
        assert_eq!(resolver.stats().by_id.len, 2);
    }

    #[tokio::test]
    async fn title_and_id_caches_are_independent() {
        let snapshot = snapshot();
        let mut resolver = TargetResolver::new(
            snapshot.clone(),
            DEFAULT_CACHE_CAPACITY,
            RetryPolicy::no_retries(),
        );

        let by_title = resolver.resolve(0, "Doggo").await.expect("resolve");
        let by_id = resolver.resolve_by_id(42).await.expect("resolve");
        assert_eq!(by_title, by_id);
        assert_eq!(snapshot.lookups(), 2);
    }
}
