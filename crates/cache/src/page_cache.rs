//! Page cache with a hard entry ceiling and LRU eviction
//!
//! Holds rendered pages keyed by [`PageKey`]. The number of resident entries
//! never exceeds `max_size`, so peak memory is bounded by the ceiling and
//! independent of document length.

use crate::page::{PageKey, RenderedPage};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default entry ceiling
pub const DEFAULT_MAX_RESIDENT_PAGES: usize = 3;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of pages currently in cache
    pub entry_count: usize,

    /// Total bytes held by cached pixel buffers
    pub bytes_resident: usize,

    /// Entry ceiling
    pub max_size: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of pages inserted
    pub insertions: u64,

    /// Number of pages evicted, by LRU pressure or by predicate
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Internal cache state
struct CacheState {
    /// Map from key to page data
    pages: HashMap<PageKey, RenderedPage>,

    /// LRU queue (most recently used at back, least recently used at front)
    lru_queue: VecDeque<PageKey>,

    /// Entry ceiling
    max_size: usize,

    /// Current pixel bytes held
    bytes_resident: usize,

    /// Statistics
    stats: CacheStats,
}

impl CacheState {
    fn new(max_size: usize) -> Self {
        Self {
            pages: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_size,
            bytes_resident: 0,
            stats: CacheStats {
                max_size,
                ..Default::default()
            },
        }
    }

    /// Move a key to the back of the LRU queue (mark as most recently used)
    fn touch(&mut self, key: &PageKey) {
        if let Some(index) = self.lru_queue.iter().position(|k| k == key) {
            self.lru_queue.remove(index);
        }
        self.lru_queue.push_back(*key);
    }

    /// Remove one entry, dropping its pixel buffer
    fn remove_entry(&mut self, key: &PageKey) -> Option<RenderedPage> {
        let page = self.pages.remove(key)?;
        if let Some(index) = self.lru_queue.iter().position(|k| k == key) {
            self.lru_queue.remove(index);
        }
        self.bytes_resident = self.bytes_resident.saturating_sub(page.memory_size());
        self.sync_stats();
        Some(page)
    }

    /// Evict the least recently used page
    fn evict_lru(&mut self) -> Option<PageKey> {
        let key = self.lru_queue.pop_front()?;
        let page = self.pages.remove(&key)?;
        self.bytes_resident = self.bytes_resident.saturating_sub(page.memory_size());
        self.stats.evictions += 1;
        self.sync_stats();
        tracing::debug!(%key, "evicted least recently used page");
        Some(key)
    }

    /// Evict pages until the entry count is within the ceiling
    fn evict_to_fit(&mut self) -> Vec<PageKey> {
        let mut evicted = Vec::new();
        while self.pages.len() > self.max_size {
            match self.evict_lru() {
                Some(key) => evicted.push(key),
                None => break,
            }
        }
        evicted
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.pages.len();
        self.stats.bytes_resident = self.bytes_resident;
    }
}

/// Page cache with LRU eviction
///
/// Thread-safe: the map and its recency order sit behind a single mutex, so
/// a lookup never observes a partially inserted or partially evicted entry,
/// and no entry is handed out after it has been evicted. Clones share the
/// same underlying cache.
///
/// # Example
///
/// ```
/// use pageport_cache::{PageCache, PageKey, RenderedPage, Rotation};
///
/// let cache = PageCache::new(3);
/// let key = PageKey::new(0, 1.0, Rotation::Deg0);
///
/// cache.put(RenderedPage::new(key, vec![0u8; 16], 2, 2, 1));
///
/// // Borrow the page without copying its pixels
/// let width = cache.with_page(&key, |page| page.width_px);
/// assert_eq!(width, Some(2));
/// ```
#[derive(Clone)]
pub struct PageCache {
    state: Arc<Mutex<CacheState>>,
}

impl PageCache {
    /// Create a new page cache holding at most `max_size` pages
    ///
    /// A ceiling of zero is raised to one.
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::new(max_size.max(1)))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a page in the cache
    ///
    /// A page whose key is already present replaces the old value and
    /// refreshes its recency. Least recently used pages are then evicted
    /// until the cache is within its ceiling. Returns the evicted keys.
    pub fn put(&self, page: RenderedPage) -> Vec<PageKey> {
        let mut state = self.lock();
        let key = page.key;

        if let Some(old) = state.pages.remove(&key) {
            state.bytes_resident = state.bytes_resident.saturating_sub(old.memory_size());
        }

        state.bytes_resident += page.memory_size();
        state.pages.insert(key, page);
        state.touch(&key);
        state.stats.insertions += 1;
        state.sync_stats();

        state.evict_to_fit()
    }

    /// Run `f` on a borrowed view of a cached page
    ///
    /// Returns `None` on a miss. Updates recency and statistics on a hit.
    /// The cache lock is held while `f` runs, so `f` must not call back into
    /// this cache.
    pub fn with_page<R>(&self, key: &PageKey, f: impl FnOnce(&RenderedPage) -> R) -> Option<R> {
        self.lookup(key, |page| page.map(f))
    }

    /// Run `f` with the cached page for `key`, or `None` on a miss
    ///
    /// Hit and miss are decided and handled under one lock acquisition, so
    /// the page cannot be evicted between the check and the read.
    pub fn lookup<R>(&self, key: &PageKey, f: impl FnOnce(Option<&RenderedPage>) -> R) -> R {
        let mut state = self.lock();

        if state.pages.contains_key(key) {
            state.touch(key);
            state.stats.hits += 1;
            tracing::trace!(%key, "cache hit");
        } else {
            state.stats.misses += 1;
            tracing::trace!(%key, "cache miss");
        }

        f(state.pages.get(key))
    }

    /// Retrieve a defensive copy of a cached page
    ///
    /// Updates recency and statistics like [`with_page`](Self::with_page).
    pub fn get(&self, key: &PageKey) -> Option<RenderedPage> {
        self.with_page(key, RenderedPage::clone)
    }

    /// Check if a page is cached without updating recency
    pub fn contains(&self, key: &PageKey) -> bool {
        self.lock().pages.contains_key(key)
    }

    /// Remove every page whose key matches `predicate`
    ///
    /// Pixel buffers are released before this returns. Returns the removed
    /// keys.
    pub fn evict_if<F>(&self, predicate: F) -> Vec<PageKey>
    where
        F: Fn(&PageKey) -> bool,
    {
        let mut state = self.lock();

        let doomed: Vec<PageKey> = state
            .lru_queue
            .iter()
            .filter(|key| predicate(key))
            .copied()
            .collect();

        for key in &doomed {
            if state.remove_entry(key).is_some() {
                state.stats.evictions += 1;
                tracing::debug!(%key, "evicted page");
            }
        }

        doomed
    }

    /// Remove a single page
    pub fn remove(&self, key: &PageKey) -> Option<RenderedPage> {
        self.lock().remove_entry(key)
    }

    /// Remove all pages
    pub fn clear(&self) {
        let mut state = self.lock();
        state.pages.clear();
        state.lru_queue.clear();
        state.bytes_resident = 0;
        state.sync_stats();
    }

    /// Keys currently cached, least recently used first
    pub fn keys(&self) -> Vec<PageKey> {
        self.lock().lru_queue.iter().copied().collect()
    }

    /// Number of pages currently cached
    pub fn size(&self) -> usize {
        self.lock().pages.len()
    }

    /// Whether the cache holds no pages
    pub fn is_empty(&self) -> bool {
        self.lock().pages.is_empty()
    }

    /// Entry ceiling
    pub fn max_size(&self) -> usize {
        self.lock().max_size
    }

    /// Change the entry ceiling
    ///
    /// Shrinking below the current size evicts least recently used pages
    /// immediately. Returns the evicted keys.
    pub fn set_max_size(&self, max_size: usize) -> Vec<PageKey> {
        let mut state = self.lock();
        state.max_size = max_size.max(1);
        state.stats.max_size = state.max_size;
        state.evict_to_fit()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESIDENT_PAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Rotation;
    use rand::Rng;

    fn key(page_index: usize) -> PageKey {
        PageKey::new(page_index, 1.0, Rotation::Deg0)
    }

    fn page(page_index: usize) -> RenderedPage {
        RenderedPage::new(key(page_index), vec![0u8; 32 * 32 * 4], 32, 32, page_index as u64)
    }

    #[test]
    fn test_basic_put_get() {
        let cache = PageCache::new(3);
        cache.put(page(1));

        let cached = cache.get(&key(1)).expect("page should be cached");
        assert_eq!(cached.key, key(1));
        assert_eq!(cached.width_px, 32);
        assert_eq!(cached.height_px, 32);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_cache_miss() {
        let cache = PageCache::new(3);
        assert!(cache.get(&key(999)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = PageCache::new(2);

        cache.put(page(1));
        cache.put(page(2));
        let evicted = cache.put(page(3));

        assert_eq!(evicted, vec![key(1)]);
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_ordering() {
        let cache = PageCache::new(2);

        cache.put(page(1));
        cache.put(page(2));

        // Access page 1 to make it more recently used
        assert!(cache.get(&key(1)).is_some());

        cache.put(page(3));

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_contains_does_not_touch() {
        let cache = PageCache::new(2);

        cache.put(page(1));
        cache.put(page(2));
        assert!(cache.contains(&key(1)));

        cache.put(page(3));
        assert!(!cache.contains(&key(1)));
    }

    #[test]
    fn test_update_existing_page() {
        let cache = PageCache::new(3);

        cache.put(page(1));
        let replacement = RenderedPage::new(key(1), vec![7u8; 16], 2, 2, 42);
        cache.put(replacement.clone());

        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get(&key(1)), Some(replacement));
        assert_eq!(cache.stats().bytes_resident, 16);
    }

    #[test]
    fn test_replace_refreshes_recency() {
        let cache = PageCache::new(2);

        cache.put(page(1));
        cache.put(page(2));
        cache.put(page(1));
        cache.put(page(3));

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
    }

    #[test]
    fn test_with_page_borrows() {
        let cache = PageCache::new(3);
        cache.put(page(5));

        let len = cache.with_page(&key(5), |p| p.pixels.len());
        assert_eq!(len, Some(32 * 32 * 4));
        assert_eq!(cache.with_page(&key(6), |p| p.pixels.len()), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lookup_handles_hit_and_miss() {
        let cache = PageCache::new(2);
        cache.put(page(1));
        cache.put(page(2));

        let hit = cache.lookup(&key(1), |p| p.map(|p| p.width_px).unwrap_or(0));
        let miss = cache.lookup(&key(9), |p| p.map(|p| p.width_px).unwrap_or(0));
        assert_eq!(hit, 32);
        assert_eq!(miss, 0);

        // The hit refreshed page 1, so page 2 is evicted next
        cache.put(page(3));
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
    }

    #[test]
    fn test_evict_if() {
        let cache = PageCache::new(5);
        for i in 0..5 {
            cache.put(page(i));
        }

        let mut removed = cache.evict_if(|k| k.page_index % 2 == 0);
        removed.sort_by_key(|k| k.page_index);

        assert_eq!(removed, vec![key(0), key(2), key(4)]);
        assert_eq!(cache.size(), 2);
        assert!(cache.contains(&key(1)));
        assert!(cache.contains(&key(3)));
        assert_eq!(cache.stats().bytes_resident, 2 * 32 * 32 * 4);
    }

    #[test]
    fn test_evict_if_different_params() {
        let cache = PageCache::new(3);
        let zoomed = PageKey::new(1, 2.0, Rotation::Deg0);

        cache.put(page(1));
        cache.put(RenderedPage::new(zoomed, vec![0u8; 4], 1, 1, 9));

        let current = key(0);
        let removed = cache.evict_if(|k| !k.same_params(&current));

        assert_eq!(removed, vec![zoomed]);
        assert!(cache.contains(&key(1)));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = PageCache::new(3);
        cache.put(page(1));
        cache.put(page(2));

        assert!(cache.remove(&key(1)).is_some());
        assert!(cache.remove(&key(1)).is_none());
        assert_eq!(cache.size(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().bytes_resident, 0);
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_keys_in_recency_order() {
        let cache = PageCache::new(3);
        cache.put(page(1));
        cache.put(page(2));
        cache.put(page(3));
        let _ = cache.get(&key(1));

        assert_eq!(cache.keys(), vec![key(2), key(3), key(1)]);
    }

    #[test]
    fn test_set_max_size() {
        let cache = PageCache::new(3);
        cache.put(page(1));
        cache.put(page(2));
        cache.put(page(3));

        let evicted = cache.set_max_size(1);
        assert_eq!(evicted, vec![key(1), key(2)]);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.max_size(), 1);
    }

    #[test]
    fn test_zero_ceiling_is_raised() {
        let cache = PageCache::new(0);
        assert_eq!(cache.max_size(), 1);

        cache.put(page(1));
        cache.put(page(2));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_default_cache() {
        let cache = PageCache::default();
        assert_eq!(cache.max_size(), DEFAULT_MAX_RESIDENT_PAGES);
    }

    #[test]
    fn test_hit_rate() {
        let cache = PageCache::new(3);
        cache.put(page(1));

        let _ = cache.get(&key(1));
        let _ = cache.get(&key(2));
        let _ = cache.get(&key(3));

        let hit_rate = cache.stats().hit_rate();
        assert!((hit_rate - 0.333).abs() < 0.01);
    }

    #[test]
    fn test_ceiling_holds_under_random_operations() {
        let cache = PageCache::new(3);
        let mut rng = rand::thread_rng();

        for _ in 0..5_000 {
            let index = rng.gen_range(0..100);
            match rng.gen_range(0..4) {
                0 | 1 => {
                    cache.put(page(index));
                }
                2 => {
                    let _ = cache.get(&key(index));
                }
                _ => {
                    let _ = cache.evict_if(|k| k.page_index == index);
                }
            }
            assert!(cache.size() <= 3, "cache exceeded its ceiling");
            assert_eq!(cache.keys().len(), cache.size());
        }
    }

    #[test]
    fn test_memory_bounded_for_large_document() {
        let cache = PageCache::new(3);

        for index in 0..10_000 {
            cache.put(page(index));
        }

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 3);
        assert_eq!(stats.bytes_resident, 3 * 32 * 32 * 4);
        assert_eq!(stats.evictions, 10_000 - 3);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let cache = PageCache::new(3);
        let mut handles = vec![];

        for thread_id in 0..4 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                let start = thread_id * 1000;
                for i in start..start + 500 {
                    cache.put(page(i));
                    let _ = cache.with_page(&key(i), |p| p.width_px);
                    if i % 7 == 0 {
                        cache.evict_if(|k| k.page_index < i);
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.size() <= 3);
        assert_eq!(cache.keys().len(), cache.size());
    }
}
