use crate::world::map_data::{MapDataError, MapDataSource, MapMetadata};
use crate::world::spatial_index::SpatialIndex;
use dashmap::DashMap;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Parsed metadata and built index of one map, shared by all of its instances.
#[derive(Debug)]
pub struct LoadedMap {
    pub map_id: i32,
    pub metadata: MapMetadata,
    pub index: Arc<SpatialIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub loads: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64)
        }
    }
}

/// Map cache with LRU eviction. Evicted maps stay alive for as long as a
/// field still holds them.
pub struct IndexCache {
    cache: LruCache<i32, Arc<LoadedMap>>,
    stats: CacheStats,
}

impl IndexCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        IndexCache {
            cache: LruCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    /// Cached map, loading it from `source` on a miss. Failed loads are not cached.
    pub fn get_or_load(
        &mut self,
        map_id: i32,
        source: &dyn MapDataSource,
    ) -> Result<Arc<LoadedMap>, MapDataError> {
        if let Some(cached) = self.lookup(map_id) {
            return Ok(cached);
        }
        self.stats.misses += 1;
        let loaded = load_map(map_id, source)?;
        self.insert(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Cached map, counted as a hit when present.
    pub fn lookup(&mut self, map_id: i32) -> Option<Arc<LoadedMap>> {
        let cached = self.cache.get(&map_id).map(Arc::clone);
        if cached.is_some() {
            self.stats.hits += 1;
        }
        cached
    }

    pub fn insert(&mut self, loaded: Arc<LoadedMap>) {
        self.stats.loads += 1;
        let map_id = loaded.map_id;
        if let Some((evicted, _)) = self.cache.push(map_id, loaded) {
            if evicted != map_id {
                self.stats.evictions += 1;
            }
        }
    }

    fn record_miss(&mut self) {
        self.stats.misses += 1;
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Reads metadata and builds the index of one map.
pub fn load_map(map_id: i32, source: &dyn MapDataSource) -> Result<Arc<LoadedMap>, MapDataError> {
    let metadata = source.metadata(map_id)?;
    let index = source.spatial_index(map_id, &metadata)?;
    let loaded = Arc::new(LoadedMap {
        map_id,
        metadata,
        index: Arc::new(index),
    });
    debug!(
        map_id,
        aligned = loaded.index.aligned().len(),
        unaligned = loaded.index.unaligned().len(),
        "map_loaded"
    );
    Ok(loaded)
}

/// [`IndexCache`] shared between threads. The LRU lock is held only for
/// lookups and inserts; loads run outside it under a per-map slot, so
/// concurrent misses on one map load it once and different maps load in
/// parallel.
pub struct SharedIndexCache {
    cache: Mutex<IndexCache>,
    loading: DashMap<i32, Arc<Mutex<()>>>,
}

impl SharedIndexCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(IndexCache::new(capacity)),
            loading: DashMap::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_or_load(
        &self,
        map_id: i32,
        source: &dyn MapDataSource,
    ) -> Result<Arc<LoadedMap>, MapDataError> {
        if let Some(cached) = self.lock().lookup(map_id) {
            return Ok(cached);
        }

        let slot = Arc::clone(self.loading.entry(map_id).or_default().value());
        let result = {
            let _loading = slot.lock().unwrap_or_else(PoisonError::into_inner);
            let cached = self.lock().lookup(map_id);
            match cached {
                Some(cached) => Ok(cached),
                None => {
                    self.lock().record_miss();
                    let loaded = load_map(map_id, source);
                    if let Ok(loaded) = &loaded {
                        self.lock().insert(Arc::clone(loaded));
                    }
                    loaded
                }
            }
        };
        drop(slot);
        // Only the table's own reference left means nobody is waiting on it.
        self.loading
            .remove_if(&map_id, |_, slot| Arc::strong_count(slot) == 1);
        result
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn pending_loads(&self) -> usize {
        self.loading.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::map_data::StaticMapSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Source whose first map takes a while to read.
    struct SlowSource {
        inner: StaticMapSource,
        slow_map: i32,
        delay: Duration,
        reads: AtomicUsize,
    }

    impl MapDataSource for SlowSource {
        fn metadata(&self, map_id: i32) -> Result<MapMetadata, MapDataError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if map_id == self.slow_map {
                thread::sleep(self.delay);
            }
            self.inner.metadata(map_id)
        }
    }

    fn slow_source(delay: Duration) -> Arc<SlowSource> {
        Arc::new(SlowSource {
            inner: source(2),
            slow_map: 0,
            delay,
            reads: AtomicUsize::new(0),
        })
    }

    fn source(maps: i32) -> StaticMapSource {
        (0..maps).fold(StaticMapSource::new(), |source, map_id| {
            source.with_map(
                map_id,
                MapMetadata {
                    name: format!("map {map_id}"),
                    ..MapMetadata::default()
                },
            )
        })
    }

    #[test]
    fn second_lookup_is_a_hit_sharing_the_index() {
        let source = source(1);
        let mut cache = IndexCache::new(4);
        let first = cache.get_or_load(0, &source).expect("load");
        let second = cache.get_or_load(0, &source).expect("load");
        assert!(Arc::ptr_eq(&first.index, &second.index));
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn eviction_is_counted() {
        let source = source(5);
        let mut cache = IndexCache::new(3);
        for map_id in 0..5 {
            cache.get_or_load(map_id, &source).expect("load");
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 2);
        assert_eq!(cache.stats().loads, 5);
    }

    #[test]
    fn failed_load_is_not_cached() {
        let source = source(1);
        let mut cache = IndexCache::new(3);
        assert!(matches!(
            cache.get_or_load(9, &source),
            Err(MapDataError::NotFound(9))
        ));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn hit_rate_and_reset() {
        let source = source(1);
        let mut cache = IndexCache::new(2);
        for _ in 0..11 {
            cache.get_or_load(0, &source).expect("load");
        }
        assert!((cache.stats().hit_rate() - 0.909).abs() < 0.01);
        cache.reset_stats();
        assert_eq!(cache.stats(), &CacheStats::default());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn slow_load_does_not_block_other_maps() {
        let source = slow_source(Duration::from_millis(1500));
        let cache = Arc::new(SharedIndexCache::new(4));
        let slow = {
            let cache = Arc::clone(&cache);
            let source = Arc::clone(&source);
            thread::spawn(move || cache.get_or_load(0, source.as_ref()).map(|map| map.map_id))
        };
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        let other = cache.get_or_load(1, source.as_ref()).expect("load");
        assert_eq!(other.map_id, 1);
        assert!(started.elapsed() < Duration::from_millis(500));

        assert_eq!(slow.join().expect("join").expect("load"), 0);
        assert_eq!(cache.stats().loads, 2);
        assert_eq!(cache.pending_loads(), 0);
    }

    #[test]
    fn concurrent_misses_load_once() {
        let source = slow_source(Duration::from_millis(50));
        let cache = Arc::new(SharedIndexCache::new(4));
        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let source = Arc::clone(&source);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_load(0, source.as_ref()).expect("load")
                })
            })
            .collect();
        let maps: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();
        assert!(maps.iter().all(|map| Arc::ptr_eq(map, &maps[0])));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().loads, 1);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.pending_loads(), 0);
    }

    #[test]
    fn shared_failed_load_leaves_no_slot() {
        let source = slow_source(Duration::ZERO);
        let cache = SharedIndexCache::new(4);
        assert!(matches!(
            cache.get_or_load(9, source.as_ref()),
            Err(MapDataError::NotFound(9))
        ));
        assert!(cache.is_empty());
        assert_eq!(cache.pending_loads(), 0);
    }
}
