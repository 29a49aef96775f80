//! Keyed table of live field instances and their reclamation.

use crate::world::field::{FieldError, FieldKey, FieldSettings, FieldSimulation, ReclaimReason};
use crate::world::hooks::FieldHooks;
use crate::world::ids::IdAllocator;
use crate::world::index_cache::{CacheStats, LoadedMap, SharedIndexCache};
use crate::world::map_data::{MapDataError, MapDataSource};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    MapData(#[from] MapDataError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error("instance id space exhausted")]
    IdsExhausted,
    #[error("failed to start reclaimer thread: {0}")]
    ReclaimerSpawn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    pub field: FieldSettings,
    /// How long a field may stay without players before it is disposed.
    pub empty_timeout: Duration,
    pub reclaim_interval: Duration,
    pub index_cache_capacity: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            field: FieldSettings::default(),
            empty_timeout: Duration::from_secs(300),
            reclaim_interval: Duration::from_secs(1),
            index_cache_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub live: usize,
    /// Published (map, owner) buckets, live or waiting to be pruned.
    pub buckets: usize,
    pub created: u64,
    pub disposed: u64,
    pub cache: CacheStats,
}

/// Instances of one (map, owner) pair, keyed by instance id.
#[derive(Default)]
struct OwnerBucket {
    instances: BTreeMap<i32, Arc<FieldSimulation>>,
}

impl OwnerBucket {
    fn find(&self, instance_id: i32) -> Option<&Arc<FieldSimulation>> {
        let found = if instance_id == 0 {
            self.instances.values().find(|field| !field.is_disposed())
        } else {
            self.instances.get(&instance_id)
        };
        found.filter(|field| !field.is_disposed())
    }
}

type OwnerTable = DashMap<i64, Arc<Mutex<OwnerBucket>>>;

fn lock_bucket(bucket: &Mutex<OwnerBucket>) -> MutexGuard<'_, OwnerBucket> {
    bucket.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct InstanceRegistry {
    fields: DashMap<i32, Arc<OwnerTable>>,
    source: Arc<dyn MapDataSource>,
    cache: SharedIndexCache,
    ids: Arc<IdAllocator>,
    hooks: FieldHooks,
    settings: RegistrySettings,
    created: AtomicU64,
    disposed: AtomicU64,
}

impl InstanceRegistry {
    pub fn new(
        source: Arc<dyn MapDataSource>,
        ids: Arc<IdAllocator>,
        hooks: FieldHooks,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            fields: DashMap::new(),
            source,
            cache: SharedIndexCache::new(settings.index_cache_capacity),
            ids,
            hooks,
            settings,
            created: AtomicU64::new(0),
            disposed: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    fn bucket(&self, map_id: i32, owner_id: i64) -> Arc<Mutex<OwnerBucket>> {
        let owners = Arc::clone(self.fields.entry(map_id).or_default().value());
        let bucket = Arc::clone(owners.entry(owner_id).or_default().value());
        bucket
    }

    fn existing_bucket(&self, map_id: i32, owner_id: i64) -> Option<Arc<Mutex<OwnerBucket>>> {
        let owners = Arc::clone(self.fields.get(&map_id)?.value());
        let bucket = owners.get(&owner_id).map(|bucket| Arc::clone(bucket.value()));
        bucket
    }

    fn load_map(&self, map_id: i32) -> Result<Arc<LoadedMap>, MapDataError> {
        self.cache.get_or_load(map_id, self.source.as_ref())
    }

    /// Drops the bucket of `(map_id, owner_id)` once it holds no instance and
    /// no caller holds it, then the map's table once it has no bucket.
    /// Callers must not hold their own handle to the bucket.
    fn prune(&self, map_id: i32, owner_id: i64) {
        let Some(owners) = self.fields.get(&map_id).map(|entry| Arc::clone(entry.value())) else {
            return;
        };
        owners.remove_if(&owner_id, |_, bucket| {
            Arc::strong_count(bucket) == 1 && lock_bucket(bucket).instances.is_empty()
        });
        drop(owners);
        self.fields
            .remove_if(&map_id, |_, owners| Arc::strong_count(owners) == 1 && owners.is_empty());
    }

    /// Live instance at `(map_id, owner_id, instance_id)`, created on demand.
    ///
    /// `instance_id == 0` picks the lowest-id live instance of the owner, or
    /// creates one. An id that is not live creates a new instance under a
    /// fresh global id; the returned field's key carries it.
    pub fn get(&self, map_id: i32, owner_id: i64, instance_id: i32) -> Result<Arc<FieldSimulation>, RegistryError> {
        let bucket = self.bucket(map_id, owner_id);
        let result = self.get_in(&bucket, map_id, owner_id, instance_id);
        if result.is_err() {
            drop(bucket);
            self.prune(map_id, owner_id);
        }
        result
    }

    fn get_in(
        &self,
        bucket: &Mutex<OwnerBucket>,
        map_id: i32,
        owner_id: i64,
        instance_id: i32,
    ) -> Result<Arc<FieldSimulation>, RegistryError> {
        if let Some(field) = lock_bucket(bucket).find(instance_id) {
            return Ok(Arc::clone(field));
        }

        let map = self.load_map(map_id).map_err(|err| {
            warn!(map_id, owner_id, error = %err, "field_load_failed");
            err
        })?;

        let mut guard = lock_bucket(bucket);
        if let Some(field) = guard.find(instance_id) {
            return Ok(Arc::clone(field));
        }
        let id = self.ids.next_global().ok_or(RegistryError::IdsExhausted)?;
        let key = FieldKey::new(map_id, owner_id, id);
        let field = FieldSimulation::start(key, map, self.hooks.clone(), self.settings.field)?;
        guard.instances.insert(id, Arc::clone(&field));
        drop(guard);

        self.created.fetch_add(1, Ordering::Relaxed);
        info!(map_id, owner_id, instance_id = id, "field_created");
        Ok(field)
    }

    /// Disposes and unpublishes one instance. False when it was not live.
    pub fn remove(&self, key: FieldKey) -> bool {
        let Some(bucket) = self.existing_bucket(key.map_id, key.owner_id) else {
            return false;
        };
        let removed = lock_bucket(&bucket).instances.remove(&key.instance_id);
        drop(bucket);
        self.prune(key.map_id, key.owner_id);
        match removed {
            Some(field) => {
                self.dispose(&field);
                true
            }
            None => false,
        }
    }

    fn dispose(&self, field: &FieldSimulation) {
        if !field.is_disposed() {
            field.dispose();
            self.disposed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn all_buckets(&self) -> Vec<(i32, i64, Arc<Mutex<OwnerBucket>>)> {
        let owners: Vec<(i32, Arc<OwnerTable>)> = self
            .fields
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        owners
            .iter()
            .flat_map(|(map_id, table)| {
                table
                    .iter()
                    .map(|entry| (*map_id, *entry.key(), Arc::clone(entry.value())))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.all_buckets()
            .iter()
            .map(|(_, _, bucket)| lock_bucket(bucket).instances.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of every published instance, sorted.
    pub fn keys(&self) -> Vec<FieldKey> {
        let mut keys: Vec<FieldKey> = self
            .all_buckets()
            .iter()
            .flat_map(|(_, _, bucket)| {
                lock_bucket(bucket)
                    .instances
                    .values()
                    .map(|field| field.key())
                    .collect::<Vec<_>>()
            })
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.len(),
            buckets: self.fields.iter().map(|entry| entry.value().len()).sum(),
            created: self.created.load(Ordering::Relaxed),
            disposed: self.disposed.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }

    /// One reclamation pass: disposes fields empty past the timeout or past
    /// their room timer.
    pub fn reclaim_idle(&self, now: Instant) -> Vec<(FieldKey, ReclaimReason)> {
        let mut reclaimed = Vec::new();
        for (map_id, owner_id, bucket) in self.all_buckets() {
            let due: Vec<(Arc<FieldSimulation>, ReclaimReason)> = {
                let mut guard = lock_bucket(&bucket);
                let due_ids: Vec<(i32, ReclaimReason)> = guard
                    .instances
                    .iter()
                    .filter_map(|(id, field)| {
                        if field.is_disposed() {
                            return Some((*id, ReclaimReason::Empty));
                        }
                        field
                            .reclaim_due(now, self.settings.empty_timeout)
                            .map(|reason| (*id, reason))
                    })
                    .collect();
                due_ids
                    .into_iter()
                    .filter_map(|(id, reason)| guard.instances.remove(&id).map(|field| (field, reason)))
                    .collect()
            };
            drop(bucket);
            self.prune(map_id, owner_id);
            for (field, reason) in due {
                self.dispose(&field);
                let key = field.key();
                info!(
                    map_id = key.map_id,
                    owner_id = key.owner_id,
                    instance_id = key.instance_id,
                    reason = ?reason,
                    "field_reclaimed"
                );
                reclaimed.push((key, reason));
            }
        }
        reclaimed
    }

    /// Runs `reclaim_idle` every `reclaim_interval` on a background thread.
    pub fn spawn_reclaimer(self: &Arc<Self>) -> Result<ReclaimerHandle, RegistryError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let registry = Arc::clone(self);
        let interval = self.settings.reclaim_interval;
        let thread = thread::Builder::new()
            .name("field-reclaimer".to_string())
            .spawn(move || {
                while thread_running.load(Ordering::SeqCst) {
                    let reclaimed = registry.reclaim_idle(Instant::now());
                    if !reclaimed.is_empty() {
                        debug!(count = reclaimed.len(), "reclaim_pass");
                    }
                    thread::sleep(interval);
                }
            })
            .map_err(|err| RegistryError::ReclaimerSpawn(err.to_string()))?;
        Ok(ReclaimerHandle {
            running,
            thread: Some(thread),
        })
    }

    /// Disposes every live instance.
    pub fn shutdown(&self) {
        let mut fields = Vec::new();
        for (_, _, bucket) in self.all_buckets() {
            let mut guard = lock_bucket(&bucket);
            fields.extend(std::mem::take(&mut guard.instances).into_values());
        }
        for field in &fields {
            self.dispose(field);
        }
        self.fields.clear();
        info!(disposed = fields.len(), "registry_shutdown");
    }
}

/// Stops and joins the reclaimer thread on `stop` or drop.
#[derive(Debug)]
pub struct ReclaimerHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReclaimerHandle {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("reclaimer_thread_panicked");
            }
        }
    }
}

impl Drop for ReclaimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
