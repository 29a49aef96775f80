pub mod config;
pub mod entities;
pub mod telemetry;
pub mod world;

use config::{AppConfig, ConfigError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use telemetry::logging::LoggingError;
use thiserror::Error;
use tracing::info;
use world::hooks::FieldHooks;
use world::ids::IdAllocator;
use world::index_codec::{index_fingerprint, serialize_index};
use world::map_data::{MapDataError, MapDirectory};
use world::registry::{InstanceRegistry, RegistryError};
use world::spatial_index::IndexError;

pub use world::field::{FieldError, FieldEvent, FieldKey, FieldSimulation, FieldState};
pub use world::registry::RegistrySettings;
pub use world::spatial_index::{SpatialIndex, SpatialIndexBuilder};

/// How often the server loop reports registry stats.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    MapData(#[from] MapDataError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub fn run(args: &[String]) -> Result<(), AppError> {
    let config = AppConfig::from_args(args)?;
    telemetry::logging::init(&config.root, &config.server.log_level)?;

    let maps = MapDirectory::new(&config.root);
    let map_ids = if config.map_ids.is_empty() {
        maps.map_ids()?
    } else {
        config.map_ids.clone()
    };
    println!("fieldsim: startup");
    println!("- root: {}", config.root.display());
    println!("- maps: {}", map_ids.len());
    println!(
        "- tick: {}ms, empty timeout: {}s",
        config.server.tick_interval_ms, config.server.empty_timeout_secs
    );

    let registry = Arc::new(InstanceRegistry::new(
        Arc::new(maps),
        Arc::new(IdAllocator::new()),
        FieldHooks::default(),
        config.server.registry_settings(),
    ));
    let mut reclaimer = registry.spawn_reclaimer()?;

    for map_id in &map_ids {
        let field = registry.get(*map_id, 0, 0)?;
        let Some(map) = field.map() else {
            continue;
        };
        let index = &map.index;
        let (x, y, z) = index.grid_size();
        let fingerprint = index_fingerprint(&serialize_index(index)?);
        println!(
            "- field {} '{}': grid {}x{}x{}, entities {}, index {}",
            field.key(),
            map.metadata.name,
            x,
            y,
            z,
            index.entity_count(),
            fingerprint
        );
    }
    info!(fields = registry.len(), "server_started");

    let started = Instant::now();
    let mut last_status = started;
    let poll = config.server.registry_settings().reclaim_interval;
    loop {
        if let Some(limit) = config.server.run_for() {
            if started.elapsed() >= limit {
                break;
            }
        }
        thread::sleep(poll);
        if last_status.elapsed() >= STATUS_INTERVAL {
            let stats = registry.stats();
            info!(
                live = stats.live,
                created = stats.created,
                disposed = stats.disposed,
                cache_hit_rate = stats.cache.hit_rate(),
                "registry_status"
            );
            last_status = Instant::now();
        }
    }

    reclaimer.stop();
    registry.shutdown();
    let stats = registry.stats();
    println!(
        "fieldsim: stopped (created {}, disposed {})",
        stats.created, stats.disposed
    );
    Ok(())
}
