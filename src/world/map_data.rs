//! Map metadata and static entity data, loaded from `<root>/maps`.

use crate::world::entity::MapEntity;
use crate::world::index_codec::{read_index_file, IndexFileError};
use crate::world::position::Vec3;
use crate::world::spatial_index::{IndexError, IndexSettings, SpatialIndex, SpatialIndexBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MapDataError {
    #[error("map {0} not found")]
    NotFound(i32),
    #[error("failed to read map file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse map file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    IndexFile(#[from] IndexFileError),
    #[error("failed to build spatial index for map {map_id}: {source}")]
    Index {
        map_id: i32,
        #[source]
        source: IndexError,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NpcSpawn {
    pub npc_id: i32,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PortalSpawn {
    pub portal_id: i32,
    pub position: Vec3,
    pub target_map: i32,
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Closes the portal this many ticks after it opens.
    #[serde(default)]
    pub close_after_ticks: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MobSpawnerSpawn {
    pub npc_ids: Vec<i32>,
    pub position: Vec3,
    pub population: u32,
    pub cooldown_ticks: u64,
}

/// Breakable, liftable and interactable objects share this shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectSpawn {
    pub entity_id: i32,
    pub position: Vec3,
    #[serde(default, alias = "respawn_ticks")]
    pub reset_ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TriggerSpawn {
    pub trigger_id: i32,
    pub position: Vec3,
    #[serde(default)]
    pub radius: f32,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MapMetadata {
    pub name: String,
    pub room_timer_secs: Option<u64>,
    pub npcs: Vec<NpcSpawn>,
    pub portals: Vec<PortalSpawn>,
    pub mob_spawners: Vec<MobSpawnerSpawn>,
    pub breakables: Vec<ObjectSpawn>,
    pub liftables: Vec<ObjectSpawn>,
    pub interacts: Vec<ObjectSpawn>,
    pub triggers: Vec<TriggerSpawn>,
    /// Raw entities, used when the map has no packed index.
    pub entities: Vec<MapEntity>,
}

impl MapMetadata {
    pub fn parse(path: &Path, text: &str) -> Result<Self, MapDataError> {
        serde_yaml::from_str(text).map_err(|source| MapDataError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn build_index(&self, map_id: i32, settings: IndexSettings) -> Result<SpatialIndex, MapDataError> {
        let mut builder = SpatialIndexBuilder::new(settings);
        builder.extend(self.entities.iter().cloned());
        builder
            .build()
            .map_err(|source| MapDataError::Index { map_id, source })
    }
}

/// Where a registry gets map data from.
pub trait MapDataSource: Send + Sync {
    fn metadata(&self, map_id: i32) -> Result<MapMetadata, MapDataError>;

    fn spatial_index(&self, map_id: i32, metadata: &MapMetadata) -> Result<SpatialIndex, MapDataError> {
        metadata.build_index(map_id, IndexSettings::default())
    }
}

/// `<root>/maps/<map_id>.yaml` plus an optional packed `<map_id>.fidx`.
#[derive(Debug, Clone)]
pub struct MapDirectory {
    dir: PathBuf,
    settings: IndexSettings,
}

impl MapDirectory {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join("maps"),
            settings: IndexSettings::default(),
        }
    }

    pub fn metadata_path(&self, map_id: i32) -> PathBuf {
        self.dir.join(format!("{map_id}.yaml"))
    }

    pub fn index_path(&self, map_id: i32) -> PathBuf {
        self.dir.join(format!("{map_id}.fidx"))
    }

    /// Ids of every map with a metadata file, sorted.
    pub fn map_ids(&self) -> Result<Vec<i32>, MapDataError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| MapDataError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<i32>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

impl MapDataSource for MapDirectory {
    fn metadata(&self, map_id: i32) -> Result<MapMetadata, MapDataError> {
        let path = self.metadata_path(map_id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(MapDataError::NotFound(map_id))
            }
            Err(source) => return Err(MapDataError::Io { path, source }),
        };
        MapMetadata::parse(&path, &text)
    }

    fn spatial_index(&self, map_id: i32, metadata: &MapMetadata) -> Result<SpatialIndex, MapDataError> {
        let packed = self.index_path(map_id);
        if packed.is_file() {
            debug!(map_id, path = %packed.display(), "map_index_packed");
            return Ok(read_index_file(&packed)?);
        }
        metadata.build_index(map_id, self.settings)
    }
}

/// In-memory maps for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticMapSource {
    maps: HashMap<i32, MapMetadata>,
}

impl StaticMapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_map(mut self, map_id: i32, metadata: MapMetadata) -> Self {
        self.maps.insert(map_id, metadata);
        self
    }
}

impl MapDataSource for StaticMapSource {
    fn metadata(&self, map_id: i32) -> Result<MapMetadata, MapDataError> {
        self.maps
            .get(&map_id)
            .cloned()
            .ok_or(MapDataError::NotFound(map_id))
    }
}
