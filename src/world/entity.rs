use crate::world::position::{BoundingBox, GridCoord, Vec3, CELL_SIZE};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// 128-bit entity identifier. Only used for deterministic ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityUid {
    pub high: u64,
    pub low: u64,
}

impl EntityUid {
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }
}

const SYNTHETIC_SPAWN_HIGH: u64 = 0xffff_ffff_0000_0001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    Marker,
    Vibrate,
    SpawnTile,
    BoxCollider { half_extent: Vec3, solid: bool },
    MeshCollider { mesh_id: u32 },
    Fluid { mesh_id: u32 },
    /// Several trimmed-out entities that shared one grid cell.
    Cell { children: Vec<MapEntity> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntity {
    pub id: EntityUid,
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Vec3,
    #[serde(default = "default_scale")]
    pub scale: f32,
    pub bounds: BoundingBox,
    #[serde(flatten)]
    pub kind: EntityKind,
}

fn default_scale() -> f32 {
    1.0
}

impl MapEntity {
    pub fn new(id: EntityUid, position: Vec3, bounds: BoundingBox, kind: EntityKind) -> Self {
        Self {
            id,
            position,
            rotation: Vec3::ZERO,
            scale: 1.0,
            bounds,
            kind,
        }
    }

    /// Walkable tile synthesized on top of a ground cell.
    pub fn spawn_tile(cell: GridCoord) -> Self {
        let floor = cell.to_world();
        let half = crate::world::spatial_index::SPAWN_TILE_HALF_EXTENT;
        let bounds = BoundingBox::new(
            Vec3::new(floor.x - half, floor.y - half, floor.z),
            Vec3::new(
                floor.x + half,
                floor.y + half,
                floor.z + crate::world::spatial_index::SPAWN_TILE_HEIGHT,
            ),
        );
        let low = (u64::from(cell.x as u16) << 32)
            | (u64::from(cell.y as u16) << 16)
            | u64::from(cell.z as u16);
        Self::new(
            EntityUid::new(SYNTHETIC_SPAWN_HIGH, low),
            floor,
            bounds,
            EntityKind::SpawnTile,
        )
    }

    /// Wraps entities that shared `cell` into one bundle. Children are sorted
    /// and the bundle takes the smallest child id.
    pub fn bundle(cell: GridCoord, mut children: Vec<MapEntity>) -> Self {
        sort_entities(&mut children);
        let id = children.first().map(|child| child.id).unwrap_or_default();
        let bounds = children
            .iter()
            .map(|child| child.bounds)
            .reduce(BoundingBox::union)
            .unwrap_or_default();
        Self::new(id, cell.to_world(), bounds, EntityKind::Cell { children })
    }

    pub fn is_ground(&self) -> bool {
        matches!(self.kind, EntityKind::BoxCollider { solid: true, .. })
    }

    pub fn children(&self) -> &[MapEntity] {
        match &self.kind {
            EntityKind::Cell { children } => children,
            EntityKind::Marker
            | EntityKind::Vibrate
            | EntityKind::SpawnTile
            | EntityKind::BoxCollider { .. }
            | EntityKind::MeshCollider { .. }
            | EntityKind::Fluid { .. } => &[],
        }
    }

    /// True when the entity fits one grid cell without rotation off the
    /// 90 degree lattice.
    pub fn is_grid_aligned(&self) -> bool {
        if matches!(self.kind, EntityKind::Cell { .. }) {
            return false;
        }
        let right_angle = |degrees: f32| (degrees / 90.0).fract().abs() < 1e-3;
        let size = self.bounds.size();
        right_angle(self.rotation.x)
            && right_angle(self.rotation.y)
            && right_angle(self.rotation.z)
            && size.x <= CELL_SIZE
            && size.y <= CELL_SIZE
            && size.z <= CELL_SIZE
    }
}

impl EntityKind {
    fn rank(&self) -> u8 {
        match self {
            EntityKind::Marker => 0,
            EntityKind::Vibrate => 1,
            EntityKind::SpawnTile => 2,
            EntityKind::BoxCollider { .. } => 3,
            EntityKind::MeshCollider { .. } => 4,
            EntityKind::Fluid { .. } => 5,
            EntityKind::Cell { .. } => 6,
        }
    }

    fn compare(&self, other: &EntityKind) -> Ordering {
        match (self, other) {
            (
                EntityKind::BoxCollider { half_extent: a, solid: sa },
                EntityKind::BoxCollider { half_extent: b, solid: sb },
            ) => compare_vec3(a, b).then(sa.cmp(sb)),
            (EntityKind::MeshCollider { mesh_id: a }, EntityKind::MeshCollider { mesh_id: b })
            | (EntityKind::Fluid { mesh_id: a }, EntityKind::Fluid { mesh_id: b }) => a.cmp(b),
            (EntityKind::Cell { children: a }, EntityKind::Cell { children: b }) => a
                .iter()
                .zip(b)
                .map(|(a, b)| compare_entities(a, b))
                .find(|order| order.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn compare_vec3(a: &Vec3, b: &Vec3) -> Ordering {
    a.x.total_cmp(&b.x)
        .then(a.y.total_cmp(&b.y))
        .then(a.z.total_cmp(&b.z))
}

/// Total order: id first, then type and geometry so that entities sharing an
/// id still sort the same way whatever order they arrive in.
pub fn compare_entities(a: &MapEntity, b: &MapEntity) -> Ordering {
    a.id.cmp(&b.id)
        .then_with(|| a.kind.rank().cmp(&b.kind.rank()))
        .then_with(|| compare_vec3(&a.position, &b.position))
        .then_with(|| compare_vec3(&a.rotation, &b.rotation))
        .then_with(|| a.scale.total_cmp(&b.scale))
        .then_with(|| compare_vec3(&a.bounds.min, &b.bounds.min))
        .then_with(|| compare_vec3(&a.bounds.max, &b.bounds.max))
        .then_with(|| a.kind.compare(&b.kind))
}

pub fn sort_entities(entities: &mut [MapEntity]) {
    entities.sort_by(compare_entities);
}
