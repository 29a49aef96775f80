//! Static grid index over the immutable entities of one map.
//!
//! Entities that fit a single grid cell are stored in one flat sequence; each
//! cell of the trimmed grid only records how many entities it owns and where
//! its slice starts. Everything else (rotated geometry, large meshes, sparse
//! boundary layers removed by the trim pass) lives in a flat unaligned list.

use crate::world::entity::{sort_entities, MapEntity};
use crate::world::position::{BoundingBox, GridBounds, GridCoord, Vec3, AXES};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

pub const SPAWN_TILE_HALF_EXTENT: f32 = 75.0;
pub const SPAWN_TILE_HEIGHT: f32 = 150.0;
/// Minimum number of entities a boundary run must hold before the trim pass
/// keeps it in the grid.
pub const AXIS_TRIM_ENTITY_COUNT: usize = 10;
pub const MAX_CELL_ENTITIES: usize = u8::MAX as usize;
pub const MAX_CELL_OFFSET: usize = 0x00ff_ffff;
/// Upper bound on the cell table of one index, checked before it is allocated.
pub const MAX_GRID_CELLS: usize = 1 << 24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("cell {coord} holds {count} entities, limit is 255")]
    CellOverflow { coord: GridCoord, count: usize },
    #[error("aligned entity offset {offset} does not fit in 24 bits")]
    OffsetOverflow { offset: usize },
    #[error("grid extent {x}x{y}x{z} exceeds the index size limits")]
    GridTooLarge { x: usize, y: usize, z: usize },
    #[error("cell bundle with {count} children cannot be encoded")]
    TooManyChildren { count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    pub axis_trim_entity_count: usize,
    pub synthesize_spawn_tiles: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            axis_trim_entity_count: AXIS_TRIM_ENTITY_COUNT,
            synthesize_spawn_tiles: true,
        }
    }
}

/// `(count, offset)` reference into the aligned sequence. All-zero when empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridCell {
    pub count: u8,
    pub offset: u32,
}

impl GridCell {
    pub const EMPTY: GridCell = GridCell {
        count: 0,
        offset: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + usize::from(self.count)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialIndex {
    bounds: GridBounds,
    cells: Vec<GridCell>,
    aligned: Vec<MapEntity>,
    unaligned: Vec<MapEntity>,
}

/// Accumulates raw map entities and sorts them into aligned cells or the
/// unaligned list.
#[derive(Debug, Default)]
pub struct SpatialIndexBuilder {
    cells: BTreeMap<GridCoord, Vec<MapEntity>>,
    bounds: Option<GridBounds>,
    unaligned: Vec<MapEntity>,
    settings: IndexSettings,
}

impl SpatialIndexBuilder {
    pub fn new(settings: IndexSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn insert(&mut self, entity: MapEntity) {
        let coord = if entity.is_grid_aligned() {
            GridCoord::from_world(entity.position)
        } else {
            None
        };
        match coord {
            Some(coord) => self.insert_at(coord, entity),
            None => self.unaligned.push(entity),
        }
    }

    pub fn insert_at(&mut self, coord: GridCoord, entity: MapEntity) {
        self.bounds = Some(match self.bounds {
            Some(bounds) => bounds.include(coord),
            None => GridBounds::single(coord),
        });
        self.cells.entry(coord).or_default().push(entity);
    }

    pub fn insert_unaligned(&mut self, entity: MapEntity) {
        self.unaligned.push(entity);
    }

    pub fn extend<I: IntoIterator<Item = MapEntity>>(&mut self, entities: I) {
        for entity in entities {
            self.insert(entity);
        }
    }

    pub fn build(self) -> Result<SpatialIndex, IndexError> {
        SpatialIndex::build(self.cells, self.bounds, self.unaligned, self.settings)
    }
}

impl SpatialIndex {
    /// Builds the index. `bounds == None` means "no aligned entities".
    pub fn build(
        mut cells: BTreeMap<GridCoord, Vec<MapEntity>>,
        bounds: Option<GridBounds>,
        mut unaligned: Vec<MapEntity>,
        settings: IndexSettings,
    ) -> Result<SpatialIndex, IndexError> {
        cells.retain(|_, entities| !entities.is_empty());
        let mut bounds = cells
            .keys()
            .fold(bounds, |acc, &coord| {
                Some(match acc {
                    Some(bounds) => bounds.include(coord),
                    None => GridBounds::single(coord),
                })
            })
            .unwrap_or_else(|| GridBounds::single(GridCoord::ORIGIN));
        if settings.synthesize_spawn_tiles {
            let spawned = synthesize_spawn_tiles(&mut cells, &unaligned, bounds);
            for coord in spawned {
                bounds = bounds.include(coord);
            }
        }

        let trimmed = trim(&mut cells, &mut unaligned, bounds, settings.axis_trim_entity_count);
        let grid = trimmed.unwrap_or_else(|| GridBounds::single(bounds.min));
        let index = pack(cells, grid, unaligned)?;
        debug!(
            aligned = index.aligned.len(),
            unaligned = index.unaligned.len(),
            cells = index.cells.len(),
            "spatial_index_built"
        );
        Ok(index)
    }

    pub(crate) fn from_parts(
        bounds: GridBounds,
        cells: Vec<GridCell>,
        aligned: Vec<MapEntity>,
        unaligned: Vec<MapEntity>,
    ) -> Self {
        Self {
            bounds,
            cells,
            aligned,
            unaligned,
        }
    }

    pub fn bounds(&self) -> GridBounds {
        self.bounds
    }

    pub fn min_index(&self) -> GridCoord {
        self.bounds.min
    }

    pub fn max_index(&self) -> GridCoord {
        self.bounds.max
    }

    pub fn grid_size(&self) -> (usize, usize, usize) {
        self.bounds.size()
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn aligned(&self) -> &[MapEntity] {
        &self.aligned
    }

    pub fn unaligned(&self) -> &[MapEntity] {
        &self.unaligned
    }

    pub fn entity_count(&self) -> usize {
        self.aligned.len() + self.unaligned.len()
    }

    pub fn cell_index(&self, coord: GridCoord) -> Option<usize> {
        if !self.bounds.contains(coord) {
            return None;
        }
        let (_, size_y, size_z) = self.grid_size();
        let dx = (i32::from(coord.x) - i32::from(self.bounds.min.x)) as usize;
        let dy = (i32::from(coord.y) - i32::from(self.bounds.min.y)) as usize;
        let dz = (i32::from(coord.z) - i32::from(self.bounds.min.z)) as usize;
        Some((dx * size_y + dy) * size_z + dz)
    }

    /// Entities owned by one cell; empty outside the grid.
    pub fn cell(&self, coord: GridCoord) -> &[MapEntity] {
        self.cell_index(coord)
            .and_then(|index| self.cells.get(index))
            .and_then(|cell| self.aligned.get(cell.range()))
            .unwrap_or(&[])
    }

    /// Aligned entities of every cell inside `[min, max]`. Bounds outside the
    /// grid produce nothing.
    pub fn query_cells(
        &self,
        min: GridCoord,
        max: GridCoord,
    ) -> impl Iterator<Item = &MapEntity> + '_ {
        GridBounds::new(min, max)
            .intersection(&self.bounds)
            .into_iter()
            .flat_map(coords_in)
            .flat_map(move |coord| self.cell(coord).iter())
    }

    /// Aligned entities whose cell lies within `radius` of `point`, followed by
    /// unaligned entities whose bounds touch that box.
    pub fn query(&self, point: Vec3, radius: f32) -> impl Iterator<Item = &MapEntity> + '_ {
        let half = Vec3::splat(radius.max(0.0));
        let area = BoundingBox::around(point, half);
        let min = GridCoord::from_world_clamped(area.min);
        let max = GridCoord::from_world_clamped(area.max);
        self.query_cells(min, max)
            .chain(UnalignedQuery::new(&self.unaligned, area))
    }
}

fn coords_in(bounds: GridBounds) -> impl Iterator<Item = GridCoord> {
    (bounds.min.x..=bounds.max.x).flat_map(move |x| {
        (bounds.min.y..=bounds.max.y).flat_map(move |y| {
            (bounds.min.z..=bounds.max.z).map(move |z| GridCoord::new(x, y, z))
        })
    })
}

/// Depth-first walk over unaligned entities that flattens cell bundles.
struct UnalignedQuery<'a> {
    stack: Vec<std::slice::Iter<'a, MapEntity>>,
    area: BoundingBox,
}

impl<'a> UnalignedQuery<'a> {
    fn new(entities: &'a [MapEntity], area: BoundingBox) -> Self {
        Self {
            stack: vec![entities.iter()],
            area,
        }
    }
}

impl<'a> Iterator for UnalignedQuery<'a> {
    type Item = &'a MapEntity;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            let Some(entity) = top.next() else {
                self.stack.pop();
                continue;
            };
            if !entity.bounds.intersects(&self.area) {
                continue;
            }
            let children = entity.children();
            if children.is_empty() {
                return Some(entity);
            }
            self.stack.push(children.iter());
        }
    }
}

/// Adds a spawn tile above every ground cell whose upper neighbour is free.
fn synthesize_spawn_tiles(
    cells: &mut BTreeMap<GridCoord, Vec<MapEntity>>,
    unaligned: &[MapEntity],
    bounds: GridBounds,
) -> Vec<GridCoord> {
    let ground: BTreeSet<GridCoord> = cells
        .iter()
        .filter(|(_, entities)| entities.iter().any(MapEntity::is_ground))
        .map(|(&coord, _)| coord)
        .collect();
    if ground.is_empty() {
        return Vec::new();
    }

    let mut occupied: BTreeSet<GridCoord> = cells.keys().copied().collect();
    let mut reach = bounds;
    if let Some(top) = bounds.max.above() {
        reach = reach.include(top);
    }
    for entity in unaligned {
        let footprint = GridBounds::new(
            GridCoord::from_world_clamped(entity.bounds.min),
            GridCoord::from_world_clamped(entity.bounds.max),
        );
        if let Some(overlap) = footprint.intersection(&reach) {
            occupied.extend(coords_in(overlap));
        }
    }

    let mut spawned = Vec::new();
    for coord in &ground {
        let Some(above) = coord.above() else {
            continue;
        };
        if ground.contains(&above) || occupied.contains(&above) {
            continue;
        }
        cells.entry(above).or_default().push(MapEntity::spawn_tile(above));
        occupied.insert(above);
        spawned.push(above);
    }
    spawned
}

/// Shrinks `bounds` per axis and demotes entities outside the result to the
/// unaligned list. Returns `None` when nothing stays aligned.
fn trim(
    cells: &mut BTreeMap<GridCoord, Vec<MapEntity>>,
    unaligned: &mut Vec<MapEntity>,
    bounds: GridBounds,
    threshold: usize,
) -> Option<GridBounds> {
    let mut min = bounds.min;
    let mut max = bounds.max;
    let mut collapsed = false;
    for axis in AXES {
        let mut counts = BTreeMap::<i16, usize>::new();
        for (coord, entities) in cells.iter() {
            *counts.entry(coord.axis(axis)).or_default() += entities.len();
        }
        match trim_axis(&counts, bounds.min.axis(axis), bounds.max.axis(axis), threshold) {
            Some((lo, hi)) => {
                min = min.with_axis(axis, lo);
                max = max.with_axis(axis, hi);
            }
            None => collapsed = true,
        }
    }

    let kept = (!collapsed).then(|| GridBounds::new(min, max));
    let outside: Vec<GridCoord> = cells
        .keys()
        .filter(|coord| !kept.map_or(false, |kept| kept.contains(**coord)))
        .copied()
        .collect();
    for coord in outside {
        let Some(mut entities) = cells.remove(&coord) else {
            continue;
        };
        if entities.len() == 1 {
            unaligned.append(&mut entities);
        } else {
            unaligned.push(MapEntity::bundle(coord, entities));
        }
    }
    kept
}

/// Per-axis trimmed range. Layers below the returned minimum (and above the
/// maximum) hold fewer than `threshold` entities in total. When the two ends
/// cross, the axis keeps its full range.
fn trim_axis(
    counts: &BTreeMap<i16, usize>,
    min: i16,
    max: i16,
    threshold: usize,
) -> Option<(i16, i16)> {
    let total: usize = counts.values().sum();
    if threshold == 0 || total == 0 {
        return Some((min, max));
    }
    if total < threshold {
        return None;
    }

    let mut low = max;
    let mut cumulative = 0;
    for (&index, &count) in counts {
        cumulative += count;
        if cumulative >= threshold {
            low = index;
            break;
        }
    }

    let mut high = min;
    let mut remaining = 0;
    for (&index, &count) in counts.iter().rev() {
        remaining += count;
        if remaining >= threshold {
            high = index;
            break;
        }
    }

    if low > high {
        Some((min, max))
    } else {
        Some((low, high))
    }
}

/// Rejects grids whose axes leave the 16-bit range or whose cell table
/// would exceed [`MAX_GRID_CELLS`].
pub fn check_grid_size(bounds: GridBounds) -> Result<(), IndexError> {
    let (x, y, z) = bounds.size();
    let axis_limit = i16::MAX as usize;
    let cells = x.checked_mul(y).and_then(|xy| xy.checked_mul(z));
    let fits = x <= axis_limit
        && y <= axis_limit
        && z <= axis_limit
        && cells.map_or(false, |cells| cells <= MAX_GRID_CELLS);
    if fits {
        Ok(())
    } else {
        Err(IndexError::GridTooLarge { x, y, z })
    }
}

fn pack(
    cells: BTreeMap<GridCoord, Vec<MapEntity>>,
    bounds: GridBounds,
    mut unaligned: Vec<MapEntity>,
) -> Result<SpatialIndex, IndexError> {
    check_grid_size(bounds)?;

    let mut index = SpatialIndex::from_parts(
        bounds,
        vec![GridCell::EMPTY; bounds.cell_count()],
        Vec::new(),
        Vec::new(),
    );
    // BTreeMap order on (x, y, z) is the z-fastest storage order.
    for (coord, mut entities) in cells {
        let Some(slot) = index.cell_index(coord) else {
            continue;
        };
        if entities.len() > MAX_CELL_ENTITIES {
            return Err(IndexError::CellOverflow {
                coord,
                count: entities.len(),
            });
        }
        let offset = index.aligned.len();
        if offset > MAX_CELL_OFFSET {
            return Err(IndexError::OffsetOverflow { offset });
        }
        sort_entities(&mut entities);
        index.cells[slot] = GridCell {
            count: entities.len() as u8,
            offset: offset as u32,
        };
        index.aligned.append(&mut entities);
    }
    sort_entities(&mut unaligned);
    index.unaligned = unaligned;
    Ok(index)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::world::entity::{EntityKind, EntityUid};

    pub(crate) fn marker_at(coord: GridCoord, low: u64) -> MapEntity {
        let position = coord.to_world();
        MapEntity::new(
            EntityUid::new(1, low),
            position,
            BoundingBox::around(position, Vec3::splat(20.0)),
            EntityKind::Marker,
        )
    }

    pub(crate) fn ground_at(coord: GridCoord, low: u64) -> MapEntity {
        let position = coord.to_world();
        MapEntity::new(
            EntityUid::new(2, low),
            position,
            BoundingBox::around(position, Vec3::splat(75.0)),
            EntityKind::BoxCollider {
                half_extent: Vec3::splat(75.0),
                solid: true,
            },
        )
    }

    fn no_spawn(threshold: usize) -> IndexSettings {
        IndexSettings {
            axis_trim_entity_count: threshold,
            synthesize_spawn_tiles: false,
        }
    }

    fn flatten(entities: &[MapEntity], out: &mut Vec<EntityUid>) {
        for entity in entities {
            if entity.children().is_empty() {
                out.push(entity.id);
            } else {
                flatten(entity.children(), out);
            }
        }
    }

    pub(crate) fn all_ids(index: &SpatialIndex) -> Vec<EntityUid> {
        let mut ids = Vec::new();
        flatten(index.aligned(), &mut ids);
        flatten(index.unaligned(), &mut ids);
        ids.sort();
        ids
    }

    #[test]
    fn sparse_two_cell_grid_is_trimmed_away() {
        let a = marker_at(GridCoord::new(0, 0, 0), 1);
        let b = marker_at(GridCoord::new(0, 0, 1), 3);
        let c = marker_at(GridCoord::new(0, 0, 1), 2);
        let mut cells = BTreeMap::new();
        cells.insert(GridCoord::new(0, 0, 0), vec![a.clone()]);
        cells.insert(GridCoord::new(0, 0, 1), vec![b.clone(), c.clone()]);
        let bounds = GridBounds::new(GridCoord::new(0, 0, 0), GridCoord::new(0, 0, 1));

        let index = SpatialIndex::build(cells, Some(bounds), Vec::new(), no_spawn(10)).expect("build");

        assert_eq!(index.grid_size(), (1, 1, 1));
        assert!(index.aligned().is_empty());
        assert!(index.cells().iter().all(GridCell::is_empty));
        assert_eq!(index.unaligned().len(), 2);
        assert_eq!(index.unaligned()[0], a);
        let bundle = &index.unaligned()[1];
        assert_eq!(bundle.children(), &[c.clone(), b.clone()]);
        assert_eq!(bundle.bounds, b.bounds.union(c.bounds));
    }

    #[test]
    fn no_entities_normalizes_to_origin_cell() {
        let index = SpatialIndex::build(BTreeMap::new(), None, Vec::new(), IndexSettings::default())
            .expect("build");
        assert_eq!(index.bounds(), GridBounds::single(GridCoord::ORIGIN));
        assert_eq!(index.cells(), &[GridCell::EMPTY]);
        assert_eq!(index.entity_count(), 0);
    }

    #[test]
    fn spawn_tile_synthesized_above_open_ground() {
        let mut builder = SpatialIndexBuilder::new(no_spawn(0));
        builder.settings.synthesize_spawn_tiles = true;
        builder.insert(ground_at(GridCoord::new(0, 0, 0), 1));
        builder.insert(ground_at(GridCoord::new(1, 0, 0), 2));
        builder.insert(marker_at(GridCoord::new(1, 0, 1), 3));
        let index = builder.build().expect("build");

        let above_open = index.cell(GridCoord::new(0, 0, 1));
        assert_eq!(above_open.len(), 1);
        assert_eq!(above_open[0].kind, EntityKind::SpawnTile);
        let above_blocked = index.cell(GridCoord::new(1, 0, 1));
        assert_eq!(above_blocked.len(), 1);
        assert_eq!(above_blocked[0].kind, EntityKind::Marker);
    }

    #[test]
    fn unaligned_footprint_blocks_spawn_tiles() {
        let mut builder = SpatialIndexBuilder::new(no_spawn(0));
        builder.settings.synthesize_spawn_tiles = true;
        builder.insert(ground_at(GridCoord::new(0, 0, 0), 1));
        let mut rock = marker_at(GridCoord::new(0, 0, 1), 9);
        rock.rotation = Vec3::new(0.0, 0.0, 30.0);
        builder.insert(rock);
        let index = builder.build().expect("build");
        assert!(index
            .aligned()
            .iter()
            .all(|entity| entity.kind != EntityKind::SpawnTile));
        assert_eq!(index.unaligned().len(), 1);
    }

    #[test]
    fn trim_keeps_dense_interior_and_demotes_sparse_edges() {
        let mut builder = SpatialIndexBuilder::new(no_spawn(10));
        let mut low = 0;
        for z in 0..12 {
            low += 1;
            builder.insert(marker_at(GridCoord::new(5, 5, z), low));
        }
        low += 1;
        builder.insert(marker_at(GridCoord::new(-20, 5, 3), low));
        let before = low as usize;
        let index = builder.build().expect("build");

        assert_eq!(index.min_index().x, 5);
        assert_eq!(index.max_index().x, 5);
        assert_eq!(index.grid_size().2, 12);
        assert_eq!(index.aligned().len(), 12);
        assert_eq!(index.unaligned().len(), 1);
        assert_eq!(all_ids(&index).len(), before);
    }

    #[test]
    fn trim_axis_crossing_keeps_full_range() {
        let mut counts = BTreeMap::new();
        counts.insert(0, 5);
        counts.insert(1, 5);
        assert_eq!(trim_axis(&counts, -3, 4, 10), Some((-3, 4)));
        assert_eq!(trim_axis(&counts, 0, 1, 11), None);
        counts.insert(9, 20);
        assert_eq!(trim_axis(&counts, 0, 9, 10), Some((1, 9)));
    }

    #[test]
    fn cell_accounting_covers_every_aligned_entity() {
        let mut builder = SpatialIndexBuilder::new(IndexSettings::default());
        let mut low = 0;
        for x in 0..4 {
            for y in 0..3 {
                for _ in 0..(x + y) % 3 + 1 {
                    low += 1;
                    builder.insert(ground_at(GridCoord::new(x, y, 0), low));
                }
            }
        }
        let index = builder.build().expect("build");
        let mut total = 0;
        for cell in index.cells() {
            if cell.is_empty() {
                assert_eq!(*cell, GridCell::EMPTY);
                continue;
            }
            assert!(cell.range().end <= index.aligned().len());
            total += usize::from(cell.count);
        }
        assert_eq!(total, index.aligned().len());
    }

    #[test]
    fn build_is_independent_of_input_order() {
        let mut entities = Vec::new();
        for low in 0..40u64 {
            let coord = GridCoord::new((low % 5) as i16, (low % 3) as i16, (low % 2) as i16);
            entities.push(if low % 4 == 0 {
                ground_at(coord, low)
            } else {
                marker_at(coord, low)
            });
        }
        let mut forward = SpatialIndexBuilder::new(IndexSettings::default());
        forward.extend(entities.clone());
        let mut reversed = SpatialIndexBuilder::new(IndexSettings::default());
        reversed.extend(entities.into_iter().rev());
        assert_eq!(forward.build().expect("build"), reversed.build().expect("build"));
    }

    #[test]
    fn query_collects_cells_and_unaligned() {
        let mut builder = SpatialIndexBuilder::new(no_spawn(0));
        builder.insert(marker_at(GridCoord::new(0, 0, 0), 1));
        builder.insert(marker_at(GridCoord::new(3, 0, 0), 2));
        let mut slanted = marker_at(GridCoord::new(0, 1, 0), 3);
        slanted.rotation = Vec3::new(0.0, 0.0, 10.0);
        builder.insert(slanted);
        let index = builder.build().expect("build");

        let near: Vec<u64> = index
            .query(Vec3::ZERO, 160.0)
            .map(|entity| entity.id.low)
            .collect();
        assert_eq!(near, vec![1, 3]);
        let far: Vec<u64> = index
            .query(GridCoord::new(3, 0, 0).to_world(), 10.0)
            .map(|entity| entity.id.low)
            .collect();
        assert_eq!(far, vec![2]);
    }

    #[test]
    fn out_of_range_cell_query_is_empty() {
        let mut builder = SpatialIndexBuilder::new(no_spawn(0));
        builder.insert(marker_at(GridCoord::new(0, 0, 0), 1));
        let index = builder.build().expect("build");
        assert_eq!(
            index
                .query_cells(GridCoord::new(10, 10, 10), GridCoord::new(12, 12, 12))
                .count(),
            0
        );
        assert_eq!(
            index
                .query_cells(GridCoord::new(1, 0, 0), GridCoord::new(-1, 0, 0))
                .count(),
            0
        );
        assert!(index.cell(GridCoord::new(-1, 0, 0)).is_empty());
    }

    #[test]
    fn overfull_cell_is_rejected() {
        let mut builder = SpatialIndexBuilder::new(no_spawn(0));
        for low in 0..300 {
            builder.insert(marker_at(GridCoord::ORIGIN, low));
        }
        assert!(matches!(
            builder.build(),
            Err(IndexError::CellOverflow { count: 300, .. })
        ));
    }

    #[test]
    fn distant_dense_clusters_exceed_the_cell_cap() {
        let mut builder = SpatialIndexBuilder::new(no_spawn(10));
        for low in 0..10 {
            builder.insert_at(GridCoord::ORIGIN, marker_at(GridCoord::ORIGIN, low));
            let far = GridCoord::new(1000, 1000, 1000);
            builder.insert_at(far, marker_at(far, 100 + low));
        }
        assert_eq!(
            builder.build(),
            Err(IndexError::GridTooLarge {
                x: 1001,
                y: 1001,
                z: 1001
            })
        );
    }

    #[test]
    fn grid_size_check_allows_the_cap_exactly() {
        let edge = GridBounds::new(GridCoord::ORIGIN, GridCoord::new(255, 255, 255));
        assert_eq!(edge.cell_count(), MAX_GRID_CELLS);
        assert_eq!(check_grid_size(edge), Ok(()));
        let over = GridBounds::new(GridCoord::ORIGIN, GridCoord::new(256, 255, 255));
        assert!(check_grid_size(over).is_err());
    }
}
