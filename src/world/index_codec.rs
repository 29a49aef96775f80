//! Binary form of a [`SpatialIndex`].
//!
//! Layout (little-endian): grid size (3×i16), min index (3×i16), one u32 word
//! per cell in z-fastest order, aligned entity count + entities, unaligned
//! entity count + entities. A cell word keeps the entity count in the top
//! byte. Non-empty words carry the slice offset in the low 24 bits; empty
//! words carry the length of the empty run that starts there, bounded by the
//! end of the z column, so readers can jump over it.

use crate::world::entity::{EntityKind, EntityUid, MapEntity};
use crate::world::position::{BoundingBox, GridBounds, GridCoord, Vec3};
use crate::world::spatial_index::{
    check_grid_size, GridCell, IndexError, SpatialIndex, MAX_CELL_OFFSET,
};
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER_LEN: usize = 12;
const CELL_WORD_LEN: usize = 4;
/// tag + id + position + rotation + scale + bounds
const MIN_ENTITY_LEN: usize = 1 + 16 + 12 + 12 + 4 + 24;
pub const MAX_BUNDLE_DEPTH: usize = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of data at byte {offset}, {needed} more bytes required")]
    UnexpectedEof { offset: usize, needed: usize },
    #[error("invalid grid size {x}x{y}x{z}")]
    InvalidGridSize { x: i16, y: i16, z: i16 },
    #[error("grid starting at {min} with size {x}x{y}x{z} leaves the 16-bit range")]
    GridOutOfRange { min: GridCoord, x: i16, y: i16, z: i16 },
    #[error(transparent)]
    Grid(#[from] IndexError),
    #[error("{cells} cell words exceed the remaining {remaining} bytes")]
    CellsExceedBuffer { cells: usize, remaining: usize },
    #[error("empty run of {run} at cell {cell} overruns its column ({left} cells left)")]
    InvalidRun { cell: usize, run: u32, left: usize },
    #[error("cell {cell} references entities {start}..{end} but only {len} are aligned")]
    CellOutOfRange {
        cell: usize,
        start: usize,
        end: usize,
        len: usize,
    },
    #[error("entity count {count} exceeds the remaining {remaining} bytes")]
    CountExceedsBuffer { count: u32, remaining: usize },
    #[error("unknown entity type tag {0}")]
    UnknownTag(u8),
    #[error("cell bundles nested deeper than {0}")]
    NestingTooDeep(usize),
    #[error("{0} trailing bytes after index")]
    TrailingBytes(usize),
}

#[derive(Debug, Error)]
pub enum IndexFileError {
    #[error("failed to read/write index file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("index file {path} is malformed: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Encode(#[from] IndexError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum EntityTag {
    Unknown = 0,
    Vibrate = 1,
    SpawnTile = 2,
    BoxCollider = 3,
    Fluid = 4,
    MeshCollider = 5,
    Cell = 6,
}

impl EntityTag {
    fn of(kind: &EntityKind) -> Self {
        match kind {
            EntityKind::Marker => Self::Unknown,
            EntityKind::Vibrate => Self::Vibrate,
            EntityKind::SpawnTile => Self::SpawnTile,
            EntityKind::BoxCollider { .. } => Self::BoxCollider,
            EntityKind::Fluid { .. } => Self::Fluid,
            EntityKind::MeshCollider { .. } => Self::MeshCollider,
            EntityKind::Cell { .. } => Self::Cell,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            1 => Self::Vibrate,
            2 => Self::SpawnTile,
            3 => Self::BoxCollider,
            4 => Self::Fluid,
            5 => Self::MeshCollider,
            6 => Self::Cell,
            _ => return None,
        })
    }
}

pub fn serialize_index(index: &SpatialIndex) -> Result<Vec<u8>, IndexError> {
    let bounds = index.bounds();
    let (size_x, size_y, size_z) = index.grid_size();
    check_grid_size(bounds)?;

    let mut bytes = Vec::with_capacity(
        HEADER_LEN + index.cells().len() * CELL_WORD_LEN + index.entity_count() * MIN_ENTITY_LEN,
    );
    for value in [size_x as i16, size_y as i16, size_z as i16] {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    for value in [bounds.min.x, bounds.min.y, bounds.min.z] {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    let mut words = vec![0u32; index.cells().len()];
    for (column, cells) in index.cells().chunks(size_z.max(1)).enumerate() {
        let base = column * size_z;
        let mut run = 0u32;
        for (z, cell) in cells.iter().enumerate().rev() {
            words[base + z] = if cell.is_empty() {
                run += 1;
                run
            } else {
                run = 0;
                if cell.offset as usize > MAX_CELL_OFFSET {
                    return Err(IndexError::OffsetOverflow {
                        offset: cell.offset as usize,
                    });
                }
                (u32::from(cell.count) << 24) | cell.offset
            };
        }
    }
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }

    write_entities(&mut bytes, index.aligned())?;
    write_entities(&mut bytes, index.unaligned())?;
    Ok(bytes)
}

pub fn deserialize_index(bytes: &[u8]) -> Result<SpatialIndex, DecodeError> {
    let mut cursor = 0usize;
    let size_x = read_i16(bytes, &mut cursor)?;
    let size_y = read_i16(bytes, &mut cursor)?;
    let size_z = read_i16(bytes, &mut cursor)?;
    if size_x <= 0 || size_y <= 0 || size_z <= 0 {
        return Err(DecodeError::InvalidGridSize {
            x: size_x,
            y: size_y,
            z: size_z,
        });
    }
    let min = GridCoord::new(
        read_i16(bytes, &mut cursor)?,
        read_i16(bytes, &mut cursor)?,
        read_i16(bytes, &mut cursor)?,
    );
    let max_axis = |lo: i16, size: i16| i16::try_from(i32::from(lo) + i32::from(size) - 1).ok();
    let max = match (
        max_axis(min.x, size_x),
        max_axis(min.y, size_y),
        max_axis(min.z, size_z),
    ) {
        (Some(x), Some(y), Some(z)) => GridCoord::new(x, y, z),
        _ => {
            return Err(DecodeError::GridOutOfRange {
                min,
                x: size_x,
                y: size_y,
                z: size_z,
            })
        }
    };
    let bounds = GridBounds::new(min, max);
    check_grid_size(bounds)?;

    let cell_count = bounds.cell_count();
    let remaining = bytes.len() - cursor;
    if cell_count.saturating_mul(CELL_WORD_LEN) > remaining {
        return Err(DecodeError::CellsExceedBuffer {
            cells: cell_count,
            remaining,
        });
    }
    let words = read_exact(bytes, &mut cursor, cell_count * CELL_WORD_LEN)?;
    let column_len = size_z as usize;
    let mut cells = vec![GridCell::EMPTY; cell_count];
    for base in (0..cell_count).step_by(column_len) {
        let mut z = 0usize;
        while z < column_len {
            let at = (base + z) * CELL_WORD_LEN;
            let word = u32::from_le_bytes([words[at], words[at + 1], words[at + 2], words[at + 3]]);
            let count = (word >> 24) as u8;
            let low = word & 0x00ff_ffff;
            if count > 0 {
                cells[base + z] = GridCell { count, offset: low };
                z += 1;
                continue;
            }
            let left = column_len - z;
            if low == 0 || low as usize > left {
                return Err(DecodeError::InvalidRun {
                    cell: base + z,
                    run: low,
                    left,
                });
            }
            z += low as usize;
        }
    }

    let aligned = read_entities(bytes, &mut cursor)?;
    let unaligned = read_entities(bytes, &mut cursor)?;
    if cursor != bytes.len() {
        return Err(DecodeError::TrailingBytes(bytes.len() - cursor));
    }
    for (index, cell) in cells.iter().enumerate() {
        let range = cell.range();
        if range.end > aligned.len() {
            return Err(DecodeError::CellOutOfRange {
                cell: index,
                start: range.start,
                end: range.end,
                len: aligned.len(),
            });
        }
    }
    Ok(SpatialIndex::from_parts(bounds, cells, aligned, unaligned))
}

/// Content tag of a serialized index: base64 of its SHA-1.
pub fn index_fingerprint(bytes: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(bytes);
    BASE64_ENGINE.encode(sha1.finalize())
}

/// Writes the serialized index next to a temp file and swaps it in.
/// Returns the fingerprint of what was written.
pub fn write_index_file(path: &Path, index: &SpatialIndex) -> Result<String, IndexFileError> {
    let bytes = serialize_index(index)?;
    let io_error = |source| IndexFileError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let tmp_path = path.with_extension("fidx.tmp");
    fs::write(&tmp_path, &bytes).map_err(io_error)?;
    if let Err(source) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_error(source));
    }
    Ok(index_fingerprint(&bytes))
}

pub fn read_index_file(path: &Path) -> Result<SpatialIndex, IndexFileError> {
    let bytes = fs::read(path).map_err(|source| IndexFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    deserialize_index(&bytes).map_err(|source| IndexFileError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

fn write_entities(bytes: &mut Vec<u8>, entities: &[MapEntity]) -> Result<(), IndexError> {
    let count = u32::try_from(entities.len()).map_err(|_| IndexError::TooManyChildren {
        count: entities.len(),
    })?;
    bytes.extend_from_slice(&count.to_le_bytes());
    for entity in entities {
        write_entity(bytes, entity)?;
    }
    Ok(())
}

fn write_entity(bytes: &mut Vec<u8>, entity: &MapEntity) -> Result<(), IndexError> {
    bytes.push(EntityTag::of(&entity.kind) as u8);
    bytes.extend_from_slice(&entity.id.high.to_le_bytes());
    bytes.extend_from_slice(&entity.id.low.to_le_bytes());
    write_vec3(bytes, entity.position);
    write_vec3(bytes, entity.rotation);
    bytes.extend_from_slice(&entity.scale.to_le_bytes());
    write_vec3(bytes, entity.bounds.min);
    write_vec3(bytes, entity.bounds.max);
    match &entity.kind {
        EntityKind::Marker | EntityKind::Vibrate | EntityKind::SpawnTile => {}
        EntityKind::BoxCollider { half_extent, solid } => {
            write_vec3(bytes, *half_extent);
            bytes.push(u8::from(*solid));
        }
        EntityKind::MeshCollider { mesh_id } | EntityKind::Fluid { mesh_id } => {
            bytes.extend_from_slice(&mesh_id.to_le_bytes());
        }
        EntityKind::Cell { children } => write_entities(bytes, children)?,
    }
    Ok(())
}

fn write_vec3(bytes: &mut Vec<u8>, value: Vec3) {
    bytes.extend_from_slice(&value.x.to_le_bytes());
    bytes.extend_from_slice(&value.y.to_le_bytes());
    bytes.extend_from_slice(&value.z.to_le_bytes());
}

fn read_entities(bytes: &[u8], cursor: &mut usize) -> Result<Vec<MapEntity>, DecodeError> {
    read_entities_at_depth(bytes, cursor, 0)
}

fn read_entities_at_depth(
    bytes: &[u8],
    cursor: &mut usize,
    depth: usize,
) -> Result<Vec<MapEntity>, DecodeError> {
    if depth > MAX_BUNDLE_DEPTH {
        return Err(DecodeError::NestingTooDeep(MAX_BUNDLE_DEPTH));
    }
    let count = read_u32(bytes, cursor)?;
    let remaining = bytes.len() - *cursor;
    if (count as usize).saturating_mul(MIN_ENTITY_LEN) > remaining {
        return Err(DecodeError::CountExceedsBuffer { count, remaining });
    }
    let mut entities = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entities.push(read_entity(bytes, cursor, depth)?);
    }
    Ok(entities)
}

fn read_entity(bytes: &[u8], cursor: &mut usize, depth: usize) -> Result<MapEntity, DecodeError> {
    let raw_tag = read_u8(bytes, cursor)?;
    let tag = EntityTag::from_u8(raw_tag).ok_or(DecodeError::UnknownTag(raw_tag))?;
    let id = EntityUid::new(read_u64(bytes, cursor)?, read_u64(bytes, cursor)?);
    let position = read_vec3(bytes, cursor)?;
    let rotation = read_vec3(bytes, cursor)?;
    let scale = read_f32(bytes, cursor)?;
    let bounds = BoundingBox::new(read_vec3(bytes, cursor)?, read_vec3(bytes, cursor)?);
    let kind = match tag {
        EntityTag::Unknown => EntityKind::Marker,
        EntityTag::Vibrate => EntityKind::Vibrate,
        EntityTag::SpawnTile => EntityKind::SpawnTile,
        EntityTag::BoxCollider => EntityKind::BoxCollider {
            half_extent: read_vec3(bytes, cursor)?,
            solid: read_u8(bytes, cursor)? != 0,
        },
        EntityTag::Fluid => EntityKind::Fluid {
            mesh_id: read_u32(bytes, cursor)?,
        },
        EntityTag::MeshCollider => EntityKind::MeshCollider {
            mesh_id: read_u32(bytes, cursor)?,
        },
        EntityTag::Cell => EntityKind::Cell {
            children: read_entities_at_depth(bytes, cursor, depth + 1)?,
        },
    };
    Ok(MapEntity {
        id,
        position,
        rotation,
        scale,
        bounds,
        kind,
    })
}

fn read_exact<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], DecodeError> {
    let end = cursor.saturating_add(len);
    if end > bytes.len() {
        return Err(DecodeError::UnexpectedEof {
            offset: *cursor,
            needed: end - bytes.len(),
        });
    }
    let out = &bytes[*cursor..end];
    *cursor = end;
    Ok(out)
}

fn read_array<const N: usize>(bytes: &[u8], cursor: &mut usize) -> Result<[u8; N], DecodeError> {
    let mut out = [0u8; N];
    out.copy_from_slice(read_exact(bytes, cursor, N)?);
    Ok(out)
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8, DecodeError> {
    Ok(read_array::<1>(bytes, cursor)?[0])
}

fn read_i16(bytes: &[u8], cursor: &mut usize) -> Result<i16, DecodeError> {
    Ok(i16::from_le_bytes(read_array(bytes, cursor)?))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, DecodeError> {
    Ok(u32::from_le_bytes(read_array(bytes, cursor)?))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64, DecodeError> {
    Ok(u64::from_le_bytes(read_array(bytes, cursor)?))
}

fn read_f32(bytes: &[u8], cursor: &mut usize) -> Result<f32, DecodeError> {
    Ok(f32::from_le_bytes(read_array(bytes, cursor)?))
}

fn read_vec3(bytes: &[u8], cursor: &mut usize) -> Result<Vec3, DecodeError> {
    Ok(Vec3::new(
        read_f32(bytes, cursor)?,
        read_f32(bytes, cursor)?,
        read_f32(bytes, cursor)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::spatial_index::tests::{all_ids, ground_at, marker_at};
    use crate::world::spatial_index::{IndexSettings, SpatialIndexBuilder};
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn sample_index() -> SpatialIndex {
        let mut builder = SpatialIndexBuilder::new(IndexSettings::default());
        let mut low = 0;
        for x in -2..3 {
            for y in 0..3 {
                low += 1;
                builder.insert(ground_at(GridCoord::new(x, y, 0), low));
            }
        }
        let mut mesh = marker_at(GridCoord::new(0, 0, 4), 900);
        mesh.kind = EntityKind::MeshCollider { mesh_id: 42 };
        mesh.rotation = Vec3::new(0.0, 15.0, 0.0);
        builder.insert(mesh);
        let mut water = marker_at(GridCoord::new(8, 0, 0), 901);
        water.kind = EntityKind::Fluid { mesh_id: 7 };
        builder.insert(water);
        builder.insert(marker_at(GridCoord::new(8, 0, 0), 902));
        builder.build().expect("build")
    }

    fn column_index(words: usize, cells: &[(usize, GridCell)]) -> SpatialIndex {
        let bounds = GridBounds::new(
            GridCoord::new(0, 0, 0),
            GridCoord::new(0, 0, words as i16 - 1),
        );
        let mut grid = vec![GridCell::EMPTY; words];
        let mut aligned = Vec::new();
        for (z, cell) in cells {
            grid[*z] = *cell;
            for _ in 0..cell.count {
                aligned.push(marker_at(GridCoord::new(0, 0, *z as i16), aligned.len() as u64));
            }
        }
        SpatialIndex::from_parts(bounds, grid, aligned, Vec::new())
    }

    #[test]
    fn roundtrip_reserializes_identically() {
        let index = sample_index();
        let bytes = serialize_index(&index).expect("serialize");
        let decoded = deserialize_index(&bytes).expect("deserialize");
        assert_eq!(decoded, index);
        assert_eq!(serialize_index(&decoded).expect("reserialize"), bytes);
        assert!(index.unaligned().iter().any(|e| !e.children().is_empty()));
    }

    #[test]
    fn empty_runs_decode_to_exact_cell_counts() {
        let size_z = 6;
        for empties in [0usize, 1, size_z - 1] {
            let cell = GridCell { count: 1, offset: 0 };
            let index = column_index(size_z, &[(empties, cell)]);
            let bytes = serialize_index(&index).expect("serialize");
            let first_word = u32::from_le_bytes(bytes[12..16].try_into().expect("word"));
            if empties > 0 {
                assert_eq!(first_word, empties as u32);
            } else {
                assert_eq!(first_word, 1 << 24);
            }
            let decoded = deserialize_index(&bytes).expect("deserialize");
            for (z, decoded_cell) in decoded.cells().iter().enumerate() {
                if z == empties {
                    assert_eq!(*decoded_cell, cell);
                } else {
                    assert!(decoded_cell.is_empty(), "cell {z} for run {empties}");
                }
            }
        }
    }

    #[test]
    fn run_past_column_end_is_rejected() {
        let index = column_index(3, &[]);
        let mut bytes = serialize_index(&index).expect("serialize");
        bytes[12..16].copy_from_slice(&4u32.to_le_bytes());
        assert!(matches!(
            deserialize_index(&bytes),
            Err(DecodeError::InvalidRun { run: 4, left: 3, .. })
        ));
    }

    #[test]
    fn malformed_headers_fail() {
        let mut bytes = serialize_index(&sample_index()).expect("serialize");
        let mut negative = bytes.clone();
        negative[0..2].copy_from_slice(&(-1i16).to_le_bytes());
        assert!(matches!(
            deserialize_index(&negative),
            Err(DecodeError::InvalidGridSize { x: -1, .. })
        ));

        let mut huge = bytes.clone();
        huge[0..2].copy_from_slice(&i16::MAX.to_le_bytes());
        huge[2..4].copy_from_slice(&i16::MAX.to_le_bytes());
        huge[6..8].copy_from_slice(&0i16.to_le_bytes());
        assert!(matches!(
            deserialize_index(&huge),
            Err(DecodeError::Grid(IndexError::GridTooLarge { x: 32767, y: 32767, .. }))
        ));

        let mut long = bytes.clone();
        long[0..2].copy_from_slice(&10_000i16.to_le_bytes());
        long[6..8].copy_from_slice(&0i16.to_le_bytes());
        assert!(matches!(
            deserialize_index(&long),
            Err(DecodeError::CellsExceedBuffer { .. })
        ));

        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            deserialize_index(&bytes),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn unknown_tag_fails() {
        let index = column_index(1, &[(0, GridCell { count: 1, offset: 0 })]);
        let mut bytes = serialize_index(&index).expect("serialize");
        let tag_at = 12 + 4 + 4;
        bytes[tag_at] = 99;
        assert_eq!(deserialize_index(&bytes), Err(DecodeError::UnknownTag(99)));
    }

    #[test]
    fn cell_beyond_aligned_sequence_fails() {
        let mut index = column_index(2, &[(1, GridCell { count: 1, offset: 0 })]);
        index = SpatialIndex::from_parts(
            index.bounds(),
            vec![GridCell::EMPTY, GridCell { count: 2, offset: 0 }],
            index.aligned().to_vec(),
            Vec::new(),
        );
        let bytes = serialize_index(&index).expect("serialize");
        assert!(matches!(
            deserialize_index(&bytes),
            Err(DecodeError::CellOutOfRange { cell: 1, end: 2, len: 1, .. })
        ));
    }

    #[test]
    fn index_file_roundtrip_and_fingerprint() {
        let temp = TempDir::new().expect("temp");
        let path = temp.path().join("maps").join("2000001.fidx");
        let index = sample_index();
        let fingerprint = write_index_file(&path, &index).expect("write");
        assert_eq!(fingerprint.len(), 28);
        let loaded = read_index_file(&path).expect("read");
        assert_eq!(loaded, index);
        let bytes = fs::read(&path).expect("bytes");
        assert_eq!(index_fingerprint(&bytes), fingerprint);
    }

    fn entity_strategy() -> impl Strategy<Value = MapEntity> {
        (-3i16..3, -3i16..3, -2i16..3, any::<u64>(), 0u8..4).prop_map(|(x, y, z, low, kind)| {
            let coord = GridCoord::new(x, y, z);
            let mut entity = match kind {
                0 => ground_at(coord, low),
                1 => marker_at(coord, low),
                2 => {
                    let mut entity = marker_at(coord, low);
                    entity.kind = EntityKind::Vibrate;
                    entity
                }
                _ => {
                    let mut entity = marker_at(coord, low);
                    entity.rotation = Vec3::new(0.0, 0.0, 33.0);
                    entity.kind = EntityKind::MeshCollider { mesh_id: low as u32 };
                    entity
                }
            };
            entity.id.high = u64::from(kind);
            entity
        })
    }

    proptest! {
        #[test]
        fn prop_roundtrip_and_order_independence(
            entities in prop::collection::vec(entity_strategy(), 0..60),
            threshold in 0usize..12,
        ) {
            let settings = IndexSettings { axis_trim_entity_count: threshold, synthesize_spawn_tiles: true };
            let mut forward = SpatialIndexBuilder::new(settings);
            forward.extend(entities.clone());
            let mut reversed = SpatialIndexBuilder::new(settings);
            reversed.extend(entities.iter().rev().cloned());
            let forward = forward.build().expect("build");
            let reversed = reversed.build().expect("build");

            let bytes = serialize_index(&forward).expect("serialize");
            prop_assert_eq!(&serialize_index(&reversed).expect("serialize"), &bytes);
            let decoded = deserialize_index(&bytes).expect("deserialize");
            prop_assert_eq!(&serialize_index(&decoded).expect("reserialize"), &bytes);

            let spawn_tiles = forward
                .aligned()
                .iter()
                .chain(forward.unaligned().iter())
                .flat_map(|entity| {
                    if entity.children().is_empty() {
                        vec![entity.clone()]
                    } else {
                        entity.children().to_vec()
                    }
                })
                .filter(|entity| entity.kind == EntityKind::SpawnTile)
                .count();
            prop_assert_eq!(all_ids(&forward).len(), entities.len() + spawn_tiles);
        }
    }
}
