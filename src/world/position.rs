use serde::{Deserialize, Serialize};

/// Edge length of one grid cell in world units.
pub const CELL_SIZE: f32 = 150.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn splat(value: f32) -> Self {
        Self::new(value, value, value)
    }

    pub fn add(self, other: Vec3) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vec3) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn min(self, other: Vec3) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn max(self, other: Vec3) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    pub fn distance(self, other: Vec3) -> f32 {
        let d = self.sub(other);
        (d.x * d.x + d.y * d.y + d.z * d.z).sqrt()
    }

    /// Moves towards `target` by at most `step`, landing on it when close enough.
    pub fn step_towards(self, target: Vec3, step: f32) -> Self {
        let distance = self.distance(target);
        if distance <= step || distance <= f32::EPSILON {
            return target;
        }
        self.add(target.sub(self).scale(step / distance))
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from(value: [f32; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

impl From<Vec3> for [f32; 3] {
    fn from(value: Vec3) -> Self {
        [value.x, value.y, value.z]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn around(center: Vec3, half_extent: Vec3) -> Self {
        Self::new(center.sub(half_extent), center.add(half_extent))
    }

    pub fn union(self, other: BoundingBox) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    pub fn size(&self) -> Vec3 {
        self.max.sub(self.min)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GridCoord {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl std::fmt::Display for GridCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

pub const AXES: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

impl GridCoord {
    pub const ORIGIN: GridCoord = GridCoord { x: 0, y: 0, z: 0 };

    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }

    /// Cell containing a world-space point, rounding to the nearest cell.
    /// Points outside the 16-bit grid range yield `None`.
    pub fn from_world(point: Vec3) -> Option<Self> {
        Some(Self {
            x: world_to_grid(point.x)?,
            y: world_to_grid(point.y)?,
            z: world_to_grid(point.z)?,
        })
    }

    /// Same as `from_world` but clamps into range instead of failing.
    pub fn from_world_clamped(point: Vec3) -> Self {
        let clamp = |value: f32| {
            (value / CELL_SIZE)
                .round()
                .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
        };
        Self::new(clamp(point.x), clamp(point.y), clamp(point.z))
    }

    /// World position of the cell centre on x/y and the cell floor on z.
    pub fn to_world(self) -> Vec3 {
        Vec3::new(
            f32::from(self.x) * CELL_SIZE,
            f32::from(self.y) * CELL_SIZE,
            f32::from(self.z) * CELL_SIZE,
        )
    }

    pub fn offset(self, dx: i16, dy: i16, dz: i16) -> Option<Self> {
        Some(Self {
            x: self.x.checked_add(dx)?,
            y: self.y.checked_add(dy)?,
            z: self.z.checked_add(dz)?,
        })
    }

    pub fn above(self) -> Option<Self> {
        self.offset(0, 0, 1)
    }

    pub fn axis(self, axis: Axis) -> i16 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn with_axis(self, axis: Axis, value: i16) -> Self {
        match axis {
            Axis::X => Self { x: value, ..self },
            Axis::Y => Self { y: value, ..self },
            Axis::Z => Self { z: value, ..self },
        }
    }

    pub fn min(self, other: GridCoord) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn max(self, other: GridCoord) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }
}

fn world_to_grid(value: f32) -> Option<i16> {
    let cell = (value / CELL_SIZE).round();
    if !cell.is_finite() || cell < f32::from(i16::MIN) || cell > f32::from(i16::MAX) {
        return None;
    }
    Some(cell as i16)
}

/// Inclusive grid extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridBounds {
    pub min: GridCoord,
    pub max: GridCoord,
}

impl GridBounds {
    pub fn new(min: GridCoord, max: GridCoord) -> Self {
        Self { min, max }
    }

    pub fn single(coord: GridCoord) -> Self {
        Self::new(coord, coord)
    }

    pub fn include(self, coord: GridCoord) -> Self {
        Self::new(self.min.min(coord), self.max.max(coord))
    }

    pub fn contains(&self, coord: GridCoord) -> bool {
        coord.x >= self.min.x
            && coord.x <= self.max.x
            && coord.y >= self.min.y
            && coord.y <= self.max.y
            && coord.z >= self.min.z
            && coord.z <= self.max.z
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Cells per axis, `max - min + 1`.
    pub fn size(&self) -> (usize, usize, usize) {
        let span = |lo: i16, hi: i16| (i32::from(hi) - i32::from(lo) + 1).max(0) as usize;
        (
            span(self.min.x, self.max.x),
            span(self.min.y, self.max.y),
            span(self.min.z, self.max.z),
        )
    }

    pub fn cell_count(&self) -> usize {
        let (x, y, z) = self.size();
        x * y * z
    }

    pub fn intersection(&self, other: &GridBounds) -> Option<GridBounds> {
        let bounds = GridBounds::new(self.min.max(other.min), self.max.min(other.max));
        bounds.is_valid().then_some(bounds)
    }
}
