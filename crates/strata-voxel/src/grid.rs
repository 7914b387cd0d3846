//! Chunk grid coordinates and the arithmetic that maps world locations onto
//! them.
//!
//! A chunk is a cube of `voxel_count` voxels per axis, each `voxel_size`
//! world units wide. Chunk cells are centred on `cell * chunk_size`, so a
//! chunk spans `[-chunk_size / 2, chunk_size / 2)` around its location.
//!
//! Voxel arrays carry a one-voxel border on every face, giving padded
//! coordinates in `[-1, voxel_count]` per axis. Every code path that turns a
//! padded coordinate into a flat index goes through [`GridSpec::padded_index`].

use std::fmt;

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

/// Rounds `value` to the nearest multiple of `step`, halves rounding up.
///
/// A zero step leaves the value untouched.
pub fn grid_snap(value: f64, step: f64) -> f64 {
    if step == 0.0 {
        return value;
    }
    ((value + step / 2.0) / step).floor() * step
}

/// Rounds to the nearest integer with halves rounding toward +infinity.
pub fn round_to_i32(value: f64) -> i32 {
    (value + 0.5).floor() as i32
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// Integer grid position of a chunk. The key of chunk existence.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChunkCell {
    /// Chunk-grid X.
    pub x: i32,
    /// Chunk-grid Y.
    pub y: i32,
    /// Chunk-grid Z (vertical).
    pub z: i32,
}

impl ChunkCell {
    /// Creates a new cell.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the cell offset by `(dx, dy, dz)`.
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// The 2D column this cell belongs to.
    pub fn column(self) -> Cell2D {
        Cell2D::new(self.x, self.y)
    }
}

impl fmt::Display for ChunkCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A vertical column of chunks, identified by its chunk-grid X/Y.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Cell2D {
    /// Chunk-grid X.
    pub x: i32,
    /// Chunk-grid Y.
    pub y: i32,
}

impl Cell2D {
    /// Creates a new column coordinate.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the column offset by `(dx, dy)`.
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// The chunk cell at vertical index `z` in this column.
    pub fn with_z(self, z: i32) -> ChunkCell {
        ChunkCell::new(self.x, self.y, z)
    }

    /// Manhattan distance between two columns.
    pub fn manhattan(self, other: Cell2D) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

impl fmt::Display for Cell2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A square block of chunk columns. Unit of persistence and network sync.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RegionCoord {
    /// Region X.
    pub x: i32,
    /// Region Y.
    pub y: i32,
}

impl RegionCoord {
    /// Creates a new region coordinate.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// GridSpec
// ---------------------------------------------------------------------------

/// Voxel dimensions shared by every chunk in a world.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// World units per voxel edge.
    pub voxel_size: f64,
    /// Voxels per chunk edge, excluding the border.
    pub voxel_count: i32,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            voxel_size: 100.0,
            voxel_count: 32,
        }
    }
}

impl GridSpec {
    /// Creates a grid spec.
    pub fn new(voxel_size: f64, voxel_count: i32) -> Self {
        Self {
            voxel_size,
            voxel_count,
        }
    }

    /// World units per chunk edge.
    pub fn chunk_size(&self) -> f64 {
        self.voxel_size * f64::from(self.voxel_count)
    }

    /// Voxels per padded edge (`voxel_count + 2`).
    pub fn padded_width(&self) -> i32 {
        self.voxel_count + 2
    }

    /// Total voxels in a padded chunk array.
    pub fn padded_len(&self) -> usize {
        let w = self.padded_width().max(0) as usize;
        w * w * w
    }

    /// Total samples in a padded heightmap.
    pub fn heightmap_len(&self) -> usize {
        let w = self.padded_width().max(0) as usize;
        w * w
    }

    fn in_padded_range(&self, v: i32) -> bool {
        (-1..=self.voxel_count).contains(&v)
    }

    /// Flat index for padded coordinates in `[-1, voxel_count]`.
    ///
    /// Returns `None` when any coordinate falls outside the padded range.
    pub fn padded_index(&self, x: i32, y: i32, z: i32) -> Option<usize> {
        if !(self.in_padded_range(x) && self.in_padded_range(y) && self.in_padded_range(z)) {
            return None;
        }
        let w = self.padded_width() as usize;
        Some((x + 1) as usize * w * w + (y + 1) as usize * w + (z + 1) as usize)
    }

    /// Inverse of [`padded_index`](Self::padded_index).
    pub fn padded_coords(&self, index: usize) -> [i32; 3] {
        let w = self.padded_width() as usize;
        let x = index / (w * w);
        let y = (index / w) % w;
        let z = index % w;
        [x as i32 - 1, y as i32 - 1, z as i32 - 1]
    }

    /// Flat heightmap sample index for padded column coordinates.
    pub fn heightmap_index(&self, x: i32, y: i32) -> Option<usize> {
        if !(self.in_padded_range(x) && self.in_padded_range(y)) {
            return None;
        }
        let w = self.padded_width() as usize;
        Some((x + 1) as usize * w + (y + 1) as usize)
    }

    /// Chunk cell containing a world location.
    pub fn cell_from_location(&self, location: DVec3) -> ChunkCell {
        let cs = self.chunk_size();
        ChunkCell::new(
            round_to_i32(location.x / cs),
            round_to_i32(location.y / cs),
            round_to_i32(location.z / cs),
        )
    }

    /// Chunk column containing a 2D world location.
    pub fn column_from_location(&self, location: DVec2) -> Cell2D {
        let cs = self.chunk_size();
        Cell2D::new(round_to_i32(location.x / cs), round_to_i32(location.y / cs))
    }

    /// World location of a chunk cell's centre.
    pub fn location_from_cell(&self, cell: ChunkCell) -> DVec3 {
        let cs = self.chunk_size();
        DVec3::new(
            f64::from(cell.x) * cs,
            f64::from(cell.y) * cs,
            f64::from(cell.z) * cs,
        )
    }

    /// World location of a column's centre.
    pub fn column_location(&self, column: Cell2D) -> DVec2 {
        let cs = self.chunk_size();
        DVec2::new(f64::from(column.x) * cs, f64::from(column.y) * cs)
    }

    /// Snaps a 2D world location onto the chunk grid.
    pub fn chunk_grid_location(&self, location: DVec2) -> DVec2 {
        let cs = self.chunk_size();
        DVec2::new(grid_snap(location.x, cs), grid_snap(location.y, cs))
    }

    /// Region containing a column.
    pub fn region_of_column(&self, column: Cell2D, region_size_in_chunks: i32) -> RegionCoord {
        let span = self.chunk_size() * f64::from(region_size_in_chunks.max(1));
        let location = self.column_location(column);
        RegionCoord::new(
            round_to_i32(grid_snap(location.x, span) / span),
            round_to_i32(grid_snap(location.y, span) / span),
        )
    }

    /// Whole chunks between two 2D locations, rounded up.
    pub fn distance_in_chunks(&self, a: DVec2, b: DVec2) -> i32 {
        (a.distance(b) / self.chunk_size()).ceil() as i32
    }

    /// Whether `b` lies within `radius` chunks of `a`.
    pub fn in_range(&self, a: DVec2, b: DVec2, radius: i32) -> bool {
        self.distance_in_chunks(a, b) <= radius
    }

    /// Padded voxel coordinates of a world location relative to `cell`.
    ///
    /// Coordinates outside `[-1, voxel_count]` mean the location belongs to a
    /// different chunk entirely.
    pub fn local_voxel_position(&self, cell: ChunkCell, world: DVec3) -> [i32; 3] {
        let vs = self.voxel_size;
        let half = self.chunk_size() / 2.0;
        let origin = self.location_from_cell(cell);
        let axis = |w: f64, o: f64| round_to_i32((grid_snap(w, vs) - o + half) / vs);
        [
            axis(world.x, origin.x),
            axis(world.y, origin.y),
            axis(world.z, origin.z),
        ]
    }

    /// World location of the voxel at padded coordinates `pos` in `cell`.
    pub fn voxel_world_location(&self, cell: ChunkCell, pos: [i32; 3]) -> DVec3 {
        let half = self.chunk_size() / 2.0;
        let origin = self.location_from_cell(cell) - DVec3::splat(half);
        origin
            + DVec3::new(
                f64::from(pos[0]),
                f64::from(pos[1]),
                f64::from(pos[2]),
            ) * self.voxel_size
    }

    /// Flat index and padded position of a world location inside `cell`.
    pub fn voxel_index_for_location(&self, cell: ChunkCell, world: DVec3) -> Option<(usize, [i32; 3])> {
        let pos = self.local_voxel_position(cell, world);
        self.padded_index(pos[0], pos[1], pos[2]).map(|idx| (idx, pos))
    }

    /// Neighbor cell offsets whose border duplicates the voxel at `pos`.
    ///
    /// Each axis contributes at most one offset, so a corner voxel yields
    /// three. Order is Z, Y, X with the negative side checked first.
    pub fn border_offsets(&self, pos: [i32; 3]) -> Vec<[i32; 3]> {
        let last = self.voxel_count - 1;
        let mut out = Vec::with_capacity(3);
        for axis in [2usize, 1, 0] {
            let mut offset = [0; 3];
            if pos[axis] <= 0 {
                offset[axis] = -1;
            } else if pos[axis] >= last {
                offset[axis] = 1;
            } else {
                continue;
            }
            out.push(offset);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
