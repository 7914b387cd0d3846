//! Spiral search for the next column a worker should generate.
//!
//! Rings are half a chunk apart and each ring is walked in
//! `ceil(2 * pi * ring)` angular steps, which oversamples enough that every
//! column within the radius is visited. Each tracked player keeps its own
//! [`RingState`] so the walk resumes where it stopped.

use std::f64::consts::PI;

use glam::DVec2;
use rustc_hash::FxHashSet;
use strata_voxel::{Cell2D, ChunkCell, GridSpec, round_to_i32};

/// Angular steps walked on ring `ring`.
pub fn circumference_in_chunks(ring: i32) -> i32 {
    ((2.0 * PI * f64::from(ring)).ceil() as i32).max(1)
}

/// Offset from the centre of step `angle_index` on ring `ring`.
pub fn ring_offset(ring: i32, angle_index: i32, chunk_size: f64) -> DVec2 {
    let steps = circumference_in_chunks(ring);
    let degrees = 360.0 / f64::from(steps) * f64::from(angle_index);
    let (sin, cos) = degrees.to_radians().sin_cos();
    DVec2::new(cos, sin) * (chunk_size * f64::from(ring) / 2.0)
}

/// Progress of one player's spiral.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingState {
    /// Current ring, in half-chunk steps.
    pub ring: i32,
    /// Next angular step on the ring.
    pub angle_index: i32,
    /// Distance of the current ring from the centre, in chunks.
    pub ring_distance: i32,
}

impl RingState {
    /// Rewinds the spiral after the player moved `distance` world units so
    /// columns that came into range are revisited.
    pub fn apply_player_move(&mut self, distance: f64, chunk_size: f64) {
        let chunks = ((distance.ceil() / chunk_size) as i32).max(2) + 1;
        // Rings are half a chunk apart.
        self.ring = (self.ring - chunks * 2).max(0);
        self.ring_distance = (self.ring_distance - chunks).max(0);
        self.angle_index = 0;
    }

    /// Pulls an exhausted spiral back to just past `radius`.
    pub fn clamp_to_radius(&mut self, radius: i32) {
        let radius = radius.max(0);
        if self.ring_distance > radius + 1 {
            self.ring_distance = radius + 1;
            self.ring = self.ring.min(radius * 2 + 2);
            self.angle_index = 0;
        }
    }

    /// Whether the walk has passed `radius`.
    pub fn is_exhausted(&self, radius: i32) -> bool {
        self.ring_distance > radius
    }
}

/// Columns found around a centre and columns with no chunks at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellSearch {
    pub found: Vec<ChunkCell>,
    pub missing_columns: Vec<Cell2D>,
}

/// Walks spirals over one grid.
#[derive(Clone, Copy, Debug)]
pub struct SpiralSearch {
    spec: GridSpec,
}

impl SpiralSearch {
    pub fn new(spec: GridSpec) -> Self {
        Self { spec }
    }

    fn step_location(&self, center: DVec2, state: &RingState) -> DVec2 {
        let offset = ring_offset(state.ring, state.angle_index, self.spec.chunk_size());
        self.spec.chunk_grid_location(center + offset)
    }

    /// Advances `state` until `claim` accepts a column or the walk passes
    /// `radius`.
    ///
    /// `claim` returns `false` for columns that already exist; those are
    /// handed to `on_existing` instead.
    pub fn next_needed_column(
        &self,
        state: &mut RingState,
        center: DVec2,
        radius: i32,
        mut claim: impl FnMut(Cell2D) -> bool,
        mut on_existing: impl FnMut(Cell2D),
    ) -> Option<Cell2D> {
        let cs = self.spec.chunk_size();
        let center = self.spec.chunk_grid_location(center);

        while state.ring_distance <= radius {
            if state.angle_index >= circumference_in_chunks(state.ring) {
                state.ring += 1;
                state.angle_index = 0;
                continue;
            }

            let location = self.step_location(center, state);
            if state.angle_index == 0 {
                state.ring_distance = round_to_i32(location.distance(center) / cs);
                if state.ring_distance > radius {
                    break;
                }
            }
            state.angle_index += 1;

            let column = self.spec.column_from_location(location);
            if claim(column) {
                return Some(column);
            }
            on_existing(column);
        }
        None
    }

    /// Every chunk cell within `radius` chunks (Manhattan) of `center`.
    ///
    /// `z_indices` returns the Z indices a column currently holds, or `None`
    /// when the column has never been generated.
    pub fn cells_in_radius(
        &self,
        center: DVec2,
        radius: i32,
        mut z_indices: impl FnMut(Cell2D) -> Option<Vec<i32>>,
    ) -> CellSearch {
        let cs = self.spec.chunk_size();
        let center = self.spec.chunk_grid_location(center);
        let mut state = RingState::default();
        let mut seen = FxHashSet::default();
        let mut out = CellSearch::default();

        while state.ring_distance < radius {
            if state.angle_index >= circumference_in_chunks(state.ring) {
                state.ring += 1;
                state.angle_index = 0;
                continue;
            }

            let location = self.step_location(center, &state);
            if state.angle_index == 0 {
                let manhattan = (location - center).abs().element_sum();
                state.ring_distance = round_to_i32(manhattan / cs).abs();
                if state.ring_distance >= radius {
                    break;
                }
            }
            state.angle_index += 1;

            let column = self.spec.column_from_location(location);
            if !seen.insert(column) {
                continue;
            }
            match z_indices(column) {
                Some(zs) => out.found.extend(zs.into_iter().map(|z| column.with_z(z))),
                None => out.missing_columns.push(column),
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn spec() -> GridSpec {
        GridSpec::new(100.0, 32)
    }

    fn drain(
        search: &SpiralSearch,
        state: &mut RingState,
        center: DVec2,
        radius: i32,
        claimed: &mut HashSet<Cell2D>,
    ) -> Vec<Cell2D> {
        let mut order = Vec::new();
        while let Some(column) =
            search.next_needed_column(state, center, radius, |c| claimed.insert(c), |_| {})
        {
            order.push(column);
        }
        order
    }

    fn needed(center: Cell2D, radius: i32) -> Vec<Cell2D> {
        let g = spec();
        let c = g.column_location(center);
        let mut out = Vec::new();
        for x in -radius - 1..=radius + 1 {
            for y in -radius - 1..=radius + 1 {
                let col = center.offset(x, y);
                if g.in_range(c, g.column_location(col), radius) {
                    out.push(col);
                }
            }
        }
        out
    }

    #[test]
    fn test_circumference() {
        assert_eq!(circumference_in_chunks(0), 1);
        assert_eq!(circumference_in_chunks(1), 7);
        assert_eq!(circumference_in_chunks(2), 13);
    }

    #[test]
    fn test_spiral_starts_at_centre_then_rings_out() {
        let search = SpiralSearch::new(spec());
        let mut state = RingState::default();
        let mut claimed = HashSet::new();
        let order = drain(&search, &mut state, DVec2::ZERO, 2, &mut claimed);
        assert_eq!(order[0], Cell2D::new(0, 0));
        assert_eq!(order[1], Cell2D::new(1, 0));
        assert!(state.is_exhausted(2));
    }

    #[test]
    fn test_spiral_covers_radius_once() {
        let search = SpiralSearch::new(spec());
        for radius in [1, 4, 9] {
            let mut state = RingState::default();
            let mut claimed = HashSet::new();
            let order = drain(&search, &mut state, DVec2::ZERO, radius, &mut claimed);
            assert_eq!(order.len(), claimed.len());
            for col in needed(Cell2D::new(0, 0), radius) {
                assert!(claimed.contains(&col), "radius {radius} missed {col}");
            }
            for col in &claimed {
                assert!(col.manhattan(Cell2D::new(0, 0)) <= radius * 2 + 1);
            }
        }
    }

    #[test]
    fn test_existing_columns_are_reported() {
        let search = SpiralSearch::new(spec());
        let mut state = RingState::default();
        let mut existing = Vec::new();
        let found = search.next_needed_column(
            &mut state,
            DVec2::ZERO,
            3,
            |c| c != Cell2D::new(0, 0),
            |c| existing.push(c),
        );
        assert_eq!(found, Some(Cell2D::new(1, 0)));
        assert_eq!(existing, vec![Cell2D::new(0, 0)]);
    }

    #[test]
    fn test_player_move_revisits_new_columns() {
        let g = spec();
        let search = SpiralSearch::new(g);
        let radius = 6;
        let mut state = RingState::default();
        let mut claimed = HashSet::new();
        let mut center = Cell2D::new(0, 0);
        drain(&search, &mut state, g.column_location(center), radius, &mut claimed);

        for (dx, dy) in [(3, 0), (-1, 5), (4, -4), (0, 0), (-6, 2)] {
            let next = center.offset(dx, dy);
            let moved = g.column_location(center).distance(g.column_location(next));
            state.apply_player_move(moved, g.chunk_size());
            center = next;
            drain(&search, &mut state, g.column_location(center), radius, &mut claimed);
            for col in needed(center, radius) {
                assert!(claimed.contains(&col), "after move to {center} missed {col}");
            }
        }
    }

    #[test]
    fn test_move_rewinds_at_least_three_chunks() {
        let mut state = RingState {
            ring: 20,
            angle_index: 5,
            ring_distance: 10,
        };
        state.apply_player_move(10.0, 3200.0);
        assert_eq!(state, RingState { ring: 14, angle_index: 0, ring_distance: 7 });
        state.apply_player_move(1_000_000.0, 3200.0);
        assert_eq!(state, RingState::default());
    }

    #[test]
    fn test_clamp_to_radius() {
        let mut state = RingState {
            ring: 40,
            angle_index: 3,
            ring_distance: 20,
        };
        state.clamp_to_radius(5);
        assert_eq!(state.ring_distance, 6);
        assert_eq!(state.ring, 12);
        assert!(state.is_exhausted(5));
        assert!(!state.is_exhausted(6));
    }

    #[test]
    fn test_cells_in_radius_splits_found_and_missing() {
        let search = SpiralSearch::new(spec());
        let result = search.cells_in_radius(DVec2::ZERO, 2, |c| {
            (c.x >= 0).then(|| vec![0, 1])
        });
        assert!(result.found.contains(&ChunkCell::new(0, 0, 0)));
        assert!(result.found.contains(&ChunkCell::new(0, 0, 1)));
        assert!(result.missing_columns.contains(&Cell2D::new(-1, 0)));
        let unique: HashSet<_> = result.found.iter().collect();
        assert_eq!(unique.len(), result.found.len());
    }

    #[test]
    fn test_cells_in_zero_radius_is_empty() {
        let search = SpiralSearch::new(spec());
        let result = search.cells_in_radius(DVec2::ZERO, 0, |_| Some(vec![0]));
        assert!(result.found.is_empty());
        assert!(result.missing_columns.is_empty());
    }
}
