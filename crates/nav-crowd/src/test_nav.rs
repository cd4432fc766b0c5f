//! Grid-world navigation mesh used by the crowd tests
//!
//! Implements [`NavQuery`] over a rectangular grid of unit-square
//! polygons, one per open cell. Planning is breadth-first under the node
//! budget, the straight-path query runs a funnel over the shared cell
//! edges, and raycast/surface movement walk cells with a DDA. There are
//! no off-mesh connections.

use nav_common::{Error, Result};

use crate::nav_query::{
    NavQuery, PathPlan, PlanStatus, PolyRef, QueryFilter, RaycastHit, StraightPathPoint,
    STRAIGHTPATH_END, STRAIGHTPATH_START,
};

pub struct GridNavMesh {
    width: i32,
    height: i32,
    cell: f32,
    flags: Vec<u16>,
}

impl GridNavMesh {
    /// A fully open grid of `width` x `height` cells of size `cell`
    pub fn open(width: i32, height: i32, cell: f32) -> Self {
        Self {
            width,
            height,
            cell,
            flags: vec![1; (width * height) as usize],
        }
    }

    /// Closes one cell
    pub fn block(&mut self, x: i32, y: i32) {
        let i = (y * self.width + x) as usize;
        self.flags[i] = 0;
    }

    /// Sets the polygon flags of one cell
    pub fn set_flags(&mut self, x: i32, y: i32, flags: u16) {
        let i = (y * self.width + x) as usize;
        self.flags[i] = flags;
    }

    pub fn poly_ref(&self, x: i32, y: i32) -> PolyRef {
        PolyRef::new((y * self.width + x + 1) as u64)
    }

    fn cell_of(&self, reference: PolyRef) -> Option<(i32, i32)> {
        if !reference.is_valid() {
            return None;
        }
        let id = reference.id() as i32 - 1;
        if id < 0 || id >= self.width * self.height {
            return None;
        }
        Some((id % self.width, id / self.width))
    }

    fn cell_at(&self, x: f32, z: f32) -> (i32, i32) {
        ((x / self.cell).floor() as i32, (z / self.cell).floor() as i32)
    }

    fn passes(&self, x: i32, y: i32, filter: &QueryFilter) -> bool {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return false;
        }
        let f = self.flags[(y * self.width + x) as usize];
        f != 0 && filter.passes(f)
    }

    fn cell_rect(&self, x: i32, y: i32) -> (f32, f32, f32, f32) {
        (
            x as f32 * self.cell,
            y as f32 * self.cell,
            (x + 1) as f32 * self.cell,
            (y + 1) as f32 * self.cell,
        )
    }

    fn clamp_into_cell(&self, x: i32, y: i32, pos: &[f32; 3]) -> [f32; 3] {
        let (x0, z0, x1, z1) = self.cell_rect(x, y);
        // Keep a hair inside so the point maps back to this cell.
        let eps = self.cell * 1e-4;
        [
            pos[0].clamp(x0 + eps, x1 - eps),
            0.0,
            pos[2].clamp(z0 + eps, z1 - eps),
        ]
    }

    /// Shared edge between two adjacent cells, (left, right) as seen when
    /// traveling from `a` into `b`.
    fn portal(&self, a: (i32, i32), b: (i32, i32)) -> ([f32; 3], [f32; 3]) {
        let (x0, z0, x1, z1) = self.cell_rect(a.0, a.1);
        match (b.0 - a.0, b.1 - a.1) {
            (1, 0) => ([x1, 0.0, z1], [x1, 0.0, z0]),
            (-1, 0) => ([x0, 0.0, z0], [x0, 0.0, z1]),
            (0, 1) => ([x0, 0.0, z1], [x1, 0.0, z1]),
            (0, -1) => ([x1, 0.0, z0], [x0, 0.0, z0]),
            _ => unreachable!("cells are not adjacent"),
        }
    }
}

const NEIGHBOR_OFFSETS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

fn veq_2d(a: &[f32; 3], b: &[f32; 3]) -> bool {
    nav_common::vector::vdist_2d_sqr(a, b) < 1e-8
}

impl NavQuery for GridNavMesh {
    fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<(PolyRef, [f32; 3])> {
        let (cx, cy) = self.cell_at(center[0], center[2]);
        if self.passes(cx, cy, filter) {
            return Ok((self.poly_ref(cx, cy), self.clamp_into_cell(cx, cy, center)));
        }

        let max_ring = (half_extents[0] / self.cell).ceil() as i32;
        let mut best: Option<(f32, PolyRef, [f32; 3])> = None;
        for ring in 1..=max_ring {
            for dy in -ring..=ring {
                for dx in -ring..=ring {
                    if dx.abs() != ring && dy.abs() != ring {
                        continue;
                    }
                    let (x, y) = (cx + dx, cy + dy);
                    if !self.passes(x, y, filter) {
                        continue;
                    }
                    let pt = self.clamp_into_cell(x, y, center);
                    let d = nav_common::vector::vdist_2d_sqr(center, &pt);
                    if best.as_ref().is_none_or(|(bd, _, _)| d < *bd) {
                        best = Some((d, self.poly_ref(x, y), pt));
                    }
                }
            }
            if best.is_some() {
                break;
            }
        }
        best.map(|(_, r, p)| (r, p)).ok_or(Error::PathNotFound)
    }

    fn find_path(
        &self,
        start: PolyRef,
        end: PolyRef,
        _start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_nodes: usize,
    ) -> Result<PathPlan> {
        let start_cell = self.cell_of(start).ok_or(Error::InvalidParam("start poly"))?;
        let end_cell = self.cell_of(end).ok_or(Error::InvalidParam("end poly"))?;
        if !self.passes(start_cell.0, start_cell.1, filter) {
            return Err(Error::InvalidParam("start poly"));
        }

        let idx = |c: (i32, i32)| (c.1 * self.width + c.0) as usize;
        let mut came_from: Vec<Option<(i32, i32)>> =
            vec![None; (self.width * self.height) as usize];
        let mut seen = vec![false; (self.width * self.height) as usize];
        let mut frontier = std::collections::VecDeque::new();
        frontier.push_back(start_cell);
        seen[idx(start_cell)] = true;

        let (ex, ey) = self.cell_at(end_pos[0], end_pos[2]);
        let goal_dist = |c: (i32, i32)| (c.0 - ex).abs() + (c.1 - ey).abs();
        let mut best = start_cell;
        let mut expanded = 0usize;

        let reconstruct = |goal: (i32, i32), came_from: &[Option<(i32, i32)>]| {
            let mut polys = vec![self.poly_ref(goal.0, goal.1)];
            let mut cur = goal;
            while let Some(prev) = came_from[idx(cur)] {
                polys.push(self.poly_ref(prev.0, prev.1));
                cur = prev;
            }
            polys.reverse();
            polys
        };

        while let Some(cur) = frontier.pop_front() {
            if expanded >= max_nodes {
                return Ok(PathPlan {
                    status: PlanStatus::InProgress,
                    polys: reconstruct(best, &came_from),
                });
            }
            expanded += 1;

            if cur == end_cell {
                return Ok(PathPlan {
                    status: PlanStatus::Complete,
                    polys: reconstruct(cur, &came_from),
                });
            }
            if goal_dist(cur) < goal_dist(best) {
                best = cur;
            }

            for (dx, dy) in NEIGHBOR_OFFSETS {
                let next = (cur.0 + dx, cur.1 + dy);
                if !self.passes(next.0, next.1, filter) || seen[idx(next)] {
                    continue;
                }
                seen[idx(next)] = true;
                came_from[idx(next)] = Some(cur);
                frontier.push_back(next);
            }
        }
        Err(Error::PathNotFound)
    }

    fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>> {
        if path.is_empty() || max_points == 0 {
            return Err(Error::InvalidParam("empty path"));
        }
        let start = [start_pos[0], 0.0, start_pos[2]];
        let end = [end_pos[0], 0.0, end_pos[2]];

        let mut points = vec![StraightPathPoint {
            pos: start,
            flags: STRAIGHTPATH_START,
            poly: path[0],
        }];

        // Portal list bracketed by degenerate start/end portals.
        let mut portals: Vec<([f32; 3], [f32; 3], PolyRef)> = vec![(start, start, path[0])];
        for w in path.windows(2) {
            let a = self.cell_of(w[0]).ok_or(Error::InvalidParam("bad poly in path"))?;
            let b = self.cell_of(w[1]).ok_or(Error::InvalidParam("bad poly in path"))?;
            let (l, r) = self.portal(a, b);
            portals.push((l, r, w[1]));
        }
        let last = *path.last().unwrap();
        portals.push((end, end, last));

        // Funnel / string-pulling.
        let area = nav_common::math::tri_area_2d;
        let mut apex = start;
        let mut left = portals[0].0;
        let mut right = portals[0].1;
        let (mut left_i, mut right_i) = (0usize, 0usize);

        let mut i = 1;
        while i < portals.len() && points.len() < max_points {
            let (pl, pr, _) = portals[i];

            // Tighten the right side.
            if area(&apex, &right, &pr) >= 0.0 {
                if veq_2d(&apex, &right) || area(&apex, &left, &pr) < 0.0 {
                    right = pr;
                    right_i = i;
                } else {
                    // Right crossed over left: left becomes a corner.
                    points.push(StraightPathPoint {
                        pos: left,
                        flags: 0,
                        poly: portals[left_i].2,
                    });
                    apex = left;
                    right = apex;
                    right_i = left_i;
                    i = left_i + 1;
                    continue;
                }
            }

            // Tighten the left side.
            if area(&apex, &left, &pl) <= 0.0 {
                if veq_2d(&apex, &left) || area(&apex, &right, &pl) > 0.0 {
                    left = pl;
                    left_i = i;
                } else {
                    points.push(StraightPathPoint {
                        pos: right,
                        flags: 0,
                        poly: portals[right_i].2,
                    });
                    apex = right;
                    left = apex;
                    left_i = right_i;
                    i = right_i + 1;
                    continue;
                }
            }
            i += 1;
        }

        // A result truncated at max_points carries no end marker; the
        // caller must not mistake an intermediate corner for the target.
        if points.len() < max_points {
            points.push(StraightPathPoint {
                pos: end,
                flags: STRAIGHTPATH_END,
                poly: last,
            });
        }
        Ok(points)
    }

    fn raycast(
        &self,
        start: PolyRef,
        from: &[f32; 3],
        to: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<RaycastHit> {
        let mut cur = self.cell_of(start).ok_or(Error::InvalidParam("start poly"))?;
        let mut visited = vec![self.poly_ref(cur.0, cur.1)];
        let goal = self.cell_at(to[0], to[2]);

        let dx = to[0] - from[0];
        let dz = to[2] - from[2];

        let step_x: i32 = if dx > 0.0 { 1 } else { -1 };
        let step_z: i32 = if dz > 0.0 { 1 } else { -1 };
        let next_boundary = |c: i32, step: i32| {
            if step > 0 {
                (c + 1) as f32 * self.cell
            } else {
                c as f32 * self.cell
            }
        };
        let mut tmax_x = if dx.abs() > 1e-9 {
            (next_boundary(cur.0, step_x) - from[0]) / dx
        } else {
            f32::MAX
        };
        let mut tmax_z = if dz.abs() > 1e-9 {
            (next_boundary(cur.1, step_z) - from[2]) / dz
        } else {
            f32::MAX
        };
        let tdelta_x = if dx.abs() > 1e-9 { self.cell / dx.abs() } else { f32::MAX };
        let tdelta_z = if dz.abs() > 1e-9 { self.cell / dz.abs() } else { f32::MAX };

        loop {
            if cur == goal {
                return Ok(RaycastHit {
                    t: f32::MAX,
                    visited,
                });
            }
            let (t_cross, next) = if tmax_x < tmax_z {
                (tmax_x, (cur.0 + step_x, cur.1))
            } else {
                (tmax_z, (cur.0, cur.1 + step_z))
            };
            if t_cross > 1.0 {
                // The segment ends inside the current cell.
                return Ok(RaycastHit {
                    t: f32::MAX,
                    visited,
                });
            }
            if !self.passes(next.0, next.1, filter) {
                return Ok(RaycastHit {
                    t: t_cross,
                    visited,
                });
            }
            if tmax_x < tmax_z {
                tmax_x += tdelta_x;
            } else {
                tmax_z += tdelta_z;
            }
            cur = next;
            visited.push(self.poly_ref(cur.0, cur.1));
        }
    }

    fn move_along_surface(
        &self,
        start: PolyRef,
        from: &[f32; 3],
        to: &[f32; 3],
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<([f32; 3], Vec<PolyRef>)> {
        let mut cur = self.cell_of(start).ok_or(Error::InvalidParam("start poly"))?;
        let mut visited = vec![self.poly_ref(cur.0, cur.1)];
        let mut pos = [from[0], 0.0, from[2]];
        let mut target = [to[0], 0.0, to[2]];
        let eps = self.cell * 1e-3;

        // Walk cell by cell toward the target, clamping the blocked axis
        // when a wall is hit so the motion slides along it.
        for _ in 0..256 {
            let dx = target[0] - pos[0];
            let dz = target[2] - pos[2];
            if dx.abs() < 1e-6 && dz.abs() < 1e-6 {
                break;
            }
            if self.cell_at(target[0], target[2]) == cur {
                pos = target;
                break;
            }

            let step_x: i32 = if dx > 0.0 { 1 } else { -1 };
            let step_z: i32 = if dz > 0.0 { 1 } else { -1 };
            let bound_x = if step_x > 0 {
                (cur.0 + 1) as f32 * self.cell
            } else {
                cur.0 as f32 * self.cell
            };
            let bound_z = if step_z > 0 {
                (cur.1 + 1) as f32 * self.cell
            } else {
                cur.1 as f32 * self.cell
            };
            let tx = if dx.abs() > 1e-9 {
                (bound_x - pos[0]) / dx
            } else {
                f32::MAX
            };
            let tz = if dz.abs() > 1e-9 {
                (bound_z - pos[2]) / dz
            } else {
                f32::MAX
            };

            let (t_cross, next, blocked_axis_x) = if tx < tz {
                (tx, (cur.0 + step_x, cur.1), true)
            } else {
                (tz, (cur.0, cur.1 + step_z), false)
            };
            if t_cross > 1.0 {
                pos = target;
                break;
            }

            if self.passes(next.0, next.1, filter) {
                if visited.len() >= max_visited {
                    pos = [pos[0] + dx * t_cross, 0.0, pos[2] + dz * t_cross];
                    break;
                }
                pos = [pos[0] + dx * t_cross, 0.0, pos[2] + dz * t_cross];
                cur = next;
                visited.push(self.poly_ref(cur.0, cur.1));
            } else if blocked_axis_x {
                // Slide along the wall: stop x movement at the boundary.
                let wall = bound_x - step_x as f32 * eps;
                pos[0] = wall;
                target[0] = wall;
            } else {
                let wall = bound_z - step_z as f32 * eps;
                pos[2] = wall;
                target[2] = wall;
            }
        }
        Ok((pos, visited))
    }

    fn polygons_around_circle(
        &self,
        start: PolyRef,
        center: &[f32; 3],
        radius: f32,
        filter: &QueryFilter,
        max_polys: usize,
    ) -> Result<Vec<PolyRef>> {
        let start_cell = self.cell_of(start).ok_or(Error::InvalidParam("start poly"))?;
        let idx = |c: (i32, i32)| (c.1 * self.width + c.0) as usize;
        let intersects = |c: (i32, i32)| {
            let (x0, z0, x1, z1) = self.cell_rect(c.0, c.1);
            let nx = center[0].clamp(x0, x1);
            let nz = center[2].clamp(z0, z1);
            let dx = center[0] - nx;
            let dz = center[2] - nz;
            dx * dx + dz * dz <= radius * radius
        };

        let mut seen = vec![false; (self.width * self.height) as usize];
        let mut out = Vec::new();
        let mut frontier = std::collections::VecDeque::new();
        frontier.push_back(start_cell);
        seen[idx(start_cell)] = true;

        while let Some(cur) = frontier.pop_front() {
            out.push(self.poly_ref(cur.0, cur.1));
            if out.len() >= max_polys {
                break;
            }
            for (dx, dy) in NEIGHBOR_OFFSETS {
                let next = (cur.0 + dx, cur.1 + dy);
                if !self.passes(next.0, next.1, filter) || seen[idx(next)] || !intersects(next) {
                    continue;
                }
                seen[idx(next)] = true;
                frontier.push_back(next);
            }
        }
        Ok(out)
    }

    fn poly_height(&self, _poly: PolyRef, _pos: &[f32; 3]) -> Result<f32> {
        Ok(0.0)
    }

    fn is_valid_poly(&self, poly: PolyRef, filter: &QueryFilter) -> bool {
        match self.cell_of(poly) {
            Some((x, y)) => self.passes(x, y, filter),
            None => false,
        }
    }

    fn wall_segments(
        &self,
        poly: PolyRef,
        filter: &QueryFilter,
    ) -> Result<Vec<([f32; 3], [f32; 3])>> {
        let (x, y) = self.cell_of(poly).ok_or(Error::InvalidParam("bad poly"))?;
        let (x0, z0, x1, z1) = self.cell_rect(x, y);
        let mut walls = Vec::new();
        // Walkable interior stays on the left of each p -> q edge.
        if !self.passes(x, y - 1, filter) {
            walls.push(([x0, 0.0, z0], [x1, 0.0, z0]));
        }
        if !self.passes(x + 1, y, filter) {
            walls.push(([x1, 0.0, z0], [x1, 0.0, z1]));
        }
        if !self.passes(x, y + 1, filter) {
            walls.push(([x1, 0.0, z1], [x0, 0.0, z1]));
        }
        if !self.passes(x - 1, y, filter) {
            walls.push(([x0, 0.0, z1], [x0, 0.0, z0]));
        }
        Ok(walls)
    }

    fn off_mesh_connection_endpoints(
        &self,
        _prev: PolyRef,
        _poly: PolyRef,
    ) -> Result<([f32; 3], [f32; 3])> {
        Err(Error::InvalidParam("grid mesh has no off-mesh connections"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_nearest_snaps_to_open_cell() {
        let mut mesh = GridNavMesh::open(4, 4, 1.0);
        mesh.block(1, 1);
        let filter = QueryFilter::default();

        let (r, p) = mesh
            .find_nearest_poly(&[0.5, 0.0, 0.5], &[2.0, 2.0, 2.0], &filter)
            .unwrap();
        assert_eq!(r, mesh.poly_ref(0, 0));
        assert!((p[0] - 0.5).abs() < 1e-4 && (p[2] - 0.5).abs() < 1e-4);

        // Blocked cell snaps to a neighbor.
        let (r, _) = mesh
            .find_nearest_poly(&[1.5, 0.0, 1.5], &[2.0, 2.0, 2.0], &filter)
            .unwrap();
        assert_ne!(r, mesh.poly_ref(1, 1));
    }

    #[test]
    fn test_find_path_routes_around_wall() {
        let mut mesh = GridNavMesh::open(5, 5, 1.0);
        // Vertical wall with a gap at the top.
        for y in 0..4 {
            mesh.block(2, y);
        }
        let filter = QueryFilter::default();
        let plan = mesh
            .find_path(
                mesh.poly_ref(0, 0),
                mesh.poly_ref(4, 0),
                &[0.5, 0.0, 0.5],
                &[4.5, 0.0, 0.5],
                &filter,
                1000,
            )
            .unwrap();
        assert_eq!(plan.status, PlanStatus::Complete);
        assert_eq!(plan.polys.first(), Some(&mesh.poly_ref(0, 0)));
        assert_eq!(plan.polys.last(), Some(&mesh.poly_ref(4, 0)));
        // The route bends through the gap row.
        assert!(plan.polys.contains(&mesh.poly_ref(2, 4)));
    }

    #[test]
    fn test_find_path_unreachable() {
        let mut mesh = GridNavMesh::open(5, 5, 1.0);
        for y in 0..5 {
            mesh.block(2, y);
        }
        let filter = QueryFilter::default();
        let result = mesh.find_path(
            mesh.poly_ref(0, 0),
            mesh.poly_ref(4, 0),
            &[0.5, 0.0, 0.5],
            &[4.5, 0.0, 0.5],
            &filter,
            1000,
        );
        assert!(matches!(result, Err(Error::PathNotFound)));
    }

    #[test]
    fn test_find_path_budget_exhaustion() {
        let mesh = GridNavMesh::open(20, 20, 1.0);
        let filter = QueryFilter::default();
        let plan = mesh
            .find_path(
                mesh.poly_ref(0, 0),
                mesh.poly_ref(19, 19),
                &[0.5, 0.0, 0.5],
                &[19.5, 0.0, 19.5],
                &filter,
                5,
            )
            .unwrap();
        assert_eq!(plan.status, PlanStatus::InProgress);
    }

    #[test]
    fn test_straight_path_pulls_around_corner() {
        let mut mesh = GridNavMesh::open(3, 3, 1.0);
        mesh.block(1, 0);
        let filter = QueryFilter::default();
        let start = [0.5, 0.0, 0.5];
        let end = [2.5, 0.0, 0.5];
        let plan = mesh
            .find_path(
                mesh.poly_ref(0, 0),
                mesh.poly_ref(2, 0),
                &start,
                &end,
                &filter,
                1000,
            )
            .unwrap();
        let pts = mesh
            .find_straight_path(&start, &end, &plan.polys, 8)
            .unwrap();

        assert!(pts.len() >= 3);
        assert_eq!(pts[0].flags & STRAIGHTPATH_START, STRAIGHTPATH_START);
        assert_eq!(
            pts.last().unwrap().flags & STRAIGHTPATH_END,
            STRAIGHTPATH_END
        );
        // The pulled string bends around a corner of the blocked cell.
        let interior = &pts[1..pts.len() - 1];
        assert!(interior
            .iter()
            .any(|p| (p.pos[2] - 1.0).abs() < 1e-3
                && ((p.pos[0] - 1.0).abs() < 1e-3 || (p.pos[0] - 2.0).abs() < 1e-3)));
    }

    #[test]
    fn test_straight_path_truncated_result_has_no_end_marker() {
        let mut mesh = GridNavMesh::open(3, 3, 1.0);
        mesh.block(1, 0);
        let filter = QueryFilter::default();
        let start = [0.5, 0.0, 0.5];
        let end = [2.5, 0.0, 0.5];
        let plan = mesh
            .find_path(
                mesh.poly_ref(0, 0),
                mesh.poly_ref(2, 0),
                &start,
                &end,
                &filter,
                1000,
            )
            .unwrap();
        let pts = mesh
            .find_straight_path(&start, &end, &plan.polys, 2)
            .unwrap();

        // Cut off mid-route: the last point is a corner, not the target.
        assert_eq!(pts.len(), 2);
        assert_eq!(pts.last().unwrap().flags & STRAIGHTPATH_END, 0);
    }

    #[test]
    fn test_straight_path_along_open_row_is_two_points() {
        let mesh = GridNavMesh::open(5, 5, 1.0);
        let filter = QueryFilter::default();
        let start = [0.5, 0.0, 0.5];
        let end = [4.5, 0.0, 0.5];
        let plan = mesh
            .find_path(
                mesh.poly_ref(0, 0),
                mesh.poly_ref(4, 0),
                &start,
                &end,
                &filter,
                1000,
            )
            .unwrap();
        let pts = mesh
            .find_straight_path(&start, &end, &plan.polys, 8)
            .unwrap();
        assert_eq!(pts.len(), 2);
    }

    #[test]
    fn test_raycast_hits_wall() {
        let mut mesh = GridNavMesh::open(5, 5, 1.0);
        mesh.block(3, 0);
        let filter = QueryFilter::default();
        let hit = mesh
            .raycast(
                mesh.poly_ref(0, 0),
                &[0.5, 0.0, 0.5],
                &[4.5, 0.0, 0.5],
                &filter,
            )
            .unwrap();
        assert!(!hit.reached_end());
        // Wall face at x = 3 is 2.5 units into a 4-unit ray.
        assert!((hit.t - 2.5 / 4.0).abs() < 1e-4);
        assert_eq!(hit.visited.len(), 3);
    }

    #[test]
    fn test_raycast_clear() {
        let mesh = GridNavMesh::open(5, 5, 1.0);
        let filter = QueryFilter::default();
        let hit = mesh
            .raycast(
                mesh.poly_ref(0, 2),
                &[0.5, 0.0, 2.5],
                &[4.5, 0.0, 2.5],
                &filter,
            )
            .unwrap();
        assert!(hit.reached_end());
        assert_eq!(hit.visited.len(), 5);
    }

    #[test]
    fn test_move_along_surface_slides() {
        let mut mesh = GridNavMesh::open(5, 5, 1.0);
        for y in 0..5 {
            mesh.block(2, y);
        }
        let filter = QueryFilter::default();
        // Diagonal move into the wall: x stops at the wall, z continues.
        let (pos, visited) = mesh
            .move_along_surface(
                mesh.poly_ref(1, 0),
                &[1.5, 0.0, 0.5],
                &[3.5, 0.0, 2.5],
                &filter,
                16,
            )
            .unwrap();
        assert!(pos[0] < 2.0 && pos[0] > 1.9);
        assert!((pos[2] - 2.5).abs() < 1e-3);
        assert!(visited.contains(&mesh.poly_ref(1, 2)));
    }

    #[test]
    fn test_wall_segments_winding() {
        let mut mesh = GridNavMesh::open(3, 3, 1.0);
        mesh.block(2, 1);
        let filter = QueryFilter::default();
        // Cell (1,1) has one wall, shared with blocked (2,1).
        let walls = mesh.wall_segments(mesh.poly_ref(1, 1), &filter).unwrap();
        assert_eq!(walls.len(), 1);
        let (p, q) = walls[0];
        // Edge at x = 2 running +z; interior (x < 2) on the left.
        assert_eq!(p, [2.0, 0.0, 1.0]);
        assert_eq!(q, [2.0, 0.0, 2.0]);

        // A corner cell exposes its two outer walls.
        let walls = mesh.wall_segments(mesh.poly_ref(0, 0), &filter).unwrap();
        assert_eq!(walls.len(), 2);
    }

    #[test]
    fn test_polygons_around_circle() {
        let mesh = GridNavMesh::open(10, 10, 1.0);
        let filter = QueryFilter::default();
        let polys = mesh
            .polygons_around_circle(mesh.poly_ref(5, 5), &[5.5, 0.0, 5.5], 1.2, &filter, 32)
            .unwrap();
        // Center plus the four edge-adjacent cells are within 1.2 units.
        assert!(polys.contains(&mesh.poly_ref(5, 5)));
        assert!(polys.contains(&mesh.poly_ref(4, 5)));
        assert!(polys.contains(&mesh.poly_ref(6, 5)));
        assert!(polys.contains(&mesh.poly_ref(5, 4)));
        assert!(polys.contains(&mesh.poly_ref(5, 6)));
    }
}
