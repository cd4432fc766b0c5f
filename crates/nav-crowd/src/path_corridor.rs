//! Dynamic polygon corridor for path following
//!
//! A corridor is the polygon sequence an agent is walking, bracketed by its
//! current position on the first polygon and its target on the last. As the
//! agent moves the corridor prunes polygons behind it and absorbs polygons
//! it slid onto, so the expensive planner only runs when the path is truly
//! stale.

use nav_common::vector::{vdist_2d_sqr, vmad, vsub};
use nav_common::Result;

use crate::nav_query::{
    NavQuery, PolyRef, QueryFilter, STRAIGHTPATH_OFFMESH_CONNECTION,
};

/// Corners closer than this (xz distance) to the agent are considered
/// already passed.
const MIN_TARGET_DIST: f32 = 0.01;

/// Maximum polygons visited by a corridor movement query
const MAX_MOVE_VISITED: usize = 16;

/// Maximum polygons inspected by a visibility-optimization raycast
const MAX_OPT_VISITED: usize = 32;

/// How far into the corridor topology optimization looks for a shortcut
const OPT_TOPO_LOOKAHEAD: usize = 32;

/// Node budget for a topology-optimization replan
const OPT_TOPO_MAX_NODES: usize = 32;

/// One steering corner extracted from the corridor
#[derive(Debug, Clone, Copy)]
pub struct Corner {
    /// Corner position
    pub pos: [f32; 3],
    /// `STRAIGHTPATH_*` flag bits
    pub flags: u8,
    /// Polygon entered at this corner
    pub poly: PolyRef,
}

/// Polygon corridor between an agent's position and its target
#[derive(Debug, Clone)]
pub struct PathCorridor {
    pos: [f32; 3],
    target: [f32; 3],
    path: Vec<PolyRef>,
    max_path: usize,
}

/// Splices freshly visited polygons onto the front of a corridor after the
/// position moved.
///
/// The furthest corridor polygon also present in `visited` anchors the
/// merge: everything before it is replaced by the visited sequence in
/// reverse order, so the corridor keeps tracking the surface the agent
/// actually slid across. Leaves `path` untouched when the sequences share
/// no polygon.
pub fn merge_corridor_start_moved(
    path: &mut Vec<PolyRef>,
    max_path: usize,
    visited: &[PolyRef],
) {
    let mut furthest_path = None;
    for i in (0..path.len()).rev() {
        if visited.contains(&path[i]) {
            furthest_path = Some(i);
            break;
        }
    }
    let Some(fp) = furthest_path else {
        return;
    };

    let mut merged: Vec<PolyRef> = visited.iter().rev().copied().collect();
    merged.extend_from_slice(&path[fp + 1..]);
    merged.truncate(max_path);
    *path = merged;
}

/// Extends the back of a corridor after the target moved.
///
/// The earliest corridor polygon also present in `visited` anchors the
/// merge; the corridor is truncated there and continued with the remainder
/// of the visited sequence.
pub fn merge_corridor_end_moved(
    path: &mut Vec<PolyRef>,
    max_path: usize,
    visited: &[PolyRef],
) {
    let mut anchor = None;
    'outer: for (i, p) in path.iter().enumerate() {
        for (j, v) in visited.iter().enumerate().rev() {
            if p == v {
                anchor = Some((i, j));
                break 'outer;
            }
        }
    }
    let Some((fp, fv)) = anchor else {
        return;
    };

    path.truncate(fp + 1);
    for v in &visited[fv + 1..] {
        if path.len() >= max_path {
            break;
        }
        path.push(*v);
    }
}

/// Replaces the front of a corridor with a shortcut found by a raycast.
///
/// The furthest corridor polygon also present in `visited` anchors the
/// merge; the prefix up to it is replaced with the visited prefix leading
/// there, which is the straight-line route.
pub fn merge_corridor_start_shortcut(
    path: &mut Vec<PolyRef>,
    max_path: usize,
    visited: &[PolyRef],
) {
    let mut anchor = None;
    'outer: for i in (0..path.len()).rev() {
        for j in (0..visited.len()).rev() {
            if path[i] == visited[j] {
                anchor = Some((i, j));
                break 'outer;
            }
        }
    }
    let Some((fp, fv)) = anchor else {
        return;
    };
    if fv == 0 {
        return;
    }

    let mut merged: Vec<PolyRef> = visited[..fv].to_vec();
    merged.extend_from_slice(&path[fp..]);
    merged.truncate(max_path);
    *path = merged;
}

impl PathCorridor {
    /// Creates an empty corridor holding at most `max_path` polygons
    pub fn new(max_path: usize) -> Self {
        Self {
            pos: [0.0; 3],
            target: [0.0; 3],
            path: Vec::with_capacity(max_path),
            max_path,
        }
    }

    /// Collapses the corridor to a single polygon at `pos`
    pub fn reset(&mut self, reference: PolyRef, pos: &[f32; 3]) {
        self.pos = *pos;
        self.target = *pos;
        self.path.clear();
        self.path.push(reference);
    }

    /// Extracts up to `max_corners` steering corners ahead of the agent.
    ///
    /// Corners the agent is already standing on are pruned, and the list
    /// is cut after the first off-mesh connection so the caller can react
    /// to it before anything beyond.
    pub fn find_corners(
        &self,
        max_corners: usize,
        nav: &dyn NavQuery,
    ) -> Result<Vec<Corner>> {
        let points =
            nav.find_straight_path(&self.pos, &self.target, &self.path, max_corners)?;

        let mut corners: Vec<Corner> = points
            .iter()
            .map(|p| Corner {
                pos: p.pos,
                flags: p.flags,
                poly: p.poly,
            })
            .collect();

        while let Some(first) = corners.first() {
            if (first.flags & STRAIGHTPATH_OFFMESH_CONNECTION) != 0
                || vdist_2d_sqr(&first.pos, &self.pos) > MIN_TARGET_DIST * MIN_TARGET_DIST
            {
                break;
            }
            corners.remove(0);
        }

        if let Some(i) = corners
            .iter()
            .position(|c| (c.flags & STRAIGHTPATH_OFFMESH_CONNECTION) != 0)
        {
            corners.truncate(i + 1);
        }

        Ok(corners)
    }

    /// Attempts to shorten the corridor front by raycasting toward `next`.
    ///
    /// Inequality in the local steering can make agents cut corners the
    /// planned polygon sequence does not cover; when the ray from the
    /// current position toward the next corner is clear, the corridor is
    /// respliced along it.
    pub fn optimize_path_visibility(
        &mut self,
        next: &[f32; 3],
        path_optimization_range: f32,
        nav: &dyn NavQuery,
        filter: &QueryFilter,
    ) {
        let Some(&first) = self.path.first() else {
            return;
        };
        let dist = vdist_2d_sqr(&self.pos, next).sqrt();
        if dist < 0.01 {
            return;
        }
        let dist = (dist + 0.01).min(path_optimization_range);
        let mut delta = vsub(next, &self.pos);
        delta[1] = 0.0;
        let goal = vmad(&self.pos, &delta, path_optimization_range / dist);

        let Ok(hit) = nav.raycast(first, &self.pos, &goal, filter) else {
            return;
        };
        if hit.visited.len() > 1
            && hit.visited.len() <= MAX_OPT_VISITED
            && (hit.reached_end() || hit.t > 0.99)
        {
            merge_corridor_start_shortcut(&mut self.path, self.max_path, &hit.visited);
        }
    }

    /// Attempts a short bounded replan of the corridor front.
    ///
    /// Looks for the furthest nearby corridor polygon within
    /// `local_range` of the agent and replans just the stretch up to it.
    /// Returns whether the corridor got shorter.
    pub fn optimize_path_topology(
        &mut self,
        local_range: f32,
        nav: &dyn NavQuery,
        filter: &QueryFilter,
    ) -> Result<bool> {
        if self.path.len() < 3 {
            return Ok(false);
        }
        let first = self.path[0];

        let nearby = nav.polygons_around_circle(
            first,
            &self.pos,
            local_range,
            filter,
            OPT_TOPO_LOOKAHEAD,
        )?;

        let lookahead = self.path.len().min(OPT_TOPO_LOOKAHEAD);
        let mut anchor = None;
        for i in (1..lookahead).rev() {
            if nearby.contains(&self.path[i]) {
                anchor = Some(i);
                break;
            }
        }
        let Some(anchor) = anchor else {
            return Ok(false);
        };
        if anchor < 2 {
            return Ok(false);
        }

        let plan = nav.find_path(
            first,
            self.path[anchor],
            &self.pos,
            &self.target,
            filter,
            OPT_TOPO_MAX_NODES,
        )?;
        if plan.status != crate::nav_query::PlanStatus::Complete {
            return Ok(false);
        }
        if plan.polys.len() >= anchor + 1 {
            return Ok(false);
        }

        let mut merged = plan.polys;
        merged.extend_from_slice(&self.path[anchor + 1..]);
        merged.truncate(self.max_path);
        self.path = merged;
        Ok(true)
    }

    /// Moves the corridor position toward `npos`, sliding along walls and
    /// re-anchoring the corridor front on the polygons crossed.
    pub fn move_position(
        &mut self,
        npos: &[f32; 3],
        nav: &dyn NavQuery,
        filter: &QueryFilter,
    ) -> Result<()> {
        let Some(&first) = self.path.first() else {
            return Err(nav_common::Error::InvalidParam("empty corridor"));
        };
        let (result, visited) =
            nav.move_along_surface(first, &self.pos, npos, filter, MAX_MOVE_VISITED)?;
        merge_corridor_start_moved(&mut self.path, self.max_path, &visited);

        self.pos = result;
        if let Some(&front) = self.path.first() {
            if let Ok(h) = nav.poly_height(front, &result) {
                self.pos[1] = h;
            }
        }
        Ok(())
    }

    /// Moves the corridor target toward `npos`, extending the corridor
    /// back over the polygons crossed.
    pub fn move_target_position(
        &mut self,
        npos: &[f32; 3],
        nav: &dyn NavQuery,
        filter: &QueryFilter,
    ) -> Result<()> {
        let Some(&last) = self.path.last() else {
            return Err(nav_common::Error::InvalidParam("empty corridor"));
        };
        let (result, visited) =
            nav.move_along_surface(last, &self.target, npos, filter, MAX_MOVE_VISITED)?;
        merge_corridor_end_moved(&mut self.path, self.max_path, &visited);
        self.target = result;
        Ok(())
    }

    /// Replaces the corridor with a freshly planned path. The first
    /// polygon must be the one the agent stands on.
    pub fn set_corridor(&mut self, target: &[f32; 3], path: &[PolyRef]) {
        self.target = *target;
        self.path.clear();
        self.path.extend_from_slice(&path[..path.len().min(self.max_path)]);
    }

    /// Advances the corridor across an off-mesh connection.
    ///
    /// Polygons up to and including the connection are consumed, the
    /// corridor position jumps to the landing point, and the traversal
    /// endpoints are returned for the caller to animate. Returns `None`
    /// when the connection is not in the corridor or nothing follows it.
    pub fn move_over_offmesh_connection(
        &mut self,
        offmesh_ref: PolyRef,
        nav: &dyn NavQuery,
    ) -> Result<Option<([f32; 3], [f32; 3])>> {
        let Some(idx) = self.path.iter().position(|&p| p == offmesh_ref) else {
            return Ok(None);
        };
        if idx + 1 >= self.path.len() {
            return Ok(None);
        }
        let prev = if idx == 0 {
            PolyRef::NONE
        } else {
            self.path[idx - 1]
        };

        let (start, end) = nav.off_mesh_connection_endpoints(prev, offmesh_ref)?;
        self.path.drain(0..=idx);
        self.pos = end;
        Ok(Some((start, end)))
    }

    /// Checks that the next `look_ahead` corridor polygons still exist
    /// and pass the filter.
    pub fn is_valid(&self, look_ahead: usize, nav: &dyn NavQuery, filter: &QueryFilter) -> bool {
        if self.path.is_empty() {
            return false;
        }
        self.path
            .iter()
            .take(look_ahead)
            .all(|&p| nav.is_valid_poly(p, filter))
    }

    /// Current position on the first corridor polygon
    pub fn pos(&self) -> &[f32; 3] {
        &self.pos
    }

    /// Target position on the last corridor polygon
    pub fn target(&self) -> &[f32; 3] {
        &self.target
    }

    /// The corridor polygon sequence
    pub fn path(&self) -> &[PolyRef] {
        &self.path
    }

    /// Polygon the agent currently stands on
    pub fn first_poly(&self) -> PolyRef {
        self.path.first().copied().unwrap_or(PolyRef::NONE)
    }

    /// Polygon the target lies on
    pub fn last_poly(&self) -> PolyRef {
        self.path.last().copied().unwrap_or(PolyRef::NONE)
    }
}
