//! Cached wall segments around an agent
//!
//! Collision avoidance needs the nearby navigation-mesh walls every tick,
//! but gathering them is a polygon flood fill. The local boundary caches
//! the closest wall segments around a center position and is only
//! refreshed when the agent strays far enough from that center.

use nav_common::math::dist_pt_seg_sqr_2d;
use nav_common::vector::{vdist_2d_sqr, vmad, vsub};
use nav_common::Result;

use crate::nav_query::{NavQuery, PolyRef, QueryFilter};

/// Maximum cached wall segments
pub const MAX_LOCAL_SEGS: usize = 8;
/// Maximum polygons retained from the local flood fill
pub const MAX_LOCAL_POLYS: usize = 16;

/// A cached wall segment with its squared distance from the center
#[derive(Debug, Clone, Copy)]
struct Segment {
    /// Segment endpoints, walkable side on the left of `p -> q`
    p: [f32; 3],
    q: [f32; 3],
    /// Squared distance from the boundary center
    dist_sqr: f32,
}

/// Cached navigation-mesh walls around a center position
#[derive(Debug)]
pub struct LocalBoundary {
    center: [f32; 3],
    segs: [Segment; MAX_LOCAL_SEGS],
    nsegs: usize,
    polys: Vec<PolyRef>,
}

impl Default for LocalBoundary {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBoundary {
    pub fn new() -> Self {
        Self {
            center: [f32::MAX; 3],
            segs: [Segment {
                p: [0.0; 3],
                q: [0.0; 3],
                dist_sqr: 0.0,
            }; MAX_LOCAL_SEGS],
            nsegs: 0,
            polys: Vec::with_capacity(MAX_LOCAL_POLYS),
        }
    }

    /// Invalidates the cache; the next `update` rebuilds it
    pub fn reset(&mut self) {
        self.center = [f32::MAX; 3];
        self.nsegs = 0;
        self.polys.clear();
    }

    /// Rebuilds the cache from the walls of polygons reachable within
    /// `collision_query_range` of `pos`, keeping the closest segments.
    pub fn update(
        &mut self,
        reference: PolyRef,
        pos: &[f32; 3],
        collision_query_range: f32,
        nav: &dyn NavQuery,
        filter: &QueryFilter,
    ) -> Result<()> {
        if !reference.is_valid() {
            self.reset();
            return Ok(());
        }

        self.center = *pos;
        self.nsegs = 0;

        self.polys = nav.polygons_around_circle(
            reference,
            pos,
            collision_query_range,
            filter,
            MAX_LOCAL_POLYS,
        )?;

        let range_sqr = collision_query_range * collision_query_range;
        for i in 0..self.polys.len() {
            let walls = nav.wall_segments(self.polys[i], filter)?;
            for (p, q) in walls {
                let (dist_sqr, _) = dist_pt_seg_sqr_2d(pos, &p, &q);
                if dist_sqr > range_sqr {
                    continue;
                }
                self.add_segment(dist_sqr, &p, &q);
            }
        }
        Ok(())
    }

    /// Checks that the cached polygons are still present and pass the
    /// filter. A stale cache must be rebuilt before it is trusted.
    pub fn is_valid(&self, nav: &dyn NavQuery, filter: &QueryFilter) -> bool {
        if self.polys.is_empty() {
            return false;
        }
        self.polys.iter().all(|&p| nav.is_valid_poly(p, filter))
    }

    /// Center position of the current cache
    pub fn center(&self) -> &[f32; 3] {
        &self.center
    }

    /// Number of cached wall segments
    pub fn segment_count(&self) -> usize {
        self.nsegs
    }

    /// Endpoints of the i-th cached segment
    pub fn segment(&self, i: usize) -> (&[f32; 3], &[f32; 3]) {
        (&self.segs[i].p, &self.segs[i].q)
    }

    /// True when a circle at `pt` with `radius` overlaps a cached wall
    pub fn contains_point(&self, pt: &[f32; 3], radius: f32) -> bool {
        let rad_sqr = radius * radius;
        self.segs[..self.nsegs]
            .iter()
            .any(|s| dist_pt_seg_sqr_2d(pt, &s.p, &s.q).0 < rad_sqr)
    }

    /// Pushes `pt` away from the nearest cached wall it overlaps so that
    /// it clears the wall by `radius`. Points already clear are returned
    /// unchanged.
    pub fn project_point(&self, pt: &[f32; 3], radius: f32) -> [f32; 3] {
        let rad_sqr = radius * radius;
        let mut nearest: Option<(f32, usize, f32)> = None;
        for (i, s) in self.segs[..self.nsegs].iter().enumerate() {
            let (dist_sqr, t) = dist_pt_seg_sqr_2d(pt, &s.p, &s.q);
            if dist_sqr < rad_sqr && nearest.is_none_or(|(d, _, _)| dist_sqr < d) {
                nearest = Some((dist_sqr, i, t));
            }
        }
        let Some((dist_sqr, i, t)) = nearest else {
            return *pt;
        };

        let s = &self.segs[i];
        let closest = vmad(&s.p, &vsub(&s.q, &s.p), t);
        let mut away = vsub(pt, &closest);
        away[1] = 0.0;
        let dist = dist_sqr.sqrt();
        if dist > 1e-4 {
            vmad(&closest, &away, radius / dist)
        } else {
            // Point is on the wall line; push along the wall normal, which
            // points away from the walkable side's far edge.
            let d = vsub(&s.q, &s.p);
            let mut n = [d[2], 0.0, -d[0]];
            nav_common::vector::vnormalize(&mut n);
            vmad(&closest, &n, -radius)
        }
    }

    fn add_segment(&mut self, dist_sqr: f32, p: &[f32; 3], q: &[f32; 3]) {
        let seg = Segment {
            p: *p,
            q: *q,
            dist_sqr,
        };
        // Insert sorted by distance; the furthest segment falls off when
        // the array is full.
        let pos = self.segs[..self.nsegs]
            .iter()
            .position(|s| dist_sqr <= s.dist_sqr)
            .unwrap_or(self.nsegs);
        if pos >= MAX_LOCAL_SEGS {
            return;
        }
        let end = (self.nsegs + 1).min(MAX_LOCAL_SEGS);
        self.segs.copy_within(pos..end - 1, pos + 1);
        self.segs[pos] = seg;
        self.nsegs = end;
    }

    /// True when `pos` has drifted more than a quarter of the query range
    /// from the cached center
    pub fn needs_update(&self, pos: &[f32; 3], collision_query_range: f32) -> bool {
        let limit = collision_query_range * 0.25;
        vdist_2d_sqr(pos, &self.center) > limit * limit
    }
}
