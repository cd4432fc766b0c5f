//! Navigation-mesh query interface consumed by the crowd
//!
//! The crowd does not own or understand navigation-mesh data. Everything it
//! needs from the mesh goes through the [`NavQuery`] trait: nearest-polygon
//! lookup, path planning, straight-path projection, raycasts, and
//! surface-constrained movement. A navmesh implementation provides these;
//! the crowd only holds opaque [`PolyRef`] handles.

use nav_common::Result;

/// Opaque reference to a single navigation-mesh polygon.
///
/// The zero value is reserved as "no polygon".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PolyRef(u64);

impl PolyRef {
    /// The reserved "no polygon" reference
    pub const NONE: PolyRef = PolyRef(0);

    /// Creates a polygon reference from a raw id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns true unless this is the reserved null reference
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Raw id of the reference
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Polygon filter applied by every navigation query.
///
/// A polygon passes when it shares at least one include flag and no
/// exclude flag.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryFilter {
    /// Flags a polygon must share at least one of
    pub include_flags: u16,
    /// Flags that disqualify a polygon
    pub exclude_flags: u16,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            include_flags: 0xffff,
            exclude_flags: 0,
        }
    }
}

impl QueryFilter {
    /// Evaluates the filter against a polygon's flag set
    pub fn passes(&self, poly_flags: u16) -> bool {
        (poly_flags & self.include_flags) != 0 && (poly_flags & self.exclude_flags) == 0
    }
}

/// The straight-path point is the start of the path
pub const STRAIGHTPATH_START: u8 = 0x01;
/// The straight-path point is the end of the path
pub const STRAIGHTPATH_END: u8 = 0x02;
/// The straight-path point enters an off-mesh connection
pub const STRAIGHTPATH_OFFMESH_CONNECTION: u8 = 0x04;

/// One waypoint produced by [`NavQuery::find_straight_path`]
#[derive(Debug, Clone, Copy)]
pub struct StraightPathPoint {
    /// Waypoint position
    pub pos: [f32; 3],
    /// `STRAIGHTPATH_*` flag bits
    pub flags: u8,
    /// Polygon being entered at this point
    pub poly: PolyRef,
}

/// Outcome of a (possibly budget-bounded) path search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    /// The path reaches the requested end polygon
    Complete,
    /// The search ended without reaching the end polygon; the returned
    /// path leads toward the closest polygon visited
    Partial,
    /// The node budget ran out before the search ended; retry with a
    /// larger budget
    InProgress,
}

/// A planned polygon sequence
#[derive(Debug, Clone)]
pub struct PathPlan {
    /// Completion state of the search
    pub status: PlanStatus,
    /// Polygon sequence from start toward the end
    pub polys: Vec<PolyRef>,
}

/// Result of [`NavQuery::raycast`]
#[derive(Debug, Clone)]
pub struct RaycastHit {
    /// Fraction along the segment where a wall was hit;
    /// `f32::MAX` when the end was reached unobstructed
    pub t: f32,
    /// Polygons visited along the ray, starting polygon first
    pub visited: Vec<PolyRef>,
}

impl RaycastHit {
    /// True when the ray reached its end without hitting a wall
    pub fn reached_end(&self) -> bool {
        self.t == f32::MAX
    }
}

/// Navigation-mesh query service consumed by the crowd.
///
/// Implementations are expected to be cheap to call and free of interior
/// blocking; path searches take an explicit node budget and report
/// [`PlanStatus::InProgress`] when it runs out.
///
/// Wall segments returned by [`wall_segments`](NavQuery::wall_segments)
/// must be wound so the walkable surface lies to the left of `p -> q`.
pub trait NavQuery {
    /// Finds the polygon nearest to `center` within the search box, and
    /// the point on it closest to `center`. Fails when no polygon passes
    /// the filter inside the box.
    fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<(PolyRef, [f32; 3])>;

    /// Plans a polygon path from `start` to `end`, visiting at most
    /// `max_nodes` search nodes. Fails with `PathNotFound` when the
    /// destination is provably unreachable.
    fn find_path(
        &self,
        start: PolyRef,
        end: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_nodes: usize,
    ) -> Result<PathPlan>;

    /// Projects a straight path from `start_pos` to `end_pos` constrained
    /// to the given polygon sequence, returning at most `max_points`
    /// waypoints.
    fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>>;

    /// Casts a walkability ray along the surface from `from` toward `to`.
    fn raycast(
        &self,
        start: PolyRef,
        from: &[f32; 3],
        to: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<RaycastHit>;

    /// Moves a point from `from` toward `to` constrained to the mesh
    /// surface, sliding along walls. Returns the resulting point and the
    /// polygons traversed (starting polygon first, at most `max_visited`).
    fn move_along_surface(
        &self,
        start: PolyRef,
        from: &[f32; 3],
        to: &[f32; 3],
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<([f32; 3], Vec<PolyRef>)>;

    /// Collects polygons reachable from `start` whose area intersects the
    /// circle at `center` with `radius`, up to `max_polys`.
    fn polygons_around_circle(
        &self,
        start: PolyRef,
        center: &[f32; 3],
        radius: f32,
        filter: &QueryFilter,
        max_polys: usize,
    ) -> Result<Vec<PolyRef>>;

    /// Height of the polygon surface at the given xz position
    fn poly_height(&self, poly: PolyRef, pos: &[f32; 3]) -> Result<f32>;

    /// True when the polygon exists and passes the filter
    fn is_valid_poly(&self, poly: PolyRef, filter: &QueryFilter) -> bool;

    /// Boundary edges of a polygon: edges with no traversable neighbor,
    /// wound with the walkable surface on the left of `p -> q`.
    fn wall_segments(&self, poly: PolyRef, filter: &QueryFilter)
        -> Result<Vec<([f32; 3], [f32; 3])>>;

    /// Entry and exit points of an off-mesh connection polygon, oriented
    /// for travel arriving from `prev`.
    fn off_mesh_connection_endpoints(
        &self,
        prev: PolyRef,
        poly: PolyRef,
    ) -> Result<([f32; 3], [f32; 3])>;
}
