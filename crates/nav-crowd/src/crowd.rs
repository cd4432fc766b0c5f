//! Crowd manager: fixed agent pool and the per-tick update pipeline
//!
//! The crowd owns a fixed pool of agents and drives them toward their
//! individually requested targets. One `update` tick advances queued path
//! searches under a node budget, resolves move-request state machines,
//! rebuilds the proximity grid, steers every agent along its corridor,
//! samples collision-free velocities, integrates, and finally separates
//! overlapping agents. Navigation-mesh access goes exclusively through
//! the [`NavQuery`] trait.

use nav_common::vector::{
    vadd, vdist_2d, vdist_2d_sqr, vlen, vlen_2d, vlerp, vmad, vnormalize, vscale, vsub,
};
use nav_common::{Error, Result};

use crate::local_boundary::LocalBoundary;
use crate::nav_query::{
    NavQuery, PlanStatus, PolyRef, QueryFilter, STRAIGHTPATH_END,
    STRAIGHTPATH_OFFMESH_CONNECTION,
};
use crate::obstacle_avoidance::{
    ObstacleAvoidanceDebugData, ObstacleAvoidanceParams, ObstacleAvoidanceQuery,
};
use crate::path_corridor::{Corner, PathCorridor};
use crate::path_queue::{PathQueue, PathQueueRef, QueryStatus, PATHQ_INVALID};
use crate::proximity_grid::ProximityGrid;

/// Number of configurable obstacle-avoidance profiles
pub const MAX_AVOIDANCE_PROFILES: usize = 8;
/// Number of configurable query filters
pub const MAX_QUERY_FILTERS: usize = 16;

/// Corner cache size per agent
const MAX_CORNERS: usize = 4;
/// Neighbor cache size per agent
const MAX_NEIGHBORS: usize = 6;
/// Search-node budget spent on queued paths per update
const MAX_ITERS_PER_UPDATE: usize = 100;
/// Maximum polygons in a collected path result
const MAX_PATH_RESULT: usize = 256;
/// Corridor polygons checked for validity each tick
const CHECK_LOOKAHEAD: usize = 10;
/// Seconds between forced replans of a suspicious target
const TARGET_REPLAN_DELAY: f32 = 1.0;
/// Accumulated time before an agent is considered for topology optimization
const OPT_TIME_THR: f32 = 0.5;
/// Topology optimizations attempted per update
const OPT_MAX_AGENTS: usize = 10;
/// Node budget of the synchronous quick path search
const QUICK_SEARCH_NODES: usize = 20;
/// Off-mesh connections trigger within radius times this factor
const OFFMESH_TRIGGER_SCALE: f32 = 2.25;
/// Upper bound on ids returned by one grid query
const MAX_GRID_RESULTS: usize = 32;

/// Simulation state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Not on the navigation mesh
    Invalid,
    /// Moving on the mesh surface
    Walking,
    /// Traversing an off-mesh connection
    OffMesh,
}

/// Progress of an agent's move request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// No target
    None,
    /// The path request failed
    Failed,
    /// A corridor to the target is in place
    Valid,
    /// A quick synchronous search runs next tick
    Requesting,
    /// Waiting for a free path-queue slot
    WaitingForQueue,
    /// Waiting for the queued search to finish
    WaitingForPath,
    /// Steering by raw velocity, no pathfinding
    Velocity,
}

/// Per-agent behavior toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct UpdateFlags(pub u8);

impl UpdateFlags {
    /// Blend steering across the next two corners
    pub const ANTICIPATE_TURNS: UpdateFlags = UpdateFlags(1);
    /// Run sampling-based obstacle avoidance
    pub const OBSTACLE_AVOIDANCE: UpdateFlags = UpdateFlags(2);
    /// Apply neighbor separation to the desired velocity
    pub const SEPARATION: UpdateFlags = UpdateFlags(4);
    /// Shorten the corridor with visibility raycasts
    pub const OPTIMIZE_VIS: UpdateFlags = UpdateFlags(8);
    /// Periodically replan the corridor front
    pub const OPTIMIZE_TOPO: UpdateFlags = UpdateFlags(16);

    pub fn contains(&self, other: UpdateFlags) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl Default for UpdateFlags {
    fn default() -> Self {
        UpdateFlags(
            Self::ANTICIPATE_TURNS.0 | Self::OBSTACLE_AVOIDANCE.0 | Self::SEPARATION.0,
        )
    }
}

impl std::ops::BitOr for UpdateFlags {
    type Output = UpdateFlags;

    fn bitor(self, rhs: UpdateFlags) -> UpdateFlags {
        UpdateFlags(self.0 | rhs.0)
    }
}

/// Tunable parameters of one agent
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentParams {
    /// Agent radius
    pub radius: f32,
    /// Agent height
    pub height: f32,
    /// Maximum allowed acceleration
    pub max_acceleration: f32,
    /// Maximum allowed speed
    pub max_speed: f32,
    /// How far around the agent collisions are considered
    pub collision_query_range: f32,
    /// How far ahead the corridor is re-shortened
    pub path_optimization_range: f32,
    /// Strength of the neighbor separation force
    pub separation_weight: f32,
    /// Behavior toggles
    pub update_flags: UpdateFlags,
    /// Index into the crowd's avoidance profiles
    pub obstacle_avoidance_type: u8,
    /// Index into the crowd's query filters
    pub query_filter_type: u8,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            radius: 0.6,
            height: 2.0,
            max_acceleration: 8.0,
            max_speed: 3.5,
            collision_query_range: 12.0,
            path_optimization_range: 30.0,
            separation_weight: 2.0,
            update_flags: UpdateFlags::default(),
            obstacle_avoidance_type: 0,
            query_filter_type: 0,
        }
    }
}

/// A cached nearby agent
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    /// Pool index of the neighbor
    pub idx: usize,
    /// Squared planar distance to the neighbor
    pub dist_sqr: f32,
}

/// Interpolated traversal of an off-mesh connection
#[derive(Debug, Clone, Copy, Default)]
struct OffMeshAnimation {
    active: bool,
    init_pos: [f32; 3],
    start_pos: [f32; 3],
    end_pos: [f32; 3],
    t: f32,
    t_max: f32,
}

/// One agent in the crowd pool
#[derive(Debug)]
pub struct Agent {
    active: bool,
    state: AgentState,
    /// The current corridor leads only partway to the target
    partial: bool,
    corridor: PathCorridor,
    boundary: LocalBoundary,
    topology_opt_time: f32,
    neighbors: Vec<Neighbor>,
    corners: Vec<Corner>,
    desired_speed: f32,
    pos: [f32; 3],
    /// Accumulated separation displacement for the current tick
    disp: [f32; 3],
    dvel: [f32; 3],
    nvel: [f32; 3],
    vel: [f32; 3],
    params: AgentParams,
    target_state: TargetState,
    target_ref: PolyRef,
    target_pos: [f32; 3],
    target_path_queue_ref: PathQueueRef,
    target_replan: bool,
    target_replan_time: f32,
    anim: OffMeshAnimation,
}

impl Agent {
    fn new() -> Self {
        Self {
            active: false,
            state: AgentState::Invalid,
            partial: false,
            corridor: PathCorridor::new(MAX_PATH_RESULT),
            boundary: LocalBoundary::new(),
            topology_opt_time: 0.0,
            neighbors: Vec::with_capacity(MAX_NEIGHBORS),
            corners: Vec::with_capacity(MAX_CORNERS),
            desired_speed: 0.0,
            pos: [0.0; 3],
            disp: [0.0; 3],
            dvel: [0.0; 3],
            nvel: [0.0; 3],
            vel: [0.0; 3],
            params: AgentParams::default(),
            target_state: TargetState::None,
            target_ref: PolyRef::NONE,
            target_pos: [0.0; 3],
            target_path_queue_ref: PATHQ_INVALID,
            target_replan: false,
            target_replan_time: 0.0,
            anim: OffMeshAnimation::default(),
        }
    }

    /// Whether the pool slot is in use
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Simulation state
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Move-request state
    pub fn target_state(&self) -> TargetState {
        self.target_state
    }

    /// Current position
    pub fn position(&self) -> &[f32; 3] {
        &self.pos
    }

    /// Velocity after integration
    pub fn velocity(&self) -> &[f32; 3] {
        &self.vel
    }

    /// Velocity the steering asked for, before avoidance
    pub fn desired_velocity(&self) -> &[f32; 3] {
        &self.dvel
    }

    /// Current parameters
    pub fn params(&self) -> &AgentParams {
        &self.params
    }

    /// Requested target position (or raw velocity in velocity mode)
    pub fn target_position(&self) -> &[f32; 3] {
        &self.target_pos
    }

    /// Cached steering corners from the last update
    pub fn corners(&self) -> &[Corner] {
        &self.corners
    }

    /// Cached neighbors from the last update
    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    /// The corridor only reaches partway to the requested target
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// The current request was raised automatically after the previous
    /// path went stale, rather than by a caller
    pub fn is_replanning(&self) -> bool {
        self.target_replan
    }

    /// Polygon corridor the agent is following
    pub fn corridor(&self) -> &PathCorridor {
        &self.corridor
    }

    /// Planar distance to the corridor end, saturating at `range` unless
    /// the last cached corner is the final target.
    fn distance_to_goal(&self, range: f32) -> f32 {
        let Some(last) = self.corners.last() else {
            return range;
        };
        if (last.flags & STRAIGHTPATH_END) == 0 {
            return range;
        }
        vdist_2d(&self.pos, &last.pos).min(range)
    }
}

/// Aggregate counters reported by [`Crowd::statistics`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CrowdStatistics {
    /// Agents currently in the pool
    pub active_agents: usize,
    /// Occupied path-queue slots
    pub queue_size: usize,
    /// Path requests still being searched
    pub pending_requests: usize,
    /// Finished path requests awaiting collection
    pub completed_requests: usize,
}

/// Crowd manager over a fixed agent pool
pub struct Crowd<'nav> {
    nav: &'nav dyn NavQuery,
    max_agents: usize,
    agents: Vec<Agent>,
    path_queue: PathQueue,
    grid: ProximityGrid,
    obstacle_query: ObstacleAvoidanceQuery,
    avoidance_params: [ObstacleAvoidanceParams; MAX_AVOIDANCE_PROFILES],
    filters: [QueryFilter; MAX_QUERY_FILTERS],
    query_half_extents: [f32; 3],
}

impl<'nav> Crowd<'nav> {
    /// Creates a crowd of at most `max_agents` agents no larger than
    /// `max_agent_radius`.
    pub fn new(
        nav: &'nav dyn NavQuery,
        max_agents: usize,
        max_agent_radius: f32,
    ) -> Result<Self> {
        if max_agents == 0 {
            return Err(Error::InvalidParam("max_agents must be positive"));
        }
        if max_agent_radius <= 0.0 {
            return Err(Error::InvalidParam("max_agent_radius must be positive"));
        }

        Ok(Self {
            nav,
            max_agents,
            agents: (0..max_agents).map(|_| Agent::new()).collect(),
            path_queue: PathQueue::new(MAX_PATH_RESULT),
            // Larger cells make fewer, longer chains; each agent box spans
            // about one cell at three radii.
            grid: ProximityGrid::new(max_agents * 4, max_agent_radius * 3.0),
            obstacle_query: ObstacleAvoidanceQuery::new(),
            avoidance_params: [ObstacleAvoidanceParams::default(); MAX_AVOIDANCE_PROFILES],
            filters: std::array::from_fn(|_| QueryFilter::default()),
            query_half_extents: [
                max_agent_radius * 2.0,
                max_agent_radius * 1.5,
                max_agent_radius * 2.0,
            ],
        })
    }

    /// Capacity of the agent pool
    pub fn agent_capacity(&self) -> usize {
        self.max_agents
    }

    /// Search box used when snapping positions to the mesh
    pub fn query_half_extents(&self) -> &[f32; 3] {
        &self.query_half_extents
    }

    /// The agent at `idx`, if the slot is in use
    pub fn get_agent(&self, idx: usize) -> Option<&Agent> {
        self.agents.get(idx).filter(|a| a.active)
    }

    /// One of the shared avoidance profiles
    pub fn obstacle_avoidance_params(&self, idx: usize) -> Result<&ObstacleAvoidanceParams> {
        self.avoidance_params
            .get(idx)
            .ok_or(Error::InvalidParam("avoidance profile index"))
    }

    /// Replaces one of the shared avoidance profiles
    pub fn set_obstacle_avoidance_params(
        &mut self,
        idx: usize,
        params: &ObstacleAvoidanceParams,
    ) -> Result<()> {
        *self
            .avoidance_params
            .get_mut(idx)
            .ok_or(Error::InvalidParam("avoidance profile index"))? = *params;
        Ok(())
    }

    /// One of the shared query filters
    pub fn filter(&self, idx: usize) -> Result<&QueryFilter> {
        self.filters
            .get(idx)
            .ok_or(Error::InvalidParam("query filter index"))
    }

    /// Replaces one of the shared query filters
    pub fn set_filter(&mut self, idx: usize, filter: &QueryFilter) -> Result<()> {
        *self
            .filters
            .get_mut(idx)
            .ok_or(Error::InvalidParam("query filter index"))? = filter.clone();
        Ok(())
    }

    fn validate_params(&self, params: &AgentParams) -> Result<()> {
        if params.radius <= 0.0 || params.height <= 0.0 {
            return Err(Error::InvalidParam("agent radius and height must be positive"));
        }
        if params.max_speed < 0.0 || params.max_acceleration < 0.0 {
            return Err(Error::InvalidParam("agent speed limits must be non-negative"));
        }
        if params.collision_query_range <= 0.0 {
            return Err(Error::InvalidParam("collision_query_range must be positive"));
        }
        if (params.obstacle_avoidance_type as usize) >= MAX_AVOIDANCE_PROFILES {
            return Err(Error::InvalidParam("avoidance profile index"));
        }
        if (params.query_filter_type as usize) >= MAX_QUERY_FILTERS {
            return Err(Error::InvalidParam("query filter index"));
        }
        Ok(())
    }

    /// Adds an agent at `pos`, returning its stable pool index. An agent
    /// that cannot be snapped to the mesh is added in the `Invalid` state
    /// and sits out the simulation; remove and re-add it to try again.
    pub fn add_agent(&mut self, pos: &[f32; 3], params: &AgentParams) -> Result<usize> {
        self.validate_params(params)?;
        let idx = self
            .agents
            .iter()
            .position(|a| !a.active)
            .ok_or(Error::OutOfCapacity("agent pool"))?;

        let filter = self.filters[params.query_filter_type as usize].clone();
        let nearest = self
            .nav
            .find_nearest_poly(pos, &self.query_half_extents, &filter);

        let ag = &mut self.agents[idx];
        *ag = Agent::new();
        ag.active = true;
        ag.params = *params;

        match nearest {
            Ok((reference, nearest_pos)) if reference.is_valid() => {
                ag.corridor.reset(reference, &nearest_pos);
                ag.pos = nearest_pos;
                ag.state = AgentState::Walking;
            }
            _ => {
                ag.corridor.reset(PolyRef::NONE, pos);
                ag.pos = *pos;
                ag.state = AgentState::Invalid;
            }
        }
        ag.boundary.reset();
        Ok(idx)
    }

    /// Removes the agent at `idx`, cancelling any outstanding path request
    pub fn remove_agent(&mut self, idx: usize) -> Result<()> {
        let ag = self
            .agents
            .get_mut(idx)
            .ok_or(Error::InvalidParam("agent index"))?;
        if ag.target_path_queue_ref != PATHQ_INVALID {
            self.path_queue.cancel(ag.target_path_queue_ref);
        }
        ag.active = false;
        Ok(())
    }

    /// Replaces the parameters of an active agent
    pub fn update_agent_parameters(&mut self, idx: usize, params: &AgentParams) -> Result<()> {
        self.validate_params(params)?;
        let ag = self.active_agent_mut(idx)?;
        ag.params = *params;
        Ok(())
    }

    /// Requests that an agent move to `pos` on polygon `reference`.
    /// Pathfinding is asynchronous; track progress via
    /// [`Agent::target_state`].
    pub fn request_move_target(
        &mut self,
        idx: usize,
        reference: PolyRef,
        pos: &[f32; 3],
    ) -> Result<()> {
        if !reference.is_valid() {
            return Err(Error::InvalidParam("target polygon reference"));
        }
        let queue = &mut self.path_queue;
        let ag = self
            .agents
            .get_mut(idx)
            .filter(|a| a.active)
            .ok_or(Error::InvalidParam("agent index"))?;

        if ag.target_path_queue_ref != PATHQ_INVALID {
            queue.cancel(ag.target_path_queue_ref);
            ag.target_path_queue_ref = PATHQ_INVALID;
        }
        ag.target_ref = reference;
        ag.target_pos = *pos;
        ag.target_replan = false;
        ag.target_state = TargetState::Requesting;
        Ok(())
    }

    /// Requests that an agent steer by raw velocity, bypassing pathfinding
    pub fn request_move_velocity(&mut self, idx: usize, vel: &[f32; 3]) -> Result<()> {
        let queue = &mut self.path_queue;
        let ag = self
            .agents
            .get_mut(idx)
            .filter(|a| a.active)
            .ok_or(Error::InvalidParam("agent index"))?;

        if ag.target_path_queue_ref != PATHQ_INVALID {
            queue.cancel(ag.target_path_queue_ref);
            ag.target_path_queue_ref = PATHQ_INVALID;
        }
        ag.target_ref = PolyRef::NONE;
        // Velocity mode reuses the target slot for the requested velocity.
        ag.target_pos = *vel;
        ag.target_replan = false;
        ag.target_state = TargetState::Velocity;
        Ok(())
    }

    /// Cancels an agent's move request and brings it to a stop
    pub fn reset_move_target(&mut self, idx: usize) -> Result<()> {
        let queue = &mut self.path_queue;
        let ag = self
            .agents
            .get_mut(idx)
            .filter(|a| a.active)
            .ok_or(Error::InvalidParam("agent index"))?;

        if ag.target_path_queue_ref != PATHQ_INVALID {
            queue.cancel(ag.target_path_queue_ref);
            ag.target_path_queue_ref = PATHQ_INVALID;
        }
        ag.target_ref = PolyRef::NONE;
        ag.target_pos = [0.0; 3];
        ag.dvel = [0.0; 3];
        ag.target_replan = false;
        ag.target_state = TargetState::None;
        Ok(())
    }

    /// Aggregate counters for monitoring
    pub fn statistics(&self) -> CrowdStatistics {
        CrowdStatistics {
            active_agents: self.agents.iter().filter(|a| a.active).count(),
            queue_size: self.path_queue.size(),
            pending_requests: self.path_queue.pending_count(),
            completed_requests: self.path_queue.completed_count(),
        }
    }

    fn active_agent_mut(&mut self, idx: usize) -> Result<&mut Agent> {
        self.agents
            .get_mut(idx)
            .filter(|a| a.active)
            .ok_or(Error::InvalidParam("agent index"))
    }

    fn agent_filter(&self, idx: usize) -> QueryFilter {
        self.filters[self.agents[idx].params.query_filter_type as usize].clone()
    }

    /// Flags an agent for a fresh path request, keeping its current target
    fn request_replan(&mut self, idx: usize) {
        let queue = &mut self.path_queue;
        let ag = &mut self.agents[idx];
        if ag.target_path_queue_ref != PATHQ_INVALID {
            queue.cancel(ag.target_path_queue_ref);
            ag.target_path_queue_ref = PATHQ_INVALID;
        }
        ag.target_replan = true;
        ag.target_replan_time = 0.0;
        ag.target_state = TargetState::Requesting;
        log::debug!("agent {idx} replanning to target {:?}", ag.target_ref);
    }

    /// Advances one simulation tick. With `dt == 0` the planner phases
    /// still run but no agent moves, so the call is observationally
    /// idempotent on positions. `debug`, when given, captures the
    /// avoidance samples of the last avoidance-enabled agent processed.
    pub fn update(
        &mut self,
        dt: f32,
        mut debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> Result<()> {
        if dt < 0.0 {
            return Err(Error::InvalidParam("dt must be non-negative"));
        }

        self.path_queue.update(MAX_ITERS_PER_UPDATE, self.nav);
        self.check_path_validity(dt);
        self.update_move_requests();
        self.update_topology_optimization(dt);
        self.rebuild_grid();
        self.update_neighbors_and_boundaries();
        self.update_corners_and_triggers();
        self.calculate_steering();
        self.plan_velocities(&mut debug);

        if dt > 0.0 {
            self.integrate(dt);
            self.resolve_overlaps();
            self.move_along_corridors();
            self.update_offmesh_animations(dt);
        }
        Ok(())
    }

    /// Re-snaps agents whose footing or target polygon disappeared and
    /// schedules replans for stale corridors.
    fn check_path_validity(&mut self, dt: f32) {
        let nav = self.nav;
        for idx in 0..self.max_agents {
            if !self.agents[idx].active || self.agents[idx].state != AgentState::Walking {
                continue;
            }
            if matches!(
                self.agents[idx].target_state,
                TargetState::None | TargetState::Velocity
            ) {
                continue;
            }

            let filter = self.agent_filter(idx);
            self.agents[idx].target_replan_time += dt;
            let mut replan = false;

            // The polygon under the agent may have been removed.
            let first = self.agents[idx].corridor.first_poly();
            if !nav.is_valid_poly(first, &filter) {
                let pos = self.agents[idx].pos;
                match nav.find_nearest_poly(&pos, &self.query_half_extents, &filter) {
                    Ok((reference, nearest)) if reference.is_valid() => {
                        let ag = &mut self.agents[idx];
                        ag.corridor.reset(reference, &nearest);
                        ag.pos = nearest;
                        ag.boundary.reset();
                        ag.partial = false;
                        replan = true;
                    }
                    _ => {
                        // Nowhere to stand; the agent leaves the simulation
                        // until the mesh allows it back.
                        let ag = &mut self.agents[idx];
                        ag.corridor.reset(PolyRef::NONE, &ag.pos);
                        ag.boundary.reset();
                        ag.state = AgentState::Invalid;
                        continue;
                    }
                }
            }

            // The target polygon may have been removed.
            let target_ref = self.agents[idx].target_ref;
            if !nav.is_valid_poly(target_ref, &filter) {
                let target_pos = self.agents[idx].target_pos;
                match nav.find_nearest_poly(&target_pos, &self.query_half_extents, &filter) {
                    Ok((reference, nearest)) if reference.is_valid() => {
                        let ag = &mut self.agents[idx];
                        ag.target_ref = reference;
                        ag.target_pos = nearest;
                        replan = true;
                    }
                    _ => {
                        let ag = &mut self.agents[idx];
                        let first = ag.corridor.first_poly();
                        let pos = ag.pos;
                        ag.corridor.reset(first, &pos);
                        ag.partial = false;
                        ag.target_state = TargetState::None;
                        continue;
                    }
                }
            }

            if !self.agents[idx].corridor.is_valid(CHECK_LOOKAHEAD, nav, &filter) {
                replan = true;
            }

            // A short corridor that ends short of the target means an old
            // partial result; retry once in a while.
            let ag = &self.agents[idx];
            if ag.target_state == TargetState::Valid
                && ag.target_replan_time > TARGET_REPLAN_DELAY
                && ag.corridor.path().len() < CHECK_LOOKAHEAD
                && ag.corridor.last_poly() != ag.target_ref
            {
                replan = true;
            }

            if replan && self.agents[idx].target_state != TargetState::None {
                self.request_replan(idx);
            }
        }
    }

    /// Drives the move-request state machine of every agent
    fn update_move_requests(&mut self) {
        let nav = self.nav;
        for idx in 0..self.max_agents {
            if !self.agents[idx].active || self.agents[idx].state == AgentState::Invalid {
                continue;
            }

            if self.agents[idx].target_state == TargetState::Requesting {
                let filter = self.agent_filter(idx);
                let ag = &self.agents[idx];
                let first = ag.corridor.first_poly();
                let plan = nav.find_path(
                    first,
                    ag.target_ref,
                    ag.corridor.pos(),
                    &ag.target_pos,
                    &filter,
                    QUICK_SEARCH_NODES,
                );
                let ag = &mut self.agents[idx];
                match plan {
                    Ok(plan) if plan.status == PlanStatus::Complete && !plan.polys.is_empty() => {
                        let target_pos = ag.target_pos;
                        ag.corridor.set_corridor(&target_pos, &plan.polys);
                        ag.boundary.reset();
                        ag.partial = false;
                        ag.target_state = TargetState::Valid;
                        ag.target_replan_time = 0.0;
                    }
                    Ok(_) => {
                        ag.target_state = TargetState::WaitingForQueue;
                    }
                    Err(e) => {
                        log::debug!("agent {idx} quick path search failed: {e}");
                        ag.target_state = TargetState::Failed;
                    }
                }
            }

            if self.agents[idx].target_state == TargetState::WaitingForQueue {
                let filter = self.agent_filter(idx);
                let ag = &self.agents[idx];
                let request = self.path_queue.request(
                    ag.corridor.first_poly(),
                    ag.target_ref,
                    ag.corridor.pos(),
                    &ag.target_pos,
                    &filter,
                );
                if let Ok(reference) = request {
                    let ag = &mut self.agents[idx];
                    ag.target_path_queue_ref = reference;
                    ag.target_state = TargetState::WaitingForPath;
                }
                // Queue full: stay and retry next tick.
            }

            if self.agents[idx].target_state == TargetState::WaitingForPath {
                self.collect_path_result(idx);
            }
        }
    }

    fn collect_path_result(&mut self, idx: usize) {
        let reference = self.agents[idx].target_path_queue_ref;
        let status = match self.path_queue.get_request_status(reference) {
            Ok(status) => status,
            Err(_) => {
                // The result expired before collection; ask again.
                self.request_replan(idx);
                return;
            }
        };

        match status {
            QueryStatus::InProgress => {}
            QueryStatus::Failure => {
                let ag = &mut self.agents[idx];
                ag.target_path_queue_ref = PATHQ_INVALID;
                ag.target_state = TargetState::Failed;
                self.path_queue.cancel(reference);
            }
            QueryStatus::Success | QueryStatus::PartialResult => {
                let collected = self.path_queue.get_path_result(reference, MAX_PATH_RESULT);
                let drifted = {
                    let ag = &mut self.agents[idx];
                    ag.target_path_queue_ref = PATHQ_INVALID;
                    match collected {
                        Ok((status, path)) if !path.is_empty() => {
                            if path[0] == ag.corridor.first_poly() {
                                let target_pos = ag.target_pos;
                                ag.partial = status == QueryStatus::PartialResult;
                                ag.corridor.set_corridor(&target_pos, &path);
                                ag.boundary.reset();
                                ag.target_state = TargetState::Valid;
                                ag.target_replan_time = 0.0;
                                false
                            } else {
                                // The agent drifted off the polygon the
                                // search started from; the result no
                                // longer applies.
                                true
                            }
                        }
                        _ => {
                            ag.target_state = TargetState::Failed;
                            false
                        }
                    }
                };
                if drifted {
                    self.request_replan(idx);
                }
            }
        }
    }

    /// Spends the per-tick replan budget on the most starved agents
    fn update_topology_optimization(&mut self, dt: f32) {
        let nav = self.nav;
        let mut queue: Vec<(usize, f32)> = Vec::new();
        for idx in 0..self.max_agents {
            let ag = &mut self.agents[idx];
            if !ag.active
                || ag.state != AgentState::Walking
                || matches!(ag.target_state, TargetState::None | TargetState::Velocity)
                || !ag.params.update_flags.contains(UpdateFlags::OPTIMIZE_TOPO)
            {
                continue;
            }
            ag.topology_opt_time += dt;
            if ag.topology_opt_time >= OPT_TIME_THR {
                queue.push((idx, ag.topology_opt_time));
            }
        }
        queue.sort_by(|a, b| b.1.total_cmp(&a.1));

        for &(idx, _) in queue.iter().take(OPT_MAX_AGENTS) {
            let filter = self.agent_filter(idx);
            let range = self.agents[idx].params.path_optimization_range;
            let ag = &mut self.agents[idx];
            ag.topology_opt_time = 0.0;
            if let Err(e) = ag.corridor.optimize_path_topology(range, nav, &filter) {
                log::warn!("agent {idx} topology optimization failed: {e}");
            }
        }
    }

    fn rebuild_grid(&mut self) {
        self.grid.clear();
        for (idx, ag) in self.agents.iter().enumerate() {
            if !ag.active {
                continue;
            }
            let r = ag.params.radius;
            self.grid.add(
                idx as u16,
                ag.pos[0] - r,
                ag.pos[2] - r,
                ag.pos[0] + r,
                ag.pos[2] + r,
            );
        }
    }

    fn update_neighbors_and_boundaries(&mut self) {
        let nav = self.nav;
        for idx in 0..self.max_agents {
            if !self.agents[idx].active || self.agents[idx].state != AgentState::Walking {
                continue;
            }

            let neighbors = {
                let ag = &self.agents[idx];
                let range = ag.params.collision_query_range;
                let mut ids = [0u16; MAX_GRID_RESULTS];
                let n = self.grid.query_circle(ag.pos[0], ag.pos[2], range, &mut ids);

                let mut result: Vec<Neighbor> = Vec::with_capacity(MAX_NEIGHBORS);
                for &id in &ids[..n] {
                    let j = id as usize;
                    if j == idx || !self.agents[j].active {
                        continue;
                    }
                    let other = &self.agents[j];
                    let diff = vsub(&other.pos, &ag.pos);
                    if diff[1].abs() >= (ag.params.height + other.params.height) * 0.5 {
                        continue;
                    }
                    let dist_sqr = vdist_2d_sqr(&ag.pos, &other.pos);
                    if dist_sqr > range * range {
                        continue;
                    }
                    let pos = result
                        .iter()
                        .position(|nb| dist_sqr <= nb.dist_sqr)
                        .unwrap_or(result.len());
                    if pos < MAX_NEIGHBORS {
                        if result.len() == MAX_NEIGHBORS {
                            result.pop();
                        }
                        result.insert(pos, Neighbor { idx: j, dist_sqr });
                    }
                }
                result
            };
            self.agents[idx].neighbors = neighbors;

            let filter = self.agent_filter(idx);
            let ag = &mut self.agents[idx];
            let range = ag.params.collision_query_range;
            if ag.boundary.needs_update(&ag.pos, range) || !ag.boundary.is_valid(nav, &filter) {
                let first = ag.corridor.first_poly();
                let pos = ag.pos;
                if let Err(e) = ag.boundary.update(first, &pos, range, nav, &filter) {
                    log::warn!("agent {idx} boundary update failed: {e}");
                }
            }
        }
    }

    /// Refreshes corner caches, shortens corridors, and launches off-mesh
    /// traversals.
    fn update_corners_and_triggers(&mut self) {
        let nav = self.nav;
        for idx in 0..self.max_agents {
            if !self.agents[idx].active || self.agents[idx].state != AgentState::Walking {
                continue;
            }
            if matches!(
                self.agents[idx].target_state,
                TargetState::None | TargetState::Velocity
            ) {
                self.agents[idx].corners.clear();
                continue;
            }

            let filter = self.agent_filter(idx);
            let corners = match self.agents[idx].corridor.find_corners(MAX_CORNERS, nav) {
                Ok(corners) => corners,
                Err(e) => {
                    log::warn!("agent {idx} corner search failed: {e}");
                    Vec::new()
                }
            };

            let ag = &mut self.agents[idx];
            if ag.params.update_flags.contains(UpdateFlags::OPTIMIZE_VIS) && !corners.is_empty()
            {
                let next = corners[corners.len().min(2) - 1].pos;
                let range = ag.params.path_optimization_range;
                ag.corridor.optimize_path_visibility(&next, range, nav, &filter);
            }
            ag.corners = corners;

            // Off-mesh connection just ahead: hand the agent to the
            // traversal animation.
            let trigger = {
                let ag = &self.agents[idx];
                match ag.corners.last() {
                    Some(last)
                        if (last.flags & STRAIGHTPATH_OFFMESH_CONNECTION) != 0
                            && vdist_2d(&ag.pos, &last.pos)
                                < ag.params.radius * OFFMESH_TRIGGER_SCALE =>
                    {
                        Some(last.poly)
                    }
                    _ => None,
                }
            };
            if let Some(offmesh_ref) = trigger {
                let ag = &mut self.agents[idx];
                match ag.corridor.move_over_offmesh_connection(offmesh_ref, nav) {
                    Ok(Some((start, end))) => {
                        ag.anim = OffMeshAnimation {
                            active: true,
                            init_pos: ag.pos,
                            start_pos: start,
                            end_pos: end,
                            t: 0.0,
                            t_max: if ag.params.max_speed > 0.0 {
                                (vdist_2d(&start, &end) / ag.params.max_speed) * 0.5
                            } else {
                                0.0
                            },
                        };
                        ag.state = AgentState::OffMesh;
                        ag.corners.clear();
                        ag.neighbors.clear();
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("agent {idx} off-mesh traversal failed: {e}");
                    }
                }
            }
        }
    }

    /// Computes desired velocities from corners, target mode, and
    /// separation.
    fn calculate_steering(&mut self) {
        for idx in 0..self.max_agents {
            if !self.agents[idx].active || self.agents[idx].state != AgentState::Walking {
                continue;
            }
            if self.agents[idx].target_state == TargetState::None {
                let ag = &mut self.agents[idx];
                ag.dvel = [0.0; 3];
                ag.desired_speed = 0.0;
                continue;
            }

            let mut dvel;
            {
                let ag = &mut self.agents[idx];
                if ag.target_state == TargetState::Velocity {
                    dvel = ag.target_pos;
                    ag.desired_speed = vlen(&ag.target_pos);
                } else if ag.corners.is_empty() {
                    dvel = [0.0; 3];
                    ag.desired_speed = 0.0;
                } else {
                    let dir = if ag.params.update_flags.contains(UpdateFlags::ANTICIPATE_TURNS)
                        && ag.corners.len() > 1
                    {
                        calc_smooth_steer_direction(&ag.pos, &ag.corners)
                    } else {
                        calc_straight_steer_direction(&ag.pos, &ag.corners)
                    };

                    let range = ag.params.collision_query_range;
                    let slow_down = ag.distance_to_goal(range) / range;
                    ag.desired_speed = ag.params.max_speed * slow_down.clamp(0.0, 1.0);
                    dvel = vscale(&dir, ag.desired_speed);
                }
            }

            if self.agents[idx]
                .params
                .update_flags
                .contains(UpdateFlags::SEPARATION)
            {
                let separation = {
                    let ag = &self.agents[idx];
                    let sep_dist = ag.params.collision_query_range;
                    let inv_sep_dist = 1.0 / sep_dist;
                    let sep_weight = ag.params.separation_weight;
                    let mut disp = [0.0f32; 3];
                    let mut weight_sum = 0.0f32;

                    for nb in &ag.neighbors {
                        let other = &self.agents[nb.idx];
                        let diff = {
                            let mut d = vsub(&ag.pos, &other.pos);
                            d[1] = 0.0;
                            d
                        };
                        let dist_sqr = nav_common::vector::vlen_sqr(&diff);
                        if dist_sqr < 0.00001 || dist_sqr > sep_dist * sep_dist {
                            continue;
                        }
                        let dist = dist_sqr.sqrt();
                        let weight =
                            sep_weight * (1.0 - (dist * inv_sep_dist) * (dist * inv_sep_dist));
                        disp = vmad(&disp, &diff, weight / dist);
                        weight_sum += 1.0;
                    }
                    (weight_sum > 0.0001).then(|| vscale(&disp, 1.0 / weight_sum))
                };

                if let Some(separation) = separation {
                    let ag = &self.agents[idx];
                    dvel = vadd(&dvel, &separation);
                    // Separation must not propel the agent past its
                    // desired speed.
                    let speed = vlen_2d(&dvel);
                    if speed > ag.desired_speed && speed > 0.0001 {
                        dvel = vscale(&dvel, ag.desired_speed / speed);
                    }
                }
            }

            self.agents[idx].dvel = dvel;
        }
    }

    /// Runs obstacle avoidance for each agent that wants it
    fn plan_velocities(&mut self, debug: &mut Option<&mut ObstacleAvoidanceDebugData>) {
        for idx in 0..self.max_agents {
            if !self.agents[idx].active || self.agents[idx].state != AgentState::Walking {
                continue;
            }
            if !self.agents[idx]
                .params
                .update_flags
                .contains(UpdateFlags::OBSTACLE_AVOIDANCE)
            {
                self.agents[idx].nvel = self.agents[idx].dvel;
                continue;
            }

            let nvel = {
                let ag = &self.agents[idx];
                self.obstacle_query.reset();
                for nb in &ag.neighbors {
                    let other = &self.agents[nb.idx];
                    self.obstacle_query.add_circle(
                        &other.pos,
                        other.params.radius,
                        &other.vel,
                        &other.dvel,
                    );
                }
                for s in 0..ag.boundary.segment_count() {
                    let (p, q) = ag.boundary.segment(s);
                    self.obstacle_query.add_segment(p, q);
                }

                let params = self.avoidance_params[ag.params.obstacle_avoidance_type as usize];
                let (nvel, _samples) = self.obstacle_query.sample_velocity_adaptive(
                    &ag.pos,
                    ag.params.radius,
                    ag.desired_speed,
                    &ag.vel,
                    &ag.dvel,
                    &params,
                    debug.as_deref_mut(),
                );
                nvel
            };
            self.agents[idx].nvel = nvel;
        }
    }

    /// Accelerates toward the planned velocity and advances positions
    fn integrate(&mut self, dt: f32) {
        for ag in &mut self.agents {
            if !ag.active || ag.state != AgentState::Walking {
                continue;
            }
            let max_delta = ag.params.max_acceleration * dt;
            let mut dv = vsub(&ag.nvel, &ag.vel);
            let ds = vlen(&dv);
            if ds > max_delta && ds > 0.0001 {
                dv = vscale(&dv, max_delta / ds);
            }
            ag.vel = vadd(&ag.vel, &dv);

            if vlen(&ag.vel) > 0.0001 {
                ag.pos = vmad(&ag.pos, &ag.vel, dt);
            } else {
                ag.vel = [0.0; 3];
            }
        }
    }

    /// Pushes overlapping agent pairs apart by half the overlap each
    fn resolve_overlaps(&mut self) {
        for ag in &mut self.agents {
            ag.disp = [0.0; 3];
        }

        for i in 0..self.max_agents {
            if !self.agents[i].active || self.agents[i].state != AgentState::Walking {
                continue;
            }
            for j in (i + 1)..self.max_agents {
                if !self.agents[j].active || self.agents[j].state != AgentState::Walking {
                    continue;
                }
                let (a, b) = (&self.agents[i], &self.agents[j]);
                let combined = a.params.radius + b.params.radius;
                let dist = vdist_2d(&a.pos, &b.pos);
                if dist >= combined {
                    continue;
                }

                let overlap = combined - dist;
                let mut dir = vsub(&b.pos, &a.pos);
                dir[1] = 0.0;
                if dist > 0.0001 {
                    vnormalize(&mut dir);
                } else {
                    // Coincident agents; pick an arbitrary axis.
                    dir = [1.0, 0.0, 0.0];
                }
                let push = vscale(&dir, overlap * 0.5);
                self.agents[i].disp = vsub(&self.agents[i].disp, &push);
                self.agents[j].disp = vadd(&self.agents[j].disp, &push);
            }
        }

        for ag in &mut self.agents {
            if ag.active && ag.state == AgentState::Walking {
                ag.pos = vadd(&ag.pos, &ag.disp);
            }
        }
    }

    /// Commits integrated positions to the corridors, sliding along the
    /// mesh surface.
    fn move_along_corridors(&mut self) {
        let nav = self.nav;
        for idx in 0..self.max_agents {
            if !self.agents[idx].active || self.agents[idx].state != AgentState::Walking {
                continue;
            }
            let filter = self.agent_filter(idx);
            let ag = &mut self.agents[idx];
            let pos = ag.pos;
            if let Err(e) = ag.corridor.move_position(&pos, nav, &filter) {
                log::warn!("agent {idx} corridor move failed: {e}");
                continue;
            }
            ag.pos = *ag.corridor.pos();

            // Without an active path request the corridor just tracks the
            // agent.
            if matches!(ag.target_state, TargetState::None | TargetState::Velocity) {
                let first = ag.corridor.first_poly();
                let pos = ag.pos;
                ag.corridor.reset(first, &pos);
                ag.partial = false;
            }
        }
    }

    /// Advances off-mesh traversal animations
    fn update_offmesh_animations(&mut self, dt: f32) {
        for ag in &mut self.agents {
            if !ag.active || ag.state != AgentState::OffMesh || !ag.anim.active {
                continue;
            }
            ag.anim.t += dt;
            if ag.anim.t > ag.anim.t_max {
                ag.anim.active = false;
                ag.pos = ag.anim.end_pos;
                ag.state = AgentState::Walking;
                continue;
            }

            // Two-phase traversal: a short hop to the entry point, then
            // the crossing itself.
            let ta = ag.anim.t_max * 0.15;
            if ag.anim.t < ta {
                let u = tween(ag.anim.t, 0.0, ta);
                ag.pos = vlerp(&ag.anim.init_pos, &ag.anim.start_pos, u);
            } else {
                let u = tween(ag.anim.t, ta, ag.anim.t_max);
                ag.pos = vlerp(&ag.anim.start_pos, &ag.anim.end_pos, u);
            }
            ag.vel = [0.0; 3];
            ag.dvel = [0.0; 3];
        }
    }
}

fn tween(t: f32, t0: f32, t1: f32) -> f32 {
    if t1 - t0 <= 0.0 {
        return 1.0;
    }
    ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
}

/// Direction toward the first corner, normalized in the xz-plane
fn calc_straight_steer_direction(pos: &[f32; 3], corners: &[Corner]) -> [f32; 3] {
    let mut dir = vsub(&corners[0].pos, pos);
    dir[1] = 0.0;
    vnormalize(&mut dir);
    dir
}

/// Blend of the directions to the first two corners, weighted so the turn
/// starts before the first corner is reached.
fn calc_smooth_steer_direction(pos: &[f32; 3], corners: &[Corner]) -> [f32; 3] {
    let p0 = &corners[0].pos;
    let p1 = &corners[corners.len().min(2) - 1].pos;

    let mut dir0 = vsub(p0, pos);
    let mut dir1 = vsub(p1, pos);
    dir0[1] = 0.0;
    dir1[1] = 0.0;

    let len0 = vlen(&dir0);
    let len1 = vlen(&dir1);
    if len1 > 0.001 {
        dir1 = vscale(&dir1, 1.0 / len1);
    }

    let mut dir = [
        dir0[0] - dir1[0] * len0 * 0.5,
        0.0,
        dir0[2] - dir1[2] * len0 * 0.5,
    ];
    vnormalize(&mut dir);
    dir
}
